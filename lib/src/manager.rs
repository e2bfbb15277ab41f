/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::{sync::watch, sync::Mutex as AsyncMutex, task::JoinHandle};
use tracing::instrument;

use crate::{
    annotations::{AnnotationRequest, AnnotationWriter, InstanceStateAndReason},
    cache::Cache,
    config::ManagerConfig,
    error::Result,
    eval::{EvalResult, EvalState},
    ids::{CacheId, Labels, OrgId, RuleKey, RuleUid},
    image::{should_take_image, take_image, Image},
    metrics::{Operation, StateMetrics},
    rule::AlertRule,
    state::{State, STATE_REASON_MISSING_SERIES},
    store::{AlertInstance, Services},
};

/// Keeps track of the state of all alert instances.
pub struct Manager {
    config: ManagerConfig,
    cache: Arc<Cache>,
    services: Services,
    metrics: StateMetrics,
    /// Serializes the processing of results of the same rule.
    locks: RwLock<BTreeMap<RuleKey, Arc<AsyncMutex<()>>>>,
    annotations: AnnotationWriter,
    runner: Mutex<Option<MetricsRunner>>,
}

struct MetricsRunner {
    term_sender: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Manager {
    /// Create a manager and start its background tasks. Must be
    /// called from within a tokio runtime.
    pub fn new(config: ManagerConfig, services: Services, metrics: StateMetrics) -> Self {
        let cache = Arc::new(Cache::new());
        let annotations = AnnotationWriter::start(
            services.annotations.clone(),
            services.dashboards.clone(),
            config.annotation_queue_size,
            metrics.clone(),
        );

        let (term_sender, term_receiver) = watch::channel(false);
        let handle = tokio::spawn(metrics_runner(
            cache.clone(),
            metrics.clone(),
            config.metrics_interval,
            term_receiver,
        ));

        Self {
            config,
            cache,
            services,
            metrics,
            locks: RwLock::new(BTreeMap::new()),
            annotations,
            runner: Mutex::new(Some(MetricsRunner {
                term_sender,
                handle,
            })),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &StateMetrics {
        &self.metrics
    }

    /// Rebuild the cache from the persisted alert instances.
    #[instrument(skip_all)]
    pub async fn warm(&self) {
        log::info!("warming state cache for startup");
        self.cache.reset();

        let org_ids = match self.services.instances.fetch_org_ids().await {
            Ok(org_ids) => org_ids,
            Err(e) => {
                log::error!("unable to fetch organization ids: {e}");
                self.metrics.record_error(Operation::Warm, &e);
                return;
            }
        };

        let mut count = 0;
        for org_id in org_ids {
            let rules = match self.services.rules.list_alert_rules(org_id).await {
                Ok(rules) => rules
                    .into_iter()
                    .map(|rule| (rule.uid.clone(), rule))
                    .collect::<BTreeMap<_, _>>(),
                Err(e) => {
                    log::error!("unable to fetch previous state for org {org_id}: {e}");
                    self.metrics.record_error(Operation::Warm, &e);
                    continue;
                }
            };

            let instances = match self.services.instances.list_alert_instances(org_id).await {
                Ok(instances) => instances,
                Err(e) => {
                    log::error!("unable to fetch previous state for org {org_id}: {e}");
                    self.metrics.record_error(Operation::Warm, &e);
                    continue;
                }
            };

            for instance in instances {
                match rules.get(&instance.rule_uid) {
                    Some(rule) => {
                        self.cache.set(restore_state(instance, rule));
                        count += 1;
                    }
                    None => log::error!(
                        "rule not found for instance, ignoring: org_id={org_id} rule_uid={}",
                        instance.rule_uid
                    ),
                }
            }
        }

        log::info!("state cache has been initialized: {count} states");
    }

    /// Apply the results of one evaluation of a rule. Returns the
    /// updated states followed by the stale states that were resolved.
    #[instrument(skip_all, fields(org_id = %rule.org_id, rule_uid = %rule.uid, results = results.len()))]
    pub async fn process_eval_results(
        &self,
        evaluated_at: DateTime<Utc>,
        rule: &AlertRule,
        results: &[EvalResult],
        extra_labels: &Labels,
    ) -> Vec<State> {
        let lock = self.rule_lock(rule.key());
        let _guard = lock.lock().await;

        log::debug!(
            "processing {} evaluation results for {}",
            results.len(),
            rule.key()
        );

        let mut states = Vec::with_capacity(results.len());
        let mut processed = BTreeSet::new();
        for result in results {
            let state = self.set_next_state(rule, result, extra_labels).await;
            processed.insert(state.cache_id.clone());
            states.push(state);
        }

        let resolved = self
            .stale_results_handler(evaluated_at, rule, &processed)
            .await;
        states.extend(resolved);
        states
    }

    pub fn get(&self, org_id: OrgId, rule_uid: &RuleUid, id: &CacheId) -> Result<State> {
        self.cache.get(org_id, rule_uid, id)
    }

    pub fn get_all(&self, org_id: OrgId) -> Vec<State> {
        self.cache.get_all(org_id)
    }

    pub fn get_states_for_rule_uid(&self, org_id: OrgId, rule_uid: &RuleUid) -> Vec<State> {
        self.cache.get_states_for_rule_uid(org_id, rule_uid)
    }

    /// Insert states directly, replacing existing ones.
    pub fn put(&self, states: Vec<State>) {
        for state in states {
            self.cache.set(state);
        }
    }

    /// Forget the state of all instances of a rule. Returns the
    /// removed states.
    #[instrument(skip_all, fields(org_id = %key.org_id, rule_uid = %key.uid))]
    pub async fn reset_state_by_rule_uid(&self, key: &RuleKey) -> Vec<State> {
        let lock = self.rule_lock(key.clone());
        let _guard = lock.lock().await;

        let states = self.cache.remove_by_rule_uid(key.org_id, &key.uid);
        if !states.is_empty() {
            if let Err(e) = self.services.instances.delete_alert_instances_by_rule(key).await {
                log::error!("failed to delete states that belong to rule {key}: {e}");
                self.metrics.record_error(Operation::DeleteInstance, &e);
            }
        }

        // Only this call and the table hold the lock when nobody waits on it.
        let mut locks = self.locks.write();
        if locks
            .get(key)
            .is_some_and(|held| Arc::strong_count(held) <= 2)
        {
            locks.remove(key);
        }
        drop(locks);

        log::info!("rules state was reset for {key}: {} states", states.len());
        states
    }

    pub fn reset_all_states(&self) {
        self.cache.reset();
        self.locks
            .write()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Stop the metrics runner and flush the pending annotations.
    #[instrument(skip_all)]
    pub async fn close(&self) {
        let runner = self.runner.lock().take();
        let Some(runner) = runner else {
            log::warn!("state manager is already closed");
            return;
        };

        if let Err(e) = runner.term_sender.send(true) {
            log::warn!("failed to send termination signal: {e}");
        }
        if let Err(e) = runner.handle.await {
            log::warn!("failed to join metrics runner: {e}");
        }

        self.annotations.close().await;
        log::info!("state manager closed");
    }

    fn rule_lock(&self, key: RuleKey) -> Arc<AsyncMutex<()>> {
        self.locks
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn set_next_state(
        &self,
        rule: &AlertRule,
        result: &EvalResult,
        extra_labels: &Labels,
    ) -> State {
        let mut state = self.cache.get_or_create(rule, result, extra_labels);
        let transition = state.apply_result(rule, result, self.config.resend_delay);

        log::debug!(
            "setting alert state for {} {{{}}}: {}",
            rule.key(),
            state.labels,
            state.state
        );

        if should_take_image(
            state.state,
            transition.previous_state,
            state.image.as_ref(),
            state.resolved,
        ) {
            if let Some(image) = self.capture_image(rule).await {
                state.image = Some(image);
            }
        }

        self.cache.set(state.clone());

        if let Err(e) = self
            .services
            .instances
            .save_alert_instance(AlertInstance::from_state(&state))
            .await
        {
            log::error!(
                "failed to save alert state for {} {{{}}}: {e}",
                rule.key(),
                state.labels
            );
            self.metrics.record_error(Operation::SaveInstance, &e);
        }

        if transition.changed(&state) {
            self.annotate(
                rule,
                &state.labels,
                result.evaluated_at,
                InstanceStateAndReason::new(transition.previous_state, transition.previous_reason),
                InstanceStateAndReason::new(state.state, state.state_reason.clone()),
            );
        }

        state
    }

    /// Remove the instances that were not part of the last evaluations,
    /// resolving the ones that were alerting.
    async fn stale_results_handler(
        &self,
        evaluated_at: DateTime<Utc>,
        rule: &AlertRule,
        processed: &BTreeSet<CacheId>,
    ) -> Vec<State> {
        let mut resolved = Vec::new();
        let mut resolved_image: Option<Option<Image>> = None;

        for mut state in self.cache.get_states_for_rule_uid(rule.org_id, &rule.uid) {
            if processed.contains(&state.cache_id)
                || !is_stale(evaluated_at, state.last_evaluation_time, rule.interval())
            {
                continue;
            }

            log::debug!(
                "detected stale state entry for {} {{{}}}",
                rule.key(),
                state.labels
            );
            self.cache
                .delete_entry(rule.org_id, &rule.uid, &state.cache_id);
            if let Err(e) = self
                .services
                .instances
                .delete_alert_instance(rule.org_id, &rule.uid, &state.cache_id)
                .await
            {
                log::error!(
                    "failed to delete stale state for {} {{{}}}: {e}",
                    rule.key(),
                    state.labels
                );
                self.metrics.record_error(Operation::DeleteInstance, &e);
            }

            if state.state == EvalState::Alerting {
                let previous = InstanceStateAndReason::new(state.state, state.state_reason.clone());
                state.resolve(STATE_REASON_MISSING_SERIES, evaluated_at);
                state.last_evaluation_time = evaluated_at;

                self.annotate(
                    rule,
                    &state.labels,
                    evaluated_at,
                    previous,
                    InstanceStateAndReason::new(state.state, state.state_reason.clone()),
                );

                if resolved_image.is_none() {
                    resolved_image = Some(self.capture_image(rule).await);
                }
                state.image = resolved_image.clone().flatten();
                resolved.push(state);
            }
        }

        resolved
    }

    async fn capture_image(&self, rule: &AlertRule) -> Option<Image> {
        match take_image(&*self.services.images, rule, self.config.image_timeout).await {
            Ok(image) => image,
            Err(e) => {
                log::warn!("failed to take an image for {}: {e}", rule.key());
                self.metrics.record_error(Operation::TakeImage, &e);
                None
            }
        }
    }

    /// Queue an annotation for a state transition. The dashboard
    /// lookup and the write happen in the annotation writer.
    fn annotate(
        &self,
        rule: &AlertRule,
        labels: &Labels,
        evaluated_at: DateTime<Utc>,
        previous: InstanceStateAndReason,
        current: InstanceStateAndReason,
    ) {
        log::debug!(
            "alert state changed, creating annotation for {} {{{labels}}}: {previous} -> {current}",
            rule.key()
        );
        let request = AnnotationRequest::new(rule, labels, evaluated_at, &previous, &current);
        if let Err(e) = self.annotations.enqueue(request) {
            log::warn!("failed to create annotation for {}: {e}", rule.key());
            self.metrics.record_error(Operation::Annotate, &e);
        }
    }
}

/// Rebuild the state of a persisted instance.
fn restore_state(instance: AlertInstance, rule: &AlertRule) -> State {
    let mut state = State::new(
        instance.org_id,
        instance.rule_uid,
        instance.labels,
        rule.annotations.clone(),
        instance.last_eval_time,
    );
    state.state = instance.current_state.eval_state();
    state.state_reason = instance.current_reason;
    state.starts_at = instance.current_state_since;
    state.ends_at = instance.current_state_end;
    state
}

/// An instance is stale when it was not evaluated for two intervals.
fn is_stale(evaluated_at: DateTime<Utc>, last_evaluation: DateTime<Utc>, interval: Duration) -> bool {
    match interval
        .checked_mul(2)
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .and_then(|d| last_evaluation.checked_add_signed(d))
    {
        Some(deadline) => deadline <= evaluated_at,
        None => false,
    }
}

async fn metrics_runner(
    cache: Arc<Cache>,
    metrics: StateMetrics,
    interval: Duration,
    mut term_receiver: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(interval.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = term_receiver.changed() => if changed.is_err() || *term_receiver.borrow() {
                break
            },
            _ = interval.tick() => {
                log::debug!("recording state cache metrics");
                cache.record_metrics(&metrics);
            }
        }
    }
}
