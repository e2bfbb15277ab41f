/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{fmt::Display, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

use crate::{
    error::{Error, Result},
    eval::EvalState,
    ids::{Labels, RuleKey},
    metrics::{Operation, StateMetrics},
    rule::AlertRule,
    store::{AnnotationItem, AnnotationsRepository, DashboardService},
};

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct InstanceStateAndReason {
    pub state: EvalState,
    pub reason: String,
}

impl InstanceStateAndReason {
    pub fn new<T: Into<String>>(state: EvalState, reason: T) -> Self {
        Self {
            state,
            reason: reason.into(),
        }
    }
}

impl Display for InstanceStateAndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason.is_empty() {
            true => write!(f, "{}", self.state),
            false => write!(f, "{} ({})", self.state, self.reason),
        }
    }
}

/// An annotation for a state transition of an instance, not yet linked
/// to its dashboard.
#[derive(Clone, Debug)]
pub struct AnnotationRequest {
    item: AnnotationItem,
    rule: RuleKey,
    dashboard_uid: Option<String>,
    panel_id: String,
}

impl AnnotationRequest {
    pub fn new(
        rule: &AlertRule,
        labels: &Labels,
        evaluated_at: DateTime<Utc>,
        previous: &InstanceStateAndReason,
        current: &InstanceStateAndReason,
    ) -> Self {
        Self {
            item: AnnotationItem {
                alert_id: rule.id,
                org_id: rule.org_id,
                prev_state: previous.to_string(),
                new_state: current.to_string(),
                text: format!(
                    "{} {{{}}} - {}",
                    rule.title,
                    labels.without_private(),
                    current
                ),
                epoch: evaluated_at.timestamp_millis(),
                dashboard_id: None,
                panel_id: None,
            },
            rule: rule.key(),
            dashboard_uid: rule.dashboard_uid().map(str::to_string),
            panel_id: rule.panel_id().unwrap_or_default().to_string(),
        }
    }

    /// Link the annotation to the rule's dashboard panel, if any.
    pub async fn resolve(self, dashboards: &dyn DashboardService) -> Result<AnnotationItem> {
        let mut item = self.item;
        if let Some(dashboard_uid) = self.dashboard_uid {
            item.panel_id = Some(
                self.panel_id
                    .parse()
                    .map_err(|e| Error::InvalidPanelId(self.panel_id.clone(), e))?,
            );
            item.dashboard_id = Some(
                dashboards
                    .get_dashboard_id(item.org_id, &dashboard_uid)
                    .await?,
            );
        }
        Ok(item)
    }
}

/// Writes annotations from a bounded queue in a background task.
pub struct AnnotationWriter {
    sender: Mutex<Option<mpsc::Sender<AnnotationRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AnnotationWriter {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn start(
        repository: Arc<dyn AnnotationsRepository>,
        dashboards: Arc<dyn DashboardService>,
        queue_size: usize,
        metrics: StateMetrics,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let worker = tokio::spawn(annotation_worker(repository, dashboards, receiver, metrics));
        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn enqueue(&self, request: AnnotationRequest) -> Result<()> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(Error::AnnotationQueueClosed)?;
        sender.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => Error::AnnotationQueueFull,
            TrySendError::Closed(_) => Error::AnnotationQueueClosed,
        })
    }

    /// Stop accepting annotations and wait until the queued ones are
    /// written.
    pub async fn close(&self) {
        drop(self.sender.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                log::warn!("failed to join annotation writer: {e}");
            }
        }
    }
}

async fn annotation_worker(
    repository: Arc<dyn AnnotationsRepository>,
    dashboards: Arc<dyn DashboardService>,
    mut receiver: mpsc::Receiver<AnnotationRequest>,
    metrics: StateMetrics,
) {
    while let Some(request) = receiver.recv().await {
        let rule = request.rule.clone();
        let item = match request.resolve(&*dashboards).await {
            Ok(item) => item,
            Err(e) => {
                log::warn!("failed to create annotation for {rule}: {e}");
                metrics.record_error(Operation::Annotate, &e);
                continue;
            }
        };
        match repository.save(item).await {
            Ok(()) => metrics.annotation_written(),
            Err(e) => {
                log::error!("failed to save annotation for new alert state of {rule}: {e}");
                metrics.record_error(Operation::Annotate, &e);
            }
        }
    }
    log::debug!("annotation writer stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use prometheus::Registry;
    use serde_json::json;

    use super::{AnnotationRequest, AnnotationWriter, InstanceStateAndReason};
    use crate::{
        error::{Error, ErrorKind},
        eval::EvalState,
        ids::{Labels, OrgId},
        memory::{MemoryAnnotations, MemoryDashboards},
        metrics::{Operation, StateMetrics},
        rule::AlertRule,
    };

    fn rule(annotations: serde_json::Value) -> AlertRule {
        serde_json::from_value(json!({
            "id": 42,
            "org_id": 1,
            "uid": "cpu",
            "title": "High CPU",
            "interval_seconds": 10,
            "annotations": annotations
        }))
        .unwrap()
    }

    fn labels() -> Labels {
        [("__alert_rule_uid__", "cpu"), ("instance", "host-1")]
            .into_iter()
            .collect()
    }

    fn request(rule: &AlertRule) -> AnnotationRequest {
        AnnotationRequest::new(
            rule,
            &labels(),
            Utc.timestamp_opt(0, 0).unwrap(),
            &InstanceStateAndReason::new(EvalState::Normal, ""),
            &InstanceStateAndReason::new(EvalState::Alerting, ""),
        )
    }

    fn writer(
        repository: &Arc<MemoryAnnotations>,
        dashboards: &Arc<MemoryDashboards>,
        queue_size: usize,
        metrics: &StateMetrics,
    ) -> AnnotationWriter {
        AnnotationWriter::start(
            repository.clone(),
            dashboards.clone(),
            queue_size,
            metrics.clone(),
        )
    }

    #[test]
    fn state_and_reason() {
        assert_eq!(
            InstanceStateAndReason::new(EvalState::Alerting, "").to_string(),
            "Alerting"
        );
        assert_eq!(
            InstanceStateAndReason::new(EvalState::Normal, "MissingSeries").to_string(),
            "Normal (MissingSeries)"
        );
    }

    #[tokio::test]
    async fn annotation_text() {
        let dashboards = MemoryDashboards::new();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let item = AnnotationRequest::new(
            &rule(json!({})),
            &labels(),
            at,
            &InstanceStateAndReason::new(EvalState::Normal, ""),
            &InstanceStateAndReason::new(EvalState::Alerting, ""),
        )
        .resolve(&dashboards)
        .await
        .unwrap();
        assert_eq!(item.text, "High CPU {instance=host-1} - Alerting");
        assert_eq!(item.alert_id, 42);
        assert_eq!(item.prev_state, "Normal");
        assert_eq!(item.epoch, 1_700_000_000_000);
        assert_eq!(item.dashboard_id, None);
    }

    #[tokio::test]
    async fn dashboard_linkage() {
        let dashboards = MemoryDashboards::new();
        dashboards.add(OrgId::new(1), "dash-1", 12);

        let linked = rule(json!({"__dashboardUid__": "dash-1", "__panelId__": "3"}));
        let item = request(&linked).resolve(&dashboards).await.unwrap();
        assert_eq!(item.dashboard_id, Some(12));
        assert_eq!(item.panel_id, Some(3));

        let bad_panel = rule(json!({"__dashboardUid__": "dash-1", "__panelId__": "three"}));
        let err = request(&bad_panel).resolve(&dashboards).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);

        let missing = rule(json!({"__dashboardUid__": "dash-2", "__panelId__": "3"}));
        let err = request(&missing).resolve(&dashboards).await.unwrap_err();
        assert!(matches!(err, Error::DashboardNotFound(_)));
    }

    #[tokio::test]
    async fn writer_drains_on_close() {
        let repository = Arc::new(MemoryAnnotations::new());
        let dashboards = Arc::new(MemoryDashboards::new());
        let metrics = StateMetrics::new(&Registry::new()).unwrap();
        let writer = writer(&repository, &dashboards, 8, &metrics);
        let rule = rule(json!({}));
        writer.enqueue(request(&rule)).unwrap();
        writer.enqueue(request(&rule)).unwrap();
        writer.close().await;

        assert_eq!(repository.items().len(), 2);
        assert_eq!(metrics.annotations_written(), 2);
        assert!(matches!(
            writer.enqueue(request(&rule)),
            Err(Error::AnnotationQueueClosed)
        ));
        writer.close().await;
    }

    #[tokio::test]
    async fn full_queue_rejects() {
        let repository = Arc::new(MemoryAnnotations::new());
        let dashboards = Arc::new(MemoryDashboards::new());
        let metrics = StateMetrics::new(&Registry::new()).unwrap();
        let writer = writer(&repository, &dashboards, 1, &metrics);
        let rule = rule(json!({}));
        // The worker cannot run before this task yields.
        writer.enqueue(request(&rule)).unwrap();
        assert!(matches!(
            writer.enqueue(request(&rule)),
            Err(Error::AnnotationQueueFull)
        ));
        writer.close().await;
        assert_eq!(repository.items().len(), 1);
    }

    #[tokio::test]
    async fn worker_failures_are_counted() {
        let repository = Arc::new(MemoryAnnotations::new());
        repository.set_fail(true);
        let dashboards = Arc::new(MemoryDashboards::new());
        let metrics = StateMetrics::new(&Registry::new()).unwrap();
        let writer = writer(&repository, &dashboards, 8, &metrics);
        writer.enqueue(request(&rule(json!({})))).unwrap();
        writer.close().await;
        assert!(repository.items().is_empty());
        assert_eq!(metrics.annotations_written(), 0);
        assert_eq!(
            metrics.errors(ErrorKind::DiagnosticCapture, Operation::Annotate),
            1
        );
    }

    #[tokio::test]
    async fn worker_links_dashboards() {
        let repository = Arc::new(MemoryAnnotations::new());
        let dashboards = Arc::new(MemoryDashboards::new());
        dashboards.add(OrgId::new(1), "dash-1", 12);
        let metrics = StateMetrics::new(&Registry::new()).unwrap();
        let writer = writer(&repository, &dashboards, 8, &metrics);
        writer
            .enqueue(request(&rule(
                json!({"__dashboardUid__": "dash-1", "__panelId__": "3"}),
            )))
            .unwrap();
        writer
            .enqueue(request(&rule(
                json!({"__dashboardUid__": "dash-1", "__panelId__": "three"}),
            )))
            .unwrap();
        writer.close().await;

        let items = repository.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].dashboard_id, Some(12));
        assert_eq!(
            metrics.errors(ErrorKind::DataIntegrity, Operation::Annotate),
            1
        );
    }
}
