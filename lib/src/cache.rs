/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::{Mutex, RwLock};

use crate::{
    error::{Error, Result},
    eval::{EvalResult, EvalState},
    ids::{CacheId, Labels, OrgId, RuleUid},
    metrics::StateMetrics,
    rule::AlertRule,
    state::State,
};

type RuleStates = Arc<Mutex<BTreeMap<CacheId, State>>>;
type OrgStates = Arc<RwLock<BTreeMap<RuleUid, RuleStates>>>;

/// In-memory alert instance states, per organization and rule.
///
/// Lock order is organizations, then the rules of an organization,
/// then the instances of a rule. Only the innermost lock is held for
/// the duration of an operation on a single rule.
#[derive(Default)]
pub struct Cache {
    states: RwLock<BTreeMap<OrgId, OrgStates>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the instance the result belongs to, creating it in the
    /// normal state if it does not exist yet.
    pub fn get_or_create(&self, rule: &AlertRule, result: &EvalResult, extra_labels: &Labels) -> State {
        let (labels, dupes) = merge_labels(rule, result, extra_labels);
        if !dupes.is_empty() {
            log::warn!(
                "rule {} declared labels that conflict with labels set by the scheduler; \
                 ignoring them: {dupes}",
                rule.key()
            );
        }
        let id = labels.cache_id();
        let rule_states = self.rule_or_insert(rule.org_id, &rule.uid);
        let mut states = rule_states.lock();
        match states.get_mut(&id) {
            Some(state) => {
                state.annotations = rule.annotations.clone();
                state.clone()
            }
            None => {
                let state = State::new(
                    rule.org_id,
                    rule.uid.clone(),
                    labels,
                    rule.annotations.clone(),
                    result.evaluated_at,
                );
                states.insert(id, state.clone());
                state
            }
        }
    }

    pub fn set(&self, state: State) {
        let rule_states = self.rule_or_insert(state.org_id, &state.alert_rule_uid);
        let mut states = rule_states.lock();
        states.insert(state.cache_id.clone(), state);
    }

    pub fn get(&self, org_id: OrgId, rule_uid: &RuleUid, id: &CacheId) -> Result<State> {
        let state = match self.rule(org_id, rule_uid) {
            Some(states) => states.lock().get(id).cloned(),
            None => None,
        };
        state.ok_or_else(|| Error::StateNotFound(org_id, rule_uid.clone(), id.clone()))
    }

    pub fn get_all(&self, org_id: OrgId) -> Vec<State> {
        let Some(org) = self.org(org_id) else {
            return Vec::new();
        };
        let rules = org.read();
        let states = rules
            .values()
            .flat_map(|states| states.lock().values().cloned().collect::<Vec<_>>())
            .collect();
        states
    }

    pub fn get_states_for_rule_uid(&self, org_id: OrgId, rule_uid: &RuleUid) -> Vec<State> {
        let Some(states) = self.rule(org_id, rule_uid) else {
            return Vec::new();
        };
        let states = states.lock().values().cloned().collect();
        states
    }

    pub fn remove_by_rule_uid(&self, org_id: OrgId, rule_uid: &RuleUid) -> Vec<State> {
        let Some(org) = self.org(org_id) else {
            return Vec::new();
        };
        let removed = org.write().remove(rule_uid);
        let Some(states) = removed else {
            return Vec::new();
        };
        let states = std::mem::take(&mut *states.lock());
        states.into_values().collect()
    }

    pub fn delete_entry(&self, org_id: OrgId, rule_uid: &RuleUid, id: &CacheId) -> Option<State> {
        let states = self.rule(org_id, rule_uid)?;
        let state = states.lock().remove(id);
        state
    }

    pub fn reset(&self) {
        self.states.write().clear();
    }

    /// Publish instance counts per state, rules per organization and
    /// the total number of cached instances.
    pub fn record_metrics(&self, metrics: &StateMetrics) {
        let mut counts = EvalState::states()
            .map(|state| (state, 0))
            .collect::<BTreeMap<_, _>>();
        let mut total = 0;

        metrics.reset_group_rules();
        let orgs = self.states.read();
        for (org_id, org) in orgs.iter() {
            let rules = org.read();
            let mut active_rules = 0;
            for states in rules.values() {
                let states = states.lock();
                if !states.is_empty() {
                    active_rules += 1;
                }
                for state in states.values() {
                    *counts.entry(state.state).or_default() += 1;
                    total += 1;
                }
            }
            metrics.set_group_rules(*org_id, active_rules);
        }

        for (state, count) in counts {
            metrics.set_alert_state(state, count);
        }
        metrics.set_cache_instances(total);
    }

    fn org(&self, org_id: OrgId) -> Option<OrgStates> {
        self.states.read().get(&org_id).cloned()
    }

    fn rule(&self, org_id: OrgId, rule_uid: &RuleUid) -> Option<RuleStates> {
        let org = self.org(org_id)?;
        let states = org.read().get(rule_uid).cloned();
        states
    }

    fn rule_or_insert(&self, org_id: OrgId, rule_uid: &RuleUid) -> RuleStates {
        if let Some(states) = self.rule(org_id, rule_uid) {
            return states;
        }
        let org = self
            .states
            .write()
            .entry(org_id)
            .or_default()
            .clone();
        let states = org.write().entry(rule_uid.clone()).or_default().clone();
        states
    }
}

/// Merge the instance labels. Extra labels take precedence over rule
/// labels, which take precedence over the result's labels. Returns the
/// rule labels that were overridden by extra labels.
fn merge_labels(rule: &AlertRule, result: &EvalResult, extra_labels: &Labels) -> (Labels, Labels) {
    let mut labels = extra_labels.clone();
    let mut dupes = Labels::new();

    for (name, value) in rule.labels.iter() {
        if labels.contains(name) {
            dupes.insert(name.clone(), value.clone());
        } else {
            labels.insert(name.clone(), value.clone());
        }
    }

    for (name, value) in result.instance.iter() {
        if !labels.contains(name) {
            labels.insert(name.clone(), value.clone());
        }
    }

    (labels, dupes)
}
