/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::fmt::Display;

use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

use crate::{
    error::{Error, ErrorKind, Result},
    eval::EvalState,
    ids::OrgId,
};

/// Metrics published by the state manager and its cache.
#[derive(Clone)]
pub struct StateMetrics {
    alert_state: IntGaugeVec,
    group_rules: IntGaugeVec,
    cache_instances: IntGauge,
    state_errors: IntCounterVec,
    annotations_written: IntCounter,
}

/// The manager operation an error was reported from.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Operation {
    Warm,
    SaveInstance,
    DeleteInstance,
    TakeImage,
    Annotate,
}

impl StateMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let alert_state = IntGaugeVec::new(
            Opts::new("alerting_alerts", "How many alerts by state."),
            &["state"],
        )?;
        let group_rules = IntGaugeVec::new(
            Opts::new(
                "alerting_rule_group_rules",
                "The number of rules with instances in the cache, per organization.",
            ),
            &["org"],
        )?;
        let cache_instances = IntGauge::new(
            "alerting_cache_instances",
            "The number of alert instances held in the state cache.",
        )?;
        let state_errors = IntCounterVec::new(
            Opts::new(
                "alerting_state_errors_total",
                "Non-fatal errors encountered while managing alert state.",
            ),
            &["kind", "operation"],
        )?;
        let annotations_written = IntCounter::new(
            "alerting_annotations_written_total",
            "The number of state history annotations written.",
        )?;

        registry.register(Box::new(alert_state.clone()))?;
        registry.register(Box::new(group_rules.clone()))?;
        registry.register(Box::new(cache_instances.clone()))?;
        registry.register(Box::new(state_errors.clone()))?;
        registry.register(Box::new(annotations_written.clone()))?;

        Ok(Self {
            alert_state,
            group_rules,
            cache_instances,
            state_errors,
            annotations_written,
        })
    }

    pub fn set_alert_state(&self, state: EvalState, count: usize) {
        self.alert_state
            .with_label_values(&[state.as_str()])
            .set(count as i64);
    }

    pub fn reset_group_rules(&self) {
        self.group_rules.reset();
    }

    pub fn set_group_rules(&self, org_id: OrgId, count: usize) {
        self.group_rules
            .with_label_values(&[&org_id.to_string()])
            .set(count as i64);
    }

    pub fn set_cache_instances(&self, count: usize) {
        self.cache_instances.set(count as i64);
    }

    pub fn record_error(&self, operation: Operation, error: &Error) {
        self.state_errors
            .with_label_values(&[error.kind().as_str(), operation.as_str()])
            .inc();
    }

    pub fn annotation_written(&self) {
        self.annotations_written.inc();
    }

    pub fn alerts(&self, state: EvalState) -> i64 {
        self.alert_state.with_label_values(&[state.as_str()]).get()
    }

    pub fn group_rules(&self, org_id: OrgId) -> i64 {
        self.group_rules
            .with_label_values(&[&org_id.to_string()])
            .get()
    }

    pub fn cache_instances(&self) -> i64 {
        self.cache_instances.get()
    }

    pub fn errors(&self, kind: ErrorKind, operation: Operation) -> u64 {
        self.state_errors
            .with_label_values(&[kind.as_str(), operation.as_str()])
            .get()
    }

    pub fn annotations_written(&self) -> u64 {
        self.annotations_written.get()
    }
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Warm => "warm",
            Operation::SaveInstance => "save_instance",
            Operation::DeleteInstance => "delete_instance",
            Operation::TakeImage => "take_image",
            Operation::Annotate => "annotate",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
