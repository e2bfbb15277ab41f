/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

#![allow(dead_code)]

use std::sync::Arc;

use alert_state::{
    memory::{MemoryAnnotations, MemoryDashboards, MemoryStore, StaticImageService},
    AlertRule, EvalResult, EvalState, Labels, Manager, ManagerConfig, Services, StateMetrics,
};
use chrono::{DateTime, TimeZone, Utc};
use prometheus::Registry;
use serde_json::json;

pub const ORG: i64 = 1;

/// A manager wired to in-memory collaborators.
pub struct Harness {
    pub manager: Manager,
    pub store: Arc<MemoryStore>,
    pub annotations: Arc<MemoryAnnotations>,
    pub dashboards: Arc<MemoryDashboards>,
    pub images: Arc<StaticImageService>,
    pub metrics: StateMetrics,
    pub registry: Registry,
}

pub fn harness() -> Harness {
    harness_with(ManagerConfig::default(), StaticImageService::new())
}

pub fn harness_with(config: ManagerConfig, images: StaticImageService) -> Harness {
    harness_from(config, images, MemoryDashboards::new())
}

pub fn harness_from(
    config: ManagerConfig,
    images: StaticImageService,
    dashboards: MemoryDashboards,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let annotations = Arc::new(MemoryAnnotations::new());
    let dashboards = Arc::new(dashboards);
    let images = Arc::new(images);
    let registry = Registry::new();
    let metrics = StateMetrics::new(&registry).unwrap();
    let services = Services::memory(
        store.clone(),
        images.clone(),
        annotations.clone(),
        dashboards.clone(),
    );
    Harness {
        manager: Manager::new(config, services, metrics.clone()),
        store,
        annotations,
        dashboards,
        images,
        metrics,
        registry,
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn rule(uid: &str) -> AlertRule {
    rule_with(uid, json!({}))
}

/// A rule evaluated every 10 seconds, without pending period.
pub fn rule_with(uid: &str, extra: serde_json::Value) -> AlertRule {
    let mut rule = json!({
        "id": 1,
        "org_id": ORG,
        "uid": uid,
        "title": "High CPU",
        "namespace_uid": "infra",
        "rule_group": "hosts",
        "condition": "B",
        "interval_seconds": 10,
        "annotations": {"summary": "cpu usage is high"}
    });
    if let (Some(rule), Some(extra)) = (rule.as_object_mut(), extra.as_object()) {
        rule.extend(extra.clone());
    }
    serde_json::from_value(rule).unwrap()
}

pub fn instance(host: &str) -> Labels {
    [("instance", host)].into_iter().collect()
}

pub fn result(host: &str, state: EvalState, secs: i64) -> EvalResult {
    EvalResult::new(instance(host), state, at(secs)).with_value("B", Some(1.0))
}
