/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{fmt::Display, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    eval::EvalState,
    ids::{CacheId, Labels, OrgId, RuleKey, RuleUid},
    image::Image,
    rule::AlertRule,
    state::State,
};

/// Persisted form of an alert instance.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct AlertInstance {
    pub org_id: OrgId,
    pub rule_uid: RuleUid,
    pub labels: Labels,
    pub labels_hash: CacheId,
    pub current_state: InstanceStateType,
    #[serde(default)]
    pub current_reason: String,
    pub current_state_since: DateTime<Utc>,
    pub current_state_end: DateTime<Utc>,
    pub last_eval_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum InstanceStateType {
    #[serde(rename = "Alerting")]
    Firing,
    Normal,
    Pending,
    NoData,
    Error,
}

/// An audit record of a state transition.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct AnnotationItem {
    pub alert_id: i64,
    pub org_id: OrgId,
    pub prev_state: String,
    pub new_state: String,
    pub text: String,
    /// Milliseconds since the unix epoch.
    pub epoch: i64,
    #[serde(default)]
    pub dashboard_id: Option<i64>,
    #[serde(default)]
    pub panel_id: Option<i64>,
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_alert_rules(&self, org_id: OrgId) -> Result<Vec<AlertRule>>;
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn fetch_org_ids(&self) -> Result<Vec<OrgId>>;
    async fn list_alert_instances(&self, org_id: OrgId) -> Result<Vec<AlertInstance>>;
    async fn save_alert_instance(&self, instance: AlertInstance) -> Result<()>;
    async fn delete_alert_instance(
        &self,
        org_id: OrgId,
        rule_uid: &RuleUid,
        labels_hash: &CacheId,
    ) -> Result<()>;
    async fn delete_alert_instances_by_rule(&self, key: &RuleKey) -> Result<()>;
}

#[async_trait]
pub trait ImageService: Send + Sync {
    async fn new_image(&self, rule: &AlertRule) -> Result<Image>;
}

#[async_trait]
pub trait AnnotationsRepository: Send + Sync {
    async fn save(&self, item: AnnotationItem) -> Result<()>;
}

#[async_trait]
pub trait DashboardService: Send + Sync {
    async fn get_dashboard_id(&self, org_id: OrgId, uid: &str) -> Result<i64>;
}

/// The collaborators a manager works with.
#[derive(Clone)]
pub struct Services {
    pub rules: Arc<dyn RuleStore>,
    pub instances: Arc<dyn InstanceStore>,
    pub images: Arc<dyn ImageService>,
    pub annotations: Arc<dyn AnnotationsRepository>,
    pub dashboards: Arc<dyn DashboardService>,
}

/// Image service for deployments without a renderer.
pub struct DisabledImageService;

#[async_trait]
impl ImageService for DisabledImageService {
    async fn new_image(&self, _rule: &AlertRule) -> Result<Image> {
        Err(Error::ScreenshotsUnavailable)
    }
}

impl AlertInstance {
    pub fn from_state(state: &State) -> Self {
        Self {
            org_id: state.org_id,
            rule_uid: state.alert_rule_uid.clone(),
            labels: state.labels.clone(),
            labels_hash: state.cache_id.clone(),
            current_state: state.state.into(),
            current_reason: state.state_reason.clone(),
            current_state_since: state.starts_at,
            current_state_end: state.ends_at,
            last_eval_time: state.last_evaluation_time,
        }
    }
}

impl InstanceStateType {
    /// The state to restore a persisted instance in. Only firing and
    /// normal instances round-trip.
    pub fn eval_state(self) -> EvalState {
        match self {
            InstanceStateType::Firing => EvalState::Alerting,
            InstanceStateType::Normal => EvalState::Normal,
            _ => EvalState::Error,
        }
    }
}

impl From<EvalState> for InstanceStateType {
    fn from(state: EvalState) -> Self {
        match state {
            EvalState::Normal => InstanceStateType::Normal,
            EvalState::Alerting => InstanceStateType::Firing,
            EvalState::Pending => InstanceStateType::Pending,
            EvalState::NoData => InstanceStateType::NoData,
            EvalState::Error => InstanceStateType::Error,
        }
    }
}

impl Display for InstanceStateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStateType::Firing => write!(f, "Alerting"),
            InstanceStateType::Normal => write!(f, "Normal"),
            InstanceStateType::Pending => write!(f, "Pending"),
            InstanceStateType::NoData => write!(f, "NoData"),
            InstanceStateType::Error => write!(f, "Error"),
        }
    }
}
