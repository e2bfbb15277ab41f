/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

pub mod annotations;
pub mod cache;
pub mod config;
pub mod image;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod store;

pub(crate) mod error;
pub(crate) mod eval;
pub(crate) mod ids;
pub(crate) mod rule;
pub(crate) mod state;

pub use annotations::InstanceStateAndReason;
pub use cache::Cache;
pub use config::ManagerConfig;
pub use error::{Error, ErrorKind, Result};
pub use eval::{EvalResult, EvalState};
pub use ids::{CacheId, Labels, OrgId, RuleKey, RuleUid};
pub use image::Image;
pub use manager::Manager;
pub use metrics::{Operation, StateMetrics};
pub use rule::{
    AlertRule, ExecErrState, NoDataState, ALERT_NAME_LABEL, DASHBOARD_UID_ANNOTATION,
    FOLDER_TITLE_LABEL, NAMESPACE_UID_LABEL, PANEL_ID_ANNOTATION, RULE_UID_LABEL,
};
pub use state::{Evaluation, State, Transition, STATE_REASON_MISSING_SERIES};
pub use store::{
    AlertInstance, AnnotationItem, AnnotationsRepository, DashboardService, DisabledImageService,
    ImageService, InstanceStateType, InstanceStore, RuleStore, Services,
};
