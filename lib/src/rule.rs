/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use crate::ids::{Labels, OrgId, RuleKey, RuleUid};

pub const DASHBOARD_UID_ANNOTATION: &str = "__dashboardUid__";
pub const PANEL_ID_ANNOTATION: &str = "__panelId__";

pub const ALERT_NAME_LABEL: &str = "alertname";
pub const FOLDER_TITLE_LABEL: &str = "grafana_folder";
pub const RULE_UID_LABEL: &str = "__alert_rule_uid__";
pub const NAMESPACE_UID_LABEL: &str = "__alert_rule_namespace_uid__";

/// An alert rule as far as the state engine is concerned. The query
/// and the condition expressions are evaluated elsewhere.
#[serde_as]
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct AlertRule {
    #[serde(default)]
    pub id: i64,
    pub org_id: OrgId,
    pub uid: RuleUid,
    pub title: String,
    #[serde(default)]
    pub namespace_uid: String,
    #[serde(default)]
    pub rule_group: String,
    #[serde(default)]
    pub condition: String,
    pub interval_seconds: i64,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "for", default)]
    pub for_duration: Duration,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub no_data_state: NoDataState,
    #[serde(default)]
    pub exec_err_state: ExecErrState,
}

/// State to assume when the rule's queries return no data.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default, Debug)]
pub enum NoDataState {
    Alerting,
    #[default]
    NoData,
    #[serde(rename = "OK")]
    Ok,
}

/// State to assume when evaluating the rule fails.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default, Debug)]
pub enum ExecErrState {
    Alerting,
    #[default]
    Error,
    #[serde(rename = "OK")]
    Ok,
}

impl AlertRule {
    pub fn key(&self) -> RuleKey {
        RuleKey::new(self.org_id, self.uid.clone())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(0) as u64)
    }

    pub fn dashboard_uid(&self) -> Option<&str> {
        self.annotations
            .get(DASHBOARD_UID_ANNOTATION)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn panel_id(&self) -> Option<&str> {
        self.annotations
            .get(PANEL_ID_ANNOTATION)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Number of evaluations to keep in the history of each instance.
    pub fn history_size(&self) -> usize {
        let buckets = match self.interval_seconds {
            i if i > 0 => self.for_duration.as_secs() / i as u64,
            _ => 0,
        };
        match buckets {
            0 => 10,
            n => n as usize,
        }
    }

    /// Labels a scheduler adds to every instance of this rule.
    pub fn scheduler_labels(&self, folder_title: &str) -> Labels {
        [
            (ALERT_NAME_LABEL, self.title.as_str()),
            (FOLDER_TITLE_LABEL, folder_title),
            (RULE_UID_LABEL, self.uid.as_str()),
            (NAMESPACE_UID_LABEL, self.namespace_uid.as_str()),
        ]
        .into_iter()
        .collect()
    }
}

impl Display for NoDataState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoDataState::Alerting => write!(f, "Alerting"),
            NoDataState::NoData => write!(f, "NoData"),
            NoDataState::Ok => write!(f, "OK"),
        }
    }
}

impl Display for ExecErrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecErrState::Alerting => write!(f, "Alerting"),
            ExecErrState::Error => write!(f, "Error"),
            ExecErrState::Ok => write!(f, "OK"),
        }
    }
}
