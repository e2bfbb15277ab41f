/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, fmt::Display, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::ids::Labels;

#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default, Debug)]
pub enum EvalState {
    #[default]
    Normal,
    Alerting,
    Pending,
    NoData,
    Error,
}

impl EvalState {
    pub fn states() -> impl Iterator<Item = Self> {
        [
            EvalState::Normal,
            EvalState::Alerting,
            EvalState::Pending,
            EvalState::NoData,
            EvalState::Error,
        ]
        .into_iter()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EvalState::Normal => "Normal",
            EvalState::Alerting => "Alerting",
            EvalState::Pending => "Pending",
            EvalState::NoData => "NoData",
            EvalState::Error => "Error",
        }
    }
}

impl Display for EvalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The outcome of evaluating a rule's condition for one series.
#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EvalResult {
    #[serde(default)]
    pub instance: Labels,
    pub state: EvalState,
    #[serde(default)]
    pub error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default)]
    pub evaluation_duration: Duration,
    #[serde(default)]
    pub evaluation_string: String,
    #[serde(default)]
    pub values: BTreeMap<String, Option<f64>>,
}

impl EvalResult {
    pub fn new(instance: Labels, state: EvalState, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            instance,
            state,
            error: None,
            evaluated_at,
            evaluation_duration: Duration::ZERO,
            evaluation_string: String::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_error<T: Into<String>>(mut self, error: T) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_value<T: Into<String>>(mut self, ref_id: T, value: Option<f64>) -> Self {
        self.values.insert(ref_id.into(), value);
        self
    }
}
