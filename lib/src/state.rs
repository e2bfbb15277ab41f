/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::{
    eval::{EvalResult, EvalState},
    ids::{CacheId, Labels, OrgId, RuleUid},
    image::Image,
    rule::{AlertRule, ExecErrState, NoDataState},
};

pub const STATE_REASON_MISSING_SERIES: &str = "MissingSeries";

/// The state of one alert instance, i.e. one label set produced by
/// one rule.
#[serde_as]
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct State {
    pub org_id: OrgId,
    pub alert_rule_uid: RuleUid,
    pub cache_id: CacheId,
    pub labels: Labels,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub state: EvalState,
    #[serde(default)]
    pub state_reason: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub image: Option<Image>,
    #[serde(default)]
    pub results: Vec<Evaluation>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub last_evaluation_string: String,
    pub last_evaluation_time: DateTime<Utc>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default)]
    pub evaluation_duration: Duration,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub last_sent_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Evaluation {
    pub evaluation_time: DateTime<Utc>,
    pub evaluation_state: EvalState,
    pub values: BTreeMap<String, Option<f64>>,
    pub condition: String,
}

/// What an instance looked like before a result was applied.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Transition {
    pub previous_state: EvalState,
    pub previous_reason: String,
}

impl State {
    pub fn new(
        org_id: OrgId,
        alert_rule_uid: RuleUid,
        labels: Labels,
        annotations: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            org_id,
            alert_rule_uid,
            cache_id: labels.cache_id(),
            labels,
            annotations,
            state: EvalState::Normal,
            state_reason: String::new(),
            error: None,
            image: None,
            results: Vec::new(),
            resolved: false,
            last_evaluation_string: String::new(),
            last_evaluation_time: now,
            evaluation_duration: Duration::ZERO,
            starts_at: now,
            ends_at: now,
            last_sent_at: None,
        }
    }

    /// Advance the instance with an evaluation result.
    pub fn apply_result(
        &mut self,
        rule: &AlertRule,
        result: &EvalResult,
        resend_delay: Duration,
    ) -> Transition {
        self.last_evaluation_time = result.evaluated_at;
        self.evaluation_duration = result.evaluation_duration;
        self.results.push(Evaluation {
            evaluation_time: result.evaluated_at,
            evaluation_state: result.state,
            values: result.values.clone(),
            condition: rule.condition.clone(),
        });
        self.last_evaluation_string = result.evaluation_string.clone();
        self.trim_results(rule);

        let transition = Transition {
            previous_state: self.state,
            previous_reason: self.state_reason.clone(),
        };

        match result.state {
            EvalState::Normal => self.result_normal(result),
            EvalState::Alerting => self.result_alerting(rule, result, resend_delay),
            EvalState::Error => self.result_error(rule, result, resend_delay),
            EvalState::NoData => self.result_no_data(rule, result, resend_delay),
            // Not emitted by the evaluator.
            EvalState::Pending => {}
        }

        self.state_reason.clear();
        if self.state != result.state
            && !matches!(result.state, EvalState::Normal | EvalState::Alerting)
        {
            self.state_reason = result.state.to_string();
        }

        self.resolved =
            transition.previous_state == EvalState::Alerting && self.state == EvalState::Normal;

        transition
    }

    pub fn result_normal(&mut self, result: &EvalResult) {
        self.error = None;
        if self.state != EvalState::Normal {
            self.starts_at = result.evaluated_at;
        }
        self.ends_at = result.evaluated_at;
        self.state = EvalState::Normal;
    }

    pub fn result_alerting(&mut self, rule: &AlertRule, result: &EvalResult, resend_delay: Duration) {
        self.error = result.error.clone();
        match self.state {
            EvalState::Alerting => self.set_ends_at(rule, result.evaluated_at, resend_delay),
            EvalState::Pending => {
                if elapsed(self.starts_at, result.evaluated_at, rule.for_duration) {
                    self.state = EvalState::Alerting;
                    self.starts_at = result.evaluated_at;
                    self.set_ends_at(rule, result.evaluated_at, resend_delay);
                }
            }
            _ => {
                self.starts_at = result.evaluated_at;
                self.set_ends_at(rule, result.evaluated_at, resend_delay);
                self.state = if rule.for_duration.is_zero() {
                    EvalState::Alerting
                } else {
                    EvalState::Pending
                };
            }
        }
    }

    pub fn result_error(&mut self, rule: &AlertRule, result: &EvalResult, resend_delay: Duration) {
        let exec_err_state = match rule.exec_err_state {
            ExecErrState::Alerting => EvalState::Alerting,
            ExecErrState::Error => EvalState::Error,
            ExecErrState::Ok => {
                self.result_normal(result);
                return;
            }
        };

        self.error = result.error.clone();
        match self.state {
            EvalState::Alerting | EvalState::Error => {
                self.set_ends_at(rule, result.evaluated_at, resend_delay)
            }
            EvalState::Pending => {
                if elapsed(self.starts_at, result.evaluated_at, rule.for_duration) {
                    self.state = exec_err_state;
                    self.starts_at = result.evaluated_at;
                    self.set_ends_at(rule, result.evaluated_at, resend_delay);
                }
            }
            _ => {
                // The pending period applies when errors alert.
                self.state = if exec_err_state == EvalState::Alerting
                    && !rule.for_duration.is_zero()
                {
                    EvalState::Pending
                } else {
                    exec_err_state
                };
                self.starts_at = result.evaluated_at;
                self.set_ends_at(rule, result.evaluated_at, resend_delay);
            }
        }
    }

    pub fn result_no_data(&mut self, rule: &AlertRule, result: &EvalResult, resend_delay: Duration) {
        self.error = result.error.clone();
        let next = match rule.no_data_state {
            NoDataState::Alerting => EvalState::Alerting,
            NoDataState::NoData => EvalState::NoData,
            NoDataState::Ok => EvalState::Normal,
        };
        if next != self.state {
            self.starts_at = result.evaluated_at;
        }
        self.set_ends_at(rule, result.evaluated_at, resend_delay);
        self.state = next;
    }

    /// Extend the instance's validity to three resend delays or rule
    /// intervals past the evaluation, whichever is longer.
    pub fn set_ends_at(&mut self, rule: &AlertRule, evaluated_at: DateTime<Utc>, resend_delay: Duration) {
        let cushion = resend_delay
            .max(rule.interval())
            .checked_mul(3)
            .unwrap_or(Duration::MAX);
        self.ends_at = add(evaluated_at, cushion);
    }

    pub fn resolve(&mut self, reason: &str, ends_at: DateTime<Utc>) {
        self.state = EvalState::Normal;
        self.state_reason = reason.to_string();
        self.ends_at = ends_at;
        self.resolved = true;
    }

    pub fn trim_results(&mut self, rule: &AlertRule) {
        let keep = rule.history_size();
        if self.results.len() > keep {
            self.results.drain(..self.results.len() - keep);
        }
    }

    /// Whether a notification should be (re)sent for this instance.
    pub fn needs_sending(&self, resend_delay: Duration) -> bool {
        match self.state {
            EvalState::Pending => false,
            EvalState::Normal => self.resolved,
            _ => self
                .last_sent_at
                .map_or(true, |sent| add(sent, resend_delay) <= self.last_evaluation_time),
        }
    }

    pub fn last_evaluation_values(&self) -> BTreeMap<String, Option<f64>> {
        self.results
            .last()
            .map(|eval| eval.values.clone())
            .unwrap_or_default()
    }
}

impl Transition {
    /// Whether the human-visible state of the instance changed.
    pub fn changed(&self, state: &State) -> bool {
        self.previous_state != state.state || self.previous_reason != state.state_reason
    }
}

fn add(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| t.checked_add_signed(d))
        .unwrap_or(t)
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>, d: Duration) -> bool {
    (now - since).to_std().is_ok_and(|e| e >= d)
}
