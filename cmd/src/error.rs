/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::path::PathBuf;

use alert_state::{OrgId, RuleUid};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    AlertState(#[from] alert_state::Error),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to decode {0}: {1}")]
    Decode(PathBuf, serde_yaml::Error),
    #[error("failed to encode output: {0}")]
    EncodeJson(serde_json::Error),
    #[error("failed to encode output: {0}")]
    EncodeYaml(serde_yaml::Error),
    #[error("evaluation refers to unknown rule: org_id={0} rule_uid={1}")]
    MissingRule(OrgId, RuleUid),
}
