/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::fmt::Display;

use crate::ids::{CacheId, OrgId, RuleUid};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no entry for {0}:{1}:{2} was found")]
    StateNotFound(OrgId, RuleUid, CacheId),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("screenshots are unavailable")]
    ScreenshotsUnavailable,
    #[error("alert rule has no dashboard")]
    NoDashboard,
    #[error("alert rule has no panel")]
    NoPanel,
    #[error("failed to take image: {0}")]
    Image(String),
    #[error("timed out taking image after {0:?}")]
    ImageTimeout(std::time::Duration),
    #[error("dashboard not found: {0}")]
    DashboardNotFound(String),
    #[error("invalid panel id for alert annotation: {0}: {1}")]
    InvalidPanelId(String, std::num::ParseIntError),
    #[error("failed to save annotation: {0}")]
    Annotation(String),
    #[error("annotation queue is full")]
    AnnotationQueueFull,
    #[error("annotation queue is closed")]
    AnnotationQueueClosed,
    #[error("failed to register metric: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Error classification used for logging and the metrics sink.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum ErrorKind {
    NotFound,
    TransientStorage,
    DiagnosticCapture,
    DataIntegrity,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StateNotFound(_, _, _) => ErrorKind::NotFound,
            Error::Storage(_) => ErrorKind::TransientStorage,
            Error::ScreenshotsUnavailable
            | Error::NoDashboard
            | Error::NoPanel
            | Error::Image(_)
            | Error::ImageTimeout(_)
            | Error::DashboardNotFound(_)
            | Error::Annotation(_)
            | Error::AnnotationQueueFull
            | Error::AnnotationQueueClosed => ErrorKind::DiagnosticCapture,
            Error::InvalidPanelId(_, _) => ErrorKind::DataIntegrity,
            Error::Metrics(_) => ErrorKind::Internal,
        }
    }
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::TransientStorage => "transient_storage",
            ErrorKind::DiagnosticCapture => "diagnostic_capture",
            ErrorKind::DataIntegrity => "data_integrity",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
