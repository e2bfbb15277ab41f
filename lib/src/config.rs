/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

pub const DEFAULT_RESEND_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_ANNOTATION_QUEUE_SIZE: usize = 1024;
pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(30);

#[serde_as]
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(default)]
pub struct ManagerConfig {
    /// Minimum delay between notifications for the same instance.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub resend_delay: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub metrics_interval: Duration,
    pub annotation_queue_size: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub image_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            resend_delay: DEFAULT_RESEND_DELAY,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
            annotation_queue_size: DEFAULT_ANNOTATION_QUEUE_SIZE,
            image_timeout: DEFAULT_IMAGE_TIMEOUT,
        }
    }
}
