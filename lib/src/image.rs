/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    eval::EvalState,
    rule::AlertRule,
    store::ImageService,
};

/// A screenshot of the dashboard panel an alert rule is linked to.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Image {
    pub token: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Take a new image when the instance was resolved, started
/// alerting, or is alerting without an image.
pub fn should_take_image(
    state: EvalState,
    previous: EvalState,
    image: Option<&Image>,
    resolved: bool,
) -> bool {
    resolved
        || (state == EvalState::Alerting && previous != EvalState::Alerting)
        || (state == EvalState::Alerting && image.is_none())
}

/// Capture an image for the rule. Rules that cannot have an image
/// yield `None`.
pub async fn take_image(
    service: &dyn ImageService,
    rule: &AlertRule,
    timeout: Duration,
) -> Result<Option<Image>> {
    match tokio::time::timeout(timeout, service.new_image(rule)).await {
        Ok(Ok(image)) => Ok(Some(image)),
        Ok(Err(Error::ScreenshotsUnavailable | Error::NoDashboard | Error::NoPanel)) => Ok(None),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::ImageTimeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{should_take_image, Image};
    use crate::eval::EvalState;

    #[test]
    fn image_policy() {
        let image = Image {
            token: "abc".to_string(),
            path: None,
            url: None,
            created_at: Utc::now(),
        };
        use EvalState::*;
        assert!(should_take_image(Alerting, Normal, None, false));
        assert!(should_take_image(Alerting, Pending, Some(&image), false));
        assert!(should_take_image(Alerting, Alerting, None, false));
        assert!(!should_take_image(Alerting, Alerting, Some(&image), false));
        assert!(should_take_image(Normal, Alerting, Some(&image), true));
        assert!(!should_take_image(Normal, Normal, None, false));
        assert!(!should_take_image(Pending, Normal, None, false));
    }
}
