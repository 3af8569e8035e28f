//! Read-after-write visibility polling
//!
//! Object stores may acknowledge a write before the object is visible to
//! HEAD requests. Metadata for a just-written key is only trusted after
//! `wait_until_visible` has observed it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::backend::ObjectBackend;

/// Bounded polling schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct WaitPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts (e.g. "1s", "500ms")
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub delay: Duration,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_delay() -> Duration {
    Duration::from_secs(1)
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: default_delay(),
        }
    }
}

/// Poll `head_object(key)` until the object is observed or the attempts run out.
///
/// Backend errors count as a failed attempt and are retried; they are
/// never returned to the caller.
pub async fn wait_until_visible(
    backend: &dyn ObjectBackend,
    key: &str,
    policy: WaitPolicy,
) -> bool {
    for attempt in 1..=policy.max_attempts {
        match backend.head_object(key).await {
            Ok(Some(_)) => {
                trace!("wait_until_visible: key={} visible after {} attempt(s)", key, attempt);
                return true;
            }
            Ok(None) => {
                trace!("wait_until_visible: key={} not visible (attempt {})", key, attempt);
            }
            Err(e) => {
                debug!("wait_until_visible: key={} attempt {} failed: {}", key, attempt, e);
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    warn!(
        "Object {} not visible after {} attempts",
        key, policy.max_attempts
    );
    false
}
