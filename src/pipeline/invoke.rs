//! Model invocation: send the enhanced image and prompt, with retry.
//!
//! This module is thin: the wire format lives in
//! [`crate::model`], the prompt in [`crate::prompts`], and the retry loop in
//! [`super::retry`]. What remains is the policy that glues them together:
//!
//! * transient failures ([`ManifestError::is_transient`]: 429, 502–504, no
//!   response) are retried with exponential backoff;
//! * anything else fails immediately, unchanged;
//! * running out of attempts becomes [`ManifestError::ModelRateLimited`], a
//!   distinct variant so the user is told to try again later instead of
//!   getting a generic failure.

use super::encode::EncodedImage;
use super::retry::{retry_with_backoff, RetryError, RetryPolicy};
use crate::error::ManifestError;
use crate::model::VisionModel;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Call `model` with `prompt` and `image`, retrying transient failures
/// according to `policy`. Returns the raw model text.
pub async fn invoke(
    model: &dyn VisionModel,
    image: &EncodedImage,
    prompt: &str,
    policy: &RetryPolicy,
) -> Result<String, ManifestError> {
    let start = Instant::now();

    let result = retry_with_backoff(policy, ManifestError::is_transient, |attempt| {
        debug!("{}: attempt {}/{}", model.name(), attempt, policy.max_attempts);
        model.complete(prompt, image)
    })
    .await;

    match result {
        Ok(text) => {
            info!(
                "{}: answered {} chars in {}ms",
                model.name(),
                text.len(),
                start.elapsed().as_millis()
            );
            Ok(text)
        }
        Err(RetryError::Fatal(e)) => Err(e),
        Err(RetryError::Exhausted { attempts, last }) => {
            warn!("{}: giving up after {} attempts: {}", model.name(), attempts, last);
            Err(ManifestError::ModelRateLimited {
                attempts,
                last_status: last.status(),
            })
        }
    }
}
