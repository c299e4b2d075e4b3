use std::collections::VecDeque;
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

use super::FetchError;
use super::retry::{RetryDirective, RetryPolicy};

/// Adaptive batch sizing for bulk calls. Pure sizing logic, no I/O.
///
/// Starts at the configured size and shrinks by `shrink_factor`
/// whenever the server reports overload, down to `floor` (never below
/// one id per call). Once the floor is reached [`shrink`] returns
/// `false` so the caller stops re-issuing.
///
/// [`shrink`]: BatchController::shrink
#[derive(Debug, Clone)]
pub struct BatchController {
    size: usize,
    floor: usize,
    shrink_factor: f64,
}

impl BatchController {
    #[must_use]
    pub fn new(size: usize, floor: usize, shrink_factor: f64) -> Self {
        let floor = floor.max(1);
        Self {
            size: size.max(floor),
            floor,
            shrink_factor: shrink_factor.clamp(0.1, 0.95),
        }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Partition `ids` into chunks of the current batch size.
    #[must_use]
    pub fn chunks<'a>(&self, ids: &'a [String]) -> Vec<&'a [String]> {
        ids.chunks(self.size).collect()
    }

    /// Reduce the batch size one step. Returns `false` when already at
    /// the floor, signalling that errors now persist beyond sizing.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn shrink(&mut self) -> bool {
        if self.size <= self.floor {
            return false;
        }
        let reduced = (self.size as f64 * self.shrink_factor).floor() as usize;
        self.size = reduced.clamp(self.floor, self.size - 1);
        true
    }
}

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("server overload persisted at minimum batch size")]
    OverloadAtFloor,
    #[error("bulk fetch failed: {0}")]
    Failed(FetchError),
}

/// Run `call` over `ids`, taking `controller.size()` ids per request.
///
/// Rate limits and transient errors are retried in place under
/// `policy`; overload shrinks the controller and re-issues the same
/// ids at the smaller size. The controller keeps its final size so a
/// later run starts from what the server last tolerated.
pub async fn run_batched<T, F, Fut>(
    ids: &[String],
    controller: &mut BatchController,
    policy: &RetryPolicy,
    mut call: F,
) -> Result<Vec<T>, BulkError>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut queue: VecDeque<String> = ids.iter().cloned().collect();
    let mut results = Vec::new();

    while !queue.is_empty() {
        let take = controller.size().min(queue.len());
        let chunk: Vec<String> = queue.iter().take(take).cloned().collect();

        let mut attempt = 0u32;
        loop {
            match call(chunk.clone()).await {
                Ok(value) => {
                    results.push(value);
                    queue.drain(..take);
                    break;
                }
                Err(error) => match policy.classify(&error, attempt) {
                    RetryDirective::Delay(delay) => {
                        warn!(attempt, ?delay, %error, "bulk call failed, backing off");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDirective::ShrinkBatch => {
                        if controller.shrink() {
                            info!(size = controller.size(), "server overloaded, batch shrunk");
                            break;
                        }
                        return Err(BulkError::OverloadAtFloor);
                    }
                    RetryDirective::Permanent => return Err(BulkError::Failed(error)),
                },
            }
        }
    }

    Ok(results)
}
