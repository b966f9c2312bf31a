//! Handles for periodic background loops.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::AgentResult;

/// Handle for a background task.
#[derive(Debug)]
pub struct BackgroundTaskHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl BackgroundTaskHandle {
    /// Stop the background task.
    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Run `tick` every `period`, first firing one period from now.
///
/// A failing tick is logged and followed by `backoff` before the loop resumes.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    backoff: Duration,
    mut tick: F,
) -> BackgroundTaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = AgentResult<()>> + Send,
{
    let period = period.max(Duration::from_millis(1));
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(task = name, period_ms = period.as_millis() as u64, "Background task started");

        loop {
            interval.tick().await;
            if let Err(e) = tick().await {
                warn!(task = name, error = %e, "Background task iteration failed");
                tokio::time::sleep(backoff).await;
            }
        }
    });

    BackgroundTaskHandle { handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_periodic_task_survives_errors() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);

        let handle = spawn_periodic(
            "test",
            Duration::from_millis(10),
            Duration::from_millis(5),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n % 2 == 0 {
                        Err(AgentError::Internal("flaky".into()))
                    } else {
                        Ok(())
                    }
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(runs.load(Ordering::SeqCst) >= 3);
        assert!(!handle.is_finished());
        handle.stop();
    }
}
