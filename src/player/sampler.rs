use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Fixed-interval position sampling timer. Stops when dropped.
pub struct Sampler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sampler {
    /// Calls `on_tick` every `interval`, starting one interval from now,
    /// until stopped or until `on_tick` returns `false`.
    pub fn start<F>(interval: Duration, parent: &CancellationToken, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let token = parent.child_token();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if task_token.is_cancelled() || !on_tick() {
                            break;
                        }
                    }
                }
            }
        });

        Self { token, handle }
    }

    pub fn stop(&self) {
        self.token.cancel();
        self.handle.abort();
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}
