//! Fixed-period position ticker.
//!
//! Each tick is awaited before the next sleep starts, so ticks never overlap.
//! `stop` cancels the sleep; a tick already running finishes, and callers
//! discard its result through their own generation check.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::runtime::{TaskSpawner, TokioSpawner};

/// What the ticker does after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

pub struct PositionTicker {
    period: Duration,
    spawner: TokioSpawner,
    running: Mutex<Option<CancellationToken>>,
}

impl PositionTicker {
    pub fn new(period: Duration, spawner: TokioSpawner) -> Self {
        Self {
            period,
            spawner,
            running: Mutex::new(None),
        }
    }

    /// Starts ticking, replacing any running loop. The first tick fires one
    /// period after the call.
    pub fn start<F, Fut>(&self, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickFlow> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.running.lock().replace(token.clone()) {
            previous.cancel();
        }

        let period = self.period;
        self.spawner.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                if tick().await == TickFlow::Stop || token.is_cancelled() {
                    break;
                }
            }
            token.cancel();
        });
    }

    pub fn stop(&self) {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for PositionTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ticker() -> PositionTicker {
        PositionTicker::new(Duration::from_secs(1), TokioSpawner::current())
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_every_period_until_stopped() {
        let ticker = ticker();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        ticker.start(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                TickFlow::Continue
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        ticker.stop();
        assert!(!ticker.is_running());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_do_not_overlap() {
        let ticker = ticker();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let (a, m) = (active.clone(), max_active.clone());
        ticker.start(move || {
            let (a, m) = (a.clone(), m.clone());
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2500)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                TickFlow::Continue
            }
        });

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        ticker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn tick_can_end_the_loop() {
        let ticker = ticker();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        ticker.start(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                TickFlow::Stop
            }
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!ticker.is_running());
    }
}
