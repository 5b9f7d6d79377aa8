//! Abortable timer tasks.
//!
//! A [`TaskSet`] owns the abort handles of every timer spawned for one
//! generation job. Dropping or [`cancel_all`](TaskSet::cancel_all)-ing the
//! set stops all of them, so no terminal transition can leak a timer.

use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Default)]
pub struct TaskSet {
    handles: Vec<AbortHandle>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` on the runtime, tracked by this set.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.handles.push(handle.abort_handle());
    }

    /// Run `task` once after `delay`.
    pub fn after<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }

    /// Call `tick` every `period`, first after `period`, until it returns
    /// `false`. Ticks never overlap; a tick that falls due while the previous
    /// one is still running is skipped.
    pub fn every<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !tick().await {
                    break;
                }
            }
        });
    }

    /// Abort every tracked task.
    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    /// Number of tracked tasks that have not finished.
    pub fn active(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn every_stops_when_tick_returns_false() {
        let count = Arc::new(AtomicU32::new(0));
        let mut tasks = TaskSet::new();
        let c = count.clone();
        tasks.every(Duration::from_secs(1), move || {
            let c = c.clone();
            async move { c.fetch_add(1, Ordering::SeqCst) + 1 < 3 }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_pending_timers() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut tasks = TaskSet::new();
        let f = fired.clone();
        tasks.after(Duration::from_secs(5), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let f = fired.clone();
        tasks.every(Duration::from_secs(1), move || {
            let f = f.clone();
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                true
            }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        tasks.cancel_all();
        let seen = fired.load(Ordering::SeqCst);
        assert_eq!(seen, 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), seen);
    }
}
