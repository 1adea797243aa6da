// src/scheduler/mod.rs - Instance-owned periodic tasks
use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    Continue,
    Stop,
}

/// A tokio task that runs `tick` on a fixed period until stopped.
///
/// A tick in progress is cancelled by `stop`, so ticks may wait on locks
/// held by whoever is stopping the task.
pub struct PeriodicTask {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn the loop. With `immediate` the first tick runs right away,
    /// otherwise after one period.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, immediate: bool, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TaskControl> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let start = if immediate { Instant::now() } else { Instant::now() + period };
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {}
                }
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    control = tick() => {
                        if control == TaskControl::Stop {
                            tracing::debug!("Periodic task '{}' finished", name);
                            break;
                        }
                    }
                }
            }
        });
        tracing::debug!("Periodic task '{}' started every {:?}", name, period);
        Self { name, shutdown: Some(shutdown_tx), handle: Some(handle) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|handle| handle.is_finished())
    }

    /// Stop the loop and wait until it has exited.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!("Periodic task '{}' panicked", self.name);
                }
            }
        }
        tracing::debug!("Periodic task '{}' stopped", self.name);
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_task(period: Duration, immediate: bool, stop_after: u32) -> (PeriodicTask, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let ticks = count.clone();
        let task = PeriodicTask::spawn("count", period, immediate, move || {
            let ticks = ticks.clone();
            async move {
                let n = ticks.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= stop_after { TaskControl::Stop } else { TaskControl::Continue }
            }
        });
        (task, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_period() {
        let (task, count) = counting_task(Duration::from_secs(60), false, u32::MAX);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_tick_and_self_stop() {
        let (task, count) = counting_task(Duration::from_secs(2), true, 2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_future_ticks() {
        let (task, count) = counting_task(Duration::from_secs(1), true, u32::MAX);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        task.stop().await;
        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }
}
