//! One-shot timers with explicit, cancellable handles.
//!
//! Every scheduled callback is owned by a [`Timer`]; rescheduling or
//! cancelling aborts the previous task, and dropping the timer cancels it.
//! A firing callback first releases its slot, so it may reschedule or
//! cancel its own timer without aborting itself.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;

type Slot = Arc<Mutex<Option<(u64, JoinHandle<()>)>>>;

/// A single re-armable one-shot timer.
pub struct Timer {
    name: &'static str,
    slot: Slot,
    next_id: AtomicU64,
}

impl Timer {
    /// Create a disarmed timer. `name` is used in trace logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `callback` after `delay`, replacing any pending callback.
    pub fn schedule<F>(&self, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let slot = Arc::clone(&self.slot);
        let name = self.name;

        let mut guard = self.slot.lock();
        if let Some((_, previous)) = guard.take() {
            previous.abort();
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut current = slot.lock();
                if !current.as_ref().is_some_and(|(armed, _)| *armed == id) {
                    return;
                }
                // detach: dropping our own handle does not abort us
                let _ = current.take();
            }
            trace!(timer = name, "timer fired");
            callback.await;
        });
        *guard = Some((id, handle));
        trace!(timer = name, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "timer armed");
    }

    /// Cancel the pending callback. Returns whether one was armed.
    pub fn cancel(&self) -> bool {
        match self.slot.lock().take() {
            Some((_, handle)) => {
                handle.abort();
                trace!(timer = self.name, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether a callback is pending.
    pub fn is_armed(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.slot.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counter() -> (Arc<AtomicU32>, impl Fn() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>>) {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let make = move || {
            let h = h.clone();
            Box::pin(async move {
                let _ = h.fetch_add(1, Ordering::SeqCst);
            }) as std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
        };
        (hits, make)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let timer = Timer::new("test");
        let (hits, make) = counter();
        timer.schedule(Duration::from_secs(5), make());
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_pending() {
        let timer = Timer::new("test");
        let (hits, make) = counter();
        timer.schedule(Duration::from_secs(5), make());
        tokio::time::sleep(Duration::from_secs(3)).await;
        timer.schedule(Duration::from_secs(5), make());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let timer = Timer::new("test");
        let (hits, make) = counter();
        timer.schedule(Duration::from_secs(1), make());
        assert!(timer.cancel());
        assert!(!timer.is_armed());
        assert!(!timer.cancel());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() {
        let (hits, make) = counter();
        {
            let timer = Timer::new("test");
            timer.schedule(Duration::from_secs(1), make());
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_can_rearm_its_own_timer() {
        let timer = Arc::new(Timer::new("test"));
        let hits = Arc::new(AtomicU32::new(0));
        let (t, h) = (timer.clone(), hits.clone());
        timer.schedule(Duration::from_secs(1), async move {
            let _ = h.fetch_add(1, Ordering::SeqCst);
            let h2 = h.clone();
            t.schedule(Duration::from_secs(1), async move {
                let _ = h2.fetch_add(1, Ordering::SeqCst);
            });
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(!timer.is_armed());
    }
}
