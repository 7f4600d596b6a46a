//! Bound on concurrently open remote sessions
//!
//! A permit is moved into the blocking closure that owns the session, so it
//! is released when the session is closed, not when the awaiting future is
//! dropped. A caller that times out therefore keeps its slot until the
//! abandoned session has actually ended.

use std::sync::Arc;
use tokio::sync::Semaphore;

use super::TransportError;

#[derive(Debug, Clone)]
pub struct SessionLimiter {
    semaphore: Arc<Semaphore>,
}

impl SessionLimiter {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_sessions.max(1))),
        }
    }

    /// Free session slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot, then run `session` on the blocking pool holding it
    pub async fn run_blocking<T, F>(&self, session: F) -> Result<T, TransportError>
    where
        F: FnOnce() -> Result<T, TransportError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| TransportError::Aborted(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            session()
        })
        .await
        .map_err(|e| TransportError::Aborted(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slot_held_until_session_ends() {
        let limiter = SessionLimiter::new(1);
        let (release, wait) = mpsc::channel::<()>();

        let session = limiter.run_blocking(move || {
            let _ = wait.recv_timeout(Duration::from_secs(5));
            Ok(())
        });
        // The caller gives up, the session keeps running.
        assert!(tokio::time::timeout(Duration::from_millis(50), session).await.is_err());
        assert_eq!(limiter.available(), 0);

        release.send(()).unwrap();
        let mut freed = false;
        for _ in 0..100 {
            if limiter.available() == 1 {
                freed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(freed);
    }

    #[tokio::test]
    async fn test_sessions_wait_for_a_free_slot() {
        let limiter = SessionLimiter::new(2);
        let open = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let peak = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let runs = (0..6).map(|_| {
            let open = Arc::clone(&open);
            let peak = Arc::clone(&peak);
            limiter.run_blocking(move || {
                use std::sync::atomic::Ordering;
                let now = open.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                open.fetch_sub(1, Ordering::SeqCst);
                Ok(now)
            })
        });
        let results = futures::future::join_all(runs).await;

        assert!(results.iter().all(Result::is_ok));
        assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= 2);
        assert_eq!(limiter.available(), 2);
    }
}
