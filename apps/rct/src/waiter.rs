use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("no value received")]
    NoValue,
    #[error("timed out waiting for value")]
    TimedOut,
}

/// Single-slot rendezvous between one waiting task and one delivering task.
///
/// `receive` hands its value to a wait in progress and is dropped on the
/// floor otherwise; `kill` fails the wait in progress. Not a queue: nothing
/// is buffered across waits, and the slot is reusable once a wait completes.
pub struct Waiter<T> {
    slot: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T: Send> Waiter<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Blocks until a concurrent `receive` delivers a value, `kill` is
    /// called, or the timeout elapses. Starting a new wait displaces any
    /// wait already in progress, failing it with `NoValue`.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<T, WaitError> {
        let (tx, rx) = oneshot::channel();
        *self.slot.lock() = Some(tx);
        let result = match timeout {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(WaitError::NoValue),
                Err(_) => Err(WaitError::TimedOut),
            },
            None => rx.await.map_err(|_| WaitError::NoValue),
        };
        self.slot.lock().take();
        result
    }

    /// Satisfies the wait in progress, if any. The value is dropped when
    /// nobody is waiting.
    pub fn receive(&self, value: T) {
        if let Some(tx) = self.slot.lock().take() {
            let _ = tx.send(value);
        }
    }

    /// Fails the wait in progress with `NoValue`. No-op when nobody is
    /// waiting.
    pub fn kill(&self) {
        self.slot.lock().take();
    }
}

impl<T: Send> Default for Waiter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn receive_without_waiter_is_dropped() {
        let waiter: Waiter<u32> = Waiter::new();
        waiter.receive(41);
        // The dropped value must not satisfy a later wait.
        let result = waiter.wait(Some(Duration::from_millis(20))).await;
        assert_eq!(result, Err(WaitError::TimedOut));
    }

    #[tokio::test]
    async fn rendezvous_delivers_exactly_the_received_value() {
        let waiter: Arc<Waiter<String>> = Arc::new(Waiter::new());
        let sender = waiter.clone();
        let task = tokio::spawn(async move { waiter.wait(None).await });
        tokio::task::yield_now().await;
        sender.receive("hello".to_string());
        assert_eq!(task.await.unwrap(), Ok("hello".to_string()));
    }

    #[tokio::test]
    async fn kill_fails_the_wait_and_slot_is_reusable() {
        let waiter: Arc<Waiter<u32>> = Arc::new(Waiter::new());
        let killer = waiter.clone();
        let task = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.wait(None).await })
        };
        tokio::task::yield_now().await;
        killer.kill();
        assert_eq!(task.await.unwrap(), Err(WaitError::NoValue));

        // A fresh wait after the kill still rendezvouses.
        let task = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.wait(None).await })
        };
        tokio::task::yield_now().await;
        killer.receive(7);
        assert_eq!(task.await.unwrap(), Ok(7));
    }

    #[tokio::test]
    async fn kill_without_waiter_is_a_noop() {
        let waiter: Waiter<u32> = Waiter::new();
        waiter.kill();
        waiter.kill();
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_times_out() {
        let waiter: Waiter<u32> = Waiter::new();
        let result = waiter.wait(Some(Duration::from_secs(5))).await;
        assert_eq!(result, Err(WaitError::TimedOut));
    }
}
