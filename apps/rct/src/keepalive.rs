use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    /// How often the ping callback runs.
    pub send_interval: Duration,
    /// Sliding window; `continue_keepalive` must arrive within it.
    pub timeout: Duration,
}

/// Liveness watchdog with two independent timing behaviors: a periodic ping
/// and a sliding-window timeout re-armed by `continue_keepalive`. The timeout
/// callback fires at most once, after which watching stops.
pub struct KeepaliveWatcher {
    signal: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    ping_task: Mutex<Option<JoinHandle<()>>>,
    watchdog_task: Mutex<Option<JoinHandle<()>>>,
}

impl KeepaliveWatcher {
    pub fn start<P, PF, T, TF>(config: KeepaliveConfig, ping: P, on_timeout: T) -> Self
    where
        P: Fn() -> PF + Send + 'static,
        PF: Future<Output = ()> + Send,
        T: FnOnce() -> TF + Send + 'static,
        TF: Future<Output = ()> + Send + 'static,
    {
        let signal = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));

        let ping_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.send_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                ping().await;
            }
        });

        let watchdog_signal = signal.clone();
        let watchdog_stopped = stopped.clone();
        let watchdog_task = tokio::spawn(async move {
            loop {
                match tokio::time::timeout(config.timeout, watchdog_signal.notified()).await {
                    Ok(()) => continue,
                    Err(_) => {
                        // Detached so a stop() issued from inside the
                        // callback cannot abort its own execution.
                        if !watchdog_stopped.swap(true, Ordering::SeqCst) {
                            tokio::spawn(on_timeout());
                        }
                        return;
                    }
                }
            }
        });

        Self {
            signal,
            stopped,
            ping_task: Mutex::new(Some(ping_task)),
            watchdog_task: Mutex::new(Some(watchdog_task)),
        }
    }

    /// Re-arms the timeout window. Safe to call from any task.
    pub fn continue_keepalive(&self) {
        self.signal.notify_one();
    }

    /// Cancels both timing behaviors. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.ping_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.watchdog_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for KeepaliveWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
