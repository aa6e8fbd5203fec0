use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::checker::KeyChecker;

/// 周期任务的抽象，测试里注入记录用的假探测器
#[async_trait]
pub trait Prober: Send + Sync {
    async fn run_sweep(&self, running: Arc<AtomicBool>);
}

#[async_trait]
impl Prober for KeyChecker {
    async fn run_sweep(&self, running: Arc<AtomicBool>) {
        if let Err(e) = self.check_all_paced(&running).await {
            tracing::error!("Scheduled key check failed: {}", e);
        }
    }
}

/// 周期健康检查：按 checkInterval 毫秒触发一轮串行探测。
/// start/stop 幂等；stop 后在途探测跑完即退出，不中断半个批次。
pub struct Scheduler {
    prober: Arc<dyn Prober>,
    interval: Duration,
    running: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(prober: Arc<dyn Prober>, interval_ms: i64) -> Self {
        Self {
            prober,
            interval: Duration::from_millis(interval_ms.max(1) as u64),
            running: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let prober = self.prober.clone();
        let running = self.running.clone();
        let stop_signal = self.stop_signal.clone();
        let period = self.interval;

        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        prober.run_sweep(running.clone()).await;
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    _ = stop_signal.notified() => break,
                }
            }
            tracing::debug!("Key check scheduler loop ended");
        }));
        tracing::info!("Key check scheduler started (interval {:?})", period);
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
        let mut task = self.task.lock().await;
        if task.take().is_some() {
            tracing::info!("Key check scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingProber {
        sweeps: AtomicUsize,
    }

    #[async_trait]
    impl Prober for CountingProber {
        async fn run_sweep(&self, _running: Arc<AtomicBool>) {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_runs_a_sweep_immediately() {
        let prober = Arc::new(CountingProber {
            sweeps: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(prober.clone(), 60_000);
        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(prober.sweeps.load(Ordering::SeqCst) >= 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_halts_future_sweeps() {
        let prober = Arc::new(CountingProber {
            sweeps: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(prober.clone(), 30);
        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;
        let after_stop = prober.sweeps.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(prober.sweeps.load(Ordering::SeqCst), after_stop);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_restartable() {
        let prober = Arc::new(CountingProber {
            sweeps: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(prober.clone(), 60_000);
        scheduler.stop().await;
        scheduler.stop().await;

        scheduler.start().await;
        scheduler.start().await; // 已运行时为空操作
        assert!(scheduler.is_running());
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(prober.sweeps.load(Ordering::SeqCst) >= 2);
        scheduler.stop().await;
    }
}
