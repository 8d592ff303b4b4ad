//! Periodic background services with an explicit lifecycle

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, NetworkResult};

/// Work repeated on a fixed interval.
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Delay between ticks
    fn interval(&self) -> Duration;

    /// One iteration. Must return promptly once `cancel` fires.
    async fn tick(&self, cancel: &CancellationToken);
}

/// Lifecycle state of a [`BackgroundService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Not running
    Stopped,
    /// Loop being spawned
    Starting,
    /// Loop running
    Running,
    /// Stop requested, waiting for the loop
    Stopping,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

struct Run {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs a [`PeriodicTask`] on its own tokio task.
///
/// `start` and `stop` are explicit; `stop` cancels the loop and waits for it.
/// Dropping a running service only cancels its token.
pub struct BackgroundService {
    task: Arc<dyn PeriodicTask>,
    state: Mutex<ServiceState>,
    run: Mutex<Option<Run>>,
}

impl BackgroundService {
    /// Wrap a task; the service starts stopped
    pub fn new(task: Arc<dyn PeriodicTask>) -> Self {
        Self {
            task,
            state: Mutex::new(ServiceState::Stopped),
            run: Mutex::new(None),
        }
    }

    /// Task name
    pub fn name(&self) -> &'static str {
        self.task.name()
    }

    /// Current state
    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// True while the loop runs
    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Spawn the loop. Fails with `AlreadyRunning` unless stopped.
    pub fn start(&self) -> NetworkResult<()> {
        {
            let mut state = self.state.lock();
            if *state != ServiceState::Stopped {
                return Err(NetworkError::AlreadyRunning);
            }
            *state = ServiceState::Starting;
        }

        let cancel = CancellationToken::new();
        let task = Arc::clone(&self.task);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { run_loop(task, token).await });

        *self.run.lock() = Some(Run { cancel, handle });
        *self.state.lock() = ServiceState::Running;
        info!(service = self.task.name(), "Service started");
        Ok(())
    }

    /// Cancel the loop and wait for it. Fails with `NotRunning` unless running.
    pub async fn stop(&self) -> NetworkResult<()> {
        {
            let mut state = self.state.lock();
            if *state != ServiceState::Running {
                return Err(NetworkError::NotRunning);
            }
            *state = ServiceState::Stopping;
        }

        let run = self.run.lock().take();
        if let Some(Run { cancel, handle }) = run {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(service = self.task.name(), error = %e, "Service loop ended abnormally");
            }
        }
        *self.state.lock() = ServiceState::Stopped;
        info!(service = self.task.name(), "Service stopped");
        Ok(())
    }
}

impl Drop for BackgroundService {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.cancel.cancel();
        }
    }
}

async fn run_loop(task: Arc<dyn PeriodicTask>, cancel: CancellationToken) {
    let interval = task.interval();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        task.tick(&cancel).await;
        if cancel.is_cancelled() {
            break;
        }
    }
    debug!(service = task.name(), "Service loop exited");
}

/// A group of services started and stopped together.
#[derive(Default)]
pub struct BackgroundServices {
    services: Vec<BackgroundService>,
}

impl BackgroundServices {
    /// Empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task
    pub fn push(&mut self, task: Arc<dyn PeriodicTask>) {
        self.services.push(BackgroundService::new(task));
    }

    /// Start all services
    pub fn start_all(&self) -> NetworkResult<()> {
        for service in &self.services {
            service.start()?;
        }
        Ok(())
    }

    /// Stop every running service, in reverse start order
    pub async fn stop_all(&self) {
        for service in self.services.iter().rev() {
            if service.is_running() {
                let _ = service.stop().await;
            }
        }
    }

    /// Services in the group
    pub fn iter(&self) -> impl Iterator<Item = &BackgroundService> {
        self.services.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn tick(&self, _cancel: &CancellationToken) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            ticks: AtomicUsize::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_ticks_while_running() {
        let task = counter();
        let service = BackgroundService::new(task.clone());
        service.start().unwrap();
        assert_eq!(service.state(), ServiceState::Running);

        tokio::time::sleep(Duration::from_millis(55)).await;
        service.stop().await.unwrap();
        let ticks = task.ticks.load(Ordering::SeqCst);
        assert!(ticks >= 4, "ticks = {}", ticks);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(task.ticks.load(Ordering::SeqCst), ticks);
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let service = BackgroundService::new(counter());
        service.start().unwrap();
        assert!(matches!(service.start(), Err(NetworkError::AlreadyRunning)));
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_stopped_fails() {
        let service = BackgroundService::new(counter());
        assert!(matches!(service.stop().await, Err(NetworkError::NotRunning)));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let service = BackgroundService::new(counter());
        service.start().unwrap();
        service.stop().await.unwrap();
        service.start().unwrap();
        assert!(service.is_running());
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_group_start_stop() {
        let mut group = BackgroundServices::new();
        group.push(counter());
        group.push(counter());
        group.start_all().unwrap();
        assert!(group.iter().all(|s| s.is_running()));
        group.stop_all().await;
        assert!(group.iter().all(|s| s.state() == ServiceState::Stopped));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ServiceState::Stopping.to_string(), "stopping");
    }
}
