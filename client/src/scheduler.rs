//! Per-feature sync schedulers.
//!
//! A [`SyncScheduler`] is a tokio task that owns one [`Debouncer`] and the
//! single timer it arms. Local mutations, flushes and shutdown arrive over an
//! mpsc channel; the pass itself runs concurrently with the channel so that
//! mutations during a pass only re-arm the trailing timer.

use crate::error::SyncError;
use crate::feature::FeaturePass;
use dashmap::DashMap;
use futures::future::BoxFuture;
use shelfsync_engine::{Action, Debouncer, Outcome, SyncOp, WatermarkKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Commands accepted by a scheduler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// A relevant local record changed.
    Mutation,
    /// Sync as soon as possible, skipping the debounce window.
    Flush,
    /// Finish the pass in flight, if any, and stop.
    Shutdown,
}

type Pass = BoxFuture<'static, Result<(), SyncError>>;

/// Handle to a running scheduler task.
#[derive(Debug)]
pub struct SyncScheduler {
    key: WatermarkKey,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawn a scheduler for `pass`. The session's initial pull starts
    /// immediately.
    pub fn spawn(pass: Arc<dyn FeaturePass>, interval: Duration) -> Self {
        let key = pass.key();
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(pass, interval, rx));
        tracing::info!(%key, ?interval, "scheduler started");
        Self {
            key,
            commands,
            task,
        }
    }

    pub fn key(&self) -> &WatermarkKey {
        &self.key
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!(key = %self.key, ?command, "scheduler already stopped");
        }
    }

    pub fn mutation(&self) {
        self.send(Command::Mutation);
    }

    pub fn flush(&self) {
        self.send(Command::Flush);
    }

    /// Stop the task, waiting for a pass in flight to complete.
    pub async fn shutdown(self) {
        self.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            tracing::error!(key = %self.key, "scheduler task failed: {}", e);
        }
    }
}

async fn wait_for(pass: &mut Option<Pass>) -> Result<(), SyncError> {
    match pass {
        Some(pass) => pass.await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn drive(
    pass: Arc<dyn FeaturePass>,
    interval: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let key = pass.key();
    let origin = Instant::now();
    let elapsed = || Instant::now().duration_since(origin);

    let mut debouncer = Debouncer::new(interval);
    let mut in_flight: Option<Pass> = None;
    let mut deadline: Option<Instant> = None;

    pass.start_session();
    let mut action = debouncer.start_session(elapsed());

    loop {
        match action {
            Action::Run(op) => {
                tracing::debug!(%key, ?op, "pass started");
                in_flight = Some(start(&pass, op));
                deadline = None;
            }
            Action::Arm(delay) => deadline = Some(Instant::now() + delay),
            Action::Wait => {}
        }

        action = tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Mutation) => debouncer.mutation(elapsed()),
                Some(Command::Flush) => debouncer.flush(elapsed()),
                Some(Command::Shutdown) | None => break,
            },
            _ = wait_until(deadline) => {
                deadline = None;
                debouncer.timer(elapsed())
            }
            result = wait_for(&mut in_flight) => {
                in_flight = None;
                debouncer.finish(elapsed(), outcome(&key, &result))
            }
        };
    }

    if let Some(pass) = in_flight {
        if let Err(e) = pass.await {
            tracing::warn!(%key, "final pass failed: {}", e);
        }
    }
    tracing::info!(%key, "scheduler stopped");
}

fn outcome(key: &WatermarkKey, result: &Result<(), SyncError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Ok,
        Err(e) if e.is_auth() => {
            tracing::warn!(%key, "pass refused, waiting for the next change: {}", e);
            Outcome::Unauthorized
        }
        Err(e) => {
            tracing::warn!(%key, "pass failed: {}", e);
            Outcome::Retry
        }
    }
}

fn start(pass: &Arc<dyn FeaturePass>, op: SyncOp) -> Pass {
    let pass = Arc::clone(pass);
    Box::pin(async move { pass.run(op).await })
}

/// Independent schedulers keyed by feature scope.
#[derive(Debug, Default)]
pub struct SchedulerRegistry {
    schedulers: DashMap<WatermarkKey, SyncScheduler>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Start a scheduler for `pass` unless one already runs for its key.
    pub fn register(&self, pass: Arc<dyn FeaturePass>, interval: Duration) {
        self.schedulers
            .entry(pass.key())
            .or_insert_with(|| SyncScheduler::spawn(pass, interval));
    }

    pub fn contains(&self, key: &WatermarkKey) -> bool {
        self.schedulers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    /// Report a local mutation to the scheduler of `key`.
    pub fn mutation(&self, key: &WatermarkKey) {
        match self.schedulers.get(key) {
            Some(scheduler) => scheduler.mutation(),
            None => tracing::debug!(%key, "mutation without scheduler"),
        }
    }

    pub fn flush(&self, key: &WatermarkKey) {
        if let Some(scheduler) = self.schedulers.get(key) {
            scheduler.flush();
        }
    }

    /// Stop and remove the scheduler of `key`.
    pub async fn shutdown(&self, key: &WatermarkKey) {
        if let Some((_, scheduler)) = self.schedulers.remove(key) {
            scheduler.shutdown().await;
        }
    }

    /// Stop every scheduler.
    pub async fn shutdown_all(&self) {
        let keys: Vec<WatermarkKey> = self.schedulers.iter().map(|e| e.key().clone()).collect();
        let schedulers: Vec<SyncScheduler> = keys
            .iter()
            .filter_map(|key| self.schedulers.remove(key).map(|(_, s)| s))
            .collect();
        futures::future::join_all(schedulers.into_iter().map(SyncScheduler::shutdown)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfsync_engine::SyncKind;
    use std::sync::Mutex;

    /// Records each pass with the time it started.
    struct RecordingPass {
        key: WatermarkKey,
        origin: Instant,
        runs: Mutex<Vec<(SyncOp, Duration)>>,
        failures: Mutex<usize>,
        duration: Duration,
        signed_out: bool,
    }

    impl RecordingPass {
        fn new(kind: SyncKind) -> Arc<Self> {
            Self::with(kind, 0, Duration::ZERO)
        }

        fn with(kind: SyncKind, failures: usize, duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                key: WatermarkKey::kind(kind),
                origin: Instant::now(),
                runs: Mutex::new(Vec::new()),
                failures: Mutex::new(failures),
                duration,
                signed_out: false,
            })
        }

        fn signed_out(kind: SyncKind) -> Arc<Self> {
            Arc::new(Self {
                key: WatermarkKey::kind(kind),
                origin: Instant::now(),
                runs: Mutex::new(Vec::new()),
                failures: Mutex::new(0),
                duration: Duration::ZERO,
                signed_out: true,
            })
        }

        fn runs(&self) -> Vec<(SyncOp, Duration)> {
            self.runs.lock().unwrap().clone()
        }

        fn ops(&self) -> Vec<SyncOp> {
            self.runs().into_iter().map(|(op, _)| op).collect()
        }
    }

    #[async_trait::async_trait]
    impl FeaturePass for RecordingPass {
        fn key(&self) -> WatermarkKey {
            self.key.clone()
        }

        async fn run(&self, op: SyncOp) -> Result<(), SyncError> {
            let started = Instant::now().duration_since(self.origin);
            self.runs.lock().unwrap().push((op, started));
            if !self.duration.is_zero() {
                tokio::time::sleep(self.duration).await;
            }
            if self.signed_out {
                return Err(SyncError::Auth("401".to_string()));
            }
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SyncError::Http {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    const INTERVAL: Duration = Duration::from_millis(2000);

    #[tokio::test(start_paused = true)]
    async fn session_starts_with_pull() {
        let pass = RecordingPass::new(SyncKind::Books);
        let scheduler = SyncScheduler::spawn(pass.clone(), INTERVAL);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pass.ops(), vec![SyncOp::Pull]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_mutations_coalesce_into_one_pass() {
        let pass = RecordingPass::new(SyncKind::Notes);
        let scheduler = SyncScheduler::spawn(pass.clone(), INTERVAL);
        tokio::time::sleep(Duration::from_millis(1)).await;

        for _ in 0..5 {
            scheduler.mutation();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;

        let runs = pass.runs();
        assert_eq!(pass.ops(), vec![SyncOp::Pull, SyncOp::Both]);
        // The trailing pass waits out the debounce window.
        assert!(runs[1].1 >= INTERVAL);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_after_quiet_period_runs_immediately() {
        let pass = RecordingPass::new(SyncKind::Books);
        let scheduler = SyncScheduler::spawn(pass.clone(), INTERVAL);
        tokio::time::sleep(Duration::from_secs(3)).await;

        scheduler.mutation();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let runs = pass.runs();
        assert_eq!(pass.ops(), vec![SyncOp::Pull, SyncOp::Both]);
        assert!(runs[1].1 < Duration::from_millis(3100));
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_during_flight_do_not_start_a_second_pass() {
        let pass = RecordingPass::with(SyncKind::Books, 0, Duration::from_millis(500));
        let scheduler = SyncScheduler::spawn(pass.clone(), INTERVAL);
        tokio::time::sleep(Duration::from_secs(3)).await;

        scheduler.mutation();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The Both pass is in flight now.
        scheduler.mutation();
        scheduler.mutation();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pass.ops(), vec![SyncOp::Pull, SyncOp::Both]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pass.ops(), vec![SyncOp::Pull, SyncOp::Both, SyncOp::Both]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_pull_is_retried_as_pull() {
        let pass = RecordingPass::with(SyncKind::Configs, 1, Duration::ZERO);
        let scheduler = SyncScheduler::spawn(pass.clone(), INTERVAL);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(pass.ops(), vec![SyncOp::Pull, SyncOp::Pull]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refused_credentials_are_not_retried() {
        let pass = RecordingPass::signed_out(SyncKind::Books);
        let scheduler = SyncScheduler::spawn(pass.clone(), INTERVAL);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(pass.ops(), vec![SyncOp::Pull]);

        // A new change tries again, once.
        scheduler.mutation();
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(pass.ops(), vec![SyncOp::Pull, SyncOp::Pull]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn flush_skips_the_debounce_window() {
        let pass = RecordingPass::new(SyncKind::Configs);
        let scheduler = SyncScheduler::spawn(pass.clone(), INTERVAL);
        tokio::time::sleep(Duration::from_millis(10)).await;

        scheduler.flush();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let runs = pass.runs();
        assert_eq!(pass.ops(), vec![SyncOp::Pull, SyncOp::Both]);
        assert!(runs[1].1 < Duration::from_millis(100));
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn registry_keeps_features_independent() {
        let registry = SchedulerRegistry::new();
        let books = RecordingPass::new(SyncKind::Books);
        let notes = RecordingPass::new(SyncKind::Notes);
        registry.register(books.clone(), INTERVAL);
        registry.register(notes.clone(), INTERVAL);
        registry.register(books.clone(), INTERVAL);
        assert_eq!(registry.len(), 2);

        tokio::time::sleep(Duration::from_secs(3)).await;
        registry.mutation(&WatermarkKey::kind(SyncKind::Books));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(books.ops(), vec![SyncOp::Pull, SyncOp::Both]);
        assert_eq!(notes.ops(), vec![SyncOp::Pull]);

        registry.shutdown_all().await;
        assert!(registry.is_empty());
    }
}
