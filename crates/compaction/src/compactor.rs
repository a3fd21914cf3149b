//! Background compaction engine.
//!
//! One worker task per [`ContextCompactor`] runs passes strictly one at a time.
//! Callers only ever take a short, synchronous lock: [`notify_rounds_changed`]
//! decides whether to wake the worker, and [`get_compaction`] reads the last
//! published summary. The summarization call itself happens outside the lock.
//!
//! Worker phases: `Idle -> Signaled -> Running -> Idle`. A notification that
//! arrives while `Running` sets a single sticky `pending` flag, so any number
//! of them collapse into exactly one follow-up pass.
//!
//! [`notify_rounds_changed`]: ContextCompactor::notify_rounds_changed
//! [`get_compaction`]: ContextCompactor::get_compaction

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use {
    loam_config::CompactionConfig,
    tokio::{sync::Notify, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::{
    backend::SummarizationBackend,
    error::{Error, Result},
    prompt::{NO_PREVIOUS_SUMMARY, build_compaction_content},
    source::RoundSource,
    types::CompactedSummary,
};

/// What the memory layer needs from a compactor.
pub trait CompactionProvider: Send + Sync {
    /// Last published summary, if any.
    fn get_compaction(&self) -> Option<CompactedSummary>;

    /// Rounds may have changed; possibly schedule a background pass.
    fn notify_rounds_changed(&self);
}

/// Diagnostic record of what the engine is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionEvent {
    WorkerStarted,
    WorkerStopped,
    /// The worker was signaled to run a pass.
    Triggered { uncompacted: usize, threshold: usize },
    /// A pass is running; a follow-up pass was queued.
    Queued,
    /// A pass began covering rounds `1..=end_index`.
    Started { end_index: usize },
    Completed { end_index: usize },
    Failed { error: String },
}

impl fmt::Display for CompactionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerStarted => write!(f, "background worker started"),
            Self::WorkerStopped => write!(f, "background worker stopped"),
            Self::Triggered {
                uncompacted,
                threshold,
            } => write!(
                f,
                "triggering compaction (uncompacted={uncompacted}, threshold={threshold})"
            ),
            Self::Queued => write!(f, "compaction in progress, queued trigger"),
            Self::Started { end_index } => write!(f, "compacting rounds 1-{end_index}"),
            Self::Completed { end_index } => {
                write!(f, "compaction complete (rounds 1-{end_index})")
            },
            Self::Failed { error } => write!(f, "compaction failed: {error}"),
        }
    }
}

/// Callback receiving every [`CompactionEvent`]. Must not block.
pub type EventFn = Arc<dyn Fn(CompactionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Idle,
    Signaled,
    Running,
}

#[derive(Debug, Default)]
struct EngineState {
    compacted: Option<CompactedSummary>,
    started: bool,
    phase: Phase,
    pending: bool,
    stopping: bool,
}

enum Trigger {
    Signal { uncompacted: usize },
    Queue,
    AlreadySignaled,
}

/// Keeps a rolling summary of a conversation fresh in the background.
pub struct ContextCompactor {
    config: CompactionConfig,
    rounds: Arc<dyn RoundSource>,
    backend: Arc<dyn SummarizationBackend>,
    on_event: Option<EventFn>,
    state: Mutex<EngineState>,
    wake: Notify,
    idle: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`ContextCompactor`]. A round source and a backend are required.
pub struct ContextCompactorBuilder {
    config: CompactionConfig,
    rounds: Option<Arc<dyn RoundSource>>,
    backend: Option<Arc<dyn SummarizationBackend>>,
    on_event: Option<EventFn>,
}

impl ContextCompactorBuilder {
    #[must_use]
    pub fn round_source(mut self, rounds: Arc<dyn RoundSource>) -> Self {
        self.rounds = Some(rounds);
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn SummarizationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub fn on_event(mut self, on_event: EventFn) -> Self {
        self.on_event = Some(on_event);
        self
    }

    pub fn build(self) -> Result<Arc<ContextCompactor>> {
        let rounds = self.rounds.ok_or(Error::MissingRoundSource)?;
        let backend = self.backend.ok_or(Error::MissingBackend)?;
        Ok(Arc::new(ContextCompactor {
            config: self.config,
            rounds,
            backend,
            on_event: self.on_event,
            state: Mutex::new(EngineState::default()),
            wake: Notify::new(),
            idle: Notify::new(),
            worker: Mutex::new(None),
        }))
    }
}

impl ContextCompactor {
    pub fn builder(config: CompactionConfig) -> ContextCompactorBuilder {
        ContextCompactorBuilder {
            config,
            rounds: None,
            backend: None,
            on_event: None,
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Spawn the background worker. Safe to call repeatedly: the worker is
    /// spawned at most once over the compactor's lifetime. No-op when
    /// compaction is disabled.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        {
            let mut state = self.lock_state();
            if state.started {
                return Ok(());
            }
            state.started = true;
        }

        let engine = Arc::clone(self);
        let handle = runtime.spawn(async move {
            engine.run().await;
        });
        *self.lock_worker() = Some(handle);

        info!(
            threshold = self.config.threshold,
            retain_recent = self.config.retain_recent,
            "compaction worker started"
        );
        self.emit(CompactionEvent::WorkerStarted);
        Ok(())
    }

    /// Ask the worker to exit and wait for it, bounded by
    /// `config.stop_timeout`. An in-flight pass is never interrupted; on
    /// timeout it is left to finish on its own. Safe without a prior `start`.
    pub async fn stop(&self) {
        self.lock_state().stopping = true;
        self.wake.notify_one();

        let handle = self.lock_worker().take();
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(self.config.stop_timeout(), &mut handle).await {
            Ok(joined) => {
                match joined {
                    Ok(()) => info!("compaction worker stopped"),
                    Err(e) => warn!(error = %e, "compaction worker ended abnormally"),
                }
                self.emit(CompactionEvent::WorkerStopped);
            },
            Err(_) => {
                warn!(
                    timeout_secs = self.config.stop_timeout_secs,
                    "compaction worker still busy after stop timeout, detaching"
                );
                *self.lock_worker() = Some(handle);
            },
        }
    }

    /// Re-evaluate the trigger threshold. Never waits on the backend.
    pub fn notify_rounds_changed(&self) {
        if !self.config.enabled {
            return;
        }

        let total = self.rounds.round_count();
        let trigger = {
            let mut state = self.lock_state();
            if state.stopping {
                return;
            }
            let covered = state.compacted.as_ref().map_or(0, |c| c.end_index);
            let uncompacted = total.saturating_sub(covered);
            if uncompacted < self.config.threshold {
                return;
            }
            match state.phase {
                Phase::Running => {
                    state.pending = true;
                    Trigger::Queue
                },
                Phase::Signaled => Trigger::AlreadySignaled,
                Phase::Idle => {
                    state.phase = Phase::Signaled;
                    Trigger::Signal { uncompacted }
                },
            }
        };

        match trigger {
            Trigger::Signal { uncompacted } => {
                info!(
                    uncompacted,
                    threshold = self.config.threshold,
                    "triggering compaction"
                );
                self.wake.notify_one();
                self.emit(CompactionEvent::Triggered {
                    uncompacted,
                    threshold: self.config.threshold,
                });
            },
            Trigger::Queue => {
                debug!("compaction in progress, queued trigger");
                self.emit(CompactionEvent::Queued);
            },
            Trigger::AlreadySignaled => debug!("compaction already signaled"),
        }
    }

    /// Last published summary.
    pub fn get_compaction(&self) -> Option<CompactedSummary> {
        self.lock_state().compacted.clone()
    }

    pub fn is_started(&self) -> bool {
        self.lock_state().started
    }

    /// Whether a pass is in flight right now.
    pub fn is_compacting(&self) -> bool {
        self.lock_state().phase == Phase::Running
    }

    /// Whether the worker task exists and has not finished.
    pub fn is_worker_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Wait until no pass is running, signaled, or queued.
    ///
    /// Returns immediately when the worker was never started or is stopping,
    /// since nothing would ever drain a signal then.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.lock_state();
                if !state.started
                    || state.stopping
                    || (state.phase == Phase::Idle && !state.pending)
                {
                    return;
                }
            }
            notified.await;
        }
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn run(self: Arc<Self>) {
        loop {
            if self.stop_requested() {
                break;
            }
            self.wake.notified().await;
            if self.stop_requested() {
                break;
            }
            self.process_compaction().await;
        }

        self.lock_state().phase = Phase::Idle;
        self.idle.notify_waiters();
        debug!("compaction worker exiting");
    }

    /// Run one pass, then keep re-running while triggers were queued during
    /// the previous one.
    async fn process_compaction(&self) {
        {
            let mut state = self.lock_state();
            if state.phase != Phase::Signaled {
                return;
            }
            state.phase = Phase::Running;
            state.pending = false;
        }

        loop {
            if let Err(e) = self.compact_once().await {
                warn!(error = %e, "compaction failed");
                self.emit(CompactionEvent::Failed {
                    error: e.to_string(),
                });
            }

            let rerun = {
                let mut state = self.lock_state();
                let rerun = std::mem::take(&mut state.pending) && !state.stopping;
                if !rerun {
                    state.phase = Phase::Idle;
                }
                rerun
            };
            if !rerun {
                break;
            }
            debug!("running queued compaction pass");
        }

        self.idle.notify_waiters();
    }

    /// A single pass. Publishes only on success; any error leaves the current
    /// summary untouched.
    async fn compact_once(&self) -> Result<()> {
        let rounds = self.rounds.rounds();
        let total = rounds.len();

        let Some(target_end) = total
            .checked_sub(self.config.retain_recent)
            .filter(|&end| end > 0)
        else {
            debug!(
                total,
                retain_recent = self.config.retain_recent,
                "nothing outside the retained window"
            );
            return Ok(());
        };

        let previous = self.get_compaction();
        let covered = previous.as_ref().map_or(0, |c| c.end_index);
        if covered >= target_end {
            debug!(covered, target_end, "no new rounds to compact");
            return Ok(());
        }

        let content =
            build_compaction_content(&rounds, covered, target_end, self.config.preview_chars);
        let previous_summary =
            previous.map_or_else(|| NO_PREVIOUS_SUMMARY.to_string(), |c| c.summary_text);

        info!(from = covered + 1, to = target_end, "compacting rounds");
        self.emit(CompactionEvent::Started {
            end_index: target_end,
        });

        let summary = self.summarize(content, previous_summary).await?;
        if summary.trim().is_empty() {
            return Err(Error::EmptySummary);
        }

        let published = {
            let mut state = self.lock_state();
            let current_end = state.compacted.as_ref().map_or(0, |c| c.end_index);
            if target_end > current_end {
                state.compacted = Some(CompactedSummary::new(target_end, summary));
                true
            } else {
                false
            }
        };

        if published {
            info!(end_index = target_end, "compaction complete");
            self.emit(CompactionEvent::Completed {
                end_index: target_end,
            });
        }
        Ok(())
    }

    /// Call the backend on its own task; a panic inside it comes back as
    /// `Error::Backend` and the worker keeps running.
    async fn summarize(&self, content: String, previous_summary: String) -> Result<String> {
        let backend = Arc::clone(&self.backend);
        let call =
            tokio::spawn(async move { backend.summarize(&content, &previous_summary).await });
        match call.await {
            Ok(result) => result.map_err(Error::backend),
            Err(e) => Err(Error::Backend {
                source: Box::new(e),
            }),
        }
    }

    fn stop_requested(&self) -> bool {
        self.lock_state().stopping
    }

    fn emit(&self, event: CompactionEvent) {
        if let Some(ref on_event) = self.on_event {
            on_event(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CompactionProvider for ContextCompactor {
    fn get_compaction(&self) -> Option<CompactedSummary> {
        ContextCompactor::get_compaction(self)
    }

    fn notify_rounds_changed(&self) {
        ContextCompactor::notify_rounds_changed(self);
    }
}
