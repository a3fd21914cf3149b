#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    loam_compaction::{
        CompactedSummary, CompactionEvent, CompactionProvider, ContextCompactor, EventFn,
        ExtractiveSummarizer, InMemoryRounds, Round, RoundSource, SummarizationBackend,
        compacted_context,
    },
    loam_config::CompactionConfig,
    rstest::rstest,
    tokio::{
        sync::{Notify, Semaphore},
        time::timeout,
    },
};

const WAIT: Duration = Duration::from_secs(5);

fn make_rounds(range: std::ops::RangeInclusive<usize>) -> Vec<Round> {
    range
        .map(|i| {
            Round::new(format!("Question {i}"))
                .with_message("User", "Planner", format!("Query {i}"))
                .with_message("Planner", "User", format!("Response {i}"))
        })
        .collect()
}

fn config(threshold: usize, retain_recent: usize) -> CompactionConfig {
    CompactionConfig {
        threshold,
        retain_recent,
        ..CompactionConfig::default()
    }
}

/// Records every call and answers with the scripted replies in order,
/// repeating the last one.
struct RecordingBackend {
    replies: Vec<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingBackend {
    fn replying(reply: &str) -> Arc<Self> {
        Self::scripted(&[reply])
    }

    fn scripted(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SummarizationBackend for RecordingBackend {
    async fn summarize(&self, content: &str, previous_summary: &str) -> anyhow::Result<String> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((content.to_string(), previous_summary.to_string()));
        let idx = (calls.len() - 1).min(self.replies.len() - 1);
        Ok(self.replies[idx].clone())
    }
}

struct FailingBackend;

#[async_trait]
impl SummarizationBackend for FailingBackend {
    async fn summarize(&self, _: &str, _: &str) -> anyhow::Result<String> {
        anyhow::bail!("LLM error")
    }
}

/// Blocks every call until the test hands out a permit.
struct GatedBackend {
    calls: AtomicUsize,
    entered: Notify,
    release: Semaphore,
}

impl GatedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummarizationBackend for GatedBackend {
    async fn summarize(&self, _: &str, _: &str) -> anyhow::Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.entered.notify_one();
        self.release.acquire().await?.forget();
        Ok(format!("Summary {n}"))
    }
}

/// Panics on its first call, then succeeds.
#[derive(Default)]
struct PanicOnceBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl SummarizationBackend for PanicOnceBackend {
    async fn summarize(&self, _: &str, _: &str) -> anyhow::Result<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("summarizer blew up");
        }
        Ok("Recovered".into())
    }
}

/// Records whether two calls were ever in flight at once.
#[derive(Default)]
struct ExclusiveBackend {
    calls: AtomicUsize,
    in_flight: AtomicBool,
    overlapped: AtomicBool,
}

#[async_trait]
impl SummarizationBackend for ExclusiveBackend {
    async fn summarize(&self, _: &str, _: &str) -> anyhow::Result<String> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.store(false, Ordering::SeqCst);
        Ok(format!("Summary {n}"))
    }
}

type Events = Arc<Mutex<Vec<CompactionEvent>>>;

fn recorder() -> (EventFn, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (
        Arc::new(move |e: CompactionEvent| sink.lock().unwrap().push(e)),
        events,
    )
}

fn engine(
    cfg: CompactionConfig,
    rounds: &Arc<InMemoryRounds>,
    backend: Arc<dyn SummarizationBackend>,
) -> (Arc<ContextCompactor>, Events) {
    let (on_event, events) = recorder();
    let engine = ContextCompactor::builder(cfg)
        .round_source(rounds.clone())
        .backend(backend)
        .on_event(on_event)
        .build()
        .unwrap();
    (engine, events)
}

async fn settle(engine: &ContextCompactor) {
    timeout(WAIT, engine.wait_idle())
        .await
        .expect("compactor did not go idle");
}

#[tokio::test]
async fn first_pass_covers_all_but_retained() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = RecordingBackend::replying("Test summary");
    let (engine, events) = engine(config(3, 1), &rounds, backend.clone());
    engine.start().unwrap();

    engine.notify_rounds_changed();
    settle(&engine).await;

    assert_eq!(
        engine.get_compaction(),
        Some(CompactedSummary::new(4, "Test summary"))
    );

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    let (content, previous) = &calls[0];
    assert_eq!(previous, "None");
    assert!(content.contains("--- Round 1 ---"));
    assert!(content.contains("--- Round 4 ---"));
    assert!(!content.contains("--- Round 5 ---"));

    assert_eq!(*events.lock().unwrap(), vec![
        CompactionEvent::WorkerStarted,
        CompactionEvent::Triggered {
            uncompacted: 5,
            threshold: 3
        },
        CompactionEvent::Started { end_index: 4 },
        CompactionEvent::Completed { end_index: 4 },
    ]);

    engine.stop().await;
}

#[tokio::test]
async fn later_pass_folds_previous_summary() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = RecordingBackend::scripted(&["Test summary", "Second summary"]);
    let (engine, _) = engine(config(3, 1), &rounds, backend.clone());
    engine.start().unwrap();

    engine.notify_rounds_changed();
    settle(&engine).await;

    rounds.extend(make_rounds(6..=10));
    engine.notify_rounds_changed();
    settle(&engine).await;

    let summary = engine.get_compaction().unwrap();
    assert_eq!(summary.start_index, 1);
    assert_eq!(summary.end_index, 9);
    assert_eq!(summary.summary_text, "Second summary");

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    let (content, previous) = &calls[1];
    assert_eq!(previous, "Test summary");
    assert!(!content.contains("--- Round 4 ---"));
    assert!(content.contains("--- Round 5 ---"));
    assert!(content.contains("--- Round 9 ---"));
    assert!(!content.contains("--- Round 10 ---"));

    engine.stop().await;
}

#[rstest]
#[case(4, false)]
#[case(5, true)]
#[tokio::test]
async fn threshold_boundary(#[case] total: usize, #[case] compacts: bool) {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=total)));
    let backend = RecordingBackend::replying("s");
    let (engine, _) = engine(config(5, 2), &rounds, backend.clone());
    engine.start().unwrap();

    engine.notify_rounds_changed();
    settle(&engine).await;

    assert_eq!(engine.get_compaction().is_some(), compacts);
    assert_eq!(backend.calls().len(), usize::from(compacts));
    engine.stop().await;
}

#[tokio::test]
async fn threshold_counts_only_uncompacted_rounds() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = RecordingBackend::replying("s");
    let (engine, _) = engine(config(3, 1), &rounds, backend.clone());
    engine.start().unwrap();

    engine.notify_rounds_changed();
    settle(&engine).await;

    // 6 rounds, 4 covered: 2 uncompacted, below threshold.
    rounds.extend(make_rounds(6..=6));
    engine.notify_rounds_changed();
    settle(&engine).await;
    assert_eq!(backend.calls().len(), 1);

    rounds.extend(make_rounds(7..=7));
    engine.notify_rounds_changed();
    settle(&engine).await;
    assert_eq!(backend.calls().len(), 2);
    assert_eq!(engine.get_compaction().unwrap().end_index, 6);

    engine.stop().await;
}

#[tokio::test]
async fn backend_failure_keeps_state() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let (engine, events) = engine(config(3, 1), &rounds, Arc::new(FailingBackend));
    engine.start().unwrap();

    engine.notify_rounds_changed();
    settle(&engine).await;

    assert!(engine.get_compaction().is_none());
    assert!(events.lock().unwrap().iter().any(|e| matches!(
        e,
        CompactionEvent::Failed { error } if error.contains("LLM error")
    )));

    // The worker survives a failed pass.
    assert!(engine.is_worker_running());
    engine.stop().await;
}

#[tokio::test]
async fn blank_summary_counts_as_failure() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = RecordingBackend::replying("   ");
    let (engine, events) = engine(config(3, 1), &rounds, backend.clone());
    engine.start().unwrap();

    engine.notify_rounds_changed();
    settle(&engine).await;

    assert!(engine.get_compaction().is_none());
    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, CompactionEvent::Failed { .. }))
    );
    engine.stop().await;
}

#[tokio::test]
async fn failed_later_pass_keeps_last_good_summary() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = RecordingBackend::scripted(&["Test summary", ""]);
    let (engine, _) = engine(config(3, 1), &rounds, backend.clone());
    engine.start().unwrap();

    engine.notify_rounds_changed();
    settle(&engine).await;
    let before = engine.get_compaction();

    rounds.extend(make_rounds(6..=10));
    engine.notify_rounds_changed();
    settle(&engine).await;

    assert_eq!(backend.calls().len(), 2);
    assert_eq!(engine.get_compaction(), before);
    assert_eq!(before.unwrap().end_index, 4);

    // The next natural trigger retries.
    rounds.extend(make_rounds(11..=11));
    engine.notify_rounds_changed();
    settle(&engine).await;
    assert_eq!(backend.calls().len(), 3);

    engine.stop().await;
}

#[tokio::test]
async fn panicking_backend_does_not_kill_worker() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = Arc::new(PanicOnceBackend::default());
    let (engine, events) = engine(config(3, 1), &rounds, backend.clone());
    engine.start().unwrap();

    engine.notify_rounds_changed();
    settle(&engine).await;

    assert!(engine.get_compaction().is_none());
    assert!(!engine.is_compacting());
    assert!(engine.is_worker_running());
    assert!(events.lock().unwrap().iter().any(|e| matches!(
        e,
        CompactionEvent::Failed { error } if error.contains("panicked")
    )));

    rounds.extend(make_rounds(6..=10));
    engine.notify_rounds_changed();
    settle(&engine).await;

    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        engine.get_compaction(),
        Some(CompactedSummary::new(9, "Recovered"))
    );
    engine.stop().await;
}

#[tokio::test]
async fn triggers_during_a_pass_coalesce_into_one_rerun() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = GatedBackend::new();
    let (engine, events) = engine(config(3, 1), &rounds, backend.clone());
    engine.start().unwrap();

    engine.notify_rounds_changed();
    timeout(WAIT, backend.entered.notified()).await.unwrap();
    assert!(engine.is_compacting());

    rounds.extend(make_rounds(6..=10));
    for _ in 0..3 {
        engine.notify_rounds_changed();
    }
    let queued = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| **e == CompactionEvent::Queued)
        .count();
    assert_eq!(queued, 3);

    backend.release.add_permits(2);
    settle(&engine).await;

    assert_eq!(backend.calls(), 2);
    assert_eq!(
        engine.get_compaction(),
        Some(CompactedSummary::new(9, "Summary 2"))
    );
    assert!(!engine.is_compacting());
    engine.stop().await;
}

#[tokio::test]
async fn readers_never_wait_on_a_pass() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = GatedBackend::new();
    let (engine, _) = engine(config(3, 1), &rounds, backend.clone());
    engine.start().unwrap();

    engine.notify_rounds_changed();
    timeout(WAIT, backend.entered.notified()).await.unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine.notify_rounds_changed();
                engine.get_compaction()
            })
        })
        .collect();
    for reader in readers {
        let seen = timeout(WAIT, reader).await.unwrap().unwrap();
        assert!(seen.is_none());
    }

    backend.release.add_permits(2);
    settle(&engine).await;
    assert_eq!(engine.get_compaction().unwrap().end_index, 4);
    engine.stop().await;
}

#[tokio::test]
async fn start_is_idempotent_and_stop_releases_worker() {
    let rounds = Arc::new(InMemoryRounds::new());
    let (engine, events) = engine(config(3, 1), &rounds, RecordingBackend::replying("s"));

    engine.start().unwrap();
    engine.start().unwrap();
    assert!(engine.is_started());
    assert!(engine.is_worker_running());
    // One reference held here, one by the single worker.
    assert_eq!(Arc::strong_count(&engine), 2);

    engine.stop().await;
    assert!(!engine.is_worker_running());
    assert_eq!(Arc::strong_count(&engine), 1);

    let events = events.lock().unwrap();
    assert_eq!(*events, vec![
        CompactionEvent::WorkerStarted,
        CompactionEvent::WorkerStopped
    ]);
}

#[tokio::test]
async fn stop_without_start_is_a_noop() {
    let rounds = Arc::new(InMemoryRounds::new());
    let (engine, events) = engine(config(3, 1), &rounds, RecordingBackend::replying("s"));
    timeout(WAIT, engine.stop()).await.unwrap();
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stop_does_not_cancel_an_inflight_pass() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = GatedBackend::new();
    let cfg = CompactionConfig {
        stop_timeout_secs: 1,
        ..config(3, 1)
    };
    let (engine, events) = engine(cfg, &rounds, backend.clone());
    engine.start().unwrap();

    engine.notify_rounds_changed();
    timeout(WAIT, backend.entered.notified()).await.unwrap();

    engine.stop().await;
    assert!(engine.is_worker_running());
    assert!(engine.get_compaction().is_none());
    // The worker is detached, not stopped.
    assert!(
        !events
            .lock()
            .unwrap()
            .contains(&CompactionEvent::WorkerStopped)
    );

    backend.release.add_permits(1);
    timeout(WAIT, async {
        while engine.get_compaction().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        engine.get_compaction(),
        Some(CompactedSummary::new(4, "Summary 1"))
    );
}

#[tokio::test]
async fn no_pass_runs_after_stop() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = RecordingBackend::replying("s");
    let (engine, _) = engine(config(3, 1), &rounds, backend.clone());
    engine.start().unwrap();
    engine.stop().await;

    engine.notify_rounds_changed();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(backend.calls().is_empty());
    assert!(engine.get_compaction().is_none());
}

#[tokio::test]
async fn disabled_engine_is_inert() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=20)));
    let backend = RecordingBackend::replying("s");
    let (engine, events) = engine(CompactionConfig::disabled(), &rounds, backend.clone());

    engine.start().unwrap();
    engine.notify_rounds_changed();
    settle(&engine).await;
    engine.stop().await;

    assert!(!engine.is_started());
    assert!(backend.calls().is_empty());
    assert!(engine.get_compaction().is_none());
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn notification_before_start_is_picked_up() {
    let rounds = Arc::new(InMemoryRounds::from_rounds(make_rounds(1..=5)));
    let backend = RecordingBackend::replying("s");
    let (engine, _) = engine(config(3, 1), &rounds, backend.clone());

    engine.notify_rounds_changed();
    engine.start().unwrap();
    settle(&engine).await;

    assert_eq!(engine.get_compaction().unwrap().end_index, 4);
    engine.stop().await;
}

#[tokio::test]
async fn extractive_replay_through_provider_view() {
    let rounds = Arc::new(InMemoryRounds::new());
    let (engine, _) = engine(
        config(3, 1),
        &rounds,
        Arc::new(ExtractiveSummarizer::default()),
    );
    engine.start().unwrap();
    let provider: &dyn CompactionProvider = &*engine;

    for round in make_rounds(1..=6) {
        rounds.push(round);
        provider.notify_rounds_changed();
        settle(&engine).await;
    }

    let all = rounds.rounds();
    let view = compacted_context(provider, &all);
    let summary = view.summary.unwrap();
    assert!(summary.starts_with("[Conversation History Summary (Rounds 1-"));
    assert!(summary.contains("- Question 1"));
    assert!(!view.rounds.is_empty());
    assert_eq!(
        view.rounds.last().unwrap().user_query,
        "Question 6",
        "the latest round stays verbatim"
    );

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_readers_and_notifiers_see_consistent_summaries() {
    const TOTAL: usize = 40;
    const THRESHOLD: usize = 3;

    let rounds = Arc::new(InMemoryRounds::new());
    let backend = Arc::new(ExclusiveBackend::default());
    let (engine, _) = engine(config(THRESHOLD, 1), &rounds, backend.clone());
    engine.start().unwrap();
    let done = Arc::new(AtomicBool::new(false));
    let notifying = Arc::new(AtomicBool::new(true));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut last_end = 0;
                while !done.load(Ordering::SeqCst) {
                    if let Some(summary) = engine.get_compaction() {
                        assert_eq!(summary.start_index, 1);
                        assert!(summary.end_index >= last_end, "end_index went backwards");
                        assert!(!summary.summary_text.trim().is_empty());
                        last_end = summary.end_index;
                    }
                    std::thread::yield_now();
                }
                let last = engine.get_compaction().expect("summary published");
                assert!(last.end_index >= last_end);
                last.end_index
            })
        })
        .collect();

    let notifiers: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let notifying = Arc::clone(&notifying);
            std::thread::spawn(move || {
                while notifying.load(Ordering::SeqCst) {
                    engine.notify_rounds_changed();
                    std::thread::yield_now();
                }
            })
        })
        .collect();

    let writer = {
        let engine = Arc::clone(&engine);
        let rounds = Arc::clone(&rounds);
        std::thread::spawn(move || {
            for round in make_rounds(1..=TOTAL) {
                rounds.push(round);
                engine.notify_rounds_changed();
                std::thread::sleep(Duration::from_millis(1));
            }
        })
    };

    tokio::task::spawn_blocking(move || writer.join())
        .await
        .unwrap()
        .unwrap();
    notifying.store(false, Ordering::SeqCst);
    tokio::task::spawn_blocking(move || {
        for notifier in notifiers {
            notifier.join().unwrap();
        }
    })
    .await
    .unwrap();
    settle(&engine).await;
    done.store(true, Ordering::SeqCst);

    let final_ends = tokio::task::spawn_blocking(move || {
        readers
            .into_iter()
            .map(|reader| reader.join().unwrap())
            .collect::<Vec<_>>()
    })
    .await
    .unwrap();

    let published = engine.get_compaction().unwrap();
    assert!(final_ends.iter().all(|&end| end == published.end_index));
    // The last notification saw fewer than THRESHOLD uncompacted rounds.
    assert!(published.end_index > TOTAL - THRESHOLD);
    assert!(published.end_index < TOTAL);
    assert!(!backend.overlapped.load(Ordering::SeqCst));
    engine.stop().await;
}
