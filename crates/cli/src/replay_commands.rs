//! Offline replay of a recorded conversation through the compactor.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, Result},
    clap::Args,
    loam_compaction::{
        CompactionEvent, ContextCompactor, EventFn, ExtractiveSummarizer, InMemoryRounds,
        RoundSource, compacted_context,
    },
    tracing::{debug, info},
};

#[derive(Args)]
pub struct ReplayArgs {
    /// JSONL transcript, one round per line.
    transcript: PathBuf,
    /// Config file to use instead of the discovered one.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override `compaction.threshold`.
    #[arg(long)]
    threshold: Option<usize>,
    /// Override `compaction.retain_recent`.
    #[arg(long)]
    retain_recent: Option<usize>,
    /// Print engine events to stderr as they happen.
    #[arg(long, default_value_t = false)]
    events: bool,
}

pub async fn handle_replay(args: ReplayArgs) -> Result<()> {
    let mut config = loam_config::load_or_discover(args.config.as_deref())?.compaction;
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(retain_recent) = args.retain_recent {
        config.retain_recent = retain_recent;
    }

    let recorded = read_transcript(&args.transcript)?;
    info!(
        rounds = recorded.len(),
        threshold = config.threshold,
        retain_recent = config.retain_recent,
        "replaying transcript"
    );

    let rounds = Arc::new(InMemoryRounds::new());
    let mut builder = ContextCompactor::builder(config)
        .round_source(rounds.clone())
        .backend(Arc::new(ExtractiveSummarizer::default()));
    if args.events {
        let print: EventFn = Arc::new(|event: CompactionEvent| eprintln!("  [event] {event}"));
        builder = builder.on_event(print);
    }
    let engine = builder.build()?;
    engine.start()?;

    for round in recorded.rounds() {
        rounds.push(round);
        engine.notify_rounds_changed();
        // Let each triggered pass finish so the replay is deterministic.
        engine.wait_idle().await;
    }
    engine.stop().await;

    let all = rounds.rounds();
    let view = compacted_context(&*engine, &all);
    match view.summary {
        Some(ref summary) => println!("{summary}\n"),
        None => println!("(no summary; {} round(s) below threshold)\n", all.len()),
    }
    let first_kept = all.len() - view.rounds.len() + 1;
    for (offset, round) in view.rounds.iter().enumerate() {
        println!("Round {}: {}", first_kept + offset, round.user_query);
    }
    debug!(kept = view.rounds.len(), "replay finished");
    Ok(())
}

fn read_transcript(path: &Path) -> Result<InMemoryRounds> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    InMemoryRounds::from_jsonl(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))
}
