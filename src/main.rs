use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use votechain::config::{Settings, MAX_INTERACTIVE_DIFFICULTY};
use votechain::ledger::Ledger;
use votechain::logging::init_logging;
use votechain::{Election, ElectionError, VoterRegistration};

/// Runs a single in-memory election: registers voters, casts votes
/// concurrently while a background sealer mines them, then reports.
#[derive(Parser, Debug)]
#[clap(name = "votechain", version, about)]
struct Cli {
    /// Settings file (TOML). Defaults to ./votechain.toml when present.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Override the mining difficulty.
    #[clap(short, long)]
    difficulty: Option<usize>,

    /// Number of synthetic voters to register.
    #[clap(long, default_value_t = 12)]
    voters: usize,

    /// Print the full election export as JSON after the results.
    #[clap(long)]
    json: bool,
}

// -----------------------------
// Background sealer
// -----------------------------

fn spawn_sealer(
    election: Arc<Election>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            let election = election.clone();
            // Mining is CPU bound; keep it off the async workers.
            match tokio::task::spawn_blocking(move || election.seal_if_pending()).await {
                Ok(Ok(Some(block))) => info!(
                    index = block.index(),
                    votes = block.transactions().len(),
                    "sealed pending votes"
                ),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => error!(error = %err, "sealing failed"),
                Err(err) => error!(error = %err, "sealer task panicked"),
            }
        }
    })
}

// -----------------------------
// Voting
// -----------------------------

async fn vote(election: Arc<Election>, registration: VoterRegistration, choices: Arc<Vec<String>>) {
    let (delay, pick) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(0..400), choices.choose(&mut rng).cloned())
    };
    tokio::time::sleep(Duration::from_millis(delay)).await;
    let Some(candidate_id) = pick else {
        return;
    };
    if let Err(err) = election.cast_vote(
        &registration.voter.voter_id,
        &candidate_id,
        registration.credential.expose(),
    ) {
        warn!(voter_id = %registration.voter.voter_id, error = %err, "vote not recorded");
    }
}

/// Replays a used credential and forges another; both must be refused.
fn exercise_rejections(election: &Election, registration: &VoterRegistration, candidate_id: &str) {
    let voter_id = &registration.voter.voter_id;
    match election.cast_vote(voter_id, candidate_id, registration.credential.expose()) {
        Err(ElectionError::AlreadyVoted(_)) => info!(voter_id = %voter_id, "replayed vote refused"),
        other => warn!(voter_id = %voter_id, outcome = ?other.map(|_| ()), "unexpected replay outcome"),
    }
    match election.cast_vote(voter_id, candidate_id, "forged-credential") {
        Err(ElectionError::InvalidCredential) => info!(voter_id = %voter_id, "forged credential refused"),
        other => warn!(voter_id = %voter_id, outcome = ?other.map(|_| ()), "unexpected forgery outcome"),
    }
}

// -----------------------------
// Application
// -----------------------------

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let ledger = Ledger::with_nonce_limit(settings.difficulty, settings.max_nonce)
        .context("failed to seal the genesis block")?;
    let election = Arc::new(Election::with_ledger(settings.election_name.clone(), ledger));
    info!(
        election = %election.name(),
        difficulty = election.difficulty(),
        "election created"
    );

    for candidate in &settings.candidates {
        election.register_candidate(
            candidate.candidate_id.clone(),
            candidate.name.clone(),
            candidate.party.clone(),
            candidate.description.clone(),
        )?;
    }
    let registrations = (1..=cli.voters)
        .map(|n| {
            election.register_voter(
                format!("V{n:03}"),
                format!("Voter {n}"),
                format!("voter{n}@example.org"),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    election.start()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sealer = spawn_sealer(
        election.clone(),
        Duration::from_millis(settings.seal_interval_ms),
        shutdown_rx,
    );

    let choices: Arc<Vec<String>> = Arc::new(
        election
            .candidates()
            .into_iter()
            .map(|c| c.candidate_id)
            .collect(),
    );
    let outcomes = join_all(
        registrations
            .iter()
            .cloned()
            .map(|reg| tokio::spawn(vote(election.clone(), reg, choices.clone()))),
    )
    .await;
    for outcome in outcomes {
        if let Err(err) = outcome {
            error!(error = %err, "voter task panicked");
        }
    }

    if let (Some(first), Some(candidate_id)) = (registrations.first(), choices.first()) {
        exercise_rejections(&election, first, candidate_id);
    }

    shutdown_tx.send(true).ok();
    sealer.await.context("sealer task failed")?;

    let closer = election.clone();
    let flushed = tokio::task::spawn_blocking(move || closer.end())
        .await
        .context("end task failed")??;
    if let Some(block) = flushed {
        info!(index = block.index(), votes = block.transactions().len(), "final votes sealed");
    }

    println!("{}", election.results());
    let valid = election.validate();
    println!(
        "Blocks: {}  Votes cast: {}  Chain valid: {}",
        election.block_count(),
        election.votes_cast(),
        valid
    );
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&election.export())?);
    }
    anyhow::ensure!(valid, "chain integrity check failed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(difficulty) = cli.difficulty {
        anyhow::ensure!(
            difficulty <= MAX_INTERACTIVE_DIFFICULTY,
            "difficulty {difficulty} exceeds {MAX_INTERACTIVE_DIFFICULTY}"
        );
        settings.difficulty = difficulty;
    }
    init_logging(settings.log_format, &settings.log_level).context("failed to initialise logging")?;
    info!(?settings, "starting votechain node");
    run(cli, settings).await
}
