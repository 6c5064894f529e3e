//! jetfinder - beacon scavenger hunt client
//!
//! Runs the game engine against the backend and manages the local player
//! state. Sightings can be fed in on stdin, one `identifier,strength` per line.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Store: $XDG_DATA_HOME/jetfinder/jetfinder.db (~/.local/share/jetfinder/jetfinder.db)
//! - Logs: $XDG_STATE_HOME/jetfinder/jetfinder.log (~/.local/state/jetfinder/jetfinder.log)
//! - Config: $XDG_CONFIG_HOME/jetfinder/config.toml (~/.config/jetfinder/config.toml)

mod companion;
mod input;
mod process_lock;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use companion::JsonLinesCompanion;
use input::parse_sighting_line;
use jetfinder_core::hub::spawn_companion_forwarder;
use jetfinder_core::storage::{CollectedSpotsStore, CookieJar, KeyValueStorage};
use jetfinder_core::{
    Config, CycleSummary, Fingerprint, GameSession, HttpGameApi, SearchStatus, SessionStores,
    SightingQueue, StateHub, Store,
};
use process_lock::acquire_engine_guard;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "jetfinder")]
#[command(about = "Beacon scavenger hunt client")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the game engine until Ctrl-C
    Run {
        /// Read sightings from stdin (`identifier,strength` per line) and
        /// stop once it is exhausted
        #[arg(long)]
        stdin: bool,

        /// Append cycle summaries as JSON lines for the companion device
        #[arg(long, value_name = "FILE")]
        companion: Option<PathBuf>,
    },

    /// Show registration and collected spots
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Register the winner's name with the backend
    Register {
        /// Name shown on the winners board
        name: String,
    },

    /// Drop the session cookie and start a fresh game
    Reset,

    /// Print the wire fingerprint of beacon identifiers
    Fingerprint {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Run { .. } => "run",
            Command::Status { .. } => "status",
            Command::Register { .. } => "register",
            Command::Reset => "reset",
            Command::Fingerprint { .. } => "fingerprint",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Pure computation, no config or store needed
    if let Command::Fingerprint { ids } = &args.command {
        for id in ids {
            println!("{}\t{}", id, Fingerprint::of(id));
        }
        return Ok(());
    }

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        jetfinder_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(command = args.command.name(), "jetfinder starting");

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening store");
    let store = Arc::new(Store::open(&db_path).context("failed to open store")?);
    store.migrate().context("failed to run store migrations")?;

    match args.command {
        Command::Run { stdin, companion } => {
            run_engine(&config, store, &db_path, stdin, companion.as_deref()).await
        }
        Command::Status { json } => print_status(&store, json),
        Command::Register { name } => register(&config, store, &name).await,
        Command::Reset => reset(&config, store),
        Command::Fingerprint { .. } => Ok(()),
    }
}

fn build_session(config: &Config, store: Arc<Store>) -> Result<GameSession> {
    let api = HttpGameApi::new(&config.backend, store.clone(), store.clone())
        .context("failed to create backend client")?;
    GameSession::new(
        Arc::new(api),
        SessionStores::shared(store),
        config.engine.clone(),
    )
    .context("failed to create game session")
}

async fn run_engine(
    config: &Config,
    store: Arc<Store>,
    db_path: &Path,
    from_stdin: bool,
    companion: Option<&Path>,
) -> Result<()> {
    let _engine_guard = acquire_engine_guard(db_path).context("failed to acquire engine lock")?;

    let session = build_session(config, store)?;
    let game = session
        .load_game_config()
        .await
        .context("failed to load game config from backend")?;

    println!("Backend: {}", config.backend.base_url);
    println!("Spots to win: {}", game.winner_count);

    let shutdown = CancellationToken::new();
    let printer = spawn_printer(session.hub(), shutdown.clone());
    let forwarder = companion.map(|path| {
        println!("Companion log: {}", path.display());
        spawn_companion_forwarder(
            &session.hub(),
            Arc::new(JsonLinesCompanion::new(path)),
            shutdown.clone(),
        )
    });
    let engine = session
        .start(shutdown.clone())
        .context("failed to start engine")?;

    if from_stdin {
        tokio::select! {
            fed = feed_stdin(session.sightings()) => {
                let fed = fed?;
                tracing::info!(sightings = fed, "Input exhausted");
                // Give the last batch a cycle to reach the backend
                tokio::time::sleep(config.engine.poll_interval() * 2).await;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted");
            }
        }
    } else {
        println!("Engine running. Press Ctrl-C to stop.");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        println!("\nStopping...");
    }

    shutdown.cancel();
    engine.await.context("engine task failed")?;
    printer.await.context("printer task failed")?;
    if let Some(forwarder) = forwarder {
        forwarder.await.context("companion task failed")?;
    }

    let state = session.state();
    println!(
        "Collected {} spot(s){}",
        state.collected_ids.len(),
        if state.is_game_ended {
            ", game complete"
        } else {
            ""
        }
    );
    tracing::info!(collected = state.collected_ids.len(), "jetfinder stopped");
    Ok(())
}

async fn feed_stdin(queue: SightingQueue) -> Result<usize> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut fed = 0;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match parse_sighting_line(&line) {
            Ok(Some(sighting)) => {
                queue.push(sighting);
                fed += 1;
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("Skipping line: {:#}", e);
                tracing::warn!(error = ?e, "Skipping malformed sighting");
            }
        }
    }

    Ok(fed)
}

/// Print hub changes as they happen
fn spawn_printer(hub: Arc<StateHub>, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut current = hub.current_discovered_id().subscribe();
    let mut ended = hub.is_game_ended().subscribe();
    let mut cycles = hub.on_cycle_complete();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(id) = current.recv() => {
                    if let Some(id) = id {
                        println!("Spot found: {}", id);
                    }
                }

                Some(game_ended) = ended.recv() => {
                    if game_ended {
                        println!("All spots collected!");
                    }
                }

                Some(summary) = cycles.recv() => {
                    println!("{}", render_cycle(&summary, hub.search_status()));
                }

                else => break,
            }
        }
    })
}

fn render_cycle(summary: &CycleSummary, status: SearchStatus) -> String {
    let nearest = summary
        .nearest_signal_strength
        .map(|s| format!("{} dBm", s))
        .unwrap_or_else(|| "none".to_string());
    let view = match status {
        SearchStatus::Searching { distance } => format!("searching, distance {:.2}", distance),
        SearchStatus::SpotFound { spot_id } => format!("found spot {}", spot_id),
    };
    format!(
        "Cycle: {} discovered, nearest {}, {}",
        summary.discovered_count, nearest, view
    )
}

fn print_status(store: &Store, json: bool) -> Result<()> {
    let registered = store.is_user_registered()?;
    let winner_name = store.winner_name()?;
    let cookie = store.last_cookie()?;
    let collected = store.collected_spot_ids()?;

    if json {
        let status = serde_json::json!({
            "registered": registered,
            "winner_name": winner_name,
            "cookie": cookie,
            "collected_ids": collected,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Registered: {}", if registered { "yes" } else { "no" });
    println!(
        "Winner name: {}",
        winner_name.as_deref().unwrap_or("(not set)")
    );
    println!("Cookie: {}", cookie.as_deref().unwrap_or("(none)"));
    if collected.is_empty() {
        println!("Collected spots: none");
    } else {
        let ids = collected
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!("Collected spots ({}): {}", collected.len(), ids);
    }
    Ok(())
}

async fn register(config: &Config, store: Arc<Store>, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("winner name must not be empty");
    }

    let session = build_session(config, store)?;
    let message = session
        .send_winner_name(name)
        .await
        .context("failed to register winner")?;
    session.set_user_registered(true)?;

    println!("Registered as {}", name);
    if let Some(message) = message {
        println!("{}", message);
    }
    Ok(())
}

fn reset(config: &Config, store: Arc<Store>) -> Result<()> {
    let session = build_session(config, store)?;
    session.reset_cookies().context("failed to reset session")?;
    println!("Session reset. Collected spots cleared.");
    Ok(())
}
