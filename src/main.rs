use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pr_digest::config::DigestConfig;
use pr_digest::mirror::PersistenceMirror;
use pr_digest::providers::providers_from_config;
use pr_digest::{logging, Digest, DigestSnapshot, FetchNext, ItemView};
use snapshot_store::SnapshotStore;

#[derive(Parser)]
#[command(name = "pr-digest", version, about = "Browse pull requests and stream resumable digests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show held items; fetches the first page when nothing is held yet.
    List,
    /// Fetch the next page of items.
    More,
    /// Replace held items with a fresh first page.
    Refetch,
    /// Start a fresh generation for an item and stream it.
    Generate { id: String },
    /// Continue an interrupted generation.
    Resume { id: String },
    /// Print an item's generation state and text.
    Show { id: String },
    /// Toggle whether an item's generated text is shown.
    Toggle { id: String },
    /// Discard all held and persisted state.
    Reset,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = DigestConfig::from_env();
    logging::init(config.log_filter.as_deref());

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &DigestConfig) -> Result<(), String> {
    let cwd = std::env::current_dir().map_err(|error| error.to_string())?;
    let mut snapshots =
        SnapshotStore::open(&config.state_dir(&cwd)).map_err(|error| error.to_string())?;
    if let Some(limit) = config.storage_quota_bytes {
        snapshots = snapshots.with_quota(limit);
    }
    let providers = providers_from_config(config).map_err(|error| error.to_string())?;

    let digest = Digest::with_observer(
        PersistenceMirror::new(snapshots),
        providers.backend,
        providers.source,
        config.settings(),
        Arc::new(|_item_id: &str, increment: &str| {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(increment.as_bytes());
            let _ = stdout.flush();
        }),
    );
    let loaded = digest.hydrate();
    for key in &loaded.recovered_keys {
        eprintln!("warning: stored '{key}' was unreadable and has been reset");
    }

    match command {
        Command::List => {
            if digest.snapshot().current_page == 0 {
                digest
                    .fetch_next_page()
                    .await
                    .map_err(|error| error.to_string())?;
            }
            print_list(&digest.snapshot());
        }
        Command::More => {
            match digest
                .fetch_next_page()
                .await
                .map_err(|error| error.to_string())?
            {
                FetchNext::Fetched(outcome) => {
                    println!(
                        "page {}: {} new item(s), {} dropped",
                        outcome.current_page, outcome.added, outcome.dropped
                    );
                }
                FetchNext::Exhausted => println!("no more pages"),
            }
            print_list(&digest.snapshot());
        }
        Command::Refetch => {
            digest
                .refetch_first_page()
                .await
                .map_err(|error| error.to_string())?;
            print_list(&digest.snapshot());
        }
        Command::Generate { id } => {
            let handle = digest
                .request_generation(&id)
                .map_err(|error| error.to_string())?;
            stream_until_settled(&digest, &id, handle).await?;
        }
        Command::Resume { id } => {
            if let Some(view) = digest.item_view(&id) {
                print!("{}", view.accumulated_text);
            }
            let handle = digest
                .resume_generation(&id)
                .map_err(|error| error.to_string())?;
            stream_until_settled(&digest, &id, handle).await?;
        }
        Command::Show { id } => {
            let view = digest
                .item_view(&id)
                .ok_or_else(|| format!("unknown item '{id}'"))?;
            print_view(&view);
        }
        Command::Toggle { id } => {
            let visible = digest
                .toggle_visibility(&id)
                .map_err(|error| error.to_string())?;
            println!("{id}: {}", if visible { "shown" } else { "hidden" });
        }
        Command::Reset => {
            digest.reset_all();
            println!("state cleared");
        }
    }

    if digest.snapshot().persistence_degraded {
        eprintln!("warning: some changes could not be saved and will be lost on exit");
    }
    Ok(())
}

async fn stream_until_settled(
    digest: &Digest,
    id: &str,
    mut handle: tokio::task::JoinHandle<pr_digest::GenerationState>,
) -> Result<(), String> {
    let settled = tokio::select! {
        settled = &mut handle => settled,
        _ = tokio::signal::ctrl_c() => {
            match digest.abort_generation(id) {
                Ok(()) | Err(pr_digest::DigestError::NoGeneration(_)) => {}
                Err(error) => eprintln!("warning: could not stop generation: {error}"),
            }
            handle.await
        }
    };
    let state = settled.map_err(|error| format!("generation task failed: {error}"))?;

    println!();
    if let Some(view) = digest.item_view(id) {
        println!("[{}]", state.as_str());
        match (&view.interruption_marker, state) {
            (Some(marker), _) => println!("{marker}"),
            (None, pr_digest::GenerationState::Failed) => println!("{}", view.accumulated_text),
            _ => {}
        }
    }
    Ok(())
}

fn print_list(snapshot: &DigestSnapshot) {
    for view in &snapshot.items {
        println!(
            "{:<12} {:<12} {}",
            view.item.id,
            view.state.as_str(),
            view.item.description
        );
    }
    let more = if snapshot.has_more() {
        "more available"
    } else {
        "end of list"
    };
    println!(
        "-- {} item(s), page {}, {more}",
        snapshot.items.len(),
        snapshot.current_page
    );
}

fn print_view(view: &ItemView) {
    println!("{} ({})", view.item.description, view.item.source_url);
    println!("state: {}", view.state.as_str());
    if let Some(marker) = &view.interruption_marker {
        println!("note: {marker}");
    }
    if view.visible && !view.accumulated_text.is_empty() {
        println!();
        println!("{}", view.accumulated_text);
    } else if !view.accumulated_text.is_empty() {
        println!("(generated text hidden)");
    }
}
