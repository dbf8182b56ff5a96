//! # Game Vault CLI (`gv`)
//!
//! The `gv` binary drives the vault: database initialization, library
//! scans, unmatched-folder triage, release-group administration, game
//! listing, download packaging and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! gv --config ./config/gv.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gv init` | Create the database, run migrations, seed release groups |
//! | `gv scan start <root>` | Run a tracked scan and wait for it |
//! | `gv scan preview <root>` | Classify folders without writing |
//! | `gv scan status <id-or-root>` | Show one scan job |
//! | `gv unmatched list` | Folders that need a manual title |
//! | `gv groups list` | Stored release-group tags |
//! | `gv games list` | Catalogued games |
//! | `gv download request <requester> <game>` | Build a zip archive |
//! | `gv reconcile` | Fail jobs whose worker has died |
//! | `gv stats` | Library overview |
//! | `gv serve` | Start the HTTP server |

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use game_vault::config;
use game_vault::logging;
use game_vault::scanner::ScanReport;
use game_vault::stats::{self, format_bytes, format_ts_iso};
use game_vault::vault::Vault;
use game_vault_core::models::{
    DownloadRequest, ExternalRecord, GameFilter, GameSort, ReleaseGroupPattern, ScanJob,
    ScanStatus, UnmatchedStatus,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Game Vault CLI — catalog an on-disk game collection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/gv.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "gv",
    about = "Game Vault — catalog an on-disk game collection",
    version,
    long_about = "Game Vault scans library folders, strips release-group and noise tokens \
    from folder names to recover canonical titles, tracks every scan as a durable job, and \
    packages catalogued games into downloadable zip archives."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gv.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and seed the release-group table.
    ///
    /// Idempotent: running it again only adds missing default tags.
    Init,

    /// Start the HTTP server and the reconciliation sweep.
    Serve,

    /// Scan library roots.
    Scan {
        #[command(subcommand)]
        action: ScanAction,
    },

    /// Triage folders whose names could not be resolved.
    Unmatched {
        #[command(subcommand)]
        action: UnmatchedAction,
    },

    /// Manage release-group tags. Changes apply on the next start.
    Groups {
        #[command(subcommand)]
        action: GroupsAction,
    },

    /// List or remove catalogued games.
    Games {
        #[command(subcommand)]
        action: GamesAction,
    },

    /// Package games into zip archives.
    Download {
        #[command(subcommand)]
        action: DownloadAction,
    },

    /// Fail every job whose heartbeat has gone stale.
    Reconcile,

    /// Show library statistics.
    Stats,
}

#[derive(Subcommand)]
enum ScanAction {
    /// Run a tracked scan of a root folder and wait for it to finish.
    Start {
        root: String,
    },
    /// Classify the folders under a root without writing anything.
    Preview {
        root: String,
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show a scan job by id, or the latest job for a root.
    Status {
        id_or_root: String,
    },
    /// List scan jobs, newest first.
    List,
    /// Delete a finished scan job.
    Delete {
        id: String,
    },
    /// Delete every finished scan job.
    Clear,
}

#[derive(Subcommand)]
enum UnmatchedAction {
    /// List unmatched folders.
    List {
        /// Only folders in this status (`pending`, `ignored`, `resolved`).
        #[arg(long)]
        status: Option<UnmatchedStatus>,
    },
    /// Register an unmatched folder with operator-supplied metadata.
    Resolve {
        path: String,
        /// Identifier of the record in the external game database.
        #[arg(long)]
        external_id: String,
        /// Canonical title for the game.
        #[arg(long)]
        title: String,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },
    /// Set the status of an unmatched folder.
    SetStatus {
        path: String,
        status: UnmatchedStatus,
    },
    /// Forget one unmatched folder.
    Delete {
        path: String,
    },
    /// Forget every unmatched folder.
    Clear,
}

#[derive(Subcommand)]
enum GroupsAction {
    /// List stored release-group tags in catalog order.
    List,
    /// Add a release-group tag.
    Add {
        tag: String,
        /// Match the tag with exact case.
        #[arg(long)]
        case_sensitive: bool,
    },
    /// Remove a release-group tag (exact text).
    Remove {
        tag: String,
    },
}

#[derive(Subcommand)]
enum GamesAction {
    /// List catalogued games.
    List {
        /// Case-insensitive substring of the title.
        #[arg(long)]
        title: Option<String>,
        /// Only games under this path.
        #[arg(long)]
        path_prefix: Option<String>,
        /// Sort order: `title`, `newest` or `largest`.
        #[arg(long, default_value = "title", value_parser = parse_sort)]
        sort: GameSort,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Show one game with its metadata.
    Show {
        id: String,
    },
    /// Check whether a folder exists and is already catalogued.
    CheckPath {
        path: String,
    },
    /// Remove a game, its download requests and their artifacts.
    Remove {
        id: String,
    },
}

#[derive(Subcommand)]
enum DownloadAction {
    /// Build an archive of a game and wait for it.
    Request {
        requester_id: String,
        game_id: String,
    },
    /// Show one download request.
    Status {
        id: String,
    },
    /// List download requests, newest first.
    List {
        #[arg(long)]
        requester: Option<String>,
    },
    /// Delete a download request and its artifact.
    Delete {
        id: String,
    },
}

fn parse_sort(s: &str) -> Result<GameSort, String> {
    match s {
        "title" => Ok(GameSort::Title),
        "newest" => Ok(GameSort::Newest),
        "largest" => Ok(GameSort::Largest),
        other => Err(format!(
            "unknown sort '{}': expected title, newest or largest",
            other
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);
    let vault = Vault::global(cfg).await?;

    match cli.command {
        Commands::Init => {
            println!(
                "Database initialized successfully ({} release groups).",
                vault.catalog().len()
            );
        }
        Commands::Serve => {
            game_vault::server::run_server(vault.clone()).await?;
        }
        Commands::Scan { action } => match action {
            ScanAction::Start { root } => {
                let job = vault.scans().start(&root).await?;
                println!("Scan {} queued for {}", job.id, job.root_path);
                let job = vault.scans().wait(&job.id, POLL_INTERVAL).await?;
                print_scan_job(&job);
                if job.status == ScanStatus::Failed {
                    anyhow::bail!(
                        "scan failed: {}",
                        job.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            ScanAction::Preview { root, json } => {
                let report = vault.scans().preview(&root).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_preview(&report);
                }
            }
            ScanAction::Status { id_or_root } => {
                let job = match vault.scans().status(&id_or_root).await {
                    Ok(job) => job,
                    Err(_) => vault.scans().latest_for_root(&id_or_root).await?,
                };
                print_scan_job(&job);
            }
            ScanAction::List => {
                let jobs = vault.scans().list().await?;
                if jobs.is_empty() {
                    println!("No scan jobs.");
                }
                for job in &jobs {
                    println!(
                        "{}  {:<10} {}  {}",
                        job.id,
                        job.status.as_str(),
                        format_ts_iso(job.created_at),
                        job.root_path
                    );
                }
            }
            ScanAction::Delete { id } => {
                vault.scans().delete(&id).await?;
                println!("Deleted scan job {}", id);
            }
            ScanAction::Clear => {
                let n = vault.scans().clear().await?;
                println!("Deleted {} finished scan job(s)", n);
            }
        },
        Commands::Unmatched { action } => match action {
            UnmatchedAction::List { status } => {
                let folders = vault.list_unmatched(status).await?;
                if folders.is_empty() {
                    println!("No unmatched folders.");
                }
                for folder in &folders {
                    println!(
                        "{:<9} {}  {}",
                        folder.status.as_str(),
                        format_ts_iso(folder.first_seen_at),
                        folder.path
                    );
                }
            }
            UnmatchedAction::Resolve {
                path,
                external_id,
                title,
                summary,
                url,
                year,
            } => {
                let record = ExternalRecord {
                    id: external_id,
                    title: title.clone(),
                    summary,
                    url,
                    release_year: year,
                };
                let game = vault
                    .registrar()
                    .resolve_unmatched(&path, &record, Some(&title))
                    .await?;
                println!("Registered {} as {}", game.full_disk_path, game.id);
            }
            UnmatchedAction::SetStatus { path, status } => {
                vault.set_unmatched_status(&path, status).await?;
                println!("{} is now {}", path, status);
            }
            UnmatchedAction::Delete { path } => {
                vault.delete_unmatched(&path).await?;
                println!("Forgot {}", path);
            }
            UnmatchedAction::Clear => {
                let n = vault.clear_unmatched().await?;
                println!("Forgot {} unmatched folder(s)", n);
            }
        },
        Commands::Groups { action } => match action {
            GroupsAction::List => {
                for group in vault.list_release_groups().await? {
                    let case = if group.case_sensitive { "exact" } else { "any case" };
                    println!("{:<16} {}", group.tag, case);
                }
            }
            GroupsAction::Add {
                tag,
                case_sensitive,
            } => {
                vault
                    .add_release_group(ReleaseGroupPattern::new(tag.clone(), case_sensitive))
                    .await?;
                println!("Added {} (applies on next start)", tag);
            }
            GroupsAction::Remove { tag } => {
                vault.remove_release_group(&tag).await?;
                println!("Removed {} (applies on next start)", tag);
            }
        },
        Commands::Games { action } => match action {
            GamesAction::List {
                title,
                path_prefix,
                sort,
                limit,
                offset,
            } => {
                let filter = GameFilter {
                    title_contains: title,
                    path_prefix,
                    sort,
                    limit,
                    offset,
                    ..Default::default()
                };
                let games = vault.list_games(&filter).await?;
                if games.is_empty() {
                    println!("No games.");
                }
                for game in &games {
                    println!(
                        "{}  {:<40} {:>10}  {}",
                        game.id,
                        game.canonical_title,
                        format_bytes(game.size_bytes),
                        game.full_disk_path
                    );
                }
            }
            GamesAction::Show { id } => {
                let game = vault.game(&id).await?;
                println!("{}", game.canonical_title);
                println!("  id:       {}", game.id);
                println!("  path:     {}", game.full_disk_path);
                println!("  size:     {}", format_bytes(game.size_bytes));
                if let Some(external_id) = &game.external_id {
                    println!("  external: {}", external_id);
                }
                if let Some(year) = game.release_year {
                    println!("  year:     {}", year);
                }
                if let Some(url) = &game.url {
                    println!("  url:      {}", url);
                }
                if let Some(summary) = &game.summary {
                    println!("  summary:  {}", summary);
                }
            }
            GamesAction::CheckPath { path } => {
                let availability = vault.registrar().path_availability(&path).await?;
                println!(
                    "{}: {}",
                    path,
                    if availability.exists_on_disk { "on disk" } else { "missing" }
                );
                match availability.registered_game_id {
                    Some(id) => println!("  registered as {}", id),
                    None => println!("  not registered"),
                }
            }
            GamesAction::Remove { id } => {
                let game = vault.registrar().remove_game(&id).await?;
                println!("Removed {} ({})", game.canonical_title, game.id);
            }
        },
        Commands::Download { action } => match action {
            DownloadAction::Request {
                requester_id,
                game_id,
            } => {
                let request = vault.downloads().request(&requester_id, &game_id).await?;
                println!("Download {} queued", request.id);
                let request = vault.downloads().wait(&request.id, POLL_INTERVAL).await?;
                print_download(&request);
                if let Some(cause) = &request.error_cause {
                    anyhow::bail!("download failed: {}", cause);
                }
            }
            DownloadAction::Status { id } => {
                print_download(&vault.downloads().status(&id).await?);
            }
            DownloadAction::List { requester } => {
                let requests = vault.downloads().list(requester.as_deref()).await?;
                if requests.is_empty() {
                    println!("No download requests.");
                }
                for r in &requests {
                    println!(
                        "{}  {:<10} {:<16} {}",
                        r.id,
                        r.status.as_str(),
                        r.requester_id,
                        r.game_id
                    );
                }
            }
            DownloadAction::Delete { id } => {
                vault.downloads().delete(&id).await?;
                println!("Deleted download request {}", id);
            }
        },
        Commands::Reconcile => {
            let report = vault.reconcile().await?;
            println!(
                "Failed {} orphaned scan job(s) and {} orphaned download(s)",
                report.scans.len(),
                report.downloads.len()
            );
        }
        Commands::Stats => {
            stats::run_stats(&vault).await?;
        }
    }

    vault.shutdown();
    Ok(())
}

fn print_scan_job(job: &ScanJob) {
    let s = &job.summary;
    println!("Scan {} {} ({})", job.id, job.status, job.root_path);
    println!(
        "  matched={} unmatched={} skipped={} errors={}",
        s.matched_count, s.unmatched_count, s.skipped_count, s.error_count
    );
    for dup in &job.duplicates {
        println!("  duplicate title '{}':", dup.title);
        for path in &dup.paths {
            println!("    {}", path);
        }
    }
    if let Some(message) = &job.error_message {
        println!("  error: {}", message);
    }
}

fn print_preview(report: &ScanReport) {
    println!("Matches ({}):", report.matches.len());
    for m in &report.matches {
        println!("  {:<40} {}", m.title, m.path);
    }
    println!("Unmatched ({}):", report.unmatched.len());
    for path in &report.unmatched {
        println!("  {}", path);
    }
    println!("Already catalogued: {}", report.known.len());
    for e in &report.errors {
        println!("  error: {}: {}", e.path, e.message);
    }
}

fn print_download(request: &DownloadRequest) {
    println!(
        "Download {} {} (requester {}, game {})",
        request.id, request.status, request.requester_id, request.game_id
    );
    if let (Some(path), Some(size)) = (&request.artifact_path, request.artifact_size) {
        println!("  artifact: {} ({})", path, format_bytes(size));
    }
    if let Some(sha) = &request.artifact_sha256 {
        println!("  sha256: {}", sha);
    }
    if let Some(cause) = &request.error_cause {
        println!("  error: {}", cause);
    }
}
