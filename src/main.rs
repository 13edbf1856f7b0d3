//! # Docket CLI (`docket`)
//!
//! The `docket` binary indexes folders of legal documents and searches them.
//!
//! ## Usage
//!
//! ```bash
//! docket --config ./config/docket.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docket index <folder>` | Index new and changed files under a folder |
//! | `docket remove <folder>` | Drop a folder and all its documents from the index |
//! | `docket search "<query>"` | Hybrid search over indexed documents |
//! | `docket stats` | Document, chunk, and embedding counts |
//! | `docket folders` | Indexed folders with document counts |
//!
//! Logs go to stderr (`RUST_LOG` or `--verbose`); command output goes to stdout.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docket::config;
use docket::indexer::{CancelToken, IndexOptions, IndexReport};
use docket::library::{Library, SearchResponse};
use docket::progress::ProgressMode;
use docket::stats;
use docket_core::models::{DocType, Jurisdiction, QueryFilters};
use tracing_subscriber::EnvFilter;

/// Docket: a local, offline search engine for legal documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "docket",
    about = "Docket: local, offline search for contracts, NDAs, policies, and licenses",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docket.toml")]
    config: PathBuf,

    /// Log pipeline progress at info level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Index a folder.
    ///
    /// Walks the folder, skips files whose content hash is unchanged, and
    /// parses, chunks, and embeds the rest. Files that disappeared since the
    /// last run are removed. Ctrl-C stops after the current file.
    Index {
        folder: PathBuf,

        /// Reprocess every file, ignoring the hash ledger.
        #[arg(long)]
        full: bool,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Remove a folder and every document indexed from it.
    Remove { folder: PathBuf },

    /// Search indexed documents.
    ///
    /// Jurisdictions, document types, dates, and parties named in the query
    /// become filters; `"quoted phrases"` and `+term` are required, `-term`
    /// excludes.
    Search {
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict to a document type (contract, nda, policy, license, other).
        #[arg(long)]
        doctype: Vec<DocType>,

        /// Restrict to a jurisdiction (US, CA, NY, TX, FL, IL, DE).
        #[arg(long)]
        jurisdiction: Vec<Jurisdiction>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// List indexed folders.
    Folders {
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let library = Library::open(&cfg)?;

    match cli.command {
        Commands::Index {
            folder,
            full,
            progress,
        } => {
            let cancel = CancelToken::new();
            let options = IndexOptions {
                force_full: full,
                cancel: cancel.clone(),
                progress: progress
                    .unwrap_or_else(ProgressMode::default_for_tty)
                    .reporter()
                    .into(),
            };
            let indexing = library.index_folder_in_background(folder.clone(), options);
            tokio::pin!(indexing);
            let report = tokio::select! {
                result = &mut indexing => result?,
                Ok(()) = tokio::signal::ctrl_c() => {
                    eprintln!("cancelling after the current file...");
                    cancel.cancel();
                    indexing.await?
                }
            };
            print_index_report(&folder, &report);
        }
        Commands::Remove { folder } => {
            let report = library.remove_folder(&folder)?;
            println!("remove {}", report.folder);
            println!("  documents removed: {}", report.documents_removed);
            println!("  chunks removed: {}", report.chunks_removed);
            println!("ok");
        }
        Commands::Search {
            query,
            limit,
            doctype,
            jurisdiction,
            json,
        } => {
            let filters = QueryFilters {
                doctypes: doctype,
                jurisdictions: jurisdiction,
                ..QueryFilters::default()
            };
            let filters = (!filters.is_empty()).then_some(filters);
            let response = library.search(&query, filters, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_search_response(&response);
            }
        }
        Commands::Stats { json } => {
            let stats = library.get_stats();
            let folders = library.list_folders();
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "stats": stats,
                        "folders": folders,
                    }))?
                );
            } else {
                stats::print_stats(&stats, &folders);
            }
        }
        Commands::Folders { json } => {
            let folders = library.list_folders();
            if json {
                println!("{}", serde_json::to_string_pretty(&folders)?);
            } else {
                stats::print_folders(&folders);
            }
        }
    }

    Ok(())
}

fn print_index_report(folder: &std::path::Path, report: &IndexReport) {
    println!("index {}", folder.display());
    println!("  documents processed: {}", report.documents_processed);
    println!("  unchanged: {}", report.documents_unchanged);
    println!("  removed: {}", report.documents_removed);
    println!("  chunks added: {}", report.chunks_added);
    println!("  chunks removed: {}", report.chunks_removed);
    if report.embedding_failures > 0 {
        println!("  embedding failures: {}", report.embedding_failures);
    }
    println!("  skipped: {}", report.skipped.len());
    for skipped in &report.skipped {
        println!("    {}: {}", skipped.path, skipped.reason);
    }
    if report.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
}

fn print_search_response(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results.");
        return;
    }

    println!(
        "intent: {:?}{}  confidence: {:.2}  ({} ms)",
        response.query.intent,
        if response.lookup { " (lookup)" } else { "" },
        response.confidence,
        response.elapsed_ms
    );
    println!();
    for (i, result) in response.results.iter().enumerate() {
        let pages = if result.chunk.page_start == result.chunk.page_end {
            format!("p. {}", result.chunk.page_start)
        } else {
            format!("pp. {}-{}", result.chunk.page_start, result.chunk.page_end)
        };
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.final_score,
            result.document.title,
            result.chunk.section_path.join(" > ")
        );
        println!("    file: {} ({})", result.document.file_path, pages);
        println!(
            "    doctype: {}  jurisdiction: {}  status: {:?}",
            result.document.doctype, result.document.jurisdiction, result.document.status
        );
        let excerpt = result
            .match_highlights
            .first()
            .cloned()
            .unwrap_or_else(|| result.chunk.text.chars().take(200).collect());
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", result.chunk.chunk_id);
        println!();
    }
}
