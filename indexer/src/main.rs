use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use habrsearch_core::persist::{dump_files, dump_range};
use habrsearch_core::{ArticleId, Repository, RepositoryOptions, SearchRequest};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Load article dumps into the search store and query it", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load dump files (one JSON article per file) into the store
    Load {
        /// Directory holding `<id>.json` dump files
        #[arg(long)]
        input: PathBuf,
        /// Storage directory
        #[arg(long)]
        db: PathBuf,
        /// Ranking config file
        #[arg(long, default_value = "./repo.cfg")]
        config: PathBuf,
        /// First article id to load (inclusive); needs --finish-id
        #[arg(long, requires = "finish_id")]
        start_id: Option<ArticleId>,
        /// Last article id to load (exclusive)
        #[arg(long, requires = "start_id")]
        finish_id: Option<ArticleId>,
        /// Wipe the storage directory before loading
        #[arg(long, default_value_t = false)]
        fresh: bool,
    },
    /// Run a search against the store and print the hits as JSON
    Query {
        /// Storage directory
        #[arg(long)]
        db: PathBuf,
        /// Ranking config file
        #[arg(long, default_value = "./repo.cfg")]
        config: PathBuf,
        /// Search comments instead of posts
        #[arg(long, default_value_t = false)]
        comments: bool,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        text: String,
    },
}

#[derive(Serialize)]
struct QueryOutput<T> {
    query: String,
    total: usize,
    took_s: f64,
    items: Vec<T>,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Load { input, db, config, start_id, finish_id, fresh } => {
            load(&input, &db, config, start_id.zip(finish_id), fresh)
        }
        Commands::Query { db, config, comments, limit, text } => query(db, config, comments, limit, text),
    }
}

fn load(input: &Path, db: &Path, config: PathBuf, range: Option<(ArticleId, ArticleId)>, fresh: bool) -> Result<()> {
    if fresh && db.exists() {
        tracing::info!(db = %db.display(), "wiping storage");
        fs::remove_dir_all(db).with_context(|| format!("removing {}", db.display()))?;
    }

    let files = match range {
        Some((start, finish)) => dump_range(input, start, finish),
        None => dump_files(input)?,
    };
    tracing::info!(files = files.len(), input = %input.display(), "loading dumps");

    let repo = Repository::new(RepositoryOptions::new(db, config));
    repo.init()?;
    let stats = repo.restore(files)?;
    repo.shutdown();

    tracing::info!(loaded = stats.loaded, failed = stats.failed, "load complete");
    Ok(())
}

fn query(db: PathBuf, config: PathBuf, comments: bool, limit: usize, text: String) -> Result<()> {
    let repo = Repository::new(RepositoryOptions::new(db, config));
    repo.init()?;
    let req = SearchRequest::new(text.clone()).page(None, Some(limit));

    let out = if comments {
        let res = repo.search_comments(&req)?;
        serde_json::to_string_pretty(&QueryOutput { query: text, total: res.total, took_s: res.elapsed.as_secs_f64(), items: res.items })?
    } else {
        let res = repo.search_articles(&req)?;
        serde_json::to_string_pretty(&QueryOutput { query: text, total: res.total, took_s: res.elapsed.as_secs_f64(), items: res.items })?
    };
    repo.shutdown();
    println!("{out}");
    Ok(())
}
