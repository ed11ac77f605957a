//! Command-line front-end (§6): `backup`, `restore`, `list`, `files`.
//!
//! Thin by design: argument parsing and summary printing only, all real
//! work happens in `coldvault::{backup,restore,catalog}`. Grounded on
//! `examples/tvlfyi-tvix/cli/src/args.rs`'s `clap::Parser` derive style
//! (see DESIGN.md for why).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;

use coldvault::{
    BackupEngine, ChunkCache, ChunkHasher, Config, LocalObjectStore, ObjectStore, PathFilter,
    RestoreEngine, SnapshotCatalog, Version,
};

#[derive(Parser)]
#[command(name = "coldvault", about = "Content-addressed point-in-time backup and restore")]
struct Cli {
    /// Path to a TOML configuration file (chunk size, threads, cache, append-only list).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new snapshot from a source directory.
    Backup {
        src: PathBuf,
        /// Object store directory.
        #[arg(long, default_value = "./coldvault-store")]
        store: PathBuf,
        /// Snapshot tag (suffix of the snapshot name).
        #[arg(long, default_value = "default")]
        tag: String,
        /// Opaque metadata, repeatable: --meta key=value
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
        #[arg(long, default_value = "")]
        include: String,
        #[arg(long, default_value = "")]
        exclude: String,
    },
    /// Restore a snapshot (by full name or tag) into a destination directory.
    Restore {
        name_or_tag: String,
        dst: PathBuf,
        #[arg(long, default_value = "./coldvault-store")]
        store: PathBuf,
        #[arg(long, default_value = "")]
        include: String,
        #[arg(long, default_value = "")]
        exclude: String,
    },
    /// List snapshots.
    List {
        #[arg(default_value = "")]
        prefix: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Also decode and print each snapshot's metadata.
        #[arg(long)]
        long: bool,
        #[arg(long, default_value = "./coldvault-store")]
        store: PathBuf,
    },
    /// List the files recorded in a snapshot (by full name or tag).
    Files {
        name_or_tag: String,
        #[arg(long, default_value = "./coldvault-store")]
        store: PathBuf,
        #[arg(long, default_value = "")]
        include: String,
        #[arg(long, default_value = "")]
        exclude: String,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Backup {
            src,
            store,
            tag,
            meta,
            include,
            exclude,
        } => run_backup(&config, &src, &store, &tag, &meta, &include, &exclude),
        Command::Restore {
            name_or_tag,
            dst,
            store,
            include,
            exclude,
        } => run_restore(&config, &name_or_tag, &dst, &store, &include, &exclude),
        Command::List {
            prefix,
            limit,
            offset,
            long,
            store,
        } => run_list(&store, &prefix, limit, offset, long),
        Command::Files {
            name_or_tag,
            store,
            include,
            exclude,
        } => run_files(&name_or_tag, &store, &include, &exclude),
    }
}

fn open_store(path: &PathBuf) -> Result<Arc<dyn ObjectStore>> {
    Ok(Arc::new(LocalObjectStore::new(path)?))
}

fn open_cache(config: &Config) -> Result<ChunkCache> {
    if config.cache_enabled {
        let url = config
            .cache_url
            .as_deref()
            .context("cache_enabled is set but cache_url is empty")?;
        Ok(ChunkCache::enabled(Arc::new(LocalObjectStore::new(url)?)))
    } else {
        Ok(ChunkCache::disabled())
    }
}

fn parse_meta(pairs: &[String]) -> Result<BTreeMap<String, JsonValue>> {
    let mut meta = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("--meta {:?} is not in key=value form", pair))?;
        meta.insert(key.to_string(), JsonValue::String(value.to_string()));
    }
    Ok(meta)
}

/// Resolves a CLI-supplied name into a concrete [`SnapshotName`]: used
/// verbatim if it already names an index, otherwise treated as a tag and
/// resolved to the latest matching snapshot (§4.9).
fn resolve_snapshot_name(store: &Arc<dyn ObjectStore>, name_or_tag: &str) -> Result<String> {
    let exact_matches = store.list_indexes(1, 0, name_or_tag)?;
    if exact_matches.first().map(String::as_str) == Some(name_or_tag) {
        return Ok(name_or_tag.to_string());
    }
    SnapshotCatalog::new(Arc::clone(store)).get_latest(name_or_tag)
}

fn run_backup(
    config: &Config,
    src: &PathBuf,
    store_path: &PathBuf,
    tag: &str,
    meta: &[String],
    include: &str,
    exclude: &str,
) -> Result<()> {
    if !src.is_dir() {
        bail!("source {} is not a directory", src.display());
    }

    let store = open_store(store_path)?;
    let cache = open_cache(config)?;
    let filter = PathFilter::new(include, exclude)?;
    let metadata = parse_meta(meta)?;

    let engine = BackupEngine::from_config(store, cache, ChunkHasher::new(Version::V3), config);
    let report = engine.run(src, tag, metadata, &filter, &config.append_only_files)?;

    println!("{}", report.name);
    log::info!(
        "{} empty, {} already in store, {} uploaded, {} reused from prior snapshot",
        report.counters.empty,
        report.counters.already_backed_up,
        report.counters.uploaded,
        report.counters.skipped
    );
    Ok(())
}

fn run_restore(
    config: &Config,
    name_or_tag: &str,
    dst: &PathBuf,
    store_path: &PathBuf,
    include: &str,
    exclude: &str,
) -> Result<()> {
    let store = open_store(store_path)?;
    let cache = open_cache(config)?;
    let filter = PathFilter::new(include, exclude)?;
    let name = resolve_snapshot_name(&store, name_or_tag)?;

    let engine = RestoreEngine::from_config(store, cache, Version::V3, config);
    let report = engine.run(dst, &name, &filter, &config.append_only_files)?;

    println!("restored {} into {}", name, dst.display());
    log::info!(
        "{} empty, {} correct, {} skipped, {} hole-punched, {} fetched",
        report.counters.empty,
        report.counters.correct,
        report.counters.skipped,
        report.counters.punched,
        report.counters.fetched
    );
    Ok(())
}

fn run_list(store_path: &PathBuf, prefix: &str, limit: usize, offset: usize, long: bool) -> Result<()> {
    let store = open_store(store_path)?;
    let catalog = SnapshotCatalog::new(store);
    for entry in catalog.list(limit, offset, prefix, long)? {
        match entry.metadata {
            Some(meta) if !meta.is_empty() => println!("{}\t{:?}", entry.name, meta),
            _ => println!("{}", entry.name),
        }
    }
    Ok(())
}

fn run_files(name_or_tag: &str, store_path: &PathBuf, include: &str, exclude: &str) -> Result<()> {
    let store = open_store(store_path)?;
    let name = resolve_snapshot_name(&store, name_or_tag)?;
    let filter = PathFilter::new(include, exclude)?;

    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut store.open_index(&name)?, &mut bytes)?;
    let index = coldvault::index::decode(&bytes)?;

    for file in index.filtered_files(&filter) {
        println!(
            "{}\t{}\t{}",
            file.filename,
            file.estimated_size(),
            file.date.to_rfc3339()
        );
    }
    Ok(())
}
