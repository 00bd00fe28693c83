//! Wiki Revisions command line
//!
//! Runs a JSON-lines revision dump through the delta pipeline into an
//! in-memory store, then optionally verifies and queries the stored history.

use anyhow::{bail, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use wiki_revisions::core::config::TextCharset;
use wiki_revisions::{
    ArticleId, ChronoIterator, Config, MemDeltaStore, Pipeline, PipelineReport, ReconstructionEngine, Revision,
    RevisionCounter, RevisionIndex,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let matches = Command::new("wiki-revisions")
        .version(wiki_revisions::VERSION)
        .about("Delta-compressed revision history storage for wiki page corpora.")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .required(true)
                .help("JSON-lines file with one revision per line, grouped by article in counter order"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("checkpoint-interval")
                .long("checkpoint-interval")
                .value_name("N")
                .help("Revisions per full-revision checkpoint"),
        )
        .arg(
            Arg::new("diff-workers")
                .long("diff-workers")
                .value_name("N")
                .help("Number of diff worker threads (0 = CPU count)"),
        )
        .arg(
            Arg::new("writers")
                .long("writers")
                .value_name("N")
                .help("Number of writer threads"),
        )
        .arg(
            Arg::new("charset")
                .long("charset")
                .value_name("CHARSET")
                .help("Text charset on the wire (utf8, latin1)"),
        )
        .arg(
            Arg::new("no-compression")
                .long("no-compression")
                .action(ArgAction::SetTrue)
                .help("Store raw encoded diffs only"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level or filter directives, e.g. info or wiki_revisions=debug"),
        )
        .arg(
            Arg::new("verify")
                .long("verify")
                .action(ArgAction::SetTrue)
                .help("Reconstruct every stored revision and compare it with the input"),
        )
        .arg(
            Arg::new("article")
                .long("article")
                .value_name("ID")
                .requires("revision")
                .help("Article of the revision to print"),
        )
        .arg(
            Arg::new("revision")
                .long("revision")
                .value_name("COUNTER")
                .requires("article")
                .help("Revision counter to print"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Print Prometheus metrics after the run"),
        )
        .get_matches();

    // Load configuration
    let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
        Config::from_file(config_path)?
    } else {
        Config::load()?
    };

    // Apply CLI overrides
    apply_cli_overrides(&mut config, &matches)?;
    config.validate()?;

    wiki_revisions::init(&config)?;
    info!("Starting {} v{}", wiki_revisions::NAME, wiki_revisions::VERSION);

    let input = matches
        .get_one::<String>("input")
        .context("--input is required")?;
    let revisions = read_revisions(input)?;
    info!(revisions = revisions.len(), input = %input, "revisions loaded");

    let expected = matches.get_flag("verify").then(|| revisions.clone());

    let store = Arc::new(MemDeltaStore::new());
    let index = Arc::new(RevisionIndex::new());
    let pipeline = Pipeline::new(config.clone(), store.clone(), index.clone())?;
    let control = pipeline.control();

    let mut run = tokio::task::spawn_blocking(move || pipeline.run(revisions));
    let report = tokio::select! {
        result = &mut run => result??,
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, killing pipeline...");
            control.kill();
            run.await??
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    let stats = store.stats();
    info!(
        articles = stats.articles,
        records = stats.records,
        payload_bytes = stats.payload_bytes,
        "store populated"
    );

    if let Some(expected) = expected {
        let (config, store, index) = (config.clone(), store.clone(), index.clone());
        let verified =
            tokio::task::spawn_blocking(move || verify(&config, store, index, &expected, &report)).await??;
        info!(revisions = verified, "verification passed");
    }

    if let (Some(article), Some(counter)) = (
        matches.get_one::<String>("article"),
        matches.get_one::<String>("revision"),
    ) {
        let article: ArticleId = article.parse().context("invalid article id")?;
        let counter: RevisionCounter = counter.parse().context("invalid revision counter")?;
        let mut engine = ReconstructionEngine::new(store.clone(), index.clone(), &config);
        let revision = engine.revision(article, counter)?;
        println!("{}", revision.text().unwrap_or_default());
    }

    if matches.get_flag("metrics") {
        print!("{}", wiki_revisions::system::metrics::gather());
    }

    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &ArgMatches) -> anyhow::Result<()> {
    if let Some(interval) = matches.get_one::<String>("checkpoint-interval") {
        config.diff.checkpoint_interval = interval.parse().context("invalid checkpoint interval")?;
    }

    if let Some(workers) = matches.get_one::<String>("diff-workers") {
        config.pipeline.diff_workers = workers.parse().context("invalid diff worker count")?;
    }

    if let Some(writers) = matches.get_one::<String>("writers") {
        config.pipeline.writer_workers = writers.parse().context("invalid writer count")?;
    }

    if let Some(charset) = matches.get_one::<String>("charset") {
        config.codec.charset = match charset.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => TextCharset::Utf8,
            "latin1" | "iso-8859-1" => TextCharset::Latin1,
            other => bail!("Invalid charset: {}. Valid options: utf8, latin1", other),
        };
    }

    if matches.get_flag("no-compression") {
        config.codec.compression = false;
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    Ok(())
}

/// Read one JSON revision per non-empty line
fn read_revisions(path: &str) -> anyhow::Result<Vec<Revision>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path))?;
    let mut revisions = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("{}:{}: read failed", path, number + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let revision: Revision =
            serde_json::from_str(&line).with_context(|| format!("{}:{}: invalid revision", path, number + 1))?;
        revisions.push(revision);
    }
    Ok(revisions)
}

/// Rebuild every published revision and compare it with the input text
fn verify(
    config: &Config,
    store: Arc<MemDeltaStore>,
    index: Arc<RevisionIndex>,
    expected: &[Revision],
    report: &PipelineReport,
) -> anyhow::Result<usize> {
    let mut by_article: HashMap<ArticleId, Vec<&Revision>> = HashMap::new();
    for revision in expected {
        by_article.entry(revision.article_id).or_default().push(revision);
    }

    let mut engine = ReconstructionEngine::new(store, index.clone(), config);
    let mut verified = 0;
    for article_id in index.article_ids() {
        let Some(originals) = by_article.get(&article_id) else {
            bail!("article {} was published but is not in the input", article_id);
        };
        for rebuilt in ChronoIterator::new(&mut engine, article_id)? {
            let rebuilt = rebuilt?;
            let position = rebuilt.revision_counter as usize - 1;
            let original = originals
                .get(position)
                .with_context(|| format!("article {} has no input revision {}", article_id, position + 1))?;
            if rebuilt.text != original.text {
                bail!("article {} revision {} does not match its input", article_id, rebuilt.revision_counter);
            }
            verified += 1;
        }
        engine.clear_cache(Some(article_id));
    }

    for article_id in by_article.keys() {
        if index.article(*article_id).is_none() && !report.is_banned(*article_id) {
            warn!(article_id, "article neither published nor banned");
        }
    }
    Ok(verified)
}

/// Wait for Ctrl+C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
