//! Command-line interface for waymark.
//!
//! Provides commands for reconciling a saved page against its stored
//! spans, dry-run verification, inspecting the flattened text, and
//! showing the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::{FileSpanStore, HttpSpanStore, SpanStore};
use crate::config::{self, ResolvedConfig, StoreKind};
use crate::core::{PassReport, Reconciler, SpanStatus, ViewCommand, ViewEvent, ViewSession};
use crate::document::{parse_markup, Document, ExtractionRules, TextExtractor};
use crate::domain::{DocumentKey, ViewMode};
use crate::page::{profile_for_host, PageMetadata, SourceProfile};

/// waymark - Offset verification and healing for annotation spans
#[derive(Parser, Debug)]
#[command(name = "waymark")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Where a page came from and which document it is
#[derive(clap::Args, Debug, Clone)]
pub struct PageArgs {
    /// Saved page (HTML/XHTML)
    pub file: PathBuf,

    /// URL the page was saved from (selects the source profile)
    #[arg(long)]
    pub url: Option<String>,

    /// Source code override (e.g. bw)
    #[arg(long)]
    pub source: Option<String>,

    /// Page id override
    #[arg(long)]
    pub page: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify, heal, persist and render the spans of a page
    Reconcile {
        #[command(flatten)]
        page: PageArgs,

        /// Which spans to render
        #[arg(short, long, value_enum, default_value = "all")]
        mode: ModeArg,

        /// Write the marked-up page here (stdout if not provided)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compute updates without sending them to the store
        #[arg(long)]
        dry_run: bool,
    },

    /// Print a per-span verdict table without persisting anything
    Verify {
        #[command(flatten)]
        page: PageArgs,

        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the flattened text of a page and its digest
    Extract {
        /// Saved page (HTML/XHTML)
        file: PathBuf,

        /// URL the page was saved from (selects the content boundary)
        #[arg(long)]
        url: Option<String>,

        /// Print the leaf table instead of the text
        #[arg(long)]
        leaves: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// View mode for CLI (maps to ViewMode)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Personal highlights
    Taxonomy,
    /// Custom categories
    Create,
    /// Canonical answers
    Qa,
    /// Relation subjects and objects
    Relations,
    /// Every healthy span
    All,
}

impl From<ModeArg> for ViewMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Taxonomy => ViewMode::Taxonomy,
            ModeArg::Create => ViewMode::Create,
            ModeArg::Qa => ViewMode::Qa,
            ModeArg::Relations => ViewMode::Relations,
            ModeArg::All => ViewMode::All,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Reconcile {
                page,
                mode,
                output,
                dry_run,
            } => reconcile(&page, mode.into(), output.as_deref(), dry_run).await,
            Commands::Verify { page, json } => verify(&page, json).await,
            Commands::Extract { file, url, leaves } => extract(&file, url.as_deref(), leaves),
            Commands::Config => show_config(),
        }
    }
}

/// A parsed page with its profile and key
struct LoadedPage {
    document: Document,
    profile: Option<SourceProfile>,
    key: DocumentKey,
    url: Option<String>,
}

impl LoadedPage {
    fn rules(&self) -> ExtractionRules {
        self.profile
            .as_ref()
            .map(|p| p.extraction_rules())
            .unwrap_or_default()
    }
}

fn read_document(file: &Path) -> Result<(String, Document)> {
    let markup = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read page: {}", file.display()))?;
    let document = parse_markup(&markup)
        .with_context(|| format!("Failed to parse page: {}", file.display()))?;
    Ok((markup, document))
}

fn load_page(args: &PageArgs, cfg: &ResolvedConfig) -> Result<LoadedPage> {
    let (markup, document) = read_document(&args.file)?;
    let url = args.url.clone().unwrap_or_default();

    let mut meta = PageMetadata::scrape(&url, &cfg.profiles, &document, &markup);
    if let Some(ref source) = args.source {
        meta.source_code = source.clone();
    }
    if let Some(page) = args.page {
        meta.page_id = page;
    }

    let profile = cfg
        .profiles
        .iter()
        .find(|p| p.code == meta.source_code)
        .cloned();
    let key = meta.key();

    // With a url, the page guard hibernates on a missing key instead
    if args.url.is_none() && !key.is_complete() {
        anyhow::bail!(
            "No document key for {} (pass --source and --page)",
            args.file.display()
        );
    }

    Ok(LoadedPage {
        document,
        profile,
        key,
        url: args.url.clone(),
    })
}

fn build_store(cfg: &ResolvedConfig) -> Result<Arc<dyn SpanStore>> {
    Ok(match cfg.store.kind {
        StoreKind::Http => {
            let url = cfg
                .store
                .url
                .clone()
                .context("store.url (or WAYMARK_STORE_URL) required for the http store")?;
            Arc::new(HttpSpanStore::new(url, cfg.store.token.clone()))
        }
        StoreKind::File => Arc::new(FileSpanStore::new(cfg.store.path.clone())),
    })
}

/// Reconciler for the page, parked when the page guard refuses it
fn build_reconciler(
    page: &LoadedPage,
    cfg: &ResolvedConfig,
) -> Result<Reconciler<Arc<dyn SpanStore>>> {
    let healing = match page.profile {
        Some(ref profile) => profile.healing_settings(&cfg.healing),
        None => cfg.healing.clone(),
    };
    let mut reconciler = Reconciler::new(
        build_store(cfg)?,
        page.key.clone(),
        page.rules(),
        healing,
    );
    if let Some(ref url) = page.url {
        if let Err(reason) = reconciler.guard(url, page.profile.as_ref(), &page.document) {
            eprintln!("Page is not annotatable ({:?}), leaving it unmarked", reason);
        }
    }
    Ok(reconciler)
}

async fn reconcile(
    args: &PageArgs,
    mode: ViewMode,
    output: Option<&Path>,
    dry_run: bool,
) -> Result<()> {
    let cfg = config::config()?;
    let page = load_page(args, cfg)?;

    let mut reconciler = build_reconciler(&page, cfg)?.with_mode(mode);
    if dry_run {
        reconciler = reconciler.dry_run();
    }

    let (session, mut channels) = ViewSession::new(reconciler, page.document, cfg.reveal);
    channels
        .commands
        .send(ViewCommand::Reload)
        .await
        .context("View session closed")?;
    channels
        .commands
        .send(ViewCommand::Shutdown)
        .await
        .context("View session closed")?;
    let document = session.run().await;

    while let Ok(event) = channels.events.try_recv() {
        match event {
            ViewEvent::PassCompleted(report) => print_summary(&report),
            ViewEvent::Rendered(report) => {
                eprintln!(
                    "Rendered {} span(s) in {} fragment(s), {} skipped",
                    report.rendered.len(),
                    report.fragments,
                    report.failed.len()
                );
            }
            _ => {}
        }
    }

    let markup = document.to_markup();
    match output {
        Some(path) => std::fs::write(path, markup)
            .with_context(|| format!("Failed to write output: {}", path.display()))?,
        None => println!("{}", markup),
    }

    Ok(())
}

async fn verify(args: &PageArgs, json: bool) -> Result<()> {
    let cfg = config::config()?;
    let page = load_page(args, cfg)?;

    let mut reconciler = build_reconciler(&page, cfg)?.dry_run();
    if reconciler.is_hibernating() {
        return Ok(());
    }
    reconciler.load().await.context("Failed to load spans")?;
    let report = reconciler.reconcile(&page.document).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
        return Ok(());
    }

    println!("{:<12} {:<14} DETAIL", "SPAN", "STATUS");
    println!("{}", "-".repeat(60));
    for outcome in &report.outcomes {
        let (status, detail) = match &outcome.status {
            SpanStatus::Healthy { matched } => ("healthy", format!("{:?}", matched)),
            SpanStatus::Healed { from, to } => (
                "healed",
                format!("{}..{} -> {}..{}", from.0, from.1, to.0, to.1),
            ),
            SpanStatus::Unrecoverable { cause } => ("unrecoverable", format!("{:?}", cause)),
            SpanStatus::Skipped => ("skipped", "already broken".to_string()),
        };
        println!("{:<12} {:<14} {}", outcome.id.to_string(), status, detail);
    }
    println!();
    print_summary(&report);

    Ok(())
}

fn print_summary(report: &PassReport) {
    eprintln!(
        "Pass {} on {}: {} healthy, {} healed, {} unrecoverable, {} skipped",
        report.pass_id,
        report.key,
        report.healthy(),
        report.healed(),
        report.unrecoverable(),
        report.skipped()
    );
    if let Some(ref e) = report.persist_error {
        eprintln!("Warning: updates not persisted: {}", e);
    }
}

fn extract(file: &Path, url: Option<&str>, leaves: bool) -> Result<()> {
    let cfg = config::config()?;
    let (_, document) = read_document(file)?;

    let rules = url
        .and_then(|u| reqwest::Url::parse(u).ok())
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .and_then(|host| profile_for_host(&cfg.profiles, &host).map(|p| p.extraction_rules()))
        .unwrap_or_default();
    let extraction = TextExtractor::new(rules).extract(&document);

    if leaves {
        println!("{:<8} {:<10} {:<8} TEXT", "LEAF", "START", "LEN");
        for (i, leaf) in extraction.leaves.leaves().iter().enumerate() {
            let text = extraction
                .flat
                .slice(leaf.start..leaf.end())
                .unwrap_or_default();
            println!("{:<8} {:<10} {:<8} {:?}", i, leaf.start, leaf.len, text);
        }
    } else {
        println!("{}", extraction.flat.as_str());
    }

    eprintln!(
        "{} characters in {} leaves, digest {}",
        extraction.flat.char_len(),
        extraction.leaves.len(),
        extraction.flat.digest()
    );
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("waymark configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Home:        {}", cfg.home.display());
    println!();
    println!("Store:");
    println!("  Kind:  {:?}", cfg.store.kind);
    println!("  URL:   {}", cfg.store.url.as_deref().unwrap_or("(none)"));
    println!(
        "  Token: {}",
        if cfg.store.token.is_some() { "(set)" } else { "(none)" }
    );
    println!("  Path:  {}", cfg.store.path.display());
    println!();
    println!("Healing:");
    println!("  Anchor length:    {}", cfg.healing.anchor_len);
    println!("  Search radius:    {}", cfg.healing.search_radius);
    println!("  Length tolerance: {}", cfg.healing.length_tolerance);
    println!("  Min length slack: {}", cfg.healing.min_length_slack);
    println!("  Persist text:     {}", cfg.healing.persist_repaired_text);
    println!();
    println!("Reveal:");
    println!("  Max attempts:   {}", cfg.reveal.max_attempts);
    println!("  Retry interval: {}ms", cfg.reveal.retry_interval_ms);
    println!();
    println!("Profiles:");
    for profile in &cfg.profiles {
        println!(
            "  {}: hosts [{}], content root {:?}, mediawiki {}, tolerance {}",
            profile.code,
            profile.hosts.join(", "),
            profile.content_root,
            profile.mediawiki,
            profile
                .length_tolerance
                .map(|t| t.to_string())
                .unwrap_or_else(|| "default".to_string())
        );
    }

    Ok(())
}
