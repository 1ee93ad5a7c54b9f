//! CLI command definitions for folio-forge.
//!
//! Every command opens the configured database, builds the pipelines and
//! either drives them for a while (`serve`, `pregenerate`, `request --wait`)
//! or only inspects the generation table.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::metrics::{export_metrics, init_metrics};
use crate::orchestrator::Orchestrator;
use crate::pipeline::{AssetKind, AssetRequest, RequestOutcome, StatusCounts, StatusView};

/// How often `--wait` polls a record.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Asynchronous asset generation for e-books.
#[derive(Parser)]
#[command(name = "folio-forge")]
#[command(about = "Generate illustrations, portraits, recaps, quizzes and analyses for books")]
#[command(version)]
#[command(
    long_about = "folio-forge generates derived assets for imported books.\n\nEach asset kind runs its own durable pipeline backed by SQLite; work survives restarts.\n\nExample usage:\n  folio-forge import alice.json\n  folio-forge open 3\n  folio-forge pregenerate --book 1 --kinds illustration,recap"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite database URL.
    #[arg(long, global = true, env = "FOLIO_DATABASE_URL")]
    pub database_url: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Import a book from a JSON file.
    Import(ImportArgs),

    /// Open a chapter as a reader would and schedule its assets.
    Open(OpenArgs),

    /// Run every pipeline until interrupted.
    Serve,

    /// Request one asset.
    #[command(alias = "req")]
    Request(TargetArgs),

    /// Discard an asset's output and generate it again.
    Regenerate(TargetArgs),

    /// Show the status of one asset.
    Status(StatusArgs),

    /// Reset stale work and report what would be re-enqueued.
    Recover(RecoverArgs),

    /// Generate assets for a whole book and wait for them.
    #[command(alias = "pregen")]
    Pregenerate(PregenerateArgs),

    /// Print per-kind status counts.
    Stats(StatsArgs),

    /// List imported books.
    Books(JsonArgs),
}

#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// Path to the book JSON file.
    pub file: PathBuf,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct OpenArgs {
    /// Chapter id.
    pub chapter: i64,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct TargetArgs {
    /// Asset kind (illustration, portrait, chapter-analysis, recap, quiz).
    #[arg(short, long)]
    pub kind: AssetKind,

    /// Chapter id, or character id for portraits.
    #[arg(short, long)]
    pub target: i64,

    /// Run the kind's worker and wait until the asset is terminal.
    #[arg(short, long)]
    pub wait: bool,

    /// Give up waiting after this many seconds.
    #[arg(long, default_value = "600")]
    pub wait_timeout: u64,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[arg(short, long)]
    pub kind: AssetKind,

    #[arg(short, long)]
    pub target: i64,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct RecoverArgs {
    /// Limit the sweep to one book.
    #[arg(short, long)]
    pub book: Option<i64>,
}

#[derive(Parser, Debug)]
pub struct PregenerateArgs {
    /// Book id.
    #[arg(short, long)]
    pub book: i64,

    /// Comma-separated kinds. Defaults to every kind.
    #[arg(short, long, value_delimiter = ',')]
    pub kinds: Vec<AssetKind>,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Limit counts to one book.
    #[arg(short, long)]
    pub book: Option<i64>,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Print Prometheus metrics after the counts.
    #[arg(long)]
    pub metrics: bool,
}

#[derive(Parser, Debug)]
pub struct JsonArgs {
    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and execute the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to register metrics");
    }

    let mut config = PipelineConfig::from_env()?;
    if let Some(url) = cli.database_url {
        config = config.with_database_url(url);
    }
    let app = Orchestrator::new(config).await?;

    let result = match cli.command {
        Commands::Import(args) => run_import_command(&app, args).await,
        Commands::Open(args) => run_open_command(&app, args).await,
        Commands::Serve => run_serve_command(&app).await,
        Commands::Request(args) => run_request_command(&app, args, false).await,
        Commands::Regenerate(args) => run_request_command(&app, args, true).await,
        Commands::Status(args) => run_status_command(&app, args).await,
        Commands::Recover(args) => run_recover_command(&app, args).await,
        Commands::Pregenerate(args) => run_pregenerate_command(&app, args).await,
        Commands::Stats(args) => run_stats_command(&app, args).await,
        Commands::Books(args) => run_books_command(&app, args).await,
    };

    app.close().await;
    result
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn format_counts(counts: &StatusCounts) -> String {
    let mut line = format!(
        "pending={} generating={} completed={} failed={}",
        counts.pending, counts.generating, counts.completed, counts.failed
    );
    if counts.legacy > 0 {
        line.push_str(&format!(" legacy={}", counts.legacy));
    }
    line
}

fn print_status(request: AssetRequest, view: &StatusView) {
    println!("{} #{}: {}", request.kind(), request.target_id(), view.status);
    if let Some(output) = &view.output_ref {
        println!("  output: {}", output);
    }
    if let Some(error) = &view.error {
        println!("  error: {}", error);
    }
    if let Some(at) = view.generated_at {
        println!("  generated at: {}", at.to_rfc3339());
    }
}

// ============================================================================
// Catalog commands
// ============================================================================

async fn run_import_command(app: &Orchestrator, args: ImportArgs) -> anyhow::Result<()> {
    if !args.file.exists() {
        anyhow::bail!("Book file does not exist: {}", args.file.display());
    }
    let book = app.import_file(&args.file).await?;
    let chapters = app.catalog().chapters(book.id).await?;

    if args.json {
        #[derive(Serialize)]
        struct ImportOutput<'a> {
            book: &'a crate::catalog::Book,
            chapters: Vec<i64>,
        }
        return print_json(&ImportOutput {
            book: &book,
            chapters: chapters.iter().map(|c| c.id).collect(),
        });
    }

    println!("Imported book #{}: {}", book.id, book.title);
    for chapter in &chapters {
        println!("  chapter #{} ({}): {}", chapter.id, chapter.number, chapter.title);
    }
    Ok(())
}

async fn run_books_command(app: &Orchestrator, args: JsonArgs) -> anyhow::Result<()> {
    let books = app.catalog().list_books().await?;
    if args.json {
        return print_json(&books);
    }
    if books.is_empty() {
        println!("No books imported yet.");
    }
    for book in &books {
        match &book.author {
            Some(author) => println!("#{} {} ({})", book.id, book.title, author),
            None => println!("#{} {}", book.id, book.title),
        }
    }
    Ok(())
}

// ============================================================================
// Reader and request commands
// ============================================================================

async fn run_open_command(app: &Orchestrator, args: OpenArgs) -> anyhow::Result<()> {
    // Outbox ids land in this process's queues; they are picked up from the
    // table by the next `serve` or `recover`.
    let opened = app.library().open_chapter(args.chapter).await?;

    if args.json {
        return print_json(&opened);
    }

    println!(
        "Opened chapter #{} ({}) of book #{}",
        opened.chapter.id, opened.chapter.title, opened.chapter.book_id
    );
    for (request, outcome) in &opened.requests {
        println!("  {} #{}: {}", request.kind(), request.target_id(), outcome);
    }
    println!("{} scheduled", opened.scheduled());
    Ok(())
}

async fn run_request_command(
    app: &Orchestrator,
    args: TargetArgs,
    regenerate: bool,
) -> anyhow::Result<()> {
    let request = AssetRequest::new(args.kind, args.target);
    let pipeline = app.pipelines().get(args.kind)?;

    if args.wait {
        pipeline.start().await?;
    }

    let outcome = if regenerate {
        app.library().regenerate(request).await?
    } else {
        app.library().request(request).await?
    };
    println!("{} #{}: {}", request.kind(), request.target_id(), outcome);

    if !args.wait {
        return Ok(());
    }

    let deadline = Instant::now() + Duration::from_secs(args.wait_timeout);
    let result = wait_for_terminal(app, request, outcome, deadline).await;
    pipeline.shutdown().await?;

    match result? {
        Some(view) => print_status(request, &view),
        None => warn!(kind = %request.kind(), target_id = request.target_id(), "Gave up waiting"),
    }
    Ok(())
}

async fn wait_for_terminal(
    app: &Orchestrator,
    request: AssetRequest,
    outcome: RequestOutcome,
    deadline: Instant,
) -> anyhow::Result<Option<StatusView>> {
    if outcome == RequestOutcome::AlreadyInProgress {
        info!("Another worker owns this record; waiting for it to finish");
    }
    loop {
        if let Some(view) = app.library().status(request).await? {
            if view.status.is_terminal() {
                return Ok(Some(view));
            }
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

async fn run_status_command(app: &Orchestrator, args: StatusArgs) -> anyhow::Result<()> {
    let request = AssetRequest::new(args.kind, args.target);
    let view = app.library().status(request).await?;

    if args.json {
        return print_json(&view);
    }
    match view {
        Some(view) => print_status(request, &view),
        None => println!("{} #{}: never requested", request.kind(), request.target_id()),
    }
    Ok(())
}

// ============================================================================
// Pipeline commands
// ============================================================================

async fn run_serve_command(app: &Orchestrator) -> anyhow::Result<()> {
    let summaries = app.start().await?;
    for summary in &summaries {
        info!(
            kind = ?summary.kind,
            reset_stale = summary.reset_stale,
            pending = summary.pending,
            "Pipeline started"
        );
    }
    info!("Serving; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    app.shutdown().await?;
    Ok(())
}

async fn run_recover_command(app: &Orchestrator, args: RecoverArgs) -> anyhow::Result<()> {
    let summaries = app.pipelines().recover_all(args.book).await?;
    for summary in &summaries {
        let kind = summary.kind.map_or("all", |k| k.as_str());
        println!(
            "{}: reset_stale={} normalized_legacy={} pending={}",
            kind, summary.reset_stale, summary.normalized_legacy, summary.pending
        );
    }
    Ok(())
}

async fn run_pregenerate_command(app: &Orchestrator, args: PregenerateArgs) -> anyhow::Result<()> {
    let kinds = if args.kinds.is_empty() {
        AssetKind::ALL.to_vec()
    } else {
        args.kinds
    };

    app.start().await?;
    let result = app.pregenerator().run(args.book, &kinds).await;
    app.shutdown().await?;
    let report = result?;

    if args.json {
        return print_json(&report);
    }

    println!(
        "Book #{}: scheduled={} already_completed={} already_in_progress={}",
        report.book_id, report.scheduled, report.already_completed, report.already_in_progress
    );
    for (kind, counts) in &report.counts {
        println!("  {}: {}", kind, format_counts(counts));
    }
    if report.timed_out {
        println!("Timed out after {} ms; remaining work resumes on next start", report.elapsed_ms);
    } else {
        println!("Finished in {} ms ({} sweeps)", report.elapsed_ms, report.sweeps);
    }
    Ok(())
}

async fn run_stats_command(app: &Orchestrator, args: StatsArgs) -> anyhow::Result<()> {
    let counts: BTreeMap<AssetKind, StatusCounts> = app.pipelines().counts(args.book).await?;

    if args.json {
        print_json(&counts)?;
    } else {
        for (kind, c) in &counts {
            println!("{}: {}", kind, format_counts(c));
        }
    }

    if args.metrics {
        print!("{}", export_metrics());
    }
    Ok(())
}
