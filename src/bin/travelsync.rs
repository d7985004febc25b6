//! CLI binary for travelsync.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` / `MailConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use travelsync::{
    CalendarConfig, CalendarService, CycleReport, ExtractionConfig, Extractor, GoogleCalendarClient,
    ImapTransport, IngestLoop, IngestObserver, MailConfig, MailTransport, ModelPolicy,
    ProcessedDocument,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn spinner(prefix: &'static str, message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_prefix(prefix);
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

// ── Mail progress observer using indicatif ───────────────────────────────────

/// Prints one line per attachment above a spinner while a cycle runs.
struct CliObserver {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: spinner("Mailbox", "Connecting…"),
            errors: AtomicUsize::new(0),
        })
    }
}

impl IngestObserver for CliObserver {
    fn on_cycle_start(&self, unseen: usize) {
        self.bar.set_message(format!("{unseen} unread message(s)"));
    }

    fn on_message_start(&self, uid: u32, subject: &str, attachments: usize) {
        self.bar.println(format!(
            "{} {} {}",
            cyan("◆"),
            bold(subject),
            dim(&format!("(uid {uid}, {attachments} attachment(s))"))
        ));
        self.bar.set_message(format!("message {uid}"));
    }

    fn on_attachment_complete(&self, _uid: u32, filename: &str, title: &str) {
        self.bar
            .println(format!("  {} {:<32}  {}", green("✓"), filename, dim(title)));
    }

    fn on_attachment_error(&self, _uid: u32, filename: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<32}  {}", red("✗"), filename, red(&msg)));
    }

    fn on_message_complete(&self, _uid: u32, folder: &str, moved: bool) {
        if moved {
            self.bar.println(format!("  {} {}", dim("→"), folder));
        } else {
            self.bar
                .println(format!("  {} could not move to {}", red("✗"), folder));
        }
    }

    fn on_cycle_complete(&self, _handled: usize, _failed: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one document and print the record
  travelsync extract boarding-pass.png

  # Several documents, JSON output, create calendar events
  travelsync extract ticket.pdf https://example.com/hotel.pdf --json --calendar

  # One mailbox polling cycle
  travelsync check-mail

  # Poll every 5 minutes until Ctrl-C
  travelsync watch

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY                 Provider key (or OPENAI_API_KEY, ANTHROPIC_API_KEY, ...)
  EDGEQUAKE_PROVIDER             Provider name (default: gemini)
  TRAVELSYNC_MODELS              Comma-separated model candidates, in preference order
  EMAIL_IMAP_SERVER              IMAP host (default: imap.gmail.com)
  EMAIL_IMAP_PORT                IMAP port (default: 993)
  EMAIL_ADDRESS / EMAIL_PASSWORD Mailbox credentials
  EMAIL_PROCESSED_FOLDER         Folder for fully processed messages (default: Processed)
  EMAIL_FAILED_FOLDER            Folder for messages with failures (default: Failed)
  EMAIL_CHECK_INTERVAL           Seconds between cycles (default: 300)
  GOOGLE_CALENDAR_ID             Target calendar (default: primary)
  GOOGLE_CALENDAR_ACCESS_TOKEN   OAuth access token; calendar step is skipped without it
  PDFIUM_LIB_PATH                Path to libpdfium

A .env file in the working directory is loaded first.
"#;

/// Extract calendar-ready travel events from tickets and booking documents.
#[derive(Parser, Debug)]
#[command(
    name = "travelsync",
    version,
    about = "Extract calendar-ready travel events from tickets and booking documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    model: ModelArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "TRAVELSYNC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "TRAVELSYNC_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a travel record from local files or URLs.
    Extract {
        /// Image or PDF paths / HTTP(S) URLs.
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Create a calendar event for each record.
        #[arg(long)]
        calendar: bool,

        /// Print records as JSON.
        #[arg(long)]
        json: bool,

        /// Documents processed at the same time.
        #[arg(short, long, default_value_t = 2)]
        concurrency: usize,
    },
    /// Run one mailbox polling cycle and print a report.
    CheckMail {
        #[command(flatten)]
        mail: MailArgs,

        /// Print the cycle report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Poll the mailbox until interrupted.
    Watch {
        #[command(flatten)]
        mail: MailArgs,
    },
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// LLM provider: gemini, openai, anthropic, ollama, ...
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER", default_value = "gemini")]
    provider: String,

    /// Comma-separated model candidates, tried in order.
    #[arg(long, global = true, env = "TRAVELSYNC_MODELS")]
    models: Option<String>,

    /// Per-candidate model timeout in seconds (max 120).
    #[arg(long, global = true, env = "TRAVELSYNC_MODEL_TIMEOUT", default_value_t = 45)]
    model_timeout: u64,

    /// Run tesseract OCR on images and pass the text as hints.
    #[arg(long, global = true, env = "TRAVELSYNC_OCR")]
    ocr: bool,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "TRAVELSYNC_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Path to libpdfium.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<std::path::PathBuf>,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, global = true, env = "TRAVELSYNC_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,
}

#[derive(Args, Debug)]
struct MailArgs {
    #[arg(long, env = "EMAIL_IMAP_SERVER", default_value = "imap.gmail.com")]
    imap_server: String,

    #[arg(long, env = "EMAIL_IMAP_PORT", default_value_t = 993)]
    imap_port: u16,

    #[arg(long, env = "EMAIL_ADDRESS", default_value = "")]
    address: String,

    #[arg(long, env = "EMAIL_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    #[arg(long, env = "EMAIL_PROCESSED_FOLDER", default_value = "Processed")]
    processed_folder: String,

    #[arg(long, env = "EMAIL_FAILED_FOLDER", default_value = "Failed")]
    failed_folder: String,

    /// Seconds between polling cycles.
    #[arg(long, env = "EMAIL_CHECK_INTERVAL", default_value_t = 300)]
    interval: u64,

    /// Flag messages read when selected; `false` defers it to the move.
    #[arg(
        long,
        env = "EMAIL_MARK_READ_ON_SELECT",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    mark_read_on_select: bool,
}

impl MailArgs {
    fn to_config(&self) -> MailConfig {
        let mut cfg = MailConfig::new(self.address.clone(), self.password.clone());
        cfg.server = self.imap_server.clone();
        cfg.port = self.imap_port;
        cfg.processed_folder = self.processed_folder.clone();
        cfg.failed_folder = self.failed_folder.clone();
        cfg.check_interval = Duration::from_secs(self.interval.max(1));
        cfg.mark_read_on_select = self.mark_read_on_select;
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal; only a malformed one is worth reporting.
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn,travelsync=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = dotenv {
        if !e.not_found() {
            tracing::warn!("Ignoring unreadable .env: {}", e);
        }
    }

    let config = build_config(&cli.model)?;

    match &cli.command {
        Command::Extract {
            inputs,
            calendar,
            json,
            concurrency,
        } => {
            let mut extractor = Extractor::from_config(&config);
            if *calendar {
                extractor = extractor.with_calendar(calendar_client()?);
            }
            run_extract(&extractor, inputs, *json, *concurrency, cli.quiet).await
        }
        Command::CheckMail { mail, json } => {
            let ingest = build_ingest(&config, mail, cli.quiet)?;
            let report = ingest.run_cycle().await.context("Mail cycle failed")?;
            print_report(&report, *json, cli.quiet)
        }
        Command::Watch { mail } => {
            let ingest = build_ingest(&config, mail, true)?;
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("{} stopping after the current cycle…", cyan("◆"));
                    on_signal.cancel();
                }
            });
            ingest.run(cancel).await;
            Ok(())
        }
    }
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(args: &ModelArgs) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .provider_name(args.provider.clone())
        .candidate_timeout(Duration::from_secs(args.model_timeout))
        .temperature(args.temperature)
        .ocr(args.ocr)
        .download_timeout_secs(args.download_timeout);

    if let Some(list) = &args.models {
        builder = builder.candidates(ModelPolicy::parse_candidates(list));
    }
    if let Some(path) = &args.pdfium_lib {
        builder = builder.pdfium_lib_path(path.clone());
    }
    builder.build().context("Invalid configuration")
}

fn calendar_client() -> Result<Arc<dyn CalendarService>> {
    let cfg = CalendarConfig::from_env();
    if cfg.access_token.is_none() {
        tracing::warn!("GOOGLE_CALENDAR_ACCESS_TOKEN is not set; events will not be created");
    }
    let client = GoogleCalendarClient::new(cfg).context("Failed to build calendar client")?;
    Ok(Arc::new(client))
}

fn build_ingest(config: &ExtractionConfig, args: &MailArgs, quiet: bool) -> Result<IngestLoop> {
    let mail = args.to_config();
    let mut extractor = Extractor::from_config(config);
    if CalendarConfig::from_env().access_token.is_some() {
        extractor = extractor.with_calendar(calendar_client()?);
    }
    let transport: Arc<dyn MailTransport> = Arc::new(ImapTransport::new(mail.clone()));
    let ingest = IngestLoop::new(Arc::new(extractor), transport, mail)
        .context("Mail is not configured")?;
    Ok(if quiet {
        ingest
    } else {
        ingest.with_observer(CliObserver::new())
    })
}

async fn run_extract(
    extractor: &Extractor,
    inputs: &[String],
    json: bool,
    concurrency: usize,
    quiet: bool,
) -> Result<()> {
    let bar = (!quiet && !json).then(|| spinner("Extracting", &format!("{} document(s)", inputs.len())));

    let results: Vec<(String, Result<ProcessedDocument, travelsync::ExtractError>)> =
        stream::iter(inputs.iter().cloned())
            .map(|input| async move {
                let result = extractor.process_input(&input).await;
                (input, result)
            })
            .buffered(concurrency.max(1))
            .collect()
            .await;

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let mut failed = 0usize;
    let mut records = Vec::new();
    for (input, result) in results {
        match result {
            Ok(done) => {
                if !json {
                    print_record(&input, &done);
                }
                records.push(done);
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}  {}", red("✗"), input, red(&e.to_string()));
            }
        }
    }

    if json {
        let out = if inputs.len() == 1 {
            match records.first() {
                Some(r) => serde_json::to_string_pretty(r),
                None => serde_json::to_string_pretty(&records),
            }
        } else {
            serde_json::to_string_pretty(&records)
        }
        .context("Failed to serialise records")?;
        println!("{out}");
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} document(s) failed", inputs.len());
    }
    Ok(())
}

fn print_record(input: &str, done: &ProcessedDocument) {
    let r = &done.record;
    println!("{} {}", green("✓"), bold(if r.title.is_empty() { input } else { r.title.as_str() }));
    println!("  Start:     {}", r.start_date);
    if let Some(end) = &r.end_date {
        println!("  End:       {end}");
    }
    if !r.location.is_empty() {
        println!("  Location:  {}", r.location);
    }
    if !r.description.is_empty() {
        println!("  Details:   {}", r.description);
    }
    println!("  {}", dim(&format!("{} via {} ({:?})", input, done.model, done.mode)));
    if let Some(id) = &done.calendar_event_id {
        println!("  Calendar:  {}", cyan(id));
    }
}

fn print_report(report: &CycleReport, json: bool, quiet: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(report).context("Failed to serialise report")?;
        println!("{out}");
        return Ok(());
    }
    if quiet {
        return Ok(());
    }
    let failed = report.failed();
    eprintln!(
        "{} {} unread, {} processed, {} failed, {} skipped",
        if failed == 0 { green("✔") } else { cyan("⚠") },
        bold(&report.unseen.to_string()),
        report.processed(),
        red(&failed.to_string()),
        report.skipped,
    );
    for m in report.messages.iter().filter(|m| m.move_error.is_some()) {
        eprintln!(
            "  {} message {} stayed in the inbox: {}",
            red("✗"),
            m.uid,
            m.move_error.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}
