//! CLI binary for edgequake-pdf2qa.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `CorpusConfig` and prints results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf2qa::{
    config::DEFAULT_OUTPUT, extract_text, ChunkError, CorpusConfig, CorpusProgressCallback,
    CorpusWriter, Pipeline, ProgressCallback, RunReport,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

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

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per chunk.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-chunk start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until the chunk count is known (`on_run_start`).
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER_TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER_TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Generating");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, chunk: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&chunk))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl CorpusProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_chunks: usize) {
        self.activate_bar(total_chunks);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Generating pairs for {total_chunks} chunks…"))
        ));
    }

    fn on_chunk_start(&self, chunk: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(chunk, Instant::now());
        }
        self.bar.set_message(format!("chunk {}", chunk + 1));
    }

    fn on_chunk_complete(&self, chunk: usize, processed: usize, total: usize, pairs: usize, cumulative: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            processed,
            total,
            dim(&format!("{pairs} pairs")),
            dim(&format!("{:.1}s  ({cumulative} total)", self.elapsed_secs(chunk))),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_skipped(&self, processed: usize, total: usize, _cumulative: usize, error: &ChunkError) {
        let elapsed = self.elapsed_secs(error.chunk());
        let mut msg = error.to_string();
        if msg.chars().count() > 80 {
            msg = format!("{}\u{2026}", msg.chars().take(79).collect::<String>());
        }

        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            processed,
            total,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Generate pairs from a local PDF (appends to training_data/training_examples.jsonl)
  pdf2qa generate handbook.pdf

  # From a Google Drive share link, into a custom corpus
  pdf2qa generate "https://drive.google.com/file/d/FILE_ID/view" -o corpus.jsonl

  # Faster wall clock with 3 chunks in flight (rate limit still applies)
  pdf2qa generate --concurrency 3 --rate-limit 20 handbook.pdf

  # Just print the extracted text
  pdf2qa extract scan.pdf

  # Add a hand-written example
  pdf2qa add -Q "What is the refund window?" -a "30 days from delivery."

  # Validate every corpus line
  pdf2qa check -o corpus.jsonl

ENVIRONMENT VARIABLES:
  MISTRAL_API_KEY         Completion service key (also read from .env)
  PDF2QA_API_BASE         OpenAI-compatible endpoint base (default Mistral)
  PDF2QA_MODEL            Completion model (default mistral-small-latest)
  OPENAI_API_KEY          Vision provider for the OCR fallback
  EDGEQUAKE_LLM_PROVIDER  OCR provider override (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         OCR model override
  PDFIUM_LIB_PATH         Path to libpdfium (layout text and OCR rasterisation)
"#;

/// Build a question/answer training corpus from PDF documents.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2qa",
    version,
    about = "Build a question/answer training corpus from PDF files and URLs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2QA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2QA_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, chunk, generate pairs and append them to the corpus.
    Generate(GenerateArgs),
    /// Print the text extracted from a PDF.
    Extract(ExtractArgs),
    /// Append one hand-written question/answer pair.
    Add(AddArgs),
    /// Verify that every corpus line is a complete example.
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2QA_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2QA_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Keep downloaded PDFs in this directory.
    #[arg(long, env = "PDF2QA_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// Never fall back to vision OCR.
    #[arg(long, env = "PDF2QA_NO_OCR")]
    no_ocr: bool,

    /// Vision provider for OCR: openai, anthropic, gemini, ollama.
    #[arg(long, env = "PDF2QA_OCR_PROVIDER")]
    ocr_provider: Option<String>,

    /// Vision model for OCR.
    #[arg(long, env = "PDF2QA_OCR_MODEL")]
    ocr_model: Option<String>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Corpus file to append to.
    #[arg(short, long, env = "PDF2QA_OUTPUT", default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Completion service API key.
    #[arg(long, env = "MISTRAL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpenAI-compatible API base URL.
    #[arg(long, env = "PDF2QA_API_BASE", default_value = edgequake_pdf2qa::config::DEFAULT_API_BASE)]
    api_base: String,

    /// Completion model ID.
    #[arg(long, env = "PDF2QA_MODEL", default_value = edgequake_pdf2qa::config::DEFAULT_MODEL)]
    model: String,

    /// Maximum chunk length in characters.
    #[arg(long, env = "PDF2QA_CHUNK_SIZE", default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[arg(long, env = "PDF2QA_CHUNK_OVERLAP", default_value_t = 200)]
    chunk_overlap: usize,

    /// Question/answer pairs requested per chunk.
    #[arg(long, env = "PDF2QA_PAIRS", default_value_t = 3)]
    pairs: usize,

    /// Completion calls allowed per rate-limit window.
    #[arg(long, env = "PDF2QA_RATE_LIMIT", default_value_t = 5)]
    rate_limit: usize,

    /// Rate-limit window in seconds.
    #[arg(long, env = "PDF2QA_RATE_WINDOW", default_value_t = 60)]
    rate_window: u64,

    /// Attempts per chunk, first try included.
    #[arg(long, env = "PDF2QA_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Per-call completion timeout in seconds.
    #[arg(long, env = "PDF2QA_API_TIMEOUT", default_value_t = 10)]
    api_timeout: u64,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PDF2QA_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Max completion tokens per chunk.
    #[arg(long, env = "PDF2QA_MAX_TOKENS", default_value_t = 500)]
    max_tokens: usize,

    /// Chunks generated concurrently; corpus order is unaffected.
    #[arg(short, long, env = "PDF2QA_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2QA_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Print the run report as JSON.
    #[arg(long, env = "PDF2QA_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2QA_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Args, Debug)]
struct AddArgs {
    #[arg(short = 'Q', long)]
    question: String,

    #[arg(short, long)]
    answer: String,

    #[arg(short, long, env = "PDF2QA_OUTPUT", default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(short, long, env = "PDF2QA_OUTPUT", default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // While the progress bar is active it provides the feedback; library
    // INFO logs would only tear it.
    let show_progress = match &cli.command {
        Command::Generate(args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Generate(ref args) => generate(args, cli.quiet, show_progress).await,
        Command::Extract(ref args) => extract(args).await,
        Command::Add(ref args) => add(args, cli.quiet).await,
        Command::Check(ref args) => check(args).await,
    }
}

async fn generate(args: &GenerateArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn CorpusProgressCallback>)
    } else {
        None
    };

    let config = build_generate_config(args, progress_cb).await?;
    let pipeline = Pipeline::from_config(&config).context("Failed to set up pipeline")?;
    let report = pipeline
        .run(&args.source.input)
        .await
        .context("Corpus generation failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !quiet {
        eprintln!(
            "{}  {}/{} chunks  {} pairs  {}ms  →  {}",
            if report.skipped_chunks == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            report.successful_chunks(),
            report.total_chunks,
            report.written_lines,
            report.total_duration_ms,
            bold(&report.output.display().to_string()),
        );
        eprintln!(
            "   {}",
            dim(&format!(
                "text via {} ({} chars)",
                report.extraction_strategy, report.extracted_chars
            ))
        );
        if report.skipped_chunks > 0 {
            eprintln!("   {} chunks skipped", red(&report.skipped_chunks.to_string()));
        }
    }

    Ok(())
}

async fn extract(args: &ExtractArgs) -> Result<()> {
    let config = source_builder(&args.source)
        .build()
        .context("Invalid configuration")?;
    let extracted = extract_text(&args.source.input, &config)
        .await
        .context("Text extraction failed")?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(extracted.text.as_bytes())
        .context("Failed to write to stdout")?;
    eprintln!(
        "{}",
        dim(&format!(
            "{} pages via {} ({} skipped)",
            extracted.pages,
            extracted.strategy,
            extracted.page_errors.len()
        ))
    );
    Ok(())
}

async fn add(args: &AddArgs, quiet: bool) -> Result<()> {
    let writer = CorpusWriter::new(&args.output);
    writer
        .append_pair(&args.question, &args.answer)
        .await
        .context("Failed to add example")?;
    if !quiet {
        eprintln!(
            "{} Added example to {}",
            green("✔"),
            bold(&args.output.display().to_string())
        );
    }
    Ok(())
}

async fn check(args: &CheckArgs) -> Result<()> {
    let report = CorpusWriter::new(&args.output)
        .verify()
        .await
        .context("Failed to read corpus")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if report.is_valid() {
        eprintln!("{} {} lines, all valid", green("✔"), bold(&report.lines.to_string()));
    } else {
        eprintln!(
            "{} {} of {} lines invalid: {:?}",
            red("✘"),
            report.invalid_lines.len(),
            report.lines,
            report.invalid_lines
        );
    }

    if !report.is_valid() {
        bail!("corpus {} has invalid lines", args.output.display());
    }
    Ok(())
}

/// Settings shared by every subcommand that reads a PDF.
fn source_builder(args: &SourceArgs) -> edgequake_pdf2qa::CorpusConfigBuilder {
    let mut builder = CorpusConfig::builder()
        .download_timeout_secs(args.download_timeout)
        .ocr_enabled(!args.no_ocr);
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd);
    }
    if let Some(ref dir) = args.download_dir {
        builder = builder.download_dir(dir);
    }
    if let Some(ref p) = args.ocr_provider {
        builder = builder.ocr_provider_name(p);
    }
    if let Some(ref m) = args.ocr_model {
        builder = builder.ocr_model(m);
    }
    builder
}

/// Map `generate` args to `CorpusConfig`.
async fn build_generate_config(
    args: &GenerateArgs,
    progress: Option<ProgressCallback>,
) -> Result<CorpusConfig> {
    let mut builder = source_builder(&args.source)
        .output(&args.output)
        .api_base(&args.api_base)
        .model(&args.model)
        .chunk_size(args.chunk_size)
        .chunk_overlap(args.chunk_overlap)
        .pairs_per_chunk(args.pairs)
        .rate_limit(args.rate_limit, args.rate_window)
        .max_attempts(args.max_attempts)
        .api_timeout_secs(args.api_timeout)
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .concurrency(args.concurrency);

    if let Some(ref key) = args.api_key {
        builder = builder.api_key(key);
    }

    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
