//! CLI binary for edgequake-annotations.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs the analysis, and writes each requested export.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_annotations::export::{output_path, write_export};
use edgequake_annotations::{
    analyze, export_to_jira, AnnotationSet, ClassificationProgressCallback, ExportFormat, ExtractionConfig,
    GatewayClassifier, GatewayConfig, JiraConfig, OrphanPolicy, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
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

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per classified record. Records may
/// finish out of order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<u32, Instant>>,
}

impl CliProgressCallback {
    /// Spinner only until `on_classification_start` reports the record count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Extracting");
        bar.set_message("Reading annotations…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} records  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Classifying");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, record_id: u32) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&record_id))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ClassificationProgressCallback for CliProgressCallback {
    fn on_classification_start(&self, total_records: usize) {
        self.activate_bar(total_records);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Classifying {total_records} records…"))
        ));
    }

    fn on_record_start(&self, record_id: u32, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(record_id, Instant::now());
        }
        self.bar.set_message(format!("record {record_id}"));
    }

    fn on_record_complete(&self, record_id: u32, total: usize) {
        let secs = self.elapsed_secs(record_id);
        self.bar.println(format!(
            "  {} Record {:>3}/{:<3}  {}",
            green("✓"),
            record_id,
            total,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_record_error(&self, record_id: u32, total: usize, error: &str) {
        let secs = self.elapsed_secs(record_id);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Record {:>3}/{:<3}  {}  {}",
            red("✗"),
            record_id,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_classification_complete(&self, total_records: usize, success_count: usize) {
        let failed = total_records.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} records classified",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} records classified  ({} failed)",
                if failed == total_records { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_records,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract, classify and write CSV + XLSX + JSON next to the PDF
  pdfannot review.pdf

  # Only JSON, into ./out, without calling a model
  pdfannot review.pdf --format json --out-dir out --classifier none

  # Classify through the hosted gateway and raise Jira tickets
  pdfannot review.pdf --classifier gateway --jira

  # Use a specific model
  pdfannot --provider anthropic --model claude-sonnet-4-20250514 review.pdf

  # Keep replies whose parent comment is missing as records of their own
  pdfannot review.pdf --orphans promote

ENVIRONMENT VARIABLES (a .env file in the working directory is loaded):
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  GATEWAY_AUTH_URL        Token endpoint (client-credentials grant)
  GATEWAY_CLIENT_ID       Gateway client id
  GATEWAY_CLIENT_SECRET   Gateway client secret
  GATEWAY_API_ENDPOINT    Gateway completion endpoint
  GATEWAY_MODEL           Gateway model id
  JIRA_URL                Jira base URL
  JIRA_USERNAME           Jira user
  JIRA_API_TOKEN          Jira API token
  JIRA_PROJECT_KEY        Project for the Story and Sub-tasks
  PDFIUM_LIB_PATH         Path to an existing libpdfium
"#;

/// Extract PDF review annotations, classify them, and export them.
#[derive(Parser, Debug)]
#[command(
    name = "pdfannot",
    version,
    about = "Extract PDF review annotations, classify them with Vision LLMs, and export them",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Directory for the export files.
    #[arg(short, long, env = "PDFANNOT_OUT_DIR", default_value = ".")]
    out_dir: PathBuf,

    /// Export formats, comma-separated: csv, xlsx, json.
    #[arg(short, long, env = "PDFANNOT_FORMAT", value_delimiter = ',', default_value = "csv,xlsx,json")]
    format: Vec<ExportFormat>,

    /// Create a Jira Story with per-nature Sub-tasks.
    #[arg(long, env = "PDFANNOT_JIRA")]
    jira: bool,

    /// Who labels the records: llm, gateway or none.
    #[arg(long, env = "PDFANNOT_CLASSIFIER", value_enum, default_value = "llm")]
    classifier: ClassifierArg,

    /// LLM model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Pixels kept above and below each annotation in its crop.
    #[arg(long, env = "PDFANNOT_PADDING", default_value_t = 100)]
    padding: u32,

    /// Classification calls in flight at once.
    #[arg(short, long, env = "PDFANNOT_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Replies whose parent is missing: drop, promote or fail.
    #[arg(long, env = "PDFANNOT_ORPHANS", default_value = "drop")]
    orphans: OrphanPolicy,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFANNOT_PASSWORD")]
    password: Option<String>,

    /// pdfium library file or the directory holding it.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDFANNOT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDFANNOT_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Maximum tokens the model may generate per record.
    #[arg(long, env = "PDFANNOT_MAX_TOKENS", default_value_t = 50)]
    max_tokens: usize,

    /// Retries per record on a failed classification call.
    #[arg(long, env = "PDFANNOT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFANNOT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "PDFANNOT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFANNOT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFANNOT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ClassifierArg {
    Llm,
    Gateway,
    None,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing, so `env =` fallbacks see .env values.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && cli.classifier != ClassifierArg::None;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new_dynamic);
    let config = build_config(&cli, progress.clone().map(|cb| cb as ProgressCallback)).await?;

    // ── Run analysis ─────────────────────────────────────────────────────
    let result = analyze(&cli.input, &config).await;
    if let Some(ref cb) = progress {
        cb.bar.finish_and_clear();
    }
    let set = result.context("Annotation extraction failed")?;

    if !cli.quiet {
        print_summary(&set);
    }

    // ── Exports ──────────────────────────────────────────────────────────
    let mut failures = 0usize;

    for format in dedup(&cli.format) {
        let path = output_path(&cli.out_dir, &set.source_name, format);
        match write_export(&set, format, &path).await {
            Ok(()) => {
                if !cli.quiet {
                    eprintln!("{} {}  →  {}", green("✔"), format, bold(&path.display().to_string()));
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{} {} export failed: {}", red("✘"), format, e);
            }
        }
    }

    if cli.jira {
        let outcome = match JiraConfig::from_env() {
            Ok(jira) => export_to_jira(&set, jira).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(export) => {
                if !cli.quiet {
                    eprintln!(
                        "{} Jira story {}  ({} sub-tasks, {} attachments)",
                        green("✔"),
                        bold(&export.story_key),
                        export.subtask_keys.len(),
                        export.attachments
                    );
                }
                println!("{}", export.story_key);
            }
            Err(e) => {
                failures += 1;
                eprintln!("{} Jira export failed: {}", red("✘"), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} export target(s) failed");
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .padding(cli.padding)
        .concurrency(cli.concurrency)
        .orphan_policy(cli.orphans)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .skip_classification(cli.classifier == ClassifierArg::None);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    if let Some(ref prompt) = system_prompt {
        builder = builder.system_prompt(prompt.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(lib.clone());
    }

    let mut config = builder.build().context("Invalid configuration")?;

    if cli.classifier == ClassifierArg::Gateway {
        let gateway = GatewayConfig::from_env().context("Gateway classifier is not configured")?;
        config.classifier = Some(Arc::new(GatewayClassifier::new(gateway, &config)));
    }

    Ok(config)
}

fn print_summary(set: &AnnotationSet) {
    let s = &set.stats;
    eprintln!(
        "{}  {} records from {} pages  ({} replies merged, {} skipped)  {}ms",
        cyan("◆"),
        bold(&s.primary_annotations.to_string()),
        s.page_count,
        s.replies_merged,
        s.skipped_annotations,
        s.total_duration_ms,
    );
    if s.total_input_tokens > 0 {
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&s.total_input_tokens.to_string()),
            dim(&s.total_output_tokens.to_string()),
        );
    }
    for orphan in &set.orphaned_replies {
        eprintln!(
            "   {} page {}: reply by {} has no parent comment: {:?}",
            cyan("⚠"),
            orphan.page,
            orphan.author,
            orphan.content
        );
    }
}

/// Keep the first occurrence of each format.
fn dedup(formats: &[ExportFormat]) -> Vec<ExportFormat> {
    let mut out: Vec<ExportFormat> = Vec::with_capacity(formats.len());
    for f in formats {
        if !out.contains(f) {
            out.push(*f);
        }
    }
    out
}
