//! CLI binary for manifiestos-bot.
//!
//! A thin shim over the library crate: `extract` runs the pipeline on one
//! photo and prints the record, `serve` starts the WhatsApp webhook.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use manifiestos_bot::config::init_dotenv;
use manifiestos_bot::pipeline::acquire::is_url;
use manifiestos_bot::record::ManifestFieldSet;
use manifiestos_bot::{
    confirmation_message, ExtractorConfig, ManifestExtractor, MediaReference, RecordSink,
    ServerConfig, SheetsConfig, SheetsSink,
};
use std::io;
use std::sync::Arc;
use tracing::warn;
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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract fields from a local photo
  manifiestos extract foto.jpg

  # Extract from a Twilio media URL and append the row to the sheet
  manifiestos extract https://api.twilio.com/2010-04-01/Accounts/AC.../Media/ME... --append

  # JSON output
  manifiestos extract foto.jpg --json > manifiesto.json

  # Run the WhatsApp webhook on port 8080
  manifiestos serve --port 8080

ENVIRONMENT VARIABLES (also read from .env):
  OPENAI_API_KEY          OpenAI API key
  OPENAI_ORG_ID           Optional OpenAI organization
  OPENAI_BASE_URL         OpenAI-compatible endpoint (default https://api.openai.com/v1)
  OPENAI_MODEL            Vision model (default gpt-4o-mini)
  LLM_PROVIDER            Route through another provider (anthropic, gemini, ollama, ...)
  TWILIO_SID              Media basic-auth user
  TWILIO_AUTH_TOKEN       Media basic-auth password
  MEDIA_HOSTS             Comma-separated hosts that get the credentials (default api.twilio.com)
  MODEL_MAX_ATTEMPTS      Model attempts including the first (default 4)
  MODEL_RETRY_BACKOFF_MS  First retry delay, doubled each time (default 1000)
  IMAGE_MAX_WIDTH         Enhanced image width in pixels (default 1600)
  SHEET_ID                Target spreadsheet
  SHEET_RANGE             Append range (default Manifiestos!A:N)
  SHEET_TIMEOUT_SECS      Append request timeout in seconds (default 30)
  GOOGLE_ACCESS_TOKEN     OAuth2 token with the spreadsheets scope
  HOST / PORT             Webhook bind address (default 0.0.0.0:3000)
  RUST_LOG                Log filter (default manifiestos_bot=info)
"#;

/// Read waste-transport manifests from photos with a Vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "manifiestos",
    version,
    about = "Read waste-transport manifests from photos with a Vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline on one photo and print the record.
    Extract {
        /// Local image path or HTTP/HTTPS media URL.
        input: String,

        /// Content type to assume when the server does not send one.
        #[arg(long)]
        content_type: Option<String>,

        /// Vision model ID (overrides OPENAI_MODEL).
        #[arg(long)]
        model: Option<String>,

        /// LLM provider routed through edgequake-llm (overrides LLM_PROVIDER).
        #[arg(long)]
        provider: Option<String>,

        /// Model attempts including the first (overrides MODEL_MAX_ATTEMPTS).
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Print the record as JSON.
        #[arg(long)]
        json: bool,

        /// Append the row to the configured Google Sheet.
        #[arg(long)]
        append: bool,
    },

    /// Serve the WhatsApp webhook.
    Serve {
        /// Bind host (overrides HOST).
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides PORT).
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "manifiestos_bot=debug,tower_http=debug"
    } else {
        "manifiestos_bot=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Extract {
            input,
            content_type,
            model,
            provider,
            max_attempts,
            json,
            append,
        } => {
            let mut config = ExtractorConfig::from_env().context("Invalid configuration")?;
            if let Some(m) = model {
                config.model = m;
            }
            if provider.is_some() {
                config.provider_name = provider;
            }
            if let Some(n) = max_attempts {
                config.max_attempts = n.max(1);
            }

            let mut media = if is_url(&input) {
                MediaReference::new(input)
            } else {
                MediaReference::local(input)
            };
            if let Some(ct) = content_type {
                media = media.with_content_type(ct);
            }

            run_extract(config, media, json, append, cli.quiet).await
        }
        Command::Serve { host, port } => {
            let mut server = ServerConfig::from_env();
            if let Some(h) = host {
                server.host = h;
            }
            if let Some(p) = port {
                server.port = p;
            }
            run_serve(server).await
        }
    }
}

async fn run_extract(
    config: ExtractorConfig,
    media: MediaReference,
    json: bool,
    append: bool,
    quiet: bool,
) -> Result<()> {
    let extractor = ManifestExtractor::new(config).context("Failed to initialise extractor")?;

    let record = match extractor.extract(&media).await {
        Ok(r) => r,
        Err(e) => {
            if !quiet {
                eprintln!("{} {}", red("✘"), extractor.failure_message(&e));
            }
            return Err(e).context("Extraction failed");
        }
    };

    if append {
        let sheets = SheetsConfig::from_env().context("--append needs a Google Sheet")?;
        let sink = SheetsSink::new(sheets, reqwest_client()?);
        sink.append(&record.to_row())
            .await
            .context("Failed to append row")?;
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&record).context("Failed to serialise record")?
        );
    } else {
        print_table(record.fields());
    }

    if !quiet {
        eprintln!("{} {}", green("✔"), confirmation_message(&record));
    }
    Ok(())
}

async fn run_serve(server: ServerConfig) -> Result<()> {
    use manifiestos_bot::webhook::{run_server, AppState};
    use manifiestos_bot::MemorySink;

    let config = ExtractorConfig::from_env().context("Invalid configuration")?;
    let extractor = ManifestExtractor::new(config).context("Failed to initialise extractor")?;

    let sink: Arc<dyn RecordSink> = match SheetsConfig::from_env() {
        Ok(sheets) => Arc::new(SheetsSink::new(sheets, reqwest_client()?)),
        Err(e) => {
            warn!("{}; rows will only be kept in memory", e);
            Arc::new(MemorySink::new())
        }
    };

    let state = Arc::new(AppState {
        extractor: Arc::new(extractor),
        sink,
    });

    run_server(server, state)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {e}"))
}

fn reqwest_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")
}

fn print_table(fields: &ManifestFieldSet) {
    let row = fields.to_row();
    for (name, value) in ManifestFieldSet::FIELD_NAMES.iter().zip(row.iter()) {
        let shown = if value.is_empty() {
            dim("(vacío)")
        } else {
            value.clone()
        };
        println!("{} {}", bold(&format!("{name:<26}")), shown);
    }
}
