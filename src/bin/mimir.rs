//! mimir: command-line front end
//!
//! Runs generate/explain/improve requests through the full pipeline against
//! the configured provider and prints the result.

use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use mimir::config::Secrets;
use mimir::{ApiRequest, Config, ResponseBody, StreamFrame};
use serde_json::{Value, json};

/// Mimir CLI
#[derive(Parser)]
#[command(name = "mimir")]
#[command(version = mimir::version::PKG_VERSION)]
#[command(about = "LLM-backed code generation, explanation and review")]
struct Args {
    /// Config file (default: ~/.mimir/config.toml, then /etc/mimir/config.toml)
    #[arg(short, long, env = "MIMIR_CONFIG")]
    config: Option<PathBuf>,

    /// Identity to account usage against
    #[arg(short, long, env = "MIMIR_USER", default_value = "cli")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate code from a description
    Generate {
        /// What the code should do
        description: String,
        /// Target language
        #[arg(short, long)]
        language: String,
        /// Extra context for the model
        #[arg(long)]
        context: Option<String>,
        /// Stream output as it is produced
        #[arg(short, long)]
        stream: bool,
    },

    /// Explain a piece of code
    Explain {
        /// Source file (or omit to read from stdin)
        file: Option<PathBuf>,
        /// Language (detected when omitted)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Review and improve a piece of code
    Improve {
        /// Source file (or omit to read from stdin)
        file: Option<PathBuf>,
        #[arg(short, long)]
        language: Option<String>,
        /// Requirements the rewrite should respect
        #[arg(short, long)]
        requirements: Option<String>,
    },

    /// Print version with git metadata
    Version {
        /// Print build metadata as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let (path, body) = match args.command {
        Command::Version { json } => {
            let info = mimir::version::build_info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("mimir {info}");
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Generate {
            description,
            language,
            context,
            stream,
        } => (
            "/api/generate",
            json!({
                "description": description,
                "language": language,
                "context": context,
                "stream": stream,
            }),
        ),
        Command::Explain { file, language } => (
            "/api/explain",
            json!({ "code": read_code(file, "explain")?, "language": language }),
        ),
        Command::Improve {
            file,
            language,
            requirements,
        } => (
            "/api/improve",
            json!({
                "code": read_code(file, "improve")?,
                "language": language,
                "requirements": requirements,
            }),
        ),
    };

    let config = Config::load_or_default(args.config.as_deref())?;
    let secrets = Secrets::load()?;
    let provider = config.build_provider(&secrets)?;
    let orchestrator = Arc::new(config.orchestrator(provider));

    let request = ApiRequest::post(path, strip_nulls(body))
        .header("authorization", &format!("Bearer {}", args.user));
    let response = orchestrator.handle(request).await;
    let ok = response.status.is_success();

    match response.body {
        ResponseBody::Json(value) => {
            let rendered = serde_json::to_string_pretty(&value)?;
            if ok {
                println!("{rendered}");
            } else {
                eprintln!("{} {rendered}", response.status);
            }
        }
        ResponseBody::Stream(mut frames) => {
            let mut stdout = io::stdout().lock();
            while let Some(frame) = frames.next().await {
                match frame {
                    StreamFrame::Data { content } => {
                        stdout.write_all(content.as_bytes())?;
                        stdout.flush()?;
                    }
                    StreamFrame::Done => writeln!(stdout)?,
                    StreamFrame::Error { error } => {
                        eprintln!("\nerror: {error}");
                        return Ok(ExitCode::FAILURE);
                    }
                }
            }
        }
        ResponseBody::Empty => {}
    }

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Read source code from a file, or from stdin when no file is given.
fn read_code(file: Option<PathBuf>, command: &str) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(path) = file {
        return Ok(std::fs::read_to_string(&path)
            .map_err(|e| format!("{command}: cannot read {}: {e}", path.display()))?);
    }
    if io::stdin().is_terminal() {
        return Err(format!("{command}: no input provided (pass a file or pipe code via stdin)").into());
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

/// Drop null fields so optional arguments are simply absent.
fn strip_nulls(mut body: Value) -> Value {
    if let Value::Object(ref mut map) = body {
        map.retain(|_, v| !v.is_null());
    }
    body
}
