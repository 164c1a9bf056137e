//! rss-digest binary entrypoint.
//! Loads configuration, wires the FreshRSS source, the completion client and
//! the Telegram transport, then runs the pipeline once.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use rss_digest::ai::build_factory;
use rss_digest::ingest::FreshRssSource;
use rss_digest::notify::{self, ChatTransport, MarkupMode, TelegramSender};
use rss_digest::{logging, DigestConfig, DigestPipeline, RunStatus};

#[derive(Debug, Parser)]
#[command(name = "rss-digest", version, about = "Summarize new RSS entries into one Telegram digest")]
struct Cli {
    /// Config file (defaults to $DIGEST_CONFIG_PATH, then config/digest.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run options for the bare `rss-digest [--hours-back N] [--no-send]` form
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate and send a digest (default)
    Run(RunArgs),
    /// Send text through the chunked Telegram path (manual resend)
    SendText(SendTextArgs),
}

#[derive(Debug, Args, Default, Clone, PartialEq, Eq)]
struct RunArgs {
    /// Lookback window in hours (overrides config)
    #[arg(long)]
    hours_back: Option<u32>,
    /// Generate and commit, but don't deliver
    #[arg(long)]
    no_send: bool,
}

#[derive(Debug, Args)]
struct SendTextArgs {
    /// Text to send; read from stdin when omitted
    text: Option<String>,
    /// Send without MarkdownV2 processing
    #[arg(long)]
    plain: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    logging::init();

    match run_cli().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_cli() -> Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(p) => DigestConfig::load_from_file(p)?,
        None => DigestConfig::load_default()?,
    };

    match resolve_command(cli.run, cli.command) {
        Command::Run(args) => run_digest(&cfg, args).await,
        Command::SendText(args) => send_text(&cfg, args).await,
    }
}

/// `run` is the default command. Flags given before the subcommand name
/// apply to `run` as well; the subcommand's own flags win.
fn resolve_command(top: RunArgs, command: Option<Command>) -> Command {
    match command {
        None => Command::Run(top),
        Some(Command::Run(args)) => Command::Run(RunArgs {
            hours_back: args.hours_back.or(top.hours_back),
            no_send: args.no_send || top.no_send,
        }),
        Some(other) => other,
    }
}

async fn run_digest(cfg: &DigestConfig, args: RunArgs) -> Result<ExitCode> {
    let send = !args.no_send;
    let transport: Option<Arc<dyn ChatTransport>> = if send {
        Some(Arc::new(TelegramSender::from_config(&cfg.telegram)?))
    } else {
        None
    };

    let pipeline = DigestPipeline::new(
        cfg,
        Arc::new(FreshRssSource::new(&cfg.freshrss_db_path)),
        build_factory(&cfg.ai),
        transport,
    );
    let report = pipeline
        .run(args.hours_back.unwrap_or(cfg.hours_back), send)
        .await;

    info!(status = ?report.status, items = report.items, "digest run finished");
    println!("{}", report.text);
    Ok(match report.status {
        RunStatus::Success | RunStatus::NoNewItems => ExitCode::SUCCESS,
        RunStatus::Failed => ExitCode::FAILURE,
    })
}

async fn send_text(cfg: &DigestConfig, args: SendTextArgs) -> Result<ExitCode> {
    let text = match args.text {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading text from stdin")?;
            buf
        }
    };
    let mode = if args.plain {
        MarkupMode::Plain
    } else {
        MarkupMode::Structured
    };

    let sender = TelegramSender::from_config(&cfg.telegram)?;
    let report = notify::deliver(&sender, &text, mode).await?;
    println!("sent {}/{} chunks", report.chunks_sent, report.total_chunks);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv.iter().copied()).expect("parses");
        match resolve_command(cli.run, cli.command) {
            Command::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn bare_command_accepts_run_flags() {
        assert_eq!(
            run_args(&["rss-digest", "--no-send"]),
            RunArgs { hours_back: None, no_send: true }
        );
        assert_eq!(
            run_args(&["rss-digest", "--hours-back", "6"]),
            RunArgs { hours_back: Some(6), no_send: false }
        );
        assert_eq!(run_args(&["rss-digest"]), RunArgs::default());
    }

    #[test]
    fn run_subcommand_and_global_config_still_parse() {
        assert_eq!(
            run_args(&["rss-digest", "run", "--no-send", "--hours-back", "12"]),
            RunArgs { hours_back: Some(12), no_send: true }
        );
        let cli = Cli::try_parse_from(["rss-digest", "--config", "my.toml", "run"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("my.toml")));
        assert!(matches!(cli.command, Some(Command::Run(_))));
    }

    #[test]
    fn send_text_takes_inline_text() {
        let cli = Cli::try_parse_from(["rss-digest", "send-text", "--plain", "hello"]).unwrap();
        match resolve_command(cli.run, cli.command) {
            Command::SendText(args) => {
                assert!(args.plain);
                assert_eq!(args.text.as_deref(), Some("hello"));
            }
            other => panic!("expected send-text, got {other:?}"),
        }
    }
}
