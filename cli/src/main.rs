//! bitcode CLI - headless driver for the LSP client.
//!
//! Opens one file against a language server, optionally applies an edit,
//! runs the requested queries and prints what the server reported:
//!
//! ```text
//! main() -> session::run() -> start -> initialize -> didOpen -> [edit] -> queries
//!                                   -> wait for diagnostics -> code actions -> shutdown
//! ```
//!
//! Exits with a failure status when the document still has error diagnostics.

mod session;

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
    time::Duration,
};

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use bitcode_config::BitcodeConfig;
use bitcode_lsp::{Position, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "bitcode")]
#[command(about = "Drive a language server against one file and report what it says", long_about = None)]
struct Cli {
    /// File to open
    file: PathBuf,

    /// Language server command (overrides `[lsp.server]` in the config)
    #[arg(short, long)]
    server: Option<String>,

    /// Argument for the language server; repeat for several
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Show hover text at LINE:COL (1-based)
    #[arg(long, value_name = "LINE:COL", value_parser = parse_position)]
    hover: Option<Position>,

    /// Request completions at LINE:COL (1-based)
    #[arg(long, value_name = "LINE:COL", value_parser = parse_position)]
    complete: Option<Position>,

    /// Request code actions at LINE:COL (1-based)
    #[arg(long, value_name = "LINE:COL", value_parser = parse_position)]
    code_actions: Option<Position>,

    /// Append TEXT to the document after opening it
    #[arg(long, value_name = "TEXT")]
    edit: Option<String>,

    /// How long to wait for diagnostics, in milliseconds
    #[arg(long, default_value_t = 2000)]
    wait_ms: u64,
}

/// Parse a 1-based `LINE:COL` into a zero-based position.
fn parse_position(s: &str) -> Result<Position, String> {
    let (line, col) = s
        .split_once(':')
        .ok_or_else(|| format!("expected LINE:COL, got {s:?}"))?;
    let line: u32 = line.trim().parse().map_err(|e| format!("bad line {line:?}: {e}"))?;
    let col: u32 = col.trim().parse().map_err(|e| format!("bad column {col:?}: {e}"))?;
    if line == 0 || col == 0 {
        return Err("LINE and COL start at 1".to_string());
    }
    Ok(Position::new(line - 1, col - 1))
}

fn init_tracing(config_filter: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay silent rather than interleave logs with the report.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.bitcode/logs/bitcode.log
    if let Some(config_path) = BitcodeConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("bitcode.log"));
    }

    // Fallback: ./.bitcode/logs/bitcode.log
    candidates.push(PathBuf::from(".bitcode").join("logs").join("bitcode.log"));

    candidates
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let loaded = BitcodeConfig::load();
    init_tracing(
        loaded
            .as_ref()
            .ok()
            .and_then(Option::as_ref)
            .and_then(BitcodeConfig::log_filter),
    );
    let config = match loaded {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("ignoring config: {e}");
            eprintln!("warning: {e}");
            BitcodeConfig::default()
        }
    };

    let mut lsp = config.lsp_or_default();
    if !lsp.enabled {
        bail!("the LSP client is disabled in {}", config_location());
    }
    if let Some(command) = cli.server {
        let root_markers = lsp
            .server
            .take()
            .map(|s| s.root_markers)
            .unwrap_or_default();
        lsp.server = Some(ServerConfig {
            root_markers,
            ..ServerConfig::new(command, cli.server_args)
        });
    }
    if lsp.server.is_none() {
        bail!(
            "no language server configured: pass --server or set [lsp.server] in {}",
            config_location()
        );
    }

    let request = session::SessionRequest {
        file: cli.file,
        hover: cli.hover,
        complete: cli.complete,
        code_actions: cli.code_actions,
        edit: cli.edit,
        wait: Duration::from_millis(cli.wait_ms),
    };
    let report = session::run(lsp, &request).await?;
    print!("{report}");
    if report.has_errors() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn config_location() -> String {
    BitcodeConfig::path().map_or_else(
        || "the config file".to_string(),
        |p| p.display().to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_position_is_one_based() {
        assert_eq!(parse_position("1:1").unwrap(), Position::new(0, 0));
        assert_eq!(parse_position("12:7").unwrap(), Position::new(11, 6));
    }

    #[test]
    fn parse_position_rejects_bad_input() {
        assert!(parse_position("12").is_err());
        assert!(parse_position("0:1").is_err());
        assert!(parse_position("a:b").is_err());
    }

    #[test]
    fn parses_full_command_line() {
        let cli = Cli::try_parse_from([
            "bitcode",
            "src/main.rs",
            "--server",
            "rust-analyzer",
            "--arg",
            "--log-file",
            "--arg",
            "/tmp/ra.log",
            "--hover",
            "3:5",
            "--edit",
            "// more",
            "--wait-ms",
            "500",
        ])
        .unwrap();
        assert_eq!(cli.file, PathBuf::from("src/main.rs"));
        assert_eq!(cli.server.as_deref(), Some("rust-analyzer"));
        assert_eq!(cli.server_args, vec!["--log-file", "/tmp/ra.log"]);
        assert_eq!(cli.hover, Some(Position::new(2, 4)));
        assert!(cli.complete.is_none());
        assert_eq!(cli.edit.as_deref(), Some("// more"));
        assert_eq!(cli.wait_ms, 500);
    }
}
