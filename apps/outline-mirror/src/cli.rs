use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use transport_port::{PortError, loopback};

use crate::config::ConnectionConfig;
use crate::session::ViewSession;
use crate::telemetry::logging::{LogConfig, LogLevel};
use crate::tree::{MirrorState, TreeNode, build_open_map, visible_rows};

#[derive(Parser, Debug)]
#[command(
    name = "outline-mirror",
    about = "Mirror a background-owned outline tree over a reconnecting channel",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "OUTLINE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "OUTLINE_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Feed a JSON-lines transcript of background messages through a view
    /// session and print what the view ends up with
    Replay(ReplayArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// One protocol message per line; blank lines and `#` comments are skipped
    #[arg(value_name = "TRANSCRIPT")]
    pub transcript: PathBuf,

    #[arg(long, value_enum, default_value_t = DumpFormat::Tree)]
    pub dump: DumpFormat,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum DumpFormat {
    /// Expanded flag per expandable node, as JSON
    OpenMap,
    /// Indented outline of the visible rows
    #[default]
    Tree,
    /// Summary of the mirror state, as JSON
    State,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("cannot read transcript {path:?}: {source}")]
    Transcript {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("transcript line {line} is not JSON: {source}")]
    TranscriptLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("loopback transport failed: {0}")]
    Transport(#[from] PortError),
    #[error("channel never connected")]
    NotConnected,
    #[error("transcript produced no tree; it needs a {command} message", command = outline_proto::commands::INIT)]
    NoTree,
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let log_config = cli.logging.to_config();
    crate::telemetry::logging::init(&log_config)
        .map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    match cli.command {
        Command::Replay(args) => {
            let output = replay(&args, &ConnectionConfig::from_env()).await?;
            println!("{output}");
            Ok(())
        }
    }
}

/// Replays `args.transcript` and renders the final mirror.
pub async fn replay(args: &ReplayArgs, config: &ConnectionConfig) -> Result<String, CliError> {
    let messages = read_transcript(&args.transcript)?;
    let (connector, mut acceptor) = loopback();
    let session = ViewSession::attach(config, Arc::new(connector));
    session.start().await;
    let mut peer = acceptor.accept().await.ok_or(CliError::NotConnected)?;

    // Listeners run in registration order, so once this one has seen every
    // transcript line the session has reduced all of them.
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let watcher = session.channel().on_message(move |_| {
        let _ = seen_tx.send(());
    });
    for message in &messages {
        peer.post(message.clone())?;
    }
    for _ in 0..messages.len() {
        seen_rx.recv().await.ok_or(CliError::NotConnected)?;
    }
    watcher.unsubscribe();

    let sent: Vec<String> = peer
        .drain()
        .iter()
        .filter_map(|value| value.get("request").and_then(Value::as_str))
        .map(str::to_owned)
        .collect();
    let state = session.current();
    session.detach();
    info!(
        target = "session::replay",
        messages = messages.len(),
        requests = sent.len(),
        "transcript replayed"
    );

    render(&state, args.dump, &sent)
}

fn read_transcript(path: &Path) -> Result<Vec<Value>, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Transcript {
        path: path.to_path_buf(),
        source,
    })?;
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, raw)| {
            serde_json::from_str(raw).map_err(|source| CliError::TranscriptLine { line, source })
        })
        .collect()
}

fn render(state: &MirrorState, dump: DumpFormat, sent: &[String]) -> Result<String, CliError> {
    match dump {
        DumpFormat::OpenMap => {
            let root = state.root().ok_or(CliError::NoTree)?;
            Ok(Value::from_iter(
                build_open_map(root)
                    .into_iter()
                    .map(|(id, open)| (id, Value::Bool(open))),
            )
            .to_string())
        }
        DumpFormat::Tree => {
            let root = state.root().ok_or(CliError::NoTree)?;
            Ok(render_outline(root))
        }
        DumpFormat::State => Ok(json!({
            "ready": state.is_ready(),
            "globalViewId": state.global_view_id(),
            "instanceId": state.instance_id(),
            "needsFullRefresh": state.needs_full_refresh(),
            "nodeCount": state.snapshot().map(|snapshot| snapshot.len()),
            "cursor": state.cursor().map(|cursor| cursor.node_id.as_str()),
            "importResult": state.import_result(),
            "exportResult": state.export_result(),
            "requestsSent": sent,
        })
        .to_string()),
    }
}

fn render_outline(root: &TreeNode) -> String {
    let mut out = String::new();
    for row in visible_rows(root) {
        let marker = match (row.expandable, row.collapsed) {
            (false, _) => '*',
            (true, true) => '+',
            (true, false) => '-',
        };
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&"  ".repeat(row.depth));
        out.push(marker);
        out.push(' ');
        out.push_str(&row.id);
        if let Some(title) = row.title.as_deref() {
            out.push_str(" (");
            out.push_str(title);
            out.push(')');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replay_command() {
        let cli = Cli::try_parse_from([
            "outline-mirror",
            "replay",
            "session.jsonl",
            "--dump",
            "open-map",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.logging.level, LogLevel::Debug);
        let Command::Replay(args) = cli.command;
        assert_eq!(args.transcript, PathBuf::from("session.jsonl"));
        assert_eq!(args.dump, DumpFormat::OpenMap);
    }

    #[test]
    fn replay_defaults_to_tree_dump() {
        let cli = Cli::try_parse_from(["outline-mirror", "replay", "t.jsonl"]).unwrap();
        let Command::Replay(args) = cli.command;
        assert_eq!(args.dump, DumpFormat::Tree);
    }
}
