//! parley - headless driver for the session engine
//!
//! Spawns the bridge subprocess, feeds it commands, routes its envelopes
//! into the multiplexer, and speaks a line-oriented control protocol on
//! stdio: client requests in, UI events out.

mod config;
mod store;

use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::mpsc;

use parley_multiplex::{Multiplexer, UiEvent};
use parley_protocol::{Command, Envelope};
use parley_session::error::Error as SessionError;
use parley_session::{Decision, SubprocessLink};

use config::Config;
use store::JsonlStore;

/// parley - multi-project assistant session engine
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Projects to open at startup
    #[arg(short, long)]
    project: Vec<String>,

    /// Bridge program speaking the envelope protocol on stdio
    #[arg(short, long)]
    bridge: Option<String>,

    /// Model to use for new sessions
    #[arg(short, long)]
    model: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// List a project's stored conversations and exit
    #[arg(long)]
    conversations: Option<String>,
}

/// Requests accepted on stdin, one JSON object per line
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientRequest {
    OpenProject { path: String },
    SwitchProject { path: String },
    CloseProject { path: String },
    SelectConversation { path: String, conversation_id: String },
    Send { path: String, text: String },
    Respond { session_id: String, decision: Decision },
    Abort { session_id: String },
}

/// Command writer over the bridge subprocess's stdin
struct BridgeLink {
    stdin: tokio::sync::Mutex<ChildStdin>,
}

#[async_trait::async_trait]
impl SubprocessLink for BridgeLink {
    async fn send(&self, command: Command) -> parley_session::error::Result<()> {
        let line = command.to_line()?;
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SessionError::Link(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| SessionError::Link(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| SessionError::Link(e.to_string()))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("parley=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match Config::init() {
            Ok(path) => println!("Config file created at: {}", path.display()),
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut config = Config::load();
    if args.model.is_some() {
        config.model = args.model.clone();
    }

    let store = Arc::new(
        JsonlStore::new(config.data_dir()).context("failed to open conversation store")?,
    );

    // List conversations and exit
    if let Some(project) = args.conversations {
        use parley_session::ConversationStore;
        let conversations = store.list_conversations(&project).await?;
        for conv in conversations {
            println!(
                "{}  {}",
                conv.id,
                conv.title.as_deref().unwrap_or("(untitled)")
            );
        }
        return Ok(());
    }

    let bridge = args
        .bridge
        .or_else(|| config.bridge_command.clone())
        .context("no bridge program configured; pass --bridge or set bridge_command")?;

    let mut child = tokio::process::Command::new(&bridge)
        .args(&config.bridge_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("failed to spawn bridge: {}", bridge))?;

    let child_stdin = child.stdin.take().context("bridge stdin unavailable")?;
    let child_stdout = child.stdout.take().context("bridge stdout unavailable")?;

    let link = Arc::new(BridgeLink {
        stdin: tokio::sync::Mutex::new(child_stdin),
    });

    // Envelopes from the bridge
    let (envelope_tx, mut envelope_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(child_stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Envelope::from_line(&line) {
                        Ok(envelope) => {
                            if envelope_tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping malformed envelope line");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "bridge stdout read failed");
                    break;
                }
            }
        }
        tracing::debug!("bridge stdout closed");
    });

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiEvent>();
    let mut mux = Multiplexer::new(store, link, ui_tx);

    let project_config = config.project_config();
    for project in &args.project {
        mux.open_project(project, project_config.clone())?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = handle_request(&mut mux, &project_config, &line).await {
                    write_line(
                        &mut stdout,
                        &serde_json::json!({ "type": "error", "message": e.to_string() }),
                    )
                    .await?;
                }
            }
            Some(envelope) = envelope_rx.recv() => {
                mux.route_envelope(envelope);
            }
            Some(event) = ui_rx.recv() => {
                write_line(&mut stdout, &event).await?;
            }
        }
    }

    // Abort everything still running before tearing down the bridge
    let open: Vec<String> = mux.tabs().iter().map(|t| t.path.clone()).collect();
    for path in open {
        if let Err(e) = mux.close_project(&path).await {
            tracing::warn!(project = %path, error = %e, "failed to close project");
        }
    }
    child.kill().await.ok();
    Ok(())
}

async fn handle_request(
    mux: &mut Multiplexer,
    project_config: &parley_multiplex::ProjectConfig,
    line: &str,
) -> anyhow::Result<()> {
    let request: ClientRequest =
        serde_json::from_str(line).context("malformed client request")?;
    match request {
        ClientRequest::OpenProject { path } => {
            mux.open_project(&path, project_config.clone())?;
        }
        ClientRequest::SwitchProject { path } => {
            mux.switch_active(&path)?;
        }
        ClientRequest::CloseProject { path } => {
            mux.close_project(&path).await?;
        }
        ClientRequest::SelectConversation {
            path,
            conversation_id,
        } => {
            mux.select_conversation(&path, &conversation_id).await?;
        }
        ClientRequest::Send { path, text } => {
            mux.start_turn(&path, &text, vec![]).await?;
        }
        ClientRequest::Respond {
            session_id,
            decision,
        } => {
            mux.respond(&session_id, decision).await?;
        }
        ClientRequest::Abort { session_id } => {
            mux.abort(&session_id).await?;
        }
    }
    Ok(())
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> anyhow::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let line = serde_json::to_string(value)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
