//! p2pftp terminal client.
//!
//! Wires a rendezvous handshake (via [`peer_link`]) or an in-process
//! loopback pair into a [`p2pftp_core::session::Session`], then drives an
//! interactive line-based UI: plain input is sent as chat, `/send <path>`
//! starts an outbound transfer, `/quit` closes the session.

mod peer_link;
mod transport;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use p2pftp_core::channel::DuplexChannel;
use p2pftp_core::events::TransferDirection;
use p2pftp_core::session::{Session, SessionCommand, SessionConfig, SessionState};
use p2pftp_core::SessionEvent;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "p2pftp", version, about = "Direct peer-to-peer file transfer and chat")]
struct Cli {
    /// Rendezvous server WebSocket URL.
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws", env = "P2PFTP_RENDEZVOUS_URL")]
    rendezvous_url: String,

    /// Host the peer should dial back on once it accepts our request. This
    /// stand-in transport has no NAT traversal (spec places the real
    /// SDP/ICE substrate out of scope), so this only works when both sides
    /// are directly reachable at this address.
    #[arg(long, default_value = "127.0.0.1", env = "P2PFTP_ADVERTISE_HOST")]
    advertise_host: String,

    /// Directory inbound transfers are written into.
    #[arg(long, default_value = ".", env = "P2PFTP_DOWNLOAD_DIR")]
    download_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for an incoming connection and print the token to share.
    Recv,
    /// Connect to a peer's token and send a file.
    Send {
        peer_token: String,
        file: PathBuf,
    },
    /// Connect to a peer's token and start an interactive chat.
    Chat {
        peer_token: String,
    },
    /// Run a session against itself over an in-process loopback, sending
    /// one file, for exercising the engine without a rendezvous server.
    Loopback {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "p2pftp_cli=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SessionConfig {
        download_dir: cli.download_dir.clone(),
        ..SessionConfig::default()
    };

    match cli.command {
        Command::Recv => {
            let (local_token, link) = peer_link::wait_for_peer(&cli.rendezvous_url).await?;
            println!("waiting on token {local_token}, connected to peer {}", link.peer_token);
            let (session, cmd_tx, events) =
                Session::new(link.local_token, link.peer_token, link.control, link.data, config);
            run_interactive(session, cmd_tx, events).await
        }
        Command::Chat { peer_token } => {
            let link = peer_link::connect_to_peer(&cli.rendezvous_url, &peer_token, &cli.advertise_host).await?;
            let (session, cmd_tx, events) =
                Session::new(link.local_token, link.peer_token, link.control, link.data, config);
            run_interactive(session, cmd_tx, events).await
        }
        Command::Send { peer_token, file } => {
            let link = peer_link::connect_to_peer(&cli.rendezvous_url, &peer_token, &cli.advertise_host).await?;
            let (session, cmd_tx, events) =
                Session::new(link.local_token, link.peer_token, link.control, link.data, config);
            run_send_and_wait(session, cmd_tx, events, file).await
        }
        Command::Loopback { file } => {
            let (ctrl_a, ctrl_b) = DuplexChannel::pair();
            let (data_a, data_b) = DuplexChannel::pair();
            let dir_b = cli.download_dir.clone();

            let (session_a, cmd_a, events_a) =
                Session::new("local".into(), "remote".into(), ctrl_a, data_a, config.clone());
            let (session_b, _cmd_b, events_b) =
                Session::new("remote".into(), "local".into(), ctrl_b, data_b, SessionConfig {
                    download_dir: dir_b,
                    ..config
                });

            tokio::spawn(session_b.run());
            tokio::spawn(print_events("peer", events_b));

            run_send_and_wait(session_a, cmd_a, events_a, file).await
        }
    }
}

/// Drives one session to completion as an outbound file send, waiting for
/// the transfer to finish or fail before returning.
async fn run_send_and_wait(
    session: Session,
    commands: tokio::sync::mpsc::UnboundedSender<SessionCommand>,
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    file: PathBuf,
) -> Result<()> {
    let handle = tokio::spawn(session.run());

    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged { to: SessionState::Ready, .. }) => {
                println!("session ready, sending {}", file.display());
                commands
                    .send(SessionCommand::SendFile(file.clone()))
                    .context("session actor already gone")?;
            }
            Ok(SessionEvent::TransferProgress { direction: TransferDirection::Outbound, chunks_done, total_chunks, .. }) => {
                println!("sent {chunks_done}/{total_chunks} chunks");
            }
            Ok(SessionEvent::TransferCompleted { direction: TransferDirection::Outbound, name }) => {
                println!("transfer of {name} acknowledged complete");
                let _ = commands.send(SessionCommand::Close);
            }
            Ok(SessionEvent::TransferFailed { direction: TransferDirection::Outbound, error }) => {
                anyhow::bail!("transfer failed: {error}");
            }
            Ok(SessionEvent::StateChanged { to: SessionState::Closed, .. }) => break,
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    handle.await.context("session task panicked")?;
    Ok(())
}

/// Drives one session interactively: stdin lines become chat or `/send`
/// commands, session events print to stdout, until `/quit` or the peer
/// disconnects.
async fn run_interactive(
    session: Session,
    commands: tokio::sync::mpsc::UnboundedSender<SessionCommand>,
    events: tokio::sync::broadcast::Receiver<SessionEvent>,
) -> Result<()> {
    let handle = tokio::spawn(session.run());
    let printer = tokio::spawn(print_events("peer", events));

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    println!("type a message and press enter, or /send <path>, or /quit");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            let _ = commands.send(SessionCommand::Close);
            break;
        }
        if let Some(path) = line.strip_prefix("/send ") {
            let _ = commands.send(SessionCommand::SendFile(PathBuf::from(path.trim())));
            continue;
        }
        let _ = commands.send(SessionCommand::SendChat(line.to_string()));
    }

    drop(commands);
    let _ = handle.await;
    printer.abort();
    Ok(())
}

async fn print_events(label: &str, mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::ChatReceived { content }) => println!("{label}: {content}"),
            Ok(SessionEvent::TransferStarted { name, size }) => {
                println!("[{label}] transfer started: {name} ({size} bytes)")
            }
            Ok(SessionEvent::TransferCompleted { name, .. }) => println!("[{label}] transfer complete: {name}"),
            Ok(SessionEvent::TransferFailed { error, .. }) => println!("[{label}] transfer failed: {error}"),
            Ok(SessionEvent::ProtocolError { error, .. }) => println!("[{label}] protocol error: {error}"),
            Ok(SessionEvent::StateChanged { to: SessionState::Closed, .. }) => {
                println!("[{label}] session closed");
                break;
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_send_subcommand() {
        let cli = Cli::parse_from(["p2pftp", "send", "ab12cd34", "/tmp/file.bin"]);
        match cli.command {
            Command::Send { peer_token, file } => {
                assert_eq!(peer_token, "ab12cd34");
                assert_eq!(file, PathBuf::from("/tmp/file.bin"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_loopback_subcommand() {
        let cli = Cli::parse_from(["p2pftp", "loopback", "/tmp/file.bin"]);
        assert!(matches!(cli.command, Command::Loopback { .. }));
    }
}
