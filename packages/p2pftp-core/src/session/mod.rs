//! # Session State Machine
//!
//! Binds a control [`Channel`] and a data `Channel` into one session
//! lifecycle (spec §4.3), sequences the capability handshake before any
//! transfer, and owns at most one outbound and one inbound
//! [`crate::transfer::Transfer`]. [`Session::run`] is the single logical
//! actor (spec §5): every mutation of session/transfer state happens on
//! this one task, driven by a `tokio::select!` loop in the same shape as
//! the teacher's network event loop — command queue, substrate events, and
//! timers folded into one `select!`, with a broadcast channel fanning
//! state out to the application.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

use crate::channel::Channel;
use crate::control::{self, ControlMessage, FileMetadata};
use crate::error::{Error, Result};
use crate::events::{SessionEvent, TransferDirection};
use crate::frame;
use crate::speed::SpeedTracker;
use crate::time::now_timestamp_millis;
use crate::transfer::receiver::{CompletionOutcome, FrameOutcome, Receiver};
use crate::transfer::sender::{ConfirmOutcome, Sender};
use crate::transfer::{clamp_chunk_size, MAX_CHUNK_SIZE};

/// Outstanding bytes on the data channel above which the sender pauses new
/// emissions (spec §4.4 "Backpressure").
const HIGH_WATER_BYTES: usize = 256 * 1024;
/// Largest datagram the framing codec will produce for one chunk.
const MAX_MESSAGE_SIZE: usize = frame::HEADER_LEN + MAX_CHUNK_SIZE as usize;

/// A session's lifecycle state (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    ChannelsOpening,
    Negotiating,
    Ready,
    Closing,
    Closed,
}

/// Tunables that default to the values spec §4/§6 suggest.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The `maxChunkSize` this side advertises in `capabilities`.
    pub local_max_chunk_size: u32,
    /// Sliding-window size, in chunks.
    pub window_size: u32,
    /// How long `Negotiating` may run before `HandshakeTimeout`.
    pub handshake_timeout_ms: i64,
    /// Interval between retransmit-queue scans.
    pub retransmit_tick_ms: u64,
    /// How long an unacked chunk may go before being re-queued.
    pub retransmit_interval_ms: i64,
    /// Interval between receiver gap scans.
    pub gap_scan_tick_ms: u64,
    /// Directory inbound transfers are written into.
    pub download_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_max_chunk_size: MAX_CHUNK_SIZE,
            window_size: crate::transfer::DEFAULT_WINDOW_SIZE,
            handshake_timeout_ms: 5_000,
            retransmit_tick_ms: 1_000,
            retransmit_interval_ms: 3_000,
            gap_scan_tick_ms: 1_000,
            download_dir: PathBuf::from("."),
        }
    }
}

/// A request from the application to the running session actor.
#[derive(Debug)]
pub enum SessionCommand {
    /// Send one chat line.
    SendChat(String),
    /// Begin an outbound transfer of the file at this path.
    SendFile(PathBuf),
    /// Tear the session down.
    Close,
}

/// The session actor (spec §3 `Session`, §4.3 state machine).
pub struct Session {
    local_token: String,
    peer_token: String,
    control: Arc<dyn Channel>,
    data: Arc<dyn Channel>,
    config: SessionConfig,
    state: SessionState,

    sent_capabilities: bool,
    sent_ack: bool,
    received_ack: bool,
    peer_max_chunk_size: Option<u32>,
    effective_chunk_size: Option<u32>,

    outbound: Option<Sender>,
    inbound: Option<Receiver>,
    outbound_speed: SpeedTracker,
    inbound_speed: SpeedTracker,
    inbound_last_frame_ms: Option<i64>,

    events: broadcast::Sender<SessionEvent>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl Session {
    /// Builds a session bound to `control`/`data`, returning the command
    /// handle and event subscription the application drives it with.
    pub fn new(
        local_token: String,
        peer_token: String,
        control: Arc<dyn Channel>,
        data: Arc<dyn Channel>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedSender<SessionCommand>, broadcast::Receiver<SessionEvent>) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, event_rx) = broadcast::channel(256);
        let session = Self {
            local_token,
            peer_token,
            control,
            data,
            config,
            state: SessionState::Init,
            sent_capabilities: false,
            sent_ack: false,
            received_ack: false,
            peer_max_chunk_size: None,
            effective_chunk_size: None,
            outbound: None,
            inbound: None,
            outbound_speed: SpeedTracker::default(),
            inbound_speed: SpeedTracker::default(),
            inbound_last_frame_ms: None,
            events,
            commands,
        };
        (session, command_tx, event_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_token(&self) -> &str {
        &self.local_token
    }

    pub fn peer_token(&self) -> &str {
        &self.peer_token
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        let _ = self.events.send(SessionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Drives the session to completion. Consumes `self`: once this
    /// returns, the session is `Closed`.
    pub async fn run(mut self) {
        self.transition(SessionState::ChannelsOpening);
        if self.control.is_open() && self.data.is_open() {
            self.transition(SessionState::Negotiating);
            if let Err(e) = self.send_capabilities().await {
                self.abort("control channel closed before handshake", e).await;
                return;
            }
        } else {
            self.abort_without_transfers(Error::ConnectionLost(
                "channel not open at session start".into(),
            ))
            .await;
            return;
        }

        let mut retransmit_tick = tokio::time::interval(Duration::from_millis(self.config.retransmit_tick_ms));
        let mut gap_scan_tick = tokio::time::interval(Duration::from_millis(self.config.gap_scan_tick_ms));
        let handshake_deadline = tokio::time::sleep(Duration::from_millis(self.config.handshake_timeout_ms as u64));
        tokio::pin!(handshake_deadline);

        loop {
            if self.state == SessionState::Closed {
                break;
            }

            tokio::select! {
                maybe_cmd = self.commands.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => self.begin_closing("application dropped the command handle").await,
                    }
                }

                maybe_bytes = self.control.recv() => {
                    match maybe_bytes {
                        Some(bytes) => self.handle_control_bytes(&bytes).await,
                        None => self.begin_closing("control channel closed").await,
                    }
                }

                maybe_bytes = self.data.recv() => {
                    match maybe_bytes {
                        Some(bytes) => self.handle_data_frame(&bytes).await,
                        None => self.begin_closing("data channel closed").await,
                    }
                }

                _ = retransmit_tick.tick() => {
                    self.on_retransmit_tick().await;
                }

                _ = gap_scan_tick.tick() => {
                    self.on_gap_scan().await;
                }

                _ = &mut handshake_deadline, if matches!(self.state, SessionState::ChannelsOpening | SessionState::Negotiating) => {
                    self.emit(SessionEvent::ProtocolError {
                        error: Error::HandshakeTimeout.to_string(),
                        recoverable: false,
                    });
                    self.begin_closing("handshake timed out").await;
                }
            }

            if self.state == SessionState::Closing {
                self.transition(SessionState::Closed);
            }
        }
    }

    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    async fn send_capabilities(&mut self) -> Result<()> {
        self.send_control(ControlMessage::Capabilities {
            max_chunk_size: clamp_chunk_size(self.config.local_max_chunk_size),
        })
        .await?;
        self.sent_capabilities = true;
        Ok(())
    }

    fn maybe_enter_ready(&mut self) {
        if self.state == SessionState::Negotiating && self.sent_ack && self.received_ack {
            self.transition(SessionState::Ready);
        }
    }

    // ------------------------------------------------------------------
    // Control channel
    // ------------------------------------------------------------------

    async fn handle_control_bytes(&mut self, bytes: &Bytes) {
        let text = match std::str::from_utf8(bytes) {
            Ok(t) => t,
            Err(_) => {
                self.emit(SessionEvent::ProtocolError {
                    error: "control message was not valid UTF-8".into(),
                    recoverable: true,
                });
                return;
            }
        };
        let message = match control::parse(text) {
            Ok(m) => m,
            Err(e) => {
                self.emit(SessionEvent::ProtocolError {
                    error: e.to_string(),
                    recoverable: true,
                });
                return;
            }
        };
        self.handle_control_message(message).await;
    }

    async fn handle_control_message(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Capabilities { max_chunk_size } => {
                self.peer_max_chunk_size = Some(max_chunk_size);
                let effective = clamp_chunk_size(
                    clamp_chunk_size(self.config.local_max_chunk_size).min(clamp_chunk_size(max_chunk_size)),
                );
                self.effective_chunk_size = Some(effective);
                if !self.sent_capabilities {
                    let _ = self.send_capabilities().await;
                }
                let _ = self
                    .send_control(ControlMessage::CapabilitiesAck {
                        negotiated_chunk_size: effective,
                    })
                    .await;
                self.sent_ack = true;
                self.maybe_enter_ready();
            }
            ControlMessage::CapabilitiesAck { negotiated_chunk_size } => {
                self.effective_chunk_size = Some(negotiated_chunk_size);
                self.received_ack = true;
                self.maybe_enter_ready();
            }
            ControlMessage::Message { content } => {
                self.emit(SessionEvent::ChatReceived { content });
            }
            ControlMessage::FileInfo { info } => self.handle_file_info(info).await,
            ControlMessage::ChunkInfo { .. } => {
                // Advisory only (spec §4.2/§4.5 step 3): the receiver derives
                // sequence and length from the frame header itself.
            }
            ControlMessage::ChunkConfirm { sequence } => self.handle_chunk_confirm(sequence).await,
            ControlMessage::RequestChunks { sequences } => self.handle_request_chunks(sequences).await,
            ControlMessage::FileComplete {} => self.handle_file_complete().await,
            ControlMessage::Unknown(tag) => {
                tracing::debug!(tag = %tag, "ignoring unrecognized control message type");
            }
        }
    }

    async fn handle_file_info(&mut self, info: FileMetadata) {
        if self.state != SessionState::Ready {
            return;
        }
        if self.inbound.is_some() {
            self.emit(SessionEvent::ProtocolError {
                error: Error::AlreadyInProgress.to_string(),
                recoverable: true,
            });
            return;
        }
        let chunk_size = self.effective_chunk_size.unwrap_or(self.config.local_max_chunk_size);
        let dir = self.config.download_dir.clone();
        match Receiver::create(&dir, info.clone(), chunk_size) {
            Ok(receiver) => {
                self.emit(SessionEvent::TransferStarted {
                    name: info.name,
                    size: info.size,
                });
                self.inbound = Some(receiver);
            }
            Err(e) => {
                self.emit(SessionEvent::ProtocolError {
                    error: e.to_string(),
                    recoverable: true,
                });
            }
        }
    }

    async fn handle_chunk_confirm(&mut self, sequence: u32) {
        let Some(sender) = self.outbound.as_mut() else {
            return;
        };
        let total_chunks = sender.total_chunks;
        let sent_at = sender.unacked.get(&sequence).copied();
        match sender.on_confirm(sequence) {
            ConfirmOutcome::Advanced => {
                if let Some(sent_at) = sent_at {
                    let elapsed = (now_timestamp_millis() - sent_at).max(0) as u64;
                    self.outbound_speed.record(sender.effective_chunk_size as usize, elapsed);
                }
                let (chunks_done, bytes_done, size) =
                    (sender.last_acked.max(-1) as i64 + 1, 0u64, sender.metadata.size);
                self.emit(SessionEvent::TransferProgress {
                    direction: TransferDirection::Outbound,
                    chunks_done: chunks_done as u32,
                    total_chunks,
                    bytes_done,
                    total_bytes: size,
                    speed_bps: self.outbound_speed.speed_bps(),
                });
            }
            ConfirmOutcome::Idempotent | ConfirmOutcome::Discarded => {}
        }
        if self.outbound.as_ref().map(|s| s.is_complete()).unwrap_or(false) {
            let _ = self.send_control(ControlMessage::FileComplete {}).await;
        }
        self.pump_sender().await;
    }

    async fn handle_request_chunks(&mut self, sequences: Vec<u32>) {
        if let Some(sender) = self.outbound.as_mut() {
            sender.on_request_chunks(&sequences);
        }
        self.pump_sender().await;
    }

    async fn handle_file_complete(&mut self) {
        let Some(mut receiver) = self.inbound.take() else {
            return;
        };
        let outcome = receiver.on_file_complete();
        match outcome {
            Ok(CompletionOutcome::Verified) => {
                self.emit(SessionEvent::TransferCompleted {
                    direction: TransferDirection::Inbound,
                    name: receiver.metadata.name.clone(),
                });
            }
            Ok(CompletionOutcome::IntegrityFailed { computed_md5 }) => {
                self.emit(SessionEvent::TransferFailed {
                    direction: TransferDirection::Inbound,
                    error: format!(
                        "integrity check failed: expected {}, computed {computed_md5}",
                        receiver.metadata.md5
                    ),
                });
            }
            Ok(CompletionOutcome::StillMissing(missing)) => {
                let _ = self
                    .send_control(ControlMessage::RequestChunks { sequences: missing })
                    .await;
                self.inbound = Some(receiver);
            }
            Err(e) => {
                self.emit(SessionEvent::ProtocolError {
                    error: e.to_string(),
                    recoverable: true,
                });
                self.inbound = Some(receiver);
            }
        }
    }

    // ------------------------------------------------------------------
    // Data channel
    // ------------------------------------------------------------------

    async fn handle_data_frame(&mut self, bytes: &Bytes) {
        let (seq, payload) = match frame::decode(bytes) {
            Ok(pair) => pair,
            Err(e) => {
                self.emit(SessionEvent::ProtocolError {
                    error: e.to_string(),
                    recoverable: true,
                });
                return;
            }
        };

        let Some(receiver) = self.inbound.as_mut() else {
            self.emit(SessionEvent::ProtocolError {
                error: Error::UnexpectedChunk.to_string(),
                recoverable: true,
            });
            return;
        };

        match receiver.on_frame(seq, &payload) {
            Ok(outcome @ (FrameOutcome::Written | FrameOutcome::Duplicate)) => {
                let received = receiver.received.len() as u32;
                let total_chunks = receiver.total_chunks;
                let bytes_done = receiver.received_bytes;
                let total_bytes = receiver.metadata.size;

                let now = now_timestamp_millis();
                if matches!(outcome, FrameOutcome::Written) {
                    if let Some(last) = self.inbound_last_frame_ms {
                        self.inbound_speed.record(payload.len(), (now - last).max(0) as u64);
                    }
                    self.inbound_last_frame_ms = Some(now);
                }

                let _ = self.send_control(ControlMessage::ChunkConfirm { sequence: seq }).await;
                self.emit(SessionEvent::TransferProgress {
                    direction: TransferDirection::Inbound,
                    chunks_done: received,
                    total_chunks,
                    bytes_done,
                    total_bytes,
                    speed_bps: self.inbound_speed.speed_bps(),
                });
            }
            Err(e) => {
                self.emit(SessionEvent::ProtocolError {
                    error: e.to_string(),
                    recoverable: true,
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Application commands
    // ------------------------------------------------------------------

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SendChat(text) => {
                if self.state == SessionState::Ready {
                    let _ = self
                        .send_control(crate::chat::chat_message(text))
                        .await;
                }
            }
            SessionCommand::SendFile(path) => self.begin_outbound_transfer(path).await,
            SessionCommand::Close => self.begin_closing("application requested close").await,
        }
    }

    async fn begin_outbound_transfer(&mut self, path: PathBuf) {
        if self.state != SessionState::Ready {
            return;
        }
        if self.outbound.is_some() {
            self.emit(SessionEvent::ProtocolError {
                error: Error::AlreadyInProgress.to_string(),
                recoverable: true,
            });
            return;
        }
        let chunk_size = self.effective_chunk_size.unwrap_or(self.config.local_max_chunk_size);
        let result = tokio::task::spawn_blocking(move || Sender::open(&path, chunk_size)).await;
        match result {
            Ok(Ok(sender)) => {
                self.emit(SessionEvent::TransferStarted {
                    name: sender.metadata.name.clone(),
                    size: sender.metadata.size,
                });
                let _ = self.send_control(ControlMessage::FileInfo { info: sender.metadata.clone() }).await;
                self.outbound = Some(sender);
                self.pump_sender().await;
            }
            Ok(Err(e)) => {
                self.emit(SessionEvent::TransferFailed {
                    direction: TransferDirection::Outbound,
                    error: e.to_string(),
                });
            }
            Err(join_err) => {
                self.emit(SessionEvent::TransferFailed {
                    direction: TransferDirection::Outbound,
                    error: join_err.to_string(),
                });
            }
        }
    }

    /// Drains as much of the sender's send loop as the window and
    /// substrate backpressure presently allow (spec §4.4 steps 4-6).
    async fn pump_sender(&mut self) {
        loop {
            if self.data.buffered_outbound() > HIGH_WATER_BYTES {
                break;
            }
            let Some(sender) = self.outbound.as_mut() else {
                break;
            };
            let Some(seq) = sender.next_send_candidate() else {
                break;
            };
            let total_chunks = sender.total_chunks;
            let chunk = match sender.read_chunk(seq) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.emit(SessionEvent::TransferFailed {
                        direction: TransferDirection::Outbound,
                        error: e.to_string(),
                    });
                    self.outbound = None;
                    break;
                }
            };
            let datagram = match frame::encode(seq, &chunk, MAX_MESSAGE_SIZE) {
                Ok(d) => d,
                Err(e) => {
                    self.emit(SessionEvent::ProtocolError { error: e.to_string(), recoverable: true });
                    break;
                }
            };
            if let Err(e) = self.data.send(datagram) {
                self.emit(SessionEvent::TransferFailed {
                    direction: TransferDirection::Outbound,
                    error: e.to_string(),
                });
                self.outbound = None;
                break;
            }
            let _ = self
                .send_control(ControlMessage::ChunkInfo {
                    sequence: seq,
                    total_chunks,
                    size: chunk.len() as u32,
                })
                .await;
            let now = now_timestamp_millis();
            if let Some(sender) = self.outbound.as_mut() {
                sender.mark_sent(seq, now);
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    async fn on_retransmit_tick(&mut self) {
        let now = now_timestamp_millis();
        if let Some(sender) = self.outbound.as_mut() {
            sender.on_retransmit_tick(now, self.config.retransmit_interval_ms);
        }
        self.pump_sender().await;
    }

    async fn on_gap_scan(&mut self) {
        let Some(missing) = self.inbound.as_mut().and_then(|r| r.gap_scan()) else {
            return;
        };
        let _ = self.send_control(ControlMessage::RequestChunks { sequences: missing }).await;
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    async fn begin_closing(&mut self, reason: &str) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        if self.outbound.take().is_some() {
            self.emit(SessionEvent::TransferFailed {
                direction: TransferDirection::Outbound,
                error: reason.to_string(),
            });
        }
        if self.inbound.take().is_some() {
            self.emit(SessionEvent::TransferFailed {
                direction: TransferDirection::Inbound,
                error: reason.to_string(),
            });
        }
        self.transition(SessionState::Closing);
    }

    async fn abort(&mut self, reason: &str, error: Error) {
        self.emit(SessionEvent::ProtocolError {
            error: error.to_string(),
            recoverable: false,
        });
        self.begin_closing(reason).await;
        self.transition(SessionState::Closed);
    }

    async fn abort_without_transfers(&mut self, error: Error) {
        self.emit(SessionEvent::ProtocolError {
            error: error.to_string(),
            recoverable: false,
        });
        self.transition(SessionState::Closing);
        self.transition(SessionState::Closed);
    }

    async fn send_control(&self, message: ControlMessage) -> Result<()> {
        let text = control::encode(&message)?;
        self.control.send(Bytes::from(text.into_bytes()))
    }
}
