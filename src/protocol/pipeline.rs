//! # Frame Pipeline
//!
//! Per-frame decision logic of the relay, kept free of sockets so it can be
//! driven directly by tests.
//!
//! Every inbound frame is de-obfuscated and its opcode inspected:
//! - the version-check request is passed through untouched
//! - the version-check response sets the session's protocol version and
//!   loads the matching keystream table before normal handling
//! - anything else is decoded against the session's protocol version and
//!   handed to the [`Dispatcher`]
//!
//! Failures never escape a frame. Frames that cannot be decoded are forwarded
//! verbatim, except out-of-bounds reads and header-pointing offsets, which
//! drop the frame. A rewritten event that fails to encode is dropped, since
//! its original bytes no longer reflect what the handler wanted sent.

use crate::core::obfuscation::{self, CounterRecovery, KeystreamTable};
use crate::core::packet::{Packet, HEADER_SIZE};
use crate::error::{constants, Result};
use crate::protocol::dispatcher::{Direction, Dispatcher, Verdict};
use crate::protocol::event::Event;
use crate::protocol::registry::{Identifier, ProtocolRegistry, SchemaVersion};
use crate::protocol::session::SessionContext;
use crate::protocol::version::{detect_version, VERSION_CHECK_REQUEST, VERSION_CHECK_RESPONSE};
use crate::utils::metrics::global_metrics;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lifecycle of one client/server pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No protocol version known yet
    Unresolved,
    /// Version known, nothing decoded yet
    VersionKnown,
    /// At least one message decoded
    Active,
    Closed,
}

/// Per-connection state threaded through [`Pipeline::process`]
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    listener: String,
    state: ConnectionState,
    /// Last counter recovered from a client frame; fallback when recovery fails
    last_client_counter: u8,
}

impl ConnectionContext {
    pub fn new(listener: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            state: ConnectionState::Unresolved,
            last_client_counter: 0,
        }
    }

    pub fn listener(&self) -> &str {
        &self.listener
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_client_counter(&self) -> u8 {
        self.last_client_counter
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    fn advance(&mut self, to: ConnectionState) {
        if self.state != to && self.state != ConnectionState::Closed {
            debug!(listener = %self.listener, from = ?self.state, ?to, "Connection state");
            self.state = to;
        }
    }
}

/// Outcome of one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameAction {
    /// Send these bytes (the inbound frame, unmodified)
    Forward(Bytes),
    /// Send these re-encoded bytes
    Rewritten(Bytes),
    /// Send nothing
    Drop,
}

impl FrameAction {
    /// Bytes to write to the opposite peer, if any
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            FrameAction::Forward(b) | FrameAction::Rewritten(b) => Some(b),
            FrameAction::Drop => None,
        }
    }
}

/// Shared per-service decode, dispatch and re-encode machinery
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: Arc<ProtocolRegistry>,
    session: Arc<SessionContext>,
    dispatcher: Arc<Dispatcher>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<ProtocolRegistry>,
        session: Arc<SessionContext>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            registry,
            session,
            dispatcher,
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    /// Same registry and session, different handlers
    pub fn with_dispatcher(&self, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            session: Arc::clone(&self.session),
            dispatcher,
        }
    }

    /// Decide what to send for one complete inbound frame
    pub fn process(
        &self,
        direction: Direction,
        frame: Bytes,
        ctx: &mut ConnectionContext,
    ) -> FrameAction {
        let metrics = global_metrics();
        metrics.frame_received(direction, frame.len() as u64);
        trace!(listener = %ctx.listener, %direction, frame = ?frame.as_ref(), "Frame");

        let action = self.decide(direction, &frame, ctx);
        match &action {
            FrameAction::Forward(b) => {
                metrics.frame_forwarded();
                metrics.bytes_written(b.len() as u64);
            }
            FrameAction::Rewritten(b) => {
                metrics.frame_rewritten();
                metrics.bytes_written(b.len() as u64);
            }
            FrameAction::Drop => metrics.frame_dropped(),
        }
        action
    }

    fn decode(
        &self,
        direction: Direction,
        frame: &[u8],
        table: Option<&KeystreamTable>,
        ctx: &mut ConnectionContext,
    ) -> Result<Packet> {
        match direction {
            Direction::FromServer => obfuscation::from_server(frame, table),
            Direction::FromClient => {
                let (packet, recovery) =
                    obfuscation::from_client(frame, table, ctx.last_client_counter)?;
                match recovery {
                    CounterRecovery::Recovered(counter) => ctx.last_client_counter = counter,
                    CounterRecovery::Fallback(_) => global_metrics().counter_miss(),
                    CounterRecovery::NotObfuscated => {}
                }
                Ok(packet)
            }
        }
    }

    fn decide(
        &self,
        direction: Direction,
        frame: &Bytes,
        ctx: &mut ConnectionContext,
    ) -> FrameAction {
        let forward = || FrameAction::Forward(frame.clone());
        let table = self.session.keystream();

        let packet = match self.decode(direction, frame, table.as_deref(), ctx) {
            Ok(packet) => packet,
            Err(e) => {
                global_metrics().decode_error();
                warn!(
                    listener = %ctx.listener,
                    %direction,
                    error = %e,
                    "Failed to de-obfuscate frame"
                );
                return forward();
            }
        };

        match packet.id {
            VERSION_CHECK_REQUEST => return forward(),
            VERSION_CHECK_RESPONSE => self.resolve_version(&packet, ctx),
            _ => {}
        }

        let Some(protocol_version) = self.session.protocol_version() else {
            warn!(
                listener = %ctx.listener,
                opcode = packet.id,
                "{}",
                constants::ERR_MISSING_PROTOCOL_VERSION
            );
            return forward();
        };
        if ctx.state == ConnectionState::Unresolved {
            ctx.advance(ConnectionState::VersionKnown);
        }

        let name = match self.registry.message_name(protocol_version, packet.id) {
            Ok(Some(name)) => name,
            Ok(None) => {
                debug!(
                    listener = %ctx.listener,
                    protocol_version,
                    opcode = packet.id,
                    "Missing opcode"
                );
                return forward();
            }
            Err(e) => {
                warn!(listener = %ctx.listener, error = %e, "Cannot resolve opcode");
                return forward();
            }
        };

        let plaintext = packet.to_bytes();
        let event = match self.registry.parse_frame(
            protocol_version,
            Identifier::Opcode(packet.id),
            SchemaVersion::Latest,
            &plaintext,
        ) {
            Ok(event) => event,
            Err(e) => {
                global_metrics().decode_error();
                warn!(listener = %ctx.listener, name, error = %e, "Failed to parse message");
                return if e.drops_frame() {
                    FrameAction::Drop
                } else {
                    forward()
                };
            }
        };
        ctx.advance(ConnectionState::Active);
        debug!(listener = %ctx.listener, %direction, name, %event, "Message");

        let verdict = match self.dispatcher.dispatch(name, &event, direction) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(listener = %ctx.listener, name, error = %e, "Dispatch failed");
                return forward();
            }
        };

        match verdict {
            Verdict::Drop => FrameAction::Drop,
            Verdict::Forward => forward(),
            Verdict::Rewrite(event) => {
                match self.reencode(direction, &packet, protocol_version, &event) {
                    Ok(bytes) => FrameAction::Rewritten(bytes),
                    Err(e) => {
                        global_metrics().encode_error();
                        warn!(
                            listener = %ctx.listener,
                            name,
                            error = %e,
                            "Failed to re-encode message, dropping"
                        );
                        FrameAction::Drop
                    }
                }
            }
        }
    }

    fn resolve_version(&self, packet: &Packet, ctx: &mut ConnectionContext) {
        match detect_version(&packet.to_bytes()) {
            Ok(Some(version)) => {
                info!(
                    listener = %ctx.listener,
                    protocol_version = version,
                    "Detected protocol version"
                );
                if let Err(e) = self.session.resolve(version) {
                    warn!(listener = %ctx.listener, error = %e, "Failed to load keystream table");
                }
                ctx.advance(ConnectionState::VersionKnown);
            }
            Ok(None) => warn!(listener = %ctx.listener, "Version string has no version marker"),
            Err(e) => warn!(listener = %ctx.listener, error = %e, "Failed to read version string"),
        }
    }

    fn reencode(
        &self,
        direction: Direction,
        packet: &Packet,
        protocol_version: u32,
        event: &Event,
    ) -> Result<Bytes> {
        let written = self.registry.write(
            protocol_version,
            Identifier::Opcode(packet.id),
            SchemaVersion::Latest,
            event,
        )?;
        let payload = &written[HEADER_SIZE..];
        let table = self.session.keystream();
        match direction {
            Direction::FromClient => {
                obfuscation::to_server(payload, packet.obfuscation, packet.id, table.as_deref())
            }
            Direction::FromServer => {
                obfuscation::to_client(payload, packet.obfuscation, packet.id, table.as_deref())
            }
        }
    }
}
