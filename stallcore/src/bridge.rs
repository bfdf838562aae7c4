//! A bridge pairs one client socket with one upstream gate socket and pumps
//! frames between them, inspecting the handful of commands the relay cares
//! about. The gate leg can outlive the client leg: that is an offline stall.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Poll, PollOpt, Ready, Token};
use slog::{debug, info, warn, Logger};

use crate::buf::ring::DEFAULT_CAPACITY;
use crate::buf::{Anchor, ByteRing, ScratchBuffer};
use crate::crypt::{bcipher, NoiseKey};
use crate::handler::{Direction, HandlerRegistry};
use crate::proto::{self, Payload, PING_LEN};
use crate::server::ServerCtx;
use crate::session::PlayerSession;
use crate::support::{lower_case, ErrorKind, RelayError, RelayResult};

/// Largest frame the relay will stage for inspection.
pub const MAX_FRAME: usize = DEFAULT_CAPACITY;

/// Each direction buffers up to four maximum-size frames.
const RING_CAPACITY: usize = 4 * MAX_FRAME;

/// How long an unauthorized client may keep its relay alive.
const AUTH_GRACE: Duration = Duration::from_millis(2048);

/// Token 0 belongs to the listener; bridge tokens start here.
pub const FIRST_BRIDGE_TOKEN: usize = 1;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Side {
    Game,
    Gate,
}

impl Side {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Side::Game => 0,
            Side::Gate => 1,
        }
    }

    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Game => Side::Gate,
            Side::Gate => Side::Game,
        }
    }

    /// Traffic read from this side flows in this direction.
    #[inline]
    pub fn direction(self) -> Direction {
        match self {
            Side::Game => Direction::ClientToGate,
            Side::Gate => Direction::GateToClient,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Side::Game => "game",
            Side::Gate => "gate",
        }
    }
}

#[inline]
pub fn token(slot: usize, side: Side) -> Token {
    Token(FIRST_BRIDGE_TOKEN + slot * 2 + side.index())
}

#[inline]
pub fn slot_side(token: Token) -> (usize, Side) {
    let raw = token.0 - FIRST_BRIDGE_TOKEN;
    let side = if raw % 2 == 0 { Side::Game } else { Side::Gate };
    (raw / 2, side)
}

/// One leg of a bridge: a socket, its buffered traffic and the noise key
/// state for frames moving toward this endpoint.
struct Endpoint {
    side: Side,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    connected: bool,
    registered: bool,
    recv: ByteRing,
    send: ByteRing,
    frames: u64,
    recv_key: NoiseKey,
    send_key: NoiseKey,
}

impl Endpoint {
    fn new(side: Side) -> Endpoint {
        Endpoint {
            side,
            stream: None,
            peer: None,
            connected: false,
            registered: false,
            recv: ByteRing::new(RING_CAPACITY),
            send: ByteRing::new(RING_CAPACITY),
            frames: 0,
            recv_key: NoiseKey::default(),
            send_key: NoiseKey::default(),
        }
    }

    /// Refresh poll registration to match the current state: a pending gate
    /// connect waits for writable, a connected leg always reads and writes
    /// whenever its send ring holds data.
    fn rearm(&mut self, poll: &Poll, slot: usize) -> RelayResult<()> {
        let stream = match &self.stream {
            Some(stream) => stream,
            None => return Ok(()),
        };

        let ready = if self.connected {
            let mut ready = Ready::readable();
            if self.send.readable_len() > 0 {
                ready |= Ready::writable();
            }
            ready
        } else {
            Ready::writable()
        };

        let opts = PollOpt::edge() | PollOpt::oneshot();
        let token = token(slot, self.side);

        if self.registered {
            poll.reregister(stream, token, ready, opts)?;
        } else {
            poll.register(stream, token, ready, opts)?;
            self.registered = true;
        }

        Ok(())
    }

    fn close(&mut self, poll: &Poll) {
        if let Some(stream) = self.stream.take() {
            let _ = poll.deregister(&stream);
            let _ = stream.shutdown(Shutdown::Both);
        }

        self.connected = false;
        self.registered = false;
    }

    fn reset(&mut self) {
        self.stream = None;
        self.peer = None;
        self.connected = false;
        self.registered = false;
        self.recv.clear();
        self.send.clear();
        self.frames = 0;
        self.recv_key = NoiseKey::default();
        self.send_key = NoiseKey::default();
    }
}

/// Disjoint borrows of the fields the frame pump juggles.
struct Split<'a> {
    from: &'a mut Endpoint,
    to: &'a mut Endpoint,
    in_buf: &'a mut ScratchBuffer,
    session: &'a mut PlayerSession,
}

pub struct Bridge {
    slot: usize,
    worker: usize,
    opened: bool,
    log: Logger,
    game: Endpoint,
    gate: Endpoint,
    in_buf: ScratchBuffer,
    out_buf: ScratchBuffer,
    pub session: PlayerSession,
    auth_deadline: Option<Instant>,
    trade_deadline: Option<Instant>,
}

impl Bridge {
    pub fn new(slot: usize, log: Logger) -> Bridge {
        Bridge {
            slot,
            worker: 0,
            opened: false,
            log,
            game: Endpoint::new(Side::Game),
            gate: Endpoint::new(Side::Gate),
            in_buf: ScratchBuffer::new(MAX_FRAME),
            out_buf: ScratchBuffer::new(MAX_FRAME),
            session: PlayerSession::default(),
            auth_deadline: None,
            trade_deadline: None,
        }
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn worker(&self) -> usize {
        self.worker
    }

    #[inline]
    pub fn log(&self) -> &Logger {
        &self.log
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.opened
    }

    /// Both legs are gone but the slot has not been reclaimed yet.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.opened && self.game.stream.is_none() && self.gate.stream.is_none()
    }

    #[inline]
    pub fn game_connected(&self) -> bool {
        self.game.connected
    }

    #[inline]
    pub fn gate_connected(&self) -> bool {
        self.gate.connected
    }

    /// Client address; survives the client leg closing so offline stalls
    /// still count against their IP.
    #[inline]
    pub fn game_ip(&self) -> Option<IpAddr> {
        self.game.peer.map(|addr| addr.ip())
    }

    #[inline]
    fn endpoint_mut(&mut self, side: Side) -> &mut Endpoint {
        match side {
            Side::Game => &mut self.game,
            Side::Gate => &mut self.gate,
        }
    }

    fn split(&mut self, side: Side) -> Split<'_> {
        let Bridge {
            game,
            gate,
            in_buf,
            session,
            ..
        } = self;

        let (from, to) = match side {
            Side::Game => (game, gate),
            Side::Gate => (gate, game),
        };

        Split {
            from,
            to,
            in_buf,
            session,
        }
    }

    /// Attach an accepted client and dial the gate. The gate socket arms for
    /// writable; traffic starts flowing once the connect completes.
    pub fn open(
        &mut self,
        ctx: &ServerCtx,
        worker: usize,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> RelayResult<()> {
        self.worker = worker;
        self.opened = true;
        self.game.stream = Some(stream);
        self.game.peer = Some(peer);
        self.game.connected = true;

        let gate_stream = TcpStream::connect(&ctx.gate_addr)?;
        self.gate.peer = Some(ctx.gate_addr);
        self.gate.stream = Some(gate_stream);
        self.gate.rearm(ctx.poll(worker), self.slot)?;

        debug!(self.log, "client accepted"; "peer" => %peer, "worker" => worker);
        Ok(())
    }

    /// The pending gate connect resolved; verify it and start reading on
    /// both legs.
    pub fn on_connect(&mut self, ctx: &ServerCtx) -> RelayResult<()> {
        if let Some(stream) = &self.gate.stream {
            if let Some(io_error) = stream.take_error()? {
                return Err(io_error.into());
            }
        }

        self.gate.connected = true;
        self.auth_deadline = Some(Instant::now() + AUTH_GRACE);

        let poll = ctx.poll(self.worker);
        self.game.rearm(poll, self.slot)?;
        self.gate.rearm(poll, self.slot)?;

        info!(self.log, "relay established";
            "client" => ?self.game.peer, "gate" => ?self.gate.peer);
        Ok(())
    }

    /// All four noise key states start from the same seed.
    pub fn seed_noise_keys(&mut self, key: NoiseKey) {
        self.game.recv_key = key;
        self.game.send_key = key;
        self.gate.recv_key = key;
        self.gate.send_key = key;
    }

    pub fn on_read(
        &mut self,
        side: Side,
        ctx: &ServerCtx,
        registry: &mut HandlerRegistry,
    ) -> RelayResult<()> {
        self.drain_socket(side)?;
        self.pump_frames(side, ctx, registry)?;

        let poll = ctx.poll(self.worker);
        self.game.rearm(poll, self.slot)?;
        self.gate.rearm(poll, self.slot)?;
        Ok(())
    }

    fn drain_socket(&mut self, side: Side) -> RelayResult<()> {
        let ep = self.endpoint_mut(side);
        let mut tmp = [0u8; MAX_FRAME];

        loop {
            let stream = match ep.stream.as_mut() {
                Some(stream) => stream,
                None => return Ok(()),
            };

            match stream.read(&mut tmp) {
                Ok(0) => return Err(RelayError::Fatal(ErrorKind::Closed)),
                Ok(count) => ep.recv.write(&tmp[..count])?,
                Err(ref io_error) if io_error.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(());
                }
                Err(io_error) => return Err(io_error.into()),
            }
        }
    }

    /// Consume complete frames from the receive ring: validate, decrypt,
    /// inspect, re-encrypt and forward. An incomplete tail frame is rolled
    /// back and waits for more bytes.
    fn pump_frames(
        &mut self,
        side: Side,
        ctx: &ServerCtx,
        registry: &mut HandlerRegistry,
    ) -> RelayResult<()> {
        loop {
            let frame_len = {
                let parts = self.split(side);
                if !parts.from.recv.can_read(2) {
                    break;
                }
                parts.from.recv.read_u16()? as usize
            };

            if !proto::is_valid_frame_len(frame_len) || frame_len > MAX_FRAME {
                return Err(RelayError::Fatal(ErrorKind::MalformedFrame));
            }

            {
                let parts = self.split(side);
                if !parts.from.recv.can_read(frame_len - 2) {
                    parts.from.recv.rollback();
                    break;
                }
            }

            // Frames inside one pump run all use the state the frame was
            // sent under; a login result enabling encryption only affects
            // frames received after it.
            let encrypted = self.session.encrypted;
            let mut pass = true;

            if frame_len > PING_LEN {
                let command = {
                    let parts = self.split(side);
                    parts.from.recv.rollback();
                    parts.in_buf.clear();

                    let mut tmp = [0u8; MAX_FRAME];
                    parts.from.recv.read(&mut tmp[..frame_len])?;
                    parts.in_buf.write(&tmp[..frame_len])?;

                    if encrypted {
                        let key_state = &mut parts.to.recv_key;
                        let session = &*parts.session;
                        parts.in_buf.apply(6, frame_len, |region| {
                            bcipher::decrypt(region, session.session_key());
                            key_state.decrypt(region);
                        })?;
                    }

                    parts.in_buf.seek_read(2, Anchor::Begin)?;
                    let session_id = parts.in_buf.read_u32()?;
                    if !proto::is_valid_session(session_id) {
                        return Err(RelayError::Fatal(ErrorKind::BadSession));
                    }

                    let command = parts.in_buf.read_u16()?;
                    if !proto::is_valid_command(command) {
                        return Err(RelayError::Fatal(ErrorKind::BadCommand));
                    }

                    // Each leg's first data frame is pinned to the protocol
                    // opening: login from the client, chap string from the
                    // gate.
                    if parts.from.frames == 0 {
                        let expected = match side {
                            Side::Game => proto::CMD_LOGIN,
                            Side::Gate => proto::CMD_CHAPSTR,
                        };
                        if command != expected {
                            return Err(RelayError::Fatal(ErrorKind::BadPacket));
                        }
                    }

                    command
                };

                if let Some(handler) = registry.get_mut(command, side.direction()) {
                    handler.read(frame_len, &mut self.in_buf)?;

                    if !handler.validate() {
                        debug!(self.log, "malformed frame"; "handler" => handler.name());
                        return Err(RelayError::Fatal(ErrorKind::BadPacket));
                    }

                    pass = handler.handle(self, ctx)?;
                }
            }

            let parts = self.split(side);

            if frame_len > PING_LEN {
                if pass && encrypted {
                    let key_state = &mut parts.to.send_key;
                    let session = &*parts.session;
                    parts.in_buf.apply(6, frame_len, |region| {
                        key_state.encrypt(region);
                        bcipher::encrypt(region, session.session_key());
                    })?;
                }

                if pass && parts.to.connected {
                    parts.to.send.write(&parts.in_buf.as_slice()[..frame_len])?;
                }
            } else if parts.to.connected {
                parts.to.send.write_u16(PING_LEN as u16)?;
            } else {
                // No peer left; answer the keepalive ourselves.
                parts.from.send.write_u16(PING_LEN as u16)?;
            }

            parts.from.recv.commit();
            parts.from.frames += 1;
        }

        Ok(())
    }

    pub fn on_write(&mut self, side: Side, ctx: &ServerCtx) -> RelayResult<()> {
        {
            let ep = self.endpoint_mut(side);
            let Endpoint {
                stream,
                send,
                connected,
                ..
            } = ep;

            if *connected {
                if let Some(stream) = stream.as_mut() {
                    let mut tmp = [0u8; MAX_FRAME];

                    loop {
                        let pending = send.readable_len();
                        if pending == 0 {
                            break;
                        }

                        let chunk = pending.min(tmp.len());
                        send.read(&mut tmp[..chunk])?;

                        match stream.write(&tmp[..chunk]) {
                            Ok(0) => return Err(RelayError::Fatal(ErrorKind::Closed)),
                            Ok(sent) => {
                                // Consume exactly what the socket took.
                                send.rollback();
                                send.skip(sent)?;
                                send.commit();

                                if sent < chunk {
                                    break;
                                }
                            }
                            Err(ref io_error)
                                if io_error.kind() == io::ErrorKind::WouldBlock =>
                            {
                                send.rollback();
                                break;
                            }
                            Err(io_error) => return Err(io_error.into()),
                        }
                    }
                }
            }
        }

        let (worker, slot) = (self.worker, self.slot);
        self.endpoint_mut(side).rearm(ctx.poll(worker), slot)?;
        Ok(())
    }

    /// Queue a server-crafted packet for one side, encrypting it the same
    /// way forwarded traffic toward that side is.
    pub fn send_packet(
        &mut self,
        side: Side,
        payload: &Payload,
        ctx: &ServerCtx,
    ) -> RelayResult<()> {
        {
            let Bridge {
                game,
                gate,
                out_buf,
                session,
                log,
                ..
            } = self;

            let ep = match side {
                Side::Game => game,
                Side::Gate => gate,
            };

            if !ep.connected {
                debug!(log, "endpoint down, packet dropped";
                    "id" => payload.id(), "side" => side.label());
                return Ok(());
            }

            let size = payload.size();
            if !ep.send.can_write(size) {
                warn!(log, "send ring full, packet dropped";
                    "id" => payload.id(), "side" => side.label());
                return Ok(());
            }

            out_buf.clear();
            let written = payload.write(out_buf)?;

            if session.encrypted {
                let key_state = &mut ep.send_key;
                let session = &*session;
                out_buf.apply(6, written, |region| {
                    key_state.encrypt(region);
                    bcipher::encrypt(region, session.session_key());
                })?;
            }

            ep.send.write(&out_buf.as_slice()[..written])?;
        }

        let (worker, slot) = (self.worker, self.slot);
        self.endpoint_mut(side).rearm(ctx.poll(worker), slot)?;
        Ok(())
    }

    pub fn system_notice(&mut self, message: &str, ctx: &ServerCtx) -> RelayResult<()> {
        self.send_packet(Side::Game, &proto::packet::system_notice(message), ctx)
    }

    /// Tear down one side and run the lifecycle transition that goes with
    /// it. The caller reclaims the slot once both legs are gone.
    pub fn on_disconnect(&mut self, side: Side, ctx: &ServerCtx) {
        let poll = ctx.poll(self.worker);

        match side {
            Side::Game => {
                self.game.close(poll);

                // A zero offline time limit disables offline stalls outright.
                if self.session.offline_stall && ctx.settings.max_offline_time > 0 {
                    ctx.active.remove(self.slot);

                    if ctx.offline.insert(self.slot) {
                        info!(self.log, "client left, stall stays open";
                            "character" => &self.session.character_name,
                            "items" => self.session.item_count);

                        self.trade_deadline = Some(
                            Instant::now()
                                + Duration::from_secs(ctx.settings.max_offline_time),
                        );
                    } else {
                        warn!(self.log, "offline list rejected the relay");
                        self.gate.close(poll);
                    }
                } else {
                    self.gate.close(poll);
                }
            }
            Side::Gate => {
                self.gate.close(poll);
                self.game.close(poll);
                ctx.offline.remove(self.slot);

                if self.session.reconnecting {
                    self.replay_login(ctx);
                }
            }
        }

        if self.is_closed() {
            self.auth_deadline = None;
            self.trade_deadline = None;
            debug!(self.log, "relay closed");
        }
    }

    /// The account that displaced this offline stall is waiting, login
    /// cached, for our gate link to die. Find it and let it in.
    fn replay_login(&mut self, ctx: &ServerCtx) {
        let account = lower_case(&self.session.account);

        for slot in ctx.active.snapshot() {
            if slot == self.slot {
                continue;
            }

            let other = ctx.pool.get(slot).clone();
            // The login path locks bridges in the opposite order (its own,
            // then the stall's); blocking here could deadlock across workers.
            // A busy bridge is skipped; its client falls back to the auth
            // timeout and reconnects.
            let mut other = match other.try_lock() {
                Ok(guard) => guard,
                Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(std::sync::TryLockError::WouldBlock) => continue,
            };

            if other.session.authed || lower_case(&other.session.account) != account {
                continue;
            }

            if let Some(request) = other.session.login_request.clone() {
                info!(self.log, "handing the account over"; "account" => &self.session.account);
                let _ = other.send_packet(Side::Gate, &request.to_payload(), ctx);
            }
            break;
        }
    }

    /// Force the whole relay down.
    pub fn disconnect(&mut self, ctx: &ServerCtx) {
        if self.gate.stream.is_some() {
            self.on_disconnect(Side::Gate, ctx);
        } else if self.game.stream.is_some() {
            self.on_disconnect(Side::Game, ctx);
        }
    }

    /// Fire expired timers. Called periodically by the owning worker.
    pub fn check_deadlines(&mut self, now: Instant, ctx: &ServerCtx) {
        if let Some(deadline) = self.auth_deadline {
            if now >= deadline {
                self.auth_deadline = None;

                if !self.session.authed {
                    warn!(self.log, "authorization grace period expired");
                    self.on_disconnect(Side::Gate, ctx);
                    return;
                }
            }
        }

        if let Some(deadline) = self.trade_deadline {
            if now >= deadline {
                self.trade_deadline = None;
                info!(self.log, "offline trade time limit reached";
                    "character" => &self.session.character_name);
                self.on_disconnect(Side::Gate, ctx);
            }
        }
    }

    /// Return the bridge to its pristine pooled state.
    pub fn reset(&mut self) {
        self.game.reset();
        self.gate.reset();
        self.in_buf.clear();
        self.out_buf.clear();
        self.session.reset();
        self.auth_deadline = None;
        self.trade_deadline = None;
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::lock_bridge;
    use crate::proto::LoginRequest;
    use slog::{o, Drain};

    fn test_bridge(slot: usize) -> Bridge {
        Bridge::new(slot, Logger::root(slog::Discard.fuse(), o!()))
    }

    fn ctx_with(settings: crate::server::Settings) -> std::sync::Arc<crate::server::ServerCtx> {
        crate::server::Server::new(settings, Logger::root(slog::Discard.fuse(), o!()))
            .expect("server setup")
            .ctx()
    }

    fn test_ctx() -> std::sync::Arc<crate::server::ServerCtx> {
        ctx_with(crate::server::Settings {
            max_player: 4,
            ..Default::default()
        })
    }

    const PASSWORD: &str = "0123456789ABCDEF0123456789ABCDEF";

    fn login_frame(account: &str) -> Vec<u8> {
        let mut frame = ScratchBuffer::new(256);
        let len = 8 + 3 + (account.len() + 3) + (PASSWORD.len() + 3) + 26 + 4;

        frame.write_u16(len as u16).expect("len");
        frame.write_u32(proto::SESSION_CLIENT).expect("session");
        frame.write_u16(proto::CMD_LOGIN).expect("command");
        frame.write_string("").expect("nobill");
        frame.write_string(account).expect("account");
        frame.write_string(PASSWORD).expect("password");
        frame.write_string("00-1A-2B-3C-4D-5E-6F-70").expect("mac");
        frame.write_u16(0).expect("flag");
        frame.write_u16(136).expect("version");
        frame.as_slice().to_vec()
    }

    #[test]
    fn token_mapping_roundtrip() {
        for slot in [0usize, 1, 7, 511] {
            for side in [Side::Game, Side::Gate] {
                assert_eq!(slot_side(token(slot, side)), (slot, side));
            }
        }
    }

    #[test]
    fn tokens_never_collide_with_the_listener() {
        assert!(token(0, Side::Game).0 >= FIRST_BRIDGE_TOKEN);
        assert_ne!(token(0, Side::Game), token(0, Side::Gate));
        assert_ne!(token(0, Side::Gate), token(1, Side::Game));
    }

    #[test]
    fn side_properties() {
        assert_eq!(Side::Game.opposite(), Side::Gate);
        assert_eq!(Side::Gate.opposite(), Side::Game);
        assert_eq!(Side::Game.direction(), Direction::ClientToGate);
        assert_eq!(Side::Gate.direction(), Direction::GateToClient);
    }

    #[test]
    fn fresh_bridge_is_idle() {
        let bridge = test_bridge(3);

        assert_eq!(bridge.slot(), 3);
        assert!(!bridge.is_open());
        assert!(!bridge.is_closed());
        assert!(!bridge.game_connected());
        assert!(!bridge.gate_connected());
        assert!(bridge.game_ip().is_none());
    }

    #[test]
    fn ping_is_echoed_back_when_the_gate_is_gone() {
        let ctx = test_ctx();
        let mut registry = HandlerRegistry::standard().expect("registry");
        let mut bridge = test_bridge(0);

        bridge.game.recv.write_u16(PING_LEN as u16).expect("queue ping");
        bridge.on_read(Side::Game, &ctx, &mut registry).expect("pump");

        assert_eq!(bridge.game.send.readable_len(), PING_LEN);
        assert_eq!(bridge.gate.send.readable_len(), 0);
        assert_eq!(bridge.game.frames, 1);
    }

    #[test]
    fn ping_forwards_while_the_gate_is_up() {
        let ctx = test_ctx();
        let mut registry = HandlerRegistry::standard().expect("registry");
        let mut bridge = test_bridge(0);
        bridge.gate.connected = true;

        bridge.game.recv.write_u16(PING_LEN as u16).expect("queue ping");
        bridge.on_read(Side::Game, &ctx, &mut registry).expect("pump");

        assert_eq!(bridge.gate.send.readable_len(), PING_LEN);
        assert_eq!(bridge.game.send.readable_len(), 0);
    }

    #[test]
    fn first_client_frame_must_be_the_login() {
        let ctx = test_ctx();
        let mut registry = HandlerRegistry::standard().expect("registry");
        let mut bridge = test_bridge(0);

        let recv = &mut bridge.game.recv;
        recv.write_u16(8).expect("len");
        recv.write_u32(proto::SESSION_CLIENT).expect("session");
        recv.write_u16(proto::CMD_STALL_START).expect("command");

        assert_eq!(
            bridge.on_read(Side::Game, &ctx, &mut registry),
            Err(RelayError::Fatal(ErrorKind::BadPacket))
        );
    }

    #[test]
    fn bad_frame_length_is_fatal() {
        let ctx = test_ctx();
        let mut registry = HandlerRegistry::standard().expect("registry");
        let mut bridge = test_bridge(0);

        bridge.game.recv.write_u16(4).expect("len");

        assert_eq!(
            bridge.on_read(Side::Game, &ctx, &mut registry),
            Err(RelayError::Fatal(ErrorKind::MalformedFrame))
        );
    }

    #[test]
    fn frame_split_across_reads_is_reassembled_once() {
        let ctx = test_ctx();
        let mut registry = HandlerRegistry::standard().expect("registry");
        let mut bridge = test_bridge(0);
        bridge.game.connected = true;

        let mut frame = ScratchBuffer::new(64);
        frame.write_u16(19).expect("len");
        frame.write_u32(proto::SESSION_SERVER).expect("session");
        frame.write_u16(proto::CMD_CHAPSTR).expect("command");
        frame.write_string("gatechap").expect("chap");
        let bytes = frame.as_slice().to_vec();

        bridge.gate.recv.write(&bytes[..5]).expect("first part");
        bridge.on_read(Side::Gate, &ctx, &mut registry).expect("pump");
        assert_eq!(bridge.gate.frames, 0);
        assert_eq!(bridge.game.send.readable_len(), 0);

        bridge.gate.recv.write(&bytes[5..]).expect("second part");
        bridge.on_read(Side::Gate, &ctx, &mut registry).expect("pump");
        assert_eq!(bridge.gate.frames, 1);
        assert_eq!(bridge.session.chapstring, "gatechap");
        assert_eq!(bridge.game.send.readable_len(), bytes.len());
    }

    #[test]
    fn login_is_replayed_to_the_gate() {
        let ctx = test_ctx();
        let mut registry = HandlerRegistry::standard().expect("registry");
        let mut bridge = test_bridge(0);
        bridge.gate.connected = true;

        bridge.game.recv.write(&login_frame("Trader")).expect("frame");
        bridge.on_read(Side::Game, &ctx, &mut registry).expect("pump");

        assert_eq!(bridge.session.account, "Trader");
        assert!(bridge.session.login_request.is_some());
        assert_eq!(bridge.game.frames, 1);
        assert!(bridge.gate.send.readable_len() > 0);
    }

    #[test]
    fn login_for_an_offline_account_is_deferred() {
        let ctx = test_ctx();
        let mut registry = HandlerRegistry::standard().expect("registry");

        {
            let mut stall = lock_bridge(ctx.pool.get(1));
            stall.session.account = "trader".to_owned();
            stall.session.password_md5 = PASSWORD.to_owned();
        }
        ctx.offline.insert(1);

        let mut bridge = test_bridge(0);
        bridge.gate.connected = true;

        bridge.game.recv.write(&login_frame("Trader")).expect("frame");
        bridge.on_read(Side::Game, &ctx, &mut registry).expect("pump");

        assert!(lock_bridge(ctx.pool.get(1)).session.reconnecting);
        assert!(bridge.session.login_request.is_some());
        assert_eq!(bridge.gate.send.readable_len(), 0);
    }

    #[test]
    fn gate_drop_replays_the_waiting_login() {
        let ctx = test_ctx();

        {
            let mut waiting = lock_bridge(ctx.pool.get(0));
            waiting.session.account = "Trader".to_owned();
            waiting.session.login_request = Some(LoginRequest {
                account: "Trader".to_owned(),
                ..Default::default()
            });
            waiting.gate.connected = true;
        }
        ctx.active.insert(0);

        let mut stall = test_bridge(2);
        stall.opened = true;
        stall.session.account = "trader".to_owned();
        stall.session.reconnecting = true;

        stall.on_disconnect(Side::Gate, &ctx);

        assert!(lock_bridge(ctx.pool.get(0)).gate.send.readable_len() > 0);
    }

    #[test]
    fn offline_stall_survives_the_client_leg() {
        let ctx = test_ctx();
        let mut bridge = test_bridge(0);
        bridge.opened = true;
        bridge.session.offline_stall = true;
        ctx.active.insert(0);

        bridge.on_disconnect(Side::Game, &ctx);

        assert!(ctx.offline.contains(0));
        assert!(!ctx.active.contains(0));
    }

    #[test]
    fn zero_offline_limit_disables_offline_stalls() {
        let ctx = ctx_with(crate::server::Settings {
            max_player: 4,
            max_offline_time: 0,
            ..Default::default()
        });
        let mut bridge = test_bridge(0);
        bridge.opened = true;
        bridge.session.offline_stall = true;
        ctx.active.insert(0);

        bridge.on_disconnect(Side::Game, &ctx);

        assert!(!ctx.offline.contains(0));
        assert!(bridge.is_closed());
        assert!(bridge.trade_deadline.is_none());
    }

    #[test]
    fn reset_clears_session_state() {
        let mut bridge = test_bridge(0);
        bridge.session.account = "trader".to_owned();
        bridge.session.offline_stall = true;
        bridge.seed_noise_keys(NoiseKey::new(0x1234));

        bridge.reset();

        assert!(bridge.session.account.is_empty());
        assert!(!bridge.session.offline_stall);
        assert!(!bridge.is_open());
    }
}
