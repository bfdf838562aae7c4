//! Server assembly: the shared context, the accept path and the worker
//! threads that drive bridge sockets through their poll loops.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, PollOpt, Ready, Token};
use serde_derive::Deserialize;
use slog::{crit, debug, info, o, warn, Logger};

use crate::bridge::{self, Side};
use crate::handler::HandlerRegistry;
use crate::ipbook::IpAddressBook;
use crate::pool::{lock_bridge, BridgePool};
use crate::registry::BridgeList;
use crate::support::{ErrorUtils, RelayResult};

const LISTENER: Token = Token(0);

/// Poll timeout; also paces the deadline scan.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the relay listens on for game clients.
    pub listen_host: String,
    pub listen_port: u16,
    /// Upstream gate address.
    pub gate_host: String,
    pub gate_port: u16,
    /// Relay pool capacity.
    pub max_player: usize,
    /// Client connections allowed per address, 0 to disable.
    pub max_clients_per_ip: usize,
    /// Minimum seconds between connection attempts from one address, 0 to
    /// disable.
    pub connection_interval: u64,
    /// Maps where offline stalls may stay behind.
    pub maps: Vec<String>,
    /// Offline stalls allowed per address, 0 to disable.
    pub max_stalls_per_ip: usize,
    /// Offline trade time limit in seconds, 0 disables offline stalls.
    pub max_offline_time: u64,
    /// Tear an offline stall down once it sells out.
    pub close_stall_on_empty: bool,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            listen_host: "0.0.0.0".to_owned(),
            listen_port: 1973,
            gate_host: "127.0.0.1".to_owned(),
            gate_port: 1972,
            max_player: 512,
            max_clients_per_ip: 3,
            connection_interval: 3,
            maps: vec!["garner".to_owned()],
            max_stalls_per_ip: 2,
            max_offline_time: 86_400,
            close_stall_on_empty: true,
        }
    }
}

impl Settings {
    pub fn listen_addr(&self) -> RelayResult<SocketAddr> {
        Ok(format!("{}:{}", self.listen_host, self.listen_port).parse()?)
    }

    pub fn gate_addr(&self) -> RelayResult<SocketAddr> {
        Ok(format!("{}:{}", self.gate_host, self.gate_port).parse()?)
    }
}

/// One poll loop's shared state. The slots it owns are tracked so the
/// deadline scan and load balancing stay per-worker.
pub struct Worker {
    pub poll: Poll,
    live: Mutex<IndexSet<usize>>,
}

impl Worker {
    fn new() -> io::Result<Worker> {
        Ok(Worker {
            poll: Poll::new()?,
            live: Mutex::new(IndexSet::new()),
        })
    }

    fn live_guard(&self) -> std::sync::MutexGuard<'_, IndexSet<usize>> {
        match self.live.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn load(&self) -> usize {
        self.live_guard().len()
    }

    fn add_slot(&self, slot: usize) {
        self.live_guard().insert(slot);
    }

    fn remove_slot(&self, slot: usize) {
        self.live_guard().shift_remove(&slot);
    }

    fn live_snapshot(&self) -> Vec<usize> {
        self.live_guard().iter().copied().collect()
    }
}

/// Everything bridges and handlers need, shared across worker threads.
pub struct ServerCtx {
    pub settings: Settings,
    pub log: Logger,
    pub gate_addr: SocketAddr,
    pub pool: BridgePool,
    /// Relays with a live client.
    pub active: BridgeList,
    /// Headless offline stalls.
    pub offline: BridgeList,
    pub ip_book: IpAddressBook,
    pub workers: Vec<Worker>,
    stop: AtomicBool,
    started_at: Instant,
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub uptime: Duration,
    pub online: usize,
    pub offline: usize,
    pub capacity: usize,
    pub worker_loads: Vec<usize>,
}

impl ServerCtx {
    #[inline]
    pub fn poll(&self, worker: usize) -> &Poll {
        &self.workers[worker].poll
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[inline]
    pub fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn least_loaded(&self) -> usize {
        let mut best = 0;
        let mut best_load = usize::MAX;

        for (index, worker) in self.workers.iter().enumerate() {
            let load = worker.load();
            if load < best_load {
                best = index;
                best_load = load;
            }
        }

        best
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            uptime: self.uptime(),
            online: self.active.len(),
            offline: self.offline.len(),
            capacity: self.pool.capacity(),
            worker_loads: self.workers.iter().map(Worker::load).collect(),
        }
    }

    /// Reclaim a fully closed bridge: reset it, drop every reference the
    /// server keeps to the slot and return it to the pool. Idempotent; the
    /// caller must not hold the bridge lock.
    pub fn finish_close(&self, slot: usize) {
        let bridge_arc = self.pool.get(slot).clone();
        let mut bridge = lock_bridge(&bridge_arc);

        if !bridge.is_closed() {
            return;
        }

        let worker = bridge.worker();
        let ip = bridge.game_ip();
        bridge.reset();
        drop(bridge);

        self.active.remove(slot);
        self.offline.remove(slot);
        if let Some(ip) = ip {
            self.ip_book.unregister(ip);
        }
        self.workers[worker].remove_slot(slot);
        self.pool.release(slot);
    }
}

pub struct Server {
    ctx: Arc<ServerCtx>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Server {
    pub fn new(settings: Settings, log: Logger) -> RelayResult<Server> {
        let gate_addr = settings.gate_addr()?;

        let worker_count = thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(2)
            .max(2);

        let workers = (0..worker_count)
            .map(|_| Worker::new())
            .collect::<io::Result<Vec<_>>>()?;

        let pool = BridgePool::new(settings.max_player, &log);

        Ok(Server {
            ctx: Arc::new(ServerCtx {
                settings,
                log,
                gate_addr,
                pool,
                active: BridgeList::new(),
                offline: BridgeList::new(),
                ip_book: IpAddressBook::new(),
                workers,
                stop: AtomicBool::new(false),
                started_at: Instant::now(),
            }),
            threads: Vec::new(),
        })
    }

    pub fn ctx(&self) -> Arc<ServerCtx> {
        self.ctx.clone()
    }

    /// Bind the listener and start the worker threads. Returns once the
    /// server is up; the caller owns the foreground.
    pub fn run(&mut self) -> RelayResult<()> {
        let listen_addr = self.ctx.settings.listen_addr()?;
        let mut listener = Some(TcpListener::bind(&listen_addr)?);

        info!(self.ctx.log, "server started";
            "listen" => %listen_addr,
            "gate" => %self.ctx.gate_addr,
            "capacity" => self.ctx.pool.capacity(),
            "workers" => self.ctx.workers.len());

        for index in 0..self.ctx.workers.len() {
            let ctx = self.ctx.clone();
            let listener = listener.take();

            let handle = thread::Builder::new()
                .name(format!("relay-{}", index))
                .spawn(move || worker_loop(ctx, index, listener))?;

            self.threads.push(handle);
        }

        Ok(())
    }

    /// Stop the workers and drop every connection.
    pub fn stop(&mut self) {
        self.ctx.request_stop();

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }

        let slots: Vec<usize> = self
            .ctx
            .active
            .snapshot()
            .into_iter()
            .chain(self.ctx.offline.snapshot())
            .collect();

        for slot in slots {
            let bridge_arc = self.ctx.pool.get(slot).clone();
            let mut bridge = lock_bridge(&bridge_arc);
            if bridge.is_open() {
                bridge.disconnect(&self.ctx);
            }
            drop(bridge);
            self.ctx.finish_close(slot);
        }

        info!(self.ctx.log, "server stopped");
    }
}

fn worker_loop(ctx: Arc<ServerCtx>, index: usize, listener: Option<TcpListener>) {
    let log = ctx.log.new(o!("worker" => index));

    let mut registry = match HandlerRegistry::standard() {
        Ok(registry) => registry,
        Err(error) => {
            crit!(log, "packet handler setup failed"; "error" => ?error);
            return;
        }
    };

    if let Some(listener) = &listener {
        let register = ctx.poll(index).register(
            listener,
            LISTENER,
            Ready::readable(),
            PollOpt::edge() | PollOpt::oneshot(),
        );
        if let Err(io_error) = register {
            crit!(log, "listener registration failed"; "error" => %io_error);
            return;
        }
    }

    let mut events = Events::with_capacity(256);

    while !ctx.stopping() {
        if let Err(io_error) = ctx.poll(index).poll(&mut events, Some(POLL_INTERVAL)) {
            warn!(log, "poll failed"; "error" => %io_error);
            continue;
        }

        for event in events.iter() {
            match event.token() {
                LISTENER => {
                    if let Some(listener) = &listener {
                        accept_clients(&ctx, listener, index, &log);
                    }
                }
                token => dispatch(&ctx, &mut registry, token, event.readiness()),
            }
        }

        scan_deadlines(&ctx, index);
    }
}

fn accept_clients(ctx: &Arc<ServerCtx>, listener: &TcpListener, worker: usize, log: &Logger) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => handle_accept(ctx, stream, peer, log),
            Err(ref io_error) if io_error.kind() == io::ErrorKind::WouldBlock => break,
            Err(io_error) => {
                warn!(log, "accept failed"; "error" => %io_error);
                break;
            }
        }
    }

    let rearm = ctx.poll(worker).reregister(
        listener,
        LISTENER,
        Ready::readable(),
        PollOpt::edge() | PollOpt::oneshot(),
    );
    if let Err(io_error) = rearm {
        crit!(log, "listener re-registration failed"; "error" => %io_error);
    }
}

fn handle_accept(ctx: &Arc<ServerCtx>, stream: TcpStream, peer: SocketAddr, log: &Logger) {
    let ip = peer.ip();
    let settings = &ctx.settings;

    // Dropping the stream here closes the socket, which is the rejection.
    if settings.max_clients_per_ip > 0 && ctx.ip_book.count(ip) >= settings.max_clients_per_ip {
        debug!(log, "address connection cap reached"; "peer" => %peer);
        return;
    }

    if settings.connection_interval > 0
        && !ctx
            .ip_book
            .interval_elapsed(ip, Duration::from_secs(settings.connection_interval))
    {
        debug!(log, "reconnecting too fast"; "peer" => %peer);
        return;
    }

    let slot = match ctx.pool.acquire() {
        Ok(slot) => slot,
        Err(_) => {
            warn!(log, "relay pool exhausted, client rejected"; "peer" => %peer);
            return;
        }
    };

    let worker = ctx.least_loaded();
    let bridge_arc = ctx.pool.get(slot).clone();
    let mut bridge = lock_bridge(&bridge_arc);

    if let Err(error) = bridge.open(ctx, worker, stream, peer) {
        warn!(log, "relay open failed"; "peer" => %peer, "error" => ?error);
        bridge.reset();
        drop(bridge);
        ctx.pool.release(slot);
        return;
    }

    // Bookkeeping happens under the bridge lock so the gate connect event
    // cannot observe a half-registered relay.
    ctx.ip_book.register(ip);
    ctx.active.insert(slot);
    ctx.workers[worker].add_slot(slot);
}

fn dispatch(ctx: &Arc<ServerCtx>, registry: &mut HandlerRegistry, token: Token, ready: Ready) {
    let (slot, side) = bridge::slot_side(token);
    if slot >= ctx.pool.capacity() {
        return;
    }

    let bridge_arc = ctx.pool.get(slot).clone();
    let mut bridge = lock_bridge(&bridge_arc);

    // Stale event for a reclaimed slot.
    if !bridge.is_open() {
        return;
    }

    if ready.is_writable() {
        if side == Side::Gate && !bridge.gate_connected() {
            if let Err(error) = bridge.on_connect(ctx) {
                warn!(bridge.log(), "gate connect failed"; "error" => ?error);
                bridge.on_disconnect(Side::Game, ctx);
            }
        } else if bridge.on_write(side, ctx).has_failed() {
            bridge.on_disconnect(side, ctx);
        }
    }

    if ready.is_readable() && bridge.is_open() && !bridge.is_closed() {
        let result = bridge.on_read(side, ctx, registry);
        if result.has_failed() {
            debug!(bridge.log(), "link dropped";
                "side" => side.label(), "error" => ?result.err());
            bridge.on_disconnect(side, ctx);
        }
    }

    let closed = bridge.is_closed();
    drop(bridge);

    if closed {
        ctx.finish_close(slot);
    }
}

fn scan_deadlines(ctx: &Arc<ServerCtx>, index: usize) {
    let now = Instant::now();

    for slot in ctx.workers[index].live_snapshot() {
        let bridge_arc = ctx.pool.get(slot).clone();
        let mut bridge = lock_bridge(&bridge_arc);

        if !bridge.is_open() {
            continue;
        }

        bridge.check_deadlines(now, ctx);
        let closed = bridge.is_closed();
        drop(bridge);

        if closed {
            ctx.finish_close(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::Drain;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard.fuse(), o!())
    }

    #[test]
    fn settings_addresses_parse() {
        let settings = Settings::default();
        assert!(settings.listen_addr().is_ok());
        assert_eq!(
            settings.gate_addr().unwrap(),
            "127.0.0.1:1972".parse().unwrap()
        );

        let bad = Settings {
            gate_host: "not an address".to_owned(),
            ..Settings::default()
        };
        assert!(bad.gate_addr().is_err());
    }

    #[test]
    fn fresh_server_stats() {
        let settings = Settings {
            max_player: 8,
            ..Settings::default()
        };
        let server = Server::new(settings, test_logger()).unwrap();
        let stats = server.ctx().stats();

        assert_eq!(stats.online, 0);
        assert_eq!(stats.offline, 0);
        assert_eq!(stats.capacity, 8);
        assert!(stats.worker_loads.iter().all(|&load| load == 0));
        assert!(stats.worker_loads.len() >= 2);
    }

    #[test]
    fn least_loaded_tracks_live_slots() {
        let server = Server::new(Settings::default(), test_logger()).unwrap();
        let ctx = server.ctx();

        assert_eq!(ctx.least_loaded(), 0);
        ctx.workers[0].add_slot(1);
        ctx.workers[0].add_slot(2);
        assert_ne!(ctx.least_loaded(), 0);

        ctx.workers[0].remove_slot(1);
        ctx.workers[0].remove_slot(2);
        assert_eq!(ctx.least_loaded(), 0);
    }
}
