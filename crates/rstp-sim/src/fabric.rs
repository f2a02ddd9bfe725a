//! Discrete-event fabric connecting RSTP engines through point-to-point links.
//!
//! Every engine output is captured in an outbox and turned into queued
//! deliveries once the engine returns, so engines are never re-entered.
//! Deliveries are ordered by time and then by the order they were queued,
//! which makes a run fully reproducible.

use rstp::{
    BridgeId, Collaborators, EngineSnapshot, Instant, MacTable, PriorityVector, RstpConfig,
    RstpEngine, RstpError, RstpEvent, Scheduler, TcFlags, TimerId, Transport,
};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};

/// One-way latency of every link.
pub const DEFAULT_LINK_DELAY: Duration = Duration::from_millis(1);

/// Deliveries processed at a single instant before the run is abandoned.
pub const MAX_EVENTS_PER_INSTANT: usize = 100_000;

/// Fabric error types
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("Engine error on {bridge}: {source}")]
    Engine {
        bridge: BridgeHandle,
        #[source]
        source: RstpError,
    },

    #[error("Unknown bridge: {0}")]
    UnknownBridge(BridgeHandle),

    #[error("Port {port} is not configured on {bridge}")]
    UnknownPort { bridge: BridgeHandle, port: u16 },

    #[error("Port {port} on {bridge} is already connected")]
    PortInUse { bridge: BridgeHandle, port: u16 },

    #[error("Port {port} on {bridge} is not connected")]
    NotConnected { bridge: BridgeHandle, port: u16 },

    #[error("More than {limit} deliveries at {at}, fabric does not settle")]
    EventStorm { at: Instant, limit: usize },
}

/// Index of a bridge inside a [`Fabric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BridgeHandle(usize);

impl BridgeHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for BridgeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bridge#{}", self.0)
    }
}

/// One end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub bridge: BridgeHandle,
    pub port: u16,
}

impl Endpoint {
    pub fn new(bridge: BridgeHandle, port: u16) -> Self {
        Self { bridge, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bridge, self.port)
    }
}

/// A collaborator call made by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send {
        port: u16,
        vector: PriorityVector,
        flags: TcFlags,
    },
    Schedule {
        at: Instant,
        timer: TimerId,
    },
    Cancel {
        timer: TimerId,
    },
    Flush {
        port: u16,
    },
}

/// An engine output, stamped with when and where it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub at: Instant,
    pub bridge: BridgeHandle,
    pub action: Action,
}

/// A MAC table flush performed by a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushRecord {
    pub at: Instant,
    pub bridge: BridgeHandle,
    pub port: u16,
}

/// Collects the calls of one engine until the fabric drains them.
#[derive(Default)]
struct Outbox {
    actions: Mutex<Vec<Action>>,
}

impl Outbox {
    fn push(&self, action: Action) {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }

    fn take(&self) -> Vec<Action> {
        std::mem::take(&mut *self.actions.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Transport for Outbox {
    fn send_vector(&self, port: u16, vector: PriorityVector, flags: TcFlags) {
        self.push(Action::Send {
            port,
            vector,
            flags,
        });
    }
}

impl Scheduler for Outbox {
    fn schedule_at(&self, at: Instant, timer: TimerId) {
        self.push(Action::Schedule { at, timer });
    }

    fn cancel(&self, timer: TimerId) {
        self.push(Action::Cancel { timer });
    }
}

impl MacTable for Outbox {
    fn flush(&self, port: u16) {
        self.push(Action::Flush { port });
    }
}

struct SimBridge {
    engine: RstpEngine,
    outbox: Arc<Outbox>,
    /// Latest arming of each timer; older queued expiries are stale.
    generations: HashMap<TimerId, u64>,
}

#[derive(Debug)]
enum Delivery {
    Event(RstpEvent),
    Timer {
        timer: TimerId,
        generation: u64,
    },
    Frame {
        from: Endpoint,
        port: u16,
        vector: PriorityVector,
        flags: TcFlags,
    },
}

#[derive(Debug)]
struct Pending {
    at: Instant,
    seq: u64,
    bridge: BridgeHandle,
    delivery: Delivery,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.seq) == (other.at, other.seq)
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

/// A set of engines, the links between them and a shared virtual clock.
pub struct Fabric {
    bridges: Vec<SimBridge>,
    links: BTreeMap<Endpoint, Endpoint>,
    link_delay: Duration,
    now: Instant,
    started: bool,
    queue: BinaryHeap<Reverse<Pending>>,
    seq: u64,
    trace: Vec<TraceEntry>,
    flushes: Vec<FlushRecord>,
    frames_lost: u64,
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric {
    pub fn new() -> Self {
        Self {
            bridges: Vec::new(),
            links: BTreeMap::new(),
            link_delay: DEFAULT_LINK_DELAY,
            now: Instant::ZERO,
            started: false,
            queue: BinaryHeap::new(),
            seq: 0,
            trace: Vec::new(),
            flushes: Vec::new(),
            frames_lost: 0,
        }
    }

    pub fn with_link_delay(mut self, link_delay: Duration) -> Self {
        self.link_delay = link_delay;
        self
    }

    /// Adds a bridge. Once the fabric runs, the bridge starts immediately
    /// with all of its ports down until connected.
    pub fn add_bridge(&mut self, config: RstpConfig) -> Result<BridgeHandle, FabricError> {
        let handle = BridgeHandle(self.bridges.len());
        let outbox = Arc::new(Outbox::default());
        let collaborators = Collaborators::new(outbox.clone(), outbox.clone(), outbox.clone());
        let engine = RstpEngine::new(config, collaborators).map_err(|source| {
            FabricError::Engine {
                bridge: handle,
                source,
            }
        })?;
        info!("Adding {} as {}", engine.bridge_id(), handle);

        self.bridges.push(SimBridge {
            engine,
            outbox,
            generations: HashMap::new(),
        });
        if self.started {
            self.start_bridge(handle)?;
        }
        Ok(handle)
    }

    /// Links two ports. On a running fabric both ends see link up now.
    pub fn connect(
        &mut self,
        a: BridgeHandle,
        a_port: u16,
        b: BridgeHandle,
        b_port: u16,
    ) -> Result<(), FabricError> {
        let (ea, eb) = (Endpoint::new(a, a_port), Endpoint::new(b, b_port));
        for end in [ea, eb] {
            self.check_port(end)?;
            if self.links.contains_key(&end) || ea == eb {
                return Err(FabricError::PortInUse {
                    bridge: end.bridge,
                    port: end.port,
                });
            }
        }
        debug!("Connecting {} <-> {}", ea, eb);
        self.links.insert(ea, eb);
        self.links.insert(eb, ea);

        if self.started {
            let now = self.now;
            self.push(now, a, Delivery::Event(RstpEvent::LinkUp { port: a_port }));
            self.push(now, b, Delivery::Event(RstpEvent::LinkUp { port: b_port }));
        }
        Ok(())
    }

    /// Cuts the link attached to `bridge:port`; frames in flight are lost.
    pub fn disconnect(&mut self, bridge: BridgeHandle, port: u16) -> Result<(), FabricError> {
        let end = Endpoint::new(bridge, port);
        let peer = self
            .links
            .remove(&end)
            .ok_or(FabricError::NotConnected { bridge, port })?;
        self.links.remove(&peer);
        debug!("Disconnecting {} <-> {}", end, peer);

        if self.started {
            let now = self.now;
            self.push(now, end.bridge, Delivery::Event(RstpEvent::LinkDown { port }));
            self.push(
                now,
                peer.bridge,
                Delivery::Event(RstpEvent::LinkDown { port: peer.port }),
            );
        }
        Ok(())
    }

    /// Starts every bridge at the current time. Unconnected ports go down.
    pub fn start(&mut self) -> Result<(), FabricError> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        for index in 0..self.bridges.len() {
            self.start_bridge(BridgeHandle(index))?;
        }
        Ok(())
    }

    /// Queues `event` for `bridge` at the current time.
    pub fn inject(&mut self, bridge: BridgeHandle, event: RstpEvent) -> Result<(), FabricError> {
        self.bridge(bridge)?;
        let now = self.now;
        self.push(now, bridge, Delivery::Event(event));
        Ok(())
    }

    /// Processes every delivery due up to and including `until`.
    pub fn run_until(&mut self, until: Instant) -> Result<(), FabricError> {
        let mut burst_at = self.now;
        let mut burst = 0;
        while self
            .queue
            .peek()
            .is_some_and(|Reverse(next)| next.at <= until)
        {
            let Some(Reverse(next)) = self.queue.pop() else {
                break;
            };
            if next.at != burst_at {
                burst_at = next.at;
                burst = 0;
            }
            burst += 1;
            if burst > MAX_EVENTS_PER_INSTANT {
                return Err(FabricError::EventStorm {
                    at: next.at,
                    limit: MAX_EVENTS_PER_INSTANT,
                });
            }
            self.now = next.at;
            self.dispatch(next)?;
        }
        self.now = self.now.max(until);
        Ok(())
    }

    pub fn run_for(&mut self, duration: Duration) -> Result<(), FabricError> {
        self.run_until(self.now + duration)
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = BridgeHandle> {
        (0..self.bridges.len()).map(BridgeHandle)
    }

    pub fn engine(&self, bridge: BridgeHandle) -> Option<&RstpEngine> {
        self.bridges.get(bridge.0).map(|sim| &sim.engine)
    }

    pub fn handle_of(&self, bridge_id: BridgeId) -> Option<BridgeHandle> {
        self.handles()
            .find(|handle| self.bridges[handle.0].engine.bridge_id() == bridge_id)
    }

    pub fn snapshot(&self, bridge: BridgeHandle) -> Option<EngineSnapshot> {
        self.engine(bridge).map(RstpEngine::snapshot)
    }

    /// Each link once, lower endpoint first.
    pub fn links(&self) -> Vec<(Endpoint, Endpoint)> {
        self.links
            .iter()
            .filter(|(a, b)| a < b)
            .map(|(a, b)| (*a, *b))
            .collect()
    }

    pub fn peer(&self, end: Endpoint) -> Option<Endpoint> {
        self.links.get(&end).copied()
    }

    /// Every engine output so far, in delivery order.
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn flushes(&self) -> &[FlushRecord] {
        &self.flushes
    }

    /// Frames that reached a port whose link was gone.
    pub fn frames_lost(&self) -> u64 {
        self.frames_lost
    }

    fn bridge(&self, bridge: BridgeHandle) -> Result<&SimBridge, FabricError> {
        self.bridges
            .get(bridge.0)
            .ok_or(FabricError::UnknownBridge(bridge))
    }

    fn check_port(&self, end: Endpoint) -> Result<(), FabricError> {
        let sim = self.bridge(end.bridge)?;
        if sim.engine.port(end.port).is_none() {
            return Err(FabricError::UnknownPort {
                bridge: end.bridge,
                port: end.port,
            });
        }
        Ok(())
    }

    fn start_bridge(&mut self, handle: BridgeHandle) -> Result<(), FabricError> {
        let now = self.now;
        let sim = self
            .bridges
            .get_mut(handle.0)
            .ok_or(FabricError::UnknownBridge(handle))?;
        sim.engine.start(now).map_err(|source| FabricError::Engine {
            bridge: handle,
            source,
        })?;
        let ports: Vec<u16> = sim.engine.ports().map(|port| port.number()).collect();
        self.drain(handle);

        for port in ports {
            if !self.links.contains_key(&Endpoint::new(handle, port)) {
                self.deliver(handle, RstpEvent::LinkDown { port })?;
            }
        }
        Ok(())
    }

    fn push(&mut self, at: Instant, bridge: BridgeHandle, delivery: Delivery) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Reverse(Pending {
            at,
            seq,
            bridge,
            delivery,
        }));
    }

    fn dispatch(&mut self, pending: Pending) -> Result<(), FabricError> {
        let Pending {
            bridge, delivery, ..
        } = pending;
        let event = match delivery {
            Delivery::Event(event) => event,
            Delivery::Timer { timer, generation } => {
                let current = self
                    .bridges
                    .get(bridge.0)
                    .and_then(|sim| sim.generations.get(&timer))
                    .copied();
                if current != Some(generation) {
                    trace!("Skipping stale expiry of {} on {}", timer, bridge);
                    return Ok(());
                }
                RstpEvent::TimerExpired { timer }
            }
            Delivery::Frame {
                from,
                port,
                vector,
                flags,
            } => {
                if self.links.get(&Endpoint::new(bridge, port)) != Some(&from) {
                    debug!("Frame from {} lost, link gone", from);
                    self.frames_lost += 1;
                    return Ok(());
                }
                RstpEvent::VectorArrived {
                    port,
                    vector,
                    flags,
                }
            }
        };
        self.deliver(bridge, event)
    }

    fn deliver(&mut self, bridge: BridgeHandle, event: RstpEvent) -> Result<(), FabricError> {
        let now = self.now;
        let sim = self
            .bridges
            .get_mut(bridge.0)
            .ok_or(FabricError::UnknownBridge(bridge))?;
        sim.engine
            .handle_event(now, event)
            .map_err(|source| FabricError::Engine { bridge, source })?;
        self.drain(bridge);
        Ok(())
    }

    /// Turns the outputs of one engine into trace entries and deliveries.
    fn drain(&mut self, bridge: BridgeHandle) {
        let actions = match self.bridges.get(bridge.0) {
            Some(sim) => sim.outbox.take(),
            None => return,
        };
        let now = self.now;
        for action in actions {
            match &action {
                Action::Send {
                    port,
                    vector,
                    flags,
                } => {
                    let from = Endpoint::new(bridge, *port);
                    if let Some(peer) = self.links.get(&from).copied() {
                        let delivery = Delivery::Frame {
                            from,
                            port: peer.port,
                            vector: *vector,
                            flags: *flags,
                        };
                        self.push(now + self.link_delay, peer.bridge, delivery);
                    }
                }
                Action::Schedule { at, timer } => {
                    let generation = self.arm(bridge, *timer);
                    let delivery = Delivery::Timer {
                        timer: *timer,
                        generation,
                    };
                    self.push((*at).max(now), bridge, delivery);
                }
                Action::Cancel { timer } => {
                    self.arm(bridge, *timer);
                }
                Action::Flush { port } => self.flushes.push(FlushRecord {
                    at: now,
                    bridge,
                    port: *port,
                }),
            }
            self.trace.push(TraceEntry {
                at: now,
                bridge,
                action,
            });
        }
    }

    /// Invalidates queued expiries of `timer` and returns the new generation.
    fn arm(&mut self, bridge: BridgeHandle, timer: TimerId) -> u64 {
        let Some(sim) = self.bridges.get_mut(bridge.0) else {
            return 0;
        };
        let generation = sim.generations.entry(timer).or_insert(0);
        *generation += 1;
        *generation
    }
}
