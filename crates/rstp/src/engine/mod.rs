//! The per-bridge decision engine.
//!
//! One [`RstpEngine`] owns the protocol state of one bridge. The host feeds it
//! [`RstpEvent`]s one at a time; the engine answers through its
//! [`Collaborators`] (BPDUs out, timers armed, MAC table flushes) and never
//! blocks or spawns work of its own.

mod receive;
mod timers;

#[cfg(test)]
mod tests;

use crate::collaborators::Collaborators;
use crate::config::RstpConfig;
use crate::error::{InvariantError, RstpError, RstpResult};
use crate::event::{RstpEvent, TcFlags};
use crate::port::{PortRecord, PortRole, PortState};
use crate::stats::{EngineSnapshot, PortSnapshot, RstpStats};
use crate::timer::{Instant, TimerId, TimerKind, TimerTable};
use crate::vector::{compare, PriorityVector};
use rstp_types::{BridgeId, PortId};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, enabled, info, instrument, warn, Level};

/// Number of hello periods a port's information survives without refresh.
pub const MAX_LOST_HELLOS: u32 = 3;

/// RSTP state machine for a single bridge.
#[derive(Debug)]
pub struct RstpEngine {
    bridge_id: BridgeId,
    hello_time: Duration,
    migrate_time: Duration,
    tc_while_time: Duration,
    forward_delay: Duration,
    auto_edge: bool,

    collaborators: Collaborators,
    ports: BTreeMap<u16, PortRecord>,
    timers: TimerTable,

    /// Best of our own claim and the root port's root path vector.
    root_vector: PriorityVector,
    root_port: Option<u16>,

    now: Instant,
    started: bool,
    /// Pending expiry handed to the scheduler for the upgrade timer.
    upgrade_at: Option<Instant>,
    /// Advertised information changed while handling the current event.
    need_transmit: bool,
    /// A topology change must be announced on every port with an open window.
    tc_pending: bool,

    stats: RstpStats,
}

impl RstpEngine {
    /// Builds an engine from a validated configuration. All ports start
    /// `Disabled` until [`RstpEngine::start`].
    pub fn new(config: RstpConfig, collaborators: Collaborators) -> RstpResult<Self> {
        config.validate()?;

        let bridge_id = config.bridge_id();
        let ports: BTreeMap<u16, PortRecord> = config
            .ports
            .iter()
            .map(|port| (port.number, PortRecord::new(port)))
            .collect();
        let timers = TimerTable::new(ports.keys().copied());

        Ok(Self {
            bridge_id,
            hello_time: config.hello_time(),
            migrate_time: config.migrate_time(),
            tc_while_time: config.tc_while_time(),
            forward_delay: config.forward_delay(),
            auto_edge: config.auto_edge,
            collaborators,
            ports,
            timers,
            root_vector: PriorityVector::bridge_as_root(bridge_id),
            root_port: None,
            now: Instant::ZERO,
            started: false,
            upgrade_at: None,
            need_transmit: false,
            tc_pending: false,
            stats: RstpStats::default(),
        })
    }

    /// Brings every configured port up, claims root and arms the hello timer.
    #[instrument(skip(self), fields(bridge = %self.bridge_id))]
    pub fn start(&mut self, now: Instant) -> RstpResult<()> {
        if self.started {
            return Err(RstpError::AlreadyStarted);
        }
        self.started = true;
        self.now = now;
        info!(
            "Starting RSTP on bridge {} with {} ports",
            self.bridge_id,
            self.ports.len()
        );

        let numbers: Vec<u16> = self.ports.keys().copied().collect();
        for number in numbers {
            self.init_port(number);
            self.flush_port(number);
        }

        let hello = self.timers.hello();
        self.collaborators
            .scheduler
            .schedule_at(now + self.hello_time, hello);
        self.need_transmit = true;
        self.finish_event();
        Ok(())
    }

    /// Processes one event to completion.
    #[instrument(skip(self), fields(bridge = %self.bridge_id))]
    pub fn handle_event(&mut self, now: Instant, event: RstpEvent) -> RstpResult<()> {
        if !self.started {
            return Err(RstpError::NotStarted);
        }
        if let Some(port) = event.port() {
            if !self.ports.contains_key(&port) {
                return Err(RstpError::UnknownPort(port));
            }
        }
        self.now = now;

        match event {
            RstpEvent::VectorArrived {
                port,
                vector,
                flags,
            } => self.process_vector(port, vector, flags),
            RstpEvent::TimerExpired { timer } => {
                let kind = self
                    .timers
                    .lookup(timer)
                    .ok_or(RstpError::UnknownTimer(timer))?;
                self.handle_timer(kind);
            }
            RstpEvent::LinkUp { port } => self.link_up(port),
            RstpEvent::LinkDown { port } => self.link_down(port),
        }

        self.finish_event();
        Ok(())
    }

    pub fn bridge_id(&self) -> BridgeId {
        self.bridge_id
    }

    pub fn root_vector(&self) -> &PriorityVector {
        &self.root_vector
    }

    pub fn root_port(&self) -> Option<u16> {
        self.root_port
    }

    pub fn is_root_bridge(&self) -> bool {
        self.root_port.is_none()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Time of the last event handled.
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn port(&self, number: u16) -> Option<&PortRecord> {
        self.ports.get(&number)
    }

    /// Ports in ascending number order.
    pub fn ports(&self) -> impl Iterator<Item = &PortRecord> {
        self.ports.values()
    }

    pub fn stats(&self) -> &RstpStats {
        &self.stats
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    pub fn timer_kind(&self, timer: TimerId) -> Option<TimerKind> {
        self.timers.lookup(timer)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            bridge_id: self.bridge_id,
            root_vector: self.root_vector,
            root_port: self.root_port,
            ports: self
                .ports
                .values()
                .map(|port| PortSnapshot {
                    number: port.number(),
                    role: port.role,
                    state: port.state,
                    edge: port.oper_edge,
                    best_received: port.best_received,
                    tc_while: port.tc_while.expiry(),
                })
                .collect(),
        }
    }

    /// Logs the full bridge state at debug level.
    pub fn print_state(&self) {
        if !enabled!(Level::DEBUG) {
            return;
        }
        match serde_json::to_string(&self.snapshot()) {
            Ok(state) => debug!("Bridge {} state: {}", self.bridge_id, state),
            Err(e) => warn!("Failed to serialize state of {}: {}", self.bridge_id, e),
        }
    }

    /// Non-root, enabled port with the best root path vector that still
    /// beats our own claim.
    pub fn get_best_alternate(&self) -> Option<u16> {
        let me = self.bridge_id;
        let own = PriorityVector::bridge_as_root(me);
        self.ports
            .values()
            .filter(|port| port.is_enabled() && port.role != PortRole::Root)
            .filter_map(|port| {
                let best = port.best_received?;
                if best.is_from(me) {
                    return None;
                }
                let path = best.with_added_cost(port.link_cost);
                compare(&path, &own)
                    .is_better()
                    .then_some((path, port.id, port.number()))
            })
            .min_by_key(|(path, id, _)| (*path, *id))
            .map(|(_, _, number)| number)
    }

    /// Checks the structural invariants of the current state.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let roots: Vec<u16> = self
            .ports
            .values()
            .filter(|port| port.role == PortRole::Root)
            .map(PortRecord::number)
            .collect();
        if roots.len() > 1 {
            return Err(InvariantError::MultipleRootPorts { ports: roots });
        }
        if roots.first().copied() != self.root_port {
            return Err(InvariantError::RootPortMismatch {
                recorded: self.root_port,
                roles: roots,
            });
        }

        for port in self.ports.values() {
            if !port.is_consistent() {
                return Err(InvariantError::InconsistentPort {
                    port: port.number(),
                    role: port.role,
                    state: port.state,
                });
            }
            if !port.is_enabled() && (port.tc_while.is_running() || port.best_received.is_some())
            {
                return Err(InvariantError::DisabledPortHoldsState(port.number()));
            }
        }

        let own = PriorityVector::bridge_as_root(self.bridge_id);
        let expected = match self.root_port.and_then(|n| self.ports.get(&n)) {
            Some(port) => port.root_path_vector(),
            None => Some(own),
        };
        if expected != Some(self.root_vector) {
            return Err(InvariantError::RootVectorMismatch {
                root_vector: self.root_vector,
                root_port: self.root_port,
            });
        }
        if compare(&self.root_vector, &own).is_worse() {
            return Err(InvariantError::RootVectorWorseThanOwn(self.root_vector));
        }
        Ok(())
    }

    /// Emits whatever the event left pending and re-arms the upgrade timer.
    fn finish_event(&mut self) {
        if self.need_transmit || self.tc_pending {
            self.send_tcn_to_root();
            self.send_bpdus();
            self.print_state();
        }
        self.need_transmit = false;
        self.tc_pending = false;
        self.schedule_next_upgrade();

        if let Err(violation) = self.check_invariants() {
            warn!("Bridge {} inconsistent: {}", self.bridge_id, violation);
        }
    }

    /// Brings a port up as a provisional designated port.
    fn init_port(&mut self, number: u16) {
        let now = self.now;
        let migrate_time = self.migrate_time;
        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        port.reset();
        port.role = PortRole::Designated;
        port.designated_vector = Some(self.root_vector.designated_for(self.bridge_id, port.id));
        if port.oper_edge {
            port.state = PortState::Forwarding;
        } else {
            port.migrating = true;
            port.migration_delay.start(now, migrate_time);
        }
        debug!("Port {} initialized as {} {}", number, port.role, port.state);
        self.need_transmit = true;
    }

    /// Recomputes the root and the role of every enabled port. A change of
    /// root bridge is a topology change originating at `origin`.
    fn reselect(&mut self, origin: Option<u16>) {
        let previous_root = self.root_vector.root_id();
        self.select_root();

        let numbers: Vec<u16> = self.ports.keys().copied().collect();
        for number in numbers {
            self.recompute_port_role(number);
        }

        if previous_root != self.root_vector.root_id() {
            info!(
                "Root bridge changed from {} to {}",
                previous_root,
                self.root_vector.root_id()
            );
            self.stats.root_changes += 1;
            self.topology_change(origin);
        }
    }

    fn select_root(&mut self) {
        let me = self.bridge_id;
        let own = PriorityVector::bridge_as_root(me);
        let best = self
            .ports
            .values()
            .filter(|port| port.is_enabled())
            .filter_map(|port| {
                let best = port.best_received?;
                if best.is_from(me) {
                    return None;
                }
                Some((best.with_added_cost(port.link_cost), port.id, port.number()))
            })
            .min_by_key(|(path, id, _)| (*path, *id));

        let (root_vector, root_port) = match best {
            Some((path, _, number)) if compare(&path, &own).is_better() => (path, Some(number)),
            _ => (own, None),
        };

        if root_vector != self.root_vector || root_port != self.root_port {
            debug!(
                "Root vector {} via {:?} (was {} via {:?})",
                root_vector, root_port, self.root_vector, self.root_port
            );
            self.need_transmit = true;
        }
        self.root_vector = root_vector;
        self.root_port = root_port;
    }

    /// Derives the role of one port from the current root vector.
    fn recompute_port_role(&mut self, number: u16) {
        let me = self.bridge_id;
        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        if !port.is_enabled() {
            return;
        }

        let designated = self.root_vector.designated_for(me, port.id);
        if port.designated_vector != Some(designated) {
            port.designated_vector = Some(designated);
            if port.role == PortRole::Designated {
                self.need_transmit = true;
            }
        }
        let (port_id, best) = (port.id, port.best_received);

        let role = if self.root_port == Some(number) {
            PortRole::Root
        } else {
            match best {
                None => PortRole::Designated,
                Some(best) => {
                    let looped = best.is_from(me) && best.designated_port_id() == port_id;
                    if !looped && compare(&designated, &best).is_better_or_equal() {
                        PortRole::Designated
                    } else {
                        self.handle_backup(number, port_id, &best)
                    }
                }
            }
        };
        self.set_role(number, role);
    }

    /// Picks `Backup` or `Alternate` for a port that lost the designated
    /// contest on its segment.
    fn handle_backup(&self, number: u16, port_id: PortId, best: &PriorityVector) -> PortRole {
        if best.is_from(self.bridge_id) {
            debug!("Port {} hears this bridge on its segment", number);
            return PortRole::Backup;
        }
        let shadowed = self.ports.values().any(|other| {
            other.number() != number
                && other.is_enabled()
                && other.best_received.as_ref() == Some(best)
                && (self.root_port == Some(other.number()) || other.id < port_id)
        });
        if shadowed {
            debug!("Port {} shares its segment with a preferred local port", number);
            PortRole::Backup
        } else {
            PortRole::Alternate
        }
    }

    /// Promotes the best alternate to root port after `withdrawn` lost its
    /// information, without waiting for any delay.
    fn promote_best_alternate(&mut self, withdrawn: u16) {
        match self.get_best_alternate() {
            Some(candidate) => {
                info!(
                    "Root port {} withdrawn, promoting port {}",
                    withdrawn, candidate
                );
                self.root_port = Some(candidate);
                self.set_role(candidate, PortRole::Root);
            }
            None => {
                info!("Root port {} withdrawn with no alternate", withdrawn);
                self.root_port = None;
            }
        }
    }

    fn transition_step(&self, number: u16) -> Duration {
        match self.ports.get(&number) {
            Some(port) if port.legacy || !port.peer_seen => self.forward_delay,
            _ => self.migrate_time,
        }
    }

    /// Moves a port to `role` together with the state the role implies.
    fn set_role(&mut self, number: u16, role: PortRole) {
        let now = self.now;
        let step = self.transition_step(number);
        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        if port.role == role {
            return;
        }
        let old_role = port.role;
        let was_forwarding = port.is_forwarding();
        port.role = role;

        match role {
            PortRole::Root => {
                port.state = PortState::Forwarding;
                port.migrating = false;
                port.migration_delay.stop();
            }
            PortRole::Designated if port.oper_edge => {
                port.state = PortState::Forwarding;
                port.migrating = false;
                port.migration_delay.stop();
            }
            PortRole::Designated => {
                if !was_forwarding {
                    port.state = PortState::Discarding;
                    if !port.migration_delay.is_running() {
                        port.migration_delay.start(now, step);
                    }
                }
            }
            PortRole::Alternate | PortRole::Backup | PortRole::Disabled => {
                port.state = PortState::Discarding;
                port.migrating = false;
                port.migration_delay.stop();
            }
        }

        info!(
            "Port {} role {} -> {}, state {}",
            number, old_role, role, port.state
        );
        let now_forwarding = port.is_forwarding();
        self.stats.role_changes += 1;
        self.need_transmit = true;

        if was_forwarding && !now_forwarding {
            self.flush_port(number);
        }
        if !was_forwarding && now_forwarding {
            self.topology_change(Some(number));
        } else if was_forwarding && old_role == PortRole::Designated && role != PortRole::Designated
        {
            self.topology_change(Some(number));
        }
    }

    /// Opens the TC window on every enabled non-edge port and flushes the
    /// MAC table everywhere except `origin`.
    fn topology_change(&mut self, origin: Option<u16>) {
        match origin {
            Some(port) => info!("Topology change detected on port {}", port),
            None => info!("Topology change detected"),
        }
        self.stats.topology_changes += 1;

        let numbers: Vec<u16> = self
            .ports
            .values()
            .filter(|port| port.is_enabled() && !port.oper_edge)
            .map(PortRecord::number)
            .collect();
        for number in numbers {
            self.start_tc_while(number);
        }
        self.flush_other_ports(origin);
        self.tc_pending = true;
    }

    fn start_tc_while(&mut self, number: u16) {
        let (now, window) = (self.now, self.tc_while_time);
        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        let expiry = port.tc_while.start(now, window);
        if let Some(timer) = self.timers.tc_while(number) {
            self.collaborators.scheduler.schedule_at(expiry, timer);
        }
    }

    fn stop_tc_while(&mut self, number: u16) {
        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        port.tc_while.stop();
        port.tc_ack = false;
        if let Some(timer) = self.timers.tc_while(number) {
            self.collaborators.scheduler.cancel(timer);
        }
    }

    fn flush_port(&mut self, number: u16) {
        self.collaborators.mac_table.flush(number);
        self.stats.flushes += 1;
    }

    fn flush_other_ports(&mut self, except: Option<u16>) {
        let numbers: Vec<u16> = self
            .ports
            .values()
            .filter(|port| port.is_enabled() && Some(port.number()) != except)
            .map(PortRecord::number)
            .collect();
        for number in numbers {
            self.flush_port(number);
        }
    }

    /// Advertises on every non-edge designated port.
    fn send_bpdus(&mut self) {
        let numbers: Vec<u16> = self
            .ports
            .values()
            .filter(|port| port.is_enabled() && !port.oper_edge)
            .filter(|port| port.role == PortRole::Designated)
            .map(PortRecord::number)
            .collect();
        for number in numbers {
            self.send_bpdu(number);
        }
    }

    /// Repeats the topology change toward the root while the root port's
    /// window is open. This is the only place the root port transmits.
    fn send_tcn_to_root(&mut self) {
        let Some(root_port) = self.root_port else {
            return;
        };
        if self
            .ports
            .get(&root_port)
            .is_some_and(|port| port.tc_while.is_running())
        {
            self.send_bpdu(root_port);
        }
    }

    fn send_bpdu(&mut self, number: u16) {
        let Some(port) = self.ports.get(&number) else {
            return;
        };
        if !port.is_enabled() {
            return;
        }
        let vector = self.root_vector.designated_for(self.bridge_id, port.id);
        let flags = TcFlags {
            topology_change: port.tc_while.is_running() && !port.tc_ack,
            topology_change_ack: port.tc_ack,
        };
        debug!("Sending {} on port {} ({:?})", vector, number, flags);
        self.collaborators.transport.send_vector(number, vector, flags);
        self.stats.vectors_sent += 1;
    }

    /// Arms the upgrade timer for the earliest pending migration delay.
    fn schedule_next_upgrade(&mut self) {
        let next = self
            .ports
            .values()
            .filter(|port| port.is_enabled())
            .filter_map(|port| port.migration_delay.expiry())
            .min();
        if next == self.upgrade_at {
            return;
        }
        let upgrade = self.timers.upgrade();
        match next {
            Some(at) => self.collaborators.scheduler.schedule_at(at, upgrade),
            None => self.collaborators.scheduler.cancel(upgrade),
        }
        self.upgrade_at = next;
    }
}
