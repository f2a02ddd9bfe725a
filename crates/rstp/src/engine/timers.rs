//! Timer expiries and link events.

use super::{RstpEngine, MAX_LOST_HELLOS};
use crate::port::{PortRole, PortState};
use crate::timer::TimerKind;
use tracing::{debug, info};

impl RstpEngine {
    pub(super) fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Hello => self.handle_hello_time(),
            TimerKind::Upgrade => self.handle_upgrade(),
            TimerKind::TcWhile(port) => self.handle_tc_while_expired(port),
        }
    }

    /// Ages stored information, advertises, and re-arms the hello timer.
    fn handle_hello_time(&mut self) {
        let mut aged = Vec::new();
        for port in self.ports.values_mut().filter(|port| port.is_enabled()) {
            if port.best_received.is_none() {
                continue;
            }
            port.lost_hellos += 1;
            if port.lost_hellos > MAX_LOST_HELLOS {
                aged.push(port.number());
            }
        }
        for number in aged {
            self.age_out(number);
        }

        self.need_transmit = true;
        let (at, hello) = (self.now + self.hello_time, self.timers.hello());
        self.collaborators.scheduler.schedule_at(at, hello);
    }

    fn age_out(&mut self, number: u16) {
        if let Some(port) = self.ports.get_mut(&number) {
            info!(
                "Port {} information aged out after {} hellos",
                number, port.lost_hellos
            );
            port.best_received = None;
            port.lost_hellos = 0;
        }
        self.stats.aged_out += 1;

        if self.root_port == Some(number) {
            self.promote_best_alternate(number);
        }
        self.reselect(Some(number));
    }

    /// Walks every port whose migration delay elapsed one step further.
    fn handle_upgrade(&mut self) {
        self.upgrade_at = None;
        let now = self.now;
        let due: Vec<u16> = self
            .ports
            .values()
            .filter(|port| port.is_enabled() && port.migration_delay.has_expired(now))
            .map(|port| port.number())
            .collect();
        for number in due {
            self.upgrade_port(number);
        }
    }

    fn upgrade_port(&mut self, number: u16) {
        let (now, auto_edge) = (self.now, self.auto_edge);
        let step = self.transition_step(number);
        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        port.migration_delay.stop();

        if port.migrating {
            port.migrating = false;
            if port.role != PortRole::Designated || port.state != PortState::Discarding {
                return;
            }
            if auto_edge && !port.peer_seen {
                info!("Port {} heard no BPDU, operating as edge port", number);
                port.oper_edge = true;
                port.state = PortState::Forwarding;
                self.need_transmit = true;
                self.topology_change(Some(number));
            } else {
                debug!("Port {} committed, next step in {:?}", number, step);
                port.migration_delay.start(now, step);
            }
            return;
        }

        match (port.role, port.state) {
            (PortRole::Designated, PortState::Discarding) => {
                info!("Port {} goes into learning state", number);
                port.state = PortState::Learning;
                port.migration_delay.start(now, step);
            }
            (PortRole::Designated, PortState::Learning) => {
                info!("Port {} goes into forwarding state", number);
                port.state = PortState::Forwarding;
                self.need_transmit = true;
                self.topology_change(Some(number));
            }
            _ => {}
        }
    }

    fn handle_tc_while_expired(&mut self, number: u16) {
        let now = self.now;
        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        if !port.is_enabled() || !port.tc_while.has_expired(now) {
            debug!("Ignoring stale tcWhile expiry on port {}", number);
            return;
        }
        debug!("Topology change window closed on port {}", number);
        port.tc_while.stop();
        port.tc_ack = false;
    }

    pub(super) fn link_up(&mut self, number: u16) {
        if self.ports.get(&number).is_some_and(|port| port.is_enabled()) {
            debug!("Port {} already up", number);
            return;
        }
        info!("Port {} link up", number);
        self.init_port(number);
        self.flush_port(number);
        self.recompute_port_role(number);
        if self.ports.get(&number).is_some_and(|port| port.oper_edge) {
            self.topology_change(Some(number));
        }
    }

    pub(super) fn link_down(&mut self, number: u16) {
        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        if !port.is_enabled() {
            debug!("Port {} already down", number);
            return;
        }
        let was_designated_forwarding =
            port.role == PortRole::Designated && port.is_forwarding();
        port.reset();
        info!("Port {} link down", number);

        if let Some(timer) = self.timers.tc_while(number) {
            self.collaborators.scheduler.cancel(timer);
        }
        self.flush_port(number);
        self.need_transmit = true;

        if self.root_port == Some(number) {
            self.promote_best_alternate(number);
        }
        self.reselect(Some(number));
        if was_designated_forwarding {
            self.topology_change(Some(number));
        }
    }
}
