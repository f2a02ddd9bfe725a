//! Handling of received priority vectors.

use super::RstpEngine;
use crate::event::TcFlags;
use crate::vector::{compare, CompareResult, PriorityVector};
use tracing::{debug, info, warn};

impl RstpEngine {
    pub(super) fn process_vector(&mut self, number: u16, vector: PriorityVector, flags: TcFlags) {
        self.stats.vectors_received += 1;
        let me = self.bridge_id;
        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        if !port.is_enabled() {
            debug!("Dropping vector on disabled port {}", number);
            self.stats.vectors_dropped += 1;
            return;
        }
        if let Err(e) = vector.validate() {
            warn!("Dropping malformed vector on port {}: {}", number, e);
            self.stats.vectors_dropped += 1;
            return;
        }

        port.peer_seen = true;
        if port.oper_edge {
            info!("Port {} heard a BPDU, leaving edge operation", number);
            port.oper_edge = false;
        }
        let port_id = port.id;
        let stored = port.best_received;

        // TC flags apply to the state the port held when the frame arrived.
        self.check_tc(number, flags);

        if vector.is_from(me) && vector.designated_port_id() == port_id {
            self.process_loopback(number, vector);
            return;
        }

        let current = stored.unwrap_or_else(|| self.root_vector.designated_for(me, port_id));
        let outcome = compare(&vector, &current);
        if outcome.is_better() {
            self.process_better_source(number, vector, outcome);
        } else if stored
            .is_some_and(|best| best.designated_bridge_id() == vector.designated_bridge_id())
        {
            self.process_same_source(number, vector, outcome);
        } else {
            debug!(
                "Ignoring inferior vector {} on port {} ({:?})",
                vector, number, outcome
            );
        }
    }

    /// The port hears its own advertisement: it is looped onto itself.
    fn process_loopback(&mut self, number: u16, vector: PriorityVector) {
        if let Some(port) = self.ports.get_mut(&number) {
            if port.best_received.is_none() {
                warn!("Port {} is looped back onto itself", number);
            }
            port.record(vector);
        }
        self.recompute_port_role(number);
    }

    fn process_better_source(&mut self, number: u16, vector: PriorityVector, outcome: CompareResult) {
        debug!(
            "Better vector {} on port {} ({:?})",
            vector, number, outcome
        );
        if let Some(port) = self.ports.get_mut(&number) {
            port.record(vector);
        }
        self.reselect(Some(number));
    }

    /// The port's current designated bridge sent equal or worse information.
    fn process_same_source(&mut self, number: u16, vector: PriorityVector, outcome: CompareResult) {
        let changed = self
            .ports
            .get_mut(&number)
            .map(|port| {
                let changed = port.best_received != Some(vector);
                port.record(vector);
                changed
            })
            .unwrap_or(false);
        if !changed {
            return;
        }

        debug!(
            "Source on port {} degraded its information to {} ({:?})",
            number, vector, outcome
        );
        if self.root_port == Some(number) {
            self.reselect(Some(number));
        } else {
            self.recompute_port_role(number);
        }
    }

    /// Reacts to the topology change flags of a received vector.
    fn check_tc(&mut self, number: u16, flags: TcFlags) {
        let is_root_port = self.root_port == Some(number);
        let Some(port) = self.ports.get(&number) else {
            return;
        };

        if flags.topology_change_ack && is_root_port && port.tc_while.is_running() && !port.tc_ack
        {
            debug!("Topology change acknowledged on root port {}", number);
            self.stop_tc_while(number);
        }

        let Some(port) = self.ports.get_mut(&number) else {
            return;
        };
        if !flags.topology_change || !port.is_forwarding() {
            return;
        }

        info!("Topology change notification on port {}", number);
        self.stats.tc_received += 1;
        port.tc_ack = true;
        self.start_tc_while(number);

        let others: Vec<u16> = self
            .ports
            .values()
            .filter(|other| other.number() != number && other.is_enabled() && !other.oper_edge)
            .map(|other| other.number())
            .collect();
        for other in others {
            self.start_tc_while(other);
        }
        self.flush_other_ports(Some(number));
        self.need_transmit = true;
    }
}

