use super::*;
use crate::collaborators::{MacTable, Scheduler, Transport};
use crate::config::PortConfig;
use crate::event::{RstpEvent, TcFlags};
use crate::timer::TimerId;
use pretty_assertions::assert_eq;
use rstp_types::MacAddress;
use std::sync::{Arc, Mutex};

const ROOT_A: BridgeId = BridgeId::new(0, MacAddress::from_u64(0x0a));
const SELF_B: BridgeId = BridgeId::new(1, MacAddress::from_u64(0x0b));
const PEER_C: BridgeId = BridgeId::new(0, MacAddress::from_u64(0x0c));
const WEAK_D: BridgeId = BridgeId::new(9, MacAddress::from_u64(0x0d));

type Sent = (u16, PriorityVector, TcFlags);

/// Records every collaborator call.
#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<Sent>>,
    pending: Mutex<BTreeMap<TimerId, Instant>>,
    flushed: Mutex<Vec<u16>>,
}

impl Recorder {
    fn take_sent(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    fn take_flushed(&self) -> Vec<u16> {
        std::mem::take(&mut *self.flushed.lock().unwrap())
    }

    fn pending(&self, timer: TimerId) -> Option<Instant> {
        self.pending.lock().unwrap().get(&timer).copied()
    }

    /// Removes and returns the earliest timer due at or before `until`.
    fn pop_due(&self, until: Instant) -> Option<(Instant, TimerId)> {
        let mut pending = self.pending.lock().unwrap();
        let next = pending
            .iter()
            .map(|(timer, at)| (*at, *timer))
            .filter(|(at, _)| *at <= until)
            .min()?;
        pending.remove(&next.1);
        Some(next)
    }
}

impl Transport for Recorder {
    fn send_vector(&self, port: u16, vector: PriorityVector, flags: TcFlags) {
        self.sent.lock().unwrap().push((port, vector, flags));
    }
}

impl Scheduler for Recorder {
    fn schedule_at(&self, at: Instant, timer: TimerId) {
        self.pending.lock().unwrap().insert(timer, at);
    }

    fn cancel(&self, timer: TimerId) {
        self.pending.lock().unwrap().remove(&timer);
    }
}

impl MacTable for Recorder {
    fn flush(&self, port: u16) {
        self.flushed.lock().unwrap().push(port);
    }
}

fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

fn vector(root: BridgeId, cost: u32, bridge: BridgeId, port: u16) -> PriorityVector {
    PriorityVector::new(root, cost, bridge, PortId::new(128, port))
}

fn config(ports: &[u16]) -> RstpConfig {
    RstpConfig::new(SELF_B.priority, SELF_B.address)
        .with_ports(ports.iter().copied())
        .with_auto_edge(false)
}

fn engine(config: RstpConfig) -> (RstpEngine, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let collaborators = Collaborators::new(recorder.clone(), recorder.clone(), recorder.clone());
    let engine = RstpEngine::new(config, collaborators).unwrap();
    (engine, recorder)
}

fn started(config: RstpConfig) -> (RstpEngine, Arc<Recorder>) {
    let (mut engine, recorder) = engine(config);
    engine.start(Instant::ZERO).unwrap();
    (engine, recorder)
}

/// Bridge B with ports 1-3, port 1 attached to root A since t=100ms.
fn rooted() -> (RstpEngine, Arc<Recorder>) {
    let (mut engine, recorder) = started(config(&[1, 2, 3]));
    receive(&mut engine, 100, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::NONE);
    recorder.take_sent();
    recorder.take_flushed();
    (engine, recorder)
}

fn receive(engine: &mut RstpEngine, ms: u64, port: u16, vector: PriorityVector, flags: TcFlags) {
    engine
        .handle_event(
            at(ms),
            RstpEvent::VectorArrived {
                port,
                vector,
                flags,
            },
        )
        .unwrap();
}

/// Fires every pending timer due up to `until_ms`, in time order.
fn run_timers(engine: &mut RstpEngine, recorder: &Recorder, until_ms: u64) {
    while let Some((when, timer)) = recorder.pop_due(at(until_ms)) {
        engine
            .handle_event(when, RstpEvent::TimerExpired { timer })
            .unwrap();
    }
}

fn role_state(engine: &RstpEngine, port: u16) -> (PortRole, PortState) {
    let port = engine.port(port).unwrap();
    (port.role(), port.state())
}

#[test]
fn test_new_rejects_invalid_config() {
    let recorder = Arc::new(Recorder::default());
    let collaborators = Collaborators::new(recorder.clone(), recorder.clone(), recorder.clone());
    let config = RstpConfig::new(1, SELF_B.address).with_port(PortConfig::new(1).with_link_cost(0));

    let err = RstpEngine::new(config, collaborators).unwrap_err();
    assert!(err.is_config_error());
}

#[test]
fn test_caller_errors() {
    let (mut engine, _recorder) = engine(config(&[1, 2, 3]));
    assert!(matches!(
        engine.handle_event(at(0), RstpEvent::LinkUp { port: 1 }),
        Err(RstpError::NotStarted)
    ));

    engine.start(at(0)).unwrap();
    assert!(matches!(engine.start(at(1)), Err(RstpError::AlreadyStarted)));
    assert!(matches!(
        engine.handle_event(at(1), RstpEvent::LinkDown { port: 9 }),
        Err(RstpError::UnknownPort(9))
    ));
    let bogus = TimerId::from_raw(999);
    assert!(matches!(
        engine.handle_event(at(1), RstpEvent::TimerExpired { timer: bogus }),
        Err(RstpError::UnknownTimer(_))
    ));
}

#[test]
fn test_start_claims_root_and_advertises() {
    let (engine, recorder) = started(config(&[1, 2, 3]));

    assert!(engine.is_root_bridge());
    assert_eq!(*engine.root_vector(), PriorityVector::bridge_as_root(SELF_B));
    for number in 1..=3 {
        assert_eq!(
            role_state(&engine, number),
            (PortRole::Designated, PortState::Discarding)
        );
    }

    assert_eq!(
        recorder.take_sent(),
        vec![
            (1, vector(SELF_B, 0, SELF_B, 1), TcFlags::NONE),
            (2, vector(SELF_B, 0, SELF_B, 2), TcFlags::NONE),
            (3, vector(SELF_B, 0, SELF_B, 3), TcFlags::NONE),
        ]
    );
    assert_eq!(recorder.take_flushed(), vec![1, 2, 3]);
    assert_eq!(recorder.pending(engine.timers().hello()), Some(at(2000)));
    assert_eq!(recorder.pending(engine.timers().upgrade()), Some(at(3000)));
    engine.check_invariants().unwrap();
}

#[test]
fn test_better_root_selects_root_port() {
    let (mut engine, recorder) = started(config(&[1, 2, 3]));
    recorder.take_sent();
    recorder.take_flushed();

    receive(&mut engine, 100, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::NONE);

    assert_eq!(engine.root_port(), Some(1));
    assert_eq!(*engine.root_vector(), vector(ROOT_A, 19, ROOT_A, 1));
    assert_eq!(role_state(&engine, 1), (PortRole::Root, PortState::Forwarding));
    assert_eq!(
        role_state(&engine, 2),
        (PortRole::Designated, PortState::Discarding)
    );
    assert_eq!(engine.stats().root_changes, 1);
    assert!(engine.stats().topology_changes >= 1);

    let flushed = recorder.take_flushed();
    assert!(flushed.contains(&2) && flushed.contains(&3));
    assert!(!flushed.contains(&1));

    assert_eq!(
        recorder.take_sent(),
        vec![
            (1, vector(ROOT_A, 19, SELF_B, 1), TcFlags::tc()),
            (2, vector(ROOT_A, 19, SELF_B, 2), TcFlags::tc()),
            (3, vector(ROOT_A, 19, SELF_B, 3), TcFlags::tc()),
        ]
    );
    engine.check_invariants().unwrap();
}

#[test]
fn test_worse_root_injection_leaves_state_unchanged() {
    let (mut engine, recorder) = rooted();
    let before = engine.snapshot();

    receive(&mut engine, 200, 2, vector(WEAK_D, 0, WEAK_D, 1), TcFlags::NONE);
    receive(&mut engine, 300, 1, vector(WEAK_D, 0, WEAK_D, 3), TcFlags::NONE);

    assert_eq!(engine.snapshot(), before);
    assert!(recorder.take_sent().is_empty());
    assert!(recorder.take_flushed().is_empty());
}

#[test]
fn test_second_path_becomes_alternate() {
    let (mut engine, _recorder) = started(config(&[1, 2]));
    receive(&mut engine, 100, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::NONE);
    receive(&mut engine, 200, 2, vector(ROOT_A, 19, PEER_C, 2), TcFlags::NONE);

    assert_eq!(engine.root_port(), Some(1));
    assert_eq!(
        role_state(&engine, 2),
        (PortRole::Alternate, PortState::Discarding)
    );
    assert_eq!(engine.get_best_alternate(), Some(2));
    engine.check_invariants().unwrap();
}

#[test]
fn test_root_port_down_promotes_alternate() {
    let (mut engine, recorder) = started(config(&[1, 2]));
    receive(&mut engine, 100, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::NONE);
    receive(&mut engine, 200, 2, vector(ROOT_A, 19, PEER_C, 2), TcFlags::NONE);

    engine
        .handle_event(at(300), RstpEvent::LinkDown { port: 1 })
        .unwrap();

    assert_eq!(engine.root_port(), Some(2));
    assert_eq!(*engine.root_vector(), vector(ROOT_A, 38, PEER_C, 2));
    assert_eq!(role_state(&engine, 2), (PortRole::Root, PortState::Forwarding));
    assert_eq!(role_state(&engine, 1), (PortRole::Disabled, PortState::Discarding));
    let tc_1 = engine.timers().tc_while(1).unwrap();
    assert_eq!(recorder.pending(tc_1), None);
    engine.check_invariants().unwrap();
}

#[test]
fn test_own_vector_from_sibling_port_makes_backup() {
    let (mut engine, _recorder) = started(config(&[1, 2]));

    receive(&mut engine, 100, 2, vector(SELF_B, 0, SELF_B, 1), TcFlags::NONE);

    assert!(engine.is_root_bridge());
    assert_eq!(role_state(&engine, 2), (PortRole::Backup, PortState::Discarding));
    assert_eq!(
        role_state(&engine, 1),
        (PortRole::Designated, PortState::Discarding)
    );
    engine.check_invariants().unwrap();
}

#[test]
fn test_same_upstream_on_two_ports_makes_backup() {
    let (mut engine, _recorder) = started(config(&[1, 2]));
    receive(&mut engine, 100, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::NONE);
    receive(&mut engine, 200, 2, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::NONE);

    assert_eq!(engine.root_port(), Some(1));
    assert_eq!(role_state(&engine, 1), (PortRole::Root, PortState::Forwarding));
    assert_eq!(role_state(&engine, 2), (PortRole::Backup, PortState::Discarding));
    engine.check_invariants().unwrap();

    engine
        .handle_event(at(300), RstpEvent::LinkDown { port: 1 })
        .unwrap();

    assert_eq!(engine.root_port(), Some(2));
    assert_eq!(role_state(&engine, 2), (PortRole::Root, PortState::Forwarding));
    assert_eq!(*engine.root_vector(), vector(ROOT_A, 19, ROOT_A, 1));
    engine.check_invariants().unwrap();
}

#[test]
fn test_looped_port_becomes_backup() {
    let (mut engine, _recorder) = started(config(&[1]));

    receive(&mut engine, 100, 1, vector(SELF_B, 0, SELF_B, 1), TcFlags::NONE);

    assert_eq!(role_state(&engine, 1), (PortRole::Backup, PortState::Discarding));
    assert!(engine.is_root_bridge());
}

#[test]
fn test_malformed_vectors_dropped() {
    let (mut engine, recorder) = started(config(&[1]));
    recorder.take_sent();
    let before = engine.snapshot();

    let port_zero = PriorityVector::new(ROOT_A, 0, ROOT_A, PortId::new(128, 0));
    receive(&mut engine, 100, 1, port_zero, TcFlags::NONE);
    receive(&mut engine, 200, 1, vector(ROOT_A, 5, ROOT_A, 1), TcFlags::NONE);

    assert_eq!(engine.stats().vectors_dropped, 2);
    assert_eq!(engine.snapshot(), before);
    assert!(recorder.take_sent().is_empty());
}

#[test]
fn test_designated_port_walks_to_forwarding() {
    let (mut engine, recorder) = started(config(&[1]));
    // Peer speaks but loses the designated contest.
    receive(&mut engine, 500, 1, vector(WEAK_D, 0, WEAK_D, 1), TcFlags::NONE);

    run_timers(&mut engine, &recorder, 2999);
    assert_eq!(
        role_state(&engine, 1),
        (PortRole::Designated, PortState::Discarding)
    );
    run_timers(&mut engine, &recorder, 5999);
    assert_eq!(
        role_state(&engine, 1),
        (PortRole::Designated, PortState::Discarding)
    );
    run_timers(&mut engine, &recorder, 6000);
    assert_eq!(
        role_state(&engine, 1),
        (PortRole::Designated, PortState::Learning)
    );
    run_timers(&mut engine, &recorder, 9000);
    assert_eq!(
        role_state(&engine, 1),
        (PortRole::Designated, PortState::Forwarding)
    );
    assert_eq!(engine.stats().topology_changes, 1);
    assert_eq!(recorder.pending(engine.timers().upgrade()), None);
}

#[test]
fn test_silent_port_falls_back_to_forward_delay() {
    let (mut engine, recorder) = started(config(&[1]));

    run_timers(&mut engine, &recorder, 17999);
    assert_eq!(engine.port(1).unwrap().state(), PortState::Discarding);
    run_timers(&mut engine, &recorder, 18000);
    assert_eq!(engine.port(1).unwrap().state(), PortState::Learning);
    run_timers(&mut engine, &recorder, 32999);
    assert_eq!(engine.port(1).unwrap().state(), PortState::Learning);
    run_timers(&mut engine, &recorder, 33000);
    assert_eq!(engine.port(1).unwrap().state(), PortState::Forwarding);
    assert!(!engine.port(1).unwrap().is_edge());
}

#[test]
fn test_auto_edge_port_forwards_after_migration() {
    let (mut engine, recorder) = started(config(&[1]).with_auto_edge(true));

    run_timers(&mut engine, &recorder, 3000);
    let port = engine.port(1).unwrap();
    assert!(port.is_edge());
    assert_eq!(port.state(), PortState::Forwarding);

    recorder.take_sent();
    run_timers(&mut engine, &recorder, 4000);
    assert!(recorder.take_sent().is_empty());

    // A BPDU ends edge operation.
    receive(&mut engine, 4500, 1, vector(WEAK_D, 0, WEAK_D, 1), TcFlags::NONE);
    assert!(!engine.port(1).unwrap().is_edge());
}

#[test]
fn test_configured_edge_port_forwards_immediately() {
    let config = config(&[1]).with_port(PortConfig::new(2).edge());
    let (engine, recorder) = started(config);

    assert_eq!(
        role_state(&engine, 2),
        (PortRole::Designated, PortState::Forwarding)
    );
    assert!(recorder.take_sent().iter().all(|(port, _, _)| *port != 2));
}

#[test]
fn test_topology_change_propagates_from_root_port() {
    let (mut engine, recorder) = rooted();
    run_timers(&mut engine, &recorder, 5000);
    recorder.take_sent();
    recorder.take_flushed();

    receive(&mut engine, 5000, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::tc());

    assert_eq!(recorder.take_flushed(), vec![2, 3]);
    assert_eq!(engine.stats().tc_received, 1);
    assert!(engine.port(1).unwrap().tc_ack());
    for number in 1..=3 {
        assert!(engine.port(number).unwrap().tc_while().is_running());
    }
    assert_eq!(
        recorder.take_sent(),
        vec![
            (1, vector(ROOT_A, 19, SELF_B, 1), TcFlags::ack()),
            (2, vector(ROOT_A, 19, SELF_B, 2), TcFlags::tc()),
            (3, vector(ROOT_A, 19, SELF_B, 3), TcFlags::tc()),
        ]
    );

    run_timers(&mut engine, &recorder, 7000);
    let port = engine.port(1).unwrap();
    assert!(!port.tc_ack());
    assert!(!port.tc_while().is_running());
}

#[test]
fn test_topology_change_ignored_on_discarding_port() {
    let (mut engine, recorder) = rooted();
    run_timers(&mut engine, &recorder, 5000);
    recorder.take_flushed();

    receive(&mut engine, 5000, 2, vector(WEAK_D, 0, WEAK_D, 1), TcFlags::tc());

    assert!(recorder.take_flushed().is_empty());
    assert_eq!(engine.stats().tc_received, 0);
}

#[test]
fn test_ack_on_root_port_closes_window() {
    let (mut engine, recorder) = rooted();
    assert!(engine.port(1).unwrap().tc_while().is_running());

    receive(&mut engine, 200, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::ack());

    assert!(!engine.port(1).unwrap().tc_while().is_running());
    let tc_1 = engine.timers().tc_while(1).unwrap();
    assert_eq!(recorder.pending(tc_1), None);
    assert!(engine.port(2).unwrap().tc_while().is_running());
}

#[test]
fn test_root_port_repeats_tc_each_hello_until_acked() {
    let mut config = config(&[1, 2, 3]);
    config.timers.tc_while_time_ms = 7000;
    let (mut engine, recorder) = started(config);
    receive(&mut engine, 100, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::NONE);
    recorder.take_sent();

    let on_root_port = |sent: Vec<Sent>| -> Vec<TcFlags> {
        sent.into_iter()
            .filter(|(port, _, _)| *port == 1)
            .map(|(_, _, flags)| flags)
            .collect()
    };

    run_timers(&mut engine, &recorder, 2000);
    assert_eq!(on_root_port(recorder.take_sent()), vec![TcFlags::tc()]);

    run_timers(&mut engine, &recorder, 4000);
    let repeated = on_root_port(recorder.take_sent());
    assert!(!repeated.is_empty());
    assert!(repeated.iter().all(|flags| *flags == TcFlags::tc()));

    receive(&mut engine, 4100, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::ack());
    assert!(!engine.port(1).unwrap().tc_while().is_running());

    run_timers(&mut engine, &recorder, 6000);
    let sent = recorder.take_sent();
    assert!(sent.iter().any(|(port, _, _)| *port == 2));
    assert!(on_root_port(sent).is_empty());
}

#[test]
fn test_check_invariants_reports_root_port_mismatch() {
    let (mut engine, _recorder) = rooted();
    engine.check_invariants().unwrap();

    engine.root_port = Some(2);
    assert_eq!(
        engine.check_invariants(),
        Err(InvariantError::RootPortMismatch {
            recorded: Some(2),
            roles: vec![1],
        })
    );
}

#[test]
fn test_root_information_ages_out() {
    let (mut engine, recorder) = rooted();

    run_timers(&mut engine, &recorder, 7999);
    assert_eq!(engine.root_port(), Some(1));

    run_timers(&mut engine, &recorder, 8000);
    assert!(engine.is_root_bridge());
    assert_eq!(engine.stats().aged_out, 1);
    assert_eq!(engine.stats().root_changes, 2);
    assert_eq!(engine.port(1).unwrap().role(), PortRole::Designated);
    assert_eq!(engine.port(1).unwrap().best_received(), None);
    engine.check_invariants().unwrap();
}

#[test]
fn test_refreshed_information_does_not_age() {
    let (mut engine, recorder) = rooted();

    for ms in (1000..=20000).step_by(2000) {
        run_timers(&mut engine, &recorder, ms);
        receive(&mut engine, ms, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::NONE);
    }

    assert_eq!(engine.root_port(), Some(1));
    assert_eq!(engine.stats().aged_out, 0);
}

#[test]
fn test_same_source_degradation_on_root_port_reselects() {
    let (mut engine, _recorder) = rooted();

    // A now claims a root this bridge outranks.
    receive(&mut engine, 200, 1, vector(WEAK_D, 10, ROOT_A, 1), TcFlags::NONE);

    assert!(engine.is_root_bridge());
    assert_eq!(engine.port(1).unwrap().role(), PortRole::Designated);
    assert_eq!(
        engine.port(1).unwrap().best_received(),
        Some(&vector(WEAK_D, 10, ROOT_A, 1))
    );
    assert_eq!(engine.stats().root_changes, 2);
    engine.check_invariants().unwrap();
}

#[test]
fn test_link_down_and_up() {
    let (mut engine, recorder) = rooted();
    engine
        .handle_event(at(300), RstpEvent::LinkDown { port: 2 })
        .unwrap();

    assert_eq!(role_state(&engine, 2), (PortRole::Disabled, PortState::Discarding));
    let tc_2 = engine.timers().tc_while(2).unwrap();
    assert_eq!(recorder.pending(tc_2), None);

    receive(&mut engine, 400, 2, vector(ROOT_A, 0, ROOT_A, 2), TcFlags::NONE);
    assert_eq!(engine.stats().vectors_dropped, 1);
    assert_eq!(engine.port(2).unwrap().best_received(), None);

    engine
        .handle_event(at(500), RstpEvent::LinkUp { port: 2 })
        .unwrap();
    let port = engine.port(2).unwrap();
    assert_eq!((port.role(), port.state()), (PortRole::Designated, PortState::Discarding));
    assert_eq!(port.migration_delay().expiry(), Some(at(3500)));
    assert_eq!(engine.root_port(), Some(1));
    engine.check_invariants().unwrap();
}

#[test]
fn test_identical_event_sequences_replay_identically() {
    fn replay() -> (Vec<Sent>, Vec<u16>, EngineSnapshot, RstpStats) {
        let (mut engine, recorder) = started(config(&[1, 2, 3]));
        receive(&mut engine, 100, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::NONE);
        receive(&mut engine, 150, 2, vector(ROOT_A, 19, PEER_C, 2), TcFlags::NONE);
        run_timers(&mut engine, &recorder, 4000);
        receive(&mut engine, 4100, 1, vector(ROOT_A, 0, ROOT_A, 1), TcFlags::tc());
        engine
            .handle_event(at(4200), RstpEvent::LinkDown { port: 1 })
            .unwrap();
        run_timers(&mut engine, &recorder, 30000);
        (
            recorder.take_sent(),
            recorder.take_flushed(),
            engine.snapshot(),
            engine.stats().clone(),
        )
    }

    assert_eq!(replay(), replay());
}

#[test]
fn test_snapshot_serializes() {
    let (engine, _recorder) = rooted();
    let value = serde_json::to_value(engine.snapshot()).unwrap();

    assert_eq!(value["root_port"], 1);
    assert_eq!(value["ports"][0]["role"], "root");
    assert_eq!(value["ports"][1]["state"], "discarding");
}
