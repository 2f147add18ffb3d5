//! The peer to peer delay mechanism and the neighbor rate estimator.
//!
//! A port answers peer delay requests whatever its protocol state, and when
//! configured for the peer to peer mechanism it runs its own request cycle
//! against the link neighbor. The measured link delay and the health of the
//! exchange feed the gPTP asCapable predicate.

use arrayvec::ArrayVec;
use rand::Rng;

use super::{fsm::FsmEvent, FaultType, Measurement, Port, PortActionIterator, PortState, Running};
use crate::{
    bmc::acceptable_master::AcceptableMasterList,
    config::{DelayMechanism, PortConfig},
    datastructures::{
        common::PortIdentity,
        messages::{Header, Message, PDelayRespMessage, PDelayRespFollowUpMessage},
    },
    filters::Filter,
    port::{actions::TimestampContextInner, PortAction, TimestampContext},
    ptp_instance::PtpInstanceStateMutex,
    time::{Duration, Time},
    Clock,
};

/// How many peer delay responses may go missing before the link is not
/// considered capable anymore
const ALLOWED_LOST_RESPONSES: u32 = 3;

/// Length of the moving median window smoothing the link delay
const DELAY_FILTER_LENGTH: usize = 10;

/// State of the exchange this port initiated, a single slot that is
/// replaced when a new request goes out.
#[derive(Debug)]
struct PdelayExchange {
    id: u16,
    /// t1, the transmit timestamp of our request
    send_time: Option<Time>,
    response: Option<PdelayResponse>,
    turnaround: Option<PdelayTurnaround>,
}

#[derive(Debug)]
struct PdelayResponse {
    /// t2, when the peer saw our request
    request_receipt: Time,
    /// t4, when we saw the response
    recv_time: Time,
    /// correction of the response plus the configured asymmetry
    correction: Duration,
    responder: PortIdentity,
}

#[derive(Debug)]
enum PdelayTurnaround {
    /// The peer folded its turnaround time into the correction field
    OneStep,
    /// The peer reports its response transmit time in a follow up
    TwoStep {
        response_origin: Time,
        correction: Duration,
    },
}

#[derive(Debug)]
struct NeighborRateEstimator {
    origin_first: Option<Time>,
    ingress_first: Option<Time>,
    count: u32,
    max_count: u32,
    ratio: f64,
    ratio_valid: bool,
}

impl NeighborRateEstimator {
    fn new(max_count: u32) -> Self {
        Self {
            origin_first: None,
            ingress_first: None,
            count: 0,
            max_count,
            ratio: 1.0,
            ratio_valid: false,
        }
    }

    /// The ratio is the slope of the peer's transmit clock against our
    /// receive clock, sampled `max_count` exchanges apart.
    fn sample(&mut self, origin: Time, ingress: Time) {
        let (Some(origin_first), Some(ingress_first)) = (self.origin_first, self.ingress_first)
        else {
            self.origin_first = Some(origin);
            self.ingress_first = Some(ingress);
            return;
        };

        self.count += 1;
        if self.count < self.max_count {
            return;
        }

        if ingress == ingress_first {
            log::warn!("bad timestamps in neighbor rate calculation");
            return;
        }

        self.ratio =
            (origin - origin_first).nanos_lossy() / (ingress - ingress_first).nanos_lossy();
        self.origin_first = Some(origin);
        self.ingress_first = Some(ingress);
        self.count = 0;
        self.ratio_valid = true;
    }
}

#[derive(Debug)]
pub(super) struct PeerDelayState {
    pub(super) as_capable: bool,
    exchange: Option<PdelayExchange>,
    /// Identity of the peer that last answered, used to detect a changing
    /// or multiplying neighborhood
    peer_port_id: Option<PortIdentity>,
    pdr_missing: u32,
    /// Responses of multiple origin seen for the current request
    multiple_pdr: bool,
    /// Whether this request cycle already counted towards the sequence
    multiple_pdr_detected: bool,
    multiple_seq_pdr_count: u32,
    nrate: NeighborRateEstimator,
    delay_window: ArrayVec<Duration, DELAY_FILTER_LENGTH>,
    mean_delay: Option<Duration>,
}

impl PeerDelayState {
    pub(super) fn new<A>(config: &PortConfig<A>) -> Self {
        let mut state = Self {
            as_capable: false,
            exchange: None,
            peer_port_id: None,
            pdr_missing: 0,
            multiple_pdr: false,
            multiple_pdr_detected: false,
            multiple_seq_pdr_count: 0,
            nrate: NeighborRateEstimator::new(1),
            delay_window: ArrayVec::new(),
            mean_delay: None,
        };
        state.reset_nrate(config);
        state
    }

    /// Start over as if the link just came up. The port starts out not
    /// capable and has to earn the flag with clean exchanges.
    fn reset_nrate<A>(&mut self, config: &PortConfig<A>) {
        let shift = (config.freq_est_interval.as_log_2() as i32
            - config.delay_mechanism.interval().as_log_2() as i32)
            .clamp(0, 30);

        self.pdr_missing = ALLOWED_LOST_RESPONSES + 1;
        self.as_capable = false;
        self.peer_port_id = None;
        self.nrate = NeighborRateEstimator::new(1u32 << shift);
    }

    pub(super) fn clear_exchange(&mut self) {
        self.exchange = None;
    }

    pub(super) fn mean_delay(&self) -> Option<Duration> {
        self.mean_delay
    }

    pub(super) fn neighbor_rate_ratio(&self) -> f64 {
        self.nrate.ratio
    }

    fn update_filtered_delay(&mut self, delay: Duration) -> Duration {
        if self.delay_window.is_full() {
            self.delay_window.remove(0);
        }
        self.delay_window.push(delay);

        let mut sorted: ArrayVec<Duration, DELAY_FILTER_LENGTH> = self.delay_window.clone();
        sorted.sort_unstable();
        let filtered = sorted[sorted.len() / 2];

        self.mean_delay = Some(filtered);
        filtered
    }
}

impl<'a, A: AcceptableMasterList, C: Clock, F: Filter, R: Rng, S: PtpInstanceStateMutex>
    Port<'a, Running, A, R, C, F, S>
{
    /// Recompute the asCapable predicate, resetting the rate estimator when
    /// the link stops being capable. Returns the actions needed when the
    /// flag flips.
    fn capable_update<'b>(&mut self) -> PortActionIterator<'b> {
        let capable = if !self.config.gptp_profile {
            true
        } else {
            let peer = &self.peer_delay;
            let delay_ok = match peer.mean_delay {
                Some(delay) => {
                    let above = delay >= self.config.min_neighbor_prop_delay;
                    let below = delay <= self.config.neighbor_prop_delay_thresh;
                    if !below && peer.as_capable {
                        log::debug!(
                            "port {}: peer delay {} over threshold, resetting asCapable",
                            self.port_identity.port_number,
                            delay
                        );
                    }
                    if !above && peer.as_capable {
                        log::debug!(
                            "port {}: peer delay {} under minimum, resetting asCapable",
                            self.port_identity.port_number,
                            delay
                        );
                    }
                    above && below
                }
                None => false,
            };

            delay_ok
                && peer.pdr_missing <= ALLOWED_LOST_RESPONSES
                && peer.multiple_seq_pdr_count == 0
                && peer.peer_port_id.is_some()
                && peer.nrate.ratio_valid
        };

        let was_capable = self.peer_delay.as_capable;
        if capable && !was_capable {
            log::debug!(
                "port {}: setting asCapable",
                self.port_identity.port_number
            );
            self.peer_delay.as_capable = true;

            // Announcing starts again right away once the link qualifies
            if self.is_master() {
                return actions![PortAction::ResetAnnounceTimer {
                    duration: core::time::Duration::from_millis(1),
                }];
            }
        } else if !capable && was_capable {
            log::debug!(
                "port {}: resetting asCapable",
                self.port_identity.port_number
            );
            let config = self.config.clone();
            self.peer_delay.reset_nrate(&config);
        }

        actions![]
    }

    pub(super) fn send_peer_delay_request(&mut self) -> PortActionIterator {
        if matches!(
            self.port_state,
            PortState::Initializing | PortState::Faulty | PortState::Disabled
        ) {
            return actions![];
        }

        // A request cycle without multiple responses slowly clears the
        // pollution counter
        if !self.peer_delay.multiple_pdr_detected && self.peer_delay.multiple_seq_pdr_count > 0 {
            self.peer_delay.multiple_seq_pdr_count -= 1;
        }
        self.peer_delay.multiple_pdr_detected = false;
        self.peer_delay.multiple_pdr = false;

        // An exchange still in the slot never finished
        if self.peer_delay.exchange.is_some() {
            self.peer_delay.pdr_missing += 1;
        }
        let capable_actions = self.capable_update();

        log::debug!("Starting new peer delay measurement");

        let pdelay_id = self.pdelay_seq_ids.generate();
        let pdelay_req = self.instance_state.with_ref(|state| {
            Message::pdelay_req(&state.default_ds, self.port_identity, pdelay_id)
        });

        let message_length = match pdelay_req.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("Could not serialize pdelay request: {:?}", error);
                return actions![];
            }
        };

        self.peer_delay.exchange = Some(PdelayExchange {
            id: pdelay_id,
            send_time: None,
            response: None,
            turnaround: None,
        });

        let interval = self.delay_mechanism.interval();

        capable_actions.chain(actions![
            PortAction::ResetDelayRequestTimer {
                duration: interval.as_core_duration(),
            },
            PortAction::SendEvent {
                context: TimestampContext {
                    inner: TimestampContextInner::PDelayReq { id: pdelay_id },
                },
                data: &self.packet_buffer[..message_length],
                link_local: true,
            }
        ])
    }

    /// Answer a peer delay request. This works in every port state; on an
    /// auto port the first request switches the mechanism over to peer to
    /// peer.
    pub(super) fn handle_pdelay_req(
        &mut self,
        header: Header,
        timestamp: Time,
    ) -> PortActionIterator {
        match self.delay_mechanism {
            DelayMechanism::P2P { .. } => {}
            DelayMechanism::Auto { interval } => {
                log::info!(
                    "port {}: peer delay request received, switching to the \
                     peer to peer delay mechanism",
                    self.port_identity.port_number
                );
                self.delay_mechanism = DelayMechanism::P2P { interval };
            }
            DelayMechanism::E2E { .. } => {
                log::warn!(
                    "port {}: ignoring peer delay request on an end to end port",
                    self.port_identity.port_number
                );
                return actions![];
            }
            DelayMechanism::None => return actions![],
        }

        log::debug!("Received PDelayReq");

        let pdelay_resp_message = self.instance_state.with_ref(|state| {
            Message::pdelay_resp(&state.default_ds, self.port_identity, header, timestamp)
        });

        let packet_length = match pdelay_resp_message.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("Could not serialize pdelay response: {:?}", error);
                return actions![];
            }
        };

        actions![PortAction::SendEvent {
            data: &self.packet_buffer[..packet_length],
            context: TimestampContext {
                inner: TimestampContextInner::PDelayResp {
                    id: header.sequence_id,
                    requestor_identity: header.source_port_identity
                }
            },
            link_local: true,
        }]
    }

    /// The transmit timestamp of our response became available; finish the
    /// two-step exchange with the follow up.
    pub(super) fn handle_pdelay_response_timestamp(
        &mut self,
        id: u16,
        requestor_identity: PortIdentity,
        timestamp: Time,
    ) -> PortActionIterator {
        let pdelay_resp_follow_up = self.instance_state.with_ref(|state| {
            Message::pdelay_resp_follow_up(
                &state.default_ds,
                self.port_identity,
                requestor_identity,
                id,
                timestamp,
            )
        });

        let packet_length = match pdelay_resp_follow_up.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("Could not serialize pdelay response follow up: {:?}", error);
                return actions![];
            }
        };

        actions![PortAction::SendGeneral {
            data: &self.packet_buffer[..packet_length],
            link_local: true,
        }]
    }

    /// The transmit timestamp of our own request, t1 of the exchange.
    pub(super) fn handle_pdelay_request_timestamp<'b>(
        &mut self,
        id: u16,
        timestamp: Time,
    ) -> PortActionIterator<'b> {
        match self.peer_delay.exchange {
            Some(ref mut exchange) if exchange.id == id => {
                exchange.send_time = Some(timestamp);
                self.try_complete_exchange()
            }
            _ => {
                log::warn!("Late timestamp for peer delay request ignored");
                actions![]
            }
        }
    }

    pub(super) fn handle_pdelay_resp<'b>(
        &'b mut self,
        header: Header,
        message: PDelayRespMessage,
        recv_time: Time,
    ) -> PortActionIterator<'b> {
        let own_identity = self
            .instance_state
            .with_ref(|state| state.default_ds.clock_identity);

        // Our own response came back at us; a bridge in the network is
        // reflecting our traffic
        if header.source_port_identity.clock_identity == own_identity {
            self.peer_delay.multiple_pdr = true;
            return actions![];
        }

        if message.requesting_port_identity != self.port_identity {
            return actions![];
        }

        let Some(exchange) = self.peer_delay.exchange.as_mut() else {
            log::error!(
                "port {}: rogue peer delay response",
                self.port_identity.port_number
            );
            return actions![];
        };

        if header.sequence_id != exchange.id {
            log::debug!("Ignoring peer delay response with old sequence id");
            return actions![];
        }

        if let Some(previous) = &exchange.response {
            self.peer_delay.multiple_pdr = true;
            if previous.responder != header.source_port_identity {
                log::error!(
                    "port {}: multiple peer responses",
                    self.port_identity.port_number
                );
                if !self.peer_delay.multiple_pdr_detected {
                    self.peer_delay.multiple_pdr_detected = true;
                    self.peer_delay.multiple_seq_pdr_count += 1;
                }
                if self.peer_delay.multiple_seq_pdr_count >= 3 {
                    self.last_fault = FaultType::BadPeerNetwork;
                    return self.dispatch_event(FsmEvent::FaultDetected, false);
                }
            }
            return actions![];
        }

        // A peer that changes identity invalidates everything we learned
        // about the link
        match self.peer_delay.peer_port_id {
            Some(peer) if peer != header.source_port_identity => {
                log::error!(
                    "port {}: received pdelay_resp with unexpected peer port id {}",
                    self.port_identity.port_number,
                    header.source_port_identity
                );
                self.peer_delay.peer_port_id = None;
                let actions = self.capable_update();
                return actions;
            }
            None => {
                log::debug!(
                    "port {}: peer port id set to {}",
                    self.port_identity.port_number,
                    header.source_port_identity
                );
                self.peer_delay.peer_port_id = Some(header.source_port_identity);
            }
            Some(_) => {}
        }

        let exchange = self.peer_delay.exchange.as_mut().unwrap();
        exchange.response = Some(PdelayResponse {
            request_receipt: Time::from(message.request_receive_timestamp),
            recv_time,
            correction: Duration::from(header.correction_field) + self.config.delay_asymmetry,
            responder: header.source_port_identity,
        });

        if !header.two_step_flag {
            // One-step peers fold the turnaround into the correction field
            exchange.turnaround = Some(PdelayTurnaround::OneStep);
        }

        self.try_complete_exchange()
    }

    pub(super) fn handle_pdelay_resp_follow_up<'b>(
        &'b mut self,
        header: Header,
        message: PDelayRespFollowUpMessage,
    ) -> PortActionIterator<'b> {
        if message.requesting_port_identity != self.port_identity {
            return actions![];
        }

        let Some(exchange) = self.peer_delay.exchange.as_mut() else {
            return actions![];
        };

        if header.sequence_id != exchange.id {
            return actions![];
        }

        let Some(response) = &exchange.response else {
            log::debug!("Peer delay follow up without a response, dropping");
            return actions![];
        };

        if response.responder != header.source_port_identity {
            return actions![];
        }

        exchange.turnaround = Some(PdelayTurnaround::TwoStep {
            response_origin: Time::from(message.response_origin_timestamp),
            correction: Duration::from(header.correction_field),
        });

        self.try_complete_exchange()
    }

    /// Compute the link delay once t1, the response, and the turnaround
    /// information are all in. Each exchange produces at most one
    /// measurement; completing clears the slot.
    fn try_complete_exchange<'b>(&mut self) -> PortActionIterator<'b> {
        let Some(exchange) = self.peer_delay.exchange.as_ref() else {
            return actions![];
        };

        let (Some(send_time), Some(response), Some(turnaround)) = (
            exchange.send_time,
            exchange.response.as_ref(),
            exchange.turnaround.as_ref(),
        ) else {
            return actions![];
        };

        let t1 = send_time;
        let t2 = response.request_receipt;
        let t4 = response.recv_time;
        let c1 = response.correction;

        let (t3, c2) = match turnaround {
            PdelayTurnaround::OneStep => (Time::default(), Duration::ZERO),
            PdelayTurnaround::TwoStep {
                response_origin,
                correction,
            } => (*response_origin, *correction),
        };

        let one_step = matches!(turnaround, PdelayTurnaround::OneStep);
        let t3c = t3 + c1 + c2;

        self.peer_delay.exchange = None;

        // A full request/response cycle happened, the link is alive
        self.peer_delay.pdr_missing = 0;

        if self.config.gptp_profile && !one_step {
            self.peer_delay.nrate.sample(t3c, t4);
        }

        let ratio = self.peer_delay.nrate.ratio;
        let raw_delay_ns = if one_step {
            // t2 and t3 are zero, the turnaround is entirely in c1 which is
            // already part of t3c
            ((t4 - t1).nanos_lossy() * ratio - t3c.nanos().to_num::<f64>()) / 2.0
        } else {
            ((t4 - t1).nanos_lossy() * ratio - (t3c - t2).nanos_lossy()) / 2.0
        };

        let raw_delay = Duration::from_fixed_nanos(fixed::types::I96F32::from_num(raw_delay_ns));
        let filtered = self.peer_delay.update_filtered_delay(raw_delay);

        log::debug!(
            "port {}: peer delay {} (raw {})",
            self.port_identity.port_number,
            filtered,
            raw_delay
        );

        let mut actions = self.capable_update();

        // A synchronizing port also tells its servo about the link delay
        if matches!(self.port_state, PortState::Uncalibrated | PortState::Slave) {
            if let Some(slave) = self.slave.as_mut() {
                let measurement = Measurement {
                    event_time: t4,
                    peer_delay: Some(filtered),
                    ..Default::default()
                };
                let update = slave.filter.measurement(measurement, &mut self.clock);
                actions = actions.chain(PortActionIterator::from_filter(update));
            }
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ClockIdentity,
        datastructures::messages::MessageBody,
        port::tests::{setup_test_port_custom_config, setup_test_state, default_test_port_config},
        port::MAX_DATA_LEN,
        time::Interval,
    };

    fn peer() -> PortIdentity {
        PortIdentity {
            clock_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
            port_number: 1,
        }
    }

    fn gptp_port_config() -> crate::config::PortConfig<crate::config::AcceptAnyMaster> {
        let mut config = default_test_port_config();
        config.delay_mechanism = DelayMechanism::P2P {
            interval: Interval::ONE_SECOND,
        };
        config.gptp_profile = true;
        config.freq_est_interval = Interval::ONE_SECOND;
        config.neighbor_prop_delay_thresh = Duration::from_nanos(100);
        config.min_neighbor_prop_delay = Duration::from_nanos(0);
        config
    }

    /// Run one complete request/response/follow-up exchange with the given
    /// timestamps, in nanoseconds.
    fn run_exchange(
        port: &mut crate::port::tests::TestPort<'_>,
        t1: u64,
        t2: u64,
        t3: u64,
        t4: u64,
    ) {
        let mut actions = port.handle_delay_request_timer();
        let mut context = None;
        for action in &mut actions {
            if let PortAction::SendEvent {
                context: ctx,
                link_local: true,
                ..
            } = action
            {
                context = Some(ctx);
            }
        }
        drop(actions);
        let context = context.expect("no pdelay request sent");

        let id = match &context.inner {
            TimestampContextInner::PDelayReq { id } => *id,
            _ => panic!("unexpected context"),
        };

        let mut actions = port.handle_send_timestamp(context, Time::from_nanos(t1));
        while actions.next().is_some() {}
        drop(actions);

        let mut actions = port.handle_pdelay_resp(
            Header {
                two_step_flag: true,
                sequence_id: id,
                source_port_identity: peer(),
                ..Default::default()
            },
            PDelayRespMessage {
                request_receive_timestamp: Time::from_nanos(t2).into(),
                requesting_port_identity: port.port_identity,
            },
            Time::from_nanos(t4),
        );
        while actions.next().is_some() {}
        drop(actions);

        let mut actions = port.handle_pdelay_resp_follow_up(
            Header {
                sequence_id: id,
                source_port_identity: peer(),
                ..Default::default()
            },
            PDelayRespFollowUpMessage {
                response_origin_timestamp: Time::from_nanos(t3).into(),
                requesting_port_identity: port.port_identity,
            },
        );
        while actions.next().is_some() {}
        drop(actions);
    }

    #[test]
    fn peer_delay_computation() {
        let state = setup_test_state();
        let mut port = setup_test_port_custom_config(&state, gptp_port_config());

        run_exchange(&mut port, 100, 110, 115, 130);

        // delay = ((130 - 100) - (115 - 110)) / 2 = 12.5ns
        let delay = port.peer_delay.mean_delay().unwrap();
        assert_eq!(delay.nanos().to_num::<f64>(), 12.5);
        assert_eq!(delay.nanos().to_num::<i64>(), 12);
        assert_eq!(port.peer_delay.pdr_missing, 0);

        // The exchange slot must be empty: a second follow up cannot
        // produce another measurement
        let mut actions = port.handle_pdelay_resp_follow_up(
            Header {
                sequence_id: 0,
                source_port_identity: peer(),
                ..Default::default()
            },
            PDelayRespFollowUpMessage {
                response_origin_timestamp: Time::from_nanos(115).into(),
                requesting_port_identity: port.port_identity,
            },
        );
        assert!(actions.next().is_none());
    }

    #[test]
    fn as_capable_after_clean_exchanges() {
        let state = setup_test_state();
        let mut port = setup_test_port_custom_config(&state, gptp_port_config());

        assert!(!port.as_capable());

        // The first exchange seeds the rate estimator, the second validates
        // the ratio
        run_exchange(&mut port, 100, 110, 115, 130);
        assert!(!port.as_capable());

        run_exchange(&mut port, 1_000_000_100, 1_000_000_110, 1_000_000_115, 1_000_000_130);
        assert!(port.as_capable());
        assert!((port.peer_delay.neighbor_rate_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn as_capable_demotion_on_large_delay() {
        let state = setup_test_state();
        let mut port = setup_test_port_custom_config(&state, gptp_port_config());

        run_exchange(&mut port, 100, 110, 115, 130);
        run_exchange(&mut port, 1_000_000_100, 1_000_000_110, 1_000_000_115, 1_000_000_130);
        assert!(port.as_capable());

        // The threshold is 100ns; a 200ns link delay must demote the port.
        // The moving median needs a majority of bad samples to move.
        for i in 0..6u64 {
            let base = 2_000_000_000 + i * 1_000_000_000;
            run_exchange(&mut port, base, base + 210, base + 215, base + 425);
        }

        assert!(!port.as_capable());
        // Demotion reinitialized the rate estimator
        assert!(!port.peer_delay.nrate.ratio_valid);

        // While not capable, announce messages are ignored on receive
        let announce = Message::announce(&state.borrow(), peer(), 1, 1);
        let mut buffer = [0u8; MAX_DATA_LEN];
        let len = announce.serialize(&mut buffer).unwrap();
        let mut actions = port.handle_general_receive(&buffer[..len]);
        assert!(actions.next().is_none());
    }

    #[test]
    fn multiple_responses_fault_the_port() {
        let state = setup_test_state();
        let mut port = setup_test_port_custom_config(&state, gptp_port_config());

        let second_peer = PortIdentity {
            clock_identity: ClockIdentity([9, 9, 9, 9, 9, 9, 9, 9]),
            port_number: 1,
        };

        for _ in 0..3 {
            let mut actions = port.handle_delay_request_timer();
            let mut context = None;
            for action in &mut actions {
                if let PortAction::SendEvent { context: ctx, .. } = action {
                    context = Some(ctx);
                }
            }
            drop(actions);
            let id = match context.unwrap().inner {
                TimestampContextInner::PDelayReq { id } => id,
                _ => panic!("unexpected context"),
            };

            for responder in [peer(), second_peer] {
                let mut actions = port.handle_pdelay_resp(
                    Header {
                        two_step_flag: true,
                        sequence_id: id,
                        source_port_identity: responder,
                        ..Default::default()
                    },
                    PDelayRespMessage {
                        request_receive_timestamp: Time::from_nanos(110).into(),
                        requesting_port_identity: port.port_identity,
                    },
                    Time::from_nanos(130),
                );
                while actions.next().is_some() {}
                drop(actions);
            }
        }

        // Three consecutive polluted exchanges put the port in the faulty
        // state with the bad peer network cause
        assert_eq!(port.state(), PortState::Faulty);
        assert_eq!(port.last_fault, FaultType::BadPeerNetwork);
    }

    #[test]
    fn auto_port_switches_to_p2p() {
        let state = setup_test_state();
        let mut config = default_test_port_config();
        config.delay_mechanism = DelayMechanism::Auto {
            interval: Interval::ONE_SECOND,
        };
        let mut port = setup_test_port_custom_config(&state, config);

        let mut actions = port.handle_pdelay_req(
            Header {
                sequence_id: 5,
                source_port_identity: peer(),
                ..Default::default()
            },
            Time::from_micros(500),
        );

        let Some(PortAction::SendEvent {
            data,
            link_local: true,
            ..
        }) = actions.next()
        else {
            panic!("Unexpected action");
        };

        let response = Message::deserialize(data).unwrap();
        let MessageBody::PDelayResp(response_body) = response.body else {
            panic!("Unexpected message sent by port");
        };
        assert_eq!(
            response_body.request_receive_timestamp,
            Time::from_micros(500).into()
        );
        assert_eq!(response.header.sequence_id, 5);
        drop(actions);

        assert!(matches!(
            port.delay_mechanism,
            DelayMechanism::P2P { .. }
        ));
    }

    #[test]
    fn e2e_port_rejects_pdelay_req() {
        let state = setup_test_state();
        let mut port = setup_test_port_custom_config(&state, default_test_port_config());

        let mut actions = port.handle_pdelay_req(
            Header {
                sequence_id: 5,
                source_port_identity: peer(),
                ..Default::default()
            },
            Time::from_micros(500),
        );

        assert!(actions.next().is_none());
        drop(actions);
        assert!(matches!(port.delay_mechanism, DelayMechanism::E2E { .. }));
    }

    #[test]
    fn responder_two_step_exchange() {
        let state = setup_test_state();
        let mut config = default_test_port_config();
        config.delay_mechanism = DelayMechanism::P2P {
            interval: Interval::ONE_SECOND,
        };
        let mut port = setup_test_port_custom_config(&state, config);

        let mut actions = port.handle_pdelay_req(
            Header {
                sequence_id: 42,
                source_port_identity: peer(),
                ..Default::default()
            },
            Time::from_micros(500),
        );

        let Some(PortAction::SendEvent {
            context,
            link_local: true,
            ..
        }) = actions.next()
        else {
            panic!("Unexpected action");
        };
        assert!(actions.next().is_none());
        drop(actions);

        let mut actions = port.handle_send_timestamp(context, Time::from_micros(550));

        let Some(PortAction::SendGeneral {
            data,
            link_local: true,
        }) = actions.next()
        else {
            panic!("Unexpected action");
        };

        let follow_up = Message::deserialize(data).unwrap();
        let MessageBody::PDelayRespFollowUp(body) = follow_up.body else {
            panic!("Unexpected message sent by port");
        };
        assert_eq!(
            body.response_origin_timestamp,
            Time::from_micros(550).into()
        );
        assert_eq!(body.requesting_port_identity, peer());
        assert_eq!(follow_up.header.sequence_id, 42);
    }
}
