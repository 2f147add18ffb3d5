//! Abstraction of a network [`Port`] of a device.
//!
//! See [`Port`] for a detailed description.

pub use actions::{PortAction, PortActionIterator, TimestampContext};
use actions::TimestampContextInner;
use atomic_refcell::AtomicRefCell;
pub use fsm::PortState;
use fsm::FsmEvent;
pub use measurement::Measurement;
use peer_delay::PeerDelayState;
use rand::Rng;
use state::SlaveState;

pub use crate::datastructures::messages::{FollowUpInfo, MAX_DATA_LEN};
use crate::{
    bmc::{
        acceptable_master::AcceptableMasterList,
        bmca::{BestAnnounceMessage, Bmca},
    },
    clock::Clock,
    config::{DelayMechanism, FaultInterval, PortConfig},
    datastructures::{
        common::PortIdentity,
        messages::{Message, MessageBody},
    },
    filters::{Filter, FilterUpdate, ServoState},
    ptp_instance::{PtpInstanceState, PtpInstanceStateMutex},
    time::{Duration, Interval, Time},
};

// Needs to be here because of use rules
macro_rules! actions {
    [] => {
        {
            crate::port::PortActionIterator::from(::arrayvec::ArrayVec::new())
        }
    };
    [$action:expr] => {
        {
            let mut list = ::arrayvec::ArrayVec::new();
            list.push($action);
            crate::port::PortActionIterator::from(list)
        }
    };
    [$action1:expr, $action2:expr] => {
        {
            let mut list = ::arrayvec::ArrayVec::new();
            list.push($action1);
            list.push($action2);
            crate::port::PortActionIterator::from(list)
        }
    };
    [$action1:expr, $action2:expr, $action3:expr] => {
        {
            let mut list = ::arrayvec::ArrayVec::new();
            list.push($action1);
            list.push($action2);
            list.push($action3);
            crate::port::PortActionIterator::from(list)
        }
    };
}

mod actions;
mod bmca;
mod fsm;
mod management;
mod master;
mod measurement;
mod peer_delay;
mod sequence_id;
mod slave;
pub(crate) mod state;

/// The reason a port sits in the faulty state, driving the retry pacing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// Any fault without a more specific cause
    #[default]
    Unspecified,
    /// The link keeps producing multiple peer delay responses per request
    BadPeerNetwork,
    /// The hardware clock backing the port changed underneath it
    SwitchPhc,
}

/// A single port of the PTP instance
///
/// One of these needs to be created per port of the PTP instance. They are
/// created by calling [`PtpInstance::add_port`](`crate::PtpInstance::add_port`).
///
/// # Generics
/// A [`Port`] is generic over:
/// * **`L`**: The lifecycle state of the `Port`, either [`InBmca`], or
///   [`Running`].
/// * **`A`**: The type of the [`PortConfig::acceptable_master_list`] which
///   should implement [`AcceptableMasterList`]
/// * **`R`**: The type of the random number generator ([`Rng`]) used to
///   randomize timing
/// * **`C`**: The type of the [`Clock`] used by this [`Port`]
/// * **`F`**: The type of the [`Filter`] used by this [`Port`]
/// * **`S`**: The type of shared state between ports
///
/// ## Type States
/// A [`Port`] can be in two states. Either in [`Running`] allowing access to
/// the [`handle_*`](`Port::handle_send_timestamp`) methods. Or in [`InBmca`]
/// state where it can be used with a
/// [`PtpInstance`](`crate::PtpInstance`) to run the best master clock
/// algorithm (BMCA).
///
/// To transition from [`InBmca`] to [`Running`] use [`Port::end_bmca`]. To
/// transition from [`Running`] to [`InBmca`] use [`Port::start_bmca`].
///
/// The port is sans-I/O: timers and packets come back to the caller as
/// [`PortAction`]s, and the caller informs the port about timer expiries and
/// received packets through the `handle_*` methods. Handlers never block;
/// the embedding decides how the actions map onto its event loop.
#[derive(Debug)]
pub struct Port<'a, L, A, R, C, F: Filter, S = AtomicRefCell<PtpInstanceState>> {
    config: PortConfig<()>,
    filter_config: F::Config,
    clock: C,
    // PortDS port_identity
    pub(crate) port_identity: PortIdentity,
    // Corresponds with PortDS port_state and enabled
    port_state: PortState,
    // Which of the two state machines this port runs
    slave_fsm: bool,
    // Current delay mechanism; starts from the config and can move from
    // Auto to P2P when a peer speaks up
    delay_mechanism: DelayMechanism,
    // Pacing of our delay requests, updated from delay responses
    min_delay_req_interval: Interval,
    // Pacing of the master's sync messages, updated from sync messages
    remote_sync_interval: Interval,
    // Cached stepsRemoved of the instance, drives the qualification timer
    steps_removed: u16,
    // What put the port in the faulty state
    last_fault: FaultType,
    bmca: Bmca<A>,
    packet_buffer: [u8; MAX_DATA_LEN],
    lifecycle: L,
    rng: R,
    // Slave machinery, None unless a master was selected for us
    slave: Option<SlaveState<F>>,
    // Peer delay machinery, always present so a port can answer peer delay
    // requests whatever its state
    peer_delay: PeerDelayState,
    announce_seq_ids: sequence_id::SequenceIdGenerator,
    sync_seq_ids: sequence_id::SequenceIdGenerator,
    delay_seq_ids: sequence_id::SequenceIdGenerator,
    pdelay_seq_ids: sequence_id::SequenceIdGenerator,
    instance_state: &'a S,
}

/// Type state of [`Port`] entered by [`Port::end_bmca`]
#[derive(Debug)]
pub struct Running;

/// Type state of [`Port`] entered by [`Port::start_bmca`]
#[derive(Debug)]
pub struct InBmca {
    pending_action: PortActionIterator<'static>,
    local_best: Option<BestAnnounceMessage>,
}

impl<'a, A: AcceptableMasterList, C: Clock, F: Filter, R: Rng, S: PtpInstanceStateMutex>
    Port<'a, Running, A, R, C, F, S>
{
    /// Inform the port about a transmit timestamp being available
    ///
    /// `context` is the handle of the packet that was sent from the
    /// [`PortAction::SendEvent`] that caused the send.
    pub fn handle_send_timestamp(
        &mut self,
        context: TimestampContext,
        timestamp: Time,
    ) -> PortActionIterator<'_> {
        match context.inner {
            TimestampContextInner::Sync { id } => self.handle_sync_timestamp(id, timestamp),
            TimestampContextInner::DelayReq { id } => self.handle_delay_timestamp(id, timestamp),
            TimestampContextInner::PDelayReq { id } => {
                self.handle_pdelay_request_timestamp(id, timestamp)
            }
            TimestampContextInner::PDelayResp {
                id,
                requestor_identity,
            } => self.handle_pdelay_response_timestamp(id, requestor_identity, timestamp),
        }
    }

    /// Handle the announce timer going off
    pub fn handle_announce_timer(&mut self) -> PortActionIterator<'_> {
        self.send_announce()
    }

    /// Handle the sync timer going off
    pub fn handle_sync_timer(&mut self) -> PortActionIterator<'_> {
        self.send_sync()
    }

    /// Handle the delay request timer going off
    pub fn handle_delay_request_timer(&mut self) -> PortActionIterator<'_> {
        match self.delay_mechanism {
            DelayMechanism::E2E { .. } | DelayMechanism::Auto { .. } => self.send_delay_request(),
            DelayMechanism::P2P { .. } => self.send_peer_delay_request(),
            DelayMechanism::None => actions![],
        }
    }

    /// Handle the announce receipt timer going off
    ///
    /// The current master is presumed dead.
    pub fn handle_announce_receipt_timer(&mut self) -> PortActionIterator<'_> {
        self.dispatch_event(FsmEvent::AnnounceReceiptTimeoutExpires, false)
    }

    /// Handle the sync receipt timer going off
    ///
    /// The master stopped sending sync messages; synchronization is lost.
    pub fn handle_sync_receipt_timer(&mut self) -> PortActionIterator<'_> {
        self.dispatch_event(FsmEvent::SynchronizationFault, false)
    }

    /// Handle the qualification timer going off
    pub fn handle_qualification_timer(&mut self) -> PortActionIterator<'_> {
        self.dispatch_event(FsmEvent::QualificationTimeoutExpires, false)
    }

    /// Handle the fault clearance timer going off
    pub fn handle_fault_timer(&mut self) -> PortActionIterator<'_> {
        self.dispatch_event(FsmEvent::FaultCleared, false)
    }

    /// Handle the filter update timer going off
    pub fn handle_filter_update_timer(&mut self) -> PortActionIterator<'_> {
        match self.slave {
            Some(ref mut slave) => {
                let update = slave.filter.update(&mut self.clock);
                PortActionIterator::from_filter(update)
            }
            None => actions![],
        }
    }

    /// Report a fault the embedding ran into while doing I/O for this port,
    /// for example a failing send.
    pub fn handle_fault(&mut self, fault: FaultType) -> PortActionIterator<'_> {
        self.last_fault = fault;
        self.dispatch_event(FsmEvent::FaultDetected, false)
    }

    /// Administratively re-enable the port
    pub fn handle_enable(&mut self) -> PortActionIterator<'_> {
        self.dispatch_event(FsmEvent::DesignatedEnabled, false)
    }

    /// Administratively disable the port
    pub fn handle_disable(&mut self) -> PortActionIterator<'_> {
        self.dispatch_event(FsmEvent::DesignatedDisabled, false)
    }

    /// Set this [`Port`] into [`InBmca`] mode to use it with
    /// [`PtpInstance::bmca`](`crate::PtpInstance::bmca`).
    pub fn start_bmca(self) -> Port<'a, InBmca, A, R, C, F, S> {
        Port {
            port_state: self.port_state,
            slave_fsm: self.slave_fsm,
            config: self.config,
            filter_config: self.filter_config,
            clock: self.clock,
            port_identity: self.port_identity,
            delay_mechanism: self.delay_mechanism,
            min_delay_req_interval: self.min_delay_req_interval,
            remote_sync_interval: self.remote_sync_interval,
            steps_removed: self.steps_removed,
            last_fault: self.last_fault,
            bmca: self.bmca,
            rng: self.rng,
            packet_buffer: [0; MAX_DATA_LEN],
            slave: self.slave,
            peer_delay: self.peer_delay,
            announce_seq_ids: self.announce_seq_ids,
            sync_seq_ids: self.sync_seq_ids,
            delay_seq_ids: self.delay_seq_ids,
            pdelay_seq_ids: self.pdelay_seq_ids,
            instance_state: self.instance_state,
            lifecycle: InBmca {
                pending_action: actions![],
                local_best: None,
            },
        }
    }

    /// Handle a message over the event channel
    pub fn handle_event_receive<'b>(
        &'b mut self,
        data: &'b [u8],
        timestamp: Time,
    ) -> PortActionIterator<'b> {
        let message = match Message::deserialize(data) {
            Ok(message) => message,
            Err(error) => {
                log::warn!("Could not parse packet: {:?}", error);
                return actions![];
            }
        };

        if self.ignore_message(&message) {
            return actions![];
        }

        match message.body {
            MessageBody::Sync(sync) => self.handle_sync(message.header, sync, timestamp),
            MessageBody::DelayReq(delay_req) => {
                self.handle_delay_req(message.header, delay_req, timestamp)
            }
            MessageBody::PDelayReq(_) => self.handle_pdelay_req(message.header, timestamp),
            MessageBody::PDelayResp(pdelay_resp) => {
                self.handle_pdelay_resp(message.header, pdelay_resp, timestamp)
            }
            _ => self.handle_general_internal(message),
        }
    }

    /// Handle a general ptp message
    pub fn handle_general_receive<'b>(&'b mut self, data: &'b [u8]) -> PortActionIterator<'b> {
        let message = match Message::deserialize(data) {
            Ok(message) => message,
            Err(error) => {
                log::warn!("Could not parse packet: {:?}", error);
                return actions![];
            }
        };

        if self.ignore_message(&message) {
            return actions![];
        }

        self.handle_general_internal(message)
    }

    fn handle_general_internal<'b>(&'b mut self, message: Message<'b>) -> PortActionIterator<'b> {
        match message.body {
            MessageBody::Announce(announce) => self.handle_announce(&message, announce),
            MessageBody::FollowUp(follow_up) => {
                self.handle_follow_up(message.header, follow_up, message.suffix)
            }
            MessageBody::DelayResp(delay_resp) => {
                self.handle_delay_resp(message.header, delay_resp)
            }
            MessageBody::PDelayRespFollowUp(follow_up) => {
                self.handle_pdelay_resp_follow_up(message.header, follow_up)
            }
            MessageBody::Management(management) => {
                self.handle_management(message.header, management)
            }
            MessageBody::Signaling(signaling) => {
                log::debug!(
                    "Ignoring signaling message targeting {}",
                    signaling.target_port_identity
                );
                actions![]
            }
            MessageBody::Sync(_)
            | MessageBody::DelayReq(_)
            | MessageBody::PDelayReq(_)
            | MessageBody::PDelayResp(_) => {
                log::warn!("Received event message without timestamp");
                actions![]
            }
        }
    }

    /// The reception rules. A message dropped here must leave no other
    /// trace on the port.
    fn ignore_message(&self, message: &Message) -> bool {
        let header = message.header();

        // While not capable a gPTP port ignores the protocol proper
        if !self.as_capable()
            && matches!(
                message.body,
                MessageBody::Announce(_) | MessageBody::Sync(_)
            )
        {
            return true;
        }

        let (own_identity, domain_number, sdo_id, path_trace) =
            self.instance_state.with_ref(|state| {
                (
                    state.default_ds.clock_identity,
                    state.default_ds.domain_number,
                    state.default_ds.sdo_id,
                    state.path_trace_ds.enable,
                )
            });

        // A message that went through us before is a loop
        if path_trace {
            if let Some(tlv) = message
                .suffix
                .tlv()
                .find(|tlv| tlv.tlv_type == crate::datastructures::common::TlvType::PathTrace)
            {
                if tlv.value.chunks_exact(8).any(|ci| ci == own_identity.0) {
                    log::warn!("Clock loop detected");
                    return true;
                }
            }
        }

        if header.sdo_id != sdo_id {
            return true;
        }

        if header.source_port_identity == self.port_identity {
            return true;
        }

        if header.domain_number != domain_number {
            return true;
        }

        if header.source_port_identity.clock_identity == own_identity {
            // Keep our own peer delay responses so the multiple-response
            // detector can see its own reflection
            return !matches!(message.body, MessageBody::PDelayResp(_));
        }

        false
    }
}

impl<'a, L, A: AcceptableMasterList, R: Rng, C: Clock, F: Filter, S> Port<'a, L, A, R, C, F, S> {
    /// Run an event through the state machine of this port and perform the
    /// transition work. Fault clearing with an ASAP pacing and
    /// re-initialization chain further events immediately.
    fn dispatch_event<'b>(
        &mut self,
        event: FsmEvent,
        master_changed: bool,
    ) -> PortActionIterator<'b> {
        let mut event = event;
        let mut actions = actions![];

        loop {
            let next = if self.slave_fsm {
                fsm::ptp_slave_fsm(self.port_state, event, master_changed)
            } else {
                fsm::ptp_fsm(self.port_state, event, master_changed)
            };

            if next == self.port_state {
                break;
            }

            log::info!(
                "port {}: {} -> {}, event {:?}",
                self.port_identity.port_number,
                self.port_state,
                next,
                event
            );

            self.leave_state(next);
            self.port_state = next;
            actions = self.enter_state(next);

            match next {
                // Always reinitialize right away; in this embedding the
                // reset of the soft state cannot fail, hardware faults come
                // back in through handle_fault.
                PortState::Initializing => {
                    event = FsmEvent::InitComplete;
                }
                // An ASAP fault interval clears the fault on the spot
                PortState::Faulty if self.fault_interval().duration().is_none() => {
                    event = FsmEvent::FaultCleared;
                }
                _ => break,
            }
        }

        actions
    }

    /// Cleanup owed when moving from the current state to `next`.
    fn leave_state(&mut self, next: PortState) {
        let was_slave = matches!(
            self.port_state,
            PortState::Uncalibrated | PortState::Slave
        );
        let stays_slave = matches!(next, PortState::Uncalibrated | PortState::Slave);

        if was_slave && !stays_slave {
            if let Some(slave) = self.slave.take() {
                slave.filter.demobilize(&mut self.clock);
            }
        }

        if matches!(next, PortState::Faulty | PortState::Disabled) {
            // Drop everything the port holds; the embedding closes the
            // transport on these states.
            if let Some(slave) = self.slave.take() {
                slave.filter.demobilize(&mut self.clock);
            }
            self.peer_delay.clear_exchange();
            self.bmca.reset();
        }
    }

    /// The timers a freshly entered state needs running.
    fn enter_state<'b>(&mut self, next: PortState) -> PortActionIterator<'b> {
        match next {
            PortState::Initializing | PortState::Disabled => actions![],
            PortState::Faulty => match self.fault_interval().duration() {
                Some(duration) => actions![PortAction::ResetFaultTimer { duration }],
                None => actions![],
            },
            PortState::Listening => {
                let announce = PortAction::ResetAnnounceReceiptTimer {
                    duration: self.config.announce_duration(&mut self.rng),
                };
                match self.delay_mechanism {
                    DelayMechanism::P2P { interval } => actions![
                        announce,
                        PortAction::ResetDelayRequestTimer {
                            duration: interval.as_core_duration(),
                        }
                    ],
                    _ => actions![announce],
                }
            }
            PortState::PreMaster => actions![PortAction::ResetQualificationTimer {
                duration: self
                    .config
                    .announce_interval
                    .as_core_duration()
                    .saturating_mul(1 + self.steps_removed as u32),
            }],
            PortState::Master | PortState::GrandMaster => actions![
                // First announce goes out as soon as possible
                PortAction::ResetAnnounceTimer {
                    duration: core::time::Duration::from_millis(1),
                },
                PortAction::ResetSyncTimer {
                    duration: core::time::Duration::from_secs(0),
                }
            ],
            PortState::Passive => actions![PortAction::ResetAnnounceReceiptTimer {
                duration: self.config.announce_duration(&mut self.rng),
            }],
            PortState::Uncalibrated | PortState::Slave => {
                if let Some(slave) = self.slave.as_mut() {
                    slave.flush();
                }
                self.peer_delay.clear_exchange();

                let delay = match self.delay_mechanism {
                    DelayMechanism::E2E { .. } | DelayMechanism::Auto { .. } => {
                        Some(PortAction::ResetDelayRequestTimer {
                            duration: core::time::Duration::ZERO,
                        })
                    }
                    // The peer delay request timer keeps its own cadence
                    DelayMechanism::P2P { .. } | DelayMechanism::None => None,
                };

                // A slave-only port has nowhere to fall back to, it keeps
                // listening to its master indefinitely
                let announce = (!self.slave_fsm).then(|| PortAction::ResetAnnounceReceiptTimer {
                    duration: self.config.announce_duration(&mut self.rng),
                });

                match (announce, delay) {
                    (Some(a), Some(d)) => actions![a, d],
                    (Some(a), None) => actions![a],
                    (None, Some(d)) => actions![d],
                    (None, None) => actions![],
                }
            }
        }
    }

    /// Handle what the filter's servo reported back after a measurement.
    fn process_filter_update<'b>(&mut self, update: FilterUpdate) -> PortActionIterator<'b> {
        let state = update.state;
        let mut actions = PortActionIterator::from_filter(update);

        match state {
            ServoState::Locked => {
                actions = actions.chain(self.dispatch_event(FsmEvent::MasterClockSelected, false));
            }
            ServoState::Locking => {
                self.flush_delay_measurement();
                if matches!(
                    self.delay_mechanism,
                    DelayMechanism::E2E { .. } | DelayMechanism::Auto { .. }
                ) {
                    actions = actions.chain(actions![PortAction::ResetDelayRequestTimer {
                        duration: core::time::Duration::ZERO,
                    }]);
                }
            }
            ServoState::Jump => {
                self.flush_delay_measurement();
                actions =
                    actions.chain(self.dispatch_event(FsmEvent::SynchronizationFault, false));
            }
            ServoState::Unlocked => {
                actions =
                    actions.chain(self.dispatch_event(FsmEvent::SynchronizationFault, false));
            }
        }

        actions
    }

    fn flush_delay_measurement(&mut self) {
        if let Some(slave) = self.slave.as_mut() {
            slave.delay_state = state::DelayState::Empty;
        }
    }

    fn set_forced_port_state(&mut self, state: PortState) {
        log::info!(
            "new state for port {}: {} -> {}",
            self.port_identity.port_number,
            self.port_state,
            state
        );
        self.leave_state(state);
        self.port_state = state;
    }
}

impl<'a, L, A, R, C, F: Filter, S> Port<'a, L, A, R, C, F, S> {
    fn fault_interval(&self) -> FaultInterval {
        match self.last_fault {
            FaultType::Unspecified | FaultType::SwitchPhc => self.config.fault_reset_interval,
            FaultType::BadPeerNetwork => self.config.fault_badpeernet_interval,
        }
    }

    /// The asCapable predicate of this port; trivially true outside the
    /// gPTP profile.
    pub fn as_capable(&self) -> bool {
        if !self.config.gptp_profile {
            return true;
        }

        self.peer_delay.as_capable
    }

    /// The current protocol state of the port
    pub fn state(&self) -> PortState {
        self.port_state
    }

    /// Indicate whether this [`Port`] is steering its clock.
    pub fn is_steering(&self) -> bool {
        matches!(self.port_state, PortState::Slave)
    }

    /// Indicate whether this [`Port`] is in a master state.
    pub fn is_master(&self) -> bool {
        matches!(self.port_state, PortState::Master | PortState::GrandMaster)
    }

    /// The mean delay to the master (end to end) or to the link neighbor
    /// (peer to peer), whichever this port measures.
    pub fn mean_delay(&self) -> Option<Duration> {
        match self.delay_mechanism {
            DelayMechanism::P2P { .. } => self.peer_delay.mean_delay(),
            _ => self.slave.as_ref().and_then(|slave| slave.mean_delay),
        }
    }

    /// Interval helper for values received in logMessageInterval fields.
    /// Values outside of what we can sensibly produce timers for only get
    /// logged; 0x7f means "field unused".
    fn clamp_log_interval(&self, log_interval: i8) -> Option<Interval> {
        match log_interval {
            0x7f => None,
            l if (-10..=22).contains(&l) => Some(Interval::from_log_2(l)),
            l => {
                log::warn!(
                    "port {}: ignoring out of range message interval 2^{}",
                    self.port_identity.port_number,
                    l
                );
                None
            }
        }
    }
}

impl<'a, A, C, F: Filter, R, S> Port<'a, InBmca, A, R, C, F, S> {
    /// End a BMCA cycle and make the
    /// [`handle_*`](`Port::handle_send_timestamp`) methods available again
    pub fn end_bmca(self) -> (Port<'a, Running, A, R, C, F, S>, PortActionIterator<'static>) {
        (
            Port {
                port_state: self.port_state,
                slave_fsm: self.slave_fsm,
                config: self.config,
                filter_config: self.filter_config,
                clock: self.clock,
                port_identity: self.port_identity,
                delay_mechanism: self.delay_mechanism,
                min_delay_req_interval: self.min_delay_req_interval,
                remote_sync_interval: self.remote_sync_interval,
                steps_removed: self.steps_removed,
                last_fault: self.last_fault,
                bmca: self.bmca,
                rng: self.rng,
                packet_buffer: [0; MAX_DATA_LEN],
                slave: self.slave,
                peer_delay: self.peer_delay,
                announce_seq_ids: self.announce_seq_ids,
                sync_seq_ids: self.sync_seq_ids,
                delay_seq_ids: self.delay_seq_ids,
                pdelay_seq_ids: self.pdelay_seq_ids,
                instance_state: self.instance_state,
                lifecycle: Running,
            },
            self.lifecycle.pending_action,
        )
    }
}

impl<'a, A, C, F: Filter, R: Rng, S: PtpInstanceStateMutex> Port<'a, InBmca, A, R, C, F, S> {
    /// Create a new port from a port dataset on a given interface.
    pub(crate) fn new(
        instance_state: &'a S,
        config: PortConfig<A>,
        filter_config: F::Config,
        clock: C,
        port_identity: PortIdentity,
        rng: R,
    ) -> Self
    where
        A: AcceptableMasterList,
        C: Clock,
    {
        let slave_only = instance_state.with_ref(|state| state.default_ds.slave_only);

        let PortConfig {
            acceptable_master_list,
            delay_mechanism,
            announce_interval,
            announce_receipt_timeout,
            sync_interval,
            sync_receipt_timeout,
            master_only,
            delay_asymmetry,
            gptp_profile,
            neighbor_prop_delay_thresh,
            min_neighbor_prop_delay,
            freq_est_interval,
            skip_sync_check,
            fault_reset_interval,
            fault_badpeernet_interval,
            port_description,
        } = config;

        let config = PortConfig {
            acceptable_master_list: (),
            delay_mechanism,
            announce_interval,
            announce_receipt_timeout,
            sync_interval,
            sync_receipt_timeout,
            master_only,
            delay_asymmetry,
            gptp_profile,
            neighbor_prop_delay_thresh,
            min_neighbor_prop_delay,
            freq_est_interval,
            skip_sync_check,
            fault_reset_interval,
            fault_badpeernet_interval,
            port_description,
        };

        let bmca = Bmca::new(
            acceptable_master_list,
            announce_interval.as_duration().into(),
            port_identity,
            // In gPTP a single announce qualifies a foreign master
            if gptp_profile { 1 } else { 2 },
        );

        let peer_delay = PeerDelayState::new(&config);

        let mut port = Port {
            config,
            filter_config,
            clock,
            port_identity,
            port_state: PortState::Initializing,
            slave_fsm: slave_only,
            delay_mechanism,
            min_delay_req_interval: delay_mechanism.interval(),
            remote_sync_interval: sync_interval,
            steps_removed: 0,
            last_fault: FaultType::default(),
            bmca,
            rng,
            packet_buffer: [0; MAX_DATA_LEN],
            slave: None,
            peer_delay,
            announce_seq_ids: sequence_id::SequenceIdGenerator::new(),
            sync_seq_ids: sequence_id::SequenceIdGenerator::new(),
            delay_seq_ids: sequence_id::SequenceIdGenerator::new(),
            pdelay_seq_ids: sequence_id::SequenceIdGenerator::new(),
            instance_state,
            lifecycle: InBmca {
                pending_action: actions![],
                local_best: None,
            },
        };

        // Power up ends in the listening state with its timers pending
        let actions = port.dispatch_event(FsmEvent::InitComplete, false);
        port.lifecycle.pending_action = actions;

        port
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use atomic_refcell::AtomicRefCell;
    use rand::rngs::mock::StepRng;

    use super::*;
    use crate::{
        config::{AcceptAnyMaster, InstanceConfig, TimePropertiesDS},
        datastructures::{common::ClockIdentity, datasets::InternalDefaultDS},
        filters::FilterUpdate,
        ptp_instance::PtpInstanceState,
    };

    // The default test setup has a total of three nodes:
    // - the local node, with clock identity 0
    // - the remote master, with clock identity 1,2,3,4,5,6,7,8
    // - its grandmaster, identity 9 repeated

    #[derive(Debug, Default)]
    pub(crate) struct TestClock;

    impl Clock for TestClock {
        type Error = ();

        fn now(&self) -> Time {
            Time::default()
        }

        fn step_clock(&mut self, _offset: Duration) -> Result<Time, Self::Error> {
            Ok(Time::default())
        }

        fn set_frequency(&mut self, _ppm: f64) -> Result<Time, Self::Error> {
            Ok(Time::default())
        }

        fn set_properties(&mut self, _: &TimePropertiesDS) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[derive(Debug)]
    pub(crate) struct TestFilter {
        pub(crate) last_measurement: Option<Measurement>,
        pub(crate) state: ServoState,
    }

    impl Filter for TestFilter {
        type Config = ();

        fn new(_config: Self::Config) -> Self {
            Self {
                last_measurement: None,
                state: ServoState::Locking,
            }
        }

        fn measurement<C: Clock>(&mut self, m: Measurement, _clock: &mut C) -> FilterUpdate {
            self.last_measurement = Some(m);
            FilterUpdate {
                next_update: None,
                mean_delay: m.delay.or(m.peer_delay),
                state: self.state,
            }
        }

        fn update<C: Clock>(&mut self, _clock: &mut C) -> FilterUpdate {
            Default::default()
        }

        fn demobilize<C: Clock>(self, _clock: &mut C) {}
    }

    pub(crate) type TestPort<'a> =
        Port<'a, Running, AcceptAnyMaster, StepRng, TestClock, TestFilter>;

    pub(crate) fn setup_test_state() -> AtomicRefCell<PtpInstanceState> {
        let config = InstanceConfig {
            clock_identity: ClockIdentity::default(),
            priority_1: 128,
            priority_2: 128,
            domain_number: 0,
            slave_only: false,
            sdo_id: Default::default(),
            path_trace: false,
            clock_quality: Default::default(),
            gm_capable: true,
        };

        let default_ds = InternalDefaultDS::new(config);

        AtomicRefCell::new(PtpInstanceState::new(default_ds, TimePropertiesDS::default(), false))
    }

    pub(crate) fn default_test_port_config() -> PortConfig<AcceptAnyMaster> {
        PortConfig {
            acceptable_master_list: AcceptAnyMaster,
            delay_mechanism: DelayMechanism::E2E {
                interval: Interval::TWO_SECONDS,
            },
            announce_interval: Interval::TWO_SECONDS,
            announce_receipt_timeout: 3,
            sync_interval: Interval::ONE_SECOND,
            sync_receipt_timeout: 3,
            master_only: false,
            delay_asymmetry: Duration::ZERO,
            gptp_profile: false,
            neighbor_prop_delay_thresh: Duration::from_micros(2),
            min_neighbor_prop_delay: Duration::from_micros(-2),
            freq_est_interval: Interval::ONE_SECOND,
            skip_sync_check: false,
            fault_reset_interval: FaultInterval::Log(Interval::from_log_2(4)),
            fault_badpeernet_interval: FaultInterval::Seconds(16),
            port_description: Default::default(),
        }
    }

    pub(crate) fn setup_test_port(state: &AtomicRefCell<PtpInstanceState>) -> TestPort<'_> {
        setup_test_port_custom_config(state, default_test_port_config())
    }

    pub(crate) fn setup_test_port_custom_config<'a>(
        state: &'a AtomicRefCell<PtpInstanceState>,
        port_config: PortConfig<AcceptAnyMaster>,
    ) -> TestPort<'a> {
        let port = Port::<'_, InBmca, _, _, _, TestFilter>::new(
            state,
            port_config,
            (),
            TestClock,
            PortIdentity::default(),
            StepRng::new(2, 1),
        );

        let (port, actions) = port.end_bmca();
        drop(actions);
        port
    }

    impl<'a> TestPort<'a> {
        pub(crate) fn force_state(&mut self, state: PortState) {
            self.set_forced_port_state(state);
        }

        pub(crate) fn force_slave(&mut self, remote_master: PortIdentity) {
            self.slave = Some(SlaveState::new(remote_master, ()));
            self.set_forced_port_state(PortState::Slave);
        }

        pub(crate) fn test_filter_mut(&mut self) -> &mut TestFilter {
            &mut self.slave.as_mut().unwrap().filter
        }
    }

    #[test]
    fn new_port_starts_listening() {
        let state = setup_test_state();
        let port = Port::<'_, InBmca, _, _, _, TestFilter>::new(
            &state,
            default_test_port_config(),
            (),
            TestClock,
            PortIdentity::default(),
            StepRng::new(2, 1),
        );

        assert_eq!(port.state(), PortState::Listening);

        let (port, mut actions) = port.end_bmca();
        assert!(matches!(
            actions.next(),
            Some(PortAction::ResetAnnounceReceiptTimer { .. })
        ));
        assert!(actions.next().is_none());
        drop(actions);

        assert!(!port.is_master());
        assert!(!port.is_steering());
    }

    #[test]
    fn announce_receipt_timeout_promotes_to_master() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);

        let mut actions = port.handle_announce_receipt_timer();
        assert!(matches!(
            actions.next(),
            Some(PortAction::ResetAnnounceTimer { .. })
        ));
        assert!(matches!(
            actions.next(),
            Some(PortAction::ResetSyncTimer { .. })
        ));
        assert!(actions.next().is_none());
        drop(actions);

        assert_eq!(port.state(), PortState::Master);
    }

    #[test]
    fn fault_detection_and_clearing() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);

        let mut actions = port.handle_fault(FaultType::Unspecified);
        assert!(matches!(
            actions.next(),
            Some(PortAction::ResetFaultTimer { .. })
        ));
        assert!(actions.next().is_none());
        drop(actions);
        assert_eq!(port.state(), PortState::Faulty);

        // Clearing reinitializes, which lands us back in listening
        let mut actions = port.handle_fault_timer();
        assert!(matches!(
            actions.next(),
            Some(PortAction::ResetAnnounceReceiptTimer { .. })
        ));
        assert!(actions.next().is_none());
        drop(actions);
        assert_eq!(port.state(), PortState::Listening);
    }

    #[test]
    fn asap_fault_interval_recovers_immediately() {
        let state = setup_test_state();
        let mut config = default_test_port_config();
        config.fault_reset_interval = FaultInterval::Asap;
        let mut port = setup_test_port_custom_config(&state, config);

        let mut actions = port.handle_fault(FaultType::Unspecified);
        assert!(matches!(
            actions.next(),
            Some(PortAction::ResetAnnounceReceiptTimer { .. })
        ));
        drop(actions);
        assert_eq!(port.state(), PortState::Listening);
    }

    #[test]
    fn ignores_wrong_domain() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);
        port.force_state(PortState::Master);

        let mut announce = crate::datastructures::messages::Message::announce(
            &state.borrow(),
            PortIdentity {
                clock_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
                port_number: 1,
            },
            1,
            1,
        );
        announce.header.domain_number = 5;
        if let MessageBody::Announce(body) = &mut announce.body {
            body.header.domain_number = 5;
        }

        let mut buffer = [0u8; MAX_DATA_LEN];
        let len = announce.serialize(&mut buffer).unwrap();

        let mut actions = port.handle_general_receive(&buffer[..len]);
        assert!(actions.next().is_none());
    }

    #[test]
    fn ignores_messages_from_own_port() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);
        port.force_state(PortState::Master);

        // source port identity equal to our own
        let announce = crate::datastructures::messages::Message::announce(
            &state.borrow(),
            port.port_identity,
            1,
            1,
        );

        let mut buffer = [0u8; MAX_DATA_LEN];
        let len = announce.serialize(&mut buffer).unwrap();

        let mut actions = port.handle_general_receive(&buffer[..len]);
        assert!(actions.next().is_none());
    }
}
