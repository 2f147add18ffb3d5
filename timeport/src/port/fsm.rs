//! The port state machines as pure transition tables.
//!
//! Two tables exist: the general one, and the one for slave-only instances
//! that must never take on a master role. Both are pure functions from
//! `(state, event, master_changed)` to the next state; every side effect of
//! a transition lives in the port itself.

use core::fmt::{Display, Formatter};

/// The protocol state of a port, *IEEE1588-2019 section 9.2.5*
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// The port is initializing its data sets
    #[default]
    Initializing,
    /// A fault was detected, the port does not take part in the protocol
    Faulty,
    /// The port was administratively disabled
    Disabled,
    /// The port is waiting for announce messages before picking a role
    Listening,
    /// The port was selected as master and is waiting out its
    /// qualification interval
    PreMaster,
    /// The port is a master on its link
    Master,
    /// The port is a master and its own clock is the grandmaster
    GrandMaster,
    /// Another port of this path has a better clock, the port stays quiet
    Passive,
    /// A master was selected but the local clock does not track it yet
    Uncalibrated,
    /// The port synchronizes its clock to the elected master
    Slave,
}

impl PortState {
    /// The wire encoding used in management responses. The grandmaster
    /// state is an internal refinement of the master state.
    pub fn to_primitive(self) -> u8 {
        match self {
            PortState::Initializing => 1,
            PortState::Faulty => 2,
            PortState::Disabled => 3,
            PortState::Listening => 4,
            PortState::PreMaster => 5,
            PortState::Master => 6,
            PortState::Passive => 7,
            PortState::Uncalibrated => 8,
            PortState::Slave => 9,
            PortState::GrandMaster => 10,
        }
    }
}

impl Display for PortState {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            PortState::Initializing => write!(f, "Initializing"),
            PortState::Faulty => write!(f, "Faulty"),
            PortState::Disabled => write!(f, "Disabled"),
            PortState::Listening => write!(f, "Listening"),
            PortState::PreMaster => write!(f, "PreMaster"),
            PortState::Master => write!(f, "Master"),
            PortState::GrandMaster => write!(f, "GrandMaster"),
            PortState::Passive => write!(f, "Passive"),
            PortState::Uncalibrated => write!(f, "Uncalibrated"),
            PortState::Slave => write!(f, "Slave"),
        }
    }
}

/// Everything that can drive a state transition of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FsmEvent {
    Powerup,
    Initialize,
    DesignatedEnabled,
    DesignatedDisabled,
    FaultCleared,
    FaultDetected,
    StateDecisionEvent,
    QualificationTimeoutExpires,
    AnnounceReceiptTimeoutExpires,
    SynchronizationFault,
    MasterClockSelected,
    InitComplete,
    RsMaster,
    RsGrandMaster,
    RsSlave,
    RsPassive,
}

/// The general state machine
pub(crate) fn ptp_fsm(state: PortState, event: FsmEvent, master_changed: bool) -> PortState {
    use {FsmEvent as Ev, PortState as Ps};

    // Transitions shared by every state
    match event {
        Ev::Powerup | Ev::Initialize => return Ps::Initializing,
        Ev::DesignatedDisabled => return Ps::Disabled,
        Ev::FaultDetected if !matches!(state, Ps::Disabled) => return Ps::Faulty,
        _ => {}
    }

    match (state, event) {
        (Ps::Initializing, Ev::InitComplete) => Ps::Listening,

        (Ps::Faulty, Ev::FaultCleared) => Ps::Initializing,

        (Ps::Disabled, Ev::DesignatedEnabled) => Ps::Initializing,

        (Ps::Listening, Ev::AnnounceReceiptTimeoutExpires) => Ps::Master,
        (Ps::Listening, Ev::RsMaster) => Ps::PreMaster,
        (Ps::Listening, Ev::RsGrandMaster) => Ps::GrandMaster,
        (Ps::Listening, Ev::RsSlave) => Ps::Uncalibrated,
        (Ps::Listening, Ev::RsPassive) => Ps::Passive,

        (Ps::PreMaster, Ev::QualificationTimeoutExpires) => Ps::Master,
        (Ps::PreMaster, Ev::RsGrandMaster) => Ps::GrandMaster,
        (Ps::PreMaster, Ev::RsSlave) => Ps::Uncalibrated,
        (Ps::PreMaster, Ev::RsPassive) => Ps::Passive,

        (Ps::Master, Ev::RsGrandMaster) => Ps::GrandMaster,
        (Ps::Master, Ev::RsSlave) => Ps::Uncalibrated,
        (Ps::Master, Ev::RsPassive) => Ps::Passive,

        (Ps::GrandMaster, Ev::RsMaster) => Ps::Master,
        (Ps::GrandMaster, Ev::RsSlave) => Ps::Uncalibrated,
        (Ps::GrandMaster, Ev::RsPassive) => Ps::Passive,

        (Ps::Passive, Ev::AnnounceReceiptTimeoutExpires) => Ps::Master,
        (Ps::Passive, Ev::RsMaster) => Ps::PreMaster,
        (Ps::Passive, Ev::RsGrandMaster) => Ps::GrandMaster,
        (Ps::Passive, Ev::RsSlave) => Ps::Uncalibrated,

        (Ps::Uncalibrated, Ev::AnnounceReceiptTimeoutExpires) => Ps::Master,
        (Ps::Uncalibrated, Ev::MasterClockSelected) => Ps::Slave,
        (Ps::Uncalibrated, Ev::RsMaster) => Ps::PreMaster,
        (Ps::Uncalibrated, Ev::RsGrandMaster) => Ps::GrandMaster,
        (Ps::Uncalibrated, Ev::RsPassive) => Ps::Passive,

        (Ps::Slave, Ev::AnnounceReceiptTimeoutExpires) => Ps::Master,
        (Ps::Slave, Ev::SynchronizationFault) => Ps::Uncalibrated,
        (Ps::Slave, Ev::RsMaster) => Ps::PreMaster,
        (Ps::Slave, Ev::RsGrandMaster) => Ps::GrandMaster,
        (Ps::Slave, Ev::RsPassive) => Ps::Passive,
        (Ps::Slave, Ev::RsSlave) if master_changed => Ps::Uncalibrated,

        _ => state,
    }
}

/// The state machine for slave-only instances. It can never produce one of
/// the master states.
pub(crate) fn ptp_slave_fsm(state: PortState, event: FsmEvent, master_changed: bool) -> PortState {
    use {FsmEvent as Ev, PortState as Ps};

    match event {
        Ev::Powerup | Ev::Initialize => return Ps::Initializing,
        Ev::DesignatedDisabled => return Ps::Disabled,
        Ev::FaultDetected if !matches!(state, Ps::Disabled) => return Ps::Faulty,
        _ => {}
    }

    match (state, event) {
        (Ps::Initializing, Ev::InitComplete) => Ps::Listening,

        (Ps::Faulty, Ev::FaultCleared) => Ps::Initializing,

        (Ps::Disabled, Ev::DesignatedEnabled) => Ps::Initializing,

        (Ps::Listening, Ev::RsSlave) => Ps::Uncalibrated,
        (Ps::Listening, Ev::RsMaster | Ev::RsGrandMaster | Ev::RsPassive) => Ps::Passive,

        (Ps::Passive, Ev::AnnounceReceiptTimeoutExpires) => Ps::Listening,
        (Ps::Passive, Ev::RsSlave) => Ps::Uncalibrated,

        (Ps::Uncalibrated, Ev::AnnounceReceiptTimeoutExpires) => Ps::Listening,
        (Ps::Uncalibrated, Ev::MasterClockSelected) => Ps::Slave,
        (Ps::Uncalibrated, Ev::RsMaster | Ev::RsGrandMaster | Ev::RsPassive) => Ps::Passive,

        (Ps::Slave, Ev::AnnounceReceiptTimeoutExpires) => Ps::Listening,
        (Ps::Slave, Ev::SynchronizationFault) => Ps::Uncalibrated,
        (Ps::Slave, Ev::RsMaster | Ev::RsGrandMaster | Ev::RsPassive) => Ps::Passive,
        (Ps::Slave, Ev::RsSlave) if master_changed => Ps::Uncalibrated,

        _ => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use {FsmEvent as Ev, PortState as Ps};

    const ALL_STATES: [PortState; 10] = [
        Ps::Initializing,
        Ps::Faulty,
        Ps::Disabled,
        Ps::Listening,
        Ps::PreMaster,
        Ps::Master,
        Ps::GrandMaster,
        Ps::Passive,
        Ps::Uncalibrated,
        Ps::Slave,
    ];

    const ALL_EVENTS: [FsmEvent; 16] = [
        Ev::Powerup,
        Ev::Initialize,
        Ev::DesignatedEnabled,
        Ev::DesignatedDisabled,
        Ev::FaultCleared,
        Ev::FaultDetected,
        Ev::StateDecisionEvent,
        Ev::QualificationTimeoutExpires,
        Ev::AnnounceReceiptTimeoutExpires,
        Ev::SynchronizationFault,
        Ev::MasterClockSelected,
        Ev::InitComplete,
        Ev::RsMaster,
        Ev::RsGrandMaster,
        Ev::RsSlave,
        Ev::RsPassive,
    ];

    #[test]
    fn startup_path() {
        let state = ptp_fsm(Ps::Initializing, Ev::InitComplete, false);
        assert_eq!(state, Ps::Listening);
    }

    #[test]
    fn master_requires_recommendation_or_timeout() {
        // A port can only become master through the pre-master
        // qualification, the grandmaster recommendation, or the announce
        // receipt timeout
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                let next = ptp_fsm(state, event, false);
                if matches!(next, Ps::Master | Ps::GrandMaster)
                    && !matches!(state, Ps::Master | Ps::GrandMaster)
                {
                    assert!(matches!(
                        event,
                        Ev::AnnounceReceiptTimeoutExpires
                            | Ev::QualificationTimeoutExpires
                            | Ev::RsGrandMaster
                            | Ev::RsMaster
                    ));
                }
            }
        }
    }

    #[test]
    fn slave_fsm_never_becomes_master() {
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                for master_changed in [false, true] {
                    let next = ptp_slave_fsm(state, event, master_changed);
                    assert!(
                        !matches!(next, Ps::Master | Ps::GrandMaster | Ps::PreMaster),
                        "{state:?} x {event:?} may not produce {next:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn fault_handling() {
        for state in ALL_STATES {
            if state == Ps::Disabled {
                continue;
            }
            assert_eq!(ptp_fsm(state, Ev::FaultDetected, false), Ps::Faulty);
        }
        assert_eq!(ptp_fsm(Ps::Disabled, Ev::FaultDetected, false), Ps::Disabled);
        assert_eq!(ptp_fsm(Ps::Faulty, Ev::FaultCleared, false), Ps::Initializing);
    }

    #[test]
    fn new_master_resets_calibration() {
        assert_eq!(ptp_fsm(Ps::Slave, Ev::RsSlave, true), Ps::Uncalibrated);
        assert_eq!(ptp_fsm(Ps::Slave, Ev::RsSlave, false), Ps::Slave);
        assert_eq!(
            ptp_fsm(Ps::Uncalibrated, Ev::MasterClockSelected, false),
            Ps::Slave
        );
        assert_eq!(
            ptp_fsm(Ps::Slave, Ev::SynchronizationFault, false),
            Ps::Uncalibrated
        );
    }

    #[test]
    fn state_decision_event_is_neutral() {
        for state in ALL_STATES {
            assert_eq!(ptp_fsm(state, Ev::StateDecisionEvent, false), state);
            assert_eq!(ptp_slave_fsm(state, Ev::StateDecisionEvent, false), state);
        }
    }
}
