use core::cell::RefCell;

use atomic_refcell::AtomicRefCell;
use rand::Rng;

use crate::{
    bmc::{acceptable_master::AcceptableMasterList, bmca::Bmca},
    clock::Clock,
    config::{InstanceConfig, PortConfig, TimePropertiesDS},
    datastructures::{
        common::PortIdentity,
        datasets::{InternalCurrentDS, InternalDefaultDS, InternalParentDS, PathTraceDS},
        messages::FollowUpInfo,
    },
    filters::Filter,
    port::{InBmca, Port},
    time::Duration,
};

/// The state of a PTP instance, shared between its ports.
#[derive(Debug)]
pub struct PtpInstanceState {
    pub(crate) default_ds: InternalDefaultDS,
    pub(crate) current_ds: InternalCurrentDS,
    pub(crate) parent_ds: InternalParentDS,
    pub(crate) path_trace_ds: PathTraceDS,
    pub(crate) time_properties_ds: TimePropertiesDS,
    /// Follow up information of the current gPTP master, if any came in
    pub(crate) follow_up_info: Option<FollowUpInfo>,
    /// The port currently disciplining the clock, if any
    pub(crate) slave_port: Option<u16>,
}

impl PtpInstanceState {
    pub(crate) fn new(
        default_ds: InternalDefaultDS,
        time_properties_ds: TimePropertiesDS,
        path_trace: bool,
    ) -> Self {
        Self {
            default_ds,
            current_ds: Default::default(),
            parent_ds: InternalParentDS::new(default_ds),
            path_trace_ds: PathTraceDS::new(path_trace),
            time_properties_ds,
            follow_up_info: None,
            slave_port: None,
        }
    }

    /// The port number of the port disciplining the clock, if any
    pub fn slave_port(&self) -> Option<u16> {
        self.slave_port
    }
}

/// Provides synchronized access to the shared state of a [`PtpInstance`].
///
/// The sans-I/O core never blocks; the single threaded embeddings use an
/// [`AtomicRefCell`], multi threaded ones a lock from their platform.
pub trait PtpInstanceStateMutex {
    /// Creates a new instance of the mutex, containing the given state
    fn new(state: PtpInstanceState) -> Self;

    /// Calls the provided closure with a reference to the state
    fn with_ref<R, F: FnOnce(&PtpInstanceState) -> R>(&self, f: F) -> R;

    /// Calls the provided closure with a mutable reference to the state
    fn with_mut<R, F: FnOnce(&mut PtpInstanceState) -> R>(&self, f: F) -> R;
}

impl PtpInstanceStateMutex for AtomicRefCell<PtpInstanceState> {
    fn new(state: PtpInstanceState) -> Self {
        AtomicRefCell::new(state)
    }

    fn with_ref<R, F: FnOnce(&PtpInstanceState) -> R>(&self, f: F) -> R {
        f(&self.borrow())
    }

    fn with_mut<R, F: FnOnce(&mut PtpInstanceState) -> R>(&self, f: F) -> R {
        f(&mut self.borrow_mut())
    }
}

impl PtpInstanceStateMutex for RefCell<PtpInstanceState> {
    fn new(state: PtpInstanceState) -> Self {
        RefCell::new(state)
    }

    fn with_ref<R, F: FnOnce(&PtpInstanceState) -> R>(&self, f: F) -> R {
        f(&self.borrow())
    }

    fn with_mut<R, F: FnOnce(&mut PtpInstanceState) -> R>(&self, f: F) -> R {
        f(&mut self.borrow_mut())
    }
}

#[cfg(feature = "std")]
impl PtpInstanceStateMutex for std::sync::RwLock<PtpInstanceState> {
    fn new(state: PtpInstanceState) -> Self {
        std::sync::RwLock::new(state)
    }

    fn with_ref<R, F: FnOnce(&PtpInstanceState) -> R>(&self, f: F) -> R {
        f(&self.read().unwrap())
    }

    fn with_mut<R, F: FnOnce(&mut PtpInstanceState) -> R>(&self, f: F) -> R {
        f(&mut self.write().unwrap())
    }
}

/// A PTP node.
///
/// This object handles the complete running of the PTP protocol once
/// created. It provides all the logic for both ordinary and boundary clock
/// mode.
///
/// # Example
///
/// Initialization:
/// ```no_run
/// # use timeport::PtpInstance;
/// # use timeport::config::{AcceptAnyMaster, ClockIdentity, DelayMechanism, FaultInterval, InstanceConfig, PortConfig, PortDescription, TimePropertiesDS, TimeSource};
/// # use timeport::filters::BasicFilter;
/// use timeport::time::{Duration, Interval};
/// # #[derive(Debug)] struct MockClock;
/// # impl timeport::Clock for MockClock {
/// #     type Error = ();
/// #     fn now(&self) -> timeport::time::Time { unimplemented!() }
/// #     fn step_clock(&mut self, _: Duration) -> Result<timeport::time::Time, Self::Error> { unimplemented!() }
/// #     fn set_frequency(&mut self, _: f64) -> Result<timeport::time::Time, Self::Error> { unimplemented!() }
/// #     fn set_properties(&mut self, _: &TimePropertiesDS) -> Result<(), Self::Error> { unimplemented!() }
/// # }
///
/// let instance_config = InstanceConfig {
///     clock_identity: ClockIdentity::from_mac_address([1, 2, 3, 4, 5, 6]),
///     priority_1: 128,
///     priority_2: 128,
///     domain_number: 0,
///     slave_only: false,
///     sdo_id: Default::default(),
///     path_trace: false,
///     clock_quality: Default::default(),
///     gm_capable: true,
/// };
/// let time_properties_ds =
///     TimePropertiesDS::new_arbitrary_time(false, false, TimeSource::InternalOscillator);
///
/// let mut instance = PtpInstance::<BasicFilter>::new(instance_config, time_properties_ds);
///
/// let port_config = PortConfig {
///     acceptable_master_list: AcceptAnyMaster,
///     delay_mechanism: DelayMechanism::E2E { interval: Interval::ONE_SECOND },
///     announce_interval: Interval::TWO_SECONDS,
///     announce_receipt_timeout: 3,
///     sync_interval: Interval::ONE_SECOND,
///     sync_receipt_timeout: 3,
///     master_only: false,
///     delay_asymmetry: Duration::ZERO,
///     gptp_profile: false,
///     neighbor_prop_delay_thresh: Duration::from_micros(2),
///     min_neighbor_prop_delay: Duration::from_micros(-2),
///     freq_est_interval: Interval::ONE_SECOND,
///     skip_sync_check: false,
///     fault_reset_interval: FaultInterval::Log(Interval::from_log_2(4)),
///     fault_badpeernet_interval: FaultInterval::Seconds(16),
///     port_description: PortDescription::default(),
/// };
/// let filter_config = 0.25;
///
/// let port = instance.add_port(port_config, filter_config, MockClock, rand::thread_rng());
/// ```
#[derive(Debug)]
pub struct PtpInstance<F, S = AtomicRefCell<PtpInstanceState>> {
    state: S,
    log_bmca_interval: core::sync::atomic::AtomicI8,
    _filter: core::marker::PhantomData<F>,
}

impl<F: Filter, S: PtpInstanceStateMutex> PtpInstance<F, S> {
    /// Construct a new [`PtpInstance`] with the given config and time
    /// properties
    pub fn new(config: InstanceConfig, time_properties_ds: TimePropertiesDS) -> Self {
        let default_ds = InternalDefaultDS::new(config);

        Self {
            state: S::new(PtpInstanceState::new(
                default_ds,
                time_properties_ds,
                config.path_trace,
            )),
            log_bmca_interval: core::sync::atomic::AtomicI8::new(i8::MAX),
            _filter: core::marker::PhantomData,
        }
    }

    /// Add and initialize this port
    ///
    /// We start in the BMCA state because that is convenient
    ///
    /// When providing the port with a different clock than the instance
    /// (which might be useful for hardware timestamps), make sure the
    /// clocks are synchronized. Also make sure that the clock used for
    /// timestamps is the clock that is disciplined.
    pub fn add_port<'a, A: AcceptableMasterList, R: Rng, C: Clock>(
        &'a self,
        config: PortConfig<A>,
        filter_config: F::Config,
        clock: C,
        rng: R,
    ) -> Port<'a, InBmca, A, R, C, F, S> {
        self.log_bmca_interval.fetch_min(
            config.announce_interval.as_log_2(),
            core::sync::atomic::Ordering::Relaxed,
        );

        let port_identity = self.state.with_mut(|state| {
            state.default_ds.number_ports += 1;
            PortIdentity {
                clock_identity: state.default_ds.clock_identity,
                port_number: state.default_ds.number_ports,
            }
        });

        Port::new(
            &self.state,
            config,
            filter_config,
            clock,
            port_identity,
            rng,
        )
    }

    /// Run the best master clock algorithm (BMCA)
    ///
    /// The caller must pass all the ports that were created on this
    /// instance in the slice!
    pub fn bmca<A: AcceptableMasterList, R: Rng, C: Clock>(
        &self,
        ports: &mut [&mut Port<'_, InBmca, A, R, C, F, S>],
    ) {
        log::debug!("Running BMCA");

        // Notify all the ports that they need to start their BMCA cycle
        for port in ports.iter_mut() {
            port.calculate_best_local_announce_message()
        }

        let ebest = Bmca::<()>::find_best_announce_message(
            ports
                .iter()
                .filter_map(|port| port.best_local_announce_message()),
        );

        for port in ports.iter_mut() {
            let recommended_state = self.state.with_ref(|state| {
                Bmca::<()>::calculate_recommended_state(
                    &state.default_ds,
                    ebest,
                    port.best_local_announce_message(),
                    port.state(),
                )
            });

            if let Some(recommended_state) = recommended_state {
                self.state.with_mut(|state| {
                    // Split the borrow so the datasets can move into the
                    // port call individually
                    let PtpInstanceState {
                        default_ds,
                        current_ds,
                        parent_ds,
                        path_trace_ds,
                        time_properties_ds,
                        ..
                    } = state;

                    port.set_recommended_state(
                        recommended_state,
                        time_properties_ds,
                        current_ds,
                        parent_ds,
                        path_trace_ds,
                        default_ds,
                    );
                });
            }

            port.step_announce_age(self.bmca_duration());
        }

        // Record which port, if any, ended up disciplining the clock
        self.state.with_mut(|state| {
            state.slave_port = ports
                .iter()
                .find(|port| {
                    matches!(
                        port.state(),
                        crate::port::PortState::Uncalibrated | crate::port::PortState::Slave
                    )
                })
                .map(|port| port.port_identity.port_number);
        });
    }

    /// Time between two calls to [`PtpInstance::bmca`]
    pub fn bmca_interval(&self) -> core::time::Duration {
        let log = self.log_bmca_interval.load(core::sync::atomic::Ordering::Relaxed);
        if log == i8::MAX {
            core::time::Duration::from_secs(1)
        } else {
            crate::time::Interval::from_log_2(log).as_core_duration()
        }
    }

    fn bmca_duration(&self) -> Duration {
        let duration = self.bmca_interval();
        Duration::from_nanos(duration.as_nanos() as i64)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::mock::StepRng;

    use super::*;
    use crate::{
        config::{ClockIdentity, ClockQuality, TimeSource},
        datastructures::{
            common::WireTimestamp,
            messages::{AnnounceMessage, Header, Message, MessageBody},
        },
        port::{
            tests::{default_test_port_config, TestClock, TestFilter},
            PortState, MAX_DATA_LEN,
        },
    };

    fn test_instance_config() -> InstanceConfig {
        InstanceConfig {
            clock_identity: ClockIdentity::default(),
            priority_1: 128,
            priority_2: 128,
            domain_number: 0,
            slave_only: false,
            sdo_id: Default::default(),
            path_trace: false,
            clock_quality: ClockQuality::default(),
            gm_capable: true,
        }
    }

    fn foreign_announce(sequence_id: u16) -> ([u8; MAX_DATA_LEN], usize) {
        let remote = PortIdentity {
            clock_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
            port_number: 1,
        };

        let header = Header {
            source_port_identity: remote,
            sequence_id,
            ..Default::default()
        };

        let message = Message {
            header,
            body: MessageBody::Announce(AnnounceMessage {
                header,
                origin_timestamp: WireTimestamp::default(),
                current_utc_offset: 0,
                // Clearly better than our defaults
                grandmaster_priority_1: 1,
                grandmaster_clock_quality: ClockQuality::default(),
                grandmaster_priority_2: 128,
                grandmaster_identity: remote.clock_identity,
                steps_removed: 0,
                time_source: TimeSource::InternalOscillator,
            }),
            suffix: Default::default(),
        };

        let mut buffer = [0u8; MAX_DATA_LEN];
        let length = message.serialize(&mut buffer).unwrap();
        (buffer, length)
    }

    #[test]
    fn second_announce_wins_the_bmca() {
        let time_properties =
            TimePropertiesDS::new_arbitrary_time(false, false, TimeSource::InternalOscillator);
        let instance: PtpInstance<TestFilter> =
            PtpInstance::new(test_instance_config(), time_properties);

        let port = instance.add_port(
            default_test_port_config(),
            (),
            TestClock,
            StepRng::new(2, 1),
        );
        let (mut port, actions) = port.end_bmca();
        drop(actions);

        // One announce is not enough to qualify the new master
        let (buffer, length) = foreign_announce(0);
        let mut actions = port.handle_general_receive(&buffer[..length]);
        while actions.next().is_some() {}
        drop(actions);

        let mut port = port.start_bmca();
        instance.bmca(&mut [&mut port]);
        assert_eq!(port.state(), PortState::Listening);

        // The second announce crosses the qualification threshold and the
        // state decision selects the new master
        let (mut port, actions) = port.end_bmca();
        drop(actions);

        let (buffer, length) = foreign_announce(1);
        let mut actions = port.handle_general_receive(&buffer[..length]);
        while actions.next().is_some() {}
        drop(actions);

        let mut port = port.start_bmca();
        instance.bmca(&mut [&mut port]);
        assert_eq!(port.state(), PortState::Uncalibrated);

        // The instance tracks the designated slave port
        instance.state.with_ref(|state| {
            assert_eq!(state.slave_port(), Some(1));
            assert_eq!(
                state.parent_ds.grandmaster_identity,
                ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8])
            );
        });
    }
}
