use rand::Rng;

use super::{
    state::{DelayState, SyncCorrelator},
    Measurement, Port, PortActionIterator, PortState, Running,
};
use crate::{
    bmc::acceptable_master::AcceptableMasterList,
    datastructures::{
        common::TlvSet,
        messages::{DelayRespMessage, FollowUpInfo, FollowUpMessage, Header, Message, SyncMessage},
    },
    filters::Filter,
    port::{actions::TimestampContextInner, PortAction, TimestampContext},
    ptp_instance::PtpInstanceStateMutex,
    time::{Duration, Time},
    Clock,
};

impl<'a, A: AcceptableMasterList, C: Clock, F: Filter, R: Rng, S: PtpInstanceStateMutex>
    Port<'a, Running, A, R, C, F, S>
{
    /// Both halves of a two-step pair are known; feed the measurement to
    /// the filter and let the servo result drive the state machine.
    fn synchronize<'b>(&mut self, recv_time: Time, send_time: Time) -> PortActionIterator<'b> {
        let Some(slave) = self.slave.as_mut() else {
            return actions![];
        };

        let raw_sync_offset = recv_time - send_time - self.config.delay_asymmetry;
        slave.last_raw_sync_offset = Some(raw_sync_offset);

        let mean_delay = match self.delay_mechanism {
            crate::config::DelayMechanism::P2P { .. } => self.peer_delay.mean_delay(),
            _ => slave.mean_delay,
        };

        let measurement = Measurement {
            event_time: recv_time,
            offset: mean_delay.map(|delay| raw_sync_offset - delay),
            raw_sync_offset: Some(raw_sync_offset),
            ..Default::default()
        };

        log::info!("Measurement: {:?}", measurement);

        let update = slave.filter.measurement(measurement, &mut self.clock);
        if let Some(mean_delay) = update.mean_delay {
            slave.mean_delay = Some(mean_delay);
        }

        self.process_filter_update(update)
    }

    pub(super) fn handle_sync<'b>(
        &'b mut self,
        header: Header,
        message: SyncMessage,
        recv_time: Time,
    ) -> PortActionIterator<'b> {
        if !matches!(self.port_state, PortState::Uncalibrated | PortState::Slave) {
            return actions![];
        }

        let Some(slave) = self.slave.as_mut() else {
            return actions![];
        };

        if !self.config.skip_sync_check && header.source_port_identity != slave.remote_master {
            log::debug!(
                "port {}: sync from {} is not from our master",
                self.port_identity.port_number,
                header.source_port_identity
            );
            return actions![];
        }

        log::debug!("Received sync {:?}", header.sequence_id);

        // The master tells us how often to expect syncs
        if let Some(interval) = self.clamp_log_interval(header.log_message_interval) {
            self.remote_sync_interval = interval;
        }

        let sync_timeout = PortAction::ResetSyncReceiptTimer {
            duration: self
                .remote_sync_interval
                .as_core_duration()
                .saturating_mul(self.config.sync_receipt_timeout as u32),
        };

        // subtracting the correction from the receive time is equivalent to
        // adding it to the send time
        let corrected_recv_time = recv_time - Duration::from(header.correction_field);

        if header.two_step_flag {
            let slave = self.slave.as_mut().unwrap();
            match slave.correlator {
                SyncCorrelator::HaveSync { id, .. } if id == header.sequence_id => {
                    log::warn!("Duplicate sync message");
                    // A duplicate changes nothing, the held pair stays
                    actions![sync_timeout]
                }
                SyncCorrelator::HaveFup { id, send_time } if id == header.sequence_id => {
                    slave.correlator = SyncCorrelator::Empty;
                    actions![sync_timeout].chain(self.synchronize(corrected_recv_time, send_time))
                }
                _ => {
                    slave.correlator = SyncCorrelator::HaveSync {
                        id: header.sequence_id,
                        recv_time: corrected_recv_time,
                    };
                    actions![sync_timeout]
                }
            }
        } else {
            let send_time = Time::from(message.origin_timestamp);
            actions![sync_timeout].chain(self.synchronize(corrected_recv_time, send_time))
        }
    }

    pub(super) fn handle_follow_up<'b>(
        &'b mut self,
        header: Header,
        message: FollowUpMessage,
        suffix: TlvSet<'b>,
    ) -> PortActionIterator<'b> {
        if !matches!(self.port_state, PortState::Uncalibrated | PortState::Slave) {
            return actions![];
        }

        let Some(slave) = self.slave.as_mut() else {
            return actions![];
        };

        if !self.config.skip_sync_check && header.source_port_identity != slave.remote_master {
            return actions![];
        }

        log::debug!("Received FollowUp {:?}", header.sequence_id);

        if self.config.gptp_profile {
            if let Some(info) = suffix.tlv().find_map(|tlv| FollowUpInfo::extract(&tlv)) {
                self.instance_state
                    .with_mut(|state| state.follow_up_info = Some(info));
            }
        }

        let packet_send_time =
            Time::from(message.precise_origin_timestamp) + Duration::from(header.correction_field);

        let slave = self.slave.as_mut().unwrap();
        match slave.correlator {
            SyncCorrelator::HaveSync { id, recv_time } if id == header.sequence_id => {
                slave.correlator = SyncCorrelator::Empty;
                self.synchronize(recv_time, packet_send_time)
            }
            SyncCorrelator::HaveFup { id, .. } if id == header.sequence_id => {
                log::warn!("Duplicate FollowUp message");
                actions![]
            }
            _ => {
                if self.config.gptp_profile {
                    // A follow up never overtakes its sync on a gPTP link,
                    // holding it would only mask a broken peer
                    log::debug!("Ignoring out of order FollowUp message");
                    return actions![];
                }

                slave.correlator = SyncCorrelator::HaveFup {
                    id: header.sequence_id,
                    send_time: packet_send_time,
                };
                actions![]
            }
        }
    }

    pub(super) fn handle_delay_resp<'b>(
        &'b mut self,
        header: Header,
        message: DelayRespMessage,
    ) -> PortActionIterator<'b> {
        if !matches!(self.port_state, PortState::Uncalibrated | PortState::Slave) {
            return actions![];
        }

        let Some(slave) = self.slave.as_mut() else {
            return actions![];
        };

        log::debug!("Received DelayResp");

        if self.port_identity != message.requesting_port_identity
            || header.source_port_identity != slave.remote_master
        {
            return actions![];
        }

        match slave.delay_state {
            DelayState::Measuring {
                id,
                recv_time: Some(_),
                ..
            } if id == header.sequence_id => {
                log::warn!("Duplicate DelayResp message");
                actions![]
            }
            DelayState::Measuring {
                id,
                ref mut recv_time,
                ..
            } if id == header.sequence_id => {
                *recv_time = Some(
                    Time::from(message.receive_timestamp) - Duration::from(header.correction_field),
                );

                // The master dictates the pacing of our delay requests
                if !header.unicast_flag {
                    if let Some(interval) = self.clamp_log_interval(header.log_message_interval) {
                        self.min_delay_req_interval = interval;
                    }
                }

                self.extract_delay_measurement()
            }
            _ => {
                log::warn!("Unexpected DelayResp message");
                actions![]
            }
        }
    }

    pub(super) fn handle_delay_timestamp<'b>(
        &mut self,
        timestamp_id: u16,
        timestamp: Time,
    ) -> PortActionIterator<'b> {
        let Some(slave) = self.slave.as_mut() else {
            return actions![];
        };

        match slave.delay_state {
            DelayState::Measuring {
                id,
                send_time: Some(_),
                ..
            } if id == timestamp_id => {
                log::error!("Double send timestamp for delay request");
                actions![]
            }
            DelayState::Measuring {
                id,
                ref mut send_time,
                ..
            } if id == timestamp_id => {
                *send_time = Some(timestamp);
                self.extract_delay_measurement()
            }
            _ => {
                log::warn!("Late timestamp for delay request ignored");
                actions![]
            }
        }
    }

    /// Complete a delay measurement once both the transmit timestamp of our
    /// request and the receive timestamp in the response are known.
    fn extract_delay_measurement<'b>(&mut self) -> PortActionIterator<'b> {
        let slave = match self.slave.as_mut() {
            Some(slave) => slave,
            None => return actions![],
        };

        if let DelayState::Measuring {
            send_time: Some(send_time),
            recv_time: Some(recv_time),
            ..
        } = slave.delay_state
        {
            let raw_delay_offset = send_time - recv_time - self.config.delay_asymmetry;
            slave.delay_state = DelayState::Empty;

            let delay = slave
                .last_raw_sync_offset
                .map(|sync_offset| (sync_offset - raw_delay_offset) / 2);

            let measurement = Measurement {
                event_time: send_time,
                delay,
                raw_delay_offset: Some(raw_delay_offset),
                ..Default::default()
            };

            log::info!("Measurement: {:?}", measurement);

            let update = slave.filter.measurement(measurement, &mut self.clock);
            if let Some(mean_delay) = update.mean_delay {
                slave.mean_delay = Some(mean_delay);
            }

            PortActionIterator::from_filter(update)
        } else {
            actions![]
        }
    }

    pub(super) fn send_delay_request(&mut self) -> PortActionIterator {
        if !matches!(self.port_state, PortState::Uncalibrated | PortState::Slave) {
            return actions![];
        }

        let Some(slave) = self.slave.as_mut() else {
            return actions![];
        };

        log::debug!("Starting new delay measurement");

        let delay_id = self.delay_seq_ids.generate();
        let delay_req = self.instance_state.with_ref(|state| {
            Message::delay_req(&state.default_ds, self.port_identity, delay_id)
        });

        let message_length = match delay_req.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("Could not serialize delay request: {:?}", error);
                return actions![];
            }
        };

        // Replacing the slot drops a response that never completed
        slave.delay_state = DelayState::Measuring {
            id: delay_id,
            send_time: None,
            recv_time: None,
        };

        // Uniformly distributed in [0, 2) times the minimum interval, so we
        // average the configured pacing without phase-locking to the master
        let random = self.rng.sample::<f64, _>(rand::distributions::Open01);
        let factor = random * 2.0f64;
        let duration = self
            .min_delay_req_interval
            .as_core_duration()
            .mul_f64(factor);

        actions![
            PortAction::ResetDelayRequestTimer { duration },
            PortAction::SendEvent {
                context: TimestampContext {
                    inner: TimestampContextInner::DelayReq { id: delay_id },
                },
                data: &self.packet_buffer[..message_length],
                link_local: false,
            }
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datastructures::common::{PortIdentity, TimeInterval},
        datastructures::messages::MessageBody,
        filters::ServoState,
        port::tests::{setup_test_port, setup_test_state},
        port::MAX_DATA_LEN,
    };

    fn remote_master() -> PortIdentity {
        PortIdentity {
            clock_identity: crate::config::ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
            port_number: 1,
        }
    }

    #[test]
    fn two_step_sync_lock() {
        // Scenario: two-step sync followed by its follow up, the servo
        // locks, and the port moves from uncalibrated to slave
        let state = setup_test_state();
        let mut port = setup_test_port(&state);

        port.slave = Some(super::super::state::SlaveState::new(remote_master(), ()));
        port.force_state(PortState::Uncalibrated);
        port.test_filter_mut().state = ServoState::Locked;

        let mut actions = port.handle_sync(
            Header {
                two_step_flag: true,
                sequence_id: 7,
                source_port_identity: remote_master(),
                ..Default::default()
            },
            SyncMessage {
                origin_timestamp: Default::default(),
            },
            Time::from_nanos(1000),
        );

        assert!(matches!(
            actions.next(),
            Some(PortAction::ResetSyncReceiptTimer { .. })
        ));
        assert!(actions.next().is_none());
        drop(actions);
        assert_eq!(port.test_filter_mut().last_measurement.take(), None);

        let mut actions = port.handle_follow_up(
            Header {
                sequence_id: 7,
                source_port_identity: remote_master(),
                correction_field: TimeInterval(200.into()),
                ..Default::default()
            },
            FollowUpMessage {
                precise_origin_timestamp: Time::from_nanos(500).into(),
            },
            TlvSet::default(),
        );

        // Locking the servo selects the master clock: uncalibrated -> slave
        while actions.next().is_some() {}
        drop(actions);

        assert_eq!(port.state(), PortState::Slave);

        let measurement = port.test_filter_mut().last_measurement.take().unwrap();
        assert_eq!(measurement.event_time, Time::from_nanos(1000));
        assert_eq!(
            measurement.raw_sync_offset,
            Some(Duration::from_nanos(300))
        );
    }

    #[test]
    fn reordered_sync_and_follow_up() {
        // Scenario: the follow up overtakes its sync; the pair must still
        // produce the measurement once the sync arrives
        let state = setup_test_state();
        let mut port = setup_test_port(&state);
        port.force_slave(remote_master());

        let mut actions = port.handle_follow_up(
            Header {
                sequence_id: 9,
                source_port_identity: remote_master(),
                ..Default::default()
            },
            FollowUpMessage {
                precise_origin_timestamp: Time::from_nanos(1000).into(),
            },
            TlvSet::default(),
        );
        assert!(actions.next().is_none());
        drop(actions);
        assert_eq!(port.test_filter_mut().last_measurement.take(), None);

        let mut actions = port.handle_sync(
            Header {
                two_step_flag: true,
                sequence_id: 9,
                source_port_identity: remote_master(),
                ..Default::default()
            },
            SyncMessage {
                origin_timestamp: Default::default(),
            },
            Time::from_nanos(1500),
        );
        assert!(matches!(
            actions.next(),
            Some(PortAction::ResetSyncReceiptTimer { .. })
        ));
        drop(actions);

        let measurement = port.test_filter_mut().last_measurement.take().unwrap();
        assert_eq!(measurement.event_time, Time::from_nanos(1500));
        assert_eq!(
            measurement.raw_sync_offset,
            Some(Duration::from_nanos(500))
        );

        // And the correlator is empty again
        assert_eq!(
            port.slave.as_ref().unwrap().correlator,
            SyncCorrelator::Empty
        );
    }

    #[test]
    fn duplicate_sync_is_idempotent() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);
        port.force_slave(remote_master());

        let sync_header = Header {
            two_step_flag: true,
            sequence_id: 15,
            source_port_identity: remote_master(),
            ..Default::default()
        };

        let mut actions = port.handle_sync(
            sync_header,
            SyncMessage {
                origin_timestamp: Default::default(),
            },
            Time::from_micros(50),
        );
        while actions.next().is_some() {}
        drop(actions);

        let held = port.slave.as_ref().unwrap().correlator;

        let mut actions = port.handle_sync(
            sync_header,
            SyncMessage {
                origin_timestamp: Default::default(),
            },
            Time::from_micros(60),
        );
        while actions.next().is_some() {}
        drop(actions);

        // The duplicate did not replace the held sync
        assert_eq!(port.slave.as_ref().unwrap().correlator, held);
        assert_eq!(port.test_filter_mut().last_measurement.take(), None);
    }

    #[test]
    fn sync_from_unknown_master_is_dropped() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);
        port.force_slave(remote_master());

        let mut actions = port.handle_sync(
            Header {
                two_step_flag: true,
                sequence_id: 2,
                source_port_identity: PortIdentity {
                    port_number: 99,
                    ..remote_master()
                },
                ..Default::default()
            },
            SyncMessage {
                origin_timestamp: Default::default(),
            },
            Time::from_micros(50),
        );
        assert!(actions.next().is_none());
        drop(actions);

        assert_eq!(
            port.slave.as_ref().unwrap().correlator,
            SyncCorrelator::Empty
        );
    }

    #[test]
    fn sync_check_can_be_skipped() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);
        port.force_slave(remote_master());
        port.config.skip_sync_check = true;

        let mut actions = port.handle_sync(
            Header {
                two_step_flag: true,
                sequence_id: 2,
                source_port_identity: PortIdentity {
                    port_number: 99,
                    ..remote_master()
                },
                ..Default::default()
            },
            SyncMessage {
                origin_timestamp: Default::default(),
            },
            Time::from_micros(50),
        );
        assert!(actions.next().is_some());
        drop(actions);

        assert!(matches!(
            port.slave.as_ref().unwrap().correlator,
            SyncCorrelator::HaveSync { id: 2, .. }
        ));
    }

    #[test]
    fn delay_exchange_measures_mean_delay() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);
        port.force_slave(remote_master());

        // A one-step sync seeds the raw sync offset
        let mut actions = port.handle_sync(
            Header {
                two_step_flag: false,
                sequence_id: 1,
                source_port_identity: remote_master(),
                correction_field: TimeInterval(1000.into()),
                ..Default::default()
            },
            SyncMessage {
                origin_timestamp: Time::from_micros(0).into(),
            },
            Time::from_micros(50),
        );
        while actions.next().is_some() {}
        drop(actions);

        assert_eq!(
            port.test_filter_mut()
                .last_measurement
                .take()
                .unwrap()
                .raw_sync_offset,
            Some(Duration::from_nanos(49_000))
        );

        // Send out the delay request
        let mut actions = port.send_delay_request();
        let Some(PortAction::ResetDelayRequestTimer { .. }) = actions.next() else {
            panic!("Unexpected action");
        };
        let Some(PortAction::SendEvent { context, data, .. }) = actions.next() else {
            panic!("Unexpected action");
        };
        let req = Message::deserialize(data).unwrap();
        let req_header = req.header;
        assert!(matches!(req.body, MessageBody::DelayReq(_)));
        drop(actions);

        let mut actions = port.handle_send_timestamp(context, Time::from_micros(100));
        assert!(actions.next().is_none());
        drop(actions);

        // And receive the matching response
        let mut buffer = [0u8; MAX_DATA_LEN];
        let resp = Message::delay_resp(
            Header {
                source_port_identity: remote_master(),
                correction_field: TimeInterval(2000.into()),
                ..req_header
            },
            match req.body {
                MessageBody::DelayReq(m) => m,
                _ => unreachable!(),
            },
            remote_master(),
            crate::time::Interval::TWO_SECONDS,
            Time::from_micros(253),
        );
        let len = resp.serialize(&mut buffer).unwrap();

        let mut actions = port.handle_general_receive(&buffer[..len]);
        while actions.next().is_some() {}
        drop(actions);

        let measurement = port.test_filter_mut().last_measurement.take().unwrap();
        assert!(measurement.delay.is_some());
        assert_eq!(port.slave.as_ref().unwrap().mean_delay, measurement.delay);
        assert_eq!(
            port.slave.as_ref().unwrap().delay_state,
            DelayState::Empty
        );
    }
}
