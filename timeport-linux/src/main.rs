use std::{future::Future, path::PathBuf, pin::{pin, Pin}, sync::RwLock};

use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use timeport::{
    config::{ClockIdentity, InstanceConfig, PortDescription, SdoId, TimePropertiesDS, TimeSource},
    filters::BasicFilter,
    port::{FaultType, InBmca, Port, PortAction, PortActionIterator, TimestampContext, MAX_DATA_LEN},
    time::Time,
    PtpInstance, PtpInstanceState,
};
use timeport_linux::{
    clock::{port_timestamp_to_time, LinuxClock},
    config::{Config, NetworkMode},
    get_clock_id,
    socket::{
        open_ethernet_socket, open_ipv4_event_socket, open_ipv4_general_socket,
        open_ipv6_event_socket, open_ipv6_general_socket, PtpTargetAddress,
    },
    tracing::tracing_init,
};
use timestamped_socket::{
    interface::interfaces,
    networkaddress::{EthernetAddress, NetworkAddress},
    socket::{InterfaceTimestampMode, Open, Socket},
};
use tokio::{
    sync::{mpsc::{Receiver, Sender}, watch},
    time::Sleep,
};

type PtpFilter = BasicFilter;
type SharedState = RwLock<PtpInstanceState>;
type Instance = PtpInstance<PtpFilter, SharedState>;
type BmcaPort = Port<
    'static,
    InBmca,
    Option<Vec<ClockIdentity>>,
    StdRng,
    LinuxClock,
    PtpFilter,
    SharedState,
>;

const FILTER_GAIN: f64 = 0.25;

#[derive(Parser, Debug)]
#[clap(author, version, about = "PTP daemon", long_about = None)]
struct Args {
    /// Configuration file to use
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    actual_main().await
}

async fn actual_main() {
    let args = Args::parse();
    let config_path = args
        .config
        .unwrap_or_else(timeport_linux::config::Config::default_path);

    let config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("could not load configuration: {error}");
            std::process::exit(1);
        }
    };

    tracing_init(config.loglevel).expect("could not setup logging");

    let clock_identity = config.identity.unwrap_or_else(|| {
        ClockIdentity(get_clock_id().expect("could not determine a clock identity"))
    });
    log::info!("instance clock identity: {}", clock_identity);

    let instance_config = InstanceConfig {
        clock_identity,
        priority_1: config.priority1,
        priority_2: config.priority2,
        domain_number: config.domain,
        slave_only: config.slave_only,
        sdo_id: SdoId::new(config.sdo_id).expect("sdo-id must be at most 4095"),
        path_trace: config.path_trace,
        clock_quality: Default::default(),
        gm_capable: config.gm_capable,
    };

    let time_properties_ds =
        TimePropertiesDS::new_arbitrary_time(false, false, TimeSource::InternalOscillator);

    // The ports borrow the instance for the lifetime of the process
    let instance: &'static Instance =
        Box::leak(Box::new(PtpInstance::new(instance_config, time_properties_ds)));

    let (bmca_notify_sender, bmca_notify_receiver) = watch::channel(false);
    let mut main_task_receivers = Vec::with_capacity(config.ports.len());
    let mut port_task_senders = Vec::with_capacity(config.ports.len());

    let interface_data = interfaces().expect("could not enumerate network interfaces");

    for port_config in &config.ports {
        let interface = port_config.interface;
        let bind_phc = port_config.hardware_clock;

        let port_clock = match bind_phc {
            Some(idx) => LinuxClock::open_idx(idx).expect("could not open hardware clock"),
            None => LinuxClock::CLOCK_REALTIME,
        };

        let timestamping = match bind_phc {
            Some(_) => InterfaceTimestampMode::HardwarePTPAll,
            None => InterfaceTimestampMode::SoftwareAll,
        };

        let mut description = PortDescription {
            hardware_timestamping: bind_phc.is_some(),
            ..Default::default()
        };
        let name = interface.to_string();
        let _ = description
            .interface_name
            .try_extend_from_slice(&name.as_bytes()[..name.len().min(16)]);
        if let Some(mac) = interface_data.get(&interface).and_then(|data| data.mac()) {
            let _ = description.physical_address.try_extend_from_slice(&mac);
        }

        let rng = StdRng::from_entropy();
        let port = instance.add_port(
            port_config.as_port_config(description),
            FILTER_GAIN,
            port_clock.clone(),
            rng,
        );

        let (main_task_sender, main_task_receiver) = tokio::sync::mpsc::channel(1);
        let (port_task_sender, port_task_receiver) = tokio::sync::mpsc::channel(1);

        match port_config.network_mode {
            NetworkMode::Ipv4 => {
                let event_socket = open_ipv4_event_socket(interface, timestamping, bind_phc)
                    .expect("could not open event socket");
                let general_socket =
                    open_ipv4_general_socket(interface).expect("could not open general socket");

                tokio::spawn(port_task(
                    port_task_receiver,
                    main_task_sender,
                    event_socket,
                    general_socket,
                    bmca_notify_receiver.clone(),
                    port_clock,
                ));
            }
            NetworkMode::Ipv6 => {
                let event_socket = open_ipv6_event_socket(interface, timestamping, bind_phc)
                    .expect("could not open event socket");
                let general_socket =
                    open_ipv6_general_socket(interface).expect("could not open general socket");

                tokio::spawn(port_task(
                    port_task_receiver,
                    main_task_sender,
                    event_socket,
                    general_socket,
                    bmca_notify_receiver.clone(),
                    port_clock,
                ));
            }
            NetworkMode::Ethernet => {
                let socket = open_ethernet_socket(interface, timestamping, bind_phc)
                    .expect("could not open ethernet socket");

                tokio::spawn(ethernet_port_task(
                    port_task_receiver,
                    main_task_sender,
                    socket,
                    bmca_notify_receiver.clone(),
                    port_clock,
                ));
            }
        }

        port_task_sender
            .send(port)
            .await
            .expect("port task disappeared during startup");
        main_task_receivers.push(main_task_receiver);
        port_task_senders.push(port_task_sender);
    }

    run(instance, main_task_receivers, port_task_senders, bmca_notify_sender).await
}

/// The BMCA coordinator: periodically recalls all ports from their tasks,
/// runs the best master clock algorithm over them, and hands them back.
async fn run(
    instance: &'static Instance,
    mut main_task_receivers: Vec<Receiver<BmcaPort>>,
    port_task_senders: Vec<Sender<BmcaPort>>,
    bmca_notify_sender: watch::Sender<bool>,
) -> ! {
    loop {
        tokio::time::sleep(instance.bmca_interval()).await;

        // Ask the tasks to hand their ports over
        bmca_notify_sender
            .send(true)
            .expect("all port tasks died");

        let mut bmca_ports = Vec::with_capacity(main_task_receivers.len());
        for receiver in main_task_receivers.iter_mut() {
            bmca_ports.push(receiver.recv().await.expect("a port task died"));
        }

        bmca_notify_sender
            .send(false)
            .expect("all port tasks died");

        let mut refs: Vec<&mut BmcaPort> = bmca_ports.iter_mut().collect();
        instance.bmca(&mut refs);

        for (port, sender) in bmca_ports.into_iter().zip(port_task_senders.iter()) {
            sender.send(port).await.expect("a port task died");
        }
    }
}

pin_project_lite::pin_project! {
    /// A resettable timer. Until the first reset it never expires.
    struct Timer {
        #[pin]
        timer: Sleep,
        running: bool,
    }
}

impl Timer {
    fn new() -> Self {
        Timer {
            timer: tokio::time::sleep(std::time::Duration::from_secs(0)),
            running: false,
        }
    }

    fn reset(self: Pin<&mut Self>, duration: std::time::Duration) {
        // Cap the expiry, mostly to keep an "infinite" interval from
        // overflowing the tokio deadline
        let duration = duration.min(std::time::Duration::from_secs(60 * 60 * 24 * 365));

        let this = self.project();
        this.timer.reset(tokio::time::Instant::now() + duration);
        *this.running = true;
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        let this = self.project();
        if *this.running {
            let result = this.timer.poll(cx);
            if result != std::task::Poll::Pending {
                *this.running = false;
            }
            result
        } else {
            std::task::Poll::Pending
        }
    }
}

/// The per-port timer set: one future per scheduled wakeup the port can
/// request.
struct Timers<'a> {
    announce_timer: Pin<&'a mut Timer>,
    sync_timer: Pin<&'a mut Timer>,
    delay_request_timer: Pin<&'a mut Timer>,
    announce_receipt_timer: Pin<&'a mut Timer>,
    sync_receipt_timer: Pin<&'a mut Timer>,
    qualification_timer: Pin<&'a mut Timer>,
    fault_timer: Pin<&'a mut Timer>,
    filter_update_timer: Pin<&'a mut Timer>,
}

async fn port_task<A: NetworkAddress + PtpTargetAddress>(
    mut port_task_receiver: Receiver<BmcaPort>,
    main_task_sender: Sender<BmcaPort>,
    mut event_socket: Socket<A, Open>,
    mut general_socket: Socket<A, Open>,
    mut bmca_notify: watch::Receiver<bool>,
    clock: LinuxClock,
) {
    let announce_timer = pin!(Timer::new());
    let sync_timer = pin!(Timer::new());
    let delay_request_timer = pin!(Timer::new());
    let announce_receipt_timer = pin!(Timer::new());
    let sync_receipt_timer = pin!(Timer::new());
    let qualification_timer = pin!(Timer::new());
    let fault_timer = pin!(Timer::new());
    let filter_update_timer = pin!(Timer::new());

    let mut timers = Timers {
        announce_timer,
        sync_timer,
        delay_request_timer,
        announce_receipt_timer,
        sync_receipt_timer,
        qualification_timer,
        fault_timer,
        filter_update_timer,
    };

    let mut event_buffer = [0; MAX_DATA_LEN];
    let mut general_buffer = [0; MAX_DATA_LEN];

    loop {
        let port_in_bmca = port_task_receiver.recv().await.unwrap();

        // Handle the post-bmca actions
        let (mut port, actions) = port_in_bmca.end_bmca();

        let mut pending_timestamp = handle_actions(
            actions,
            &mut event_socket,
            &mut general_socket,
            &mut timers,
            &clock,
        )
        .await;

        while let Some((context, timestamp)) = pending_timestamp {
            pending_timestamp = handle_actions(
                port.handle_send_timestamp(context, timestamp),
                &mut event_socket,
                &mut general_socket,
                &mut timers,
                &clock,
            )
            .await;
        }

        loop {
            let mut actions = tokio::select! {
                result = event_socket.recv(&mut event_buffer) => match result {
                    Ok(packet) => {
                        let timestamp = port_timestamp_to_time(packet.timestamp, &clock);
                        port.handle_event_receive(&event_buffer[..packet.bytes_read], timestamp)
                    }
                    Err(error) => {
                        log::error!("failed to receive event message: {:?}", error);
                        port.handle_fault(FaultType::Unspecified)
                    }
                },
                result = general_socket.recv(&mut general_buffer) => match result {
                    Ok(packet) => port.handle_general_receive(&general_buffer[..packet.bytes_read]),
                    Err(error) => {
                        log::error!("failed to receive general message: {:?}", error);
                        port.handle_fault(FaultType::Unspecified)
                    }
                },
                () = &mut timers.announce_timer => {
                    port.handle_announce_timer()
                },
                () = &mut timers.sync_timer => {
                    port.handle_sync_timer()
                },
                () = &mut timers.delay_request_timer => {
                    port.handle_delay_request_timer()
                },
                () = &mut timers.announce_receipt_timer => {
                    port.handle_announce_receipt_timer()
                },
                () = &mut timers.sync_receipt_timer => {
                    port.handle_sync_receipt_timer()
                },
                () = &mut timers.qualification_timer => {
                    port.handle_qualification_timer()
                },
                () = &mut timers.fault_timer => {
                    port.handle_fault_timer()
                },
                () = &mut timers.filter_update_timer => {
                    port.handle_filter_update_timer()
                },
                result = bmca_notify.wait_for(|v| *v) => match result {
                    Ok(_) => break,
                    Err(error) => panic!("Error on bmca notify: {error:?}"),
                },
            };

            loop {
                let pending_timestamp = handle_actions(
                    actions,
                    &mut event_socket,
                    &mut general_socket,
                    &mut timers,
                    &clock,
                )
                .await;

                // there might be more actions to handle based on the current
                // action
                actions = match pending_timestamp {
                    Some((context, timestamp)) => port.handle_send_timestamp(context, timestamp),
                    None => break,
                };
            }
        }

        let port_in_bmca = port.start_bmca();
        main_task_sender.send(port_in_bmca).await.unwrap();
    }
}

async fn handle_actions<A: NetworkAddress + PtpTargetAddress>(
    actions: PortActionIterator<'_>,
    event_socket: &mut Socket<A, Open>,
    general_socket: &mut Socket<A, Open>,
    timers: &mut Timers<'_>,
    clock: &LinuxClock,
) -> Option<(TimestampContext, Time)> {
    let mut pending_timestamp = None;

    for action in actions {
        match action {
            PortAction::SendEvent {
                context,
                data,
                link_local,
            } => {
                let address = if link_local {
                    A::PDELAY_EVENT
                } else {
                    A::PRIMARY_EVENT
                };

                match event_socket.send_to(data, address).await {
                    Ok(time) => {
                        // anything sent later will have a later pending
                        // (send) timestamp
                        pending_timestamp = Some((context, port_timestamp_to_time(time, clock)));
                    }
                    Err(error) => log::error!("failed to send event message: {:?}", error),
                }
            }
            PortAction::SendGeneral { data, link_local } => {
                let address = if link_local {
                    A::PDELAY_GENERAL
                } else {
                    A::PRIMARY_GENERAL
                };

                if let Err(error) = general_socket.send_to(data, address).await {
                    log::error!("failed to send general message: {:?}", error);
                }
            }
            PortAction::ResetAnnounceTimer { duration } => {
                timers.announce_timer.as_mut().reset(duration);
            }
            PortAction::ResetSyncTimer { duration } => {
                timers.sync_timer.as_mut().reset(duration);
            }
            PortAction::ResetDelayRequestTimer { duration } => {
                timers.delay_request_timer.as_mut().reset(duration);
            }
            PortAction::ResetAnnounceReceiptTimer { duration } => {
                timers.announce_receipt_timer.as_mut().reset(duration);
            }
            PortAction::ResetSyncReceiptTimer { duration } => {
                timers.sync_receipt_timer.as_mut().reset(duration);
            }
            PortAction::ResetQualificationTimer { duration } => {
                timers.qualification_timer.as_mut().reset(duration);
            }
            PortAction::ResetFaultTimer { duration } => {
                timers.fault_timer.as_mut().reset(duration);
            }
            PortAction::ResetFilterUpdateTimer { duration } => {
                timers.filter_update_timer.as_mut().reset(duration);
            }
        }
    }

    pending_timestamp
}

/// Like [`port_task`], for level 2 transports where event and general
/// messages share a single socket.
async fn ethernet_port_task(
    mut port_task_receiver: Receiver<BmcaPort>,
    main_task_sender: Sender<BmcaPort>,
    mut socket: Socket<EthernetAddress, Open>,
    mut bmca_notify: watch::Receiver<bool>,
    clock: LinuxClock,
) {
    let announce_timer = pin!(Timer::new());
    let sync_timer = pin!(Timer::new());
    let delay_request_timer = pin!(Timer::new());
    let announce_receipt_timer = pin!(Timer::new());
    let sync_receipt_timer = pin!(Timer::new());
    let qualification_timer = pin!(Timer::new());
    let fault_timer = pin!(Timer::new());
    let filter_update_timer = pin!(Timer::new());

    let mut timers = Timers {
        announce_timer,
        sync_timer,
        delay_request_timer,
        announce_receipt_timer,
        sync_receipt_timer,
        qualification_timer,
        fault_timer,
        filter_update_timer,
    };

    let mut buffer = [0; MAX_DATA_LEN];

    loop {
        let port_in_bmca = port_task_receiver.recv().await.unwrap();

        let (mut port, actions) = port_in_bmca.end_bmca();

        let mut pending_timestamp =
            handle_actions_ethernet(actions, &mut socket, &mut timers, &clock).await;

        while let Some((context, timestamp)) = pending_timestamp {
            pending_timestamp = handle_actions_ethernet(
                port.handle_send_timestamp(context, timestamp),
                &mut socket,
                &mut timers,
                &clock,
            )
            .await;
        }

        loop {
            let mut actions = tokio::select! {
                result = socket.recv(&mut buffer) => match result {
                    Ok(packet) => {
                        let timestamp = port_timestamp_to_time(packet.timestamp, &clock);
                        port.handle_event_receive(&buffer[..packet.bytes_read], timestamp)
                    }
                    Err(error) => {
                        log::error!("failed to receive message: {:?}", error);
                        port.handle_fault(FaultType::Unspecified)
                    }
                },
                () = &mut timers.announce_timer => {
                    port.handle_announce_timer()
                },
                () = &mut timers.sync_timer => {
                    port.handle_sync_timer()
                },
                () = &mut timers.delay_request_timer => {
                    port.handle_delay_request_timer()
                },
                () = &mut timers.announce_receipt_timer => {
                    port.handle_announce_receipt_timer()
                },
                () = &mut timers.sync_receipt_timer => {
                    port.handle_sync_receipt_timer()
                },
                () = &mut timers.qualification_timer => {
                    port.handle_qualification_timer()
                },
                () = &mut timers.fault_timer => {
                    port.handle_fault_timer()
                },
                () = &mut timers.filter_update_timer => {
                    port.handle_filter_update_timer()
                },
                result = bmca_notify.wait_for(|v| *v) => match result {
                    Ok(_) => break,
                    Err(error) => panic!("Error on bmca notify: {error:?}"),
                },
            };

            loop {
                let pending_timestamp =
                    handle_actions_ethernet(actions, &mut socket, &mut timers, &clock).await;

                actions = match pending_timestamp {
                    Some((context, timestamp)) => port.handle_send_timestamp(context, timestamp),
                    None => break,
                };
            }
        }

        let port_in_bmca = port.start_bmca();
        main_task_sender.send(port_in_bmca).await.unwrap();
    }
}

async fn handle_actions_ethernet(
    actions: PortActionIterator<'_>,
    socket: &mut Socket<EthernetAddress, Open>,
    timers: &mut Timers<'_>,
    clock: &LinuxClock,
) -> Option<(TimestampContext, Time)> {
    let mut pending_timestamp = None;

    for action in actions {
        match action {
            PortAction::SendEvent {
                context,
                data,
                link_local,
            } => {
                let address = if link_local {
                    EthernetAddress::PDELAY_EVENT
                } else {
                    EthernetAddress::PRIMARY_EVENT
                };

                match socket.send_to(data, address).await {
                    Ok(time) => {
                        pending_timestamp = Some((context, port_timestamp_to_time(time, clock)));
                    }
                    Err(error) => log::error!("failed to send event message: {:?}", error),
                }
            }
            PortAction::SendGeneral { data, link_local } => {
                let address = if link_local {
                    EthernetAddress::PDELAY_GENERAL
                } else {
                    EthernetAddress::PRIMARY_GENERAL
                };

                if let Err(error) = socket.send_to(data, address).await {
                    log::error!("failed to send general message: {:?}", error);
                }
            }
            PortAction::ResetAnnounceTimer { duration } => {
                timers.announce_timer.as_mut().reset(duration);
            }
            PortAction::ResetSyncTimer { duration } => {
                timers.sync_timer.as_mut().reset(duration);
            }
            PortAction::ResetDelayRequestTimer { duration } => {
                timers.delay_request_timer.as_mut().reset(duration);
            }
            PortAction::ResetAnnounceReceiptTimer { duration } => {
                timers.announce_receipt_timer.as_mut().reset(duration);
            }
            PortAction::ResetSyncReceiptTimer { duration } => {
                timers.sync_receipt_timer.as_mut().reset(duration);
            }
            PortAction::ResetQualificationTimer { duration } => {
                timers.qualification_timer.as_mut().reset(duration);
            }
            PortAction::ResetFaultTimer { duration } => {
                timers.fault_timer.as_mut().reset(duration);
            }
            PortAction::ResetFilterUpdateTimer { duration } => {
                timers.filter_update_timer.as_mut().reset(duration);
            }
        }
    }

    pending_timestamp
}
