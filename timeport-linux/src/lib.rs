//! Linux platform support for the `timeport` PTP library: sockets with
//! hardware timestamping, clock steering, configuration loading, and log
//! plumbing.

pub mod clock;
pub mod config;
pub mod socket;
pub mod tracing;

/// Derive a clock identity from the first usable mac address of the system.
pub fn get_clock_id() -> Option<[u8; 8]> {
    let interfaces = timestamped_socket::interface::interfaces().ok()?;
    let candidates = interfaces.into_iter().filter_map(|(_, data)| data.mac());

    for mac in candidates {
        // Ignore multicast and locally administered mac addresses
        if mac[0] & 0x3 == 0 && mac.iter().any(|x| *x != 0) {
            let f = |i| mac.get(i).copied().unwrap_or_default();
            return Some(std::array::from_fn(f));
        }
    }

    None
}
