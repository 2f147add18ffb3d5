use crate::config::{ClockIdentity, ClockQuality, SdoId};

/// Configuration of the full PTP instance, shared between all its ports
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InstanceConfig {
    /// The unique identity of this clock
    pub clock_identity: ClockIdentity,
    /// First priority field used in master selection, lower is more
    /// preferred
    pub priority_1: u8,
    /// Second priority field used in master selection, lower is more
    /// preferred
    pub priority_2: u8,
    /// The ptp domain this instance synchronizes in
    pub domain_number: u8,
    /// Whether this instance may only ever be a slave
    pub slave_only: bool,
    /// The sdoId of the instance. Leave at default unless running a special
    /// profile; gPTP deployments use the sdoId as the old transportSpecific
    /// discriminator.
    pub sdo_id: SdoId,
    /// Whether announce messages should carry and check the path trace
    /// option
    pub path_trace: bool,
    /// Quality advertised while this instance is the grandmaster
    pub clock_quality: ClockQuality,
    /// gPTP only: whether this instance is allowed to act as a grandmaster.
    /// Ignored outside of the gPTP profile.
    pub gm_capable: bool,
}
