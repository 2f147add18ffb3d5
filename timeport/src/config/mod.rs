//! Configuration structures for the instance and its ports
//!
//! # Instance
//! * [`InstanceConfig`]
//! * [`TimePropertiesDS`]
//!
//! # Port
//! * [`PortConfig`]

mod instance;
mod port;

pub use instance::InstanceConfig;
pub use port::{DelayMechanism, FaultInterval, PortConfig, PortDescription};

pub use crate::{
    bmc::acceptable_master::{AcceptAnyMaster, AcceptableMasterList},
    datastructures::{
        common::{
            ClockAccuracy, ClockIdentity, ClockQuality, LeapIndicator, PortIdentity, TimeSource,
        },
        datasets::{PathTraceDS, TimePropertiesDS},
        messages::SdoId,
    },
};
