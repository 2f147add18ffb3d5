use crate::time::Duration;

/// The current dataset of an instance, see *IEEE1588-2019 section 8.2.2*
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct InternalCurrentDS {
    pub(crate) steps_removed: u16,
    pub(crate) offset_from_master: Duration,
    pub(crate) mean_delay: Duration,
}
