/// The leap indicator of the time set
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LeapIndicator {
    /// No leap second is coming up
    #[default]
    NoLeap,
    /// The last minute of the current UTC day contains 61 seconds
    Leap61,
    /// The last minute of the current UTC day contains 59 seconds
    Leap59,
}
