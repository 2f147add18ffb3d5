use crate::config::ClockIdentity;

/// A list of clocks a port may accept as its master.
///
/// Whenever an announce message arrives, the port asks the list whether the
/// sender may become its master. Everything else about the message is
/// ignored when the answer is no.
pub trait AcceptableMasterList {
    /// Whether a clock with the given identity may become our master
    fn is_acceptable(&self, identity: ClockIdentity) -> bool;
}

/// An [`AcceptableMasterList`] that accepts all clocks as master
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyMaster;

// The port erases its list type once the bmca took ownership of the list
impl AcceptableMasterList for () {
    fn is_acceptable(&self, _identity: ClockIdentity) -> bool {
        true
    }
}

impl AcceptableMasterList for AcceptAnyMaster {
    fn is_acceptable(&self, _identity: ClockIdentity) -> bool {
        true
    }
}

impl AcceptableMasterList for &[ClockIdentity] {
    fn is_acceptable(&self, identity: ClockIdentity) -> bool {
        self.contains(&identity)
    }
}

impl<const CAP: usize> AcceptableMasterList for arrayvec::ArrayVec<ClockIdentity, CAP> {
    fn is_acceptable(&self, identity: ClockIdentity) -> bool {
        self.contains(&identity)
    }
}

#[cfg(feature = "std")]
impl AcceptableMasterList for std::vec::Vec<ClockIdentity> {
    fn is_acceptable(&self, identity: ClockIdentity) -> bool {
        self.contains(&identity)
    }
}

impl<T: AcceptableMasterList> AcceptableMasterList for Option<T> {
    fn is_acceptable(&self, identity: ClockIdentity) -> bool {
        match self {
            Some(list) => list.is_acceptable(identity),
            None => true,
        }
    }
}
