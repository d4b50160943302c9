//! Resource status, readable from any thread without taking a lock

use core::sync::atomic::{AtomicU8, Ordering};

/// Residency state of a linked resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceStatus {
    /// Not resident
    Unloaded = 0,
    /// Queued or being fetched by a channel
    Loading = 1,
    /// Bytes fetched, not yet handed to the type handler
    Buffering = 2,
    /// Resident and accounted for
    Loaded = 3,
}

impl ResourceStatus {
    /// Whether a channel currently owns the resource for a load
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Loading | Self::Buffering)
    }

    /// Whether the resource counts against the memory budget
    pub fn is_resident(&self) -> bool {
        matches!(self, Self::Buffering | Self::Loaded)
    }
}

impl From<u8> for ResourceStatus {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Loading,
            2 => Self::Buffering,
            3 => Self::Loaded,
            _ => Self::Unloaded,
        }
    }
}

/// Atomic cell holding a [`ResourceStatus`]
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub fn new(status: ResourceStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn load(&self) -> ResourceStatus {
        ResourceStatus::from(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, status: ResourceStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Swap `current` for `new`, returning the observed value on mismatch
    pub fn transition(
        &self,
        current: ResourceStatus,
        new: ResourceStatus,
    ) -> Result<ResourceStatus, ResourceStatus> {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(ResourceStatus::from)
            .map_err(ResourceStatus::from)
    }
}

impl Default for AtomicStatus {
    fn default() -> Self {
        Self::new(ResourceStatus::Unloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        let status = AtomicStatus::default();
        assert_eq!(status.load(), ResourceStatus::Unloaded);

        status.store(ResourceStatus::Buffering);
        assert_eq!(status.load(), ResourceStatus::Buffering);
    }

    #[test]
    fn test_transition_only_from_expected() {
        let status = AtomicStatus::new(ResourceStatus::Loaded);

        assert_eq!(
            status.transition(ResourceStatus::Unloaded, ResourceStatus::Loading),
            Err(ResourceStatus::Loaded)
        );
        assert_eq!(
            status.transition(ResourceStatus::Loaded, ResourceStatus::Unloaded),
            Ok(ResourceStatus::Loaded)
        );
        assert_eq!(status.load(), ResourceStatus::Unloaded);
    }

    #[test]
    fn test_residency_flags() {
        assert!(ResourceStatus::Buffering.is_resident());
        assert!(ResourceStatus::Loaded.is_resident());
        assert!(!ResourceStatus::Loading.is_resident());
        assert!(ResourceStatus::Loading.is_in_flight());
        assert!(!ResourceStatus::Loaded.is_in_flight());
    }
}
