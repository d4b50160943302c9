//! Resource types - pluggable load/unload handlers
//!
//! Handlers are registered against a block of identifiers and receive
//! identifiers relative to the start of that block. Asset managers (textures,
//! models, collision) implement [`StreamingType`] and do the actual decoding.

use crate::error::{LoadResult, StreamingError, StreamingResult};
use crate::id::{IdRange, ResourceId};
use std::sync::Arc;

/// Trait for resource type handlers
///
/// All methods are called from channel threads, except `unload_resource`
/// which may also run on the caller's thread when a loaded resource is
/// unlinked.
pub trait StreamingType: Send + Sync {
    /// Take ownership of a resource's decoded form
    fn load_resource(&self, local_id: u32, data: &[u8]) -> LoadResult<()>;

    /// Release a resource previously loaded
    fn unload_resource(&self, local_id: u32) -> LoadResult<()>;

    /// Resident size of a loaded resource in bytes (0 falls back to the raw data size)
    fn object_memory_size(&self, local_id: u32) -> usize;
}

/// A handler and the block of identifiers it serves
#[derive(Clone)]
pub struct TypeRegistration {
    pub range: IdRange,
    pub handler: Arc<dyn StreamingType>,
}

impl TypeRegistration {
    /// Identifier relative to this registration's base
    pub fn local_id(&self, id: ResourceId) -> Option<u32> {
        self.range.local(id)
    }
}

impl core::fmt::Debug for TypeRegistration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TypeRegistration")
            .field("range", &self.range)
            .finish()
    }
}

/// Registry of resource types
///
/// Types are registered rarely, so lookups are a linear scan.
#[derive(Default)]
pub(crate) struct TypeRegistry {
    types: Vec<TypeRegistration>,
}

impl TypeRegistry {
    /// Register a handler for `[base, base + count)`
    pub fn register(
        &mut self,
        base: ResourceId,
        count: u32,
        handler: Arc<dyn StreamingType>,
    ) -> StreamingResult<IdRange> {
        let range = IdRange::new(base, count).ok_or(StreamingError::InvalidRange { base, count })?;

        if let Some(existing) = self.conflict(&range) {
            return Err(StreamingError::RangeConflict {
                requested: range,
                existing,
            });
        }

        self.types.push(TypeRegistration { range, handler });
        Ok(range)
    }

    /// Remove the type registered exactly at `base`
    pub fn unregister(&mut self, base: ResourceId) -> StreamingResult<TypeRegistration> {
        let idx = self
            .types
            .iter()
            .position(|t| t.range.base == base)
            .ok_or(StreamingError::TypeNotFound(base))?;
        Ok(self.types.swap_remove(idx))
    }

    /// First registered range overlapping `range`
    fn conflict(&self, range: &IdRange) -> Option<IdRange> {
        self.types
            .iter()
            .map(|t| t.range)
            .find(|existing| existing.overlaps(range))
    }

    /// Registration covering `id`
    pub fn type_at(&self, id: ResourceId) -> Option<&TypeRegistration> {
        self.types.iter().find(|t| t.range.contains(id))
    }

    /// Registration starting exactly at `base`
    pub fn type_at_base(&self, base: ResourceId) -> Option<&TypeRegistration> {
        self.types.iter().find(|t| t.range.base == base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullType;

    impl StreamingType for NullType {
        fn load_resource(&self, _local_id: u32, _data: &[u8]) -> LoadResult<()> {
            Ok(())
        }

        fn unload_resource(&self, _local_id: u32) -> LoadResult<()> {
            Ok(())
        }

        fn object_memory_size(&self, _local_id: u32) -> usize {
            0
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TypeRegistry::default();
        registry.register(ResourceId(100), 100, Arc::new(NullType)).unwrap();
        registry.register(ResourceId(200), 50, Arc::new(NullType)).unwrap();

        let ty = registry.type_at(ResourceId(150)).unwrap();
        assert_eq!(ty.range.base, ResourceId(100));
        assert_eq!(ty.local_id(ResourceId(150)), Some(50));

        assert_eq!(registry.type_at(ResourceId(220)).unwrap().range.base, ResourceId(200));
        assert!(registry.type_at(ResourceId(999)).is_none());
    }

    #[test]
    fn test_overlap_rejected_and_table_unchanged() {
        let mut registry = TypeRegistry::default();
        registry.register(ResourceId(100), 100, Arc::new(NullType)).unwrap();

        let result = registry.register(ResourceId(150), 100, Arc::new(NullType));
        assert!(matches!(result, Err(StreamingError::RangeConflict { .. })));

        let result = registry.register(ResourceId(0), 101, Arc::new(NullType));
        assert!(matches!(result, Err(StreamingError::RangeConflict { .. })));

        assert!(registry.type_at(ResourceId(220)).is_none());
        assert!(registry.type_at(ResourceId(50)).is_none());
        assert_eq!(registry.type_at(ResourceId(150)).unwrap().range.base, ResourceId(100));
    }

    #[test]
    fn test_adjacent_ranges_allowed() {
        let mut registry = TypeRegistry::default();
        registry.register(ResourceId(0), 100, Arc::new(NullType)).unwrap();
        registry.register(ResourceId(100), 100, Arc::new(NullType)).unwrap();
        assert_eq!(registry.type_at(ResourceId(99)).unwrap().range.base, ResourceId(0));
        assert_eq!(registry.type_at(ResourceId(100)).unwrap().range.base, ResourceId(100));
    }

    #[test]
    fn test_invalid_range() {
        let mut registry = TypeRegistry::default();
        let result = registry.register(ResourceId(5), 0, Arc::new(NullType));
        assert!(matches!(result, Err(StreamingError::InvalidRange { .. })));
        assert!(registry.type_at(ResourceId(5)).is_none());
    }

    #[test]
    fn test_unregister_requires_exact_base() {
        let mut registry = TypeRegistry::default();
        registry.register(ResourceId(100), 100, Arc::new(NullType)).unwrap();

        assert!(matches!(
            registry.unregister(ResourceId(150)),
            Err(StreamingError::TypeNotFound(_))
        ));
        assert!(registry.unregister(ResourceId(100)).is_ok());
        assert!(registry.type_at(ResourceId(150)).is_none());
    }
}
