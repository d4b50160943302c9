//! # void_streaming - Threaded Resource Streaming
//!
//! Background loading and unloading of game resources with:
//! - Pluggable resource types, each owning a block of identifiers
//! - A fixed pool of streaming channels, one thread each
//! - Fire-and-forget requests with duplicate suppression and cancellation
//! - Memory accounting against a configurable budget
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use void_streaming::prelude::*;
//!
//! struct Models;
//!
//! impl StreamingType for Models {
//!     fn load_resource(&self, _local_id: u32, _data: &[u8]) -> LoadResult<()> {
//!         Ok(())
//!     }
//!
//!     fn unload_resource(&self, _local_id: u32) -> LoadResult<()> {
//!         Ok(())
//!     }
//!
//!     fn object_memory_size(&self, _local_id: u32) -> usize {
//!         0
//!     }
//! }
//!
//! # fn main() -> Result<(), StreamingError> {
//! let manager = StreamingManager::new(4)?;
//! manager.register_resource_type(100, 100, Arc::new(Models))?;
//! manager.link_resource(150, "car.dff", Arc::new(MemoryLocation::new(vec![0u8; 64])))?;
//!
//! manager.request(150)?;
//! manager.loading_barrier();
//! assert_eq!(manager.resource_status(150), Some(ResourceStatus::Loaded));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod location;
pub mod manager;
pub mod registry;
pub mod stats;
pub mod status;
pub mod types;

mod channel;

pub use config::StreamingConfig;
pub use error::{ConfigError, ErrorKind, LoadError, LoadResult, StreamingError, StreamingResult};
pub use event::StreamingEvent;
pub use id::{IdRange, ResourceId};
pub use location::{FileLocation, MemoryLocation, ResourceLocation};
pub use manager::StreamingManager;
pub use registry::{RequestKind, ResourceInfo};
pub use stats::StreamingStats;
pub use status::ResourceStatus;
pub use types::StreamingType;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::config::StreamingConfig;
    pub use crate::error::{LoadError, LoadResult, StreamingError, StreamingResult};
    pub use crate::event::StreamingEvent;
    pub use crate::id::ResourceId;
    pub use crate::location::{FileLocation, MemoryLocation, ResourceLocation};
    pub use crate::manager::StreamingManager;
    pub use crate::status::ResourceStatus;
    pub use crate::types::StreamingType;
}
