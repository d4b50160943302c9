//! Stream a batch of models through the manager and print statistics.
//!
//! Run with `RUST_LOG=debug cargo run -p void_streaming --example stream_demo`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use void_streaming::prelude::*;

/// Pretends to decode models by keeping a checksum of their bytes
#[derive(Default)]
struct ModelStore {
    models: Mutex<HashMap<u32, u32>>,
}

impl StreamingType for ModelStore {
    fn load_resource(&self, local_id: u32, data: &[u8]) -> LoadResult<()> {
        if data.is_empty() {
            return Err(LoadError::handler("empty model"));
        }
        let checksum = data.iter().fold(0u32, |acc, b| acc.rotate_left(5) ^ u32::from(*b));
        self.models.lock().insert(local_id, checksum);
        Ok(())
    }

    fn unload_resource(&self, local_id: u32) -> LoadResult<()> {
        self.models.lock().remove(&local_id);
        Ok(())
    }

    fn object_memory_size(&self, _local_id: u32) -> usize {
        // Decoded form is a single checksum
        std::mem::size_of::<u32>()
    }
}

fn main() -> Result<(), StreamingError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let manager = StreamingManager::with_config(StreamingConfig::with_channels(2).max_memory(64))?;
    let store = Arc::new(ModelStore::default());
    manager.register_resource_type(1000, 500, store.clone())?;

    for i in 0..32u32 {
        let size = if i == 7 { 0 } else { 256 + i as usize };
        let data: Vec<u8> = (0..size).map(|b| (b as u8) ^ (i as u8)).collect();
        manager.link_resource(1000 + i, format!("model{:02}.dff", i), Arc::new(MemoryLocation::new(data)))?;
        manager.request(1000 + i)?;
    }
    manager.loading_barrier();

    for event in manager.events().try_iter() {
        if let StreamingEvent::LoadFailed { id, error } = event {
            log::warn!("{} failed: {}", id, error);
        }
    }

    for i in 0..16u32 {
        manager.unload(1000 + i)?;
    }
    manager.loading_barrier();

    let stats = manager.statistics();
    log::info!(
        "{} loaded, {} failed, {} unloaded, {} bytes in use (peak {}, budget {})",
        stats.loads_completed,
        stats.loads_failed,
        stats.unloads_completed,
        stats.memory_in_use,
        stats.peak_memory,
        stats.max_memory
    );
    log::info!("{} models resident", store.models.lock().len());

    manager.unregister_resource_type(1000)?;
    Ok(())
}
