//! Streaming Manager - central streaming interface
//!
//! The manager validates requests against the registry, decides what work a
//! resource still needs, and hands that work to its channels round-robin.
//!
//! Lock order: registry, then a record's dispatch ticket, then a channel
//! queue. Channel threads never hold two of these at once.

use crate::channel::Channel;
use crate::config::StreamingConfig;
use crate::error::{StreamingError, StreamingResult};
use crate::event::{EventSink, StreamingEvent};
use crate::id::ResourceId;
use crate::location::ResourceLocation;
use crate::registry::{Dispatch, Registry, Request, RequestKind, ResourceInfo, ResourceRecord};
use crate::stats::{StatsCounters, StreamingStats};
use crate::status::ResourceStatus;
use crate::types::StreamingType;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use std::sync::Arc;

/// State shared between the manager and its channel threads
pub(crate) struct Shared {
    pub registry: RwLock<Registry>,
    pub stats: StatsCounters,
    pub events: EventSink,
}

/// The streaming manager
pub struct StreamingManager {
    config: StreamingConfig,
    shared: Arc<Shared>,
    channels: Vec<Channel>,
    /// Round-robin cursor
    next_channel: AtomicUsize,
    next_seq: AtomicU64,
}

impl StreamingManager {
    /// Create a manager with `channel_count` channel threads and default settings
    pub fn new(channel_count: usize) -> StreamingResult<Self> {
        Self::with_config(StreamingConfig::with_channels(channel_count))
    }

    /// Create a manager from a configuration
    pub fn with_config(config: StreamingConfig) -> StreamingResult<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            registry: RwLock::new(Registry::new()),
            stats: StatsCounters::new(config.max_memory),
            events: EventSink::new(config.event_capacity),
        });

        let channels = (0..config.channel_count)
            .map(|index| {
                let name = format!("{}-{}", config.thread_name_prefix, index);
                Channel::spawn(index, name, Arc::clone(&shared))
            })
            .collect::<StreamingResult<Vec<_>>>()?;

        log::info!(
            "Streaming manager started with {} channel(s), budget {} bytes",
            channels.len(),
            config.max_memory
        );

        Ok(Self {
            config,
            shared,
            channels,
            next_channel: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Register a handler for identifiers `[base, base + range)`
    pub fn register_resource_type(
        &self,
        base: impl Into<ResourceId>,
        range: u32,
        handler: Arc<dyn StreamingType>,
    ) -> StreamingResult<()> {
        let base = base.into();
        let range = self.shared.registry.write().types.register(base, range, handler)?;
        log::info!("Registered resource type {}", range);
        Ok(())
    }

    /// Unregister the type at `base`, unlinking every resource in its range.
    ///
    /// Loaded resources are unloaded through the handler first. Fails without
    /// changing anything if any resource in the range has outstanding work.
    /// Returns the number of resources unlinked.
    pub fn unregister_resource_type(&self, base: impl Into<ResourceId>) -> StreamingResult<usize> {
        let base = base.into();
        let mut registry = self.shared.registry.write();

        let registration = registry
            .types
            .type_at_base(base)
            .cloned()
            .ok_or(StreamingError::TypeNotFound(base))?;

        let busy = registry
            .records_in(registration.range)
            .filter(|record| {
                !record.dispatch.lock().is_idle() || record.status.load().is_in_flight()
            })
            .count();
        if busy > 0 {
            return Err(StreamingError::TypeBusy { base, busy });
        }

        let records = registry.drain_range(registration.range);
        for record in &records {
            if record.status.load() == ResourceStatus::Loaded {
                let (size, result) = record.unload_with(&registration, &self.shared.stats);
                self.shared.events.emit(record.unload_event(size, &result));
            }
        }
        registry.types.unregister(base)?;

        log::info!(
            "Unregistered resource type {} ({} resource(s) unlinked)",
            registration.range,
            records.len()
        );
        Ok(records.len())
    }

    /// Link `id` to a location. The type covering `id` must be registered.
    pub fn link_resource(
        &self,
        id: impl Into<ResourceId>,
        name: impl Into<String>,
        location: Arc<dyn ResourceLocation>,
    ) -> StreamingResult<()> {
        let id = id.into();
        let name = name.into();
        log::trace!("Linking resource {} '{}'", id, name);
        self.shared.registry.write().link(id, name, location)
    }

    /// Unlink `id`, unloading it first if it is loaded.
    ///
    /// Fails with `ResourceBusy` while a request for it is queued or in flight.
    /// A failing handler unload is counted and logged; the link is removed anyway.
    pub fn unlink_resource(&self, id: impl Into<ResourceId>) -> StreamingResult<()> {
        let id = id.into();
        let mut registry = self.shared.registry.write();
        let record = registry.unlink(id)?;

        if record.status.load() == ResourceStatus::Loaded {
            if let Some(registration) = registry.types.type_at(id) {
                let (size, result) = record.unload_with(registration, &self.shared.stats);
                self.shared.events.emit(record.unload_event(size, &result));
            }
        }

        log::trace!("Unlinked resource {} '{}'", id, record.name);
        Ok(())
    }

    /// Allow or forbid loading `id`. Does not affect a resource already loaded.
    pub fn set_load_eligible(&self, id: impl Into<ResourceId>, eligible: bool) -> StreamingResult<()> {
        let id = id.into();
        let registry = self.shared.registry.read();
        let record = registry.record(id).ok_or(StreamingError::NotLinked(id))?;
        record.load_eligible.store(eligible, Ordering::Release);
        Ok(())
    }

    /// Ask for `id` to be loaded.
    ///
    /// Succeeds without queueing anything if the resource is loaded or a load
    /// is already outstanding, even if it has since been made ineligible. A
    /// still-queued unload is cancelled instead.
    pub fn request(&self, id: impl Into<ResourceId>) -> StreamingResult<()> {
        let id = id.into();
        let registry = self.shared.registry.read();
        let record = registry.record(id).ok_or(StreamingError::NotLinked(id))?;

        let mut dispatch = record.dispatch.lock();
        if dispatch.target(record.status.load()) == ResourceStatus::Loaded {
            return Ok(());
        }

        if !record.is_load_eligible() {
            return Err(StreamingError::LoadNotAllowed(id));
        }

        if self.cancel_queued(record, &mut dispatch) {
            log::trace!("Request for {} cancelled its queued unload", id);
            return Ok(());
        }

        self.enqueue(record, &mut dispatch, RequestKind::Load)
    }

    /// Remove a queued load for `id` before a channel starts it.
    ///
    /// Fails with `RequestStarted` once a channel has picked the load up;
    /// this never waits for the load to finish.
    pub fn cancel_request(&self, id: impl Into<ResourceId>) -> StreamingResult<()> {
        let id = id.into();
        let registry = self.shared.registry.read();
        let record = registry.record(id).ok_or(StreamingError::NotLinked(id))?;
        let mut dispatch = record.dispatch.lock();

        let queued_load = dispatch.queued.map(|queued| queued.kind) == Some(RequestKind::Load);
        if queued_load && self.cancel_queued(record, &mut dispatch) {
            return Ok(());
        }

        if dispatch.in_flight == Some(RequestKind::Load) {
            Err(StreamingError::RequestStarted(id))
        } else {
            Err(StreamingError::NoPendingRequest(id))
        }
    }

    /// Ask for `id` to be unloaded.
    ///
    /// Succeeds without queueing anything if the resource is unloaded or an
    /// unload is already outstanding. A still-queued load is cancelled instead.
    pub fn unload(&self, id: impl Into<ResourceId>) -> StreamingResult<()> {
        let id = id.into();
        let registry = self.shared.registry.read();
        let record = registry.record(id).ok_or(StreamingError::NotLinked(id))?;

        let mut dispatch = record.dispatch.lock();
        if dispatch.target(record.status.load()) == ResourceStatus::Unloaded {
            return Ok(());
        }

        if self.cancel_queued(record, &mut dispatch) {
            log::trace!("Unload of {} cancelled its queued load", id);
            return Ok(());
        }

        self.enqueue(record, &mut dispatch, RequestKind::Unload)
    }

    /// Block until every channel has drained its queue and gone idle.
    ///
    /// Requests submitted by other threads while waiting may or may not be
    /// covered. Must not be called from a type handler or location.
    pub fn loading_barrier(&self) {
        for channel in &self.channels {
            channel.state().wait_idle();
        }
    }

    /// Status of `id`, or `None` if it is not linked
    pub fn resource_status(&self, id: impl Into<ResourceId>) -> Option<ResourceStatus> {
        let id = id.into();
        let registry = self.shared.registry.read();
        registry.record(id).map(|record| record.status.load())
    }

    pub fn resource_info(&self, id: impl Into<ResourceId>) -> Option<ResourceInfo> {
        let id = id.into();
        self.shared.registry.read().record(id).map(|record| record.info())
    }

    pub fn linked_count(&self) -> usize {
        self.shared.registry.read().len()
    }

    /// Requests queued across all channels and not yet started
    pub fn pending_requests(&self) -> usize {
        self.channels.iter().map(|c| c.state().pending()).sum()
    }

    pub fn statistics(&self) -> StreamingStats {
        self.shared.stats.snapshot()
    }

    /// Change the memory budget reported in statistics
    pub fn set_max_memory(&self, bytes: usize) {
        self.shared.stats.set_max_memory(bytes);
    }

    /// Receiver for load/unload outcomes
    pub fn events(&self) -> Receiver<StreamingEvent> {
        self.shared.events.receiver()
    }

    /// Try to pull the queued request out of its channel.
    ///
    /// If the channel already took it, the ticket is updated to show it in
    /// flight and `false` is returned.
    fn cancel_queued(&self, record: &ResourceRecord, dispatch: &mut Dispatch) -> bool {
        let Some(queued) = dispatch.queued else {
            return false;
        };

        if self.channels[dispatch.channel].state().remove(queued.seq).is_none() {
            dispatch.promote();
            return false;
        }

        dispatch.queued = None;
        self.shared.stats.request_cancelled();

        if queued.kind == RequestKind::Load && dispatch.in_flight.is_none() {
            record.status.store(ResourceStatus::Unloaded);
        }
        true
    }

    fn enqueue(
        &self,
        record: &ResourceRecord,
        dispatch: &mut Dispatch,
        kind: RequestKind,
    ) -> StreamingResult<()> {
        // Follow-up work stays on the channel that holds the in-flight request.
        let channel = if dispatch.in_flight.is_some() {
            dispatch.channel
        } else {
            self.next_channel.fetch_add(1, Ordering::Relaxed) % self.channels.len()
        };

        let request = Request {
            id: record.id,
            kind,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        let marked_loading = kind == RequestKind::Load
            && dispatch.in_flight.is_none()
            && record
                .status
                .transition(ResourceStatus::Unloaded, ResourceStatus::Loading)
                .is_ok();

        if let Err(err) = self.channels[channel].state().push(request) {
            if marked_loading {
                record.status.store(ResourceStatus::Unloaded);
            }
            return Err(err);
        }

        dispatch.channel = channel;
        dispatch.queued = Some(request);

        log::trace!("Queued {:?} of {} on channel {}", kind, record.id, channel);
        Ok(())
    }
}

impl Drop for StreamingManager {
    fn drop(&mut self) {
        for channel in &self.channels {
            channel.state().terminate();
        }
        for channel in &mut self.channels {
            channel.join();
        }

        log::info!("Streaming manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadResult;
    use crate::location::MemoryLocation;
    use parking_lot::{Condvar, Mutex};

    /// Handler whose loads block until released
    #[derive(Default)]
    struct GateType {
        open: Mutex<bool>,
        cond: Condvar,
        loads: AtomicUsize,
    }

    impl GateType {
        fn release(&self) {
            *self.open.lock() = true;
            self.cond.notify_all();
        }
    }

    impl StreamingType for GateType {
        fn load_resource(&self, _local_id: u32, _data: &[u8]) -> LoadResult<()> {
            let mut open = self.open.lock();
            while !*open {
                self.cond.wait(&mut open);
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unload_resource(&self, _local_id: u32) -> LoadResult<()> {
            Ok(())
        }

        fn object_memory_size(&self, _local_id: u32) -> usize {
            0
        }
    }

    fn wait_for_status(manager: &StreamingManager, id: u32, status: ResourceStatus) {
        for _ in 0..1000 {
            if manager.resource_status(id) == Some(status) {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        panic!("resource {} never reached {:?}", id, status);
    }

    fn gated_manager() -> (StreamingManager, Arc<GateType>) {
        let manager = StreamingManager::new(1).unwrap();
        let gate = Arc::new(GateType::default());
        manager.register_resource_type(0, 10, gate.clone()).unwrap();
        for id in 0..3u32 {
            manager
                .link_resource(id, format!("res{}", id), Arc::new(MemoryLocation::new(vec![0u8; 16])))
                .unwrap();
        }
        (manager, gate)
    }

    #[test]
    fn test_cancel_queued_load() {
        let (manager, gate) = gated_manager();

        // Resource 0 occupies the only channel, resource 1 waits behind it.
        manager.request(0).unwrap();
        wait_for_status(&manager, 0, ResourceStatus::Buffering);
        manager.request(1).unwrap();
        assert_eq!(manager.resource_status(1), Some(ResourceStatus::Loading));
        assert_eq!(manager.pending_requests(), 1);

        manager.cancel_request(1).unwrap();
        assert_eq!(manager.resource_status(1), Some(ResourceStatus::Unloaded));
        assert_eq!(manager.pending_requests(), 0);

        assert!(matches!(
            manager.cancel_request(0),
            Err(StreamingError::RequestStarted(_))
        ));

        gate.release();
        manager.loading_barrier();

        assert_eq!(manager.resource_status(0), Some(ResourceStatus::Loaded));
        assert_eq!(manager.resource_status(1), Some(ResourceStatus::Unloaded));
        assert_eq!(gate.loads.load(Ordering::SeqCst), 1);
        assert_eq!(manager.statistics().requests_cancelled, 1);
    }

    #[test]
    fn test_cancel_without_request() {
        let (manager, _gate) = gated_manager();
        assert!(matches!(
            manager.cancel_request(2),
            Err(StreamingError::NoPendingRequest(_))
        ));
        assert!(matches!(
            manager.cancel_request(9),
            Err(StreamingError::NotLinked(_))
        ));
    }

    #[test]
    fn test_unload_cancels_queued_load() {
        let (manager, gate) = gated_manager();

        manager.request(0).unwrap();
        wait_for_status(&manager, 0, ResourceStatus::Buffering);
        manager.request(1).unwrap();

        manager.unload(1).unwrap();
        assert_eq!(manager.resource_status(1), Some(ResourceStatus::Unloaded));
        assert_eq!(manager.pending_requests(), 0);

        gate.release();
        manager.loading_barrier();
        assert_eq!(gate.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unload_queued_behind_in_flight_load() {
        let (manager, gate) = gated_manager();

        manager.request(0).unwrap();
        wait_for_status(&manager, 0, ResourceStatus::Buffering);

        manager.unload(0).unwrap();
        assert_eq!(manager.pending_requests(), 1);
        // A second unload is absorbed
        manager.unload(0).unwrap();
        assert_eq!(manager.pending_requests(), 1);

        gate.release();
        manager.loading_barrier();

        assert_eq!(manager.resource_status(0), Some(ResourceStatus::Unloaded));
        let stats = manager.statistics();
        assert_eq!(stats.loads_completed, 1);
        assert_eq!(stats.unloads_completed, 1);
        assert_eq!(stats.memory_in_use, 0);
    }

    #[test]
    fn test_request_cancels_queued_unload() {
        let (manager, gate) = gated_manager();
        gate.release();

        manager.request(2).unwrap();
        manager.loading_barrier();
        assert_eq!(manager.resource_status(2), Some(ResourceStatus::Loaded));

        // Hold the only channel so the unload stays queued.
        let blocker = Arc::new(GateType::default());
        manager.register_resource_type(100, 1, blocker.clone()).unwrap();
        manager
            .link_resource(100, "blocker", Arc::new(MemoryLocation::new(vec![0u8; 4])))
            .unwrap();
        manager.request(100).unwrap();
        wait_for_status(&manager, 100, ResourceStatus::Buffering);

        manager.unload(2).unwrap();
        assert_eq!(manager.pending_requests(), 1);
        manager.request(2).unwrap();
        assert_eq!(manager.pending_requests(), 0);

        blocker.release();
        manager.loading_barrier();

        assert_eq!(manager.resource_status(2), Some(ResourceStatus::Loaded));
        assert_eq!(manager.statistics().unloads_completed, 0);
    }

    #[test]
    fn test_unlink_rejected_while_busy() {
        let (manager, gate) = gated_manager();

        manager.request(0).unwrap();
        wait_for_status(&manager, 0, ResourceStatus::Buffering);
        assert!(matches!(
            manager.unlink_resource(0),
            Err(StreamingError::ResourceBusy(_))
        ));
        assert!(matches!(
            manager.unregister_resource_type(0),
            Err(StreamingError::TypeBusy { busy: 1, .. })
        ));

        gate.release();
        manager.loading_barrier();
        manager.unlink_resource(0).unwrap();
        assert_eq!(manager.statistics().memory_in_use, 0);
    }
}
