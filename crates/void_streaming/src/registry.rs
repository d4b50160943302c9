//! Resource registry - identifier to record mapping
//!
//! The registry and the type table sit behind one shared/exclusive lock owned
//! by the manager. Status lives in an atomic on each record so polling it
//! never contends with link/unlink.

use crate::error::{LoadResult, StreamingError, StreamingResult};
use crate::event::StreamingEvent;
use crate::id::{IdRange, ResourceId};
use crate::location::ResourceLocation;
use crate::stats::StatsCounters;
use crate::status::{AtomicStatus, ResourceStatus};
use crate::types::{TypeRegistration, TypeRegistry};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Direction of a streaming request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Load,
    Unload,
}

/// A request queued on a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Request {
    pub id: ResourceId,
    pub kind: RequestKind,
    /// Unique per manager, used to find the request again in a queue
    pub seq: u64,
}

/// Outstanding work for one resource
///
/// At most one request is in flight and at most one more is queued behind
/// it, always on the same channel.
#[derive(Debug, Default)]
pub(crate) struct Dispatch {
    /// Channel holding the resource's outstanding work
    pub channel: usize,
    /// Queued, not yet started
    pub queued: Option<Request>,
    /// Being processed by `channel`
    pub in_flight: Option<RequestKind>,
}

impl Dispatch {
    pub fn is_idle(&self) -> bool {
        self.queued.is_none() && self.in_flight.is_none()
    }

    /// Status the resource ends in once outstanding work completes successfully
    pub fn target(&self, status: ResourceStatus) -> ResourceStatus {
        let kind = self
            .queued
            .map(|request| request.kind)
            .or(self.in_flight);

        match kind {
            Some(RequestKind::Load) => ResourceStatus::Loaded,
            Some(RequestKind::Unload) => ResourceStatus::Unloaded,
            None if status == ResourceStatus::Unloaded => ResourceStatus::Unloaded,
            None => ResourceStatus::Loaded,
        }
    }

    /// The queued request could not be removed from its channel, so the
    /// channel has already taken it.
    pub fn promote(&mut self) {
        if let Some(request) = self.queued.take() {
            self.in_flight = Some(request.kind);
        }
    }

    /// Called by the channel when it starts `request`
    pub fn start(&mut self, request: &Request) {
        if self.queued.map(|queued| queued.seq) == Some(request.seq) {
            self.queued = None;
        }
        self.in_flight = Some(request.kind);
    }

    /// Called by the channel when it is done with its request
    pub fn finish(&mut self) {
        self.in_flight = None;
    }
}

/// A linked resource
pub(crate) struct ResourceRecord {
    pub id: ResourceId,
    pub name: String,
    pub status: AtomicStatus,
    pub location: Arc<dyn ResourceLocation>,
    /// Bytes accounted for this resource while buffering or loaded
    pub resource_size: AtomicUsize,
    pub load_eligible: AtomicBool,
    pub dispatch: Mutex<Dispatch>,
}

impl ResourceRecord {
    pub fn new(id: ResourceId, name: String, location: Arc<dyn ResourceLocation>) -> Self {
        let size = location.data_size();
        Self {
            id,
            name,
            status: AtomicStatus::default(),
            location,
            resource_size: AtomicUsize::new(size),
            load_eligible: AtomicBool::new(true),
            dispatch: Mutex::new(Dispatch::default()),
        }
    }

    pub fn is_load_eligible(&self) -> bool {
        self.load_eligible.load(Ordering::Acquire)
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id,
            name: self.name.clone(),
            status: self.status.load(),
            resource_size: self.resource_size.load(Ordering::Acquire),
            load_eligible: self.is_load_eligible(),
        }
    }

    /// Unload a `Loaded` resource through its handler and release its memory.
    ///
    /// The resource ends `Unloaded` even if the handler fails.
    pub fn unload_with(
        &self,
        registration: &TypeRegistration,
        stats: &StatsCounters,
    ) -> (usize, LoadResult<()>) {
        let size = self.resource_size.load(Ordering::Acquire);
        let result = match registration.local_id(self.id) {
            Some(local_id) => crate::channel::guarded(|| registration.handler.unload_resource(local_id)),
            None => Ok(()),
        };

        self.status.store(ResourceStatus::Unloaded);
        stats.sub_memory(size);

        match &result {
            Ok(()) => stats.unload_completed(),
            Err(err) => {
                stats.unload_failed();
                log::warn!("Failed to unload resource {} '{}': {}", self.id, self.name, err);
            }
        }

        (size, result)
    }

    /// Event describing the outcome of `unload_with`
    pub fn unload_event(&self, size: usize, result: &LoadResult<()>) -> StreamingEvent {
        match result {
            Ok(()) => StreamingEvent::Unloaded { id: self.id, size },
            Err(err) => StreamingEvent::UnloadFailed {
                id: self.id,
                error: err.to_string(),
            },
        }
    }
}

/// Public view of a linked resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub name: String,
    pub status: ResourceStatus,
    /// Raw data size until loaded, then the handler-reported resident size
    pub resource_size: usize,
    pub load_eligible: bool,
}

/// Resource records and the types that own them
#[derive(Default)]
pub(crate) struct Registry {
    resources: BTreeMap<ResourceId, Arc<ResourceRecord>>,
    pub types: TypeRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: ResourceId) -> Option<&Arc<ResourceRecord>> {
        self.resources.get(&id)
    }

    /// Record plus the registration of the type covering it
    pub fn lookup(&self, id: ResourceId) -> Option<(Arc<ResourceRecord>, TypeRegistration)> {
        let record = self.resources.get(&id)?.clone();
        let registration = self.types.type_at(id)?.clone();
        Some((record, registration))
    }

    pub fn link(
        &mut self,
        id: ResourceId,
        name: String,
        location: Arc<dyn ResourceLocation>,
    ) -> StreamingResult<()> {
        if self.types.type_at(id).is_none() {
            return Err(StreamingError::NoTypeForId(id));
        }
        if self.resources.contains_key(&id) {
            return Err(StreamingError::AlreadyLinked(id));
        }

        self.resources
            .insert(id, Arc::new(ResourceRecord::new(id, name, location)));
        Ok(())
    }

    /// Remove a record with no outstanding work
    pub fn unlink(&mut self, id: ResourceId) -> StreamingResult<Arc<ResourceRecord>> {
        let record = self.resources.get(&id).ok_or(StreamingError::NotLinked(id))?;
        if !record.dispatch.lock().is_idle() || record.status.load().is_in_flight() {
            return Err(StreamingError::ResourceBusy(id));
        }
        self.resources
            .remove(&id)
            .ok_or(StreamingError::NotLinked(id))
    }

    /// Records whose identifiers fall in `range`
    pub fn records_in(&self, range: IdRange) -> impl Iterator<Item = &Arc<ResourceRecord>> + '_ {
        self.resources
            .range(range.base..ResourceId(range.end()))
            .map(|(_, record)| record)
    }

    /// Remove every record in `range`
    pub fn drain_range(&mut self, range: IdRange) -> Vec<Arc<ResourceRecord>> {
        let ids: Vec<ResourceId> = self.records_in(range).map(|record| record.id).collect();
        ids.iter()
            .filter_map(|id| self.resources.remove(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }
}
