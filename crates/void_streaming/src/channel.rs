//! Streaming channels - one worker thread and its private FIFO queue
//!
//! A channel sleeps on its wake condition until a request arrives, pulls the
//! resource's bytes through its location into a scratch buffer it owns, and
//! hands them to the type handler. Failures never take the thread down; the
//! resource is put back to `Unloaded` and the failure is counted.

use crate::error::{LoadError, LoadResult, StreamingError, StreamingResult};
use crate::event::StreamingEvent;
use crate::manager::Shared;
use crate::registry::{Request, RequestKind, ResourceRecord};
use crate::status::ResourceStatus;
use crate::types::TypeRegistration;
use core::sync::atomic::Ordering;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Run a collaborator call, turning a panic into a [`LoadError`]
pub(crate) fn guarded<R>(f: impl FnOnce() -> LoadResult<R>) -> LoadResult<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            Err(LoadError::Panicked(message))
        }
    }
}

#[derive(Debug, Default)]
struct ChannelQueue {
    requests: VecDeque<Request>,
    /// A request has been popped and is being processed
    busy: bool,
    terminating: bool,
}

/// Queue and signals shared between a channel thread and the manager
#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    queue: Mutex<ChannelQueue>,
    /// Signalled when a request is pushed or termination is requested
    wake: Condvar,
    /// Signalled when the queue drains and the thread goes idle
    idle: Condvar,
}

impl ChannelState {
    pub fn push(&self, request: Request) -> StreamingResult<()> {
        let mut queue = self.queue.lock();
        if queue.terminating {
            return Err(StreamingError::ShuttingDown);
        }
        queue.requests.push_back(request);
        self.wake.notify_one();
        Ok(())
    }

    /// Remove a request that has not been picked up yet
    pub fn remove(&self, seq: u64) -> Option<Request> {
        let mut queue = self.queue.lock();
        let idx = queue.requests.iter().position(|r| r.seq == seq)?;
        let request = queue.requests.remove(idx);
        if queue.requests.is_empty() && !queue.busy {
            self.idle.notify_all();
        }
        request
    }

    /// Number of queued requests, not counting one being processed
    pub fn pending(&self) -> usize {
        self.queue.lock().requests.len()
    }

    /// Block until the queue is empty and nothing is being processed
    pub fn wait_idle(&self) {
        let mut queue = self.queue.lock();
        while (queue.busy || !queue.requests.is_empty()) && !queue.terminating {
            self.idle.wait(&mut queue);
        }
    }

    pub fn terminate(&self) {
        let mut queue = self.queue.lock();
        queue.terminating = true;
        self.wake.notify_all();
        self.idle.notify_all();
    }

    /// Block for the next request; `None` once terminating
    fn next(&self) -> Option<Request> {
        let mut queue = self.queue.lock();
        loop {
            if queue.terminating {
                return None;
            }
            if let Some(request) = queue.requests.pop_front() {
                queue.busy = true;
                return Some(request);
            }
            self.wake.wait(&mut queue);
        }
    }

    fn done(&self) {
        let mut queue = self.queue.lock();
        queue.busy = false;
        if queue.requests.is_empty() {
            self.idle.notify_all();
        }
    }
}

/// Handle to a running channel thread
pub(crate) struct Channel {
    index: usize,
    state: Arc<ChannelState>,
    thread: Option<JoinHandle<()>>,
}

impl Channel {
    pub fn spawn(index: usize, name: String, shared: Arc<Shared>) -> StreamingResult<Self> {
        let state = Arc::new(ChannelState::default());
        let worker = Worker {
            index,
            state: Arc::clone(&state),
            shared,
            buffer: Vec::new(),
        };

        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(StreamingError::Spawn)?;

        Ok(Self {
            index,
            state,
            thread: Some(thread),
        })
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Wait for the thread after [`ChannelState::terminate`]
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Streaming channel {} panicked", self.index);
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.state.terminate();
        self.join();
    }
}

/// State owned by the channel thread
struct Worker {
    index: usize,
    state: Arc<ChannelState>,
    shared: Arc<Shared>,
    /// Scratch buffer reused across loads
    buffer: Vec<u8>,
}

impl Worker {
    fn run(mut self) {
        log::debug!("Streaming channel {} started", self.index);

        while let Some(request) = self.state.next() {
            self.process(request);
            self.state.done();
        }

        log::debug!("Streaming channel {} stopped", self.index);
    }

    fn process(&mut self, request: Request) {
        let lookup = self.shared.registry.read().lookup(request.id);
        let Some((record, registration)) = lookup else {
            log::warn!(
                "Channel {} dropped {:?} request for unknown resource {}",
                self.index,
                request.kind,
                request.id
            );
            return;
        };

        record.dispatch.lock().start(&request);

        let work = panic::catch_unwind(AssertUnwindSafe(|| match registration.local_id(request.id) {
            Some(local_id) => match request.kind {
                RequestKind::Load => self.load(&record, &registration, local_id),
                RequestKind::Unload => self.unload(&record, &registration),
            },
            None => log::warn!("Resource {} outside its type range", request.id),
        }));
        if work.is_err() {
            self.recover(&record);
        }

        record.dispatch.lock().finish();
    }

    /// Put a resource back to a consistent state after a panic escaped `load`/`unload`
    fn recover(&self, record: &ResourceRecord) {
        log::error!("Channel {} panicked while processing {}", self.index, record.id);

        match record.status.load() {
            ResourceStatus::Buffering => {
                self.shared
                    .stats
                    .sub_memory(record.resource_size.load(Ordering::Acquire));
                self.fail_load(record, LoadError::Panicked("channel worker".to_string()));
            }
            ResourceStatus::Loading => {
                self.fail_load(record, LoadError::Panicked("channel worker".to_string()));
            }
            ResourceStatus::Unloaded | ResourceStatus::Loaded => {}
        }
    }

    fn load(&mut self, record: &ResourceRecord, registration: &TypeRegistration, local_id: u32) {
        let stats = &self.shared.stats;
        record.status.store(ResourceStatus::Loading);

        let size = match guarded(|| Ok(record.location.data_size())) {
            Ok(size) => size,
            Err(err) => {
                self.fail_load(record, err);
                return;
            }
        };

        self.buffer.clear();
        if let Err(source) = self.buffer.try_reserve(size) {
            self.fail_load(record, LoadError::OutOfMemory { size, source });
            return;
        }
        self.buffer.resize(size, 0);

        let location = &record.location;
        let buffer = &mut self.buffer;
        if let Err(err) = guarded(|| location.fetch_data(buffer)) {
            self.fail_load(record, err);
            return;
        }

        record.resource_size.store(size, Ordering::Release);
        record.status.store(ResourceStatus::Buffering);
        stats.add_memory(size);

        let data = &self.buffer[..];
        if let Err(err) = guarded(|| registration.handler.load_resource(local_id, data)) {
            stats.sub_memory(size);
            self.fail_load(record, err);
            return;
        }

        let resident = match guarded(|| Ok(registration.handler.object_memory_size(local_id))) {
            Ok(0) | Err(_) => size,
            Ok(object_size) => object_size,
        };
        stats.resize_memory(size, resident);
        record.resource_size.store(resident, Ordering::Release);
        record.status.store(ResourceStatus::Loaded);
        stats.load_completed();

        log::debug!(
            "Channel {} loaded {} '{}' ({} bytes)",
            self.index,
            record.id,
            record.name,
            resident
        );
        self.shared.events.emit(StreamingEvent::Loaded {
            id: record.id,
            size: resident,
        });
    }

    fn fail_load(&self, record: &ResourceRecord, err: LoadError) {
        record.status.store(ResourceStatus::Unloaded);
        self.shared.stats.load_failed();

        log::warn!(
            "Channel {} failed to load {} '{}': {}",
            self.index,
            record.id,
            record.name,
            err
        );
        self.shared.events.emit(StreamingEvent::LoadFailed {
            id: record.id,
            error: err.to_string(),
        });
    }

    fn unload(&self, record: &ResourceRecord, registration: &TypeRegistration) {
        // A failed load ahead of this request leaves nothing to unload.
        if record.status.load() != ResourceStatus::Loaded {
            log::debug!("Channel {} skipped unload of {}: not loaded", self.index, record.id);
            return;
        }

        let (size, result) = record.unload_with(registration, &self.shared.stats);
        if result.is_ok() {
            log::debug!("Channel {} unloaded {} '{}'", self.index, record.id, record.name);
        }
        self.shared.events.emit(record.unload_event(size, &result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ResourceId;
    use std::time::Duration;

    fn request(seq: u64) -> Request {
        Request {
            id: ResourceId(seq as u32),
            kind: RequestKind::Load,
            seq,
        }
    }

    #[test]
    fn test_queue_is_fifo() {
        let state = ChannelState::default();
        state.push(request(1)).unwrap();
        state.push(request(2)).unwrap();
        state.push(request(3)).unwrap();

        assert_eq!(state.pending(), 3);
        assert_eq!(state.next().unwrap().seq, 1);
        state.done();
        assert_eq!(state.next().unwrap().seq, 2);
        state.done();
        assert_eq!(state.next().unwrap().seq, 3);
        state.done();
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn test_remove_queued_request() {
        let state = ChannelState::default();
        state.push(request(1)).unwrap();
        state.push(request(2)).unwrap();

        assert_eq!(state.remove(2).map(|r| r.seq), Some(2));
        assert!(state.remove(2).is_none());

        // Once popped, a request can no longer be removed
        assert_eq!(state.next().unwrap().seq, 1);
        assert!(state.remove(1).is_none());
        state.done();
    }

    #[test]
    fn test_push_after_terminate_fails() {
        let state = ChannelState::default();
        state.terminate();
        assert!(matches!(state.push(request(1)), Err(StreamingError::ShuttingDown)));
        assert!(state.next().is_none());
    }

    #[test]
    fn test_wait_idle_blocks_until_done() {
        let state = Arc::new(ChannelState::default());
        state.push(request(1)).unwrap();
        let popped = state.next().unwrap();
        assert_eq!(popped.seq, 1);

        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_idle())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        state.done();
        waiter.join().unwrap();
    }

    #[test]
    fn test_guarded_catches_panics() {
        let result: LoadResult<()> = guarded(|| panic!("bad texture"));
        match result {
            Err(LoadError::Panicked(message)) => assert_eq!(message, "bad texture"),
            other => panic!("unexpected {:?}", other),
        }

        assert!(guarded(|| Ok(5)).is_ok());
    }
}
