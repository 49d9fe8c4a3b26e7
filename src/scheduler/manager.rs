// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The stream scheduler: admission control and priority preemption over a
//! bounded worker pool.
//!
//! A play request lands in one of three states. With pool capacity free it is
//! dispatched immediately. With the pool full it preempts the lowest-priority
//! playing stream if its own priority is at least as high; the preempted
//! stream is stopped and re-queued as pending. Otherwise the request itself
//! waits in the pending queue and is promoted when a slot frees up.
//!
//! Lock order is strict: the manager lock is never held across cache-buffer
//! calls or callback fan-out, and play tasks are dispatched to the rayon pool
//! rather than run inline.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rayon::ThreadPoolBuilder;
use tracing::{debug, error, info, warn};

use super::queue::{StreamEntry, StreamQueue};
use crate::buffer::{CacheBuffer, PlaybackListener};
use crate::config::{PlayParams, PoolConfig};
use crate::error::{Error, Result};
use crate::pool::SoundPoolCallback;
use crate::renderer::RendererFactory;
use crate::sound::ParsedSound;

struct ManagerState {
    /// Every retained cache buffer, oldest first. One live stream per sound.
    cache_buffers: Vec<Arc<CacheBuffer>>,
    /// Streams occupying worker slots, descending priority.
    playing: StreamQueue,
    /// Admitted-but-waiting requests, descending priority.
    pending: StreamQueue,
    /// Stream IDs currently backed by a cache buffer; consulted so the
    /// wrapping ID counter never hands out a live ID twice.
    live_stream_ids: Vec<i32>,
    next_stream_id: i32,
    released: bool,
}

/// Scheduler and admission controller for one sound pool.
pub struct StreamManager {
    factory: Arc<dyn RendererFactory>,
    max_streams: usize,
    cache_capacity: usize,
    state: Mutex<ManagerState>,
    worker_pool: Mutex<Option<Arc<rayon::ThreadPool>>>,
    callback: Mutex<Option<Arc<dyn SoundPoolCallback>>>,
    /// Self-reference handed to cache buffers as their playback listener, so
    /// a cache never keeps its manager alive.
    weak_self: Weak<StreamManager>,
}

impl StreamManager {
    /// Creates a manager with the given configuration. The worker pool itself
    /// is built lazily on the first play request.
    pub fn new(config: &PoolConfig, factory: Arc<dyn RendererFactory>) -> Arc<Self> {
        let max_streams = config.clamped_max_streams();
        Arc::new_cyclic(|weak| Self {
            factory,
            max_streams,
            cache_capacity: config.cache_capacity.max(1),
            state: Mutex::new(ManagerState {
                cache_buffers: Vec::new(),
                playing: StreamQueue::new(),
                pending: StreamQueue::new(),
                live_stream_ids: Vec::new(),
                next_stream_id: 0,
                released: false,
            }),
            worker_pool: Mutex::new(None),
            callback: Mutex::new(None),
            weak_self: weak.clone(),
        })
    }

    pub fn max_streams(&self) -> usize {
        self.max_streams
    }

    /// Schedules playback of a decoded sound, reusing the live stream for the
    /// sound if one exists. Returns the stream ID.
    pub fn play(&self, sound: ParsedSound, params: PlayParams) -> Result<i32> {
        let sound_id = sound.sound_id();
        let callback = self.callback.lock().clone();

        let (stream_id, evicted) = {
            let mut state = self.state.lock();
            if state.released {
                return Err(Error::Released);
            }

            match state.cache_buffers.iter().find(|c| c.sound_id() == sound_id) {
                Some(existing) => {
                    let stream_id = existing.stream_id();
                    debug!(sound = sound_id, stream = stream_id, "Reusing cached stream");
                    (stream_id, Vec::new())
                }
                None => {
                    let stream_id = Self::allocate_stream_id(&mut state);
                    let cache = Arc::new(CacheBuffer::new(sound, stream_id));
                    let listener: Weak<dyn PlaybackListener> = self.weak_self.clone();
                    cache.set_listener(listener);
                    if let Some(callback) = callback {
                        cache.set_callback(callback);
                    }
                    state.cache_buffers.push(cache);
                    state.live_stream_ids.push(stream_id);
                    debug!(sound = sound_id, stream = stream_id, "Cache buffer created");
                    let evicted = Self::evict_idle(&mut state, self.cache_capacity, stream_id);
                    (stream_id, evicted)
                }
            }
        };

        for cache in evicted {
            debug!(
                sound = cache.sound_id(),
                stream = cache.stream_id(),
                "Evicting idle cache buffer"
            );
            cache.release();
        }

        self.set_play(sound_id, stream_id, &params)?;
        Ok(stream_id)
    }

    /// Prepares the stream's cache buffer and runs the three-way admission
    /// decision: dispatch, preempt, or queue.
    fn set_play(&self, sound_id: i32, stream_id: i32, params: &PlayParams) -> Result<()> {
        self.ensure_worker_pool()?;
        let cache = self
            .cache_for_stream(stream_id)
            .ok_or(Error::InvalidStream(stream_id))?;
        cache.prepare_play(stream_id, self.factory.as_ref(), params)?;

        let victim = {
            let mut state = self.state.lock();
            if state.released {
                return Err(Error::Released);
            }
            Self::prune_vanished(&mut state);
            // A fresh request replaces any stale pending entry for the stream.
            state.pending.remove(stream_id);

            if state.playing.contains(stream_id) {
                debug!(stream = stream_id, "Restarting admitted stream");
                self.spawn_play(cache.clone(), stream_id);
                None
            } else if state.playing.len() < self.max_streams {
                debug!(stream = stream_id, priority = params.priority, "Stream admitted");
                self.admit(
                    &mut state,
                    StreamEntry::new(sound_id, stream_id, params.clone()),
                    cache.clone(),
                );
                None
            } else {
                // The pool is full, so a lowest-priority entry exists.
                let lowest = state.playing.lowest().map(|e| (e.stream_id, e.priority));
                if let Some((victim_id, _)) = lowest.filter(|&(_, p)| params.priority >= p) {
                    let victim_entry = state.playing.remove(victim_id);
                    let victim_cache = state
                        .cache_buffers
                        .iter()
                        .find(|c| c.stream_id() == victim_id)
                        .cloned();
                    // The preempted stream goes back to waiting rather than
                    // being dropped outright.
                    if let Some(entry) = victim_entry {
                        state.pending.insert(entry);
                    }
                    self.admit(
                        &mut state,
                        StreamEntry::new(sound_id, stream_id, params.clone()),
                        cache.clone(),
                    );
                    victim_cache.map(|c| (c, victim_id))
                } else {
                    debug!(
                        stream = stream_id,
                        priority = params.priority,
                        "No capacity, stream queued"
                    );
                    state
                        .pending
                        .insert(StreamEntry::new(sound_id, stream_id, params.clone()));
                    None
                }
            }
        };

        if let Some((victim_cache, victim_id)) = victim {
            warn!(
                victim = victim_id,
                stream = stream_id,
                "Preempting lower-priority stream"
            );
            if let Err(error) = victim_cache.stop(victim_id) {
                warn!(victim = victim_id, %error, "Preemption stop failed");
            }
        }
        Ok(())
    }

    /// Stops a stream: a pending request is simply dequeued, a dispatched one
    /// is stopped and its slot released.
    pub fn stop(&self, stream_id: i32) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.pending.remove(stream_id).is_some() {
                debug!(stream = stream_id, "Dequeued pending stream");
                return Ok(());
            }
        }
        let cache = self
            .cache_for_stream(stream_id)
            .ok_or(Error::InvalidStream(stream_id))?;
        cache.stop(stream_id)?;
        // A stream stopped before its play task ran never fires the finished
        // callback; release the slot explicitly (idempotent).
        self.release_slot(stream_id);
        Ok(())
    }

    pub fn set_volume(&self, stream_id: i32, left: f32, right: f32) -> Result<()> {
        match self.cache_for_stream(stream_id) {
            Some(cache) => cache.set_volume(stream_id, left, right),
            None => Self::ignore_unknown(stream_id),
        }
    }

    pub fn set_rate(&self, stream_id: i32, rate: crate::config::RenderRate) -> Result<()> {
        match self.cache_for_stream(stream_id) {
            Some(cache) => cache.set_render_rate(stream_id, rate),
            None => Self::ignore_unknown(stream_id),
        }
    }

    /// Updates a stream's priority, re-sorting any queue entry it has so the
    /// change affects later preemption and promotion decisions.
    pub fn set_priority(&self, stream_id: i32, priority: i32) -> Result<()> {
        let Some(cache) = self.cache_for_stream(stream_id) else {
            return Self::ignore_unknown(stream_id);
        };
        cache.set_priority(stream_id, priority)?;

        let mut state = self.state.lock();
        let state = &mut *state;
        for queue in [&mut state.playing, &mut state.pending] {
            if let Some(mut entry) = queue.remove(stream_id) {
                entry.priority = priority;
                entry.params.priority = priority;
                queue.insert(entry);
            }
        }
        Ok(())
    }

    pub fn set_loop(&self, stream_id: i32, loop_count: i32) -> Result<()> {
        match self.cache_for_stream(stream_id) {
            Some(cache) => cache.set_loop(stream_id, loop_count),
            None => Self::ignore_unknown(stream_id),
        }
    }

    pub fn set_parallel_play(&self, stream_id: i32, parallel: bool) -> Result<()> {
        match self.cache_for_stream(stream_id) {
            Some(cache) => cache.set_parallel_play(stream_id, parallel),
            None => Self::ignore_unknown(stream_id),
        }
    }

    /// Registers the pool-wide callback and propagates it to live streams.
    pub fn set_callback(&self, callback: Arc<dyn SoundPoolCallback>) {
        let caches: Vec<_> = self.state.lock().cache_buffers.clone();
        *self.callback.lock() = Some(callback.clone());
        for cache in caches {
            cache.set_callback(callback.clone());
        }
    }

    /// Tears down every stream and the worker pool. The manager accepts no
    /// commands afterwards.
    pub fn release(&self) {
        let caches = {
            let mut state = self.state.lock();
            state.released = true;
            state.playing = StreamQueue::new();
            state.pending = StreamQueue::new();
            state.live_stream_ids.clear();
            std::mem::take(&mut state.cache_buffers)
        };
        for cache in caches {
            cache.release();
        }
        *self.worker_pool.lock() = None;
        *self.callback.lock() = None;
        info!("Stream manager released");
    }

    /// Number of streams currently occupying worker slots.
    pub fn playing_count(&self) -> usize {
        self.state.lock().playing.len()
    }

    /// Number of admitted-but-waiting requests.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_stream_playing(&self, stream_id: i32) -> bool {
        self.state.lock().playing.contains(stream_id)
    }

    pub fn is_stream_pending(&self, stream_id: i32) -> bool {
        self.state.lock().pending.contains(stream_id)
    }

    fn ignore_unknown(stream_id: i32) -> Result<()> {
        debug!(stream = stream_id, "Ignoring command for unknown stream");
        Ok(())
    }

    fn cache_for_stream(&self, stream_id: i32) -> Option<Arc<CacheBuffer>> {
        self.state
            .lock()
            .cache_buffers
            .iter()
            .find(|c| c.stream_id() == stream_id)
            .cloned()
    }

    /// Next stream ID: monotonic, wrapping at `i32::MAX`, skipping IDs still
    /// backed by a live cache buffer.
    fn allocate_stream_id(state: &mut ManagerState) -> i32 {
        loop {
            state.next_stream_id = if state.next_stream_id >= i32::MAX - 1 {
                1
            } else {
                state.next_stream_id + 1
            };
            let id = state.next_stream_id;
            if !state.live_stream_ids.contains(&id) {
                return id;
            }
        }
    }

    /// Inserts the entry into the playing set and dispatches its play task.
    /// Caller holds the state lock.
    fn admit(&self, state: &mut ManagerState, entry: StreamEntry, cache: Arc<CacheBuffer>) {
        let stream_id = entry.stream_id;
        state.playing.insert(entry);
        self.spawn_play(cache, stream_id);
    }

    fn spawn_play(&self, cache: Arc<CacheBuffer>, stream_id: i32) {
        let Some(pool) = self.worker_pool.lock().clone() else {
            warn!(stream = stream_id, "No worker pool, dropping play task");
            return;
        };
        let manager = self.weak_self.clone();
        pool.spawn(move || {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            // The stream may have been stopped or preempted between dispatch
            // and execution.
            if !manager.is_stream_playing(stream_id) {
                debug!(stream = stream_id, "Play task superseded before start");
                return;
            }
            if let Err(error) = cache.do_play(stream_id) {
                error!(stream = stream_id, %error, "Play task failed");
            }
        });
    }

    /// Frees the slot held by a stream (if any) and promotes pending requests
    /// into whatever capacity is now available. Idempotent.
    fn release_slot(&self, stream_id: i32) {
        let mut state = self.state.lock();
        if state.playing.remove(stream_id).is_none() {
            return;
        }
        while state.playing.len() < self.max_streams {
            let Some(entry) = state.pending.pop_front() else {
                break;
            };
            let Some(cache) = state
                .cache_buffers
                .iter()
                .find(|c| c.stream_id() == entry.stream_id)
                .cloned()
            else {
                continue;
            };
            debug!(stream = entry.stream_id, priority = entry.priority, "Promoting pending stream");
            self.admit(&mut state, entry, cache);
        }
    }

    /// Drops queue entries whose cache buffer has vanished.
    fn prune_vanished(state: &mut ManagerState) {
        let ManagerState {
            cache_buffers,
            playing,
            pending,
            ..
        } = state;
        playing.retain(|e| cache_buffers.iter().any(|c| c.stream_id() == e.stream_id));
        pending.retain(|e| cache_buffers.iter().any(|c| c.stream_id() == e.stream_id));
    }

    /// Evicts idle cache buffers (not running, no queue entry) oldest-first
    /// until the retained set fits the configured capacity. The buffer just
    /// created for the incoming request (`keep_stream_id`) is never a
    /// candidate: it is not queued yet, so it would otherwise match the idle
    /// predicate and the request would evict itself. Returns the evicted
    /// buffers for release outside the lock.
    fn evict_idle(
        state: &mut ManagerState,
        capacity: usize,
        keep_stream_id: i32,
    ) -> Vec<Arc<CacheBuffer>> {
        let mut evicted = Vec::new();
        while state.cache_buffers.len() > capacity {
            let playing = &state.playing;
            let pending = &state.pending;
            let idle = state.cache_buffers.iter().position(|c| {
                c.stream_id() != keep_stream_id
                    && !c.is_running()
                    && !playing.contains(c.stream_id())
                    && !pending.contains(c.stream_id())
            });
            let Some(at) = idle else {
                break;
            };
            let cache = state.cache_buffers.remove(at);
            let stream_id = cache.stream_id();
            state.live_stream_ids.retain(|&id| id != stream_id);
            evicted.push(cache);
        }
        evicted
    }

    fn ensure_worker_pool(&self) -> Result<()> {
        let mut pool = self.worker_pool.lock();
        if pool.is_none() {
            let built = ThreadPoolBuilder::new()
                .num_threads(self.max_streams)
                .thread_name(|i| format!("soundpool-play-{i}"))
                .build()
                .map_err(|e| Error::WorkerPool(e.to_string()))?;
            info!(threads = self.max_streams, "Play worker pool started");
            *pool = Some(Arc::new(built));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn playing_priorities(&self) -> Vec<i32> {
        self.state.lock().playing.iter().map(|e| e.priority).collect()
    }

    #[cfg(test)]
    pub(crate) fn pending_priorities(&self) -> Vec<i32> {
        self.state.lock().pending.iter().map(|e| e.priority).collect()
    }

    #[cfg(test)]
    pub(crate) fn queues_sorted(&self) -> bool {
        let state = self.state.lock();
        state.playing.is_sorted() && state.pending.is_sorted()
    }

    #[cfg(test)]
    pub(crate) fn cached_buffer_count(&self) -> usize {
        self.state.lock().cache_buffers.len()
    }

    #[cfg(test)]
    pub(crate) fn set_next_stream_id(&self, next: i32) {
        self.state.lock().next_stream_id = next;
    }
}

impl PlaybackListener for StreamManager {
    fn on_play_finished(&self, stream_id: i32) {
        debug!(stream = stream_id, "Stream finished");
        self.release_slot(stream_id);
    }

    fn on_error(&self, stream_id: i32, error: Error) {
        warn!(stream = stream_id, %error, "Stream error");
    }
}
