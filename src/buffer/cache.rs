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

//! One sound's cached PCM paired with one live renderer session.
//!
//! The decoded chunk queue is re-chunked once into renderer-buffer-sized
//! frames; looped playback replays those frames without touching the decoder
//! output again. PCM delivery is pull-based: the renderer calls
//! `on_write_data` from its own thread, so everything mutable lives behind one
//! coarse lock, and the running flag flips before the renderer is told to stop
//! so racing pulls observe it and no-op.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::PlayParams;
use crate::error::{Error, Result};
use crate::pool::SoundPoolCallback;
use crate::renderer::{
    select_flags, Renderer, RendererFactory, RendererFlags, RendererOptions,
    RendererWriteCallback,
};
use crate::sound::{AudioBufferEntry, ParsedSound, TrackFormat};

/// Observer for stream lifecycle events, implemented by the scheduler. Held
/// weakly so a cache buffer never keeps its manager alive.
pub trait PlaybackListener: Send + Sync {
    /// The stream finished (loop count exhausted, stopped, or failed to start).
    fn on_play_finished(&self, stream_id: i32);

    /// The stream hit an error.
    fn on_error(&self, stream_id: i32, error: Error);
}

struct CacheState {
    format: TrackFormat,
    /// Decoded chunk queue; drained by the one-time re-chunk.
    cache_data: VecDeque<AudioBufferEntry>,
    total_size: usize,
    /// Renderer-buffer-aligned frames; persist for the stream's lifetime so
    /// loop restarts never re-chunk.
    frames: Vec<AudioBufferEntry>,
    renderer: Option<Arc<dyn Renderer>>,
    frame_cursor: usize,
    loops_done: i32,
    loop_target: i32,
    priority: i32,
    left_volume: f32,
    right_volume: f32,
}

/// Owns one sound's cached PCM and the renderer session playing it.
pub struct CacheBuffer {
    sound_id: i32,
    stream_id: i32,
    running: AtomicBool,
    state: Mutex<CacheState>,
    callback: Mutex<Option<Arc<dyn SoundPoolCallback>>>,
    listener: Mutex<Option<Weak<dyn PlaybackListener>>>,
}

impl CacheBuffer {
    /// Creates a cache buffer for the given decoded sound, bound to one stream.
    pub fn new(sound: ParsedSound, stream_id: i32) -> Self {
        let sound_id = sound.sound_id();
        let format = sound.format();
        let total_size = sound.total_size();
        Self {
            sound_id,
            stream_id,
            running: AtomicBool::new(false),
            state: Mutex::new(CacheState {
                format,
                cache_data: sound.into_chunks(),
                total_size,
                frames: Vec::new(),
                renderer: None,
                frame_cursor: 0,
                loops_done: 0,
                loop_target: 0,
                priority: 0,
                left_volume: 1.0,
                right_volume: 1.0,
            }),
            callback: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    pub fn sound_id(&self) -> i32 {
        self.sound_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn priority(&self) -> i32 {
        self.state.lock().priority
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_callback(&self, callback: Arc<dyn SoundPoolCallback>) {
        *self.callback.lock() = Some(callback);
    }

    pub fn set_listener(&self, listener: Weak<dyn PlaybackListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Creates the renderer and re-chunks the cache on first use, then applies
    /// the play parameters. Idempotent: later calls for the same stream only
    /// re-apply parameters.
    pub fn prepare_play(
        self: &Arc<Self>,
        stream_id: i32,
        factory: &dyn RendererFactory,
        params: &PlayParams,
    ) -> Result<()> {
        if stream_id != self.stream_id {
            return Err(Error::InvalidStream(stream_id));
        }

        let mut state = self.state.lock();
        if state.renderer.is_none() {
            let flags = select_flags(factory, &state.format);
            let renderer = factory.create(&RendererOptions {
                format: state.format,
                flags,
                cache_dir: params.cache_dir.clone(),
            })?;
            let callback = Arc::downgrade(self) as Weak<dyn RendererWriteCallback>;
            renderer.set_write_callback(callback);
            debug!(stream = stream_id, flags = ?flags, "Renderer created");
            state.renderer = Some(renderer);
        }

        if state.frames.is_empty() {
            Self::recombine(&mut state, stream_id, self.sound_id)?;
        }

        state.loop_target = params.loop_count;
        state.priority = params.priority;
        state.left_volume = params.left_volume;
        state.right_volume = params.right_volume;

        // Renderer is present after the block above.
        if let Some(renderer) = state.renderer.as_ref() {
            renderer.set_render_rate(params.rate);
            renderer.set_volume(params.left_volume.clamp(0.0, 1.0));
            renderer.set_parallel_play(params.parallel_play);
        }

        Ok(())
    }

    /// Repacks the decoded chunk queue into renderer-buffer-sized frames,
    /// draining the queue and zero-padding the final shortfall.
    fn recombine(state: &mut CacheState, stream_id: i32, sound_id: i32) -> Result<()> {
        let frame_size = match state.renderer.as_ref() {
            Some(renderer) => renderer.buffer_size()?.max(1),
            None => return Err(Error::RendererUnavailable(stream_id)),
        };
        if state.cache_data.is_empty() {
            return Err(Error::EmptyCache(sound_id));
        }

        let mut frames = Vec::with_capacity(state.total_size.div_ceil(frame_size));
        let mut pending: Vec<u8> = Vec::with_capacity(frame_size);
        while let Some(chunk) = state.cache_data.pop_front() {
            let mut rest = chunk.data();
            while !rest.is_empty() {
                let take = (frame_size - pending.len()).min(rest.len());
                pending.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if pending.len() == frame_size {
                    let full = std::mem::replace(&mut pending, Vec::with_capacity(frame_size));
                    frames.push(AudioBufferEntry::new(full));
                }
            }
        }
        if !pending.is_empty() {
            pending.resize(frame_size, 0);
            frames.push(AudioBufferEntry::new(pending));
        }

        debug!(
            stream = stream_id,
            sound = sound_id,
            frames = frames.len(),
            frame_size,
            total_size = state.total_size,
            "Cache data re-chunked"
        );
        state.frames = frames;
        Ok(())
    }

    /// Resets the playback position and starts the renderer. A start refusal
    /// surfaces through the error callbacks and still fires the play-finished
    /// path so the scheduler's pool slot is freed.
    pub fn do_play(&self, stream_id: i32) -> Result<()> {
        if stream_id != self.stream_id {
            return Err(Error::InvalidStream(stream_id));
        }

        let renderer = {
            let mut state = self.state.lock();
            state.frame_cursor = 0;
            state.loops_done = 0;
            state.renderer.clone()
        };
        let Some(renderer) = renderer else {
            let err = Error::RendererUnavailable(stream_id);
            self.emit_error(err.clone());
            self.emit_finished();
            return Err(err);
        };

        self.running.store(true, Ordering::SeqCst);
        if !renderer.start() {
            self.running.store(false, Ordering::SeqCst);
            let err = Error::RendererStartFailed(stream_id);
            warn!(stream = stream_id, "Renderer refused to start");
            self.emit_error(err.clone());
            self.emit_finished();
            return Err(err);
        }

        info!(stream = stream_id, sound = self.sound_id, "Playback started");
        Ok(())
    }

    /// Stops playback. Idempotent; stopping a stream that isn't running is a
    /// no-op. The low-latency path pauses and flushes instead of a full stop
    /// so a later restart is cheap.
    pub fn stop(&self, stream_id: i32) -> Result<()> {
        if stream_id != self.stream_id {
            return Err(Error::InvalidStream(stream_id));
        }
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let renderer = {
            let mut state = self.state.lock();
            state.frame_cursor = 0;
            state.loops_done = 0;
            state.renderer.clone()
        };
        if let Some(renderer) = renderer {
            if renderer.flags() == RendererFlags::LowLatency {
                renderer.pause();
                renderer.flush();
            } else {
                renderer.stop();
            }
        }

        info!(stream = stream_id, sound = self.sound_id, "Playback stopped");
        self.emit_finished();
        Ok(())
    }

    /// Applies channel volumes. The renderer is driven by the left volume.
    /// A mismatched stream ID is a stale command and is ignored.
    pub fn set_volume(&self, stream_id: i32, left: f32, right: f32) -> Result<()> {
        if stream_id != self.stream_id {
            debug!(stream = stream_id, "Ignoring stale volume command");
            return Ok(());
        }
        let mut state = self.state.lock();
        state.left_volume = left;
        state.right_volume = right;
        if let Some(renderer) = state.renderer.as_ref() {
            renderer.set_volume(left.clamp(0.0, 1.0));
        }
        Ok(())
    }

    pub fn set_render_rate(&self, stream_id: i32, rate: crate::config::RenderRate) -> Result<()> {
        if stream_id != self.stream_id {
            debug!(stream = stream_id, "Ignoring stale rate command");
            return Ok(());
        }
        if let Some(renderer) = self.state.lock().renderer.as_ref() {
            renderer.set_render_rate(rate);
        }
        Ok(())
    }

    pub fn set_priority(&self, stream_id: i32, priority: i32) -> Result<()> {
        if stream_id != self.stream_id {
            debug!(stream = stream_id, "Ignoring stale priority command");
            return Ok(());
        }
        self.state.lock().priority = priority;
        Ok(())
    }

    pub fn set_loop(&self, stream_id: i32, loop_count: i32) -> Result<()> {
        if stream_id != self.stream_id {
            debug!(stream = stream_id, "Ignoring stale loop command");
            return Ok(());
        }
        self.state.lock().loop_target = loop_count;
        Ok(())
    }

    pub fn set_parallel_play(&self, stream_id: i32, parallel: bool) -> Result<()> {
        if stream_id != self.stream_id {
            debug!(stream = stream_id, "Ignoring stale parallel-play command");
            return Ok(());
        }
        if let Some(renderer) = self.state.lock().renderer.as_ref() {
            renderer.set_parallel_play(parallel);
        }
        Ok(())
    }

    /// Tears down the renderer and drops all cached data and callback
    /// references. Idempotent.
    pub fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            if let Some(renderer) = state.renderer.take() {
                renderer.stop();
                renderer.release();
            }
            state.cache_data.clear();
            state.frames.clear();
            state.frame_cursor = 0;
            state.loops_done = 0;
        }
        self.callback.lock().take();
        self.listener.lock().take();
        debug!(stream = self.stream_id, sound = self.sound_id, "Cache buffer released");
    }

    fn emit_finished(&self) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener.and_then(|weak| weak.upgrade()) {
            listener.on_play_finished(self.stream_id);
        }
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.on_play_finished(self.stream_id);
        }
    }

    fn emit_error(&self, error: Error) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.on_error(error.clone());
        }
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener.and_then(|weak| weak.upgrade()) {
            listener.on_error(self.stream_id, error);
        }
    }

    #[cfg(test)]
    pub(crate) fn frames_snapshot(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .frames
            .iter()
            .map(|f| f.data().to_vec())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn cached_chunk_count(&self) -> usize {
        self.state.lock().cache_data.len()
    }
}

impl RendererWriteCallback for CacheBuffer {
    /// Renderer pull: hand over the next frame, restart the loop, or finish.
    fn on_write_data(&self, _length: usize) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let mut state = self.state.lock();
        let Some(renderer) = state.renderer.clone() else {
            return;
        };

        if state.frame_cursor >= state.frames.len() {
            if state.loops_done == state.loop_target {
                // Loop count exhausted. Stop fires the finished callbacks, so
                // drop the lock first.
                drop(state);
                if let Err(error) = self.stop(self.stream_id) {
                    warn!(stream = self.stream_id, %error, "Stop after final loop failed");
                }
                return;
            }
            state.loops_done += 1;
            state.frame_cursor = 0;
            return;
        }

        let cursor = state.frame_cursor;
        state.frame_cursor += 1;
        if let Err(error) = renderer.enqueue(state.frames[cursor].data()) {
            warn!(stream = self.stream_id, %error, "Frame enqueue failed");
        }
    }
}

impl std::fmt::Debug for CacheBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuffer")
            .field("sound_id", &self.sound_id)
            .field("stream_id", &self.stream_id)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::mock::MockRendererFactory;
    use crate::testutil::{init_tracing, make_sound, RecordingCallback};

    struct RecordingListener {
        finished: Mutex<Vec<i32>>,
        errors: Mutex<Vec<(i32, Error)>>,
    }

    impl RecordingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                finished: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
            })
        }
    }

    impl PlaybackListener for RecordingListener {
        fn on_play_finished(&self, stream_id: i32) {
            self.finished.lock().push(stream_id);
        }

        fn on_error(&self, stream_id: i32, error: Error) {
            self.errors.lock().push((stream_id, error));
        }
    }

    fn prepared_cache(
        chunk_sizes: &[usize],
        stream_id: i32,
        factory: &MockRendererFactory,
        params: &PlayParams,
    ) -> Arc<CacheBuffer> {
        let cache = Arc::new(CacheBuffer::new(make_sound(1, chunk_sizes), stream_id));
        cache.prepare_play(stream_id, factory, params).unwrap();
        cache
    }

    #[test]
    fn test_recombine_zero_padding() {
        init_tracing();
        let factory = MockRendererFactory::new(30);
        let cache = prepared_cache(&[40, 35, 25], 1, &factory, &PlayParams::default());

        // 100 bytes into 30-byte frames: 4 frames, 20 zero bytes of padding.
        let frames = cache.frames_snapshot();
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| f.len() == 30));
        assert!(frames[2].iter().all(|&b| b == 0xAB));
        assert!(frames[3][..10].iter().all(|&b| b == 0xAB));
        assert!(frames[3][10..].iter().all(|&b| b == 0));

        // The source queue is consumed by the re-chunk.
        assert_eq!(cache.cached_chunk_count(), 0);
    }

    #[test]
    fn test_prepare_play_idempotent() {
        init_tracing();
        let factory = MockRendererFactory::new(30);
        let cache = prepared_cache(&[40, 35, 25], 1, &factory, &PlayParams::default());
        let frames_before = cache.frames_snapshot();

        cache
            .prepare_play(1, &factory, &PlayParams::with_priority(9))
            .unwrap();

        // No second renderer, no second re-chunk; parameters still apply.
        assert_eq!(factory.created_count(), 1);
        assert_eq!(cache.frames_snapshot(), frames_before);
        assert_eq!(cache.priority(), 9);
    }

    #[test]
    fn test_loop_delivery_count() {
        init_tracing();
        let factory = MockRendererFactory::new(30);
        let params = PlayParams {
            loop_count: 1,
            ..PlayParams::default()
        };
        let cache = prepared_cache(&[60], 1, &factory, &params);
        let callback = Arc::new(RecordingCallback::default());
        cache.set_callback(callback.clone());

        cache.do_play(1).unwrap();
        let mock = factory.renderer(0).unwrap();
        assert!(cache.is_running());

        // loop = 1 means two full passes over two frames, then an autonomous
        // stop: (N+1) * frame_count deliveries.
        mock.pump_n(10);
        assert_eq!(mock.enqueued_frames(), 4);
        assert!(!cache.is_running());
        assert_eq!(callback.finished(), vec![1]);
    }

    #[test]
    fn test_infinite_loop_keeps_playing() {
        init_tracing();
        let factory = MockRendererFactory::new(30);
        let params = PlayParams {
            loop_count: -1,
            ..PlayParams::default()
        };
        let cache = prepared_cache(&[60], 1, &factory, &params);
        cache.do_play(1).unwrap();

        let mock = factory.renderer(0).unwrap();
        mock.pump_n(50);
        assert!(cache.is_running());
        assert!(mock.enqueued_frames() > 20);
    }

    #[test]
    fn test_stop_idempotent() {
        init_tracing();
        let factory = MockRendererFactory::new(30);
        let cache = prepared_cache(&[60], 1, &factory, &PlayParams::default());
        let callback = Arc::new(RecordingCallback::default());
        cache.set_callback(callback.clone());
        cache.do_play(1).unwrap();

        cache.stop(1).unwrap();
        cache.stop(1).unwrap();

        let mock = factory.renderer(0).unwrap();
        // 48kHz stereo qualifies for low latency: pause + flush, once.
        assert_eq!(mock.pause_count(), 1);
        assert_eq!(mock.flush_count(), 1);
        assert_eq!(callback.finished_count(), 1);
    }

    #[test]
    fn test_normal_path_full_stop() {
        init_tracing();
        let factory = MockRendererFactory::new(30).without_low_latency();
        let cache = prepared_cache(&[60], 1, &factory, &PlayParams::default());
        cache.do_play(1).unwrap();
        cache.stop(1).unwrap();

        let mock = factory.renderer(0).unwrap();
        assert_eq!(mock.stop_count(), 1);
        assert_eq!(mock.pause_count(), 0);
    }

    #[test]
    fn test_stale_commands_ignored() {
        init_tracing();
        let factory = MockRendererFactory::new(30);
        let cache = prepared_cache(&[60], 1, &factory, &PlayParams::default());
        let mock = factory.renderer(0).unwrap();

        // Setters with a mismatched stream ID succeed without effect.
        cache.set_volume(99, 0.2, 0.2).unwrap();
        cache.set_loop(99, 5).unwrap();
        assert_eq!(mock.volume(), 1.0);

        // Stop and play are strict about stream identity.
        assert_eq!(cache.stop(99), Err(Error::InvalidStream(99)));
        assert_eq!(cache.do_play(99), Err(Error::InvalidStream(99)));
    }

    #[test]
    fn test_start_failure_fires_finished_path() {
        init_tracing();
        let factory = MockRendererFactory::new(30).with_fail_start();
        let cache = prepared_cache(&[60], 7, &factory, &PlayParams::default());
        let callback = Arc::new(RecordingCallback::default());
        let listener = RecordingListener::new();
        cache.set_callback(callback.clone());
        cache.set_listener(Arc::downgrade(&listener) as Weak<dyn PlaybackListener>);

        assert_eq!(cache.do_play(7), Err(Error::RendererStartFailed(7)));
        assert!(!cache.is_running());
        assert_eq!(callback.errors(), vec![Error::RendererStartFailed(7)]);
        // The finished path must fire so the scheduler slot is not stranded.
        assert_eq!(listener.finished.lock().clone(), vec![7]);
        assert_eq!(callback.finished(), vec![7]);
    }

    #[test]
    fn test_empty_cache_rejected() {
        init_tracing();
        let factory = MockRendererFactory::new(30);
        let cache = Arc::new(CacheBuffer::new(make_sound(3, &[]), 1));
        assert_eq!(
            cache.prepare_play(1, &factory, &PlayParams::default()),
            Err(Error::EmptyCache(3))
        );
    }

    #[test]
    fn test_release_idempotent() {
        init_tracing();
        let factory = MockRendererFactory::new(30);
        let cache = prepared_cache(&[60], 1, &factory, &PlayParams::default());
        cache.do_play(1).unwrap();

        cache.release();
        cache.release();

        let mock = factory.renderer(0).unwrap();
        assert!(mock.is_released());
        assert!(cache.frames_snapshot().is_empty());
        assert!(!cache.is_running());
    }
}
