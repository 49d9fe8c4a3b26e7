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

//! The sound pool facade.
//!
//! Thin, synchronous wrapper over the stream scheduler: every call returns
//! immediately, playback itself runs on the pool's worker threads and the
//! renderer's pull thread.

use std::sync::Arc;

use crate::config::{PlayParams, PoolConfig, RenderRate};
use crate::error::{Error, Result};
use crate::renderer::RendererFactory;
use crate::scheduler::StreamManager;
use crate::sound::ParsedSound;

/// Events a pool reports back to its embedder.
pub trait SoundPoolCallback: Send + Sync {
    /// A stream hit an error.
    fn on_error(&self, error: Error);

    /// A stream finished playing (loop count exhausted or stopped).
    fn on_play_finished(&self, stream_id: i32);
}

/// A pool of short sounds playable with per-stream priority, loop, rate, and
/// volume control.
pub struct SoundPool {
    manager: Arc<StreamManager>,
}

impl SoundPool {
    /// Creates a pool that obtains renderers from the given factory.
    pub fn new(config: &PoolConfig, factory: Arc<dyn RendererFactory>) -> Self {
        Self {
            manager: StreamManager::new(config, factory),
        }
    }

    /// Schedules playback of a decoded sound and returns its stream ID. The
    /// request may be dispatched immediately, preempt a lower-priority
    /// stream, or wait in the pending queue; queueing is not an error.
    pub fn play(&self, sound: ParsedSound, params: PlayParams) -> Result<i32> {
        self.manager.play(sound, params)
    }

    /// Stops the stream. Stopping a finished or unknown stream is an error;
    /// stopping twice is not.
    pub fn stop(&self, stream_id: i32) -> Result<()> {
        self.manager.stop(stream_id)
    }

    pub fn set_volume(&self, stream_id: i32, left: f32, right: f32) -> Result<()> {
        self.manager.set_volume(stream_id, left, right)
    }

    pub fn set_rate(&self, stream_id: i32, rate: RenderRate) -> Result<()> {
        self.manager.set_rate(stream_id, rate)
    }

    pub fn set_priority(&self, stream_id: i32, priority: i32) -> Result<()> {
        self.manager.set_priority(stream_id, priority)
    }

    pub fn set_loop(&self, stream_id: i32, loop_count: i32) -> Result<()> {
        self.manager.set_loop(stream_id, loop_count)
    }

    pub fn set_parallel_play(&self, stream_id: i32, parallel: bool) -> Result<()> {
        self.manager.set_parallel_play(stream_id, parallel)
    }

    /// Registers the pool-wide event callback.
    pub fn set_callback(&self, callback: Arc<dyn SoundPoolCallback>) {
        self.manager.set_callback(callback);
    }

    /// Number of streams currently rendering.
    pub fn active_stream_count(&self) -> usize {
        self.manager.playing_count()
    }

    /// Number of requests waiting for a worker slot.
    pub fn pending_stream_count(&self) -> usize {
        self.manager.pending_count()
    }

    /// Stops everything and tears the pool down. Further calls fail with
    /// [`Error::Released`].
    pub fn release(&self) {
        self.manager.release();
    }
}

impl Drop for SoundPool {
    fn drop(&mut self) {
        self.manager.release();
    }
}

impl std::fmt::Debug for SoundPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundPool")
            .field("max_streams", &self.manager.max_streams())
            .field("active", &self.manager.playing_count())
            .field("pending", &self.manager.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::mock::MockRendererFactory;
    use crate::testutil::{eventually, init_tracing, make_sound, RecordingCallback};

    #[test]
    fn test_end_to_end_play() {
        init_tracing();
        let factory = Arc::new(MockRendererFactory::new(30).with_auto_pull());
        let pool = SoundPool::new(&PoolConfig::new(2), factory);
        let callback = Arc::new(RecordingCallback::default());
        pool.set_callback(callback.clone());

        let stream_id = pool
            .play(make_sound(1, &[60]), PlayParams::default())
            .unwrap();
        assert!(stream_id > 0);

        // The mock pulls from its own thread until the single pass finishes.
        eventually(
            || callback.finished() == vec![stream_id],
            "stream never finished",
        );
        eventually(|| pool.active_stream_count() == 0, "slot never freed");
        assert!(callback.errors().is_empty());
    }

    #[test]
    fn test_released_pool_rejects_commands() {
        init_tracing();
        let factory = Arc::new(MockRendererFactory::new(30));
        let pool = SoundPool::new(&PoolConfig::default(), factory);
        pool.release();

        assert_eq!(
            pool.play(make_sound(1, &[60]), PlayParams::default()),
            Err(Error::Released)
        );
    }
}
