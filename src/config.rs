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

//! Pool configuration and per-play parameters.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Minimum number of concurrent play streams a pool can be configured with.
pub const MIN_PLAY_STREAMS: usize = 1;

/// Maximum number of concurrent play streams a pool can be configured with.
pub const MAX_PLAY_STREAMS: usize = 32;

/// Default number of concurrent play streams.
pub const DEFAULT_MAX_STREAMS: usize = 8;

/// Default capacity of the retained cache-buffer map. Idle buffers beyond this
/// count are evicted oldest-first.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Playback rate of a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderRate {
    Half,
    #[default]
    Normal,
    Double,
}

/// Pool-wide configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum number of streams that may render concurrently. Clamped to
    /// `[MIN_PLAY_STREAMS, MAX_PLAY_STREAMS]`.
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,

    /// Number of cache buffers retained after playback before eviction kicks in.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_max_streams() -> usize {
    DEFAULT_MAX_STREAMS
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_streams: DEFAULT_MAX_STREAMS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl PoolConfig {
    /// Creates a config for the given number of concurrent streams.
    pub fn new(max_streams: usize) -> Self {
        Self {
            max_streams,
            ..Self::default()
        }
    }

    /// The configured stream count clamped to the supported range.
    pub fn clamped_max_streams(&self) -> usize {
        self.max_streams.clamp(MIN_PLAY_STREAMS, MAX_PLAY_STREAMS)
    }
}

/// Caller-supplied playback parameters for one play request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayParams {
    /// Number of times to repeat after the first pass. `0` plays once, `-1`
    /// loops until stopped.
    #[serde(default, rename = "loop")]
    pub loop_count: i32,

    /// Playback rate.
    #[serde(default)]
    pub rate: RenderRate,

    /// Left channel volume in `[0.0, 1.0]`. The renderer is driven by the left
    /// volume only.
    #[serde(default = "default_volume")]
    pub left_volume: f32,

    /// Right channel volume in `[0.0, 1.0]`. Carried for API compatibility.
    #[serde(default = "default_volume")]
    pub right_volume: f32,

    /// Scheduling priority; higher wins admission and preemption.
    #[serde(default)]
    pub priority: i32,

    /// Allows this stream to render in parallel with other system audio.
    #[serde(default)]
    pub parallel_play: bool,

    /// Directory the audio backend may use for scratch data.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_volume() -> f32 {
    1.0
}

impl Default for PlayParams {
    fn default() -> Self {
        Self {
            loop_count: 0,
            rate: RenderRate::Normal,
            left_volume: 1.0,
            right_volume: 1.0,
            priority: 0,
            parallel_play: false,
            cache_dir: None,
        }
    }
}

impl PlayParams {
    /// Convenience constructor for the common case of a prioritized one-shot.
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}
