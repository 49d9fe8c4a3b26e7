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

//! A low-latency pool for short, pre-decoded sounds.
//!
//! Decoded PCM is handed to the pool once; playback requests are scheduled
//! onto a bounded worker pool with priority-based admission and preemption.
//! Each admitted stream owns a renderer session obtained from a
//! [`renderer::RendererFactory`], and PCM is delivered pull-style from the
//! renderer's thread.

pub mod buffer;
pub mod config;
pub mod error;
pub mod pool;
pub mod renderer;
pub mod scheduler;
pub mod sound;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{PlayParams, PoolConfig, RenderRate};
pub use error::{Error, Result};
pub use pool::{SoundPool, SoundPoolCallback};
pub use sound::{AudioBufferEntry, ParsedSound, SampleFormat, TrackFormat};
