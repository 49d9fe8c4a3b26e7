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

//! The audio renderer boundary.
//!
//! The pool never talks to audio hardware directly; it drives an opaque
//! renderer that pulls PCM through a write callback running on the renderer's
//! own thread. Backends implement [`Renderer`] and hand out instances through
//! a [`RendererFactory`], which also answers whether the hardware supports the
//! low-latency render path.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::config::RenderRate;
use crate::error::Result;
use crate::sound::TrackFormat;

pub mod mock;

/// Low-latency renderers trade a full stop for pause-and-flush, making looped
/// restarts cheaper. Only some track formats qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererFlags {
    Normal,
    LowLatency,
}

/// Options for creating a renderer instance.
#[derive(Debug, Clone)]
pub struct RendererOptions {
    /// Track format of the PCM this renderer will be fed.
    pub format: TrackFormat,
    /// Render path the stream qualified for.
    pub flags: RendererFlags,
    /// Scratch directory for the backend, if the caller provided one.
    pub cache_dir: Option<PathBuf>,
}

/// Pull callback the renderer invokes from its own thread whenever it is ready
/// for more PCM. Implementations must not block; the renderer thread is shared
/// with actual audio delivery.
pub trait RendererWriteCallback: Send + Sync {
    /// Requests `length` more bytes of PCM.
    fn on_write_data(&self, length: usize);
}

/// One audio rendering session.
pub trait Renderer: Send + Sync {
    /// Starts rendering. Returns false if the backend refused to start.
    fn start(&self) -> bool;

    /// Pauses rendering without tearing the session down.
    fn pause(&self);

    /// Drops any PCM the backend has buffered but not yet rendered.
    fn flush(&self);

    /// Stops rendering.
    fn stop(&self);

    /// Releases the backend session. The renderer must not be used afterwards.
    fn release(&self);

    /// The backend's native buffer size in bytes. Frames enqueued through
    /// [`Renderer::enqueue`] should match this size.
    fn buffer_size(&self) -> Result<usize>;

    /// Hands one frame of PCM to the backend.
    fn enqueue(&self, frame: &[u8]) -> Result<()>;

    fn set_volume(&self, volume: f32);

    fn set_render_rate(&self, rate: RenderRate);

    fn set_parallel_play(&self, parallel: bool);

    /// Registers the pull callback. Held weakly so a renderer outliving its
    /// stream never keeps the stream's state alive.
    fn set_write_callback(&self, callback: Weak<dyn RendererWriteCallback>);

    /// The render path this instance was created with.
    fn flags(&self) -> RendererFlags;
}

/// Creates renderer sessions and reports hardware capabilities.
pub trait RendererFactory: Send + Sync {
    fn create(&self, options: &RendererOptions) -> Result<Arc<dyn Renderer>>;

    /// True if the hardware offers the low-latency render path at all.
    fn supports_low_latency(&self) -> bool;
}

/// Selects the render path for a track format: 48kHz mono/stereo qualifies for
/// low latency, everything else forces the normal path.
pub fn select_flags(factory: &dyn RendererFactory, format: &TrackFormat) -> RendererFlags {
    if factory.supports_low_latency()
        && format.sample_rate == 48_000
        && (1..=2).contains(&format.channel_count)
    {
        RendererFlags::LowLatency
    } else {
        RendererFlags::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockRendererFactory;
    use super::*;
    use crate::sound::SampleFormat;

    #[test]
    fn test_select_flags() {
        let factory = MockRendererFactory::new(256);
        let stereo_48k = TrackFormat::new(48_000, 2, SampleFormat::Int);
        let mono_48k = TrackFormat::new(48_000, 1, SampleFormat::Int);
        let surround_48k = TrackFormat::new(48_000, 6, SampleFormat::Int);
        let stereo_44k = TrackFormat::new(44_100, 2, SampleFormat::Int);

        assert_eq!(
            select_flags(&factory, &stereo_48k),
            RendererFlags::LowLatency
        );
        assert_eq!(select_flags(&factory, &mono_48k), RendererFlags::LowLatency);
        assert_eq!(select_flags(&factory, &surround_48k), RendererFlags::Normal);
        assert_eq!(select_flags(&factory, &stereo_44k), RendererFlags::Normal);

        let no_ll = MockRendererFactory::new(256).without_low_latency();
        assert_eq!(select_flags(&no_ll, &stereo_48k), RendererFlags::Normal);
    }
}
