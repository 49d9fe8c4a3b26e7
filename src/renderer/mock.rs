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

//! A mock renderer. Doesn't touch any audio hardware.
//!
//! In auto-pull mode it drives the write callback from its own thread the way
//! a real backend would. With auto-pull off, tests drive the callback by hand
//! for deterministic delivery counts.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Weak,
};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Renderer, RendererFactory, RendererFlags, RendererOptions, RendererWriteCallback};
use crate::config::RenderRate;
use crate::error::Result;

/// Interval between simulated pull callbacks in auto-pull mode.
const PULL_INTERVAL: Duration = Duration::from_micros(500);

/// A mock renderer session that records every call made against it.
pub struct MockRenderer {
    flags: RendererFlags,
    buffer_size: usize,
    fail_start: bool,
    auto_pull: bool,
    running: AtomicBool,
    released: AtomicBool,
    callback: Mutex<Option<Weak<dyn RendererWriteCallback>>>,
    pull_stop: Mutex<Option<Sender<()>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    pauses: AtomicUsize,
    flushes: AtomicUsize,
    /// Append-only log of every frame handed to the backend.
    enqueued: Mutex<Vec<Vec<u8>>>,
    volume: Mutex<f32>,
    rate: Mutex<RenderRate>,
    parallel: AtomicBool,
}

impl MockRenderer {
    fn new(flags: RendererFlags, buffer_size: usize, fail_start: bool, auto_pull: bool) -> Self {
        Self {
            flags,
            buffer_size,
            fail_start,
            auto_pull,
            running: AtomicBool::new(false),
            released: AtomicBool::new(false),
            callback: Mutex::new(None),
            pull_stop: Mutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            enqueued: Mutex::new(Vec::new()),
            volume: Mutex::new(1.0),
            rate: Mutex::new(RenderRate::Normal),
            parallel: AtomicBool::new(false),
        }
    }

    /// Invokes the write callback once, as the backend thread would.
    pub fn pump(&self) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback.and_then(|weak| weak.upgrade()) {
            callback.on_write_data(self.buffer_size);
        }
    }

    /// Invokes the write callback up to `n` times, stopping early once the
    /// renderer is no longer running.
    pub fn pump_n(&self, n: usize) {
        for _ in 0..n {
            if !self.is_running() {
                break;
            }
            self.pump();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }

    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::Relaxed)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Number of frames enqueued over the renderer's lifetime.
    pub fn enqueued_frames(&self) -> usize {
        self.enqueued.lock().len()
    }

    /// Copy of every frame enqueued so far.
    pub fn enqueued(&self) -> Vec<Vec<u8>> {
        self.enqueued.lock().clone()
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    pub fn render_rate(&self) -> RenderRate {
        *self.rate.lock()
    }

    pub fn parallel_play(&self) -> bool {
        self.parallel.load(Ordering::Relaxed)
    }

    fn stop_pull_thread(&self) {
        // Dropping the sender disconnects the pull thread's receiver.
        self.pull_stop.lock().take();
    }
}

impl Renderer for MockRenderer {
    fn start(&self) -> bool {
        if self.fail_start {
            warn!("Mock renderer configured to fail start");
            return false;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return true;
        }
        self.starts.fetch_add(1, Ordering::Relaxed);

        if self.auto_pull {
            let (tx, rx) = bounded::<()>(1);
            *self.pull_stop.lock() = Some(tx);
            let callback = self.callback.lock().clone();
            let buffer_size = self.buffer_size;
            thread::spawn(move || loop {
                match rx.recv_timeout(PULL_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(callback) = callback.as_ref().and_then(|weak| weak.upgrade())
                        else {
                            break;
                        };
                        callback.on_write_data(buffer_size);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });
        }
        true
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::Relaxed);
        self.running.store(false, Ordering::SeqCst);
        self.stop_pull_thread();
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
        self.running.store(false, Ordering::SeqCst);
        self.stop_pull_thread();
    }

    fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
        self.stop_pull_thread();
        self.callback.lock().take();
        debug!("Mock renderer released");
    }

    fn buffer_size(&self) -> Result<usize> {
        Ok(self.buffer_size)
    }

    fn enqueue(&self, frame: &[u8]) -> Result<()> {
        self.enqueued.lock().push(frame.to_vec());
        Ok(())
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume;
    }

    fn set_render_rate(&self, rate: RenderRate) {
        *self.rate.lock() = rate;
    }

    fn set_parallel_play(&self, parallel: bool) {
        self.parallel.store(parallel, Ordering::Relaxed);
    }

    fn set_write_callback(&self, callback: Weak<dyn RendererWriteCallback>) {
        *self.callback.lock() = Some(callback);
    }

    fn flags(&self) -> RendererFlags {
        self.flags
    }
}

impl fmt::Display for MockRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} renderer (Mock)", self.flags)
    }
}

/// Factory for mock renderers, recording every instance it creates.
pub struct MockRendererFactory {
    buffer_size: usize,
    low_latency: bool,
    fail_start: bool,
    auto_pull: bool,
    created: Mutex<Vec<Arc<MockRenderer>>>,
}

impl MockRendererFactory {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            low_latency: true,
            fail_start: false,
            auto_pull: false,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Reports no low-latency support, forcing the normal render path.
    pub fn without_low_latency(mut self) -> Self {
        self.low_latency = false;
        self
    }

    /// Every created renderer will refuse to start.
    pub fn with_fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Created renderers drive the write callback from their own thread.
    pub fn with_auto_pull(mut self) -> Self {
        self.auto_pull = true;
        self
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// The `index`th renderer created by this factory.
    pub fn renderer(&self, index: usize) -> Option<Arc<MockRenderer>> {
        self.created.lock().get(index).cloned()
    }
}

impl RendererFactory for MockRendererFactory {
    fn create(&self, options: &RendererOptions) -> Result<Arc<dyn Renderer>> {
        let renderer = Arc::new(MockRenderer::new(
            options.flags,
            self.buffer_size,
            self.fail_start,
            self.auto_pull,
        ));
        debug!(flags = ?options.flags, buffer_size = self.buffer_size, "Mock renderer created");
        self.created.lock().push(renderer.clone());
        Ok(renderer)
    }

    fn supports_low_latency(&self) -> bool {
        self.low_latency
    }
}
