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

//! Shared test helpers: polling, PCM fixtures, and a recording callback.

use std::collections::VecDeque;
use std::sync::Once;
use std::thread;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::error::Error;
use crate::pool::SoundPoolCallback;
use crate::sound::{AudioBufferEntry, ParsedSound, SampleFormat, TrackFormat};

static INIT_TRACING: Once = Once::new();

/// Installs a test tracing subscriber honoring `RUST_LOG`. Safe to call from
/// every test; only the first call installs.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(5);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed().expect("System time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}

/// Builds a 48kHz stereo parsed sound whose chunk queue has the given sizes,
/// filled with a recognizable non-zero byte.
pub fn make_sound(sound_id: i32, chunk_sizes: &[usize]) -> ParsedSound {
    let chunks: VecDeque<AudioBufferEntry> = chunk_sizes
        .iter()
        .map(|&n| AudioBufferEntry::new(vec![0xAB; n]))
        .collect();
    ParsedSound::new(
        sound_id,
        TrackFormat::new(48_000, 2, SampleFormat::Int),
        chunks,
    )
}

/// Pool callback that records everything it sees.
#[derive(Default)]
pub struct RecordingCallback {
    errors: Mutex<Vec<Error>>,
    finished: Mutex<Vec<i32>>,
}

impl RecordingCallback {
    pub fn errors(&self) -> Vec<Error> {
        self.errors.lock().clone()
    }

    pub fn finished(&self) -> Vec<i32> {
        self.finished.lock().clone()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.lock().len()
    }
}

impl SoundPoolCallback for RecordingCallback {
    fn on_error(&self, error: Error) {
        self.errors.lock().push(error);
    }

    fn on_play_finished(&self, stream_id: i32) {
        self.finished.lock().push(stream_id);
    }
}
