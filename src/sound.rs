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

//! Decoded sound data types.
//!
//! A sound parser (out of scope for this crate) decodes an audio asset into a
//! queue of raw PCM chunks plus a track format. These types carry that decoded
//! data into the playback engine.

use std::collections::VecDeque;
use std::fmt;

/// Sample format of decoded PCM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Integer samples (e.g., 16-bit, 24-bit, 32-bit)
    Int,
    /// Floating point samples (e.g., 32-bit float)
    Float,
}

impl SampleFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::Int => "int",
            SampleFormat::Float => "float",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Track format of a decoded sound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channel_count: u16,
    /// Sample format of the PCM data.
    pub sample_format: SampleFormat,
}

impl TrackFormat {
    pub fn new(sample_rate: u32, channel_count: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channel_count,
            sample_format,
        }
    }
}

/// One raw PCM chunk. Immutable after creation; chunk boundaries are whatever
/// the decoder produced and carry no meaning of their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBufferEntry {
    data: Vec<u8>,
}

impl AudioBufferEntry {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns the chunk size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// The product of the sound parser: a decoded sound identified by its sound ID,
/// with its track format and the decoded PCM chunk queue.
pub struct ParsedSound {
    sound_id: i32,
    format: TrackFormat,
    chunks: VecDeque<AudioBufferEntry>,
    total_size: usize,
}

impl ParsedSound {
    /// Creates a parsed sound from a decoded chunk queue.
    pub fn new(sound_id: i32, format: TrackFormat, chunks: VecDeque<AudioBufferEntry>) -> Self {
        let total_size = chunks.iter().map(|c| c.size()).sum();
        Self {
            sound_id,
            format,
            chunks,
            total_size,
        }
    }

    /// Creates a parsed sound from one contiguous PCM buffer, splitting it into
    /// chunks of at most `chunk_size` bytes.
    pub fn from_pcm(sound_id: i32, format: TrackFormat, pcm: &[u8], chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunks = pcm
            .chunks(chunk_size)
            .map(|c| AudioBufferEntry::new(c.to_vec()))
            .collect();
        Self::new(sound_id, format, chunks)
    }

    pub fn sound_id(&self) -> i32 {
        self.sound_id
    }

    pub fn format(&self) -> TrackFormat {
        self.format
    }

    /// Total decoded size in bytes across all chunks.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Consumes the sound, yielding its chunk queue.
    pub fn into_chunks(self) -> VecDeque<AudioBufferEntry> {
        self.chunks
    }
}

impl fmt::Debug for ParsedSound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedSound")
            .field("sound_id", &self.sound_id)
            .field("chunks", &self.chunks.len())
            .field("total_size", &self.total_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_sound_total_size() {
        let chunks: VecDeque<AudioBufferEntry> = [40usize, 35, 25]
            .iter()
            .map(|&n| AudioBufferEntry::new(vec![1u8; n]))
            .collect();
        let sound = ParsedSound::new(
            7,
            TrackFormat::new(48_000, 2, SampleFormat::Int),
            chunks,
        );
        assert_eq!(sound.total_size(), 100);
        assert_eq!(sound.sound_id(), 7);
    }

    #[test]
    fn test_from_pcm_chunking() {
        let pcm = vec![3u8; 100];
        let sound = ParsedSound::from_pcm(1, TrackFormat::new(44_100, 1, SampleFormat::Int), &pcm, 30);
        assert_eq!(sound.total_size(), 100);
        let chunks = sound.into_chunks();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3].size(), 10);
    }
}
