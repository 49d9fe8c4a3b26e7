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

/// Typed errors for playback and scheduling so callers can distinguish a stale
/// stream handle from a backend failure without string matching. Clone so the
/// same error can be returned and fanned out to the pool callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The stream ID does not identify a live stream of this pool.
    #[error("Unknown or stale stream ID {0}")]
    InvalidStream(i32),

    /// No renderer has been created for the stream yet.
    #[error("No renderer is available for stream {0}")]
    RendererUnavailable(i32),

    /// The decoded cache holds no PCM data to play.
    #[error("Sound {0} has no cached PCM data")]
    EmptyCache(i32),

    /// The audio backend refused to start the renderer.
    #[error("Renderer failed to start for stream {0}")]
    RendererStartFailed(i32),

    /// The play worker pool could not be constructed.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// The pool has been released and accepts no further commands.
    #[error("Sound pool has been released")]
    Released,
}

pub type Result<T> = std::result::Result<T, Error>;
