//! Video playback capability consumed by the controller and tail seeker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

pub mod mpv;

pub use mpv::{MpvEngine, MpvOptions};

/// Callback invoked from the backend's own thread when playback reaches
/// the end of a non-looping asset.
pub type EndListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media asset {0} not found")]
    MissingAsset(PathBuf),
    #[error("media backend rejected command: {0}")]
    Backend(String),
    #[error("media backend did not answer within {0} ms")]
    Timeout(u64),
    #[error("media backend disconnected")]
    Disconnected,
    #[error("media backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where decoded frames are presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSurface {
    /// A named monitor (e.g. `HDMI-A-2`) used fullscreen.
    Display(String),
    /// An existing native window handle to embed into.
    Window(u64),
}

/// Narrow player contract. Queries degrade to zero/`None` when the backend
/// cannot answer; commands report failures but callers treat them as best
/// effort.
pub trait MediaEngine: Send {
    /// Plays `asset` once, without looping.
    fn play(&mut self, asset: &Path) -> Result<(), MediaError>;
    /// Plays `asset` in a perpetual single-asset loop.
    fn loop_play(&mut self, asset: &Path) -> Result<(), MediaError>;
    fn stop(&mut self) -> Result<(), MediaError>;
    fn bind_output_surface(&mut self, surface: &OutputSurface) -> Result<(), MediaError>;
    /// Total duration; `0` until the asset has reported its metadata.
    fn length_ms(&self) -> u64;
    /// Current play position.
    fn time_ms(&self) -> u64;
    fn frame_rate(&self) -> Option<f32>;
    fn set_rate(&mut self, factor: f32) -> Result<(), MediaError>;
    fn set_position_fraction(&mut self, fraction: f32) -> Result<(), MediaError>;
    fn set_time_ms(&mut self, ms: u64) -> Result<(), MediaError>;
    fn pause(&mut self, paused: bool) -> Result<(), MediaError>;
    fn step_frame(&mut self) -> Result<(), MediaError>;
    fn set_output_visible(&mut self, visible: bool) -> Result<(), MediaError>;
    fn attach_end_listener(&mut self, listener: EndListener);
    fn detach_end_listener(&mut self);
    /// Releases the backend. Called once at process exit.
    fn shutdown(&mut self) {}
}
