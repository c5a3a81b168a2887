//! Scripted and recording collaborators for tests and bench runs.
//!
//! Everything here is driven by `tokio::time`, so tests running on a paused
//! clock see exact, deterministic timings.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::graph::Labels;
use crate::hardware::{CueOutput, Hardware, HardwareBus, RemoteWorkerControl};
use crate::media::{EndListener, MediaEngine, MediaError, OutputSurface};
use crate::overlay::OverlayDisplay;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Which seek primitives the scripted player actually honours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekFidelity {
    pub set_time: bool,
    pub fraction: bool,
    pub rate: bool,
    pub step: bool,
    /// Time after playback starts before a duration is reported.
    pub length_delay: Duration,
}

impl SeekFidelity {
    pub fn perfect() -> Self {
        Self {
            set_time: true,
            fraction: true,
            rate: true,
            step: true,
            length_delay: Duration::ZERO,
        }
    }

    /// Ignores every seek; only playback rate changes have an effect.
    pub fn rate_only() -> Self {
        Self {
            set_time: false,
            fraction: false,
            ..Self::perfect()
        }
    }

    /// Ignores every repositioning primitive.
    pub fn deaf() -> Self {
        Self {
            set_time: false,
            fraction: false,
            rate: false,
            step: false,
            length_delay: Duration::ZERO,
        }
    }
}

impl Default for SeekFidelity {
    fn default() -> Self {
        Self::perfect()
    }
}

/// Playhead positions read immediately around one seek primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekMove {
    pub call: MediaCall,
    pub before_ms: u64,
    pub after_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    Play(PathBuf),
    LoopPlay(PathBuf),
    Stop,
    Bind(OutputSurface),
    SetRate(f32),
    SetFraction(f32),
    SetTime(u64),
    Pause(bool),
    Step,
    Visible(bool),
    Attach,
    Detach,
    Shutdown,
}

struct Model {
    length_ms: u64,
    frame_rate: Option<f32>,
    fidelity: SeekFidelity,
    missing: HashSet<PathBuf>,
    asset: Option<PathBuf>,
    looping: bool,
    started_at: Instant,
    anchor_ms: f64,
    anchor_at: Instant,
    rate: f32,
    paused: bool,
    visible: bool,
    listener: Option<EndListener>,
    calls: Vec<MediaCall>,
    positions: Vec<u64>,
    seeks: Vec<SeekMove>,
}

impl Model {
    fn frame_ms(&self) -> u64 {
        crate::tail_seek::frame_duration_ms(self.frame_rate, 33)
    }

    fn last_frame_ms(&self) -> f64 {
        self.length_ms.saturating_sub(self.frame_ms()) as f64
    }

    fn position(&self, now: Instant) -> f64 {
        if self.asset.is_none() {
            return 0.0;
        }
        let elapsed = if self.paused {
            0.0
        } else {
            now.saturating_duration_since(self.anchor_at).as_secs_f64() * 1000.0 * self.rate as f64
        };
        let raw = self.anchor_ms + elapsed;
        if self.looping && self.length_ms > 0 {
            raw % self.length_ms as f64
        } else {
            raw.min(self.last_frame_ms())
        }
    }

    // Folds elapsed playback into the anchor before any state change.
    fn reanchor(&mut self) {
        let now = Instant::now();
        self.anchor_ms = self.position(now);
        self.anchor_at = now;
    }

    fn jump_to(&mut self, target_ms: f64) {
        self.reanchor();
        self.anchor_ms = target_ms.clamp(0.0, self.last_frame_ms());
    }

    fn log_seek(&mut self, call: MediaCall, before_ms: u64) {
        let after_ms = self.position(Instant::now()) as u64;
        self.seeks.push(SeekMove {
            call,
            before_ms,
            after_ms,
        });
    }

    fn length_known(&self) -> bool {
        Instant::now().saturating_duration_since(self.started_at) >= self.fidelity.length_delay
    }

    fn load(&mut self, asset: &Path, looping: bool) -> Result<(), MediaError> {
        if self.missing.contains(asset) {
            return Err(MediaError::MissingAsset(asset.to_path_buf()));
        }
        let now = Instant::now();
        self.asset = Some(asset.to_path_buf());
        self.looping = looping;
        self.started_at = now;
        self.anchor_ms = 0.0;
        self.anchor_at = now;
        self.rate = 1.0;
        self.paused = false;
        Ok(())
    }
}

/// Virtual-clock player. Clones share one underlying model, so a test can
/// keep a handle while the controller owns another.
#[derive(Clone)]
pub struct ScriptedMedia {
    model: Arc<Mutex<Model>>,
}

impl ScriptedMedia {
    pub fn new(length_ms: u64, frame_rate: Option<f32>, fidelity: SeekFidelity) -> Self {
        let now = Instant::now();
        Self {
            model: Arc::new(Mutex::new(Model {
                length_ms,
                frame_rate,
                fidelity,
                missing: HashSet::new(),
                asset: None,
                looping: false,
                started_at: now,
                anchor_ms: 0.0,
                anchor_at: now,
                rate: 1.0,
                paused: false,
                visible: true,
                listener: None,
                calls: Vec::new(),
                positions: Vec::new(),
                seeks: Vec::new(),
            })),
        }
    }

    /// Plays of `asset` fail with [`MediaError::MissingAsset`].
    pub fn mark_missing(&self, asset: impl Into<PathBuf>) {
        lock(&self.model).missing.insert(asset.into());
    }

    pub fn set_fidelity(&self, fidelity: SeekFidelity) {
        lock(&self.model).fidelity = fidelity;
    }

    /// Simulates the video reaching its end: fires the attached listener,
    /// if any. Returns whether a listener was attached.
    pub fn finish(&self) -> bool {
        let listener = {
            let mut model = lock(&self.model);
            let last = model.last_frame_ms();
            model.jump_to(last);
            model.listener.clone()
        };
        match listener {
            Some(listener) => {
                listener();
                true
            }
            None => false,
        }
    }

    pub fn calls(&self) -> Vec<MediaCall> {
        lock(&self.model).calls.clone()
    }

    pub fn clear_calls(&self) {
        let mut model = lock(&self.model);
        model.calls.clear();
        model.positions.clear();
        model.seeks.clear();
    }

    /// Every time and fraction seek, with the position on either side.
    pub fn seek_moves(&self) -> Vec<SeekMove> {
        lock(&self.model).seeks.clone()
    }

    /// Every position reported through [`MediaEngine::time_ms`].
    pub fn positions(&self) -> Vec<u64> {
        lock(&self.model).positions.clone()
    }

    pub fn current_asset(&self) -> Option<PathBuf> {
        lock(&self.model).asset.clone()
    }

    pub fn is_looping(&self) -> bool {
        lock(&self.model).looping
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.model).paused
    }

    pub fn is_visible(&self) -> bool {
        lock(&self.model).visible
    }

    pub fn rate(&self) -> f32 {
        lock(&self.model).rate
    }

    pub fn has_listener(&self) -> bool {
        lock(&self.model).listener.is_some()
    }

    pub fn position_ms(&self) -> u64 {
        lock(&self.model).position(Instant::now()) as u64
    }

    pub fn last_frame_ms(&self) -> u64 {
        lock(&self.model).last_frame_ms() as u64
    }

    fn record(&self, call: MediaCall) -> MutexGuard<'_, Model> {
        let mut model = lock(&self.model);
        model.calls.push(call);
        model
    }
}

impl MediaEngine for ScriptedMedia {
    fn play(&mut self, asset: &Path) -> Result<(), MediaError> {
        let mut model = self.record(MediaCall::Play(asset.to_path_buf()));
        model.load(asset, false)
    }

    fn loop_play(&mut self, asset: &Path) -> Result<(), MediaError> {
        let mut model = self.record(MediaCall::LoopPlay(asset.to_path_buf()));
        model.load(asset, true)
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        self.record(MediaCall::Stop).asset = None;
        Ok(())
    }

    fn bind_output_surface(&mut self, surface: &OutputSurface) -> Result<(), MediaError> {
        drop(self.record(MediaCall::Bind(surface.clone())));
        Ok(())
    }

    fn length_ms(&self) -> u64 {
        let model = lock(&self.model);
        if model.asset.is_some() && model.length_known() {
            model.length_ms
        } else {
            0
        }
    }

    fn time_ms(&self) -> u64 {
        let mut model = lock(&self.model);
        let position = model.position(Instant::now()) as u64;
        model.positions.push(position);
        position
    }

    fn frame_rate(&self) -> Option<f32> {
        lock(&self.model).frame_rate
    }

    fn set_rate(&mut self, factor: f32) -> Result<(), MediaError> {
        let mut model = self.record(MediaCall::SetRate(factor));
        if model.fidelity.rate {
            model.reanchor();
            model.rate = factor;
        }
        Ok(())
    }

    fn set_position_fraction(&mut self, fraction: f32) -> Result<(), MediaError> {
        let call = MediaCall::SetFraction(fraction);
        let mut model = self.record(call.clone());
        let before_ms = model.position(Instant::now()) as u64;
        if model.fidelity.fraction && model.length_known() {
            let target = fraction as f64 * model.length_ms as f64;
            model.jump_to(target);
        }
        model.log_seek(call, before_ms);
        Ok(())
    }

    fn set_time_ms(&mut self, ms: u64) -> Result<(), MediaError> {
        let call = MediaCall::SetTime(ms);
        let mut model = self.record(call.clone());
        let before_ms = model.position(Instant::now()) as u64;
        if model.fidelity.set_time {
            model.jump_to(ms as f64);
        }
        model.log_seek(call, before_ms);
        Ok(())
    }

    fn pause(&mut self, paused: bool) -> Result<(), MediaError> {
        let mut model = self.record(MediaCall::Pause(paused));
        model.reanchor();
        model.paused = paused;
        Ok(())
    }

    fn step_frame(&mut self) -> Result<(), MediaError> {
        let mut model = self.record(MediaCall::Step);
        if !model.fidelity.step {
            return Err(MediaError::Backend("frame stepping unsupported".to_string()));
        }
        model.reanchor();
        let next = model.anchor_ms + model.frame_ms() as f64;
        model.anchor_ms = next.min(model.last_frame_ms());
        Ok(())
    }

    fn set_output_visible(&mut self, visible: bool) -> Result<(), MediaError> {
        self.record(MediaCall::Visible(visible)).visible = visible;
        Ok(())
    }

    fn attach_end_listener(&mut self, listener: EndListener) {
        self.record(MediaCall::Attach).listener = Some(listener);
    }

    fn detach_end_listener(&mut self) {
        self.record(MediaCall::Detach).listener = None;
    }

    fn shutdown(&mut self) {
        drop(self.record(MediaCall::Shutdown));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayCall {
    Navigate(String, Labels),
    Labels(Labels),
    Meters(u8, u8),
}

#[derive(Clone, Default)]
pub struct RecordingOverlay {
    calls: Arc<Mutex<Vec<OverlayCall>>>,
}

impl RecordingOverlay {
    pub fn calls(&self) -> Vec<OverlayCall> {
        lock(&self.calls).clone()
    }

    pub fn last_labels(&self) -> Option<Labels> {
        lock(&self.calls).iter().rev().find_map(|call| match call {
            OverlayCall::Labels(labels) | OverlayCall::Navigate(_, labels) => Some(labels.clone()),
            OverlayCall::Meters(..) => None,
        })
    }

    pub fn last_meters(&self) -> Option<(u8, u8)> {
        lock(&self.calls).iter().rev().find_map(|call| match call {
            OverlayCall::Meters(temp, money) => Some((*temp, *money)),
            _ => None,
        })
    }
}

impl OverlayDisplay for RecordingOverlay {
    fn navigate(&self, sprite: &str, labels: &Labels) {
        lock(&self.calls).push(OverlayCall::Navigate(sprite.to_string(), labels.clone()));
    }

    fn set_labels(&self, labels: &Labels) {
        lock(&self.calls).push(OverlayCall::Labels(labels.clone()));
    }

    fn set_meters(&self, temp_pct: u8, money_pct: u8) {
        lock(&self.calls).push(OverlayCall::Meters(temp_pct, money_pct));
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareCall {
    Serial(Vec<String>, Duration),
    WorkersStart,
    WorkersStop,
    Cue(String, i32),
    Close,
}

/// Records every hardware command in dispatch order across bus, workers
/// and cues.
#[derive(Clone, Default)]
pub struct RecordingHardware {
    calls: Arc<Mutex<Vec<HardwareCall>>>,
}

impl RecordingHardware {
    pub fn hardware(&self) -> Hardware {
        Hardware {
            bus: Arc::new(self.clone()),
            workers: Arc::new(self.clone()),
            cues: Arc::new(self.clone()),
        }
    }

    pub fn calls(&self) -> Vec<HardwareCall> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    pub fn count(&self, call: &HardwareCall) -> usize {
        lock(&self.calls).iter().filter(|seen| *seen == call).count()
    }
}

impl HardwareBus for RecordingHardware {
    fn send_sequence(&self, commands: &[String], gap: Duration) {
        lock(&self.calls).push(HardwareCall::Serial(commands.to_vec(), gap));
    }

    fn close(&self) {
        lock(&self.calls).push(HardwareCall::Close);
    }
}

impl RemoteWorkerControl for RecordingHardware {
    fn start(&self) {
        lock(&self.calls).push(HardwareCall::WorkersStart);
    }

    fn stop(&self) {
        lock(&self.calls).push(HardwareCall::WorkersStop);
    }
}

impl CueOutput for RecordingHardware {
    fn send(&self, address: &str, value: i32) {
        lock(&self.calls).push(HardwareCall::Cue(address.to_string(), value));
    }
}
