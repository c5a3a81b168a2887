//! Kiosk engine: plays a fixed narrative graph of videos, offers a
//! three-button choice after each, and fires hardware effects on entry to
//! and completion of every node.
//!
//! The [`controller::Controller`] owns all session state and runs on a
//! single task; buttons, the media backend and signals reach it through a
//! [`gate::Gate`]. Collaborators (video, HUD, serial, remote workers, cues)
//! sit behind small traits with null and real implementations.

pub mod actions;
pub mod buttons;
pub mod cli;
pub mod controller;
pub mod gate;
pub mod graph;
pub mod hardware;
pub mod inactivity;
pub mod input;
pub mod launcher;
pub mod media;
pub mod meters;
pub mod overlay;
pub mod tail_seek;
pub mod testing;

pub use actions::{ActionGuard, ActionTable};
pub use controller::{Controller, ControllerConfig, Phase, SessionState};
pub use gate::{Gate, KioskEvent};
pub use graph::{Role, StateGraph, StateId, Transition};
pub use media::MediaEngine;
pub use overlay::OverlayDisplay;
pub use tail_seek::{TailSeekConfig, TailSeeker};
