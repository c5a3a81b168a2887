//! Playback/choice state machine.
//!
//! A session alternates between playing a node's video and waiting for the
//! visitor's choice. Every mutation runs on the task that owns the
//! [`Controller`]; external events reach it through the [`Gate`].

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::time::Instant;

use crate::actions::ActionGuard;
use crate::gate::{Gate, KioskEvent};
use crate::graph::{Role, StateGraph, StateId, StateNode, Transition, UnknownStateError};
use crate::inactivity::InactivityTimer;
use crate::input::{InputRouter, RoutedAction};
use crate::media::{MediaEngine, MediaError, OutputSurface};
use crate::meters::Meters;
use crate::overlay::OverlayDisplay;
use crate::tail_seek::{TailSeekConfig, TailSeekReport, TailSeeker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Playing,
    AwaitingChoice,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub current: StateId,
    pub phase: Phase,
    /// Whether the last completion came from a skip rather than the video
    /// reaching its end.
    pub last_skipped: bool,
    pub meters: Meters,
    /// Set while a transition is in progress; other triggers are rejected.
    pub transitioning: bool,
    /// Identifies the current playback; end events from older playbacks
    /// are stale.
    pub epoch: u64,
    /// When the most recent transition finished.
    pub settled_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnterError {
    #[error("transition already in progress")]
    Reentrant,
    #[error(transparent)]
    Unknown(#[from] UnknownStateError),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub inactivity: Duration,
    pub tail_seek: TailSeekConfig,
    /// Surface bound once when the controller starts.
    pub surface: Option<OutputSurface>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            inactivity: Duration::from_secs(90),
            tail_seek: TailSeekConfig::default(),
            surface: None,
        }
    }
}

pub struct Controller {
    graph: Arc<StateGraph>,
    media: Box<dyn MediaEngine>,
    overlay: Arc<dyn OverlayDisplay>,
    actions: ActionGuard,
    seeker: TailSeeker,
    timer: InactivityTimer,
    router: InputRouter,
    gate: Gate,
    surface: Option<OutputSurface>,
    session: SessionState,
}

impl Controller {
    pub fn new(
        graph: Arc<StateGraph>,
        media: Box<dyn MediaEngine>,
        overlay: Arc<dyn OverlayDisplay>,
        actions: ActionGuard,
        gate: Gate,
        config: ControllerConfig,
    ) -> Self {
        let session = SessionState {
            current: StateId::root(),
            phase: Phase::Playing,
            last_skipped: false,
            meters: Meters::baseline(graph.meters()),
            transitioning: false,
            epoch: 0,
            settled_at: Instant::now(),
        };
        Self {
            graph,
            media,
            overlay,
            actions,
            seeker: TailSeeker::new(config.tail_seek),
            timer: InactivityTimer::new(config.inactivity),
            router: InputRouter,
            gate,
            surface: config.surface,
            session,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn inactivity(&self) -> &InactivityTimer {
        &self.timer
    }

    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    pub fn actions(&self) -> &ActionGuard {
        &self.actions
    }

    /// Binds the output surface and enters the baseline loop.
    pub fn start(&mut self) {
        if let Some(surface) = self.surface.clone() {
            if let Err(err) = self.media.bind_output_surface(&surface) {
                warn!("could not bind video output to {surface:?}: {err}");
            }
        }
        if let Err(err) = self.enter_state(&Transition::Restart) {
            error!("cannot enter baseline: {err}");
        }
    }

    pub fn enter_state(&mut self, transition: &Transition) -> Result<(), EnterError> {
        let graph = Arc::clone(&self.graph);
        let node = match graph.resolve_transition(transition) {
            Ok(node) => node,
            Err(err) => {
                warn!("{err}; staying on {}", self.session.current);
                return Err(err.into());
            }
        };
        if self.session.transitioning {
            debug!("ignoring transition to {} while another is running", node.id);
            return Err(EnterError::Reentrant);
        }
        self.session.transitioning = true;
        self.timer.cancel();

        let config = graph.meters();
        let meters = if node.is_root() {
            Meters::baseline(config)
        } else {
            self.session.meters.apply(config, node.temp_delta, node.money_delta)
        };
        self.push_navigation(node, &meters);

        self.actions.reset();
        self.actions.pre(&node.id);

        info!("-> {}", node.id);
        let playable = self.start_playback(node);

        self.session.current = node.id.clone();
        self.session.phase = Phase::Playing;
        self.session.last_skipped = false;
        self.session.meters = meters;
        self.session.transitioning = false;
        self.session.settled_at = Instant::now();

        if !playable {
            self.on_video_end(self.session.epoch);
        }
        Ok(())
    }

    fn push_navigation(&self, node: &StateNode, meters: &Meters) {
        let sprite = self
            .graph
            .sprite_path(&node.sprite)
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| node.sprite.clone());
        self.overlay.navigate(&sprite, &node.during_labels);
        let (temp_pct, money_pct) = meters.percentages(self.graph.meters());
        self.overlay.set_meters(temp_pct, money_pct);
    }

    /// Returns `false` when a non-looping video could not start, in which
    /// case the caller treats it as already finished.
    fn start_playback(&mut self, node: &StateNode) -> bool {
        self.media.detach_end_listener();
        self.session.epoch += 1;
        let asset = self.graph.video_path(node);

        if node.is_root() {
            if let Err(err) = self.media.loop_play(&asset) {
                error!("baseline loop failed to start: {err}");
            }
            return true;
        }

        let epoch = self.session.epoch;
        let gate = self.gate.clone();
        self.media.attach_end_listener(Arc::new(move || {
            gate.media_ended(epoch);
        }));
        match self.media.play(&asset) {
            Ok(()) => true,
            Err(MediaError::MissingAsset(path)) => {
                warn!("video {} missing; treating {} as finished", path.display(), node.id);
                self.media.detach_end_listener();
                false
            }
            Err(err) => {
                warn!("video for {} failed to start: {err}; treating it as finished", node.id);
                self.media.detach_end_listener();
                false
            }
        }
    }

    /// Natural end of the current video.
    pub fn on_video_end(&mut self, epoch: u64) {
        if epoch != self.session.epoch {
            debug!("stale end of media (epoch {epoch}, now {})", self.session.epoch);
            return;
        }
        if self.session.current.is_root() || self.session.phase != Phase::Playing {
            return;
        }
        if self.session.transitioning {
            debug!("end of media during a transition ignored");
            return;
        }
        info!("video end at {}", self.session.current);
        self.session.last_skipped = false;
        self.expose_choice();
    }

    /// Jumps the current video to its last frame and shows the choice.
    pub async fn skip_current(&mut self) -> Option<TailSeekReport> {
        if self.session.current.is_root() || self.session.phase != Phase::Playing {
            return None;
        }
        if self.session.transitioning {
            debug!("skip ignored while another transition is running");
            return None;
        }
        self.session.transitioning = true;
        self.session.last_skipped = true;
        info!("skip {}", self.session.current);

        // A true end of media racing this skip must not fire a second time.
        self.media.detach_end_listener();
        self.session.epoch += 1;

        let report = self.seeker.seek_to_tail(self.media.as_mut()).await;
        if report.exhausted() {
            warn!(
                "tail seek for {} could not move playback; paused at {} ms",
                self.session.current, report.final_ms
            );
        }

        self.session.transitioning = false;
        self.expose_choice();
        self.session.settled_at = Instant::now();
        Some(report)
    }

    fn expose_choice(&mut self) {
        let graph = Arc::clone(&self.graph);
        let node = match graph.resolve(&self.session.current) {
            Ok(node) => node,
            Err(err) => {
                error!("current state vanished: {err}");
                return;
            }
        };
        self.actions.post(&node.id, self.session.last_skipped);
        self.session.phase = Phase::AwaitingChoice;

        let labels = node.end_labels_or_blank();
        self.overlay.set_labels(&labels);
        let actionable = node.has_actionable_choice();
        info!(
            "choice at {}: labels={labels:?} actionable={actionable}",
            node.id
        );
        if actionable {
            self.timer.arm();
        } else {
            self.timer.cancel();
        }
    }

    pub async fn on_input(&mut self, role: Role) {
        let graph = Arc::clone(&self.graph);
        let node = match graph.resolve(&self.session.current) {
            Ok(node) => node,
            Err(err) => {
                error!("press on unknown state: {err}");
                return;
            }
        };
        let press = self.router.route(role, self.session.phase, node);
        // a dead-end node never runs the countdown
        if press.bump && node.has_actionable_choice() {
            self.timer.bump();
        }
        match press.action {
            RoutedAction::Enter(transition) => {
                let _ = self.enter_state(&transition);
            }
            RoutedAction::Skip => {
                self.skip_current().await;
            }
            RoutedAction::Ignore => debug!("{role} press ignored at {}", node.id),
        }
    }

    pub fn inactivity_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Idle visitor: same effect as pressing Right on a Restart label.
    pub fn on_inactivity_expired(&mut self) {
        if !self.timer.expired(Instant::now()) {
            return;
        }
        info!(
            "no input for {:?} at {}; restarting",
            self.timer.duration(),
            self.session.current
        );
        self.timer.cancel();
        let _ = self.enter_state(&Transition::Restart);
    }

    pub async fn handle(&mut self, event: KioskEvent) {
        match event {
            KioskEvent::Press { role, posted_at } => {
                if self.session.transitioning || posted_at < self.session.settled_at {
                    debug!("dropping {role} press queued during a transition");
                    return;
                }
                self.on_input(role).await;
            }
            KioskEvent::MediaEnded { epoch } => self.on_video_end(epoch),
            KioskEvent::Shutdown => {}
        }
    }

    /// Stops playback and releases every collaborator.
    pub fn shutdown(&mut self) {
        self.timer.cancel();
        self.media.detach_end_listener();
        if let Err(err) = self.media.stop() {
            debug!("stopping playback failed: {err}");
        }
        self.media.shutdown();
        self.actions.hardware().shutdown();
        info!("controller shut down at {}", self.session.current);
    }
}
