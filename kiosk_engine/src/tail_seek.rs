//! Forces playback onto its final frame and leaves it paused there.
//!
//! Some backends silently drop a single seek or round it to a keyframe far
//! from the requested time, so the seeker walks an ordered list of
//! strategies and stops at the first one that observably moves the play
//! position. Output stays blacked out until the last step so none of the
//! intermediate frames reach the screen.

use std::time::Duration;

use log::{debug, warn};
use tokio::time::{sleep, Instant};

use crate::media::{MediaEngine, MediaError};

#[derive(Debug, Clone, PartialEq)]
pub struct TailSeekConfig {
    /// How long to wait for the backend to report a duration.
    pub length_wait: Duration,
    pub length_poll: Duration,
    /// Pause after each seek before checking whether it moved.
    pub settle: Duration,
    pub default_frame_ms: u64,
    pub min_margin_ms: u64,
    pub margin_frames: u64,
    /// Extra distances from the tail tried by the absolute-time strategy.
    pub retreat_ms: Vec<u64>,
    /// Ascending fractional positions, all below 1.0.
    pub fractions: Vec<f32>,
    pub min_move_ms: u64,
    pub fast_rate: f32,
    pub fast_window: Duration,
    pub fast_poll: Duration,
    pub pause_settle: Duration,
    pub max_frame_steps: u32,
    pub step_settle: Duration,
}

impl Default for TailSeekConfig {
    fn default() -> Self {
        Self {
            length_wait: Duration::from_secs(1),
            length_poll: Duration::from_millis(20),
            settle: Duration::from_millis(60),
            default_frame_ms: 33,
            min_margin_ms: 120,
            margin_frames: 3,
            retreat_ms: vec![0, 80, 160],
            fractions: vec![0.98, 0.99, 0.995, 0.998, 0.999, 0.9995],
            min_move_ms: 40,
            fast_rate: 16.0,
            fast_window: Duration::from_millis(250),
            fast_poll: Duration::from_millis(10),
            pause_settle: Duration::from_millis(10),
            max_frame_steps: 16,
            step_settle: Duration::from_millis(12),
        }
    }
}

/// One way of pushing the play position towards the tail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekStrategy {
    AbsoluteTime(u64),
    Fraction(f32),
    /// Elevated playback rate for a bounded window, then one more seek.
    FastForward,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TailSeekReport {
    pub start_ms: u64,
    pub final_ms: u64,
    pub length_ms: u64,
    pub frame_ms: u64,
    /// Strategy that moved the position; `None` when every strategy failed.
    pub moved_by: Option<SeekStrategy>,
    pub attempts: usize,
    pub frames_stepped: u32,
}

impl TailSeekReport {
    pub fn exhausted(&self) -> bool {
        self.moved_by.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TailSeeker {
    config: TailSeekConfig,
}

impl TailSeeker {
    pub fn new(config: TailSeekConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TailSeekConfig {
        &self.config
    }

    /// Lands on the last decodable frame and pauses. Never fails: when no
    /// strategy moves the position the player is paused where it stands.
    pub async fn seek_to_tail(&self, media: &mut dyn MediaEngine) -> TailSeekReport {
        best_effort(media.set_output_visible(false), "blackout");
        best_effort(media.set_rate(1.0), "reset rate");
        best_effort(media.pause(false), "resume");

        let start_ms = media.time_ms();
        let length_ms = self.wait_for_length(media).await;
        let frame_ms = frame_duration_ms(media.frame_rate(), self.config.default_frame_ms);
        let margin_ms = (self.config.margin_frames * frame_ms).max(self.config.min_margin_ms);
        let jump_ms = self.config.min_move_ms.max(frame_ms);

        let mut attempts = 0;
        let mut moved_by = None;
        for strategy in self.plan(length_ms, margin_ms) {
            if !self.ahead_of_playhead(media, strategy) {
                continue;
            }
            attempts += 1;
            let probe = MoveProbe::start(media.time_ms(), jump_ms);
            self.apply(media, strategy, &probe, margin_ms).await;
            if probe.moved(media.time_ms()) {
                moved_by = Some(strategy);
                break;
            }
        }
        if moved_by.is_none() {
            warn!(
                "tail seek exhausted after {attempts} attempts; pausing at {} ms",
                media.time_ms()
            );
        }

        best_effort(media.pause(true), "pause");
        sleep(self.config.pause_settle).await;
        let frames_stepped = self.step_to_last_frame(media).await;

        best_effort(media.set_rate(1.0), "restore rate");
        best_effort(media.set_output_visible(true), "unblank");

        let report = TailSeekReport {
            start_ms,
            final_ms: media.time_ms(),
            length_ms,
            frame_ms,
            moved_by,
            attempts,
            frames_stepped,
        };
        debug!("tail seek finished: {report:?}");
        report
    }

    /// Strategies in escalation order.
    pub fn plan(&self, length_ms: u64, margin_ms: u64) -> Vec<SeekStrategy> {
        let mut plan = Vec::new();
        if length_ms > 0 {
            plan.extend(self.config.retreat_ms.iter().map(|retreat| {
                SeekStrategy::AbsoluteTime(length_ms.saturating_sub(margin_ms + retreat))
            }));
        }
        plan.extend(
            self.config
                .fractions
                .iter()
                .copied()
                .filter(|fraction| *fraction > 0.0 && *fraction < 1.0)
                .map(SeekStrategy::Fraction),
        );
        plan.push(SeekStrategy::FastForward);
        plan
    }

    async fn wait_for_length(&self, media: &mut dyn MediaEngine) -> u64 {
        let deadline = Instant::now() + self.config.length_wait;
        let mut length = media.length_ms();
        while length == 0 && Instant::now() < deadline {
            sleep(self.config.length_poll).await;
            length = media.length_ms();
        }
        if length == 0 {
            debug!("media length unavailable; only fast forward can reach the tail");
        }
        length
    }

    // Seeks that cannot be shown to land ahead of the playhead are skipped
    // so the position never moves backwards. The duration is read fresh
    // because a backend may only start reporting it partway through.
    fn ahead_of_playhead(&self, media: &dyn MediaEngine, strategy: SeekStrategy) -> bool {
        let now = media.time_ms();
        match strategy {
            SeekStrategy::AbsoluteTime(target) => target > now,
            SeekStrategy::Fraction(fraction) => {
                fraction_target_ms(fraction, media.length_ms()).is_some_and(|target| target > now)
            }
            SeekStrategy::FastForward => true,
        }
    }

    async fn apply(
        &self,
        media: &mut dyn MediaEngine,
        strategy: SeekStrategy,
        probe: &MoveProbe,
        margin_ms: u64,
    ) {
        match strategy {
            SeekStrategy::AbsoluteTime(target) => {
                best_effort(media.set_time_ms(target), "absolute seek");
                sleep(self.config.settle).await;
            }
            SeekStrategy::Fraction(fraction) => {
                best_effort(media.set_position_fraction(fraction), "fractional seek");
                sleep(self.config.settle).await;
            }
            SeekStrategy::FastForward => {
                best_effort(media.set_rate(self.config.fast_rate), "fast forward");
                let deadline = Instant::now() + self.config.fast_window;
                while Instant::now() < deadline && !probe.moved(media.time_ms()) {
                    sleep(self.config.fast_poll).await;
                }
                best_effort(media.set_rate(1.0), "restore rate");

                let length_ms = media.length_ms();
                let tail_ms = length_ms.saturating_sub(margin_ms);
                if length_ms > 0 && tail_ms > media.time_ms() {
                    best_effort(media.set_time_ms(tail_ms), "final seek");
                } else {
                    debug!("final seek skipped; tail not known to be ahead");
                }
                sleep(self.config.settle).await;
            }
        }
    }

    // Single-steps until the position stops advancing, which is the last
    // frame the decoder can produce.
    async fn step_to_last_frame(&self, media: &mut dyn MediaEngine) -> u32 {
        let mut last_ms = media.time_ms();
        let mut stepped = 0;
        for _ in 0..self.config.max_frame_steps {
            if media.step_frame().is_err() {
                break;
            }
            sleep(self.config.step_settle).await;
            let now = media.time_ms();
            if now <= last_ms {
                break;
            }
            last_ms = now;
            stepped += 1;
        }
        stepped
    }
}

/// Shared "did it move" predicate. A seek only counts when the playhead
/// lands more than one frame beyond where normal playback would have
/// carried it during the attempt.
struct MoveProbe {
    before_ms: u64,
    jump_ms: u64,
    started: Instant,
}

impl MoveProbe {
    fn start(before_ms: u64, jump_ms: u64) -> Self {
        Self {
            before_ms,
            jump_ms,
            started: Instant::now(),
        }
    }

    fn moved(&self, now_ms: u64) -> bool {
        let natural_ms = self.started.elapsed().as_millis() as u64;
        now_ms > self.before_ms + natural_ms + self.jump_ms
    }
}

/// Playhead position a fractional seek resolves to; `None` while the
/// duration is unknown.
fn fraction_target_ms(fraction: f32, length_ms: u64) -> Option<u64> {
    (length_ms > 0).then(|| (fraction as f64 * length_ms as f64) as u64)
}

/// Per-frame duration estimate, bounded to 10..=100 ms.
pub fn frame_duration_ms(frame_rate: Option<f32>, default_ms: u64) -> u64 {
    match frame_rate {
        Some(fps) if fps > 1.0 => ((1000.0 / fps).round() as u64).clamp(10, 100),
        _ => default_ms,
    }
}

fn best_effort(result: Result<(), MediaError>, what: &str) {
    if let Err(err) = result {
        debug!("tail seek {what} failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration_uses_rate_when_plausible() {
        assert_eq!(frame_duration_ms(Some(25.0), 33), 40);
        assert_eq!(frame_duration_ms(Some(30.0), 33), 33);
        assert_eq!(frame_duration_ms(Some(240.0), 33), 10);
        assert_eq!(frame_duration_ms(Some(0.5), 33), 33);
        assert_eq!(frame_duration_ms(None, 33), 33);
    }

    #[test]
    fn plan_escalates_from_absolute_to_fast_forward() {
        let seeker = TailSeeker::default();
        let plan = seeker.plan(10_000, 120);
        assert_eq!(plan[0], SeekStrategy::AbsoluteTime(9_880));
        assert_eq!(plan[1], SeekStrategy::AbsoluteTime(9_800));
        assert_eq!(plan[2], SeekStrategy::AbsoluteTime(9_720));
        assert_eq!(plan[3], SeekStrategy::Fraction(0.98));
        assert_eq!(plan.last(), Some(&SeekStrategy::FastForward));
        assert_eq!(plan.len(), 3 + 6 + 1);
    }

    #[test]
    fn plan_without_length_skips_absolute_seeks() {
        let plan = TailSeeker::default().plan(0, 120);
        assert!(plan
            .iter()
            .all(|strategy| !matches!(strategy, SeekStrategy::AbsoluteTime(_))));
        assert_eq!(plan.len(), 7);
    }

    #[test]
    fn fraction_targets_need_a_known_length() {
        assert_eq!(fraction_target_ms(0.99, 0), None);
        assert_eq!(fraction_target_ms(0.99, 10_000), Some(9_900));
    }
}
