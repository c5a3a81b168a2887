use std::path::Path;
use std::time::Duration;

use kiosk_engine::media::MediaEngine;
use kiosk_engine::tail_seek::{SeekStrategy, TailSeekConfig, TailSeeker};
use kiosk_engine::testing::{MediaCall, ScriptedMedia, SeekFidelity};
use tokio::time::{advance, Instant};

async fn playing(fidelity: SeekFidelity, head_start: Duration) -> ScriptedMedia {
    let mut media = ScriptedMedia::new(10_000, Some(30.0), fidelity);
    media
        .play(Path::new("/kiosk/lola/2.mkv"))
        .expect("scripted play succeeds");
    advance(head_start).await;
    media.clear_calls();
    media
}

fn assert_never_rewinds(media: &ScriptedMedia) {
    let positions = media.positions();
    assert!(!positions.is_empty());
    for pair in positions.windows(2) {
        assert!(pair[1] >= pair[0], "position went backwards: {positions:?}");
    }
}

fn visibility(media: &ScriptedMedia) -> Vec<bool> {
    media
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            MediaCall::Visible(visible) => Some(visible),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn honest_backend_lands_on_last_frame() {
    let mut media = playing(SeekFidelity::perfect(), Duration::from_secs(2)).await;
    let report = TailSeeker::default().seek_to_tail(&mut media).await;

    assert_eq!(report.start_ms, 2_000);
    assert_eq!(report.moved_by, Some(SeekStrategy::AbsoluteTime(9_880)));
    assert_eq!(report.attempts, 1);
    assert_eq!(report.final_ms, media.last_frame_ms());
    assert_eq!(report.frames_stepped, 1);
    assert!(media.is_paused());
    assert_eq!(media.rate(), 1.0);
    assert_eq!(visibility(&media), vec![false, true]);
    assert_eq!(media.calls().first(), Some(&MediaCall::Visible(false)));
    assert_eq!(media.calls().last(), Some(&MediaCall::Visible(true)));
    assert_never_rewinds(&media);
}

#[tokio::test(start_paused = true)]
async fn ignored_seeks_escalate_to_fast_forward() {
    let mut media = playing(SeekFidelity::rate_only(), Duration::from_secs(2)).await;
    let report = TailSeeker::default().seek_to_tail(&mut media).await;

    assert_eq!(report.moved_by, Some(SeekStrategy::FastForward));
    assert_eq!(report.attempts, 3 + 6 + 1);
    assert!(report.final_ms > report.start_ms);
    assert!(media.is_paused());
    assert_eq!(media.rate(), 1.0);
    assert!(media.calls().contains(&MediaCall::SetRate(16.0)));
    assert!(media.is_visible());
    assert_never_rewinds(&media);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_backend_still_ends_paused_within_bounds() {
    let mut media = playing(SeekFidelity::deaf(), Duration::from_secs(2)).await;
    let started = Instant::now();
    let report = TailSeeker::default().seek_to_tail(&mut media).await;

    assert!(report.exhausted());
    assert_eq!(report.frames_stepped, 0);
    assert!(report.final_ms >= report.start_ms);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(media.is_paused());
    assert!(media.is_visible());
    assert_never_rewinds(&media);
}

#[tokio::test(start_paused = true)]
async fn waits_briefly_for_a_late_duration() {
    let fidelity = SeekFidelity {
        length_delay: Duration::from_millis(300),
        ..SeekFidelity::perfect()
    };
    let mut media = playing(fidelity, Duration::ZERO).await;
    let report = TailSeeker::default().seek_to_tail(&mut media).await;

    assert_eq!(report.length_ms, 10_000);
    assert!(matches!(report.moved_by, Some(SeekStrategy::AbsoluteTime(_))));
    assert_eq!(report.final_ms, media.last_frame_ms());
}

#[tokio::test(start_paused = true)]
async fn unknown_duration_relies_on_fast_forward() {
    let fidelity = SeekFidelity {
        length_delay: Duration::from_secs(30),
        ..SeekFidelity::perfect()
    };
    let mut media = playing(fidelity, Duration::ZERO).await;
    let report = TailSeeker::default().seek_to_tail(&mut media).await;

    assert_eq!(report.length_ms, 0);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.moved_by, Some(SeekStrategy::FastForward));
    assert!(media.seek_moves().is_empty());
    assert!(media.is_paused());
    assert_never_rewinds(&media);
}

fn assert_seeks_only_move_forward(media: &ScriptedMedia) {
    for seek in media.seek_moves() {
        assert!(
            seek.after_ms >= seek.before_ms,
            "{:?} moved the playhead back {} -> {}",
            seek.call,
            seek.before_ms,
            seek.after_ms
        );
    }
}

#[tokio::test(start_paused = true)]
async fn duration_reported_just_before_the_tail_never_pulls_back() {
    for rate in [true, false] {
        let fidelity = SeekFidelity {
            rate,
            length_delay: Duration::from_millis(9_950),
            ..SeekFidelity::perfect()
        };
        let mut media = playing(fidelity, Duration::from_millis(8_900)).await;
        let report = TailSeeker::default().seek_to_tail(&mut media).await;

        assert_eq!(report.length_ms, 0);
        assert!(!media
            .calls()
            .iter()
            .any(|call| matches!(call, MediaCall::SetFraction(_))));
        assert_eq!(report.final_ms, media.last_frame_ms());
        assert!(media.is_paused());
        assert_seeks_only_move_forward(&media);
        assert_never_rewinds(&media);
    }
}

#[tokio::test(start_paused = true)]
async fn duration_reported_during_fast_forward_enables_final_seek() {
    let fidelity = SeekFidelity {
        rate: false,
        length_delay: Duration::from_millis(3_100),
        ..SeekFidelity::perfect()
    };
    let mut media = playing(fidelity, Duration::from_secs(2)).await;
    let report = TailSeeker::default().seek_to_tail(&mut media).await;

    assert_eq!(report.length_ms, 0);
    assert_eq!(report.moved_by, Some(SeekStrategy::FastForward));
    let seeks = media.seek_moves();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].call, MediaCall::SetTime(9_880));
    assert_eq!(seeks[0].after_ms, 9_880);
    assert_eq!(report.final_ms, media.last_frame_ms());
    assert_seeks_only_move_forward(&media);
    assert_never_rewinds(&media);
}

#[tokio::test(start_paused = true)]
async fn targets_behind_the_playhead_are_never_issued() {
    let mut media = playing(SeekFidelity::perfect(), Duration::from_millis(9_950)).await;
    let report = TailSeeker::default().seek_to_tail(&mut media).await;

    assert!(report.start_ms > 9_880);
    assert!(!media
        .calls()
        .iter()
        .any(|call| matches!(call, MediaCall::SetTime(_))));
    assert_eq!(report.final_ms, media.last_frame_ms());
    assert!(media.is_paused());
    assert_never_rewinds(&media);
}

#[tokio::test(start_paused = true)]
async fn unknown_frame_rate_uses_default_frame() {
    let mut media = ScriptedMedia::new(6_000, None, SeekFidelity::perfect());
    media
        .play(Path::new("/kiosk/lola/1.mkv"))
        .expect("scripted play succeeds");
    let seeker = TailSeeker::new(TailSeekConfig {
        default_frame_ms: 40,
        ..TailSeekConfig::default()
    });
    let report = seeker.seek_to_tail(&mut media).await;

    assert_eq!(report.frame_ms, 40);
    assert_eq!(report.moved_by, Some(SeekStrategy::AbsoluteTime(5_880)));
    assert_eq!(report.final_ms, media.last_frame_ms());
}
