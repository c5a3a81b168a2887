use std::time::Duration;

use tokio::time::Instant;

/// Single-shot countdown that sends an idle session back to the baseline.
///
/// The timer only records a deadline; the runner task owns it and waits on
/// [`InactivityTimer::deadline`], so expiry is handled on the same task as
/// every other controller mutation.
#[derive(Debug, Clone)]
pub struct InactivityTimer {
    duration: Duration,
    deadline: Option<Instant>,
}

impl InactivityTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// (Re)starts the full countdown from now.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.duration);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Restarts the countdown whether or not it was running.
    pub fn bump(&mut self) {
        self.arm();
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bump_restarts_the_full_duration() {
        let mut timer = InactivityTimer::new(Duration::from_secs(90));
        assert!(!timer.is_armed());
        timer.arm();
        tokio::time::advance(Duration::from_secs(60)).await;
        timer.bump();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!timer.expired(Instant::now()));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(timer.expired(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_expires() {
        let mut timer = InactivityTimer::new(Duration::from_secs(1));
        timer.arm();
        timer.cancel();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!timer.expired(Instant::now()));
        assert_eq!(timer.deadline(), None);
    }
}
