//! Button press policy: which controller operation a press maps to in the
//! current phase, and whether it restarts the inactivity countdown.

use std::time::Duration;

use tokio::time::Instant;

use crate::controller::Phase;
use crate::graph::{StateNode, Transition};

pub use crate::graph::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedAction {
    Enter(Transition),
    Skip,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedPress {
    /// Restart the inactivity countdown before acting.
    pub bump: bool,
    pub action: RoutedAction,
}

impl RoutedPress {
    fn ignored() -> Self {
        Self {
            bump: false,
            action: RoutedAction::Ignore,
        }
    }
}

/// Label that makes the Right button return to the baseline.
pub const RESTART_LABEL: &str = "Restart";

#[derive(Debug, Default, Clone, Copy)]
pub struct InputRouter;

impl InputRouter {
    pub fn route(&self, role: Role, phase: Phase, node: &StateNode) -> RoutedPress {
        // The intro loop has no skip and no choice labels; Left starts the story.
        if node.is_root() {
            return match (role, node.transition(Role::Left)) {
                (Role::Left, Some(transition)) => RoutedPress {
                    bump: false,
                    action: RoutedAction::Enter(transition.clone()),
                },
                _ => RoutedPress::ignored(),
            };
        }

        match phase {
            Phase::Playing => match role {
                Role::Left => RoutedPress {
                    bump: false,
                    action: RoutedAction::Skip,
                },
                Role::Center | Role::Right => RoutedPress::ignored(),
            },
            Phase::AwaitingChoice => {
                let action = match role {
                    Role::Left | Role::Center => match node.transition(role) {
                        Some(transition) if !node.end_label(role).is_empty() => {
                            RoutedAction::Enter(transition.clone())
                        }
                        _ => RoutedAction::Ignore,
                    },
                    Role::Right if node.end_label(Role::Right) == RESTART_LABEL => {
                        RoutedAction::Enter(Transition::Restart)
                    }
                    Role::Right => RoutedAction::Ignore,
                };
                RoutedPress { bump: true, action }
            }
        }
    }
}

/// Drops presses of the same role that arrive within `window` of the last
/// accepted one.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: [Option<Instant>; 3],
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: [None; 3],
        }
    }

    pub fn accept(&mut self, role: Role, now: Instant) -> bool {
        let slot = &mut self.last[role.index()];
        match *slot {
            Some(previous) if now.saturating_duration_since(previous) < self.window => false,
            _ => {
                *slot = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{StateId, Transitions};
    use std::path::PathBuf;

    fn node(id: &str, end: Option<[&str; 3]>, transitions: Transitions) -> StateNode {
        StateNode {
            id: StateId::new(id),
            video: PathBuf::from(format!("{id}.mkv")),
            sprite: "base".to_string(),
            during_labels: ["SKIP".into(), String::new(), String::new()],
            end_labels: end.map(|labels| labels.map(str::to_string)),
            transitions,
            temp_delta: 0,
            money_delta: 0,
        }
    }

    fn one() -> StateNode {
        node(
            "1",
            Some(["Pleasure", "", "Restart"]),
            Transitions {
                left: Some(Transition::To("2".into())),
                center: None,
                right: Some(Transition::Restart),
            },
        )
    }

    #[test]
    fn root_left_starts_the_story_and_nothing_else_does() {
        let root = node(
            "0",
            None,
            Transitions {
                left: Some(Transition::To("1".into())),
                ..Transitions::default()
            },
        );
        let router = InputRouter;
        for phase in [Phase::Playing, Phase::AwaitingChoice] {
            assert_eq!(
                router.route(Role::Left, phase, &root).action,
                RoutedAction::Enter(Transition::To("1".into()))
            );
            assert_eq!(router.route(Role::Center, phase, &root), RoutedPress::ignored());
            assert_eq!(router.route(Role::Right, phase, &root), RoutedPress::ignored());
        }
    }

    #[test]
    fn left_skips_while_playing() {
        let router = InputRouter;
        assert_eq!(
            router.route(Role::Left, Phase::Playing, &one()),
            RoutedPress {
                bump: false,
                action: RoutedAction::Skip
            }
        );
        assert_eq!(router.route(Role::Right, Phase::Playing, &one()), RoutedPress::ignored());
    }

    #[test]
    fn choice_presses_always_bump() {
        let router = InputRouter;
        let center = router.route(Role::Center, Phase::AwaitingChoice, &one());
        assert!(center.bump);
        assert_eq!(center.action, RoutedAction::Ignore);
        assert_eq!(
            router.route(Role::Left, Phase::AwaitingChoice, &one()).action,
            RoutedAction::Enter(Transition::To("2".into()))
        );
        assert_eq!(
            router.route(Role::Right, Phase::AwaitingChoice, &one()).action,
            RoutedAction::Enter(Transition::Restart)
        );
    }

    #[test]
    fn right_requires_literal_restart_label() {
        let other = node(
            "x",
            Some(["", "", "Money"]),
            Transitions {
                right: Some(Transition::To("2".into())),
                ..Transitions::default()
            },
        );
        let press = InputRouter.route(Role::Right, Phase::AwaitingChoice, &other);
        assert!(press.bump);
        assert_eq!(press.action, RoutedAction::Ignore);

        // dead end: no transition behind the label, yet Restart still works
        let dead_end = node("y", Some(["", "", "Restart"]), Transitions::default());
        assert_eq!(
            InputRouter.route(Role::Right, Phase::AwaitingChoice, &dead_end).action,
            RoutedAction::Enter(Transition::Restart)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_is_per_role() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();
        assert!(debouncer.accept(Role::Left, start));
        assert!(!debouncer.accept(Role::Left, start + Duration::from_millis(40)));
        assert!(debouncer.accept(Role::Right, start + Duration::from_millis(40)));
        assert!(debouncer.accept(Role::Left, start + Duration::from_millis(100)));
    }
}
