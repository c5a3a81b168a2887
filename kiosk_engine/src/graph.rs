//! Declarative narrative graph: nodes, their media, labels and transitions.
//!
//! The graph is loaded once from JSON and never mutated afterwards. Node
//! `"0"` is the baseline intro loop; every `RESTART` target resolves to it.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::meters::MeterConfig;

/// Identifier of the baseline loop node.
pub const ROOT_STATE: &str = "0";

/// Transition sentinel that returns the session to the baseline node.
pub const RESTART: &str = "RESTART";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn root() -> Self {
        Self(ROOT_STATE.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_STATE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One of the three physical buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Left,
    Center,
    Right,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Left, Role::Center, Role::Right];

    /// Position of this role's label in a label triple.
    pub fn index(self) -> usize {
        match self {
            Role::Left => 0,
            Role::Center => 1,
            Role::Right => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Left => "left",
            Role::Center => "center",
            Role::Right => "right",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Transition {
    To(StateId),
    Restart,
}

impl Transition {
    pub fn target(&self) -> StateId {
        match self {
            Transition::To(id) => id.clone(),
            Transition::Restart => StateId::root(),
        }
    }

    pub fn is_restart(&self) -> bool {
        matches!(self, Transition::Restart)
    }
}

impl From<String> for Transition {
    fn from(raw: String) -> Self {
        if raw == RESTART {
            Transition::Restart
        } else {
            Transition::To(StateId(raw))
        }
    }
}

impl From<Transition> for String {
    fn from(value: Transition) -> Self {
        match value {
            Transition::To(id) => id.0,
            Transition::Restart => RESTART.to_string(),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::To(id) => write!(f, "{id}"),
            Transition::Restart => f.write_str(RESTART),
        }
    }
}

/// Label triple in Left/Center/Right order. Empty strings are blank buttons.
pub type Labels = [String; 3];

pub fn blank_labels() -> Labels {
    [String::new(), String::new(), String::new()]
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transitions {
    #[serde(rename = "L", default, skip_serializing_if = "Option::is_none")]
    pub left: Option<Transition>,
    #[serde(rename = "C", default, skip_serializing_if = "Option::is_none")]
    pub center: Option<Transition>,
    #[serde(rename = "R", default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Transition>,
}

impl Transitions {
    pub fn get(&self, role: Role) -> Option<&Transition> {
        match role {
            Role::Left => self.left.as_ref(),
            Role::Center => self.center.as_ref(),
            Role::Right => self.right.as_ref(),
        }
    }

    fn iter(&self) -> impl Iterator<Item = (Role, &Transition)> {
        Role::ALL
            .into_iter()
            .filter_map(move |role| self.get(role).map(|transition| (role, transition)))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawNode {
    video: PathBuf,
    sprite: String,
    #[serde(alias = "during_words", default = "blank_labels")]
    during_labels: Labels,
    #[serde(alias = "end_words", default)]
    end_labels: Option<Labels>,
    #[serde(default)]
    transitions: Transitions,
    #[serde(default)]
    temp_delta: i32,
    #[serde(default)]
    money_delta: i32,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphFile {
    #[serde(default)]
    meters: MeterConfig,
    sprites: BTreeMap<String, PathBuf>,
    states: BTreeMap<String, RawNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateNode {
    pub id: StateId,
    pub video: PathBuf,
    pub sprite: String,
    pub during_labels: Labels,
    pub end_labels: Option<Labels>,
    pub transitions: Transitions,
    pub temp_delta: i32,
    pub money_delta: i32,
}

impl StateNode {
    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }

    /// Labels shown once the video has finished; absent means three blanks.
    pub fn end_labels_or_blank(&self) -> Labels {
        self.end_labels.clone().unwrap_or_else(blank_labels)
    }

    pub fn end_label(&self, role: Role) -> &str {
        self.end_labels
            .as_ref()
            .map(|labels| labels[role.index()].as_str())
            .unwrap_or("")
    }

    pub fn transition(&self, role: Role) -> Option<&Transition> {
        self.transitions.get(role)
    }

    /// True when at least one role has both a visible end label and a
    /// transition behind it.
    pub fn has_actionable_choice(&self) -> bool {
        Role::ALL
            .into_iter()
            .any(|role| !self.end_label(role).is_empty() && self.transition(role).is_some())
    }
}

/// Directories that relative video and sprite references resolve against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRoots {
    pub media_root: PathBuf,
    pub sprite_root: PathBuf,
}

impl AssetRoots {
    /// Installation layout: `lola/` for videos and `jellies/` for sprites,
    /// both beside the graph file.
    pub fn beside(graph_path: &Path) -> Self {
        let base = graph_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            media_root: base.join("lola"),
            sprite_root: base.join("jellies"),
        }
    }
}

/// Fatal problems with the graph definition.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("failed to read state graph {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse state graph: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("state graph has no baseline node \"{ROOT_STATE}\"")]
    MissingRoot,
    #[error("baseline node \"{ROOT_STATE}\" must not carry meter deltas")]
    RootHasDeltas,
    #[error("invalid meter configuration: {0}")]
    Meters(String),
    #[error("state {state} references unknown sprite '{sprite}'")]
    UnknownSprite { state: StateId, sprite: String },
    #[error("missing sprite asset '{sprite}' at {path}")]
    MissingSprite { sprite: String, path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown state '{0}'")]
pub struct UnknownStateError(pub StateId);

/// Non-fatal findings from [`StateGraph::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub missing_videos: Vec<(StateId, PathBuf)>,
    pub dangling_transitions: Vec<(StateId, Role, StateId)>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.missing_videos.is_empty() && self.dangling_transitions.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StateGraph {
    states: BTreeMap<StateId, StateNode>,
    sprites: BTreeMap<String, PathBuf>,
    meters: MeterConfig,
    roots: AssetRoots,
}

impl StateGraph {
    pub fn from_json_file(path: &Path, roots: AssetRoots) -> Result<Self, GraphError> {
        let raw = fs::read_to_string(path).map_err(|source| GraphError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw, roots)
    }

    pub fn from_json_str(raw: &str, roots: AssetRoots) -> Result<Self, GraphError> {
        let file: GraphFile = serde_json::from_str(raw)?;
        file.meters.check().map_err(GraphError::Meters)?;

        let states: BTreeMap<StateId, StateNode> = file
            .states
            .into_iter()
            .map(|(id, node)| {
                let id = StateId(id);
                let node = StateNode {
                    id: id.clone(),
                    video: node.video,
                    sprite: node.sprite,
                    during_labels: node.during_labels,
                    end_labels: node.end_labels,
                    transitions: node.transitions,
                    temp_delta: node.temp_delta,
                    money_delta: node.money_delta,
                };
                (id, node)
            })
            .collect();

        let root = states.get(&StateId::root()).ok_or(GraphError::MissingRoot)?;
        if root.temp_delta != 0 || root.money_delta != 0 {
            return Err(GraphError::RootHasDeltas);
        }
        for node in states.values() {
            if !file.sprites.contains_key(&node.sprite) {
                return Err(GraphError::UnknownSprite {
                    state: node.id.clone(),
                    sprite: node.sprite.clone(),
                });
            }
        }

        Ok(Self {
            states,
            sprites: file.sprites,
            meters: file.meters,
            roots,
        })
    }

    pub fn resolve(&self, id: &StateId) -> Result<&StateNode, UnknownStateError> {
        self.states
            .get(id)
            .ok_or_else(|| UnknownStateError(id.clone()))
    }

    pub fn resolve_transition(&self, transition: &Transition) -> Result<&StateNode, UnknownStateError> {
        self.resolve(&transition.target())
    }

    pub fn root(&self) -> &StateNode {
        // presence is checked when the graph is built
        &self.states[&StateId::root()]
    }

    pub fn meters(&self) -> &MeterConfig {
        &self.meters
    }

    pub fn roots(&self) -> &AssetRoots {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &StateNode> {
        self.states.values()
    }

    pub fn video_path(&self, node: &StateNode) -> PathBuf {
        self.roots.media_root.join(&node.video)
    }

    pub fn sprite_path(&self, sprite: &str) -> Option<PathBuf> {
        self.sprites
            .get(sprite)
            .map(|file| self.roots.sprite_root.join(file))
    }

    /// Checks assets on disk. Missing sprites are fatal; missing videos on
    /// non-root nodes and transitions to unknown nodes are reported and
    /// logged as warnings.
    pub fn validate(&self) -> Result<ValidationReport, GraphError> {
        for (sprite, file) in &self.sprites {
            let path = self.roots.sprite_root.join(file);
            if !path.is_file() {
                return Err(GraphError::MissingSprite {
                    sprite: sprite.clone(),
                    path,
                });
            }
        }

        let mut report = ValidationReport::default();
        for node in self.states.values() {
            if !node.is_root() {
                let path = self.video_path(node);
                if !path.is_file() {
                    warn!("missing video file {} for state {}", path.display(), node.id);
                    report.missing_videos.push((node.id.clone(), path));
                }
            }
            for (role, transition) in node.transitions.iter() {
                let target = transition.target();
                if !self.states.contains_key(&target) {
                    warn!(
                        "state {} {} transition points at unknown state {}",
                        node.id, role, target
                    );
                    report
                        .dangling_transitions
                        .push((node.id.clone(), role, target));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const GRAPH: &str = r#"{
        "sprites": { "base": "base_jelly.html", "mining": "mining_jelly.html" },
        "states": {
            "0": { "video": "0.mkv", "sprite": "base", "during_words": ["Begin", "", ""],
                   "transitions": { "L": "1" } },
            "1": { "video": "1.mkv", "sprite": "base", "during_words": ["SKIP", "", ""],
                   "end_words": ["Pleasure", "", "Restart"],
                   "transitions": { "L": "2", "R": "RESTART" }, "temp_delta": 1 },
            "2": { "video": "2.mkv", "sprite": "mining",
                   "end_labels": ["", "", "Restart"], "transitions": { "R": "RESTART" },
                   "temp_delta": 2, "money_delta": 1 }
        }
    }"#;

    fn roots(base: &Path) -> AssetRoots {
        AssetRoots {
            media_root: base.join("lola"),
            sprite_root: base.join("jellies"),
        }
    }

    #[test]
    fn accepts_legacy_word_field_names() {
        let graph = StateGraph::from_json_str(GRAPH, roots(Path::new("/kiosk"))).unwrap();
        assert_eq!(graph.len(), 3);
        let one = graph.resolve(&"1".into()).unwrap();
        assert_eq!(one.during_labels[0], "SKIP");
        assert_eq!(one.end_label(Role::Left), "Pleasure");
        assert_eq!(one.end_label(Role::Center), "");
        assert_eq!(
            one.transition(Role::Right),
            Some(&Transition::Restart)
        );
        assert_eq!(
            graph.video_path(one),
            PathBuf::from("/kiosk/lola/1.mkv")
        );
        assert!(graph.root().end_labels.is_none());
        assert_eq!(graph.root().end_labels_or_blank(), blank_labels());
    }

    #[test]
    fn restart_resolves_to_baseline() {
        let graph = StateGraph::from_json_str(GRAPH, roots(Path::new("/kiosk"))).unwrap();
        let node = graph.resolve_transition(&Transition::Restart).unwrap();
        assert!(node.is_root());
        assert_eq!(
            graph.resolve(&"9_9".into()),
            Err(UnknownStateError("9_9".into()))
        );
    }

    #[test]
    fn actionable_choice_needs_label_and_transition() {
        let graph = StateGraph::from_json_str(GRAPH, roots(Path::new("/kiosk"))).unwrap();
        assert!(graph.resolve(&"1".into()).unwrap().has_actionable_choice());
        // Right has a label and a transition, so a Restart-only node still counts.
        assert!(graph.resolve(&"2".into()).unwrap().has_actionable_choice());
        assert!(!graph.root().has_actionable_choice());
    }

    #[test]
    fn rejects_graph_without_baseline_or_with_root_deltas() {
        let missing = r#"{ "sprites": {"base": "b.html"},
            "states": { "1": { "video": "1.mkv", "sprite": "base" } } }"#;
        assert!(matches!(
            StateGraph::from_json_str(missing, roots(Path::new("."))),
            Err(GraphError::MissingRoot)
        ));

        let deltas = r#"{ "sprites": {"base": "b.html"},
            "states": { "0": { "video": "0.mkv", "sprite": "base", "temp_delta": 1 } } }"#;
        assert!(matches!(
            StateGraph::from_json_str(deltas, roots(Path::new("."))),
            Err(GraphError::RootHasDeltas)
        ));

        let sprite = r#"{ "sprites": {"base": "b.html"},
            "states": { "0": { "video": "0.mkv", "sprite": "ghost" } } }"#;
        assert!(matches!(
            StateGraph::from_json_str(sprite, roots(Path::new("."))),
            Err(GraphError::UnknownSprite { .. })
        ));
    }

    #[test]
    fn validate_fails_on_missing_sprite_and_warns_on_missing_video() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let roots = roots(dir.path());
        fs::create_dir_all(&roots.media_root)?;
        fs::create_dir_all(&roots.sprite_root)?;
        fs::write(roots.sprite_root.join("base_jelly.html"), "<html/>")?;
        fs::write(roots.media_root.join("1.mkv"), b"")?;

        let graph = StateGraph::from_json_str(GRAPH, roots.clone())?;
        assert!(matches!(
            graph.validate(),
            Err(GraphError::MissingSprite { ref sprite, .. }) if sprite == "mining"
        ));

        fs::write(roots.sprite_root.join("mining_jelly.html"), "<html/>")?;
        let report = graph.validate()?;
        // the root loop video is never reported
        assert_eq!(report.missing_videos.len(), 1);
        assert_eq!(report.missing_videos[0].0, StateId::new("2"));
        assert!(report.dangling_transitions.is_empty());
        Ok(())
    }

    #[test]
    fn dangling_transitions_are_reported_not_fatal() {
        let raw = r#"{ "sprites": {"base": "b.html"},
            "states": { "0": { "video": "0.mkv", "sprite": "base",
                               "transitions": { "L": "7" } } } }"#;
        let dir = tempdir().unwrap();
        let roots = roots(dir.path());
        fs::create_dir_all(&roots.sprite_root).unwrap();
        fs::write(roots.sprite_root.join("b.html"), "").unwrap();
        let graph = StateGraph::from_json_str(raw, roots).unwrap();
        let report = graph.validate().unwrap();
        assert_eq!(
            report.dangling_transitions,
            vec![(StateId::root(), Role::Left, StateId::new("7"))]
        );
    }
}
