//! Hardware side effects keyed to state entry and completion.
//!
//! The mapping from state to commands is data (see `assets/actions.json`);
//! the only logic here is the once-per-entry guard on post-actions and the
//! skip gate on closing steps.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{StateGraph, StateId};
use crate::hardware::Hardware;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerCommand {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    pub address: String,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStep {
    /// Commands written to the serial bus with the table's gap between them.
    Serial(Vec<String>),
    Workers(WorkerCommand),
    Cue(Cue),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateActions {
    #[serde(default)]
    pub pre: Vec<ActionStep>,
    /// Runs after every completion, natural or skipped.
    #[serde(default)]
    pub post: Vec<ActionStep>,
    /// Runs after `post`; on a skip only when `fire_on_skip` is set.
    #[serde(default)]
    pub closing: Vec<ActionStep>,
    #[serde(default = "fire_on_skip_default")]
    pub fire_on_skip: bool,
}

impl Default for StateActions {
    fn default() -> Self {
        Self {
            pre: Vec::new(),
            post: Vec::new(),
            closing: Vec::new(),
            fire_on_skip: true,
        }
    }
}

fn fire_on_skip_default() -> bool {
    true
}

fn serial_gap_default() -> u64 {
    50
}

#[derive(Debug, Error)]
pub enum ActionTableError {
    #[error("failed to read action table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse action table: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTable {
    #[serde(default = "serial_gap_default")]
    pub serial_gap_ms: u64,
    #[serde(default)]
    pub states: BTreeMap<StateId, StateActions>,
}

impl Default for ActionTable {
    fn default() -> Self {
        Self {
            serial_gap_ms: serial_gap_default(),
            states: BTreeMap::new(),
        }
    }
}

impl ActionTable {
    pub fn from_json_file(path: &Path) -> Result<Self, ActionTableError> {
        let raw = fs::read_to_string(path).map_err(|source| ActionTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ActionTableError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn for_state(&self, id: &StateId) -> Option<&StateActions> {
        self.states.get(id)
    }

    pub fn serial_gap(&self) -> Duration {
        Duration::from_millis(self.serial_gap_ms)
    }

    /// Table entries that name no state in `graph`; logged as warnings.
    pub fn unknown_states(&self, graph: &StateGraph) -> Vec<StateId> {
        let unknown: Vec<StateId> = self
            .states
            .keys()
            .filter(|id| graph.resolve(id).is_err())
            .cloned()
            .collect();
        for id in &unknown {
            warn!("action table entry {id} names no state in the graph");
        }
        unknown
    }
}

/// Dispatches pre/post actions, running post-actions at most once per
/// state entry.
pub struct ActionGuard {
    table: ActionTable,
    hardware: Hardware,
    last_post: Option<StateId>,
}

impl ActionGuard {
    pub fn new(table: ActionTable, hardware: Hardware) -> Self {
        Self {
            table,
            hardware,
            last_post: None,
        }
    }

    pub fn table(&self) -> &ActionTable {
        &self.table
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    /// State whose post-actions already ran for the current entry.
    pub fn last_post(&self) -> Option<&StateId> {
        self.last_post.as_ref()
    }

    /// Makes the next completion eligible to fire post-actions again.
    pub fn reset(&mut self) {
        self.last_post = None;
    }

    pub fn pre(&self, id: &StateId) {
        if let Some(actions) = self.table.for_state(id) {
            self.run(id, "pre", &actions.pre);
        }
    }

    /// Returns `false` when post-actions for this entry were already
    /// claimed by an earlier completion.
    pub fn post(&mut self, id: &StateId, was_skipped: bool) -> bool {
        if self.last_post.as_ref() == Some(id) {
            debug!("post-actions for {id} already ran");
            return false;
        }
        self.last_post = Some(id.clone());

        let Some(actions) = self.table.for_state(id) else {
            return true;
        };
        self.run(id, "post", &actions.post);
        if was_skipped && !actions.fire_on_skip {
            if !actions.closing.is_empty() {
                info!("closing actions for {id} suppressed on skip");
            }
        } else {
            self.run(id, "closing", &actions.closing);
        }
        true
    }

    fn run(&self, id: &StateId, phase: &str, steps: &[ActionStep]) {
        if steps.is_empty() {
            return;
        }
        debug!("{phase}-actions for {id}: {steps:?}");
        let gap = self.table.serial_gap();
        for step in steps {
            match step {
                ActionStep::Serial(commands) => self.hardware.bus.send_sequence(commands, gap),
                ActionStep::Workers(WorkerCommand::Start) => self.hardware.workers.start(),
                ActionStep::Workers(WorkerCommand::Stop) => self.hardware.workers.stop(),
                ActionStep::Cue(cue) => self.hardware.cues.send(&cue.address, cue.value),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HardwareCall, RecordingHardware};

    const TABLE: &str = r#"{
        "serial_gap_ms": 20,
        "states": {
            "0": { "pre": [ { "workers": "stop" }, { "serial": ["f", "x", "c"] } ] },
            "3_1_1": { "pre": [ { "workers": "start" } ], "post": [ { "workers": "stop" } ] },
            "6_1_1": {
                "pre": [ { "serial": ["d"] }, { "cue": { "address": "/karaoke", "value": 1 } } ],
                "post": [ { "cue": { "address": "/karaoke", "value": 0 } } ],
                "closing": [ { "serial": ["f", "x"] } ],
                "fire_on_skip": false
            }
        }
    }"#;

    fn guard() -> (ActionGuard, RecordingHardware) {
        let recorder = RecordingHardware::default();
        let table = ActionTable::from_json_str(TABLE).unwrap();
        (ActionGuard::new(table, recorder.hardware()), recorder)
    }

    #[test]
    fn pre_actions_fire_in_table_order() {
        let (guard, recorder) = guard();
        guard.pre(&StateId::root());
        assert_eq!(
            recorder.calls(),
            vec![
                HardwareCall::WorkersStop,
                HardwareCall::Serial(vec!["f".into(), "x".into(), "c".into()], Duration::from_millis(20)),
            ]
        );
    }

    #[test]
    fn post_actions_fire_once_per_entry() {
        let (mut guard, recorder) = guard();
        let id = StateId::new("3_1_1");
        assert!(guard.post(&id, true));
        assert!(!guard.post(&id, false));
        assert_eq!(recorder.calls(), vec![HardwareCall::WorkersStop]);

        guard.reset();
        assert!(guard.post(&id, false));
        assert_eq!(recorder.calls().len(), 2);
    }

    #[test]
    fn fire_on_skip_false_holds_back_closing_steps_only() {
        let (mut guard, recorder) = guard();
        let id = StateId::new("6_1_1");
        assert!(guard.post(&id, true));
        assert_eq!(recorder.calls(), vec![HardwareCall::Cue("/karaoke".into(), 0)]);
        assert_eq!(guard.last_post(), Some(&id));
        recorder.clear();

        guard.reset();
        guard.post(&id, false);
        assert_eq!(
            recorder.calls(),
            vec![
                HardwareCall::Cue("/karaoke".into(), 0),
                HardwareCall::Serial(vec!["f".into(), "x".into()], Duration::from_millis(20)),
            ]
        );
    }

    #[test]
    fn unmapped_states_have_no_effects() {
        let (mut guard, recorder) = guard();
        guard.pre(&StateId::new("2"));
        assert!(guard.post(&StateId::new("2"), false));
        assert!(recorder.calls().is_empty());
        assert!(ActionTable::from_json_str("{}").unwrap().states.is_empty());
        assert_eq!(ActionTable::default().serial_gap(), Duration::from_millis(50));
    }
}
