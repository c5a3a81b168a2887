use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use kiosk_engine::actions::ActionTable;
use kiosk_engine::graph::{AssetRoots, Role, StateGraph, StateId};
use tempfile::tempdir;

fn manifest_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
}

#[test]
fn installation_graph_is_closed_and_matches_action_table() -> Result<()> {
    let graph = StateGraph::from_json_file(
        &manifest_path("assets/states.json"),
        AssetRoots::beside(&manifest_path("assets/states.json")),
    )?;
    assert_eq!(graph.len(), 10);
    assert!(graph.root().end_labels.is_none());

    for node in graph.nodes() {
        for role in Role::ALL {
            if let Some(transition) = node.transition(role) {
                assert!(
                    graph.resolve_transition(transition).is_ok(),
                    "{} {role} points at {}",
                    node.id,
                    transition.target()
                );
            }
        }
    }

    let table = ActionTable::from_json_file(&manifest_path("assets/actions.json"))?;
    assert!(table.unknown_states(&graph).is_empty());
    let singing = table
        .for_state(&StateId::new("6_1_1"))
        .expect("singing node has actions");
    assert!(singing.fire_on_skip);
    assert_eq!(singing.post.len(), 1);
    assert_eq!(singing.closing.len(), 1);
    Ok(())
}

#[test]
fn validation_reports_missing_videos_without_failing() -> Result<()> {
    let dir = tempdir()?;
    let states = dir.path().join("states.json");
    fs::copy(manifest_path("assets/states.json"), &states)?;
    fs::create_dir_all(dir.path().join("jellies"))?;
    fs::create_dir_all(dir.path().join("lola"))?;
    for sprite in [
        "base", "stinging", "mining", "overheating", "cooling", "singing", "broke",
    ] {
        fs::write(dir.path().join("jellies").join(format!("{sprite}_jelly.html")), "<html/>")?;
    }
    for video in ["0", "1", "2"] {
        fs::write(dir.path().join("lola").join(format!("{video}.mkv")), b"")?;
    }

    let graph = StateGraph::from_json_file(&states, AssetRoots::beside(&states))?;
    let report = graph.validate()?;
    assert_eq!(report.missing_videos.len(), 7);
    assert!(report.dangling_transitions.is_empty());

    fs::remove_file(dir.path().join("jellies").join("broke_jelly.html"))?;
    assert!(graph.validate().is_err());
    Ok(())
}
