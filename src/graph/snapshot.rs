// src/graph/snapshot.rs — JSON export/import of graph state

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::model::{GraphState, GRAPH_STATE_VERSION};
use crate::infra::errors::{HabitusError, Result};

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Write `state` to `path` atomically: the file is either the previous
/// content or the complete new one.
pub fn write_state(path: &Path, state: &GraphState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)?;

    // Atomic write: write to a temp file then rename
    let tmp = tmp_path(path);
    if let Err(e) = std::fs::write(&tmp, &json).and_then(|_| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(HabitusError::Storage(format!(
            "failed to write {}: {e}",
            path.display()
        )));
    }
    Ok(())
}

pub fn read_state(path: &Path) -> Result<GraphState> {
    let content = std::fs::read_to_string(path)?;
    let state: GraphState = serde_json::from_str(&content)?;
    if state.version > GRAPH_STATE_VERSION {
        return Err(HabitusError::validation(
            "graph state",
            format!(
                "version {} is newer than supported version {}",
                state.version, GRAPH_STATE_VERSION
            ),
        ));
    }
    Ok(state)
}
