// Device property persistence between daemon runs.
//
// Scene configurations and output values live in a JSON file per profile:
// `{ "<dsid>": { "scene.5": "200", "output": "0" } }`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::{debug, info};

use dssync_core::{Dsid, Engine};

use crate::error::DaemonError;

type PropertyFile = BTreeMap<String, BTreeMap<String, String>>;

pub fn state_path(profile: &str) -> PathBuf {
    let file = format!("{profile}-devices.json");
    ProjectDirs::from("org", "dssync", "dssync")
        .map_or_else(|| PathBuf::from(&file), |dirs| dirs.data_local_dir().join(&file))
}

fn io_error(path: &Path, source: std::io::Error) -> DaemonError {
    DaemonError::StateFile {
        path: path.display().to_string(),
        source,
    }
}

/// Hand persisted properties to the engine. A missing file is not an error.
pub fn preload(engine: &Engine, path: &Path) -> Result<usize, DaemonError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no saved device state");
            return Ok(0);
        }
        Err(e) => return Err(io_error(path, e)),
    };
    let file: PropertyFile = serde_json::from_str(&raw)
        .map_err(|e| io_error(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let count = file.len();
    for (dsid, props) in file {
        engine.preload_properties(Dsid::from(dsid), props);
    }
    info!(devices = count, path = %path.display(), "device state loaded");
    Ok(count)
}

/// Write the properties of every known device.
pub fn save(engine: &Engine, path: &Path) -> Result<usize, DaemonError> {
    let file: PropertyFile = engine
        .devices()
        .iter()
        .filter_map(|d| {
            engine
                .device_properties(&d.dsid)
                .map(|props| (d.dsid.to_string(), props))
        })
        .collect();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(path, e))?;
    }
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| io_error(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    std::fs::write(path, json).map_err(|e| io_error(path, e))?;
    info!(devices = file.len(), path = %path.display(), "device state saved");
    Ok(file.len())
}
