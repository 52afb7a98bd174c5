//! JSON configuration for boundary conditions and solver controls.
//!
//! Boundary conditions follow a `type` / `val` layout keyed by location
//! name, one entry per displacement direction:
//!
//! ```json
//! {
//!   "type": { "xlo": ["disp", "disp"], "xhi": ["trac", "disp"] },
//!   "val":  { "xhi": [0.0, "(0,1:0,0.1)"] }
//! }
//! ```

use crate::error::Result;
use crate::interpolator::LinearInterpolator;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BcConfig {
    /// Boundary type names per location
    #[serde(rename = "type", default)]
    pub types: BTreeMap<String, Vec<String>>,
    /// Target values per location, numbers or interpolator strings
    #[serde(default)]
    pub val: BTreeMap<String, Vec<LinearInterpolator>>,
}

/// Read any configuration structure from a JSON file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write a configuration structure as pretty JSON, creating parent directories.
pub fn save_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolverError;

    #[test]
    fn reads_type_and_val_tables() {
        let cfg: BcConfig = serde_json::from_str(
            r#"{"type": {"xlo": ["disp", "disp"], "xhi": ["trac", "disp"]},
                "val": {"xhi": [0.0, "(0,1:0,0.1)"]}}"#,
        )
        .unwrap();
        assert_eq!(cfg.types["xhi"], vec!["trac", "disp"]);
        assert_eq!(cfg.val["xhi"][1].eval(0.5), 0.05);
    }

    #[test]
    fn missing_tables_default_to_empty() {
        let cfg: BcConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.types.is_empty() && cfg.val.is_empty());
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/bc.json");
        let mut cfg = BcConfig::default();
        cfg.types.insert("ylo".into(), vec!["neumann".into(), "disp".into()]);
        cfg.val.insert("ylo".into(), vec![LinearInterpolator::constant(1.5), LinearInterpolator::default()]);
        save_json(&path, &cfg).unwrap();
        let back: BcConfig = load_json(&path).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn load_errors_are_typed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_json::<BcConfig>(dir.path().join("none.json"));
        assert!(matches!(missing, Err(SolverError::Io(_))));
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(load_json::<BcConfig>(&bad), Err(SolverError::Json(_))));
    }
}
