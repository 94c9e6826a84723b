//! On-disk memoization blobs. Pure caches: deleting any of these files is
//! safe and only costs recomputation time.
//!
//! First-time builds write with no locking; two workers cold-starting against
//! the same cache path may both recompute. Callers that fan out workers
//! should warm the caches in a single process first.

use crate::types::{DatasetError, DatasetResult};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Cache-key suffix identifying the class subset, e.g. `_class_0_3_5`.
pub fn class_signature(classes: &[usize]) -> String {
    let mut sig = String::from("_class");
    for cls in classes {
        sig.push_str(&format!("_{cls}"));
    }
    sig
}

/// Load a cache blob if present and decodable. A stale or corrupt file is
/// treated as a miss.
pub fn load<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = fs::read(path).ok()?;
    match bincode::serde::decode_from_slice(&bytes, bincode::config::standard()) {
        Ok((value, _)) => {
            info!("cache loaded from {}", path.display());
            Some(value)
        }
        Err(e) => {
            warn!("discarding unreadable cache {}: {e}", path.display());
            None
        }
    }
}

pub fn save<T: Serialize>(path: &Path, value: &T) -> DatasetResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| DatasetError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        DatasetError::Cache {
            path: path.to_path_buf(),
            msg: e.to_string(),
        }
    })?;
    fs::write(path, bytes).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!("cache written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_lists_ids_in_order() {
        assert_eq!(class_signature(&[0, 3, 5]), "_class_0_3_5");
    }

    #[test]
    fn round_trip_and_corrupt_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poses.bin");
        let rows: Vec<Vec<[f32; 6]>> = vec![vec![[0.1, 0.2, 0.3, 0.0, 0.0, 1.0]]];
        save(&path, &rows).unwrap();
        let back: Vec<Vec<[f32; 6]>> = load(&path).unwrap();
        assert_eq!(back, rows);

        fs::write(&path, b"not a cache").unwrap();
        assert!(load::<Vec<Vec<[f32; 6]>>>(&path).is_none());
    }
}
