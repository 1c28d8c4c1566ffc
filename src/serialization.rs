use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::{RecError, Result};

pub(crate) fn build_file_path(path: &Path, model_name: &str, suffix: &str, ext: &str) -> PathBuf {
    let file_name = format!("{model_name}_{suffix}.{ext}");
    path.join(file_name)
}

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        info!("file folder {} doesn't exists, creating a new one...", path.display());
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

pub(crate) fn check_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(RecError::StorageNotFound(path.display().to_string()));
    }
    Ok(())
}

/// Writes `model` as gzip-compressed bincode to `<path>/<model_name>_<suffix>.gz`.
pub(crate) fn save_model<T: Serialize>(
    model: &T,
    path: &Path,
    model_name: &str,
    suffix: &str,
) -> Result<()> {
    let model_path = build_file_path(path, model_name, suffix, "gz");
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(model_path.as_path())?;

    let model_bytes: Vec<u8> = bincode::serialize(model).map_err(|e| RecError::Serialization {
        name: suffix.to_string(),
        reason: e.to_string(),
    })?;

    let mut encoder = GzEncoder::new(file, Compression::new(1));
    encoder.write_all(&model_bytes)?;
    encoder.finish()?;

    info!("Save `{suffix}` to `{}`", model_path.display());
    Ok(())
}

pub(crate) fn load_model<T: DeserializeOwned>(
    path: &Path,
    model_name: &str,
    suffix: &str,
) -> Result<T> {
    let model_path = build_file_path(path, model_name, suffix, "gz");
    check_exists(&model_path)?;

    let file = File::open(model_path.as_path())?;
    let mut decoder = GzDecoder::new(file);
    let mut model_bytes: Vec<u8> = Vec::new();
    decoder.read_to_end(&mut model_bytes)?;

    let model: T = bincode::deserialize(&model_bytes).map_err(|e| RecError::Serialization {
        name: suffix.to_string(),
        reason: e.to_string(),
    })?;

    info!("Load `{suffix}` from `{}`", model_path.display());
    Ok(model)
}

pub(crate) fn save_json<T: Serialize>(
    value: &T,
    path: &Path,
    model_name: &str,
    suffix: &str,
) -> Result<()> {
    let json_path = build_file_path(path, model_name, suffix, "json");
    let writer = BufWriter::new(File::create(&json_path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// `Ok(None)` when the file doesn't exist.
pub(crate) fn load_json<T: DeserializeOwned>(
    path: &Path,
    model_name: &str,
    suffix: &str,
) -> Result<Option<T>> {
    let json_path = build_file_path(path, model_name, suffix, "json");
    if !json_path.exists() {
        return Ok(None);
    }
    let reader = BufReader::new(File::open(&json_path)?);
    Ok(Some(serde_json::from_reader(reader)?))
}

#[cfg(test)]
pub(crate) fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("recfarm_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[cfg(test)]
mod tests {
    use fxhash::FxHashMap;

    use super::*;

    #[test]
    fn test_round_trip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = test_dir("serialization");
        ensure_dir(&dir)?;
        let mut model: FxHashMap<u32, Vec<f32>> = FxHashMap::default();
        model.insert(3, vec![0.5, 1.5]);
        save_model(&model, &dir, "m", "values")?;
        let loaded: FxHashMap<u32, Vec<f32>> = load_model(&dir, "m", "values")?;
        assert_eq!(loaded, model);

        save_json(&model, &dir, "m", "params")?;
        let json: Option<FxHashMap<u32, Vec<f32>>> = load_json(&dir, "m", "params")?;
        assert_eq!(json, Some(model));
        let missing: Option<Vec<u32>> = load_json(&dir, "m", "absent")?;
        assert!(missing.is_none());

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let dir = test_dir("serialization_missing");
        let res: Result<Vec<u32>> = load_model(&dir, "m", "values");
        assert!(matches!(res, Err(RecError::StorageNotFound(_))));
    }
}
