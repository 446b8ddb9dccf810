use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn file_exists(path: &Path) -> bool {
  path.exists()
}

pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let data =
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
  serde_yaml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

/// Load a YAML file, or produce a default value when the file does not exist.
pub fn load_yaml_or_else<T, F>(path: &Path, default: F) -> Result<T>
where
  T: DeserializeOwned,
  F: FnOnce() -> T,
{
  if !path.exists() {
    return Ok(default());
  }
  load_yaml(path)
}

/// Serialize `value` and atomically replace `path` (write temp + rename).
pub fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
  let data = serde_yaml::to_string(value).context("failed to serialize YAML")?;
  let dir = path
    .parent()
    .with_context(|| format!("no parent directory for {}", path.display()))?;
  fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

  let mut tmp = tempfile::NamedTempFile::new_in(dir)
    .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
  tmp.write_all(data.as_bytes()).context("failed to write temp file")?;
  tmp
    .persist(path)
    .with_context(|| format!("failed to replace {}", path.display()))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct Sample {
    name: String,
    count: u32,
  }

  #[test]
  fn save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("sample.yaml");
    let v = Sample {
      name: "x".into(),
      count: 3,
    };
    save_yaml(&path, &v).expect("save");
    let back: Sample = load_yaml(&path).expect("load");
    assert_eq!(back, v);
  }

  #[test]
  fn save_replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.yaml");
    save_yaml(&path, &Sample { name: "a".into(), count: 1 }).unwrap();
    save_yaml(&path, &Sample { name: "b".into(), count: 2 }).unwrap();
    let back: Sample = load_yaml(&path).unwrap();
    assert_eq!(back.name, "b");
  }

  #[test]
  fn load_or_else_uses_default_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.yaml");
    let v: Sample = load_yaml_or_else(&path, || Sample {
      name: "default".into(),
      count: 0,
    })
    .unwrap();
    assert_eq!(v.name, "default");
  }
}
