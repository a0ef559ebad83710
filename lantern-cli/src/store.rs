//! Durable key-value store: one JSON object on disk, rewritten on every change.

use std::path::{Path, PathBuf};

use anyhow::Context;
use lantern_core::{ChatEntry, DARK_MODE_KEY, HISTORY_KEY};
use serde_json::{Map, Value};
use tracing::warn;

pub struct Store {
    path: PathBuf,
    values: Map<String, Value>,
}

impl Store {
    /// Read the store once. A missing file is empty; an unreadable one is logged and replaced.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let values = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<Map<String, Value>>(&bytes) {
                Ok(values) => values,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "state file corrupt; starting empty");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn history(&self) -> Vec<ChatEntry> {
        let Some(value) = self.values.get(HISTORY_KEY) else {
            return Vec::new();
        };
        match serde_json::from_value(value.clone()) {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "stored history unreadable; ignoring");
                Vec::new()
            }
        }
    }

    pub fn dark_mode(&self) -> bool {
        self.values
            .get(DARK_MODE_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_history(&mut self, history: &[ChatEntry]) -> anyhow::Result<()> {
        self.values
            .insert(HISTORY_KEY.to_string(), serde_json::to_value(history)?);
        self.flush()
    }

    pub fn set_dark_mode(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.values
            .insert(DARK_MODE_KEY.to_string(), Value::Bool(enabled));
        self.flush()
    }

    fn flush(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&self.values)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_core::Origin;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("state.json")).unwrap();
        assert!(store.history().is_empty());
        assert!(!store.dark_mode());
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        let history = vec![
            ChatEntry::text(Origin::Local, "hi"),
            ChatEntry::text(Origin::Peer, "hello"),
        ];
        {
            let mut store = Store::open(&path).unwrap();
            store.set_history(&history).unwrap();
            store.set_dark_mode(true).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.history(), history);
        assert!(store.dark_mode());

        let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw.get("lantern-messages").is_some());
        assert_eq!(raw.get("lantern-dark-mode"), Some(&Value::Bool(true)));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json").unwrap();
        let mut store = Store::open(&path).unwrap();
        assert!(store.history().is_empty());
        store.set_dark_mode(true).unwrap();
        assert!(Store::open(&path).unwrap().dark_mode());
    }
}
