use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use kiosk_core::{PolicyPatch, PolicyStore, UpdatePolicy};
use serde_json::{json, Value};
use tracing::debug;

use crate::{deep_merge, default_document, OTA_SECTION};

#[derive(Debug)]
pub struct DeviceConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DeviceConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Value> {
        let mut document = default_document();
        if let Some(stored) = self.read_stored()? {
            deep_merge(&mut document, &stored);
        }
        Ok(document)
    }

    pub fn section(&self, key: &str) -> Result<Value> {
        Ok(self
            .load()?
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())))
    }

    pub fn update_section(&self, key: &str, patch: &Value) -> Result<Value> {
        if !patch.is_object() {
            anyhow::bail!("device config section '{key}' update must be a JSON object");
        }
        let _guard = self.lock()?;
        let mut document = self.load()?;
        deep_merge(&mut document, &json!({ key: patch }));
        self.save(&document)?;
        debug!(target: "kiosk::config", section = key, path = %self.path.display(), "config section updated");
        Ok(document.get(key).cloned().unwrap_or(Value::Null))
    }

    fn read_stored(&self) -> Result<Option<Value>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed reading device config: {}", self.path.display())
                });
            }
        };

        let stored: Value = serde_json::from_str(&content)
            .with_context(|| format!("failed parsing device config: {}", self.path.display()))?;
        if !stored.is_object() {
            anyhow::bail!(
                "device config {} must contain a JSON object",
                self.path.display()
            );
        }
        Ok(Some(stored))
    }

    fn save(&self, document: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed creating device config dir: {}", parent.display())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(document).with_context(|| {
            format!("failed serializing device config: {}", self.path.display())
        })?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("failed writing device config: {}", tmp_path.display()))?;
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err)
                .with_context(|| format!("failed replacing device config: {}", self.path.display()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| anyhow!("device config write lock poisoned"))
    }
}

impl PolicyStore for DeviceConfigStore {
    fn load_policy(&self) -> Result<UpdatePolicy> {
        let section = self.section(OTA_SECTION)?;
        serde_json::from_value(section).with_context(|| {
            format!(
                "failed parsing '{OTA_SECTION}' section of {}",
                self.path.display()
            )
        })
    }

    fn update_policy(&self, patch: &PolicyPatch) -> Result<UpdatePolicy> {
        let patch_value =
            serde_json::to_value(patch).context("failed serializing update policy patch")?;
        let section = self.update_section(OTA_SECTION, &patch_value)?;
        serde_json::from_value(section).with_context(|| {
            format!(
                "failed parsing '{OTA_SECTION}' section of {}",
                self.path.display()
            )
        })
    }
}
