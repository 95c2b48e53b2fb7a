use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use kiosk_core::OtaError;
use tracing::{debug, warn};

/// Exclusive advisory lock held for the lifetime of one tree mutation.
#[derive(Debug)]
pub struct UpdateGuard {
    file: File,
    path: PathBuf,
    operation: &'static str,
}

impl UpdateGuard {
    pub fn acquire(path: &Path, operation: &'static str) -> Result<Self, OtaError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                OtaError::backup(format!(
                    "failed to create lock directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| {
                OtaError::backup(format!("failed to open lock {}: {err}", path.display()))
            })?;

        if file.try_lock_exclusive().is_err() {
            let holder = fs::read_to_string(path)
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty());
            return Err(OtaError::AlreadyInProgress {
                lock: path.to_path_buf(),
                holder,
            });
        }

        let holder = format!(
            "pid={} op={} since={}",
            std::process::id(),
            operation,
            Utc::now().to_rfc3339()
        );
        if let Err(err) = file
            .set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| file.write_all(holder.as_bytes()))
            .and_then(|()| file.flush())
        {
            warn!(target: "kiosk::ota", lock = %path.display(), error = %err, "failed to record lock holder");
        }

        debug!(target: "kiosk::ota", lock = %path.display(), operation, "update guard acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            operation,
        })
    }
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
        debug!(target: "kiosk::ota", lock = %self.path.display(), operation = self.operation, "update guard released");
    }
}
