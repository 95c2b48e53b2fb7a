use std::cmp::Ordering;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Local, Utc};
use kiosk_core::{BackupRecord, CreatedBackup, OtaError};
use tar::Builder;
use tracing::{debug, info, warn};

use crate::checksum::sha256_file_hex;
use crate::fs_utils::remove_file_if_exists;
use crate::layout::{OtaLayout, BACKUP_EXTENSION, EXCLUDED_DIR_NAMES};

pub const MAX_BACKUP_NAME_LEN: usize = 128;
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone)]
pub struct BackupArchiver {
    layout: OtaLayout,
}

impl BackupArchiver {
    pub fn new(layout: OtaLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &OtaLayout {
        &self.layout
    }

    /// Archives the tree, publishes it under its final name, then applies the
    /// retention cap. With `max_backups == 0` the new archive is pruned at once.
    pub fn create(&self, name: Option<&str>, max_backups: u32) -> Result<CreatedBackup, OtaError> {
        self.layout.ensure_base_dirs()?;
        let (name, staging) = match name {
            Some(explicit) => {
                validate_backup_name(explicit)?;
                let staging = self.try_reserve(explicit)?.ok_or_else(|| {
                    OtaError::invalid_input(format!("backup '{explicit}' already exists"))
                })?;
                (explicit.to_string(), staging)
            }
            None => self.reserve_generated(Local::now())?,
        };

        let archive_path = self.layout.backup_archive_path(&name);
        let staging_path = self.layout.backup_staging_path(&name);
        let checksum_path = self.layout.backup_checksum_path(&name);

        let entries = match self.write_archive(staging) {
            Ok(entries) => entries,
            Err(err) => {
                let _ = fs::remove_file(&staging_path);
                return Err(OtaError::backup(format!(
                    "failed to archive {}: {err}",
                    self.layout.repo_root().display()
                )));
            }
        };

        let sha256 = match publish(&staging_path, &archive_path, &checksum_path) {
            Ok(sha256) => sha256,
            Err(err) => {
                let _ = fs::remove_file(&staging_path);
                return Err(OtaError::backup(format!(
                    "failed to publish backup {}: {err}",
                    archive_path.display()
                )));
            }
        };

        info!(
            target: "kiosk::backup",
            backup = %name,
            path = %archive_path.display(),
            entries,
            "backup created"
        );

        self.prune(max_backups);

        Ok(CreatedBackup {
            name,
            path: archive_path,
            sha256,
            entries,
        })
    }

    pub fn list(&self) -> Result<Vec<BackupRecord>, OtaError> {
        let dir = self.layout.backup_dir();
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(OtaError::backup(format!(
                    "failed to read backup directory {}: {err}",
                    dir.display()
                )));
            }
        };

        let suffix = format!(".{BACKUP_EXTENSION}");
        let mut records = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|err| {
                OtaError::backup(format!(
                    "failed to read backup directory {}: {err}",
                    dir.display()
                ))
            })?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            let Some(name) = file_name.strip_suffix(&suffix) else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) => {
                    warn!(target: "kiosk::backup", file = file_name, error = %err, "skipping unreadable backup");
                    continue;
                }
            };
            let created_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| DateTime::<Utc>::from(UNIX_EPOCH));
            records.push(BackupRecord {
                name: name.to_string(),
                path: entry.path(),
                size_bytes: metadata.len(),
                created_at,
            });
        }

        records.sort_by(newest_first);
        Ok(records)
    }

    pub fn prune(&self, max_backups: u32) -> Vec<String> {
        let records = match self.list() {
            Ok(records) => records,
            Err(err) => {
                warn!(target: "kiosk::backup", error = %err, "failed to list backups for pruning");
                return Vec::new();
            }
        };

        let keep = usize::try_from(max_backups).unwrap_or(usize::MAX);
        let mut removed = Vec::new();
        for record in records.into_iter().skip(keep) {
            if let Err(err) = fs::remove_file(&record.path) {
                warn!(target: "kiosk::backup", backup = %record.name, error = %err, "failed to prune backup");
                continue;
            }
            if let Err(err) = remove_file_if_exists(&self.layout.backup_checksum_path(&record.name)) {
                warn!(target: "kiosk::backup", backup = %record.name, error = %err, "failed to prune backup checksum");
            }
            debug!(target: "kiosk::backup", backup = %record.name, "pruned backup");
            removed.push(record.name);
        }
        removed
    }

    pub(crate) fn reserve_generated(&self, now: DateTime<Local>) -> Result<(String, File), OtaError> {
        let base = format!("backup_{}", now.format("%Y%m%d_%H%M%S"));
        let mut candidate = base.clone();
        let mut suffix = 1_u32;
        loop {
            if let Some(staging) = self.try_reserve(&candidate)? {
                return Ok((candidate, staging));
            }
            suffix += 1;
            candidate = format!("{base}_{suffix}");
        }
    }

    /// The staging file doubles as the name reservation: whoever creates it
    /// owns the name until the archive is published. `None` when the name is
    /// taken or being written.
    fn try_reserve(&self, name: &str) -> Result<Option<File>, OtaError> {
        let archive_path = self.layout.backup_archive_path(name);
        if archive_path.exists() {
            return Ok(None);
        }
        let staging_path = self.layout.backup_staging_path(name);
        let staging = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => {
                return Err(OtaError::backup(format!(
                    "failed to create {}: {err}",
                    staging_path.display()
                )));
            }
        };
        if archive_path.exists() {
            drop(staging);
            let _ = fs::remove_file(&staging_path);
            return Ok(None);
        }
        Ok(Some(staging))
    }

    fn write_archive(&self, staging: File) -> io::Result<u64> {
        let encoder = zstd::Encoder::new(BufWriter::new(staging), COMPRESSION_LEVEL)?;
        let mut builder = Builder::new(encoder);
        builder.follow_symlinks(false);

        let skip = self.skipped_dirs();
        let mut entries = 0_u64;
        append_tree(
            &mut builder,
            self.layout.repo_root(),
            Path::new(""),
            &skip,
            &mut entries,
        )?;

        let encoder = builder.into_inner()?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|err| err.into_error())?
            .sync_all()?;
        Ok(entries)
    }

    fn skipped_dirs(&self) -> Vec<PathBuf> {
        let mut skip = vec![self.layout.backup_dir().to_path_buf()];
        if self.layout.state_dir() != self.layout.backup_dir() {
            skip.push(self.layout.state_dir().to_path_buf());
        }
        skip
    }
}

fn append_tree<W: Write>(
    builder: &mut Builder<W>,
    root: &Path,
    relative: &Path,
    skip: &[PathBuf],
    entries: &mut u64,
) -> io::Result<()> {
    let dir = root.join(relative);
    let mut children = fs::read_dir(&dir)?.collect::<Result<Vec<_>, _>>()?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let file_name = child.file_name();
        if file_name
            .to_str()
            .is_some_and(|name| EXCLUDED_DIR_NAMES.contains(&name))
        {
            continue;
        }
        let full = child.path();
        if skip.iter().any(|skipped| skipped == &full) {
            continue;
        }

        let child_relative = relative.join(&file_name);
        let file_type = child.file_type()?;
        if file_type.is_dir() {
            builder.append_dir(&child_relative, &full)?;
            *entries += 1;
            append_tree(builder, root, &child_relative, skip, entries)?;
        } else if file_type.is_file() || file_type.is_symlink() {
            builder.append_path_with_name(&full, &child_relative)?;
            *entries += 1;
        }
    }
    Ok(())
}

fn publish(staging_path: &Path, archive_path: &Path, checksum_path: &Path) -> io::Result<String> {
    let sha256 = sha256_file_hex(staging_path)?;
    let file_name = archive_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    fs::write(checksum_path, format!("{sha256}  {file_name}\n"))?;
    if let Err(err) = fs::rename(staging_path, archive_path) {
        let _ = fs::remove_file(checksum_path);
        return Err(err);
    }
    Ok(sha256)
}

fn newest_first(left: &BackupRecord, right: &BackupRecord) -> Ordering {
    right
        .created_at
        .cmp(&left.created_at)
        .then_with(|| right.name.cmp(&left.name))
}

pub fn validate_backup_name(name: &str) -> Result<(), OtaError> {
    if name.is_empty() {
        return Err(OtaError::invalid_input("backup name must not be empty"));
    }
    if name.len() > MAX_BACKUP_NAME_LEN {
        return Err(OtaError::invalid_input(format!(
            "backup name must be at most {MAX_BACKUP_NAME_LEN} characters"
        )));
    }
    if name.starts_with('.') || name.starts_with('-') {
        return Err(OtaError::invalid_input(format!(
            "backup name must not start with '.' or '-': '{name}'"
        )));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
    {
        return Err(OtaError::invalid_input(format!(
            "backup name may only contain letters, digits, '.', '_' and '-': '{name}'"
        )));
    }
    Ok(())
}
