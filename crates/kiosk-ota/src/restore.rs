use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

use kiosk_core::{BackupRecord, MissingTarget, OtaError};
use tar::Archive;
use tracing::{info, warn};

use crate::backup::{validate_backup_name, BackupArchiver};
use crate::checksum::{parse_checksum_sidecar, sha256_file_hex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredBackup {
    pub name: String,
    pub entries: u64,
    pub checksum_verified: bool,
}

/// Picks the named backup, or the newest one when no name is given.
pub fn resolve_backup(
    archiver: &BackupArchiver,
    name: Option<&str>,
) -> Result<BackupRecord, OtaError> {
    match name {
        None => archiver
            .list()?
            .into_iter()
            .next()
            .ok_or(OtaError::NotFound(MissingTarget::NoBackups)),
        Some(name) => {
            validate_backup_name(name)?;
            archiver
                .list()?
                .into_iter()
                .find(|record| record.name == name)
                .ok_or_else(|| OtaError::NotFound(MissingTarget::Backup(name.to_string())))
        }
    }
}

/// Extracts `record` over the working tree, overwriting files in place.
/// Files created since the backup are left alone.
pub fn restore_backup(
    archiver: &BackupArchiver,
    record: &BackupRecord,
) -> Result<RestoredBackup, OtaError> {
    let checksum_verified = verify_checksum(archiver, record)?;
    let root = archiver.layout().repo_root();
    let entries = extract_archive(&record.path, root).map_err(|err| {
        OtaError::backup(format!(
            "failed to restore backup '{}' into {}: {err}",
            record.name,
            root.display()
        ))
    })?;

    info!(
        target: "kiosk::backup",
        backup = %record.name,
        entries,
        checksum_verified,
        "backup restored"
    );
    Ok(RestoredBackup {
        name: record.name.clone(),
        entries,
        checksum_verified,
    })
}

fn verify_checksum(archiver: &BackupArchiver, record: &BackupRecord) -> Result<bool, OtaError> {
    let sidecar = archiver.layout().backup_checksum_path(&record.name);
    let content = match fs::read_to_string(&sidecar) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(target: "kiosk::backup", backup = %record.name, "backup has no checksum file; restoring unverified");
            return Ok(false);
        }
        Err(err) => {
            return Err(OtaError::backup(format!(
                "failed to read checksum {}: {err}",
                sidecar.display()
            )));
        }
    };

    let expected = parse_checksum_sidecar(&content).ok_or_else(|| {
        OtaError::backup(format!("malformed checksum file {}", sidecar.display()))
    })?;
    let actual = sha256_file_hex(&record.path).map_err(|err| {
        OtaError::backup(format!(
            "failed to hash backup {}: {err}",
            record.path.display()
        ))
    })?;
    if actual != expected {
        return Err(OtaError::backup(format!(
            "checksum mismatch for backup '{}': expected {expected}, got {actual}",
            record.name
        )));
    }
    Ok(true)
}

fn extract_archive(archive_path: &Path, root: &Path) -> io::Result<u64> {
    fs::create_dir_all(root)?;
    let decoder = zstd::Decoder::new(BufReader::new(File::open(archive_path)?))?;
    let mut archive = Archive::new(decoder);
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);

    let mut entries = 0_u64;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.unpack_in(root)? {
            entries += 1;
        } else {
            let path = entry.path()?.display().to_string();
            warn!(target: "kiosk::backup", entry = %path, "refusing archive entry outside the tree");
        }
    }
    Ok(entries)
}
