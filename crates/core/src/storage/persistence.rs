//! Checksummed collection files with a one-deep backup.
//!
//! Every file is `[payload][magic "VKV1"][u32 CRC32 BE]`. Committing a new
//! version first moves the current file to `<name>-backup` (removing any
//! older backup), then writes the new file through a temp file and rename.
//! Loading tries the primary copy and falls back to the backup; if neither
//! is readable the load fails.

use crate::config::BACKUP_SUFFIX;
use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes written before the CRC32 footer.
const FILE_MAGIC: &[u8; 4] = b"VKV1";

const FOOTER_LEN: usize = 8;

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Append the magic and CRC32 footer to `payload`.
pub fn seal(payload: &[u8]) -> Vec<u8> {
    let crc = crc32fast::hash(payload);
    let mut out = Vec::with_capacity(payload.len() + FOOTER_LEN);
    out.extend_from_slice(payload);
    out.extend_from_slice(FILE_MAGIC);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

/// Verify the footer of `raw` and return the payload.
pub fn unseal<'a>(raw: &'a [u8], path: &Path) -> Result<&'a [u8]> {
    if raw.len() < FOOTER_LEN || &raw[raw.len() - FOOTER_LEN..raw.len() - 4] != FILE_MAGIC {
        return Err(Error::Corrupted(format!("{path:?} has no checksum footer")));
    }
    let (payload, footer) = raw.split_at(raw.len() - FOOTER_LEN);
    let stored = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(Error::Corrupted(format!(
            "CRC32 mismatch in {path:?}: expected {stored:#010x}, got {computed:#010x}"
        )));
    }
    Ok(payload)
}

/// Write a new version of `path`, keeping the previous one as its backup.
pub fn commit(path: &Path, payload: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let backup = backup_path(path);
    if path.exists() {
        if backup.exists() {
            fs::remove_file(&backup)?;
        }
        fs::rename(path, &backup)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&seal(payload))?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    tracing::debug!("Committed {:?} ({} bytes)", path, payload.len());
    Ok(())
}

fn read_and_parse<T>(path: &Path, parse: &impl Fn(&[u8]) -> Result<T>) -> Result<T> {
    let raw = fs::read(path)?;
    parse(unseal(&raw, path)?)
}

/// Load `path`, falling back to its backup.
///
/// Returns `Ok(None)` when neither copy exists. A copy whose checksum
/// verifies but whose payload `parse` rejects also counts as unreadable.
pub fn load<T>(path: &Path, parse: impl Fn(&[u8]) -> Result<T>) -> Result<Option<T>> {
    let backup = backup_path(path);
    if !path.exists() && !backup.exists() {
        return Ok(None);
    }
    let primary_err = if path.exists() {
        match read_and_parse(path, &parse) {
            Ok(value) => return Ok(Some(value)),
            Err(e) => {
                tracing::warn!("Failed to load {:?}: {}; trying backup", path, e);
                e.to_string()
            }
        }
    } else {
        format!("{path:?} is missing")
    };
    if backup.exists() {
        match read_and_parse(&backup, &parse) {
            Ok(value) => {
                tracing::warn!("Recovered {:?} from backup", path);
                return Ok(Some(value));
            }
            Err(e) => {
                return Err(Error::Corrupted(format!(
                    "{primary_err}; backup {backup:?} also unreadable: {e}"
                )))
            }
        }
    }
    Err(Error::Corrupted(primary_err))
}
