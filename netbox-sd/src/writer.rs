//! Atomic output of discovery documents.
//!
//! Documents are written to a temporary file in the destination directory,
//! synced, and renamed over the destination. Readers see either the previous
//! or the new complete file, never a partial one.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use netbox_sd_common::DiscoveryDocument;
use tracing::{debug, info};

use crate::error::ExporterError;

/// What happened to an output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New content was renamed into place.
    Written,
    /// The file already had identical content and was left alone.
    Unchanged,
}

/// Summary of a directory-mode write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryOutcome {
    pub written: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

/// Atomically replace `dst` with what `action` writes.
///
/// The temporary file is created next to `dst` and removed if `action` or
/// any later step fails, leaving `dst` untouched.
pub fn write_atomically<F>(dst: &Path, action: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> io::Result<()>,
{
    let dir = parent_dir(dst);
    let file_name = dst.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name")
    })?;

    let mut prefix = std::ffi::OsString::from(".");
    prefix.push(file_name);
    prefix.push(".");

    let tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;

    {
        let mut w = BufWriter::new(tmp.as_file());
        action(&mut w)?;
        w.flush()?;
    }
    // Temp files are created 0600; the scraper usually runs as another user.
    set_readable(tmp.as_file())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst).map_err(|e| e.error)?;
    sync_dir(dir)?;

    Ok(())
}

/// Write `bytes` to `dst` unless it already holds exactly those bytes.
pub fn write_if_changed(dst: &Path, bytes: &[u8]) -> Result<WriteOutcome, ExporterError> {
    match fs::read(dst) {
        Ok(existing) if existing == bytes => {
            debug!(path = %dst.display(), "Output unchanged");
            return Ok(WriteOutcome::Unchanged);
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ExporterError::io(dst, e)),
    }

    write_atomically(dst, |w| w.write_all(bytes)).map_err(|e| ExporterError::io(dst, e))?;
    info!(path = %dst.display(), bytes = bytes.len(), "Output updated");
    Ok(WriteOutcome::Written)
}

/// Write one document to a single file.
pub fn write_document(dst: &Path, doc: &DiscoveryDocument) -> Result<WriteOutcome, ExporterError> {
    let bytes = doc.to_json_bytes().map_err(|e| {
        ExporterError::io(dst, io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    })?;
    write_if_changed(dst, &bytes)
}

/// Write each document to `<dir>/<name>.json` and remove `.json` files
/// that are no longer produced.
///
/// Stale files are only removed after every document was written.
pub fn write_directory(
    dir: &Path,
    docs: &BTreeMap<String, DiscoveryDocument>,
) -> Result<DirectoryOutcome, ExporterError> {
    fs::create_dir_all(dir).map_err(|e| ExporterError::io(dir, e))?;

    let mut outcome = DirectoryOutcome::default();
    let mut keep = BTreeSet::new();

    for (name, doc) in docs {
        let file_name = PathBuf::from(format!("{}.json", name));
        let path = dir.join(&file_name);
        match write_document(&path, doc)? {
            WriteOutcome::Written => outcome.written.push(path),
            WriteOutcome::Unchanged => outcome.unchanged.push(path),
        }
        keep.insert(file_name);
    }

    let pattern = Path::new(&glob::Pattern::escape(&dir.to_string_lossy())).join("*.json");
    let entries = glob::glob(&pattern.to_string_lossy()).map_err(|e| {
        ExporterError::io(dir, io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
    })?;

    for entry in entries {
        let path = entry.map_err(|e| ExporterError::io(dir, io::Error::from(e)))?;
        let is_kept = path
            .file_name()
            .is_some_and(|name| keep.contains(Path::new(name)));
        if is_kept || !path.is_file() {
            continue;
        }
        fs::remove_file(&path).map_err(|e| ExporterError::io(&path, e))?;
        info!(path = %path.display(), "Stale output removed");
        outcome.removed.push(path);
    }

    Ok(outcome)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn set_readable(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_readable(_file: &File) -> io::Result<()> {
    Ok(())
}

/// Persist the rename itself.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
