//! Archive writer.
//!
//! The archive is written to `<destination>.partial` and renamed into place
//! only after the ZIP central directory has been flushed and synced, so an
//! interrupted backup never leaves a truncated `.zip` behind.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{ArchiveLocator, PARTIAL_SUFFIX, asset_entry_name};
use crate::error::{PvError, Result};
use crate::snapshot::{AssetResolver, MANIFEST_ENTRY, Snapshot, asset_extension, codec};

/// Writes snapshots as backup archives.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveWriter {
    options: SimpleFileOptions,
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveWriter {
    pub fn new() -> Self {
        // Fixed timestamps keep identical snapshots byte-identical.
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(0o644);
        Self { options }
    }

    /// Writes `snapshot` and the assets it references to `destination`.
    ///
    /// Assets the resolver cannot locate, or whose file cannot be read as a
    /// regular file, are left out and counted in
    /// [`ArchiveLocator::assets_missing`].
    #[instrument(skip_all, fields(destination = %destination.display()))]
    pub fn write(
        &self,
        snapshot: &Snapshot,
        resolver: &dyn AssetResolver,
        destination: &Path,
    ) -> Result<ArchiveLocator> {
        if destination.exists() {
            return Err(PvError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", destination.display()),
            )));
        }
        let manifest = codec::encode(snapshot)?;

        let partial = PartialArchive::create(destination)?;
        let mut zip = ZipWriter::new(partial.open()?);

        zip.start_file(MANIFEST_ENTRY, self.options)?;
        zip.write_all(&manifest)?;

        let mut assets_written = 0;
        let mut assets_missing = 0;
        for handle in snapshot.asset_handles() {
            let Some(path) = resolver.resolve(handle) else {
                warn!(%handle, "Asset has no live file, omitting");
                assets_missing += 1;
                continue;
            };
            let bytes = match read_asset(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        %handle,
                        path = %path.display(),
                        error = %e,
                        "Asset unreadable, omitting"
                    );
                    assets_missing += 1;
                    continue;
                }
            };
            zip.start_file(asset_entry_name(handle, &asset_extension(path)), self.options)?;
            zip.write_all(&bytes)?;
            debug!(%handle, bytes = bytes.len(), "Asset written");
            assets_written += 1;
        }

        let mut file = zip.finish()?;
        file.flush()?;
        file.sync_all()?;
        drop(file);

        let (size_bytes, sha256) = digest_file(&partial.path)?;
        let path = partial.commit(destination)?;

        info!(
            path = %path.display(),
            size_bytes,
            assets_written,
            assets_missing,
            "Backup archive written"
        );
        Ok(ArchiveLocator {
            path,
            size_bytes,
            sha256,
            assets_written,
            assets_missing,
        })
    }
}

/// An in-progress archive file, removed on drop unless committed.
struct PartialArchive {
    path: PathBuf,
    committed: bool,
}

impl PartialArchive {
    fn create(destination: &Path) -> Result<Self> {
        let mut name = destination.as_os_str().to_owned();
        name.push(PARTIAL_SUFFIX);
        let path = PathBuf::from(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().write(true).create_new(true).open(&path)?;
        Ok(Self {
            path,
            committed: false,
        })
    }

    fn open(&self) -> Result<File> {
        Ok(OpenOptions::new().write(true).truncate(true).open(&self.path)?)
    }

    fn commit(mut self, destination: &Path) -> Result<PathBuf> {
        std::fs::rename(&self.path, destination)?;
        self.committed = true;
        Ok(destination.to_path_buf())
    }
}

impl Drop for PartialArchive {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), error = %e, "Could not remove partial archive");
            }
        }
    }
}

/// Whole contents of a live asset file.
fn read_asset(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    if !file.metadata()?.is_file() {
        return Err(io::Error::other("not a regular file"));
    }
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Size and hex SHA-256 of a file.
pub(crate) fn digest_file(path: &Path) -> Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hex::encode(hasher.finalize())))
}
