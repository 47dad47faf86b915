//! Backup archive access.
//!
//! An [`Archive`] hides whether the backup is a tar stream (optionally
//! gzip-compressed) or a zip file. Callers only see [`Archive::entries`],
//! [`Archive::locate_install_root`] and [`Archive::extract`]; no other
//! module knows about container formats.

use crate::error::{RestoreError, Result};
use flate2::read::GzDecoder;
use fleet_core::error::FleetError;
use fleet_core::temp_dir::create_temp_dir;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use zip::ZipArchive;

/// File whose presence marks the application's install root.
pub const INSTALL_MARKER: &str = "install.php";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Prefix of extraction directories created under the system temp dir.
pub const WORKDIR_PREFIX: &str = "fleet-restore-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Tar,
    Zip,
}

/// One member of an archive, as named inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub is_file: bool,
}

enum Handle {
    Tar { file: File, gzip: bool },
    Zip(ZipArchive<File>),
}

/// An opened backup file. The format is detected once, in [`Archive::open`].
pub struct Archive {
    path: PathBuf,
    format: ArchiveFormat,
    handle: Handle,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("gzip", &self.is_gzip())
            .finish()
    }
}

impl Archive {
    /// Open `path`, trying tar first and zip second.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| FleetError::filesystem(e, path, "open"))?;

        let gzip = starts_with_gzip_magic(&mut file)?;
        if looks_like_tar(&mut file, gzip) {
            rewind(&mut file)?;
            debug!(path = %path.display(), gzip, "detected tar archive");
            return Ok(Self {
                path: path.to_path_buf(),
                format: ArchiveFormat::Tar,
                handle: Handle::Tar { file, gzip },
            });
        }

        rewind(&mut file)?;
        match ZipArchive::new(file) {
            Ok(zip) => {
                debug!(path = %path.display(), "detected zip archive");
                Ok(Self {
                    path: path.to_path_buf(),
                    format: ArchiveFormat::Zip,
                    handle: Handle::Zip(zip),
                })
            }
            Err(_) => Err(RestoreError::InvalidArchive {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn is_gzip(&self) -> bool {
        matches!(self.handle, Handle::Tar { gzip: true, .. })
    }

    /// Every member of the archive, in container order.
    ///
    /// Names are normalised: a leading `./` and trailing `/` are dropped.
    pub fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        match &mut self.handle {
            Handle::Tar { file, gzip } => {
                rewind(file)?;
                let mut archive = tar::Archive::new(tar_reader(file, *gzip));
                let mut entries = Vec::new();
                for entry in archive.entries()? {
                    let entry = entry?;
                    let name = normalise_name(&entry.path()?.to_string_lossy());
                    if name.is_empty() {
                        continue;
                    }
                    entries.push(ArchiveEntry {
                        name,
                        is_file: entry.header().entry_type().is_file(),
                    });
                }
                Ok(entries)
            }
            Handle::Zip(zip) => {
                let mut entries = Vec::with_capacity(zip.len());
                for index in 0..zip.len() {
                    let member = zip.by_index(index)?;
                    let name = normalise_name(member.name());
                    if name.is_empty() {
                        continue;
                    }
                    entries.push(ArchiveEntry {
                        name,
                        is_file: !member.is_dir(),
                    });
                }
                Ok(entries)
            }
        }
    }

    /// Directory, relative to the archive root, that holds [`INSTALL_MARKER`].
    ///
    /// The first marker in container order wins. A marker at the archive
    /// root yields an empty path.
    pub fn locate_install_root(&mut self) -> Result<PathBuf> {
        let found = self.entries()?.into_iter().find(|entry| {
            entry.is_file && Path::new(&entry.name).file_name() == Some(INSTALL_MARKER.as_ref())
        });

        match found {
            Some(entry) => Ok(Path::new(&entry.name)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()),
            None => Err(RestoreError::InstallRootNotFound {
                path: self.path.clone(),
                marker: INSTALL_MARKER.to_string(),
            }),
        }
    }

    /// Extract every member into a fresh temporary directory.
    ///
    /// On failure the partially filled directory is removed before the error
    /// is returned, so callers never observe a half-extracted tree.
    pub fn extract(&mut self) -> Result<ExtractedArchive> {
        let workdir = create_temp_dir(WORKDIR_PREFIX)
            .map_err(|e| FleetError::filesystem(e, std::env::temp_dir(), "tempdir"))?;

        info!(
            archive = %self.path.display(),
            workdir = %workdir.path().display(),
            "extracting archive"
        );

        match &mut self.handle {
            Handle::Tar { file, gzip } => {
                rewind(file)?;
                let mut archive = tar::Archive::new(tar_reader(file, *gzip));
                archive.set_preserve_permissions(true);
                archive.unpack(workdir.path())?;
            }
            Handle::Zip(zip) => {
                zip.extract(workdir.path())?;
            }
        }

        Ok(ExtractedArchive { workdir })
    }

    /// Release the underlying file handle.
    pub fn close(self) {
        debug!(path = %self.path.display(), "closing archive");
    }
}

/// An archive materialised on disk. The directory belongs exclusively to the
/// run that extracted it and is deleted by [`ExtractedArchive::cleanup`], or
/// on drop if cleanup never ran.
#[derive(Debug)]
pub struct ExtractedArchive {
    workdir: TempDir,
}

impl ExtractedArchive {
    pub fn root(&self) -> &Path {
        self.workdir.path()
    }

    /// Remove the extraction directory, surfacing any failure.
    pub fn cleanup(self) -> Result<()> {
        let path = self.workdir.path().to_path_buf();
        self.workdir
            .close()
            .map_err(|e| FleetError::filesystem(e, &path, "remove_dir_all"))?;
        debug!(workdir = %path.display(), "removed extraction directory");
        Ok(())
    }
}

fn tar_reader<'a>(file: &'a mut File, gzip: bool) -> Box<dyn Read + 'a> {
    if gzip {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    }
}

fn rewind(file: &mut File) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    Ok(())
}

fn starts_with_gzip_magic(file: &mut File) -> Result<bool> {
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    rewind(file)?;
    Ok(read == magic.len() && magic == GZIP_MAGIC)
}

/// A tar stream whose first header parses with a valid checksum.
fn looks_like_tar(file: &mut File, gzip: bool) -> bool {
    let mut archive = tar::Archive::new(tar_reader(file, gzip));
    let Ok(mut entries) = archive.entries() else {
        return false;
    };
    matches!(entries.next(), Some(Ok(_)))
}

fn normalise_name(raw: &str) -> String {
    let mut name = raw;
    while let Some(stripped) = name.strip_prefix("./") {
        name = stripped;
    }
    name.trim_end_matches('/').to_string()
}
