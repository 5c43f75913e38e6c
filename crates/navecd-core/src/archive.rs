//! Project archive creation and extraction
//!
//! The artifact content layer is a gzip-compressed POSIX tar of the project
//! directory with slash-separated paths relative to the project root.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::error::{CoreError, Result};

/// Packs `source` into a gzip-compressed tarball at `archive_path`.
pub fn create(source: &Path, archive_path: &Path) -> Result<PathBuf> {
    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    append_dir(&mut builder, source, source)?;

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    Ok(archive_path.to_path_buf())
}

fn append_dir<W: std::io::Write>(
    builder: &mut Builder<W>,
    root: &Path,
    dir: &Path,
) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    // Stable order makes archives reproducible across runs.
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = path.strip_prefix(root).map_err(|_| CoreError::Archive {
            message: format!("entry {} escapes the archive root", path.display()),
        })?;
        let archive_path = posix_path(relative);

        if entry.file_type()?.is_dir() {
            builder.append_dir(&archive_path, &path)?;
            append_dir(builder, root, &path)?;
        } else {
            let mut file = File::open(&path)?;
            builder.append_file(&archive_path, &mut file)?;
        }
    }
    Ok(())
}

fn posix_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extracts a gzip-compressed tarball into `target`. Extraction into a
/// directory with prior contents is allowed; existing files are
/// overwritten.
pub fn extract(archive_path: &Path, target: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);
    archive.set_overwrite(true);

    std::fs::create_dir_all(target)?;
    archive.unpack(target).map_err(|err| CoreError::Archive {
        message: format!("failed to unpack {}: {err}", archive_path.display()),
    })
}
