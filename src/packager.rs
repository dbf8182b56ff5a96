//! Builds the zip artifact for a download request.
//!
//! The archive is written to `<dest>.part` and renamed into place only
//! after it is complete, so a crash never leaves a truncated file at the
//! final path. Blocking I/O; callers run it on `spawn_blocking`.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::Compression;
use crate::error::{Result, VaultError};

const CHUNK_SIZE: usize = 64 * 1024;

/// A finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackReport {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
    pub files: u64,
    /// Source entries left out: unreadable files, symlinks and other
    /// non-regular files.
    pub skipped: u64,
}

/// The deterministic artifact path for `request_id`.
pub fn artifact_path(dir: &Path, request_id: &str) -> PathBuf {
    dir.join(format!("{}.zip", request_id))
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Pack every file under `source` into a zip at `dest`.
pub fn build_archive(
    source: &Path,
    dest: &Path,
    compression: Compression,
    cancel: &CancellationToken,
) -> Result<PackReport> {
    let meta = std::fs::metadata(source).map_err(|e| {
        VaultError::ArchiveBuild(format!("source {} is unreadable: {}", source.display(), e))
    })?;
    if !meta.is_dir() {
        return Err(VaultError::ArchiveBuild(format!(
            "source {} is not a directory",
            source.display()
        )));
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            VaultError::ArchiveBuild(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }

    let part = part_path(dest);
    let result = write_zip(source, &part, compression, cancel);
    let (files, skipped) = match result {
        Ok(counts) => counts,
        Err(e) => {
            let _ = std::fs::remove_file(&part);
            return Err(e);
        }
    };

    let (size, sha256) = match hash_file(&part) {
        Ok(digest) => digest,
        Err(e) => {
            let _ = std::fs::remove_file(&part);
            return Err(e);
        }
    };
    std::fs::rename(&part, dest).map_err(|e| {
        let _ = std::fs::remove_file(&part);
        VaultError::ArchiveBuild(format!("cannot move archive into place: {}", e))
    })?;

    Ok(PackReport {
        path: dest.to_path_buf(),
        size,
        sha256,
        files,
        skipped,
    })
}

fn write_zip(
    source: &Path,
    part: &Path,
    compression: Compression,
    cancel: &CancellationToken,
) -> Result<(u64, u64)> {
    let write_err = |e: &dyn std::fmt::Display| {
        VaultError::ArchiveBuild(format!("write to {} failed: {}", part.display(), e))
    };

    let file = File::create(part).map_err(|e| write_err(&e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(match compression {
            Compression::Deflated => CompressionMethod::Deflated,
            Compression::Stored => CompressionMethod::Stored,
        })
        .large_file(true);

    let mut files = 0u64;
    let mut skipped = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];

    for entry in WalkDir::new(source).sort_by_file_name() {
        if cancel.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(target: "download::jobs", source = %source.display(), error = %e, "skipping unreadable entry");
                skipped += 1;
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(|e| write_err(&e))?;
            continue;
        }
        if !entry.file_type().is_file() {
            tracing::warn!(target: "download::jobs", path = %entry.path().display(), symlink = entry.path_is_symlink(), "skipping non-regular file");
            skipped += 1;
            continue;
        }

        let mut reader = match File::open(entry.path()) {
            Ok(f) => BufReader::new(f),
            Err(e) => {
                tracing::warn!(target: "download::jobs", path = %entry.path().display(), error = %e, "skipping unreadable file");
                skipped += 1;
                continue;
            }
        };

        match copy_entry(&mut zip, &name, options, &mut reader, &mut buf, cancel)? {
            Copied::Whole => files += 1,
            Copied::Aborted(e) => {
                tracing::warn!(target: "download::jobs", path = %entry.path().display(), error = %e, "read failed mid-file, leaving it out");
                skipped += 1;
            }
        }
    }

    let mut file = zip.finish().map_err(|e| write_err(&e))?;
    // An aborted entry rewinds the writer; drop whatever it left past the end.
    let end = file.stream_position().map_err(|e| write_err(&e))?;
    file.set_len(end).map_err(|e| write_err(&e))?;
    file.flush().map_err(|e| write_err(&e))?;
    file.sync_all().map_err(|e| write_err(&e))?;
    Ok((files, skipped))
}

enum Copied {
    Whole,
    /// The source failed to read; its partial entry was removed.
    Aborted(std::io::Error),
}

/// Stream `reader` into a new archive entry `name`. A read failure drops
/// the entry and is returned as [`Copied::Aborted`]; only write failures
/// and cancellation are errors.
fn copy_entry<W: Write + Seek, R: Read>(
    zip: &mut ZipWriter<W>,
    name: &str,
    options: SimpleFileOptions,
    reader: &mut R,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<Copied> {
    let write_err =
        |e: &dyn std::fmt::Display| VaultError::ArchiveBuild(format!("write of {} failed: {}", name, e));

    zip.start_file(name, options).map_err(|e| write_err(&e))?;
    loop {
        if cancel.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        let n = match reader.read(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                zip.abort_file().map_err(|e| write_err(&e))?;
                return Ok(Copied::Aborted(e));
            }
        };
        if n == 0 {
            return Ok(Copied::Whole);
        }
        zip.write_all(&buf[..n]).map_err(|e| write_err(&e))?;
    }
}

fn hash_file(path: &Path) -> Result<(u64, String)> {
    let read_err =
        |e: std::io::Error| VaultError::ArchiveBuild(format!("cannot read back archive: {}", e));
    let mut reader = BufReader::new(File::open(path).map_err(read_err)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_dir() -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("Data/Maps")).unwrap();
        std::fs::write(tmp.path().join("game.exe"), b"MZ fake binary").unwrap();
        std::fs::write(tmp.path().join("Data/Maps/e1m1.map"), vec![7u8; 200_000]).unwrap();
        tmp
    }

    #[test]
    fn archive_contains_every_file() {
        let src = game_dir();
        let out = tempfile::TempDir::new().unwrap();
        let dest = artifact_path(out.path(), "req-1");

        let report = build_archive(
            src.path(),
            &dest,
            Compression::Deflated,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.size, std::fs::metadata(&dest).unwrap().len());
        assert_eq!(report.sha256.len(), 64);
        assert!(!part_path(&dest).exists());

        let mut archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut map = archive.by_name("Data/Maps/e1m1.map").unwrap();
        let mut bytes = Vec::new();
        map.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, vec![7u8; 200_000]);
        drop(map);
        assert!(archive.by_name("game.exe").is_ok());
    }

    /// Yields `good` bytes, then fails like a bad sector.
    struct FailingReader {
        good: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.good == 0 {
                return Err(std::io::Error::other("bad sector"));
            }
            let n = self.good.min(buf.len());
            buf[..n].fill(1);
            self.good -= n;
            Ok(n)
        }
    }

    #[test]
    fn unreadable_file_is_left_out_and_archive_continues() {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let mut buf = vec![0u8; 16];
        let cancel = CancellationToken::new();

        let first = copy_entry(&mut zip, "a.txt", options, &mut &b"first"[..], &mut buf, &cancel)
            .unwrap();
        assert!(matches!(first, Copied::Whole));

        let broken = copy_entry(
            &mut zip,
            "b.bin",
            options,
            &mut FailingReader { good: 40 },
            &mut buf,
            &cancel,
        )
        .unwrap();
        assert!(matches!(broken, Copied::Aborted(_)));

        let last = copy_entry(&mut zip, "c.txt", options, &mut &b"last"[..], &mut buf, &cancel)
            .unwrap();
        assert!(matches!(last, Copied::Whole));

        let cursor = zip.finish().unwrap();
        let end = cursor.position() as usize;
        let mut bytes = cursor.into_inner();
        bytes.truncate(end);
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let names: Vec<_> = archive.file_names().map(str::to_string).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a.txt".to_string()));
        assert!(names.contains(&"c.txt".to_string()));
        let mut text = String::new();
        archive
            .by_name("c.txt")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "last");
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_counted_as_skipped() {
        let src = game_dir();
        std::os::unix::fs::symlink(src.path().join("game.exe"), src.path().join("launcher"))
            .unwrap();
        let out = tempfile::TempDir::new().unwrap();
        let dest = artifact_path(out.path(), "req-4");

        let report = build_archive(
            src.path(),
            &dest,
            Compression::Stored,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.skipped, 1);
        let archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        assert!(archive.file_names().all(|n| n != "launcher"));
    }

    #[test]
    fn missing_source_fails_without_artifact() {
        let out = tempfile::TempDir::new().unwrap();
        let dest = artifact_path(out.path(), "req-2");
        let err = build_archive(
            Path::new("/no/such/game"),
            &dest,
            Compression::Stored,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, VaultError::ArchiveBuild(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn cancelled_build_leaves_no_partial_file() {
        let src = game_dir();
        let out = tempfile::TempDir::new().unwrap();
        let dest = artifact_path(out.path(), "req-3");
        let token = CancellationToken::new();
        token.cancel();

        let err = build_archive(
            src.path(),
            &dest,
            Compression::Deflated,
            &token,
        )
        .unwrap_err();
        assert!(matches!(err, VaultError::Cancelled));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }
}
