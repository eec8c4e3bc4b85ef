//! Zip extraction into a freshly created build directory.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use zip::ZipArchive;

/// Unpack every entry of `archive` below `dest`, returning the entry count.
///
/// Directory entries are created; file entries are streamed to their
/// relative path with intermediate directories created on demand. Entries
/// whose names would escape `dest` (absolute paths, `..`) are skipped.
pub(crate) fn unpack(archive: &Path, dest: &Path) -> io::Result<usize> {
    let file = File::open(archive)?;
    let mut archive = ZipArchive::new(file).map_err(io::Error::other)?;
    let mut count = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(io::Error::other)?;
        let Some(enclosed) = entry.enclosed_name().map(|p| dest.join(p)) else {
            tracing::warn!("skipping archive entry outside build dir: {}", entry.name());
            continue;
        };
        if entry.name().ends_with('/') || entry.is_dir() {
            fs::create_dir_all(&enclosed)?;
            count += 1;
            continue;
        }
        if let Some(parent) = enclosed.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&enclosed)?;
        io::copy(&mut entry, &mut outfile)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&enclosed, fs::Permissions::from_mode(mode))?;
            }
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            if name.ends_with('/') {
                writer.add_directory(*name, FileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, FileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        fs::write(path, writer.finish().unwrap().into_inner()).unwrap();
    }

    #[test]
    fn recreates_nested_layout() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("7.zip");
        write_zip(
            &archive,
            &[
                ("Engine/", b""),
                ("Engine/Binaries/Win64/Host.exe", b"MZ"),
                ("Game/Content/Paks/pak0.pak", b"pak"),
            ],
        );
        let dest = tmp.path().join("7");
        fs::create_dir_all(&dest).unwrap();

        let count = unpack(&archive, &dest).unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            fs::read(dest.join("Engine/Binaries/Win64/Host.exe")).unwrap(),
            b"MZ"
        );
        assert!(dest.join("Game/Content/Paks/pak0.pak").is_file());
    }

    #[test]
    fn escaping_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.zip");
        write_zip(&archive, &[("../outside.txt", b"x"), ("inside.txt", b"y")]);
        let dest = tmp.path().join("build");
        fs::create_dir_all(&dest).unwrap();

        let count = unpack(&archive, &dest).unwrap();
        assert_eq!(count, 1);
        assert!(!tmp.path().join("outside.txt").exists());
        assert!(dest.join("inside.txt").exists());
    }

    #[test]
    #[cfg(unix)]
    fn unix_modes_are_restored() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("mode.zip");
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("run.sh", FileOptions::default().unix_permissions(0o755))
            .unwrap();
        writer.write_all(b"#!/bin/sh\n").unwrap();
        fs::write(&archive, writer.finish().unwrap().into_inner()).unwrap();

        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        unpack(&archive, &dest).unwrap();
        let mode = fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
