#![allow(dead_code)]

use std::path::{Path, PathBuf};

use diffcov::diag::Diag;

/// Fresh diagnostic reporter capturing into a buffer so tests never spam
/// stderr.
pub fn capture_diag() -> Diag {
    let diag = Diag::new(0, false);
    diag.start_capture();
    diag
}

/// Write a file under `dir`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// Write an executable shell script under `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = write_file(dir, name, &format!("#!/bin/sh\n{body}\n"));
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}
