use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use crate::error::{Error, Result};

/// Normalize a repository path.
///
/// - Leading `/` and empty or `.` segments are dropped.
/// - `..` pops the previous segment; popping past the root fails with
///   `Error::OutsideRepository`.
///
/// The root itself normalizes to `""`.
pub fn normalize(path: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::OutsideRepository(path.to_string()));
                }
            }
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

/// `<path>.dvc`, the pointer DVC keeps next to a tracked file.
pub fn pointer_of(rel: &str) -> String {
    format!("{}.dvc", rel)
}

/// `.gitignore` in the same directory as `rel`.
pub fn gitignore_of(rel: &str) -> String {
    match rel.rsplit_once('/') {
        Some((dir, _)) => format!("{}/.gitignore", dir),
        None => ".gitignore".to_string(),
    }
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut f = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Copy `src` to `dst`, creating parent directories.
///
/// The copy is skipped when `dst` already holds the same bytes (this is
/// also what happens when both name the same file). Returns the size of
/// the file.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if dst.is_file() {
        let old = sha256_file(dst).unwrap_or_default();
        let new = sha256_file(src)?;
        if old == new {
            return Ok(fs::metadata(dst)?.len());
        }
    }
    fs::copy(src, dst)
}
