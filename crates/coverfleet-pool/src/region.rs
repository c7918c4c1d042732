//! Shared-memory region files.
//!
//! A region is a flat, zero-filled, world-writable file of fixed size.
//! Workers map it and set bits; the pool only creates and removes it.

use std::fs::{self, OpenOptions, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::{PoolError, PoolResult};

const REGION_MODE: u32 = 0o666;

/// Create the region if absent. Returns `true` when a new file was made.
pub fn ensure_region(path: &Path, size: u64) -> PoolResult<bool> {
    let creation = |source| PoolError::RegionCreation {
        path: path.to_path_buf(),
        source,
    };

    let file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(creation(e)),
    };
    // set_len zero-fills. Explicit chmod: the umask would otherwise strip
    // group/other write.
    let prepared = file
        .set_len(size)
        .and_then(|()| fs::set_permissions(path, Permissions::from_mode(REGION_MODE)));
    if let Err(e) = prepared {
        // Never leave a short or unwritable region for a later run to adopt.
        let _ = fs::remove_file(path);
        return Err(creation(e));
    }
    Ok(true)
}

/// Remove a region. A region that does not exist counts as removed.
pub fn remove_region(path: &Path) -> PoolResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(PoolError::RegionRemoval {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_zeroed_world_writable_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proj_edge_1");

        assert!(ensure_region(&path, 4096).unwrap());

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 4096);
        assert_eq!(meta.permissions().mode() & 0o777, 0o666);
        assert!(fs::read(&path).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn creation_is_idempotent_and_preserves_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proj_edge_1");
        fs::write(&path, [0xAA; 8]).unwrap();

        assert!(!ensure_region(&path, 4096).unwrap());
        assert_eq!(fs::read(&path).unwrap(), vec![0xAA; 8]);
    }

    #[test]
    fn creation_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("proj_edge_1");
        assert!(matches!(
            ensure_region(&path, 16),
            Err(PoolError::RegionCreation { .. })
        ));
    }

    #[test]
    fn failed_sizing_removes_the_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proj_edge_1");
        // No filesystem accepts a file this large.
        assert!(matches!(
            ensure_region(&path, u64::MAX),
            Err(PoolError::RegionCreation { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn remove_missing_region_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proj_bitmap_1");
        assert!(!remove_region(&path).unwrap());

        ensure_region(&path, 16).unwrap();
        assert!(remove_region(&path).unwrap());
        assert!(!path.exists());
    }
}
