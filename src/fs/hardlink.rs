use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::hash::Hash;

/// tracker for detecting hardlinks during commit
///
/// files with the same (dev, ino) pair are one inode; its content is stored
/// once and every tree entry for it points at the same blob.
#[derive(Default)]
pub struct HardlinkTracker {
    seen: HashMap<(u64, u64), (Hash, u64)>,
}

impl HardlinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// blob and size already recorded for this inode, if any
    pub fn get(&self, dev: u64, ino: u64) -> Option<(Hash, u64)> {
        self.seen.get(&(dev, ino)).copied()
    }

    pub fn record(&mut self, dev: u64, ino: u64, hash: Hash, size: u64) {
        self.seen.insert((dev, ino), (hash, size));
    }

    /// number of unique inodes tracked
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// tracker for recreating hardlinks during a copy checkout
///
/// the first path materialized for a blob becomes the link target for every
/// later entry referencing the same blob, as long as that path still holds
/// the inode that was recorded.
#[derive(Default)]
pub struct CheckoutHardlinkTracker {
    paths: HashMap<Hash, (PathBuf, u64, u64)>,
}

impl CheckoutHardlinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, hash: Hash, fs_path: PathBuf) {
        if let Ok(meta) = fs_path.symlink_metadata() {
            self.paths
                .entry(hash)
                .or_insert((fs_path, meta.dev(), meta.ino()));
        }
    }

    /// first checked-out path for `hash`, if it still holds the same inode
    pub fn get(&self, hash: &Hash) -> Option<&Path> {
        let (path, dev, ino) = self.paths.get(hash)?;
        let meta = path.symlink_metadata().ok()?;
        (meta.is_file() && meta.dev() == *dev && meta.ino() == *ino).then_some(path.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_second_occurrence() {
        let mut tracker = HardlinkTracker::new();
        let h = Hash::digest(b"x");

        assert!(tracker.get(1, 12345).is_none());
        tracker.record(1, 12345, h, 10);

        assert_eq!(tracker.get(1, 12345), Some((h, 10)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_same_ino_different_dev() {
        let mut tracker = HardlinkTracker::new();

        tracker.record(1, 12345, Hash::ZERO, 0);
        assert!(tracker.get(2, 12345).is_none());
    }

    #[test]
    fn test_checkout_tracker_keeps_first_path() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::write(&first, "x").unwrap();
        std::fs::write(&second, "x").unwrap();

        let mut tracker = CheckoutHardlinkTracker::new();
        let h = Hash::digest(b"blob");
        tracker.record(h, first.clone());
        tracker.record(h, second);

        assert_eq!(tracker.get(&h), Some(first.as_path()));
        assert!(tracker.get(&Hash::ZERO).is_none());
    }

    #[test]
    fn test_checkout_tracker_ignores_replaced_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, "x").unwrap();

        let mut tracker = CheckoutHardlinkTracker::new();
        tracker.record(Hash::ZERO, path.clone());

        // a later layer put a different file at the same path
        let other = dir.path().join("other");
        std::fs::write(&other, "y").unwrap();
        std::fs::rename(&other, &path).unwrap();

        assert!(tracker.get(&Hash::ZERO).is_none());
    }

    #[test]
    fn test_checkout_tracker_ignores_removed_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        std::fs::write(&path, "x").unwrap();

        let mut tracker = CheckoutHardlinkTracker::new();
        tracker.record(Hash::ZERO, path.clone());
        std::fs::remove_file(&path).unwrap();

        assert!(tracker.get(&Hash::ZERO).is_none());
    }
}
