use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::types::Xattr;

/// a directory listing, entries sorted byte-wise by name and unique per name
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// create a new tree, validating and sorting entries
    pub fn new(mut entries: Vec<TreeEntry>) -> Result<Self> {
        for entry in &entries {
            validate_entry_name(&entry.name)?;
        }

        entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        for window in entries.windows(2) {
            if window[0].name == window[1].name {
                return Err(Error::InvalidTree(format!(
                    "duplicate entry name: {}",
                    window[0].name
                )));
            }
        }

        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<TreeEntry> {
        self.entries
    }

    /// look up entry by name
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_bytes().cmp(name.as_bytes()))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidEntryName("empty name".to_string()));
    }
    if name.contains('/') {
        return Err(Error::InvalidEntryName(format!(
            "name contains '/': {}",
            name
        )));
    }
    if name.contains('\0') {
        return Err(Error::InvalidEntryName(format!(
            "name contains null byte: {}",
            name
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidEntryName(format!("reserved name: {}", name)));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// what a tree entry points at
///
/// file metadata lives in the blob; directory metadata lives here since a
/// tree object is shared by every directory with the same contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Regular {
        hash: Hash,
        size: u64,
    },

    /// blob content is the link target
    Symlink { hash: Hash },

    Directory {
        hash: Hash,
        uid: u32,
        gid: u32,
        mode: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        xattrs: Vec<Xattr>,
    },
}

impl EntryKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EntryKind::Regular { .. } => "regular",
            EntryKind::Symlink { .. } => "symlink",
            EntryKind::Directory { .. } => "directory",
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, EntryKind::Directory { .. })
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, EntryKind::Regular { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, EntryKind::Symlink { .. })
    }

    /// every entry kind references exactly one object
    pub fn hash(&self) -> &Hash {
        match self {
            EntryKind::Regular { hash, .. } => hash,
            EntryKind::Symlink { hash } => hash,
            EntryKind::Directory { hash, .. } => hash,
        }
    }

    pub fn regular(hash: Hash, size: u64) -> Self {
        Self::Regular { hash, size }
    }

    pub fn symlink(hash: Hash) -> Self {
        Self::Symlink { hash }
    }

    pub fn directory(hash: Hash, uid: u32, gid: u32, mode: u32) -> Self {
        Self::directory_with_xattrs(hash, uid, gid, mode, vec![])
    }

    pub fn directory_with_xattrs(
        hash: Hash,
        uid: u32,
        gid: u32,
        mode: u32,
        xattrs: Vec<Xattr>,
    ) -> Self {
        Self::Directory {
            hash,
            uid,
            gid,
            mode,
            xattrs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_sorting() {
        let entries = vec![
            TreeEntry::new("zebra", EntryKind::regular(Hash::ZERO, 0)),
            TreeEntry::new("alpha", EntryKind::regular(Hash::ZERO, 0)),
            TreeEntry::new("beta", EntryKind::regular(Hash::ZERO, 0)),
        ];
        let tree = Tree::new(entries).unwrap();
        let names: Vec<_> = tree.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "zebra"]);
    }

    #[test]
    fn test_tree_get() {
        let tree = Tree::new(vec![
            TreeEntry::new("bin", EntryKind::directory(Hash::ZERO, 0, 0, 0o40755)),
            TreeEntry::new("lib", EntryKind::symlink(Hash::ZERO)),
        ])
        .unwrap();

        assert!(tree.get("bin").unwrap().kind.is_directory());
        assert!(tree.get("lib").unwrap().kind.is_symlink());
        assert!(tree.get("usr").is_none());
    }

    #[test]
    fn test_tree_rejects_bad_names() {
        for name in ["", "foo/bar", "foo\0bar", ".", ".."] {
            let entries = vec![TreeEntry::new(name, EntryKind::regular(Hash::ZERO, 0))];
            assert!(
                matches!(Tree::new(entries), Err(Error::InvalidEntryName(_))),
                "accepted {:?}",
                name
            );
        }
    }

    #[test]
    fn test_tree_rejects_duplicates() {
        let entries = vec![
            TreeEntry::new("same", EntryKind::regular(Hash::ZERO, 0)),
            TreeEntry::new("same", EntryKind::symlink(Hash::ZERO)),
        ];
        assert!(matches!(Tree::new(entries), Err(Error::InvalidTree(_))));
    }

    #[test]
    fn test_entry_kind_hash() {
        let h = Hash::digest(b"x");
        assert_eq!(EntryKind::regular(h, 1).hash(), &h);
        assert_eq!(EntryKind::symlink(h).hash(), &h);
        assert_eq!(EntryKind::directory(h, 0, 0, 0o40755).hash(), &h);
    }

    #[test]
    fn test_tree_cbor_determinism() {
        let tree1 = Tree::new(vec![
            TreeEntry::new("b", EntryKind::regular(Hash::ZERO, 0)),
            TreeEntry::new("a", EntryKind::regular(Hash::ZERO, 0)),
        ])
        .unwrap();
        let tree2 = Tree::new(vec![
            TreeEntry::new("a", EntryKind::regular(Hash::ZERO, 0)),
            TreeEntry::new("b", EntryKind::regular(Hash::ZERO, 0)),
        ])
        .unwrap();

        let mut bytes1 = Vec::new();
        let mut bytes2 = Vec::new();
        ciborium::into_writer(&tree1, &mut bytes1).unwrap();
        ciborium::into_writer(&tree2, &mut bytes2).unwrap();

        assert_eq!(bytes1, bytes2);
        let parsed: Tree = ciborium::from_reader(&bytes1[..]).unwrap();
        assert_eq!(parsed, tree1);
    }
}
