use serde::{Deserialize, Serialize};

/// extended attribute (name + value)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xattr {
    pub name: String,
    pub value: Vec<u8>,
}

impl Xattr {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// metadata stored alongside blob content and covered by its checksum
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobMeta {
    pub uid: u32,
    pub gid: u32,
    /// full st_mode, file type bits included
    pub mode: u32,
    pub xattrs: Vec<Xattr>,
}

impl BlobMeta {
    pub fn new(uid: u32, gid: u32, mode: u32) -> Self {
        Self {
            uid,
            gid,
            mode,
            xattrs: vec![],
        }
    }

    pub fn with_xattrs(mut self, xattrs: Vec<Xattr>) -> Self {
        self.xattrs = xattrs;
        self
    }

    /// permission bits only (what chmod accepts)
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xattr_creation() {
        let x = Xattr::new("security.selinux", vec![1, 2, 3]);
        assert_eq!(x.name, "security.selinux");
        assert_eq!(x.value, vec![1, 2, 3]);
    }

    #[test]
    fn test_blob_meta_permissions() {
        let meta = BlobMeta::new(0, 0, 0o104755);
        assert_eq!(meta.permissions(), 0o4755);
        assert!(meta.xattrs.is_empty());
    }
}
