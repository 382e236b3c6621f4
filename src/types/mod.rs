mod commit;
mod metadata;
mod tree;

pub use commit::Commit;
pub use metadata::{BlobMeta, Xattr};
pub use tree::{EntryKind, Tree, TreeEntry};
