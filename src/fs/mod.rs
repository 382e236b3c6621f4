pub mod hardlink;
pub mod read;
pub mod write;

pub use hardlink::{CheckoutHardlinkTracker, HardlinkTracker};
pub use read::{
    identity, read_symlink_target, read_xattrs, walk_pre_order, FileMetadata, FileType,
};
pub use write::{
    apply_metadata, copy_file, create_hardlink, create_symlink, fsync_dir,
    remove_path,
};
