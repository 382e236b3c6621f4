//! operations over a repository and a staging tree

pub mod assemble;
pub mod checkout;
pub mod commit;
pub mod log;
pub mod prune;
pub mod reorganize;

pub use assemble::{assemble, AssembleStats};
pub use checkout::{checkout, CheckoutMode, CheckoutOptions, CheckoutStats};
pub use commit::{commit, commit_tree, commit_with_metadata};
pub use log::{history, LogEntry};
pub use prune::{cleanup, prune, CleanupMode, CleanupReport, PruneStats};
pub use reorganize::{
    fold_usr, merge, normalize_permissions, promote_to_files, remove_denied_paths, MergeStats,
};
