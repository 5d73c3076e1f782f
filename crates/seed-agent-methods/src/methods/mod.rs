//! Seed method implementations.

pub mod clone_plugin;
pub mod lvm;
pub mod mydumper;
pub mod mysqldump;
pub mod xtrabackup;

pub use clone_plugin::ClonePlugin;
pub use lvm::Lvm;
pub use mydumper::Mydumper;
pub use mysqldump::Mysqldump;
pub use xtrabackup::Xtrabackup;
