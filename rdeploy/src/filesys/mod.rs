//! Local file system helpers

pub mod dir;
pub mod file;

pub use dir::Dir;
pub use file::File;
