pub mod format;
pub mod universe;
