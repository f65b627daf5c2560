//! CLI commands implementation

pub mod init;
pub mod memories;

pub use init::*;
pub use memories::*;
