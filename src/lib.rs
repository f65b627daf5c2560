//! keepsake - local storage for family memories
//!
//! This crate provides:
//! - A memory store that keeps a JSON index and attachment files in sync
//! - A single-writer queue so concurrent callers never interleave mutations
//! - Image re-encoding, audio import, and fallback image download
//! - CLI commands wiring one store per process

pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use events::StoreEvent;
pub use models::{Attachment, AttachmentKind, MediaInput, Memory, MemoryUpdate, NewMemory, Visibility};
pub use store::MemoryStore;
