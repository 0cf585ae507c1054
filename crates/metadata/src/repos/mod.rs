//! Repository traits for the session store.

pub mod sessions;

pub use sessions::{ChunkRecord, SessionRepo};
