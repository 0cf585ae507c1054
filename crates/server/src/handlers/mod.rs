//! HTTP handlers.

pub mod meta;
pub mod uploads;

pub use meta::{get_config, health_check};
pub use uploads::{cancel_upload, finalize_upload, get_status, initiate_upload, receive_chunk};
