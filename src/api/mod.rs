//! REST access to the campus backend.

mod client;
mod resource;
mod types;

pub use client::ApiClient;
pub use resource::{move_path, Resource};
pub use types::{decode_body, extract_message, Envelope};
