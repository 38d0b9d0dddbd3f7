// ABOUTME: Config module - typed proxy/upstream settings and the loader.
// ABOUTME: Handles defaults, transport detection, option inheritance and validation.

pub mod duration;
mod loader;
mod types;

pub use loader::{from_json, load};
pub use types::*;
