//! Core primitives.
//!
//! Small value types and helpers shared by the relay and the client.

pub mod text;
pub mod time;
pub mod vec3;

// Re-export core types
pub use text::escape_markup;
pub use time::{now_millis, Millis};
pub use vec3::Vec3;
