//! Header and body sampling for captured exchanges.

pub mod body;
pub mod headers;

pub use body::{is_text_like, BodyAccumulator, MAX_BODY_CAPTURE_BYTES};
pub use headers::{capture_headers, REDACTED};
