//! Serialization primitives
//!
//! Little-endian wire reader/writer, the packed-dword and string encodings,
//! spatial types, and the bucket-ordered property hash tables that the
//! composite game messages are built from.

pub mod buffer;
pub mod position;
pub mod properties;

pub use buffer::{align4, WireReader, WireWriter};
pub use position::{Position, PositionFlags, Quaternion};
pub use properties::{derive_bucket_count, PropertyTable, PropertyValue};
