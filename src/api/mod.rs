//! Purpose: Define the public Rust API boundary for flatstore.
//! Exports: Store, sessions, schema and value types, listeners, and errors.
//! Role: Additive-only surface used by the CLI and by embedding applications.
//! Invariants: This module is the only supported path to store primitives.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::geometry::{parse_wkt, to_wkt};
pub use crate::core::notify::{ChangeListener, ChangeSet};
pub use crate::core::reader::Reader;
pub use crate::core::record::{Feature, Value, decode_value, encode_value};
pub use crate::core::schema::{
    Attribute, Crs, FeatureType, ValueKind, encode_header, parse_header_line,
};
pub use crate::core::store::{DEFAULT_SEPARATOR, Store, StoreOptions};
pub use crate::core::writer::Writer;
pub use geo_types::Geometry;
