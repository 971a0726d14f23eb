// Core modules implementing text codecs, locking, sessions, and error modeling.
pub mod error;
pub mod geometry;
pub mod lock;
pub mod notify;
pub mod reader;
pub mod record;
pub mod schema;
pub mod store;
pub mod tokenize;
pub mod writer;
