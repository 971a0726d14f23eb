//! Purpose: Library crate behind the `flatstore` CLI and integration tests.
//! Exports: `core` (tokenizer, codecs, locking, sessions, store), `api` (public surface).
//! Role: Flat-file feature store; one delimited text file per feature type.
//! Invariants: Callers go through `api`; `core` paths may move between releases.
//! Invariants: Every mutation of a store file is a whole-file rename under its lock.
pub mod api;
pub mod core;
