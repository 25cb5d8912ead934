//! Page archive-and-publish service.
//!
//! Archiving a page (optionally switching its published draft) runs as a transactional
//! read-modify-write guarded by a row version and retried on conflicts. Reads of the
//! published version go through a single-flight read-through cache that the archive
//! command invalidates after commit.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
