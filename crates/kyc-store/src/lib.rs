//! # kyc-store
//!
//! Content-addressed filesystem storage for validated identity documents:
//! streamed writes with a BLAKE3 integrity digest, subject/category
//! partitioning and one-way lifecycle moves.

pub mod file_storage;

pub use file_storage::{compute_content_hash, hash_file, ContentAddressedStore, ManagedPath};
