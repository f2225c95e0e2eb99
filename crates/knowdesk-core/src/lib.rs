//! # knowdesk core
//!
//! Runtime-free logic shared by the knowdesk application: the knowledge-base
//! data model, the paragraph chunker, embedding and completion capability
//! traits, storage traits with an in-memory implementation, and the
//! similarity ranking used by retrieval.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Anything that
//! performs I/O is expressed as a trait and implemented by the app crate.

pub mod chunk;
pub mod completion;
pub mod embedding;
pub mod models;
pub mod search;
pub mod store;
