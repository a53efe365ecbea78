//! # Announcer Core
//!
//! Pure revision-selection logic for the revision announcer: the epoch
//! catalog, reference streams and their decorators, the repository access
//! traits, and the selector that assigns merged-PR revisions to epochs.
//!
//! This crate contains no tokio, process spawning, or network code. The
//! application crate supplies a [`repository::Git`] implementation backed
//! by the `git` binary; tests use [`repository::MemoryRepository`].

pub mod epoch;
pub mod error;
pub mod models;
pub mod repository;
pub mod select;
pub mod stream;
