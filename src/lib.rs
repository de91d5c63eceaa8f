//! Resumable streaming-generation client for paginated pull-request digests.
//!
//! The in-memory [`store::StateStore`] is the only shared mutable
//! resource, and its lock is never held across an `.await`.
//!
//! # Public API Overview
//! - Build a [`Digest`] from a [`mirror::PersistenceMirror`], a generation
//!   backend and an item source, then hydrate it before issuing commands.
//! - Grow the item list with [`Digest::fetch_next_page`]; request, resume or
//!   abort per-item generations; read state back through [`ItemView`] and
//!   [`DigestSnapshot`].
//! - Provider selection and environment configuration live in [`providers`]
//!   and [`config`].

pub mod accumulator;
pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod mirror;
pub mod model;
pub mod pagination;
pub mod providers;
pub mod session;
pub mod store;

pub use crate::app::{Digest, DigestSettings, FetchNext, IncrementObserver};
pub use crate::config::DigestConfig;
pub use crate::error::DigestError;
pub use crate::model::{
    DigestSnapshot, GenerationRecord, GenerationState, Item, ItemView, PaginationState,
};
pub use crate::pagination::PageOutcome;
pub use crate::session::StartMode;
