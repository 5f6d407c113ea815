//! # registry-operator
//!
//! Level-triggered reconciliation engine for an image registry's
//! supporting cluster objects.
//!
//! Controllers watch resources through locally cached informers. Every
//! notification collapses into one work key, and a worker reconciles the
//! whole desired state for it by applying a [`resource::Mutator`]: read the
//! current object from the cache, compute the expected one, and create or
//! update only when they differ. Failures are retried through a
//! deduplicating, rate-limited [`workqueue::WorkQueue`].

pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod resource;
pub mod storage;
pub mod workqueue;

pub use error::{Error, Result};
