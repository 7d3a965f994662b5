//! Core modules for the archiving engine.
//!
//! Shared primitives live here: configuration, the catalog boundary and its
//! adapters, the persisted state store, and the notification sink.

pub mod catalog;
pub mod config;
pub mod dx;
pub mod error;
pub mod logging;
pub mod members;
pub mod notify;
pub mod output;
pub mod retry;
pub mod store;
pub mod time;
pub mod tree;
