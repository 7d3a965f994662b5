//! Archiving phases built on the core primitives.

pub mod archive;
pub mod classify;
pub mod discover;
pub mod summary;
pub mod tags;
pub mod tar;
pub mod workflow;
