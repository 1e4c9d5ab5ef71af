//! Core types, config, errors, and storage for bitgrid.

pub mod config;
pub mod error;
pub mod grid;
pub mod moderation;
pub mod protocol;
pub mod store;
