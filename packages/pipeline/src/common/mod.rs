//! Shared helpers.

pub mod observability;
