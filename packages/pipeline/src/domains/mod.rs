//! Business domains.

pub mod massage;
