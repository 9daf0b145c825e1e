//! Lead massaging domain: fan out one item job per lead, massage each lead
//! with the generation service, reconcile outputs into the lead store.

pub mod activities;
pub mod commands;
pub mod error;
pub mod events;
pub mod models;
pub mod prompt;
