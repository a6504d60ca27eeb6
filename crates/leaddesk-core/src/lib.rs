//! Core library for `LeadDesk`.
//!
//! Contains the lead repository, the client-side lead collection and its
//! derived views, the admin workflow controller, the bridge from identity
//! sessions to the access gate, the lead-capture form and CSV export. This
//! crate depends on `leaddesk-store` for the store traits and knows nothing
//! about a specific backend or presentation layer.

pub mod auth;
pub mod collection;
pub mod controller;
pub mod error;
pub mod export;
pub mod repository;
pub mod submission;
pub mod view;
