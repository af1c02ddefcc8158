//! Sheet Sync Service - Bidirectional Google Sheets synchronization for
//! categorized transactions.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod sheets;
pub mod startup;
pub mod sync;
