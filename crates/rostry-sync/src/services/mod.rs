//! Application services
//!
//! Async access to the local database shared by the journal and the sync
//! manager.

mod database;

pub use database::DatabaseService;
