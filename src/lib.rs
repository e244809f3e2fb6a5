//! Client-side cache consistency for the campus productivity API.
//!
//! Paginated and nested collections (expenses, income, jobs, applications,
//! kanban boards, Q&A threads) are cached once per process and kept in step
//! with the server after every create, update, move and delete.

pub mod api;
pub mod cache;
pub mod campus;
pub mod config;
pub mod error;
pub mod model;
pub mod mutation;
pub mod notify;
pub mod query;
pub mod runner;

pub use campus::Campus;
pub use error::{Result, SyncError};
