/// State management module
///
/// This module handles all persisted application state:
/// - Database connection and queries (library.rs)
/// - Shared data structures (data.rs)

pub mod data;
pub mod library;
