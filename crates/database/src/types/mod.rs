//! Shared types and result aliases for the store

pub mod errors;
pub mod timestamp;

pub use errors::DatabaseError;

pub type DatabaseResult<T> = Result<T, DatabaseError>;
