//! Store implementations behind the pipeline traits
//!
//! - [`mongo`]: document source and document sink on MongoDB
//! - [`postgres`]: relational sink and staged row source on PostgreSQL
//! - [`memory`]: in-memory versions of all four, for tests and dry runs

pub mod memory;
pub mod mongo;
pub mod postgres;
