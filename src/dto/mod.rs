//! Read-side projections returned by the API.
//!
//! Views are built by pure functions from already-loaded entity graphs; they
//! never touch the database themselves.

mod views;

pub use views::*;
