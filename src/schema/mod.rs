//! Schema unification.
//!
//! Yellow and green trip files name the same facts differently. This module
//! maps both layouts onto [`crate::trip::TripRecord`], drops rows without the
//! required time and location fields, and can re-verify produced files.

pub mod mapping;
pub mod unify;

pub use unify::{unify_all, unify_file, verify_all, verify_unified_schema};
