//! Core domain concepts shared across all subdomains.
//!
//! - [`error`]: the error taxonomy of the workflow pipeline

pub mod error;
