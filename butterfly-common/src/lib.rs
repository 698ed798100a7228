//! Common utilities for the butterfly-osm toolkit

pub mod diag;
pub mod error;

pub use diag::Throttle;
pub use error::{exit_code, Error, Result};
