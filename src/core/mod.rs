//! Core constants and error types, shared by every other module.

mod constants;
mod error;

pub use constants::*;
pub use error::{ErrorKind, OsdgError};
