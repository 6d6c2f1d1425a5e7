//! Closures without code shipping.
//!
//! Master and worker run the identical executable and build the same
//! [`ClosureRegistry`] at startup, so a unit of remote work travels as an
//! identifier plus an encoded argument. The worker looks the identifier up
//! in its own registry; unknown identifiers produce a structured error
//! reply, never a crash.

mod process;
mod registry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use process::ClosureProcess;
pub use registry::{ClosureRegistry, RemoteFn};

/// A serialisable reference to a pre-registered function plus an encoded
/// argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub id: String,
    pub args: Vec<u8>,
}

#[derive(Error, Debug, Clone)]
pub enum ClosureError {
    #[error("failed to encode closure argument: {0}")]
    Encode(String),

    #[error("failed to decode remote result: {0}")]
    Decode(String),
}
