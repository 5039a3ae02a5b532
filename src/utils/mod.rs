//! The `utils` module provides the definitions shared by every other module
//! of `resilient_mq`: the error taxonomy and the logging bootstrap.

pub mod error;
pub mod logging;

pub use error::{BrokerError, CodecError, ConfigError, Error, Result};
