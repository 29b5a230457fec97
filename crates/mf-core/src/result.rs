//! Result type aliases

use crate::error::MfError;

/// Standard Result type for Maintflow operations
pub type MfResult<T> = Result<T, MfError>;
