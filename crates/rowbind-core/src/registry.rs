//! Explicit initialization of the process-wide descriptor registry.
//!
//! Descriptors are built lazily on first use anyway. Registering them up
//! front moves mapping errors to startup, which is where configuration
//! mistakes belong. Once built, a descriptor is never rebuilt or invalidated.

use crate::descriptor::RecordType;
use crate::error::Result;
use crate::record::Record;
use std::sync::Arc;

/// Resolve and cache the descriptor for `R` now.
pub fn register<R: Record>() -> Result<Arc<RecordType<R>>> {
    RecordType::<R>::get()
}

/// Is the descriptor for `R` already cached?
pub fn is_registered<R: Record>() -> bool {
    RecordType::<R>::is_registered()
}
