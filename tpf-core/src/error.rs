//! Error types for tpf-core
//!
//! Re-exports the unified error type from tpf-error.

pub use tpf_error::{Result, TpfanError};
