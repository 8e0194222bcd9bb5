//! # azure-cpi Common
//!
//! Shared utilities for the azure-cpi crates.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use azure_cpi_common::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Pretty).unwrap();
//! ```

pub mod logging;

pub use logging::{init_logging, LogFormat};
