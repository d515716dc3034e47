//! # Homestead Testkit
//!
//! Test utilities for Homestead.
//!
//! This crate provides:
//! - Store fixtures (memory and file-backed, with restart simulation)
//! - Record and remote-row builders for common scenarios
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use homestead_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_temp_store(|handle| {
//!         handle.put("tasks", task("t1", 1, "Water the beans")).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
