//! Testing utilities for the stream adapter.
//!
//! This module provides an in-memory connection handle that tests drive by
//! hand: fire open, message, error and close events, and inspect what the
//! adapter sent or whether it closed the handle.

mod fake;

pub use fake::{FakeRemote, FakeSocket};
