//! Shared types for the rostrum floor-control system.
//!
//! This crate holds the error enum and the floor-level message types that
//! every other crate in the workspace depends on. It deliberately has no
//! async or I/O dependencies.

pub mod error;
pub mod message;

pub use error::{Result, RostrumError};
pub use message::{FloorMessage, ToolInteraction, USER_ID};
