//! # Voxline Common Library
//!
//! Shared code for the voxline crates including:
//! - Event types (`VoxEvent`) and the broadcast `EventBus`
//! - Session state enumeration and its transition table
//! - Configuration file resolution
//! - Time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, SessionState, VoxEvent};
