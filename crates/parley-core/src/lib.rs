//! parley-core — wire format, protocol constants, and configuration.
//! All other Parley crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{Announce, Frame};
