//! parleyd — the Parley node: connection manager, LAN discovery,
//! and the interactive command loop. `main.rs` is a thin shell over
//! these modules so tests can drive real nodes in-process.

pub mod discovery;
pub mod node;
pub mod repl;
