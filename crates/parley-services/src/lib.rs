//! parley-services — shared concurrent state for the Parley node:
//! the link registry, the found-peers table, and the session history.

pub mod found;
pub mod history;
pub mod registry;

pub use found::FoundPeers;
pub use history::History;
pub use registry::{LinkId, LinkRegistry};
