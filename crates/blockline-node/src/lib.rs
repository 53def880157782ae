//! Node side of blockline: peer ingestion over line-delimited TCP and the
//! interactive local block producer.
pub mod config;
pub mod constants;
pub mod error;
pub mod peer;
pub mod prompt;

pub use config::{Args, PeerConfig};
pub use error::PeerError;
pub use peer::{PeerEvent, PeerInbound, PeerListener};
