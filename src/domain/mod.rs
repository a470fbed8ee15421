//! Domain layer - volume sources, the provisioning contract and ports
//!
//! Plugins, record stores and the controller loop meet here; nothing in this
//! module talks to the cluster directly.

pub mod ports;

pub use ports::*;
