//! Emulated bench instruments
//!
//! Each device is a state struct implementing [`emu::Emulator`], with the
//! IEEE-488.2 common commands pulled in from [`common`].  The
//! [`Registry`] maps type names to constructors and the [`fleet`] module
//! starts a set of them from a configuration file.
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod common;
pub mod fleet;
pub mod lcr;
pub mod meter;
pub mod registry;
pub mod relay;

pub use fleet::{Fleet, FleetConfig, FleetError};
pub use lcr::Lcr;
pub use meter::Meter;
pub use registry::{Entry, Registry, RegistryError};
pub use relay::Relay;
