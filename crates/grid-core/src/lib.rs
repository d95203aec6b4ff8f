//! The device I/O and configuration-transfer engine.
pub mod config;
pub mod correlator;
pub mod device;
pub mod enumerate;
pub mod framer;
pub mod link;
pub mod script;
pub mod wire;

pub use config::ConfigRepo;
pub use correlator::Correlator;
pub use device::Device;
pub use framer::Framer;
pub use link::Link;
