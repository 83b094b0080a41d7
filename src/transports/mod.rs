//! Transport implementations

pub mod mock;

pub use mock::MockTransport;
