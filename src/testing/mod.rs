//! Test doubles and setup helpers, shared by unit and integration tests

mod flaky;
mod mock;
pub mod setup;

pub use flaky::FlakyCache;
pub use mock::{MockConnection, MockConnector};
