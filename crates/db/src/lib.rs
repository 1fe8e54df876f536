pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{begin_immediate, connect_with_settings, DbPool};
pub use fixtures::{DemoSeedDataset, ScenarioSeedInfo, SeedResult, VerificationResult};
