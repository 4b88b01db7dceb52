pub mod cli;
pub mod config;
pub mod enroll;
pub mod error;
pub mod feedback;
pub mod ledger;
pub mod matcher;
mod metrics;
mod server;
pub mod station;
pub mod store;
pub mod utils;
pub mod vector;
pub mod vein;

pub use config::Opts;
pub use error::PalmError;
pub use matcher::{MatchDecision, Verdict};
pub use store::TemplateStore;
pub use vector::FeatureVector;
pub use vein::Pipeline;
