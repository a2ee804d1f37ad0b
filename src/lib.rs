pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{FirestoreStore, OpenAiClient};
pub use app::QaRunner;
pub use config::AppConfig;
pub use crate::core::generator::QaGenerator;
pub use domain::model::Entry;
pub use utils::error::{MettaError, Result};
