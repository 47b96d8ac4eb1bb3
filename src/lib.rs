pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use adapters::{http::HttpBackend, memory::InMemoryBackend};
pub use config::{enrollment_file::EnrollmentFile, toml_config::AppConfig};
pub use core::{
    capacity::CapacitySnapshot,
    relationship::RelationshipMutator,
    wizard::{EnrollmentWizard, WizardStep},
};
pub use utils::error::{EnrollmentError, Result};
