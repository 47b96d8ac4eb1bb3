pub mod enrollment_file;
pub mod toml_config;

#[cfg(feature = "cli")]
use crate::domain::model::PatientId;
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "enrollment")]
#[command(about = "Beneficiary enrollment tool for the home-visit portal")]
pub struct CliConfig {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "enrollment-config.toml")]
    pub config: String,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Show used and remaining beneficiary slots of a titular
    Capacity {
        #[arg(long)]
        titular: PatientId,
    },

    /// List unaffiliated titulars that could be associated
    Candidates {
        #[arg(long)]
        titular: PatientId,
    },

    /// Create a new person as beneficiary of a titular
    CreateBeneficiary {
        #[arg(long)]
        titular: PatientId,
        #[arg(long)]
        document_type: String,
        #[arg(long)]
        document_number: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// Birth date as YYYY-MM-DD
        #[arg(long)]
        birth_date: chrono::NaiveDate,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },

    /// Associate existing titulars as beneficiaries (all-or-nothing capacity check)
    Associate {
        #[arg(long)]
        titular: PatientId,
        #[arg(long, value_delimiter = ',', required = true)]
        candidates: Vec<PatientId>,
    },

    /// Unlink a beneficiary from its titular
    Disassociate {
        #[arg(long)]
        beneficiary: PatientId,
    },

    /// Enroll a new titular from an enrollment request file
    Enroll {
        #[arg(short, long)]
        file: String,

        /// Validate every wizard step without creating anything
        #[arg(long)]
        dry_run: bool,
    },
}
