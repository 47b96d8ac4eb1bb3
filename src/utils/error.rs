use crate::core::wizard::{CreatedEntities, SubmissionStep, WizardStep};
use crate::domain::model::{PatientId, PlanId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 單一欄位的驗證錯誤
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// 外部協作者失敗的種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorErrorKind {
    Network,
    Timeout,
    /// 伺服器拒絕請求 (例如容量守衛、衝突)
    Rejected { status: u16 },
    Server { status: u16 },
    Decode,
}

impl fmt::Display for CollaboratorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Rejected { status } => write!(f, "rejected (HTTP {})", status),
            Self::Server { status } => write!(f, "server error (HTTP {})", status),
            Self::Decode => write!(f, "undecodable response"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("Validation error: {}", join_field_errors(.errors))]
    ValidationError { errors: Vec<FieldError> },

    #[error(
        "Capacity exceeded: {} (capacity {capacity}, current {current}, requested {requested})",
        remaining_message_ref(.capacity, .current)
    )]
    CapacityExceeded {
        capacity: usize,
        current: usize,
        requested: usize,
    },

    #[error("Patient {patient_id} is not a beneficiary")]
    NotABeneficiary { patient_id: PatientId },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Patient {patient_id} not found")]
    PatientNotFound { patient_id: PatientId },

    #[error("Titular {titular_patient_id} has no active membership contract")]
    NoActiveContract { titular_patient_id: PatientId },

    #[error("Plan {plan_id} not found")]
    PlanNotFound { plan_id: PlanId },

    #[error("{operation} failed: {kind}{}", .reason.as_deref().map(|r| format!(" - {}", r)).unwrap_or_default())]
    CollaboratorFailure {
        operation: String,
        kind: CollaboratorErrorKind,
        reason: Option<String>,
    },

    #[error("Cannot {action} from wizard step {step}")]
    InvalidTransition {
        step: WizardStep,
        action: &'static str,
    },

    #[error("Enrollment submission failed while creating {failed_step}: {source}")]
    SubmissionFailed {
        failed_step: SubmissionStep,
        created: Box<CreatedEntities>,
        #[source]
        source: Box<EnrollmentError>,
    },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EnrollmentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Capacity,
    Relationship,
    Configuration,
    Collaborator,
    Workflow,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// CLI 退出碼
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Low => 0,
            Self::Medium => 2,
            Self::High => 1,
            Self::Critical => 3,
        }
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn remaining_message_ref(capacity: &usize, current: &usize) -> String {
    remaining_message(*capacity, *current)
}

fn remaining_message(capacity: usize, current: usize) -> String {
    match capacity.saturating_sub(current) {
        0 => format!("no more beneficiaries can be added, the plan allows {}", capacity),
        1 => "only 1 more beneficiary can be added".to_string(),
        n => format!("only {} more beneficiaries can be added", n),
    }
}

impl EnrollmentError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            errors: vec![FieldError::new(field, message)],
        }
    }

    pub fn collaborator(
        operation: impl Into<String>,
        kind: CollaboratorErrorKind,
        reason: Option<String>,
    ) -> Self {
        Self::CollaboratorFailure {
            operation: operation.into(),
            kind,
            reason,
        }
    }

    /// 取出欄位層級錯誤 (非驗證錯誤時為空)
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::ValidationError { errors } => errors,
            _ => &[],
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationError { .. } => ErrorCategory::Validation,
            Self::CapacityExceeded { .. } => ErrorCategory::Capacity,
            Self::NotABeneficiary { .. }
            | Self::PatientNotFound { .. }
            | Self::NoActiveContract { .. }
            | Self::PlanNotFound { .. } => ErrorCategory::Relationship,
            Self::InvalidConfiguration { .. } | Self::ConfigError { .. } => {
                ErrorCategory::Configuration
            }
            Self::CollaboratorFailure { .. } => ErrorCategory::Collaborator,
            Self::InvalidTransition { .. } | Self::SubmissionFailed { .. } => {
                ErrorCategory::Workflow
            }
            Self::IoError(_) | Self::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotABeneficiary { .. } | Self::CollaboratorFailure { .. } => {
                ErrorSeverity::Medium
            }
            Self::SubmissionFailed { .. } | Self::IoError(_) => ErrorSeverity::Critical,
            Self::InvalidConfiguration { .. } | Self::ConfigError { .. } => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    /// 給終端使用者看的訊息
    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::ValidationError { errors } => format!(
                "Some fields need attention: {}",
                join_field_errors(errors)
            ),
            Self::CapacityExceeded {
                capacity, current, ..
            } => {
                let message = remaining_message(*capacity, *current);
                let mut chars = message.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => message,
                }
            }
            Self::NotABeneficiary { patient_id } => format!(
                "Patient {} is not linked to any titular, nothing to disassociate",
                patient_id
            ),
            Self::CollaboratorFailure {
                operation,
                reason: Some(reason),
                ..
            } => format!("The portal API rejected {}: {}", operation, reason),
            Self::CollaboratorFailure { operation, kind, .. } => format!(
                "The portal API failed while running {} ({}), please try again later",
                operation, kind
            ),
            Self::SubmissionFailed {
                failed_step,
                created,
                source,
            } => format!(
                "Enrollment stopped while creating {} ({}). Already created: {}",
                failed_step,
                source.user_friendly_message(),
                created.describe()
            ),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::ValidationError { .. } => {
                "Correct the listed fields and try again".to_string()
            }
            Self::CapacityExceeded { .. } => {
                "Disassociate a beneficiary or move the titular to a plan with more slots"
                    .to_string()
            }
            Self::NotABeneficiary { .. } => {
                "The record is already unaffiliated; check the patient identifier".to_string()
            }
            Self::InvalidConfiguration { .. } => {
                "Fix the plan's beneficiary capacity in the plan catalog".to_string()
            }
            Self::PatientNotFound { .. } | Self::PlanNotFound { .. } => {
                "Check the identifier and try again".to_string()
            }
            Self::NoActiveContract { .. } => {
                "Renew or create the titular's membership contract first".to_string()
            }
            Self::CollaboratorFailure { .. } => {
                "Check connectivity to the portal API; the operation was not retried".to_string()
            }
            Self::InvalidTransition { .. } => {
                "Complete the current wizard step before moving on".to_string()
            }
            Self::SubmissionFailed { .. } => {
                "Entities listed as created were kept; resubmit to resume from the failed step"
                    .to_string()
            }
            Self::ConfigError { .. } => "Check the configuration file".to_string(),
            Self::IoError(_) | Self::SerializationError(_) => {
                "Check file permissions and formats".to_string()
            }
        }
    }
}
