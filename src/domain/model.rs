use crate::utils::error::EnrollmentError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type PersonId = i64;
pub type PatientId = i64;
pub type PlanId = i64;
pub type ContractId = i64;
pub type PaymentId = i64;

/// Identity and contact fields shared by every person the portal knows about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonData {
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub document_number: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub birth_date: Option<NaiveDate>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
    pub marital_status: Option<String>,
    pub occupation: Option<String>,
}

impl PersonData {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: PersonId,
    #[serde(flatten)]
    pub data: PersonData,
    pub active: bool,
}

/// A titular when `parent_patient_id` is `None`, otherwise a beneficiary of that titular.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: PatientId,
    pub parent_patient_id: Option<PatientId>,
    #[serde(flatten)]
    pub person: Person,
}

impl PatientRecord {
    pub fn is_titular(&self) -> bool {
        self.parent_patient_id.is_none()
    }

    pub fn is_beneficiary(&self) -> bool {
        self.parent_patient_id.is_some()
    }

    pub fn document_number(&self) -> &str {
        &self.person.data.document_number
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: PlanId,
    pub name: String,
    pub price: f64,
    /// `None` 代表方案未設定上限
    pub beneficiary_capacity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipContract {
    pub contract_id: ContractId,
    pub titular_patient_id: PatientId,
    pub plan_id: PlanId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    pub contract_id: ContractId,
    pub titular_patient_id: PatientId,
    pub amount: f64,
    pub method: String,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
}

/// Payload for `create_person`; a non-null parent creates a beneficiary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPatient {
    #[serde(flatten)]
    pub person: PersonData,
    pub parent_patient_id: Option<PatientId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContract {
    pub titular_patient_id: PatientId,
    pub plan_id: PlanId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub contract_id: ContractId,
    pub titular_patient_id: PatientId,
    pub amount: f64,
    pub method: String,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
}

#[derive(Debug)]
pub struct AssociationFailure {
    pub patient_id: PatientId,
    pub error: EnrollmentError,
}

/// Per-candidate outcome of a batch association. Failed candidates are never retried.
#[derive(Debug, Default)]
pub struct AssociationResult {
    pub succeeded: Vec<PatientRecord>,
    pub failed: Vec<AssociationFailure>,
}

impl AssociationResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn succeeded_ids(&self) -> Vec<PatientId> {
        self.succeeded.iter().map(|p| p.patient_id).collect()
    }

    pub fn failed_ids(&self) -> Vec<PatientId> {
        self.failed.iter().map(|f| f.patient_id).collect()
    }
}
