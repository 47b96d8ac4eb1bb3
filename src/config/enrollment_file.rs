use crate::core::wizard::{EnrollmentWizard, PaymentDetails};
use crate::domain::model::{PersonData, Plan, PlanId};
use crate::utils::error::{EnrollmentError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 非互動式報名請求檔
///
/// ```toml
/// [titular]
/// document_type = "DNI"
/// document_number = "40112233"
/// first_name = "Lucia"
/// last_name = "Paredes"
/// birth_date = "1988-04-12"
///
/// [contract]
/// plan_id = 3
/// start_date = "2025-11-01"
/// end_date = "2026-11-01"
///
/// [[beneficiaries]]
/// document_type = "DNI"
/// document_number = "70123456"
/// first_name = "Mateo"
/// last_name = "Paredes"
/// birth_date = "2015-02-20"
///
/// [payment]
/// method = "transfer"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentFile {
    pub titular: PersonData,
    pub contract: ContractSection,
    #[serde(default)]
    pub beneficiaries: Vec<PersonData>,
    #[serde(default)]
    pub payment: PaymentDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSection {
    pub plan_id: PlanId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl EnrollmentFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EnrollmentError::ConfigError {
            message: format!("Enrollment file parsing error: {}", e),
        })
    }

    /// Replays the file through every wizard step, stopping at the first blocked step.
    pub fn fill_wizard(self, wizard: &mut EnrollmentWizard, plan: Plan) -> Result<()> {
        *wizard.titular_mut()? = self.titular;
        wizard.next()?;

        wizard.select_plan(plan)?;
        wizard.set_contract_dates(self.contract.start_date, self.contract.end_date)?;
        wizard.next()?;

        for person in self.beneficiaries {
            wizard.add_beneficiary(person)?;
        }
        wizard.next()?;

        *wizard.payment_mut()? = self.payment;
        Ok(())
    }
}
