use crate::core::capacity;
use crate::domain::model::{
    MembershipContract, NewContract, NewPatient, NewPayment, PatientRecord, PaymentRecord,
    PersonData, Plan,
};
use crate::domain::ports::PersistencePort;
use crate::utils::error::{EnrollmentError, Result};
use crate::utils::validation::{self, ValidationReport};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 報名精靈的線性步驟
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WizardStep {
    TitularData,
    ContractTerms,
    Beneficiaries,
    Payment,
    Submitted,
}

impl WizardStep {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::TitularData => Some(Self::ContractTerms),
            Self::ContractTerms => Some(Self::Beneficiaries),
            Self::Beneficiaries => Some(Self::Payment),
            Self::Payment | Self::Submitted => None,
        }
    }

    pub fn previous(self) -> Option<Self> {
        match self {
            Self::ContractTerms => Some(Self::TitularData),
            Self::Beneficiaries => Some(Self::ContractTerms),
            Self::Payment => Some(Self::Beneficiaries),
            Self::TitularData | Self::Submitted => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TitularData => "titular data",
            Self::ContractTerms => "contract terms",
            Self::Beneficiaries => "beneficiaries",
            Self::Payment => "payment",
            Self::Submitted => "submitted",
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractTerms {
    pub plan: Option<Plan>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    #[serde(default)]
    pub method: String,
    /// 未填時使用方案價格
    pub amount: Option<f64>,
    pub reference: Option<String>,
    pub paid_on: Option<NaiveDate>,
}

/// Everything entered so far. Navigation never clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrollmentDraft {
    pub titular: PersonData,
    pub contract: ContractTerms,
    pub beneficiaries: Vec<PersonData>,
    pub payment: PaymentDetails,
}

/// Which creation call a submission was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStep {
    Titular,
    Contract,
    Beneficiary { index: usize },
    Payment,
}

impl fmt::Display for SubmissionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Titular => write!(f, "the titular"),
            Self::Contract => write!(f, "the membership contract"),
            Self::Beneficiary { index } => write!(f, "beneficiary #{}", index + 1),
            Self::Payment => write!(f, "the first payment"),
        }
    }
}

/// Entities committed by a submission, kept even when a later call fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreatedEntities {
    pub titular: Option<PatientRecord>,
    pub contract: Option<MembershipContract>,
    pub beneficiaries: Vec<PatientRecord>,
    pub payment: Option<PaymentRecord>,
}

impl CreatedEntities {
    pub fn is_empty(&self) -> bool {
        self.titular.is_none()
            && self.contract.is_none()
            && self.beneficiaries.is_empty()
            && self.payment.is_none()
    }

    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "nothing".to_string();
        }
        let mut parts = Vec::new();
        if let Some(titular) = &self.titular {
            parts.push(format!("titular #{}", titular.patient_id));
        }
        if let Some(contract) = &self.contract {
            parts.push(format!("contract #{}", contract.contract_id));
        }
        if !self.beneficiaries.is_empty() {
            let ids: Vec<String> = self
                .beneficiaries
                .iter()
                .map(|b| format!("#{}", b.patient_id))
                .collect();
            parts.push(format!("beneficiaries {}", ids.join(", ")));
        }
        if let Some(payment) = &self.payment {
            parts.push(format!("payment #{}", payment.payment_id));
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentReceipt {
    pub titular: PatientRecord,
    pub contract: MembershipContract,
    pub beneficiaries: Vec<PatientRecord>,
    pub payment: PaymentRecord,
}

/// Multi-step signup of a new titular: titular data, contract terms, beneficiaries, payment.
#[derive(Debug, Clone)]
pub struct EnrollmentWizard {
    step: WizardStep,
    draft: EnrollmentDraft,
    progress: Option<CreatedEntities>,
    today: NaiveDate,
}

impl Default for EnrollmentWizard {
    fn default() -> Self {
        Self::new()
    }
}

impl EnrollmentWizard {
    pub fn new() -> Self {
        Self::with_today(Local::now().date_naive())
    }

    /// Fixes "today" for birth-date and payment-date defaults.
    pub fn with_today(today: NaiveDate) -> Self {
        Self {
            step: WizardStep::TitularData,
            draft: EnrollmentDraft::default(),
            progress: None,
            today,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn draft(&self) -> &EnrollmentDraft {
        &self.draft
    }

    /// Entities already created by an interrupted submission.
    pub fn progress(&self) -> Option<&CreatedEntities> {
        self.progress.as_ref()
    }

    /// 一旦開始建立實體，資料即凍結
    pub fn is_frozen(&self) -> bool {
        self.progress.is_some() || self.step == WizardStep::Submitted
    }

    fn editable(&self, step: WizardStep, action: &'static str) -> Result<()> {
        if self.step != step || self.is_frozen() {
            return Err(EnrollmentError::InvalidTransition {
                step: self.step,
                action,
            });
        }
        Ok(())
    }

    pub fn titular_mut(&mut self) -> Result<&mut PersonData> {
        self.editable(WizardStep::TitularData, "edit titular data")?;
        Ok(&mut self.draft.titular)
    }

    pub fn select_plan(&mut self, plan: Plan) -> Result<()> {
        self.editable(WizardStep::ContractTerms, "select a plan")?;
        capacity::validate_capacity(plan.beneficiary_capacity)?;
        tracing::debug!(
            "Plan {} selected (capacity {:?})",
            plan.plan_id,
            plan.beneficiary_capacity
        );
        self.draft.contract.plan = Some(plan);
        Ok(())
    }

    pub fn set_contract_dates(&mut self, start_date: NaiveDate, end_date: NaiveDate) -> Result<()> {
        self.editable(WizardStep::ContractTerms, "edit contract dates")?;
        self.draft.contract.start_date = Some(start_date);
        self.draft.contract.end_date = Some(end_date);
        Ok(())
    }

    pub fn beneficiary_capacity(&self) -> Option<i64> {
        self.draft
            .contract
            .plan
            .as_ref()
            .and_then(|p| p.beneficiary_capacity)
    }

    pub fn remaining_beneficiary_slots(&self) -> Option<usize> {
        capacity::remaining_slots(self.beneficiary_capacity(), self.draft.beneficiaries.len())
            .ok()
            .flatten()
    }

    /// Whether the "add beneficiary" action is enabled right now.
    pub fn can_add_beneficiary(&self) -> bool {
        self.editable(WizardStep::Beneficiaries, "add a beneficiary").is_ok()
            && capacity::can_add(self.beneficiary_capacity(), self.draft.beneficiaries.len(), 1)
                .unwrap_or(false)
    }

    /// Appends a beneficiary row and returns its index.
    pub fn add_beneficiary(&mut self, person: PersonData) -> Result<usize> {
        self.editable(WizardStep::Beneficiaries, "add a beneficiary")?;
        capacity::ensure_can_add(self.beneficiary_capacity(), self.draft.beneficiaries.len(), 1)?;
        self.draft.beneficiaries.push(person);
        Ok(self.draft.beneficiaries.len() - 1)
    }

    pub fn beneficiary_mut(&mut self, index: usize) -> Result<&mut PersonData> {
        self.editable(WizardStep::Beneficiaries, "edit a beneficiary")?;
        let len = self.draft.beneficiaries.len();
        self.draft.beneficiaries.get_mut(index).ok_or_else(|| {
            EnrollmentError::validation(
                format!("beneficiaries[{}]", index),
                format!("No beneficiary row {} (there are {})", index, len),
            )
        })
    }

    pub fn remove_beneficiary(&mut self, index: usize) -> Result<PersonData> {
        self.editable(WizardStep::Beneficiaries, "remove a beneficiary")?;
        if index >= self.draft.beneficiaries.len() {
            return Err(EnrollmentError::validation(
                format!("beneficiaries[{}]", index),
                "No such beneficiary row",
            ));
        }
        Ok(self.draft.beneficiaries.remove(index))
    }

    pub fn payment_mut(&mut self) -> Result<&mut PaymentDetails> {
        self.editable(WizardStep::Payment, "edit payment details")?;
        Ok(&mut self.draft.payment)
    }

    /// Validates one step's fields without moving.
    pub fn validate_step(&self, step: WizardStep) -> Result<()> {
        match step {
            WizardStep::TitularData => {
                validation::person_report(&self.draft.titular, self.today).finish()
            }
            WizardStep::ContractTerms => self.validate_contract_terms(),
            WizardStep::Beneficiaries => self.validate_beneficiaries(),
            WizardStep::Payment => self.validate_payment(),
            WizardStep::Submitted => Ok(()),
        }
    }

    fn validate_contract_terms(&self) -> Result<()> {
        let terms = &self.draft.contract;
        let mut report = ValidationReport::new();
        match &terms.plan {
            None => report.push("plan", "A plan must be selected"),
            Some(plan) => report.check(
                capacity::validate_capacity(plan.beneficiary_capacity).map(|_| ()),
            ),
        }
        let start = validation::validate_required_field("start_date", &terms.start_date);
        let end = validation::validate_required_field("end_date", &terms.end_date);
        match (start, end) {
            (Ok(start), Ok(end)) => {
                report.check(validation::validate_date_order("end_date", *start, *end))
            }
            (start, end) => {
                report.check(start.map(|_| ()));
                report.check(end.map(|_| ()));
            }
        }
        report.finish()
    }

    fn validate_beneficiaries(&self) -> Result<()> {
        let rows = &self.draft.beneficiaries;
        capacity::ensure_can_add(self.beneficiary_capacity(), 0, rows.len())?;

        let mut report = ValidationReport::new();
        for (index, person) in rows.iter().enumerate() {
            report.nest(
                &format!("beneficiaries[{}]", index),
                validation::person_report(person, self.today),
            );
        }

        // 報名內的證件號碼不可重複
        let mut seen: HashMap<String, String> = HashMap::new();
        seen.insert(
            self.draft.titular.document_number.trim().to_string(),
            "titular".to_string(),
        );
        for (index, person) in rows.iter().enumerate() {
            let number = person.document_number.trim();
            if number.is_empty() {
                continue;
            }
            let field = format!("beneficiaries[{}]", index);
            if let Some(owner) = seen.get(number) {
                report.push(
                    format!("{}.document_number", field),
                    format!("Document number {} is already used by {}", number, owner),
                );
            } else {
                seen.insert(number.to_string(), field);
            }
        }
        report.finish()
    }

    fn validate_payment(&self) -> Result<()> {
        let payment = &self.draft.payment;
        let mut report = ValidationReport::new();
        report.check(validation::validate_non_empty_string("method", &payment.method));
        if let Some(amount) = payment.amount {
            if !(amount.is_finite() && amount > 0.0) {
                report.push("amount", "Amount must be greater than zero");
            }
        }
        report.finish()
    }

    /// Moves forward after validating the current step. Blocked steps keep the wizard in place.
    pub fn next(&mut self) -> Result<WizardStep> {
        let Some(target) = self.step.next() else {
            return Err(EnrollmentError::InvalidTransition {
                step: self.step,
                action: "go to the next step",
            });
        };
        self.validate_step(self.step)?;
        tracing::debug!("Wizard: {} -> {}", self.step, target);
        self.step = target;
        Ok(target)
    }

    pub fn previous(&mut self) -> Result<WizardStep> {
        let target = self
            .step
            .previous()
            .filter(|_| !self.is_frozen())
            .ok_or(EnrollmentError::InvalidTransition {
                step: self.step,
                action: "go back",
            })?;
        tracing::debug!("Wizard: {} -> {}", self.step, target);
        self.step = target;
        Ok(target)
    }

    /// Validates every step again and hands out a submission that can still be cancelled.
    pub fn begin_submission(&mut self) -> Result<Submission<'_>> {
        if self.step != WizardStep::Payment {
            return Err(EnrollmentError::InvalidTransition {
                step: self.step,
                action: "submit",
            });
        }
        for step in [
            WizardStep::TitularData,
            WizardStep::ContractTerms,
            WizardStep::Beneficiaries,
            WizardStep::Payment,
        ] {
            self.validate_step(step)?;
        }
        Ok(Submission { wizard: self })
    }
}

/// A validated submission. Dropping or cancelling it before `execute` leaves no trace.
pub struct Submission<'a> {
    wizard: &'a mut EnrollmentWizard,
}

impl Submission<'_> {
    pub fn cancel(self) {
        tracing::info!("Enrollment submission cancelled before any entity was created");
    }

    /// Runs the creation calls in order. Not cancellable once started.
    ///
    /// Each entity is recorded on the wizard as soon as it is committed, so a failure or a
    /// dropped future leaves the created entities in place and the wizard frozen; executing
    /// a new submission resumes after them.
    pub async fn execute<P: PersistencePort + ?Sized>(
        self,
        persistence: &P,
    ) -> Result<EnrollmentReceipt> {
        let wizard = self.wizard;
        let created = wizard.progress.get_or_insert_with(CreatedEntities::default);
        let outcome = run_creation(&wizard.draft, wizard.today, persistence, created).await;

        match outcome {
            Ok(receipt) => {
                wizard.progress = None;
                wizard.step = WizardStep::Submitted;
                tracing::info!(
                    "✅ Enrollment submitted: titular {}, contract {}, {} beneficiaries",
                    receipt.titular.patient_id,
                    receipt.contract.contract_id,
                    receipt.beneficiaries.len()
                );
                Ok(receipt)
            }
            Err((failed_step, source)) => {
                let snapshot = wizard.progress.take().unwrap_or_default();
                tracing::error!(
                    "❌ Enrollment failed while creating {}: {} (created so far: {})",
                    failed_step,
                    source,
                    snapshot.describe()
                );
                if !snapshot.is_empty() {
                    wizard.progress = Some(snapshot.clone());
                }
                Err(EnrollmentError::SubmissionFailed {
                    failed_step,
                    created: Box::new(snapshot),
                    source: Box::new(source),
                })
            }
        }
    }
}

async fn run_creation<P: PersistencePort + ?Sized>(
    draft: &EnrollmentDraft,
    today: NaiveDate,
    persistence: &P,
    created: &mut CreatedEntities,
) -> std::result::Result<EnrollmentReceipt, (SubmissionStep, EnrollmentError)> {
    let plan = draft.contract.plan.as_ref().ok_or_else(|| {
        (
            SubmissionStep::Contract,
            EnrollmentError::validation("plan", "A plan must be selected"),
        )
    })?;
    let (start_date, end_date) = match (draft.contract.start_date, draft.contract.end_date) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            return Err((
                SubmissionStep::Contract,
                EnrollmentError::validation("start_date", "Contract dates are required"),
            ))
        }
    };

    let titular = match &created.titular {
        Some(titular) => titular.clone(),
        None => {
            let request = NewPatient {
                person: draft.titular.clone(),
                parent_patient_id: None,
            };
            let titular = persistence
                .create_person(&request)
                .await
                .map_err(|e| (SubmissionStep::Titular, e))?;
            created.titular = Some(titular.clone());
            titular
        }
    };

    let contract = match &created.contract {
        Some(contract) => contract.clone(),
        None => {
            let request = NewContract {
                titular_patient_id: titular.patient_id,
                plan_id: plan.plan_id,
                start_date,
                end_date,
                active: true,
            };
            let contract = persistence
                .create_contract(&request)
                .await
                .map_err(|e| (SubmissionStep::Contract, e))?;
            created.contract = Some(contract.clone());
            contract
        }
    };

    for (index, person) in draft
        .beneficiaries
        .iter()
        .enumerate()
        .skip(created.beneficiaries.len())
    {
        let request = NewPatient {
            person: person.clone(),
            parent_patient_id: Some(titular.patient_id),
        };
        let beneficiary = persistence
            .create_person(&request)
            .await
            .map_err(|e| (SubmissionStep::Beneficiary { index }, e))?;
        created.beneficiaries.push(beneficiary);
    }

    let payment = match &created.payment {
        Some(payment) => payment.clone(),
        None => {
            let request = NewPayment {
                contract_id: contract.contract_id,
                titular_patient_id: titular.patient_id,
                amount: draft.payment.amount.unwrap_or(plan.price),
                method: draft.payment.method.trim().to_string(),
                reference: draft.payment.reference.clone(),
                paid_on: draft.payment.paid_on.unwrap_or(today),
            };
            let payment = persistence
                .create_payment(&request)
                .await
                .map_err(|e| (SubmissionStep::Payment, e))?;
            created.payment = Some(payment.clone());
            payment
        }
    };

    Ok(EnrollmentReceipt {
        titular,
        contract,
        beneficiaries: created.beneficiaries.clone(),
        payment,
    })
}
