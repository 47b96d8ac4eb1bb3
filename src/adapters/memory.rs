//! In-process backend implementing both ports.
//!
//! Mirrors the portal API's server-side guards: unique document numbers, one-level
//! parent links, at most one active contract per titular and the plan's beneficiary
//! capacity on every write that adds a beneficiary.

use crate::core::capacity;
use crate::domain::model::{
    ContractId, MembershipContract, NewContract, NewPatient, NewPayment, PatientId,
    PatientRecord, PaymentRecord, Person, PersonData, Plan, PlanId,
};
use crate::domain::ports::{PersistencePort, PlanCatalog};
use crate::utils::error::{CollaboratorErrorKind, EnrollmentError, Result};
use async_trait::async_trait;
use chrono::{Duration, Local};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

const CONFLICT: u16 = 409;

#[derive(Debug, Default)]
struct BackendState {
    next_id: i64,
    patients: BTreeMap<PatientId, PatientRecord>,
    contracts: BTreeMap<ContractId, MembershipContract>,
    plans: HashMap<PlanId, Plan>,
    payments: Vec<PaymentRecord>,
}

impl BackendState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn active_contract(&self, titular_patient_id: PatientId) -> Option<&MembershipContract> {
        self.contracts
            .values()
            .find(|c| c.titular_patient_id == titular_patient_id && c.active)
    }

    fn beneficiary_count(&self, titular_patient_id: PatientId, excluding: Option<PatientId>) -> usize {
        self.patients
            .values()
            .filter(|p| p.parent_patient_id == Some(titular_patient_id))
            .filter(|p| Some(p.patient_id) != excluding)
            .count()
    }

    fn new_patient(&mut self, data: PersonData, parent_patient_id: Option<PatientId>) -> PatientRecord {
        let id = self.allocate_id();
        let record = PatientRecord {
            patient_id: id,
            parent_patient_id,
            person: Person {
                person_id: id,
                data,
                active: true,
            },
        };
        self.patients.insert(id, record.clone());
        record
    }

    /// 伺服器端守衛：連結 `patient_id` 到 `parent` 是否合法
    fn guard_link(&self, operation: &str, patient_id: Option<PatientId>, parent: PatientId) -> Result<()> {
        let rejected = |reason: String| {
            Err(EnrollmentError::collaborator(
                operation,
                CollaboratorErrorKind::Rejected { status: CONFLICT },
                Some(reason),
            ))
        };

        match self.patients.get(&parent) {
            None => return rejected(format!("titular {} does not exist", parent)),
            Some(p) if p.is_beneficiary() => {
                return rejected(format!("patient {} is itself a beneficiary", parent))
            }
            Some(_) => {}
        }
        if let Some(id) = patient_id {
            if id == parent {
                return rejected(format!("patient {} cannot reference itself", id));
            }
            if self.beneficiary_count(id, None) > 0 {
                return rejected(format!("patient {} has beneficiaries of its own", id));
            }
        }

        let Some(contract) = self.active_contract(parent) else {
            return rejected(format!("titular {} has no active contract", parent));
        };
        let plan_capacity = self
            .plans
            .get(&contract.plan_id)
            .and_then(|p| p.beneficiary_capacity);
        let current = self.beneficiary_count(parent, patient_id);
        if !capacity::can_add(plan_capacity, current, 1)? {
            return rejected(format!("beneficiary capacity exceeded for titular {}", parent));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_plan(&self, plan: Plan) {
        let mut state = self.state.lock().await;
        state.plans.insert(plan.plan_id, plan);
    }

    /// Seeds a patient without running the server-side guards.
    pub async fn insert_patient(
        &self,
        data: PersonData,
        parent_patient_id: Option<PatientId>,
    ) -> PatientRecord {
        let mut state = self.state.lock().await;
        state.new_patient(data, parent_patient_id)
    }

    /// Seeds a one-year contract starting today.
    pub async fn insert_contract(
        &self,
        titular_patient_id: PatientId,
        plan_id: PlanId,
        active: bool,
    ) -> Result<MembershipContract> {
        let mut state = self.state.lock().await;
        if !state.patients.contains_key(&titular_patient_id) {
            return Err(EnrollmentError::PatientNotFound {
                patient_id: titular_patient_id,
            });
        }
        let start_date = Local::now().date_naive();
        let contract = MembershipContract {
            contract_id: state.allocate_id(),
            titular_patient_id,
            plan_id,
            start_date,
            end_date: start_date + Duration::days(365),
            active,
        };
        state.contracts.insert(contract.contract_id, contract.clone());
        Ok(contract)
    }

    pub async fn beneficiary_count(&self, titular_patient_id: PatientId) -> usize {
        self.state
            .lock()
            .await
            .beneficiary_count(titular_patient_id, None)
    }

    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.state.lock().await.payments.clone()
    }

    pub async fn patient_count(&self) -> usize {
        self.state.lock().await.patients.len()
    }
}

#[async_trait]
impl PersistencePort for InMemoryBackend {
    async fn get_patient(&self, patient_id: PatientId) -> Result<Option<PatientRecord>> {
        Ok(self.state.lock().await.patients.get(&patient_id).cloned())
    }

    async fn get_active_contract(
        &self,
        titular_patient_id: PatientId,
    ) -> Result<Option<MembershipContract>> {
        Ok(self
            .state
            .lock()
            .await
            .active_contract(titular_patient_id)
            .cloned())
    }

    async fn list_beneficiaries(&self, titular_patient_id: PatientId) -> Result<Vec<PatientRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .patients
            .values()
            .filter(|p| p.parent_patient_id == Some(titular_patient_id))
            .cloned()
            .collect())
    }

    async fn list_unaffiliated_patients(&self) -> Result<Vec<PatientRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .patients
            .values()
            .filter(|p| p.is_titular() && state.active_contract(p.patient_id).is_none())
            .cloned()
            .collect())
    }

    async fn create_person(&self, request: &NewPatient) -> Result<PatientRecord> {
        let mut state = self.state.lock().await;
        let document_number = request.person.document_number.trim();
        if state
            .patients
            .values()
            .any(|p| p.document_number().trim() == document_number)
        {
            return Err(EnrollmentError::validation(
                "document_number",
                format!("Document number {} is already registered", document_number),
            ));
        }
        if let Some(parent) = request.parent_patient_id {
            state.guard_link("create_person", None, parent)?;
        }
        Ok(state.new_patient(request.person.clone(), request.parent_patient_id))
    }

    async fn set_parent(
        &self,
        patient_id: PatientId,
        parent_patient_id: Option<PatientId>,
    ) -> Result<PatientRecord> {
        let mut state = self.state.lock().await;
        if !state.patients.contains_key(&patient_id) {
            return Err(EnrollmentError::PatientNotFound { patient_id });
        }
        if let Some(parent) = parent_patient_id {
            state.guard_link("set_parent", Some(patient_id), parent)?;
        }
        let record = state
            .patients
            .get_mut(&patient_id)
            .ok_or(EnrollmentError::PatientNotFound { patient_id })?;
        record.parent_patient_id = parent_patient_id;
        Ok(record.clone())
    }

    async fn create_contract(&self, request: &NewContract) -> Result<MembershipContract> {
        let mut state = self.state.lock().await;
        match state.patients.get(&request.titular_patient_id) {
            None => {
                return Err(EnrollmentError::PatientNotFound {
                    patient_id: request.titular_patient_id,
                })
            }
            Some(p) if p.is_beneficiary() => {
                return Err(EnrollmentError::collaborator(
                    "create_contract",
                    CollaboratorErrorKind::Rejected { status: CONFLICT },
                    Some(format!(
                        "patient {} is a beneficiary and cannot hold a contract",
                        request.titular_patient_id
                    )),
                ))
            }
            Some(_) => {}
        }
        if request.active && state.active_contract(request.titular_patient_id).is_some() {
            return Err(EnrollmentError::collaborator(
                "create_contract",
                CollaboratorErrorKind::Rejected { status: CONFLICT },
                Some(format!(
                    "titular {} already has an active contract",
                    request.titular_patient_id
                )),
            ));
        }
        let contract = MembershipContract {
            contract_id: state.allocate_id(),
            titular_patient_id: request.titular_patient_id,
            plan_id: request.plan_id,
            start_date: request.start_date,
            end_date: request.end_date,
            active: request.active,
        };
        state.contracts.insert(contract.contract_id, contract.clone());
        Ok(contract)
    }

    async fn create_payment(&self, request: &NewPayment) -> Result<PaymentRecord> {
        let mut state = self.state.lock().await;
        if !state.contracts.contains_key(&request.contract_id) {
            return Err(EnrollmentError::validation(
                "contract_id",
                format!("Contract {} does not exist", request.contract_id),
            ));
        }
        let payment = PaymentRecord {
            payment_id: state.allocate_id(),
            contract_id: request.contract_id,
            titular_patient_id: request.titular_patient_id,
            amount: request.amount,
            method: request.method.clone(),
            reference: request.reference.clone(),
            paid_on: request.paid_on,
        };
        state.payments.push(payment.clone());
        Ok(payment)
    }
}

#[async_trait]
impl PlanCatalog for InMemoryBackend {
    async fn get_plan(&self, plan_id: PlanId) -> Result<Plan> {
        self.state
            .lock()
            .await
            .plans
            .get(&plan_id)
            .cloned()
            .ok_or(EnrollmentError::PlanNotFound { plan_id })
    }
}
