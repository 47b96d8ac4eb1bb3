use crate::domain::model::{
    MembershipContract, NewContract, NewPatient, NewPayment, PatientId, PatientRecord,
    PaymentRecord, Plan, PlanId,
};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Authoritative store for patients, contracts and payments.
///
/// Calls may suspend and may fail independently; nothing here is transactional
/// across calls.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn get_patient(&self, patient_id: PatientId) -> Result<Option<PatientRecord>>;

    async fn get_active_contract(
        &self,
        titular_patient_id: PatientId,
    ) -> Result<Option<MembershipContract>>;

    async fn list_beneficiaries(&self, titular_patient_id: PatientId) -> Result<Vec<PatientRecord>>;

    /// 沒有上層 titular 且沒有有效合約的病患
    async fn list_unaffiliated_patients(&self) -> Result<Vec<PatientRecord>>;

    async fn create_person(&self, request: &NewPatient) -> Result<PatientRecord>;

    async fn set_parent(
        &self,
        patient_id: PatientId,
        parent_patient_id: Option<PatientId>,
    ) -> Result<PatientRecord>;

    async fn create_contract(&self, request: &NewContract) -> Result<MembershipContract>;

    async fn create_payment(&self, request: &NewPayment) -> Result<PaymentRecord>;
}

#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn get_plan(&self, plan_id: PlanId) -> Result<Plan>;
}
