use crate::core::capacity::CapacitySnapshot;
use crate::domain::model::{
    AssociationFailure, AssociationResult, NewPatient, PatientId, PatientRecord, PersonData,
};
use crate::domain::ports::{PersistencePort, PlanCatalog};
use crate::utils::error::{EnrollmentError, Result};
use crate::utils::validation::{Validate, ValidationReport};
use std::collections::HashSet;

/// Creates, associates and disassociates beneficiaries under the plan's capacity limit.
///
/// There is no transaction spanning the collaborator calls. Every mutation is preceded
/// by a fresh read of the beneficiary count (read-verify-write); a concurrent caller can
/// still slip in between the read and the write, in which case the collaborator is
/// expected to reject the write and that rejection is returned unchanged.
pub struct RelationshipMutator<P: PersistencePort, C: PlanCatalog> {
    persistence: P,
    catalog: C,
}

impl<P: PersistencePort, C: PlanCatalog> RelationshipMutator<P, C> {
    pub fn new(persistence: P, catalog: C) -> Self {
        Self {
            persistence,
            catalog,
        }
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    async fn require_patient(&self, patient_id: PatientId) -> Result<PatientRecord> {
        self.persistence
            .get_patient(patient_id)
            .await?
            .ok_or(EnrollmentError::PatientNotFound { patient_id })
    }

    /// 從權威來源重新讀取容量狀態，不做任何快取
    pub async fn capacity_snapshot(&self, titular_patient_id: PatientId) -> Result<CapacitySnapshot> {
        let titular = self.require_patient(titular_patient_id).await?;
        if let Some(parent) = titular.parent_patient_id {
            return Err(EnrollmentError::validation(
                "titular_patient_id",
                format!(
                    "Patient {} is a beneficiary of {} and cannot hold beneficiaries",
                    titular_patient_id, parent
                ),
            ));
        }

        let contract = self
            .persistence
            .get_active_contract(titular_patient_id)
            .await?
            .filter(|c| c.active)
            .ok_or(EnrollmentError::NoActiveContract { titular_patient_id })?;

        let plan = self.catalog.get_plan(contract.plan_id).await?;
        let current_count = self
            .persistence
            .list_beneficiaries(titular_patient_id)
            .await?
            .len();

        let snapshot = CapacitySnapshot {
            titular_patient_id,
            contract_id: contract.contract_id,
            plan_id: plan.plan_id,
            capacity: plan.beneficiary_capacity,
            current_count,
        };
        // 負數容量在這裡就失敗
        snapshot.remaining()?;

        tracing::debug!(
            "Capacity for titular {}: {} of {:?} slots used (plan {})",
            titular_patient_id,
            snapshot.current_count,
            snapshot.capacity,
            snapshot.plan_id
        );
        Ok(snapshot)
    }

    /// Creates a new person already linked to the titular.
    pub async fn create_beneficiary(
        &self,
        titular_patient_id: PatientId,
        person: PersonData,
    ) -> Result<PatientRecord> {
        // 本地驗證先於任何網路呼叫
        person.validate()?;

        let snapshot = self.capacity_snapshot(titular_patient_id).await?;
        if let Err(e) = snapshot.ensure_room_for(1) {
            tracing::warn!(
                "❌ Beneficiary creation rejected for titular {}: {}",
                titular_patient_id,
                e
            );
            return Err(e);
        }

        let request = NewPatient {
            person,
            parent_patient_id: Some(titular_patient_id),
        };
        let created = self.persistence.create_person(&request).await?;

        tracing::info!(
            "✅ Beneficiary {} created for titular {}",
            created.patient_id,
            titular_patient_id
        );
        Ok(created)
    }

    /// Links existing unaffiliated titulars to `titular_patient_id`.
    ///
    /// The capacity check covers the whole batch: if it does not fit, nothing is mutated.
    /// Once mutations start, each candidate is committed independently and reported in
    /// either `succeeded` or `failed`.
    pub async fn associate_beneficiaries(
        &self,
        titular_patient_id: PatientId,
        candidate_patient_ids: &[PatientId],
    ) -> Result<AssociationResult> {
        check_candidate_list(titular_patient_id, candidate_patient_ids)?;
        if candidate_patient_ids.is_empty() {
            return Ok(AssociationResult::default());
        }

        let mut report = ValidationReport::new();
        for (index, &candidate_id) in candidate_patient_ids.iter().enumerate() {
            let field = format!("candidate_patient_ids[{}]", index);
            if let Some(reason) = self.ineligibility_reason(candidate_id).await? {
                report.push(field, reason);
            }
        }
        report.finish()?;

        // 容量檢查必須緊接在變更之前
        let snapshot = self.capacity_snapshot(titular_patient_id).await?;
        if let Err(e) = snapshot.ensure_room_for(candidate_patient_ids.len()) {
            tracing::warn!(
                "❌ Association of {} candidates rejected for titular {}: {}",
                candidate_patient_ids.len(),
                titular_patient_id,
                e
            );
            return Err(e);
        }

        let mut result = AssociationResult::default();
        for &candidate_id in candidate_patient_ids {
            match self
                .persistence
                .set_parent(candidate_id, Some(titular_patient_id))
                .await
            {
                Ok(record) => {
                    tracing::info!(
                        "✅ Patient {} associated to titular {}",
                        candidate_id,
                        titular_patient_id
                    );
                    result.succeeded.push(record);
                }
                Err(error) => {
                    tracing::warn!(
                        "⚠️ Association of patient {} to titular {} failed: {}",
                        candidate_id,
                        titular_patient_id,
                        error
                    );
                    result.failed.push(AssociationFailure {
                        patient_id: candidate_id,
                        error,
                    });
                }
            }
        }

        tracing::info!(
            "Association batch for titular {}: {} succeeded, {} failed",
            titular_patient_id,
            result.succeeded.len(),
            result.failed.len()
        );
        Ok(result)
    }

    /// Clears the parent link. The person record is kept and may become a titular again.
    pub async fn disassociate_beneficiary(
        &self,
        beneficiary_patient_id: PatientId,
    ) -> Result<PatientRecord> {
        let record = self.require_patient(beneficiary_patient_id).await?;
        let Some(former_titular) = record.parent_patient_id else {
            return Err(EnrollmentError::NotABeneficiary {
                patient_id: beneficiary_patient_id,
            });
        };

        let updated = self
            .persistence
            .set_parent(beneficiary_patient_id, None)
            .await?;

        tracing::info!(
            "✅ Patient {} disassociated from titular {}",
            beneficiary_patient_id,
            former_titular
        );
        Ok(updated)
    }

    /// Unaffiliated titulars that could be associated to `titular_patient_id` right now.
    pub async fn association_candidates(
        &self,
        titular_patient_id: PatientId,
    ) -> Result<Vec<PatientRecord>> {
        let pool = self.persistence.list_unaffiliated_patients().await?;
        let mut candidates = Vec::with_capacity(pool.len());
        for patient in pool {
            if patient.patient_id == titular_patient_id || patient.is_beneficiary() {
                continue;
            }
            // 自己已有受益人者不可再成為受益人 (深度只有一層)
            if !self
                .persistence
                .list_beneficiaries(patient.patient_id)
                .await?
                .is_empty()
            {
                continue;
            }
            candidates.push(patient);
        }
        Ok(candidates)
    }

    async fn ineligibility_reason(&self, candidate_id: PatientId) -> Result<Option<String>> {
        let candidate = self.require_patient(candidate_id).await?;
        if let Some(parent) = candidate.parent_patient_id {
            return Ok(Some(format!(
                "Patient {} is already a beneficiary of {}",
                candidate_id, parent
            )));
        }
        if self
            .persistence
            .get_active_contract(candidate_id)
            .await?
            .is_some_and(|c| c.active)
        {
            return Ok(Some(format!(
                "Patient {} holds an active contract",
                candidate_id
            )));
        }
        if !self
            .persistence
            .list_beneficiaries(candidate_id)
            .await?
            .is_empty()
        {
            return Ok(Some(format!(
                "Patient {} has beneficiaries of their own",
                candidate_id
            )));
        }
        Ok(None)
    }
}

fn check_candidate_list(titular_patient_id: PatientId, candidates: &[PatientId]) -> Result<()> {
    let mut report = ValidationReport::new();
    let mut seen = HashSet::new();
    for (index, &candidate_id) in candidates.iter().enumerate() {
        let field = format!("candidate_patient_ids[{}]", index);
        if candidate_id == titular_patient_id {
            report.push(field, "A titular cannot be its own beneficiary");
        } else if !seen.insert(candidate_id) {
            report.push(field, format!("Patient {} is listed twice", candidate_id));
        }
    }
    report.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBackend;
    use crate::domain::model::{
        MembershipContract, NewContract, NewPayment, PaymentRecord, Plan,
    };
    use crate::utils::error::CollaboratorErrorKind;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Wraps the in-memory backend and fails `set_parent` for selected patients.
    #[derive(Clone)]
    struct FlakyPersistence {
        inner: InMemoryBackend,
        failing: Vec<PatientId>,
        set_parent_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PersistencePort for FlakyPersistence {
        async fn get_patient(&self, patient_id: PatientId) -> Result<Option<PatientRecord>> {
            self.inner.get_patient(patient_id).await
        }

        async fn get_active_contract(
            &self,
            titular_patient_id: PatientId,
        ) -> Result<Option<MembershipContract>> {
            self.inner.get_active_contract(titular_patient_id).await
        }

        async fn list_beneficiaries(
            &self,
            titular_patient_id: PatientId,
        ) -> Result<Vec<PatientRecord>> {
            self.inner.list_beneficiaries(titular_patient_id).await
        }

        async fn list_unaffiliated_patients(&self) -> Result<Vec<PatientRecord>> {
            self.inner.list_unaffiliated_patients().await
        }

        async fn create_person(&self, request: &NewPatient) -> Result<PatientRecord> {
            self.inner.create_person(request).await
        }

        async fn set_parent(
            &self,
            patient_id: PatientId,
            parent_patient_id: Option<PatientId>,
        ) -> Result<PatientRecord> {
            self.set_parent_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&patient_id) {
                return Err(EnrollmentError::collaborator(
                    "set_parent",
                    CollaboratorErrorKind::Timeout,
                    None,
                ));
            }
            self.inner.set_parent(patient_id, parent_patient_id).await
        }

        async fn create_contract(&self, request: &NewContract) -> Result<MembershipContract> {
            self.inner.create_contract(request).await
        }

        async fn create_payment(&self, request: &NewPayment) -> Result<PaymentRecord> {
            self.inner.create_payment(request).await
        }
    }

    fn person(document_number: &str) -> PersonData {
        PersonData {
            document_type: "DNI".to_string(),
            document_number: document_number.to_string(),
            first_name: "Test".to_string(),
            last_name: document_number.to_string(),
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1),
            ..Default::default()
        }
    }

    async fn titular_with_plan(backend: &InMemoryBackend, capacity: Option<i64>) -> PatientId {
        backend
            .add_plan(Plan {
                plan_id: 1,
                name: "Familiar".to_string(),
                price: 120.0,
                beneficiary_capacity: capacity,
            })
            .await;
        let titular = backend.insert_patient(person("T-0001"), None).await;
        backend
            .insert_contract(titular.patient_id, 1, true)
            .await
            .unwrap();
        titular.patient_id
    }

    #[tokio::test]
    async fn test_create_beneficiary_links_to_titular() {
        let backend = InMemoryBackend::new();
        let titular = titular_with_plan(&backend, Some(2)).await;
        let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

        let created = mutator
            .create_beneficiary(titular, person("B-0001"))
            .await
            .unwrap();

        assert_eq!(created.parent_patient_id, Some(titular));
        assert_eq!(mutator.capacity_snapshot(titular).await.unwrap().current_count, 1);
    }

    #[tokio::test]
    async fn test_create_beneficiary_validates_before_network() {
        let backend = InMemoryBackend::new();
        let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

        // 不存在的 titular 也應先得到驗證錯誤
        let err = mutator
            .create_beneficiary(999, PersonData::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::ValidationError { .. }));
    }

    #[tokio::test]
    async fn test_create_beneficiary_requires_active_contract() {
        let backend = InMemoryBackend::new();
        let titular = backend.insert_patient(person("T-0002"), None).await;
        let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

        let err = mutator
            .create_beneficiary(titular.patient_id, person("B-0002"))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::NoActiveContract { .. }));
    }

    #[tokio::test]
    async fn test_count_is_reread_before_each_mutation() {
        let backend = InMemoryBackend::new();
        let titular = titular_with_plan(&backend, Some(1)).await;
        let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

        let before = mutator.capacity_snapshot(titular).await.unwrap();
        assert_eq!(before.remaining().unwrap(), Some(1));

        // 另一個呼叫者在中間佔用了名額
        backend.insert_patient(person("B-0100"), Some(titular)).await;

        let err = mutator
            .create_beneficiary(titular, person("B-0101"))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::CapacityExceeded { current: 1, .. }));
    }

    #[tokio::test]
    async fn test_associate_rejects_self_and_duplicates_locally() {
        let backend = InMemoryBackend::new();
        let titular = titular_with_plan(&backend, Some(5)).await;
        let candidate = backend.insert_patient(person("C-0001"), None).await;
        let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

        let err = mutator
            .associate_beneficiaries(
                titular,
                &[titular, candidate.patient_id, candidate.patient_id],
            )
            .await
            .unwrap_err();
        assert_eq!(err.field_errors().len(), 2);
        assert!(backend.get_patient(candidate.patient_id).await.unwrap().unwrap().is_titular());
    }

    #[tokio::test]
    async fn test_associate_rejects_ineligible_candidates_before_mutating() {
        let backend = InMemoryBackend::new();
        let titular = titular_with_plan(&backend, Some(5)).await;
        let free = backend.insert_patient(person("C-0010"), None).await;
        let contracted = backend.insert_patient(person("C-0011"), None).await;
        backend
            .insert_contract(contracted.patient_id, 1, true)
            .await
            .unwrap();
        let with_dependents = backend.insert_patient(person("C-0012"), None).await;
        backend
            .insert_patient(person("C-0013"), Some(with_dependents.patient_id))
            .await;

        let mutator = RelationshipMutator::new(backend.clone(), backend.clone());
        let err = mutator
            .associate_beneficiaries(
                titular,
                &[free.patient_id, contracted.patient_id, with_dependents.patient_id],
            )
            .await
            .unwrap_err();

        assert_eq!(err.field_errors().len(), 2);
        assert!(backend.get_patient(free.patient_id).await.unwrap().unwrap().is_titular());
    }

    #[tokio::test]
    async fn test_associate_reports_partial_failures_without_retry() {
        let backend = InMemoryBackend::new();
        let titular = titular_with_plan(&backend, Some(3)).await;
        let b1 = backend.insert_patient(person("C-0020"), None).await;
        let b2 = backend.insert_patient(person("C-0021"), None).await;
        let b3 = backend.insert_patient(person("C-0022"), None).await;

        let flaky = FlakyPersistence {
            inner: backend.clone(),
            failing: vec![b2.patient_id],
            set_parent_calls: Arc::new(AtomicUsize::new(0)),
        };
        let calls = flaky.set_parent_calls.clone();
        let mutator = RelationshipMutator::new(flaky, backend.clone());

        let result = mutator
            .associate_beneficiaries(titular, &[b1.patient_id, b2.patient_id, b3.patient_id])
            .await
            .unwrap();

        assert_eq!(result.succeeded_ids(), vec![b1.patient_id, b3.patient_id]);
        assert_eq!(result.failed_ids(), vec![b2.patient_id]);
        assert!(!result.is_complete());
        assert!(matches!(
            result.failed[0].error,
            EnrollmentError::CollaboratorFailure {
                kind: CollaboratorErrorKind::Timeout,
                ..
            }
        ));
        // 每位候選人只嘗試一次
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(backend.beneficiary_count(titular).await, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let backend = InMemoryBackend::new();
        let mutator = RelationshipMutator::new(backend.clone(), backend.clone());
        let result = mutator.associate_beneficiaries(42, &[]).await.unwrap();
        assert!(result.succeeded.is_empty());
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn test_disassociate_twice_yields_not_a_beneficiary() {
        let backend = InMemoryBackend::new();
        let titular = titular_with_plan(&backend, Some(2)).await;
        let beneficiary = backend.insert_patient(person("B-0200"), Some(titular)).await;
        let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

        let first = mutator
            .disassociate_beneficiary(beneficiary.patient_id)
            .await
            .unwrap();
        assert!(first.is_titular());

        let second = mutator
            .disassociate_beneficiary(beneficiary.patient_id)
            .await
            .unwrap_err();
        assert!(matches!(second, EnrollmentError::NotABeneficiary { .. }));

        let stored = backend.get_patient(beneficiary.patient_id).await.unwrap().unwrap();
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn test_association_candidates_excludes_ineligible() {
        let backend = InMemoryBackend::new();
        let titular = titular_with_plan(&backend, Some(2)).await;
        let free = backend.insert_patient(person("C-0030"), None).await;
        let parent_like = backend.insert_patient(person("C-0031"), None).await;
        backend
            .insert_patient(person("C-0032"), Some(parent_like.patient_id))
            .await;

        let mutator = RelationshipMutator::new(backend.clone(), backend.clone());
        let ids: Vec<PatientId> = mutator
            .association_candidates(titular)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.patient_id)
            .collect();

        assert_eq!(ids, vec![free.patient_id]);
    }

    #[tokio::test]
    async fn test_negative_plan_capacity_is_invalid_configuration() {
        let backend = InMemoryBackend::new();
        let titular = titular_with_plan(&backend, Some(-1)).await;
        let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

        let err = mutator.capacity_snapshot(titular).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::InvalidConfiguration { .. }));
    }
}
