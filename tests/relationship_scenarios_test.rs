use beneficiary_enrollment::domain::model::{PatientId, PersonData, Plan};
use beneficiary_enrollment::domain::ports::PersistencePort;
use beneficiary_enrollment::{EnrollmentError, InMemoryBackend, RelationshipMutator};
use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};

fn person(document_number: &str) -> PersonData {
    PersonData {
        document_type: "DNI".to_string(),
        document_number: document_number.to_string(),
        first_name: "Julia".to_string(),
        last_name: "Mendoza".to_string(),
        birth_date: NaiveDate::from_ymd_opt(1992, 9, 14),
        ..Default::default()
    }
}

/// Seeds a titular with an active contract on a plan of the given capacity.
async fn seed_titular(backend: &InMemoryBackend, capacity: Option<i64>) -> PatientId {
    backend
        .add_plan(Plan {
            plan_id: 10,
            name: "Plan Hogar".to_string(),
            price: 99.9,
            beneficiary_capacity: capacity,
        })
        .await;
    let titular = backend.insert_patient(person("T-0010"), None).await;
    backend
        .insert_contract(titular.patient_id, 10, true)
        .await
        .unwrap();
    titular.patient_id
}

async fn seed_unaffiliated(backend: &InMemoryBackend, document_number: &str) -> PatientId {
    backend
        .insert_patient(person(document_number), None)
        .await
        .patient_id
}

#[tokio::test]
async fn test_scenario_a_batch_fills_plan_then_create_fails() {
    let backend = InMemoryBackend::new();
    let titular = seed_titular(&backend, Some(2)).await;
    let b1 = seed_unaffiliated(&backend, "B-0001").await;
    let b2 = seed_unaffiliated(&backend, "B-0002").await;
    let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

    let result = assert_ok!(mutator.associate_beneficiaries(titular, &[b1, b2]).await);
    assert_eq!(result.succeeded_ids(), vec![b1, b2]);
    assert!(result.is_complete());

    let err = assert_err!(mutator.create_beneficiary(titular, person("B-0003")).await);
    assert!(matches!(
        err,
        EnrollmentError::CapacityExceeded {
            capacity: 2,
            current: 2,
            requested: 1
        }
    ));
    assert_eq!(backend.beneficiary_count(titular).await, 2);
}

#[tokio::test]
async fn test_scenario_b_disassociate_frees_one_slot() {
    let backend = InMemoryBackend::new();
    let titular = seed_titular(&backend, Some(2)).await;
    let b1 = backend.insert_patient(person("B-0011"), Some(titular)).await;
    backend.insert_patient(person("B-0012"), Some(titular)).await;
    let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

    let freed = assert_ok!(mutator.disassociate_beneficiary(b1.patient_id).await);
    assert!(freed.is_titular());
    assert_eq!(
        mutator.capacity_snapshot(titular).await.unwrap().current_count,
        1
    );

    let created = assert_ok!(mutator.create_beneficiary(titular, person("B-0013")).await);
    assert_eq!(created.parent_patient_id, Some(titular));
    assert_eq!(backend.beneficiary_count(titular).await, 2);
}

#[tokio::test]
async fn test_scenario_c_batch_over_capacity_is_all_or_nothing() {
    let backend = InMemoryBackend::new();
    let titular = seed_titular(&backend, Some(1)).await;
    let b1 = seed_unaffiliated(&backend, "B-0021").await;
    let b2 = seed_unaffiliated(&backend, "B-0022").await;
    let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

    let err = assert_err!(mutator.associate_beneficiaries(titular, &[b1, b2]).await);
    assert!(matches!(err, EnrollmentError::CapacityExceeded { .. }));
    assert!(err.to_string().contains("only 1 more beneficiary can be added"));

    for id in [b1, b2] {
        let record = backend.get_patient(id).await.unwrap().unwrap();
        assert_eq!(record.parent_patient_id, None);
    }
    assert_eq!(backend.beneficiary_count(titular).await, 0);
}

#[tokio::test]
async fn test_disassociate_is_idempotent_in_effect() {
    let backend = InMemoryBackend::new();
    let titular = seed_titular(&backend, Some(3)).await;
    let beneficiary = backend.insert_patient(person("B-0031"), Some(titular)).await;
    let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

    let first = assert_ok!(mutator.disassociate_beneficiary(beneficiary.patient_id).await);
    let err = assert_err!(mutator.disassociate_beneficiary(beneficiary.patient_id).await);
    assert!(matches!(
        err,
        EnrollmentError::NotABeneficiary { patient_id } if patient_id == beneficiary.patient_id
    ));

    let stored = backend
        .get_patient(beneficiary.patient_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, first);
    assert_eq!(backend.beneficiary_count(titular).await, 0);
}

#[tokio::test]
async fn test_invariant_holds_across_mixed_operations() {
    let backend = InMemoryBackend::new();
    let capacity = 3;
    let titular = seed_titular(&backend, Some(capacity)).await;
    let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

    let pool: Vec<PatientId> = {
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(seed_unaffiliated(&backend, &format!("P-01{:02}", i)).await);
        }
        ids
    };

    // 前置條件失敗的操作必須不改變任何狀態
    let _ = mutator.associate_beneficiaries(titular, &pool[0..2]).await;
    let _ = mutator.create_beneficiary(titular, person("N-0001")).await;
    let _ = mutator.create_beneficiary(titular, person("N-0002")).await;
    let _ = mutator.associate_beneficiaries(titular, &pool[2..4]).await;
    let linked: Vec<PatientId> = backend
        .list_beneficiaries(titular)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.patient_id)
        .collect();
    let _ = mutator.disassociate_beneficiary(linked[0]).await;
    let _ = mutator.associate_beneficiaries(titular, &pool[4..5]).await;
    let _ = mutator.associate_beneficiaries(titular, &pool[5..6]).await;

    let count = backend.beneficiary_count(titular).await;
    assert!(count <= capacity as usize);
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_unbounded_plan_accepts_any_batch() {
    let backend = InMemoryBackend::new();
    let titular = seed_titular(&backend, None).await;
    let mut pool = Vec::new();
    for i in 0..8 {
        pool.push(seed_unaffiliated(&backend, &format!("U-02{:02}", i)).await);
    }
    let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

    let result = assert_ok!(mutator.associate_beneficiaries(titular, &pool).await);
    assert_eq!(result.succeeded.len(), 8);
    assert_eq!(
        mutator.capacity_snapshot(titular).await.unwrap().remaining().unwrap(),
        None
    );
}

#[tokio::test]
async fn test_beneficiary_cannot_hold_beneficiaries() {
    let backend = InMemoryBackend::new();
    let titular = seed_titular(&backend, Some(2)).await;
    let beneficiary = backend.insert_patient(person("B-0041"), Some(titular)).await;
    let mutator = RelationshipMutator::new(backend.clone(), backend.clone());

    let err = assert_err!(
        mutator
            .create_beneficiary(beneficiary.patient_id, person("B-0042"))
            .await
    );
    assert!(matches!(err, EnrollmentError::ValidationError { .. }));
}
