//! Behaviour every `ReviewStore` must share, run against both backends.

use pmr_core::{
    ErrorKind, EscalationPriority, EscalationStatus, EscalationTrigger, NewEscalation,
    NewRecommendation, RecommendationStatus,
};
use pmr_storage::{Database, MemoryStore, ReviewStore};
use std::path::PathBuf;
use std::sync::Arc;

async fn turso_store() -> (Arc<dyn ReviewStore>, PathBuf) {
    let db_path = std::env::temp_dir().join(format!("test_pmr_contract_{}.db", uuid::Uuid::new_v4()));
    let db = Database::open(&db_path).await.expect("Failed to open database");
    db.init_schema().await.expect("Failed to init schema");
    (Arc::new(db), db_path)
}

fn new_recommendation(mrn: &str, hierarchy: u32, previous: Option<i64>) -> NewRecommendation {
    NewRecommendation {
        patient_mrn: mrn.to_string(),
        regimen_hierarchy: hierarchy,
        drugs: vec!["Morphine:morphine:5mg:4h:IV".parse().unwrap()],
        contraindications: Default::default(),
        previous_recommendation_id: previous,
        created_by: "dr-a".to_string(),
    }
}

/// Two reviewers race to take the same PENDING escalation
async fn concurrent_take_has_one_winner(store: Arc<dyn ReviewStore>) {
    let rec = store
        .insert_recommendation(new_recommendation("MRN-1", 1, None))
        .await
        .unwrap();
    let mut next = rec.clone();
    next.status = RecommendationStatus::Escalated;
    let rec = store.swap_recommendation(&rec, next).await.unwrap();

    let esc = store
        .insert_escalation(NewEscalation {
            recommendation_id: rec.id,
            escalated_by: "dr-a".to_string(),
            trigger: EscalationTrigger::Manual,
            priority: EscalationPriority::Medium,
        })
        .await
        .unwrap();

    let mut handles = Vec::new();
    for reviewer in ["rev-1", "rev-2"] {
        let store = Arc::clone(&store);
        let current = esc.clone();
        handles.push(tokio::spawn(async move {
            let mut next = current.clone();
            next.status = EscalationStatus::InReview;
            next.reviewer = Some(reviewer.to_string());
            store.swap_escalation(&current, next).await
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    let winners: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);

    let loser = outcomes.iter().find_map(|o| o.as_ref().err()).unwrap();
    assert_eq!(loser.kind(), ErrorKind::Conflict);
    assert_eq!(loser.current_status(), Some("IN_REVIEW"));

    let stored = store.get_escalation(esc.id).await.unwrap();
    assert_eq!(stored.reviewer, winners[0].reviewer);
}

/// A recommendation can be replaced at most once
async fn second_successor_conflicts(store: Arc<dyn ReviewStore>) {
    let first = store
        .insert_recommendation(new_recommendation("MRN-2", 1, None))
        .await
        .unwrap();
    store
        .insert_recommendation(new_recommendation("MRN-2", 2, Some(first.id)))
        .await
        .unwrap();

    let err = store
        .insert_recommendation(new_recommendation("MRN-2", 2, Some(first.id)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = store
        .insert_recommendation(new_recommendation("MRN-2", 2, Some(404)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_memory_concurrent_take() {
    concurrent_take_has_one_winner(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_turso_concurrent_take() {
    let (store, db_path) = turso_store().await;
    concurrent_take_has_one_winner(store).await;
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_memory_single_successor() {
    second_successor_conflicts(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_turso_single_successor() {
    let (store, db_path) = turso_store().await;
    second_successor_conflicts(store).await;
    let _ = std::fs::remove_file(&db_path);
}
