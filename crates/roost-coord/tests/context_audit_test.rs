//! Integration tests for the shared context store and audit log queries.

use roost_coord::{
    ActionFilter, ActionType, CoordConfig, CoordError, Coordinator, SetContext,
};
use serde_json::json;
use tempfile::TempDir;

async fn setup() -> (Coordinator, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = CoordConfig {
        database_path: dir.path().join("roost.db").to_string_lossy().to_string(),
        ..Default::default()
    };
    let coord = Coordinator::open(config).await.expect("Failed to open coordinator");
    (coord, dir)
}

#[tokio::test]
async fn test_context_create_update_delete() {
    let (coord, _dir) = setup().await;
    let admin = coord.admin_token().to_string();
    let a = coord.create_agent(&admin, "a", vec![], None).await.unwrap();

    // Creating requires a value
    let err = coord
        .set_context(&a.token, "build/target", SetContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::InvalidInput(_)));

    let entry = coord
        .set_context(
            &a.token,
            "build/target",
            SetContext {
                value: Some(json!({"triple": "x86_64-unknown-linux-gnu"})),
                description: Some("active build target".to_string()),
                create_only: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(entry.updated_by, "a");

    // create_only refuses to clobber
    let err = coord
        .set_context(
            &a.token,
            "build/target",
            SetContext {
                value: Some(json!("other")),
                create_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::AlreadyExists(_)));

    // Partial update keeps the untouched field
    let entry = coord
        .set_context(
            &admin,
            "build/target",
            SetContext {
                value: Some(json!({"triple": "aarch64-apple-darwin"})),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(entry.updated_by, "admin");
    assert_eq!(entry.description.as_deref(), Some("active build target"));
    assert_eq!(entry.value["triple"], "aarch64-apple-darwin");

    coord.delete_context(&a.token, "build/target").await.unwrap();
    let err = coord.get_context(&a.token, "build/target").await.unwrap_err();
    assert!(matches!(err, CoordError::ContextNotFound(_)));

    // Deleting again is an error, not a silent no-op
    let err = coord.delete_context(&a.token, "build/target").await.unwrap_err();
    assert!(matches!(err, CoordError::ContextNotFound(_)));
}

#[tokio::test]
async fn test_list_context_ordering() {
    let (coord, _dir) = setup().await;
    let admin = coord.admin_token().to_string();

    for key in ["first", "second", "third"] {
        coord
            .set_context(
                &admin,
                key,
                SetContext {
                    value: Some(json!(key)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    // Touch "first" so it becomes the most recent
    coord
        .set_context(
            &admin,
            "first",
            SetContext {
                value: Some(json!("updated")),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let keys: Vec<String> = coord
        .list_context(&admin)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.context_key)
        .collect();
    assert_eq!(keys[0], "first");
    assert_eq!(keys.len(), 3);
}

#[tokio::test]
async fn test_audit_filters_and_order() {
    let (coord, _dir) = setup().await;
    let admin = coord.admin_token().to_string();
    let a = coord.create_agent(&admin, "a", vec![], None).await.unwrap();

    coord.claim_file(&a.token, "one.rs").await.unwrap();
    coord.claim_file(&a.token, "two.rs").await.unwrap();
    coord.release_file(&a.token, "one.rs").await.unwrap();
    coord
        .set_context(
            &a.token,
            "k",
            SetContext {
                value: Some(json!(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // create_agent + 2 claims + 1 release + 1 context write
    assert_eq!(coord.count_actions(&admin).await.unwrap(), 5);

    // Newest first
    let all = coord.query_actions(&admin, ActionFilter::default()).await.unwrap();
    assert_eq!(all[0].action_type, ActionType::UpdateContext);
    assert_eq!(
        all.last().map(|e| e.action_type.clone()),
        Some(ActionType::CreateAgent)
    );
    assert!(all.windows(2).all(|w| w[0].id > w[1].id));

    // By actor
    let by_agent = coord
        .query_actions(
            &admin,
            ActionFilter {
                agent_id: Some("a".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(by_agent.len(), 4);

    // By type, with a limit
    let claims_only = coord
        .query_actions(
            &admin,
            ActionFilter {
                action_type: Some(ActionType::ClaimFile),
                limit: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(claims_only.len(), 1);
    assert_eq!(claims_only[0].details["path"], "two.rs");
}

#[tokio::test]
async fn test_failed_mutations_leave_no_trace() {
    let (coord, _dir) = setup().await;
    let admin = coord.admin_token().to_string();
    let a = coord.create_agent(&admin, "a", vec![], None).await.unwrap();
    let b = coord.create_agent(&admin, "b", vec![], None).await.unwrap();
    coord.claim_file(&a.token, "held.rs").await.unwrap();

    let before = coord.count_actions(&admin).await.unwrap();

    let _ = coord.claim_file(&b.token, "held.rs").await.unwrap_err();
    let _ = coord.release_file(&b.token, "held.rs").await.unwrap_err();
    let _ = coord.get_context(&b.token, "missing").await.unwrap_err();
    let _ = coord.delete_context(&b.token, "missing").await.unwrap_err();

    assert_eq!(coord.count_actions(&admin).await.unwrap(), before);
}
