//! Integration tests for agent identity, tokens, and termination.

use roost_coord::{
    ActionFilter, ActionType, AgentStatus, CoordConfig, CoordError, Coordinator, CreateTask, Role,
    StatusReport, TaskStatus,
};
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
async fn test_create_agent_requires_admin() {
    let (coord, _dir) = setup().await;

    let err = coord
        .create_agent("not-the-admin-token", "worker-1", vec![], None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::Unauthorized));

    let admin = coord.admin_token().to_string();
    let agent = coord
        .create_agent(&admin, "worker-1", vec!["code".to_string()], None)
        .await
        .unwrap();
    assert_eq!(agent.agent_id, "worker-1");
    assert!(!agent.token.is_empty());
    assert_eq!(agent.status, AgentStatus::Created);

    // An agent token cannot mint agents
    let err = coord
        .create_agent(&agent.token, "worker-2", vec![], None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::Unauthorized));
}

#[tokio::test]
async fn test_agent_id_never_reused() {
    let (coord, _dir) = setup().await;
    let admin = coord.admin_token().to_string();

    coord
        .create_agent(&admin, "worker-1", vec![], None)
        .await
        .unwrap();
    let err = coord
        .create_agent(&admin, "worker-1", vec![], None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::AlreadyExists(_)));

    // Termination does not free the id
    coord.terminate_agent(&admin, "worker-1", false).await.unwrap();
    let err = coord
        .create_agent(&admin, "worker-1", vec![], None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_verify_token_roles() {
    let (coord, _dir) = setup().await;
    let admin = coord.admin_token().to_string();

    let agent = coord
        .create_agent(&admin, "worker-1", vec![], None)
        .await
        .unwrap();

    // Admin token satisfies both roles
    let identity = coord.verify_token(&admin, Role::Admin).await.unwrap();
    assert!(identity.is_admin());
    assert_eq!(identity.agent_id, "admin");
    assert!(coord.verify_token(&admin, Role::Agent).await.is_ok());

    // Agent token satisfies agent only
    let identity = coord.verify_token(&agent.token, Role::Agent).await.unwrap();
    assert_eq!(identity.agent_id, "worker-1");
    assert!(matches!(
        coord.verify_token(&agent.token, Role::Admin).await.unwrap_err(),
        CoordError::Unauthorized
    ));

    // Unknown tokens are uniformly rejected
    assert!(matches!(
        coord.verify_token("no-such-token", Role::Agent).await.unwrap_err(),
        CoordError::Unauthorized
    ));
}

#[tokio::test]
async fn test_termination_invalidates_token_and_releases_claims() {
    let (coord, _dir) = setup().await;
    let admin = coord.admin_token().to_string();

    let agent = coord
        .create_agent(&admin, "worker-1", vec![], None)
        .await
        .unwrap();
    coord.claim_file(&agent.token, "src/a.rs").await.unwrap();
    coord.claim_file(&agent.token, "src/b.rs").await.unwrap();

    let report = coord.terminate_agent(&admin, "worker-1", false).await.unwrap();
    assert_eq!(report.released_claims.len(), 2);

    // Token is permanently invalid
    assert!(matches!(
        coord.verify_token(&agent.token, Role::Agent).await.unwrap_err(),
        CoordError::Unauthorized
    ));

    // Claims are gone
    assert!(coord.list_claims(&admin).await.unwrap().is_empty());

    // Terminating again is recognizable, not corrupting
    assert!(matches!(
        coord.terminate_agent(&admin, "worker-1", false).await.unwrap_err(),
        CoordError::AgentNotFound(_)
    ));
}

#[tokio::test]
async fn test_termination_task_policy() {
    let (coord, _dir) = setup().await;
    let admin = coord.admin_token().to_string();

    // Default: the task keeps its assignment for post-mortem inspection
    let a1 = coord.create_agent(&admin, "a1", vec![], None).await.unwrap();
    let task = coord
        .create_task(
            &admin,
            CreateTask {
                title: "keep me".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    coord.assign_task(&a1.token, &task.task_id, "a1").await.unwrap();
    coord.terminate_agent(&admin, "a1", false).await.unwrap();

    let kept = coord.get_task(&admin, &task.task_id).await.unwrap();
    assert_eq!(kept.status, TaskStatus::InProgress);
    assert_eq!(kept.assigned_to.as_deref(), Some("a1"));

    // With reassignment: the task reverts to pending, unassigned
    let a2 = coord.create_agent(&admin, "a2", vec![], None).await.unwrap();
    let task2 = coord
        .create_task(
            &admin,
            CreateTask {
                title: "revert me".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    coord.assign_task(&a2.token, &task2.task_id, "a2").await.unwrap();
    let report = coord.terminate_agent(&admin, "a2", true).await.unwrap();
    assert_eq!(report.reassigned_tasks, vec![task2.task_id.clone()]);

    let reverted = coord.get_task(&admin, &task2.task_id).await.unwrap();
    assert_eq!(reverted.status, TaskStatus::Pending);
    assert!(reverted.assigned_to.is_none());
}

#[tokio::test]
async fn test_status_report_transitions() {
    let (coord, _dir) = setup().await;
    let admin = coord.admin_token().to_string();

    let agent = coord
        .create_agent(&admin, "worker-1", vec![], None)
        .await
        .unwrap();

    coord
        .report_agent_status(
            &agent.token,
            StatusReport {
                status: AgentStatus::Active,
                current_task: None,
            },
        )
        .await
        .unwrap();

    let loaded = coord.get_agent(&admin, "worker-1").await.unwrap();
    assert_eq!(loaded.status, AgentStatus::Active);
    assert!(loaded.token.is_empty(), "token must not leak through reads");

    // Agents cannot self-terminate
    let err = coord
        .report_agent_status(
            &agent.token,
            StatusReport {
                status: AgentStatus::Terminated,
                current_task: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_audit_completeness_for_identity_ops() {
    let (coord, _dir) = setup().await;
    let admin = coord.admin_token().to_string();

    coord.create_agent(&admin, "w1", vec![], None).await.unwrap();
    assert_eq!(coord.count_actions(&admin).await.unwrap(), 1);

    // Failed creation appends nothing
    let _ = coord.create_agent(&admin, "w1", vec![], None).await.unwrap_err();
    assert_eq!(coord.count_actions(&admin).await.unwrap(), 1);

    coord.terminate_agent(&admin, "w1", false).await.unwrap();
    assert_eq!(coord.count_actions(&admin).await.unwrap(), 2);

    let entries = coord
        .query_actions(
            &admin,
            ActionFilter {
                action_type: Some(ActionType::TerminateAgent),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].agent_id, "admin");
    assert_eq!(entries[0].details["agent_id"], "w1");
}
