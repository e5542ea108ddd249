//! Integration tests for the database layer
//!
//! Tests the full database functionality including:
//! - Schema initialization
//! - Agent and task persistence round trips
//! - Dependency edges and eligibility queries
//! - Claim and context tables
//! - Transactional audit append

use chrono::Utc;
use roost_core::{
    ActionLogEntry, ActionType, Agent, AgentStatus, ContextEntry, FileClaim, Task, TaskPriority,
    TaskStatus,
};
use roost_storage::{ActionFilter, Database, TaskFilter};
use tempfile::TempDir;

/// Helper to create a temporary database for testing
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("roost.db");

    let db = Database::open(&db_path).await.expect("Failed to open database");
    db.init_schema().await.expect("Failed to init schema");

    (db, temp_dir)
}

/// Helper to create a test agent
fn make_agent(id: &str, token: &str) -> Agent {
    Agent {
        agent_id: id.to_string(),
        token: token.to_string(),
        status: AgentStatus::Created,
        capabilities: vec!["code".to_string()],
        color: Some("#00aa88".to_string()),
        created_at: Utc::now(),
        current_task: None,
    }
}

/// Helper to create a test task
fn make_task(id: &str, status: TaskStatus, priority: TaskPriority) -> Task {
    Task {
        task_id: id.to_string(),
        title: format!("Task {}", id),
        description: Some(format!("Description for {}", id)),
        status,
        priority,
        assigned_to: None,
        depends_on_tasks: vec![],
        parent_task: None,
        notes: vec![],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn make_action(agent_id: &str, action_type: ActionType, task_id: Option<&str>) -> ActionLogEntry {
    ActionLogEntry {
        id: 0,
        timestamp: Utc::now(),
        agent_id: agent_id.to_string(),
        action_type,
        task_id: task_id.map(|s| s.to_string()),
        details: serde_json::json!({"test": true}),
    }
}

#[tokio::test]
async fn test_agent_round_trip() {
    let (mut db, _dir) = create_test_db().await;

    let agent = make_agent("agent-1", "tok-1");
    let tx = db.begin().await.expect("Failed to begin tx");
    tx.insert_agent(&agent).await.expect("Failed to insert agent");
    tx.commit().await.expect("Failed to commit");

    let by_id = db.get_agent("agent-1").await.unwrap().expect("agent missing");
    assert_eq!(by_id.agent_id, "agent-1");
    assert_eq!(by_id.token, "tok-1");
    assert_eq!(by_id.status, AgentStatus::Created);
    assert_eq!(by_id.capabilities, vec!["code".to_string()]);

    let by_token = db.get_agent_by_token("tok-1").await.unwrap();
    assert!(by_token.is_some());
    assert!(db.get_agent_by_token("unknown").await.unwrap().is_none());

    // Listings never expose tokens
    let listed = db.list_agents().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].token.is_empty());
}

#[tokio::test]
async fn test_task_round_trip_with_deps() {
    let (mut db, _dir) = create_test_db().await;

    let t1 = make_task("t1", TaskStatus::Completed, TaskPriority::Normal);
    let mut t2 = make_task("t2", TaskStatus::Pending, TaskPriority::High);
    t2.depends_on_tasks = vec!["t1".to_string()];

    let tx = db.begin().await.unwrap();
    tx.insert_task(&t1).await.unwrap();
    tx.insert_task(&t2).await.unwrap();
    tx.commit().await.unwrap();

    let loaded = db.get_task("t2").await.unwrap().expect("task missing");
    assert_eq!(loaded.depends_on_tasks, vec!["t1".to_string()]);
    assert_eq!(loaded.priority, TaskPriority::High);

    let filtered = db
        .list_tasks(TaskFilter {
            status: Some(TaskStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].task_id, "t2");
    assert_eq!(filtered[0].depends_on_tasks, vec!["t1".to_string()]);
}

#[tokio::test]
async fn test_eligible_ordering_priority_then_age() {
    let (mut db, _dir) = create_test_db().await;

    // Insert in an order that differs from the expected output
    let mut low = make_task("low", TaskStatus::Pending, TaskPriority::Low);
    let mut critical = make_task("critical", TaskStatus::Pending, TaskPriority::Critical);
    let mut normal_old = make_task("normal-old", TaskStatus::Pending, TaskPriority::Normal);
    let mut normal_new = make_task("normal-new", TaskStatus::Pending, TaskPriority::Normal);

    let base = Utc::now();
    low.created_at = base;
    critical.created_at = base + chrono::Duration::seconds(1);
    normal_old.created_at = base + chrono::Duration::seconds(2);
    normal_new.created_at = base + chrono::Duration::seconds(3);

    let tx = db.begin().await.unwrap();
    tx.insert_task(&low).await.unwrap();
    tx.insert_task(&critical).await.unwrap();
    tx.insert_task(&normal_old).await.unwrap();
    tx.insert_task(&normal_new).await.unwrap();
    tx.commit().await.unwrap();

    let eligible = db.list_eligible_tasks().await.unwrap();
    let ids: Vec<&str> = eligible.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, vec!["critical", "normal-old", "normal-new", "low"]);
}

#[tokio::test]
async fn test_eligibility_respects_dependencies_and_parent() {
    let (mut db, _dir) = create_test_db().await;

    let blocker = make_task("blocker", TaskStatus::Pending, TaskPriority::Normal);
    let mut blocked = make_task("blocked", TaskStatus::Pending, TaskPriority::Critical);
    blocked.depends_on_tasks = vec!["blocker".to_string()];

    let parent = make_task("parent", TaskStatus::Pending, TaskPriority::Normal);
    let mut child = make_task("child", TaskStatus::Pending, TaskPriority::Normal);
    child.parent_task = Some("parent".to_string());

    let tx = db.begin().await.unwrap();
    tx.insert_task(&blocker).await.unwrap();
    tx.insert_task(&blocked).await.unwrap();
    tx.insert_task(&parent).await.unwrap();
    tx.insert_task(&child).await.unwrap();
    tx.commit().await.unwrap();

    let eligible = db.list_eligible_tasks().await.unwrap();
    let ids: Vec<&str> = eligible.iter().map(|t| t.task_id.as_str()).collect();
    // blocked waits on blocker; child waits on its pending parent
    assert_eq!(ids, vec!["blocker", "parent"]);

    // Complete the blocker, start the parent: both dependents become eligible
    let tx = db.begin().await.unwrap();
    let mut blocker = tx.get_task("blocker").await.unwrap().unwrap();
    blocker.status = TaskStatus::Completed;
    tx.update_task(&blocker).await.unwrap();
    let mut parent = tx.get_task("parent").await.unwrap().unwrap();
    parent.status = TaskStatus::InProgress;
    tx.update_task(&parent).await.unwrap();
    tx.commit().await.unwrap();

    let eligible = db.list_eligible_tasks().await.unwrap();
    let ids: Vec<&str> = eligible.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, vec!["blocked", "child"]);
}

#[tokio::test]
async fn test_claims_table() {
    let (mut db, _dir) = create_test_db().await;

    let claim = FileClaim {
        path: "src/app.py".to_string(),
        holder: "agent-1".to_string(),
        claimed_at: Utc::now(),
    };

    let tx = db.begin().await.unwrap();
    tx.insert_claim(&claim).await.unwrap();
    tx.commit().await.unwrap();

    let claims = db.list_claims().await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].holder, "agent-1");

    // Release all claims for the holder
    let tx = db.begin().await.unwrap();
    let released = tx.release_claims_for("agent-1").await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(released, vec!["src/app.py".to_string()]);
    assert!(db.list_claims().await.unwrap().is_empty());

    // Deleting an unclaimed path is a no-op
    let tx = db.begin().await.unwrap();
    tx.delete_claim("src/app.py").await.unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_context_upsert_and_delete() {
    let (mut db, _dir) = create_test_db().await;

    let entry = ContextEntry {
        context_key: "build.target".to_string(),
        value: serde_json::json!({"os": "linux"}),
        description: Some("build target".to_string()),
        updated_by: "admin".to_string(),
        last_updated: Utc::now(),
    };

    let tx = db.begin().await.unwrap();
    tx.upsert_context(&entry).await.unwrap();
    tx.commit().await.unwrap();

    let loaded = db.get_context("build.target").await.unwrap().unwrap();
    assert_eq!(loaded.value, serde_json::json!({"os": "linux"}));

    // Upsert overwrites value and stamps updated_by
    let mut updated = entry.clone();
    updated.value = serde_json::json!({"os": "macos"});
    updated.updated_by = "agent-1".to_string();
    let tx = db.begin().await.unwrap();
    tx.upsert_context(&updated).await.unwrap();
    tx.commit().await.unwrap();

    let loaded = db.get_context("build.target").await.unwrap().unwrap();
    assert_eq!(loaded.value, serde_json::json!({"os": "macos"}));
    assert_eq!(loaded.updated_by, "agent-1");

    let tx = db.begin().await.unwrap();
    tx.delete_context("build.target").await.unwrap();
    tx.commit().await.unwrap();
    assert!(db.get_context("build.target").await.unwrap().is_none());
}

#[tokio::test]
async fn test_action_log_append_and_query() {
    let (mut db, _dir) = create_test_db().await;

    let tx = db.begin().await.unwrap();
    tx.append_action(&make_action("admin", ActionType::CreateTask, Some("t1")))
        .await
        .unwrap();
    tx.append_action(&make_action("agent-1", ActionType::ClaimFile, None))
        .await
        .unwrap();
    tx.append_action(&make_action("agent-1", ActionType::UpdateTaskStatus, Some("t1")))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(db.count_actions().await.unwrap(), 3);

    // Filter by actor
    let by_agent = db
        .query_actions(ActionFilter {
            agent_id: Some("agent-1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_agent.len(), 2);

    // Filter by type
    let claims = db
        .query_actions(ActionFilter {
            action_type: Some(ActionType::ClaimFile),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].agent_id, "agent-1");

    // Newest first, insertion order breaks timestamp ties
    let all = db.query_actions(ActionFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all[0].id > all[1].id);
    assert!(all[1].id > all[2].id);

    // Limit
    let limited = db
        .query_actions(ActionFilter {
            limit: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_txn_commits_after_single_row_reads() {
    let (mut db, _dir) = create_test_db().await;

    let tx = db.begin().await.unwrap();
    tx.insert_agent(&make_agent("agent-1", "tok-1")).await.unwrap();
    tx.commit().await.unwrap();

    // Lookups that return rows must not end the transaction under them;
    // the write and commit that follow have to land.
    let tx = db.begin().await.unwrap();
    let agent = tx.get_agent_by_token("tok-1").await.unwrap().unwrap();
    assert_eq!(agent.agent_id, "agent-1");
    assert!(tx.get_agent("agent-1").await.unwrap().is_some());
    assert!(tx.get_task("nope").await.unwrap().is_none());
    assert!(tx.get_claim("src/app.py").await.unwrap().is_none());
    assert!(tx.get_context("k").await.unwrap().is_none());

    tx.insert_claim(&FileClaim {
        path: "src/app.py".to_string(),
        holder: "agent-1".to_string(),
        claimed_at: Utc::now(),
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let claims = db.list_claims().await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].holder, "agent-1");
}

#[tokio::test]
async fn test_txn_rollback_frees_the_connection() {
    let (mut db, _dir) = create_test_db().await;

    let tx = db.begin().await.unwrap();
    tx.insert_agent(&make_agent("ghost", "tok-ghost")).await.unwrap();
    assert!(tx.get_agent("ghost").await.unwrap().is_some());
    tx.rollback().await.unwrap();

    assert!(db.get_agent("ghost").await.unwrap().is_none());

    // The next transaction on the same connection starts clean
    let tx = db.begin().await.unwrap();
    tx.insert_agent(&make_agent("real", "tok-real")).await.unwrap();
    tx.commit().await.unwrap();
    assert!(db.get_agent("real").await.unwrap().is_some());
}

#[tokio::test]
async fn test_uncommitted_transaction_rolls_back() {
    let (mut db, _dir) = create_test_db().await;

    {
        let tx = db.begin().await.unwrap();
        tx.insert_agent(&make_agent("ghost", "tok-ghost")).await.unwrap();
        tx.append_action(&make_action("admin", ActionType::CreateAgent, None))
            .await
            .unwrap();
        // dropped without commit
    }

    assert!(db.get_agent("ghost").await.unwrap().is_none());
    assert_eq!(db.count_actions().await.unwrap(), 0);
}
