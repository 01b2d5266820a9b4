//! End-to-end pool lifecycle scenarios against the scripted tool runner.

mod common;

use cloudpool_mgmt::{CreatePoolRequest, MgmtError, PoolStatus, RefreshSummary};
use cloudpool_rclone::{ProviderType, RcloneError, ToolOutput};
use common::TestEnv;
use std::time::Duration;

fn request(name: &str, ids: &[&str]) -> CreatePoolRequest {
    CreatePoolRequest {
        name: name.to_string(),
        account_ids: ids.iter().map(|s| s.to_string()).collect(),
        ..CreatePoolRequest::default()
    }
}

#[tokio::test]
async fn test_eplus_pool_full_lifecycle() {
    let env = TestEnv::new();
    env.add_account("a", ProviderType::Google);
    env.add_account("b", ProviderType::Microsoft);

    let mut req = request("media", &["a", "b"]);
    req.strategy = "eplus".to_string();
    let pool = env.lifecycle.create(req).unwrap();
    let members = env.store.memberships(&pool.id).unwrap();
    assert_eq!(
        members.iter().map(|m| m.priority).collect::<Vec<_>>(),
        vec![0, 1]
    );

    let running = env.lifecycle.start(&pool.id).await.unwrap();
    assert_eq!(running.status, PoolStatus::Running);
    let expected_path = env.dir.path().join(&pool.id).display().to_string();
    assert_eq!(running.mount_path.as_deref(), Some(expected_path.as_str()));
    assert_eq!(
        env.runner.count_matching(&format!(
            "config create union_{} union upstreams=google_a: microsoft_b: \
             action_policy=epall create_policy=eplus search_policy=ff",
            pool.id
        )),
        1
    );
    assert_eq!(env.runner.count_matching("chunker"), 0);
    env.assert_mount_path_invariant();

    let stopped = env.lifecycle.stop(&pool.id).await.unwrap();
    assert_eq!(stopped.status, PoolStatus::Stopped);
    assert!(stopped.mount_path.is_none());
    assert_eq!(env.runner.count_matching(&format!("fusermount -u {}", expected_path)), 1);
    assert_eq!(
        env.runner
            .count_matching(&format!("config delete union_{}", pool.id)),
        1
    );
    env.assert_mount_path_invariant();

    env.lifecycle.delete(&pool.id).await.unwrap();
    assert!(matches!(
        env.lifecycle.get(&pool.id).unwrap_err(),
        MgmtError::NotFound { .. }
    ));
    assert!(env.store.memberships(&pool.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_zero_member_start_leaves_status_unchanged() {
    let env = TestEnv::new();
    let pool = env.lifecycle.create(request("empty", &[])).unwrap();

    let err = env.lifecycle.start(&pool.id).await.unwrap_err();
    assert!(matches!(
        err,
        MgmtError::Rclone(RcloneError::Composition { .. })
    ));
    assert_eq!(env.pool(&pool.id).status, PoolStatus::Stopped);
    assert!(env.runner.invocations().is_empty());
    env.assert_mount_path_invariant();
}

#[tokio::test]
async fn test_stop_when_not_running_is_rejected() {
    let env = TestEnv::new();
    env.add_account("a", ProviderType::Google);
    let pool = env.lifecycle.create(request("p", &["a"])).unwrap();

    let err = env.lifecycle.stop(&pool.id).await.unwrap_err();
    assert!(matches!(err, MgmtError::NotRunning(_)));
    assert_eq!(env.pool(&pool.id).status, PoolStatus::Stopped);
    assert!(env.runner.invocations().is_empty());
}

#[tokio::test]
async fn test_delete_running_pool_with_failed_unmount_keeps_pool() {
    let env = TestEnv::new();
    env.add_account("a", ProviderType::Google);
    let pool = env.lifecycle.create(request("p", &["a"])).unwrap();
    env.lifecycle.start(&pool.id).await.unwrap();

    env.runner.fail_on("fusermount", "", "Device or resource busy");
    env.runner.fail_on("umount", "", "target is busy");

    let err = env.lifecycle.delete(&pool.id).await.unwrap_err();
    assert!(matches!(err, MgmtError::Rclone(RcloneError::Unmount { .. })));

    let kept = env.pool(&pool.id);
    assert_eq!(kept.status, PoolStatus::Running);
    assert!(kept.mount_path.is_some());
    assert_eq!(kept.accounts.len(), 1);
    // The union definition is removed even though the volume stayed mounted.
    assert_eq!(
        env.runner
            .count_matching(&format!("config delete union_{}", pool.id)),
        1
    );
    env.assert_mount_path_invariant();
}

#[tokio::test]
async fn test_concurrent_start_mounts_once() {
    let env = TestEnv::new();
    env.add_account("a", ProviderType::Google);
    let pool = env.lifecycle.create(request("p", &["a"])).unwrap();
    env.runner.set_delay(Duration::from_millis(10));

    let (first, second) = tokio::join!(
        env.lifecycle.start(&pool.id),
        env.lifecycle.start(&pool.id)
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(MgmtError::AlreadyRunning(_)))));
    assert_eq!(env.runner.count_matching("rclone mount"), 1);
    assert_eq!(
        env.runner
            .count_matching(&format!("config create union_{}", pool.id)),
        1
    );
    assert_eq!(env.pool(&pool.id).status, PoolStatus::Running);
}

#[tokio::test]
async fn test_mount_timeout_marks_pool_error() {
    let env = TestEnv::new();
    env.add_account("a", ProviderType::Google);
    let pool = env.lifecycle.create(request("p", &["a"])).unwrap();
    env.runner.set_mounts_appear(false);

    let err = env.lifecycle.start(&pool.id).await.unwrap_err();
    assert!(matches!(
        err,
        MgmtError::Rclone(RcloneError::MountTimeout { .. })
    ));

    let failed = env.pool(&pool.id);
    assert_eq!(failed.status, PoolStatus::Error);
    assert!(failed.mount_path.is_none());
    assert_eq!(
        env.runner
            .count_matching(&format!("config delete union_{}", pool.id)),
        1
    );
    env.assert_mount_path_invariant();

    env.runner.set_mounts_appear(true);
    let retried = env.lifecycle.start(&pool.id).await.unwrap();
    assert_eq!(retried.status, PoolStatus::Running);
}

#[tokio::test]
async fn test_chunk_failure_removes_created_adapters() {
    let env = TestEnv::new();
    for id in ["a", "b", "c"] {
        env.add_account(id, ProviderType::Google);
    }
    let mut req = request("chunked", &["a", "b", "c"]);
    req.enable_chunker = true;
    let pool = env.lifecycle.create(req).unwrap();

    env.runner.respond(
        "rclone",
        &format!("chunk_{}_c chunker", pool.id),
        ToolOutput::failure(1, "invalid chunk_size"),
    );

    let err = env.lifecycle.start(&pool.id).await.unwrap_err();
    assert!(matches!(
        err,
        MgmtError::Rclone(RcloneError::Composition { .. })
    ));
    assert_eq!(env.pool(&pool.id).status, PoolStatus::Error);

    for id in ["a", "b"] {
        assert_eq!(
            env.runner
                .count_matching(&format!("config delete chunk_{}_{}", pool.id, id)),
            1
        );
    }
    assert_eq!(env.runner.count_matching("union upstreams="), 0);
    assert_eq!(env.runner.count_matching("rclone mount"), 0);
}

#[tokio::test]
async fn test_stop_removes_adapter_of_member_removed_while_running() {
    let env = TestEnv::new();
    env.add_account("a", ProviderType::Google);
    env.add_account("b", ProviderType::Microsoft);
    let mut req = request("chunked", &["a", "b"]);
    req.enable_chunker = true;
    let pool = env.lifecycle.create(req).unwrap();

    env.lifecycle.start(&pool.id).await.unwrap();
    let chunk_b = format!("chunk_{}_b", pool.id);
    assert_eq!(
        env.runner
            .count_matching(&format!("config create {} chunker", chunk_b)),
        1
    );

    env.lifecycle.remove_member(&pool.id, "b").await.unwrap();
    env.lifecycle.stop(&pool.id).await.unwrap();

    assert_eq!(
        env.runner
            .count_matching(&format!("config delete {}", chunk_b)),
        1
    );
    let prefix = format!("chunk_{}_", pool.id);
    assert!(env
        .runner
        .configured_remotes()
        .iter()
        .all(|name| !name.starts_with(&prefix)));
    env.assert_mount_path_invariant();
}

#[tokio::test]
async fn test_member_priorities_append_after_removal() {
    let env = TestEnv::new();
    for id in ["a", "b", "c", "d"] {
        env.add_account(id, ProviderType::Google);
    }
    let pool = env.lifecycle.create(request("p", &["a", "b", "c"])).unwrap();

    env.lifecycle.remove_member(&pool.id, "b").await.unwrap();
    let added = env.lifecycle.add_member(&pool.id, "d").await.unwrap();
    assert_eq!(added.priority, 3);

    let order: Vec<String> = env
        .pool(&pool.id)
        .accounts
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(order, vec!["a", "c", "d"]);

    env.lifecycle.start(&pool.id).await.unwrap();
    assert_eq!(
        env.runner
            .count_matching("upstreams=google_a: google_c: google_d:"),
        1
    );
}

#[tokio::test]
async fn test_refresh_all_skips_and_continues() {
    let env = TestEnv::new();
    for id in ["a", "b", "c"] {
        env.add_account(id, ProviderType::Google);
    }
    env.runner.set_quota("google_a", 1_000, 100);
    env.runner
        .fail_on("rclone", "about google_b:", "googleapi: Error 401");
    env.runner.set_quota("google_c", 3_000, 2_000);

    let summary = env.quotas.refresh_all().await.unwrap();
    assert_eq!(
        summary,
        RefreshSummary {
            attempted: 3,
            refreshed: 2,
            skipped: 1
        }
    );

    let totals = env.quotas.summary().unwrap();
    assert_eq!(totals.total, 4_000);
    assert_eq!(totals.used, 2_100);
    assert!((0.0..=100.0).contains(&totals.usage_percent));
}
