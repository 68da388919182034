mod common;

use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set};

use futures::FutureExt;

use common::{Harness, LogOp};
use csvgate_server::database::entity::file_upload_log;
use csvgate_server::log_store::{LogStore, SessionState};

const NO_GRACE: &str = "[reclamation]\ngrace_period_secs = 0";

#[tokio::test]
async fn test_reclaims_finished_session() {
    let h = Harness::with_config(NO_GRACE).await;
    let token = h.create_session("a.csv", b"").await;
    h.upload_file(&token, "a.csv", &[b"id\n", b"1\n"]).await;

    let report = h.state.reclaimer.run_cycle().await;
    assert_eq!(report.deleted, vec![token.clone()]);
    assert!(report.already_absent.is_empty());
    assert!(report.failed.is_empty());
    assert!(report.query_failed.is_none());

    assert!(!h.session_dir(&token).exists());

    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert_eq!(record.state().unwrap(), SessionState::Cleaned);

    let stale = h.store.stale_sessions(Duration::ZERO).await.unwrap();
    assert!(stale.is_empty());

    let report = h.state.reclaimer.run_cycle().await;
    assert!(report.deleted.is_empty());
    assert!(report.already_absent.is_empty());
}

#[tokio::test]
async fn test_open_sessions_are_kept() {
    let h = Harness::with_config(NO_GRACE).await;
    let token = h.create_session("a.csv", b"id\n1\n").await;

    let report = h.state.reclaimer.run_cycle().await;
    assert!(report.deleted.is_empty());
    assert!(h.session_dir(&token).exists());

    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert_eq!(record.state().unwrap(), SessionState::Open);
}

#[tokio::test]
async fn test_already_absent_directory_is_marked() {
    let h = Harness::with_config(NO_GRACE).await;
    let token = h.create_session("a.csv", b"").await;
    h.upload_file(&token, "a.csv", &[b"id\n1\n"]).await;

    std::fs::remove_dir_all(h.session_dir(&token)).unwrap();

    let report = h.state.reclaimer.run_cycle().await;
    assert!(report.deleted.is_empty());
    assert_eq!(report.already_absent, vec![token.clone()]);

    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert!(record.cleanup_time.is_some());
}

#[tokio::test]
async fn test_failed_deletion_is_retried() {
    let h = Harness::with_config(NO_GRACE).await;
    let token = h.create_session("a.csv", b"").await;
    h.upload_file(&token, "a.csv", &[b"id\n1\n"]).await;

    // A regular file where the session directory should be cannot be
    // removed as a directory.
    let path = h.session_dir(&token);
    std::fs::remove_dir_all(&path).unwrap();
    std::fs::write(&path, b"in the way").unwrap();

    let report = h.state.reclaimer.run_cycle().await;
    assert!(report.deleted.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].session_token, token.as_str());

    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert!(record.cleanup_time.is_none());

    let stale = h.store.stale_sessions(Duration::ZERO).await.unwrap();
    assert_eq!(stale, vec![token.to_string()]);

    std::fs::remove_file(&path).unwrap();

    let report = h.state.reclaimer.run_cycle().await;
    assert!(report.failed.is_empty());
    assert_eq!(report.already_absent, vec![token.clone()]);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_cycle() {
    let h = Harness::with_config(NO_GRACE).await;

    let blocked = h.create_session("a.csv", b"").await;
    h.upload_file(&blocked, "a.csv", &[b"id\n1\n"]).await;
    let path = h.session_dir(&blocked);
    std::fs::remove_dir_all(&path).unwrap();
    std::fs::write(&path, b"in the way").unwrap();

    let fine = h.create_session("b.csv", b"").await;
    h.upload_file(&fine, "b.csv", &[b"id\n2\n"]).await;

    let report = h.state.reclaimer.run_cycle().await;
    assert_eq!(report.deleted, vec![fine.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert!(!h.session_dir(&fine).exists());
}

#[tokio::test]
async fn test_grace_period() {
    let h = Harness::with_config("[reclamation]\ngrace_period_secs = 3600").await;
    let token = h.create_session("a.csv", b"").await;
    h.upload_file(&token, "a.csv", &[b"id\n1\n"]).await;

    let report = h.state.reclaimer.run_cycle().await;
    assert!(report.deleted.is_empty());
    assert!(h.session_dir(&token).exists());

    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert!(record.cleanup_time.is_none());
}

#[tokio::test]
async fn test_invalid_token_in_log() {
    let h = Harness::with_config(NO_GRACE).await;

    // Planted next to the upload root, where "../victim" would resolve.
    let victim = h.dir.path().join("victim");
    std::fs::create_dir(&victim).unwrap();

    file_upload_log::ActiveModel {
        session_token: Set("../victim".to_string()),
        start_time: Set(Utc::now()),
        end_time: Set(Some(Utc::now())),
        cleanup_time: Set(None),
        table_names: Set("[]".to_string()),
        file_names: Set("[]".to_string()),
    }
    .insert(h.store.connection())
    .await
    .unwrap();

    let report = h.state.reclaimer.run_cycle().await;
    assert!(report.deleted.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].session_token, "../victim");

    assert!(victim.exists());
}

#[tokio::test]
async fn test_failed_query_touches_nothing() {
    let h = Harness::with_config(NO_GRACE).await;
    let token = h.create_session("a.csv", b"").await;
    h.upload_file(&token, "a.csv", &[b"id\n", b"1\n"]).await;

    h.log.fail_once(LogOp::StaleSessions);
    let report = h.state.reclaimer.run_cycle().await;
    assert!(report.query_failed.is_some());
    assert!(report.deleted.is_empty());
    assert!(report.failed.is_empty());

    assert!(h.session_dir(&token).exists());
    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert_eq!(record.state().unwrap(), SessionState::Finalized);

    let report = h.state.reclaimer.run_cycle().await;
    assert!(report.query_failed.is_none());
    assert_eq!(report.deleted, vec![token.clone()]);
    assert!(!h.session_dir(&token).exists());
}

#[tokio::test]
async fn test_cycle_survives_dropped_caller() {
    let h = Harness::with_config(NO_GRACE).await;
    let token = h.create_session("a.csv", b"").await;
    h.upload_file(&token, "a.csv", &[b"id\n", b"1\n"]).await;

    let pending = h.state.reclaimer.clone().spawn_cycle();
    assert!(pending.now_or_never().is_none());

    let mut cleaned = false;
    for _ in 0..500 {
        let record = h.store.find_session(&token).await.unwrap().unwrap();
        if record.state().unwrap() == SessionState::Cleaned {
            cleaned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleaned, "reclamation did not complete");
    assert!(!h.session_dir(&token).exists());
}
