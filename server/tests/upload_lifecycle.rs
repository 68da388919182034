mod common;

use std::time::Duration;

use futures::FutureExt;

use common::{file_name, list_dir, Harness, LogOp};
use csvgate::session::SessionToken;
use csvgate_server::error::ErrorKind;
use csvgate_server::log_store::{LogStore, SessionState};

const CHUNK_1: &[u8] = b"id,name,city\n1,alice,paris\n";
const CHUNK_2: &[u8] = b"2,bob,berlin\n3,carol,rome\n";
const CHUNK_3: &[u8] = b"4,dave,oslo\n";

fn concatenated() -> Vec<u8> {
    [CHUNK_1, CHUNK_2, CHUNK_3].concat()
}

#[tokio::test]
async fn test_out_of_order_upload() {
    let h = Harness::new().await;
    let sessions = &h.state.sessions;
    let report = file_name("report.csv");

    let token = h.create_session("report.csv", b"").await;
    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert_eq!(record.state().unwrap(), SessionState::Open);

    for (index, chunk) in [(2, CHUNK_2), (1, CHUNK_1), (3, CHUNK_3)] {
        let bytes = sessions
            .write_chunk(&token, &report, index, 3, chunk)
            .await
            .unwrap();
        assert_eq!(bytes, chunk.len() as u64);
    }

    let size = sessions.finalize_session(&token, &report, 3).await.unwrap();
    assert_eq!(size, concatenated().len() as u64);

    let merged = std::fs::read(h.session_dir(&token).join("report.csv")).unwrap();
    assert_eq!(merged, concatenated());

    let chunk_dir = h.state.directories.chunk_dir(&token);
    assert!(list_dir(&chunk_dir).is_empty());

    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert!(record.end_time.is_some());
    assert!(record.cleanup_time.is_none());
    assert_eq!(record.state().unwrap(), SessionState::Finalized);
}

#[tokio::test]
async fn test_initial_file_is_stored() {
    let h = Harness::new().await;

    let token = h.create_session("small.csv", b"id\n1\n").await;

    let stored = std::fs::read(h.session_dir(&token).join("small.csv")).unwrap();
    assert_eq!(stored, b"id\n1\n");
    assert!(h.state.directories.chunk_dir(&token).is_dir());
}

#[tokio::test]
async fn test_missing_chunk_fails_before_merging() {
    let h = Harness::new().await;
    let sessions = &h.state.sessions;
    let report = file_name("report.csv");
    let token = h.create_session("report.csv", b"").await;

    for index in [1, 2, 4] {
        sessions
            .write_chunk(&token, &report, index, 4, CHUNK_1)
            .await
            .unwrap();
    }

    let err = sessions
        .finalize_session(&token, &report, 4)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::MissingChunkError(3)));

    // Nothing was consumed
    let chunks = list_dir(&h.state.directories.chunk_dir(&token));
    assert_eq!(
        chunks,
        vec!["report.csv.part1", "report.csv.part2", "report.csv.part4"]
    );

    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert!(record.end_time.is_none());
}

#[tokio::test]
async fn test_partial_output_is_kept_on_failure() {
    let h = Harness::new().await;
    let sessions = &h.state.sessions;
    let report = file_name("report.csv");
    let token = h.create_session("report.csv", b"").await;

    sessions
        .write_chunk(&token, &report, 1, 3, CHUNK_1)
        .await
        .unwrap();
    sessions
        .write_chunk(&token, &report, 3, 3, CHUNK_3)
        .await
        .unwrap();

    // Present but unreadable
    let part2 = h.state.directories.chunk_path(&token, &report, 2);
    std::fs::create_dir(&part2).unwrap();

    let err = sessions
        .finalize_session(&token, &report, 3)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::StorageError(_)));

    let partial = std::fs::read(h.session_dir(&token).join("report.csv")).unwrap();
    assert_eq!(partial, CHUNK_1);

    let chunks = list_dir(&h.state.directories.chunk_dir(&token));
    assert_eq!(chunks, vec!["report.csv.part2", "report.csv.part3"]);
}

#[tokio::test]
async fn test_concurrent_finalize() {
    let h = Harness::new().await;
    let sessions = &h.state.sessions;
    let report = file_name("report.csv");
    let token = h.create_session("report.csv", b"").await;

    for (index, chunk) in [(1, CHUNK_1), (2, CHUNK_2), (3, CHUNK_3)] {
        sessions
            .write_chunk(&token, &report, index, 3, chunk)
            .await
            .unwrap();
    }

    // The second finalize waits for the first and finds the file merged
    let (a, b) = tokio::join!(
        sessions.finalize_session(&token, &report, 3),
        sessions.finalize_session(&token, &report, 3),
    );

    assert_eq!(a.unwrap(), concatenated().len() as u64);
    assert_eq!(b.unwrap(), concatenated().len() as u64);

    let merged = std::fs::read(h.session_dir(&token).join("report.csv")).unwrap();
    assert_eq!(merged, concatenated());
}

#[tokio::test]
async fn test_refinalize_keeps_output() {
    let h = Harness::new().await;
    let token = h.create_session("report.csv", b"").await;

    h.upload_file(&token, "report.csv", &[CHUNK_1, CHUNK_2]).await;

    let size = h
        .state
        .sessions
        .finalize_session(&token, &file_name("report.csv"), 2)
        .await
        .unwrap();
    assert_eq!(size, [CHUNK_1, CHUNK_2].concat().len() as u64);

    let merged = std::fs::read(h.session_dir(&token).join("report.csv")).unwrap();
    assert_eq!(merged, [CHUNK_1, CHUNK_2].concat());
}

#[tokio::test]
async fn test_finalize_retry_after_log_failure() {
    let h = Harness::new().await;
    let sessions = &h.state.sessions;
    let report = file_name("report.csv");
    let token = h.create_session("report.csv", b"").await;

    for (index, chunk) in [(1, CHUNK_1), (2, CHUNK_2), (3, CHUNK_3)] {
        sessions
            .write_chunk(&token, &report, index, 3, chunk)
            .await
            .unwrap();
    }

    h.log.fail_once(LogOp::SessionEnd);
    let err = sessions
        .finalize_session(&token, &report, 3)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::LogStoreError(_)));

    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert_eq!(record.state().unwrap(), SessionState::Open);
    assert!(list_dir(&h.state.directories.chunk_dir(&token)).is_empty());

    let size = sessions.finalize_session(&token, &report, 3).await.unwrap();
    assert_eq!(size, concatenated().len() as u64);

    let record = h.store.find_session(&token).await.unwrap().unwrap();
    assert_eq!(record.state().unwrap(), SessionState::Finalized);

    let merged = std::fs::read(h.session_dir(&token).join("report.csv")).unwrap();
    assert_eq!(merged, concatenated());
}

#[tokio::test]
async fn test_finalize_survives_dropped_caller() {
    let h = Harness::new().await;
    let sessions = &h.state.sessions;
    let report = file_name("big.csv");
    let token = h.create_session("big.csv", b"").await;

    let chunk = vec![b'x'; 256 * 1024];
    let total = 32;
    for index in 1..=total {
        sessions
            .write_chunk(&token, &report, index, total, &chunk[..])
            .await
            .unwrap();
    }

    // Polled once, then dropped like a request whose client disconnected
    let pending = sessions.finalize_session(&token, &report, total);
    assert!(pending.now_or_never().is_none());

    let mut finished = false;
    for _ in 0..500 {
        let record = h.store.find_session(&token).await.unwrap().unwrap();
        if record.end_time.is_some() {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(finished, "finalize did not complete");

    let merged = std::fs::metadata(h.session_dir(&token).join("big.csv")).unwrap();
    assert_eq!(merged.len(), chunk.len() as u64 * total as u64);
    assert!(list_dir(&h.state.directories.chunk_dir(&token)).is_empty());
}

#[tokio::test]
async fn test_create_session_log_failure_keeps_directory() {
    let h = Harness::new().await;

    h.log.fail_once(LogOp::SessionStart);
    let err = h
        .state
        .sessions
        .create_session(&file_name("report.csv"), CHUNK_1)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::LogStoreError(_)));

    let sessions = list_dir(&h.upload_root());
    assert_eq!(sessions.len(), 1);

    let session_dir = h.upload_root().join(&sessions[0]);
    assert_eq!(list_dir(&session_dir), vec!["chunks", "report.csv"]);
    assert_eq!(std::fs::read(session_dir.join("report.csv")).unwrap(), CHUNK_1);
}

#[tokio::test]
async fn test_chunk_overwrite() {
    let h = Harness::new().await;
    let sessions = &h.state.sessions;
    let report = file_name("report.csv");
    let token = h.create_session("report.csv", b"").await;

    sessions
        .write_chunk(&token, &report, 1, 1, &b"first"[..])
        .await
        .unwrap();
    sessions
        .write_chunk(&token, &report, 1, 1, &b"second"[..])
        .await
        .unwrap();

    sessions.finalize_session(&token, &report, 1).await.unwrap();

    let merged = std::fs::read(h.session_dir(&token).join("report.csv")).unwrap();
    assert_eq!(merged, b"second");
}

#[tokio::test]
async fn test_unknown_session() {
    let h = Harness::new().await;
    let sessions = &h.state.sessions;
    let report = file_name("report.csv");
    let token = SessionToken::generate();

    let err = sessions
        .write_chunk(&token, &report, 1, 1, CHUNK_1)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NoSuchSession));

    let err = sessions
        .finalize_session(&token, &report, 1)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NoSuchSession));

    assert!(!h.session_dir(&token).exists());
}

#[tokio::test]
async fn test_chunk_index_validation() {
    let h = Harness::new().await;
    let sessions = &h.state.sessions;
    let report = file_name("report.csv");
    let token = h.create_session("report.csv", b"").await;

    for (index, total) in [(0, 3), (4, 3), (1, 0)] {
        let err = sessions
            .write_chunk(&token, &report, index, total, CHUNK_1)
            .await
            .unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::RequestError(_)),
            "index {} of {} was accepted",
            index,
            total
        );
    }

    let err = sessions
        .finalize_session(&token, &report, 0)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::RequestError(_)));

    assert!(list_dir(&h.state.directories.chunk_dir(&token)).is_empty());
}

#[tokio::test]
async fn test_oversized_chunk() {
    let h = Harness::with_config("[chunked_upload]\nmax_chunk_size = 8").await;
    let sessions = &h.state.sessions;
    let report = file_name("report.csv");
    let token = h.create_session("report.csv", b"").await;

    sessions
        .write_chunk(&token, &report, 1, 2, &b"12345678"[..])
        .await
        .unwrap();

    let err = sessions
        .write_chunk(&token, &report, 2, 2, &b"123456789"[..])
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::RequestError(_)));

    let chunks = list_dir(&h.state.directories.chunk_dir(&token));
    assert_eq!(chunks, vec!["report.csv.part1"]);
}

#[tokio::test]
async fn test_reserved_file_name() {
    let h = Harness::new().await;

    let err = h
        .state
        .sessions
        .create_session(&file_name("chunks"), &b""[..])
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::RequestError(_)));
}
