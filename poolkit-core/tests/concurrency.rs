//! Concurrency tests.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use poolkit_core::notes::Cursor;
use poolkit_core::storage::{DepositIndexStorage, NoteStorage, StorageError};

const PK: &str = "0x04ab";
const POOL: &str = "0xpool";

/// Losing a race to a higher index is expected; anything else is a failure.
fn tolerate_regression(result: Result<(), StorageError>) {
    match result {
        Ok(()) | Err(StorageError::IndexRegression { .. }) => {}
        Err(err) => panic!("unexpected commit error {err}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_never_share_an_index() {
    let storage = common::in_memory_unlocked().await;
    let account = storage.account("main").expect("account");
    account.seed_deposit_index(PK, POOL, 5).await.expect("seed");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let account = account.clone();
        handles.push(tokio::spawn(async move {
            let next = account.get_next_deposit_index(PK, POOL).await?;
            account
                .update_last_used_deposit_index(PK, POOL, next)
                .await
                .map(|()| next)
        }));
    }

    let mut committed = BTreeSet::new();
    for handle in handles {
        match handle.await.expect("join") {
            Ok(index) => assert!(committed.insert(index), "index {index} handed out twice"),
            Err(StorageError::IndexRegression { .. }) => {}
            Err(err) => panic!("unexpected error {err}"),
        }
    }

    assert!(!committed.is_empty());
    let highest = *committed.iter().max().expect("non-empty");
    assert_eq!(
        account.get_next_deposit_index(PK, POOL).await,
        Ok(highest + 1)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_note_stores_lose_nothing() {
    let storage = common::in_memory_unlocked().await;
    let account = storage.account("main").expect("account");

    let mut handles = Vec::new();
    for batch in 0..6_u64 {
        let account = account.clone();
        handles.push(tokio::spawn(async move {
            let notes = (0..5)
                .map(|i| common::unspent(&format!("n{batch}-{i}"), batch * 5 + i))
                .collect();
            account
                .store_discovered_notes(
                    PK,
                    POOL,
                    notes,
                    Some(Cursor::new(format!("{:08}", batch * 5 + 5))),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("store");
    }

    let cached = account
        .get_cached_notes(PK, POOL)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(cached.note_chain.len(), 30);
    assert_eq!(cached.last_processed_cursor, Some(Cursor::from("00000030")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_separate_handles_on_one_directory() {
    let root = common::temp_root();
    let keystore = Arc::new(common::InMemoryKeystore::new());
    let first = common::open_unlocked(&root, keystore.clone()).await;
    let second = common::open_unlocked(&root, keystore).await;

    let (a, b) = (
        first.account("main").expect("account"),
        second.account("main").expect("account"),
    );
    let left = tokio::spawn(async move {
        for i in 0..10 {
            tolerate_regression(a.update_last_used_deposit_index(PK, POOL, i * 2).await);
        }
    });
    let right = tokio::spawn(async move {
        for i in 0..10 {
            tolerate_regression(b.update_last_used_deposit_index(PK, POOL, i * 2 + 1).await);
        }
    });
    left.await.expect("join");
    right.await.expect("join");

    let next = first
        .account("main")
        .expect("account")
        .get_next_deposit_index(PK, POOL)
        .await
        .expect("next");
    assert_eq!(next, 20);

    common::cleanup_storage(&root);
}
