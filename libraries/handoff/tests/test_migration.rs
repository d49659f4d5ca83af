use std::time::Duration;

use handoff::{
    FileStorage, KeyValueStorage, LocalStore, MemoryBackend, MemoryStorage, MigrationOutcome,
    RemoteError, RemoteStore, RetryPolicy, Session, SyncReconciler, local::migration_done_key,
    memory_backend::Op,
};
use wordset_utils::{SetContent, WordPair, WordSet};

const ACCOUNT: &str = "account-1";

fn words(pairs: &[(&str, &str)]) -> Vec<WordPair> {
    pairs
        .iter()
        .map(|(w, t)| WordPair::new(w, t).unwrap())
        .collect()
}

fn remote(backend: &MemoryBackend) -> RemoteStore<MemoryBackend> {
    RemoteStore::new(backend.clone(), Some(Session::new(ACCOUNT, "access-token")))
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)))
}

async fn guest_with_two_sets<S: KeyValueStorage>(local: &LocalStore<S>) -> Vec<WordSet> {
    local.create_user(Some("Sam")).await.unwrap();
    local
        .create_set(
            "Animals",
            words(&[("perro", "dog"), ("gato", "cat")]),
            "es",
            "en",
        )
        .await
        .unwrap();
    local
        .create_set("Colors", words(&[("rojo", "red"), ("azul", "blue")]), "es", "en")
        .await
        .unwrap();
    local.list_sets().await.unwrap()
}

fn same_sets(a: &[WordSet], b: &[WordSet]) -> bool {
    let key = |s: &WordSet| s.name.clone();
    let mut a: Vec<_> = a.iter().collect();
    let mut b: Vec<_> = b.iter().collect();
    a.sort_by_key(|s| key(s));
    b.sort_by_key(|s| key(s));
    a.len() == b.len()
        && a.iter().zip(&b).all(|(x, y)| {
            let y: SetContent<'_> = y.content();
            x.content().matches(&y)
        })
}

#[tokio::test]
async fn test_full_migration() {
    let local = LocalStore::new(MemoryStorage::new());
    let backend = MemoryBackend::new();
    let remote = remote(&backend);
    let guest_sets = guest_with_two_sets(&local).await;

    let outcome = SyncReconciler::new()
        .check_pending(&local, &remote, ACCOUNT)
        .await
        .unwrap();

    let MigrationOutcome::Completed(report) = outcome else {
        panic!("expected a completed migration, got {outcome:?}");
    };
    assert_eq!(report.migrated.len(), 2);
    assert!(report.failed.is_empty());

    let remote_sets = remote.list_sets().await.unwrap();
    assert!(same_sets(&remote_sets, &guest_sets));
    assert!(!local.has_any_data().await.unwrap());
    assert!(local.is_migration_done(ACCOUNT).await.unwrap());
}

#[tokio::test]
async fn test_partial_migration_keeps_local_data() {
    let local = LocalStore::new(MemoryStorage::new());
    let backend = MemoryBackend::new();
    let remote = remote(&backend);
    let guest_sets = guest_with_two_sets(&local).await;

    // Sets are migrated in list order (newest first), so "Animals" is second.
    backend.fail_sets_named(
        "Animals",
        RemoteError::new("duplicate key value violates unique constraint").with_code("23505"),
    );

    let outcome = SyncReconciler::new()
        .check_pending(&local, &remote, ACCOUNT)
        .await
        .unwrap();

    let MigrationOutcome::Partial(report) = outcome else {
        panic!("expected a partial migration, got {outcome:?}");
    };
    assert_eq!(report.migrated.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "Animals");

    assert_eq!(backend.set_names(ACCOUNT), vec!["Colors"]);
    assert_eq!(local.list_sets().await.unwrap(), guest_sets);
    assert!(local.get_user().await.unwrap().is_some());
    assert!(!local.is_migration_done(ACCOUNT).await.unwrap());
}

#[tokio::test]
async fn test_finished_migration_never_calls_remote_again() {
    let local = LocalStore::new(MemoryStorage::new());
    let backend = MemoryBackend::new();
    let remote = remote(&backend);
    let reconciler = SyncReconciler::new();

    guest_with_two_sets(&local).await;
    reconciler
        .check_pending(&local, &remote, ACCOUNT)
        .await
        .unwrap();
    let calls_after_first_pass = backend.total_calls();

    // New guest data shows up on the device afterwards.
    guest_with_two_sets(&local).await;

    let outcome = reconciler
        .check_pending(&local, &remote, ACCOUNT)
        .await
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::AlreadyDone);
    assert_eq!(backend.total_calls(), calls_after_first_pass);
    assert_eq!(local.list_sets().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_flag_is_per_account() {
    let local = LocalStore::new(MemoryStorage::new());
    let backend = MemoryBackend::new();
    local.mark_migration_done("someone-else").await.unwrap();
    guest_with_two_sets(&local).await;

    let outcome = SyncReconciler::new()
        .check_pending(&local, &remote(&backend), ACCOUNT)
        .await
        .unwrap();
    assert!(matches!(outcome, MigrationOutcome::Completed(_)));
    assert_eq!(
        local.migrated_accounts().await.unwrap(),
        vec![ACCOUNT.to_string(), "someone-else".to_string()]
    );
}

#[tokio::test]
async fn test_flag_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();

    {
        let local = LocalStore::new(FileStorage::open(dir.path()).unwrap());
        guest_with_two_sets(&local).await;
        let outcome = SyncReconciler::new()
            .check_pending(&local, &remote(&backend), ACCOUNT)
            .await
            .unwrap();
        assert!(matches!(outcome, MigrationOutcome::Completed(_)));
    }

    let storage = FileStorage::open(dir.path()).unwrap();
    assert_eq!(
        storage
            .get_item(&migration_done_key(ACCOUNT))
            .await
            .unwrap()
            .as_deref(),
        Some("true")
    );

    let local = LocalStore::new(storage);
    guest_with_two_sets(&local).await;
    let before = backend.total_calls();
    let outcome = SyncReconciler::new()
        .check_pending(&local, &remote(&backend), ACCOUNT)
        .await
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::AlreadyDone);
    assert_eq!(backend.total_calls(), before);
}

#[tokio::test]
async fn test_unreachable_service_fails_every_set() {
    let local = LocalStore::new(MemoryStorage::new());
    let backend = MemoryBackend::new();
    let remote = remote(&backend);
    guest_with_two_sets(&local).await;
    backend.inject_failure(Op::InsertSet, 6, RemoteError::new("Network request failed"));

    let outcome = SyncReconciler::new()
        .check_pending(&local, &remote, ACCOUNT)
        .await
        .unwrap();
    let report = outcome.report().unwrap();
    assert!(matches!(outcome, MigrationOutcome::Partial(_)));
    assert!(report.migrated.is_empty());
    assert_eq!(report.failed.len(), 2);
    // Two sets, three attempts each.
    assert_eq!(backend.call_count(Op::InsertSet), 6);
    assert!(backend.set_names(ACCOUNT).is_empty());
    assert_eq!(local.list_sets().await.unwrap().len(), 2);
}
