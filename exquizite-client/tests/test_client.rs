use std::time::Duration;

use exquizite_client::{Identity, SetsClient};
use handoff::{
    Error, FileStorage, KeyValueStorage, MemoryBackend, MemoryStorage, MigrationOutcome,
    RetryPolicy, Session, local::GUEST_SETS_KEY, memory_backend::Op,
};
use wordset_utils::{GameMode, WordPair, share::ShareOptions};

fn client(backend: &MemoryBackend) -> SetsClient<MemoryStorage, MemoryBackend> {
    SetsClient::new(MemoryStorage::new(), backend.clone())
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)))
}

fn account(user_id: &str) -> Identity {
    Identity::Account(Session::new(user_id, "token"))
}

fn pair(word: &str, translation: &str) -> Vec<WordPair> {
    vec![WordPair::new(word, translation).unwrap()]
}

#[tokio::test]
async fn test_no_identity_is_an_auth_error() {
    let client = client(&MemoryBackend::new());
    assert!(matches!(client.store(), Err(Error::Auth)));
}

#[tokio::test]
async fn test_guest_sets_stay_on_device() {
    let backend = MemoryBackend::new();
    let client = client(&backend);

    let guest = client.sign_in_as_guest(Some("Sam")).await.unwrap();
    assert!(guest.is_guest);
    assert_eq!(client.identity().unwrap().id(), guest.id);

    let store = client.store().unwrap();
    assert!(store.is_local());
    let set = store
        .create_set("Animals", pair("perro", "dog"), "es", "en")
        .await
        .unwrap();
    store
        .record_practice_session(&set.id, GameMode::Flashcard, None)
        .await
        .unwrap();

    let stored = store.get_set_by_id(&set.id).await.unwrap().unwrap();
    assert!(stored.last_practiced.is_some());
    assert_eq!(store.practice_stats().await.unwrap()[&set.id].total_count, 1);
    assert_eq!(backend.total_calls(), 0);

    // Signing in again keeps the same guest.
    let again = client.sign_in_as_guest(None).await.unwrap();
    assert_eq!(again.id, guest.id);
}

#[tokio::test]
async fn test_guest_cannot_share() {
    let backend = MemoryBackend::new();
    let client = client(&backend);
    client.sign_in_as_guest(None).await.unwrap();
    let store = client.store().unwrap();
    let set = store.create_set("A", vec![], "es", "en").await.unwrap();

    assert!(matches!(
        store.create_share_link(&set.id, ShareOptions::default()).await,
        Err(Error::Permission(_))
    ));
    assert!(matches!(
        store.copy_shared_set("AbCdEf123456", None).await,
        Err(Error::Permission(_))
    ));
    store.revoke_share_link(&set.id).await.unwrap();
    assert_eq!(backend.total_calls(), 0);
}

#[tokio::test]
async fn test_featured_sets_are_read_only() {
    let client = client(&MemoryBackend::new());
    client.sign_in_as_guest(None).await.unwrap();
    let store = client.store().unwrap();
    let mine = store.create_set("Mine", vec![], "es", "en").await.unwrap();
    let featured = store
        .create_set("Greetings", pair("hola", "hello"), "es", "en")
        .await
        .unwrap();

    let mut sets = store.list_sets().await.unwrap();
    for set in &mut sets {
        set.is_featured = Some(set.id == featured.id);
    }
    client
        .local()
        .storage()
        .set_item(GUEST_SETS_KEY, &serde_json::to_string(&sets).unwrap())
        .await
        .unwrap();

    let err = store
        .update_set(&featured.id, "Renamed", vec![], "es", "en")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Featured sets cannot be edited. Please create your own set instead."
    );
    assert!(matches!(
        store.delete_set(&featured.id).await,
        Err(Error::Permission(_))
    ));
    assert_eq!(
        store.get_set_by_id(&featured.id).await.unwrap().unwrap().name,
        "Greetings"
    );

    store
        .update_set(&mine.id, "Still mine", vec![], "es", "en")
        .await
        .unwrap();
    store.delete_set(&mine.id).await.unwrap();
    assert_eq!(store.list_sets().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sign_in_migrates_guest_sets() {
    let backend = MemoryBackend::new();
    let client = client(&backend);
    client.sign_in_as_guest(None).await.unwrap();
    {
        let store = client.store().unwrap();
        store
            .create_set("Animals", pair("perro", "dog"), "es", "en")
            .await
            .unwrap();
        store
            .create_set("Colors", pair("rojo", "red"), "es", "en")
            .await
            .unwrap();
    }

    let outcome = client.set_identity(account("alice")).await.unwrap();
    assert!(matches!(outcome, Some(MigrationOutcome::Completed(_))));

    let store = client.store().unwrap();
    assert!(!store.is_local());
    let names: Vec<_> = store
        .list_sets()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"Animals".to_string()));
    assert!(!client.local().has_any_data().await.unwrap());

    // Account to account does not migrate again.
    assert_eq!(client.set_identity(account("alice")).await.unwrap(), None);
}

#[tokio::test]
async fn test_partial_migration_can_be_retried() {
    let backend = MemoryBackend::new();
    let client = client(&backend);
    client.sign_in_as_guest(None).await.unwrap();
    client
        .store()
        .unwrap()
        .create_set("Animals", vec![], "es", "en")
        .await
        .unwrap();
    backend.inject_failure(
        Op::InsertSet,
        1,
        handoff::RemoteError::new("permission denied for table word_sets").with_code("42501"),
    );

    let outcome = client.set_identity(account("alice")).await.unwrap();
    assert!(matches!(outcome, Some(MigrationOutcome::Partial(_))));
    assert!(client.local().has_any_data().await.unwrap());

    let outcome = client.retry_migration().await.unwrap();
    assert!(matches!(outcome, MigrationOutcome::Completed(_)));
    assert_eq!(backend.set_names("alice"), vec!["Animals"]);
}

#[tokio::test]
async fn test_device_with_leftover_guest_data_migrates_on_first_sign_in() {
    let backend = MemoryBackend::new();
    let dir = tempfile::tempdir().unwrap();

    {
        let client = SetsClient::new(FileStorage::open(dir.path()).unwrap(), backend.clone());
        client.sign_in_as_guest(None).await.unwrap();
        client
            .store()
            .unwrap()
            .create_set("Animals", pair("perro", "dog"), "es", "en")
            .await
            .unwrap();
    }

    // A fresh process starts signed out.
    let client = SetsClient::new(FileStorage::open(dir.path()).unwrap(), backend.clone());
    let outcome = client.set_identity(account("alice")).await.unwrap();
    assert!(matches!(outcome, Some(MigrationOutcome::Completed(_))));
    assert_eq!(backend.set_names("alice"), vec!["Animals"]);
}

#[tokio::test]
async fn test_sign_out_and_resolve() {
    let backend = MemoryBackend::new();
    let client = client(&backend);
    client.set_identity(account("alice")).await.unwrap();

    let store = client.store().unwrap();
    let set = store
        .create_set("Animals", pair("perro", "dog"), "es", "en")
        .await
        .unwrap();
    let share = store
        .create_share_link(&set.id, ShareOptions::default())
        .await
        .unwrap();
    drop(store);

    client.sign_out();
    assert!(client.identity().is_none());
    assert!(matches!(client.store(), Err(Error::Auth)));

    let details = client.resolve_share_link(&share.share_url).await.unwrap();
    assert_eq!(details.name, "Animals");

    client.sign_in_as_guest(None).await.unwrap();
    assert!(client.resolve_share_link(&share.share_code).await.is_some());
}
