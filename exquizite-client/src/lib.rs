//! The word-set API the app talks to.
//!
//! Callers never branch on guest versus account themselves: [`SetsClient`]
//! picks a [`WordSetStore`] for the current [`Identity`] and every operation
//! goes through it. Signing a guest into an account runs the migration.

use std::{cell::RefCell, collections::BTreeMap};

use handoff::{
    Error, KeyValueStorage, LocalStore, MigrationOutcome, RemoteBackend, RemoteStore, Result,
    RetryPolicy, Session, SyncReconciler,
};
use wordset_utils::{
    GameMode, GuestIdentity, PracticeStats, WordPair, WordSet,
    share::{ShareMetadata, ShareOptions, SharedSetDetails},
};

pub mod config;

pub use config::ClientConfig;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Identity {
    Guest(GuestIdentity),
    Account(Session),
}

impl Identity {
    pub fn id(&self) -> &str {
        match self {
            Identity::Guest(guest) => &guest.id,
            Identity::Account(session) => &session.user_id,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest(_))
    }
}

/// Where the current user's sets live.
pub enum WordSetStore<'a, S, B> {
    Local(&'a LocalStore<S>),
    Remote(RemoteStore<B>),
}

fn guest_permission(action: &str) -> Error {
    Error::Permission(format!("Please create an account to {action}."))
}

fn featured_permission(action: &str) -> Error {
    Error::Permission(format!(
        "Featured sets cannot be {action}. Please create your own set instead."
    ))
}

impl<S: KeyValueStorage, B: RemoteBackend> WordSetStore<'_, S, B> {
    pub fn is_local(&self) -> bool {
        matches!(self, WordSetStore::Local(_))
    }

    async fn reject_featured(&self, id: &str, action: &str) -> Result<()> {
        match self.get_set_by_id(id).await? {
            Some(set) if set.is_featured() => Err(featured_permission(action)),
            _ => Ok(()),
        }
    }

    pub async fn list_sets(&self) -> Result<Vec<WordSet>> {
        match self {
            WordSetStore::Local(local) => local.list_sets().await,
            WordSetStore::Remote(remote) => remote.list_sets().await,
        }
    }

    pub async fn get_set_by_id(&self, id: &str) -> Result<Option<WordSet>> {
        match self {
            WordSetStore::Local(local) => local.get_set_by_id(id).await,
            WordSetStore::Remote(remote) => remote.get_set_by_id(id).await,
        }
    }

    pub async fn create_set(
        &self,
        name: &str,
        words: Vec<WordPair>,
        target_language: &str,
        native_language: &str,
    ) -> Result<WordSet> {
        match self {
            WordSetStore::Local(local) => {
                local
                    .create_set(name, words, target_language, native_language)
                    .await
            }
            WordSetStore::Remote(remote) => {
                remote
                    .create_set(name, words, target_language, native_language)
                    .await
            }
        }
    }

    pub async fn update_set(
        &self,
        id: &str,
        name: &str,
        words: Vec<WordPair>,
        target_language: &str,
        native_language: &str,
    ) -> Result<()> {
        self.reject_featured(id, "edited").await?;
        match self {
            WordSetStore::Local(local) => {
                local
                    .update_set(id, name, words, target_language, native_language)
                    .await
            }
            WordSetStore::Remote(remote) => {
                remote
                    .update_set(id, name, words, target_language, native_language)
                    .await
            }
        }
    }

    pub async fn delete_set(&self, id: &str) -> Result<()> {
        self.reject_featured(id, "deleted").await?;
        match self {
            WordSetStore::Local(local) => local.delete_set(id).await,
            WordSetStore::Remote(remote) => remote.delete_set(id).await,
        }
    }

    pub async fn touch_last_practiced(&self, id: &str) -> Result<()> {
        match self {
            WordSetStore::Local(local) => local.touch_last_practiced(id).await,
            WordSetStore::Remote(remote) => remote.touch_last_practiced(id).await,
        }
    }

    /// Records a finished game and bumps the set's last-practiced time.
    pub async fn record_practice_session(
        &self,
        set_id: &str,
        game_mode: GameMode,
        score: Option<f64>,
    ) -> Result<()> {
        match self {
            WordSetStore::Local(local) => {
                local
                    .record_practice_session(set_id, game_mode, score)
                    .await?
            }
            WordSetStore::Remote(remote) => {
                remote
                    .record_practice_session(set_id, game_mode, score)
                    .await?
            }
        }
        self.touch_last_practiced(set_id).await
    }

    pub async fn practice_stats(&self) -> Result<BTreeMap<String, PracticeStats>> {
        match self {
            WordSetStore::Local(local) => local.practice_stats().await,
            WordSetStore::Remote(remote) => remote.practice_stats().await,
        }
    }

    pub async fn create_share_link(
        &self,
        set_id: &str,
        options: ShareOptions,
    ) -> Result<ShareMetadata> {
        let WordSetStore::Remote(remote) = self else {
            return Err(guest_permission("share sets with others"));
        };
        self.reject_featured(set_id, "shared").await?;
        remote.create_share_link(set_id, options).await
    }

    pub async fn copy_shared_set(&self, code: &str, custom_name: Option<&str>) -> Result<WordSet> {
        match self {
            WordSetStore::Local(_) => Err(guest_permission("copy shared sets")),
            WordSetStore::Remote(remote) => remote.copy_shared_set(code, custom_name).await,
        }
    }

    /// Guests have nothing shared, so this is a no-op for them.
    pub async fn revoke_share_link(&self, set_id: &str) -> Result<()> {
        match self {
            WordSetStore::Local(_) => Ok(()),
            WordSetStore::Remote(remote) => remote.revoke_share_link(set_id).await,
        }
    }
}

pub struct SetsClient<S, B> {
    local: LocalStore<S>,
    backend: B,
    retry: RetryPolicy,
    // never hold a borrow of this across an .await
    identity: RefCell<Option<Identity>>,
    reconciler: SyncReconciler,
}

impl<S: KeyValueStorage, B: RemoteBackend + Clone> SetsClient<S, B> {
    pub fn new(storage: S, backend: B) -> Self {
        Self {
            local: LocalStore::new(storage),
            backend,
            retry: RetryPolicy::default(),
            identity: RefCell::new(None),
            reconciler: SyncReconciler::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn local(&self) -> &LocalStore<S> {
        &self.local
    }

    pub fn reconciler(&self) -> &SyncReconciler {
        &self.reconciler
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    fn remote(&self, session: Option<Session>) -> RemoteStore<B> {
        RemoteStore::new(self.backend.clone(), session).with_retry_policy(self.retry)
    }

    /// The store for the current identity. Fails with [`Error::Auth`] when
    /// nobody is signed in.
    pub fn store(&self) -> Result<WordSetStore<'_, S, B>> {
        match &*self.identity.borrow() {
            Some(Identity::Guest(_)) => Ok(WordSetStore::Local(&self.local)),
            Some(Identity::Account(session)) => {
                Ok(WordSetStore::Remote(self.remote(Some(session.clone()))))
            }
            None => Err(Error::Auth),
        }
    }

    /// Continues as the guest already on this device, or creates one.
    pub async fn sign_in_as_guest(&self, name: Option<&str>) -> Result<GuestIdentity> {
        let guest = match self.local.get_user().await? {
            Some(guest) => guest,
            None => {
                let guest = self.local.create_user(name).await?;
                log::info!("Created guest {}", guest.id);
                guest
            }
        };
        self.identity.replace(Some(Identity::Guest(guest.clone())));
        Ok(guest)
    }

    /// Switches identity. Moving from a guest (or from a device holding guest
    /// data) to an account migrates the guest's sets and returns the outcome.
    pub async fn set_identity(&self, identity: Identity) -> Result<Option<MigrationOutcome>> {
        let previous = self.identity.replace(Some(identity.clone()));

        let Identity::Account(session) = identity else {
            return Ok(None);
        };
        let was_guest = previous.as_ref().is_some_and(Identity::is_guest);
        if !was_guest && !self.local.has_any_data().await? {
            return Ok(None);
        }

        log::info!("Guest signed in as {}, checking for data to migrate", session.user_id);
        let user_id = session.user_id.clone();
        let remote = self.remote(Some(session));
        let outcome = self
            .reconciler
            .check_pending(&self.local, &remote, &user_id)
            .await?;
        Ok(Some(outcome))
    }

    /// Re-runs the migration for the signed-in account, e.g. after a partial one.
    pub async fn retry_migration(&self) -> Result<MigrationOutcome> {
        let Some(Identity::Account(session)) = self.identity() else {
            return Err(Error::Auth);
        };
        let user_id = session.user_id.clone();
        self.reconciler
            .check_pending(&self.local, &self.remote(Some(session)), &user_id)
            .await
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.identity.replace(None) {
            log::info!("Signed out {}", previous.id());
        }
    }

    /// Looks up a share link; works whoever is signed in, or nobody.
    pub async fn resolve_share_link(&self, code: &str) -> Option<SharedSetDetails> {
        let session = match self.identity() {
            Some(Identity::Account(session)) => Some(session),
            _ => None,
        };
        self.remote(session).resolve_share_link(code).await
    }
}
