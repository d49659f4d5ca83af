//! On-device storage for a guest: one identity, its word sets (newest first) and
//! its practice history, plus the per-account "migration done" markers.
//!
//! Each operation is a read-modify-write of a single key. Unreadable records are
//! treated as absent so a corrupted store never locks the user out of the app.

use chrono::{DateTime, Utc};
use wordset_utils::{
    GameMode, GuestIdentity, PracticeSession, PracticeStats, WordPair, WordSet, new_id,
    practice::tally,
};

use crate::{
    error::{Error, Result, StorageError},
    storage::KeyValueStorage,
};

pub const GUEST_USER_KEY: &str = "guest_user";
pub const GUEST_SETS_KEY: &str = "guest_sets";
pub const GUEST_PRACTICE_KEY: &str = "guest_practice_sessions";
pub const MIGRATION_DONE_PREFIX: &str = "migration_done_";

pub fn migration_done_key(account_id: &str) -> String {
    format!("{MIGRATION_DONE_PREFIX}{account_id}")
}

#[derive(Clone, Debug)]
pub struct LocalStore<S> {
    storage: S,
}

impl<S: KeyValueStorage> LocalStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.storage.get_item(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::error!("Ignoring unreadable local record `{key}`: {e}");
                Ok(None)
            }
        }
    }

    async fn write_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.storage.set_item(key, &json).await?;
        Ok(())
    }

    pub async fn create_user(&self, name: Option<&str>) -> Result<GuestIdentity> {
        let guest = GuestIdentity::new(name);
        self.write_json(GUEST_USER_KEY, &guest).await?;
        Ok(guest)
    }

    pub async fn get_user(&self) -> Result<Option<GuestIdentity>> {
        self.read_json(GUEST_USER_KEY).await
    }

    pub async fn update_user(&self, update: wordset_utils::GuestIdentityUpdate) -> Result<()> {
        let mut guest = self.get_user().await?.ok_or_else(Error::guest_not_found)?;
        update.apply(&mut guest);
        self.write_json(GUEST_USER_KEY, &guest).await
    }

    pub async fn delete_user(&self) -> Result<()> {
        self.storage.remove_item(GUEST_USER_KEY).await?;
        Ok(())
    }

    pub async fn list_sets(&self) -> Result<Vec<WordSet>> {
        Ok(self.read_json(GUEST_SETS_KEY).await?.unwrap_or_default())
    }

    pub async fn create_set(
        &self,
        name: &str,
        words: Vec<WordPair>,
        target_language: &str,
        native_language: &str,
    ) -> Result<WordSet> {
        let mut sets = self.list_sets().await?;
        let now = Utc::now();
        let set = WordSet {
            id: new_id(),
            name: name.to_string(),
            words,
            target_language: target_language.to_string(),
            native_language: native_language.to_string(),
            created_at: now,
            updated_at: now,
            last_practiced: None,
            is_copy: None,
            is_shareable: None,
            original_author_id: None,
            is_featured: None,
        };
        sets.insert(0, set.clone());
        self.write_json(GUEST_SETS_KEY, &sets).await?;
        Ok(set)
    }

    pub async fn update_set(
        &self,
        id: &str,
        name: &str,
        words: Vec<WordPair>,
        target_language: &str,
        native_language: &str,
    ) -> Result<()> {
        let mut sets = self.list_sets().await?;
        let set = sets
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::set_not_found(id))?;

        set.name = name.to_string();
        set.words = words;
        set.target_language = target_language.to_string();
        set.native_language = native_language.to_string();
        set.updated_at = not_before(set.updated_at);

        self.write_json(GUEST_SETS_KEY, &sets).await
    }

    pub async fn delete_set(&self, id: &str) -> Result<()> {
        let mut sets = self.list_sets().await?;
        let before = sets.len();
        sets.retain(|s| s.id != id);
        if sets.len() == before {
            return Ok(());
        }
        self.write_json(GUEST_SETS_KEY, &sets).await
    }

    pub async fn touch_last_practiced(&self, id: &str) -> Result<()> {
        let mut sets = self.list_sets().await?;
        let set = sets
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::set_not_found(id))?;

        set.last_practiced = Some(match set.last_practiced {
            Some(previous) => not_before(previous),
            None => Utc::now(),
        });

        self.write_json(GUEST_SETS_KEY, &sets).await
    }

    pub async fn get_set_by_id(&self, id: &str) -> Result<Option<WordSet>> {
        Ok(self.list_sets().await?.into_iter().find(|s| s.id == id))
    }

    pub async fn record_practice_session(
        &self,
        set_id: &str,
        game_mode: GameMode,
        score: Option<f64>,
    ) -> Result<()> {
        let mut sessions: Vec<PracticeSession> = self
            .read_json(GUEST_PRACTICE_KEY)
            .await?
            .unwrap_or_default();
        sessions.push(PracticeSession {
            set_id: set_id.to_string(),
            game_mode,
            score,
            completed_at: Utc::now(),
        });
        self.write_json(GUEST_PRACTICE_KEY, &sessions).await
    }

    pub async fn practice_sessions(&self) -> Result<Vec<PracticeSession>> {
        Ok(self
            .read_json(GUEST_PRACTICE_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn practice_stats(
        &self,
    ) -> Result<std::collections::BTreeMap<String, PracticeStats>> {
        let sessions = self.practice_sessions().await?;
        Ok(tally(
            sessions
                .iter()
                .map(|s| (s.set_id.as_str(), s.game_mode)),
        ))
    }

    /// Removes all guest data. Migration markers are kept.
    pub async fn clear(&self) -> Result<()> {
        self.delete_user().await?;
        self.storage.remove_item(GUEST_SETS_KEY).await?;
        self.storage.remove_item(GUEST_PRACTICE_KEY).await?;
        Ok(())
    }

    pub async fn has_any_data(&self) -> Result<bool> {
        Ok(self.get_user().await?.is_some() || !self.list_sets().await?.is_empty())
    }

    pub async fn is_migration_done(&self, account_id: &str) -> Result<bool> {
        let flag = self
            .storage
            .get_item(&migration_done_key(account_id))
            .await?;
        Ok(flag.as_deref() == Some("true"))
    }

    pub async fn mark_migration_done(&self, account_id: &str) -> Result<()> {
        self.storage
            .set_item(&migration_done_key(account_id), "true")
            .await?;
        Ok(())
    }

    /// Account ids that have a completed migration on this device.
    pub async fn migrated_accounts(&self) -> Result<Vec<String>> {
        let mut accounts = Vec::new();
        for key in self.storage.keys().await? {
            if let Some(account_id) = key.strip_prefix(MIGRATION_DONE_PREFIX) {
                if self.is_migration_done(account_id).await? {
                    accounts.push(account_id.to_string());
                }
            }
        }
        Ok(accounts)
    }
}

/// Current time, but never earlier than `previous`.
fn not_before(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous)
}
