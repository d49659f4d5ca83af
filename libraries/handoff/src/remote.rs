//! Word sets of a signed-in account, kept by a remote relational service.
//!
//! [`RemoteBackend`] is the thin seam over the service's tables and hosted
//! functions; [`RemoteStore`] turns those row-level calls into the same set
//! operations the local store offers, wrapping every call in the retry policy.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use wordset_utils::{
    GameMode, PracticeStats, WordPair, WordSet,
    practice::tally,
    share::{
        CopySetResponse, CopySharedSetRequest, GenerateShareLinkRequest, ShareMetadata,
        ShareOptions, SharedSetDetails, parse_share_link,
    },
};

use crate::{
    error::{Error, RemoteError, Result},
    retry::RetryPolicy,
};

pub const DEFAULT_TARGET_LANGUAGE: &str = "uk";
pub const DEFAULT_NATIVE_LANGUAGE: &str = "en";

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    /// Anonymous accounts can keep sets remotely but may not share or copy them.
    #[serde(default)]
    pub is_anonymous: bool,
}

impl Session {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            is_anonymous: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WordPairRow {
    pub id: String,
    pub set_id: String,
    pub word: String,
    pub translation: String,
    pub position: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WordSetRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub native_language: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_practiced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_shareable: Option<bool>,
    #[serde(default)]
    pub original_author_id: Option<String>,
    #[serde(default)]
    pub is_copy: Option<bool>,
    #[serde(default)]
    pub word_pairs: Vec<WordPairRow>,
}

impl WordSetRow {
    pub fn into_word_set(self) -> WordSet {
        let mut pairs = self.word_pairs;
        pairs.sort_by_key(|pair| pair.position);
        WordSet {
            id: self.id,
            name: self.name,
            words: pairs.into_iter().map(pair_from_row).collect(),
            target_language: self
                .target_language
                .unwrap_or_else(|| DEFAULT_TARGET_LANGUAGE.to_string()),
            native_language: self
                .native_language
                .unwrap_or_else(|| DEFAULT_NATIVE_LANGUAGE.to_string()),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_practiced: self.last_practiced,
            is_copy: Some(self.is_copy.unwrap_or(false)),
            is_shareable: Some(self.is_shareable != Some(false)),
            original_author_id: self.original_author_id,
            is_featured: None,
        }
    }
}

fn pair_from_row(row: WordPairRow) -> WordPair {
    WordPair {
        id: row.id,
        word: row.word,
        translation: row.translation,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct NewWordSetRow {
    pub user_id: String,
    pub name: String,
    pub target_language: String,
    pub native_language: String,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SetRowUpdate {
    pub name: String,
    pub target_language: String,
    pub native_language: String,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct NewWordPairRow {
    pub set_id: String,
    pub word: String,
    pub translation: String,
    pub position: i64,
}

fn pair_rows(set_id: &str, words: &[WordPair]) -> Vec<NewWordPairRow> {
    words
        .iter()
        .enumerate()
        .map(|(index, pair)| NewWordPairRow {
            set_id: set_id.to_string(),
            word: pair.word.clone(),
            translation: pair.translation.clone(),
            position: index as i64,
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct NewPracticeSessionRow {
    pub user_id: String,
    pub set_id: String,
    pub game_mode: GameMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub struct PracticeSessionRow {
    pub set_id: String,
    pub game_mode: GameMode,
}

/// Row- and function-level access to the remote service.
///
/// Implementations report failures as [`RemoteError`] and never retry on their
/// own; [`RemoteStore`] decides what is worth retrying. Counts returned by the
/// write methods are the number of rows the service reports as affected.
#[allow(async_fn_in_trait)]
pub trait RemoteBackend {
    /// All of the user's sets with their pairs, newest first.
    async fn select_sets(&self, session: &Session) -> Result<Vec<WordSetRow>, RemoteError>;

    async fn select_set(
        &self,
        session: &Session,
        set_id: &str,
    ) -> Result<Option<WordSetRow>, RemoteError>;

    async fn insert_set(
        &self,
        session: &Session,
        row: &NewWordSetRow,
    ) -> Result<WordSetRow, RemoteError>;

    /// Also bumps `updated_at`, but never to an earlier time than it holds.
    async fn update_set(
        &self,
        session: &Session,
        set_id: &str,
        update: &SetRowUpdate,
    ) -> Result<usize, RemoteError>;

    /// Moves `last_practiced` forward to `last_practiced`, leaving a later
    /// stored value alone. The count is the number of matching sets either way.
    async fn touch_set(
        &self,
        session: &Session,
        set_id: &str,
        last_practiced: DateTime<Utc>,
    ) -> Result<usize, RemoteError>;

    async fn delete_set(&self, session: &Session, set_id: &str) -> Result<usize, RemoteError>;

    async fn insert_pairs(
        &self,
        session: &Session,
        rows: &[NewWordPairRow],
    ) -> Result<Vec<WordPairRow>, RemoteError>;

    async fn delete_pairs(&self, session: &Session, set_id: &str) -> Result<(), RemoteError>;

    async fn insert_practice_session(
        &self,
        session: &Session,
        row: &NewPracticeSessionRow,
    ) -> Result<(), RemoteError>;

    async fn select_practice_sessions(
        &self,
        session: &Session,
    ) -> Result<Vec<PracticeSessionRow>, RemoteError>;

    async fn generate_share_link(
        &self,
        session: &Session,
        request: &GenerateShareLinkRequest,
    ) -> Result<ShareMetadata, RemoteError>;

    /// `Ok(None)` when the code is unknown, inactive or expired.
    async fn get_shared_set(
        &self,
        share_code: &str,
    ) -> Result<Option<SharedSetDetails>, RemoteError>;

    async fn copy_shared_set(
        &self,
        session: &Session,
        request: &CopySharedSetRequest,
    ) -> Result<CopySetResponse, RemoteError>;

    async fn deactivate_shares(&self, session: &Session, set_id: &str) -> Result<(), RemoteError>;
}

fn remote_failure(e: RemoteError) -> Error {
    if e.is_auth() {
        log::error!("Remote service rejected the session: {e}");
        Error::Auth
    } else {
        Error::Remote(e)
    }
}

#[derive(Clone, Debug)]
pub struct RemoteStore<B> {
    backend: B,
    session: Option<Session>,
    retry: RetryPolicy,
}

impl<B: RemoteBackend> RemoteStore<B> {
    pub fn new(backend: B, session: Option<Session>) -> Self {
        Self {
            backend,
            session,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn require_session(&self) -> Result<&Session> {
        match &self.session {
            Some(session) if !session.access_token.is_empty() => Ok(session),
            _ => Err(Error::Auth),
        }
    }

    fn require_full_account(&self, action: &str) -> Result<&Session> {
        let session = self.require_session()?;
        if session.is_anonymous {
            return Err(Error::Permission(format!(
                "Please create an account to {action}."
            )));
        }
        Ok(session)
    }

    pub async fn list_sets(&self) -> Result<Vec<WordSet>> {
        let session = self.require_session()?;
        let rows = self
            .retry
            .run(|| self.backend.select_sets(session))
            .await
            .map_err(remote_failure)?;
        log::info!("Loaded {} sets for user {}", rows.len(), session.user_id);
        Ok(rows.into_iter().map(WordSetRow::into_word_set).collect())
    }

    pub async fn get_set_by_id(&self, id: &str) -> Result<Option<WordSet>> {
        let session = self.require_session()?;
        let row = self
            .retry
            .run(|| self.backend.select_set(session, id))
            .await
            .map_err(remote_failure)?;
        Ok(row.map(WordSetRow::into_word_set))
    }

    /// Inserts the set row, then its pairs.
    ///
    /// If the pair insert fails the set row stays behind without words; the
    /// error is still returned.
    pub async fn create_set(
        &self,
        name: &str,
        words: Vec<WordPair>,
        target_language: &str,
        native_language: &str,
    ) -> Result<WordSet> {
        let session = self.require_session()?;
        let new_row = NewWordSetRow {
            user_id: session.user_id.clone(),
            name: name.to_string(),
            target_language: target_language.to_string(),
            native_language: native_language.to_string(),
        };

        let mut row = self
            .retry
            .run(|| self.backend.insert_set(session, &new_row))
            .await
            .inspect_err(|e| log::error!("Failed to create word set `{name}`: {e}"))
            .map_err(remote_failure)?;

        if !words.is_empty() {
            let pairs = pair_rows(&row.id, &words);
            row.word_pairs = self
                .retry
                .run(|| self.backend.insert_pairs(session, &pairs))
                .await
                .inspect_err(|e| {
                    log::error!(
                        "Created set {} but failed to insert its {} words: {e}",
                        row.id,
                        pairs.len()
                    )
                })
                .map_err(remote_failure)?;
        }

        Ok(row.into_word_set())
    }

    /// Replaces name, languages and the whole word list.
    ///
    /// Pairs are deleted and re-inserted; a failure in between leaves the set
    /// with no words until the update is retried.
    pub async fn update_set(
        &self,
        id: &str,
        name: &str,
        words: Vec<WordPair>,
        target_language: &str,
        native_language: &str,
    ) -> Result<()> {
        let session = self.require_session()?;
        let update = SetRowUpdate {
            name: name.to_string(),
            target_language: target_language.to_string(),
            native_language: native_language.to_string(),
        };

        let updated = self
            .retry
            .run(|| self.backend.update_set(session, id, &update))
            .await
            .map_err(remote_failure)?;
        if updated == 0 {
            return Err(Error::set_not_found(id));
        }

        self.retry
            .run(|| self.backend.delete_pairs(session, id))
            .await
            .map_err(remote_failure)?;

        if !words.is_empty() {
            let pairs = pair_rows(id, &words);
            self.retry
                .run(|| self.backend.insert_pairs(session, &pairs))
                .await
                .inspect_err(|e| log::error!("Set {id} lost its words during update: {e}"))
                .map_err(remote_failure)?;
        }

        Ok(())
    }

    /// Deletes a set; its pairs go with it on the service side.
    ///
    /// The service cannot tell "absent" from "not yours", so either one is
    /// reported as not found.
    pub async fn delete_set(&self, id: &str) -> Result<()> {
        let session = self.require_session()?;
        let deleted = self
            .retry
            .run(|| self.backend.delete_set(session, id))
            .await
            .map_err(remote_failure)?;
        if deleted == 0 {
            log::error!("Delete of set {id} affected no rows");
            return Err(Error::set_not_found(id));
        }
        Ok(())
    }

    pub async fn touch_last_practiced(&self, id: &str) -> Result<()> {
        let session = self.require_session()?;
        let now = Utc::now();
        let touched = self
            .retry
            .run(|| self.backend.touch_set(session, id, now))
            .await
            .map_err(remote_failure)?;
        if touched == 0 {
            return Err(Error::set_not_found(id));
        }
        Ok(())
    }

    pub async fn record_practice_session(
        &self,
        set_id: &str,
        game_mode: GameMode,
        score: Option<f64>,
    ) -> Result<()> {
        let session = self.require_session()?;
        let row = NewPracticeSessionRow {
            user_id: session.user_id.clone(),
            set_id: set_id.to_string(),
            game_mode,
            score,
        };
        self.retry
            .run(|| self.backend.insert_practice_session(session, &row))
            .await
            .map_err(remote_failure)
    }

    pub async fn practice_stats(&self) -> Result<BTreeMap<String, PracticeStats>> {
        let session = self.require_session()?;
        let rows = self
            .retry
            .run(|| self.backend.select_practice_sessions(session))
            .await
            .map_err(remote_failure)?;
        Ok(tally(rows.iter().map(|r| (r.set_id.as_str(), r.game_mode))))
    }

    pub async fn create_share_link(
        &self,
        set_id: &str,
        options: ShareOptions,
    ) -> Result<ShareMetadata> {
        let session = self.require_full_account("share sets with others")?;
        let request = GenerateShareLinkRequest {
            set_id: set_id.to_string(),
            options,
        };
        self.retry
            .run(|| self.backend.generate_share_link(session, &request))
            .await
            .inspect_err(|e| log::error!("Failed to generate share link for {set_id}: {e}"))
            .map_err(remote_failure)
    }

    /// Looks up a shared set. Malformed codes, dead links and transport
    /// failures all come back as `None`.
    pub async fn resolve_share_link(&self, code: &str) -> Option<SharedSetDetails> {
        let Some(code) = parse_share_link(code) else {
            log::warn!("Not a share code: `{code}`");
            return None;
        };
        match self
            .retry
            .run(|| self.backend.get_shared_set(code))
            .await
        {
            Ok(details) => details,
            Err(e) => {
                log::error!("Failed to fetch shared set {code}: {e}");
                None
            }
        }
    }

    pub async fn copy_shared_set(
        &self,
        code: &str,
        custom_name: Option<&str>,
    ) -> Result<WordSet> {
        let session = self.require_full_account("copy shared sets")?;
        let code = parse_share_link(code).ok_or_else(|| Error::NotFound {
            kind: "share link",
            id: code.to_string(),
        })?;
        let request = CopySharedSetRequest {
            share_code: code.to_string(),
            custom_name: custom_name.map(str::to_string),
        };
        let copied = self
            .retry
            .run(|| self.backend.copy_shared_set(session, &request))
            .await
            .inspect_err(|e| log::error!("Failed to copy shared set {code}: {e}"))
            .map_err(remote_failure)?;

        if let Some(set) = self.get_set_by_id(&copied.set_id).await? {
            return Ok(set);
        }

        log::warn!(
            "Copied set {} not readable directly, reloading all sets",
            copied.set_id
        );
        self.list_sets()
            .await?
            .into_iter()
            .find(|s| s.id == copied.set_id)
            .ok_or_else(|| Error::set_not_found(copied.set_id))
    }

    pub async fn revoke_share_link(&self, set_id: &str) -> Result<()> {
        let session = self.require_session()?;
        self.retry
            .run(|| self.backend.deactivate_shares(session, set_id))
            .await
            .map_err(remote_failure)
    }
}
