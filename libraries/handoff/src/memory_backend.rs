//! An in-process [`RemoteBackend`] with the same row semantics as the hosted
//! service, plus knobs for counting calls and injecting failures.

use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    rc::Rc,
};

use chrono::{DateTime, Duration, Utc};
use wordset_utils::{
    new_id,
    share::{
        CopySetResponse, CopySharedSetRequest, GenerateShareLinkRequest, SHARE_CODE_LENGTH,
        ShareAuthor, ShareInfo, ShareMetadata, SharedSetDetails, SharedWordPair, share_url,
    },
};

use crate::{
    error::RemoteError,
    remote::{
        NewPracticeSessionRow, NewWordPairRow, NewWordSetRow, PracticeSessionRow, RemoteBackend,
        Session, SetRowUpdate, WordPairRow, WordSetRow,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    SelectSets,
    SelectSet,
    InsertSet,
    UpdateSet,
    TouchSet,
    DeleteSet,
    InsertPairs,
    DeletePairs,
    InsertPractice,
    SelectPractice,
    GenerateShare,
    GetShared,
    CopyShared,
    DeactivateShares,
}

#[derive(Clone, Debug)]
struct ShareRow {
    id: String,
    code: String,
    set_id: String,
    created_by: String,
    is_active: bool,
    view_count: u64,
    copy_count: u64,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl ShareRow {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default, Debug)]
struct Tables {
    // Insertion order doubles as the tie-breaker for equal timestamps.
    sets: Vec<WordSetRow>,
    pairs: Vec<WordPairRow>,
    practice: Vec<(String, PracticeSessionRow)>,
    shares: Vec<ShareRow>,

    calls: BTreeMap<Op, usize>,
    injected: BTreeMap<Op, VecDeque<RemoteError>>,
    failing_names: BTreeMap<String, RemoteError>,
    sessions_expired: bool,
}

impl Tables {
    fn set_with_pairs(&self, set: &WordSetRow) -> WordSetRow {
        let mut row = set.clone();
        row.word_pairs = self
            .pairs
            .iter()
            .filter(|p| p.set_id == set.id)
            .cloned()
            .collect();
        row
    }

    fn owned_set_mut(&mut self, user_id: &str, set_id: &str) -> Option<&mut WordSetRow> {
        self.sets
            .iter_mut()
            .find(|s| s.id == set_id && s.user_id == user_id)
    }
}

/// Clones share the same tables, so a test can keep a handle while a store
/// owns another.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    tables: Rc<RefCell<Tables>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` calls of `op` fail with `error`.
    pub fn inject_failure(&self, op: Op, times: usize, error: RemoteError) {
        let mut tables = self.tables.borrow_mut();
        let queue = tables.injected.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Every insert of a set with this name fails.
    pub fn fail_sets_named(&self, name: &str, error: RemoteError) {
        self.tables
            .borrow_mut()
            .failing_names
            .insert(name.to_string(), error);
    }

    /// From now on every call is rejected as if the access token had expired.
    pub fn expire_sessions(&self) {
        self.tables.borrow_mut().sessions_expired = true;
    }

    pub fn call_count(&self, op: Op) -> usize {
        self.tables.borrow().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.tables.borrow().calls.values().sum()
    }

    /// Sets owned by `user_id`, regardless of sessions.
    pub fn set_names(&self, user_id: &str) -> Vec<String> {
        self.tables
            .borrow()
            .sets
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.name.clone())
            .collect()
    }

    fn enter(&self, op: Op) -> Result<(), RemoteError> {
        let mut tables = self.tables.borrow_mut();
        *tables.calls.entry(op).or_default() += 1;
        if tables.sessions_expired && op != Op::GetShared {
            return Err(RemoteError::new("JWT expired")
                .with_code("PGRST301")
                .with_status(401));
        }
        match tables.injected.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn share_code() -> String {
    new_id()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(SHARE_CODE_LENGTH)
        .collect()
}

impl RemoteBackend for MemoryBackend {
    async fn select_sets(&self, session: &Session) -> Result<Vec<WordSetRow>, RemoteError> {
        self.enter(Op::SelectSets)?;
        let tables = self.tables.borrow();
        let mut rows: Vec<_> = tables
            .sets
            .iter()
            .filter(|s| s.user_id == session.user_id)
            .map(|s| tables.set_with_pairs(s))
            .collect();
        rows.reverse();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn select_set(
        &self,
        session: &Session,
        set_id: &str,
    ) -> Result<Option<WordSetRow>, RemoteError> {
        self.enter(Op::SelectSet)?;
        let tables = self.tables.borrow();
        Ok(tables
            .sets
            .iter()
            .find(|s| s.id == set_id && s.user_id == session.user_id)
            .map(|s| tables.set_with_pairs(s)))
    }

    async fn insert_set(
        &self,
        session: &Session,
        row: &NewWordSetRow,
    ) -> Result<WordSetRow, RemoteError> {
        self.enter(Op::InsertSet)?;
        let mut tables = self.tables.borrow_mut();
        if let Some(error) = tables.failing_names.get(&row.name) {
            return Err(error.clone());
        }
        let now = Utc::now();
        let stored = WordSetRow {
            id: new_id(),
            user_id: session.user_id.clone(),
            name: row.name.clone(),
            target_language: Some(row.target_language.clone()),
            native_language: Some(row.native_language.clone()),
            created_at: now,
            updated_at: now,
            last_practiced: None,
            is_shareable: Some(true),
            original_author_id: None,
            is_copy: Some(false),
            word_pairs: Vec::new(),
        };
        tables.sets.push(stored.clone());
        Ok(stored)
    }

    async fn update_set(
        &self,
        session: &Session,
        set_id: &str,
        update: &SetRowUpdate,
    ) -> Result<usize, RemoteError> {
        self.enter(Op::UpdateSet)?;
        let mut tables = self.tables.borrow_mut();
        let Some(set) = tables.owned_set_mut(&session.user_id, set_id) else {
            return Ok(0);
        };
        set.name = update.name.clone();
        set.target_language = Some(update.target_language.clone());
        set.native_language = Some(update.native_language.clone());
        set.updated_at = set.updated_at.max(Utc::now());
        Ok(1)
    }

    async fn touch_set(
        &self,
        session: &Session,
        set_id: &str,
        last_practiced: DateTime<Utc>,
    ) -> Result<usize, RemoteError> {
        self.enter(Op::TouchSet)?;
        let mut tables = self.tables.borrow_mut();
        let Some(set) = tables.owned_set_mut(&session.user_id, set_id) else {
            return Ok(0);
        };
        set.last_practiced = Some(match set.last_practiced {
            Some(previous) => previous.max(last_practiced),
            None => last_practiced,
        });
        Ok(1)
    }

    async fn delete_set(&self, session: &Session, set_id: &str) -> Result<usize, RemoteError> {
        self.enter(Op::DeleteSet)?;
        let mut tables = self.tables.borrow_mut();
        let before = tables.sets.len();
        tables
            .sets
            .retain(|s| !(s.id == set_id && s.user_id == session.user_id));
        let deleted = before - tables.sets.len();
        if deleted > 0 {
            tables.pairs.retain(|p| p.set_id != set_id);
            tables.shares.retain(|s| s.set_id != set_id);
        }
        Ok(deleted)
    }

    async fn insert_pairs(
        &self,
        session: &Session,
        rows: &[NewWordPairRow],
    ) -> Result<Vec<WordPairRow>, RemoteError> {
        self.enter(Op::InsertPairs)?;
        let mut tables = self.tables.borrow_mut();
        for row in rows {
            if tables.owned_set_mut(&session.user_id, &row.set_id).is_none() {
                return Err(RemoteError::new(
                    "new row violates row-level security policy for table \"word_pairs\"",
                )
                .with_code("42501")
                .with_status(403));
            }
        }
        let inserted: Vec<_> = rows
            .iter()
            .map(|row| WordPairRow {
                id: new_id(),
                set_id: row.set_id.clone(),
                word: row.word.clone(),
                translation: row.translation.clone(),
                position: row.position,
            })
            .collect();
        tables.pairs.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn delete_pairs(&self, session: &Session, set_id: &str) -> Result<(), RemoteError> {
        self.enter(Op::DeletePairs)?;
        let mut tables = self.tables.borrow_mut();
        if tables.owned_set_mut(&session.user_id, set_id).is_some() {
            tables.pairs.retain(|p| p.set_id != set_id);
        }
        Ok(())
    }

    async fn insert_practice_session(
        &self,
        session: &Session,
        row: &NewPracticeSessionRow,
    ) -> Result<(), RemoteError> {
        self.enter(Op::InsertPractice)?;
        self.tables.borrow_mut().practice.push((
            session.user_id.clone(),
            PracticeSessionRow {
                set_id: row.set_id.clone(),
                game_mode: row.game_mode,
            },
        ));
        Ok(())
    }

    async fn select_practice_sessions(
        &self,
        session: &Session,
    ) -> Result<Vec<PracticeSessionRow>, RemoteError> {
        self.enter(Op::SelectPractice)?;
        Ok(self
            .tables
            .borrow()
            .practice
            .iter()
            .filter(|(user, _)| *user == session.user_id)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn generate_share_link(
        &self,
        session: &Session,
        request: &GenerateShareLinkRequest,
    ) -> Result<ShareMetadata, RemoteError> {
        self.enter(Op::GenerateShare)?;
        let mut tables = self.tables.borrow_mut();
        if tables
            .owned_set_mut(&session.user_id, &request.set_id)
            .is_none()
        {
            return Err(RemoteError::new("Set not found or access denied").with_status(404));
        }

        let now = Utc::now();
        let existing = tables
            .shares
            .iter()
            .position(|s| s.set_id == request.set_id && s.is_live(now));
        let (index, is_new) = match existing {
            Some(index) => (index, false),
            None => {
                tables.shares.push(ShareRow {
                    id: new_id(),
                    code: share_code(),
                    set_id: request.set_id.clone(),
                    created_by: session.user_id.clone(),
                    is_active: true,
                    view_count: 0,
                    copy_count: 0,
                    created_at: now,
                    expires_at: request
                        .options
                        .expires_in_days
                        .map(|days| now + Duration::days(i64::from(days))),
                });
                (tables.shares.len() - 1, true)
            }
        };

        let share = &tables.shares[index];
        Ok(ShareMetadata {
            share_id: share.id.clone(),
            share_code: share.code.clone(),
            share_url: share_url(&share.code),
            is_new,
            view_count: share.view_count,
            copy_count: share.copy_count,
            created_at: share.created_at.to_rfc3339(),
            expires_at: share.expires_at.map(|at| at.to_rfc3339()),
        })
    }

    async fn get_shared_set(
        &self,
        share_code: &str,
    ) -> Result<Option<SharedSetDetails>, RemoteError> {
        self.enter(Op::GetShared)?;
        let mut tables = self.tables.borrow_mut();
        let now = Utc::now();
        let Some(index) = tables
            .shares
            .iter()
            .position(|s| s.code == share_code && s.is_live(now))
        else {
            return Ok(None);
        };
        tables.shares[index].view_count += 1;

        let share = tables.shares[index].clone();
        let Some(set) = tables.sets.iter().find(|s| s.id == share.set_id) else {
            return Ok(None);
        };
        let set = tables.set_with_pairs(set);
        let mut words: Vec<_> = set
            .word_pairs
            .into_iter()
            .map(|p| SharedWordPair {
                id: p.id,
                word: p.word,
                translation: p.translation,
                position: p.position,
            })
            .collect();
        words.sort_by_key(|w| w.position);

        Ok(Some(SharedSetDetails {
            set_id: set.id,
            name: set.name,
            target_language: set.target_language.unwrap_or_default(),
            native_language: set.native_language.unwrap_or_default(),
            word_count: words.len(),
            words,
            share_info: ShareInfo {
                share_code: share.code,
                view_count: share.view_count,
                copy_count: share.copy_count,
                created_at: share.created_at.to_rfc3339(),
                expires_at: share.expires_at.map(|at| at.to_rfc3339()),
            },
            author: ShareAuthor {
                name: share.created_by,
            },
        }))
    }

    async fn copy_shared_set(
        &self,
        session: &Session,
        request: &CopySharedSetRequest,
    ) -> Result<CopySetResponse, RemoteError> {
        self.enter(Op::CopyShared)?;
        let mut tables = self.tables.borrow_mut();
        let now = Utc::now();
        let Some(index) = tables
            .shares
            .iter()
            .position(|s| s.code == request.share_code && s.is_live(now))
        else {
            return Err(RemoteError::new("Share link not found or expired").with_status(404));
        };
        let share = tables.shares[index].clone();
        if share.created_by == session.user_id {
            return Err(RemoteError::new("You cannot copy your own set").with_status(400));
        }
        let Some(original) = tables.sets.iter().find(|s| s.id == share.set_id).cloned() else {
            return Err(RemoteError::new("Original set not found").with_status(404));
        };

        let name = request
            .custom_name
            .clone()
            .unwrap_or_else(|| format!("{} (Copy)", original.name));
        let copy_id = new_id();
        let copied_pairs: Vec<_> = tables
            .pairs
            .iter()
            .filter(|p| p.set_id == original.id)
            .map(|p| WordPairRow {
                id: new_id(),
                set_id: copy_id.clone(),
                ..p.clone()
            })
            .collect();
        let word_count = copied_pairs.len();

        tables.sets.push(WordSetRow {
            id: copy_id.clone(),
            user_id: session.user_id.clone(),
            name: name.clone(),
            created_at: now,
            updated_at: now,
            last_practiced: None,
            is_copy: Some(true),
            original_author_id: Some(share.created_by),
            word_pairs: Vec::new(),
            ..original
        });
        tables.pairs.extend(copied_pairs);
        tables.shares[index].copy_count += 1;

        Ok(CopySetResponse {
            set_id: copy_id,
            name,
            word_count,
            success: true,
        })
    }

    async fn deactivate_shares(&self, session: &Session, set_id: &str) -> Result<(), RemoteError> {
        self.enter(Op::DeactivateShares)?;
        let mut tables = self.tables.borrow_mut();
        for share in tables
            .shares
            .iter_mut()
            .filter(|s| s.set_id == set_id && s.created_by == session.user_id)
        {
            share.is_active = false;
        }
        Ok(())
    }
}
