//! [`RemoteBackend`] for a hosted Supabase project.
//!
//! Table access goes through PostgREST; share links go through the project's
//! edge functions.
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use postgrest::Postgrest;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use wordset_utils::share::{
    CopySetResponse, CopySharedSetRequest, GenerateShareLinkRequest, GetSharedSetRequest,
    ShareMetadata, SharedSetDetails,
};

use crate::{
    error::RemoteError,
    remote::{
        NewPracticeSessionRow, NewWordPairRow, NewWordSetRow, PracticeSessionRow, RemoteBackend,
        Session, SetRowUpdate, WordPairRow, WordSetRow,
    },
};

/// Bound on every edge function call.
pub const FUNCTION_TIMEOUT: Duration = Duration::from_secs(30);

const WORD_SETS: &str = "word_sets";
const WORD_PAIRS: &str = "word_pairs";
const PRACTICE_SESSIONS: &str = "practice_sessions";
const SHARED_SETS: &str = "shared_sets";

const SET_WITH_PAIRS: &str = "*,word_pairs(*)";

fn classify_transport(message: String, timeout: bool, connect: bool, request: bool) -> RemoteError {
    let error = RemoteError::new(message);
    if timeout {
        error.with_code("ETIMEDOUT")
    } else if connect {
        error.with_code("ECONNREFUSED")
    } else if request {
        error.with_code("NETWORK_ERROR")
    } else {
        error
    }
}

// PostgREST pins its own reqwest, so its error and response types are only
// reachable through method calls.
macro_rules! transport_error {
    ($e:expr) => {{
        let e = $e;
        classify_transport(e.to_string(), e.is_timeout(), e.is_connect(), e.is_request())
    }};
}

/// Sends a request and reads the reply as `(status, body)`.
macro_rules! execute {
    ($request:expr) => {{
        match $request.await {
            Ok(response) => {
                let status = response.status().as_u16();
                response
                    .text()
                    .await
                    .map(|body| (status, body))
                    .map_err(|e| transport_error!(e))
            }
            Err(e) => Err(transport_error!(e)),
        }
    }};
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

#[derive(Debug, thiserror::Error)]
#[error("environment variable {0} is not set")]
pub struct MissingEnv(pub &'static str);

impl SupabaseConfig {
    /// Reads `SUPABASE_URL` and `SUPABASE_ANON_KEY` from the process environment.
    pub fn from_env() -> Result<Self, MissingEnv> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MissingEnv> {
        let var = |name: &'static str| lookup(name).ok_or(MissingEnv(name));
        Ok(Self {
            supabase_url: var("SUPABASE_URL")?.trim_end_matches('/').to_string(),
            supabase_anon_key: var("SUPABASE_ANON_KEY")?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SupabaseBackend {
    config: SupabaseConfig,
    http: reqwest::Client,
}

impl SupabaseBackend {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn rest(&self, bearer: &str) -> Postgrest {
        let SupabaseConfig {
            supabase_url,
            supabase_anon_key,
        } = &self.config;
        Postgrest::new(format!("{supabase_url}/rest/v1"))
            .insert_header("apikey", supabase_anon_key)
            .insert_header("Authorization", format!("Bearer {bearer}"))
    }

    /// Calls an edge function and decodes its JSON reply.
    ///
    /// `Ok(None)` for 404 and 410, which the share functions use for unknown
    /// and dead links.
    async fn invoke<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        function: &str,
        bearer: &str,
        body: &Req,
    ) -> Result<Option<Resp>, RemoteError> {
        let SupabaseConfig {
            supabase_url,
            supabase_anon_key,
        } = &self.config;

        let request = self
            .http
            .post(format!("{supabase_url}/functions/v1/{function}"))
            .header("apikey", supabase_anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .json(body)
            .send();

        let (status, body) = tokio::time::timeout(FUNCTION_TIMEOUT, async {
            execute!(request)
        })
        .await
        .map_err(|_| {
            RemoteError::new(format!("{function} request timed out")).with_code("ETIMEDOUT")
        })??;

        if status == 404 || status == 410 {
            log::debug!("{function} answered {status}");
            return Ok(None);
        }
        if !is_success(status) {
            return Err(function_error(status, &body));
        }
        decode(status, &body).map(Some)
    }
}

type Reply = Result<(u16, String), RemoteError>;

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// PostgREST error body.
#[derive(serde::Deserialize)]
struct RestErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Edge function error body.
#[derive(serde::Deserialize)]
struct FunctionErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

fn rest_error(status: u16, body: &str) -> RemoteError {
    let error = match serde_json::from_str::<RestErrorBody>(body) {
        Ok(RestErrorBody { message, code }) => {
            let error = RemoteError::new(message);
            match code {
                Some(code) => error.with_code(code),
                None => error,
            }
        }
        Err(_) => RemoteError::new(format!("request failed with status {status}: {body}")),
    };
    error.with_status(status)
}

fn function_error(status: u16, body: &str) -> RemoteError {
    let message = match serde_json::from_str::<FunctionErrorBody>(body) {
        Ok(FunctionErrorBody {
            error,
            details: Some(details),
        }) => format!("{error}: {details}"),
        Ok(FunctionErrorBody { error, .. }) => error,
        Err(_) => format!("function failed with status {status}: {body}"),
    };
    RemoteError::new(message).with_status(status)
}

fn decode<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, RemoteError> {
    serde_json::from_str(body).map_err(|e| {
        RemoteError::new(format!("unexpected reply: {e}")).with_status(status)
    })
}

fn rows<T: DeserializeOwned>(reply: Reply) -> Result<Vec<T>, RemoteError> {
    let (status, body) = reply?;
    if !is_success(status) {
        return Err(rest_error(status, &body));
    }
    decode(status, &body)
}

/// Number of rows in a `return=representation` reply.
fn affected(reply: Reply) -> Result<usize, RemoteError> {
    rows::<serde_json::Value>(reply).map(|r| r.len())
}

/// Microsecond RFC 3339 in UTC, safe to put in a query string.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `or` filter for rows where `column` is null or earlier than `at`.
fn unset_or_before(column: &str, at: DateTime<Utc>) -> String {
    format!("{column}.is.null,{column}.lt.{}", timestamp(at))
}

fn encode<T: Serialize>(value: &T) -> Result<String, RemoteError> {
    serde_json::to_string(value)
        .map_err(|e| RemoteError::new(format!("could not encode request: {e}")))
}

impl RemoteBackend for SupabaseBackend {
    async fn select_sets(&self, session: &Session) -> Result<Vec<WordSetRow>, RemoteError> {
        rows(execute!(
            self.rest(&session.access_token)
                .from(WORD_SETS)
                .select(SET_WITH_PAIRS)
                .eq("user_id", &session.user_id)
                .order("created_at.desc")
                .execute()
        ))
    }

    async fn select_set(
        &self,
        session: &Session,
        set_id: &str,
    ) -> Result<Option<WordSetRow>, RemoteError> {
        let found: Vec<WordSetRow> = rows(execute!(
            self.rest(&session.access_token)
                .from(WORD_SETS)
                .select(SET_WITH_PAIRS)
                .eq("id", set_id)
                .eq("user_id", &session.user_id)
                .limit(1)
                .execute()
        ))?;
        Ok(found.into_iter().next())
    }

    async fn insert_set(
        &self,
        session: &Session,
        row: &NewWordSetRow,
    ) -> Result<WordSetRow, RemoteError> {
        let inserted: Vec<WordSetRow> = rows(execute!(
            self.rest(&session.access_token)
                .from(WORD_SETS)
                .insert(encode(row)?)
                .execute()
        ))?;
        inserted
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::new("insert into word_sets returned no row"))
    }

    async fn update_set(
        &self,
        session: &Session,
        set_id: &str,
        update: &SetRowUpdate,
    ) -> Result<usize, RemoteError> {
        let matched = affected(execute!(
            self.rest(&session.access_token)
                .from(WORD_SETS)
                .eq("id", set_id)
                .eq("user_id", &session.user_id)
                .update(encode(update)?)
                .execute()
        ))?;
        if matched == 0 {
            return Ok(0);
        }

        let now = Utc::now();
        affected(execute!(
            self.rest(&session.access_token)
                .from(WORD_SETS)
                .eq("id", set_id)
                .eq("user_id", &session.user_id)
                .lt("updated_at", timestamp(now))
                .update(json!({ "updated_at": now }).to_string())
                .execute()
        ))?;
        Ok(matched)
    }

    async fn touch_set(
        &self,
        session: &Session,
        set_id: &str,
        last_practiced: DateTime<Utc>,
    ) -> Result<usize, RemoteError> {
        let moved = affected(execute!(
            self.rest(&session.access_token)
                .from(WORD_SETS)
                .eq("id", set_id)
                .eq("user_id", &session.user_id)
                .or(unset_or_before("last_practiced", last_practiced))
                .update(json!({ "last_practiced": last_practiced }).to_string())
                .execute()
        ))?;
        if moved > 0 {
            return Ok(moved);
        }
        // Nothing moved: the set is missing or was practised later already.
        affected(execute!(
            self.rest(&session.access_token)
                .from(WORD_SETS)
                .select("id")
                .eq("id", set_id)
                .eq("user_id", &session.user_id)
                .execute()
        ))
    }

    async fn delete_set(&self, session: &Session, set_id: &str) -> Result<usize, RemoteError> {
        affected(execute!(
            self.rest(&session.access_token)
                .from(WORD_SETS)
                .eq("id", set_id)
                .eq("user_id", &session.user_id)
                .delete()
                .execute()
        ))
    }

    async fn insert_pairs(
        &self,
        session: &Session,
        new_rows: &[NewWordPairRow],
    ) -> Result<Vec<WordPairRow>, RemoteError> {
        rows(execute!(
            self.rest(&session.access_token)
                .from(WORD_PAIRS)
                .insert(encode(&new_rows)?)
                .execute()
        ))
    }

    async fn delete_pairs(&self, session: &Session, set_id: &str) -> Result<(), RemoteError> {
        affected(execute!(
            self.rest(&session.access_token)
                .from(WORD_PAIRS)
                .eq("set_id", set_id)
                .delete()
                .execute()
        ))
        .map(|_| ())
    }

    async fn insert_practice_session(
        &self,
        session: &Session,
        row: &NewPracticeSessionRow,
    ) -> Result<(), RemoteError> {
        affected(execute!(
            self.rest(&session.access_token)
                .from(PRACTICE_SESSIONS)
                .insert(encode(row)?)
                .execute()
        ))
        .map(|_| ())
    }

    async fn select_practice_sessions(
        &self,
        session: &Session,
    ) -> Result<Vec<PracticeSessionRow>, RemoteError> {
        rows(execute!(
            self.rest(&session.access_token)
                .from(PRACTICE_SESSIONS)
                .select("set_id,game_mode")
                .eq("user_id", &session.user_id)
                .execute()
        ))
    }

    async fn generate_share_link(
        &self,
        session: &Session,
        request: &GenerateShareLinkRequest,
    ) -> Result<ShareMetadata, RemoteError> {
        self.invoke("generate-share-link", &session.access_token, request)
            .await?
            .ok_or_else(|| RemoteError::new("Set not found").with_status(404))
    }

    async fn get_shared_set(
        &self,
        share_code: &str,
    ) -> Result<Option<SharedSetDetails>, RemoteError> {
        let request = GetSharedSetRequest {
            share_code: share_code.to_string(),
        };
        self.invoke("get-shared-set", &self.config.supabase_anon_key, &request)
            .await
    }

    async fn copy_shared_set(
        &self,
        session: &Session,
        request: &CopySharedSetRequest,
    ) -> Result<CopySetResponse, RemoteError> {
        self.invoke("copy-shared-set", &session.access_token, request)
            .await?
            .ok_or_else(|| {
                RemoteError::new("Share link not found or no longer active").with_status(404)
            })
    }

    async fn deactivate_shares(&self, session: &Session, set_id: &str) -> Result<(), RemoteError> {
        affected(execute!(
            self.rest(&session.access_token)
                .from(SHARED_SETS)
                .eq("set_id", set_id)
                .eq("created_by", &session.user_id)
                .update(json!({ "is_active": false }).to_string())
                .execute()
        ))
        .map(|_| ())
    }
}
