//! Supabase backend: PostgREST for the tables, GoTrue for sessions.
//!
//! Every request carries the project's public `apikey` and, when a session is
//! held, the user's access token as the bearer credential so the store's row
//! policy sees the signed-in identity. Requests are never retried.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::records::{Lead, LeadId, LeadPatch, NewLead, NewProfile, Profile, Session, SessionUser};
use crate::{IdentityProvider, LeadStore, ProfileStore, StoreError, access_token_from_callback};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const LEAD_COLUMNS: &str = "id,created_at,name,email,telegram,seats,company,goal,status,notes,source";
const PROFILE_COLUMNS: &str = "id,role,full_name,email,avatar_url";

/// Configuration for the Supabase backend.
#[derive(Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Public anonymous API key.
    pub anon_key: String,
    /// Request timeout. Default: 10 seconds.
    pub timeout: Duration,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &"[redacted]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Supabase-backed lead store, profile store and identity provider.
pub struct SupabaseBackend {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
    session: watch::Sender<Option<Session>>,
}

impl std::fmt::Debug for SupabaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl SupabaseBackend {
    /// Build a backend. Empty fields fall back to `SUPABASE_URL` /
    /// `LEADDESK_SUPABASE_URL` and `SUPABASE_ANON_KEY` /
    /// `LEADDESK_SUPABASE_ANON_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL or key is missing, or the
    /// HTTP client cannot be built.
    #[allow(clippy::needless_pass_by_value)]
    pub fn with_config(cfg: SupabaseConfig) -> Result<Self, StoreError> {
        let base_url = first_non_empty(&[
            &cfg.url,
            &std::env::var("LEADDESK_SUPABASE_URL").unwrap_or_default(),
            &std::env::var("SUPABASE_URL").unwrap_or_default(),
        ])
        .trim_end_matches('/')
        .to_owned();
        if base_url.is_empty() {
            return Err(StoreError::Config(
                "missing store url: set SUPABASE_URL or pass --supabase-url".to_owned(),
            ));
        }

        let anon_key = first_non_empty(&[
            &cfg.anon_key,
            &std::env::var("LEADDESK_SUPABASE_ANON_KEY").unwrap_or_default(),
            &std::env::var("SUPABASE_ANON_KEY").unwrap_or_default(),
        ]);
        if anon_key.is_empty() {
            return Err(StoreError::Config(
                "missing anon key: set SUPABASE_ANON_KEY or pass --supabase-anon-key".to_owned(),
            ));
        }

        let timeout = if cfg.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            cfg.timeout
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("leaddesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Config(format!("http client: {e}")))?;

        let (session, _rx) = watch::channel(None);

        Ok(Self {
            base_url,
            anon_key,
            client,
            session,
        })
    }

    /// Adopt a session persisted by an earlier process and publish it. The
    /// token is not checked here; the store rejects it on first use if it
    /// has expired.
    pub fn restore_session(&self, session: Session) {
        self.session.send_replace(Some(session));
    }

    // --- Private ---

    fn bearer(&self) -> String {
        self.session
            .borrow()
            .as_ref()
            .map_or_else(|| self.anon_key.clone(), |s| s.access_token.clone())
    }

    async fn rest(
        &self,
        method: Method,
        table: &str,
        params: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<String, StoreError> {
        let url = rest_url(&self.base_url, table, params);
        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.bearer()));

        if method != Method::GET {
            req = req.header("Prefer", "return=minimal");
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        debug!(%method, table, "store request");
        send(req).await
    }

    async fn fetch_user(&self, access_token: &str) -> Result<SessionUser, StoreError> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let req = self
            .client
            .get(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {access_token}"));
        let text = send(req).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait::async_trait]
impl LeadStore for SupabaseBackend {
    async fn insert_lead(&self, lead: &NewLead) -> Result<(), StoreError> {
        let body = serde_json::to_value(lead)?;
        self.rest(Method::POST, "leads", &[], Some(body)).await?;
        Ok(())
    }

    async fn select_leads(&self, limit: usize) -> Result<Vec<Lead>, StoreError> {
        let params = [
            ("select", LEAD_COLUMNS.to_owned()),
            ("order", "created_at.desc".to_owned()),
            ("limit", limit.to_string()),
        ];
        let text = self.rest(Method::GET, "leads", &params, None).await?;
        decode_leads(&text)
    }

    async fn update_lead(&self, id: LeadId, patch: &LeadPatch) -> Result<(), StoreError> {
        let body = serde_json::to_value(patch)?;
        self.rest(Method::PATCH, "leads", &[("id", format!("eq.{id}"))], Some(body))
            .await?;
        Ok(())
    }

    async fn delete_lead(&self, id: LeadId) -> Result<(), StoreError> {
        self.rest(Method::DELETE, "leads", &[("id", format!("eq.{id}"))], None)
            .await?;
        Ok(())
    }

    async fn delete_leads(&self, ids: &[LeadId]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.rest(Method::DELETE, "leads", &[("id", in_filter(ids))], None)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProfileStore for SupabaseBackend {
    async fn select_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        let params = [
            ("select", PROFILE_COLUMNS.to_owned()),
            ("id", format!("eq.{id}")),
        ];
        let text = self.rest(Method::GET, "profiles", &params, None).await?;
        let rows: Vec<Profile> = serde_json::from_str(&text)?;
        Ok(rows.into_iter().next())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<(), StoreError> {
        let body = serde_json::to_value(profile)?;
        self.rest(Method::POST, "profiles", &[], Some(body)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IdentityProvider for SupabaseBackend {
    async fn current_session(&self) -> Result<Option<Session>, StoreError> {
        Ok(self.session.borrow().clone())
    }

    fn sign_in_url(&self, provider: &str, redirect_to: &str) -> Result<String, StoreError> {
        if provider.is_empty() {
            return Err(StoreError::Config("missing sign-in provider".to_owned()));
        }
        Ok(format!(
            "{}/auth/v1/authorize?provider={}&redirect_to={}",
            self.base_url,
            urlencoding::encode(provider),
            urlencoding::encode(redirect_to)
        ))
    }

    async fn complete_sign_in(&self, callback: &str) -> Result<Session, StoreError> {
        let access_token = access_token_from_callback(callback)
            .ok_or_else(|| StoreError::Denied("missing access token".to_owned()))?;
        let user = self.fetch_user(&access_token).await?;

        let session = Session {
            access_token,
            refresh_token: callback_param(callback, "refresh_token"),
            expires_at: callback_param(callback, "expires_at").and_then(|v| v.parse().ok()),
            user,
        };
        self.session.send_replace(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        let Some(previous) = self.session.send_replace(None) else {
            return Ok(());
        };
        let url = format!("{}/auth/v1/logout", self.base_url);
        let req = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", previous.access_token));
        send(req).await?;
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<String, StoreError> {
    let resp = req.send().await.map_err(|e| {
        if e.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Network(e.to_string())
        }
    })?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| StoreError::Network(e.to_string()))?;

    if status.is_success() {
        return Ok(text);
    }

    let err = error_from_response(status, &text);
    warn!(status = status.as_u16(), error = %err, "store rejected request");
    Err(err)
}

fn error_from_response(status: StatusCode, body: &str) -> StoreError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.msg).or(b.error_description).or(b.error))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        StoreError::Denied(message)
    } else {
        StoreError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Decode a listing, skipping rows that do not match the schema (e.g. a
/// status outside the three known values).
fn decode_leads(text: &str) -> Result<Vec<Lead>, StoreError> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(text)?;
    let mut leads = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.get("id").cloned();
        match serde_json::from_value::<Lead>(row) {
            Ok(lead) => leads.push(lead),
            Err(e) => warn!(id = ?id, error = %e, "skipping malformed lead row"),
        }
    }
    Ok(leads)
}

fn rest_url(base_url: &str, table: &str, params: &[(&str, String)]) -> String {
    let mut url = format!("{base_url}/rest/v1/{table}");
    for (i, (key, value)) in params.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

fn in_filter(ids: &[LeadId]) -> String {
    let list: Vec<String> = ids.iter().map(ToString::to_string).collect();
    format!("in.({})", list.join(","))
}

fn callback_param(callback: &str, key: &str) -> Option<String> {
    let (_, params) = callback.rsplit_once('#').or_else(|| callback.rsplit_once('?'))?;
    params
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_owned())
}

fn first_non_empty(vals: &[&str]) -> String {
    for v in vals {
        if !v.is_empty() {
            return (*v).to_owned();
        }
    }
    String::new()
}
