//! Remote store abstraction for `LeadDesk`.
//!
//! This crate defines the schema of the hosted store (lead rows, profile rows,
//! identity sessions) and the three seams the rest of `LeadDesk` talks
//! through: [`LeadStore`], [`ProfileStore`] and [`IdentityProvider`]. It knows
//! nothing about the admin workflow built on top of them.
//!
//! Three implementations are provided:
//!
//! - [`SupabaseBackend`]: PostgREST + GoTrue over HTTPS (feature `rest-backend`)
//! - [`PostgresBackend`]: direct `PostgreSQL` access for self-hosted operators (feature `postgres-backend`)
//! - [`MemoryBackend`]: in-memory store and identity provider with the row
//!   policy enforced, for tests and local demos

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;
mod records;
#[cfg(feature = "rest-backend")]
mod rest_backend;

pub use error::StoreError;
pub use memory::MemoryBackend;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresBackend;
pub use records::{
    ADMIN_ROLE, DEFAULT_ROLE, Lead, LeadId, LeadPatch, LeadStatus, NewLead, NewProfile, Profile,
    Session, SessionUser, Variant,
};
#[cfg(feature = "rest-backend")]
pub use rest_backend::{SupabaseBackend, SupabaseConfig};

use tokio::sync::watch;
use uuid::Uuid;

/// Hard ceiling on the number of leads a single listing returns.
pub const LEAD_LIST_LIMIT: usize = 200;

/// Access to the `leads` table.
///
/// Every call is one round trip; implementations never retry. Access policy
/// is enforced by the store itself, independent of any client-side gating.
#[async_trait::async_trait]
pub trait LeadStore: Send + Sync + 'static {
    /// Insert one lead row.
    ///
    /// # Errors
    ///
    /// Returns the store-reported failure.
    async fn insert_lead(&self, lead: &NewLead) -> Result<(), StoreError>;

    /// Select up to `limit` leads ordered by `created_at` descending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Denied`] when the caller may not read leads.
    async fn select_leads(&self, limit: usize) -> Result<Vec<Lead>, StoreError>;

    /// Apply `patch` to the row matching `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Denied`] when the caller may not modify leads.
    async fn update_lead(&self, id: LeadId, patch: &LeadPatch) -> Result<(), StoreError>;

    /// Remove the row matching `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Denied`] when the caller may not delete leads.
    async fn delete_lead(&self, id: LeadId) -> Result<(), StoreError>;

    /// Remove every row whose id is in `ids`, as a single request. The batch
    /// either succeeds or fails as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Denied`] when the caller may not delete leads.
    async fn delete_leads(&self, ids: &[LeadId]) -> Result<(), StoreError>;
}

/// Access to the `profiles` table.
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync + 'static {
    /// Read the profile with the given id, if it exists and is visible.
    ///
    /// # Errors
    ///
    /// Returns the store-reported failure.
    async fn select_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError>;

    /// Insert a profile. The role column is left to its default.
    ///
    /// # Errors
    ///
    /// Returns the store-reported failure (e.g. a duplicate id).
    async fn insert_profile(&self, profile: &NewProfile) -> Result<(), StoreError>;
}

/// Session source for a signed-in identity.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// The session currently held, if any.
    ///
    /// # Errors
    ///
    /// Returns the provider-reported failure.
    async fn current_session(&self) -> Result<Option<Session>, StoreError>;

    /// Build the URL that starts an OAuth sign-in with `provider`, returning
    /// to `redirect_to` afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be built.
    fn sign_in_url(&self, provider: &str, redirect_to: &str) -> Result<String, StoreError>;

    /// Finish a sign-in from the redirect URL (tokens in the fragment) or a
    /// bare access token, and publish the resulting session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Denied`] if the token is not accepted.
    async fn complete_sign_in(&self, callback: &str) -> Result<Session, StoreError>;

    /// End the current session and publish `None`.
    ///
    /// # Errors
    ///
    /// Returns the provider-reported failure. The local session is cleared
    /// even when the provider call fails.
    async fn sign_out(&self) -> Result<(), StoreError>;

    /// Subscribe to session changes.
    fn subscribe(&self) -> watch::Receiver<Option<Session>>;
}

/// Pull the access token out of an OAuth redirect URL, or accept the input
/// as a bare token when it carries no parameters.
pub(crate) fn access_token_from_callback(callback: &str) -> Option<String> {
    let callback = callback.trim();
    if callback.is_empty() {
        return None;
    }
    if !callback.contains("access_token=") {
        return (!callback.contains(char::is_whitespace)).then(|| callback.to_owned());
    }
    let params = callback
        .rsplit_once('#')
        .or_else(|| callback.rsplit_once('?'))
        .map_or(callback, |(_, params)| params);
    params
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "access_token")
        .map(|(_, value)| value.to_owned())
        .filter(|value| !value.is_empty())
}
