//! In-memory store and identity provider.
//!
//! Holds leads, profiles and known users behind a `RwLock` and applies the
//! same row policy the hosted store enforces:
//!
//! - anyone may insert a lead;
//! - only a signed-in user whose profile role is `admin` may select, update
//!   or delete leads;
//! - a profile may only be read or inserted by its owner, and an insert never
//!   sets a role.
//!
//! Roles can be changed out-of-band with [`MemoryBackend::set_role`], and the
//! next store call can be made to fail with [`MemoryBackend::fail_next`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::records::{
    ADMIN_ROLE, Lead, LeadId, LeadPatch, NewLead, NewProfile, Profile, Session, SessionUser,
};
use crate::{IdentityProvider, LeadStore, ProfileStore, StoreError, access_token_from_callback};

#[derive(Debug, Default)]
struct MemoryState {
    leads: Vec<Lead>,
    profiles: HashMap<Uuid, Profile>,
    /// Known users keyed by access token.
    users: HashMap<String, SessionUser>,
    last_created_at: Option<DateTime<Utc>>,
    pending_failure: Option<StoreError>,
}

/// An in-memory backend implementing all three store traits.
///
/// Clones share state, so one clone can act as the "out-of-band" operator
/// while another is handed to the workflow.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
    session: Arc<watch::Sender<Option<Session>>>,
}

impl MemoryBackend {
    /// Create an empty backend with nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            session: Arc::new(tx),
        }
    }

    /// Register a user and sign them in, publishing the new session.
    pub async fn sign_in_as(&self, email: &str, full_name: Option<&str>) -> Session {
        let user = SessionUser {
            id: Uuid::new_v4(),
            email: Some(email.to_owned()),
            user_metadata: full_name.map_or(serde_json::Value::Null, |name| {
                serde_json::json!({ "full_name": name })
            }),
        };
        let token = format!("mem_{}", Uuid::new_v4().as_simple());
        self.state
            .write()
            .await
            .users
            .insert(token.clone(), user.clone());

        let session = Session {
            access_token: token,
            refresh_token: None,
            expires_at: None,
            user,
        };
        self.session.send_replace(Some(session.clone()));
        session
    }

    /// Change a user's role out-of-band, creating the profile if needed.
    pub async fn set_role(&self, user_id: Uuid, role: &str) {
        let mut state = self.state.write().await;
        let profile = state.profiles.entry(user_id).or_insert_with(|| Profile {
            id: user_id,
            role: None,
            full_name: None,
            email: None,
            avatar_url: None,
        });
        profile.role = Some(role.to_owned());
    }

    /// Insert a complete lead row, bypassing the policy. For fixtures.
    pub async fn insert_raw(&self, lead: Lead) {
        self.state.write().await.leads.push(lead);
    }

    /// All stored leads, newest first, bypassing the policy.
    pub async fn leads(&self) -> Vec<Lead> {
        let mut leads = self.state.read().await.leads.clone();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        leads
    }

    /// Profile row for `user_id`, bypassing the policy.
    pub async fn profile(&self, user_id: Uuid) -> Option<Profile> {
        self.state.read().await.profiles.get(&user_id).cloned()
    }

    /// Make the next lead or profile call fail with `error`.
    pub async fn fail_next(&self, error: StoreError) {
        self.state.write().await.pending_failure = Some(error);
    }

    fn caller(&self) -> Option<Uuid> {
        self.session.borrow().as_ref().map(|s| s.user.id)
    }

    fn require_admin(&self, state: &MemoryState, table: &str) -> Result<(), StoreError> {
        let caller = self.caller().ok_or(StoreError::NoSession)?;
        let is_admin = state
            .profiles
            .get(&caller)
            .is_some_and(|p| p.role.as_deref() == Some(ADMIN_ROLE));
        if is_admin {
            Ok(())
        } else {
            Err(StoreError::Denied(format!(
                "permission denied for table {table}"
            )))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn take_failure(state: &mut MemoryState) -> Result<(), StoreError> {
    state.pending_failure.take().map_or(Ok(()), Err)
}

#[async_trait::async_trait]
impl LeadStore for MemoryBackend {
    async fn insert_lead(&self, lead: &NewLead) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        take_failure(&mut state)?;

        // Strictly increasing timestamps keep ordering deterministic.
        let now = Utc::now();
        let created_at = match state.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        state.last_created_at = Some(created_at);

        state.leads.push(Lead {
            id: Uuid::new_v4(),
            created_at,
            name: lead.name.clone(),
            email: lead.email.clone(),
            telegram: lead.telegram.clone(),
            seats: lead.seats,
            company: lead.company.clone(),
            goal: lead.goal.clone(),
            status: lead.status,
            notes: None,
            source: Some(lead.source.as_str().to_owned()),
        });
        Ok(())
    }

    async fn select_leads(&self, limit: usize) -> Result<Vec<Lead>, StoreError> {
        let mut state = self.state.write().await;
        take_failure(&mut state)?;
        self.require_admin(&state, "leads")?;

        let mut leads = state.leads.clone();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        leads.truncate(limit);
        Ok(leads)
    }

    async fn update_lead(&self, id: LeadId, patch: &LeadPatch) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        take_failure(&mut state)?;
        self.require_admin(&state, "leads")?;

        if let Some(lead) = state.leads.iter_mut().find(|l| l.id == id) {
            patch.apply_to(lead);
        }
        Ok(())
    }

    async fn delete_lead(&self, id: LeadId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        take_failure(&mut state)?;
        self.require_admin(&state, "leads")?;

        state.leads.retain(|l| l.id != id);
        Ok(())
    }

    async fn delete_leads(&self, ids: &[LeadId]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        take_failure(&mut state)?;
        self.require_admin(&state, "leads")?;

        state.leads.retain(|l| !ids.contains(&l.id));
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProfileStore for MemoryBackend {
    async fn select_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        let mut state = self.state.write().await;
        take_failure(&mut state)?;
        let caller = self.caller().ok_or(StoreError::NoSession)?;

        if caller != id {
            return Ok(None);
        }
        Ok(state.profiles.get(&id).cloned())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        take_failure(&mut state)?;
        let caller = self.caller().ok_or(StoreError::NoSession)?;

        if caller != profile.id {
            return Err(StoreError::Denied(
                "new row violates row-level security policy for table \"profiles\"".to_owned(),
            ));
        }
        if state.profiles.contains_key(&profile.id) {
            return Err(StoreError::Rejected {
                status: 409,
                message: "duplicate key value violates unique constraint \"profiles_pkey\""
                    .to_owned(),
            });
        }

        state.profiles.insert(
            profile.id,
            Profile {
                id: profile.id,
                role: None,
                full_name: profile.full_name.clone(),
                email: profile.email.clone(),
                avatar_url: profile.avatar_url.clone(),
            },
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MemoryBackend {
    async fn current_session(&self) -> Result<Option<Session>, StoreError> {
        Ok(self.session.borrow().clone())
    }

    fn sign_in_url(&self, provider: &str, redirect_to: &str) -> Result<String, StoreError> {
        Ok(format!(
            "memory://authorize?provider={provider}&redirect_to={redirect_to}"
        ))
    }

    async fn complete_sign_in(&self, callback: &str) -> Result<Session, StoreError> {
        let token = access_token_from_callback(callback)
            .ok_or_else(|| StoreError::Denied("missing access token".to_owned()))?;
        let user = self
            .state
            .read()
            .await
            .users
            .get(&token)
            .cloned()
            .ok_or_else(|| StoreError::Denied("invalid JWT".to_owned()))?;

        let session = Session {
            access_token: token,
            refresh_token: None,
            expires_at: None,
            user,
        };
        self.session.send_replace(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        self.session.send_replace(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::records::{LeadStatus, Variant};

    fn new_lead(name: &str) -> NewLead {
        NewLead {
            name: name.to_owned(),
            email: format!("{}@example.com", name.to_lowercase()),
            telegram: None,
            seats: 1,
            company: None,
            goal: None,
            status: LeadStatus::New,
            source: Variant::Base,
        }
    }

    async fn signed_in_admin(backend: &MemoryBackend) -> Session {
        let session = backend.sign_in_as("admin@example.com", Some("Admin")).await;
        backend.set_role(session.user.id, ADMIN_ROLE).await;
        session
    }

    #[tokio::test]
    async fn anonymous_insert_is_allowed() {
        let backend = MemoryBackend::new();
        backend.insert_lead(&new_lead("Ann")).await.unwrap();
        let leads = backend.leads().await;
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].source.as_deref(), Some("base"));
    }

    #[tokio::test]
    async fn anonymous_select_is_denied() {
        let backend = MemoryBackend::new();
        let err = backend.select_leads(10).await.unwrap_err();
        assert_eq!(err, StoreError::NoSession);
    }

    #[tokio::test]
    async fn non_admin_select_is_denied() {
        let backend = MemoryBackend::new();
        backend.sign_in_as("user@example.com", None).await;
        let err = backend.select_leads(10).await.unwrap_err();
        assert!(err.is_denied());
    }

    #[tokio::test]
    async fn admin_select_is_newest_first_and_limited() {
        let backend = MemoryBackend::new();
        for name in ["A", "B", "C"] {
            backend.insert_lead(&new_lead(name)).await.unwrap();
        }
        signed_in_admin(&backend).await;

        let leads = backend.select_leads(2).await.unwrap();
        let names: Vec<_> = leads.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["C", "B"]);
    }

    #[tokio::test]
    async fn bulk_delete_removes_only_given_ids() {
        let backend = MemoryBackend::new();
        for name in ["A", "B", "C"] {
            backend.insert_lead(&new_lead(name)).await.unwrap();
        }
        signed_in_admin(&backend).await;
        let leads = backend.select_leads(10).await.unwrap();

        backend
            .delete_leads(&[leads[0].id, leads[2].id])
            .await
            .unwrap();
        let left = backend.leads().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, leads[1].id);
    }

    #[tokio::test]
    async fn profile_insert_is_owner_only_and_unique() {
        let backend = MemoryBackend::new();
        let session = backend.sign_in_as("ann@example.com", None).await;
        let row = NewProfile {
            id: session.user.id,
            email: Some("ann@example.com".to_owned()),
            full_name: None,
            avatar_url: None,
        };
        backend.insert_profile(&row).await.unwrap();
        let dup = backend.insert_profile(&row).await.unwrap_err();
        assert!(matches!(dup, StoreError::Rejected { status: 409, .. }));

        let other = NewProfile {
            id: Uuid::new_v4(),
            ..row
        };
        assert!(backend.insert_profile(&other).await.unwrap_err().is_denied());
    }

    #[tokio::test]
    async fn fail_next_is_consumed_once() {
        let backend = MemoryBackend::new();
        backend
            .fail_next(StoreError::Rejected {
                status: 500,
                message: "boom".to_owned(),
            })
            .await;
        assert!(backend.insert_lead(&new_lead("A")).await.is_err());
        assert!(backend.insert_lead(&new_lead("A")).await.is_ok());
    }

    #[tokio::test]
    async fn sign_in_round_trip_publishes_sessions() {
        let backend = MemoryBackend::new();
        let mut rx = backend.subscribe();
        let session = backend.sign_in_as("ann@example.com", None).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|s| s.user.id),
            Some(session.user.id)
        );

        backend.sign_out().await.unwrap();
        assert!(backend.current_session().await.unwrap().is_none());

        let callback = format!("http://localhost/#access_token={}", session.access_token);
        let restored = backend.complete_sign_in(&callback).await.unwrap();
        assert_eq!(restored.user.id, session.user.id);
        assert!(backend.complete_sign_in("bogus").await.is_err());
    }
}
