//! Bridge from identity sessions to the admin workflow.
//!
//! A session change resolves the linked profile (provisioning it on first
//! sign-in) and moves the [`AdminController`] through its access gate:
//! no session tears the workflow down, a session enters it with the role the
//! profile carries.

use std::sync::Arc;

use leaddesk_store::{
    DEFAULT_ROLE, IdentityProvider, NewProfile, Profile, ProfileStore, Session,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::controller::{Access, AdminController, LoadOutcome, SessionContext};
use crate::error::AuthError;

/// OAuth provider used for sign-in.
pub const SIGN_IN_PROVIDER: &str = "google";

/// Read the profile linked to `session`, inserting one if it does not exist.
///
/// A freshly provisioned profile carries no role in the store and is treated
/// as [`DEFAULT_ROLE`] locally.
///
/// # Errors
///
/// Returns [`AuthError::Profile`] if the read or the insert fails.
pub async fn resolve_profile(
    profiles: &dyn ProfileStore,
    session: &Session,
) -> Result<Profile, AuthError> {
    let user = &session.user;
    if let Some(profile) = profiles
        .select_profile(user.id)
        .await
        .map_err(AuthError::Profile)?
    {
        return Ok(profile);
    }

    let new = NewProfile {
        id: user.id,
        email: user.email.clone(),
        full_name: user.full_name(),
        avatar_url: user.avatar_url(),
    };
    profiles
        .insert_profile(&new)
        .await
        .map_err(AuthError::Profile)?;
    info!(user_id = %user.id, "profile provisioned");

    Ok(Profile {
        id: new.id,
        role: Some(DEFAULT_ROLE.to_owned()),
        full_name: new.full_name,
        email: new.email,
        avatar_url: new.avatar_url,
    })
}

/// Where a session change left the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    SignedOut,
    /// The session was signed out or replaced while its profile was being
    /// resolved. Nothing was entered.
    Superseded,
    Entered {
        profile: Profile,
        access: Access,
        load: LoadOutcome,
    },
}

/// Follows the identity provider and keeps the controller in step.
pub struct AuthBridge {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    controller: Arc<AdminController>,
}

impl std::fmt::Debug for AuthBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBridge")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl AuthBridge {
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        controller: Arc<AdminController>,
    ) -> Self {
        Self {
            identity,
            profiles,
            controller,
        }
    }

    #[must_use]
    pub const fn controller(&self) -> &Arc<AdminController> {
        &self.controller
    }

    /// Apply one session value to the controller.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Profile`] if the profile cannot be resolved (the
    /// workflow is torn down unless a newer session took over), or the first
    /// listing failure for an admin.
    pub async fn sync(&self, session: Option<Session>) -> Result<SyncOutcome, AuthError> {
        let Some(session) = session else {
            self.controller.teardown().await;
            return Ok(SyncOutcome::SignedOut);
        };

        let epoch = self.controller.epoch().await;
        let profile = match resolve_profile(self.profiles.as_ref(), &session).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(error = %err, "profile resolution failed");
                self.controller.teardown_if_current(epoch).await;
                return Err(err);
            }
        };

        let ctx = SessionContext { session, profile };
        let access = ctx.access();
        let load = self.controller.enter_if_current(epoch, &ctx).await?;
        if load == LoadOutcome::Discarded {
            return Ok(SyncOutcome::Superseded);
        }
        Ok(SyncOutcome::Entered {
            profile: ctx.profile,
            access,
            load,
        })
    }

    /// Sync with whatever session the provider currently holds.
    ///
    /// # Errors
    ///
    /// See [`AuthBridge::sync`].
    pub async fn start(&self) -> Result<SyncOutcome, AuthError> {
        let session = self.identity.current_session().await?;
        self.sync(session).await
    }

    /// Follow session changes until the provider goes away. Failures are
    /// logged and the loop keeps going.
    pub async fn run(&self) {
        self.follow(self.identity.subscribe()).await;
    }

    /// Apply every change published on `sessions`.
    pub async fn follow(&self, mut sessions: watch::Receiver<Option<Session>>) {
        while sessions.changed().await.is_ok() {
            let session = sessions.borrow_and_update().clone();
            if let Err(err) = self.sync(session).await {
                warn!(error = %err, "session change could not be applied");
            }
        }
    }

    /// URL that starts the OAuth sign-in and returns to `redirect_to`.
    ///
    /// # Errors
    ///
    /// Returns the provider failure.
    pub fn sign_in_url(&self, redirect_to: &str) -> Result<String, AuthError> {
        Ok(self.identity.sign_in_url(SIGN_IN_PROVIDER, redirect_to)?)
    }

    /// Finish a sign-in from the OAuth callback and enter the workflow.
    ///
    /// # Errors
    ///
    /// Returns the provider failure, or see [`AuthBridge::sync`].
    pub async fn complete_sign_in(&self, callback: &str) -> Result<SyncOutcome, AuthError> {
        let session = self.identity.complete_sign_in(callback).await?;
        info!(user_id = %session.user.id, "signed in");
        self.sync(Some(session)).await
    }

    /// Sign out. The workflow is torn down even when the provider call fails.
    ///
    /// # Errors
    ///
    /// Returns the provider failure.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.identity.sign_out().await;
        self.controller.teardown().await;
        match result {
            Ok(()) => {
                info!("signed out");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "sign-out failed");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use leaddesk_store::{ADMIN_ROLE, LeadId, MemoryBackend, StoreError, Variant};
    use tokio::sync::Notify;

    use super::*;
    use crate::controller::LoadState;
    use crate::repository::{LeadInput, LeadRepository};

    /// Profile store whose first lookup parks until `gate` is notified.
    struct GatedProfiles {
        inner: MemoryBackend,
        parked: AtomicBool,
        gate: Notify,
    }

    #[async_trait::async_trait]
    impl ProfileStore for GatedProfiles {
        async fn select_profile(&self, id: LeadId) -> Result<Option<Profile>, StoreError> {
            if !self.parked.swap(true, Ordering::SeqCst) {
                self.gate.notified().await;
            }
            self.inner.select_profile(id).await
        }

        async fn insert_profile(&self, profile: &NewProfile) -> Result<(), StoreError> {
            self.inner.insert_profile(profile).await
        }
    }

    fn bridge(backend: &MemoryBackend) -> AuthBridge {
        let controller = Arc::new(AdminController::new(LeadRepository::new(Arc::new(
            backend.clone(),
        ))));
        AuthBridge::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            controller,
        )
    }

    async fn submit(backend: &MemoryBackend, name: &str) {
        LeadRepository::new(Arc::new(backend.clone()))
            .submit(
                &LeadInput {
                    name: name.to_owned(),
                    email: "lead@x.com".to_owned(),
                    ..Default::default()
                },
                Variant::Base,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_sign_in_provisions_user_profile() {
        let backend = MemoryBackend::new();
        let session = backend.sign_in_as("ann@x.com", Some("Ann")).await;
        let bridge = bridge(&backend);

        let outcome = bridge.start().await.unwrap();
        let SyncOutcome::Entered {
            profile,
            access,
            load,
        } = outcome
        else {
            panic!("expected a signed-in outcome");
        };
        assert_eq!(profile.role(), DEFAULT_ROLE);
        assert_eq!(profile.full_name.as_deref(), Some("Ann"));
        assert_eq!(access, Access::Member);
        assert_eq!(load, LoadOutcome::NotAdmin);

        let stored = backend.profile(session.user.id).await.unwrap();
        assert_eq!(stored.role, None);
        assert_eq!(stored.email.as_deref(), Some("ann@x.com"));
    }

    #[tokio::test]
    async fn admin_profile_enters_and_loads() {
        let backend = MemoryBackend::new();
        submit(&backend, "Ann").await;
        let session = backend.sign_in_as("boss@x.com", None).await;
        backend.set_role(session.user.id, ADMIN_ROLE).await;
        let bridge = bridge(&backend);

        let outcome = bridge.sync(Some(session)).await.unwrap();
        assert!(matches!(
            outcome,
            SyncOutcome::Entered {
                access: Access::Admin,
                load: LoadOutcome::Applied { count: 1 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn role_loss_clears_the_collection() {
        let backend = MemoryBackend::new();
        submit(&backend, "Ann").await;
        let session = backend.sign_in_as("boss@x.com", None).await;
        backend.set_role(session.user.id, ADMIN_ROLE).await;
        let bridge = bridge(&backend);
        bridge.sync(Some(session.clone())).await.unwrap();
        assert_eq!(bridge.controller().snapshot().await.showing(), 1);

        backend.set_role(session.user.id, DEFAULT_ROLE).await;
        bridge.sync(Some(session)).await.unwrap();
        let view = bridge.controller().snapshot().await;
        assert_eq!(view.access, Access::Member);
        assert!(view.leads.is_empty());
    }

    #[tokio::test]
    async fn profile_failure_is_surfaced_and_tears_down() {
        let backend = MemoryBackend::new();
        let session = backend.sign_in_as("ann@x.com", None).await;
        backend
            .fail_next(StoreError::Network("connection refused".to_owned()))
            .await;
        let bridge = bridge(&backend);

        let err = bridge.sync(Some(session)).await.unwrap_err();
        assert!(matches!(err, AuthError::Profile(StoreError::Network(_))));
        assert_eq!(bridge.controller().access().await, Access::Anonymous);
    }

    #[tokio::test]
    async fn sign_out_during_profile_lookup_stays_signed_out() {
        let backend = MemoryBackend::new();
        submit(&backend, "Ann").await;
        let session = backend.sign_in_as("boss@x.com", None).await;
        backend.set_role(session.user.id, ADMIN_ROLE).await;

        let profiles = Arc::new(GatedProfiles {
            inner: backend.clone(),
            parked: AtomicBool::new(false),
            gate: Notify::new(),
        });
        let controller = Arc::new(AdminController::new(LeadRepository::new(Arc::new(
            backend.clone(),
        ))));
        let bridge = Arc::new(AuthBridge::new(
            Arc::new(backend.clone()),
            profiles.clone(),
            controller,
        ));

        let pending = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.sync(Some(session)).await }
        });
        while !profiles.parked.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        bridge.sign_out().await.unwrap();
        profiles.gate.notify_one();

        assert_eq!(pending.await.unwrap(), Ok(SyncOutcome::Superseded));
        let view = bridge.controller().snapshot().await;
        assert_eq!(view.access, Access::Anonymous);
        assert_eq!(view.load, LoadState::Idle);
        assert!(view.leads.is_empty());
    }

    #[tokio::test]
    async fn sign_in_url_uses_google() {
        let backend = MemoryBackend::new();
        let url = bridge(&backend).sign_in_url("http://localhost/").unwrap();
        assert!(url.contains("provider=google"));
    }

    #[tokio::test]
    async fn complete_sign_in_and_sign_out() {
        let backend = MemoryBackend::new();
        let session = backend.sign_in_as("ann@x.com", None).await;
        backend.sign_out().await.unwrap();
        let bridge = bridge(&backend);

        let callback = format!("http://localhost/#access_token={}", session.access_token);
        let outcome = bridge.complete_sign_in(&callback).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Entered { .. }));

        bridge.sign_out().await.unwrap();
        assert_eq!(bridge.controller().access().await, Access::Anonymous);
        assert_eq!(backend.current_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_callback_is_denied() {
        let backend = MemoryBackend::new();
        let err = bridge(&backend)
            .complete_sign_in("http://localhost/#error=access_denied")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Provider(StoreError::Denied(_))));
    }

    #[tokio::test]
    async fn run_follows_session_changes() {
        let backend = MemoryBackend::new();
        let bridge = Arc::new(bridge(&backend));
        let sessions = backend.subscribe();
        let task = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.follow(sessions).await }
        });

        backend.sign_in_as("ann@x.com", None).await;
        wait_for(&bridge, Access::Member).await;

        backend.sign_out().await.unwrap();
        wait_for(&bridge, Access::Anonymous).await;
        task.abort();
    }

    async fn wait_for(bridge: &AuthBridge, access: Access) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while bridge.controller().access().await != access {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
