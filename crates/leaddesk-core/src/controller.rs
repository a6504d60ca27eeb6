//! Admin workflow controller.
//!
//! Owns the lead collection and drives the repository on behalf of one
//! signed-in identity. Three lifecycles compose here:
//!
//! 1. **Access gate**: anonymous, member, admin. Only admins may load, change
//!    or delete leads. Leaving the admin state clears every piece of loaded
//!    data synchronously.
//! 2. **Load**: idle, loading, then loaded or errored. Every `enter` and
//!    `teardown` starts a new epoch; a listing that completes under an older
//!    epoch, or after a newer listing was requested, is discarded.
//! 3. **Per-lead mutation**: idle, saving or deleting, idle. A lead that is
//!    busy rejects further saves and deletes until the first one resolves.
//!
//! The state lock is never held across a repository call or a confirmation
//! prompt.

use std::collections::HashMap;

use chrono::NaiveDate;
use leaddesk_store::{LeadId, LeadPatch, LeadStatus, Profile, Session};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::collection::{LeadCollection, LeadCounts, LeadQuery, StatusFilter};
use crate::error::AdminError;
use crate::export::{CsvExport, export_leads};
use crate::repository::{LeadRepository, normalize_optional};
use crate::view::{DashboardView, LeadView};

/// Session and resolved profile of the identity driving the controller.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session: Session,
    pub profile: Profile,
}

impl SessionContext {
    #[must_use]
    pub fn access(&self) -> Access {
        if self.profile.is_admin() {
            Access::Admin
        } else {
            Access::Member
        }
    }
}

/// Position on the access gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    Anonymous,
    /// Signed in without the admin role.
    Member,
    Admin,
}

/// Load lifecycle of the lead listing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Errored(String),
}

/// What a busy lead is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadActivity {
    Saving,
    Deleting,
}

impl std::fmt::Display for LeadActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Saving => "saving",
            Self::Deleting => "deleting",
        })
    }
}

/// Result of a listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The listing replaced the collection.
    Applied { count: usize },
    /// The listing arrived after interest in it ended and was dropped.
    Discarded,
    /// No listing was requested because the identity is not an admin.
    NotAdmin,
}

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { count: usize },
    /// Confirmation was declined; nothing was sent.
    Declined,
    /// Bulk delete with an empty selection.
    NothingSelected,
    /// The session ended or changed while confirmation was pending; nothing
    /// was sent.
    Abandoned,
}

/// A destructive action awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestructiveAction {
    DeleteLead { id: LeadId, name: String },
    DeleteSelected { count: usize },
}

impl std::fmt::Display for DestructiveAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeleteLead { name, .. } => write!(f, "Delete the lead from {name}?"),
            Self::DeleteSelected { count } => write!(f, "Delete {count} selected lead(s)?"),
        }
    }
}

/// Explicit confirmation step for destructive actions.
///
/// Declining leaves state untouched and issues no store call.
pub trait Confirmation: Send + Sync {
    fn confirm(&self, action: &DestructiveAction) -> bool;
}

impl<F> Confirmation for F
where
    F: Fn(&DestructiveAction) -> bool + Send + Sync,
{
    fn confirm(&self, action: &DestructiveAction) -> bool {
        self(action)
    }
}

#[derive(Debug, Default)]
struct AdminState {
    access: Access,
    /// Bumped on every enter and teardown.
    epoch: u64,
    /// Bumped on every listing request within an epoch.
    load_seq: u64,
    load: LoadState,
    collection: LeadCollection,
    query: LeadQuery,
    busy: HashMap<LeadId, LeadActivity>,
    lead_errors: HashMap<LeadId, String>,
    error: Option<String>,
}

impl AdminState {
    fn require_admin(&self) -> Result<(), AdminError> {
        if self.access == Access::Admin {
            Ok(())
        } else {
            Err(AdminError::NotAuthorized)
        }
    }

    fn require_idle(&self, id: LeadId) -> Result<(), AdminError> {
        match self.busy.get(&id) {
            Some(&activity) => Err(AdminError::Busy { id, activity }),
            None => Ok(()),
        }
    }

    /// Drop every piece of loaded data and start a new epoch.
    fn reset(&mut self, access: Access) {
        let epoch = self.epoch.wrapping_add(1);
        *self = Self {
            access,
            epoch,
            ..Self::default()
        };
    }
}

/// Orchestrates the admin workflow over a [`LeadRepository`].
#[derive(Debug)]
pub struct AdminController {
    repository: LeadRepository,
    state: Mutex<AdminState>,
}

impl AdminController {
    /// Create a controller in the anonymous state.
    #[must_use]
    pub fn new(repository: LeadRepository) -> Self {
        Self {
            repository,
            state: Mutex::new(AdminState::default()),
        }
    }

    #[must_use]
    pub const fn repository(&self) -> &LeadRepository {
        &self.repository
    }

    /// Enter the workflow for a resolved session. State from any previous
    /// session is dropped first; an admin triggers exactly one listing.
    ///
    /// # Errors
    ///
    /// Returns the listing failure for an admin. The failure is also kept as
    /// the inline load error.
    pub async fn enter(&self, ctx: &SessionContext) -> Result<LoadOutcome, AdminError> {
        let access = ctx.access();
        self.state.lock().await.reset(access);
        self.entered(ctx, access).await
    }

    /// Like [`AdminController::enter`], but only while the controller is
    /// still in `epoch`. A teardown or another entry since then makes this a
    /// no-op returning [`LoadOutcome::Discarded`].
    ///
    /// # Errors
    ///
    /// See [`AdminController::enter`].
    pub async fn enter_if_current(
        &self,
        epoch: u64,
        ctx: &SessionContext,
    ) -> Result<LoadOutcome, AdminError> {
        let access = ctx.access();
        {
            let mut state = self.state.lock().await;
            if state.epoch != epoch {
                warn!(epoch, current = state.epoch, "discarding stale session entry");
                return Ok(LoadOutcome::Discarded);
            }
            state.reset(access);
        }
        self.entered(ctx, access).await
    }

    async fn entered(
        &self,
        ctx: &SessionContext,
        access: Access,
    ) -> Result<LoadOutcome, AdminError> {
        info!(user_id = %ctx.session.user.id, ?access, "admin workflow entered");
        if access == Access::Admin {
            self.reload().await
        } else {
            Ok(LoadOutcome::NotAdmin)
        }
    }

    /// Current session epoch. Pair with [`AdminController::enter_if_current`]
    /// around work that may outlive the session.
    pub async fn epoch(&self) -> u64 {
        self.state.lock().await.epoch
    }

    /// Leave the workflow (sign-out, role loss, navigation away). Clears the
    /// collection, selection and errors; any in-flight result is discarded.
    pub async fn teardown(&self) {
        self.state.lock().await.reset(Access::Anonymous);
        info!("admin workflow torn down");
    }

    /// Tear down only if nothing entered or left since `epoch`. Returns
    /// whether a teardown happened.
    pub async fn teardown_if_current(&self, epoch: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            return false;
        }
        state.reset(Access::Anonymous);
        info!("admin workflow torn down");
        true
    }

    /// Request a fresh listing. Only the most recent request of the current
    /// epoch is applied.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NotAuthorized`] outside the admin state, or the
    /// listing failure.
    pub async fn reload(&self) -> Result<LoadOutcome, AdminError> {
        let (epoch, seq) = {
            let mut state = self.state.lock().await;
            state.require_admin()?;
            state.load_seq += 1;
            state.load = LoadState::Loading;
            (state.epoch, state.load_seq)
        };

        let result = self.repository.list().await;

        let mut state = self.state.lock().await;
        if state.epoch != epoch || state.load_seq != seq {
            warn!(epoch, seq, "discarding stale lead listing");
            return Ok(LoadOutcome::Discarded);
        }
        match result {
            Ok(leads) => {
                state.collection.replace(leads);
                state.load = LoadState::Loaded;
                state.error = None;
                let count = state.collection.len();
                info!(count, "leads loaded");
                Ok(LoadOutcome::Applied { count })
            }
            Err(err) => {
                warn!(error = %err, "lead listing failed");
                let message = err.to_string();
                state.load = LoadState::Errored(message.clone());
                state.error = Some(message);
                Err(err.into())
            }
        }
    }

    /// Save `patch` for one lead and reflect it locally on success.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Busy`] if a save or delete for this lead is in
    /// flight, [`AdminError::UnknownLead`] if it is not loaded, or the store
    /// failure (kept as the lead's inline error, local state unchanged).
    pub async fn update_lead(&self, id: LeadId, patch: LeadPatch) -> Result<(), AdminError> {
        let epoch = {
            let mut state = self.state.lock().await;
            state.require_admin()?;
            if !state.collection.contains(id) {
                return Err(AdminError::UnknownLead { id });
            }
            state.require_idle(id)?;
            state.busy.insert(id, LeadActivity::Saving);
            state.lead_errors.remove(&id);
            state.epoch
        };

        let result = self.repository.update(id, &patch).await;

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            debug!(lead_id = %id, "save finished after the session changed");
            return result.map_err(Into::into);
        }
        state.busy.remove(&id);
        match result {
            Ok(()) => {
                state.collection.apply_patch(id, &patch);
                Ok(())
            }
            Err(err) => {
                warn!(lead_id = %id, error = %err, "lead save failed");
                state.lead_errors.insert(id, err.to_string());
                Err(err.into())
            }
        }
    }

    /// Change a lead's status.
    ///
    /// # Errors
    ///
    /// See [`AdminController::update_lead`].
    pub async fn set_status(&self, id: LeadId, status: LeadStatus) -> Result<(), AdminError> {
        self.update_lead(id, LeadPatch::status(status)).await
    }

    /// Replace a lead's notes. Blank notes are stored as absent.
    ///
    /// # Errors
    ///
    /// See [`AdminController::update_lead`].
    pub async fn save_notes(&self, id: LeadId, notes: &str) -> Result<(), AdminError> {
        self.update_lead(id, LeadPatch::notes(normalize_optional(notes)))
            .await
    }

    /// Delete one lead after confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Busy`], [`AdminError::UnknownLead`] or the store
    /// failure (kept as the lead's inline error, lead stays loaded).
    pub async fn delete_lead(
        &self,
        id: LeadId,
        confirmation: &dyn Confirmation,
    ) -> Result<DeleteOutcome, AdminError> {
        let (epoch, action) = {
            let state = self.state.lock().await;
            state.require_admin()?;
            let name = state
                .collection
                .get(id)
                .map(|lead| lead.name.clone())
                .ok_or(AdminError::UnknownLead { id })?;
            state.require_idle(id)?;
            (state.epoch, DestructiveAction::DeleteLead { id, name })
        };

        if !confirmation.confirm(&action) {
            return Ok(DeleteOutcome::Declined);
        }

        {
            let mut state = self.state.lock().await;
            if state.epoch != epoch {
                warn!(lead_id = %id, "session changed during delete confirmation");
                return Ok(DeleteOutcome::Abandoned);
            }
            if !state.collection.contains(id) {
                return Err(AdminError::UnknownLead { id });
            }
            state.require_idle(id)?;
            state.busy.insert(id, LeadActivity::Deleting);
            state.lead_errors.remove(&id);
        }

        let result = self.repository.delete(id).await;

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            debug!(lead_id = %id, "delete finished after the session changed");
            return result
                .map(|()| DeleteOutcome::Deleted { count: 1 })
                .map_err(Into::into);
        }
        state.busy.remove(&id);
        match result {
            Ok(()) => {
                state.collection.remove(id);
                Ok(DeleteOutcome::Deleted { count: 1 })
            }
            Err(err) => {
                warn!(lead_id = %id, error = %err, "lead delete failed");
                state.lead_errors.insert(id, err.to_string());
                Err(err.into())
            }
        }
    }

    /// Delete every selected lead as one request after confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Busy`] if any selected lead is busy, or the store
    /// failure (kept as the toolbar error, nothing removed locally).
    pub async fn delete_selected(
        &self,
        confirmation: &dyn Confirmation,
    ) -> Result<DeleteOutcome, AdminError> {
        let (epoch, ids) = {
            let state = self.state.lock().await;
            state.require_admin()?;
            let ids: Vec<LeadId> = state.collection.selection().iter().copied().collect();
            if ids.is_empty() {
                return Ok(DeleteOutcome::NothingSelected);
            }
            for &id in &ids {
                state.require_idle(id)?;
            }
            (state.epoch, ids)
        };

        let action = DestructiveAction::DeleteSelected { count: ids.len() };
        if !confirmation.confirm(&action) {
            return Ok(DeleteOutcome::Declined);
        }

        {
            let mut state = self.state.lock().await;
            if state.epoch != epoch {
                warn!(count = ids.len(), "session changed during bulk delete confirmation");
                return Ok(DeleteOutcome::Abandoned);
            }
            for &id in &ids {
                state.require_idle(id)?;
            }
            for &id in &ids {
                state.busy.insert(id, LeadActivity::Deleting);
            }
            state.error = None;
        }

        let result = self.repository.bulk_delete(&ids).await;
        let count = ids.len();

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            debug!(count, "bulk delete finished after the session changed");
            return result
                .map(|()| DeleteOutcome::Deleted { count })
                .map_err(Into::into);
        }
        for id in &ids {
            state.busy.remove(id);
        }
        match result {
            Ok(()) => {
                state.collection.remove_many(&ids);
                Ok(DeleteOutcome::Deleted { count })
            }
            Err(err) => {
                warn!(count, error = %err, "bulk delete failed");
                state.error = Some(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Select or deselect one loaded lead. Returns whether the selection
    /// changed.
    pub async fn toggle_selection(&self, id: LeadId, selected: bool) -> bool {
        self.state.lock().await.collection.toggle(id, selected)
    }

    /// "Select all": checked selects exactly the working set, unchecked
    /// clears the selection.
    pub async fn select_all(&self, checked: bool) {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        if checked {
            state.collection.select_working_set(&state.query);
        } else {
            state.collection.clear_selection();
        }
    }

    /// Change the status filter. The selection is kept as is.
    pub async fn set_filter(&self, filter: StatusFilter) {
        self.state.lock().await.query.filter = filter;
    }

    /// Change the search text. The selection is kept as is.
    pub async fn set_search(&self, search: impl Into<String>) {
        self.state.lock().await.query.search = search.into();
    }

    pub async fn access(&self) -> Access {
        self.state.lock().await.access
    }

    pub async fn load_state(&self) -> LoadState {
        self.state.lock().await.load.clone()
    }

    /// Aggregate counts over the whole collection.
    pub async fn counts(&self) -> LeadCounts {
        self.state.lock().await.collection.counts()
    }

    /// Ids of the current working set, newest first.
    pub async fn working_set_ids(&self) -> Vec<LeadId> {
        let state = self.state.lock().await;
        state
            .collection
            .working_set(&state.query)
            .iter()
            .map(|lead| lead.id)
            .collect()
    }

    /// Snapshot of everything the dashboard renders.
    pub async fn snapshot(&self) -> DashboardView {
        let state = self.state.lock().await;
        let leads = state
            .collection
            .working_set(&state.query)
            .into_iter()
            .map(|lead| LeadView {
                lead: lead.clone(),
                selected: state.collection.is_selected(lead.id),
                busy: state.busy.get(&lead.id).copied(),
                error: state.lead_errors.get(&lead.id).cloned(),
            })
            .collect();

        DashboardView {
            access: state.access,
            load: state.load.clone(),
            filter: state.query.filter,
            search: state.query.search.clone(),
            leads,
            counts: state.collection.counts(),
            selected: state.collection.selection().len(),
            error: state.error.clone(),
        }
    }

    /// Export the working set as CSV stamped with `date`.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NotAuthorized`] outside the admin state.
    pub async fn export_csv(&self, date: NaiveDate) -> Result<CsvExport, AdminError> {
        let state = self.state.lock().await;
        state.require_admin()?;
        let export = export_leads(state.collection.working_set(&state.query), date);
        info!(filename = %export.filename, "leads exported");
        Ok(export)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use leaddesk_store::{
        ADMIN_ROLE, Lead, LeadStore, MemoryBackend, NewLead, StoreError, Variant,
    };
    use tokio::sync::Notify;

    use super::*;
    use crate::repository::LeadInput;

    /// Lead store whose next armed listing or update waits for `release`.
    struct GatedStore {
        inner: MemoryBackend,
        list_armed: AtomicBool,
        update_armed: AtomicBool,
        parked: AtomicBool,
        gate: Notify,
    }

    impl GatedStore {
        fn new(inner: &MemoryBackend) -> Arc<Self> {
            Arc::new(Self {
                inner: inner.clone(),
                list_armed: AtomicBool::new(false),
                update_armed: AtomicBool::new(false),
                parked: AtomicBool::new(false),
                gate: Notify::new(),
            })
        }

        fn arm(&self) {
            self.list_armed.store(true, Ordering::SeqCst);
        }

        fn arm_update(&self) {
            self.update_armed.store(true, Ordering::SeqCst);
        }

        fn release(&self) {
            self.gate.notify_one();
        }

        async fn park(&self) {
            self.parked.store(true, Ordering::SeqCst);
            self.gate.notified().await;
        }
    }

    #[async_trait::async_trait]
    impl LeadStore for GatedStore {
        async fn insert_lead(&self, lead: &NewLead) -> Result<(), StoreError> {
            self.inner.insert_lead(lead).await
        }

        async fn select_leads(&self, limit: usize) -> Result<Vec<Lead>, StoreError> {
            if self.list_armed.swap(false, Ordering::SeqCst) {
                self.park().await;
            }
            self.inner.select_leads(limit).await
        }

        async fn update_lead(&self, id: LeadId, patch: &LeadPatch) -> Result<(), StoreError> {
            if self.update_armed.swap(false, Ordering::SeqCst) {
                self.park().await;
            }
            self.inner.update_lead(id, patch).await
        }

        async fn delete_lead(&self, id: LeadId) -> Result<(), StoreError> {
            self.inner.delete_lead(id).await
        }

        async fn delete_leads(&self, ids: &[LeadId]) -> Result<(), StoreError> {
            self.inner.delete_leads(ids).await
        }
    }

    fn input(name: &str, company: &str) -> LeadInput {
        LeadInput {
            name: name.to_owned(),
            email: format!("{}@x.com", name.to_lowercase()),
            company: company.to_owned(),
            seats: "1".to_owned(),
            ..Default::default()
        }
    }

    async fn context(backend: &MemoryBackend, admin: bool) -> SessionContext {
        let session = backend.sign_in_as("someone@x.com", None).await;
        if admin {
            backend.set_role(session.user.id, ADMIN_ROLE).await;
        }
        let profile = backend
            .profile(session.user.id)
            .await
            .unwrap_or_else(|| Profile {
                id: session.user.id,
                role: None,
                full_name: None,
                email: None,
                avatar_url: None,
            });
        SessionContext { session, profile }
    }

    async fn seeded(names: &[(&str, &str)]) -> (MemoryBackend, LeadRepository) {
        let backend = MemoryBackend::new();
        let repo = LeadRepository::new(Arc::new(backend.clone()));
        for (name, company) in names {
            repo.submit(&input(name, company), Variant::Base)
                .await
                .unwrap();
        }
        (backend, repo)
    }

    async fn admin_controller(names: &[(&str, &str)]) -> (MemoryBackend, AdminController) {
        let (backend, repo) = seeded(names).await;
        let controller = AdminController::new(repo);
        let ctx = context(&backend, true).await;
        controller.enter(&ctx).await.unwrap();
        (backend, controller)
    }

    fn yes(_: &DestructiveAction) -> bool {
        true
    }

    fn no(_: &DestructiveAction) -> bool {
        false
    }

    #[tokio::test]
    async fn admin_enter_loads_once() {
        let (_backend, controller) = admin_controller(&[("Ann", ""), ("Bob", "")]).await;
        let view = controller.snapshot().await;
        assert_eq!(view.access, Access::Admin);
        assert_eq!(view.load, LoadState::Loaded);
        assert_eq!(view.showing(), 2);
        assert_eq!(view.leads[0].lead.name, "Bob");
    }

    #[tokio::test]
    async fn member_sees_nothing() {
        let (backend, repo) = seeded(&[("Ann", "")]).await;
        let controller = AdminController::new(repo);
        let ctx = context(&backend, false).await;

        assert_eq!(controller.enter(&ctx).await, Ok(LoadOutcome::NotAdmin));
        let view = controller.snapshot().await;
        assert_eq!(view.access, Access::Member);
        assert!(view.leads.is_empty());
        assert_eq!(controller.reload().await, Err(AdminError::NotAuthorized));
    }

    #[tokio::test]
    async fn sign_out_clears_then_member_sees_nothing() {
        let (backend, controller) = admin_controller(&[("Ann", "")]).await;
        let id = controller.working_set_ids().await[0];
        controller.toggle_selection(id, true).await;

        controller.teardown().await;
        let view = controller.snapshot().await;
        assert_eq!(view.access, Access::Anonymous);
        assert!(view.leads.is_empty());
        assert_eq!(view.counts.total, 0);
        assert_eq!(view.selected, 0);

        let ctx = context(&backend, false).await;
        controller.enter(&ctx).await.unwrap();
        let view = controller.snapshot().await;
        assert!(view.leads.is_empty());
        assert!(!view.bulk_toolbar_visible());
    }

    #[tokio::test]
    async fn load_after_teardown_is_discarded() {
        let backend = MemoryBackend::new();
        let gated = GatedStore::new(&backend);
        let controller = Arc::new(AdminController::new(LeadRepository::new(gated.clone())));
        let ctx = context(&backend, true).await;
        controller.enter(&ctx).await.unwrap();
        LeadRepository::new(Arc::new(backend.clone()))
            .submit(&input("Ann", ""), Variant::Base)
            .await
            .unwrap();

        gated.arm();
        let pending = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.reload().await }
        });
        while controller.load_state().await != LoadState::Loading {
            tokio::task::yield_now().await;
        }

        controller.teardown().await;
        gated.release();
        assert_eq!(pending.await.unwrap(), Ok(LoadOutcome::Discarded));
        assert!(controller.snapshot().await.leads.is_empty());
    }

    #[tokio::test]
    async fn only_latest_load_is_applied() {
        let backend = MemoryBackend::new();
        let gated = GatedStore::new(&backend);
        let controller = Arc::new(AdminController::new(LeadRepository::new(gated.clone())));
        let ctx = context(&backend, true).await;
        controller.enter(&ctx).await.unwrap();

        gated.arm();
        let first = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.reload().await }
        });
        while controller.load_state().await != LoadState::Loading {
            tokio::task::yield_now().await;
        }

        LeadRepository::new(Arc::new(backend.clone()))
            .submit(&input("Ann", ""), Variant::Base)
            .await
            .unwrap();
        assert_eq!(
            controller.reload().await,
            Ok(LoadOutcome::Applied { count: 1 })
        );

        gated.release();
        assert_eq!(first.await.unwrap(), Ok(LoadOutcome::Discarded));
        assert_eq!(controller.counts().await.total, 1);
    }

    #[tokio::test]
    async fn sequential_updates_keep_last_value() {
        let (backend, controller) = admin_controller(&[("Ann", "")]).await;
        let id = controller.working_set_ids().await[0];

        controller
            .set_status(id, LeadStatus::InProgress)
            .await
            .unwrap();
        controller.set_status(id, LeadStatus::Done).await.unwrap();

        assert_eq!(backend.leads().await[0].status, LeadStatus::Done);
        assert_eq!(controller.snapshot().await.leads[0].lead.status, LeadStatus::Done);
    }

    #[tokio::test]
    async fn save_in_flight_blocks_second_save_and_delete() {
        let backend = MemoryBackend::new();
        let gated = GatedStore::new(&backend);
        LeadRepository::new(Arc::new(backend.clone()))
            .submit(&input("Ann", ""), Variant::Base)
            .await
            .unwrap();
        let controller = Arc::new(AdminController::new(LeadRepository::new(gated.clone())));
        let ctx = context(&backend, true).await;
        controller.enter(&ctx).await.unwrap();
        let id = controller.working_set_ids().await[0];

        gated.arm_update();
        let pending = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.set_status(id, LeadStatus::InProgress).await }
        });
        while !gated.parked.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        let busy = Err(AdminError::Busy {
            id,
            activity: LeadActivity::Saving,
        });
        assert_eq!(controller.set_status(id, LeadStatus::Done).await, busy);
        assert_eq!(
            controller.delete_lead(id, &yes).await.map(|_| ()),
            busy
        );
        assert_eq!(
            controller.snapshot().await.leads[0].busy,
            Some(LeadActivity::Saving)
        );

        gated.release();
        assert_eq!(pending.await.unwrap(), Ok(()));
        assert_eq!(backend.leads().await[0].status, LeadStatus::InProgress);
        let view = controller.snapshot().await;
        assert_eq!(view.leads[0].busy, None);
        assert_eq!(view.leads[0].lead.status, LeadStatus::InProgress);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn teardown_does_not_wait_for_confirmation() {
        let (backend, controller) = admin_controller(&[("Ann", "")]).await;
        let controller = Arc::new(controller);
        let id = controller.working_set_ids().await[0];

        let (asked_tx, asked_rx) = std::sync::mpsc::channel::<()>();
        let (answer_tx, answer_rx) = std::sync::mpsc::channel::<bool>();
        let answer_rx = std::sync::Mutex::new(answer_rx);
        let pending = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move {
                let confirm = move |_: &DestructiveAction| {
                    asked_tx.send(()).unwrap();
                    answer_rx.lock().unwrap().recv().unwrap_or(false)
                };
                controller.delete_lead(id, &confirm).await
            }
        });
        tokio::task::spawn_blocking(move || asked_rx.recv())
            .await
            .unwrap()
            .unwrap();

        let torn_down =
            tokio::time::timeout(Duration::from_millis(500), controller.teardown()).await;
        answer_tx.send(true).unwrap();
        assert!(torn_down.is_ok(), "teardown waited for the prompt");

        assert_eq!(pending.await.unwrap(), Ok(DeleteOutcome::Abandoned));
        assert_eq!(backend.leads().await.len(), 1);
        assert!(controller.snapshot().await.leads.is_empty());
    }

    #[tokio::test]
    async fn failed_save_leaves_state_and_shows_error() {
        let (backend, controller) = admin_controller(&[("Ann", "")]).await;
        let id = controller.working_set_ids().await[0];
        backend
            .fail_next(StoreError::Network("connection reset".to_owned()))
            .await;

        assert!(controller.set_status(id, LeadStatus::Done).await.is_err());
        let view = controller.snapshot().await;
        assert_eq!(view.leads[0].lead.status, LeadStatus::New);
        assert_eq!(view.leads[0].busy, None);
        assert_eq!(
            view.leads[0].error.as_deref(),
            Some("store network error: connection reset")
        );
    }

    #[tokio::test]
    async fn blank_notes_are_cleared() {
        let (backend, controller) = admin_controller(&[("Ann", "")]).await;
        let id = controller.working_set_ids().await[0];

        controller.save_notes(id, "  call back ").await.unwrap();
        assert_eq!(backend.leads().await[0].notes.as_deref(), Some("call back"));

        controller.save_notes(id, "   ").await.unwrap();
        assert_eq!(backend.leads().await[0].notes, None);
        assert_eq!(controller.snapshot().await.leads[0].lead.notes, None);
    }

    #[tokio::test]
    async fn declined_delete_changes_nothing() {
        let (backend, controller) = admin_controller(&[("Ann", "")]).await;
        let id = controller.working_set_ids().await[0];
        controller.toggle_selection(id, true).await;

        assert_eq!(
            controller.delete_lead(id, &no).await,
            Ok(DeleteOutcome::Declined)
        );
        assert_eq!(
            controller.delete_selected(&no).await,
            Ok(DeleteOutcome::Declined)
        );
        assert_eq!(backend.leads().await.len(), 1);
        assert_eq!(controller.snapshot().await.selected, 1);
    }

    #[tokio::test]
    async fn delete_removes_from_collection_and_selection() {
        let (backend, controller) = admin_controller(&[("Ann", ""), ("Bob", "")]).await;
        let ids = controller.working_set_ids().await;
        controller.toggle_selection(ids[0], true).await;

        let asked = std::sync::Mutex::new(None);
        let confirm = |action: &DestructiveAction| {
            *asked.lock().unwrap() = Some(action.to_string());
            true
        };
        assert_eq!(
            controller.delete_lead(ids[0], &confirm).await,
            Ok(DeleteOutcome::Deleted { count: 1 })
        );
        assert_eq!(
            asked.lock().unwrap().as_deref(),
            Some("Delete the lead from Bob?")
        );

        let view = controller.snapshot().await;
        assert_eq!(view.showing(), 1);
        assert_eq!(view.selected, 0);
        assert_eq!(backend.leads().await.len(), 1);
    }

    #[tokio::test]
    async fn bulk_delete_uses_selection() {
        let (backend, controller) =
            admin_controller(&[("Ann", "ACME Corp"), ("Bob", "Globex"), ("Cid", "acme labs")])
                .await;

        assert_eq!(
            controller.delete_selected(&yes).await,
            Ok(DeleteOutcome::NothingSelected)
        );

        controller.set_search("acme").await;
        controller.select_all(true).await;
        let view = controller.snapshot().await;
        assert_eq!(view.selected, 2);
        assert!(view.all_selected());
        assert!(view.bulk_toolbar_visible());

        // Changing the search keeps the hidden selection.
        controller.set_search("").await;
        let view = controller.snapshot().await;
        assert_eq!(view.selected, 2);
        assert!(!view.all_selected());

        assert_eq!(
            controller.delete_selected(&yes).await,
            Ok(DeleteOutcome::Deleted { count: 2 })
        );
        let remaining = backend.leads().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "Bob");
        let view = controller.snapshot().await;
        assert_eq!(view.showing(), 1);
        assert_eq!(view.selected, 0);
    }

    #[tokio::test]
    async fn failed_bulk_delete_keeps_everything() {
        let (backend, controller) = admin_controller(&[("Ann", ""), ("Bob", "")]).await;
        controller.select_all(true).await;
        backend
            .fail_next(StoreError::Denied("permission denied for table leads".to_owned()))
            .await;

        let err = controller.delete_selected(&yes).await.unwrap_err();
        assert_eq!(err.to_string(), "permission denied for table leads");
        let view = controller.snapshot().await;
        assert_eq!(view.showing(), 2);
        assert_eq!(view.selected, 2);
        assert_eq!(view.error.as_deref(), Some("permission denied for table leads"));
    }

    #[tokio::test]
    async fn counts_ignore_filter() {
        let (_backend, controller) = admin_controller(&[("Ann", ""), ("Bob", "")]).await;
        let id = controller.working_set_ids().await[0];
        controller.set_status(id, LeadStatus::Done).await.unwrap();
        controller
            .set_filter(StatusFilter::Only(LeadStatus::Done))
            .await;

        let view = controller.snapshot().await;
        assert_eq!(view.showing(), 1);
        assert_eq!(view.counts.total, 2);
        assert_eq!(view.counts.new, 1);
        assert_eq!(view.counts.done, 1);
    }

    #[tokio::test]
    async fn export_covers_working_set_only() {
        let (_backend, controller) = admin_controller(&[("Ann", "ACME"), ("Bob", "Globex")]).await;
        controller.set_search("globex").await;
        let export = controller
            .export_csv(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
            .await
            .unwrap();
        let text = String::from_utf8(export.bytes).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"Bob\""));
        assert!(!text.contains("\"Ann\""));
    }
}
