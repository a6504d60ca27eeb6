//! Lead repository: translates workflow intents into store calls.
//!
//! Each operation is a single round trip and never retries. When the store
//! was never configured every operation fails with
//! [`RepositoryError::NotConfigured`] before any network activity.

use std::sync::Arc;

use leaddesk_store::{
    LEAD_LIST_LIMIT, Lead, LeadId, LeadPatch, LeadStatus, LeadStore, NewLead, Variant,
};
use tracing::info;

use crate::error::RepositoryError;

/// Raw lead-capture form fields, exactly as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadInput {
    pub name: String,
    pub email: String,
    pub telegram: String,
    pub seats: String,
    pub company: String,
    pub goal: String,
}

impl LeadInput {
    /// Build the insert payload: trims the required fields, turns blank
    /// optional fields into `None`, coerces seats and stamps `status = new`.
    #[must_use]
    pub fn normalize(&self, source: Variant) -> NewLead {
        NewLead {
            name: self.name.trim().to_owned(),
            email: self.email.trim().to_owned(),
            telegram: normalize_optional(&self.telegram),
            seats: coerce_seats(&self.seats),
            company: normalize_optional(&self.company),
            goal: normalize_optional(&self.goal),
            status: LeadStatus::New,
            source,
        }
    }
}

/// Trim an optional text field; blank means absent.
#[must_use]
pub fn normalize_optional(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Coerce a seat count to a positive integer. Anything that is not a finite
/// number of at least one falls back to `1`; fractions are truncated.
#[must_use]
pub fn coerce_seats(raw: &str) -> i32 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 1.0 => {
            // Clamped to i32::MAX first, so the cast cannot wrap.
            #[allow(clippy::cast_possible_truncation)]
            let seats = value.trunc().min(f64::from(i32::MAX)) as i32;
            seats
        }
        _ => 1,
    }
}

/// Client-side access layer over a [`LeadStore`].
#[derive(Clone)]
pub struct LeadRepository {
    store: Option<Arc<dyn LeadStore>>,
}

impl std::fmt::Debug for LeadRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeadRepository")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl LeadRepository {
    /// Repository over a connected store.
    #[must_use]
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Repository for a store that was never configured.
    #[must_use]
    pub const fn unconfigured() -> Self {
        Self { store: None }
    }

    /// Whether a store connection exists.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    fn store(&self) -> Result<&dyn LeadStore, RepositoryError> {
        self.store.as_deref().ok_or(RepositoryError::NotConfigured)
    }

    /// Persist a new lead from raw form input.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotConfigured`] without a network call when
    /// there is no store, or the store-reported failure.
    pub async fn submit(&self, input: &LeadInput, source: Variant) -> Result<(), RepositoryError> {
        let store = self.store()?;
        let lead = input.normalize(source);
        store.insert_lead(&lead).await?;
        info!(source = %source, seats = lead.seats, "lead submitted");
        Ok(())
    }

    /// Fetch up to 200 leads, newest first.
    ///
    /// # Errors
    ///
    /// Returns the store-reported failure.
    pub async fn list(&self) -> Result<Vec<Lead>, RepositoryError> {
        let store = self.store()?;
        let mut leads = store.select_leads(LEAD_LIST_LIMIT).await?;
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        leads.truncate(LEAD_LIST_LIMIT);
        Ok(leads)
    }

    /// Apply only the supplied fields to the lead. The caller reflects the
    /// change locally; nothing is re-fetched.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::EmptyPatch`] for a patch with no fields, or
    /// the store-reported failure.
    pub async fn update(&self, id: LeadId, patch: &LeadPatch) -> Result<(), RepositoryError> {
        let store = self.store()?;
        if patch.is_empty() {
            return Err(RepositoryError::EmptyPatch { id });
        }
        store.update_lead(id, patch).await?;
        info!(lead_id = %id, status = ?patch.status, notes = patch.notes.is_some(), "lead updated");
        Ok(())
    }

    /// Remove one lead.
    ///
    /// # Errors
    ///
    /// Returns the store-reported failure.
    pub async fn delete(&self, id: LeadId) -> Result<(), RepositoryError> {
        let store = self.store()?;
        store.delete_lead(id).await?;
        info!(lead_id = %id, "lead deleted");
        Ok(())
    }

    /// Remove every lead in `ids` as one request.
    ///
    /// # Errors
    ///
    /// Returns the store-reported failure for the whole batch.
    pub async fn bulk_delete(&self, ids: &[LeadId]) -> Result<(), RepositoryError> {
        let store = self.store()?;
        store.delete_leads(ids).await?;
        info!(count = ids.len(), "leads deleted");
        Ok(())
    }
}
