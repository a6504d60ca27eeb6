//! Lead collection state and the views derived from it.
//!
//! The collection is the canonical client-side copy of the loaded leads plus
//! the selection set. Everything else (working set, counts) is computed on
//! demand from it, so a view can never drift from its source.

use std::collections::BTreeSet;

use leaddesk_store::{LEAD_LIST_LIMIT, Lead, LeadId, LeadPatch, LeadStatus};
use serde::Serialize;

/// Status filter applied before search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(LeadStatus),
}

impl StatusFilter {
    fn matches(self, lead: &Lead) -> bool {
        match self {
            Self::All => true,
            Self::Only(status) => lead.status == status,
        }
    }
}

impl std::fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(status) => status.fmt(f),
        }
    }
}

impl Serialize for StatusFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Only)
        }
    }
}

/// Active filter and search text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadQuery {
    pub filter: StatusFilter,
    pub search: String,
}

impl LeadQuery {
    /// Whether `lead` passes both the status filter and the search.
    #[must_use]
    pub fn matches(&self, lead: &Lead) -> bool {
        self.filter.matches(lead) && matches_search(lead, &self.search)
    }
}

/// Case-insensitive substring match against name, email, telegram and
/// company. A blank query matches everything.
#[must_use]
pub fn matches_search(lead: &Lead, query: &str) -> bool {
    if query.trim().is_empty() {
        return true;
    }
    let needle = query.to_lowercase();
    [
        Some(lead.name.as_str()),
        Some(lead.email.as_str()),
        lead.telegram.as_deref(),
        lead.company.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(&needle))
}

/// Aggregate counts over the full, unfiltered collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeadCounts {
    pub total: usize,
    pub new: usize,
    pub in_progress: usize,
    pub done: usize,
}

impl LeadCounts {
    /// Count for one status.
    #[must_use]
    pub const fn of(&self, status: LeadStatus) -> usize {
        match status {
            LeadStatus::New => self.new,
            LeadStatus::InProgress => self.in_progress,
            LeadStatus::Done => self.done,
        }
    }
}

/// Loaded leads (newest first, at most 200) and the selected ids.
///
/// The selection is always a subset of the loaded ids.
#[derive(Debug, Clone, Default)]
pub struct LeadCollection {
    leads: Vec<Lead>,
    selection: BTreeSet<LeadId>,
}

impl LeadCollection {
    /// Replace the loaded leads with a fresh listing. Selected ids that are
    /// no longer present are dropped.
    pub fn replace(&mut self, mut leads: Vec<Lead>) {
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        leads.truncate(LEAD_LIST_LIMIT);
        self.leads = leads;
        let loaded: BTreeSet<LeadId> = self.leads.iter().map(|l| l.id).collect();
        self.selection.retain(|id| loaded.contains(id));
    }

    /// Drop every lead and the selection.
    pub fn clear(&mut self) {
        self.leads.clear();
        self.selection.clear();
    }

    #[must_use]
    pub fn leads(&self) -> &[Lead] {
        &self.leads
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leads.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: LeadId) -> Option<&Lead> {
        self.leads.iter().find(|l| l.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: LeadId) -> bool {
        self.get(id).is_some()
    }

    /// Reflect an accepted update locally. Returns `false` if the lead is not
    /// loaded.
    pub fn apply_patch(&mut self, id: LeadId, patch: &LeadPatch) -> bool {
        self.leads
            .iter_mut()
            .find(|l| l.id == id)
            .map(|lead| patch.apply_to(lead))
            .is_some()
    }

    /// Remove a lead and its selection entry.
    pub fn remove(&mut self, id: LeadId) -> bool {
        self.selection.remove(&id);
        let before = self.leads.len();
        self.leads.retain(|l| l.id != id);
        self.leads.len() != before
    }

    /// Remove several leads and their selection entries.
    pub fn remove_many(&mut self, ids: &[LeadId]) {
        for id in ids {
            self.selection.remove(id);
        }
        self.leads.retain(|l| !ids.contains(&l.id));
    }

    /// Add or remove one id from the selection. Ids that are not loaded are
    /// ignored.
    pub fn toggle(&mut self, id: LeadId, selected: bool) -> bool {
        if selected {
            self.contains(id) && self.selection.insert(id)
        } else {
            self.selection.remove(&id)
        }
    }

    /// Set the selection to exactly the working set of `query`.
    pub fn select_working_set(&mut self, query: &LeadQuery) {
        self.selection = self.working_set(query).iter().map(|l| l.id).collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    #[must_use]
    pub const fn selection(&self) -> &BTreeSet<LeadId> {
        &self.selection
    }

    #[must_use]
    pub fn is_selected(&self, id: LeadId) -> bool {
        self.selection.contains(&id)
    }

    /// Leads passing both the status filter and the search, in collection
    /// order.
    #[must_use]
    pub fn working_set(&self, query: &LeadQuery) -> Vec<&Lead> {
        self.leads.iter().filter(|l| query.matches(l)).collect()
    }

    /// Counts over the whole collection, independent of any query.
    #[must_use]
    pub fn counts(&self) -> LeadCounts {
        self.leads.iter().fold(
            LeadCounts {
                total: self.leads.len(),
                ..LeadCounts::default()
            },
            |mut counts, lead| {
                match lead.status {
                    LeadStatus::New => counts.new += 1,
                    LeadStatus::InProgress => counts.in_progress += 1,
                    LeadStatus::Done => counts.done += 1,
                }
                counts
            },
        )
    }
}
