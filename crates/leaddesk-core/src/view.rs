//! Read-only dashboard snapshot handed to a presentation layer.

use leaddesk_store::Lead;
use serde::Serialize;

use crate::collection::{LeadCounts, StatusFilter};
use crate::controller::{Access, LeadActivity, LoadState};

/// One row of the working set as the dashboard renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadView {
    #[serde(flatten)]
    pub lead: Lead,
    pub selected: bool,
    /// Status selector and notes field are disabled while this is set.
    pub busy: Option<LeadActivity>,
    /// Failure of the last save or delete on this lead.
    pub error: Option<String>,
}

/// Everything the dashboard shows, computed from the controller state at one
/// point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardView {
    pub access: Access,
    pub load: LoadState,
    pub filter: StatusFilter,
    pub search: String,
    /// The working set, newest first.
    pub leads: Vec<LeadView>,
    pub counts: LeadCounts,
    pub selected: usize,
    /// Toolbar or load failure.
    pub error: Option<String>,
}

impl DashboardView {
    /// Number of leads in the working set.
    #[must_use]
    pub fn showing(&self) -> usize {
        self.leads.len()
    }

    /// Bulk actions are offered only while something is selected.
    #[must_use]
    pub const fn bulk_toolbar_visible(&self) -> bool {
        self.selected > 0
    }

    /// State of the "select all" checkbox: the selection is as large as the
    /// working set. Selected ids hidden by the query still count.
    #[must_use]
    pub fn all_selected(&self) -> bool {
        !self.leads.is_empty() && self.selected == self.leads.len()
    }
}
