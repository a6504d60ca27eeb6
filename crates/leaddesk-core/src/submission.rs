//! Lead-capture form: `idle -> sending -> success | error`.
//!
//! Any field edit returns the form to idle. The form never touches the admin
//! collection; a submitted lead only shows up there on the next listing.

use leaddesk_store::Variant;
use tracing::warn;

use crate::error::{RepositoryError, SubmitBlocked};
use crate::repository::{LeadInput, LeadRepository};

/// Shown when the store was never configured.
pub const NOT_CONFIGURED_MESSAGE: &str =
    "Lead store is not configured: set SUPABASE_URL and SUPABASE_ANON_KEY.";

/// Shown when a failure carries no message of its own.
pub const GENERIC_FAILURE_MESSAGE: &str = "Could not send the request. Please try again.";

/// Submission state of one form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FormStatus {
    #[default]
    Idle,
    Sending,
    Success,
    Error(String),
}

/// Editable form fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Name,
    Email,
    Telegram,
    Seats,
    Company,
    Goal,
}

impl std::fmt::Display for FormField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Telegram => "telegram",
            Self::Seats => "seats",
            Self::Company => "company",
            Self::Goal => "goal",
        })
    }
}

/// One lead-capture form bound to a marketing variant.
#[derive(Debug, Clone)]
pub struct LeadForm {
    repository: LeadRepository,
    source: Variant,
    input: LeadInput,
    status: FormStatus,
}

impl LeadForm {
    #[must_use]
    pub fn new(repository: LeadRepository, source: Variant) -> Self {
        Self {
            repository,
            source,
            input: LeadInput::default(),
            status: FormStatus::Idle,
        }
    }

    #[must_use]
    pub const fn input(&self) -> &LeadInput {
        &self.input
    }

    #[must_use]
    pub const fn status(&self) -> &FormStatus {
        &self.status
    }

    /// Edit one field. Resets the status to idle.
    pub fn set(&mut self, field: FormField, value: impl Into<String>) {
        let value = value.into();
        let slot = match field {
            FormField::Name => &mut self.input.name,
            FormField::Email => &mut self.input.email,
            FormField::Telegram => &mut self.input.telegram,
            FormField::Seats => &mut self.input.seats,
            FormField::Company => &mut self.input.company,
            FormField::Goal => &mut self.input.goal,
        };
        *slot = value;
        self.status = FormStatus::Idle;
    }

    /// Send the form. The outcome is recorded in [`LeadForm::status`]; on
    /// success the input is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitBlocked::MissingField`] when name or email is blank.
    /// Nothing is sent and the status is left as is.
    pub async fn submit(&mut self) -> Result<&FormStatus, SubmitBlocked> {
        if self.input.name.trim().is_empty() {
            return Err(SubmitBlocked::MissingField(FormField::Name));
        }
        if self.input.email.trim().is_empty() {
            return Err(SubmitBlocked::MissingField(FormField::Email));
        }

        if !self.repository.is_configured() {
            self.status = FormStatus::Error(NOT_CONFIGURED_MESSAGE.to_owned());
            return Ok(&self.status);
        }

        self.status = FormStatus::Sending;
        self.status = match self.repository.submit(&self.input, self.source).await {
            Ok(()) => {
                self.input = LeadInput::default();
                FormStatus::Success
            }
            Err(err) => {
                warn!(error = %err, "lead submission failed");
                FormStatus::Error(failure_message(&err))
            }
        };
        Ok(&self.status)
    }
}

fn failure_message(err: &RepositoryError) -> String {
    match err {
        RepositoryError::NotConfigured => NOT_CONFIGURED_MESSAGE.to_owned(),
        other => {
            let message = other.to_string();
            if message.trim().is_empty() {
                GENERIC_FAILURE_MESSAGE.to_owned()
            } else {
                message
            }
        }
    }
}
