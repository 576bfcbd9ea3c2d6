//! Permission filters for tests.
//!
//! [`RecordingFilter`] remembers every check it sees so tests can assert
//! which reasons fired, in which order and with which values.
//! [`DenyFilter`] vetoes one reason.

use docset_core::{
    PermissionContext, PermissionErrors, PermissionFilter, PermissionReason, RowId, RowValues,
    Value,
};
use parking_lot::Mutex;

/// One check seen by a [`RecordingFilter`].
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRecord {
    /// The action.
    pub reason: PermissionReason,
    /// Document type name.
    pub doc_type: String,
    /// Document identifier.
    pub id: RowId,
    /// Whether the values were read-only.
    pub read_only: bool,
    /// Column values passed with the check.
    pub values: Vec<Value>,
}

/// A filter that allows everything and records each check.
#[derive(Debug, Default)]
pub struct RecordingFilter {
    calls: Mutex<Vec<CheckRecord>>,
}

impl RecordingFilter {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded check, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<CheckRecord> {
        self.calls.lock().clone()
    }

    /// Reasons of every recorded check, oldest first.
    #[must_use]
    pub fn reasons(&self) -> Vec<PermissionReason> {
        self.calls.lock().iter().map(|c| c.reason).collect()
    }

    /// Reasons recorded for one document.
    #[must_use]
    pub fn reasons_for(&self, doc_type: &str, id: RowId) -> Vec<PermissionReason> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.doc_type == doc_type && c.id == id)
            .map(|c| c.reason)
            .collect()
    }

    /// Number of checks recorded with a reason.
    #[must_use]
    pub fn count(&self, reason: PermissionReason) -> usize {
        self.calls.lock().iter().filter(|c| c.reason == reason).count()
    }

    /// Forgets every recorded check.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl PermissionFilter for RecordingFilter {
    fn check(&self, ctx: &PermissionContext<'_>, _errors: &mut PermissionErrors) {
        let values = (0..ctx.values.table().columns().len())
            .map(|c| ctx.values.value(c).clone())
            .collect();
        self.calls.lock().push(CheckRecord {
            reason: ctx.reason,
            doc_type: ctx.doc_type.to_string(),
            id: ctx.id,
            read_only: ctx.read_only,
            values,
        });
    }
}

/// A filter that vetoes one reason, optionally for one document type.
#[derive(Debug, Clone)]
pub struct DenyFilter {
    reason: PermissionReason,
    doc_type: Option<String>,
}

impl DenyFilter {
    /// Denies `reason` for every document type.
    #[must_use]
    pub fn new(reason: PermissionReason) -> Self {
        Self {
            reason,
            doc_type: None,
        }
    }

    /// Restricts the veto to one document type.
    #[must_use]
    pub fn only(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }
}

impl PermissionFilter for DenyFilter {
    fn check(&self, ctx: &PermissionContext<'_>, errors: &mut PermissionErrors) {
        if ctx.reason != self.reason {
            return;
        }
        if self.doc_type.as_deref().is_some_and(|t| t != ctx.doc_type) {
            return;
        }
        errors.add("denied", format!("{} is not allowed", ctx.reason));
    }
}
