//! Permission filters.
//!
//! Every document action is submitted to the registered filters with a
//! [`PermissionReason`]. A filter vetoes an action by recording a named
//! error; the first recorded error becomes [`CoreError::AccessDenied`].

use crate::error::{CoreError, CoreResult};
use crate::row_values::RowValues;
use crate::types::RowId;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The action a permission check is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionReason {
    /// A persisted document is read into a working set.
    View,
    /// A document is created in a working set.
    BeforeInsert,
    /// A document is opened for modification.
    BeforeEdit,
    /// A document is marked for deletion.
    BeforeDelete,
    /// A soft-deleted document is opened for modification.
    BeforeRestore,
    /// A new document is about to be written.
    ApplyNew,
    /// An edited document is about to be written; values are the stored ones.
    ApplyEditOrg,
    /// An edited document is about to be written; values are the new ones.
    ApplyEditNew,
    /// A document is about to be deleted.
    ApplyDelete,
    /// A soft-deleted document is about to be restored.
    ApplyRestore,
    /// The history of a document is read.
    ViewHistory,
}

impl PermissionReason {
    /// Whether the values passed with this reason must not be modified.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(
            self,
            PermissionReason::View
                | PermissionReason::BeforeDelete
                | PermissionReason::ApplyEditOrg
                | PermissionReason::ApplyDelete
                | PermissionReason::ViewHistory
        )
    }
}

impl fmt::Display for PermissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionReason::View => "View",
            PermissionReason::BeforeInsert => "BeforeInsert",
            PermissionReason::BeforeEdit => "BeforeEdit",
            PermissionReason::BeforeDelete => "BeforeDelete",
            PermissionReason::BeforeRestore => "BeforeRestore",
            PermissionReason::ApplyNew => "ApplyNew",
            PermissionReason::ApplyEditOrg => "ApplyEditOrg",
            PermissionReason::ApplyEditNew => "ApplyEditNew",
            PermissionReason::ApplyDelete => "ApplyDelete",
            PermissionReason::ApplyRestore => "ApplyRestore",
            PermissionReason::ViewHistory => "ViewHistory",
        };
        f.write_str(s)
    }
}

/// What a permission filter is asked about.
pub struct PermissionContext<'a> {
    /// The action.
    pub reason: PermissionReason,
    /// Document type name.
    pub doc_type: &'a str,
    /// Document identifier.
    pub id: RowId,
    /// The document's values for this check.
    pub values: &'a dyn RowValues,
    /// Whether the values are read-only.
    pub read_only: bool,
}

impl fmt::Debug for PermissionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionContext")
            .field("reason", &self.reason)
            .field("doc_type", &self.doc_type)
            .field("id", &self.id)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

/// Errors recorded by permission filters during one check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionErrors {
    errors: Vec<(String, String)>,
}

impl PermissionErrors {
    /// Records a named error; the check fails.
    pub fn add(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.errors.push((name.into(), message.into()));
    }

    /// Checks if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the recorded `(name, message)` pairs.
    #[must_use]
    pub fn errors(&self) -> &[(String, String)] {
        &self.errors
    }
}

/// A permission predicate.
pub trait PermissionFilter: Send + Sync {
    /// Examines an action and records an error to veto it.
    fn check(&self, ctx: &PermissionContext<'_>, errors: &mut PermissionErrors);
}

impl<F> PermissionFilter for F
where
    F: Fn(&PermissionContext<'_>, &mut PermissionErrors) + Send + Sync,
{
    fn check(&self, ctx: &PermissionContext<'_>, errors: &mut PermissionErrors) {
        self(ctx, errors);
    }
}

/// Wraps a closure as a shareable filter.
pub fn filter_fn<F>(f: F) -> Arc<dyn PermissionFilter>
where
    F: Fn(&PermissionContext<'_>, &mut PermissionErrors) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registered filters, evaluated in registration order.
#[derive(Clone, Default)]
pub(crate) struct PermissionChain {
    filters: Vec<Arc<dyn PermissionFilter>>,
}

impl PermissionChain {
    pub(crate) fn push(&mut self, filter: Arc<dyn PermissionFilter>) {
        self.filters.push(filter);
    }

    /// Runs every filter and fails with the first recorded error.
    pub(crate) fn check(
        &self,
        reason: PermissionReason,
        doc_type: &str,
        id: RowId,
        values: &dyn RowValues,
    ) -> CoreResult<()> {
        let ctx = PermissionContext {
            reason,
            doc_type,
            id,
            values,
            read_only: reason.is_read_only(),
        };
        let mut errors = PermissionErrors::default();
        for filter in &self.filters {
            filter.check(&ctx, &mut errors);
        }
        debug!(%reason, doc_type, %id, denied = !errors.is_empty(), "permission check");

        match errors.errors.into_iter().next() {
            None => Ok(()),
            Some((name, message)) => Err(CoreError::AccessDenied {
                reason,
                doc_type: doc_type.to_string(),
                id: id.to_string(),
                name,
                message,
            }),
        }
    }
}

impl fmt::Debug for PermissionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionChain")
            .field("filters", &self.filters.len())
            .finish()
    }
}
