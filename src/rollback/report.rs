//! Outcome of a rollback

use serde::Serialize;

/// What a rollback did and what it could not do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Steps that were reverted
    pub actions: Vec<String>,
    /// Steps that could not be reverted and need manual review
    pub warnings: Vec<String>,
}

impl RollbackReport {
    /// Whether every recorded change was reverted
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// One-paragraph description for the operator
    pub fn summary(&self) -> String {
        if self.is_clean() {
            return format!(
                "Rollback completed: all changes were reverted ({} action(s)).",
                self.actions.len()
            );
        }

        let mut text = format!(
            "Rollback completed with {} warning(s); manual review required:",
            self.warnings.len()
        );
        for warning in &self.warnings {
            text.push_str("\n  - ");
            text.push_str(warning);
        }
        text
    }
}
