//! Declaration errors for workflow builders.
//!
//! Run-time failures are never returned as errors; they are reported as
//! [`ErrorKind`](braid_types::ErrorKind) on the workflow result.

use thiserror::Error;

/// Result type for workflow declaration.
pub type Result<T> = std::result::Result<T, DeclarationError>;

/// Errors that can occur while declaring a workflow.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeclarationError {
    /// A pipeline was declared without steps.
    #[error("Pipeline '{0}' has no steps")]
    EmptyPipeline(String),

    /// A parallel workflow was declared without branches.
    #[error("Parallel workflow '{0}' has no branches")]
    NoBranches(String),

    /// A router was declared without routes.
    #[error("Router '{0}' has no routes")]
    NoRoutes(String),

    /// A router was declared without a classifier.
    #[error("Router '{0}' has no classifier")]
    MissingClassifier(String),

    /// Two steps, branches, or routes share a name.
    #[error("Duplicate name '{name}' in workflow '{workflow}'")]
    DuplicateName { workflow: String, name: String },

    /// A step, branch, or route was declared with an empty name.
    #[error("Empty member name in workflow '{0}'")]
    EmptyName(String),

    /// A member uses a name the engine reserves.
    #[error("Name '{name}' is reserved in workflow '{workflow}'")]
    ReservedName { workflow: String, name: String },

    /// The default route label matches no declared route.
    #[error("Default route '{label}' is not declared in router '{workflow}'")]
    UnknownDefaultRoute { workflow: String, label: String },

    /// A budget limit is negative or not a number.
    #[error("Invalid budget: {0}")]
    InvalidBudget(String),
}

/// Reject duplicate and empty member names.
pub(crate) fn check_unique_names<'a>(
    workflow: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(DeclarationError::EmptyName(workflow.to_string()));
        }
        if !seen.insert(name) {
            return Err(DeclarationError::DuplicateName {
                workflow: workflow.to_string(),
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names() {
        assert!(check_unique_names("wf", ["a", "b", "c"]).is_ok());

        let err = check_unique_names("wf", ["a", "b", "a"]).unwrap_err();
        assert_eq!(
            err,
            DeclarationError::DuplicateName {
                workflow: "wf".into(),
                name: "a".into()
            }
        );
    }

    #[test]
    fn test_empty_name() {
        let err = check_unique_names("wf", ["a", ""]).unwrap_err();
        assert_eq!(err, DeclarationError::EmptyName("wf".into()));
        assert_eq!(err.to_string(), "Empty member name in workflow 'wf'");
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            DeclarationError::EmptyPipeline("etl".into()).to_string(),
            "Pipeline 'etl' has no steps"
        );
    }
}
