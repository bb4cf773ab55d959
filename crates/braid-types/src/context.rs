//! Per-run context threaded through workflow steps.
//!
//! The context holds the original input plus every outcome produced so far,
//! in the order they were committed. It is append-only: a name is written at
//! most once per run.

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::outcome::Outcome;

/// Ordered, append-only mapping from step name to [`Outcome`].
#[derive(Debug, Clone, Serialize)]
pub struct Context {
    input: Value,
    entries: Vec<Outcome>,
}

impl Context {
    /// Create an empty context for a run started with `input`.
    pub fn new(input: Value) -> Self {
        Self {
            input,
            entries: Vec::new(),
        }
    }

    /// The input the run was started with.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Commit an outcome under its name.
    ///
    /// Fails if the name has already been written in this run.
    pub fn insert(&mut self, outcome: Outcome) -> Result<()> {
        if self.contains(&outcome.name) {
            return Err(Error::DuplicateEntry(outcome.name));
        }
        self.entries.push(outcome);
        Ok(())
    }

    /// Return this context extended by one outcome.
    pub fn with(mut self, outcome: Outcome) -> Result<Self> {
        self.insert(outcome)?;
        Ok(self)
    }

    /// Look up an outcome by name. `None` means "not yet produced".
    pub fn get(&self, name: &str) -> Option<&Outcome> {
        self.entries.iter().find(|o| o.name == name)
    }

    /// Content of a step that ran and succeeded.
    ///
    /// Skipped and failed steps are treated as absent.
    pub fn content(&self, name: &str) -> Option<&Value> {
        self.get(name)
            .filter(|o| o.is_success())
            .map(|o| &o.content)
    }

    /// Whether an outcome has been committed under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|o| o.name == name)
    }

    /// Content of the most recent successful step, or the run input when no
    /// step has succeeded yet.
    pub fn last_content(&self) -> &Value {
        self.entries
            .iter()
            .rev()
            .find(|o| o.is_success())
            .map(|o| &o.content)
            .unwrap_or(&self.input)
    }

    /// Committed outcomes in commit order.
    pub fn outcomes(&self) -> &[Outcome] {
        &self.entries
    }

    /// Names of committed outcomes in commit order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|o| o.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the context, yielding its outcomes in commit order.
    pub fn into_outcomes(self) -> Vec<Outcome> {
        self.entries
    }
}
