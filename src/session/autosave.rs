/// Auto-save trigger policy
///
/// Pure decision function: given how many validation events happened since
/// the last full save and whether the workflow's node list changed, decide
/// whether the session store should write through to the remote store and
/// take an automatic checkpoint.

use serde::Serialize;
use std::fmt;

/// Why an auto-save fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSaveReason {
    /// Validation events since the last save reached the threshold
    ValidationThreshold,
    /// `state.workflow.nodes` changed
    NodesChanged,
}

impl fmt::Display for AutoSaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoSaveReason::ValidationThreshold => f.write_str("validation threshold"),
            AutoSaveReason::NodesChanged => f.write_str("workflow nodes changed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSavePolicy {
    /// 0 disables the validation-count trigger
    every_n_validations: u32,
}

impl AutoSavePolicy {
    pub fn new(every_n_validations: u32) -> Self {
        Self { every_n_validations }
    }

    pub fn evaluate(&self, validations_since_save: u32, nodes_changed: bool) -> Option<AutoSaveReason> {
        if self.every_n_validations > 0 && validations_since_save >= self.every_n_validations {
            Some(AutoSaveReason::ValidationThreshold)
        } else if nodes_changed {
            Some(AutoSaveReason::NodesChanged)
        } else {
            None
        }
    }
}

impl Default for AutoSavePolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
