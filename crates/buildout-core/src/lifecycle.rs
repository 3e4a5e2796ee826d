use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Where a part stands during a run.
///
/// `Failed` is transient: the attempt's side effects are rolled back and
/// the part returns to `Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PartState {
    Absent,
    Installed,
    Updated,
    Failed,
    Uninstalled,
}

impl fmt::Display for PartState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartState::Absent => "absent",
            PartState::Installed => "installed",
            PartState::Updated => "updated",
            PartState::Failed => "failed",
            PartState::Uninstalled => "uninstalled",
        })
    }
}

pub fn validate_transition(from: PartState, to: PartState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (PartState::Absent | PartState::Uninstalled, PartState::Installed)
            | (
                PartState::Installed | PartState::Updated,
                PartState::Updated | PartState::Uninstalled
            )
            | (
                PartState::Absent | PartState::Installed | PartState::Updated,
                PartState::Failed
            )
            | (PartState::Failed | PartState::Uninstalled, PartState::Absent)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}
