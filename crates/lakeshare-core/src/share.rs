//! Share objects and the share state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::transition::Transition;
use crate::types::{
    now_millis, wire_enum, DatasetId, EnvironmentId, PrincipalId, PrincipalKind, ShareId,
};

wire_enum!(
    /// Overall status of a share request.
    ShareStatus ("share status") {
        Draft => "Draft",
        Submitted => "Submitted",
        Approved => "Approved",
        Rejected => "Rejected",
        Revoked => "Revoked",
        ShareInProgress => "Share_In_Progress",
        RevokeInProgress => "Revoke_In_Progress",
        Processed => "Processed",
        Deleted => "Deleted",
    }
);

wire_enum!(
    /// Actions that move a share between statuses.
    ShareAction ("share action") {
        Submit => "Submit",
        Approve => "Approve",
        Reject => "Reject",
        RevokeItems => "RevokeItems",
        Start => "Start",
        Finish => "Finish",
        FinishPending => "FinishPending",
        Delete => "Delete",
        AddItem => "AddItem",
        AcquireLockFailure => "AcquireLockFailure",
    }
);

impl ShareAction {
    /// The transition table row for this action.
    pub fn transition(self) -> Transition<ShareStatus> {
        use ShareStatus::*;
        match self {
            ShareAction::Submit => {
                Transition::new("Submit", &[(Draft, Submitted), (Rejected, Submitted)])
            }
            ShareAction::Approve => Transition::new("Approve", &[(Submitted, Approved)]),
            ShareAction::Reject => Transition::new("Reject", &[(Submitted, Rejected)]),
            ShareAction::RevokeItems => Transition::new(
                "RevokeItems",
                &[
                    (Draft, Revoked),
                    (Submitted, Revoked),
                    (Rejected, Revoked),
                    (Processed, Revoked),
                ],
            ),
            ShareAction::Start => Transition::new(
                "Start",
                &[(Approved, ShareInProgress), (Revoked, RevokeInProgress)],
            ),
            ShareAction::Finish => Transition::new(
                "Finish",
                &[(ShareInProgress, Processed), (RevokeInProgress, Processed)],
            ),
            ShareAction::FinishPending => {
                Transition::new("FinishPending", &[(RevokeInProgress, Draft)])
            }
            ShareAction::Delete => Transition::new(
                "Delete",
                &[
                    (Rejected, Deleted),
                    (Draft, Deleted),
                    (Submitted, Deleted),
                    (Processed, Deleted),
                ],
            ),
            ShareAction::AddItem => Transition::new(
                "AddItem",
                &[(Submitted, Draft), (Rejected, Draft), (Processed, Draft)],
            ),
            ShareAction::AcquireLockFailure => Transition::new(
                "AcquireLockFailure",
                &[(ShareInProgress, Approved), (RevokeInProgress, Revoked)],
            ),
        }
    }

    /// Apply this action to a share in status `state`.
    pub fn apply(self, state: ShareStatus) -> Result<ShareStatus> {
        self.transition().resolve(state)
    }
}

/// The principal receiving access through a share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePrincipal {
    pub id: PrincipalId,
    pub kind: PrincipalKind,
    /// Name of the execution role that actually receives the policies.
    pub role_name: String,
}

impl SharePrincipal {
    pub fn new(id: impl Into<PrincipalId>, kind: PrincipalKind, role_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            role_name: role_name.into(),
        }
    }
}

/// One sharing relationship between a dataset and a principal in an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareObject {
    pub id: ShareId,
    pub dataset_id: DatasetId,
    pub environment_id: EnvironmentId,
    pub principal: SharePrincipal,
    pub owner: String,
    pub status: ShareStatus,
    /// Creation time (Unix ms).
    pub created_at: i64,
    /// Last status change (Unix ms).
    pub updated_at: i64,
}

impl ShareObject {
    /// Open a new share in `Draft`.
    pub fn new(
        dataset_id: DatasetId,
        environment_id: EnvironmentId,
        principal: SharePrincipal,
        owner: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: ShareId::generate(),
            dataset_id,
            environment_id,
            principal,
            owner: owner.into(),
            status: ShareStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the share still counts toward the one-share-per-tuple rule.
    pub fn is_active(&self) -> bool {
        self.status != ShareStatus::Deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ShareStatus::*;

    fn declared(action: ShareAction) -> &'static [(ShareStatus, ShareStatus)] {
        match action {
            ShareAction::Submit => &[(Draft, Submitted), (Rejected, Submitted)],
            ShareAction::Approve => &[(Submitted, Approved)],
            ShareAction::Reject => &[(Submitted, Rejected)],
            ShareAction::RevokeItems => &[
                (Draft, Revoked),
                (Submitted, Revoked),
                (Rejected, Revoked),
                (Processed, Revoked),
            ],
            ShareAction::Start => &[(Approved, ShareInProgress), (Revoked, RevokeInProgress)],
            ShareAction::Finish => &[(ShareInProgress, Processed), (RevokeInProgress, Processed)],
            ShareAction::FinishPending => &[(RevokeInProgress, Draft)],
            ShareAction::Delete => &[
                (Rejected, Deleted),
                (Draft, Deleted),
                (Submitted, Deleted),
                (Processed, Deleted),
            ],
            ShareAction::AddItem => &[(Submitted, Draft), (Rejected, Draft), (Processed, Draft)],
            ShareAction::AcquireLockFailure => {
                &[(ShareInProgress, Approved), (RevokeInProgress, Revoked)]
            }
        }
    }

    #[test]
    fn test_every_action_agrees_with_table() {
        for action in ShareAction::ALL {
            let rules = declared(*action);
            for state in ShareStatus::ALL {
                let result = action.apply(*state);
                if rules.iter().any(|(_, t)| t == state) {
                    assert_eq!(result.unwrap(), *state, "{action} on {state} should be a no-op");
                } else if let Some((_, target)) = rules.iter().find(|(s, _)| s == state) {
                    assert_eq!(result.unwrap(), *target, "{action} on {state}");
                } else {
                    assert!(
                        matches!(result, Err(CoreError::IllegalTransition { .. })),
                        "{action} on {state} should be illegal"
                    );
                }
            }
        }
    }

    #[test]
    fn test_happy_path() {
        let s = ShareAction::Submit.apply(Draft).unwrap();
        let s = ShareAction::Approve.apply(s).unwrap();
        let s = ShareAction::Start.apply(s).unwrap();
        assert_eq!(s, ShareInProgress);
        assert_eq!(ShareAction::Finish.apply(s).unwrap(), Processed);
    }

    #[test]
    fn test_lock_failure_rolls_back() {
        assert_eq!(ShareAction::AcquireLockFailure.apply(ShareInProgress).unwrap(), Approved);
        assert_eq!(ShareAction::AcquireLockFailure.apply(RevokeInProgress).unwrap(), Revoked);
    }

    #[test]
    fn test_deleted_is_terminal() {
        for action in ShareAction::ALL {
            if *action == ShareAction::Delete {
                continue;
            }
            assert!(action.apply(Deleted).is_err(), "{action} should not leave Deleted");
        }
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(ShareInProgress.to_string(), "Share_In_Progress");
        assert_eq!("Revoke_In_Progress".parse::<ShareStatus>().unwrap(), RevokeInProgress);
        assert_eq!(
            serde_json::to_string(&ShareInProgress).unwrap(),
            "\"Share_In_Progress\""
        );
    }
}
