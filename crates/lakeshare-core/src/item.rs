//! Share items and the item state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::transition::Transition;
use crate::types::{now_millis, wire_enum, HealthStatus, ItemId, ItemKind, ResourceId, ShareId};

wire_enum!(
    /// Status of one item within a share.
    ShareItemStatus ("share item status") {
        PendingApproval => "PendingApproval",
        ShareApproved => "Share_Approved",
        ShareRejected => "Share_Rejected",
        ShareFailed => "Share_Failed",
        ShareInProgress => "Share_In_Progress",
        ShareSucceeded => "Share_Succeeded",
        RevokeApproved => "Revoke_Approved",
        RevokeFailed => "Revoke_Failed",
        RevokeInProgress => "Revoke_In_Progress",
        RevokeSucceeded => "Revoke_Succeeded",
        Deleted => "Deleted",
    }
);

wire_enum!(
    /// Actions that move an item between statuses.
    ShareItemAction ("share item action") {
        AddItem => "AddItem",
        Submit => "Submit",
        Approve => "Approve",
        Reject => "Reject",
        Start => "Start",
        Success => "Success",
        Failure => "Failure",
        RemoveItem => "RemoveItem",
        RevokeItems => "RevokeItems",
        Delete => "Delete",
        AcquireLockFailure => "AcquireLockFailure",
    }
);

impl ShareItemStatus {
    /// States in which the principal currently holds (or is about to lose) access.
    pub const SHARED: &'static [ShareItemStatus] = &[
        ShareItemStatus::ShareSucceeded,
        ShareItemStatus::ShareInProgress,
        ShareItemStatus::RevokeFailed,
        ShareItemStatus::RevokeInProgress,
        ShareItemStatus::RevokeApproved,
    ];

    /// States from which a revoke may be requested.
    pub const REVOKABLE: &'static [ShareItemStatus] =
        &[ShareItemStatus::ShareSucceeded, ShareItemStatus::RevokeFailed];

    pub fn is_shared(self) -> bool {
        Self::SHARED.contains(&self)
    }

    pub fn is_revokable(self) -> bool {
        Self::REVOKABLE.contains(&self)
    }
}

impl ShareItemAction {
    /// The transition table row for this action.
    pub fn transition(self) -> Transition<ShareItemStatus> {
        use ShareItemStatus::*;
        match self {
            ShareItemAction::AddItem => Transition::new("AddItem", &[(Deleted, PendingApproval)]),
            ShareItemAction::Submit => Transition::new(
                "Submit",
                &[
                    (ShareRejected, PendingApproval),
                    (ShareFailed, PendingApproval),
                    (RevokeApproved, RevokeApproved),
                    (RevokeFailed, RevokeFailed),
                    (ShareApproved, ShareApproved),
                    (ShareSucceeded, ShareSucceeded),
                    (RevokeSucceeded, RevokeSucceeded),
                    (ShareInProgress, ShareInProgress),
                    (RevokeInProgress, RevokeInProgress),
                ],
            ),
            ShareItemAction::Approve => Transition::new(
                "Approve",
                &[
                    (PendingApproval, ShareApproved),
                    (RevokeApproved, RevokeApproved),
                    (RevokeFailed, RevokeFailed),
                    (ShareSucceeded, ShareSucceeded),
                    (RevokeSucceeded, RevokeSucceeded),
                    (ShareInProgress, ShareInProgress),
                    (RevokeInProgress, RevokeInProgress),
                ],
            ),
            ShareItemAction::Reject => Transition::new(
                "Reject",
                &[
                    (PendingApproval, ShareRejected),
                    (RevokeApproved, RevokeApproved),
                    (RevokeFailed, RevokeFailed),
                    (ShareSucceeded, ShareSucceeded),
                    (RevokeSucceeded, RevokeSucceeded),
                    (ShareInProgress, ShareInProgress),
                    (RevokeInProgress, RevokeInProgress),
                ],
            ),
            ShareItemAction::Start => Transition::new(
                "Start",
                &[
                    (ShareApproved, ShareInProgress),
                    (RevokeApproved, RevokeInProgress),
                ],
            ),
            ShareItemAction::Success => Transition::new(
                "Success",
                &[
                    (ShareInProgress, ShareSucceeded),
                    (RevokeInProgress, RevokeSucceeded),
                ],
            ),
            ShareItemAction::Failure => Transition::new(
                "Failure",
                &[
                    (ShareInProgress, ShareFailed),
                    (ShareApproved, ShareFailed),
                    (RevokeInProgress, RevokeFailed),
                    (RevokeApproved, RevokeFailed),
                ],
            ),
            ShareItemAction::RemoveItem => Transition::new(
                "RemoveItem",
                &[
                    (PendingApproval, Deleted),
                    (ShareRejected, Deleted),
                    (ShareFailed, Deleted),
                    (RevokeSucceeded, Deleted),
                ],
            ),
            ShareItemAction::Delete => Transition::new(
                "Delete",
                &[
                    (PendingApproval, Deleted),
                    (ShareRejected, Deleted),
                    (ShareFailed, Deleted),
                    (RevokeSucceeded, Deleted),
                ],
            ),
            ShareItemAction::RevokeItems => Transition::new(
                "RevokeItems",
                &[
                    (ShareSucceeded, RevokeApproved),
                    (RevokeFailed, RevokeApproved),
                ],
            ),
            ShareItemAction::AcquireLockFailure => Transition::new(
                "AcquireLockFailure",
                &[
                    (ShareInProgress, ShareApproved),
                    (RevokeInProgress, RevokeApproved),
                ],
            ),
        }
    }

    /// Apply this action to an item in status `state`.
    pub fn apply(self, state: ShareItemStatus) -> Result<ShareItemStatus> {
        self.transition().resolve(state)
    }
}

/// The resource an item points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareableResource {
    pub id: ResourceId,
    pub kind: ItemKind,
}

/// Outcome of the most recent verification of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemHealth {
    pub status: HealthStatus,
    pub message: Option<String>,
    /// When the item was last verified (Unix ms).
    pub last_verification_time: Option<i64>,
}

impl Default for ItemHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::PendingVerify,
            message: None,
            last_verification_time: None,
        }
    }
}

impl ItemHealth {
    pub fn healthy(at: i64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
            last_verification_time: Some(at),
        }
    }

    pub fn unhealthy(message: impl Into<String>, at: i64) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            last_verification_time: Some(at),
        }
    }
}

/// One shareable unit attached to a share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareItem {
    pub id: ItemId,
    pub share_id: ShareId,
    pub resource: ShareableResource,
    pub status: ShareItemStatus,
    pub health: ItemHealth,
    /// Creation time (Unix ms).
    pub created_at: i64,
    /// Last status change (Unix ms).
    pub updated_at: i64,
}

impl ShareItem {
    /// A freshly added item, awaiting approval.
    pub fn new(share_id: ShareId, resource_id: impl Into<ResourceId>, kind: ItemKind) -> Self {
        let now = now_millis();
        Self {
            id: ItemId::generate(),
            share_id,
            resource: ShareableResource {
                id: resource_id.into(),
                kind,
            },
            status: ShareItemStatus::PendingApproval,
            health: ItemHealth::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
