//! Golden transition vectors.
//!
//! Each vector is written with wire names, the way statuses and actions are
//! stored and exchanged, so the tables can be checked from outside Rust.

use std::str::FromStr;

use lakeshare_core::{ShareAction, ShareItemAction, ShareItemStatus, ShareStatus};

/// Which state machine a vector exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    Share,
    Item,
}

/// A golden transition vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub machine: Machine,
    /// Action wire name.
    pub action: &'static str,
    /// Status wire name before the action.
    pub from: &'static str,
    /// Status wire name after the action, or `None` if it is illegal.
    pub expected: Option<&'static str>,
}

const fn share(
    name: &'static str,
    action: &'static str,
    from: &'static str,
    expected: Option<&'static str>,
) -> GoldenVector {
    GoldenVector {
        name,
        machine: Machine::Share,
        action,
        from,
        expected,
    }
}

const fn item(
    name: &'static str,
    action: &'static str,
    from: &'static str,
    expected: Option<&'static str>,
) -> GoldenVector {
    GoldenVector {
        name,
        machine: Machine::Item,
        action,
        from,
        expected,
    }
}

/// Get all golden transition vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        share("submit draft", "Submit", "Draft", Some("Submitted")),
        share("resubmit rejected", "Submit", "Rejected", Some("Submitted")),
        share("submit twice", "Submit", "Submitted", Some("Submitted")),
        share("approve submitted", "Approve", "Submitted", Some("Approved")),
        share("approve draft", "Approve", "Draft", None),
        share("start share", "Start", "Approved", Some("Share_In_Progress")),
        share("start revoke", "Start", "Revoked", Some("Revoke_In_Progress")),
        share("finish share", "Finish", "Share_In_Progress", Some("Processed")),
        share("finish pending", "FinishPending", "Revoke_In_Progress", Some("Draft")),
        share("finish pending after share", "FinishPending", "Share_In_Progress", None),
        share("revoke processed", "RevokeItems", "Processed", Some("Revoked")),
        share("revoke approved", "RevokeItems", "Approved", None),
        share("add item reopens", "AddItem", "Processed", Some("Draft")),
        share("add item to draft", "AddItem", "Draft", Some("Draft")),
        share("lock failure share", "AcquireLockFailure", "Share_In_Progress", Some("Approved")),
        share("lock failure revoke", "AcquireLockFailure", "Revoke_In_Progress", Some("Revoked")),
        share("delete processed", "Delete", "Processed", Some("Deleted")),
        share("delete in progress", "Delete", "Share_In_Progress", None),
        item("approve pending", "Approve", "PendingApproval", Some("Share_Approved")),
        item("approve keeps shared", "Approve", "Share_Succeeded", Some("Share_Succeeded")),
        item("reject pending", "Reject", "PendingApproval", Some("Share_Rejected")),
        item("resubmit failed", "Submit", "Share_Failed", Some("PendingApproval")),
        item("start share", "Start", "Share_Approved", Some("Share_In_Progress")),
        item("start revoke", "Start", "Revoke_Approved", Some("Revoke_In_Progress")),
        item("start pending", "Start", "PendingApproval", None),
        item("share succeeds", "Success", "Share_In_Progress", Some("Share_Succeeded")),
        item("revoke succeeds", "Success", "Revoke_In_Progress", Some("Revoke_Succeeded")),
        item("share fails early", "Failure", "Share_Approved", Some("Share_Failed")),
        item("revoke fails", "Failure", "Revoke_In_Progress", Some("Revoke_Failed")),
        item("revoke shared", "RevokeItems", "Share_Succeeded", Some("Revoke_Approved")),
        item("retry failed revoke", "RevokeItems", "Revoke_Failed", Some("Revoke_Approved")),
        item("revoke pending", "RevokeItems", "PendingApproval", None),
        item("remove revoked", "RemoveItem", "Revoke_Succeeded", Some("Deleted")),
        item("remove shared", "RemoveItem", "Share_Succeeded", None),
        item("delete in progress", "Delete", "Share_In_Progress", None),
        item("lock failure", "AcquireLockFailure", "Share_In_Progress", Some("Share_Approved")),
        item("re-add deleted", "AddItem", "Deleted", Some("PendingApproval")),
    ]
}

/// Apply a vector's action and return the resulting wire name.
///
/// `Ok(None)` means the transition was rejected. `Err` means the vector
/// itself names an unknown action or status.
pub fn apply_vector(vector: &GoldenVector) -> Result<Option<String>, String> {
    match vector.machine {
        Machine::Share => {
            let action = ShareAction::from_str(vector.action).map_err(|e| e.to_string())?;
            let from = ShareStatus::from_str(vector.from).map_err(|e| e.to_string())?;
            Ok(action.apply(from).ok().map(|s| s.as_str().to_string()))
        }
        Machine::Item => {
            let action = ShareItemAction::from_str(vector.action).map_err(|e| e.to_string())?;
            let from = ShareItemStatus::from_str(vector.from).map_err(|e| e.to_string())?;
            Ok(action.apply(from).ok().map(|s| s.as_str().to_string()))
        }
    }
}

/// Verify all vectors. Returns (name, passed, details) for each.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|vector| {
            let expected = vector.expected.map(str::to_string);
            match apply_vector(vector) {
                Ok(actual) if actual == expected => {
                    (vector.name.to_string(), true, format!("{actual:?}"))
                }
                Ok(actual) => (
                    vector.name.to_string(),
                    false,
                    format!("expected {expected:?}, got {actual:?}"),
                ),
                Err(e) => (vector.name.to_string(), false, e),
            }
        })
        .collect()
}
