//! Helpers shared by the managers: role and key resolution, and principal
//! lists in resource and key policies.

use std::time::Duration;

use lakeshare_core::{PolicyDocument, Principal, Statement};
use tracing::warn;

use super::{DatasetLocation, PrincipalContext};
use crate::cloud::{bounded, IamClient, KmsClient};
use crate::error::{PolicyError, Result};
use crate::findings::{Finding, FindingKind};
use crate::naming::{kms_key_arn, role_arn};

/// A key resolved from its alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedKey {
    pub id: String,
    pub arn: String,
}

/// The principal's role ARN. A missing role is an error.
pub(crate) async fn require_role_arn(
    iam: &dyn IamClient,
    principal: &PrincipalContext,
    timeout: Duration,
) -> Result<String> {
    bounded(timeout, "iam:GetRole", iam.get_role_arn(&principal.role_name))
        .await?
        .ok_or_else(|| PolicyError::PrincipalNotFound(principal.role_name.clone()))
}

/// The principal's role ARN, or its conventional form if the role is gone.
pub(crate) async fn role_arn_or_conventional(
    iam: &dyn IamClient,
    principal: &PrincipalContext,
    timeout: Duration,
) -> Result<String> {
    let arn = bounded(timeout, "iam:GetRole", iam.get_role_arn(&principal.role_name)).await?;
    Ok(arn.unwrap_or_else(|| {
        warn!(role = %principal.role_name, "role no longer exists, using conventional arn");
        role_arn(&principal.account, &principal.role_name)
    }))
}

/// The key encrypting the dataset bucket, if the dataset has one and it exists.
pub(crate) async fn resolve_key(
    kms: &dyn KmsClient,
    location: &DatasetLocation,
    timeout: Duration,
) -> Result<Option<ResolvedKey>> {
    let Some(alias) = &location.kms_alias else {
        return Ok(None);
    };
    let id = bounded(timeout, "kms:DescribeKey", kms.get_key_id(alias)).await?;
    match id {
        Some(id) => Ok(Some(ResolvedKey {
            arn: kms_key_arn(&location.region, &location.account, &id),
            id,
        })),
        None => {
            warn!(alias = %alias, bucket = %location.bucket, "dataset key alias does not resolve");
            Ok(None)
        }
    }
}

/// Add `arn` to the AWS principals of statement `sid`, creating the statement
/// with `template` if absent. Returns whether the document changed.
pub(crate) fn add_principal(
    document: &mut PolicyDocument,
    sid: &str,
    arn: &str,
    template: impl FnOnce() -> Statement,
) -> bool {
    match document.statement_mut(sid) {
        Some(statement) => match statement.principal.as_mut().and_then(Principal::aws_list_mut) {
            Some(list) => list.insert(arn),
            None => {
                statement.principal = Some(Principal::aws([arn]));
                true
            }
        },
        None => {
            document
                .statements
                .push(template().with_principal(Principal::aws([arn])));
            true
        }
    }
}

/// Remove `arn` from statement `sid`, dropping the statement once no
/// principal is left. Returns whether the document changed.
pub(crate) fn remove_principal(document: &mut PolicyDocument, sid: &str, arn: &str) -> bool {
    let Some(statement) = document.statement_mut(sid) else {
        return false;
    };
    let Some(list) = statement.principal.as_mut().and_then(Principal::aws_list_mut) else {
        return false;
    };
    if !list.remove(arn) {
        return false;
    }
    if list.is_empty() {
        document.remove(sid);
    }
    true
}

/// Findings for statement `sid` of `document` not granting `arn`.
pub(crate) fn principal_findings(
    document: Option<&PolicyDocument>,
    sid: &str,
    arn: &str,
    resource: &str,
) -> Vec<Finding> {
    let Some(document) = document else {
        return vec![Finding::missing(arn, resource)];
    };
    let Some(statement) = document.statement(sid) else {
        return vec![Finding::new(
            FindingKind::MissingStatement,
            arn,
            format!("{resource}/{sid}"),
            sid,
            "absent",
        )];
    };
    let listed = statement
        .principal
        .as_ref()
        .and_then(Principal::aws_list)
        .map_or(false, |list| list.contains(arn));
    if listed {
        Vec::new()
    } else {
        vec![Finding::new(
            FindingKind::MissingPrincipal,
            arn,
            format!("{resource}/{sid}"),
            arn,
            "not listed",
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Statement {
        Statement::allow("Decrypt", ["kms:Decrypt"], ["*"])
    }

    #[test]
    fn test_add_creates_then_extends() {
        let mut doc = PolicyDocument::new(Vec::new());
        assert!(add_principal(&mut doc, "Decrypt", "arn:a", template));
        assert!(add_principal(&mut doc, "Decrypt", "arn:b", template));
        assert!(!add_principal(&mut doc, "Decrypt", "arn:a", template));

        let list = doc.statement("Decrypt").unwrap().principal.as_ref().unwrap();
        assert_eq!(list.aws_list().unwrap().len(), 2);
        assert_eq!(doc.statements.len(), 1);
    }

    #[test]
    fn test_remove_keeps_other_principals() {
        let mut doc = PolicyDocument::new(Vec::new());
        add_principal(&mut doc, "Decrypt", "arn:a", template);
        add_principal(&mut doc, "Decrypt", "arn:b", template);

        assert!(remove_principal(&mut doc, "Decrypt", "arn:a"));
        assert!(!remove_principal(&mut doc, "Decrypt", "arn:a"));
        assert!(doc.statement("Decrypt").is_some());

        assert!(remove_principal(&mut doc, "Decrypt", "arn:b"));
        assert!(doc.statement("Decrypt").is_none());
    }

    #[test]
    fn test_principal_findings() {
        let mut doc = PolicyDocument::new(Vec::new());
        assert_eq!(
            principal_findings(Some(&doc), "Decrypt", "arn:a", "key")[0].kind,
            FindingKind::MissingStatement
        );
        add_principal(&mut doc, "Decrypt", "arn:b", template);
        assert_eq!(
            principal_findings(Some(&doc), "Decrypt", "arn:a", "key")[0].kind,
            FindingKind::MissingPrincipal
        );
        add_principal(&mut doc, "Decrypt", "arn:a", template);
        assert!(principal_findings(Some(&doc), "Decrypt", "arn:a", "key").is_empty());
        assert_eq!(
            principal_findings(None, "Decrypt", "arn:a", "key")[0].kind,
            FindingKind::ResourceMissing
        );
    }
}
