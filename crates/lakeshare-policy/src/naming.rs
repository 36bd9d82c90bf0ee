//! Naming conventions for managed policies, access points and ARNs.

/// Maximum length of an IAM policy name.
pub const IAM_POLICY_NAME_MAX: usize = 128;

/// Characters kept free at the end of a base name for `-<index>`.
const INDEX_RESERVE: usize = 4;

/// Maximum length of an access point name.
pub const ACCESS_POINT_NAME_MAX: usize = 50;

/// Names of the indexed share policies of one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyNaming {
    base: String,
    unindexed: String,
}

impl PolicyNaming {
    /// `<resource_prefix>-<environment_id>-share-<role_name>`, made IAM-safe.
    pub fn new(resource_prefix: &str, environment_id: &str, role_name: &str) -> Self {
        let raw = format!("{resource_prefix}-{environment_id}-share-{role_name}");
        let mut unindexed: String = raw
            .chars()
            .map(|c| if is_iam_name_char(c) { c } else { '-' })
            .collect();
        unindexed.truncate(IAM_POLICY_NAME_MAX);
        let mut base = unindexed.clone();
        base.truncate(IAM_POLICY_NAME_MAX - INDEX_RESERVE);
        Self { base, unindexed }
    }

    /// The single managed policy roles carried before policies were indexed.
    pub fn unindexed(&self) -> &str {
        &self.unindexed
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn indexed(&self, index: usize) -> String {
        format!("{}-{}", self.base, index)
    }

    /// The index encoded in `name`, if it belongs to this family of names.
    pub fn parse_index(&self, name: &str) -> Option<usize> {
        let suffix = name.strip_prefix(self.base.as_str())?.strip_prefix('-')?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok()
    }

    pub fn owns(&self, name: &str) -> bool {
        self.parse_index(name).is_some()
    }
}

fn is_iam_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '=' | ',' | '.' | '@' | '_' | '-')
}

/// Lowercase, dash-separated, at most `max` characters.
pub fn slugify(raw: &str, max: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.truncate(max);
    out.trim_end_matches('-').to_string()
}

/// Name of the access point serving `principal_id`'s view of a dataset.
pub fn access_point_name(dataset_id: &str, principal_id: &str) -> String {
    slugify(&format!("{dataset_id}-{principal_id}"), ACCESS_POINT_NAME_MAX)
}

/// The conventional ARN of a role, used when the role itself is gone.
pub fn role_arn(account: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{account}:role/{role_name}")
}

pub fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}")
}

pub fn kms_key_arn(region: &str, account: &str, key_id: &str) -> String {
    format!("arn:aws:kms:{region}:{account}:key/{key_id}")
}

pub fn access_point_arn(region: &str, account: &str, name: &str) -> String {
    format!("arn:aws:s3:{region}:{account}:accesspoint/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexed_names() {
        let naming = PolicyNaming::new("dataall", "env1", "analyst-role");
        assert_eq!(naming.base(), "dataall-env1-share-analyst-role");
        assert_eq!(naming.indexed(3), "dataall-env1-share-analyst-role-3");
        assert_eq!(naming.parse_index("dataall-env1-share-analyst-role-12"), Some(12));
        assert_eq!(naming.parse_index("dataall-env1-share-analyst-role"), None);
        assert_eq!(naming.parse_index("dataall-env1-share-analyst-role-x"), None);
        assert_eq!(naming.parse_index("dataall-env1-share-analyst-role-2-1"), None);
    }

    #[test]
    fn test_long_names_leave_room_for_index() {
        let naming = PolicyNaming::new("p", "e", &"r".repeat(300));
        assert!(naming.indexed(999).len() <= IAM_POLICY_NAME_MAX);
        assert_eq!(naming.unindexed().len(), IAM_POLICY_NAME_MAX);
        assert!(naming.unindexed().starts_with(naming.base()));
        assert!(!naming.owns(naming.unindexed()));
    }

    #[test]
    fn test_unindexed_name_is_not_owned() {
        let naming = PolicyNaming::new("dataall", "env1", "analyst-role");
        assert_eq!(naming.unindexed(), "dataall-env1-share-analyst-role");
        assert!(!naming.owns(naming.unindexed()));
    }

    #[test]
    fn test_unsafe_characters_replaced() {
        let naming = PolicyNaming::new("p", "env/1", "role name");
        assert_eq!(naming.base(), "p-env-1-share-role-name");
    }

    #[test]
    fn test_access_point_name() {
        assert_eq!(access_point_name("DS_01", "Team A"), "ds-01-team-a");
        let long = access_point_name(&"d".repeat(40), &"p".repeat(40));
        assert!(long.len() <= ACCESS_POINT_NAME_MAX);
        assert!(!long.ends_with('-'));
    }

    #[test]
    fn test_arns() {
        assert_eq!(role_arn("111", "r"), "arn:aws:iam::111:role/r");
        assert_eq!(bucket_arn("b"), "arn:aws:s3:::b");
        assert_eq!(kms_key_arn("eu-west-1", "111", "k"), "arn:aws:kms:eu-west-1:111:key/k");
        assert_eq!(
            access_point_arn("eu-west-1", "111", "ap"),
            "arn:aws:s3:eu-west-1:111:accesspoint/ap"
        );
    }
}
