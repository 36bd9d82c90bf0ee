//! Statement families and size-bounded chunking.
//!
//! A principal's grant for one family (say, S3 access through access points)
//! may not fit in one statement or one document. Resources are split into
//! indexed statements (`family0`, `family1`, ...) whose encoded size stays
//! under the statement budget, and statements are then packed into as few
//! documents as the same budget allows.

use crate::error::{CoreError, Result};
use crate::policy::{PolicyDocument, Statement};

/// Actions every S3 family statement carries.
pub const S3_ALLOWED_ACTIONS: &[&str] = &["s3:List*", "s3:Describe*", "s3:GetObject"];

/// Actions every KMS family statement carries.
pub const KMS_ALLOWED_ACTIONS: &[&str] = &["kms:*"];

/// Managed policy size limit (compact JSON, characters).
pub const DEFAULT_MAX_POLICY_SIZE: usize = 6144;

/// Room reserved for the document envelope and IAM's own bookkeeping.
pub const DEFAULT_POLICY_HEADER_BUFFER: usize = 144;

/// Widest index the size estimate accounts for.
const SID_INDEX_WIDTH_SAMPLE: usize = 999;

/// The statements of one logical permission grant, identified by sid prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementFamily {
    prefix: String,
    actions: Vec<String>,
}

impl StatementFamily {
    pub fn new<I, S>(prefix: impl Into<String>, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: prefix.into(),
            actions: actions.into_iter().map(Into::into).collect(),
        }
    }

    /// `<base>S3`, carrying [`S3_ALLOWED_ACTIONS`].
    pub fn s3(base: &str) -> Self {
        Self::new(format!("{base}S3"), S3_ALLOWED_ACTIONS.iter().copied())
    }

    /// `<base>KMS`, carrying [`KMS_ALLOWED_ACTIONS`].
    pub fn kms(base: &str) -> Self {
        Self::new(format!("{base}KMS"), KMS_ALLOWED_ACTIONS.iter().copied())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Whether `sid` is the prefix followed by nothing but digits.
    pub fn contains(&self, sid: &str) -> bool {
        sid.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.bytes().all(|b| b.is_ascii_digit()))
    }

    pub fn indexed_sid(&self, index: usize) -> String {
        format!("{}{}", self.prefix, index)
    }
}

/// Size budget shared by statements and documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub max_policy_size: usize,
    pub header_buffer: usize,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_policy_size: DEFAULT_MAX_POLICY_SIZE,
            header_buffer: DEFAULT_POLICY_HEADER_BUFFER,
        }
    }
}

impl SizeLimits {
    pub fn new(max_policy_size: usize, header_buffer: usize) -> Self {
        Self {
            max_policy_size,
            header_buffer,
        }
    }

    /// Bytes available to statements within one document.
    pub fn budget(&self) -> usize {
        self.max_policy_size.saturating_sub(self.header_buffer)
    }
}

/// Encoded cost of one resource entry: quotes plus separator.
pub fn resource_cost(resource: &str) -> usize {
    resource.len() + 3
}

/// Encoded size of a family statement carrying no resources.
pub fn statement_overhead(family: &StatementFamily) -> usize {
    Statement::allow(
        family.indexed_sid(SID_INDEX_WIDTH_SAMPLE),
        family.actions().iter().cloned(),
        Vec::<String>::new(),
    )
    .encoded_len()
}

/// Split `resources` into indexed family statements within the budget.
///
/// Duplicates are dropped, first occurrence wins. An empty list yields no
/// statements.
pub fn split_resources(
    family: &StatementFamily,
    resources: &[String],
    limits: SizeLimits,
) -> Result<Vec<Statement>> {
    let budget = limits.budget();
    let overhead = statement_overhead(family);

    let mut chunks: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut used = overhead;

    for resource in dedup(resources) {
        let cost = resource_cost(&resource);
        if overhead + cost > budget {
            return Err(CoreError::StatementTooLarge {
                sid: family.prefix().to_string(),
                size: overhead + cost,
                limit: budget,
            });
        }
        if !current.is_empty() && used + cost > budget {
            chunks.push(std::mem::take(&mut current));
            used = overhead;
        }
        used += cost;
        current.push(resource);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            Statement::allow(family.indexed_sid(index), family.actions().iter().cloned(), chunk)
        })
        .collect())
}

/// Pack statements, in order, into as few documents as the budget allows.
pub fn pack_statements(statements: Vec<Statement>, limits: SizeLimits) -> Result<Vec<PolicyDocument>> {
    let budget = limits.budget();
    let mut documents = Vec::new();
    let mut current: Vec<Statement> = Vec::new();
    let mut used = 0;

    for statement in statements {
        let cost = statement.encoded_len() + 1;
        if cost > budget {
            return Err(CoreError::StatementTooLarge {
                sid: statement.sid().to_string(),
                size: cost,
                limit: budget,
            });
        }
        if !current.is_empty() && used + cost > budget {
            documents.push(PolicyDocument::new(std::mem::take(&mut current)));
            used = 0;
        }
        used += cost;
        current.push(statement);
    }
    if !current.is_empty() {
        documents.push(PolicyDocument::new(current));
    }
    Ok(documents)
}

/// Order-preserving de-duplication.
pub fn dedup(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}
