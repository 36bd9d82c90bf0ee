//! Observed and desired sets of indexed policy documents.
//!
//! A [`PolicySet`] is an immutable snapshot of every indexed document a
//! principal holds. Granting or revoking produces a new desired layout and a
//! [`PolicyPlan`] describing the writes that turn one into the other; all
//! cloud I/O happens outside this module.

use std::collections::{BTreeMap, BTreeSet};

use crate::chunking::{dedup, pack_statements, split_resources, SizeLimits, StatementFamily};
use crate::error::Result;
use crate::policy::{PolicyDocument, Statement};

/// Indexed documents belonging to one principal, keyed by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    documents: BTreeMap<usize, PolicyDocument>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: impl IntoIterator<Item = (usize, PolicyDocument)>) -> Self {
        Self {
            documents: documents.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, index: usize, document: PolicyDocument) {
        self.documents.insert(index, document);
    }

    pub fn documents(&self) -> &BTreeMap<usize, PolicyDocument> {
        &self.documents
    }

    pub fn get(&self, index: usize) -> Option<&PolicyDocument> {
        self.documents.get(&index)
    }

    pub fn indexes(&self) -> Vec<usize> {
        self.documents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Every statement across all documents, in index order.
    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.documents.values().flat_map(|doc| doc.statements.iter())
    }

    pub fn family_statements<'a>(&'a self, family: &'a StatementFamily) -> Vec<&'a Statement> {
        self.statements()
            .filter(|s| family.contains(s.sid()))
            .collect()
    }

    pub fn has_family(&self, family: &StatementFamily) -> bool {
        self.statements().any(|s| family.contains(s.sid()))
    }

    /// Union of the family's resources, first occurrence order.
    pub fn aggregate(&self, family: &StatementFamily) -> Vec<String> {
        let all: Vec<String> = self
            .family_statements(family)
            .into_iter()
            .flat_map(|s| s.resources.iter().cloned())
            .collect();
        dedup(&all)
    }

    /// The full statement list with `family` rewritten to carry `resources`.
    ///
    /// Statements of other families keep their relative order. The family is
    /// re-chunked in place of its first statement, or appended if absent.
    /// Placeholders are dropped.
    pub fn with_family(
        &self,
        family: &StatementFamily,
        resources: &[String],
        limits: SizeLimits,
    ) -> Result<Vec<Statement>> {
        let mut chunks = Some(split_resources(family, resources, limits)?);
        let mut out = Vec::new();

        for statement in self.statements() {
            if statement.is_placeholder() {
                continue;
            }
            if family.contains(statement.sid()) {
                if let Some(chunks) = chunks.take() {
                    out.extend(chunks);
                }
                continue;
            }
            out.push(statement.clone());
        }
        if let Some(chunks) = chunks {
            out.extend(chunks);
        }
        Ok(out)
    }

    /// Desired documents after adding `resources` to `family`.
    pub fn granted(
        &self,
        family: &StatementFamily,
        resources: &[String],
        limits: SizeLimits,
    ) -> Result<Vec<PolicyDocument>> {
        let mut merged = self.aggregate(family);
        merged.extend(resources.iter().cloned());
        let merged = dedup(&merged);
        pack_statements(self.with_family(family, &merged, limits)?, limits)
    }

    /// Desired documents after removing `resources` from `family`.
    pub fn revoked(
        &self,
        family: &StatementFamily,
        resources: &[String],
        limits: SizeLimits,
    ) -> Result<Vec<PolicyDocument>> {
        let remaining: Vec<String> = self
            .aggregate(family)
            .into_iter()
            .filter(|r| !resources.contains(r))
            .collect();
        pack_statements(self.with_family(family, &remaining, limits)?, limits)
    }

    /// Number of documents that would exist after applying `plan`.
    pub fn count_after(&self, plan: &PolicyPlan) -> usize {
        self.len() + plan.creates.len() - plan.deletes.len()
    }

    /// Writes needed to move from this set to `desired`.
    ///
    /// Existing slots are reused in index order before new indexes are
    /// allocated. Slots left over either receive the placeholder document or,
    /// with `prune_empty`, are deleted.
    pub fn plan(&self, desired: Vec<PolicyDocument>, prune_empty: bool) -> PolicyPlan {
        let mut plan = PolicyPlan::default();
        let existing = self.indexes();
        let mut used: BTreeSet<usize> = existing.iter().copied().collect();
        let mut slots = existing.iter().copied();

        for document in desired {
            match slots.next() {
                Some(index) => {
                    if self.documents.get(&index) != Some(&document) {
                        plan.updates.push((index, document));
                    }
                }
                None => {
                    let index = next_free(&used);
                    used.insert(index);
                    plan.creates.push((index, document));
                }
            }
        }

        for index in slots {
            if prune_empty {
                plan.deletes.push(index);
            } else if self
                .documents
                .get(&index)
                .map_or(true, |doc| *doc != PolicyDocument::empty())
            {
                plan.updates.push((index, PolicyDocument::empty()));
            }
        }
        plan
    }
}

fn next_free(used: &BTreeSet<usize>) -> usize {
    (0..).find(|i| !used.contains(i)).unwrap_or(used.len())
}

/// Document writes computed by [`PolicySet::plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyPlan {
    pub creates: Vec<(usize, PolicyDocument)>,
    pub updates: Vec<(usize, PolicyDocument)>,
    pub deletes: Vec<usize>,
}

impl PolicyPlan {
    /// True when nothing needs writing.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// How a family deviates from a desired resource and action set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyDrift {
    /// No statement of the family exists at all.
    pub family_missing: bool,
    pub missing_resources: Vec<String>,
    /// Resources listed more than once across the family's statements.
    pub duplicate_resources: Vec<String>,
    pub missing_actions: Vec<String>,
    pub extra_actions: Vec<String>,
}

impl FamilyDrift {
    pub fn is_clean(&self) -> bool {
        !self.family_missing
            && self.missing_resources.is_empty()
            && self.duplicate_resources.is_empty()
            && self.missing_actions.is_empty()
            && self.extra_actions.is_empty()
    }
}

/// Compare the family in `set` against `resources` and the family's actions.
///
/// Action sets are compared exactly on every statement of the family. A
/// resource must appear once in the whole family.
pub fn family_drift(set: &PolicySet, family: &StatementFamily, resources: &[String]) -> FamilyDrift {
    let statements = set.family_statements(family);
    if statements.is_empty() {
        return FamilyDrift {
            family_missing: true,
            ..FamilyDrift::default()
        };
    }

    let present = set.aggregate(family);
    let missing_resources = dedup(resources)
        .into_iter()
        .filter(|r| !present.contains(r))
        .collect();

    let mut seen = BTreeSet::new();
    let mut duplicate_resources = Vec::new();
    for resource in statements.iter().flat_map(|s| s.resources.iter()) {
        if !seen.insert(resource.as_str()) && !duplicate_resources.contains(resource) {
            duplicate_resources.push(resource.clone());
        }
    }

    let mut missing_actions = Vec::new();
    let mut extra_actions = Vec::new();
    for statement in statements {
        for action in family.actions() {
            if !statement.actions.contains(action) && !missing_actions.contains(action) {
                missing_actions.push(action.clone());
            }
        }
        for action in statement.actions.iter() {
            if !family.actions().contains(action) && !extra_actions.contains(action) {
                extra_actions.push(action.clone());
            }
        }
    }

    FamilyDrift {
        family_missing: false,
        missing_resources,
        duplicate_resources,
        missing_actions,
        extra_actions,
    }
}
