//! Proptest generators for property-based testing.

use proptest::prelude::*;

use lakeshare_core::{
    PolicyDocument, PolicySet, ShareAction, ShareItemAction, ShareItemStatus, ShareStatus,
    SizeLimits, StatementFamily,
};

/// Generate a share status.
pub fn share_status() -> impl Strategy<Value = ShareStatus> {
    prop::sample::select(ShareStatus::ALL.to_vec())
}

/// Generate a share action.
pub fn share_action() -> impl Strategy<Value = ShareAction> {
    prop::sample::select(ShareAction::ALL.to_vec())
}

/// Generate an item status.
pub fn item_status() -> impl Strategy<Value = ShareItemStatus> {
    prop::sample::select(ShareItemStatus::ALL.to_vec())
}

/// Generate an item action.
pub fn item_action() -> impl Strategy<Value = ShareItemAction> {
    prop::sample::select(ShareItemAction::ALL.to_vec())
}

/// Generate a bucket or object ARN.
pub fn resource_arn() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z][a-z0-9-]{2,40}".prop_map(|bucket| format!("arn:aws:s3:::{bucket}")),
        "[a-z][a-z0-9-]{2,40}".prop_map(|bucket| format!("arn:aws:s3:::{bucket}/*")),
        ("[a-z][a-z0-9-]{2,30}", "[0-9]{12}").prop_map(|(name, account)| {
            format!("arn:aws:s3:eu-west-1:{account}:accesspoint/{name}")
        }),
    ]
}

/// Generate a list of resource ARNs, possibly with duplicates.
pub fn resources(max_len: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(resource_arn(), 0..=max_len)
}

/// Generate one of the four statement families the managers write.
pub fn statement_family() -> impl Strategy<Value = StatementFamily> {
    prop_oneof![
        Just(StatementFamily::s3("AccessPointsStatement")),
        Just(StatementFamily::kms("AccessPointsStatement")),
        Just(StatementFamily::s3("BucketStatement")),
        Just(StatementFamily::kms("BucketStatement")),
    ]
}

/// Size limits small enough to force chunking with a few dozen resources.
pub fn size_limits() -> impl Strategy<Value = SizeLimits> {
    (1_024usize..=6_144).prop_map(|max| SizeLimits::new(max, 144))
}

/// Parameters for one grant against an existing policy set.
#[derive(Debug, Clone)]
pub struct GrantParams {
    pub family: StatementFamily,
    /// Resources already granted before the operation.
    pub existing: Vec<String>,
    pub resources: Vec<String>,
    pub limits: SizeLimits,
}

impl Arbitrary for GrantParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (statement_family(), resources(40), resources(40), size_limits())
            .prop_map(|(family, existing, resources, limits)| GrantParams {
                family,
                existing,
                resources,
                limits,
            })
            .boxed()
    }
}

/// The policy set holding `params.existing`, indexed from zero.
pub fn existing_set(params: &GrantParams) -> PolicySet {
    let documents = PolicySet::new()
        .granted(&params.family, &params.existing, params.limits)
        .unwrap_or_default();
    set_from(documents)
}

/// Index `documents` from zero, the way applying a fresh plan would.
pub fn set_from(documents: Vec<PolicyDocument>) -> PolicySet {
    PolicySet::from_documents(documents.into_iter().enumerate())
}
