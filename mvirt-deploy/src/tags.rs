//! Tag reconciliation.
//!
//! Finders reduce the provider's tags to the keys the desired record cares
//! about; renderers then add what differs and delete what is no longer
//! desired, leaving provider-reserved keys alone.

use crate::model::Tags;

/// Key prefixes owned by the provider; never deleted.
pub const RESERVED_TAG_PREFIXES: &[&str] = &["aws:"];

/// Whether a tag key belongs to the provider.
pub fn is_reserved(key: &str) -> bool {
    RESERVED_TAG_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}

/// Tags present in `desired` whose value is missing or different in `actual`.
pub fn tags_to_add(actual: &Tags, desired: &Tags) -> Tags {
    desired
        .iter()
        .filter(|(k, v)| actual.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// `actual \ desired` by key, excluding provider-reserved keys.
pub fn tags_to_delete(actual: &Tags, desired: &Tags) -> Tags {
    actual
        .iter()
        .filter(|(k, _)| !desired.contains_key(*k) && !is_reserved(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Reduce observed tags to the desired key set plus `well_known` keys.
///
/// Keys are matched case-insensitively and reported with the desired
/// record's casing, so providers that fold tag-key case do not produce
/// spurious diffs.
pub fn observed_tags<'a, I>(observed: I, desired: &Tags, well_known: &[&str]) -> Tags
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut tags = Tags::new();
    for (key, value) in observed {
        if is_reserved(key) {
            continue;
        }
        let canonical = desired
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key))
            .cloned()
            .or_else(|| {
                well_known
                    .iter()
                    .find(|k| k.eq_ignore_ascii_case(key))
                    .map(|k| k.to_string())
            });
        if let Some(canonical) = canonical {
            tags.insert(canonical, value.clone());
        }
    }
    tags
}

/// All non-reserved observed tags.
pub fn owned_tags<'a, I>(observed: I) -> Tags
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    observed
        .into_iter()
        .filter(|(k, _)| !is_reserved(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// `a \ b` as multisets, in sorted order. Empty when `a` is a sub-multiset of `b`.
pub fn process_compare(a: &[String], b: &[String]) -> Vec<String> {
    let mut a: Vec<&String> = a.iter().collect();
    let mut b: Vec<&String> = b.iter().collect();
    a.sort();
    b.sort();

    let mut missing = Vec::new();
    let mut j = 0;
    for item in a {
        while j < b.len() && b[j] < item {
            j += 1;
        }
        if j < b.len() && b[j] == item {
            j += 1;
        } else {
            missing.push(item.clone());
        }
    }
    missing
}
