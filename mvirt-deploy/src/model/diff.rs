//! Field-wise differ.
//!
//! Every task record implements [`Diff`] through [`impl_diff!`], which
//! compares the listed fields of the actual and desired records and returns
//! a sparse changes record of the same type: a field is set in the changes
//! record only when the desired value is set and differs from the actual one.

use serde::{Deserialize, Serialize};

use super::{Link, Tags};

/// Equality as the differ sees it.
///
/// `unchanged(actual, desired)` is deliberately asymmetric: links compare by
/// resolved ID and defer (report no change) while the desired side is not
/// resolved yet.
pub trait DiffValue {
    fn unchanged(actual: &Self, desired: &Self) -> bool;
}

macro_rules! diff_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(impl DiffValue for $ty {
            fn unchanged(actual: &Self, desired: &Self) -> bool {
                actual == desired
            }
        })*
    };
}

diff_by_eq!(String, bool, i32, i64, u16, u32, u64, Tags, serde_json::Value);

/// Implement [`DiffValue`] for record types that compare structurally.
#[macro_export]
macro_rules! diff_value_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(impl $crate::model::diff::DiffValue for $ty {
            fn unchanged(actual: &Self, desired: &Self) -> bool {
                actual == desired
            }
        })*
    };
}

impl DiffValue for Link {
    fn unchanged(actual: &Self, desired: &Self) -> bool {
        match (&actual.id, &desired.id) {
            (Some(a), Some(d)) => a == d,
            // Desired side not resolved yet: the dependency runs first, defer.
            (_, None) => true,
            (None, Some(_)) => false,
        }
    }
}

impl<T: DiffValue> DiffValue for Vec<T> {
    fn unchanged(actual: &Self, desired: &Self) -> bool {
        actual.len() == desired.len()
            && actual
                .iter()
                .zip(desired.iter())
                .all(|(a, d)| T::unchanged(a, d))
    }
}

impl<T: DiffValue> DiffValue for Option<T> {
    fn unchanged(actual: &Self, desired: &Self) -> bool {
        match (actual, desired) {
            (Some(a), Some(d)) => T::unchanged(a, d),
            (None, None) => true,
            _ => false,
        }
    }
}

/// A collection whose order is insignificant; compares as a multiset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unordered<T>(pub Vec<T>);

impl<T> Unordered<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> From<Vec<T>> for Unordered<T> {
    fn from(v: Vec<T>) -> Self {
        Unordered(v)
    }
}

impl<T> FromIterator<T> for Unordered<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Unordered(iter.into_iter().collect())
    }
}

impl<'a, T> IntoIterator for &'a Unordered<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T: DiffValue> DiffValue for Unordered<T> {
    fn unchanged(actual: &Self, desired: &Self) -> bool {
        if actual.0.len() != desired.0.len() {
            return false;
        }
        let mut used = vec![false; actual.0.len()];
        desired.0.iter().all(|d| {
            let hit = actual
                .0
                .iter()
                .enumerate()
                .find(|(i, a)| !used[*i] && T::unchanged(a, d))
                .map(|(i, _)| i);
            match hit {
                Some(i) => {
                    used[i] = true;
                    true
                }
                None => false,
            }
        })
    }
}

/// One field of a record, as seen by the differ.
pub trait FieldDiff: Sized {
    /// The value to record in the changes record for this field.
    fn field_diff(actual: &Self, desired: &Self) -> Self;
    /// Whether the field is unset ("don't care" in desired, "no change" in changes).
    fn is_unset(&self) -> bool;
}

impl<T: DiffValue + Clone> FieldDiff for Option<T> {
    fn field_diff(actual: &Self, desired: &Self) -> Self {
        match (actual, desired) {
            (_, None) => None,
            (Some(a), Some(d)) if T::unchanged(a, d) => None,
            (_, Some(d)) => Some(d.clone()),
        }
    }

    fn is_unset(&self) -> bool {
        self.is_none()
    }
}

/// A record that can be diffed field by field.
pub trait Diff: Sized {
    /// Sparse changes record: only fields that need to change are set.
    fn diff(actual: &Self, desired: &Self) -> Self;
    /// Names of the fields set in a changes record.
    fn changed_fields(&self) -> Vec<&'static str>;

    fn is_unchanged(&self) -> bool {
        self.changed_fields().is_empty()
    }
}

/// Implement [`Diff`] for a record by listing its diffable fields.
///
/// Every listed field must implement [`FieldDiff`]; identity fields (the
/// record's `meta`) are not listed and stay at their default in the changes
/// record.
#[macro_export]
macro_rules! impl_diff {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl $crate::model::diff::Diff for $ty {
            fn diff(actual: &Self, desired: &Self) -> Self {
                #[allow(unused_mut)]
                let mut changes = Self::default();
                $(
                    changes.$field = $crate::model::diff::FieldDiff::field_diff(
                        &actual.$field,
                        &desired.$field,
                    );
                )*
                changes
            }

            fn changed_fields(&self) -> Vec<&'static str> {
                #[allow(unused_mut)]
                let mut fields = Vec::new();
                $(
                    if !$crate::model::diff::FieldDiff::is_unset(&self.$field) {
                        fields.push(stringify!($field));
                    }
                )*
                fields
            }
        }
    };
}
