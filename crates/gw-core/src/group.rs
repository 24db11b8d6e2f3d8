use crate::{GwError, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Unordered, deduplicated, non-empty set of domain names that co-occur in one
/// matched sample. The backing `BTreeSet` gives a total ordering, so the group
/// can be used directly as a map key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainGroup {
    names: BTreeSet<String>,
}

impl DomainGroup {
    /// Builds a group from any iterable of domain names. Duplicates collapse;
    /// an empty input is rejected.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(GwError::EmptyGroup);
        }
        Ok(Self { names })
    }

    /// Builds a group containing a single domain.
    pub fn singleton(name: impl Into<String>) -> Self {
        let mut names = BTreeSet::new();
        names.insert(name.into());
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    // Always false for a constructed group; both constructors reject empty
    // input.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Iterates domain names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// The sole member of a singleton group.
    pub fn sole_member(&self) -> Option<&str> {
        if self.names.len() == 1 {
            self.names.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Renders the group as `{a,b,c}` with names in sorted order. Used to key
    /// broadcast-loss metric names.
    pub fn label(&self) -> String {
        let mut out = String::from("{");
        for (idx, name) in self.names.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(name);
        }
        out.push('}');
        out
    }
}

impl fmt::Display for DomainGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl<'a> IntoIterator for &'a DomainGroup {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_groups() {
        let empty: Vec<String> = vec![];
        assert_eq!(DomainGroup::new(empty), Err(GwError::EmptyGroup));
    }

    #[test]
    fn label_is_sorted_and_deduplicated() {
        let group = DomainGroup::new(["v", "t", "v"]).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.label(), "{t,v}");
    }

    #[test]
    fn order_of_construction_does_not_matter() {
        let a = DomainGroup::new(["image", "text"]).unwrap();
        let b = DomainGroup::new(["text", "image"]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn constructed_groups_are_never_empty() {
        let singleton = DomainGroup::singleton("t");
        assert!(!singleton.is_empty());
        assert_eq!(singleton.len(), 1);
        let pair = DomainGroup::new(["t", "v"]).unwrap();
        assert!(!pair.is_empty());
        assert_eq!(pair.len(), 2);
    }

    #[test]
    fn sole_member_only_on_singletons() {
        assert_eq!(DomainGroup::singleton("t").sole_member(), Some("t"));
        let pair = DomainGroup::new(["t", "v"]).unwrap();
        assert_eq!(pair.sole_member(), None);
    }
}
