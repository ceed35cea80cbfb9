//! Permission model - enumerated permissions and a fixed-size set of them.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Discover,
    Link,
    Materialize,
    Read,
    Write,
    Owner,
    Integrate,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Permission::Discover,
        Permission::Link,
        Permission::Materialize,
        Permission::Read,
        Permission::Write,
        Permission::Owner,
        Permission::Integrate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Discover => "DISCOVER",
            Permission::Link => "LINK",
            Permission::Materialize => "MATERIALIZE",
            Permission::Read => "READ",
            Permission::Write => "WRITE",
            Permission::Owner => "OWNER",
            Permission::Integrate => "INTEGRATE",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid permission: {}", s))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of permissions backed by a bit mask. Serialized as a list of names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PermissionSet(u8);

impl PermissionSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Permission::ALL.into_iter().collect()
    }

    pub fn of(permissions: &[Permission]) -> Self {
        permissions.iter().copied().collect()
    }

    pub fn insert(&mut self, permission: Permission) {
        self.0 |= permission.bit();
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0 & permission.bit() != 0
    }

    pub fn contains_all(&self, other: PermissionSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: PermissionSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: PermissionSet) -> Self {
        Self(self.0 | other.0)
    }

    pub fn difference(self, other: PermissionSet) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn intersection(self, other: PermissionSet) -> Self {
        Self(self.0 & other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        Permission::ALL.into_iter().filter(|p| self.contains(*p))
    }

    /// Names as stored in the `permissions TEXT[]` column.
    pub fn to_names(&self) -> Vec<String> {
        self.iter().map(|p| p.as_str().to_string()).collect()
    }

    /// Parses stored names, skipping (and logging) unrecognized ones.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut set = Self::empty();
        for name in names {
            match name.as_ref().parse::<Permission>() {
                Ok(p) => set.insert(p),
                Err(_) => tracing::warn!(permission = name.as_ref(), "Ignoring unknown permission"),
            }
        }
        set
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = Self::empty();
        for p in iter {
            set.insert(p);
        }
        set
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let permissions = Vec::<Permission>::deserialize(deserializer)?;
        Ok(permissions.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_is_idempotent_and_commutative() {
        let read = PermissionSet::of(&[Permission::Read]);
        let write = PermissionSet::of(&[Permission::Write]);
        assert_eq!(read.union(write), write.union(read));
        assert_eq!(read.union(read), read);
        assert_eq!(read.union(write).len(), 2);
    }

    #[test]
    fn difference_and_intersection() {
        let rw = PermissionSet::of(&[Permission::Read, Permission::Write]);
        let read = PermissionSet::of(&[Permission::Read]);
        assert_eq!(rw.difference(read), PermissionSet::of(&[Permission::Write]));
        assert_eq!(rw.intersection(read), read);
        assert!(rw.contains_all(read));
        assert!(!read.contains_all(rw));
        assert!(rw.difference(rw).is_empty());
    }

    #[test]
    fn all_contains_every_permission() {
        let all = PermissionSet::all();
        assert_eq!(all.len(), Permission::ALL.len());
        assert!(Permission::ALL.iter().all(|p| all.contains(*p)));
    }

    #[test]
    fn stored_names_skip_unknown_values() {
        let set = PermissionSet::from_names(&["READ", "owner", "BOGUS"]);
        assert_eq!(set, PermissionSet::of(&[Permission::Read, Permission::Owner]));
        assert_eq!(set.to_names(), vec!["READ".to_string(), "OWNER".to_string()]);
    }

    #[test]
    fn serializes_as_name_list() {
        let set = PermissionSet::of(&[Permission::Write, Permission::Discover]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "[\"DISCOVER\",\"WRITE\"]");
        let back: PermissionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
