/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, convert::Infallible, fmt::Display, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use sha2::{Digest, Sha256};

const LABEL_SEP: u8 = 0xff;

#[derive(
    Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default, Debug,
)]
#[serde(transparent)]
pub struct OrgId(i64);

#[derive(
    SerializeDisplay, DeserializeFromStr, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug,
)]
pub struct RuleUid(String);

/// Identifies one instance within a rule. Derived from the instance
/// labels, see [`Labels::cache_id`].
#[derive(
    SerializeDisplay, DeserializeFromStr, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug,
)]
pub struct CacheId(String);

#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
pub struct RuleKey {
    pub org_id: OrgId,
    pub uid: RuleUid,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Default, Debug)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl OrgId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl RuleUid {
    pub fn new<T: Into<String>>(uid: T) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl CacheId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RuleKey {
    pub fn new(org_id: OrgId, uid: RuleUid) -> Self {
        Self { org_id, uid }
    }
}

impl Labels {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|v| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable identifier of the label set. Since the labels are kept
    /// sorted, the result does not depend on insertion order. This is
    /// also the durable labels hash of persisted instances.
    pub fn cache_id(&self) -> CacheId {
        let mut hasher = Sha256::new();
        for (name, value) in &self.0 {
            hasher.update(name.as_bytes());
            hasher.update([LABEL_SEP]);
            hasher.update(value.as_bytes());
            hasher.update([LABEL_SEP]);
        }
        CacheId(hex::encode(hasher.finalize()))
    }

    /// Labels without the internal ones (`__name__` style).
    pub fn without_private(&self) -> Self {
        self.0
            .iter()
            .filter(|(name, _)| !name.starts_with("__") && !name.ends_with("__"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrgId {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<i64> for OrgId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl Display for RuleUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RuleUid {
    type Err = Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl Display for CacheId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CacheId {
    type Err = Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl Display for RuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "org_id={} rule_uid={}", self.org_id, self.uid)
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0
                .iter()
                .format_with(", ", |(name, value), f| f(&format_args!("{name}={value}")))
        )
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for Labels {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::Labels;

    #[test]
    fn cache_id_ignores_insertion_order() {
        let mut a = Labels::new();
        a.insert("instance", "host-1");
        a.insert("job", "node");
        a.insert("alertname", "HighCpu");
        let b = [
            ("alertname", "HighCpu"),
            ("job", "node"),
            ("instance", "host-1"),
        ]
        .into_iter()
        .collect::<Labels>();
        assert_eq!(a.cache_id(), b.cache_id());
        assert_eq!(a.cache_id().as_str().len(), 64);
    }

    #[test]
    fn cache_id_separates_names_and_values() {
        let a = [("ab", "c")].into_iter().collect::<Labels>();
        let b = [("a", "bc")].into_iter().collect::<Labels>();
        assert_ne!(a.cache_id(), b.cache_id());
        assert_ne!(Labels::new().cache_id(), a.cache_id());
    }

    #[test]
    fn display_is_sorted() {
        let labels = [("job", "node"), ("instance", "host-1")]
            .into_iter()
            .collect::<Labels>();
        assert_eq!(labels.to_string(), "instance=host-1, job=node");
    }

    #[test]
    fn private_labels_are_dropped() {
        let labels = [
            ("__alert_rule_uid__", "abc"),
            ("__name__", "up"),
            ("job", "node"),
        ]
        .into_iter()
        .collect::<Labels>();
        assert_eq!(labels.without_private().to_string(), "job=node");
    }
}
