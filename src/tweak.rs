//! Configuration tweak query model.
//!
//! Nodes expose runtime-settable "tweaks" keyed by dotted names such as
//! `mining.comment` or `net.maxOutConnections`. A query is either an exact
//! key, a prefix ending in the wildcard marker (`net.*`), or a full dump
//! (no argument, empty string, or exactly `*`). A full dump with no
//! argument and one with `*` must be indistinguishable.
//!
//! [`TweakSet`] is an in-memory model of that surface; the `check_*`
//! helpers assert the same contract against a live node.

use crate::error::{Error, Result};
use crate::rpc::RpcClient;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Trailing wildcard marker.
pub const WILDCARD: &str = "*";

/// Parsed form of a `get` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TweakQuery<'a> {
    /// Every key.
    All,
    /// Every key starting with the prefix (wildcard stripped).
    Prefix(&'a str),
    /// One key.
    Exact(&'a str),
}

impl<'a> TweakQuery<'a> {
    /// Classify a query string.
    #[must_use]
    pub fn parse(query: Option<&'a str>) -> Self {
        match query {
            None => Self::All,
            Some(q) if q.is_empty() || q == WILDCARD => Self::All,
            Some(q) => q
                .strip_suffix(WILDCARD)
                .map_or(Self::Exact(q), Self::Prefix),
        }
    }

    /// Whether `key` is selected by this query.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => key.starts_with(prefix),
            Self::Exact(exact) => key == *exact,
        }
    }
}

/// Split a `key=value` assignment.
///
/// # Errors
///
/// Returns `Error::Config` if there is no `=`, the key is empty, or the key
/// contains the wildcard marker.
pub fn parse_assignment(assignment: &str) -> Result<(&str, &str)> {
    let (key, value) = assignment
        .split_once('=')
        .ok_or_else(|| Error::Config(format!("tweak assignment '{assignment}' has no '='")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::Config(format!(
            "tweak assignment '{assignment}' has an empty key"
        )));
    }
    if key.contains(WILDCARD) {
        return Err(Error::Config(format!("tweak key '{key}' contains a wildcard")));
    }
    Ok((key, value))
}

/// Ordered tweak store with wildcard-prefix lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TweakSet {
    entries: BTreeMap<String, Value>,
}

impl TweakSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite a value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Apply a `key=value` assignment as sent over RPC.
    ///
    /// Values that parse as JSON scalars keep their type; anything else is
    /// stored as a string.
    ///
    /// # Errors
    ///
    /// See [`parse_assignment`].
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<()> {
        let (key, raw) = parse_assignment(assignment)?;
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Bool(_) | Value::Number(_))) => v,
            _ => Value::String(raw.to_string()),
        };
        self.set(key, value);
        Ok(())
    }

    /// Answer a `get` query.
    #[must_use]
    pub fn get(&self, query: Option<&str>) -> BTreeMap<String, Value> {
        match TweakQuery::parse(query) {
            TweakQuery::All => self.entries.clone(),
            TweakQuery::Prefix(prefix) => self
                .entries
                .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            TweakQuery::Exact(key) => self
                .entries
                .get_key_value(key)
                .map(|(k, v)| (k.clone(), v.clone()))
                .into_iter()
                .collect(),
        }
    }

    /// Every stored tweak.
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// Number of stored tweaks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for TweakSet {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }
}

/// Assert that `get()` and `get("*")` agree on a live node.
///
/// # Errors
///
/// `Error::AssertionFailure` if the dumps differ; RPC errors propagate.
pub async fn check_full_dump_equivalence(rpc: &RpcClient) -> Result<BTreeMap<String, Value>> {
    let bare = rpc.get_tweaks(None).await?;
    let star = rpc.get_tweaks(Some(WILDCARD)).await?;
    if bare != star {
        return Err(Error::assertion(
            rpc.index(),
            format!("get() == get(\"*\") ({} keys)", bare.len()),
            format!("get(\"*\") returned {} keys", star.len()),
        ));
    }
    Ok(bare)
}

/// Assert that `get(prefix*)` returns exactly the keys of the full dump
/// that start with `prefix`.
///
/// # Errors
///
/// `Error::AssertionFailure` naming the first stray or missing key; RPC
/// errors propagate.
pub async fn check_prefix_query(rpc: &RpcClient, prefix: &str) -> Result<BTreeMap<String, Value>> {
    let query = format!("{prefix}{WILDCARD}");
    let data = rpc.get_tweaks(Some(&query)).await?;
    if let Some(stray) = data.keys().find(|k| !k.starts_with(prefix)) {
        return Err(Error::assertion(
            rpc.index(),
            format!("keys starting with '{prefix}'"),
            format!("'{stray}'"),
        ));
    }

    let expected = TweakSet::from(rpc.get_tweaks(None).await?).get(Some(&query));
    if let Some(missing) = expected.keys().find(|k| !data.contains_key(*k)) {
        return Err(Error::assertion(
            rpc.index(),
            format!("'{missing}' in get(\"{query}\")"),
            format!("{} keys without it", data.len()),
        ));
    }
    Ok(data)
}
