//! Typed records from `nft -j` listings.
//!
//! The JSON output is a single `{"nftables": [...]}` object whose items each
//! carry one key naming the object kind (`metainfo`, `table`, `chain`,
//! `rule`, `set`, ...). Only rules and sets are of interest here; every other
//! item is ignored.

use serde::Deserialize;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RuleEntry {
    pub handle: u64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SetEntry {
    pub name: String,
    #[serde(default)]
    pub handle: Option<u64>,
}

#[derive(Deserialize)]
struct Listing {
    #[serde(default)]
    nftables: Vec<Value>,
}

fn items<T>(output: &str, key: &str) -> serde_json::Result<Vec<T>>
where
    T: serde::de::DeserializeOwned,
{
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let listing: Listing = serde_json::from_str(output)?;
    listing
        .nftables
        .into_iter()
        .filter_map(|mut item| item.get_mut(key).map(Value::take))
        .map(serde_json::from_value)
        .collect()
}

pub fn parse_rules(output: &str) -> serde_json::Result<Vec<RuleEntry>> {
    items(output, "rule")
}

pub fn parse_sets(output: &str) -> serde_json::Result<Vec<SetEntry>> {
    items(output, "set")
}
