//! Attribute maps shared between xenvm and other owners.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Key recording which `other_config` entries xenvm owns.
///
/// The value is a comma-terminated list such as `"a,b,"`.
pub const OWNED_KEYS_SENTINEL: &str = "xenvm_other_config_keys";

/// Owned `other_config` key recording the template the VM was cloned from.
pub const TEMPLATE_NAME_KEY: &str = "xenvm_template_name";

/// Returns true if `key` survives a round trip through the sentinel.
#[must_use]
pub fn is_well_formed_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(',') && key.trim() == key
}

/// A shared key/value map together with its ownership sentinel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct OverlayMap {
    /// Every entry on the host, including entries owned by others and the sentinel.
    pub raw: BTreeMap<String, String>,
}

impl OverlayMap {
    /// Wraps a raw map read from the host.
    #[must_use]
    pub const fn from_raw(raw: BTreeMap<String, String>) -> Self {
        Self { raw }
    }

    /// Builds the desired-side map in which xenvm owns every given entry.
    #[must_use]
    pub fn managed(entries: BTreeMap<String, String>) -> Self {
        let mut raw: BTreeMap<String, String> = entries
            .into_iter()
            .filter(|(key, _)| key != OWNED_KEYS_SENTINEL)
            .collect();
        let owned = raw.keys().cloned().collect::<BTreeSet<_>>();
        raw.insert(OWNED_KEYS_SENTINEL.to_string(), encode_owned_keys(&owned));
        Self { raw }
    }

    /// Keys currently claimed by the sentinel.
    #[must_use]
    pub fn owned_keys(&self) -> BTreeSet<String> {
        self.raw
            .get(OWNED_KEYS_SENTINEL)
            .map(|value| decode_owned_keys(value))
            .unwrap_or_default()
    }

    /// Entries that are both present and owned by xenvm.
    #[must_use]
    pub fn managed_view(&self) -> BTreeMap<String, String> {
        let owned = self.owned_keys();
        self.raw
            .iter()
            .filter(|(key, _)| owned.contains(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Entries the sentinel lists verbatim but which cannot be read back as owned.
    #[must_use]
    pub fn malformed_owned_keys(&self) -> Vec<&str> {
        let Some(listed) = self.raw.get(OWNED_KEYS_SENTINEL) else {
            return Vec::new();
        };
        let listed = format!(",{listed}");
        self.raw
            .keys()
            .filter(|key| *key != OWNED_KEYS_SENTINEL && !is_well_formed_key(key))
            .filter(|key| listed.contains(&format!(",{key},")))
            .map(String::as_str)
            .collect()
    }
}

/// Encodes an owned-key set in sentinel format.
#[must_use]
pub fn encode_owned_keys(keys: &BTreeSet<String>) -> String {
    keys.iter().fold(String::new(), |mut acc, key| {
        acc.push_str(key);
        acc.push(',');
        acc
    })
}

/// Decodes a sentinel value into the set of owned keys.
#[must_use]
pub fn decode_owned_keys(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty() && *key != OWNED_KEYS_SENTINEL)
        .map(String::from)
        .collect()
}
