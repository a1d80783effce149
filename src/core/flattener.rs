//! Key flattening.
//!
//! Turns a nested document, or the set of entries read below a root path, into
//! flat `:`-delimited configuration keys. Everything here is pure: no I/O and no
//! shared state.
//!
//! Documents are represented as a [`ConfigValue`] tree, which deserializes from any
//! self-describing serde format, so the same traversal serves JSON and any other
//! hierarchical payload.
use std::{
    collections::{BTreeMap, btree_map::Entry},
    fmt,
};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, SeqAccess, Visitor},
    ser::SerializeMap,
};

use crate::{
    error::{FlattenError, FlattenResult},
    ports::{
        kv_client::KvEntry,
        parser::{ConfigPair, ConfigurationParser, KeyValueRewriter},
    },
};

/// Delimiter between configuration key segments.
pub const KEY_DELIMITER: &str = ":";

/// Delimiter between store path segments.
pub const STORE_DELIMITER: char = '/';

/// A parsed hierarchical document.
///
/// Object properties keep their document order; duplicate property names are kept
/// so that flattening can reject them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Object(Vec<(String, ConfigValue)>),
    Array(Vec<ConfigValue>),
    /// Strings, numbers and booleans, already rendered culture-invariantly.
    Scalar(String),
    Null,
}

impl<'de> Deserialize<'de> for ConfigValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ConfigValueVisitor)
    }
}

struct ConfigValueVisitor;

impl<'de> Visitor<'de> for ConfigValueVisitor {
    type Value = ConfigValue;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an object, array, string, number, boolean or null")
    }

    fn visit_bool<E>(self, v: bool) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Scalar(v.to_string()))
    }

    fn visit_i64<E>(self, v: i64) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Scalar(v.to_string()))
    }

    fn visit_u64<E>(self, v: u64) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Scalar(v.to_string()))
    }

    fn visit_f64<E>(self, v: f64) -> Result<ConfigValue, E> {
        // serde_json keeps a trailing ".0" on integral floats; std Display drops it.
        let rendered = serde_json::Number::from_f64(v)
            .map(|n| n.to_string())
            .unwrap_or_else(|| v.to_string());
        Ok(ConfigValue::Scalar(rendered))
    }

    fn visit_str<E>(self, v: &str) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Scalar(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Scalar(v))
    }

    fn visit_unit<E>(self) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Null)
    }

    fn visit_none<E>(self) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<ConfigValue, D::Error>
    where
        D: Deserializer<'de>,
    {
        ConfigValue::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<ConfigValue, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<ConfigValue>()? {
            items.push(item);
        }
        Ok(ConfigValue::Array(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<ConfigValue, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut properties = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((name, value)) = map.next_entry::<String, ConfigValue>()? {
            properties.push((name, value));
        }
        Ok(ConfigValue::Object(properties))
    }
}

/// Flattened configuration with ordinal, case-insensitive keys.
///
/// Keys keep the spelling they were first inserted with; iteration is sorted by
/// the case-folded key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigData {
    entries: BTreeMap<String, (String, String)>,
}

impl ConfigData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordinal folding: a char is replaced by its uppercase only when that is a
    /// single char, so expansions such as `ß -> SS` and compatibility letters
    /// such as the Kelvin sign stay distinct.
    fn fold(key: &str) -> String {
        key.chars()
            .map(|c| {
                let mut upper = c.to_uppercase();
                match (upper.next(), upper.next()) {
                    (Some(u), None) => u,
                    _ => c,
                }
            })
            .collect()
    }

    /// Insert a pair, rejecting keys already present under any casing.
    pub fn insert(&mut self, key: String, value: String) -> FlattenResult<()> {
        match self.entries.entry(Self::fold(&key)) {
            Entry::Occupied(_) => Err(FlattenError::DuplicateKey { key }),
            Entry::Vacant(slot) => {
                slot.insert((key, value));
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&Self::fold(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&Self::fold(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn into_pairs(self) -> Vec<ConfigPair> {
        self.entries.into_values().collect()
    }
}

impl Serialize for ConfigData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Flatten a document depth-first.
///
/// Object properties push their name and array elements their zero-based index
/// onto the path; every scalar yields one pair keyed by the joined path. A bare
/// scalar document yields a single pair with an empty key.
pub fn flatten_document(document: &ConfigValue) -> FlattenResult<ConfigData> {
    let mut data = ConfigData::new();
    let mut path = Vec::new();
    visit(document, &mut path, &mut data)?;
    Ok(data)
}

fn visit(value: &ConfigValue, path: &mut Vec<String>, out: &mut ConfigData) -> FlattenResult<()> {
    match value {
        ConfigValue::Object(properties) => {
            for (name, child) in properties {
                path.push(name.clone());
                visit(child, path, out)?;
                path.pop();
            }
        }
        ConfigValue::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                visit(child, path, out)?;
                path.pop();
            }
        }
        ConfigValue::Scalar(scalar) => out.insert(path.join(KEY_DELIMITER), scalar.clone())?,
        ConfigValue::Null => out.insert(path.join(KEY_DELIMITER), String::new())?,
    }
    Ok(())
}

/// Flatten one entry's payload and prefix each key with the entry's path below
/// `key_to_remove`.
pub fn flatten_entry(
    entry: &KvEntry,
    key_to_remove: &str,
    parser: &dyn ConfigurationParser,
) -> FlattenResult<Vec<ConfigPair>> {
    let payload = entry.value.as_deref().unwrap_or_default();
    let relative = entry
        .key
        .strip_prefix(key_to_remove)
        .unwrap_or(&entry.key)
        .trim_end_matches(STORE_DELIMITER);

    parser
        .parse(payload)?
        .into_iter()
        .map(|(key, value)| {
            let combined = format!("{relative}{KEY_DELIMITER}{key}")
                .replace(STORE_DELIMITER, KEY_DELIMITER);
            let combined = combined.trim_matches(':');
            if combined.is_empty() {
                return Err(FlattenError::EmptyKey);
            }
            Ok((combined.to_string(), value))
        })
        .collect()
}

/// Flatten every valued leaf entry into a single mapping.
///
/// Entries without a value are skipped. Two entries deriving the same key is an
/// error rather than a last-write-wins merge.
pub fn flatten_entries<'a, I>(
    entries: I,
    key_to_remove: &str,
    parser: &dyn ConfigurationParser,
    rewriter: &dyn KeyValueRewriter,
) -> FlattenResult<ConfigData>
where
    I: IntoIterator<Item = &'a KvEntry>,
{
    let mut data = ConfigData::new();
    for entry in entries.into_iter().filter(|entry| entry.has_value()) {
        for pair in flatten_entry(entry, key_to_remove, parser)? {
            let (key, value) = rewriter.rewrite(pair);
            data.insert(key, value)?;
        }
    }
    Ok(data)
}
