use crate::error::FlattenResult;

/// A flattened `(key, value)` pair. Keys use `:` as the segment delimiter.
pub type ConfigPair = (String, String);

/// Defines how a raw payload read from the store is turned into flat pairs.
///
/// Implementations return pairs relative to the entry; the entry's own path is
/// prepended by the flattener. A payload that is a single unnamed value yields
/// one pair with an empty key.
pub trait ConfigurationParser: Send + Sync + 'static {
    fn parse(&self, payload: &[u8]) -> FlattenResult<Vec<ConfigPair>>;
}

/// Allows callers to rewrite configuration pairs as they are flattened.
pub trait KeyValueRewriter: Send + Sync + 'static {
    fn rewrite(&self, pair: ConfigPair) -> ConfigPair;
}

/// Leaves every pair untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityRewriter;

impl KeyValueRewriter for IdentityRewriter {
    fn rewrite(&self, pair: ConfigPair) -> ConfigPair {
        pair
    }
}

impl<F> KeyValueRewriter for F
where
    F: Fn(ConfigPair) -> ConfigPair + Send + Sync + 'static,
{
    fn rewrite(&self, pair: ConfigPair) -> ConfigPair {
        self(pair)
    }
}
