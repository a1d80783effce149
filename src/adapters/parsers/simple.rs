use crate::{
    error::{FlattenError, FlattenResult},
    ports::parser::{ConfigPair, ConfigurationParser},
};

/// Treats the whole payload as one unnamed string value.
///
/// The entry's own path becomes the key, so values must live below the root key.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleConfigurationParser;

impl ConfigurationParser for SimpleConfigurationParser {
    fn parse(&self, payload: &[u8]) -> FlattenResult<Vec<ConfigPair>> {
        let value = std::str::from_utf8(payload).map_err(|_| FlattenError::InvalidUtf8)?;
        Ok(vec![(String::new(), value.to_string())])
    }
}
