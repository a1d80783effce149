use crate::{
    core::flattener::{ConfigValue, flatten_document},
    error::{FlattenError, FlattenResult},
    ports::parser::{ConfigPair, ConfigurationParser},
};

/// Parses JSON payloads; every leaf of the document becomes one flat key.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonConfigurationParser;

impl ConfigurationParser for JsonConfigurationParser {
    fn parse(&self, payload: &[u8]) -> FlattenResult<Vec<ConfigPair>> {
        let document: ConfigValue = serde_json::from_slice(payload)
            .map_err(|e| FlattenError::Parse(format!("invalid JSON: {e}")))?;
        Ok(flatten_document(&document)?.into_pairs())
    }
}
