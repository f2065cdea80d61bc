use serde_json::{Map, Value};

use crate::prompt::codec::SCHEMA;

/// One string per schema field, stored in schema order. Mutation is
/// whole-field replacement producing a new record, so any value a caller
/// already holds never changes underneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredPrompt {
    values: Vec<String>,
}

impl StructuredPrompt {
    /// The default record: every schema field present and empty.
    pub fn empty() -> Self {
        StructuredPrompt {
            values: vec![String::new(); SCHEMA.len()],
        }
    }

    fn field_index(identifier: &str) -> Option<usize> {
        SCHEMA.iter().position(|candidate| *candidate == identifier)
    }

    pub fn get(&self, identifier: &str) -> Option<&str> {
        Self::field_index(identifier).map(|index| self.values[index].as_str())
    }

    /// Returns a new record with one field replaced, or `None` for an
    /// identifier outside the schema.
    pub fn with_field(&self, identifier: &str, value: impl Into<String>) -> Option<Self> {
        let index = Self::field_index(identifier)?;
        let mut next = self.clone();
        next.values[index] = value.into();
        Some(next)
    }

    pub(crate) fn set_by_index(&mut self, index: usize, value: String) {
        self.values[index] = value;
    }

    /// True when no field carries anything beyond whitespace.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(|value| value.trim().is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        SCHEMA
            .iter()
            .zip(self.values.iter())
            .map(|(identifier, value)| (*identifier, value.as_str()))
    }

    /// Adopts a producer-supplied JSON object directly, without going
    /// through the text parser. String values under schema keys are taken
    /// as-is; missing keys default to empty; extra keys and non-string
    /// values are ignored.
    pub fn from_json(value: &Value) -> Self {
        let mut record = Self::empty();
        let Some(object) = value.as_object() else {
            return record;
        };
        for (index, identifier) in SCHEMA.iter().enumerate() {
            if let Some(text) = object.get(*identifier).and_then(Value::as_str) {
                record.values[index] = text.to_string();
            }
        }
        record
    }

    /// Full record as a JSON object, empty strings included.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for (identifier, value) in self.iter() {
            object.insert(identifier.to_string(), Value::String(value.to_string()));
        }
        Value::Object(object)
    }
}

impl Default for StructuredPrompt {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_record_has_every_schema_field() {
        let record = StructuredPrompt::empty();
        for identifier in SCHEMA {
            assert_eq!(record.get(identifier), Some(""));
        }
        assert!(record.is_empty());
    }

    #[test]
    fn with_field_leaves_the_original_untouched() {
        let base = StructuredPrompt::empty();
        let edited = base.with_field("style", "ukiyo-e woodblock").unwrap();
        assert_eq!(base.get("style"), Some(""));
        assert_eq!(edited.get("style"), Some("ukiyo-e woodblock"));
    }

    #[test]
    fn with_field_rejects_identifiers_outside_the_schema() {
        assert!(StructuredPrompt::empty().with_field("camera", "35mm").is_none());
    }

    #[test]
    fn adopts_json_with_missing_and_extra_keys() {
        let record = StructuredPrompt::from_json(&json!({
            "subject": "a clockwork garden",
            "mood": "melancholic",
            "art_style": "dropped, not in the schema",
            "lighting": 42
        }));
        assert_eq!(record.get("subject"), Some("a clockwork garden"));
        assert_eq!(record.get("mood"), Some("melancholic"));
        assert_eq!(record.get("lighting"), Some(""));
        assert_eq!(record.get("background"), Some(""));
    }

    #[test]
    fn adopting_a_non_object_yields_the_empty_record() {
        assert!(StructuredPrompt::from_json(&json!("just a string")).is_empty());
        assert!(StructuredPrompt::from_json(&json!(null)).is_empty());
    }

    #[test]
    fn json_output_keeps_every_field_including_empty_ones() {
        let record = StructuredPrompt::empty()
            .with_field("subject", "a lighthouse")
            .unwrap();
        let value = record.to_json();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), SCHEMA.len());
        assert_eq!(object["subject"], "a lighthouse");
        assert_eq!(object["negativePrompt"], "");
    }
}
