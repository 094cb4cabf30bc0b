//! Per-field boundary configuration: an ordered map from patch keywords to
//! patch field entries.
//!
//! A keyword is either a plain word (a patch or group name) or a regular
//! expression. In serialised form a pattern key is written inside double
//! quotes, e.g. `"\"wall.*\""`, mirroring the quoting convention of case
//! dictionaries. Entry order is significant and preserved through serde.

use crate::mesh_error::MeshError;
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Dictionary key.
#[derive(Clone, Debug)]
pub enum Keyword {
    Word(String),
    Pattern { source: String, regex: Regex },
}

impl Keyword {
    /// Parse the serialised form; quoted keys are patterns.
    pub fn parse(key: &str) -> Result<Self, MeshError> {
        match key.strip_prefix('"').and_then(|k| k.strip_suffix('"')) {
            Some(source) => Self::pattern(source),
            None => Ok(Keyword::Word(key.to_string())),
        }
    }

    /// Pattern keyword; matches whole names only.
    pub fn pattern(source: &str) -> Result<Self, MeshError> {
        let regex = Regex::new(&format!("^(?:{source})$")).map_err(|e| MeshError::InvalidPattern {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Keyword::Pattern {
            source: source.to_string(),
            regex,
        })
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Keyword::Pattern { .. })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Keyword::Word(w) => w,
            Keyword::Pattern { source, .. } => source,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Keyword::Word(w) => w == name,
            Keyword::Pattern { regex, .. } => regex.is_match(name),
        }
    }
}

impl PartialEq for Keyword {
    fn eq(&self, other: &Self) -> bool {
        self.is_pattern() == other.is_pattern() && self.as_str() == other.as_str()
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Keyword::Word(w) => f.write_str(w),
            Keyword::Pattern { source, .. } => write!(f, "\"{source}\""),
        }
    }
}

/// Value of a patch field entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchValue<T> {
    Uniform(T),
    NonUniform(Vec<T>),
}

impl<T: Copy> PatchValue<T> {
    /// Per-face values for a patch of `size` faces.
    pub fn expand(&self, patch: &str, size: usize) -> Result<Vec<T>, MeshError> {
        match self {
            PatchValue::Uniform(v) => Ok(vec![*v; size]),
            PatchValue::NonUniform(vs) if vs.len() == size => Ok(vs.clone()),
            PatchValue::NonUniform(vs) => Err(MeshError::FieldSizeMismatch {
                what: format!("value of patch {patch}"),
                expected: size,
                found: vs.len(),
            }),
        }
    }
}

/// Configuration of one patch field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchFieldEntry<T> {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub value: Option<PatchValue<T>>,
}

impl<T> PatchFieldEntry<T> {
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            value: None,
        }
    }

    pub fn uniform(type_name: impl Into<String>, value: T) -> Self {
        Self {
            type_name: type_name.into(),
            value: Some(PatchValue::Uniform(value)),
        }
    }
}

/// Ordered boundary configuration of a field.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchFieldDict<T> {
    entries: Vec<(Keyword, PatchFieldEntry<T>)>,
}

impl<T> Default for PatchFieldDict<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> PatchFieldDict<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry under a serialised key. Re-inserting a key replaces
    /// the entry in place.
    pub fn insert(&mut self, key: &str, entry: PatchFieldEntry<T>) -> Result<(), MeshError> {
        let keyword = Keyword::parse(key)?;
        match self.entries.iter_mut().find(|(k, _)| *k == keyword) {
            Some(slot) => slot.1 = entry,
            None => self.entries.push((keyword, entry)),
        }
        Ok(())
    }

    /// Builder form of [`PatchFieldDict::insert`].
    pub fn with(mut self, key: &str, entry: PatchFieldEntry<T>) -> Result<Self, MeshError> {
        self.insert(key, entry)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in declaration order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&Keyword, &PatchFieldEntry<T>)> {
        self.entries.iter().map(|(k, e)| (k, e))
    }

    /// Entry whose plain-word key equals `name`.
    pub fn get_word(&self, name: &str) -> Option<&PatchFieldEntry<T>> {
        self.entries
            .iter()
            .find(|(k, _)| !k.is_pattern() && k.as_str() == name)
            .map(|(_, e)| e)
    }

    /// Plain-word match first, otherwise the last-declared matching pattern.
    pub fn lookup(&self, name: &str) -> Option<&PatchFieldEntry<T>> {
        self.get_word(name).or_else(|| {
            self.entries
                .iter()
                .rev()
                .find(|(k, _)| k.is_pattern() && k.matches(name))
                .map(|(_, e)| e)
        })
    }
}

impl<T: Serialize> Serialize for PatchFieldDict<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, entry) in &self.entries {
            map.serialize_entry(&key.to_string(), entry)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for PatchFieldDict<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DictVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for DictVisitor<T> {
            type Value = PatchFieldDict<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map from patch keywords to patch field entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut dict = PatchFieldDict::new();
                while let Some((key, entry)) = access.next_entry::<String, PatchFieldEntry<T>>()? {
                    dict.insert(&key, entry).map_err(serde::de::Error::custom)?;
                }
                Ok(dict)
            }
        }

        deserializer.deserialize_map(DictVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_beats_pattern_and_last_pattern_wins() {
        let dict = PatchFieldDict::new()
            .with("\"wall.*\"", PatchFieldEntry::<f64>::of_type("zeroGradient"))
            .unwrap()
            .with("\"wal.*\"", PatchFieldEntry::of_type("calculated"))
            .unwrap()
            .with("wallTop", PatchFieldEntry::uniform("fixedValue", 1.0))
            .unwrap();
        assert_eq!(dict.lookup("wallTop").unwrap().type_name, "fixedValue");
        assert_eq!(dict.lookup("wallBottom").unwrap().type_name, "calculated");
        assert!(dict.lookup("inlet").is_none());
        assert!(dict.get_word("wallBottom").is_none());
    }

    #[test]
    fn patterns_match_whole_names() {
        let k = Keyword::parse("\"in.*\"").unwrap();
        assert!(k.matches("inlet"));
        assert!(!k.matches("xinlet"));
        assert!(Keyword::parse("\"(\"").is_err());
    }

    #[test]
    fn json_keeps_declaration_order() {
        let json = r#"{"b":{"type":"zeroGradient"},"\"a.*\"":{"type":"fixedValue","value":[1.0,2.0]},"a0":{"type":"fixedValue","value":3.0}}"#;
        let dict: PatchFieldDict<f64> = serde_json::from_str(json).unwrap();
        let keys: Vec<String> = dict.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "\"a.*\"", "a0"]);
        assert_eq!(
            dict.lookup("a1").unwrap().value,
            Some(PatchValue::NonUniform(vec![1.0, 2.0]))
        );
        assert_eq!(serde_json::to_string(&dict).unwrap(), json);
    }

    #[test]
    fn expand_checks_length() {
        assert_eq!(PatchValue::Uniform(2.0).expand("p", 3).unwrap(), vec![2.0; 3]);
        assert!(PatchValue::NonUniform(vec![1.0]).expand("p", 2).is_err());
    }
}
