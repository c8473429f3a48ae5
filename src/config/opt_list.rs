//! Scalar-or-sequence YAML list decoding.
//!
//! List-typed option fields (`opt`, `opts`, `exclude_opts`) accept either a
//! single string or a sequence of strings in YAML. The coercion happens at
//! decode time; the in-memory representation is always an ordered list.

use std::fmt;
use std::ops::Deref;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered list of option strings, decoded from a scalar or a sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptList(pub Vec<String>);

impl OptList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Deref for OptList {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for OptList {
    fn from(items: Vec<String>) -> Self {
        OptList(items)
    }
}

impl Serialize for OptList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OptList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OptListVisitor;

        impl<'de> Visitor<'de> for OptListVisitor {
            type Value = OptList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or a sequence of strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<OptList, E> {
                Ok(OptList(vec![v.to_string()]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<OptList, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element::<String>()? {
                    items.push(item);
                }
                Ok(OptList(items))
            }
        }

        deserializer.deserialize_any(OptListVisitor)
    }
}
