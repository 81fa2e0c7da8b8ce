//! Schema-free entry metadata.
//!
//! Keys are short symbolic strings; values are a tagged variant so downstream
//! consumers can define their own tag conventions without this crate knowing
//! about them. When entries from two filesets combine, their metadata is
//! union-merged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Entry metadata: a mapping from short symbolic keys to tag values.
pub type Meta = BTreeMap<String, MetaValue>;

/// One metadata tag value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Int(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::String(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::String(value)
    }
}

impl From<Vec<MetaValue>> for MetaValue {
    fn from(value: Vec<MetaValue>) -> Self {
        MetaValue::List(value)
    }
}

/// Union of two metadata maps; on a shared key the overlay's value wins.
pub fn merge_meta(base: &Meta, overlay: &Meta) -> Meta {
    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
