//! Bound parameter sets and their content hash
//!
//! Parameters may hold values that have no native `Hash`/`Eq` in Rust
//! (floats, nested lists and maps). Instead of rejecting them, the params
//! hash canonicalizes the whole structure: each value is hashed with a
//! variant tag and, for containers, a length prefix followed by every
//! element. Equal content always produces an equal hash.
//!
//! JSON has no literal for NaN or the infinities, so non-finite floats are
//! written as `{"$float": "NaN" | "inf" | "-inf"}` and read back unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;

/// A single bound value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_repr")] f64),
    Text(String),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

mod float_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct NonFinite {
        #[serde(rename = "$float")]
        value: String,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        NonFinite(NonFinite),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            return serializer.serialize_f64(*value);
        }
        let value = if value.is_nan() {
            "NaN"
        } else if value.is_sign_positive() {
            "inf"
        } else {
            "-inf"
        };
        NonFinite {
            value: value.to_string(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Finite(value) => Ok(value),
            Repr::NonFinite(NonFinite { value }) => match value.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid non-finite float {:?}", other))),
            },
        }
    }
}

/// The parameter set bound to one execution
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "style", content = "values", rename_all = "snake_case")]
pub enum Params {
    /// The operation had no bound parameters
    #[default]
    None,
    Positional(Vec<ParamValue>),
    Named(BTreeMap<String, ParamValue>),
    /// One execution over several parameter sets (executemany)
    Batch(Vec<Params>),
}

impl Params {
    /// Build a named parameter set from key/value pairs
    pub fn named<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ParamValue)>,
    {
        Params::Named(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn positional<I: IntoIterator<Item = ParamValue>>(values: I) -> Self {
        Params::Positional(values.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(values) => values.is_empty(),
            Params::Batch(sets) => sets.iter().all(Params::is_empty),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        ParamValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "NULL"),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Text(s) => write!(f, "{:?}", s),
            ParamValue::List(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            ParamValue::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Params::None => write!(f, "()"),
            Params::Positional(values) => {
                write!(f, "(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            Params::Named(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Params::Batch(sets) => {
                write!(f, "[")?;
                for (i, set) in sets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", set)?;
                }
                write!(f, "]")
            }
        }
    }
}

// Variant tags keep `[1]` and `1`, or `"1"` and `1`, from colliding.
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_LIST: u8 = 5;
const TAG_MAP: u8 = 6;
const TAG_NONE: u8 = 16;
const TAG_POSITIONAL: u8 = 17;
const TAG_NAMED: u8 = 18;
const TAG_BATCH: u8 = 19;

fn write_len(hasher: &mut impl Hasher, len: usize) {
    hasher.write(&(len as u64).to_le_bytes());
}

fn write_str(hasher: &mut impl Hasher, s: &str) {
    write_len(hasher, s.len());
    hasher.write(s.as_bytes());
}

/// Bit pattern used for hashing a float: `-0.0` hashes like `0.0` and
/// every NaN hashes alike.
fn canonical_float_bits(x: f64) -> u64 {
    if x.is_nan() {
        f64::NAN.to_bits()
    } else if x == 0.0 {
        0
    } else {
        x.to_bits()
    }
}

fn hash_value(hasher: &mut impl Hasher, value: &ParamValue) {
    match value {
        ParamValue::Null => hasher.write_u8(TAG_NULL),
        ParamValue::Bool(b) => {
            hasher.write_u8(TAG_BOOL);
            hasher.write_u8(u8::from(*b));
        }
        ParamValue::Int(i) => {
            hasher.write_u8(TAG_INT);
            hasher.write(&i.to_le_bytes());
        }
        ParamValue::Float(x) => {
            hasher.write_u8(TAG_FLOAT);
            hasher.write(&canonical_float_bits(*x).to_le_bytes());
        }
        ParamValue::Text(s) => {
            hasher.write_u8(TAG_TEXT);
            write_str(hasher, s);
        }
        ParamValue::List(values) => {
            hasher.write_u8(TAG_LIST);
            write_len(hasher, values.len());
            for v in values {
                hash_value(hasher, v);
            }
        }
        ParamValue::Map(entries) => {
            hasher.write_u8(TAG_MAP);
            hash_entries(hasher, entries);
        }
    }
}

// BTreeMap iterates in key order, so insertion order never matters.
fn hash_entries(hasher: &mut impl Hasher, entries: &BTreeMap<String, ParamValue>) {
    write_len(hasher, entries.len());
    for (k, v) in entries {
        write_str(hasher, k);
        hash_value(hasher, v);
    }
}

fn hash_params(hasher: &mut impl Hasher, params: &Params) {
    match params {
        Params::None => hasher.write_u8(TAG_NONE),
        Params::Positional(values) => {
            hasher.write_u8(TAG_POSITIONAL);
            write_len(hasher, values.len());
            for v in values {
                hash_value(hasher, v);
            }
        }
        Params::Named(entries) => {
            hasher.write_u8(TAG_NAMED);
            hash_entries(hasher, entries);
        }
        Params::Batch(sets) => {
            hasher.write_u8(TAG_BATCH);
            write_len(hasher, sets.len());
            for set in sets {
                hash_params(hasher, set);
            }
        }
    }
}

/// Hash of a parameter set's content
///
/// Deterministic across runs and processes (FNV-1a, no random seed).
pub fn params_hash(params: &Params) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hash_params(&mut hasher, params);
    hasher.finish()
}

/// Hash of an operation's text
pub fn text_hash(text: &str) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(text.as_bytes());
    hasher.finish()
}
