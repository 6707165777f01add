//! Shard range codec.
//!
//! A table's key space is split by an ordered list of split points. On the
//! wire the cluster does not send the split points themselves: it sends one
//! record per half-open interval, each record being a JSON-encoded pair
//! `[left, right]` of percent-escaped bounds, with `right` set to `null` on
//! the final, unbounded interval. The first interval always starts at the
//! empty key.
//!
//! ```
//! use semilattice_model::shards;
//!
//! let splits = vec!["m".to_string()];
//! let wire = shards::encode(&splits);
//! assert_eq!(wire, vec![r#"["","m"]"#, r#"["m",null]"#]);
//! assert_eq!(shards::decode(&wire).unwrap(), splits);
//! ```

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One half-open interval `[left, right)` of a table's key space.
///
/// `right == None` marks the unbounded final interval.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardInterval {
    pub left: String,
    pub right: Option<String>,
}

impl ShardInterval {
    /// Returns true if this single interval covers every key.
    #[must_use]
    pub fn spans_whole_keyspace(&self) -> bool {
        self.left.is_empty() && self.right.is_none()
    }

    /// The wire record for this interval.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let right = match &self.right {
            Some(r) => Value::String(urlencoding::encode(r).into_owned()),
            None => Value::Null,
        };
        Value::Array(vec![
            Value::String(urlencoding::encode(&self.left).into_owned()),
            right,
        ])
        .to_string()
    }

    /// Parses and unescapes one wire record.
    pub fn from_wire(record: &str) -> ModelResult<Self> {
        let value: Value = serde_json::from_str(record)
            .map_err(|e| malformed(format!("record {record:?} is not JSON: {e}")))?;
        let (left, right) = match value.as_array().map(Vec::as_slice) {
            Some([left, right]) => (left, right),
            _ => return Err(malformed(format!("record {record:?} is not a pair"))),
        };
        let left = match left {
            Value::String(s) => unescape(s)?,
            _ => return Err(malformed(format!("left bound of {record:?} is not a string"))),
        };
        let right = match right {
            Value::String(s) => Some(unescape(s)?),
            Value::Null => None,
            _ => {
                return Err(malformed(format!(
                    "right bound of {record:?} is neither a string nor null"
                )));
            }
        };
        Ok(Self { left, right })
    }
}

impl fmt::Display for ShardInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.right {
            Some(right) => write!(f, "[{:?}, {:?})", self.left, right),
            None => write!(f, "[{:?}, +inf)", self.left),
        }
    }
}

/// Expands split points into the intervals they delimit.
#[must_use]
pub fn intervals(splits: &[String]) -> Vec<ShardInterval> {
    let mut out = Vec::with_capacity(splits.len() + 1);
    let mut left = String::new();
    for split in splits {
        out.push(ShardInterval {
            left: std::mem::replace(&mut left, split.clone()),
            right: Some(split.clone()),
        });
    }
    out.push(ShardInterval { left, right: None });
    out
}

/// Encodes split points into wire interval records.
#[must_use]
pub fn encode(splits: &[String]) -> Vec<String> {
    intervals(splits).iter().map(ShardInterval::to_wire).collect()
}

/// Parses wire records and checks they tile the key space exactly once.
///
/// Records may arrive in any order; the returned intervals are sorted.
pub fn decode_intervals<S: AsRef<str>>(records: &[S]) -> ModelResult<Vec<ShardInterval>> {
    let mut parsed = records
        .iter()
        .map(|r| ShardInterval::from_wire(r.as_ref()))
        .collect::<ModelResult<Vec<_>>>()?;
    parsed.sort();

    let mut expected_left = Some(String::new());
    for interval in &parsed {
        match &expected_left {
            Some(left) if *left == interval.left => {}
            Some(left) => {
                return Err(malformed(format!(
                    "interval {interval} does not start at {left:?}"
                )));
            }
            None => {
                return Err(malformed(format!(
                    "interval {interval} follows the open-ended interval"
                )));
            }
        }
        expected_left.clone_from(&interval.right);
    }
    if let Some(left) = expected_left {
        return Err(malformed(format!(
            "no open-ended interval after {left:?}"
        )));
    }
    Ok(parsed)
}

/// Decodes wire records back into ascending split points.
pub fn decode<S: AsRef<str>>(records: &[S]) -> ModelResult<Vec<String>> {
    let splits: Vec<String> = decode_intervals(records)?
        .into_iter()
        .filter_map(|i| i.right)
        .collect();

    let mut previous = "";
    for split in &splits {
        if split.as_str() <= previous {
            return Err(malformed(format!(
                "split points are not strictly ascending at {split:?}"
            )));
        }
        previous = split;
    }
    Ok(splits)
}

fn unescape(s: &str) -> ModelResult<String> {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .map_err(|e| malformed(format!("bound {s:?} is not valid escaped UTF-8: {e}")))
}

fn malformed(reason: String) -> ModelError {
    ModelError::MalformedShardMap(reason)
}
