//! User code resolution
//!
//! Jobs name their mapper and reducer by an opaque reference string; the
//! worker resolves the reference against this registry at execution time.
//! The contract is `map(line) -> (k, v)*` and `reduce(key, values) -> (k, v)*`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// Per-line mapper
pub trait Mapper: Send + Sync {
    fn map(&self, line: &str) -> Result<Vec<(String, String)>>;
}

/// Per-key-group reducer
pub trait Reducer: Send + Sync {
    fn reduce(&self, key: &str, values: &[String]) -> Result<Vec<(String, String)>>;
}

/// Resolves code references to executable user functions
#[derive(Debug, Default)]
pub struct UdfRegistry;

impl UdfRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a mapper reference
    pub fn mapper(&self, reference: &str) -> Result<Box<dyn Mapper>> {
        if let Some(pattern) = reference.strip_prefix("grep:") {
            let regex = Regex::new(pattern)
                .map_err(|e| Error::user_code(format!("invalid grep pattern: {}", e)))?;
            return Ok(Box::new(GrepMapper { regex }));
        }

        match reference {
            "wordcount" => Ok(Box::new(WordCountMapper)),
            "identity" => Ok(Box::new(IdentityMapper)),
            other => Err(Error::user_code(format!(
                "unknown mapper reference: {} (built-ins: {})",
                other,
                BUILTIN_REFS.join(", ")
            ))),
        }
    }

    /// Resolve a reducer reference
    pub fn reducer(&self, reference: &str) -> Result<Box<dyn Reducer>> {
        match reference {
            "wordcount" => Ok(Box::new(SumReducer)),
            "identity" => Ok(Box::new(IdentityReducer)),
            other => Err(Error::user_code(format!(
                "unknown reducer reference: {} (built-ins: {})",
                other,
                BUILTIN_REFS.join(", ")
            ))),
        }
    }
}

/// Emits (token, "1") per whitespace-separated token
struct WordCountMapper;

impl Mapper for WordCountMapper {
    fn map(&self, line: &str) -> Result<Vec<(String, String)>> {
        Ok(line
            .split_whitespace()
            .map(|token| (token.to_string(), "1".to_string()))
            .collect())
    }
}

/// Sums integer values per key
struct SumReducer;

impl Reducer for SumReducer {
    fn reduce(&self, key: &str, values: &[String]) -> Result<Vec<(String, String)>> {
        let mut total: u64 = 0;
        for value in values {
            let count: u64 = value
                .parse()
                .map_err(|_| Error::user_code(format!("non-numeric count for key {}: {}", key, value)))?;
            total += count;
        }
        Ok(vec![(key.to_string(), total.to_string())])
    }
}

/// Emits (line, "") per line; paired with the identity reducer this sorts
/// and deduplicates nothing, it just re-keys the input
struct IdentityMapper;

impl Mapper for IdentityMapper {
    fn map(&self, line: &str) -> Result<Vec<(String, String)>> {
        Ok(vec![(line.to_string(), String::new())])
    }
}

/// Passes every (key, value) pair through unchanged
struct IdentityReducer;

impl Reducer for IdentityReducer {
    fn reduce(&self, key: &str, values: &[String]) -> Result<Vec<(String, String)>> {
        Ok(values
            .iter()
            .map(|value| (key.to_string(), value.clone()))
            .collect())
    }
}

/// Emits (line, "1") for lines matching the pattern
struct GrepMapper {
    regex: Regex,
}

impl Mapper for GrepMapper {
    fn map(&self, line: &str) -> Result<Vec<(String, String)>> {
        if self.regex.is_match(line) {
            Ok(vec![(line.to_string(), "1".to_string())])
        } else {
            Ok(Vec::new())
        }
    }
}

/// References every worker can resolve out of the box
pub static BUILTIN_REFS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["wordcount", "identity", "grep:<pattern>"]);
