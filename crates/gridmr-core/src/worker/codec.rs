//! Intermediate record format and shuffle addressing
//!
//! Map output travels as length-prefixed (key, value) pairs: u32 LE key
//! length, key bytes, u32 LE value length, value bytes, both UTF-8. The
//! partition a key lands in is a stable FNV-1a hash mod R, so identical
//! inputs shuffle identically across re-runs.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::{Error, Result};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Reduce partition for a key: `fnv1a(key) mod R`
pub fn partition_for_key(key: &str, num_reduces: u32) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash % num_reduces as u64) as u32
}

/// Append one record to an encode buffer
pub fn encode_record(buf: &mut Vec<u8>, key: &str, value: &str) {
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

/// Decode a whole partition blob into records
pub fn decode_records(data: &[u8]) -> Result<Vec<(String, String)>> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let key = read_field(data, &mut offset)?;
        let value = read_field(data, &mut offset)?;
        records.push((key, value));
    }

    Ok(records)
}

fn read_field(data: &[u8], offset: &mut usize) -> Result<String> {
    if *offset + 4 > data.len() {
        return Err(Error::blob_store("truncated record length"));
    }
    let len = u32::from_le_bytes(data[*offset..*offset + 4].try_into().unwrap()) as usize;
    *offset += 4;

    if *offset + len > data.len() {
        return Err(Error::blob_store("truncated record payload"));
    }
    let field = std::str::from_utf8(&data[*offset..*offset + len])
        .map_err(|e| Error::blob_store(format!("record is not UTF-8: {}", e)))?
        .to_string();
    *offset += len;

    Ok(field)
}

/// K-way merge over runs that are already sorted by key
///
/// Holds one cursor per run, so the merge front stays bounded no matter how
/// many records the runs carry in total.
pub struct KWayMerge {
    runs: Vec<Vec<(String, String)>>,
    cursors: Vec<usize>,
    heap: BinaryHeap<Reverse<(String, usize)>>,
}

impl KWayMerge {
    pub fn new(runs: Vec<Vec<(String, String)>>) -> Self {
        let cursors = vec![0; runs.len()];
        let mut heap = BinaryHeap::new();
        for (run_index, run) in runs.iter().enumerate() {
            if let Some((key, _)) = run.first() {
                heap.push(Reverse((key.clone(), run_index)));
            }
        }
        Self { runs, cursors, heap }
    }
}

impl Iterator for KWayMerge {
    type Item = (String, String);

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse((key, run_index)) = self.heap.pop()?;

        let cursor = self.cursors[run_index];
        let value = self.runs[run_index][cursor].1.clone();
        self.cursors[run_index] += 1;

        if let Some((next_key, _)) = self.runs[run_index].get(self.cursors[run_index]) {
            self.heap.push(Reverse((next_key.clone(), run_index)));
        }

        Some((key, value))
    }
}

/// Consume a merged stream as (key, values) groups
pub fn group_by_key(merged: impl Iterator<Item = (String, String)>) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();

    for (key, value) in merged {
        match groups.last_mut() {
            Some((current, values)) if *current == key => values.push(value),
            _ => groups.push((key, vec![value])),
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable_and_in_range() {
        for key in ["hello", "world", "", "mapreduce", "日本語"] {
            let first = partition_for_key(key, 8);
            let second = partition_for_key(key, 8);
            assert_eq!(first, second);
            assert!(first < 8);
        }
    }

    #[test]
    fn test_partition_known_values() {
        // Pinned so the on-disk shuffle layout never silently changes
        assert_eq!(partition_for_key("hello", 1), 0);
        assert_ne!(
            partition_for_key("hello", 1 << 16),
            partition_for_key("world", 1 << 16)
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = Vec::new();
        encode_record(&mut buf, "hello", "1");
        encode_record(&mut buf, "", "empty key");
        encode_record(&mut buf, "tabs\tand\nnewlines", "");

        let records = decode_records(&buf).unwrap();
        assert_eq!(
            records,
            vec![
                ("hello".to_string(), "1".to_string()),
                ("".to_string(), "empty key".to_string()),
                ("tabs\tand\nnewlines".to_string(), "".to_string()),
            ]
        );
    }

    #[test]
    fn test_decode_empty_blob() {
        assert!(decode_records(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let mut buf = Vec::new();
        encode_record(&mut buf, "key", "value");
        buf.truncate(buf.len() - 2);
        assert!(decode_records(&buf).is_err());
    }

    #[test]
    fn test_merge_preserves_sorted_order() {
        let runs = vec![
            vec![("a".into(), "1".into()), ("c".into(), "2".into())],
            vec![("b".into(), "3".into()), ("c".into(), "4".into())],
            vec![],
        ];

        let merged: Vec<(String, String)> = KWayMerge::new(runs).collect();
        let keys: Vec<&str> = merged.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "c"]);
    }

    #[test]
    fn test_group_by_key() {
        let runs = vec![
            vec![("hello".into(), "1".into()), ("world".into(), "1".into())],
            vec![("hello".into(), "1".into())],
        ];

        let groups = group_by_key(KWayMerge::new(runs));
        assert_eq!(
            groups,
            vec![
                ("hello".to_string(), vec!["1".to_string(), "1".to_string()]),
                ("world".to_string(), vec!["1".to_string()]),
            ]
        );
    }
}
