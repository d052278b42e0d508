//! Label filters and label file tooling.
//!
//! Points may carry a set of labels; a filtered search only traverses nodes
//! whose label set matches the filter. One label id may be designated
//! *universal*: a node carrying it matches every filter.
//!
//! Label files are text, one line per point, comma-separated tokens. Tokens
//! are rewritten into dense `u32` ids before indexing; the rewritten file
//! and the token map are persisted next to the index so that queries can be
//! mapped the same way.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use smallvec::SmallVec;

use crate::error::Result;

type LabelSet = SmallVec<[u32; 4]>;

/// Per-slot label sets plus the optional universal label.
///
/// Also tracks one *entry slot* per label: the first point seen carrying
/// it. Filtered traversal seeds from the entry slot of the filter label so
/// the matching subgraph is reachable even when no matching point happens
/// to neighbor the global start points.
#[derive(Debug)]
pub struct LabelIndex {
    labels: Vec<LabelSet>,
    universal: Option<u32>,
    entries: HashMap<u32, u32>,
}

impl LabelIndex {
    pub fn new(total_slots: usize, universal: Option<u32>) -> Self {
        Self {
            labels: vec![LabelSet::new(); total_slots],
            universal,
            entries: HashMap::new(),
        }
    }

    pub fn set(&mut self, slot: u32, labels: &[u32]) {
        self.labels[slot as usize] = labels.iter().copied().collect();
        for &label in labels {
            self.entries.entry(label).or_insert(slot);
        }
    }

    pub fn clear(&mut self, slot: u32) {
        self.labels[slot as usize].clear();
        self.entries.retain(|_, &mut s| s != slot);
    }

    /// Entry slot for a label, if any point carries it.
    pub fn entry_for(&self, label: u32) -> Option<u32> {
        self.entries.get(&label).copied()
    }

    pub fn labels_of(&self, slot: u32) -> &[u32] {
        &self.labels[slot as usize]
    }

    pub fn set_universal(&mut self, label: Option<u32>) {
        self.universal = label;
    }

    pub fn universal(&self) -> Option<u32> {
        self.universal
    }

    /// Does the slot satisfy a filter for `want`?
    #[inline]
    pub fn matches(&self, slot: u32, want: u32) -> bool {
        let set = &self.labels[slot as usize];
        set.contains(&want) || self.universal.is_some_and(|u| set.contains(&u))
    }
}

/// Result of rewriting a raw label file into dense ids.
#[derive(Debug)]
pub struct LabelConversion {
    /// Per-point label ids, in file order.
    pub labels: Vec<Vec<u32>>,
    /// Token -> id assignments, in id order.
    pub mapping: Vec<(String, u32)>,
}

/// Rewrite `input` (comma-separated tokens, one line per point) into dense
/// numeric ids, writing the formatted file and the token map alongside.
///
/// When a universal token is given it is assigned id 0 whether or not it
/// occurs in the file; other tokens get ids in first-seen order.
pub fn convert_label_file(
    input: &Path,
    formatted_out: &Path,
    map_out: &Path,
    universal: Option<&str>,
) -> Result<LabelConversion> {
    let reader = BufReader::new(File::open(input)?);

    let mut ids: HashMap<String, u32> = HashMap::new();
    let mut mapping: Vec<(String, u32)> = Vec::new();
    if let Some(u) = universal {
        ids.insert(u.to_string(), 0);
        mapping.push((u.to_string(), 0));
    }

    let mut labels = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let mut row = Vec::new();
        for token in line.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let next_id = ids.len() as u32;
            let id = *ids.entry(token.to_string()).or_insert_with(|| {
                mapping.push((token.to_string(), next_id));
                next_id
            });
            row.push(id);
        }
        labels.push(row);
    }

    let mut formatted = BufWriter::new(File::create(formatted_out)?);
    for row in &labels {
        let line: Vec<String> = row.iter().map(u32::to_string).collect();
        writeln!(formatted, "{}", line.join(","))?;
    }
    formatted.flush()?;

    let mut map = BufWriter::new(File::create(map_out)?);
    for (token, id) in &mapping {
        writeln!(map, "{token}\t{id}")?;
    }
    map.flush()?;

    Ok(LabelConversion { labels, mapping })
}

/// Read a formatted label file (comma-separated numeric ids per line).
pub fn parse_formatted_label_file(path: &Path) -> Result<Vec<Vec<u32>>> {
    let reader = BufReader::new(File::open(path)?);
    let mut labels = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let row: Vec<u32> = line
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(|t| {
                t.trim().parse::<u32>().map_err(|e| {
                    crate::error::IndexError::FileFormat(format!(
                        "bad label id {t:?} in {}: {e}",
                        path.display()
                    ))
                })
            })
            .collect::<Result<_>>()?;
        labels.push(row);
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universal_label_matches_any_filter() {
        let mut idx = LabelIndex::new(3, Some(0));
        idx.set(0, &[3]);
        idx.set(1, &[0]);
        assert!(idx.matches(0, 3));
        assert!(!idx.matches(0, 4));
        assert!(idx.matches(1, 3));
        assert!(idx.matches(1, 4));
        assert!(!idx.matches(2, 3));
    }

    #[test]
    fn clear_drops_the_set() {
        let mut idx = LabelIndex::new(2, None);
        idx.set(0, &[1, 2]);
        idx.clear(0);
        assert!(!idx.matches(0, 1));
        assert!(idx.labels_of(0).is_empty());
    }

    #[test]
    fn entry_slot_is_first_seen_and_survives_clears_of_others() {
        let mut idx = LabelIndex::new(3, None);
        idx.set(0, &[7]);
        idx.set(1, &[7, 8]);
        assert_eq!(idx.entry_for(7), Some(0));
        assert_eq!(idx.entry_for(8), Some(1));
        idx.clear(1);
        assert_eq!(idx.entry_for(7), Some(0));
        assert_eq!(idx.entry_for(8), None);
    }

    #[test]
    fn conversion_round_trips_through_formatted_file() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("labels.txt");
        let formatted = dir.path().join("labels_formatted.txt");
        let map = dir.path().join("labels_map.txt");
        std::fs::write(&raw, "red,blue\nblue\nall\ngreen,red\n").unwrap();

        let conv = convert_label_file(&raw, &formatted, &map, Some("all")).unwrap();
        // "all" is pinned to 0, the rest are first-seen.
        assert_eq!(conv.mapping[0], ("all".to_string(), 0));
        assert_eq!(conv.labels.len(), 4);
        assert_eq!(conv.labels[0].len(), 2);
        assert_eq!(conv.labels[2], vec![0]);

        let reparsed = parse_formatted_label_file(&formatted).unwrap();
        assert_eq!(reparsed, conv.labels);
    }
}
