use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use serde::Serialize;

use crate::model::TradeRecord;

pub const DEFAULT_MIN_TOKEN_LEN: usize = 2;

/// token -> ascending record positions
#[derive(Debug, Default)]
pub struct InvertedIndex {
    postings: HashMap<String, Vec<usize>>,
}

impl InvertedIndex {
    pub fn build(records: &[TradeRecord], min_token_len: usize) -> Self {
        let mut postings: HashMap<String, Vec<usize>> = HashMap::new();

        for (position, record) in records.iter().enumerate() {
            let text = record.searchable_text();
            if text.trim().is_empty() {
                continue;
            }

            let tokens: HashSet<&str> = text.split_whitespace().collect();
            for token in tokens {
                if token.chars().count() < min_token_len {
                    continue;
                }
                postings.entry(token.to_string()).or_default().push(position);
            }
        }

        InvertedIndex { postings }
    }

    pub fn unique_tokens(&self) -> usize {
        self.postings.len()
    }

    // Union of every posting list whose token contains `query_token`.
    fn matching_positions(&self, query_token: &str) -> BTreeSet<usize> {
        self.postings
            .iter()
            .filter(|(token, _)| token.contains(query_token))
            .flat_map(|(_, positions)| positions.iter().copied())
            .collect()
    }
}

/// A record array and the index built from it. Never mutated once built.
#[derive(Debug, Default)]
pub struct Generation {
    records: Vec<TradeRecord>,
    index: InvertedIndex,
}

impl Generation {
    pub fn build(records: Vec<TradeRecord>, min_token_len: usize) -> Self {
        let index = InvertedIndex::build(&records, min_token_len);
        Generation { records, index }
    }

    pub fn records(&self) -> &[TradeRecord] {
        &self.records
    }

    /// All query tokens must match (AND); each may match any indexed token
    /// containing it. Results come back in ingestion order.
    pub fn search(&self, query: &str) -> Vec<&TradeRecord> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.records.iter().collect();
        }

        let mut sets = Vec::new();
        for token in query.split_whitespace() {
            let matches = self.index.matching_positions(token);
            if matches.is_empty() {
                return Vec::new();
            }
            sets.push(matches);
        }

        sets.sort_by_key(|set| set.len());
        let mut sets = sets.into_iter();
        let Some(mut survivors) = sets.next() else {
            return Vec::new();
        };
        for set in sets {
            survivors.retain(|position| set.contains(position));
            if survivors.is_empty() {
                return Vec::new();
            }
        }

        survivors
            .into_iter()
            .filter_map(|position| self.records.get(position))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub total_records: usize,
    pub unique_tokens: usize,
    pub indexed: bool,
}

/// Owns the current generation. `load` swaps records and index in one step,
/// so readers holding a `snapshot()` never see a mix of two loads.
#[derive(Debug)]
pub struct SearchEngine {
    current: Arc<Generation>,
    min_token_len: usize,
    indexed: bool,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::with_min_token_len(DEFAULT_MIN_TOKEN_LEN)
    }

    pub fn with_min_token_len(min_token_len: usize) -> Self {
        SearchEngine {
            current: Arc::new(Generation::default()),
            min_token_len,
            indexed: false,
        }
    }

    pub fn load(&mut self, records: Vec<TradeRecord>) {
        let started = Instant::now();
        let generation = Generation::build(records, self.min_token_len);

        debug!(
            "Indexed {} records, {} unique tokens in {:?}",
            generation.records.len(),
            generation.index.unique_tokens(),
            started.elapsed()
        );

        self.current = Arc::new(generation);
        self.indexed = true;
    }

    pub fn search(&self, query: &str) -> Vec<&TradeRecord> {
        self.current.search(query)
    }

    pub fn records(&self) -> &[TradeRecord] {
        self.current.records()
    }

    pub fn snapshot(&self) -> Arc<Generation> {
        Arc::clone(&self.current)
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_records: self.current.records.len(),
            unique_tokens: self.current.index.unique_tokens(),
            indexed: self.indexed,
        }
    }

    pub fn clear(&mut self) {
        self.current = Arc::new(Generation::default());
        self.indexed = false;
    }
}
