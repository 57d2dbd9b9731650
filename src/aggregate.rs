//! Aggregation engine: groups execution records and computes summary statistics
//!
//! Records are grouped by `(text, call-site signature)`, so the same query
//! issued from two places forms two groups. Every record also lands in a
//! global group used for the report's summary lines. Groups come out ordered
//! by total time, costliest first.
//!
//! The engine is a pure function over its input: no locking, safe to run
//! concurrently over independent batches.

use crate::capture::{LibraryFrames, StackResolver};
use crate::params::{params_hash, text_hash, Params};
use crate::record::{ExecutionRecord, StackFrame};
use std::collections::HashMap;
use std::time::Duration;

/// Identity of a query group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// One operation text issued from one call site
    Query { text: String, stack_text: String },
    /// Every record in the report
    All,
}

/// Key of one distinct parameter set: `(hash of text, hash of params)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamsKey {
    pub text_hash: u64,
    pub params_hash: u64,
}

impl ParamsKey {
    pub fn of(text: &str, params: &Params) -> Self {
        Self {
            text_hash: text_hash(text),
            params_hash: params_hash(params),
        }
    }

    /// Hex form used to label parameter sets in reports
    pub fn to_hex(self) -> String {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.text_hash.to_be_bytes());
        bytes[8..].copy_from_slice(&self.params_hash.to_be_bytes());
        hex::encode(bytes)
    }
}

/// How often one parameter set occurred within a group
#[derive(Debug, Clone, PartialEq)]
pub struct ParamsEntry {
    pub key: ParamsKey,
    pub count: usize,
    /// Stack of the first record seen with this parameter set
    pub stack: Vec<StackFrame>,
    /// Parameters of that first record
    pub params: Params,
}

/// Aggregate of records sharing a [`GroupKey`]
#[derive(Debug, Clone)]
pub struct QueryGroup {
    pub key: GroupKey,
    /// Text of the first record added
    pub text: String,
    /// First word of `text`, e.g. `SELECT`
    pub first_word: String,
    /// Records in insertion order
    pub records: Vec<ExecutionRecord>,
    /// Occurrences per call-site signature
    pub stacks: HashMap<String, usize>,
    /// Innermost non-library frame per call-site signature
    pub callers: HashMap<String, Option<StackFrame>>,
    pub sum: Duration,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    /// Filled in by [`QueryGroup::calc_median`]
    pub median: Duration,
    /// Sum of reported row counts; records without one contribute 0
    pub rowcounts: u64,
    params_index: HashMap<ParamsKey, usize>,
    param_sets: Vec<ParamsEntry>,
}

impl QueryGroup {
    pub fn new(key: GroupKey) -> Self {
        Self {
            key,
            text: String::new(),
            first_word: String::new(),
            records: Vec::new(),
            stacks: HashMap::new(),
            callers: HashMap::new(),
            sum: Duration::ZERO,
            min: Duration::ZERO,
            max: Duration::ZERO,
            mean: Duration::ZERO,
            median: Duration::ZERO,
            rowcounts: 0,
            params_index: HashMap::new(),
            param_sets: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add one record, updating the running statistics in O(1)
    ///
    /// `stack_text` is the record's formatted stack, computed once by the
    /// caller and shared between the record's group and the global group.
    pub fn add(&mut self, record: ExecutionRecord, stack_text: &str, frames: &LibraryFrames) {
        let duration = record.duration();
        if self.records.is_empty() {
            self.text = record.text.clone();
            self.first_word = record
                .text
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            self.min = duration;
            self.max = duration;
        } else {
            self.min = self.min.min(duration);
            self.max = self.max.max(duration);
        }

        *self.stacks.entry(stack_text.to_string()).or_insert(0) += 1;
        if !self.callers.contains_key(stack_text) {
            self.callers.insert(
                stack_text.to_string(),
                frames.user_frame(&record.stack).cloned(),
            );
        }

        self.sum += duration;
        self.rowcounts += record.rowcount.unwrap_or(0);

        let key = ParamsKey::of(&record.text, &record.params);
        match self.params_index.get(&key) {
            Some(&index) => self.param_sets[index].count += 1,
            None => {
                self.params_index.insert(key, self.param_sets.len());
                self.param_sets.push(ParamsEntry {
                    key,
                    count: 1,
                    stack: record.stack.clone(),
                    params: record.params.clone(),
                });
            }
        }

        self.records.push(record);
        self.mean = mean_duration(self.sum, self.records.len());
    }

    /// Median duration over the group's records
    ///
    /// Durations are sorted descending; for an even count the two central
    /// values are averaged. Zero for an empty group.
    pub fn calc_median(&mut self) {
        let mut durations: Vec<Duration> = self.records.iter().map(|r| r.duration()).collect();
        durations.sort_unstable_by(|a, b| b.cmp(a));
        let len = durations.len();
        self.median = match len {
            0 => Duration::ZERO,
            _ if len % 2 == 0 => (durations[len / 2 - 1] + durations[len / 2]) / 2,
            _ => durations[len / 2],
        };
    }

    /// Lookup one parameter set's entry
    pub fn params_entry(&self, key: &ParamsKey) -> Option<&ParamsEntry> {
        self.params_index.get(key).map(|&i| &self.param_sets[i])
    }

    /// Distinct parameter sets, most frequent first (ties in first-seen order)
    pub fn param_sets(&self) -> Vec<&ParamsEntry> {
        let mut sets: Vec<&ParamsEntry> = self.param_sets.iter().collect();
        sets.sort_by(|a, b| b.count.cmp(&a.count));
        sets
    }

    pub fn unique_params(&self) -> usize {
        self.param_sets.len()
    }

    /// Call sites, most frequent first (ties by signature)
    pub fn stacks_by_count(&self) -> Vec<(&str, usize)> {
        let mut stacks: Vec<(&str, usize)> =
            self.stacks.iter().map(|(s, &n)| (s.as_str(), n)).collect();
        stacks.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        stacks
    }
}

/// `sum / count` in whole nanoseconds; zero for an empty set
fn mean_duration(sum: Duration, count: usize) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = sum.as_nanos() / count as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Aggregated view of a batch of records, ready for rendering
#[derive(Debug, Clone)]
pub struct Report {
    /// Non-global groups, highest total time first
    pub groups: Vec<QueryGroup>,
    /// Summary over every record
    pub all: QueryGroup,
}

impl Report {
    pub fn unique_queries(&self) -> usize {
        self.groups.len()
    }

    pub fn total_queries(&self) -> usize {
        self.all.count()
    }

    pub fn total_time(&self) -> Duration {
        self.all.sum
    }
}

/// Group, summarize and order a batch of records
pub fn aggregate<I>(records: I) -> Report
where
    I: IntoIterator<Item = ExecutionRecord>,
{
    aggregate_with(records, &LibraryFrames::default())
}

/// Like [`aggregate`], attributing callers with the given library patterns
pub fn aggregate_with<I>(records: I, frames: &LibraryFrames) -> Report
where
    I: IntoIterator<Item = ExecutionRecord>,
{
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<QueryGroup> = Vec::new();
    let mut all = QueryGroup::new(GroupKey::All);

    let mut resolver = StackResolver::new();
    for mut record in records {
        resolver.resolve_record(&mut record);
        let stack_text = record.stack_text();
        let key = GroupKey::Query {
            text: record.text.clone(),
            stack_text: stack_text.clone(),
        };
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(QueryGroup::new(key));
            groups.len() - 1
        });
        all.add(record.clone(), &stack_text, frames);
        groups[slot].add(record, &stack_text, frames);
    }

    for group in &mut groups {
        group.calc_median();
    }
    all.calc_median();

    // Stable sort: equal sums keep first-occurrence order
    groups.sort_by(|a, b| b.sum.cmp(&a.sum));

    tracing::debug!(
        records = all.count(),
        groups = groups.len(),
        "aggregated records"
    );
    Report { groups, all }
}
