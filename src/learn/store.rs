//! Deduplicated store of accepted rules.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;

use crate::rule::Rule;

/// Number of independently locked buckets.
pub const BUCKETS: usize = 307;

/// Rules spread over [`BUCKETS`] mutex-guarded sets by hash, so workers
/// only contend when their rules share a bucket. The store only grows.
pub struct RuleStore {
    buckets: Vec<Mutex<HashSet<Rule>>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKETS).map(|_| Mutex::new(HashSet::new())).collect(),
        }
    }

    fn bucket(&self, rule: &Rule) -> &Mutex<HashSet<Rule>> {
        let mut hasher = DefaultHasher::new();
        rule.hash(&mut hasher);
        &self.buckets[(hasher.finish() % BUCKETS as u64) as usize]
    }

    /// Whether an equal rule has not been stored yet.
    pub fn is_novel(&self, rule: &Rule) -> bool {
        !self
            .bucket(rule)
            .lock()
            .expect("rule bucket lock poisoned")
            .contains(rule)
    }

    /// Store a rule. Returns `false` if an equal rule was already present.
    pub fn insert(&self, rule: Rule) -> bool {
        self.bucket(&rule)
            .lock()
            .expect("rule bucket lock poisoned")
            .insert(rule)
    }

    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.lock().expect("rule bucket lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored rule, bucket by bucket.
    pub fn snapshot(&self) -> Vec<Rule> {
        let mut rules = Vec::new();
        for bucket in &self.buckets {
            rules.extend(bucket.lock().expect("rule bucket lock poisoned").iter().cloned());
        }
        rules
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}
