//! Max-plus ranking of candidate sets.
//!
//! Rules arrive in descending confidence. Each call to
//! [`ScoreTree::add_values`] splits every stored tier by the new set: the
//! entities the new rule also proposes move into a child tier, which ranks
//! above the rest of its parent. New top-level tiers are only admitted while
//! fewer than `k` entities have been collected. Once the tree holds exactly
//! `k` ranked entities and its best leaf is a single entity, further rules
//! cannot change the top-k and the caller stops.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::graph::{EntityId, IdRegistry};
use crate::rule::Rule;

/// Weight of a nested tier's score relative to its parent.
pub const EPSILON: f64 = 0.0001;

#[derive(Debug, Clone)]
pub struct ScoreTree<'a> {
    children: Vec<ScoreTree<'a>>,
    score: f64,
    explanation: Option<&'a Rule>,
    /// `None` on the root.
    stored: Option<BTreeSet<EntityId>>,
    num_values: usize,
    /// Rank of the last entity of this tier.
    index: usize,
    closed: bool,
    k: usize,
}

impl<'a> ScoreTree<'a> {
    /// An empty root for a top-`k` ranking.
    pub fn new(k: usize) -> Self {
        Self {
            children: Vec::new(),
            score: 0.0,
            explanation: None,
            stored: None,
            num_values: 0,
            index: 0,
            closed: false,
            k,
        }
    }

    fn tier(
        score: f64,
        values: BTreeSet<EntityId>,
        explanation: Option<&'a Rule>,
        index: usize,
        k: usize,
    ) -> Self {
        Self {
            children: Vec::new(),
            score,
            explanation,
            closed: values.len() <= 1,
            num_values: values.len(),
            stored: Some(values),
            index,
            k,
        }
    }

    fn is_root(&self) -> bool {
        self.stored.is_none()
    }

    /// Merge the candidates of one rule. `values` is consumed: entries that
    /// already sit in a tier are taken out as the tiers are split.
    pub fn add_values(&mut self, score: f64, values: &mut BTreeSet<EntityId>, explanation: Option<&'a Rule>) {
        for child in &mut self.children {
            child.add_values(score, values, explanation);
        }

        if let Some(stored) = self.stored.take() {
            let (touched, untouched): (BTreeSet<_>, BTreeSet<_>) =
                stored.iter().copied().partition(|v| values.contains(v));
            for v in &touched {
                values.remove(v);
            }
            let size = stored.len();
            if !touched.is_empty() && size > 1 && touched.len() < size {
                let child_index = self.index.saturating_sub(untouched.len());
                if child_index >= self.k {
                    self.num_values -= untouched.len();
                    self.index = child_index;
                    self.stored = Some(touched);
                } else {
                    self.stored = Some(untouched);
                    self.children
                        .push(Self::tier(score, touched, explanation, child_index, self.k));
                }
            } else {
                self.stored = Some(stored);
            }
        } else if !values.is_empty() && self.num_values < self.k {
            let index = self.num_values + values.len();
            self.num_values += values.len();
            let fresh = std::mem::take(values);
            self.children.push(Self::tier(score, fresh, explanation, index, self.k));
        }

        if self.stored.as_ref().is_none_or(|s| s.len() <= 1) {
            self.closed = self.children.iter().all(|c| c.closed);
        }
    }

    /// Whether the top-k can no longer change: the last top-level tier ends
    /// exactly at rank `k` and the best leaf holds a single entity.
    pub fn fine(&self) -> bool {
        match self.children.last() {
            Some(last) if self.is_root() && last.index == self.k => self.is_first_unique(),
            _ => false,
        }
    }

    fn is_first_unique(&self) -> bool {
        let mut tree = self;
        while let Some(first) = tree.children.first() {
            tree = first;
        }
        tree.closed
    }

    /// Ranked candidates: nested tiers before their parent, each entity scored
    /// with its tier's score plus the scores of its refining tiers.
    pub fn as_list(&self) -> Vec<(EntityId, f64)> {
        let mut list = Vec::new();
        self.collect(&mut list, 0.0, 0);
        list
    }

    fn collect(&self, list: &mut Vec<(EntityId, f64)>, ps: f64, level: i32) {
        let own = ps + EPSILON.powi(level - 1) * self.score;
        for child in &self.children {
            let inherited = if self.is_root() { ps } else { own };
            child.collect(list, inherited, level + 1);
        }
        if let Some(stored) = &self.stored {
            list.extend(stored.iter().map(|v| (*v, own)));
        }
    }

    /// Indented dump of the tiers with the rule that introduced each one.
    pub fn render(&self, registry: &IdRegistry) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.render_into(&mut out, "", registry);
        }
        out
    }

    fn render_into(&self, out: &mut String, indent: &str, registry: &IdRegistry) {
        let sign = if self.closed { 'X' } else { 'O' };
        let _ = write!(out, "{indent}{sign} {} [{}]({}) -> {{ ", self.score, self.index, self.num_values);
        for v in self.stored.iter().flatten() {
            let _ = write!(out, "{} ", registry.entity_label(*v));
        }
        let explanation = self
            .explanation
            .map_or_else(|| "none".to_string(), |r| r.display(registry));
        let _ = writeln!(out, "}} with explanation: {explanation}");
        let deeper = format!("{indent}   ");
        for child in &self.children {
            child.render_into(out, &deeper, registry);
        }
    }
}
