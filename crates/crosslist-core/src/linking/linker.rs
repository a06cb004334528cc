//! Item linker: pairs unlinked A items with unlinked B items

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::normalization::normalize_name;
use super::similarity::lcs_ratio;
use crate::config::LinkerConfig;
use crate::error::{CrosslistError, Result};
use crate::model::{ItemA, ItemAId, ItemB, ItemBId};
use crate::persistence::StateStore;

/// Best-candidate timestamps closer than this earn the timing bonus
const BEST_CANDIDATE_WINDOW_SECONDS: i64 = 3600;

/// How a match was found. Each strategy carries its own confidence and reason.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Exactly one item per side shares the normalized name
    PerfectMatch,
    /// Same multiplicity on both sides, paired by recency rank (0 = newest)
    TimingPair { rank: usize },
    /// Unequal multiplicity; best-scoring B for an A
    BestCandidate { score: f64 },
    /// Name similarity at or above the fuzzy threshold
    FuzzyMatch { score: f64 },
}

impl MatchStrategy {
    pub fn confidence(&self) -> f64 {
        match self {
            MatchStrategy::PerfectMatch => 1.0,
            MatchStrategy::TimingPair { rank } => (0.9 - 0.1 * *rank as f64).max(0.7),
            MatchStrategy::BestCandidate { score } => *score,
            MatchStrategy::FuzzyMatch { score } => *score,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            MatchStrategy::PerfectMatch => "exact_perfect".to_string(),
            MatchStrategy::TimingPair { .. } => "exact_timing".to_string(),
            MatchStrategy::BestCandidate { .. } => "exact_best".to_string(),
            MatchStrategy::FuzzyMatch { score } => format!("fuzzy_match_{:.2}", score),
        }
    }

    pub fn is_exact(&self) -> bool {
        !matches!(self, MatchStrategy::FuzzyMatch { .. })
    }
}

/// A proposed (and, after linking, persisted) correspondence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMatch {
    pub item_a_id: ItemAId,
    pub item_b_id: ItemBId,
    pub name_a: String,
    pub name_b: String,
    pub strategy: MatchStrategy,
}

impl LinkMatch {
    fn new(a: &ItemA, b: &ItemB, strategy: MatchStrategy) -> Self {
        Self {
            item_a_id: a.id,
            item_b_id: b.id,
            name_a: a.name.clone(),
            name_b: b.name.clone(),
            strategy,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.strategy.confidence()
    }

    pub fn reason(&self) -> String {
        self.strategy.reason()
    }
}

/// Snapshot of linking state without mutating anything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkingSummary {
    pub total_a: usize,
    pub total_b: usize,
    pub linked: usize,
    pub unlinked_a: usize,
    pub unlinked_b: usize,
    /// Normalized names present among unlinked items on both sides
    pub potential_exact_matches: usize,
    pub name_groups_a: usize,
    pub name_groups_b: usize,
    /// Normalized names held by more than one unlinked item
    pub duplicate_names_a: usize,
    pub duplicate_names_b: usize,
}

/// Matches unlinked items across the two sides and persists the links.
pub struct ItemLinker<'a> {
    store: &'a StateStore,
    config: &'a LinkerConfig,
}

impl<'a> ItemLinker<'a> {
    pub fn new(store: &'a StateStore, config: &'a LinkerConfig) -> Self {
        Self { store, config }
    }

    /// Link every unlinked pair the matching stages can find.
    ///
    /// A match whose link already exists is logged and left out of the result.
    pub fn link_all_items(&self) -> Result<Vec<LinkMatch>> {
        let items_a = self.store.unlinked_items_a()?;
        let items_b = self.store.unlinked_items_b()?;
        debug!(
            unlinked_a = items_a.len(),
            unlinked_b = items_b.len(),
            "Linking unlinked items"
        );

        let matches = self.find_matches(&items_a, &items_b);
        let linked = self.persist_matches(&matches)?;

        let exact = linked.iter().filter(|m| m.strategy.is_exact()).count();
        info!(exact, fuzzy = linked.len() - exact, "Linking complete");
        Ok(linked)
    }

    /// Store a link per match, skipping any that already exist.
    pub(crate) fn persist_matches(&self, matches: &[LinkMatch]) -> Result<Vec<LinkMatch>> {
        let mut linked = Vec::new();
        for candidate in matches {
            match self.store.create_link(
                candidate.item_a_id,
                candidate.item_b_id,
                candidate.confidence(),
            ) {
                Ok(_) => {
                    debug!(
                        name_a = %candidate.name_a,
                        name_b = %candidate.name_b,
                        reason = %candidate.reason(),
                        confidence = candidate.confidence(),
                        "Linked items"
                    );
                    linked.push(candidate.clone());
                }
                Err(CrosslistError::DuplicateLink { item_a, item_b }) => {
                    warn!(%item_a, %item_b, "Skipping match for an existing link");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(linked)
    }

    /// Compute matches between the given items without touching the store.
    pub fn find_matches(&self, items_a: &[ItemA], items_b: &[ItemB]) -> Vec<LinkMatch> {
        let mut matches = Vec::new();
        let mut claimed_a: HashSet<ItemAId> = HashSet::new();
        let mut claimed_b: HashSet<ItemBId> = HashSet::new();

        if self.config.exact_name_match {
            for m in self.exact_matches(items_a, items_b) {
                claimed_a.insert(m.item_a_id);
                claimed_b.insert(m.item_b_id);
                matches.push(m);
            }
        }

        if self.config.fuzzy_matching {
            let rest_a: Vec<&ItemA> = items_a
                .iter()
                .filter(|a| !claimed_a.contains(&a.id))
                .collect();
            let rest_b: Vec<&ItemB> = items_b
                .iter()
                .filter(|b| !claimed_b.contains(&b.id))
                .collect();
            matches.extend(self.fuzzy_matches(&rest_a, &rest_b));
        }

        matches
    }

    fn exact_matches(&self, items_a: &[ItemA], items_b: &[ItemB]) -> Vec<LinkMatch> {
        let groups_a = group_by_name(items_a, |a| a.name.as_str(), self.config.case_sensitive);
        let groups_b = group_by_name(items_b, |b| b.name.as_str(), self.config.case_sensitive);

        let mut matches = Vec::new();
        for (name, group_a) in &groups_a {
            let Some(group_b) = groups_b.get(name) else {
                continue;
            };

            if group_a.len() == 1 && group_b.len() == 1 {
                matches.push(LinkMatch::new(group_a[0], group_b[0], MatchStrategy::PerfectMatch));
            } else if group_a.len() == group_b.len() {
                matches.extend(pair_by_recency(group_a, group_b));
            } else {
                matches.extend(pair_best_candidates(group_a, group_b));
            }
        }
        matches
    }

    fn fuzzy_matches(&self, items_a: &[&ItemA], items_b: &[&ItemB]) -> Vec<LinkMatch> {
        let names_b: Vec<String> = items_b
            .iter()
            .map(|b| normalize_name(&b.name, self.config.case_sensitive))
            .collect();

        // B index -> (A index, score); a higher score takes the claim, ties keep the first
        let mut claims: HashMap<usize, (usize, f64)> = HashMap::new();

        for (ai, a) in items_a.iter().enumerate() {
            let name_a = normalize_name(&a.name, self.config.case_sensitive);
            let mut best: Option<(usize, f64)> = None;
            for (bi, name_b) in names_b.iter().enumerate() {
                let score = lcs_ratio(&name_a, name_b);
                if score >= self.config.fuzzy_threshold && best.map_or(true, |(_, s)| score > s) {
                    best = Some((bi, score));
                }
            }

            let Some((bi, score)) = best else {
                continue;
            };
            match claims.get(&bi) {
                Some(&(prev_ai, prev_score)) if prev_score >= score => {
                    debug!(
                        name_a = %a.name,
                        winner = %items_a[prev_ai].name,
                        "Fuzzy candidate already claimed by a better match"
                    );
                }
                _ => {
                    claims.insert(bi, (ai, score));
                }
            }
        }

        let mut winners: Vec<(usize, usize, f64)> =
            claims.into_iter().map(|(bi, (ai, score))| (ai, bi, score)).collect();
        winners.sort_by_key(|&(ai, _, _)| ai);

        winners
            .into_iter()
            .map(|(ai, bi, score)| {
                LinkMatch::new(items_a[ai], items_b[bi], MatchStrategy::FuzzyMatch { score })
            })
            .collect()
    }

    /// Counts describing linked and unlinked items
    pub fn linking_summary(&self) -> Result<LinkingSummary> {
        let stats = self.store.statistics()?;
        let unlinked_a = self.store.unlinked_items_a()?;
        let unlinked_b = self.store.unlinked_items_b()?;

        let case_sensitive = self.config.case_sensitive;
        let counts_a = name_counts(unlinked_a.iter().map(|a| a.name.as_str()), case_sensitive);
        let counts_b = name_counts(unlinked_b.iter().map(|b| b.name.as_str()), case_sensitive);

        Ok(LinkingSummary {
            total_a: stats.items_a,
            total_b: stats.items_b,
            linked: stats.links,
            unlinked_a: unlinked_a.len(),
            unlinked_b: unlinked_b.len(),
            potential_exact_matches: counts_a
                .keys()
                .filter(|k| counts_b.contains_key(*k))
                .count(),
            name_groups_a: counts_a.len(),
            name_groups_b: counts_b.len(),
            duplicate_names_a: counts_a.values().filter(|&&n| n > 1).count(),
            duplicate_names_b: counts_b.values().filter(|&&n| n > 1).count(),
        })
    }
}

fn group_by_name<'i, T>(
    items: &'i [T],
    name: impl Fn(&T) -> &str,
    case_sensitive: bool,
) -> BTreeMap<String, Vec<&'i T>> {
    let mut groups: BTreeMap<String, Vec<&T>> = BTreeMap::new();
    for item in items {
        groups
            .entry(normalize_name(name(item), case_sensitive))
            .or_default()
            .push(item);
    }
    groups
}

fn name_counts<'n>(
    names: impl Iterator<Item = &'n str>,
    case_sensitive: bool,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for name in names {
        *counts.entry(normalize_name(name, case_sensitive)).or_insert(0) += 1;
    }
    counts
}

/// Equal multiplicity: newest A with newest B, and so on down
fn pair_by_recency(group_a: &[&ItemA], group_b: &[&ItemB]) -> Vec<LinkMatch> {
    let mut sorted_a = group_a.to_vec();
    let mut sorted_b = group_b.to_vec();
    sorted_a.sort_by(|x, y| y.last_modified_at.cmp(&x.last_modified_at));
    // Descending, items without a timestamp last
    sorted_b.sort_by(|x, y| y.updated_at.cmp(&x.updated_at));

    sorted_a
        .into_iter()
        .zip(sorted_b)
        .enumerate()
        .map(|(rank, (a, b))| LinkMatch::new(a, b, MatchStrategy::TimingPair { rank }))
        .collect()
}

/// Unequal multiplicity: each A takes its best-scoring unclaimed B
fn pair_best_candidates(group_a: &[&ItemA], group_b: &[&ItemB]) -> Vec<LinkMatch> {
    let mut claimed = vec![false; group_b.len()];
    let mut matches = Vec::new();

    for a in group_a {
        let mut best: Option<(usize, f64)> = None;
        for (bi, b) in group_b.iter().enumerate() {
            if claimed[bi] {
                continue;
            }
            let score = candidate_score(a, b);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((bi, score));
            }
        }

        if let Some((bi, score)) = best {
            if score >= 0.6 {
                claimed[bi] = true;
                let strategy = MatchStrategy::BestCandidate { score };
                matches.push(LinkMatch::new(a, group_b[bi], strategy));
            }
        }
    }

    matches
}

fn candidate_score(a: &ItemA, b: &ItemB) -> f64 {
    let mut score = 0.6;
    if a.checked == b.checked {
        score += 0.2;
    }
    if let Some(updated_at) = b.updated_at {
        if within_window(a.last_modified_at, updated_at) {
            score += 0.2;
        }
    }
    score
}

fn within_window(x: DateTime<Utc>, y: DateTime<Utc>) -> bool {
    (x - y).num_seconds().abs() <= BEST_CANDIDATE_WINDOW_SECONDS
}
