// src/clustering/create_clusters.rs
use indicatif::ProgressBar;
use log::{debug, info, warn};
use petgraph::graph::{NodeIndex, UnGraph};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use crate::clustering::union_find::UnionFind;
use crate::errors::DedupError;
use crate::matching::SimilarityScorer;
use crate::models::{
    Cluster, MergeEdge, NormalizedRecord, PairKey, ReviewItem, SimilarityScore, UnitClass,
};
use crate::utils::config::DedupConfig;
use crate::utils::deadline::Deadline;

/// Similarity between two records by id, whether or not they were ever a candidate pair.
pub trait PairSimilarity: Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;

    /// The similarity when it is available without scoring the pair.
    fn known_similarity(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.similarity(a, b))
    }
}

/// Already-computed scores, falling back to the scorer for pairs never scored.
pub struct ScoreLookup<'a> {
    scores: HashMap<PairKey, f64>,
    records: HashMap<&'a str, &'a NormalizedRecord>,
    scorer: Option<&'a SimilarityScorer>,
}

impl<'a> ScoreLookup<'a> {
    /// Lookup over `scores` only; unknown pairs count as 0.0.
    pub fn new(scores: &[SimilarityScore]) -> Self {
        Self {
            scores: scores
                .iter()
                .map(|s| (s.pair.clone(), s.combined_score))
                .collect(),
            records: HashMap::new(),
            scorer: None,
        }
    }

    pub fn with_recompute(mut self, scorer: &'a SimilarityScorer, records: &'a [NormalizedRecord]) -> Self {
        self.records = records.iter().map(|r| (r.id(), r)).collect();
        self.scorer = Some(scorer);
        self
    }
}

impl PairSimilarity for ScoreLookup<'_> {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        if let Some(score) = self.known_similarity(a, b) {
            return score;
        }
        match (self.scorer, self.records.get(a), self.records.get(b)) {
            (Some(scorer), Some(ra), Some(rb)) => scorer.score_value(ra, rb),
            _ => 0.0,
        }
    }

    fn known_similarity(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(1.0);
        }
        match self.scores.get(&PairKey::new(a, b)) {
            Some(score) => Some(*score),
            None if self.scorer.is_none() => Some(0.0),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusteringOutcome {
    /// Sorted by smallest member id.
    pub clusters: Vec<Cluster>,
    pub review_items: Vec<ReviewItem>,
    pub partitions: usize,
    pub rejected_merges: usize,
    pub coherence_splits: usize,
}

/// Deterministic processing order: descending score, then pair ids.
fn merge_order(x: &SimilarityScore, y: &SimilarityScore) -> Ordering {
    y.combined_score
        .total_cmp(&x.combined_score)
        .then_with(|| x.pair.cmp(&y.pair))
}

/// Groups records into clusters: union-find over scores at or above the
/// threshold, unit-class conflict rejection, then coherence-floor splitting.
///
/// Only pairs at or above the threshold can ever be unioned, so the graph of
/// those edges is split into connected partitions that are clustered
/// independently and in parallel. The merged result is sorted, so it does not
/// depend on scheduling.
pub fn build_clusters(
    records: &[NormalizedRecord],
    scores: &[SimilarityScore],
    similarity: &dyn PairSimilarity,
    config: &DedupConfig,
    deadline: &Deadline,
    pb: Option<&ProgressBar>,
) -> Result<ClusteringOutcome, DedupError> {
    let mut graph: UnGraph<usize, usize> = UnGraph::new_undirected();
    let mut node_of: HashMap<&str, NodeIndex> = HashMap::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        node_of.insert(record.id(), graph.add_node(idx));
    }

    let mut mergeable: Vec<&SimilarityScore> = Vec::new();
    for score in scores {
        if score.combined_score < config.threshold {
            continue;
        }
        let (Some(&na), Some(&nb)) = (
            node_of.get(score.pair.record_id_a.as_str()),
            node_of.get(score.pair.record_id_b.as_str()),
        ) else {
            warn!("Score for {} references an unknown record; ignored", score.pair);
            continue;
        };
        graph.add_edge(na, nb, mergeable.len());
        mergeable.push(score);
    }

    // Connected partitions of the mergeable graph, by manual DFS.
    let mut visited = vec![false; graph.node_count()];
    let mut partitions: Vec<Vec<usize>> = Vec::new();
    for start in graph.node_indices() {
        if visited[start.index()] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if visited[current.index()] {
                continue;
            }
            visited[current.index()] = true;
            component.push(graph[current]);
            for neighbor in graph.neighbors(current) {
                if !visited[neighbor.index()] {
                    stack.push(neighbor);
                }
            }
        }
        component.sort_unstable();
        partitions.push(component);
    }
    debug!(
        "Clustering {} records over {} mergeable edges in {} partitions",
        records.len(),
        mergeable.len(),
        partitions.len()
    );

    // Edges per partition, keyed by the partition's smallest record index.
    let mut partition_of = vec![0usize; records.len()];
    for (p, members) in partitions.iter().enumerate() {
        for &m in members {
            partition_of[m] = p;
        }
    }
    let mut edges_by_partition: Vec<Vec<&SimilarityScore>> = vec![Vec::new(); partitions.len()];
    for edge in graph.edge_indices() {
        if let Some((na, _)) = graph.edge_endpoints(edge) {
            let p = partition_of[graph[na]];
            edges_by_partition[p].push(mergeable[graph[edge]]);
        }
    }

    if let Some(pb) = pb {
        pb.set_length(partitions.len() as u64);
    }
    let results: Vec<PartitionResult> = partitions
        .par_iter()
        .zip(edges_by_partition.par_iter())
        .map(|(members, edges)| {
            if deadline.expired() {
                return PartitionResult::default();
            }
            let result = cluster_partition(records, members, edges, similarity, config, deadline);
            if let Some(pb) = pb {
                pb.inc(1);
            }
            result
        })
        .collect();
    deadline.check("clustering")?;

    let mut outcome = ClusteringOutcome {
        partitions: partitions.len(),
        ..Default::default()
    };
    for result in results {
        outcome.clusters.extend(result.clusters);
        outcome.review_items.extend(result.review_items);
        outcome.rejected_merges += result.rejected_merges;
        outcome.coherence_splits += result.coherence_splits;
    }
    outcome
        .clusters
        .sort_by(|a, b| a.record_ids.cmp(&b.record_ids));
    outcome.review_items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    if let Some(pb) = pb {
        pb.finish_with_message(format!("{} clusters", outcome.clusters.len()));
    }
    info!(
        "Built {} clusters from {} records ({} merges rejected for unit class, {} coherence splits)",
        outcome.clusters.len(),
        records.len(),
        outcome.rejected_merges,
        outcome.coherence_splits
    );
    Ok(outcome)
}

#[derive(Default)]
struct PartitionResult {
    clusters: Vec<Cluster>,
    review_items: Vec<ReviewItem>,
    rejected_merges: usize,
    coherence_splits: usize,
}

fn cluster_partition(
    records: &[NormalizedRecord],
    members: &[usize],
    edges: &[&SimilarityScore],
    similarity: &dyn PairSimilarity,
    config: &DedupConfig,
    deadline: &Deadline,
) -> PartitionResult {
    let mut result = PartitionResult::default();
    if members.len() == 1 {
        let record = &records[members[0]];
        result
            .clusters
            .push(Cluster::singleton(record.id(), record.unit_class));
        return result;
    }

    let local_of: HashMap<&str, usize> = members
        .iter()
        .enumerate()
        .map(|(local, &global)| (records[global].id(), local))
        .collect();
    let mut uf = UnionFind::new(members.iter().map(|&g| records[g].unit_class).collect());

    let mut ordered: Vec<&SimilarityScore> = edges.to_vec();
    ordered.sort_by(|x, y| merge_order(x, y));

    let mut unioned: Vec<MergeEdge> = Vec::new();
    for score in ordered {
        let (Some(&la), Some(&lb)) = (
            local_of.get(score.pair.record_id_a.as_str()),
            local_of.get(score.pair.record_id_b.as_str()),
        ) else {
            continue;
        };
        if uf.find(la) == uf.find(lb) {
            continue;
        }
        if let Some((class_a, class_b)) = first_conflict(uf.set_classes(la).to_vec(), uf.set_classes(lb), config) {
            let err = DedupError::UnitIncompatibility {
                record_id_a: score.pair.record_id_a.clone(),
                record_id_b: score.pair.record_id_b.clone(),
                class_a,
                class_b,
            };
            warn!("Merge rejected (score {:.3}): {}", score.combined_score, err);
            result
                .review_items
                .extend(ReviewItem::from_error(&err, Some(score.combined_score)));
            result.rejected_merges += 1;
            continue;
        }
        uf.union(la, lb);
        unioned.push(MergeEdge {
            pair: score.pair.clone(),
            score: score.combined_score,
        });
    }

    for component in uf.components() {
        let mut component_records: Vec<&NormalizedRecord> =
            component.iter().map(|&l| &records[members[l]]).collect();
        component_records.sort_by(|a, b| a.id().cmp(b.id()));
        let ids: Vec<String> = component_records.iter().map(|r| r.id().to_string()).collect();
        let classes: Vec<Option<UnitClass>> =
            component_records.iter().map(|r| r.unit_class).collect();
        let edges = component_edges(&ids, &unioned);
        split_incoherent(ids, classes, edges, similarity, config, deadline, &mut result);
    }
    result
}

/// Unioned edges inside one component as (index, index, score), in merge order.
/// `ids` must be sorted.
fn component_edges(ids: &[String], unioned: &[MergeEdge]) -> Vec<(usize, usize, f64)> {
    unioned
        .iter()
        .filter_map(|e| {
            let a = ids.binary_search(&e.pair.record_id_a).ok()?;
            let b = ids.binary_search(&e.pair.record_id_b).ok()?;
            Some((a, b, e.score))
        })
        .collect()
}

fn first_conflict(
    left: Vec<UnitClass>,
    right: &[UnitClass],
    config: &DedupConfig,
) -> Option<(UnitClass, UnitClass)> {
    for &a in &left {
        for &b in right {
            if !config.classes_compatible(a, b) {
                return Some((a, b));
            }
        }
    }
    None
}

/// Pairwise similarities inside one component, looked up on first use.
struct MemoSimilarity<'a> {
    ids: &'a [String],
    similarity: &'a dyn PairSimilarity,
    memo: HashMap<(usize, usize), f64>,
}

impl<'a> MemoSimilarity<'a> {
    fn new(ids: &'a [String], similarity: &'a dyn PairSimilarity) -> Self {
        Self {
            ids,
            similarity,
            memo: HashMap::new(),
        }
    }

    fn get(&mut self, i: usize, j: usize) -> f64 {
        if i == j {
            return 1.0;
        }
        let key = (i.min(j), i.max(j));
        let (ids, similarity) = (self.ids, self.similarity);
        *self
            .memo
            .entry(key)
            .or_insert_with(|| similarity.similarity(&ids[key.0], &ids[key.1]))
    }

    /// True when some pair in `group` falls below `floor`. Pairs with a known
    /// score are checked before any pair that needs scoring.
    fn below_floor(&mut self, group: &[usize], floor: f64) -> bool {
        let mut unknown = Vec::new();
        for (x, &i) in group.iter().enumerate() {
            for &j in &group[x + 1..] {
                let known = self
                    .memo
                    .get(&(i, j))
                    .copied()
                    .or_else(|| self.similarity.known_similarity(&self.ids[i], &self.ids[j]));
                match known {
                    Some(v) => {
                        self.memo.insert((i, j), v);
                        if v < floor {
                            return true;
                        }
                    }
                    None => unknown.push((i, j)),
                }
            }
        }
        unknown.into_iter().any(|(i, j)| self.get(i, j) < floor)
    }

    fn min_within(&mut self, group: &[usize]) -> f64 {
        let mut min = 1.0f64;
        for (x, &i) in group.iter().enumerate() {
            for &j in &group[x + 1..] {
                min = min.min(self.get(i, j));
            }
        }
        min
    }
}

/// Members reachable from `start` over `edges`, sorted.
fn reachable(start: usize, edges: &[(usize, usize, f64)]) -> Vec<usize> {
    let mut seen = vec![start];
    let mut stack = vec![start];
    while let Some(current) = stack.pop() {
        for &(a, b, _) in edges {
            let next = if a == current {
                b
            } else if b == current {
                a
            } else {
                continue;
            };
            if !seen.contains(&next) {
                seen.push(next);
                stack.push(next);
            }
        }
    }
    seen.sort_unstable();
    seen
}

/// Checks a unioned component against the coherence floor and splits it until
/// every part meets the floor or is a singleton.
///
/// A split undoes the last union made inside the group (the weakest edge in
/// merge order), so every part is a component the union-find held at some
/// higher threshold. Raising the threshold therefore only ever refines clusters.
/// `ids` must be sorted and `edges` in merge order.
fn split_incoherent(
    ids: Vec<String>,
    classes: Vec<Option<UnitClass>>,
    edges: Vec<(usize, usize, f64)>,
    similarity: &dyn PairSimilarity,
    config: &DedupConfig,
    deadline: &Deadline,
    result: &mut PartitionResult,
) {
    let n = ids.len();
    let mut sims = MemoSimilarity::new(&ids, similarity);
    let mut was_split = false;
    let mut finished: Vec<(Vec<usize>, Vec<(usize, usize, f64)>)> = Vec::new();
    let mut queue: VecDeque<(Vec<usize>, Vec<(usize, usize, f64)>)> =
        VecDeque::from([((0..n).collect::<Vec<_>>(), edges)]);

    while let Some((group, mut group_edges)) = queue.pop_front() {
        if deadline.expired() {
            return;
        }
        if group.len() < 2 || !sims.below_floor(&group, config.coherence_floor) {
            finished.push((group, group_edges));
            continue;
        }
        let Some((cut_a, _, _)) = group_edges.pop() else {
            finished.push((group, group_edges));
            continue;
        };

        let side_a = reachable(cut_a, &group_edges);
        let side_b: Vec<usize> = group.iter().copied().filter(|x| !side_a.contains(x)).collect();
        // the smaller side leaves; on a tie, the side without the smallest id
        let a_leaves = side_a.len() < side_b.len()
            || (side_a.len() == side_b.len() && !side_a.contains(&group[0]));
        let split_off = if a_leaves { &side_a } else { &side_b };

        let min_sim = sims.min_within(&group);
        let evicted_ids: Vec<String> = split_off.iter().map(|&x| ids[x].clone()).collect();
        let group_ids: Vec<String> = group.iter().map(|&x| ids[x].clone()).collect();
        debug!(
            "Coherence split of [{}]: min similarity {:.3}, evicting [{}]",
            group_ids.join(", "),
            min_sim,
            evicted_ids.join(", ")
        );
        result.review_items.push(ReviewItem::coherence_split(
            group_ids,
            evicted_ids,
            min_sim,
            config.coherence_floor,
        ));
        result.coherence_splits += 1;
        was_split = true;

        let (edges_a, edges_b): (Vec<_>, Vec<_>) = group_edges
            .into_iter()
            .partition(|(a, _, _)| side_a.contains(a));
        queue.push_back((side_a, edges_a));
        queue.push_back((side_b, edges_b));
    }

    for (group, group_edges) in finished {
        let record_ids: Vec<String> = group.iter().map(|&x| ids[x].clone()).collect();
        let unit_class = group.iter().find_map(|&x| classes[x]);
        let mut supporting_edges: Vec<MergeEdge> = group_edges
            .iter()
            .map(|&(a, b, score)| MergeEdge {
                pair: PairKey::new(&ids[a], &ids[b]),
                score,
            })
            .collect();
        supporting_edges.sort_by(|a, b| a.pair.cmp(&b.pair));

        result.clusters.push(Cluster {
            record_ids,
            unit_class,
            supporting_edges,
            split_from_incoherent: was_split,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedFeatures, RawProductRecord, ReviewKind, ScoreMethod};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn record(id: &str, unit_class: Option<UnitClass>) -> NormalizedRecord {
        NormalizedRecord {
            record: RawProductRecord::new(id, "e1", id),
            features: NormalizedFeatures {
                tokens: vec![id.to_string()],
                normalized_text: id.to_string(),
                quantity: None,
                unit_canonical: None,
                pack_count: None,
                brand_guess: None,
                category_guess: "unknown".to_string(),
            },
            unit_class,
        }
    }

    fn score(a: &str, b: &str, value: f64) -> SimilarityScore {
        SimilarityScore::new(PairKey::new(a, b), BTreeMap::new(), value, ScoreMethod::RuleBased).unwrap()
    }

    fn run(records: &[NormalizedRecord], scores: &[SimilarityScore], config: &DedupConfig) -> ClusteringOutcome {
        let lookup = ScoreLookup::new(scores);
        build_clusters(records, scores, &lookup, config, &Deadline::none(), None).unwrap()
    }

    fn records_named(ids: &[&str]) -> Vec<NormalizedRecord> {
        ids.iter().map(|id| record(id, None)).collect()
    }

    /// Known scores for scored pairs; every other pair costs a recomputation.
    struct CountingSimilarity {
        scores: HashMap<PairKey, f64>,
        recomputed: AtomicUsize,
    }

    impl CountingSimilarity {
        fn new(scores: &[SimilarityScore]) -> Self {
            Self {
                scores: scores.iter().map(|s| (s.pair.clone(), s.combined_score)).collect(),
                recomputed: AtomicUsize::new(0),
            }
        }
    }

    impl PairSimilarity for CountingSimilarity {
        fn similarity(&self, a: &str, b: &str) -> f64 {
            if let Some(known) = self.known_similarity(a, b) {
                return known;
            }
            self.recomputed.fetch_add(1, AtomicOrdering::SeqCst);
            0.9
        }

        fn known_similarity(&self, a: &str, b: &str) -> Option<f64> {
            if a == b {
                return Some(1.0);
            }
            self.scores.get(&PairKey::new(a, b)).copied()
        }
    }

    fn member_sets(outcome: &ClusteringOutcome) -> Vec<Vec<&str>> {
        outcome
            .clusters
            .iter()
            .map(|c| c.record_ids.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn test_chained_cluster_is_split_at_coherence_floor() {
        let records = vec![record("A", None), record("B", None), record("C", None)];
        let scores = vec![score("A", "B", 0.85), score("B", "C", 0.85), score("A", "C", 0.3)];
        let outcome = run(&records, &scores, &DedupConfig::default());

        assert_eq!(member_sets(&outcome), vec![vec!["A", "B"], vec!["C"]]);
        assert_eq!(outcome.coherence_splits, 1);
        assert_eq!(outcome.review_items.len(), 1);
        assert_eq!(outcome.review_items[0].kind, ReviewKind::CoherenceSplit);
        assert!(outcome.clusters.iter().all(|c| c.split_from_incoherent));
        assert_eq!(outcome.clusters[0].supporting_edges.len(), 1);
        assert_eq!(outcome.clusters[0].supporting_edges[0].score, 0.85);
    }

    #[test]
    fn test_missing_internal_pair_is_recomputed_or_zero() {
        // A–C was never scored; the lookup treats it as 0.0 and the chain splits.
        let records = vec![record("A", None), record("B", None), record("C", None)];
        let scores = vec![score("A", "B", 0.9), score("B", "C", 0.85)];
        let outcome = run(&records, &scores, &DedupConfig::default());
        assert_eq!(member_sets(&outcome), vec![vec!["A", "B"], vec!["C"]]);
    }

    #[test]
    fn test_incompatible_unit_classes_are_never_merged() {
        let records = vec![
            record("a", Some(UnitClass::Weight)),
            record("b", None),
            record("c", Some(UnitClass::Count)),
        ];
        let scores = vec![score("a", "b", 0.95), score("b", "c", 0.9), score("a", "c", 0.9)];
        let outcome = run(&records, &scores, &DedupConfig::default());

        assert_eq!(member_sets(&outcome), vec![vec!["a", "b"], vec!["c"]]);
        assert_eq!(outcome.rejected_merges, 2);
        assert!(outcome
            .review_items
            .iter()
            .all(|r| r.kind == ReviewKind::UnitIncompatibility));
        assert_eq!(outcome.clusters[0].unit_class, Some(UnitClass::Weight));
    }

    #[test]
    fn test_records_without_edges_become_singletons() {
        let records = vec![record("x", None), record("y", None), record("z", None)];
        let scores = vec![score("x", "y", 0.5)];
        let outcome = run(&records, &scores, &DedupConfig::default());
        assert_eq!(member_sets(&outcome), vec![vec!["x"], vec!["y"], vec!["z"]]);
        assert_eq!(outcome.partitions, 3);
    }

    /// Every cluster at the higher threshold sits inside one cluster at the lower.
    fn assert_refines(finer: &ClusteringOutcome, coarser: &ClusteringOutcome, threshold: f64) {
        for cluster in &finer.clusters {
            assert!(
                coarser
                    .clusters
                    .iter()
                    .any(|c| cluster.record_ids.iter().all(|id| c.record_ids.contains(id))),
                "cluster {:?} at threshold {} is not nested in a lower-threshold cluster",
                cluster.record_ids,
                threshold
            );
        }
    }

    #[test]
    fn test_raising_threshold_only_refines_clusters() {
        let ids = ["a", "b", "c", "d", "e", "f"];
        let records = records_named(&ids);
        let values = [0.95, 0.82, 0.88, 0.79, 0.91, 0.84, 0.65, 0.86, 0.9, 0.7, 0.81, 0.87, 0.93, 0.6, 0.83];
        let mut scores = Vec::new();
        let mut v = values.iter();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                scores.push(score(ids[i], ids[j], *v.next().unwrap()));
            }
        }

        for floor in [0.0, 0.6, 0.75, 0.85] {
            let mut previous: Option<ClusteringOutcome> = None;
            for threshold in [0.6, 0.7, 0.8, 0.85, 0.9, 0.95, 1.0] {
                let mut config = DedupConfig::default();
                config.threshold = threshold;
                config.coherence_floor = floor;
                let outcome = run(&records, &scores, &config);
                if let Some(prev) = &previous {
                    assert_refines(&outcome, prev, threshold);
                }
                previous = Some(outcome);
            }
        }
    }

    #[test]
    fn test_split_keeps_nesting_across_thresholds() {
        let records = records_named(&["A", "B", "C", "D"]);
        let scores = vec![
            score("A", "B", 0.9),
            score("B", "C", 0.9),
            score("A", "C", 0.65),
            score("B", "D", 0.84),
            score("C", "D", 0.84),
            score("A", "D", 0.1),
        ];
        let mut low = DedupConfig::default();
        low.threshold = 0.8;
        let mut high = low.clone();
        high.threshold = 0.85;

        let at_low = run(&records, &scores, &low);
        let at_high = run(&records, &scores, &high);
        // D joined last, so the split at 0.8 undoes exactly that union
        assert_eq!(member_sets(&at_low), vec![vec!["A", "B", "C"], vec!["D"]]);
        assert_eq!(at_low.coherence_splits, 1);
        assert!(at_low.review_items[0].message.ends_with("[D]"));
        assert_eq!(
            at_low.review_items[0].record_ids,
            vec!["A", "B", "C", "D"].into_iter().map(String::from).collect::<Vec<_>>()
        );
        assert_eq!(member_sets(&at_high), vec![vec!["A", "B", "C"], vec!["D"]]);
        assert_eq!(at_high.coherence_splits, 0);
        assert_refines(&at_high, &at_low, 0.85);
    }

    #[test]
    fn test_coherent_component_needs_no_recomputation() {
        let records = records_named(&["A", "B", "C"]);
        let scores = vec![score("A", "B", 0.9), score("B", "C", 0.85), score("A", "C", 0.7)];
        let lookup = CountingSimilarity::new(&scores);
        let outcome = build_clusters(
            &records,
            &scores,
            &lookup,
            &DedupConfig::default(),
            &Deadline::none(),
            None,
        )
        .unwrap();
        assert_eq!(member_sets(&outcome), vec![vec!["A", "B", "C"]]);
        assert_eq!(lookup.recomputed.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_unscored_pairs_are_computed_once_and_only_to_split() {
        let records = records_named(&["A", "B", "C", "D"]);
        // A-D and B-D were never scored
        let scores = vec![
            score("A", "B", 0.9),
            score("B", "C", 0.88),
            score("C", "D", 0.86),
            score("A", "C", 0.3),
        ];
        let lookup = CountingSimilarity::new(&scores);
        let outcome = build_clusters(
            &records,
            &scores,
            &lookup,
            &DedupConfig::default(),
            &Deadline::none(),
            None,
        )
        .unwrap();
        assert_eq!(member_sets(&outcome), vec![vec!["A", "B"], vec!["C"], vec!["D"]]);
        assert_eq!(outcome.coherence_splits, 2);
        assert_eq!(lookup.recomputed.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn test_expired_deadline_abandons_clustering() {
        let records = records_named(&["A", "B"]);
        let scores = vec![score("A", "B", 0.9)];
        let lookup = ScoreLookup::new(&scores);
        let expired = Deadline::at(std::time::Instant::now());
        let err = build_clusters(&records, &scores, &lookup, &DedupConfig::default(), &expired, None)
            .unwrap_err();
        assert!(matches!(err, DedupError::DeadlineExceeded { .. }));
    }

    #[test]
    fn test_result_is_independent_of_input_order() {
        let records = vec![record("A", None), record("B", None), record("C", None), record("D", None)];
        let scores = vec![
            score("A", "B", 0.9),
            score("C", "D", 0.9),
            score("B", "C", 0.9),
            score("A", "D", 0.2),
            score("A", "C", 0.7),
            score("B", "D", 0.7),
        ];
        let forward = run(&records, &scores, &DedupConfig::default());

        let mut reversed_records = records.clone();
        reversed_records.reverse();
        let mut reversed_scores = scores.clone();
        reversed_scores.reverse();
        let backward = run(&reversed_records, &reversed_scores, &DedupConfig::default());

        assert_eq!(forward.clusters, backward.clusters);
        assert_eq!(forward.review_items, backward.review_items);
    }
}
