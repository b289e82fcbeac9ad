// src/clustering/union_find.rs
use std::collections::BTreeMap;

use crate::models::UnitClass;

/// Disjoint-set forest over record indices with path compression and union
/// by rank. Each root also carries the unit classes present in its set.
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
    classes: Vec<Vec<UnitClass>>,
}

impl UnionFind {
    pub fn new(classes: Vec<Option<UnitClass>>) -> Self {
        let n = classes.len();
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
            classes: classes.into_iter().map(|c| c.into_iter().collect()).collect(),
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Unit classes present in x's set, sorted.
    pub fn set_classes(&mut self, x: usize) -> &[UnitClass] {
        let root = self.find(x);
        &self.classes[root]
    }

    /// Merges the sets of x and y. Returns false when they were already joined.
    pub fn union(&mut self, x: usize, y: usize) -> bool {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return false;
        }

        let (root, child) = match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => (ry, rx),
            std::cmp::Ordering::Greater => (rx, ry),
            std::cmp::Ordering::Equal => {
                self.rank[rx] += 1;
                (rx, ry)
            }
        };
        self.parent[child] = root;
        let moved = std::mem::take(&mut self.classes[child]);
        let merged = &mut self.classes[root];
        merged.extend(moved);
        merged.sort();
        merged.dedup();
        true
    }

    /// Members of every set, each sorted, keyed by smallest member.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut components: Vec<Vec<usize>> = by_root.into_values().collect();
        components.sort_by_key(|members| members[0]);
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_and_components() {
        let mut uf = UnionFind::new(vec![None; 5]);
        assert!(uf.union(0, 1));
        assert!(uf.union(3, 4));
        assert!(!uf.union(1, 0));
        assert!(uf.union(1, 4));
        assert_eq!(uf.components(), vec![vec![0, 1, 3, 4], vec![2]]);
    }

    #[test]
    fn test_classes_follow_the_root() {
        let mut uf = UnionFind::new(vec![
            Some(UnitClass::Weight),
            None,
            Some(UnitClass::Count),
        ]);
        assert!(uf.set_classes(1).is_empty());
        uf.union(1, 0);
        assert_eq!(uf.set_classes(1), &[UnitClass::Weight]);
        uf.union(2, 1);
        assert_eq!(uf.set_classes(0), &[UnitClass::Weight, UnitClass::Count]);
    }

    #[test]
    fn test_long_chains_do_not_recurse() {
        let n = 100_000;
        let mut uf = UnionFind::new(vec![None; n]);
        for i in 1..n {
            uf.union(i - 1, i);
        }
        assert_eq!(uf.find(n - 1), uf.find(0));
    }
}
