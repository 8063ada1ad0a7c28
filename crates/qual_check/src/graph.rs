//! Directed graph over atoms, one instance per constraint coloring.
//!
//! Nodes are interned into a dense arena so adjacency can live in sorted
//! index vectors and breadth-first search can use a plain visited bitset —
//! atoms reference each other by index, so the cyclic constraint structure
//! never turns into cyclic ownership.

use std::collections::VecDeque;

use qual_ty::Atom;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct ConstraintGraph {
    index_of: FxHashMap<Atom, u32>,
    nodes: Vec<Atom>,
    succs: Vec<Vec<u32>>,
    preds: Vec<Vec<u32>>,
}

impl ConstraintGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, atom: Atom) -> u32 {
        if let Some(&ix) = self.index_of.get(&atom) {
            return ix;
        }
        let ix = self.nodes.len() as u32;
        self.index_of.insert(atom, ix);
        self.nodes.push(atom);
        self.succs.push(Vec::new());
        self.preds.push(Vec::new());
        ix
    }

    /// Add `src → dst`. Edges run from the lower lattice element toward the
    /// higher one, so wildness flows along edge direction.
    pub fn add_edge(&mut self, src: Atom, dst: Atom) {
        let s = self.intern(src);
        let d = self.intern(dst);
        insert_sorted(&mut self.succs[s as usize], d);
        insert_sorted(&mut self.preds[d as usize], s);
    }

    pub fn contains(&self, atom: Atom) -> bool {
        self.index_of.contains_key(&atom)
    }

    pub fn successors(&self, atom: Atom) -> Vec<Atom> {
        self.neighbors(atom, &self.succs)
    }

    pub fn predecessors(&self, atom: Atom) -> Vec<Atom> {
        self.neighbors(atom, &self.preds)
    }

    fn neighbors(&self, atom: Atom, adj: &[Vec<u32>]) -> Vec<Atom> {
        match self.index_of.get(&atom) {
            None => Vec::new(),
            Some(&ix) => adj[ix as usize]
                .iter()
                .map(|&n| self.nodes[n as usize])
                .collect(),
        }
    }

    /// Breadth-first walk along successor edges, visiting `start` first.
    /// Each node is visited at most once.
    pub fn visit_breadth_first(&self, start: Atom, mut visit: impl FnMut(Atom)) {
        let Some(&start_ix) = self.index_of.get(&start) else {
            return;
        };
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        seen[start_ix as usize] = true;
        queue.push_back(start_ix);
        while let Some(ix) = queue.pop_front() {
            visit(self.nodes[ix as usize]);
            for &next in &self.succs[ix as usize] {
                if !seen[next as usize] {
                    seen[next as usize] = true;
                    queue.push_back(next);
                }
            }
        }
    }
}

fn insert_sorted(v: &mut Vec<u32>, value: u32) {
    if let Err(pos) = v.binary_search(&value) {
        v.insert(pos, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qual_ty::VarKey;

    fn var(n: u32) -> Atom {
        Atom::Var(VarKey(n))
    }

    #[test]
    fn edges_are_deduplicated() {
        let mut g = ConstraintGraph::new();
        g.add_edge(var(0), var(1));
        g.add_edge(var(0), var(1));
        assert_eq!(g.successors(var(0)), vec![var(1)]);
        assert_eq!(g.predecessors(var(1)), vec![var(0)]);
    }

    #[test]
    fn unknown_atom_has_no_neighbors() {
        let g = ConstraintGraph::new();
        assert!(g.successors(var(9)).is_empty());
        assert!(!g.contains(var(9)));
    }

    #[test]
    fn bfs_visits_reachable_once_including_start() {
        let mut g = ConstraintGraph::new();
        // Diamond with a cycle back to the start.
        g.add_edge(var(0), var(1));
        g.add_edge(var(0), var(2));
        g.add_edge(var(1), var(3));
        g.add_edge(var(2), var(3));
        g.add_edge(var(3), var(0));

        let mut visited = Vec::new();
        g.visit_breadth_first(var(0), |a| visited.push(a));
        assert_eq!(visited.len(), 4);
        assert_eq!(visited[0], var(0));
        assert!(visited.contains(&var(3)));
    }

    #[test]
    fn bfs_does_not_cross_edge_direction() {
        let mut g = ConstraintGraph::new();
        g.add_edge(var(0), var(1));
        let mut visited = Vec::new();
        g.visit_breadth_first(var(1), |a| visited.push(a));
        assert_eq!(visited, vec![var(1)]);
    }

    #[test]
    fn const_atoms_are_ordinary_nodes() {
        let mut g = ConstraintGraph::new();
        g.add_edge(Atom::WILD, var(4));
        assert_eq!(g.successors(Atom::WILD), vec![var(4)]);
    }
}
