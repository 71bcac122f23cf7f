//! Dependency graph between named cells.
//!
//! An edge `(s, t)` means `t` depends on `s`: `t`'s formula references `s`,
//! so `s` must be evaluated first. Both directions are indexed so that
//! dependents and dependees are available without scanning the graph.

use indexmap::{IndexMap, IndexSet};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DependencyGraph {
    /// s -> every t with an edge (s, t)
    dependents: IndexMap<String, IndexSet<String>>,
    /// t -> every s with an edge (s, t)
    dependees: IndexMap<String, IndexSet<String>>,
    size: usize,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    /// Number of edges in the graph
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of cells `s` depends on
    pub fn dependees_len(&self, s: &str) -> usize {
        self.dependees.get(s).map_or(0, IndexSet::len)
    }

    pub fn has_dependents(&self, s: &str) -> bool {
        self.dependents.get(s).is_some_and(|set| !set.is_empty())
    }

    pub fn has_dependees(&self, s: &str) -> bool {
        self.dependees.get(s).is_some_and(|set| !set.is_empty())
    }

    /// Cells that depend directly on `s`, in insertion order
    pub fn dependents(&self, s: &str) -> impl Iterator<Item = &str> + '_ {
        self.dependents
            .get(s)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Cells `s` depends on directly, in insertion order
    pub fn dependees(&self, s: &str) -> impl Iterator<Item = &str> + '_ {
        self.dependees
            .get(s)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn add_edge(&mut self, s: &str, t: &str) {
        let inserted = self
            .dependents
            .entry(s.to_string())
            .or_default()
            .insert(t.to_string());
        if inserted {
            self.dependees
                .entry(t.to_string())
                .or_default()
                .insert(s.to_string());
            self.size += 1;
        }
    }

    pub fn remove_edge(&mut self, s: &str, t: &str) {
        let removed = match self.dependents.get_mut(s) {
            Some(set) => set.shift_remove(t),
            None => false,
        };
        if !removed {
            return;
        }
        if let Some(set) = self.dependees.get_mut(t) {
            set.shift_remove(s);
        }
        self.size -= 1;
        prune(&mut self.dependents, s);
        prune(&mut self.dependees, t);
    }

    /// Removes every edge `(s, r)` and adds `(s, t)` for each `t` in `new_dependents`.
    pub fn replace_dependents<I, S>(&mut self, s: &str, new_dependents: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let old: Vec<String> = self.dependents(s).map(str::to_string).collect();
        for r in &old {
            self.remove_edge(s, r);
        }
        for t in new_dependents {
            self.add_edge(s, t.as_ref());
        }
    }

    /// Removes every edge `(r, s)` and adds `(t, s)` for each `t` in `new_dependees`.
    pub fn replace_dependees<I, S>(&mut self, s: &str, new_dependees: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let old: Vec<String> = self.dependees(s).map(str::to_string).collect();
        for r in &old {
            self.remove_edge(r, s);
        }
        for t in new_dependees {
            self.add_edge(t.as_ref(), s);
        }
    }
}

// Empty adjacency sets are dropped so that an emptied graph compares equal to a fresh one.
fn prune(index: &mut IndexMap<String, IndexSet<String>>, key: &str) {
    if index.get(key).is_some_and(IndexSet::is_empty) {
        index.shift_remove(key);
    }
}
