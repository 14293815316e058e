//! Pass Graph
//!
//! `PassGraph` owns the registered passes and keeps their execution order.
//! The order is recomputed eagerly on every register / unregister.
//!
//! # Ordering
//!
//! Edges are derived from each pass's relations:
//!
//! - `before: [B]` on pass `A` gives `A → B`
//! - `after: [B]` on pass `A` gives `B → A`
//! - names that are not registered produce no edge
//!
//! The sort is Kahn's algorithm with the ready set ordered by registration
//! index, so passes without a constraint between them keep registration
//! order and the result is fully deterministic.
//!
//! # Failure Modes
//!
//! | Error | Raised by | Effect |
//! |-------|-----------|--------|
//! | `CyclicDependency` | `register` | the offending pass is not added |
//! | `MissingDependency` | `resolve_order` | pipeline cannot render until fixed |
//! | `DuplicatePass` | `register` | the pass is not added |
//!
//! `required` names are existence checks, not edges. They are evaluated at
//! resolution time so plugins can be added in any order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use super::pass::PostPass;
use crate::errors::{PipelineError, Result};
use crate::resources::ChangeTracker;

/// Ordered set of passes.
#[derive(Default)]
pub struct PassGraph {
    /// Registration order.
    passes: Vec<Box<dyn PostPass>>,
    /// Indices into `passes`, in execution order.
    order: Vec<usize>,
    version: ChangeTracker,
}

impl PassGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `pass` and recomputes the order.
    ///
    /// Fails without modifying the graph if the name is taken or the new
    /// constraints close a cycle.
    pub fn register(&mut self, pass: Box<dyn PostPass>) -> Result<()> {
        if self.contains(pass.name()) {
            return Err(PipelineError::DuplicatePass(pass.name().to_string()));
        }
        self.passes.push(pass);
        match compute_order(&self.passes) {
            Ok(order) => {
                self.order = order;
                self.version.changed();
                log::debug!("Pass order: {:?}", self.order_names());
                Ok(())
            }
            Err(e) => {
                self.passes.pop();
                Err(e)
            }
        }
    }

    /// Removes the pass named `name` and recomputes the order.
    pub fn unregister(&mut self, name: &str) -> Result<Box<dyn PostPass>> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| PipelineError::UnknownPass(name.to_string()))?;
        let pass = self.passes.remove(idx);
        self.order = compute_order(&self.passes)?;
        self.version.changed();
        log::debug!("Pass order: {:?}", self.order_names());
        Ok(pass)
    }

    /// Checks `required` relations and returns the execution order.
    pub fn resolve_order(&self) -> Result<Vec<&str>> {
        self.validate_required()?;
        Ok(self.order_names())
    }

    /// Execution order as registration indices, after validation.
    pub fn ordered_indices(&self) -> Result<Vec<usize>> {
        self.validate_required()?;
        Ok(self.order.clone())
    }

    fn validate_required(&self) -> Result<()> {
        for pass in &self.passes {
            for missing in &pass.relations().required {
                if !self.contains(missing) {
                    return Err(PipelineError::MissingDependency {
                        pass: pass.name().to_string(),
                        missing: missing.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn order_names(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.passes[i].name()).collect()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.passes.iter().position(|p| p.name() == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn PostPass> {
        self.index_of(name).map(|i| self.passes[i].as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut dyn PostPass> {
        match self.index_of(name) {
            Some(i) => Some(self.passes[i].as_mut()),
            None => None,
        }
    }

    /// Typed access to a registered pass.
    #[must_use]
    pub fn downcast<T: PostPass>(&self, name: &str) -> Option<&T> {
        self.get(name)?.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: PostPass>(&mut self, name: &str) -> Option<&mut T> {
        self.get_mut(name)?.as_any_mut().downcast_mut::<T>()
    }

    /// Pass at registration index `idx`.
    pub fn pass_at_mut(&mut self, idx: usize) -> Option<&mut dyn PostPass> {
        match self.passes.get_mut(idx) {
            Some(p) => Some(p.as_mut()),
            None => None,
        }
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let pass = self
            .get_mut(name)
            .ok_or_else(|| PipelineError::UnknownPass(name.to_string()))?;
        pass.state_mut().enabled = enabled;
        Ok(())
    }

    /// Names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn PostPass>> {
        self.passes.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Bumped whenever the order is recomputed.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.version()
    }
}

impl std::fmt::Debug for PassGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassGraph")
            .field("order", &self.order_names())
            .finish_non_exhaustive()
    }
}

/// Stable topological sort over registration indices.
fn compute_order(passes: &[Box<dyn PostPass>]) -> Result<Vec<usize>> {
    let n = passes.len();
    let index: FxHashMap<&str, usize> = passes
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name(), i))
        .collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    let mut add_edge = |from: usize, to: usize| {
        if !successors[from].contains(&to) {
            successors[from].push(to);
            in_degree[to] += 1;
        }
    };

    for (i, pass) in passes.iter().enumerate() {
        let relations = pass.relations();
        for name in &relations.before {
            if let Some(&j) = index.get(name.as_str()) {
                add_edge(i, j);
            }
        }
        for name in &relations.after {
            if let Some(&j) = index.get(name.as_str()) {
                add_edge(j, i);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(n);

    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    // Leftover nodes are on a cycle or downstream of one. Peel off the
    // downstream ones: repeatedly drop nodes with no leftover successor.
    let mut stuck: Vec<bool> = (0..n).map(|i| in_degree[i] > 0).collect();
    loop {
        let mut peeled = false;
        for i in 0..n {
            if stuck[i] && !successors[i].iter().any(|&j| stuck[j]) {
                stuck[i] = false;
                peeled = true;
            }
        }
        if !peeled {
            break;
        }
    }

    let passes: Vec<String> = (0..n)
        .filter(|&i| stuck[i])
        .map(|i| passes[i].name().to_string())
        .collect();
    Err(PipelineError::CyclicDependency { passes })
}
