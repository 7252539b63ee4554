//! Dependency graph of computed fields.
//!
//! Every name that takes part in a dependency (a computed field, or a raw
//! field some computed reads) is a node. Edges point from a dependency to
//! its dependent, so the dependents of `x` are everything reachable from
//! `x`. The graph is kept acyclic: a registration whose edges would close a
//! loop fails with [`ProxyError::CircularDependency`] and changes nothing.
//!
//! Invalidation is lazy ([`DependencyGraph::mark_dirty`] only flags nodes
//! stale) and evaluation is pull-based: [`DependencyGraph::evaluate`] makes
//! sure a node's computed dependencies are fresh before running its compute
//! function. Reads a compute function makes by name but never declared are
//! guarded at runtime by the in-progress stack, which turns a re-entered node
//! into a `CircularDependency` as well.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use reflex_core::decode;

use crate::error::ProxyError;

/// A compute function. Reads inputs through the scope it is handed.
pub type ComputeFn = Rc<dyn Fn(&mut ComputeScope<'_>) -> Result<Value, ProxyError>>;

/// Where compute functions read raw field values from.
pub trait FieldSource {
    fn raw_value(&mut self, name: &str) -> Result<Value, ProxyError>;
}

/// Everything needed to register one computed field.
#[derive(Clone)]
pub struct ComputedSpec {
    pub name: String,
    pub dependencies: Vec<String>,
    pub compute: ComputeFn,
}

impl ComputedSpec {
    pub fn new<I, S, F>(name: impl Into<String>, dependencies: I, compute: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&mut ComputeScope<'_>) -> Result<Value, ProxyError> + 'static,
    {
        ComputedSpec {
            name: name.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            compute: Rc::new(compute),
        }
    }
}

impl fmt::Debug for ComputedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedSpec")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// One completed evaluation, drained by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub name: String,
    pub value: Value,
    pub previous: Option<Value>,
    /// False when the recomputed value equals the cached one.
    pub changed: bool,
}

#[derive(Clone)]
struct ComputedField {
    compute: ComputeFn,
    dependencies: Vec<String>,
    reads_own_field: bool,
    cached: Option<Value>,
    stale: bool,
    evaluations: usize,
}

impl fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedField")
            .field("dependencies", &self.dependencies)
            .field("cached", &self.cached)
            .field("stale", &self.stale)
            .field("evaluations", &self.evaluations)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct GraphNode {
    name: String,
    /// `None` for names only ever used as a dependency.
    computed: Option<ComputedField>,
}

/// The computed-field DAG.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<GraphNode, (), u32>,
    nodes: HashMap<String, NodeIndex<u32>>,
    in_progress: Vec<String>,
    evaluations: Vec<Evaluation>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one computed field.
    ///
    /// Dependencies may name fields or computed fields that do not exist
    /// yet. A dependency on the computed's own name reads the raw field it
    /// shadows and adds no edge. The new node starts stale.
    pub fn register(&mut self, spec: ComputedSpec) -> Result<(), ProxyError> {
        self.check(&spec)?;
        self.commit(spec);
        Ok(())
    }

    /// Registers several computed fields atomically: all or none.
    pub fn register_many(
        &mut self,
        specs: impl IntoIterator<Item = ComputedSpec>,
    ) -> Result<(), ProxyError> {
        let mut staged = DependencyGraph {
            graph: self.graph.clone(),
            nodes: self.nodes.clone(),
            in_progress: Vec::new(),
            evaluations: Vec::new(),
        };
        for spec in specs {
            staged.register(spec)?;
        }
        self.graph = staged.graph;
        self.nodes = staged.nodes;
        Ok(())
    }

    fn check(&self, spec: &ComputedSpec) -> Result<(), ProxyError> {
        let Some(&target) = self.nodes.get(&spec.name) else {
            // a brand-new node has no dependents, so no edge into it can close a loop
            return Ok(());
        };
        if self.graph[target].computed.is_some() {
            return Err(ProxyError::DuplicateComputed {
                name: spec.name.clone(),
            });
        }
        for dep in &spec.dependencies {
            if dep == &spec.name {
                continue;
            }
            let Some(&source) = self.nodes.get(dep) else {
                continue;
            };
            if let Some(path) = self.path_between(target, source) {
                let mut cycle = vec![spec.name.clone()];
                cycle.extend(path.iter().rev().map(|&idx| self.graph[idx].name.clone()));
                return Err(ProxyError::CircularDependency { path: cycle });
            }
        }
        Ok(())
    }

    fn commit(&mut self, spec: ComputedSpec) {
        let target = self.ensure_node(&spec.name);
        let mut seen = HashSet::new();
        let mut dependencies = Vec::with_capacity(spec.dependencies.len());
        for dep in spec.dependencies {
            if !seen.insert(dep.clone()) {
                continue;
            }
            if dep != spec.name {
                let source = self.ensure_node(&dep);
                if self.graph.find_edge(source, target).is_none() {
                    self.graph.add_edge(source, target, ());
                }
            }
            dependencies.push(dep);
        }
        let reads_own_field = dependencies.contains(&spec.name);
        trace!(name = %spec.name, ?dependencies, "registered computed field");
        self.graph[target].computed = Some(ComputedField {
            compute: spec.compute,
            dependencies,
            reads_own_field,
            cached: None,
            stale: true,
            evaluations: 0,
        });
    }

    fn ensure_node(&mut self, name: &str) -> NodeIndex<u32> {
        if let Some(&idx) = self.nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode {
            name: name.to_string(),
            computed: None,
        });
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    /// Shortest path `from ~> to` along dependency edges, both ends included.
    fn path_between(&self, from: NodeIndex<u32>, to: NodeIndex<u32>) -> Option<Vec<NodeIndex<u32>>> {
        let mut parents: HashMap<NodeIndex<u32>, NodeIndex<u32>> = HashMap::new();
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(idx) = queue.pop_front() {
            if idx == to {
                let mut path = vec![to];
                let mut current = to;
                while current != from {
                    current = *parents.get(&current)?;
                    path.push(current);
                }
                path.reverse();
                return Some(path);
            }
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if seen.insert(next) {
                    parents.insert(next, idx);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Flags every computed that transitively depends on `name` as stale.
    ///
    /// Returns the names flagged. Nothing is recomputed.
    pub fn mark_dirty(&mut self, name: &str) -> Vec<String> {
        let Some(&start) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut marked = Vec::new();
        if let Some(computed) = self.graph[start].computed.as_mut() {
            if computed.reads_own_field {
                computed.stale = true;
                marked.push(name.to_string());
            }
        }
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            let next: Vec<_> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .collect();
            for dependent in next {
                if !seen.insert(dependent) {
                    continue;
                }
                let node = &mut self.graph[dependent];
                if let Some(computed) = node.computed.as_mut() {
                    computed.stale = true;
                    marked.push(node.name.clone());
                }
                queue.push_back(dependent);
            }
        }
        trace!(field = name, stale = ?marked, "marked dependents stale");
        marked
    }

    /// Returns the computed value of `name`, recomputing it if stale.
    pub fn evaluate(&mut self, name: &str, source: &mut dyn FieldSource) -> Result<Value, ProxyError> {
        let idx = self.computed_index(name)?;
        let (compute, dependencies) = {
            let Some(computed) = self.graph[idx].computed.as_ref() else {
                return Err(not_computed(name));
            };
            if !computed.stale {
                if let Some(value) = &computed.cached {
                    return Ok(value.clone());
                }
            }
            (Rc::clone(&computed.compute), computed.dependencies.clone())
        };

        if let Some(pos) = self.in_progress.iter().position(|n| n == name) {
            let mut path = self.in_progress[pos..].to_vec();
            path.push(name.to_string());
            return Err(ProxyError::CircularDependency { path });
        }

        self.in_progress.push(name.to_string());
        let result = self.run(name, &dependencies, &compute, source);
        self.in_progress.pop();
        let value = result?;

        let Some(computed) = self.graph[idx].computed.as_mut() else {
            return Err(not_computed(name));
        };
        let previous = computed.cached.replace(value.clone());
        computed.stale = false;
        computed.evaluations += 1;
        let changed = previous.as_ref() != Some(&value);
        trace!(name, changed, evaluations = computed.evaluations, "evaluated computed field");
        self.evaluations.push(Evaluation {
            name: name.to_string(),
            value: value.clone(),
            previous,
            changed,
        });
        Ok(value)
    }

    fn run(
        &mut self,
        name: &str,
        dependencies: &[String],
        compute: &ComputeFn,
        source: &mut dyn FieldSource,
    ) -> Result<Value, ProxyError> {
        for dep in dependencies {
            if dep != name && self.is_computed(dep) {
                self.evaluate(dep, source)?;
            }
        }
        let mut scope = ComputeScope {
            graph: self,
            source,
            current: name,
        };
        compute(&mut scope)
    }

    fn computed_index(&self, name: &str) -> Result<NodeIndex<u32>, ProxyError> {
        self.nodes
            .get(name)
            .copied()
            .filter(|&idx| self.graph[idx].computed.is_some())
            .ok_or_else(|| not_computed(name))
    }

    /// Every computed name in dependency order.
    pub fn topological_order(&self) -> Result<Vec<String>, ProxyError> {
        let order = toposort(&self.graph, None).map_err(|cycle| ProxyError::CircularDependency {
            path: vec![self.graph[cycle.node_id()].name.clone()],
        })?;
        Ok(order
            .into_iter()
            .filter(|&idx| self.graph[idx].computed.is_some())
            .map(|idx| self.graph[idx].name.clone())
            .collect())
    }

    /// Stale computed names in dependency order.
    pub fn stale_in_order(&self) -> Result<Vec<String>, ProxyError> {
        Ok(self
            .topological_order()?
            .into_iter()
            .filter(|name| self.is_stale(name))
            .collect())
    }

    /// Hands over the evaluations recorded since the last call.
    pub fn take_evaluations(&mut self) -> Vec<Evaluation> {
        std::mem::take(&mut self.evaluations)
    }

    pub fn is_computed(&self, name: &str) -> bool {
        self.computed(name).is_some()
    }

    pub fn is_stale(&self, name: &str) -> bool {
        self.computed(name).is_some_and(|c| c.stale)
    }

    /// How many times `name` has been recomputed.
    pub fn evaluation_count(&self, name: &str) -> usize {
        self.computed(name).map_or(0, |c| c.evaluations)
    }

    /// Registered computed names.
    pub fn computed_names(&self) -> Vec<String> {
        self.graph
            .node_weights()
            .filter(|n| n.computed.is_some())
            .map(|n| n.name.clone())
            .collect()
    }

    fn computed(&self, name: &str) -> Option<&ComputedField> {
        let idx = self.nodes.get(name)?;
        self.graph[*idx].computed.as_ref()
    }
}

fn not_computed(name: &str) -> ProxyError {
    ProxyError::UnknownField {
        name: name.to_string(),
    }
}

/// Read access handed to a compute function.
///
/// `get` returns the computed value for computed names (evaluating it if
/// needed) and the raw field value otherwise. Inside a computed that shadows
/// a field, its own name reads the raw field.
pub struct ComputeScope<'a> {
    graph: &'a mut DependencyGraph,
    source: &'a mut dyn FieldSource,
    current: &'a str,
}

impl ComputeScope<'_> {
    /// Name of the computed field being evaluated.
    pub fn name(&self) -> &str {
        self.current
    }

    pub fn get(&mut self, name: &str) -> Result<Value, ProxyError> {
        if name != self.current && self.graph.is_computed(name) {
            self.graph.evaluate(name, &mut *self.source)
        } else {
            self.source.raw_value(name)
        }
    }

    pub fn get_as<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, ProxyError> {
        let value = self.get(name)?;
        Ok(decode(name, &value)?)
    }

    /// Reads the raw field even when a computed of that name exists.
    pub fn raw(&mut self, name: &str) -> Result<Value, ProxyError> {
        self.source.raw_value(name)
    }
}
