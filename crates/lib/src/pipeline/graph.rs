//! Step graph for pipeline planning.
//!
//! Steps form a fixed DAG whose edges follow data dependencies. A request
//! names target steps; the graph keeps only their transitive dependencies
//! and groups them into waves that can run concurrently.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Serialize, Serializer};

use crate::check::CheckKind;

use super::PipelineError;

/// One unit of pipeline work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
  /// Capture the source snapshot and derive the build configuration.
  Snapshot,
  DependencyCache,
  Check(CheckKind),
  Package,
  Version,
  Docs,
  Archive,
}

impl Step {
  /// Steps whose outputs this step consumes.
  pub fn dependencies(&self) -> Vec<Step> {
    match self {
      Step::Snapshot | Step::Version => Vec::new(),
      Step::DependencyCache => vec![Step::Snapshot],
      Step::Check(_) | Step::Package | Step::Docs => vec![Step::DependencyCache],
      Step::Archive => vec![Step::Docs, Step::Version],
    }
  }
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Step::Snapshot => write!(f, "snapshot"),
      Step::DependencyCache => write!(f, "dependency-cache"),
      Step::Check(kind) => write!(f, "check:{}", kind),
      Step::Package => write!(f, "package"),
      Step::Version => write!(f, "version"),
      Step::Docs => write!(f, "docs"),
      Step::Archive => write!(f, "archive"),
    }
  }
}

impl Serialize for Step {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl FromStr for Step {
  type Err = PipelineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if let Some(check) = s.strip_prefix("check:") {
      return check
        .parse()
        .map(Step::Check)
        .map_err(|_| PipelineError::UnknownStep(s.to_string()));
    }
    match s {
      "snapshot" => Ok(Step::Snapshot),
      "dependency-cache" => Ok(Step::DependencyCache),
      "package" => Ok(Step::Package),
      "version" => Ok(Step::Version),
      "docs" => Ok(Step::Docs),
      "archive" => Ok(Step::Archive),
      _ => Err(PipelineError::UnknownStep(s.to_string())),
    }
  }
}

/// The planned steps of one pipeline run.
pub struct StepGraph {
  graph: DiGraph<Step, ()>,
  nodes: HashMap<Step, NodeIndex>,
}

impl StepGraph {
  /// Plan `targets` and everything they transitively depend on.
  pub fn for_targets(targets: &[Step]) -> Result<Self, PipelineError> {
    let mut needed = BTreeSet::new();
    let mut stack: Vec<Step> = targets.to_vec();
    while let Some(step) = stack.pop() {
      if needed.insert(step) {
        stack.extend(step.dependencies());
      }
    }

    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    for step in &needed {
      nodes.insert(*step, graph.add_node(*step));
    }
    for step in &needed {
      for dep in step.dependencies() {
        // Edge from dependency to dependent
        graph.add_edge(nodes[&dep], nodes[step], ());
      }
    }

    let dag = Self { graph, nodes };
    toposort(&dag.graph, None).map_err(|_| PipelineError::CycleDetected)?;
    Ok(dag)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, step: Step) -> bool {
    self.nodes.contains_key(&step)
  }

  /// Direct dependencies of `step` within the plan.
  pub fn dependencies(&self, step: Step) -> Vec<Step> {
    let Some(&idx) = self.nodes.get(&step) else {
      return Vec::new();
    };
    let mut deps: Vec<Step> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep| self.graph[dep])
      .collect();
    deps.sort();
    deps
  }

  /// Steps grouped into waves; every step's dependencies are in earlier
  /// waves. Steps within a wave are sorted.
  pub fn waves(&self) -> Result<Vec<Vec<Step>>, PipelineError> {
    // Kahn's algorithm, one level at a time
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|idx| in_degree[*idx] == 0).copied().collect();
      if ready.is_empty() {
        return Err(PipelineError::CycleDetected);
      }

      for idx in &ready {
        remaining.remove(idx);
        for dependent in self.graph.neighbors_directed(*idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&dependent) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      let mut wave: Vec<Step> = ready.into_iter().map(|idx| self.graph[idx]).collect();
      wave.sort();
      waves.push(wave);
    }

    Ok(waves)
  }
}
