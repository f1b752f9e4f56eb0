use crate::registry::{NodeConfig, NodeRegistry};
use pantrycore::{Capability, Flow, FlowError, FlowId, GraphError, NodeId, NodeKind};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Label on an edge leaving a condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    True,
    False,
}

impl Branch {
    fn parse(handle: &str) -> Option<Self> {
        match handle {
            "true" => Some(Branch::True),
            "false" => Some(Branch::False),
            _ => None,
        }
    }
}

impl From<bool> for Branch {
    fn from(b: bool) -> Self {
        if b {
            Branch::True
        } else {
            Branch::False
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Branch::True => "true",
            Branch::False => "false",
        })
    }
}

/// A node whose kind and config have been resolved.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub config: NodeConfig,
}

impl GraphNode {
    pub fn capability(&self) -> Capability {
        self.kind.capability()
    }
}

#[derive(Debug, Clone, Copy)]
struct EdgeWeight {
    order: usize,
    handle: Option<Branch>,
}

/// A flow that passed structural and config validation.
#[derive(Debug)]
pub struct ValidatedGraph {
    flow_id: FlowId,
    nodes: Vec<GraphNode>,
    index: HashMap<NodeId, NodeIndex>,
    graph: DiGraph<usize, EdgeWeight>,
}

impl ValidatedGraph {
    /// Validate a flow. Pure: reads the flow and the registry only.
    ///
    /// Node kinds are resolved first, then the graph checks run in order:
    /// unique ids, edge endpoints, acyclicity, branch arity. Trigger in-degree
    /// and out-degree limits follow, then every node must be reachable from at
    /// most one trigger. Node configs are checked last.
    pub fn validate(flow: &Flow, registry: &NodeRegistry) -> Result<Self, FlowError> {
        let kinds = flow
            .nodes
            .iter()
            .map(|n| registry.resolve_kind(&n.id, &n.node_type))
            .collect::<Result<Vec<_>, _>>()?;

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for (pos, node) in flow.nodes.iter().enumerate() {
            let idx = graph.add_node(pos);
            if index.insert(node.id.clone(), idx).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()).into());
            }
        }

        let mut handles = Vec::with_capacity(flow.edges.len());
        for edge in &flow.edges {
            let source = *index.get(&edge.source).ok_or_else(|| GraphError::DanglingEdge {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
            })?;
            let target = *index.get(&edge.target).ok_or_else(|| GraphError::DanglingEdge {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
            })?;
            handles.push((source, target, edge));
        }

        for (order, (source, target, _)) in handles.iter().enumerate() {
            graph.add_edge(*source, *target, EdgeWeight { order, handle: None });
        }

        if let Err(cycle) = toposort(&graph, None) {
            let pos = graph[cycle.node_id()];
            return Err(GraphError::Cycle(flow.nodes[pos].id.clone()).into());
        }

        // Branch labels.
        let edge_ids: Vec<_> = graph.edge_indices().collect();
        for (edge_idx, (source, _, edge)) in edge_ids.into_iter().zip(handles.iter()) {
            let pos = graph[*source];
            let node_id = &flow.nodes[pos].id;
            let handle = edge.source_handle.as_deref().filter(|h| !h.is_empty());

            let branch = match (kinds[pos].capability(), handle) {
                (Capability::Condition, Some(h)) => {
                    Some(Branch::parse(h).ok_or_else(|| GraphError::BranchArity {
                        node_id: node_id.clone(),
                        reason: format!("edge {} has handle '{}', expected true or false", edge.id, h),
                    })?)
                }
                (Capability::Condition, None) => {
                    return Err(GraphError::BranchArity {
                        node_id: node_id.clone(),
                        reason: format!("edge {} has no branch handle", edge.id),
                    }
                    .into())
                }
                (_, Some(h)) => {
                    return Err(GraphError::BranchArity {
                        node_id: node_id.clone(),
                        reason: format!("edge {} carries handle '{}' but source is not a condition", edge.id, h),
                    }
                    .into())
                }
                (_, None) => None,
            };
            graph[edge_idx].handle = branch;
        }

        for (pos, node) in flow.nodes.iter().enumerate() {
            let idx = index[&node.id];
            let capability = kinds[pos].capability();

            if capability == Capability::Condition {
                for branch in [Branch::True, Branch::False] {
                    let count = graph
                        .edges_directed(idx, Direction::Outgoing)
                        .filter(|e| e.weight().handle == Some(branch))
                        .count();
                    if count != 1 {
                        return Err(GraphError::BranchArity {
                            node_id: node.id.clone(),
                            reason: format!("expected exactly one '{}' edge, found {}", branch, count),
                        }
                        .into());
                    }
                }
            }

            if capability == Capability::Trigger
                && graph.edges_directed(idx, Direction::Incoming).next().is_some()
            {
                return Err(GraphError::TriggerHasIncoming(node.id.clone()).into());
            }

            if let Some(max) = capability.max_out_degree() {
                let found = graph.edges_directed(idx, Direction::Outgoing).count();
                if found > max {
                    return Err(GraphError::OutDegree {
                        node_id: node.id.clone(),
                        max,
                        found,
                    }
                    .into());
                }
            }
        }

        let mut owner: HashMap<NodeIndex, usize> = HashMap::new();
        for (pos, node) in flow.nodes.iter().enumerate() {
            if kinds[pos].capability() != Capability::Trigger {
                continue;
            }
            let mut dfs = Dfs::new(&graph, index[&node.id]);
            while let Some(reached) = dfs.next(&graph) {
                let reached_pos = graph[reached];
                if let Some(first) = owner.insert(reached, pos) {
                    return Err(GraphError::SharedByTriggers {
                        node_id: flow.nodes[reached_pos].id.clone(),
                        first: flow.nodes[first].id.clone(),
                        second: node.id.clone(),
                    }
                    .into());
                }
            }
        }

        let nodes = flow
            .nodes
            .iter()
            .zip(kinds)
            .map(|(spec, kind)| {
                let config = registry.validate_config(&spec.id, kind, &spec.config)?;
                Ok(GraphNode {
                    id: spec.id.clone(),
                    kind,
                    config,
                })
            })
            .collect::<Result<Vec<_>, FlowError>>()?;

        Ok(Self {
            flow_id: flow.id.clone(),
            nodes,
            index,
            graph,
        })
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|idx| &self.nodes[self.graph[*idx]])
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Successors in edge declaration order. With a handle, only edges
    /// carrying that branch label are followed.
    pub fn successors(&self, id: &str, handle: Option<Branch>) -> Vec<&GraphNode> {
        let Some(idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(*idx, Direction::Outgoing)
            .filter(|e| handle.is_none() || e.weight().handle == handle)
            .map(|e| (e.weight().order, e.target()))
            .collect();
        edges.sort_by_key(|(order, _)| *order);
        edges
            .into_iter()
            .map(|(_, target)| &self.nodes[self.graph[target]])
            .collect()
    }

    /// Trigger nodes with no incoming edges, in node declaration order.
    pub fn roots(&self) -> Vec<&GraphNode> {
        let with_incoming: HashSet<_> = self.graph.edge_references().map(|e| e.target()).collect();
        self.nodes
            .iter()
            .filter(|n| n.capability() == Capability::Trigger)
            .filter(|n| !with_incoming.contains(&self.index[&n.id]))
            .collect()
    }
}
