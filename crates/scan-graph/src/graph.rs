//! Graph model: nodes, edges and the per-unit container.
//!
//! A [`Graph`] is an arena of [`Node`]s addressed by dense [`NodeId`]s.
//! Control flow is stored as successor lists between control nodes, data flow
//! as ordered input lists on consumers. Usages (the reverse of data inputs)
//! are computed once when the builder finishes.

use invariant_scan_types::{FieldRef, IntCondition, MethodRef};
use smallvec::SmallVec;

use crate::stamp::Stamp;

/// Stable identity of a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Literal value of a [`NodeKind::Constant`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Null,
    Int(i64),
    String(String),
}

/// Operation performed by a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    // Control
    Start,
    /// First node of a branch successor.
    Begin,
    /// Jump into a merge.
    End,
    /// Join point; its control predecessors are `End` nodes.
    Merge,
    /// Two-way branch on its single input; successors are `[true, false]`.
    If,
    Return,
    Unwind,
    MonitorEnter,
    MonitorExit,

    // Values
    Parameter { index: u16 },
    Constant(ConstValue),
    LoadStatic(FieldRef),
    New { ty: String },
    /// Call; both a control node and the producer of the call result.
    Invoke(MethodRef),
    Add,
    /// Reference identity comparison of its two inputs.
    ObjectEquals,
    IsNull,
    IntCompare(IntCondition),
    /// Value selected by the predecessor a merge was entered through.
    Phi { merge: NodeId },
}

/// One operation in a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    /// Data inputs, in operand order.
    pub inputs: SmallVec<[NodeId; 2]>,
    /// Control successors, in branch order.
    pub successors: SmallVec<[NodeId; 2]>,
    /// Control predecessors, in connection order.
    pub predecessors: SmallVec<[NodeId; 2]>,
    /// Consumers of this node's value.
    pub usages: Vec<NodeId>,
    pub stamp: Stamp,
    /// Index of the body operation the node was created for.
    pub position: Option<usize>,
}

impl Node {
    fn new(kind: NodeKind, stamp: Stamp, position: Option<usize>) -> Self {
        Self {
            kind,
            inputs: SmallVec::new(),
            successors: SmallVec::new(),
            predecessors: SmallVec::new(),
            usages: Vec::new(),
            stamp,
            position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Successor ordering between two control nodes.
    Control,
    /// Producer to consumer; `index` is the consumer's input slot.
    Data { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

/// Intermediate representation of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    unit: String,
    nodes: Vec<Node>,
}

impl Graph {
    pub(crate) fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            nodes: Vec::new(),
        }
    }

    /// Qualified name of the unit the graph was built from.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The entry node. Every built graph has one at index 0.
    pub fn start(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn stamp(&self, id: NodeId) -> &Stamp {
        &self.nodes[id.index()].stamp
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    /// Nodes whose kind satisfies `pred`, in creation order.
    pub fn nodes_where<'a>(
        &'a self,
        pred: impl Fn(&NodeKind) -> bool + 'a,
    ) -> impl Iterator<Item = (NodeId, &'a Node)> + 'a {
        self.nodes().filter(move |(_, n)| pred(&n.kind))
    }

    /// Every control and data edge, grouped by consumer in node order.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for (id, node) in self.nodes() {
            for (index, &input) in node.inputs.iter().enumerate() {
                edges.push(Edge {
                    from: input,
                    to: id,
                    kind: EdgeKind::Data { index },
                });
            }
            for &succ in &node.successors {
                edges.push(Edge {
                    from: id,
                    to: succ,
                    kind: EdgeKind::Control,
                });
            }
        }
        edges
    }

    pub fn is_null_constant(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Constant(ConstValue::Null))
    }

    pub fn is_constant(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Constant(_))
    }

    pub(crate) fn add(&mut self, kind: NodeKind, stamp: Stamp, position: Option<usize>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind, stamp, position));
        id
    }

    pub(crate) fn push_input(&mut self, consumer: NodeId, producer: NodeId) {
        self.nodes[consumer.index()].inputs.push(producer);
    }

    pub(crate) fn link(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.index()].successors.push(to);
        self.nodes[to.index()].predecessors.push(from);
    }

    pub(crate) fn set_stamp(&mut self, id: NodeId, stamp: Stamp) {
        self.nodes[id.index()].stamp = stamp;
    }

    pub(crate) fn compute_usages(&mut self) {
        for node in &mut self.nodes {
            node.usages.clear();
        }
        for i in 0..self.nodes.len() {
            let inputs = self.nodes[i].inputs.clone();
            for input in inputs {
                self.nodes[input.index()].usages.push(NodeId(i as u32));
            }
        }
    }
}
