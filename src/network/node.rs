//! A single neuron: bias, squash, recurrent state, and the connection id
//! lists that tie it into the owning [Network](crate::network::Network)'s
//! arenas.

use crate::{activation::Activation, optimizer::Moments};
use serde::{Deserialize, Serialize};

use super::ConnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Input,
    Hidden,
    Output,
    Constant,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Input => "input",
            NodeKind::Hidden => "hidden",
            NodeKind::Output => "output",
            NodeKind::Constant => "constant",
        }
    }

    pub fn from_name(name: &str) -> Option<NodeKind> {
        match name {
            "input" => Some(NodeKind::Input),
            "hidden" => Some(NodeKind::Hidden),
            "output" => Some(NodeKind::Output),
            "constant" => Some(NodeKind::Constant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub bias: f64,
    pub squash: Activation,
    /// Last computed output value.
    pub activation: f64,
    /// Internal accumulator feeding the squash; `old` is its previous value,
    /// which recurrent self-connections read.
    pub state: f64,
    pub old: f64,
    /// d(activation)/d(state) at the last forward pass.
    pub derivative: f64,
    /// Dropout mask, multiplicative over the activation.
    pub mask: f64,
    pub(crate) incoming: Vec<ConnId>,
    pub(crate) outgoing: Vec<ConnId>,
    /// Connections gated *by* this node.
    pub(crate) gated: Vec<ConnId>,
    /// Absent means no recurrence.
    pub(crate) self_conn: Option<ConnId>,
    pub(crate) responsibility: f64,
    pub(crate) previous_delta_bias: f64,
    pub(crate) total_delta_bias: f64,
    pub(crate) bias_moments: Moments,
    /// Dense topological position, maintained by the owning network.
    pub(crate) index: usize,
}

impl Node {
    pub fn new(kind: NodeKind, squash: Activation) -> Self {
        Self {
            kind,
            bias: 0.,
            squash,
            activation: if kind == NodeKind::Constant { 1. } else { 0. },
            state: 0.,
            old: 0.,
            derivative: 0.,
            mask: 1.,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            gated: Vec::new(),
            self_conn: None,
            responsibility: 0.,
            previous_delta_bias: 0.,
            total_delta_bias: 0.,
            bias_moments: Moments::default(),
            index: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn has_self_conn(&self) -> bool {
        self.self_conn.is_some()
    }

    /// Zero the dynamic state: activations, recurrent accumulators, and
    /// backprop scratch. Structure, bias, and squash are untouched.
    pub(crate) fn reset_state(&mut self) {
        if self.kind != NodeKind::Constant {
            self.activation = 0.;
        }
        self.state = 0.;
        self.old = 0.;
        self.derivative = 0.;
        self.mask = 1.;
        self.responsibility = 0.;
        self.previous_delta_bias = 0.;
        self.total_delta_bias = 0.;
        self.bias_moments.reset();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_constant_nodes_hold_activation() {
        let node = Node::new(NodeKind::Constant, Activation::Identity);
        assert_eq!(node.activation, 1.);
        let mut node = node;
        node.state = 3.;
        node.reset_state();
        assert_eq!(node.activation, 1.);
        assert_eq!(node.state, 0.);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [
            NodeKind::Input,
            NodeKind::Hidden,
            NodeKind::Output,
            NodeKind::Constant,
        ] {
            assert_eq!(NodeKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(NodeKind::from_name("sensor"), None);
    }
}
