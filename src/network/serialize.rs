//! Genome serialization: the normative JSON shape, a compact flat-array
//! round trip, and the standalone source emitter.
//!
//! Loading is lenient per element: an unknown squash name degrades to
//! identity, an out-of-range connection or gater index drops that element,
//! both with a warning. Only a missing `nodes` or `connections` array fails
//! the whole load.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;

use crate::{
    activation::Activation,
    error::{Error, Result},
    random::seed_urandom,
};

use super::{Network, Node, NodeId, NodeKind};

#[derive(Debug, Serialize, Deserialize)]
struct NodeJson {
    bias: f64,
    #[serde(rename = "type")]
    kind: String,
    squash: String,
    #[serde(default = "one")]
    mask: f64,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConnJson {
    from: usize,
    to: usize,
    weight: f64,
    gater: Option<usize>,
    #[serde(default = "yes")]
    enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct SelfConnJson {
    from: usize,
    to: usize,
    weight: f64,
    gater: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GateJson {
    connection: [usize; 2],
    gater: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenomeJson {
    input: usize,
    output: usize,
    #[serde(default)]
    dropout: f64,
    nodes: Option<Vec<NodeJson>>,
    connections: Option<Vec<ConnJson>>,
    #[serde(default)]
    gates: Vec<GateJson>,
    #[serde(default)]
    self_connections: Vec<SelfConnJson>,
}

fn one() -> f64 {
    1.
}

fn yes() -> bool {
    true
}

/// Compact exchange format: parallel flat arrays, positions as indices.
/// The exact layout is an implementation detail; only round-trip fidelity
/// is promised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Serialized {
    pub input: usize,
    pub output: usize,
    pub dropout: f64,
    pub activations: Vec<f64>,
    pub states: Vec<f64>,
    pub biases: Vec<f64>,
    pub squashes: Vec<String>,
    pub kinds: Vec<String>,
    /// `(from, to, weight, gater)`; self-loops have `from == to`.
    pub connections: Vec<(usize, usize, f64, Option<usize>)>,
}

impl Network {
    /// The normative JSON shape.
    pub fn to_json(&self) -> Value {
        let nodes: Vec<NodeJson> = self
            .order
            .iter()
            .map(|id| {
                let node = self.node(*id);
                NodeJson {
                    bias: node.bias,
                    kind: node.kind.name().to_string(),
                    squash: node.squash.name().to_string(),
                    mask: node.mask,
                    index: node.index,
                }
            })
            .collect();
        let connections: Vec<ConnJson> = self
            .conn_order
            .iter()
            .map(|cid| {
                let c = self.conn(*cid);
                ConnJson {
                    from: self.node(c.from).index,
                    to: self.node(c.to).index,
                    weight: c.weight,
                    gater: c.gater.map(|g| self.node(g).index),
                    enabled: c.enabled,
                }
            })
            .collect();
        let self_connections: Vec<SelfConnJson> = self
            .self_order
            .iter()
            .map(|cid| {
                let c = self.conn(*cid);
                SelfConnJson {
                    from: self.node(c.from).index,
                    to: self.node(c.to).index,
                    weight: c.weight,
                    gater: c.gater.map(|g| self.node(g).index),
                }
            })
            .collect();
        let gates: Vec<GateJson> = self
            .gate_order
            .iter()
            .map(|cid| {
                let c = self.conn(*cid);
                GateJson {
                    connection: [self.node(c.from).index, self.node(c.to).index],
                    gater: c.gater.map(|g| self.node(g).index).unwrap_or(0),
                }
            })
            .collect();

        serde_json::to_value(GenomeJson {
            input: self.input,
            output: self.output,
            dropout: self.dropout,
            nodes: Some(nodes),
            connections: Some(connections),
            gates,
            self_connections,
        })
        .expect("genome shape is always serializable")
    }

    /// Rebuild a genome from [Network::to_json] output. Fails only when the
    /// `nodes` or `connections` array is missing; every other defect is
    /// recovered per element.
    pub fn from_json(value: &Value) -> Result<Network> {
        let parsed: GenomeJson = serde_json::from_value(value.clone())
            .map_err(|e| Error::MalformedGenome(e.to_string()))?;
        let nodes = parsed
            .nodes
            .ok_or_else(|| Error::MalformedGenome("missing nodes".into()))?;
        let connections = parsed
            .connections
            .ok_or_else(|| Error::MalformedGenome("missing connections".into()))?;

        let mut net = Network::empty(0, 0, seed_urandom().unwrap_or(1));
        net.input = parsed.input.min(nodes.len());
        net.output = parsed
            .output
            .min(nodes.len().saturating_sub(parsed.input.min(nodes.len())));
        net.dropout = parsed.dropout;

        for entry in &nodes {
            let kind = NodeKind::from_name(&entry.kind).unwrap_or_else(|| {
                tracing::warn!(kind = %entry.kind, "unknown node type, treating as hidden");
                NodeKind::Hidden
            });
            let mut node = Node::new(kind, Activation::from_name_lossy(&entry.squash));
            node.bias = entry.bias;
            node.mask = entry.mask;
            let id = net.alloc_node(node);
            net.order.push(id);
        }
        net.reindex();

        let resolve = |net: &Network, idx: usize| -> Option<NodeId> {
            net.order.get(idx).copied()
        };

        for entry in &connections {
            let (Some(from), Some(to)) = (resolve(&net, entry.from), resolve(&net, entry.to)) else {
                tracing::warn!(from = entry.from, to = entry.to, "connection index out of range, skipping");
                continue;
            };
            let cid = net.connect(from, to, Some(entry.weight));
            net.conn_mut(cid).enabled = entry.enabled;
            if let Some(g) = entry.gater {
                match resolve(&net, g) {
                    Some(gater) => net.gate(gater, cid),
                    None => {
                        tracing::warn!(gater = g, "gater index out of range, leaving ungated")
                    }
                }
            }
        }

        for entry in &parsed.self_connections {
            if entry.from != entry.to {
                tracing::warn!(from = entry.from, to = entry.to, "self-connection endpoints differ, skipping");
                continue;
            }
            let Some(id) = resolve(&net, entry.from) else {
                tracing::warn!(from = entry.from, "self-connection index out of range, skipping");
                continue;
            };
            let cid = net.connect(id, id, Some(entry.weight));
            if let Some(g) = entry.gater {
                match resolve(&net, g) {
                    Some(gater) => net.gate(gater, cid),
                    None => {
                        tracing::warn!(gater = g, "gater index out of range, leaving ungated")
                    }
                }
            }
        }

        for entry in &parsed.gates {
            let [from_idx, to_idx] = entry.connection;
            let (Some(from), Some(gater)) = (resolve(&net, from_idx), resolve(&net, entry.gater))
            else {
                tracing::warn!(connection = ?entry.connection, "gate references out-of-range node, skipping");
                continue;
            };
            let found = if from_idx == to_idx {
                net.node(from).self_conn
            } else {
                net.node(from)
                    .outgoing
                    .iter()
                    .find(|cid| net.node(net.conn(**cid).to).index == to_idx)
                    .copied()
            };
            match found {
                Some(cid) => {
                    if net.conn(cid).gater.is_none() {
                        net.gate(gater, cid);
                    }
                }
                None => tracing::warn!(connection = ?entry.connection, "gate references missing connection, skipping"),
            }
        }

        Ok(net)
    }

    /// Flatten to the compact array exchange form.
    pub fn serialize(&self) -> Serialized {
        let mut activations = Vec::with_capacity(self.order.len());
        let mut states = Vec::with_capacity(self.order.len());
        let mut biases = Vec::with_capacity(self.order.len());
        let mut squashes = Vec::with_capacity(self.order.len());
        let mut kinds = Vec::with_capacity(self.order.len());
        for id in &self.order {
            let node = self.node(*id);
            activations.push(node.activation);
            states.push(node.state);
            biases.push(node.bias);
            squashes.push(node.squash.name().to_string());
            kinds.push(node.kind.name().to_string());
        }
        let connections = self
            .connection_ids()
            .filter(|cid| self.conn(*cid).enabled)
            .map(|cid| {
                let c = self.conn(cid);
                (
                    self.node(c.from).index,
                    self.node(c.to).index,
                    c.weight,
                    c.gater.map(|g| self.node(g).index),
                )
            })
            .collect();
        Serialized {
            input: self.input,
            output: self.output,
            dropout: self.dropout,
            activations,
            states,
            biases,
            squashes,
            kinds,
            connections,
        }
    }

    /// Rebuild from [Network::serialize] output.
    pub fn deserialize(data: &Serialized) -> Network {
        let mut net = Network::empty(0, 0, seed_urandom().unwrap_or(1));
        net.input = data.input;
        net.output = data.output;
        net.dropout = data.dropout;
        let n = data.biases.len();
        for i in 0..n {
            let kind = data
                .kinds
                .get(i)
                .and_then(|k| NodeKind::from_name(k))
                .unwrap_or(NodeKind::Hidden);
            let squash = data
                .squashes
                .get(i)
                .map(|s| Activation::from_name_lossy(s))
                .unwrap_or(Activation::Identity);
            let mut node = Node::new(kind, squash);
            node.bias = data.biases[i];
            node.activation = data.activations.get(i).copied().unwrap_or(0.);
            node.state = data.states.get(i).copied().unwrap_or(0.);
            let id = net.alloc_node(node);
            net.order.push(id);
        }
        net.reindex();
        for (from, to, weight, gater) in &data.connections {
            let (Some(f), Some(t)) = (net.order.get(*from).copied(), net.order.get(*to).copied())
            else {
                continue;
            };
            let cid = net.connect(f, t, Some(*weight));
            if let Some(g) = gater.and_then(|g| net.order.get(g).copied()) {
                net.gate(g, cid);
            }
        }
        net
    }

    /// Emit self-contained Rust source computing this network's forward
    /// pass: a `Standalone` struct with persistent state arrays and the
    /// squash functions it needs, nothing else.
    pub fn standalone(&self) -> Result<String> {
        if self.order.is_empty() || self.output == 0 {
            return Err(Error::NoOutputNodes);
        }

        let n = self.order.len();
        let mut used: Vec<Activation> = Vec::new();
        for id in &self.order[self.input..] {
            let node = self.node(*id);
            if node.kind != NodeKind::Constant && !used.contains(&node.squash) {
                used.push(node.squash);
            }
        }

        let fmt_vec = |values: &mut dyn Iterator<Item = f64>| -> String {
            let items: Vec<String> = values.map(|v| format!("{v:?}")).collect();
            format!("[{}]", items.join(", "))
        };

        let mut src = String::new();
        let _ = writeln!(src, "// machine-generated forward kernel, {n} nodes");
        let _ = writeln!(src, "pub struct Standalone {{");
        let _ = writeln!(src, "    state: [f64; {n}],");
        let _ = writeln!(src, "    activation: [f64; {n}],");
        let _ = writeln!(src, "}}");
        let _ = writeln!(src);
        let _ = writeln!(src, "impl Standalone {{");
        let _ = writeln!(src, "    pub fn new() -> Self {{");
        let _ = writeln!(
            src,
            "        Standalone {{ state: {}, activation: {} }}",
            fmt_vec(&mut self.order.iter().map(|id| self.node(*id).state)),
            fmt_vec(&mut self.order.iter().map(|id| self.node(*id).activation)),
        );
        let _ = writeln!(src, "    }}");
        let _ = writeln!(src);
        let _ = writeln!(
            src,
            "    pub fn activate(&mut self, input: &[f64]) -> Vec<f64> {{"
        );
        let _ = writeln!(src, "        assert_eq!(input.len(), {});", self.input);
        for i in 0..self.input {
            let _ = writeln!(src, "        self.activation[{i}] = input[{i}];");
        }
        for id in &self.order[self.input..] {
            let node = self.node(*id);
            if node.kind == NodeKind::Constant {
                continue;
            }
            let k = node.index;
            let mut terms: Vec<String> = Vec::new();
            if let Some(sc) = node.self_conn {
                let c = self.conn(sc);
                if c.enabled {
                    let gain = match c.gater {
                        Some(g) => format!("self.activation[{}]", self.node(g).index),
                        None => format!("{:?}", c.gain),
                    };
                    terms.push(format!("{gain} * {:?} * self.state[{k}]", c.weight));
                }
            }
            terms.push(format!("{:?}", node.bias));
            for cid in &node.incoming {
                let c = self.conn(*cid);
                if !c.enabled {
                    continue;
                }
                let gain = match c.gater {
                    Some(g) => format!("self.activation[{}] * ", self.node(g).index),
                    None if c.gain != 1. => format!("{:?} * ", c.gain),
                    None => String::new(),
                };
                terms.push(format!(
                    "{gain}{:?} * self.activation[{}]",
                    c.weight,
                    self.node(c.from).index
                ));
            }
            let _ = writeln!(src, "        self.state[{k}] = {};", terms.join(" + "));
            let _ = writeln!(
                src,
                "        self.activation[{k}] = squash_{}(self.state[{k}]);",
                node.squash.name()
            );
        }
        let outputs: Vec<String> = self
            .output_ids()
            .iter()
            .map(|id| format!("self.activation[{}]", self.node(*id).index))
            .collect();
        let _ = writeln!(src, "        vec![{}]", outputs.join(", "));
        let _ = writeln!(src, "    }}");
        let _ = writeln!(src, "}}");
        for squash in used {
            let _ = writeln!(src);
            let _ = writeln!(src, "{}", squash_source(squash));
        }
        Ok(src)
    }
}

fn squash_source(squash: Activation) -> &'static str {
    match squash {
        Activation::Logistic => {
            "fn squash_logistic(x: f64) -> f64 {\n    1. / (1. + (-x).exp())\n}"
        }
        Activation::Tanh => "fn squash_tanh(x: f64) -> f64 {\n    x.tanh()\n}",
        Activation::Identity => "fn squash_identity(x: f64) -> f64 {\n    x\n}",
        Activation::Step => {
            "fn squash_step(x: f64) -> f64 {\n    if x > 0. { 1. } else { 0. }\n}"
        }
        Activation::Relu => "fn squash_relu(x: f64) -> f64 {\n    if x > 0. { x } else { 0. }\n}",
        Activation::Softsign => {
            "fn squash_softsign(x: f64) -> f64 {\n    x / (1. + x.abs())\n}"
        }
        Activation::Sinusoid => "fn squash_sinusoid(x: f64) -> f64 {\n    x.sin()\n}",
        Activation::Gaussian => "fn squash_gaussian(x: f64) -> f64 {\n    (-x * x).exp()\n}",
        Activation::BentIdentity => {
            "fn squash_bent_identity(x: f64) -> f64 {\n    ((x * x + 1.).sqrt() - 1.) / 2. + x\n}"
        }
        Activation::Bipolar => {
            "fn squash_bipolar(x: f64) -> f64 {\n    if x > 0. { 1. } else { -1. }\n}"
        }
        Activation::BipolarSigmoid => {
            "fn squash_bipolar_sigmoid(x: f64) -> f64 {\n    2. / (1. + (-x).exp()) - 1.\n}"
        }
        Activation::HardTanh => {
            "fn squash_hard_tanh(x: f64) -> f64 {\n    x.clamp(-1., 1.)\n}"
        }
        Activation::Absolute => "fn squash_absolute(x: f64) -> f64 {\n    x.abs()\n}",
        Activation::Inverse => "fn squash_inverse(x: f64) -> f64 {\n    1. - x\n}",
        Activation::Selu => {
            "fn squash_selu(x: f64) -> f64 {\n    let y = if x > 0. { x } else { 1.6732632423543772 * (x.exp() - 1.) };\n    y * 1.0507009873554805\n}"
        }
    }
}
