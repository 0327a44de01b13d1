//! The network genome: an arena of nodes and connections plus the order
//! vectors that make every traversal deterministic.
//!
//! Nodes and connections refer to each other by stable ids ([NodeId],
//! [ConnId]) that are never reused, which sidesteps the reference cycles a
//! node/connection/gater triangle would otherwise create. The dense
//! `order` vector holds inputs first, outputs last, hidden nodes in
//! topological order between them; mutations that shift positions reindex
//! in one O(n) pass.

pub mod connection;
pub mod crossover;
pub mod mutation;
pub mod node;
pub mod serialize;

pub use connection::{innovation_id, Connection};
pub use mutation::Mutation;
pub use node::{Node, NodeKind};

use crate::{
    activation::Activation,
    error::{Error, Result},
    optimizer::{Optimizer, Regularization},
    random::{seed_urandom, WyRng},
};
use fxhash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) u32);

/// Everything the backward pass needs beyond the target vector. The plain
/// [Network::propagate] entrypoint fills this with SGD defaults.
#[derive(Debug, Clone)]
pub struct BackpropConfig {
    pub rate: f64,
    pub momentum: f64,
    pub optimizer: Optimizer,
    pub regularization: Regularization,
    /// Global-norm gradient clip.
    pub gradient_clip: Option<f64>,
    pub loss_scale: f64,
}

impl Default for BackpropConfig {
    fn default() -> Self {
        Self {
            rate: 0.3,
            momentum: 0.,
            optimizer: Optimizer::Sgd,
            regularization: Regularization::None,
            gradient_clip: None,
            loss_scale: 1.,
        }
    }
}

/// What a backward pass did with the accumulated gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Gradients accumulated, update flag not set.
    Accumulated,
    /// Optimizer step applied and accumulators zeroed.
    Applied,
    /// Non-finite gradient found after descaling: step skipped, accumulators
    /// zeroed. Recoverable; the training loop's loss scaler reacts to it.
    Overflow,
}

#[derive(Debug, Clone)]
pub struct Network {
    pub input: usize,
    pub output: usize,
    pub(crate) nodes: FxHashMap<NodeId, Node>,
    pub(crate) order: Vec<NodeId>,
    pub(crate) conns: FxHashMap<ConnId, Connection>,
    /// Non-self connections, creation order.
    pub(crate) conn_order: Vec<ConnId>,
    /// Self connections, creation order.
    pub(crate) self_order: Vec<ConnId>,
    /// Gated connections, gating order.
    pub(crate) gate_order: Vec<ConnId>,
    next_node: u32,
    next_conn: u32,
    /// Set by the fitness function, cleared each generation.
    pub score: Option<f64>,
    pub dropout: f64,
    pub dropconnect: f64,
    /// Forbid back- and self-connections.
    pub acyclic: bool,
    pub(crate) seed: u64,
    pub(crate) rng: WyRng,
    force_overflow: bool,
}

impl Network {
    /// Fully connected input→output genome with Glorot-uniform weights drawn
    /// from the given seed. Identical seeds yield identical genomes.
    pub fn with_seed(input: usize, output: usize, seed: u64) -> Self {
        let mut net = Self::empty(input, output, seed);
        let bound = (6. / (input + output) as f64).sqrt();
        for i in 0..input {
            for o in 0..output {
                let from = net.order[i];
                let to = net.order[input + o];
                let weight = net.rng.uniform(-bound, bound);
                net.connect(from, to, Some(weight));
            }
        }
        net
    }

    /// Fully connected genome seeded from urandom.
    pub fn new(input: usize, output: usize) -> Self {
        Self::with_seed(input, output, seed_urandom().unwrap_or(0x6e65_7572_6974_6500))
    }

    /// Input and output nodes only, no connections. The architect builds on
    /// this.
    pub(crate) fn empty(input: usize, output: usize, seed: u64) -> Self {
        let mut net = Self {
            input,
            output,
            nodes: FxHashMap::default(),
            order: Vec::with_capacity(input + output),
            conns: FxHashMap::default(),
            conn_order: Vec::new(),
            self_order: Vec::new(),
            gate_order: Vec::new(),
            next_node: 0,
            next_conn: 0,
            score: None,
            dropout: 0.,
            dropconnect: 0.,
            acyclic: false,
            seed,
            rng: WyRng::seeded(seed),
            force_overflow: false,
        };
        for _ in 0..input {
            let id = net.alloc_node(Node::new(NodeKind::Input, Activation::Identity));
            net.order.push(id);
        }
        for _ in 0..output {
            let id = net.alloc_node(Node::new(NodeKind::Output, Activation::Logistic));
            net.order.push(id);
        }
        net.reindex();
        net
    }

    pub(crate) fn alloc_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(id, node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[&id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes.get_mut(&id).expect("node id out of arena")
    }

    pub fn conn(&self, id: ConnId) -> &Connection {
        &self.conns[&id]
    }

    pub(crate) fn conn_mut(&mut self, id: ConnId) -> &mut Connection {
        self.conns.get_mut(&id).expect("connection id out of arena")
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    pub fn hidden_count(&self) -> usize {
        self.order.len() - self.input - self.output
    }

    pub fn conn_count(&self) -> usize {
        self.conn_order.len() + self.self_order.len()
    }

    pub fn gate_count(&self) -> usize {
        self.gate_order.len()
    }

    /// Node ids in topological order: inputs, hidden, outputs.
    pub fn node_order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn connection_ids(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.conn_order.iter().chain(self.self_order.iter()).copied()
    }

    pub(crate) fn hidden_ids(&self) -> &[NodeId] {
        &self.order[self.input..self.order.len() - self.output]
    }

    pub(crate) fn output_ids(&self) -> &[NodeId] {
        &self.order[self.order.len() - self.output..]
    }

    /// Recompute every node's dense topological index from `order`.
    pub(crate) fn reindex(&mut self) {
        let order = self.order.clone();
        for (i, id) in order.into_iter().enumerate() {
            self.node_mut(id).index = i;
        }
    }

    /// Reseed the genome's private generator, e.g. before a deterministic
    /// training run.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = WyRng::seeded(seed);
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    // ---- wiring ----------------------------------------------------------

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.nodes[&from]
            .outgoing
            .iter()
            .any(|cid| self.conns[cid].to == to)
            || (from == to && self.nodes[&from].self_conn.is_some())
    }

    /// Create a connection (or self-connection) and register it on both
    /// endpoints. Connecting an already-connected pair returns the existing
    /// edge.
    pub fn connect(&mut self, from: NodeId, to: NodeId, weight: Option<f64>) -> ConnId {
        if from == to {
            if let Some(existing) = self.nodes[&from].self_conn {
                tracing::warn!("nodes are already self-connected");
                return existing;
            }
            let weight = weight.unwrap_or_else(|| self.rng.uniform(-1., 1.));
            let index = self.nodes[&from].index;
            let id = self.alloc_conn(Connection::new(
                from,
                to,
                weight,
                innovation_id(index, index),
            ));
            self.node_mut(from).self_conn = Some(id);
            self.self_order.push(id);
            return id;
        }

        if let Some(existing) = self.nodes[&from]
            .outgoing
            .iter()
            .find(|cid| self.conns[cid].to == to)
            .copied()
        {
            tracing::warn!("nodes are already connected");
            return existing;
        }

        let weight = weight.unwrap_or_else(|| self.rng.uniform(-1., 1.));
        let innovation = innovation_id(self.nodes[&from].index, self.nodes[&to].index);
        let id = self.alloc_conn(Connection::new(from, to, weight, innovation));
        self.node_mut(from).outgoing.push(id);
        self.node_mut(to).incoming.push(id);
        self.conn_order.push(id);
        id
    }

    fn alloc_conn(&mut self, conn: Connection) -> ConnId {
        let id = ConnId(self.next_conn);
        self.next_conn += 1;
        self.conns.insert(id, conn);
        id
    }

    /// Remove the connection between two nodes, clearing any gate on it.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) {
        let found = if from == to {
            self.nodes[&from].self_conn
        } else {
            self.nodes[&from]
                .outgoing
                .iter()
                .find(|cid| self.conns[cid].to == to)
                .copied()
        };
        if let Some(cid) = found {
            self.remove_conn(cid);
        }
    }

    pub(crate) fn remove_conn(&mut self, cid: ConnId) {
        if self.conns[&cid].gater.is_some() {
            let _ = self.ungate(cid);
        }
        let conn = self.conns.remove(&cid).expect("connection id out of arena");
        if conn.is_self_loop() {
            self.node_mut(conn.from).self_conn = None;
            self.self_order.retain(|c| *c != cid);
        } else {
            self.node_mut(conn.from).outgoing.retain(|c| *c != cid);
            self.node_mut(conn.to).incoming.retain(|c| *c != cid);
            self.conn_order.retain(|c| *c != cid);
        }
    }

    /// Make `gater` modulate `conn`: the gater's activation becomes the
    /// connection's gain on every forward pass.
    pub fn gate(&mut self, gater: NodeId, conn: ConnId) {
        if self.conns[&conn].gater == Some(gater) {
            tracing::warn!("connection is already gated by that node");
            return;
        }
        if self.conns[&conn].gater.is_some() {
            let _ = self.ungate(conn);
        }
        self.conn_mut(conn).gater = Some(gater);
        self.node_mut(gater).gated.push(conn);
        self.gate_order.push(conn);
    }

    pub fn ungate(&mut self, conn: ConnId) -> Result<()> {
        let Some(gater) = self.conns.get(&conn).and_then(|c| c.gater) else {
            return Err(Error::ConnectionNotGated);
        };
        self.node_mut(gater).gated.retain(|c| *c != conn);
        let c = self.conn_mut(conn);
        c.gater = None;
        c.gain = 1.;
        self.gate_order.retain(|c| *c != conn);
        Ok(())
    }

    /// Drop a node and every incident connection; clears gates held by the
    /// node and gates on the removed edges.
    pub(crate) fn remove_node(&mut self, id: NodeId) {
        let gated: Vec<ConnId> = self.nodes[&id].gated.clone();
        for cid in gated {
            let _ = self.ungate(cid);
        }
        let incident: Vec<ConnId> = {
            let node = &self.nodes[&id];
            node.incoming
                .iter()
                .chain(node.outgoing.iter())
                .chain(node.self_conn.iter())
                .copied()
                .collect()
        };
        for cid in incident {
            self.remove_conn(cid);
        }
        self.nodes.remove(&id);
        self.order.retain(|n| *n != id);
        self.reindex();
    }

    // ---- forward ---------------------------------------------------------

    /// Full-network forward pass with trace bookkeeping. `training` samples
    /// dropout/DropConnect masks; inference restores them to 1 first.
    pub fn activate(&mut self, input: &[f64], training: bool) -> Result<Vec<f64>> {
        self.forward(input, training, true)
    }

    /// Forward computation only: no eligibility or extended traces. This is
    /// the path fitness evaluation and inference take.
    pub fn no_trace_activate(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        self.forward(input, false, false)
    }

    fn forward(&mut self, input: &[f64], training: bool, trace: bool) -> Result<Vec<f64>> {
        if self.order.is_empty() {
            return Err(Error::CorruptedStructure);
        }
        if input.len() != self.input {
            return Err(Error::InvalidInputSize {
                expected: self.input,
                found: input.len(),
            });
        }

        if training {
            self.sample_masks();
        } else {
            self.restore_masks();
        }

        let order = self.order.clone();
        let mut outputs = Vec::with_capacity(self.output);
        for (pos, id) in order.into_iter().enumerate() {
            match self.nodes[&id].kind {
                NodeKind::Input => self.activate_input(id, input[pos]),
                NodeKind::Constant => self.refresh_gains(id),
                kind => {
                    self.activate_node(id, trace);
                    if kind == NodeKind::Output {
                        outputs.push(self.nodes[&id].activation);
                    }
                }
            }
        }
        Ok(outputs)
    }

    fn activate_input(&mut self, id: NodeId, value: f64) {
        let node = self.node_mut(id);
        node.activation = value * node.mask;
        self.refresh_gains(id);
    }

    /// Push this node's activation into the gain of every connection it
    /// gates.
    fn refresh_gains(&mut self, id: NodeId) {
        let activation = self.nodes[&id].activation;
        let gated = self.nodes[&id].gated.clone();
        for cid in gated {
            self.conn_mut(cid).gain = activation;
        }
    }

    fn activate_node(&mut self, id: NodeId, trace: bool) {
        let (state, activation, derivative) = {
            let node = &self.nodes[&id];
            let mut state = node.bias;
            if let Some(sc) = node.self_conn {
                let c = &self.conns[&sc];
                if c.enabled {
                    state += c.gain * c.weight * node.state;
                }
            }
            for cid in &node.incoming {
                let c = &self.conns[cid];
                if !c.enabled {
                    continue;
                }
                state += c.gain * c.weight * c.dc_mask * self.nodes[&c.from].activation;
            }
            (
                state,
                node.squash.value(state) * node.mask,
                node.squash.derivative(state),
            )
        };

        {
            let node = self.node_mut(id);
            node.old = node.state;
            node.state = state;
            node.activation = activation;
            node.derivative = derivative;
        }

        if trace {
            self.update_traces(id, derivative);
        } else {
            self.refresh_gains(id);
        }
    }

    /// Eligibility and extended-trace bookkeeping for one freshly activated
    /// node. The extended trace tracks, per incoming connection and per
    /// gater influencing a downstream target, the derivative of that
    /// target's state with respect to the gater's activation.
    fn update_traces(&mut self, id: NodeId, derivative: f64) {
        // influence of this node, as a gater, on each target it gates
        let gated = self.nodes[&id].gated.clone();
        let mut influence_nodes: Vec<NodeId> = Vec::new();
        let mut influences: Vec<f64> = Vec::new();
        for cid in &gated {
            let (to, term) = {
                let c = &self.conns[cid];
                (c.to, c.weight * self.nodes[&c.from].activation)
            };
            match influence_nodes.iter().position(|n| *n == to) {
                Some(i) => influences[i] += term,
                None => {
                    let to_node = &self.nodes[&to];
                    let self_gated_here = to_node
                        .self_conn
                        .map(|sc| self.conns[&sc].gater == Some(id))
                        .unwrap_or(false);
                    let base = if self_gated_here { to_node.old } else { 0. };
                    influence_nodes.push(to);
                    influences.push(base + term);
                }
            }
        }
        self.refresh_gains(id);

        // decay factor each influence target applies to its own trace
        let influence_decay: Vec<f64> = influence_nodes
            .iter()
            .map(|n| {
                self.nodes[n]
                    .self_conn
                    .map(|sc| {
                        let c = &self.conns[&sc];
                        if c.enabled {
                            c.gain * c.weight
                        } else {
                            0.
                        }
                    })
                    .unwrap_or(0.)
            })
            .collect();

        let (self_gain, self_weight) = {
            let node = &self.nodes[&id];
            node.self_conn
                .map(|sc| {
                    let c = &self.conns[&sc];
                    if c.enabled {
                        (c.gain, c.weight)
                    } else {
                        (0., 0.)
                    }
                })
                .unwrap_or((0., 0.))
        };

        let mut incoming: Vec<ConnId> = self.nodes[&id].incoming.clone();
        if let Some(sc) = self.nodes[&id].self_conn {
            incoming.push(sc);
        }

        for cid in incoming {
            if !self.conns[&cid].enabled {
                continue;
            }
            let from_activation = self.nodes[&self.conns[&cid].from].activation;
            let conn = self.conn_mut(cid);
            conn.eligibility =
                self_gain * self_weight * conn.eligibility + conn.gain * from_activation;
            let eligibility = conn.eligibility;
            for (j, influence_node) in influence_nodes.iter().enumerate() {
                let contribution = derivative * eligibility * influences[j];
                match conn.xtrace.iter_mut().find(|(n, _)| n == influence_node) {
                    Some((_, v)) => *v = influence_decay[j] * *v + contribution,
                    None => conn.xtrace.push((*influence_node, contribution)),
                }
            }
        }
    }

    fn sample_masks(&mut self) {
        if self.dropout > 0. {
            let hidden: Vec<NodeId> = self
                .hidden_ids()
                .iter()
                .filter(|id| self.nodes[id].kind == NodeKind::Hidden)
                .copied()
                .collect();
            let mut any_alive = false;
            for id in &hidden {
                let mask = if self.rng.chance(self.dropout) { 0. } else { 1. };
                any_alive |= mask == 1.;
                self.node_mut(*id).mask = mask;
            }
            // never silence the entire hidden region
            if !any_alive && !hidden.is_empty() {
                let lucky = hidden[self.rng.index(hidden.len())];
                self.node_mut(lucky).mask = 1.;
            }
        }
        if self.dropconnect > 0. {
            let ids: Vec<ConnId> = self.conn_order.clone();
            for cid in ids {
                let mask = if self.rng.chance(self.dropconnect) { 0. } else { 1. };
                self.conn_mut(cid).dc_mask = mask;
            }
        }
    }

    /// Set every mask back to 1, the inference configuration.
    pub fn restore_masks(&mut self) {
        let ids: Vec<NodeId> = self.order.clone();
        for id in ids {
            self.node_mut(id).mask = 1.;
        }
        let ids: Vec<ConnId> = self.conn_order.clone();
        for cid in ids {
            self.conn_mut(cid).dc_mask = 1.;
        }
    }

    // ---- backward --------------------------------------------------------

    /// Plain-SGD backward pass; the long-form knobs live on
    /// [Network::propagate_with].
    pub fn propagate(
        &mut self,
        rate: f64,
        momentum: f64,
        update: bool,
        target: &[f64],
    ) -> Result<()> {
        let config = BackpropConfig {
            rate,
            momentum,
            ..BackpropConfig::default()
        };
        self.propagate_with(&config, update, target).map(|_| ())
    }

    /// Backward pass: outputs first (against the target), then hidden nodes
    /// in reverse topological order. With `update` set, applies the
    /// configured optimizer network-wide and zeroes the accumulators.
    pub fn propagate_with(
        &mut self,
        config: &BackpropConfig,
        update: bool,
        target: &[f64],
    ) -> Result<StepOutcome> {
        if target.len() != self.output {
            return Err(Error::InvalidTargetSize {
                expected: self.output,
                found: target.len(),
            });
        }

        let order = self.order.clone();
        let n = order.len();
        for (i, id) in order[n - self.output..].iter().enumerate().rev() {
            self.propagate_node(*id, Some(target[i]), config.loss_scale);
        }
        for id in order[self.input..n - self.output].iter().rev() {
            self.propagate_node(*id, None, config.loss_scale);
        }
        // input nodes carry no error and no trainable parameters

        if update {
            Ok(self.apply_gradients(config))
        } else {
            Ok(StepOutcome::Accumulated)
        }
    }

    fn propagate_node(&mut self, id: NodeId, target: Option<f64>, loss_scale: f64) {
        let (responsibility, kind, mask) = {
            let node = &self.nodes[&id];
            match target {
                Some(t) if node.kind == NodeKind::Output => {
                    let projected = t - node.activation;
                    (projected * node.derivative, node.kind, node.mask)
                }
                _ => {
                    // error projected back through outgoing connections
                    let mut error = 0.;
                    for cid in &node.outgoing {
                        let c = &self.conns[cid];
                        if !c.enabled {
                            continue;
                        }
                        error += self.nodes[&c.to].responsibility * c.weight * c.gain;
                    }
                    let projected = node.derivative * error;

                    // error arriving through connections this node gates
                    let mut error = 0.;
                    for cid in &node.gated {
                        let c = &self.conns[cid];
                        let to = &self.nodes[&c.to];
                        let self_gated_here = to
                            .self_conn
                            .map(|sc| self.conns[&sc].gater == Some(id))
                            .unwrap_or(false);
                        let mut influence = if self_gated_here { to.old } else { 0. };
                        influence += c.weight * self.nodes[&c.from].activation;
                        error += to.responsibility * influence;
                    }
                    let gated = node.derivative * error;
                    (projected + gated, node.kind, node.mask)
                }
            }
        };

        self.node_mut(id).responsibility = responsibility;

        if matches!(kind, NodeKind::Constant | NodeKind::Input) {
            return;
        }

        let mut incoming: Vec<ConnId> = self.nodes[&id].incoming.clone();
        if let Some(sc) = self.nodes[&id].self_conn {
            incoming.push(sc);
        }
        for cid in incoming {
            if !self.conns[&cid].enabled {
                continue;
            }
            let gradient = {
                let c = &self.conns[&cid];
                let mut g = responsibility * c.eligibility;
                for (n, v) in &c.xtrace {
                    g += self.nodes[n].responsibility * v;
                }
                g
            };
            self.conn_mut(cid).total_delta_weight += loss_scale * gradient * mask;
        }
        self.node_mut(id).total_delta_bias += loss_scale * responsibility;
    }

    /// Optimizer step over every trainable parameter. Skips the whole step
    /// when any descaled gradient is non-finite (mixed-precision overflow),
    /// zeroing the accumulators either way.
    fn apply_gradients(&mut self, config: &BackpropConfig) -> StepOutcome {
        let conn_ids: Vec<ConnId> = self.connection_ids().collect();
        let node_ids: Vec<NodeId> = self
            .order
            .iter()
            .filter(|id| !matches!(self.nodes[id].kind, NodeKind::Input | NodeKind::Constant))
            .copied()
            .collect();
        let scale = config.loss_scale;

        let forced = std::mem::replace(&mut self.force_overflow, false);
        let mut sq_norm = 0.;
        let mut finite = !forced;
        for cid in &conn_ids {
            let g = self.conns[cid].total_delta_weight / scale;
            if !g.is_finite() {
                finite = false;
                break;
            }
            sq_norm += g * g;
        }
        if finite {
            for id in &node_ids {
                let g = self.nodes[id].total_delta_bias / scale;
                if !g.is_finite() {
                    finite = false;
                    break;
                }
                sq_norm += g * g;
            }
        }

        if !finite {
            for cid in conn_ids {
                self.conn_mut(cid).total_delta_weight = 0.;
            }
            for id in node_ids {
                self.node_mut(id).total_delta_bias = 0.;
            }
            return StepOutcome::Overflow;
        }

        let clip = match config.gradient_clip {
            Some(max_norm) if sq_norm.sqrt() > max_norm => max_norm / sq_norm.sqrt(),
            _ => 1.,
        };
        let decay = config.optimizer.decoupled_decay();

        for cid in conn_ids {
            let conn = self.conn_mut(cid);
            if !conn.enabled {
                conn.total_delta_weight = 0.;
                continue;
            }
            let raw = conn.total_delta_weight / scale * clip;
            let grad = config.regularization.apply(raw, conn.weight);
            let mut moments = conn.moments;
            let mut prev = conn.previous_delta_weight;
            let delta = config
                .optimizer
                .step(grad, config.rate, config.momentum, &mut moments, &mut prev);
            conn.moments = moments;
            conn.previous_delta_weight = prev;
            conn.weight += delta;
            if decay > 0. {
                conn.weight -= config.rate * decay * conn.weight;
            }
            conn.total_delta_weight = 0.;
        }
        for id in node_ids {
            let node = self.node_mut(id);
            let grad = node.total_delta_bias / scale * clip;
            let mut moments = node.bias_moments;
            let mut prev = node.previous_delta_bias;
            let delta = config
                .optimizer
                .step(grad, config.rate, config.momentum, &mut moments, &mut prev);
            node.bias_moments = moments;
            node.previous_delta_bias = prev;
            node.bias += delta;
            node.total_delta_bias = 0.;
        }
        StepOutcome::Applied
    }

    /// Debug hook: the next optimizer step reports an overflow regardless of
    /// the gradients. Consumed by that step.
    pub fn force_overflow(&mut self) {
        self.force_overflow = true;
    }

    // ---- state management ------------------------------------------------

    /// Zero all dynamic state: activations, recurrent accumulators,
    /// eligibility and extended traces, masks, and optimizer scratch.
    pub fn clear(&mut self) {
        let node_ids: Vec<NodeId> = self.order.clone();
        for id in node_ids {
            self.node_mut(id).reset_state();
        }
        let conn_ids: Vec<ConnId> = self.connection_ids().collect();
        for cid in conn_ids {
            self.conn_mut(cid).reset_state();
        }
    }

    /// Fuse two networks: `a`'s outputs become hidden nodes feeding what
    /// used to read `b`'s inputs.
    pub fn merge(a: &Network, b: &Network) -> Result<Network> {
        if a.output != b.input {
            return Err(Error::OutputInputMismatch {
                output: a.output,
                input: b.input,
            });
        }

        let mut merged = a.clone();
        merged.score = None;
        let fused: Vec<NodeId> = merged.output_ids().to_vec();
        for id in &fused {
            merged.node_mut(*id).kind = NodeKind::Hidden;
        }
        merged.output = b.output;

        let mut map: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        for (pos, bid) in b.order.iter().enumerate() {
            if pos < b.input {
                map.insert(*bid, fused[pos]);
            } else {
                let source = &b.nodes[bid];
                let mut node = Node::new(source.kind, source.squash);
                node.bias = source.bias;
                node.activation = source.activation;
                let nid = merged.alloc_node(node);
                merged.order.push(nid);
                map.insert(*bid, nid);
            }
        }
        merged.reindex();

        for cid in b.connection_ids() {
            let source = &b.conns[&cid];
            let nid = merged.connect(map[&source.from], map[&source.to], Some(source.weight));
            merged.conn_mut(nid).enabled = source.enabled;
            if let Some(g) = source.gater {
                merged.gate(map[&g], nid);
            }
        }
        Ok(merged)
    }
}
