//! Canonical topology factories: thin composition over [Network]
//! primitives. Each returns an ordinary genome; nothing here is special to
//! the evolution or training loops.

use crate::{
    activation::Activation,
    network::{Mutation, Network, Node, NodeId, NodeKind},
    random::seed_urandom,
};

fn fresh_seed() -> u64 {
    seed_urandom().unwrap_or(0xa5c4_17ec_7000_0001)
}

/// Append a node to the hidden region (just before the outputs).
fn push_hidden(net: &mut Network, kind: NodeKind, squash: Activation, bias: f64) -> NodeId {
    let mut node = Node::new(kind, squash);
    node.bias = bias;
    let id = net.alloc_node(node);
    let at = net.order.len() - net.output;
    net.order.insert(at, id);
    id
}

fn connect_layers(net: &mut Network, from: &[NodeId], to: &[NodeId]) {
    let bound = (6. / (from.len() + to.len()).max(1) as f64).sqrt();
    for &f in from {
        for &t in to {
            let weight = net.rng.uniform(-bound, bound);
            net.connect(f, t, Some(weight));
        }
    }
}

/// Multilayer perceptron over the given layer sizes (first is the input
/// layer, last the output layer).
pub fn perceptron(layers: &[usize]) -> Network {
    assert!(layers.len() >= 2, "a perceptron needs input and output layers");
    assert!(layers.iter().all(|&n| n > 0), "layers must be non-empty");

    let input = layers[0];
    let output = *layers.last().unwrap();
    let mut net = Network::empty(input, output, fresh_seed());

    let mut previous: Vec<NodeId> = net.node_order()[..input].to_vec();
    for &size in &layers[1..layers.len() - 1] {
        let layer: Vec<NodeId> = (0..size)
            .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Logistic, 0.))
            .collect();
        net.reindex();
        connect_layers(&mut net, &previous, &layer);
        previous = layer;
    }
    let outputs: Vec<NodeId> = net.output_ids().to_vec();
    connect_layers(&mut net, &previous, &outputs);
    net
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomOptions {
    pub connections: usize,
    pub backconnections: usize,
    pub selfconnections: usize,
    pub gates: usize,
}

/// A genome grown by random structural mutation from a fully connected
/// seed.
pub fn random(input: usize, hidden: usize, output: usize, options: RandomOptions) -> Network {
    let mut net = Network::new(input, output);
    for _ in 0..hidden {
        net.mutate(Mutation::AddNode);
    }
    for _ in 0..options.connections {
        net.mutate(Mutation::AddConn);
    }
    for _ in 0..options.backconnections {
        net.mutate(Mutation::AddBackConn);
    }
    for _ in 0..options.selfconnections {
        net.mutate(Mutation::AddSelfConn);
    }
    for _ in 0..options.gates {
        net.mutate(Mutation::AddGate);
    }
    net
}

/// Long short-term memory: per block, input/forget/output gate groups
/// around a self-connected memory cell, all realized with gated
/// connections.
pub fn lstm(input: usize, blocks: &[usize], output: usize) -> Network {
    assert!(!blocks.is_empty(), "an LSTM needs at least one memory block");
    assert!(blocks.iter().all(|&n| n > 0), "memory blocks must be non-empty");

    let mut net = Network::empty(input, output, fresh_seed());
    let mut previous: Vec<NodeId> = net.node_order()[..input].to_vec();
    // gates carried forward to modulate the cells' outgoing projections
    let mut pending_output_gate: Option<Vec<NodeId>> = None;

    for &size in blocks {
        let input_gate: Vec<NodeId> = (0..size)
            .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Logistic, 1.))
            .collect();
        let forget_gate: Vec<NodeId> = (0..size)
            .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Logistic, 1.))
            .collect();
        let cell: Vec<NodeId> = (0..size)
            .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Tanh, 0.))
            .collect();
        let output_gate: Vec<NodeId> = (0..size)
            .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Logistic, 1.))
            .collect();
        net.reindex();

        connect_layers(&mut net, &previous, &input_gate);
        connect_layers(&mut net, &previous, &forget_gate);
        connect_layers(&mut net, &previous, &output_gate);

        // cell input, gated per target cell by the input gate
        let bound = (6. / (previous.len() + size).max(1) as f64).sqrt();
        for (j, &c) in cell.iter().enumerate() {
            for &p in &previous {
                let weight = net.rng.uniform(-bound, bound);
                let cid = net.connect(p, c, Some(weight));
                net.gate(input_gate[j], cid);
            }
            // memory retention, gated by the forget gate
            let sc = net.connect(c, c, Some(1.));
            net.gate(forget_gate[j], sc);
        }

        previous = cell;
        pending_output_gate = Some(output_gate);
    }

    let outputs: Vec<NodeId> = net.output_ids().to_vec();
    let gate = pending_output_gate.expect("at least one block");
    let bound = (6. / (previous.len() + outputs.len()).max(1) as f64).sqrt();
    for (j, &c) in previous.iter().enumerate() {
        for &o in &outputs {
            let weight = net.rng.uniform(-bound, bound);
            let cid = net.connect(c, o, Some(weight));
            net.gate(gate[j], cid);
        }
    }
    net
}

/// Gated recurrent unit: update/reset gates plus a constant-one node per
/// layer realizing the `1 - z` complement.
pub fn gru(input: usize, units: &[usize], output: usize) -> Network {
    assert!(!units.is_empty(), "a GRU needs at least one layer");
    assert!(units.iter().all(|&n| n > 0), "GRU layers must be non-empty");

    let mut net = Network::empty(input, output, fresh_seed());
    let mut previous: Vec<NodeId> = net.node_order()[..input].to_vec();

    for &size in units {
        let update: Vec<NodeId> = (0..size)
            .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Logistic, 0.))
            .collect();
        let one = push_hidden(&mut net, NodeKind::Constant, Activation::Identity, 0.);
        let inverse: Vec<NodeId> = (0..size)
            .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Identity, 0.))
            .collect();
        let reset: Vec<NodeId> = (0..size)
            .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Logistic, 0.))
            .collect();
        let candidate: Vec<NodeId> = (0..size)
            .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Tanh, 0.))
            .collect();
        let state: Vec<NodeId> = (0..size)
            .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Identity, 0.))
            .collect();
        net.reindex();

        connect_layers(&mut net, &previous, &update);
        connect_layers(&mut net, &previous, &reset);
        connect_layers(&mut net, &previous, &candidate);

        for j in 0..size {
            // 1 - z
            net.connect(one, inverse[j], Some(1.));
            net.connect(update[j], inverse[j], Some(-1.));
            // previous state into the candidate, modulated by reset
            let cid = net.connect(state[j], candidate[j], Some(1.));
            net.gate(reset[j], cid);
            // new state: z * old + (1 - z) * candidate
            let keep = net.connect(state[j], state[j], Some(1.));
            net.gate(update[j], keep);
            let fresh = net.connect(candidate[j], state[j], Some(1.));
            net.gate(inverse[j], fresh);
        }

        previous = state;
    }

    let outputs: Vec<NodeId> = net.output_ids().to_vec();
    connect_layers(&mut net, &previous, &outputs);
    net
}

/// Nonlinear autoregressive network with exogenous inputs: a feed-forward
/// core plus shift-register memories of past inputs and outputs feeding
/// the hidden layer.
pub fn narx(
    input: usize,
    hidden: usize,
    output: usize,
    input_memory: usize,
    output_memory: usize,
) -> Network {
    assert!(hidden > 0, "narx needs a hidden layer");

    let mut net = Network::empty(input, output, fresh_seed());
    let hidden_layer: Vec<NodeId> = (0..hidden)
        .map(|_| push_hidden(&mut net, NodeKind::Hidden, Activation::Logistic, 0.))
        .collect();
    net.reindex();

    let inputs: Vec<NodeId> = net.node_order()[..input].to_vec();
    let outputs: Vec<NodeId> = net.output_ids().to_vec();
    connect_layers(&mut net, &inputs, &hidden_layer);
    connect_layers(&mut net, &hidden_layer, &outputs);

    // memory chains sit after the hidden layer, so readers always see the
    // previous step's value: depth d holds the signal from d steps ago
    let build_chain = |net: &mut Network, sources: &[NodeId], depth: usize| {
        let mut taps: Vec<NodeId> = Vec::new();
        for &source in sources {
            let mut upstream = source;
            for _ in 0..depth {
                let tap = push_hidden(net, NodeKind::Hidden, Activation::Identity, 0.);
                net.reindex();
                net.connect(upstream, tap, Some(1.));
                taps.push(tap);
                upstream = tap;
            }
        }
        taps
    };

    let input_taps = build_chain(&mut net, &inputs, input_memory);
    let output_taps = build_chain(&mut net, &outputs, output_memory);
    connect_layers(&mut net, &input_taps, &hidden_layer);
    connect_layers(&mut net, &output_taps, &hidden_layer);
    net
}

/// Hopfield-style recall network: a step-activated output layer fully
/// connected to the input layer.
pub fn hopfield(size: usize) -> Network {
    let mut net = Network::with_seed(size, size, fresh_seed());
    let outputs: Vec<NodeId> = net.output_ids().to_vec();
    for id in outputs {
        net.node_mut(id).squash = Activation::Step;
    }
    net
}
