//! The structural and parametric mutation catalogue.
//!
//! Every operator works in place on one genome. When an operator's
//! precondition fails it is a warned no-op; the NEAT engine additionally
//! refuses to pick operators that would breach its structural caps.

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::activation::Activation;

use super::{ConnId, Network, Node, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    AddNode,
    SubNode,
    AddConn,
    SubConn,
    ModWeight,
    ModBias,
    ModActivation,
    AddSelfConn,
    SubSelfConn,
    AddGate,
    SubGate,
    AddBackConn,
    SubBackConn,
    SwapNodes,
}

impl Mutation {
    pub const ALL: [Mutation; 14] = [
        Mutation::AddNode,
        Mutation::SubNode,
        Mutation::AddConn,
        Mutation::SubConn,
        Mutation::ModWeight,
        Mutation::ModBias,
        Mutation::ModActivation,
        Mutation::AddSelfConn,
        Mutation::SubSelfConn,
        Mutation::AddGate,
        Mutation::SubGate,
        Mutation::AddBackConn,
        Mutation::SubBackConn,
        Mutation::SwapNodes,
    ];

    /// The feed-forward-safe subset: everything that cannot introduce a
    /// recurrent edge.
    pub const FFW: [Mutation; 10] = [
        Mutation::AddNode,
        Mutation::SubNode,
        Mutation::AddConn,
        Mutation::SubConn,
        Mutation::ModWeight,
        Mutation::ModBias,
        Mutation::ModActivation,
        Mutation::AddGate,
        Mutation::SubGate,
        Mutation::SwapNodes,
    ];
}

impl Network {
    /// Apply one mutation. Returns false (with a warning) when the
    /// operator's precondition does not hold on this genome.
    pub fn mutate(&mut self, method: Mutation) -> bool {
        let applied = match method {
            Mutation::AddNode => self.mutate_add_node(),
            Mutation::SubNode => self.mutate_sub_node(),
            Mutation::AddConn => self.mutate_add_conn(),
            Mutation::SubConn => self.mutate_sub_conn(false),
            Mutation::ModWeight => self.mutate_mod_weight(),
            Mutation::ModBias => self.mutate_mod_bias(),
            Mutation::ModActivation => self.mutate_mod_activation(),
            Mutation::AddSelfConn => self.mutate_add_self_conn(),
            Mutation::SubSelfConn => self.mutate_sub_self_conn(),
            Mutation::AddGate => self.mutate_add_gate(),
            Mutation::SubGate => self.mutate_sub_gate(),
            Mutation::AddBackConn => self.mutate_add_back_conn(),
            Mutation::SubBackConn => self.mutate_sub_conn(true),
            Mutation::SwapNodes => self.mutate_swap_nodes(),
        };
        if !applied {
            tracing::warn!(?method, "mutation precondition failed, no-op");
        }
        applied
    }

    /// Split a random enabled connection: the old edge is disabled (kept
    /// for lineage), a new hidden node lands strictly between its
    /// endpoints, wired `from -(1)> node -(w)> to`.
    fn mutate_add_node(&mut self) -> bool {
        let candidates: Vec<ConnId> = self
            .conn_order
            .iter()
            .filter(|cid| self.conns[*cid].enabled)
            .copied()
            .collect();
        if candidates.is_empty() {
            return false;
        }
        let cid = candidates[self.rng.index(candidates.len())];
        let (from, to, old_weight, gater) = {
            let c = &self.conns[&cid];
            (c.from, c.to, c.weight, c.gater)
        };
        if gater.is_some() {
            let _ = self.ungate(cid);
        }
        self.conn_mut(cid).enabled = false;

        let node = Node::new(NodeKind::Hidden, Activation::Logistic);
        let id = self.alloc_node(node);
        let at = self.nodes[&to]
            .index
            .min(self.order.len() - self.output)
            .max(self.input);
        self.order.insert(at, id);
        self.reindex();

        let first = self.connect(from, id, Some(1.));
        let second = self.connect(id, to, Some(old_weight));
        if let Some(g) = gater {
            let target = if self.rng.chance(0.5) { first } else { second };
            self.gate(g, target);
        }
        true
    }

    /// Remove a random hidden node, reconnecting its predecessors to its
    /// successors and re-homing the gates its edges carried.
    fn mutate_sub_node(&mut self) -> bool {
        let hidden: Vec<NodeId> = self
            .hidden_ids()
            .iter()
            .filter(|id| self.nodes[id].kind == NodeKind::Hidden)
            .copied()
            .collect();
        if hidden.is_empty() {
            return false;
        }
        let id = hidden[self.rng.index(hidden.len())];

        let (preds, succs, mut orphaned_gaters) = {
            let node = &self.nodes[&id];
            let preds: Vec<NodeId> = node
                .incoming
                .iter()
                .map(|cid| self.conns[cid].from)
                .collect();
            let succs: Vec<NodeId> = node.outgoing.iter().map(|cid| self.conns[cid].to).collect();
            let gaters: Vec<NodeId> = node
                .incoming
                .iter()
                .chain(node.outgoing.iter())
                .filter_map(|cid| self.conns[cid].gater)
                .filter(|g| *g != id)
                .collect();
            (preds, succs, gaters)
        };

        self.remove_node(id);

        for p in preds {
            for &s in &succs {
                if p == s || self.is_connected(p, s) {
                    continue;
                }
                if self.acyclic && self.nodes[&p].index >= self.nodes[&s].index {
                    continue;
                }
                let cid = self.connect(p, s, None);
                if let Some(g) = orphaned_gaters.pop() {
                    self.gate(g, cid);
                }
            }
        }
        true
    }

    fn mutate_add_conn(&mut self) -> bool {
        let n = self.order.len();
        let mut pairs: Vec<(NodeId, NodeId)> = Vec::new();
        for i in 0..n {
            for j in (i + 1).max(self.input)..n {
                let (from, to) = (self.order[i], self.order[j]);
                if !self.is_connected(from, to) {
                    pairs.push((from, to));
                }
            }
        }
        if pairs.is_empty() {
            return false;
        }
        let (from, to) = pairs[self.rng.index(pairs.len())];
        self.connect(from, to, None);
        true
    }

    /// Remove a random forward (or, with `back`, recurrent) connection
    /// whose removal leaves both endpoints otherwise wired.
    fn mutate_sub_conn(&mut self, back: bool) -> bool {
        let candidates: Vec<ConnId> = self
            .conn_order
            .iter()
            .filter(|cid| {
                let c = &self.conns[*cid];
                let recurrent = self.nodes[&c.from].index >= self.nodes[&c.to].index;
                recurrent == back
                    && self.nodes[&c.from].outgoing.len() > 1
                    && self.nodes[&c.to].incoming.len() > 1
            })
            .copied()
            .collect();
        if candidates.is_empty() {
            return false;
        }
        let cid = candidates[self.rng.index(candidates.len())];
        self.remove_conn(cid);
        true
    }

    fn mutate_mod_weight(&mut self) -> bool {
        let candidates: Vec<ConnId> = self.connection_ids().collect();
        if candidates.is_empty() {
            return false;
        }
        let cid = candidates[self.rng.index(candidates.len())];
        let nudge = self.rng.uniform(-1., 1.);
        self.conn_mut(cid).weight += nudge;
        true
    }

    fn mutate_mod_bias(&mut self) -> bool {
        let candidates = self.parametric_nodes();
        if candidates.is_empty() {
            return false;
        }
        let id = candidates[self.rng.index(candidates.len())];
        let nudge: f64 = self.rng.sample(StandardNormal);
        self.node_mut(id).bias += nudge;
        true
    }

    fn mutate_mod_activation(&mut self) -> bool {
        let candidates = self.parametric_nodes();
        if candidates.is_empty() {
            return false;
        }
        let id = candidates[self.rng.index(candidates.len())];
        let current = self.nodes[&id].squash;
        let pool: Vec<Activation> = Activation::ALL
            .iter()
            .filter(|a| **a != current)
            .copied()
            .collect();
        let squash = pool[self.rng.index(pool.len())];
        self.node_mut(id).squash = squash;
        true
    }

    fn mutate_add_self_conn(&mut self) -> bool {
        if self.acyclic {
            return false;
        }
        let candidates: Vec<NodeId> = self.order[self.input..]
            .iter()
            .filter(|id| self.nodes[id].self_conn.is_none())
            .copied()
            .collect();
        if candidates.is_empty() {
            return false;
        }
        let id = candidates[self.rng.index(candidates.len())];
        self.connect(id, id, None);
        true
    }

    fn mutate_sub_self_conn(&mut self) -> bool {
        if self.self_order.is_empty() {
            return false;
        }
        let cid = self.self_order[self.rng.index(self.self_order.len())];
        self.remove_conn(cid);
        true
    }

    fn mutate_add_gate(&mut self) -> bool {
        let ungated: Vec<ConnId> = self
            .connection_ids()
            .filter(|cid| self.conns[cid].gater.is_none())
            .collect();
        let gaters = self.parametric_nodes();
        if ungated.is_empty() || gaters.is_empty() {
            return false;
        }
        let cid = ungated[self.rng.index(ungated.len())];
        let gater = gaters[self.rng.index(gaters.len())];
        self.gate(gater, cid);
        true
    }

    fn mutate_sub_gate(&mut self) -> bool {
        if self.gate_order.is_empty() {
            return false;
        }
        let cid = self.gate_order[self.rng.index(self.gate_order.len())];
        self.ungate(cid).is_ok()
    }

    fn mutate_add_back_conn(&mut self) -> bool {
        if self.acyclic {
            return false;
        }
        let n = self.order.len();
        let mut pairs: Vec<(NodeId, NodeId)> = Vec::new();
        for i in self.input..n {
            for j in self.input..i {
                let (from, to) = (self.order[i], self.order[j]);
                if !self.is_connected(from, to) {
                    pairs.push((from, to));
                }
            }
        }
        if pairs.is_empty() {
            return false;
        }
        let (from, to) = pairs[self.rng.index(pairs.len())];
        self.connect(from, to, None);
        true
    }

    fn mutate_swap_nodes(&mut self) -> bool {
        let candidates = self.parametric_nodes();
        if candidates.len() < 2 {
            return false;
        }
        let a = candidates[self.rng.index(candidates.len())];
        let b = loop {
            let pick = candidates[self.rng.index(candidates.len())];
            if pick != a {
                break pick;
            }
        };
        let (bias_a, squash_a) = (self.nodes[&a].bias, self.nodes[&a].squash);
        let (bias_b, squash_b) = (self.nodes[&b].bias, self.nodes[&b].squash);
        {
            let node = self.node_mut(a);
            node.bias = bias_b;
            node.squash = squash_b;
        }
        {
            let node = self.node_mut(b);
            node.bias = bias_a;
            node.squash = squash_a;
        }
        true
    }

    /// Hidden and output nodes: the ones carrying a trainable bias and
    /// squash.
    fn parametric_nodes(&self) -> Vec<NodeId> {
        self.order[self.input..]
            .iter()
            .filter(|id| {
                matches!(self.nodes[id].kind, NodeKind::Hidden | NodeKind::Output)
            })
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_wiring_sound(net: &Network) {
        for cid in net.connection_ids() {
            let c = net.conn(cid);
            assert!(net.order.contains(&c.from), "dangling from");
            assert!(net.order.contains(&c.to), "dangling to");
            if let Some(g) = c.gater {
                assert!(net.order.contains(&g), "dangling gater");
                assert!(net.node(g).gated.contains(&cid));
            }
        }
        for (pos, id) in net.order.iter().enumerate() {
            assert_eq!(net.node(*id).index, pos);
            for cid in &net.node(*id).incoming {
                assert_eq!(net.conn(*cid).to, *id);
            }
            for cid in &net.node(*id).outgoing {
                assert_eq!(net.conn(*cid).from, *id);
            }
            if let Some(sc) = net.node(*id).self_conn {
                assert_eq!(net.conn(sc).from, *id);
                assert_eq!(net.conn(sc).to, *id);
            }
        }
    }

    #[test]
    fn test_add_node_splits_a_connection() {
        let mut net = Network::with_seed(2, 1, 10);
        let conns_before = net.conn_count();
        assert!(net.mutate(Mutation::AddNode));
        assert_eq!(net.hidden_count(), 1);
        // one disabled original plus two fresh edges
        assert_eq!(net.conn_count(), conns_before + 2);
        let disabled: Vec<_> = net
            .connection_ids()
            .filter(|cid| !net.conn(*cid).enabled)
            .collect();
        assert_eq!(disabled.len(), 1);
        let h = net.hidden_ids()[0];
        assert!(net.node(h).index > 0);
        assert!(net.node(h).index < net.node_count() - 1);
        // split weights: 1 into the new node, the old weight out of it
        let into = net.node(h).incoming[0];
        assert_eq!(net.conn(into).weight, 1.);
        assert_wiring_sound(&net);
    }

    #[test]
    fn test_sub_node_reconnects_around_removal() {
        let mut net = Network::with_seed(2, 2, 20);
        assert!(net.mutate(Mutation::AddNode));
        assert!(net.mutate(Mutation::SubNode));
        assert_eq!(net.hidden_count(), 0);
        assert_wiring_sound(&net);
        // inputs reach outputs again
        for id in net.output_ids() {
            assert!(!net.node(*id).incoming.is_empty());
        }
    }

    #[test]
    fn test_sub_node_requires_hidden() {
        let mut net = Network::with_seed(2, 1, 30);
        assert!(!net.mutate(Mutation::SubNode));
    }

    #[test]
    fn test_add_conn_only_creates_forward_edges() {
        let mut net = Network::with_seed(2, 1, 40);
        net.mutate(Mutation::AddNode);
        // saturate: keep adding until no pair is open
        let mut guard = 0;
        while net.mutate(Mutation::AddConn) {
            guard += 1;
            assert!(guard < 50, "runaway add_conn");
        }
        for cid in net.connection_ids() {
            let c = net.conn(cid);
            assert!(net.node(c.from).index < net.node(c.to).index);
        }
        assert_wiring_sound(&net);
    }

    #[test]
    fn test_sub_conn_never_orphans_endpoints() {
        let mut net = Network::with_seed(3, 2, 50);
        for _ in 0..10 {
            net.mutate(Mutation::SubConn);
        }
        for id in net.output_ids() {
            assert!(!net.node(*id).incoming.is_empty(), "orphaned output");
        }
        for id in &net.order[..net.input] {
            assert!(!net.node(*id).outgoing.is_empty(), "orphaned input");
        }
        assert_wiring_sound(&net);
    }

    #[test]
    fn test_mod_weight_and_bias_shift_parameters() {
        let mut net = Network::with_seed(2, 1, 60);
        let weights: Vec<f64> = net.connection_ids().map(|c| net.conn(c).weight).collect();
        assert!(net.mutate(Mutation::ModWeight));
        let after: Vec<f64> = net.connection_ids().map(|c| net.conn(c).weight).collect();
        assert_ne!(weights, after);

        let biases: Vec<f64> = net.order.iter().map(|id| net.node(*id).bias).collect();
        assert!(net.mutate(Mutation::ModBias));
        let after: Vec<f64> = net.order.iter().map(|id| net.node(*id).bias).collect();
        assert_ne!(biases, after);
    }

    #[test]
    fn test_mod_activation_changes_squash() {
        let mut net = Network::with_seed(2, 1, 70);
        let before = net.node(net.output_ids()[0]).squash;
        assert!(net.mutate(Mutation::ModActivation));
        let after = net.node(net.output_ids()[0]).squash;
        assert_ne!(before, after);
    }

    #[test]
    fn test_self_conn_lifecycle() {
        let mut net = Network::with_seed(2, 1, 80);
        assert!(net.mutate(Mutation::AddSelfConn));
        assert_eq!(net.self_order.len(), 1);
        // only one non-input node, so a second add has no candidates
        assert!(!net.mutate(Mutation::AddSelfConn));
        assert!(net.mutate(Mutation::SubSelfConn));
        assert_eq!(net.self_order.len(), 0);
        assert!(!net.mutate(Mutation::SubSelfConn));
        assert_wiring_sound(&net);
    }

    #[test]
    fn test_acyclic_blocks_recurrence() {
        let mut net = Network::with_seed(2, 1, 90);
        net.acyclic = true;
        assert!(!net.mutate(Mutation::AddSelfConn));
        assert!(!net.mutate(Mutation::AddBackConn));
    }

    #[test]
    fn test_gate_lifecycle() {
        let mut net = Network::with_seed(2, 1, 100);
        net.mutate(Mutation::AddNode);
        assert!(net.mutate(Mutation::AddGate));
        assert_eq!(net.gate_count(), 1);
        assert!(net.mutate(Mutation::SubGate));
        assert_eq!(net.gate_count(), 0);
        assert!(!net.mutate(Mutation::SubGate));
        assert_wiring_sound(&net);
    }

    #[test]
    fn test_back_conn_lifecycle() {
        let mut net = Network::with_seed(2, 1, 110);
        net.mutate(Mutation::AddNode);
        assert!(net.mutate(Mutation::AddBackConn));
        let backs: Vec<_> = net
            .conn_order
            .iter()
            .filter(|cid| {
                let c = net.conn(**cid);
                net.node(c.from).index >= net.node(c.to).index
            })
            .collect();
        assert!(!backs.is_empty());
        assert_wiring_sound(&net);
    }

    #[test]
    fn test_swap_nodes_exchanges_bias_and_squash() {
        let mut net = Network::with_seed(2, 2, 120);
        let ids: Vec<NodeId> = net.output_ids().to_vec();
        net.node_mut(ids[0]).bias = 1.;
        net.node_mut(ids[1]).bias = -1.;
        net.node_mut(ids[0]).squash = Activation::Tanh;
        net.node_mut(ids[1]).squash = Activation::Relu;
        assert!(net.mutate(Mutation::SwapNodes));
        let biases: Vec<f64> = ids.iter().map(|id| net.node(*id).bias).collect();
        assert_eq!(
            {
                let mut sorted = biases.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                sorted
            },
            vec![-1., 1.]
        );
        assert_ne!(net.node(ids[0]).bias, 1.);
    }

    #[test]
    fn test_mutation_storm_keeps_invariants() {
        let mut net = Network::with_seed(3, 2, 1234);
        let methods = Mutation::ALL;
        for i in 0..300 {
            let method = methods[i % methods.len()];
            net.mutate(method);
        }
        assert_wiring_sound(&net);
        // the genome still activates
        let out = net.activate(&[0.1, 0.2, 0.3], false).unwrap();
        assert_eq!(out.len(), 2);
        for v in out {
            assert!(v.is_finite());
        }
    }
}
