//! Homologous crossover and genomic compatibility distance.
//!
//! Both operate on innovation-sorted gene views of the parents, walking the
//! two lists in lockstep the way a merge does: matching innovations zip,
//! disjoint and excess genes hang off whichever side runs ahead.

use rand::RngCore;

use crate::{
    activation::Activation,
    error::{Error, Result},
    random::WyRng,
};

use super::{Network, Node, NodeKind};

/// Probability that a gene disabled in either parent comes back enabled in
/// the offspring.
const REENABLE_PROB: f64 = 0.25;

/// A connection flattened to topological positions, the currency of
/// alignment between two genomes.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Gene {
    innovation: u64,
    from: usize,
    to: usize,
    weight: f64,
    gater: Option<usize>,
    enabled: bool,
}

fn genes(net: &Network) -> Vec<Gene> {
    let mut out: Vec<Gene> = Vec::with_capacity(net.conn_count());
    for cid in net.connection_ids() {
        let c = net.conn(cid);
        out.push(Gene {
            innovation: c.innovation,
            from: net.node(c.from).index,
            to: net.node(c.to).index,
            weight: c.weight,
            gater: c.gater.map(|g| net.node(g).index),
            enabled: c.enabled,
        });
    }
    out.sort_by_key(|g| g.innovation);
    // position drift can alias two edges onto one innovation; keep the
    // enabled one so alignment stays 1:1
    out.dedup_by(|a, b| {
        if a.innovation == b.innovation {
            if !b.enabled && a.enabled {
                *b = *a;
            }
            true
        } else {
            false
        }
    });
    out
}

/// Node parameters at one topological position.
#[derive(Debug, Clone, Copy)]
struct NodeView {
    kind: NodeKind,
    bias: f64,
    squash: Activation,
    activation: f64,
}

fn node_view(net: &Network, pos: usize) -> NodeView {
    let node = net.node(net.node_order()[pos]);
    NodeView {
        kind: node.kind,
        bias: node.bias,
        squash: node.squash,
        activation: node.activation,
    }
}

impl Network {
    /// Offspring of two parents by innovation alignment. Inputs and outputs
    /// come from the fitter parent, hidden positions are sampled per
    /// position, matching genes are picked 50/50, and disjoint/excess genes
    /// follow the fitter parent (both parents when fitness is equal).
    pub fn crossover(
        a: &Network,
        b: &Network,
        equal: bool,
        rng: &mut impl RngCore,
    ) -> Result<Network> {
        if a.input != b.input || a.output != b.output {
            return Err(Error::ArchMismatch {
                a_input: a.input,
                a_output: a.output,
                b_input: b.input,
                b_output: b.output,
            });
        }

        let mut rng = WyRng::seeded(rng.next_u64());
        let equal_fit = equal || a.score == b.score;
        let a_fitter = a.score.unwrap_or(f64::MIN) >= b.score.unwrap_or(f64::MIN);
        let (fitter, weaker) = if a_fitter { (a, b) } else { (b, a) };

        let size = if equal_fit {
            let lo = a.node_count().min(b.node_count());
            let hi = a.node_count().max(b.node_count());
            lo + rng.index(hi - lo + 1)
        } else {
            fitter.node_count()
        };

        let mut child = Network::empty(a.input, a.output, rng.next_u64());

        // output parameters from the fitter parent
        for o in 0..child.output {
            let view = node_view(fitter, fitter.node_count() - fitter.output + o);
            let id = child.node_order()[child.input + o];
            let node = child.node_mut(id);
            node.bias = view.bias;
            node.squash = view.squash;
        }

        // hidden positions, sampled per position from whichever parent has
        // a node there
        for pos in child.input..size - child.output {
            let in_fitter = pos < fitter.node_count() - fitter.output;
            let in_weaker = pos < weaker.node_count() - weaker.output;
            let view = match (in_fitter, in_weaker) {
                (true, true) => {
                    if rng.chance(0.5) {
                        node_view(fitter, pos)
                    } else {
                        node_view(weaker, pos)
                    }
                }
                (true, false) => node_view(fitter, pos),
                (false, true) => node_view(weaker, pos),
                (false, false) => unreachable!("position beyond both parents"),
            };
            let kind = match view.kind {
                NodeKind::Constant => NodeKind::Constant,
                _ => NodeKind::Hidden,
            };
            let mut node = Node::new(kind, view.squash);
            node.bias = view.bias;
            if kind == NodeKind::Constant {
                node.activation = view.activation;
            }
            let id = child.alloc_node(node);
            let at = child.node_count() - child.output;
            child.order.insert(at, id);
        }
        child.reindex();

        // align connection genes by innovation
        let genes_f = genes(fitter);
        let genes_w = genes(weaker);
        let mut chosen: Vec<(Gene, bool)> = Vec::with_capacity(genes_f.len());
        let (mut fi, mut wi) = (0, 0);
        loop {
            match (genes_f.get(fi), genes_w.get(wi)) {
                (None, None) => break,
                (Some(f), None) => {
                    chosen.push((*f, !f.enabled));
                    fi += 1;
                }
                (None, Some(w)) => {
                    if equal_fit {
                        chosen.push((*w, !w.enabled));
                    }
                    wi += 1;
                }
                (Some(f), Some(w)) => {
                    if f.innovation == w.innovation {
                        let pick = if rng.chance(0.5) { f } else { w };
                        chosen.push((*pick, !f.enabled || !w.enabled));
                        fi += 1;
                        wi += 1;
                    } else if f.innovation < w.innovation {
                        chosen.push((*f, !f.enabled));
                        fi += 1;
                    } else {
                        if equal_fit {
                            chosen.push((*w, !w.enabled));
                        }
                        wi += 1;
                    }
                }
            }
        }

        for (gene, was_disabled) in chosen {
            if gene.from >= size || gene.to >= size {
                continue;
            }
            let from = child.node_order()[gene.from];
            let to = child.node_order()[gene.to];
            if child.is_connected(from, to) {
                continue;
            }
            let cid = child.connect(from, to, Some(gene.weight));
            child.conn_mut(cid).innovation = gene.innovation;
            child.conn_mut(cid).enabled = if was_disabled {
                rng.chance(REENABLE_PROB)
            } else {
                true
            };
            if let Some(g) = gene.gater {
                if g < size {
                    let gater = child.node_order()[g];
                    child.gate(gater, cid);
                }
            }
        }

        child.rng = rng;
        Ok(child)
    }

    /// NEAT compatibility distance: weighted disjoint/excess counts over the
    /// longer genome plus the mean weight difference of matching genes.
    pub fn distance(a: &Network, b: &Network, excess_c: f64, disjoint_c: f64, weight_c: f64) -> f64 {
        let genes_a = genes(a);
        let genes_b = genes(b);
        let longest = genes_a.len().max(genes_b.len()) as f64;
        let normalizer = if longest < 20. { 1. } else { longest };
        if genes_a.is_empty() || genes_b.is_empty() {
            return excess_c * longest / normalizer;
        }

        let (mut ai, mut bi) = (0, 0);
        let mut disjoint = 0.;
        let mut excess = 0.;
        let mut weight_diff = 0.;
        let mut matching = 0.;
        loop {
            match (genes_a.get(ai), genes_b.get(bi)) {
                (None, None) => break,
                (Some(_), None) | (None, Some(_)) => {
                    excess += 1.;
                    ai += 1;
                    bi += 1;
                }
                (Some(ga), Some(gb)) => {
                    if ga.innovation == gb.innovation {
                        weight_diff += (ga.weight - gb.weight).abs();
                        matching += 1.;
                        ai += 1;
                        bi += 1;
                    } else if ga.innovation < gb.innovation {
                        disjoint += 1.;
                        ai += 1;
                    } else {
                        disjoint += 1.;
                        bi += 1;
                    }
                }
            }
        }

        let avg_weight_diff = if matching > 0. {
            weight_diff / matching
        } else {
            0.
        };
        (excess_c * excess + disjoint_c * disjoint) / normalizer + weight_c * avg_weight_diff
    }
}
