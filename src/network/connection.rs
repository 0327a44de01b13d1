//! A directed weighted edge between two nodes, with the optional gater and
//! the trace/optimizer slots backpropagation leans on.

use crate::optimizer::Moments;

use super::NodeId;

/// Innovation identity for an edge between the topological positions
/// `from` and `to` at creation time. Cantor pairing: injective and stable,
/// so homologous edges in independently evolved genomes share an id without
/// any coordination.
pub fn innovation_id(from: usize, to: usize) -> u64 {
    let (f, t) = (from as u64, to as u64);
    (f + t) * (f + t + 1) / 2 + t
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub from: NodeId,
    pub to: NodeId,
    pub weight: f64,
    /// Effective-weight multiplier. 1 unless a gater is present, in which
    /// case the gater's activation lands here on every forward pass.
    pub gain: f64,
    pub gater: Option<NodeId>,
    /// Disabled edges skip the forward pass but stay in the genome for
    /// lineage and possible re-enablement.
    pub enabled: bool,
    pub innovation: u64,
    pub(crate) eligibility: f64,
    /// Extended trace: per gater node, the accumulated derivative of the
    /// target's state with respect to that gater's activation.
    pub(crate) xtrace: Vec<(NodeId, f64)>,
    pub(crate) previous_delta_weight: f64,
    pub(crate) total_delta_weight: f64,
    pub(crate) moments: Moments,
    /// DropConnect mask, multiplicative over the effective weight.
    pub(crate) dc_mask: f64,
}

impl Connection {
    pub fn new(from: NodeId, to: NodeId, weight: f64, innovation: u64) -> Self {
        Self {
            from,
            to,
            weight,
            gain: 1.,
            gater: None,
            enabled: true,
            innovation,
            eligibility: 0.,
            xtrace: Vec::new(),
            previous_delta_weight: 0.,
            total_delta_weight: 0.,
            moments: Moments::default(),
            dc_mask: 1.,
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    /// Zero traces and optimizer scratch; weight, gater, and enablement are
    /// structure and survive.
    pub(crate) fn reset_state(&mut self) {
        self.eligibility = 0.;
        self.xtrace.clear();
        self.previous_delta_weight = 0.;
        self.total_delta_weight = 0.;
        self.moments.reset();
        self.dc_mask = 1.;
        if self.gater.is_none() {
            self.gain = 1.;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_innovation_pairing_is_injective() {
        let mut seen = HashSet::new();
        for from in 0..60 {
            for to in 0..60 {
                assert!(
                    seen.insert(innovation_id(from, to)),
                    "collision at ({from}, {to})"
                );
            }
        }
    }

    #[test]
    fn test_innovation_is_direction_sensitive() {
        assert_ne!(innovation_id(2, 5), innovation_id(5, 2));
        assert_eq!(innovation_id(3, 4), innovation_id(3, 4));
    }

    #[test]
    fn test_reset_preserves_structure() {
        let mut conn = Connection::new(NodeId(0), NodeId(1), 0.75, innovation_id(0, 1));
        conn.eligibility = 3.;
        conn.xtrace.push((NodeId(2), 0.5));
        conn.enabled = false;
        conn.reset_state();
        assert_eq!(conn.weight, 0.75);
        assert!(!conn.enabled);
        assert_eq!(conn.eligibility, 0.);
        assert!(conn.xtrace.is_empty());
    }
}
