//! Modularity accounting: network weight, per-link gains and level scores

use crate::types::{acc_saturated, AccWeight, ACCWEIGHT_MAX};

/// Total network weight: half the level's arc-plus-self mass, so each
/// undirected link is counted once.
pub fn network_weight(self_weights: &[AccWeight], arc_mass: AccWeight) -> AccWeight {
    let selfs: AccWeight = self_weights.iter().sum();
    (selfs + arc_mass) / 2.0
}

/// Per-link modularity contribution of merging `i` with `j` on a symmetric
/// graph: `w(i,j) - weight(i) * weight(j) / 2W`.
pub fn gain_symmetric(w_ij: AccWeight, wt_i: AccWeight, wt_j: AccWeight, w: AccWeight) -> AccWeight {
    saturating(w_ij - wt_i * wt_j / (2.0 * w))
}

/// Per-link merge contribution on an asymmetric graph; uses both directed
/// weights, and the weight-product normalisation is not reduced by 2.
pub fn gain_asymmetric(
    w_ij: AccWeight,
    w_ji: AccWeight,
    wt_i: AccWeight,
    wt_j: AccWeight,
    w: AccWeight,
) -> AccWeight {
    saturating(w_ij + w_ji - wt_i * wt_j / w)
}

/// Modularity contribution of a single item:
/// `selfWeight/W - (weight/W)^2`.
pub fn item_modularity(self_weight: AccWeight, weight: AccWeight, w: AccWeight) -> AccWeight {
    let wr = weight / w;
    self_weight / w - wr * wr
}

/// Clamp an accumulated value to the saturation sentinel on overflow.
pub fn saturating(value: AccWeight) -> AccWeight {
    if acc_saturated(value) {
        ACCWEIGHT_MAX
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::acc_eq;

    #[test]
    fn triangle_network_weight() {
        // Three unit edges halved into six arcs of 0.5.
        let selfs = [0.0, 0.0, 0.0];
        let w = network_weight(&selfs, 3.0);
        assert!(acc_eq(w, 1.5));
    }

    #[test]
    fn triangle_pair_gain_is_positive() {
        // Inside a clean triangle every pairwise merge improves modularity.
        let w = 1.5;
        let g = gain_symmetric(0.5, 1.0, 1.0, w);
        assert!(acc_eq(g, 0.5 - 1.0 / 3.0));
    }

    #[test]
    fn asymmetric_gain_doubles_symmetric_on_mirrored_weights() {
        let w = 1.5;
        let sym = gain_symmetric(0.5, 1.0, 1.0, w);
        let asym = gain_asymmetric(0.5, 0.5, 1.0, 1.0, w);
        assert!(acc_eq(asym, 2.0 * sym));
    }

    #[test]
    fn whole_graph_cluster_scores_zero() {
        // A cluster holding the entire network has selfWeight = weight = W.
        let q = item_modularity(1.5, 1.5, 1.5);
        assert!(acc_eq(q, 0.0));
    }

    #[test]
    fn overflow_saturates() {
        assert_eq!(saturating(f64::INFINITY), ACCWEIGHT_MAX);
        assert_eq!(saturating(f64::NAN.abs()), ACCWEIGHT_MAX);
        assert!(acc_eq(saturating(2.0), 2.0));
    }
}
