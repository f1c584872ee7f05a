//! Scalar types shared by the whole crate

/// Node and cluster identifier, up to 4G items.
pub type Id = u32;

/// Reserved [`Id`] value marking an uninitialized instance.
pub const ID_NONE: Id = Id::MAX;

/// Raw link weight as supplied by the caller.
pub type Weight = f32;

/// Default link weight on the unweighted path.
pub const DEFAULT_WEIGHT: Weight = 1.0;

/// Accumulated weight: sums of link weights, gains and modularity.
/// Always 64-bit so that accumulation over large graphs stays exact enough.
pub type AccWeight = f64;

/// Reserved [`AccWeight`] value for uninitialized instances.
pub const ACCWEIGHT_NONE: AccWeight = f64::MIN;

/// Max value of [`AccWeight`], internally doubling as the saturation flag.
pub const ACCWEIGHT_MAX: AccWeight = f64::MAX;

/// Share of a descendant item in an owner, in (0, 1].
pub type Share = f64;

/// Relative tolerance for near-equality of accumulated weights.
///
/// Accumulated sums drift by a few ulps per addition; comparisons of gains
/// and weights must treat such drift as equality or tie-breaking becomes
/// unstable under reordering.
const ACC_EPSILON: AccWeight = 1e-9;

/// Whether two accumulated weights are equal up to round-off.
pub fn acc_eq(a: AccWeight, b: AccWeight) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= ACC_EPSILON * scale
}

/// Whether `a` is strictly less than `b` beyond round-off.
pub fn acc_less(a: AccWeight, b: AccWeight) -> bool {
    !acc_eq(a, b) && a < b
}

/// Whether an accumulated weight is strictly positive beyond round-off.
pub fn acc_positive(a: AccWeight) -> bool {
    acc_less(0.0, a)
}

/// Whether an accumulated weight has saturated.
pub fn acc_saturated(a: AccWeight) -> bool {
    !a.is_finite() || a >= ACCWEIGHT_MAX
}
