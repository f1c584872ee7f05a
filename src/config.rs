//! Engine configuration

/// Options controlling one clustering run.
pub struct ClusterOptions {
    /// Whether links are symmetric (enables the simplified gain formula)
    pub symmetric: bool,

    /// Check and repair link symmetry and weights before starting
    pub validate: bool,

    /// Relax strictly-mutual merging to quasi-mutual (faster)
    pub fast: bool,

    /// Stop once the modularity gain of a pass drops to this margin or
    /// below; exactly -1 also suppresses per-pass diagnostics
    pub mod_profit_margin: f64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            symmetric: true,
            validate: true,
            fast: false,
            mod_profit_margin: -0.999,
        }
    }
}
