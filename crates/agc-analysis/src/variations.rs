//! Systematic variation rules.
//!
//! Label conventions and the variation specs booked on nominal samples.

use agc_frame::VariationSpec;

use crate::config::{AnalysisConfig, WeightVariationRule};
use crate::physics::BTAG_CATEGORIES;

/// Column holding the per-event weight.
pub const WEIGHT_COLUMN: &str = "Weights";

/// Direction of a two-sided variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Upward shift.
    Up,
    /// Downward shift.
    Down,
}

impl Direction {
    /// Both directions, up first.
    pub const BOTH: [Direction; 2] = [Direction::Up, Direction::Down];

    /// Label suffix.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// `{base}_up`, `{base}_down`.
pub fn two_sided(base: &str) -> Vec<String> {
    Direction::BOTH.iter().map(|d| format!("{base}_{}", d.as_str())).collect()
}

/// Two-sided labels for each base, bases in order.
pub fn two_sided_all<S: AsRef<str>>(bases: &[S]) -> Vec<String> {
    bases.iter().flat_map(|b| two_sided(b.as_ref())).collect()
}

/// Jet energy scale and resolution, registered before the object masks.
pub fn jet_pt_variation() -> VariationSpec {
    VariationSpec::new(
        "Jet_pt",
        "{Jet_pt * pt_scale_up(), Jet_pt * jet_pt_resolution(len(Jet_pt))}",
        vec!["pt_scale_up".to_string(), "pt_res_up".to_string()],
    )
}

/// Per-process weight variation from the configuration table, if any.
pub fn process_weight_variation(config: &AnalysisConfig, process: &str) -> Option<VariationSpec> {
    config
        .weight_variations
        .get(process)
        .map(|WeightVariationRule { base, expr }| VariationSpec::new(WEIGHT_COLUMN, expr.as_str(), two_sided(base)))
}

/// B-tag weight variations for the leading selected jets, registered after
/// the event selection.
pub fn btag_variation() -> VariationSpec {
    let bases: Vec<String> = (0..BTAG_CATEGORIES).map(|i| format!("btag_var_{i}")).collect();
    VariationSpec::new(
        WEIGHT_COLUMN,
        format!("{WEIGHT_COLUMN} * btag_weight_variation(Jet_pt[Jet_pt_mask])"),
        two_sided_all(&bases),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_sided_labels() {
        assert_eq!(two_sided("x"), vec!["x_up", "x_down"]);
        assert_eq!(two_sided_all(&["a", "b"]), vec!["a_up", "a_down", "b_up", "b_down"]);
    }

    #[test]
    fn btag_labels_cover_four_categories() {
        let spec = btag_variation();
        assert_eq!(spec.column, WEIGHT_COLUMN);
        assert_eq!(spec.labels.len(), 8);
        assert_eq!(spec.labels[0], "btag_var_0_up");
        assert_eq!(spec.labels[7], "btag_var_3_down");
    }

    #[test]
    fn weight_rule_comes_from_table() {
        let c = AnalysisConfig::default();
        let spec = process_weight_variation(&c, "wjets").unwrap();
        assert_eq!(spec.labels, vec!["scale_var_up", "scale_var_down"]);
        assert!(process_weight_variation(&c, "ttbar").is_none());
    }
}
