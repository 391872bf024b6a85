//! Comparison of an output histogram file against a reference.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use agc_core::Result;

use crate::output::{HistogramFile, HistogramRecord};

/// Relative tolerance on contents.
pub const CONTENTS_RTOL: f64 = 1e-3;
/// Absolute tolerance on contents.
pub const CONTENTS_ATOL: f64 = 1e-3;
/// Default relative tolerance, used for edges.
pub const DEFAULT_RTOL: f64 = 1e-5;
/// Default absolute tolerance, used for edges.
pub const DEFAULT_ATOL: f64 = 1e-8;

/// Reference entries containing this are not checked.
const SKIPPED: &str = "pseudodata";
/// Contents of these histograms depend on random smearing.
const RANDOM_CONTENTS: &str = "pt_res_up";

/// `|a - b| <= atol + rtol * |b|` element-wise; different lengths never match.
pub fn allclose(a: &[f64], b: &[f64], rtol: f64, atol: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= atol + rtol * y.abs())
}

/// Outcome of a validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Messages per histogram name.
    pub errors: BTreeMap<String, Vec<String>>,
    /// Largest absolute content difference per mismatching histogram.
    pub discrepancies: BTreeMap<String, f64>,
}

impl ValidationReport {
    /// No mismatch at all.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Human-readable report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.is_ok() {
            out.push_str("All good!\n");
            return out;
        }
        for (name, errors) in &self.errors {
            let _ = writeln!(out, "{name}\n\t{}", errors.join("\n\t"));
        }
        let _ = writeln!(out, "Summary for tolerance {}%", CONTENTS_RTOL * 100.0);
        for (name, d) in &self.discrepancies {
            let _ = writeln!(out, "{name:<50} {d:<5}");
        }
        out
    }
}

fn fmt_values(v: &[f64]) -> String {
    let items: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// Check every reference entry against `histos`.
///
/// A reference name missing from `histos` is looked up again with a
/// `_nominal` suffix before being reported.
pub fn validate(histos: &HistogramFile, reference: &HistogramFile) -> ValidationReport {
    let mut report = ValidationReport::default();
    for (ref_name, ref_h) in reference {
        if ref_name.contains(SKIPPED) {
            continue;
        }
        let (name, h): (String, &HistogramRecord) = match histos.get(ref_name) {
            Some(h) => (ref_name.clone(), h),
            None => {
                let suffixed = format!("{ref_name}_nominal");
                match histos.get(&suffixed) {
                    Some(h) => (suffixed, h),
                    None => {
                        report.errors.entry(ref_name.clone()).or_default().push("Histogram not found.".into());
                        continue;
                    }
                }
            }
        };

        if !allclose(&h.edges, &ref_h.edges, DEFAULT_RTOL, DEFAULT_ATOL) {
            report.errors.entry(name.clone()).or_default().push(format!(
                "Edges do not match:\n\tgot      {}\n\texpected {}",
                fmt_values(&h.edges),
                fmt_values(&ref_h.edges)
            ));
        }
        let random = name.contains(RANDOM_CONTENTS);
        if !random && !allclose(&h.contents, &ref_h.contents, CONTENTS_RTOL, CONTENTS_ATOL) {
            report.errors.entry(name.clone()).or_default().push(format!(
                "Contents do not match:\n\tgot      {}\n\texpected {}",
                fmt_values(&h.contents),
                fmt_values(&ref_h.contents)
            ));
            let max = if h.contents.len() == ref_h.contents.len() {
                h.contents.iter().zip(&ref_h.contents).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max)
            } else {
                f64::INFINITY
            };
            report.discrepancies.insert(name, max);
        }
    }
    report
}

/// Pretty, key-sorted JSON of a histogram file.
pub fn dump_json(histos: &HistogramFile) -> Result<String> {
    Ok(serde_json::to_string_pretty(histos)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(edges: &[f64], contents: &[f64]) -> HistogramRecord {
        HistogramRecord { edges: edges.to_vec(), contents: contents.to_vec() }
    }

    fn file(entries: &[(&str, HistogramRecord)]) -> HistogramFile {
        entries.iter().map(|(n, r)| (n.to_string(), r.clone())).collect()
    }

    #[test]
    fn identical_files_pass() {
        let f = file(&[("4j1b_ttbar_nominal", rec(&[0.0, 1.0], &[0.0, 5.0, 0.0]))]);
        let report = validate(&f, &f);
        assert!(report.is_ok());
        assert_eq!(report.render(), "All good!\n");
    }

    #[test]
    fn tolerance_and_mismatch() {
        let reference = file(&[("h", rec(&[0.0, 1.0], &[0.0, 1000.0, 0.0]))]);
        let close = file(&[("h", rec(&[0.0, 1.0], &[0.0, 1000.9, 0.0005]))]);
        assert!(validate(&close, &reference).is_ok());

        let far = file(&[("h", rec(&[0.0, 1.0], &[0.0, 1002.0, 0.0]))]);
        let report = validate(&far, &reference);
        assert!(!report.is_ok());
        assert!(report.errors["h"][0].starts_with("Contents do not match"));
        assert_eq!(report.discrepancies["h"], 2.0);
        let text = report.render();
        assert!(text.contains("Summary for tolerance 0.1%"));
    }

    #[test]
    fn nominal_suffix_fallback_and_missing() {
        let reference = file(&[
            ("4j1b_ttbar", rec(&[0.0, 1.0], &[0.0, 1.0, 0.0])),
            ("4j2b_ttbar", rec(&[0.0, 1.0], &[0.0, 1.0, 0.0])),
        ]);
        let histos = file(&[("4j1b_ttbar_nominal", rec(&[0.0, 1.0], &[0.0, 1.0, 0.0]))]);
        let report = validate(&histos, &reference);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors["4j2b_ttbar"], vec!["Histogram not found."]);
    }

    #[test]
    fn skips_pseudodata_and_random_contents() {
        let reference = file(&[
            ("4j1b_pseudodata", rec(&[0.0, 1.0], &[0.0, 1.0, 0.0])),
            ("4j1b_ttbar_pt_res_up", rec(&[0.0, 1.0], &[0.0, 1.0, 0.0])),
        ]);
        let histos = file(&[("4j1b_ttbar_pt_res_up", rec(&[0.0, 1.0], &[0.0, 7.0, 0.0]))]);
        assert!(validate(&histos, &reference).is_ok());

        // Edges are still checked.
        let shifted = file(&[("4j1b_ttbar_pt_res_up", rec(&[0.0, 2.0], &[0.0, 1.0, 0.0]))]);
        let report = validate(&shifted, &reference);
        assert!(report.errors["4j1b_ttbar_pt_res_up"][0].starts_with("Edges do not match"));
        assert!(report.discrepancies.is_empty());
    }

    #[test]
    fn allclose_semantics() {
        assert!(allclose(&[1.0, 2.0], &[1.0, 2.0 + 1e-6], DEFAULT_RTOL, DEFAULT_ATOL));
        assert!(!allclose(&[1.0], &[1.0, 2.0], DEFAULT_RTOL, DEFAULT_ATOL));
    }
}
