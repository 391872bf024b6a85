//! Fixed-binning 1D histogram with explicit under/overflow buckets.
//!
//! Storage follows the ROOT convention: `contents[0]` is the underflow
//! bucket, `contents[1..=n]` are the in-range bins and `contents[n + 1]` is
//! the overflow bucket, so `contents.len() == edges.len() + 1` always holds.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A 1D histogram with `n` bins, `n + 1` edges and `n + 2` content cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Histogram name.
    pub name: String,
    /// Bin edges, strictly increasing (length = n_bins + 1).
    pub edges: Vec<f64>,
    /// Sum of weights per cell, including underflow (index 0) and overflow (last).
    pub contents: Vec<f64>,
    /// Sum of squared weights per cell, same layout as `contents`.
    pub sumw2: Vec<f64>,
}

impl Histogram {
    /// Create an empty histogram over explicit edges.
    pub fn new(name: impl Into<String>, edges: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if edges.len() < 2 {
            return Err(Error::Histogram(format!(
                "histogram '{name}' needs at least 2 edges, got {}",
                edges.len()
            )));
        }
        if edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(Error::Histogram(format!(
                "histogram '{name}' edges must be strictly increasing"
            )));
        }
        let n_cells = edges.len() + 1;
        Ok(Self { name, edges, contents: vec![0.0; n_cells], sumw2: vec![0.0; n_cells] })
    }

    /// Create an empty histogram with `n_bins` equal-width bins over `[low, high)`.
    pub fn uniform(name: impl Into<String>, n_bins: usize, low: f64, high: f64) -> Result<Self> {
        let name = name.into();
        if n_bins == 0 || !(low < high) {
            return Err(Error::Histogram(format!(
                "histogram '{name}': invalid binning ({n_bins} bins over [{low}, {high}))"
            )));
        }
        let width = (high - low) / n_bins as f64;
        let mut edges: Vec<f64> = (0..n_bins).map(|i| low + i as f64 * width).collect();
        edges.push(high);
        Self::new(name, edges)
    }

    /// Number of in-range bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Cell index for `x`: 0 for underflow, `n_bins + 1` for overflow.
    ///
    /// NaN lands in the overflow bucket, matching ROOT's `TAxis::FindBin`.
    pub fn find_bin(&self, x: f64) -> usize {
        let n = self.n_bins();
        if x < self.edges[0] {
            return 0;
        }
        if !(x < self.edges[n]) {
            return n + 1;
        }
        // First edge strictly greater than x; x is in the bin just before it.
        self.edges.partition_point(|&e| e <= x)
    }

    /// Add one entry with weight `w`.
    pub fn fill(&mut self, x: f64, w: f64) {
        let bin = self.find_bin(x);
        self.contents[bin] += w;
        self.sumw2[bin] += w * w;
    }

    /// Cell content, where 0 is underflow and `n_bins + 1` is overflow.
    pub fn bin_content(&self, cell: usize) -> f64 {
        self.contents[cell]
    }

    /// Sum of all cells, under/overflow included.
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    /// Add `other` bin-by-bin. Binnings must match exactly.
    pub fn add(&mut self, other: &Histogram) -> Result<()> {
        if self.edges != other.edges {
            return Err(Error::Histogram(format!(
                "cannot add '{}' to '{}': binning differs",
                other.name, self.name
            )));
        }
        for (a, b) in self.contents.iter_mut().zip(&other.contents) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        Ok(())
    }

    /// Restrict the histogram to the bins spanning `[low, high)`.
    ///
    /// The new range starts at the bin containing `low` and ends before the
    /// bin containing `high`. Content of the removed low-side cells moves to
    /// the underflow bucket and content of the removed high-side cells to the
    /// overflow bucket, so the integral is unchanged. A `low` below the
    /// first edge is clamped to the first bin, as ROOT's `Slice` does.
    pub fn slice(&self, low: f64, high: f64) -> Result<Histogram> {
        let n = self.n_bins();
        let first = self.find_bin(low).max(1);
        let last = self.find_bin(high);
        if first > n || last <= first {
            return Err(Error::Histogram(format!(
                "cannot slice '{}' to [{low}, {high}): window outside [{}, {}]",
                self.name,
                self.edges[0],
                self.edges[n]
            )));
        }

        let edges = self.edges[first - 1..last].to_vec();
        let take = |cells: &[f64]| -> Vec<f64> {
            let mut out = Vec::with_capacity(last - first + 2);
            out.push(cells[..first].iter().sum());
            out.extend_from_slice(&cells[first..last]);
            out.push(cells[last..].iter().sum());
            out
        };

        Ok(Histogram {
            name: self.name.clone(),
            edges,
            contents: take(&self.contents),
            sumw2: take(&self.sumw2),
        })
    }

    /// Merge each group of `factor` consecutive bins into one.
    ///
    /// Under/overflow buckets are carried over unchanged. The bin count must
    /// be divisible by `factor`.
    pub fn rebin(&self, factor: usize) -> Result<Histogram> {
        let n = self.n_bins();
        if factor == 0 || n % factor != 0 {
            return Err(Error::Histogram(format!(
                "cannot rebin '{}' ({n} bins) by factor {factor}",
                self.name
            )));
        }

        let edges: Vec<f64> = self.edges.iter().step_by(factor).copied().collect();
        let group = |cells: &[f64]| -> Vec<f64> {
            let mut out = Vec::with_capacity(n / factor + 2);
            out.push(cells[0]);
            out.extend(cells[1..=n].chunks(factor).map(|c| c.iter().sum::<f64>()));
            out.push(cells[n + 1]);
            out
        };

        Ok(Histogram {
            name: self.name.clone(),
            edges,
            contents: group(&self.contents),
            sumw2: group(&self.sumw2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn agc_binning() -> Histogram {
        let mut h = Histogram::uniform("4j1b_ttbar_nominal", 25, 50.0, 550.0).unwrap();
        for (i, c) in h.contents.iter_mut().enumerate() {
            *c = i as f64 + 0.5;
        }
        h
    }

    #[test]
    fn layout_invariant() {
        let h = Histogram::uniform("h", 4, 0.0, 4.0).unwrap();
        assert_eq!(h.edges, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(h.contents.len(), h.edges.len() + 1);
        assert_eq!(h.sumw2.len(), h.contents.len());
    }

    #[test]
    fn rejects_bad_edges() {
        assert!(Histogram::new("h", vec![0.0]).is_err());
        assert!(Histogram::new("h", vec![0.0, 1.0, 1.0]).is_err());
        assert!(Histogram::uniform("h", 0, 0.0, 1.0).is_err());
        assert!(Histogram::uniform("h", 3, 1.0, 1.0).is_err());
    }

    #[test]
    fn find_bin_edges() {
        let h = Histogram::uniform("h", 3, 0.0, 3.0).unwrap();
        assert_eq!(h.find_bin(-0.1), 0);
        assert_eq!(h.find_bin(0.0), 1);
        assert_eq!(h.find_bin(0.99), 1);
        assert_eq!(h.find_bin(1.0), 2);
        assert_eq!(h.find_bin(2.999), 3);
        assert_eq!(h.find_bin(3.0), 4);
        assert_eq!(h.find_bin(f64::NAN), 4);
    }

    #[test]
    fn fill_tracks_flows_and_sumw2() {
        let mut h = Histogram::uniform("h", 2, 0.0, 2.0).unwrap();
        h.fill(-1.0, 2.0);
        h.fill(0.5, 1.5);
        h.fill(0.7, 0.5);
        h.fill(5.0, 3.0);
        assert_eq!(h.contents, vec![2.0, 2.0, 0.0, 3.0]);
        assert_eq!(h.sumw2, vec![4.0, 2.5, 0.0, 9.0]);
    }

    #[test]
    fn add_requires_same_binning() {
        let mut a = Histogram::uniform("a", 2, 0.0, 2.0).unwrap();
        let mut b = Histogram::uniform("b", 2, 0.0, 2.0).unwrap();
        a.fill(0.5, 1.0);
        b.fill(0.5, 2.0);
        b.fill(3.0, 1.0);
        a.add(&b).unwrap();
        assert_eq!(a.contents, vec![0.0, 3.0, 0.0, 1.0]);

        let c = Histogram::uniform("c", 3, 0.0, 2.0).unwrap();
        assert!(a.add(&c).is_err());
    }

    #[test]
    fn slice_moves_removed_bins_into_flows() {
        let h = agc_binning();
        let s = h.slice(120.0, 550.0).unwrap();

        // 120 falls in [110, 130): the window starts at that bin.
        assert_eq!(s.n_bins(), 22);
        assert_relative_eq!(s.edges[0], 110.0, epsilon = 1e-9);
        assert_relative_eq!(s.edges[22], 550.0, epsilon = 1e-9);
        assert_eq!(s.contents.len(), s.edges.len() + 1);

        // underflow = old underflow + old bins 1..=3
        assert_relative_eq!(s.contents[0], 0.5 + 1.5 + 2.5 + 3.5);
        assert_relative_eq!(s.contents[1], 4.5);
        // overflow is untouched because the window ends at the last edge
        assert_relative_eq!(s.contents[23], 26.5);
        assert_relative_eq!(s.integral(), h.integral(), epsilon = 1e-9);
    }

    #[test]
    fn slice_inside_range_fills_overflow() {
        let mut h = Histogram::uniform("h", 4, 0.0, 4.0).unwrap();
        h.contents = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let s = h.slice(1.0, 3.0).unwrap();
        assert_eq!(s.edges, vec![1.0, 2.0, 3.0]);
        assert_eq!(s.contents, vec![3.0, 3.0, 4.0, 11.0]);
    }

    #[test]
    fn slice_rejects_empty_window() {
        let h = Histogram::uniform("h", 4, 0.0, 4.0).unwrap();
        assert!(h.slice(3.0, 1.0).is_err());
        assert!(h.slice(4.0, 9.0).is_err());
        assert!(h.slice(-3.0, -1.0).is_err());
        assert!(h.slice(f64::NAN, 3.0).is_err());
    }

    #[test]
    fn slice_clamps_low_edge_below_range() {
        let mut h = Histogram::uniform("h", 4, 0.0, 4.0).unwrap();
        h.contents = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let s = h.slice(-1.0, 3.0).unwrap();
        assert_eq!(s.edges, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(s.contents, vec![1.0, 2.0, 3.0, 4.0, 11.0]);
    }

    #[test]
    fn rebin_sums_groups() {
        let mut h = Histogram::uniform("h", 4, 0.0, 4.0).unwrap();
        h.contents = vec![10.0, 1.0, 2.0, 3.0, 4.0, 20.0];
        let r = h.rebin(2).unwrap();
        assert_eq!(r.edges, vec![0.0, 2.0, 4.0]);
        assert_eq!(r.contents, vec![10.0, 3.0, 7.0, 20.0]);
        assert!(h.rebin(3).is_err());
        assert!(h.rebin(0).is_err());
    }

    #[test]
    fn slice_then_rebin_preserves_mass() {
        let h = agc_binning();
        let out = h.slice(120.0, 550.0).unwrap().rebin(2).unwrap();
        assert_eq!(out.n_bins(), 11);
        assert_eq!(out.contents.len(), out.edges.len() + 1);
        assert_relative_eq!(out.integral(), h.integral(), epsilon = 1e-9);
    }
}
