//! Physics helpers callable from analysis expressions.
//!
//! [`physics_registry`] extends the builtin function table with the jet
//! energy helpers, the b-tag and flat weight variations and the trijet
//! reconstruction. Workers must build their registry from the same function
//! so that plans resolve identically on every process.

use rand_distr::{Distribution, Normal};

use agc_core::{Error, Result};
use agc_frame::{Arity, EvalContext, FunctionRegistry, Value};

/// Jet energy scale factor for the `pt_scale_up` variation.
pub const PT_SCALE_UP: f64 = 1.03;
/// Relative width of the jet pT resolution smearing.
pub const PT_RESOLUTION: f64 = 0.05;
/// Relative size of the flat weight variation.
pub const FLAT_VARIATION: f64 = 0.025;
/// Per-jet b-tag weight uncertainty at 50 GeV.
pub const BTAG_VARIATION: f64 = 0.075;
/// Number of leading jets with their own b-tag weight variation.
pub const BTAG_CATEGORIES: usize = 4;
/// Score above which a jet flags its trijet as b-tagged.
pub const TRIJET_BTAG_THRESHOLD: f64 = 0.5;

/// Builtins plus every helper of this module.
pub fn physics_registry() -> FunctionRegistry {
    let mut reg = FunctionRegistry::with_builtins();
    reg.register("pt_scale_up", Arity::Exact(0), pt_scale_up);
    reg.register("jet_pt_resolution", Arity::Exact(1), jet_pt_resolution);
    reg.register("flat_variation", Arity::Exact(0), flat_variation);
    reg.register("btag_weight_variation", Arity::Exact(1), btag_weight_variation);
    reg.register("trijet_mass", Arity::Exact(5), trijet_mass_fn);
    reg
}

fn pt_scale_up(_: &[Value], _: &mut EvalContext) -> Result<Value> {
    Ok(Value::Scalar(PT_SCALE_UP))
}

/// One Gaussian factor (mean 1) per jet.
fn jet_pt_resolution(args: &[Value], ctx: &mut EvalContext) -> Result<Value> {
    let n = args[0].as_scalar("jet_pt_resolution")?;
    if n < 0.0 {
        return Err(Error::Execution(format!("jet_pt_resolution: negative size {n}")));
    }
    let normal = Normal::new(1.0, PT_RESOLUTION).map_err(|e| Error::Execution(e.to_string()))?;
    Ok(Value::Vector((0..n as usize).map(|_| normal.sample(ctx.rng())).collect()))
}

fn flat_variation(_: &[Value], _: &mut EvalContext) -> Result<Value> {
    Ok(Value::Vector(vec![1.0 + FLAT_VARIATION, 1.0 - FLAT_VARIATION]))
}

/// Up/down factor pairs for the leading jets: `1 +/- 0.075 * pt / 50`.
fn btag_weight_variation(args: &[Value], _: &mut EvalContext) -> Result<Value> {
    let pt = args[0].as_vector("btag_weight_variation")?;
    let mut out = Vec::with_capacity(2 * BTAG_CATEGORIES);
    for &p in pt.iter().take(BTAG_CATEGORIES) {
        let shift = BTAG_VARIATION * p / 50.0;
        out.push(1.0 + shift);
        out.push(1.0 - shift);
    }
    Ok(Value::Vector(out))
}

fn trijet_mass_fn(args: &[Value], _: &mut EvalContext) -> Result<Value> {
    let pt = args[0].as_vector("trijet_mass")?;
    let eta = args[1].as_vector("trijet_mass")?;
    let phi = args[2].as_vector("trijet_mass")?;
    let mass = args[3].as_vector("trijet_mass")?;
    let btag = args[4].as_vector("trijet_mass")?;
    let n = pt.len();
    if [eta.len(), phi.len(), mass.len(), btag.len()].iter().any(|&l| l != n) {
        return Err(Error::Execution("trijet_mass: jet collections differ in length".into()));
    }
    Ok(Value::Scalar(trijet_mass(pt, eta, phi, mass, btag)))
}

/// Cartesian four-momentum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FourMomentum {
    /// x momentum.
    pub px: f64,
    /// y momentum.
    pub py: f64,
    /// z momentum.
    pub pz: f64,
    /// Energy.
    pub e: f64,
}

impl FourMomentum {
    /// From transverse momentum, pseudorapidity, azimuth and mass.
    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, m: f64) -> Self {
        let (px, py, pz) = (pt * phi.cos(), pt * phi.sin(), pt * eta.sinh());
        let e = (px * px + py * py + pz * pz + m * m).sqrt();
        Self { px, py, pz, e }
    }

    /// Transverse momentum.
    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    /// Invariant mass. Space-like vectors get a negative mass, as in ROOT.
    pub fn mass(&self) -> f64 {
        let m2 = self.e * self.e - (self.px * self.px + self.py * self.py + self.pz * self.pz);
        if m2 < 0.0 { -(-m2).sqrt() } else { m2.sqrt() }
    }
}

impl std::ops::Add for FourMomentum {
    type Output = FourMomentum;

    fn add(self, o: FourMomentum) -> FourMomentum {
        FourMomentum { px: self.px + o.px, py: self.py + o.py, pz: self.pz + o.pz, e: self.e + o.e }
    }
}

/// Mass of the highest-pT trijet containing a b-tagged jet.
///
/// Triples are enumerated in lexicographic index order and a later triple
/// only wins with a strictly larger pT. When no triple is b-tagged the first
/// triple is used. Fewer than three jets give 0.
pub fn trijet_mass(pt: &[f64], eta: &[f64], phi: &[f64], mass: &[f64], btag: &[f64]) -> f64 {
    let n = pt.len();
    if n < 3 {
        return 0.0;
    }
    let p4: Vec<FourMomentum> =
        (0..n).map(|i| FourMomentum::from_pt_eta_phi_m(pt[i], eta[i], phi[i], mass[i])).collect();

    let mut best_pt = 0.0;
    // Stays at the first triple when nothing is flagged.
    let mut best = p4[0] + p4[1] + p4[2];
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let flagged = btag[i].max(btag[j]).max(btag[k]) > TRIJET_BTAG_THRESHOLD;
                if !flagged {
                    continue;
                }
                let sum = p4[i] + p4[j] + p4[k];
                let tpt = sum.pt();
                if best_pt < tpt {
                    best_pt = tpt;
                    best = sum;
                }
            }
        }
    }
    best.mass()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn call(name: &str, args: &[Value]) -> Result<Value> {
        let reg = physics_registry();
        let f = reg.resolve(name, args.len())?;
        (f.eval)(args, &mut EvalContext::seeded(7))
    }

    #[test]
    fn four_momentum_at_rest_and_boosted() {
        let p = FourMomentum::from_pt_eta_phi_m(0.0, 0.0, 0.0, 5.0);
        assert_relative_eq!(p.mass(), 5.0, epsilon = 1e-12);
        let q = FourMomentum::from_pt_eta_phi_m(30.0, 1.2, -0.4, 4.0);
        assert_relative_eq!(q.pt(), 30.0, epsilon = 1e-9);
        assert_relative_eq!(q.mass(), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn trijet_mass_hand_computed() {
        // Massless jets at eta = 0, 90 degrees apart, the fourth one soft.
        let pt = [40.0, 40.0, 40.0, 10.0];
        let eta = [0.0; 4];
        let phi = [0.0, std::f64::consts::FRAC_PI_2, std::f64::consts::PI, -std::f64::consts::FRAC_PI_2];
        let mass = [0.0; 4];
        let btag = [0.9, 0.1, 0.1, 0.1];

        // Candidates containing jet 0: (0,1,2) pT 40, (0,1,3) pT ~50, (0,2,3) pT 10.
        // (0,1,3): p = (40, 30, 0), E = 90 -> m^2 = 8100 - 2500.
        let m = trijet_mass(&pt, &eta, &phi, &mass, &btag);
        assert_relative_eq!(m, 5600f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn unflagged_event_falls_back_to_first_triple() {
        let pt = [50.0, 40.0, 30.0, 60.0];
        let eta = [0.1, -0.3, 0.8, 0.0];
        let phi = [0.0, 2.0, -2.0, 1.0];
        let mass = [5.0, 6.0, 7.0, 8.0];
        let btag = [0.5, 0.2, 0.0, 0.4];

        let p4: Vec<_> = (0..3).map(|i| FourMomentum::from_pt_eta_phi_m(pt[i], eta[i], phi[i], mass[i])).collect();
        let first = (p4[0] + p4[1] + p4[2]).mass();
        assert_relative_eq!(trijet_mass(&pt, &eta, &phi, &mass, &btag), first, epsilon = 1e-12);
    }

    #[test]
    fn ties_keep_the_first_triple() {
        // All triples of four identical jets have the same pT.
        let pt = [30.0; 4];
        let eta = [0.0, 0.5, 1.0, 1.5];
        let phi = [0.0; 4];
        let mass = [0.0; 4];
        let btag = [0.0, 0.0, 0.0, 0.9];
        // Only triples with jet 3 are flagged; (0,1,3) comes first.
        let p4: Vec<_> = (0..4).map(|i| FourMomentum::from_pt_eta_phi_m(pt[i], eta[i], phi[i], mass[i])).collect();
        let expected = (p4[0] + p4[1] + p4[3]).mass();
        assert_relative_eq!(trijet_mass(&pt, &eta, &phi, &mass, &btag), expected, epsilon = 1e-12);
    }

    #[test]
    fn fewer_than_three_jets() {
        assert_eq!(trijet_mass(&[10.0, 20.0], &[0.0; 2], &[0.0; 2], &[0.0; 2], &[1.0; 2]), 0.0);
        let v = |x: Vec<f64>| Value::Vector(x);
        let out = call("trijet_mass", &[v(vec![]), v(vec![]), v(vec![]), v(vec![]), v(vec![])]).unwrap();
        assert_eq!(out, Value::Scalar(0.0));
    }

    #[test]
    fn trijet_requires_matching_lengths() {
        let v = |n: usize| Value::Vector(vec![1.0; n]);
        assert!(call("trijet_mass", &[v(3), v(3), v(2), v(3), v(3)]).is_err());
    }

    #[test]
    fn btag_variation_pairs() {
        let out = call("btag_weight_variation", &[Value::Vector(vec![50.0, 100.0, 25.0, 40.0, 80.0])]).unwrap();
        let Value::Vector(f) = out else { panic!("expected vector") };
        assert_eq!(f.len(), 8);
        assert_relative_eq!(f[0], 1.075);
        assert_relative_eq!(f[1], 0.925);
        assert_relative_eq!(f[2], 1.15);
        assert_relative_eq!(f[3], 0.85);
    }

    #[test]
    fn resolution_is_seeded_and_sized() {
        let a = call("jet_pt_resolution", &[Value::Scalar(5.0)]).unwrap();
        let b = call("jet_pt_resolution", &[Value::Scalar(5.0)]).unwrap();
        assert_eq!(a, b);
        let Value::Vector(f) = a else { panic!("expected vector") };
        assert_eq!(f.len(), 5);
        assert!(f.iter().all(|x| (x - 1.0).abs() < 0.5));
        assert!(call("jet_pt_resolution", &[Value::Scalar(-1.0)]).is_err());
    }

    #[test]
    fn flat_and_scale() {
        assert_eq!(call("pt_scale_up", &[]).unwrap(), Value::Scalar(1.03));
        assert_eq!(call("flat_variation", &[]).unwrap(), Value::Vector(vec![1.025, 0.975]));
    }
}
