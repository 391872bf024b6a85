use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use agc_frame::{CompiledExpr, EvalContext, FunctionRegistry, ValueRef};

fn jets(n: usize) -> Vec<f64> {
    (0..n).map(|i| 20.0 + 7.5 * i as f64).collect()
}

fn bench_selection_exprs(c: &mut Criterion) {
    let reg = FunctionRegistry::with_builtins();
    let mut group = c.benchmark_group("expr_eval");

    let cases = [
        ("jet_mask_count", "sum(Jet_pt > 25) >= 4"),
        ("masked_btag", "sum(Jet_btagCSVV2[Jet_pt > 25] >= 0.5) >= 1"),
        ("ht", "sum(Jet_pt[Jet_pt > 25])"),
    ];
    for n in [4usize, 8, 16] {
        let pt = jets(n);
        let btag: Vec<f64> = (0..n).map(|i| if i % 3 == 0 { 0.8 } else { 0.1 }).collect();
        for (name, src) in cases {
            let expr = CompiledExpr::compile(src, &reg).unwrap();
            let inputs: Vec<ValueRef<'_>> = expr
                .required_columns
                .iter()
                .map(|c| if c == "Jet_pt" { ValueRef::Vector(&pt) } else { ValueRef::Vector(&btag) })
                .collect();
            group.bench_with_input(BenchmarkId::new(name, n), &n, |b, _| {
                let mut ctx = EvalContext::seeded(0);
                b.iter(|| black_box(expr.eval(black_box(&inputs), &mut ctx).unwrap()))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_selection_exprs);
criterion_main!(benches);
