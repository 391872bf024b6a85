//! Local and distributed backends over real Parquet files.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use approx::assert_relative_eq;
use arrow::array::{Array, Float64Array, ListArray};
use arrow::datatypes::{DataType, Field, Float32Type, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use rand::Rng;

use agc_frame::{
    Arity, BookedHandle, Dataset, DistributedBackend, EvalContext, ExecutionBackend, FunctionRegistry, HistoModel,
    InProcessCluster, LocalBackend, Value,
};

fn tmp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("agc_frame_{tag}_{}_{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Deterministic events: `w` per event and a jet list of 0..6 entries.
fn write_events(path: &Path, n_events: usize, offset: usize) {
    let mut jets = Vec::with_capacity(n_events);
    let mut weights = Vec::with_capacity(n_events);
    for i in 0..n_events {
        let k = (i + offset) % 7;
        let row: Vec<Option<f32>> = (0..k).map(|j| Some((15 + ((i * 13 + j * 29 + offset) % 90)) as f32)).collect();
        jets.push(Some(row));
        weights.push(1.0 + ((i + offset) % 3) as f64 * 0.5);
    }
    let jets = ListArray::from_iter_primitive::<Float32Type, _, _>(jets);
    let schema = Arc::new(Schema::new(vec![
        Field::new("jets", jets.data_type().clone(), true),
        Field::new("w", DataType::Float64, false),
    ]));
    let batch =
        RecordBatch::try_new(schema.clone(), vec![Arc::new(jets), Arc::new(Float64Array::from(weights))]).unwrap();
    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn fixture(tag: &str, n_files: usize) -> Vec<String> {
    let dir = tmp_dir(tag);
    (0..n_files)
        .map(|i| {
            let p = dir.join(format!("events_{i}.parquet"));
            write_events(&p, 500 + 37 * i, i * 11);
            p.to_string_lossy().into_owned()
        })
        .collect()
}

fn smear(args: &[Value], ctx: &mut EvalContext) -> agc_core::Result<Value> {
    let n = args[0].as_scalar("smear")? as usize;
    Ok(Value::Vector((0..n).map(|_| ctx.rng().gen_range(0.9..1.1)).collect()))
}

fn registry() -> Arc<FunctionRegistry> {
    let mut reg = FunctionRegistry::with_builtins();
    reg.register("smear", Arity::Exact(1), smear);
    Arc::new(reg)
}

fn book(backend: &dyn ExecutionBackend, files: &[String]) -> Vec<BookedHandle> {
    let ds = Dataset::new("sample", files.to_vec()).with_seed(42);
    let root = backend.build_graph(ds).unwrap();
    let v = root.vary("jets", "{jets * 1.05, jets * smear(len(jets))}", &["scale_up", "res_up"]).unwrap();
    let sel = v
        .define("jet_mask", "jets > 25")
        .unwrap()
        .filter_named("sum(jet_mask) >= 2", "two jets")
        .unwrap()
        .define("ht", "sum(jets[jet_mask])")
        .unwrap();
    let wv = sel.vary("w", "w * {1.1, 0.9}", &["w_up", "w_down"]).unwrap();
    let ht = wv.histo1d(HistoModel::new("ht", 20, 0.0, 400.0), "ht", Some("w")).unwrap().with_variations();
    let njet = sel.histo1d(HistoModel::new("njet", 7, 0.0, 7.0), "jet_mask", None).unwrap();
    vec![ht.into(), njet.into()]
}

fn assert_same(a: &[BookedHandle], b: &[BookedHandle]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        let (mx, my) = (x.results().unwrap(), y.results().unwrap());
        assert_eq!(mx.keys().collect::<Vec<_>>(), my.keys().collect::<Vec<_>>());
        for (k, hx) in mx {
            let hy = &my[k];
            assert_eq!(hx.edges, hy.edges);
            for (cx, cy) in hx.contents.iter().zip(&hy.contents) {
                assert_relative_eq!(*cx, *cy, epsilon = 1e-9, max_relative = 1e-12);
            }
        }
    }
}

#[test]
fn local_run_fills_nominal_and_variations() {
    let files = fixture("local", 2);
    let backend = LocalBackend::new(2, registry()).with_batch_size(128);
    let handles = book(&backend, &files);
    assert!(handles.iter().all(|h| !h.is_ready()));
    backend.run_all(&handles).unwrap();

    let ht = handles[0].results().unwrap();
    let keys: Vec<&str> = ht.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["jets:res_up", "jets:scale_up", "nominal", "w:w_down", "w:w_up"]);
    let nominal = ht["nominal"].integral();
    assert!(nominal > 0.0);
    assert_relative_eq!(ht["w:w_up"].integral(), 1.1 * nominal, max_relative = 1e-12);
    assert_relative_eq!(ht["w:w_down"].integral(), 0.9 * nominal, max_relative = 1e-12);
    // Scaling jets up can only add events passing the jet threshold.
    assert!(ht["jets:scale_up"].integral() >= nominal);

    let njet = handles[1].results().unwrap();
    assert_eq!(njet.len(), 1);
    for h in ht.values().chain(njet.values()) {
        assert_eq!(h.contents.len(), h.edges.len() + 1);
    }
}

#[test]
fn results_do_not_depend_on_threads_or_partitions() {
    let files = fixture("partitions", 4);

    let single = LocalBackend::new(1, registry());
    let a = book(&single, &files);
    single.run_all(&a).unwrap();

    let pooled = LocalBackend::new(4, registry()).with_batch_size(97);
    let b = book(&pooled, &files);
    pooled.run_all(&b).unwrap();
    assert_same(&a, &b);

    for npartitions in [None, Some(1), Some(3)] {
        let dist = DistributedBackend::new(Box::new(InProcessCluster::new(3, registry())), registry())
            .with_partitions(npartitions);
        let c = book(&dist, &files);
        dist.run_all(&c).unwrap();
        assert_same(&a, &c);
    }
}

#[test]
fn handles_run_once() {
    let files = fixture("once", 1);
    let backend = LocalBackend::new(1, registry());
    let handles = book(&backend, &files);
    backend.run_all(&handles).unwrap();
    let err = backend.run_all(&handles).unwrap_err();
    assert!(err.to_string().contains("already materialized"));
}

#[test]
fn missing_input_column_fails_the_run() {
    let files = fixture("missing", 2);
    let dist = DistributedBackend::new(Box::new(InProcessCluster::new(2, registry())), registry());
    let root = dist.build_graph(Dataset::new("s", files.clone())).unwrap();
    // The schema was readable, so unknown columns are rejected at booking.
    assert!(root.define("x", "Muon_pt * 2").is_err());

    let wrong_schema = Dataset { columns: Some(vec!["Muon_pt".into()]), ..Dataset::new("s", files) };
    let root = dist.build_graph(wrong_schema).unwrap();
    let h = root.histo1d(HistoModel::new("m", 4, 0.0, 100.0), "Muon_pt", None).unwrap();
    let handles: Vec<BookedHandle> = vec![h.into()];
    let err = dist.run_all(&handles).unwrap_err();
    assert!(err.to_string().contains("Muon_pt"));
    assert!(!handles[0].is_ready());
}

#[test]
fn empty_dataset_yields_empty_histograms() {
    let backend = LocalBackend::new(1, registry());
    let root = backend.build_graph(Dataset::new("empty", vec![])).unwrap();
    let h = root.histo1d(HistoModel::new("x", 4, 0.0, 4.0), "x", None).unwrap();
    let handles: Vec<BookedHandle> = vec![h.into()];
    backend.run_all(&handles).unwrap();
    assert_eq!(handles[0].results().unwrap()["nominal"].integral(), 0.0);
}
