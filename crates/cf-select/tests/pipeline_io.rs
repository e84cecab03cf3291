//! Integration tests: Parquet input and output, JSON sinks and configured passes.

use std::path::{Path, PathBuf};

use cf_select::{
    CutCatalog, DerivedFields, Histogram, JsonDirSink, Pipeline, PipelineConfig, RowView,
    SelectError, run_independent,
};
use cf_store::{Dim, FieldDescriptor, OpenMode, Record, RecordStore, ScalarType};

fn schema() -> Vec<FieldDescriptor> {
    let nt = FieldDescriptor::size("nt", 6).unwrap();
    vec![
        FieldDescriptor::scalar("emeas", ScalarType::F32),
        nt.clone(),
        FieldDescriptor::array("tptot", ScalarType::F32, vec![Dim::sized_by(&nt).unwrap()])
            .unwrap(),
    ]
}

/// `n` rows with `emeas = 500 + i` and `i % 3` tracks of 100 MeV/c each.
fn write_events(path: &Path, n: usize) {
    let mut out = RecordStore::open(path, OpenMode::Create).unwrap();
    out.bind_all(schema()).unwrap();
    for i in 0..n {
        let nt = (i % 3) as u32;
        let rec = out.record_mut();
        rec.set_scalar("emeas", 500.0 + i as f32).unwrap();
        rec.set_size("nt", nt).unwrap();
        rec.set::<f32>("tptot", vec![100.0; nt as usize]).unwrap();
        out.append_row().unwrap();
    }
    out.close().unwrap();
}

/// Kinematic fit results for the same rows: `chi2 = i / 2`.
fn write_kinfit(path: &Path, n: usize) {
    let mut out = RecordStore::open(path, OpenMode::Create).unwrap();
    out.bind(FieldDescriptor::scalar("chi2", ScalarType::F32)).unwrap();
    for i in 0..n {
        out.record_mut().set_scalar("chi2", i as f32 / 2.0).unwrap();
        out.append_row().unwrap();
    }
    out.close().unwrap();
}

fn open_events(path: &Path) -> RecordStore {
    let mut input = RecordStore::open(path, OpenMode::Read).unwrap();
    input.bind_all(schema()).unwrap();
    input
}

/// `two_tracks` flags rows with exactly two tracks; schedule it negated to keep only those.
fn cuts() -> CutCatalog {
    let mut c = CutCatalog::new();
    c.declare("two_tracks", |row| Ok(row.size("nt")? == 2))
        .unwrap()
        .declare("high_energy", |row| Ok(row.scalar("emeas")? >= 510.0))
        .unwrap();
    c
}

const CONFIG: &str = r#"
dataset: toy
histograms:
  - name: emeas
    x: { field: emeas, bins: 20, range: [500, 520] }
  - name: psum
    x: { field: psum, edges: [0, 150, 250, 400] }
passes:
  - histograms: [emeas]
  - cuts: ["!two_tracks"]
  - cuts: [high_energy]
    histograms: [emeas, psum]
    namespace: final
materialize: true
"#;

#[test]
fn configured_run_writes_json_and_parquet() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("events.parquet");
    let output_path = dir.path().join("skim.parquet");
    let hist_dir = dir.path().join("hists");
    write_events(&input_path, 18);

    let config = PipelineConfig::from_yaml_str(CONFIG).unwrap();
    let derived = DerivedFields::builder()
        .field("psum", &["tptot"], |inp| Ok(vec![inp.values("tptot")?.iter().sum()]))
        .build()
        .unwrap();
    let mut output = RecordStore::open(&output_path, OpenMode::Create).unwrap();
    output.bind_all(schema()).unwrap();

    let mut pipeline = Pipeline::builder(open_events(&input_path))
        .dataset(config.dataset.clone().unwrap())
        .cuts(cuts())
        .histograms(config.histogram_catalog().unwrap())
        .derived(derived)
        .output(output)
        .sink(JsonDirSink::new(&hist_dir))
        .build()
        .unwrap();

    let passes = pipeline.run_config(&config).unwrap();
    let namespaces: Vec<&str> = passes.iter().map(|p| p.namespace.as_str()).collect();
    assert_eq!(namespaces, vec!["0", "1_!two_tracks", "final"]);
    // Rows with exactly two tracks (i % 3 == 2) survive the negated cut: 6 of 18.
    assert_eq!(passes[1].survivors, 6);
    // Of 2, 5, 8, 11, 14, 17 only those below 510 MeV remain.
    assert_eq!(passes[2].survivors, 3);

    let done = pipeline.finish().unwrap();
    assert_eq!(done.cutflow.survivors(), vec![18, 18, 6, 3]);

    let text = std::fs::read_to_string(hist_dir.join("final").join("psum.json")).unwrap();
    let psum: Histogram = serde_json::from_str(&text).unwrap();
    let psum = psum.as_h1().unwrap();
    assert_eq!(psum.entries, 3);
    assert_eq!(psum.bin_content, vec![0.0, 3.0, 0.0]);
    assert!(hist_dir.join("0").join("emeas.json").exists());
    assert!(hist_dir.join("cutflow.json").exists());

    let mut skim = RecordStore::open(&output_path, OpenMode::Read).unwrap();
    skim.bind_all(schema()).unwrap();
    assert_eq!(skim.row_count(), 3);
    skim.get_row(1).unwrap();
    assert_eq!(skim.record().get_scalar::<f32>("emeas").unwrap(), 505.0);
    assert_eq!(skim.record().values_f64("tptot").unwrap(), vec![100.0, 100.0]);
}

#[test]
fn materialization_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("events.parquet");
    write_events(&input_path, 9);

    let mut output = RecordStore::open(dir.path().join("out.parquet"), OpenMode::Create).unwrap();
    output.bind(FieldDescriptor::scalar("ntracks", ScalarType::I32)).unwrap();
    let mut pipeline =
        Pipeline::builder(open_events(&input_path)).cuts(cuts()).output(output).build().unwrap();
    pipeline.add_predicate("two_tracks", true).unwrap();
    pipeline.run_pass().unwrap();

    let compute = |row: &RowView<'_>, out: &mut Record| -> cf_select::Result<()> {
        out.set_scalar("ntracks", row.size("nt")? as i32)?;
        Ok(())
    };
    assert_eq!(pipeline.materialize_output(compute).unwrap(), 3);
    assert_eq!(pipeline.materialize_output(compute).unwrap(), 0);

    let done = pipeline.finish().unwrap();
    let mut out = done.output.unwrap();
    assert_eq!(out.row_count(), 3);
    out.get_row(2).unwrap();
    assert_eq!(out.record().get_scalar::<i32>("ntracks").unwrap(), 2);
}

#[test]
fn failed_materialization_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("events.parquet");
    let output_path = dir.path().join("out.parquet");
    write_events(&input_path, 5);

    let mut output = RecordStore::open(&output_path, OpenMode::Create).unwrap();
    output.bind(FieldDescriptor::scalar("ntracks", ScalarType::I32)).unwrap();
    let mut pipeline =
        Pipeline::builder(open_events(&input_path)).output(output).build().unwrap();

    let err = pipeline
        .materialize_output(|row, out| {
            if row.row() == 2 {
                return Err(SelectError::Evaluation("no vertex".into()));
            }
            out.set_scalar("ntracks", row.size("nt")? as i32)?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, SelectError::Row { row: 2, .. }), "{err}");
    assert_eq!(pipeline.output().unwrap().row_count(), 0);

    let written = pipeline
        .materialize_output(|row, out| {
            out.set_scalar("ntracks", row.size("nt")? as i32)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(written, 5);
    pipeline.finish().unwrap();

    let mut out = RecordStore::open(&output_path, OpenMode::Read).unwrap();
    out.bind(FieldDescriptor::scalar("ntracks", ScalarType::I32)).unwrap();
    assert_eq!(out.row_count(), 5);
    out.get_row(4).unwrap();
    assert_eq!(out.record().get_scalar::<i32>("ntracks").unwrap(), 1);
}

#[test]
fn kinfit_friend_is_cut_on_and_skimmed() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("events.parquet");
    let kinfit_path = dir.path().join("kinfit.parquet");
    write_events(&input_path, 12);
    write_kinfit(&kinfit_path, 12);

    let mut kinfit = RecordStore::open(&kinfit_path, OpenMode::Read).unwrap();
    kinfit.bind(FieldDescriptor::scalar("chi2", ScalarType::F32)).unwrap();
    let mut output = RecordStore::open(dir.path().join("skim.parquet"), OpenMode::Create).unwrap();
    output
        .bind_all([
            FieldDescriptor::scalar("emeas", ScalarType::F32),
            FieldDescriptor::scalar("chi2", ScalarType::F32),
        ])
        .unwrap();

    let mut pipeline = Pipeline::builder(open_events(&input_path))
        .friend(kinfit)
        .cuts(cuts())
        .output(output)
        .build()
        .unwrap();
    pipeline.add_predicate("two_tracks", true).unwrap();
    pipeline.add_adhoc_predicate("bad_fit", |row| Ok(row.scalar("chi2")? > 4.0), false).unwrap();
    let pass = pipeline.run_pass().unwrap();
    assert_eq!(pass.stage, "!two_tracks_bad_fit");
    // Two-track rows are 2, 5, 8 and 11; chi2 <= 4 keeps 2, 5 and 8.
    assert_eq!(pass.survivors, 3);
    assert_eq!(pipeline.skim().unwrap(), 3);

    let mut out = pipeline.finish().unwrap().output.unwrap();
    out.get_row(2).unwrap();
    assert_eq!(out.record().get_scalar::<f32>("emeas").unwrap(), 508.0);
    assert_eq!(out.record().get_scalar::<f32>("chi2").unwrap(), 4.0);
}

#[test]
fn read_only_output_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("events.parquet");
    write_events(&input_path, 3);

    let err = Pipeline::builder(open_events(&input_path))
        .output(open_events(&input_path))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SelectError::Config(_)));
}

#[test]
fn independent_datasets_in_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<PathBuf> = (0..4)
        .map(|k| {
            let p = dir.path().join(format!("run{k}.parquet"));
            write_events(&p, 3 * (k + 1));
            p
        })
        .collect();

    let results = run_independent(paths, |path| {
        let mut input = RecordStore::open(&path, OpenMode::Read)?;
        input.bind_all(schema())?;
        let mut p = Pipeline::builder(input).cuts(cuts()).build()?;
        p.add_predicate("two_tracks", true)?;
        Ok(p.run_pass()?.survivors)
    });
    let survivors: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(survivors, vec![1, 2, 3, 4]);
}
