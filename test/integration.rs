// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{area, trace_properties, traces, RepoFixture};

use anyhow::Result;
use indicatif::ProgressBar;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use tracerepo::{
    export::{export, ExportFormat, ExportRequest},
    organize::organize,
    schema::ViolationKind,
    store::{Database, DatasetId, Selection, StoreError, Validity},
};

#[tokio::test]
async fn empty_repository_cycle() -> Result<()> {
    let fixture = RepoFixture::new()?;
    let repo = fixture.open()?;

    let database = repo.load_database()?;
    let (result, report) = repo
        .cycle(database.clone(), &Selection::all(), ProgressBar::hidden())
        .await?;
    assert_eq!(result, database);
    assert!(result.is_empty());
    assert!(report.outcomes.is_empty());
    assert!(!report.has_failures());

    Ok(())
}

#[tokio::test]
async fn classify_every_dataset() -> Result<()> {
    let fixture = RepoFixture::new()?;
    let mut missing = trace_properties();
    if let Some(properties) = missing.as_object_mut() {
        properties.remove("Operator");
    }
    fixture.add_dataset("kb11/kb11_traces.geojson", traces(&[trace_properties(), trace_properties()]))?;
    fixture.add_dataset("kb11/kb11_area.geojson", area())?;
    fixture.add_dataset("kb7/kb7_traces.geojson", traces(&[missing]))?;
    fixture.add_dataset("kb7/kb7_area.geojson", "not geojson at all")?;
    fixture.add_dataset(
        "kb9/kb9_traces.geojson",
        r#"{"type": "FeatureCollection", "features": []}"#,
    )?;
    let repo = fixture.open()?;

    let (database, report) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    let state = |id: &str| database.get(&DatasetId::new(id)).map(|entry| entry.validity);
    assert_eq!(state("kb11/kb11_traces"), Some(Validity::Valid));
    assert_eq!(state("kb11/kb11_area"), Some(Validity::Valid));
    assert_eq!(state("kb7/kb7_traces"), Some(Validity::Invalid));
    assert_eq!(state("kb7/kb7_area"), Some(Validity::CriticalError));
    assert_eq!(state("kb9/kb9_traces"), Some(Validity::Empty));
    assert_eq!(report.new.len(), 5);

    let (_, invalid) = report
        .outcomes
        .iter()
        .find(|(id, _)| id.as_str() == "kb7/kb7_traces")
        .unwrap();
    assert_eq!(invalid.violations.len(), 1);
    assert_eq!(invalid.violations[0].column, "Operator");
    assert_eq!(invalid.violations[0].kind, ViolationKind::MissingColumn);

    let (_, critical) = report
        .outcomes
        .iter()
        .find(|(id, _)| id.as_str() == "kb7/kb7_area")
        .unwrap();
    assert!(critical.violations.is_empty());
    assert!(critical.error.is_some());
    assert_eq!(report.critical(), vec![&DatasetId::new("kb7/kb7_area")]);

    let tags = database
        .get(&DatasetId::new("kb11/kb11_traces"))
        .map(|entry| entry.tags.clone());
    assert_eq!(tags, Some(BTreeSet::from(["traces".to_string()])));

    Ok(())
}

#[tokio::test]
async fn consecutive_cycles_are_idempotent() -> Result<()> {
    let fixture = RepoFixture::new()?;
    fixture.add_dataset("kb11/20m/kb11_traces.geojson", traces(&[trace_properties()]))?;
    fixture.add_dataset("kb11/kb11_area.geojson", area())?;
    let repo = fixture.open()?;

    let (first, _) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    repo.write_database(&first)?;
    let (second, report) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    assert_eq!(second, first);
    assert!(report.new.is_empty());

    Ok(())
}

#[tokio::test]
async fn only_unvalidated_selection() -> Result<()> {
    let fixture = RepoFixture::new()?;
    fixture.add_dataset("kb11/kb11_area.geojson", area())?;
    let repo = fixture.open()?;

    let (database, _) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    fixture.add_dataset("kb7/kb7_area.geojson", area())?;

    let selection = Selection::all().with_validity([Validity::Unvalidated]);
    let (_, report) = repo.cycle(database, &selection, ProgressBar::hidden()).await?;
    let validated = report
        .outcomes
        .iter()
        .map(|(id, _)| id.clone())
        .collect::<Vec<_>>();
    assert_eq!(validated, vec![DatasetId::new("kb7/kb7_area")]);

    Ok(())
}

#[tokio::test]
async fn dangling_entries_persist_until_removed() -> Result<()> {
    let fixture = RepoFixture::new()?;
    fixture.add_dataset("kb11/kb11_area.geojson", area())?;
    let repo = fixture.open()?;

    let (database, _) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    repo.write_database(&database)?;
    fixture.remove_dataset("kb11/kb11_area.geojson")?;

    let id = DatasetId::new("kb11/kb11_area");
    for _ in 0..2 {
        let (database, report) = repo
            .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
            .await?;
        assert_eq!(report.dangling, vec![id.clone()]);
        assert_eq!(database.get(&id).map(|entry| entry.validity), Some(Validity::Valid));
        repo.write_database(&database)?;
    }

    let mut database = repo.load_database()?;
    database.remove_dangling(&id, repo.root())?;
    repo.write_database(&database)?;
    assert!(repo.load_database()?.is_empty());

    Ok(())
}

#[tokio::test]
async fn export_only_valid_datasets() -> Result<()> {
    let fixture = RepoFixture::new()?;
    let mut bad = trace_properties();
    bad["DIP"] = serde_json::json!(120.0);
    fixture.add_dataset("kb11/kb11_traces.geojson", traces(&[trace_properties()]))?;
    fixture.add_dataset("kb11/kb11_area.geojson", area())?;
    fixture.add_dataset("kb7/kb7_traces.geojson", traces(&[bad]))?;
    let repo = fixture.open()?;

    let (database, _) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    let request = ExportRequest {
        format: ExportFormat::GeoJsonSeq,
        ..Default::default()
    };
    let report = export(&repo, &database, &request, ProgressBar::hidden())?;
    assert_eq!(report.written.len(), 2);
    assert_eq!(report.skipped, 1);
    assert!(report.failures.is_empty());

    let target = repo.export_dir().join("geojsonseq/kb11/kb11_traces.geojsons");
    assert!(target.is_file());
    assert!(!repo.export_dir().join("geojsonseq/kb7").exists());

    let request = ExportRequest {
        format: ExportFormat::GeoJsonSeq,
        overwrite: false,
        ..Default::default()
    };
    assert!(export(&repo, &database, &request, ProgressBar::hidden()).is_err());

    Ok(())
}

#[tokio::test]
async fn export_collects_per_dataset_failures() -> Result<()> {
    let fixture = RepoFixture::new()?;
    fixture.add_dataset("kb11/kb11_area.geojson", area())?;
    fixture.add_dataset("kb7/kb7_area.geojson", area())?;
    let repo = fixture.open()?;

    let (database, _) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    fixture.remove_dataset("kb7/kb7_area.geojson")?;

    let report = export(&repo, &database, &ExportRequest::default(), ProgressBar::hidden())?;
    assert_eq!(
        report.written,
        vec![repo.export_dir().join("geojson/kb11/kb11_area.geojson")]
    );
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, DatasetId::new("kb7/kb7_area"));
    assert!(report.has_failures());
    assert!(report.to_string().contains("kb7/kb7_area"));

    Ok(())
}

#[tokio::test]
async fn export_filtered_by_tag() -> Result<()> {
    let fixture = RepoFixture::new()?;
    fixture.add_dataset("kb11/kb11_traces.geojson", traces(&[trace_properties()]))?;
    fixture.add_dataset("kb11/kb11_area.geojson", area())?;
    let repo = fixture.open()?;

    let (database, _) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    let request = ExportRequest {
        selection: Selection::try_new(Vec::<String>::new(), ["traces".to_string()])?,
        ..Default::default()
    };
    let report = export(&repo, &database, &request, ProgressBar::hidden())?;
    assert_eq!(
        report.written,
        vec![repo.export_dir().join("geojson/kb11/kb11_traces.geojson")]
    );
    assert!(!repo.export_dir().join("geojson/kb11/kb11_area.geojson").exists());

    Ok(())
}

#[tokio::test]
async fn hand_written_tags_survive_cycle() -> Result<()> {
    let fixture = RepoFixture::new()?;
    fixture.add_dataset("kb11/kb11_area.geojson", area())?;
    let repo = fixture.open()?;

    let id = DatasetId::new("kb11/kb11_area");
    let (mut database, _) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    let expect = BTreeSet::from(["area".to_string(), "checked".to_string()]);
    database.set_tags(&id, expect.clone())?;
    repo.write_database(&database)?;

    let (database, _) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    assert_eq!(database.get(&id).map(|entry| entry.tags.clone()), Some(expect));

    Ok(())
}

#[tokio::test]
async fn organized_datasets_join_next_cycle() -> Result<()> {
    let fixture = RepoFixture::new()?;
    let unorganized = fixture.root().join("unorganized");
    std::fs::create_dir_all(&unorganized)?;
    std::fs::write(unorganized.join("kb11_area.geojson"), area())?;
    let repo = fixture.open()?;

    let simulated = organize(&repo, &repo.load_database()?, true)?;
    assert_eq!(simulated.moves.len(), 1);
    assert!(simulated.moves[0].simulated);
    assert!(unorganized.join("kb11_area.geojson").is_file());

    let report = organize(&repo, &repo.load_database()?, false)?;
    assert_eq!(report.moves[0].to, repo.data_dir().join("kb11/kb11_area.geojson"));

    let (database, _) = repo
        .cycle(repo.load_database()?, &Selection::all(), ProgressBar::hidden())
        .await?;
    let state = database
        .get(&DatasetId::new("kb11/kb11_area"))
        .map(|entry| entry.validity);
    assert_eq!(state, Some(Validity::Valid));

    Ok(())
}

#[test]
fn corrupt_database_aborts() -> Result<()> {
    let fixture = RepoFixture::new()?;
    std::fs::write(fixture.root().join("database.toml"), "[dataset.kb11\narea = ")?;
    let repo = fixture.open()?;

    let result = Database::load(repo.database_path());
    assert!(matches!(result, Err(StoreError::CorruptDatabase { .. })));
    assert!(repo.load_database().is_err());

    Ok(())
}
