// End-to-end runs: ledger + seed + profile on disk → snapshot tree

use chrono::NaiveDate;
use index_history::{
    store::read_snapshot_csv, Backfill, BackfillError, CompositionSchedule, IndexProfile, Ledger,
    NameResolver, SearchPolicy, SnapshotStore, StaticSearch, Ticker, WalkPlan, WriteOutcome,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Workspace { dir: tempfile::tempdir().unwrap() }
    }

    fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("docs")
    }

    fn store(&self) -> SnapshotStore {
        SnapshotStore::new(self.root())
    }

    fn profile(&self, overrides: &str) -> IndexProfile {
        let mut profile = IndexProfile::new("dax", ".DE", SearchPolicy::new(&["XETRA"], &["DE"]));
        profile.manual_overrides = Some(self.file("overrides.csv", overrides));
        profile
    }
}

fn count_files(root: &Path) -> usize {
    if !root.exists() {
        return 0;
    }
    let mut count = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                count += 1;
            }
        }
    }
    count
}

#[test]
fn acme_backward_one_day_writes_empty_snapshot() {
    let ws = Workspace::new();
    let profile = ws.profile("name,symbol\nAcme Corp,ACME.DE\n");
    let ledger = Ledger::load(&ws.file("ledger.csv", "date,added,removed\n2024-01-10,Acme Corp,\n"), &profile.ledger).unwrap();
    let seed = read_snapshot_csv(&ws.file("seed.csv", "Symbol,Name\nACME.DE,Acme Corp\n")).unwrap();

    let backfill = Backfill::new(&profile, ws.store(), NameResolver::new(&profile).unwrap());
    let summary = backfill
        .run(&ledger, &seed, &WalkPlan::backward(day(2024, 1, 10), day(2024, 1, 9)))
        .unwrap();

    assert_eq!(summary.written, 2);
    let store = ws.store();
    assert_eq!(
        fs::read_to_string(store.csv_path("dax", day(2024, 1, 9))).unwrap(),
        "Symbol,Name\n"
    );
    assert_eq!(fs::read_to_string(store.json_path("dax", day(2024, 1, 9))).unwrap(), "[]");
    assert_eq!(
        fs::read_to_string(store.csv_path("dax", day(2024, 1, 10))).unwrap(),
        "Symbol,Name\nACME.DE,Acme Corp\n"
    );
}

#[test]
fn rerun_is_idempotent() {
    let ws = Workspace::new();
    let profile = ws.profile("name,symbol\nBeta AG,BETA\n");
    let ledger = Ledger::load(
        &ws.file(
            "ledger.csv",
            "Date,Added,Deleted\n05-Mar-24,Acme Corp,Beta AG\nnot a date,Gamma,\n01-Mar-24,,Acme Corp\n",
        ),
        &profile.ledger,
    )
    .unwrap();
    assert_eq!(ledger.dropped_rows(), 1);
    let seed = read_snapshot_csv(&ws.file("seed.csv", "Symbol,Name\nACME.DE,Acme Corp\nSAP.DE,SAP SE\n")).unwrap();
    let plan = WalkPlan::backward(day(2024, 3, 6), day(2024, 2, 28));

    let first = Backfill::new(&profile, ws.store(), NameResolver::new(&profile).unwrap())
        .run(&ledger, &seed, &plan)
        .unwrap();
    let snapshot_before: Vec<String> = (0..8)
        .map(|back| {
            let d = day(2024, 3, 6) - chrono::Duration::days(back);
            fs::read_to_string(ws.store().csv_path("dax", d)).unwrap()
        })
        .collect();

    let second = Backfill::new(&profile, ws.store(), NameResolver::new(&profile).unwrap())
        .run(&ledger, &seed, &plan)
        .unwrap();

    assert_eq!(first.written, 8);
    assert_eq!(second.written, 0);
    assert_eq!(second.skipped, 8);
    assert_eq!(count_files(&ws.root()), 16);

    let snapshot_after: Vec<String> = (0..8)
        .map(|back| {
            let d = day(2024, 3, 6) - chrono::Duration::days(back);
            fs::read_to_string(ws.store().csv_path("dax", d)).unwrap()
        })
        .collect();
    assert_eq!(snapshot_before, snapshot_after);

    // 03-04: Beta still in, Acme not yet added; 02-29: Acme removed on 03-01 is back
    let store = ws.store();
    assert_eq!(
        fs::read_to_string(store.csv_path("dax", day(2024, 3, 4))).unwrap(),
        "Symbol,Name\nBETA.DE,Beta AG\nSAP.DE,SAP SE\n"
    );
    assert_eq!(
        fs::read_to_string(store.csv_path("dax", day(2024, 2, 29))).unwrap(),
        "Symbol,Name\nACME.DE,Acme Corp\nBETA.DE,Beta AG\nSAP.DE,SAP SE\n"
    );
}

#[test]
fn unresolved_name_writes_nothing() {
    let ws = Workspace::new();
    let profile = ws.profile("name,symbol\n");
    let ledger = Ledger::load(
        &ws.file("ledger.csv", "date,added,removed\n2024-01-10,Acme Corp,Obscure Holdings\n"),
        &profile.ledger,
    )
    .unwrap();
    let seed = read_snapshot_csv(&ws.file("seed.csv", "Symbol,Name\nACME.DE,Acme Corp\n")).unwrap();

    let search = StaticSearch::from_json(&ws.file(
        "search.json",
        r#"{"Obscure Holdings": [{"symbol":"OBS.F","name":"Obscure Holdings","exchange":"OTC","country":"US"}]}"#,
    ))
    .unwrap();
    let resolver = NameResolver::new(&profile).unwrap().with_search(&search);

    let err = Backfill::new(&profile, ws.store(), resolver)
        .run(&ledger, &seed, &WalkPlan::backward(day(2024, 1, 10), day(2024, 1, 1)))
        .unwrap_err();

    match err {
        BackfillError::Unresolved { count, audit_path } => {
            assert_eq!(count, 1);
            let audit: serde_json::Value = serde_json::from_str(&fs::read_to_string(audit_path).unwrap()).unwrap();
            assert_eq!(audit["unresolved"][0], "Obscure Holdings");
            assert_eq!(audit["resolved"]["Acme Corp"], "ACME.DE");
            assert!(audit["debug"]["Obscure Holdings"][0].as_str().unwrap().contains("OBS.F"));
        }
        other => panic!("expected Unresolved, got {other:?}"),
    }
    assert_eq!(count_files(&ws.root()), 0);
}

#[test]
fn existing_snapshot_is_never_overwritten() {
    let ws = Workspace::new();
    let profile = ws.profile("name,symbol\nAcme Corp,ACME\n");
    let ledger = Ledger::load(&ws.file("ledger.csv", "date,added,removed\n2024-01-10,Acme Corp,\n"), &profile.ledger).unwrap();
    let seed = read_snapshot_csv(&ws.file("seed.csv", "Symbol,Name\nACME.DE,Acme Corp\n")).unwrap();

    let store = ws.store();
    let wrong = index_history::MembershipSet::new().with_member(Ticker::new("WRONG.DE"), "Wrong");
    store.write("dax", day(2024, 1, 9), &wrong).unwrap();
    let planted = fs::read(store.csv_path("dax", day(2024, 1, 9))).unwrap();

    let summary = Backfill::new(&profile, ws.store(), NameResolver::new(&profile).unwrap())
        .run(&ledger, &seed, &WalkPlan::backward(day(2024, 1, 10), day(2024, 1, 8)))
        .unwrap();

    assert_eq!((summary.written, summary.skipped), (2, 1));
    assert_eq!(fs::read(store.csv_path("dax", day(2024, 1, 9))).unwrap(), planted);

    // State kept advancing past the skipped day
    assert_eq!(
        fs::read_to_string(store.csv_path("dax", day(2024, 1, 8))).unwrap(),
        "Symbol,Name\n"
    );
}

#[test]
fn partial_pair_is_repaired_not_replaced() {
    let ws = Workspace::new();
    let profile = ws.profile("name,symbol\n");
    let store = ws.store();
    let d = day(2024, 1, 10);
    fs::create_dir_all(store.day_dir(d)).unwrap();
    fs::write(store.json_path("dax", d), r#"[{"Symbol":"KEEP.DE","Name":"Keep AG"}]"#).unwrap();

    let ledger = Ledger::from_events(Vec::new());
    let seed = read_snapshot_csv(&ws.file("seed.csv", "Symbol,Name\nSAP.DE,SAP SE\n")).unwrap();
    let summary = Backfill::new(&profile, ws.store(), NameResolver::new(&profile).unwrap())
        .run(&ledger, &seed, &WalkPlan::backward(d, d))
        .unwrap();

    assert_eq!(summary.repaired, 1);
    assert_eq!(
        fs::read_to_string(store.csv_path("dax", d)).unwrap(),
        "Symbol,Name\nKEEP.DE,Keep AG\n"
    );
}

#[test]
fn forward_fill_from_weights() {
    let ws = Workspace::new();
    let mut profile = IndexProfile::new("nifty50", ".NS", SearchPolicy::new(&["NSE"], &["IN"]));
    profile.direction = index_history::Direction::Forward;
    let weights = ws.file(
        "weights.csv",
        "DATE,RELIANCE,TCS,INFY\n2008-01-30,1.0,2.0,0\n2008-02-02,1.0,0,3.0\n",
    );

    let schedule = CompositionSchedule::load_weights(&weights, &profile.suffix).unwrap();
    let backfill = Backfill::new(&profile, ws.store(), NameResolver::new(&profile).unwrap())
        .with_start_bound(Some(day(2008, 1, 31)));
    let summary = backfill.forward_fill(&schedule, day(2008, 2, 3)).unwrap();

    // 01-30 is before the registered start
    assert_eq!(summary.written, 4);
    let store = ws.store();
    assert!(!store.exists("nifty50", day(2008, 1, 30)));
    assert_eq!(
        fs::read_to_string(store.csv_path("nifty50", day(2008, 2, 1))).unwrap(),
        "Symbol,Name\nRELIANCE.NS,RELIANCE.NS\nTCS.NS,TCS.NS\n"
    );
    assert_eq!(
        fs::read_to_string(store.csv_path("nifty50", day(2008, 2, 3))).unwrap(),
        "Symbol,Name\nINFY.NS,INFY.NS\nRELIANCE.NS,RELIANCE.NS\n"
    );
    assert!(matches!(
        store.write("nifty50", day(2008, 2, 3), &Default::default()).unwrap(),
        WriteOutcome::Skipped
    ));
}

#[test]
fn rename_keeps_constituent_through_backward_walk() {
    let ws = Workspace::new();
    let profile = IndexProfile::ftse100();
    let ledger = Ledger::load(
        &ws.file("ledger.csv", "Date,Added,Deleted\n31-Jan-22,Shell,Royal Dutch Shell A&B\n"),
        &profile.ledger,
    )
    .unwrap();
    let seed = read_snapshot_csv(&ws.file("seed.csv", "Symbol,Name\nSHEL.L,Shell\nVOD.L,Vodafone\n")).unwrap();

    let summary = Backfill::new(&profile, ws.store(), NameResolver::new(&profile).unwrap())
        .run(&ledger, &seed, &WalkPlan::backward(day(2022, 2, 1), day(2022, 1, 29)))
        .unwrap();
    assert_eq!(summary.written, 4);

    let store = ws.store();
    assert_eq!(
        fs::read_to_string(store.csv_path("ftse100", day(2022, 1, 31))).unwrap(),
        "Symbol,Name\nSHEL.L,Shell\nVOD.L,Vodafone\n"
    );
    for d in [day(2022, 1, 30), day(2022, 1, 29)] {
        assert_eq!(
            fs::read_to_string(store.csv_path("ftse100", d)).unwrap(),
            "Symbol,Name\nSHEL.L,Royal Dutch Shell A&B\nVOD.L,Vodafone\n"
        );
    }
}
