use housing_core::{
    calibration::{CalibrationReport, ADJUSTMENT_SPEED},
    config::SimConfig,
    engine::SimEngine,
    store::ResultStore,
};

fn store() -> ResultStore {
    let store = ResultStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(1.0)
}

#[test]
fn migration_is_idempotent() {
    let store = store();
    store.migrate().expect("second migration");
}

#[test]
fn saved_scenario_reads_back_per_city() {
    let mut config = SimConfig::default_test();
    config.horizon_years = 5;
    config.levers.supply.supply_boost = 0.9;
    let levers = config.levers.clone();
    let result = SimEngine::new(config).unwrap().run().unwrap();

    let store = store();
    let run_id = store.save_scenario(&result, 42, &levers).expect("save");

    let record = store.run(&run_id).unwrap().expect("run row");
    assert_eq!(record.seed, 42);
    assert_eq!(record.mode, "aggregate");
    assert_eq!(record.horizon_years, 5);
    assert_eq!(record.city_count, 3);

    for (city, path) in &result.cities {
        let stored = store.year_states(&run_id, city).unwrap();
        assert_eq!(stored.len(), path.len());
        for (a, b) in stored.iter().zip(path) {
            assert_eq!(a.year, b.year);
            assert_eq!(a.city_id, b.city_id);
            assert!(close(a.median_price, b.median_price));
            assert!(close(a.supply_gap, b.supply_gap));
        }
    }

    let prices = store.prices_in_year(&run_id, 2029).unwrap();
    assert_eq!(prices.len(), 3);
    assert_eq!(prices[0].0, "bne");

    let warnings = store.run_warnings(&run_id).unwrap();
    assert_eq!(warnings.len(), result.warnings.len());
    assert!(warnings.iter().any(|w| w.starts_with("[policy]") && w.contains("supply_boost")));
}

#[test]
fn unknown_run_is_none() {
    assert!(store().run("missing").unwrap().is_none());
    assert!(store().year_states("missing", "syd").unwrap().is_empty());
}

#[test]
fn latest_calibration_wins() {
    let store = store();
    let mut report = CalibrationReport {
        param_name:          ADJUSTMENT_SPEED.into(),
        fitted_value:        0.5,
        default_value:       0.35,
        grid_rmse:           Some(0.012),
        grid_points:         60,
        city_fits:           Vec::new(),
        holdout:             None,
        eligible_cities:     3,
        requested_cities:    3,
        methodology_version: "test".into(),
        warnings:            Vec::new(),
        notes:               Vec::new(),
    };
    assert!(store.latest_calibration(ADJUSTMENT_SPEED).unwrap().is_none());

    store.save_calibration(&report, None).unwrap();
    report.fitted_value = 0.75;
    store.save_calibration(&report, None).unwrap();

    let latest = store.latest_calibration(ADJUSTMENT_SPEED).unwrap().expect("report");
    assert_eq!(latest.fitted_value, 0.75);
    assert_eq!(latest.eligible_cities, 3);
    assert!(store.latest_calibration("persons_per_household").unwrap().is_none());
}

#[test]
fn file_store_persists_across_reopen() {
    let path = std::env::temp_dir().join(format!("housing-store-{}.db", uuid::Uuid::new_v4()));
    let path_str = path.to_str().expect("utf-8 temp path");

    let mut config = SimConfig::default_test();
    config.horizon_years = 2;
    let levers = config.levers.clone();
    let result = SimEngine::new(config).unwrap().run().unwrap();

    let run_id = {
        let store = ResultStore::open(path_str).expect("file store");
        store.migrate().unwrap();
        store.save_scenario(&result, 7, &levers).unwrap()
    };
    let reopened = ResultStore::open(path_str).expect("reopen");
    assert_eq!(reopened.run(&run_id).unwrap().expect("run row").seed, 7);

    drop(reopened);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
    }
}
