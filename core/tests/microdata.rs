use housing_core::{
    config::test_cities,
    microdata::{
        build_microdata_bundle, canonicalize, infer_mapping, mix, reweight_tenure, synthesize_city,
        tenure_shares, FieldMapping, InferenceError, MicrodataConfig, MicrodataMode, MicrodataRecord,
        RawCityMicrodata, RawMicrodata, RawRow, SourceKind, SyntheticParams, Tenure, TenureShares,
    },
    rng::RngBank,
};
use serde_json::json;

fn row(value: serde_json::Value) -> RawRow {
    value.as_object().cloned().expect("object row")
}

fn record(income: f64, tenure: Tenure, weight: f64) -> MicrodataRecord {
    MicrodataRecord { income, tenure, weight }
}

fn survey_rows(n: usize) -> Vec<RawRow> {
    let tenures = ["Renter", "Owned outright", "Owner with mortgage", "rent"];
    (0..n)
        .map(|i| {
            row(json!({
                "hh_weight": 1.0 + (i % 3) as f64,
                "hh_gross_income": format!("${},000", 40 + (i % 50) * 2),
                "tenure_type": tenures[i % tenures.len()],
                "region": "syd",
            }))
        })
        .collect()
}

#[test]
fn canonicalize_keeps_valid_rows_and_counts_the_rest() {
    let mapping = FieldMapping { income: "income".into(), tenure: "tenure".into(), ..Default::default() };
    let rows = vec![
        row(json!({"income": 50000, "tenure": "R"})),
        row(json!({"income": -100, "tenure": "R"})),
    ];
    let out = canonicalize(&rows, &mapping);
    assert_eq!(out.records, vec![record(50_000.0, Tenure::Renter, 1.0)]);
    assert_eq!(out.dropped, 1);
}

#[test]
fn canonicalize_drops_unmapped_tenure_and_bad_weights() {
    let mapping = FieldMapping {
        income: "inc".into(),
        tenure: "ten".into(),
        weight: Some("w".into()),
        tenure_codes: [("9".to_string(), Tenure::Investor)].into(),
    };
    let rows = vec![
        row(json!({"inc": "72,000", "ten": 9, "w": 2.5})),
        row(json!({"inc": 60000, "ten": "boat", "w": 1})),
        row(json!({"inc": 60000, "ten": "O", "w": -1})),
        row(json!({"inc": 60000, "ten": "O", "w": "heavy"})),
        row(json!({"inc": 60000, "ten": "M", "w": null})),
        row(json!({"ten": "M"})),
    ];
    let out = canonicalize(&rows, &mapping);
    assert_eq!(
        out.records,
        vec![record(72_000.0, Tenure::Investor, 2.5), record(60_000.0, Tenure::Mortgaged, 1.0)]
    );
    assert_eq!(out.dropped, 4);
}

#[test]
fn autodetects_survey_columns() {
    let inferred = infer_mapping(&survey_rows(60)).expect("mapping");
    assert_eq!(inferred.mapping.income, "hh_gross_income");
    assert_eq!(inferred.mapping.tenure, "tenure_type");
    assert_eq!(inferred.mapping.weight.as_deref(), Some("hh_weight"));
    assert!(inferred.confidence.income > 0.5 && inferred.confidence.income <= 1.0);
    assert!(inferred.confidence.tenure > 0.5);

    let out = canonicalize(&survey_rows(60), &inferred.mapping);
    assert_eq!(out.records.len(), 60);
    assert_eq!(out.dropped, 0);
}

#[test]
fn autodetect_rejects_implausible_income() {
    // Incomes in thousands fail the median check.
    let rows: Vec<RawRow> = (0..40)
        .map(|i| row(json!({"income": 40 + i, "tenure": "renter"})))
        .collect();
    assert_eq!(infer_mapping(&rows).unwrap_err(), InferenceError::NoIncomeColumn);
    assert_eq!(infer_mapping(&[]).unwrap_err(), InferenceError::Empty);

    let no_tenure: Vec<RawRow> = (0..40)
        .map(|i| row(json!({"income": 50_000 + i, "tenure": "unknown"})))
        .collect();
    assert_eq!(infer_mapping(&no_tenure).unwrap_err(), InferenceError::NoTenureColumn);
}

#[test]
fn reweighting_hits_renter_target_and_leaves_others_alone() {
    let records = vec![
        record(40_000.0, Tenure::Renter, 25.0),
        record(90_000.0, Tenure::Mortgaged, 40.0),
        record(70_000.0, Tenure::Outright, 35.0),
    ];
    let targets: TenureShares = [(Tenure::Renter, 0.50)].into();
    let out = reweight_tenure(&records, &targets);

    assert!((out.factors[&Tenure::Renter] - 3.0).abs() < 1e-12);
    let non_renter: f64 = out.records.iter().filter(|r| r.tenure != Tenure::Renter).map(|r| r.weight).sum();
    assert!((non_renter - 75.0).abs() < 1e-12);
    let shares = tenure_shares(&out.records);
    assert!((shares[&Tenure::Renter] - 0.50).abs() < 1e-12);
    // Incomes are never touched.
    for (a, b) in records.iter().zip(&out.records) {
        assert_eq!(a.income, b.income);
        assert_eq!(a.tenure, b.tenure);
    }
}

#[test]
fn reweighting_every_tenure_preserves_total_weight() {
    let records = vec![
        record(40_000.0, Tenure::Renter, 30.0),
        record(90_000.0, Tenure::Mortgaged, 30.0),
        record(70_000.0, Tenure::Outright, 30.0),
        record(150_000.0, Tenure::Investor, 10.0),
    ];
    let targets: TenureShares = [
        (Tenure::Renter, 0.25),
        (Tenure::Mortgaged, 0.35),
        (Tenure::Outright, 0.35),
        (Tenure::Investor, 0.05),
    ]
    .into();
    let out = reweight_tenure(&records, &targets);
    let total: f64 = out.records.iter().map(|r| r.weight).sum();
    assert!((total - 100.0).abs() < 1e-9);
    let shares = tenure_shares(&out.records);
    for (tenure, target) in &targets {
        assert!((shares[tenure] - target).abs() < 1e-12);
    }
}

#[test]
fn missing_tenure_gets_unit_factor_and_warning() {
    let records = vec![record(40_000.0, Tenure::Renter, 1.0)];
    let targets: TenureShares = [(Tenure::Investor, 0.1)].into();
    let out = reweight_tenure(&records, &targets);
    assert_eq!(out.factors[&Tenure::Investor], 1.0);
    assert_eq!(out.records, records);
    assert!(!out.warnings.is_empty());
}

#[test]
fn mixing_splits_weight_between_groups() {
    let real = vec![record(50_000.0, Tenure::Renter, 2.0), record(80_000.0, Tenure::Outright, 2.0)];
    let synth = vec![record(60_000.0, Tenure::Mortgaged, 1.0); 8];
    let mixed = mix(&real, &synth, 0.7);
    assert_eq!(mixed.len(), 10);
    let real_weight: f64 = mixed[..2].iter().map(|r| r.weight).sum();
    let total: f64 = mixed.iter().map(|r| r.weight).sum();
    assert!((real_weight / total - 0.7).abs() < 1e-12);
    assert_eq!(mix(&[], &synth, 0.7), synth);
}

#[test]
fn synthetic_households_are_seeded_per_city() {
    let cities = test_cities();
    let params = SyntheticParams::default();
    let bank = RngBank::new(42);

    let a = synthesize_city(&cities[0], &params, &mut bank.for_city("syd")).unwrap();
    let b = synthesize_city(&cities[0], &params, &mut bank.for_city("syd")).unwrap();
    let c = synthesize_city(&cities[0], &params, &mut bank.for_city("mel")).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), params.records_per_city);

    let shares = tenure_shares(&a);
    assert!((shares[&Tenure::Renter] - 0.31).abs() < 0.05);
    assert!((shares[&Tenure::Mortgaged] - 0.35).abs() < 0.05);
    assert!(a.iter().all(|r| r.income > 0.0 && r.weight == 1.0));
}

#[test]
fn bundle_falls_back_to_synthetic_and_records_provenance() {
    let cities = test_cities();
    let raw = RawMicrodata {
        cities: [
            ("syd".to_string(), RawCityMicrodata { rows: survey_rows(300), mapping: None }),
            ("mel".to_string(), RawCityMicrodata { rows: survey_rows(50), mapping: None }),
            ("per".to_string(), RawCityMicrodata { rows: survey_rows(10), mapping: None }),
        ]
        .into(),
    };
    let bundle = build_microdata_bundle(&cities, Some(&raw), &MicrodataConfig::default(), 7).unwrap();

    assert_eq!(bundle.cities["syd"].source, SourceKind::Real);
    assert!(bundle.cities["syd"].mapping_confidence.is_some());
    assert_eq!(bundle.cities["mel"].source, SourceKind::Mixed);
    assert_eq!(bundle.cities["bne"].source, SourceKind::Synthetic);
    assert!(!bundle.cities.contains_key("per"));
    assert!(bundle.warnings.iter().any(|w| w.city.as_deref() == Some("per")));
}

#[test]
fn bundle_applies_tenure_targets() {
    let cities = test_cities();
    let config = MicrodataConfig {
        mode: MicrodataMode::Synthetic,
        tenure_targets: Some([(Tenure::Renter, 0.40)].into()),
        ..Default::default()
    };
    let bundle = build_microdata_bundle(&cities, None, &config, 42).unwrap();
    for city in &cities {
        let shares = tenure_shares(bundle.records(&city.id).unwrap());
        assert!((shares[&Tenure::Renter] - 0.40).abs() < 1e-9, "{}", city.id);
    }
}
