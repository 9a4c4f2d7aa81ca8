use housing_core::{
    config::test_cities,
    history::{
        build_history_bundle, impute_history_bundle, impute_series, synthesize_history,
        GrowthPeriod, HistoryField, MacroGrowthProfile, RawCitySeries, RawHistory, YearPoint,
    },
};

fn points(values: &[(i32, Option<f64>)]) -> Vec<YearPoint> {
    values.iter().map(|&(year, value)| YearPoint { year, value }).collect()
}

fn raw_syd() -> RawHistory {
    let series = RawCitySeries {
        price: points(&[(1990, Some(50.0)), (2010, Some(100.0)), (2011, None), (2012, Some(121.0)), (2013, Some(-5.0))]),
        rent: Vec::new(),
        wage: Vec::new(),
        population: points(&[(2010, Some(4_600_000.0)), (2013, Some(4_800_000.0))]),
        stock: points(&[(2010, Some(1_700_000.0)), (2011, Some(1_720_000.0)), (2012, Some(1_740_000.0)), (2013, Some(1_760_000.0))]),
    };
    RawHistory { cities: [("syd".to_string(), series)].into() }
}

#[test]
fn alignment_keeps_missing_years_missing() {
    let bundle = build_history_bundle(&raw_syd(), 2010..=2013).unwrap();
    let price = bundle.city("syd").unwrap().field(HistoryField::Price).unwrap();
    assert_eq!(price.values, vec![Some(100.0), None, Some(121.0), None]);
    assert_eq!(bundle.len(), 4);

    // 1990 is outside the range; -5 is not a usable value.
    assert!(bundle.notes.iter().any(|n| n.contains("dropped 1 observations")));
    assert!(bundle.warnings.iter().any(|w| w.message.contains("non-positive")));
}

#[test]
fn inverted_range_is_rejected() {
    assert!(build_history_bundle(&raw_syd(), 2013..=2010).is_err());
}

#[test]
fn year_span_covers_observed_points_only() {
    let mut raw = raw_syd();
    raw.cities.get_mut("syd").unwrap().wage = points(&[(2030, None)]);
    assert_eq!(raw.year_span(), Some(1990..=2013));
    assert_eq!(RawHistory::default().year_span(), None);
}

#[test]
fn imputation_fills_gaps_and_does_not_touch_the_input() {
    let aligned = build_history_bundle(&raw_syd(), 2010..=2013).unwrap();
    let before = aligned.clone();
    let imputed = impute_history_bundle(&aligned, &test_cities());
    assert_eq!(aligned, before);

    let syd = imputed.city("syd").unwrap();
    let price = syd.dense(HistoryField::Price).expect("price complete");
    assert!((price[1] - 110.0).abs() < 1e-9);
    assert!((price[3] - 133.1).abs() < 1e-9);
    let meta = &syd.field(HistoryField::Price).unwrap().meta;
    assert!(meta.imputed);
    assert!((meta.imputed_share - 0.5).abs() < 1e-12);

    let stock = syd.field(HistoryField::Stock).unwrap();
    assert!(!stock.meta.imputed);
    assert_eq!(stock.meta.imputed_share, 0.0);
}

#[test]
fn rent_without_observations_is_derived_from_price() {
    let imputed = impute_history_bundle(&build_history_bundle(&raw_syd(), 2010..=2013).unwrap(), &test_cities());
    let syd = imputed.city("syd").unwrap();
    let baseline = &test_cities()[0];
    let price = syd.dense(HistoryField::Price).unwrap();
    let rent = syd.dense(HistoryField::Rent).unwrap();
    for (p, r) in price.iter().zip(&rent) {
        assert!((r - p * baseline.rental_yield()).abs() < 1e-9);
    }
    assert!(imputed
        .warnings
        .iter()
        .any(|w| w.city.as_deref() == Some("syd") && w.message.starts_with("rent:")));
}

#[test]
fn field_without_observations_is_anchored_on_baseline() {
    let imputed = impute_history_bundle(&build_history_bundle(&raw_syd(), 2010..=2013).unwrap(), &test_cities());
    let baseline = &test_cities()[0];
    let wage = imputed.city("syd").unwrap().dense(HistoryField::Wage).unwrap();

    // Base year 2024 sits 11 years after 2013.
    let expected = baseline.median_wage / (1.0 + baseline.wage_growth).powi(11);
    assert!((wage[3] - expected).abs() / expected < 1e-9);
    assert!(imputed.warnings.iter().any(|w| w.message.contains("wage: no observations")));
}

#[test]
fn implausible_units_are_flagged_not_rejected() {
    let mut raw = raw_syd();
    // Weekly wages instead of annual.
    raw.cities.get_mut("syd").unwrap().wage = points(&[(2010, Some(1_500.0)), (2013, Some(1_650.0))]);
    let imputed = impute_history_bundle(&build_history_bundle(&raw, 2010..=2013).unwrap(), &test_cities());
    assert!(imputed.city("syd").unwrap().dense(HistoryField::Wage).is_some());
    assert!(imputed.warnings.iter().any(|w| w.message.contains("check units")));
}

#[test]
fn complete_series_is_an_identity() {
    let values: Vec<Option<f64>> = (0..12).map(|i| Some(100.0 * 1.03f64.powi(i))).collect();
    let out = impute_series(&values, 0.04, None);
    assert_eq!(out.values, values);
    assert!(!out.meta.imputed);
}

#[test]
fn two_endpoints_reproduce_geometric_growth() {
    let mut values = vec![None; 6];
    values[0] = Some(200.0);
    values[5] = Some(200.0 * 1.05f64.powi(5));
    let out = impute_series(&values, 0.0, None);
    for (i, v) in out.values.iter().enumerate() {
        let expected = 200.0 * 1.05f64.powi(i as i32);
        assert!((v.unwrap() - expected).abs() / expected < 1e-12, "year {i}");
    }
}

#[test]
fn synthetic_history_is_anchored_and_honours_periods() {
    let cities = test_cities();
    let profile = MacroGrowthProfile {
        periods: vec![GrowthPeriod { start: 2020, end: 2021, price_growth: Some(0.0), ..Default::default() }],
        ..Default::default()
    };
    let bundle = synthesize_history(&cities, &profile, 2018..=2024).unwrap();
    assert!(bundle.synthetic);
    assert_eq!(bundle.cities.len(), 3);

    let syd = bundle.city("syd").unwrap();
    let price = syd.dense(HistoryField::Price).unwrap();
    let p = cities[0].median_price;
    assert_eq!(price[6], p);
    assert!((price[5] - p / 1.06).abs() < 1e-6);
    assert!((price[3] - p / 1.06f64.powi(3)).abs() < 1e-6);
    assert!((price[2] - price[3]).abs() < 1e-6);
    assert!((price[1] - price[3]).abs() < 1e-6);
    assert!((price[0] - p / 1.06f64.powi(4)).abs() < 1e-6);

    // Wage follows each city's own growth when the profile leaves it unset.
    let wage = syd.dense(HistoryField::Wage).unwrap();
    assert!((wage[5] - cities[0].median_wage / (1.0 + cities[0].wage_growth)).abs() < 1e-6);
    assert!(bundle.notes.iter().any(|n| n.contains("synthetic")));
}

#[test]
fn last_growth_reads_the_most_recent_pair() {
    let bundle = build_history_bundle(&raw_syd(), 2010..=2013).unwrap();
    let g = bundle.last_growth("syd", HistoryField::Stock, 2024).unwrap();
    assert!((g - (1_760_000.0 / 1_740_000.0 - 1.0)).abs() < 1e-12);
    // 2011 is missing, so no usable pair ends at or before 2012.
    assert_eq!(bundle.last_growth("syd", HistoryField::Price, 2012), None);
}
