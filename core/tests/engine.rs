use housing_core::{
    advanced::AdvancedConfig,
    aggregate::Scope,
    config::{test_cities, CityBaseline, SimConfig},
    engine::{EngineMode, SimEngine, YearState},
    error::SimError,
    history::{RawCitySeries, RawHistory, YearPoint},
    microdata::MicrodataMode,
    warning::WarningSource,
};

fn run(config: SimConfig) -> housing_core::engine::ScenarioResult {
    let _ = env_logger::builder().is_test(true).try_init();
    SimEngine::new(config).expect("valid config").run().expect("run")
}

fn balanced_city() -> CityBaseline {
    CityBaseline {
        id: "bal".into(),
        name: "Balanced".into(),
        state: "TST".into(),
        base_year: 2024,
        population: 5_000_000.0,
        net_migration: 0.0,
        natural_growth_rate: 0.0,
        dwelling_stock: 2_000_000.0,
        ..test_cities()[0].clone()
    }
}

#[test]
fn balanced_market_has_zero_gap_and_baseline_growth() {
    let mut config = SimConfig::default_test();
    config.cities = vec![balanced_city()];
    config.horizon_years = 1;

    let result = run(config);
    let path = result.city("bal").expect("city path");
    assert_eq!(path.len(), 2);

    let year1 = &path[1];
    assert_eq!(year1.supply_gap, 0.0);
    assert!((year1.price_growth - 0.04).abs() < 1e-15, "price growth {}", year1.price_growth);
    assert!((year1.rent_growth - 0.035).abs() < 1e-15, "rent growth {}", year1.rent_growth);
}

#[test]
fn year_zero_is_the_baseline() {
    let config = SimConfig::default_test();
    let cities = config.cities.clone();
    let result = run(config);
    for city in &cities {
        let first = &result.city(&city.id).unwrap()[0];
        assert_eq!(first.year, city.base_year);
        assert_eq!(first.median_price, city.median_price);
        assert_eq!(first.population, city.population);
        assert_eq!(first.price_growth, 0.0);
        assert!(first.price_to_income > 0.0);
        assert!(first.repayment_to_income > 0.0);
    }
}

#[test]
fn every_city_gets_one_state_per_year() {
    let mut config = SimConfig::default_test();
    config.horizon_years = 7;
    let result = run(config);
    for states in result.cities.values() {
        assert_eq!(states.len(), 8);
        for (i, s) in states.iter().enumerate() {
            assert_eq!(s.year, 2024 + i as i32);
        }
    }
}

#[test]
fn completions_respect_capacity_every_year() {
    let mut config = SimConfig::default_test();
    config.horizon_years = 20;
    config.levers.supply.supply_boost = 0.25;
    config.levers.planning.upzoning_intensity = 1.0;
    config.levers.public_housing.build_rate = 0.02;
    let limits = config.methodology.construction_capacity;

    let result = run(config);
    for states in result.cities.values() {
        for pair in states.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let lo = prev.completions * (1.0 - limits.max_decrease);
            let hi = prev.completions * (1.0 + limits.max_increase);
            assert!(
                next.completions >= lo * (1.0 - 1e-12) && next.completions <= hi * (1.0 + 1e-12),
                "{} {}: completions {} outside [{lo}, {hi}]",
                next.city_id,
                next.year,
                next.completions
            );
        }
    }
}

#[test]
fn growth_stays_within_caps() {
    let mut config = SimConfig::default_test();
    config.horizon_years = 30;
    config.levers.migration.net_migration_multiplier = 1.5;
    let caps = (config.methodology.price_growth_cap, config.methodology.rent_growth_cap);

    let result = run(config);
    for s in result.cities.values().flatten() {
        assert!(s.price_growth >= caps.0.min && s.price_growth <= caps.0.max);
        assert!(s.rent_growth >= caps.1.min && s.rent_growth <= caps.1.max);
    }
}

#[test]
fn single_city_scope_returns_city_values_unchanged() {
    let result = run(SimConfig::default_test());
    let syd = result.city("syd").unwrap();

    for scope in [Scope::City("syd".into()), Scope::State("NSW".into())] {
        let series = result.aggregate(&scope).expect("aggregate");
        assert_eq!(series.cities, vec!["syd".to_string()]);
        assert_eq!(series.points.len(), syd.len());
        for (p, s) in series.points.iter().zip(syd) {
            assert_eq!(p.year, s.year);
            assert_eq!(p.median_price, s.median_price);
            assert_eq!(p.median_rent, s.median_rent);
            assert_eq!(p.population, s.population);
            assert_eq!(p.supply_gap, s.supply_gap);
            assert_eq!(p.price_to_income, s.price_to_income);
            assert_eq!(p.stamp_duty_revenue, s.stamp_duty_revenue);
        }
    }
}

#[test]
fn national_scope_is_a_weighted_average() {
    let result = run(SimConfig::default_test());
    let series = result.aggregate(&Scope::National).unwrap();
    assert_eq!(series.cities.len(), 3);
    for point in &series.points {
        let prices: Vec<f64> = result
            .cities
            .values()
            .filter_map(|path| path.iter().find(|s| s.year == point.year))
            .map(|s| s.median_price)
            .collect();
        let lo = prices.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(point.median_price >= lo && point.median_price <= hi);
    }
    assert!(series.warnings.is_empty());
}

#[test]
fn unknown_scope_is_an_error() {
    let result = run(SimConfig::default_test());
    let err = result.aggregate(&Scope::City("per".into())).unwrap_err();
    assert!(matches!(err, SimError::UnknownScope { .. }));
    assert!(matches!(
        result.aggregate(&Scope::State("TAS".into())),
        Err(SimError::UnknownScope { .. })
    ));
}

#[test]
fn disabled_advanced_couplings_reproduce_aggregate_mode() {
    let plain = run(SimConfig::default_test());

    let mut config = SimConfig::default_test();
    let mut advanced = AdvancedConfig::all_enabled();
    advanced.spatial.enabled = false;
    advanced.expectations.enabled = false;
    advanced.portfolio.enabled = false;
    advanced.spatial.reallocation_share = 0.9;
    advanced.portfolio.sensitivity = 55.0;
    advanced.expectations.extrapolator_weight = 3.0;
    config.advanced = advanced;
    let disabled = run(config);

    assert_eq!(plain.mode, EngineMode::Aggregate);
    assert_eq!(disabled.mode, EngineMode::Aggregate);
    assert_eq!(plain.cities, disabled.cities);
}

#[test]
fn spatial_equilibrium_preserves_national_migration() {
    let mut config = SimConfig::default_test();
    config.horizon_years = 1;
    let plain = run(config.clone());

    config.advanced.spatial.enabled = true;
    let spatial = run(config);
    assert_eq!(spatial.mode, EngineMode::Advanced);

    let total = |r: &housing_core::engine::ScenarioResult| -> f64 {
        r.cities.values().map(|p| p[1].net_migration).sum()
    };
    assert!((total(&plain) - total(&spatial)).abs() < 1e-6);
    assert_ne!(plain.city("syd").unwrap()[1].net_migration, spatial.city("syd").unwrap()[1].net_migration);
}

#[test]
fn portfolio_demand_changes_the_path() {
    let plain = run(SimConfig::default_test());
    let mut config = SimConfig::default_test();
    config.advanced.portfolio.enabled = true;
    let portfolio = run(config);
    assert_ne!(plain.cities, portfolio.cities);
}

#[test]
fn levers_are_inert_before_start_offset() {
    let baseline = run(SimConfig::default_test());

    let mut config = SimConfig::default_test();
    config.levers.supply.supply_boost = 0.2;
    config.levers.supply.demand_reduction = 0.05;
    config.levers.credit.mortgage_rate_shift = 0.01;
    config.levers.rental.rent_cap_enabled = true;
    config.levers.timing.start_offset = 3;
    let delayed = run(config);

    for (id, path) in &baseline.cities {
        let other = delayed.city(id).unwrap();
        assert_eq!(&path[..4], &other[..4], "{id} diverged before the policy start");
        assert_ne!(path[4], other[4], "{id} unaffected after the policy start");
    }
}

#[test]
fn ramp_phases_in_mortgage_rate_shift() {
    let mut config = SimConfig::default_test();
    config.horizon_years = 5;
    config.levers.credit.mortgage_rate_shift = 0.02;
    config.levers.timing.ramp_years = 4;
    let base_rate = config.cities[0].mortgage_rate;
    let result = run(config);
    let syd = result.city("syd").unwrap();

    let expected = [0.25, 0.5, 0.75, 1.0, 1.0];
    for (state, r) in syd[1..].iter().zip(expected) {
        assert!((state.mortgage_rate - (base_rate + 0.02 * r)).abs() < 1e-12);
    }
}

#[test]
fn rent_cap_binds() {
    let mut config = SimConfig::default_test();
    config.levers.rental.rent_cap_enabled = true;
    config.levers.rental.rent_cap_rate = 0.0;
    let result = run(config);
    for s in result.cities.values().flat_map(|p| p.iter().skip(1)) {
        assert!(s.rent_growth <= 1e-12, "{} {}: {}", s.city_id, s.year, s.rent_growth);
    }
}

#[test]
fn ownership_cap_divests_down_to_the_cap() {
    let mut config = SimConfig::default_test();
    config.levers.ownership_cap.enabled = true;
    config.levers.ownership_cap.max_investor_share = 0.10;
    config.levers.ownership_cap.divestment_rate = 0.05;
    config.horizon_years = 10;
    let start = config.cities[0].investor_share;
    let result = run(config);
    let syd = result.city("syd").unwrap();

    assert!((syd[1].investor_share - (start - 0.05)).abs() < 1e-12);
    let last = syd.last().unwrap();
    assert!((last.investor_share - 0.10).abs() < 1e-9);
}

#[test]
fn out_of_range_levers_are_clamped_with_policy_warning() {
    let mut config = SimConfig::default_test();
    config.levers.supply.supply_boost = 0.9;
    let result = run(config);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.source == WarningSource::Policy && w.message.contains("supply_boost")));
}

#[test]
fn configuration_errors_fail_before_any_step() {
    let mut nan = SimConfig::default_test();
    nan.levers.credit.mortgage_rate_shift = f64::NAN;
    assert!(matches!(SimEngine::new(nan), Err(SimError::NonFinite { .. })));

    let mut empty = SimConfig::default_test();
    empty.cities.clear();
    assert!(matches!(SimEngine::new(empty), Err(SimError::NoCities)));

    let mut dup = SimConfig::default_test();
    let first = dup.cities[0].clone();
    dup.cities.push(first);
    assert!(matches!(SimEngine::new(dup), Err(SimError::DuplicateCity { .. })));

    let mut bad_stock = SimConfig::default_test();
    bad_stock.cities[1].dwelling_stock = 0.0;
    assert!(matches!(
        SimEngine::new(bad_stock),
        Err(SimError::InvalidBaseline { field: "dwelling_stock", .. })
    ));

    let mut horizon = SimConfig::default_test();
    horizon.horizon_years = 0;
    assert!(matches!(SimEngine::new(horizon), Err(SimError::InvalidHorizon { .. })));
}

#[test]
fn invalid_microdata_settings_fail_before_any_step() {
    let mut nan_sigma = SimConfig::default_test();
    nan_sigma.microdata.mode = MicrodataMode::Synthetic;
    nan_sigma.microdata.synthetic.income_sigma = f64::NAN;
    assert!(matches!(SimEngine::new(nan_sigma), Err(SimError::NonFinite { .. })));

    let mut negative_sigma = SimConfig::default_test();
    negative_sigma.microdata.synthetic.income_sigma = -0.2;
    assert!(SimEngine::new(negative_sigma).is_err());

    let mut zero_multiplier = SimConfig::default_test();
    zero_multiplier.microdata.synthetic.household_income_multiplier = 0.0;
    assert!(SimEngine::new(zero_multiplier).is_err());

    let mut real_share = SimConfig::default_test();
    real_share.microdata.real_share = 1.5;
    assert!(SimEngine::new(real_share).is_err());
}

#[test]
fn raw_history_seeds_the_first_construction_response() {
    let falling: Vec<YearPoint> = [(2020, 110.0), (2021, 108.0), (2022, 104.0), (2023, 100.0), (2024, 95.0)]
        .into_iter()
        .map(|(year, value)| YearPoint { year, value: Some(value) })
        .collect();
    let raw = RawHistory {
        cities: [("syd".to_string(), RawCitySeries { price: falling, ..Default::default() })].into(),
    };

    let mut plain = SimConfig::default_test();
    plain.horizon_years = 1;
    let mut seeded = plain.clone();
    seeded.raw_history = Some(raw);

    let without = run(plain);
    let with = run(seeded);

    let history = with.history.as_ref().expect("history bundle");
    assert!(!history.synthetic);
    assert_eq!(history.start_year, 2020);
    assert!(without.history.is_none());

    // A falling market damps the first year's building below the baseline response.
    let base = &without.city("syd").unwrap()[1];
    let damped = &with.city("syd").unwrap()[1];
    assert!(damped.completions < base.completions, "{} vs {}", damped.completions, base.completions);
    assert_eq!(with.city("mel").unwrap()[1].year, 2025);
}

#[test]
fn microdata_produces_tenure_stress_rows() {
    let mut config = SimConfig::default_test();
    config.horizon_years = 3;
    config.microdata.mode = MicrodataMode::Synthetic;
    let result = run(config);
    assert!(result.microdata.is_some());

    let syd: &[YearState] = result.city("syd").unwrap();
    for state in syd {
        assert_eq!(state.tenure_stress.len(), 4, "year {}", state.year);
        for row in &state.tenure_stress {
            assert!((0.0..=1.0).contains(&row.stress_share));
        }
        assert!(!state.renter_deciles.is_empty() && state.renter_deciles.len() <= 10);
        for pair in state.renter_deciles.windows(2) {
            assert!(pair[0].mean_income <= pair[1].mean_income);
        }
    }
    // Outright owners carry no modelled housing cost.
    let outright = syd[1]
        .tenure_stress
        .iter()
        .find(|r| r.tenure == housing_core::microdata::Tenure::Outright)
        .unwrap();
    assert_eq!(outright.stress_share, 0.0);
}

#[test]
fn no_microdata_means_no_stress_rows() {
    let result = run(SimConfig::default_test());
    assert!(result.microdata.is_none());
    assert!(result.cities.values().flatten().all(|s| s.tenure_stress.is_empty()));
}
