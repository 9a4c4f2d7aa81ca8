//! The simulation engine: advances every city one year at a time.
//!
//! EXECUTION ORDER per simulated year (fixed, never reordered):
//!   1. Local fundamentals for every city (migration, wage, housing cost).
//!   2. Migration reallocation across cities (advanced: spatial equilibrium).
//!      This is a barrier: it needs every city's fundamentals for the year.
//!   3. One `step_city` transition per city.
//!   4. Stress rows from the microdata bundle, if present.
//!
//! RULES:
//!   - A city's year t+1 reads only year t state (its own, plus all
//!     cities' fundamentals in step 2).
//!   - Baselines and levers are never mutated.
//!   - Every run returns a freshly built `ScenarioResult`.

use crate::{
    advanced::{self, AdvancedConfig, LocalFundamentals},
    aggregate::{aggregate_scope, AggregateSeries, Scope},
    config::{CityBaseline, SimConfig},
    error::{SimError, SimResult},
    history::{self, HistoryBundle, HistoryField},
    methodology::{
        cap_completions_by_capacity, completions_next, construction_response, finite_or,
        households, housing_cost_index, annual_mortgage_repayment, nominal_price_growth,
        nominal_rent_growth, ratio, stamp_duty_revenue, supply_gap, MethodologyParams,
        INDEX_LOAN_TO_VALUE,
    },
    microdata::{build_microdata_bundle, MicrodataBundle, MicrodataMode},
    policy::PolicyLevers,
    stress::{self, DecileStress, TenureStress},
    types::{CityId, Year},
    warning::Warning,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One city in one year. Produced exactly once per (city, year).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct YearState {
    pub city_id:             CityId,
    pub year:                Year,
    pub population:          f64,
    pub net_migration:       f64,
    pub dwelling_stock:      f64,
    pub completions:         f64,
    pub demolitions:         f64,
    pub median_price:        f64,
    pub median_rent:         f64,
    pub median_wage:         f64,
    pub mortgage_rate:       f64,
    pub investor_share:      f64,
    pub supply_gap:          f64,
    pub price_growth:        f64,
    pub rent_growth:         f64,
    pub price_to_income:     f64,
    pub rent_to_income:      f64,
    pub repayment_to_income: f64,
    pub housing_cost_index:  f64,
    pub stamp_duty_revenue:  f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tenure_stress:       Vec<TenureStress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub renter_deciles:      Vec<DecileStress>,
}

impl YearState {
    /// Year-0 state straight from the baseline.
    pub fn from_baseline(city: &CityBaseline, params: &MethodologyParams) -> Self {
        let mut state = Self {
            city_id:             city.id.clone(),
            year:                city.base_year,
            population:          city.population,
            net_migration:       city.net_migration,
            dwelling_stock:      city.dwelling_stock,
            completions:         city.annual_completions,
            demolitions:         city.dwelling_stock * city.demolition_rate,
            median_price:        city.median_price,
            median_rent:         city.median_rent,
            median_wage:         city.median_wage,
            mortgage_rate:       city.mortgage_rate,
            investor_share:      city.investor_share,
            supply_gap:          supply_gap(
                households(city.population, params.persons_per_household),
                city.dwelling_stock,
            ),
            price_growth:        0.0,
            rent_growth:         0.0,
            price_to_income:     0.0,
            rent_to_income:      0.0,
            repayment_to_income: 0.0,
            housing_cost_index:  0.0,
            stamp_duty_revenue:  0.0,
            tenure_stress:       Vec::new(),
            renter_deciles:      Vec::new(),
        };
        state.refresh_derived(city, params, params.stamp_duty_rate);
        state
    }

    /// Recompute ratios, cost index and stamp duty from the level fields.
    fn refresh_derived(&mut self, city: &CityBaseline, params: &MethodologyParams, stamp_duty_rate: f64) {
        self.price_to_income = ratio(self.median_price, self.median_wage);
        self.rent_to_income = ratio(self.median_rent, self.median_wage);
        let repayment = annual_mortgage_repayment(
            self.median_price * INDEX_LOAN_TO_VALUE,
            self.mortgage_rate,
            city.mortgage_term_years,
        );
        self.repayment_to_income = ratio(repayment, self.median_wage);
        self.housing_cost_index = housing_cost_index(
            self.median_price,
            self.median_rent,
            self.mortgage_rate,
            city.mortgage_term_years,
            params.owner_cost_share,
        );
        self.stamp_duty_revenue =
            stamp_duty_revenue(self.dwelling_stock, params.turnover_rate, self.median_price, stamp_duty_rate);
    }
}

/// Everything one transition reads besides the previous state.
pub struct StepContext<'a> {
    pub city:     &'a CityBaseline,
    pub params:   &'a MethodologyParams,
    pub levers:   &'a PolicyLevers,
    pub advanced: &'a AdvancedConfig,
}

/// Migration before any cross-city reallocation.
pub fn local_migration(city: &CityBaseline, levers: &PolicyLevers, ramp: f64) -> f64 {
    let mult = 1.0 + (levers.migration.net_migration_multiplier - 1.0) * ramp;
    city.net_migration * mult
}

/// One `YearState(t) → YearState(t+1)` transition.
///
/// `last_growth` is the price growth agents observed last year.
pub fn step_city(
    ctx: &StepContext<'_>,
    prev: &YearState,
    ramp: f64,
    net_migration: f64,
    last_growth: f64,
) -> YearState {
    let StepContext { city, params, levers, advanced } = *ctx;

    // Investor demand: policy shock and (advanced) portfolio allocation.
    let shock = params.curves.investor_demand_shock.eval(levers.investor_policy_intensity()) * ramp;
    let portfolio = advanced::portfolio_multiplier(
        &advanced.portfolio,
        ratio(prev.median_rent, prev.median_price),
        last_growth,
        prev.mortgage_rate,
    );
    let investor_mult = (1.0 - shock) * portfolio;
    let investor_factor = 1.0 + prev.investor_share * (investor_mult - 1.0);

    let demand = households(prev.population + net_migration, params.persons_per_household)
        * (1.0 - levers.supply.demand_reduction * ramp)
        * investor_factor;
    let gap = supply_gap(demand, prev.dwelling_stock);

    // Price.
    let credit = -params.credit_price_sensitivity
        * (levers.credit.mortgage_rate_shift + 0.5 * levers.credit.serviceability_buffer);
    let grant = params.first_home_grant_passthrough * ratio(levers.subsidies.first_home_grant, prev.median_price);
    let foreign = -params.foreign_surcharge_price_effect * levers.tax.foreign_buyer_surcharge;
    let price_growth = nominal_price_growth(params, gap, ramp * (credit + grant + foreign));

    // Ownership cap divestment.
    let cap = &levers.ownership_cap;
    let divest_share = if cap.enabled && prev.investor_share > cap.max_investor_share {
        cap.divestment_rate.min(prev.investor_share - cap.max_investor_share) * ramp
    } else {
        0.0
    };

    // Rent.
    let el = &city.rent_elasticities;
    let rent_modifier = ramp
        * (el.assistance_passthrough * levers.subsidies.rent_assistance_change
            - params.vacancy_tax_rent_effect * levers.tax.vacancy_tax)
        + el.investor_exit * params.curves.divestment_rental_shock.eval(divest_share);
    let mut rent_growth = nominal_rent_growth(params, gap, el.supply_gap, rent_modifier);
    if levers.rental.rent_cap_enabled {
        let capped = rent_growth.min(levers.rental.rent_cap_rate);
        rent_growth += (capped - rent_growth) * ramp;
    }

    // Construction.
    let expected = advanced::expected_price_growth(&advanced.expectations, params, last_growth, gap);
    let boost = ramp
        * (levers.supply.supply_boost + levers.planning.upzoning_intensity * params.upzoning_supply_effect);
    let public = prev.dwelling_stock * levers.public_housing.build_rate * ramp;
    let proposed = completions_next(city.annual_completions, boost, construction_response(params, expected)) + public;
    let completions = cap_completions_by_capacity(prev.completions, proposed, params.construction_capacity);

    let demolitions = prev.dwelling_stock * city.demolition_rate;
    let withdrawn = prev.dwelling_stock * divest_share * params.divestment_stock_withdrawal;
    let dwelling_stock = (prev.dwelling_stock + completions - demolitions - withdrawn).max(0.0);

    let stamp_duty_rate = (params.stamp_duty_rate + levers.tax.stamp_duty_rate_change * ramp).max(0.0);
    let mut next = YearState {
        city_id:             prev.city_id.clone(),
        year:                prev.year + 1,
        population:          finite_or(
            prev.population + net_migration + prev.population * city.natural_growth_rate,
            prev.population,
        )
        .max(0.0),
        net_migration,
        dwelling_stock,
        completions,
        demolitions,
        median_price:        prev.median_price * (1.0 + price_growth),
        median_rent:         prev.median_rent * (1.0 + rent_growth),
        median_wage:         prev.median_wage * (1.0 + city.wage_growth),
        mortgage_rate:       (city.mortgage_rate + levers.credit.mortgage_rate_shift * ramp).max(0.0),
        investor_share:      (prev.investor_share - divest_share).max(0.0),
        supply_gap:          gap,
        price_growth,
        rent_growth,
        price_to_income:     0.0,
        rent_to_income:      0.0,
        repayment_to_income: 0.0,
        housing_cost_index:  0.0,
        stamp_duty_revenue:  0.0,
        tenure_stress:       Vec::new(),
        renter_deciles:      Vec::new(),
    };
    next.refresh_derived(city, params, stamp_duty_rate);
    next
}

// ── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    Aggregate,
    Advanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub mode:                EngineMode,
    pub methodology_version: String,
    pub horizon_years:       u32,
    /// Year 0 (baseline) through year `horizon_years`, per city.
    pub cities:              BTreeMap<CityId, Vec<YearState>>,
    pub warnings:            Vec<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history:             Option<HistoryBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microdata:           Option<MicrodataBundle>,
    #[serde(skip)]
    baselines:               Vec<CityBaseline>,
}

impl ScenarioResult {
    pub fn city(&self, id: &str) -> Option<&[YearState]> {
        self.cities.get(id).map(|v| v.as_slice())
    }

    /// Population-weighted view of a scope.
    pub fn aggregate(&self, scope: &Scope) -> SimResult<AggregateSeries> {
        aggregate_scope(&self.baselines, &self.cities, scope)
    }
}

// ── Engine ──────────────────────────────────────────────────────────

pub struct SimEngine {
    config:   SimConfig,
    levers:   PolicyLevers,
    warnings: Vec<Warning>,
}

impl SimEngine {
    /// Validate configuration and clamp levers. Fails before any step runs.
    pub fn new(config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        let (levers, warnings) = config.levers.sanitized()?;
        Ok(Self { config, levers, warnings })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Run the configured scenario, building history and microdata
    /// bundles from the raw tables when present.
    pub fn run(&self) -> SimResult<ScenarioResult> {
        let history = self.prepare_history()?;
        let microdata = self.prepare_microdata()?;
        self.run_with(history, microdata)
    }

    /// Run against explicit bundles.
    pub fn run_with(
        &self,
        history: Option<HistoryBundle>,
        microdata: Option<MicrodataBundle>,
    ) -> SimResult<ScenarioResult> {
        let cfg = &self.config;
        let params = &cfg.methodology;
        let mode = if cfg.advanced.any_enabled() { EngineMode::Advanced } else { EngineMode::Aggregate };
        log::info!(
            "simulating {} cities over {} years ({mode:?}, methodology {})",
            cfg.cities.len(),
            cfg.horizon_years,
            params.version
        );

        let mut warnings = self.warnings.clone();
        if let Some(h) = &history {
            warnings.extend(h.warnings.iter().cloned());
        }
        if let Some(m) = &microdata {
            warnings.extend(m.warnings.iter().cloned());
        }

        let mut paths: Vec<Vec<YearState>> = cfg
            .cities
            .iter()
            .map(|c| vec![YearState::from_baseline(c, params)])
            .collect();
        let mut last_growth: Vec<f64> = cfg
            .cities
            .iter()
            .map(|c| initial_growth(c, history.as_ref(), params))
            .collect();

        for t in 0..cfg.horizon_years {
            let ramp = self.levers.ramp(t);

            // 1. Local fundamentals.
            let fundamentals: Vec<LocalFundamentals> = cfg
                .cities
                .iter()
                .zip(&paths)
                .map(|(city, path)| {
                    let prev = last(path);
                    LocalFundamentals {
                        local_migration: local_migration(city, &self.levers, ramp),
                        wage:            prev.median_wage,
                        housing_cost:    prev.housing_cost_index,
                        amenity:         city.amenity,
                    }
                })
                .collect();

            // 2. Barrier: reallocation needs every city's fundamentals.
            let migration = advanced::reallocate_migration(&cfg.advanced.spatial, params, &fundamentals);

            // 3. Transitions.
            for (i, city) in cfg.cities.iter().enumerate() {
                let ctx = StepContext { city, params, levers: &self.levers, advanced: &cfg.advanced };
                let mut next = step_city(&ctx, last(&paths[i]), ramp, migration[i], last_growth[i]);
                last_growth[i] = next.price_growth;

                // 4. Stress rows.
                if let Some(records) = microdata.as_ref().and_then(|m| m.records(&city.id)) {
                    next.tenure_stress = stress::tenure_stress(records, &next, city);
                    next.renter_deciles = stress::renter_deciles(records, &next, city);
                }
                log::debug!(
                    "{} {}: gap={:.4} price_g={:.4} rent_g={:.4} completions={:.0}",
                    city.id, next.year, next.supply_gap, next.price_growth, next.rent_growth, next.completions
                );
                paths[i].push(next);
            }
        }

        if let Some(bundle) = &microdata {
            for (i, city) in cfg.cities.iter().enumerate() {
                if let (Some(records), Some(first)) = (bundle.records(&city.id), paths[i].first_mut()) {
                    first.tenure_stress = stress::tenure_stress(records, first, city);
                    first.renter_deciles = stress::renter_deciles(records, first, city);
                }
            }
        }

        let cities = cfg.cities.iter().map(|c| c.id.clone()).zip(paths).collect();
        Ok(ScenarioResult {
            mode,
            methodology_version: params.version.clone(),
            horizon_years: cfg.horizon_years,
            cities,
            warnings,
            history,
            microdata,
            baselines: cfg.cities.clone(),
        })
    }

    /// Imputed history from the raw table, or a synthetic one from the
    /// macro profile. None when neither is configured.
    pub fn prepare_history(&self) -> SimResult<Option<HistoryBundle>> {
        let cfg = &self.config;
        let bundle = match (&cfg.raw_history, &cfg.history_profile) {
            (Some(raw), _) => {
                let years = match cfg.history_years {
                    Some(r) => r.start..=r.end,
                    None => match raw.year_span() {
                        Some(span) => span,
                        None => {
                            return Ok(Some(HistoryBundle::empty_with_warning(
                                "raw history contains no observations",
                            )))
                        }
                    },
                };
                let aligned = history::build_history_bundle(raw, years)?;
                history::impute_history_bundle(&aligned, &cfg.cities)
            }
            (None, Some(profile)) => {
                let years = match cfg.history_years {
                    Some(r) => r.start..=r.end,
                    None => {
                        let base = cfg.cities.iter().map(|c| c.base_year).min().ok_or(SimError::NoCities)?;
                        (base - 15)..=base
                    }
                };
                history::synthesize_history(&cfg.cities, profile, years)?
            }
            (None, None) => return Ok(None),
        };
        Ok(Some(bundle))
    }

    pub fn prepare_microdata(&self) -> SimResult<Option<MicrodataBundle>> {
        let cfg = &self.config;
        if cfg.raw_microdata.is_none() && cfg.microdata.tenure_targets.is_none()
            && cfg.microdata.mode == MicrodataMode::Auto
        {
            return Ok(None);
        }
        let bundle = build_microdata_bundle(&cfg.cities, cfg.raw_microdata.as_ref(), &cfg.microdata, cfg.seed)?;
        Ok(Some(bundle))
    }
}

fn last(path: &[YearState]) -> &YearState {
    &path[path.len() - 1]
}

/// Growth agents saw before the first simulated year: the last observed
/// price growth when a history covers the base year, else the baseline.
fn initial_growth(city: &CityBaseline, history: Option<&HistoryBundle>, params: &MethodologyParams) -> f64 {
    history
        .and_then(|h| h.last_growth(&city.id, HistoryField::Price, city.base_year))
        .map(|g| params.price_growth_cap.apply(g))
        .unwrap_or(params.baseline_price_growth)
}

/// Convenience: build the engine, run, and return the aggregate for a scope.
pub fn run_scope(config: SimConfig, scope: &Scope) -> SimResult<(ScenarioResult, AggregateSeries)> {
    let engine = SimEngine::new(config)?;
    let result = engine.run()?;
    let series = result.aggregate(scope)?;
    Ok((result, series))
}
