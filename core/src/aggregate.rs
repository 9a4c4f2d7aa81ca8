//! Scope aggregation: population-weighted averages over a set of cities.
//!
//! Weights are normalised before summing, so a one-city scope returns that
//! city's values unchanged. Cities are aligned by calendar year.

use crate::{
    config::CityBaseline,
    engine::YearState,
    error::{SimError, SimResult},
    types::{CityId, Year},
    warning::{Warning, WarningSource},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    National,
    State(String),
    City(CityId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::National => write!(f, "national"),
            Scope::State(s) => write!(f, "state:{s}"),
            Scope::City(c)  => write!(f, "city:{c}"),
        }
    }
}

/// `national`, `state:<code>` or `city:<id>`.
impl FromStr for Scope {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s.eq_ignore_ascii_case("national") => Ok(Scope::National),
            Some(("state", code)) if !code.is_empty() => Ok(Scope::State(code.to_string())),
            Some(("city", id)) if !id.is_empty() => Ok(Scope::City(id.to_string())),
            _ => Err(SimError::UnknownScope { scope: s.to_string() }),
        }
    }
}

impl Scope {
    /// Baselines belonging to this scope, in input order.
    pub fn members<'a>(&self, baselines: &'a [CityBaseline]) -> Vec<&'a CityBaseline> {
        baselines
            .iter()
            .filter(|b| match self {
                Scope::National => true,
                Scope::State(s) => b.state.eq_ignore_ascii_case(s),
                Scope::City(c)  => &b.id == c,
            })
            .collect()
    }
}

/// Weighted view of one year across a scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatePoint {
    pub year:                Year,
    pub cities:              usize,
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
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateSeries {
    pub scope:    Scope,
    pub cities:   Vec<CityId>,
    pub points:   Vec<AggregatePoint>,
    pub warnings: Vec<Warning>,
}

impl AggregateSeries {
    pub fn year(&self, year: Year) -> Option<&AggregatePoint> {
        self.points.iter().find(|p| p.year == year)
    }

    pub fn last(&self) -> Option<&AggregatePoint> {
        self.points.last()
    }
}

/// Normalised population weights. Falls back to equal weights when the
/// total is zero or non-finite; the bool reports the fallback.
pub fn population_weights(states: &[&YearState]) -> (Vec<f64>, bool) {
    let raw: Vec<f64> = states
        .iter()
        .map(|s| if s.population.is_finite() { s.population.max(0.0) } else { 0.0 })
        .collect();
    let total: f64 = raw.iter().sum();
    if total > 0.0 && total.is_finite() {
        (raw.iter().map(|w| w / total).collect(), false)
    } else {
        let n = states.len().max(1) as f64;
        (vec![1.0 / n; states.len()], true)
    }
}

fn weighted(states: &[&YearState], weights: &[f64], field: impl Fn(&YearState) -> f64) -> f64 {
    states.iter().zip(weights).map(|(s, w)| w * field(s)).sum()
}

pub fn aggregate_year(year: Year, states: &[&YearState]) -> (AggregatePoint, bool) {
    let (w, fallback) = population_weights(states);
    let point = AggregatePoint {
        year,
        cities:              states.len(),
        population:          weighted(states, &w, |s| s.population),
        net_migration:       weighted(states, &w, |s| s.net_migration),
        dwelling_stock:      weighted(states, &w, |s| s.dwelling_stock),
        completions:         weighted(states, &w, |s| s.completions),
        demolitions:         weighted(states, &w, |s| s.demolitions),
        median_price:        weighted(states, &w, |s| s.median_price),
        median_rent:         weighted(states, &w, |s| s.median_rent),
        median_wage:         weighted(states, &w, |s| s.median_wage),
        mortgage_rate:       weighted(states, &w, |s| s.mortgage_rate),
        investor_share:      weighted(states, &w, |s| s.investor_share),
        supply_gap:          weighted(states, &w, |s| s.supply_gap),
        price_growth:        weighted(states, &w, |s| s.price_growth),
        rent_growth:         weighted(states, &w, |s| s.rent_growth),
        price_to_income:     weighted(states, &w, |s| s.price_to_income),
        rent_to_income:      weighted(states, &w, |s| s.rent_to_income),
        repayment_to_income: weighted(states, &w, |s| s.repayment_to_income),
        housing_cost_index:  weighted(states, &w, |s| s.housing_cost_index),
        stamp_duty_revenue:  weighted(states, &w, |s| s.stamp_duty_revenue),
    };
    (point, fallback)
}

/// Aggregate the simulated paths of every city in `scope`.
pub fn aggregate_scope(
    baselines: &[CityBaseline],
    paths: &BTreeMap<CityId, Vec<YearState>>,
    scope: &Scope,
) -> SimResult<AggregateSeries> {
    let members: Vec<&CityBaseline> = scope
        .members(baselines)
        .into_iter()
        .filter(|b| paths.contains_key(&b.id))
        .collect();
    if members.is_empty() {
        return Err(SimError::UnknownScope { scope: scope.to_string() });
    }

    let mut by_year: BTreeMap<Year, Vec<&YearState>> = BTreeMap::new();
    for member in &members {
        for state in &paths[&member.id] {
            by_year.entry(state.year).or_default().push(state);
        }
    }

    let mut warnings = Vec::new();
    let mut fallback_years = Vec::new();
    let points = by_year
        .into_iter()
        .map(|(year, states)| {
            let (point, fallback) = aggregate_year(year, &states);
            if fallback {
                fallback_years.push(year);
            }
            point
        })
        .collect();

    if !fallback_years.is_empty() {
        let msg = format!(
            "{scope}: zero total population in {} year(s) from {}; equal weights used",
            fallback_years.len(),
            fallback_years[0]
        );
        log::warn!("{msg}");
        warnings.push(Warning::new(WarningSource::Engine, msg));
    }

    Ok(AggregateSeries {
        scope: scope.clone(),
        cities: members.iter().map(|b| b.id.clone()).collect(),
        points,
        warnings,
    })
}
