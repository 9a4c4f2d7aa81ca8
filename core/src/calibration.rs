//! Grid-search calibration of the market adjustment speed against history.
//!
//! For each candidate value, every eligible city's price and rent are
//! replayed from their first observed year with population, stock and
//! wage held at their observed values. The objective is the pooled RMSE of
//! `ln(price/wage) + rent_weight · ln(rent/wage)` against the observed
//! series. Per-city fits also report the two ratio errors separately. The first minimiser wins, so identical inputs always produce an
//! identical report.

use crate::{
    config::CityBaseline,
    error::{SimError, SimResult},
    history::{HistoryBundle, HistoryField},
    methodology::{
        ensure_finite, households, nominal_price_growth, nominal_rent_growth, supply_gap, MethodologyParams,
    },
    types::CityId,
    warning::{Warning, WarningSource},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ADJUSTMENT_SPEED: &str = "market_adjustment_speed";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ParamBounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationOptions {
    /// Overrides keyed by parameter name.
    pub bounds:            BTreeMap<String, ParamBounds>,
    pub grid_points:       usize,
    /// Shortest history a city needs to take part.
    pub min_years:         usize,
    pub holdout_years:     usize,
    /// Shortest history that also gets a holdout score.
    pub holdout_min_years: usize,
    pub rent_weight:       f64,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            bounds:            BTreeMap::new(),
            grid_points:       60,
            min_years:         8,
            holdout_years:     5,
            holdout_min_years: 15,
            rent_weight:       0.35,
        }
    }
}

impl CalibrationOptions {
    pub fn validate(&self) -> SimResult<()> {
        let w = ensure_finite("calibration.rent_weight", self.rent_weight)?;
        if w < 0.0 {
            return Err(SimError::Other(anyhow::anyhow!("calibration.rent_weight must be >= 0, got {w}")));
        }
        Ok(())
    }

    pub fn bounds_for(&self, name: &str) -> ParamBounds {
        self.bounds.get(name).copied().unwrap_or(ParamBounds { min: 0.20, max: 1.00 })
    }

    /// Evenly spaced candidates, endpoints included.
    pub fn grid(&self, name: &str) -> SimResult<Vec<f64>> {
        let b = self.bounds_for(name);
        if !b.min.is_finite() || !b.max.is_finite() || b.min > b.max {
            return Err(SimError::Other(anyhow::anyhow!(
                "invalid calibration bounds for {name}: [{}, {}]",
                b.min,
                b.max
            )));
        }
        let n = self.grid_points.max(1);
        if n == 1 {
            return Ok(vec![b.min]);
        }
        Ok((0..n).map(|i| b.min + (b.max - b.min) * i as f64 / (n - 1) as f64).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CityFit {
    pub city_id:              CityId,
    pub years:                usize,
    /// On the combined objective.
    pub rmse:                 f64,
    pub rmse_price_to_income: f64,
    pub rmse_rent_to_income:  f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoldoutScore {
    pub years:  usize,
    pub cities: usize,
    pub rmse:   f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationReport {
    pub param_name:          String,
    pub fitted_value:        f64,
    pub default_value:       f64,
    /// None when no city was eligible.
    pub grid_rmse:           Option<f64>,
    pub grid_points:         usize,
    pub city_fits:           Vec<CityFit>,
    pub holdout:             Option<HoldoutScore>,
    pub eligible_cities:     usize,
    pub requested_cities:    usize,
    pub methodology_version: String,
    pub warnings:            Vec<Warning>,
    pub notes:               Vec<String>,
}

impl CalibrationReport {
    /// New parameter set with the fitted value applied.
    pub fn apply_to(&self, params: &MethodologyParams) -> MethodologyParams {
        params.with_adjustment_speed(self.fitted_value)
    }

    pub fn is_default(&self) -> bool {
        self.grid_rmse.is_none()
    }
}

/// Observed series of one eligible city, all strictly positive.
struct CitySeries<'a> {
    id:         &'a str,
    elasticity: f64,
    price:      Vec<f64>,
    rent:       Vec<f64>,
    wage:       Vec<f64>,
    population: Vec<f64>,
    stock:      Vec<f64>,
}

impl CitySeries<'_> {
    fn len(&self) -> usize {
        self.price.len()
    }

    /// Squared errors per year (year 0 is the anchor and excluded).
    fn squared_errors(&self, params: &MethodologyParams, rent_weight: f64) -> Vec<YearErrors> {
        let mut price = self.price[0];
        let mut rent = self.rent[0];
        let mut errors = Vec::with_capacity(self.len().saturating_sub(1));
        for t in 1..self.len() {
            let demand = households(self.population[t - 1], params.persons_per_household);
            let gap = supply_gap(demand, self.stock[t - 1]);
            price *= 1.0 + nominal_price_growth(params, gap, 0.0);
            rent *= 1.0 + nominal_rent_growth(params, gap, self.elasticity, 0.0);
            let wage = self.wage[t];
            let pti = (price / wage).ln() - (self.price[t] / wage).ln();
            let rti = (rent / wage).ln() - (self.rent[t] / wage).ln();
            errors.push(YearErrors {
                combined:        (pti + rent_weight * rti).powi(2),
                price_to_income: pti.powi(2),
                rent_to_income:  rti.powi(2),
            });
        }
        errors
    }
}

#[derive(Debug, Clone, Copy)]
struct YearErrors {
    combined:        f64,
    price_to_income: f64,
    rent_to_income:  f64,
}

fn rmse_of(errors: &[YearErrors], pick: impl Fn(&YearErrors) -> f64) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    (errors.iter().map(pick).sum::<f64>() / errors.len() as f64).sqrt()
}

fn rmse(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    (errors.iter().sum::<f64>() / errors.len() as f64).sqrt()
}

/// Fit the adjustment speed. Infeasible inputs yield a default report
/// with warnings, never an error; only invalid options are rejected.
pub fn calibrate(
    bundle: &HistoryBundle,
    baselines: &[CityBaseline],
    params: &MethodologyParams,
    options: &CalibrationOptions,
) -> SimResult<CalibrationReport> {
    options.validate()?;
    let grid = options.grid(ADJUSTMENT_SPEED)?;
    let mut warnings = Vec::new();
    let mut notes: Vec<String> = Vec::new();
    let warn = |warnings: &mut Vec<Warning>, city: Option<&str>, msg: String| {
        log::warn!("calibration: {msg}");
        warnings.push(match city {
            Some(c) => Warning::for_city(WarningSource::Calibration, c, msg),
            None    => Warning::new(WarningSource::Calibration, msg),
        });
    };

    for name in options.bounds.keys().filter(|n| n.as_str() != ADJUSTMENT_SPEED) {
        warn(&mut warnings, None, format!("bounds for {name} ignored; only {ADJUSTMENT_SPEED} is fitted"));
    }
    if bundle.synthetic {
        notes.push("history is synthetic; the fit reflects the macro growth profile".into());
    }

    let mut eligible = Vec::new();
    for baseline in baselines {
        match eligible_series(bundle, baseline, options.min_years) {
            Ok(series) => eligible.push(series),
            Err(reason) => warn(&mut warnings, Some(baseline.id.as_str()), format!("not calibrated: {reason}")),
        }
    }

    let requested = baselines.len();
    let mut report = CalibrationReport {
        param_name:          ADJUSTMENT_SPEED.to_string(),
        fitted_value:        params.market_adjustment_speed,
        default_value:       params.market_adjustment_speed,
        grid_rmse:           None,
        grid_points:         grid.len(),
        city_fits:           Vec::new(),
        holdout:             None,
        eligible_cities:     eligible.len(),
        requested_cities:    requested,
        methodology_version: params.version.clone(),
        warnings:            Vec::new(),
        notes:               Vec::new(),
    };

    if eligible.is_empty() {
        warn(&mut warnings, None, "no eligible cities; default parameters kept".into());
        report.warnings = warnings;
        report.notes = notes;
        return Ok(report);
    }
    if eligible.len() < 3 || eligible.len() * 2 < requested {
        warn(
            &mut warnings,
            None,
            format!("only {} of {requested} cities have usable history; fit may not generalise", eligible.len()),
        );
    }

    let mut best: Option<(f64, f64)> = None;
    for &candidate in &grid {
        let trial = params.with_adjustment_speed(candidate);
        let errors: Vec<f64> = eligible
            .iter()
            .flat_map(|s| s.squared_errors(&trial, options.rent_weight))
            .map(|e| e.combined)
            .collect();
        let score = rmse(&errors);
        log::debug!("calibration candidate {candidate:.4}: rmse {score:.6}");
        if !score.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, b)| score < b) {
            best = Some((candidate, score));
        }
    }

    let Some((fitted, score)) = best else {
        warn(&mut warnings, None, "every candidate produced a non-finite objective; default parameters kept".into());
        report.warnings = warnings;
        report.notes = notes;
        return Ok(report);
    };

    let fitted_params = params.with_adjustment_speed(fitted);
    let mut holdout_errors = Vec::new();
    let mut holdout_cities = 0;
    for series in &eligible {
        let errors = series.squared_errors(&fitted_params, options.rent_weight);
        report.city_fits.push(CityFit {
            city_id:              series.id.to_string(),
            years:                series.len(),
            rmse:                 rmse_of(&errors, |e| e.combined),
            rmse_price_to_income: rmse_of(&errors, |e| e.price_to_income),
            rmse_rent_to_income:  rmse_of(&errors, |e| e.rent_to_income),
        });
        if series.len() >= options.holdout_min_years && options.holdout_years > 0 {
            let tail = options.holdout_years.min(errors.len());
            holdout_errors.extend(errors[errors.len() - tail..].iter().map(|e| e.combined));
            holdout_cities += 1;
        }
    }
    if holdout_cities > 0 {
        report.holdout = Some(HoldoutScore {
            years:  options.holdout_years,
            cities: holdout_cities,
            rmse:   rmse(&holdout_errors),
        });
        notes.push(format!(
            "holdout scores the last {} years at the fitted value; the parameter is not re-fit without them",
            options.holdout_years
        ));
    }

    log::info!(
        "calibrated {ADJUSTMENT_SPEED} = {fitted:.4} (rmse {score:.6}) over {} cities",
        eligible.len()
    );
    report.fitted_value = fitted;
    report.grid_rmse = Some(score);
    report.warnings = warnings;
    report.notes = notes;
    Ok(report)
}

fn eligible_series<'a>(
    bundle: &HistoryBundle,
    baseline: &'a CityBaseline,
    min_years: usize,
) -> Result<CitySeries<'a>, String> {
    let history = bundle.city(&baseline.id).ok_or_else(|| "no history".to_string())?;
    if bundle.len() < min_years.max(2) {
        return Err(format!("{} years of history, need {}", bundle.len(), min_years.max(2)));
    }
    let dense = |field: HistoryField| -> Result<Vec<f64>, String> {
        let series = history.field(field).ok_or_else(|| format!("{} missing", field.name()))?;
        if series.meta.imputed_share >= 1.0 && !bundle.synthetic {
            return Err(format!("{} has no observations", field.name()));
        }
        history
            .dense(field)
            .ok_or_else(|| format!("{} incomplete or non-positive", field.name()))
    };
    Ok(CitySeries {
        id:         &baseline.id,
        elasticity: baseline.rent_elasticities.supply_gap,
        price:      dense(HistoryField::Price)?,
        rent:       dense(HistoryField::Rent)?,
        wage:       dense(HistoryField::Wage)?,
        population: dense(HistoryField::Population)?,
        stock:      dense(HistoryField::Stock)?,
    })
}
