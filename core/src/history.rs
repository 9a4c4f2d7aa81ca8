//! Historical series: alignment onto a contiguous year range, imputation,
//! and synthetic histories from a macro growth profile.
//!
//! RULES:
//!   - A missing year is `None`, never zero.
//!   - Imputation clones its input; the aligned bundle is never mutated.
//!   - Every filled value is recorded in the field's `ImputationMeta`.

use crate::{
    config::CityBaseline,
    error::{SimError, SimResult},
    methodology::{ensure_finite, finite_or},
    types::{CityId, Year},
    warning::{Warning, WarningSource},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ops::RangeInclusive};

/// Plausible median annual wage, AUD.
pub const WAGE_SANITY_RANGE: (f64, f64) = (8_000.0, 400_000.0);
/// Plausible median annual rent, AUD.
pub const RENT_SANITY_RANGE: (f64, f64) = (5_000.0, 150_000.0);
/// Wage fallback for a city with no baseline to borrow growth from.
const DEFAULT_WAGE_GROWTH: f64 = 0.03;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HistoryField {
    Price,
    Rent,
    Wage,
    Population,
    Stock,
}

impl HistoryField {
    pub const ALL: [HistoryField; 5] = [
        HistoryField::Price,
        HistoryField::Rent,
        HistoryField::Wage,
        HistoryField::Population,
        HistoryField::Stock,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Price      => "price",
            Self::Rent       => "rent",
            Self::Wage       => "wage",
            Self::Population => "population",
            Self::Stock      => "stock",
        }
    }

    /// Annual growth used to extend a series with fewer than two points.
    pub fn fallback_growth(&self, baseline: Option<&CityBaseline>) -> f64 {
        match self {
            Self::Price      => 0.04,
            Self::Rent       => 0.035,
            Self::Wage       => baseline.map_or(DEFAULT_WAGE_GROWTH, |b| b.wage_growth),
            Self::Population => 0.005,
            Self::Stock      => 0.01,
        }
    }

    pub fn baseline_value(&self, baseline: &CityBaseline) -> f64 {
        match self {
            Self::Price      => baseline.median_price,
            Self::Rent       => baseline.median_rent,
            Self::Wage       => baseline.median_wage,
            Self::Population => baseline.population,
            Self::Stock      => baseline.dwelling_stock,
        }
    }
}

// ── Raw input ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct YearPoint {
    pub year:  Year,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawCitySeries {
    pub price:      Vec<YearPoint>,
    pub rent:       Vec<YearPoint>,
    pub wage:       Vec<YearPoint>,
    pub population: Vec<YearPoint>,
    pub stock:      Vec<YearPoint>,
}

impl RawCitySeries {
    pub fn series(&self, field: HistoryField) -> &[YearPoint] {
        match field {
            HistoryField::Price      => &self.price,
            HistoryField::Rent       => &self.rent,
            HistoryField::Wage       => &self.wage,
            HistoryField::Population => &self.population,
            HistoryField::Stock      => &self.stock,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawHistory {
    pub cities: BTreeMap<CityId, RawCitySeries>,
}

impl RawHistory {
    /// Smallest range covering every observed (non-null) point.
    pub fn year_span(&self) -> Option<RangeInclusive<Year>> {
        let years = self
            .cities
            .values()
            .flat_map(|c| HistoryField::ALL.iter().flat_map(move |f| c.series(*f).iter()))
            .filter(|p| p.value.is_some())
            .map(|p| p.year);
        let (lo, hi) = years.fold((Year::MAX, Year::MIN), |(lo, hi), y| (lo.min(y), hi.max(y)));
        (lo <= hi).then_some(lo..=hi)
    }
}

// ── Aligned bundle ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImputationMeta {
    pub imputed:       bool,
    /// Share of years filled rather than observed.
    pub imputed_share: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings:      Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldSeries {
    pub values: Vec<Option<f64>>,
    pub meta:   ImputationMeta,
}

impl FieldSeries {
    pub fn missing(len: usize) -> Self {
        Self { values: vec![None; len], meta: ImputationMeta::default() }
    }

    pub fn is_complete(&self) -> bool {
        self.values.iter().all(|v| matches!(v, Some(x) if *x > 0.0 && x.is_finite()))
    }

    pub fn observed(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CityHistory {
    pub fields: BTreeMap<HistoryField, FieldSeries>,
}

impl CityHistory {
    pub fn field(&self, field: HistoryField) -> Option<&FieldSeries> {
        self.fields.get(&field)
    }

    /// Dense values for a complete field.
    pub fn dense(&self, field: HistoryField) -> Option<Vec<f64>> {
        let series = self.field(field)?;
        series.values.iter().map(|v| v.filter(|x| *x > 0.0 && x.is_finite())).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryBundle {
    pub start_year: Year,
    pub end_year:   Year,
    pub cities:     BTreeMap<CityId, CityHistory>,
    #[serde(default)]
    pub notes:      Vec<String>,
    #[serde(default)]
    pub warnings:   Vec<Warning>,
    #[serde(default)]
    pub synthetic:  bool,
}

impl HistoryBundle {
    pub fn new(years: RangeInclusive<Year>) -> Self {
        Self {
            start_year: *years.start(),
            end_year:   *years.end(),
            cities:     BTreeMap::new(),
            notes:      Vec::new(),
            warnings:   Vec::new(),
            synthetic:  false,
        }
    }

    /// A bundle with no years, carrying only a warning.
    pub fn empty_with_warning(message: &str) -> Self {
        log::warn!("history: {message}");
        let mut bundle = Self::new(0..=-1);
        bundle.warnings.push(Warning::new(WarningSource::History, message));
        bundle
    }

    pub fn len(&self) -> usize {
        if self.end_year < self.start_year {
            0
        } else {
            (self.end_year - self.start_year + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn years(&self) -> RangeInclusive<Year> {
        self.start_year..=self.end_year
    }

    pub fn index_of(&self, year: Year) -> Option<usize> {
        self.years().contains(&year).then(|| (year - self.start_year) as usize)
    }

    pub fn city(&self, id: &str) -> Option<&CityHistory> {
        self.cities.get(id)
    }

    /// Growth into the last year at or before `year` with both endpoints known.
    pub fn last_growth(&self, city: &str, field: HistoryField, year: Year) -> Option<f64> {
        let series = self.city(city)?.field(field)?;
        let last = self.index_of(year.min(self.end_year))?;
        (1..=last).rev().find_map(|i| match (series.values[i - 1], series.values[i]) {
            (Some(a), Some(b)) if a > 0.0 => Some(finite_or(b / a - 1.0, 0.0)),
            _ => None,
        })
    }

    fn warn(&mut self, city: &str, message: String) {
        log::warn!("history {city}: {message}");
        self.warnings.push(Warning::for_city(WarningSource::History, city, message));
    }
}

// ── Alignment ───────────────────────────────────────────────────────

/// Align every raw series onto `years`. Out-of-range points are dropped
/// with a note; non-positive or non-finite values become missing.
pub fn build_history_bundle(raw: &RawHistory, years: RangeInclusive<Year>) -> SimResult<HistoryBundle> {
    if years.start() > years.end() {
        return Err(SimError::InvalidHorizon {
            reason: format!("history start {} after end {}", years.start(), years.end()),
        });
    }
    let mut bundle = HistoryBundle::new(years.clone());
    let len = bundle.len();
    let mut out_of_range = 0usize;

    for (city, series) in &raw.cities {
        let mut history = CityHistory::default();
        for field in HistoryField::ALL {
            let mut aligned = FieldSeries::missing(len);
            let mut invalid = 0usize;
            for point in series.series(field) {
                let Some(idx) = bundle.index_of(point.year) else {
                    out_of_range += 1;
                    continue;
                };
                match point.value {
                    Some(v) if v.is_finite() && v > 0.0 => aligned.values[idx] = Some(v),
                    Some(_) => {
                        invalid += 1;
                        aligned.values[idx] = None;
                    }
                    None => {}
                }
            }
            if invalid > 0 {
                let msg = format!("{}: {invalid} non-positive or non-finite values treated as missing", field.name());
                aligned.meta.warnings.push(msg.clone());
                bundle.warn(city, msg);
            }
            history.fields.insert(field, aligned);
        }
        bundle.cities.insert(city.clone(), history);
    }

    if out_of_range > 0 {
        bundle.notes.push(format!(
            "dropped {out_of_range} observations outside {}-{}",
            bundle.start_year, bundle.end_year
        ));
    }
    log::info!(
        "aligned history for {} cities over {}-{}",
        bundle.cities.len(),
        bundle.start_year,
        bundle.end_year
    );
    Ok(bundle)
}

// ── Imputation ──────────────────────────────────────────────────────

/// Fill one series. Known points are kept exactly; gaps between them are
/// interpolated log-linearly; the ends are extended with the series'
/// average log growth (two or more points) or `fallback_growth`.
///
/// `anchor` is `(offset from index 0, value)` and is used only when the
/// series has no known point at all.
pub fn impute_series(
    values: &[Option<f64>],
    fallback_growth: f64,
    anchor: Option<(i64, f64)>,
) -> FieldSeries {
    let len = values.len();
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|x| *x > 0.0 && x.is_finite()).map(|x| (i, x)))
        .collect();
    let fallback_log = (1.0 + fallback_growth).max(1e-6).ln();
    let mut out: Vec<Option<f64>> = values.to_vec();
    let mut meta = ImputationMeta::default();

    if known.is_empty() {
        match anchor {
            Some((at, value)) if value > 0.0 && value.is_finite() => {
                for (i, slot) in out.iter_mut().enumerate() {
                    *slot = Some(value * (fallback_log * (i as i64 - at) as f64).exp());
                }
                meta.warnings.push("no observations; anchored on the city baseline".into());
            }
            _ => {
                meta.warnings.push("no observations and no baseline anchor; left missing".into());
                return FieldSeries { values: out, meta };
            }
        }
    } else {
        let (first_i, first_v) = known[0];
        let (last_i, last_v) = known[known.len() - 1];
        let growth_log = if known.len() >= 2 && last_i > first_i {
            finite_or((last_v.ln() - first_v.ln()) / (last_i - first_i) as f64, fallback_log)
        } else {
            fallback_log
        };

        for pair in known.windows(2) {
            let ((a, va), (b, vb)) = (pair[0], pair[1]);
            let (la, lb) = (va.ln(), vb.ln());
            for i in (a + 1)..b {
                let frac = (i - a) as f64 / (b - a) as f64;
                out[i] = Some((la + (lb - la) * frac).exp());
            }
        }
        for (i, slot) in out.iter_mut().enumerate().take(first_i) {
            *slot = Some(first_v * (-growth_log * (first_i - i) as f64).exp());
        }
        for (i, slot) in out.iter_mut().enumerate().skip(last_i + 1) {
            *slot = Some(last_v * (growth_log * (i - last_i) as f64).exp());
        }
    }

    let observed = known.len();
    let filled = len - observed;
    meta.imputed = filled > 0;
    meta.imputed_share = if len == 0 { 0.0 } else { filled as f64 / len as f64 };
    FieldSeries { values: out, meta }
}

/// Impute every city and field of an aligned bundle. Returns a new bundle.
pub fn impute_history_bundle(bundle: &HistoryBundle, baselines: &[CityBaseline]) -> HistoryBundle {
    let mut out = bundle.clone();
    let city_ids: Vec<CityId> = out.cities.keys().cloned().collect();

    for city in city_ids {
        let baseline = baselines.iter().find(|b| b.id == city);
        let anchor_offset = baseline.map(|b| (b.base_year - bundle.start_year) as i64);
        let mut warnings = Vec::new();
        let Some(history) = out.cities.get_mut(&city) else { continue };

        for field in HistoryField::ALL {
            // Rent with no observations is derived from price first.
            if field == HistoryField::Rent {
                continue;
            }
            let current = history.fields.entry(field).or_insert_with(|| FieldSeries::missing(bundle.len()));
            let anchor = baseline.zip(anchor_offset).map(|(b, at)| (at, field.baseline_value(b)));
            let mut imputed = impute_series(&current.values, field.fallback_growth(baseline), anchor);
            let mut merged = std::mem::take(&mut current.meta.warnings);
            merged.append(&mut imputed.meta.warnings);
            imputed.meta.warnings = merged;
            for w in &imputed.meta.warnings {
                if w.starts_with("no observations") {
                    warnings.push(format!("{}: {w}", field.name()));
                }
            }
            *current = imputed;
        }

        let rent_missing = history
            .field(HistoryField::Rent)
            .map_or(true, |s| s.observed() == 0);
        let price_known = history.field(HistoryField::Price).map_or(false, |s| s.is_complete());
        let rent = match (rent_missing, price_known, baseline) {
            (true, true, Some(b)) => {
                let yield_ = b.rental_yield();
                let price = &history.fields[&HistoryField::Price];
                let values = price.values.iter().map(|p| p.map(|p| p * yield_)).collect();
                let msg = format!("rent: no observations; derived from price x baseline yield {yield_:.4}");
                warnings.push(msg.clone());
                FieldSeries {
                    values,
                    meta: ImputationMeta { imputed: true, imputed_share: 1.0, warnings: vec![msg] },
                }
            }
            _ => {
                let current = history
                    .fields
                    .remove(&HistoryField::Rent)
                    .unwrap_or_else(|| FieldSeries::missing(bundle.len()));
                let anchor = baseline.zip(anchor_offset).map(|(b, at)| (at, b.median_rent));
                let mut imputed = impute_series(&current.values, HistoryField::Rent.fallback_growth(baseline), anchor);
                let mut merged = current.meta.warnings;
                merged.append(&mut imputed.meta.warnings);
                imputed.meta.warnings = merged;
                if imputed.meta.warnings.iter().any(|w| w.starts_with("no observations")) {
                    warnings.push("rent: no observations; anchored on the city baseline".into());
                }
                imputed
            }
        };
        history.fields.insert(HistoryField::Rent, rent);

        for (field, (lo, hi)) in [(HistoryField::Wage, WAGE_SANITY_RANGE), (HistoryField::Rent, RENT_SANITY_RANGE)] {
            let out_of_range = history
                .field(field)
                .map_or(0, |s| s.values.iter().flatten().filter(|v| **v < lo || **v > hi).count());
            if out_of_range > 0 {
                warnings.push(format!(
                    "{}: {out_of_range} values outside [{lo:.0}, {hi:.0}] AUD/yr; check units",
                    field.name()
                ));
            }
        }

        for msg in warnings {
            out.warn(&city, msg);
        }
    }

    out.notes.push("missing years imputed log-linearly; ends extended at average log growth".into());
    out
}

// ── Synthetic history ───────────────────────────────────────────────

/// Growth overrides for a span of years (inclusive).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GrowthPeriod {
    pub start:             Year,
    pub end:               Year,
    pub price_growth:      Option<f64>,
    pub rent_growth:       Option<f64>,
    pub wage_growth:       Option<f64>,
    pub population_growth: Option<f64>,
    pub stock_growth:      Option<f64>,
}

impl GrowthPeriod {
    fn get(&self, field: HistoryField) -> Option<f64> {
        match field {
            HistoryField::Price      => self.price_growth,
            HistoryField::Rent       => self.rent_growth,
            HistoryField::Wage       => self.wage_growth,
            HistoryField::Population => self.population_growth,
            HistoryField::Stock      => self.stock_growth,
        }
    }
}

/// Coarse national growth assumptions for back-casting a history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MacroGrowthProfile {
    pub price_growth:      f64,
    pub rent_growth:       f64,
    /// None: each city's own baseline wage growth.
    pub wage_growth:       Option<f64>,
    pub population_growth: f64,
    pub stock_growth:      f64,
    /// Later periods win where they overlap.
    pub periods:           Vec<GrowthPeriod>,
}

impl Default for MacroGrowthProfile {
    fn default() -> Self {
        Self {
            price_growth:      0.06,
            rent_growth:       0.035,
            wage_growth:       None,
            population_growth: 0.015,
            stock_growth:      0.013,
            periods:           Vec::new(),
        }
    }
}

impl MacroGrowthProfile {
    /// Growth from `year - 1` into `year`.
    pub fn growth(&self, field: HistoryField, year: Year, baseline: &CityBaseline) -> f64 {
        let overridden = self
            .periods
            .iter()
            .rev()
            .find(|p| p.start <= year && year <= p.end)
            .and_then(|p| p.get(field));
        overridden.unwrap_or(match field {
            HistoryField::Price      => self.price_growth,
            HistoryField::Rent       => self.rent_growth,
            HistoryField::Wage       => self.wage_growth.unwrap_or(baseline.wage_growth),
            HistoryField::Population => self.population_growth,
            HistoryField::Stock      => self.stock_growth,
        })
    }

    pub fn validate(&self) -> SimResult<()> {
        ensure_finite("profile.price_growth", self.price_growth)?;
        ensure_finite("profile.rent_growth", self.rent_growth)?;
        if let Some(w) = self.wage_growth {
            ensure_finite("profile.wage_growth", w)?;
        }
        ensure_finite("profile.population_growth", self.population_growth)?;
        ensure_finite("profile.stock_growth", self.stock_growth)?;
        for p in &self.periods {
            for field in HistoryField::ALL {
                if let Some(g) = p.get(field) {
                    ensure_finite(&format!("profile.periods[{}-{}].{}", p.start, p.end, field.name()), g)?;
                }
            }
        }
        Ok(())
    }
}

/// Back- and forward-cast every city from its base-year values.
pub fn synthesize_history(
    baselines: &[CityBaseline],
    profile: &MacroGrowthProfile,
    years: RangeInclusive<Year>,
) -> SimResult<HistoryBundle> {
    if years.start() > years.end() {
        return Err(SimError::InvalidHorizon {
            reason: format!("history start {} after end {}", years.start(), years.end()),
        });
    }
    profile.validate()?;
    let mut bundle = HistoryBundle::new(years.clone());
    bundle.synthetic = true;

    for baseline in baselines {
        let mut history = CityHistory::default();
        for field in HistoryField::ALL {
            let values = years
                .clone()
                .map(|y| Some(synthetic_value(profile, field, baseline, y)))
                .collect();
            history.fields.insert(
                field,
                FieldSeries {
                    values,
                    meta: ImputationMeta { imputed: true, imputed_share: 1.0, warnings: Vec::new() },
                },
            );
        }
        bundle.cities.insert(baseline.id.clone(), history);
    }

    bundle.notes.push(format!(
        "synthetic history {}-{} from a macro growth profile anchored on base-year values",
        bundle.start_year, bundle.end_year
    ));
    log::info!("synthesized history for {} cities", bundle.cities.len());
    Ok(bundle)
}

fn synthetic_value(profile: &MacroGrowthProfile, field: HistoryField, baseline: &CityBaseline, year: Year) -> f64 {
    let step = |y: Year| 1.0 + profile.growth(field, y, baseline).max(-0.99);
    let mut value = field.baseline_value(baseline);
    if year > baseline.base_year {
        for y in (baseline.base_year + 1)..=year {
            value *= step(y);
        }
    } else {
        for y in (year + 1..=baseline.base_year).rev() {
            value /= step(y);
        }
    }
    finite_or(value, field.baseline_value(baseline))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_series_is_left_alone() {
        let values = vec![Some(100.0), Some(104.0), Some(109.0)];
        let out = impute_series(&values, 0.04, None);
        assert_eq!(out.values, values);
        assert!(!out.meta.imputed);
        assert_eq!(out.meta.imputed_share, 0.0);
    }

    #[test]
    fn interior_gap_is_geometric() {
        let out = impute_series(&[Some(100.0), None, Some(121.0)], 0.04, None);
        let mid = out.values[1].unwrap();
        assert!((mid - 110.0).abs() < 1e-9, "mid = {mid}");
        assert!((out.meta.imputed_share - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn single_point_extends_with_fallback() {
        let out = impute_series(&[None, Some(100.0), None], 0.10, None);
        assert!((out.values[0].unwrap() - 100.0 / 1.1).abs() < 1e-9);
        assert!((out.values[2].unwrap() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn empty_series_without_anchor_stays_missing() {
        let out = impute_series(&[None, None], 0.04, None);
        assert_eq!(out.values, vec![None, None]);
        assert!(!out.meta.warnings.is_empty());
    }

    #[test]
    fn empty_series_anchors_on_baseline() {
        // Anchor sits one year past the end of the range.
        let out = impute_series(&[None, None], 0.0, Some((2, 50.0)));
        assert_eq!(out.values, vec![Some(50.0), Some(50.0)]);
        assert!(out.meta.imputed);
    }
}
