//! Advanced couplings layered on top of aggregate mode.
//!
//! Three independent extensions:
//!   1. Spatial equilibrium: reallocates part of national net migration
//!      across cities by relative utility.
//!   2. Heterogeneous expectations: mixes agent types when forming the
//!      expected price growth that drives construction.
//!   3. Portfolio investor demand: bounded multiplier on investor demand.
//!
//! RULE: each extension is neutral when disabled (identity migration,
//! adaptive expectations, multiplier 1.0). Disabling all three gives
//! aggregate mode exactly.

use crate::{
    error::SimResult,
    methodology::{ensure_finite, finite_or, MethodologyParams},
};
use serde::{Deserialize, Serialize};

pub const PORTFOLIO_MULTIPLIER_MIN: f64 = 0.80;
pub const PORTFOLIO_MULTIPLIER_MAX: f64 = 1.20;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdvancedConfig {
    pub spatial:      SpatialEquilibriumConfig,
    pub expectations: ExpectationsConfig,
    pub portfolio:    PortfolioConfig,
}

impl AdvancedConfig {
    /// All three couplings switched on with default tuning.
    pub fn all_enabled() -> Self {
        let mut cfg = Self::default();
        cfg.spatial.enabled = true;
        cfg.expectations.enabled = true;
        cfg.portfolio.enabled = true;
        cfg
    }

    pub fn any_enabled(&self) -> bool {
        self.spatial.enabled || self.expectations.enabled || self.portfolio.enabled
    }

    pub fn validate(&self) -> SimResult<()> {
        let s = &self.spatial;
        let e = &self.expectations;
        let p = &self.portfolio;
        for (name, v) in [
            ("spatial.reallocation_share", s.reallocation_share),
            ("spatial.wage_weight", s.wage_weight),
            ("spatial.cost_weight", s.cost_weight),
            ("spatial.amenity_weight", s.amenity_weight),
            ("spatial.floor_share", s.floor_share),
            ("expectations.extrapolator_weight", e.extrapolator_weight),
            ("expectations.fundamentals_weight", e.fundamentals_weight),
            ("expectations.mean_reverting_weight", e.mean_reverting_weight),
            ("expectations.reversion_speed", e.reversion_speed),
            ("portfolio.outside_return", p.outside_return),
            ("portfolio.sensitivity", p.sensitivity),
            ("portfolio.risk_aversion", p.risk_aversion),
            ("portfolio.financing_lvr", p.financing_lvr),
        ] {
            ensure_finite(name, v)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpatialEquilibriumConfig {
    pub enabled:            bool,
    /// Share of national net migration reallocated by utility, [0, 1].
    pub reallocation_share: f64,
    pub wage_weight:        f64,
    pub cost_weight:        f64,
    pub amenity_weight:     f64,
    /// Minimum share of the reallocated pool any city receives.
    pub floor_share:        f64,
}

impl Default for SpatialEquilibriumConfig {
    fn default() -> Self {
        Self {
            enabled:            false,
            reallocation_share: 0.30,
            wage_weight:        1.0,
            cost_weight:        1.0,
            amenity_weight:     0.5,
            floor_share:        0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExpectationsConfig {
    pub enabled:               bool,
    pub extrapolator_weight:   f64,
    pub fundamentals_weight:   f64,
    pub mean_reverting_weight: f64,
    /// How hard mean-reverting agents lean against last year's growth.
    pub reversion_speed:       f64,
}

impl Default for ExpectationsConfig {
    fn default() -> Self {
        Self {
            enabled:               false,
            extrapolator_weight:   0.4,
            fundamentals_weight:   0.4,
            mean_reverting_weight: 0.2,
            reversion_speed:       0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortfolioConfig {
    pub enabled:        bool,
    /// Return on the outside asset (e.g. equities), annual.
    pub outside_return: f64,
    pub sensitivity:    f64,
    pub risk_aversion:  f64,
    /// Debt share used for the financing-cost proxy.
    pub financing_lvr:  f64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            enabled:        false,
            outside_return: 0.06,
            sensitivity:    20.0,
            risk_aversion:  1.0,
            financing_lvr:  0.6,
        }
    }
}

// ── Spatial equilibrium ─────────────────────────────────────────────

/// One city's local fundamentals for the year, computed before any
/// reallocation.
#[derive(Debug, Clone, Copy)]
pub struct LocalFundamentals {
    pub local_migration: f64,
    pub wage:            f64,
    pub housing_cost:    f64,
    pub amenity:         f64,
}

/// Reallocate net migration across cities. Requires every city's
/// fundamentals for the same year. Returns one value per input, in order.
pub fn reallocate_migration(
    cfg: &SpatialEquilibriumConfig,
    params: &MethodologyParams,
    cities: &[LocalFundamentals],
) -> Vec<f64> {
    if !cfg.enabled || cities.len() < 2 {
        return cities.iter().map(|c| c.local_migration).collect();
    }

    let national: f64 = cities.iter().map(|c| c.local_migration).sum();
    let mean_cost = cities.iter().map(|c| c.housing_cost).sum::<f64>() / cities.len() as f64;

    // Local migration responds to relative housing cost first.
    let responded: Vec<f64> = cities
        .iter()
        .map(|c| {
            let delta = if mean_cost > 0.0 { c.housing_cost / mean_cost - 1.0 } else { 0.0 };
            c.local_migration * params.curves.migration_response.eval(delta)
        })
        .collect();
    let responded_total: f64 = responded.iter().sum();
    let rescale = if responded_total.abs() > 1e-9 { national / responded_total } else { 1.0 };

    let shares = utility_shares(cfg, cities);
    let pool_share = cfg.reallocation_share.clamp(0.0, 1.0);

    responded
        .iter()
        .zip(&shares)
        .map(|(local, share)| {
            let kept = (1.0 - pool_share) * local * rescale;
            finite_or(kept + pool_share * national * share, 0.0)
        })
        .collect()
}

/// Softmax of utility over the share left after every city gets the floor.
pub fn utility_shares(cfg: &SpatialEquilibriumConfig, cities: &[LocalFundamentals]) -> Vec<f64> {
    let n = cities.len();
    if n == 0 {
        return Vec::new();
    }
    let utilities: Vec<f64> = cities
        .iter()
        .map(|c| {
            let u = cfg.wage_weight * c.wage.max(1.0).ln()
                - cfg.cost_weight * c.housing_cost.max(1.0).ln()
                + cfg.amenity_weight * c.amenity;
            finite_or(u, 0.0)
        })
        .collect();
    let max_u = utilities.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = utilities.iter().map(|u| (u - max_u).exp()).collect();
    let total: f64 = exp.iter().sum();

    if !(total > 0.0) {
        return vec![1.0 / n as f64; n];
    }
    // Each city keeps the floor; the rest is split by softmax.
    let floor = cfg.floor_share.clamp(0.0, 1.0 / n as f64);
    let free = 1.0 - n as f64 * floor;
    exp.iter().map(|e| floor + free * (e / total)).collect()
}

// ── Heterogeneous expectations ──────────────────────────────────────

/// Expected price growth feeding the construction response.
/// Disabled: adaptive (last year's growth).
pub fn expected_price_growth(
    cfg: &ExpectationsConfig,
    params: &MethodologyParams,
    last_growth: f64,
    supply_gap: f64,
) -> f64 {
    if !cfg.enabled {
        return last_growth;
    }
    let mut weights = [
        cfg.extrapolator_weight.max(0.0),
        cfg.fundamentals_weight.max(0.0),
        cfg.mean_reverting_weight.max(0.0),
    ];
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        weights = [1.0 / 3.0; 3];
    } else {
        for w in &mut weights {
            *w /= total;
        }
    }

    let long_run = params.baseline_price_growth;
    let extrapolator = last_growth;
    let fundamentals = long_run
        + params.market_adjustment_speed * params.curves.supply_gap_price.eval(supply_gap);
    let mean_reverting = long_run - cfg.reversion_speed * (last_growth - long_run);

    finite_or(
        weights[0] * extrapolator + weights[1] * fundamentals + weights[2] * mean_reverting,
        last_growth,
    )
}

// ── Portfolio investor demand ───────────────────────────────────────

/// Bounded multiplier on investor demand. 1.0 when disabled or when
/// housing exactly matches the outside asset.
pub fn portfolio_multiplier(
    cfg: &PortfolioConfig,
    rental_yield: f64,
    expected_capital_gain: f64,
    mortgage_rate: f64,
) -> f64 {
    if !cfg.enabled {
        return 1.0;
    }
    let housing_return = rental_yield + expected_capital_gain - mortgage_rate * cfg.financing_lvr;
    let excess = housing_return - cfg.outside_return;
    let z = cfg.sensitivity * excess / (1.0 + cfg.risk_aversion.max(0.0));
    let logistic = 1.0 / (1.0 + (-z).exp());
    let span = PORTFOLIO_MULTIPLIER_MAX - PORTFOLIO_MULTIPLIER_MIN;
    finite_or(PORTFOLIO_MULTIPLIER_MIN + span * logistic, 1.0)
        .clamp(PORTFOLIO_MULTIPLIER_MIN, PORTFOLIO_MULTIPLIER_MAX)
}
