//! Methodology: constants, response curves and one-step formulas.
//!
//! RULE: Every function here is pure. Nothing reads ambient state;
//! callers pass a `MethodologyParams` value explicitly so calibration
//! can substitute an alternative parameter set without touching
//! anything shared.
//!
//! Non-finite input at a configuration boundary is an error
//! (`ensure_finite`). Inside the formulas a non-finite intermediate is
//! replaced by a neutral value (`finite_or`) so it can never compound
//! into later years.

use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};

pub const METHODOLOGY_VERSION: &str = "2025.2";

/// Supply boost is clamped to this window before the construction multiplier.
pub const SUPPLY_BOOST_MIN: f64 = -0.10;
pub const SUPPLY_BOOST_MAX: f64 = 0.25;

/// Loan-to-value ratio assumed for the ownership leg of the cost index.
pub const INDEX_LOAN_TO_VALUE: f64 = 0.80;

// ── Caps ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GrowthCap {
    pub min: f64,
    pub max: f64,
}

impl GrowthCap {
    /// Clamp a growth rate into the cap. A non-finite rate maps to the
    /// cap-clamped zero.
    pub fn apply(&self, growth: f64) -> f64 {
        finite_or(growth, 0.0).clamp(self.min, self.max)
    }
}

/// Year-over-year construction capacity limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CapacityLimits {
    pub max_increase: f64,
    pub max_decrease: f64,
}

// ── Curves ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

impl CurvePoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseCurve {
    /// Shortage accelerates (linear + quadratic), surplus drags linearly.
    /// The gap is clamped to ±`gap_window` before evaluation.
    SupplyGap {
        shortage_linear:    f64,
        shortage_quadratic: f64,
        surplus_linear:     f64,
        gap_window:         f64,
    },
    /// Linear interpolation between points sorted by x, flat outside.
    Piecewise { points: Vec<CurvePoint> },
}

impl ResponseCurve {
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            Self::SupplyGap { shortage_linear, shortage_quadratic, surplus_linear, gap_window } => {
                let window = gap_window.abs();
                let g = finite_or(x, 0.0).clamp(-window, window);
                let y = if g > 0.0 {
                    shortage_linear * g + shortage_quadratic * g * g
                } else {
                    surplus_linear * g
                };
                finite_or(y, 0.0)
            }
            Self::Piecewise { points } => eval_piecewise(points, x),
        }
    }

    fn validate(&self, name: &str) -> SimResult<()> {
        match self {
            Self::SupplyGap { shortage_linear, shortage_quadratic, surplus_linear, gap_window } => {
                ensure_finite(&format!("{name}.shortage_linear"), *shortage_linear)?;
                ensure_finite(&format!("{name}.shortage_quadratic"), *shortage_quadratic)?;
                ensure_finite(&format!("{name}.surplus_linear"), *surplus_linear)?;
                ensure_finite(&format!("{name}.gap_window"), *gap_window)?;
            }
            Self::Piecewise { points } => {
                for (i, p) in points.iter().enumerate() {
                    ensure_finite(&format!("{name}.points[{i}].x"), p.x)?;
                    ensure_finite(&format!("{name}.points[{i}].y"), p.y)?;
                }
                if points.windows(2).any(|w| w[1].x < w[0].x) {
                    return Err(anyhow::anyhow!("curve '{name}' points must be sorted by x").into());
                }
            }
        }
        Ok(())
    }
}

fn eval_piecewise(points: &[CurvePoint], x: f64) -> f64 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return 0.0,
    };
    if x.is_nan() || x <= first.x {
        return first.y;
    }
    if x >= last.x {
        return last.y;
    }
    for w in points.windows(2) {
        let (a, b) = (w[0], w[1]);
        if x <= b.x {
            let span = b.x - a.x;
            if span <= 0.0 {
                return b.y;
            }
            return a.y + (b.y - a.y) * (x - a.x) / span;
        }
    }
    last.y
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseCurves {
    pub supply_gap_price:        ResponseCurve,
    pub supply_gap_rent:         ResponseCurve,
    /// Expected price growth → construction multiplier.
    pub construction_response:   ResponseCurve,
    /// Relative housing-cost delta → migration multiplier.
    pub migration_response:      ResponseCurve,
    /// Policy intensity (0..1) → fractional reduction of investor demand.
    pub investor_demand_shock:   ResponseCurve,
    /// Annual divestment share → additive rent growth.
    pub divestment_rental_shock: ResponseCurve,
}

impl Default for ResponseCurves {
    fn default() -> Self {
        Self {
            supply_gap_price: ResponseCurve::SupplyGap {
                shortage_linear:    0.80,
                shortage_quadratic: 4.00,
                surplus_linear:     0.60,
                gap_window:         0.10,
            },
            supply_gap_rent: ResponseCurve::SupplyGap {
                shortage_linear:    0.50,
                shortage_quadratic: 2.50,
                surplus_linear:     0.40,
                gap_window:         0.10,
            },
            construction_response: ResponseCurve::Piecewise {
                points: vec![
                    CurvePoint::new(-0.10, 0.60),
                    CurvePoint::new(0.00, 0.85),
                    CurvePoint::new(0.04, 1.00),
                    CurvePoint::new(0.10, 1.20),
                    CurvePoint::new(0.20, 1.35),
                ],
            },
            migration_response: ResponseCurve::Piecewise {
                points: vec![
                    CurvePoint::new(-0.30, 1.25),
                    CurvePoint::new(0.00, 1.00),
                    CurvePoint::new(0.30, 0.75),
                ],
            },
            investor_demand_shock: ResponseCurve::Piecewise {
                points: vec![
                    CurvePoint::new(0.0, 0.00),
                    CurvePoint::new(0.5, 0.08),
                    CurvePoint::new(1.0, 0.20),
                ],
            },
            divestment_rental_shock: ResponseCurve::Piecewise {
                points: vec![
                    CurvePoint::new(0.00, 0.000),
                    CurvePoint::new(0.02, 0.005),
                    CurvePoint::new(0.05, 0.015),
                    CurvePoint::new(0.10, 0.030),
                ],
            },
        }
    }
}

// ── Parameters ───────────────────────────────────────────────────────────────

/// Versioned global parameter set. Injected into every engine call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MethodologyParams {
    pub version:                  String,
    /// Scales how strongly the supply gap moves prices and rents.
    pub market_adjustment_speed:  f64,
    pub persons_per_household:    f64,
    pub baseline_price_growth:    f64,
    pub baseline_rent_growth:     f64,
    pub price_growth_cap:         GrowthCap,
    pub rent_growth_cap:          GrowthCap,
    pub construction_capacity:    CapacityLimits,
    pub turnover_rate:            f64,
    pub stamp_duty_rate:          f64,
    /// Owner share used when blending repayments and rent into a cost index.
    pub owner_cost_share:         f64,
    /// Price growth change per unit of mortgage rate shift.
    pub credit_price_sensitivity: f64,
    pub first_home_grant_passthrough: f64,
    pub foreign_surcharge_price_effect: f64,
    /// Rent growth suppression per unit of vacancy tax.
    pub vacancy_tax_rent_effect:  f64,
    /// Share of divested investor dwellings withdrawn from effective stock.
    pub divestment_stock_withdrawal: f64,
    /// Supply boost at full planning upzoning intensity.
    pub upzoning_supply_effect:   f64,
    pub curves:                   ResponseCurves,
}

impl Default for MethodologyParams {
    fn default() -> Self {
        Self {
            version:                  METHODOLOGY_VERSION.to_string(),
            market_adjustment_speed:  0.50,
            persons_per_household:    2.5,
            baseline_price_growth:    0.040,
            baseline_rent_growth:     0.035,
            price_growth_cap:         GrowthCap { min: -0.15, max: 0.20 },
            rent_growth_cap:          GrowthCap { min: -0.10, max: 0.15 },
            construction_capacity:    CapacityLimits { max_increase: 0.15, max_decrease: 0.20 },
            turnover_rate:            0.05,
            stamp_duty_rate:          0.04,
            owner_cost_share:         0.66,
            credit_price_sensitivity: 1.5,
            first_home_grant_passthrough:   0.5,
            foreign_surcharge_price_effect: 0.3,
            vacancy_tax_rent_effect:  0.2,
            divestment_stock_withdrawal: 0.10,
            upzoning_supply_effect:   0.10,
            curves:                   ResponseCurves::default(),
        }
    }
}

impl MethodologyParams {
    /// Copy with a different adjustment speed (used by calibration).
    pub fn with_adjustment_speed(&self, speed: f64) -> Self {
        Self { market_adjustment_speed: speed, ..self.clone() }
    }

    /// Reject non-finite or inverted parameters before any step runs.
    pub fn validate(&self) -> SimResult<()> {
        ensure_finite("market_adjustment_speed", self.market_adjustment_speed)?;
        ensure_finite("persons_per_household", self.persons_per_household)?;
        if self.persons_per_household <= 0.0 {
            return Err(anyhow::anyhow!("persons_per_household must be > 0").into());
        }
        ensure_finite("baseline_price_growth", self.baseline_price_growth)?;
        ensure_finite("baseline_rent_growth", self.baseline_rent_growth)?;
        for (name, cap) in [("price_growth_cap", self.price_growth_cap), ("rent_growth_cap", self.rent_growth_cap)] {
            ensure_finite(&format!("{name}.min"), cap.min)?;
            ensure_finite(&format!("{name}.max"), cap.max)?;
            if cap.min > cap.max {
                return Err(anyhow::anyhow!("{name}: min {} exceeds max {}", cap.min, cap.max).into());
            }
        }
        ensure_finite("construction_capacity.max_increase", self.construction_capacity.max_increase)?;
        ensure_finite("construction_capacity.max_decrease", self.construction_capacity.max_decrease)?;
        for (name, v) in [
            ("turnover_rate", self.turnover_rate),
            ("stamp_duty_rate", self.stamp_duty_rate),
            ("owner_cost_share", self.owner_cost_share),
            ("credit_price_sensitivity", self.credit_price_sensitivity),
            ("first_home_grant_passthrough", self.first_home_grant_passthrough),
            ("foreign_surcharge_price_effect", self.foreign_surcharge_price_effect),
            ("vacancy_tax_rent_effect", self.vacancy_tax_rent_effect),
            ("divestment_stock_withdrawal", self.divestment_stock_withdrawal),
            ("upzoning_supply_effect", self.upzoning_supply_effect),
        ] {
            ensure_finite(name, v)?;
        }
        let c = &self.curves;
        c.supply_gap_price.validate("supply_gap_price")?;
        c.supply_gap_rent.validate("supply_gap_rent")?;
        c.construction_response.validate("construction_response")?;
        c.migration_response.validate("migration_response")?;
        c.investor_demand_shock.validate("investor_demand_shock")?;
        c.divestment_rental_shock.validate("divestment_rental_shock")?;
        Ok(())
    }
}

// ── Boundary helpers ─────────────────────────────────────────────────────────

/// Reject NaN / ±∞ at a configuration boundary.
pub fn ensure_finite(field: &str, value: f64) -> SimResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SimError::NonFinite { field: field.to_string(), value })
    }
}

/// Replace a non-finite intermediate with a neutral value.
pub fn finite_or(value: f64, neutral: f64) -> f64 {
    if value.is_finite() { value } else { neutral }
}

/// Linear phase-in from 0 to 1. Zero ramp years means full effect at once.
pub fn ramp01(year_index: u32, ramp_years: u32) -> f64 {
    if ramp_years == 0 {
        return 1.0;
    }
    ((year_index as f64 + 1.0) / ramp_years as f64).clamp(0.0, 1.0)
}

// ── Formulas ─────────────────────────────────────────────────────────────────

pub fn households(population: f64, persons_per_household: f64) -> f64 {
    if persons_per_household <= 0.0 {
        return 0.0;
    }
    finite_or(population / persons_per_household, 0.0)
}

/// Positive = shortage. Zero when there is no stock to compare against.
pub fn supply_gap(demand_households: f64, stock: f64) -> f64 {
    if stock <= 0.0 || !stock.is_finite() {
        return 0.0;
    }
    finite_or((demand_households - stock) / stock, 0.0)
}

/// `clamp(baseline + speed·price_curve(gap) + policy_adjustment)`.
pub fn nominal_price_growth(params: &MethodologyParams, gap: f64, policy_adjustment: f64) -> f64 {
    let raw = params.baseline_price_growth
        + params.market_adjustment_speed * params.curves.supply_gap_price.eval(gap)
        + finite_or(policy_adjustment, 0.0);
    params.price_growth_cap.apply(raw)
}

/// Same shape as price growth; the curve is scaled by the city's rent
/// elasticity to the supply gap and a policy modifier is added.
pub fn nominal_rent_growth(
    params: &MethodologyParams,
    gap: f64,
    gap_elasticity: f64,
    policy_modifier: f64,
) -> f64 {
    let raw = params.baseline_rent_growth
        + params.market_adjustment_speed
            * finite_or(gap_elasticity, 1.0)
            * params.curves.supply_gap_rent.eval(gap)
        + finite_or(policy_modifier, 0.0);
    params.rent_growth_cap.apply(raw)
}

pub fn construction_response(params: &MethodologyParams, expected_price_growth: f64) -> f64 {
    params.curves.construction_response.eval(expected_price_growth).max(0.0)
}

/// Uncapped next-year completions.
pub fn completions_next(baseline_completions: f64, supply_boost: f64, response: f64) -> f64 {
    let boost = finite_or(supply_boost, 0.0).clamp(SUPPLY_BOOST_MIN, SUPPLY_BOOST_MAX);
    finite_or(baseline_completions * (1.0 + boost) * response, baseline_completions).max(0.0)
}

/// Hard YoY capacity cap, applied after the boost/response multiplier.
pub fn cap_completions_by_capacity(previous: f64, proposed: f64, limits: CapacityLimits) -> f64 {
    let proposed = finite_or(proposed, previous).max(0.0);
    if previous <= 0.0 || !previous.is_finite() {
        return proposed;
    }
    let lo = previous * (1.0 - limits.max_decrease.clamp(0.0, 1.0));
    let hi = previous * (1.0 + limits.max_increase.max(0.0));
    proposed.clamp(lo, hi)
}

pub fn stamp_duty_revenue(stock: f64, turnover_rate: f64, price: f64, stamp_duty_rate: f64) -> f64 {
    finite_or(stock * turnover_rate * price * stamp_duty_rate, 0.0).max(0.0)
}

/// Annual repayment on an amortising loan.
pub fn annual_mortgage_repayment(principal: f64, annual_rate: f64, term_years: f64) -> f64 {
    if principal <= 0.0 || term_years <= 0.0 {
        return 0.0;
    }
    if annual_rate.abs() < 1e-12 {
        return principal / term_years;
    }
    let growth = (1.0 + annual_rate).powf(term_years);
    finite_or(principal * annual_rate * growth / (growth - 1.0), principal / term_years)
}

/// Annual housing cost blending an 80% LVR repayment with rent.
pub fn housing_cost_index(
    price: f64,
    annual_rent: f64,
    mortgage_rate: f64,
    term_years: f64,
    owner_share: f64,
) -> f64 {
    let share = owner_share.clamp(0.0, 1.0);
    let repayment = annual_mortgage_repayment(price * INDEX_LOAN_TO_VALUE, mortgage_rate, term_years);
    finite_or(share * repayment + (1.0 - share) * annual_rent, annual_rent).max(0.0)
}

/// Divide guarding against a zero or non-finite denominator.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    finite_or(numerator / denominator, 0.0)
}
