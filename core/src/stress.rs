//! Tenure-specific affordability stress from household microdata.
//!
//! A household is in stress when its annual housing cost exceeds
//! `STRESS_THRESHOLD` of gross income. Incomes are indexed forward with
//! the simulated median wage; costs come from the simulated year's rent,
//! price and mortgage rate.

use crate::{
    config::CityBaseline,
    engine::YearState,
    methodology::{annual_mortgage_repayment, ratio, INDEX_LOAN_TO_VALUE},
    microdata::{MicrodataRecord, Tenure},
};
use serde::{Deserialize, Serialize};

pub const STRESS_THRESHOLD: f64 = 0.30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenureStress {
    pub tenure:                 Tenure,
    /// Weighted household count.
    pub households:             f64,
    pub stress_share:           f64,
    pub median_cost_to_income:  f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecileStress {
    /// 1..=10, lowest income first.
    pub decile:         u8,
    pub income_upper:   f64,
    pub mean_income:    f64,
    pub rent_to_income: f64,
}

/// Annual housing cost for a tenure in the given year.
/// Outright owners and investors carry no modelled housing cost.
pub fn housing_cost(tenure: Tenure, state: &YearState, baseline: &CityBaseline) -> f64 {
    match tenure {
        Tenure::Renter => state.median_rent,
        Tenure::Mortgaged => annual_mortgage_repayment(
            state.median_price * INDEX_LOAN_TO_VALUE,
            state.mortgage_rate,
            baseline.mortgage_term_years,
        ),
        Tenure::Outright | Tenure::Investor => 0.0,
    }
}

fn income_index(state: &YearState, baseline: &CityBaseline) -> f64 {
    let idx = ratio(state.median_wage, baseline.median_wage);
    if idx > 0.0 { idx } else { 1.0 }
}

pub fn tenure_stress(
    records: &[MicrodataRecord],
    state: &YearState,
    baseline: &CityBaseline,
) -> Vec<TenureStress> {
    let index = income_index(state, baseline);
    Tenure::ALL
        .iter()
        .filter_map(|&tenure| {
            let cost = housing_cost(tenure, state, baseline);
            let mut rows: Vec<(f64, f64)> = records
                .iter()
                .filter(|r| r.tenure == tenure && r.weight > 0.0)
                .map(|r| (ratio(cost, r.income * index), r.weight))
                .collect();
            let households: f64 = rows.iter().map(|(_, w)| w).sum();
            if households <= 0.0 {
                return None;
            }
            let stressed: f64 = rows
                .iter()
                .filter(|(share, _)| *share > STRESS_THRESHOLD)
                .map(|(_, w)| w)
                .sum();
            rows.sort_by(|a, b| a.0.total_cmp(&b.0));
            Some(TenureStress {
                tenure,
                households,
                stress_share: stressed / households,
                median_cost_to_income: weighted_median(&rows, households),
            })
        })
        .collect()
}

/// `rows` must be sorted by value.
fn weighted_median(rows: &[(f64, f64)], total: f64) -> f64 {
    let mut acc = 0.0;
    for &(value, weight) in rows {
        acc += weight;
        if acc >= total / 2.0 {
            return value;
        }
    }
    rows.last().map(|(v, _)| *v).unwrap_or(0.0)
}

/// Renter rent-to-income by weighted income decile.
pub fn renter_deciles(
    records: &[MicrodataRecord],
    state: &YearState,
    baseline: &CityBaseline,
) -> Vec<DecileStress> {
    let index = income_index(state, baseline);
    let mut renters: Vec<(f64, f64)> = records
        .iter()
        .filter(|r| r.tenure == Tenure::Renter && r.weight > 0.0)
        .map(|r| (r.income * index, r.weight))
        .collect();
    let total: f64 = renters.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    renters.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut out = Vec::with_capacity(10);
    let mut acc = 0.0;
    let mut iter = renters.iter().peekable();
    for decile in 1..=10u8 {
        let bound = total * decile as f64 / 10.0;
        let (mut w_sum, mut inc_sum, mut upper) = (0.0, 0.0, 0.0);
        while let Some(&&(income, weight)) = iter.peek() {
            if acc >= bound && decile < 10 {
                break;
            }
            acc += weight;
            w_sum += weight;
            inc_sum += income * weight;
            upper = income;
            iter.next();
        }
        if w_sum <= 0.0 {
            continue;
        }
        let mean_income = inc_sum / w_sum;
        out.push(DecileStress {
            decile,
            income_upper: upper,
            mean_income,
            rent_to_income: ratio(state.median_rent, mean_income),
        });
    }
    out
}
