//! Policy levers: the scenario knobs, grouped by family.
//!
//! Levers are pure configuration and never carry derived state.
//! Every numeric lever has a plausible range: `sanitized()` clamps
//! out-of-range values (recording a warning) and rejects non-finite
//! ones. Partial configuration is applied with `overlay()`, one field
//! at a time, so precedence is always visible in code.

use crate::{
    error::SimResult,
    methodology::{ensure_finite, ramp01},
    warning::{Warning, WarningSource},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyLevers {
    pub supply:          SupplyDemandLevers,
    pub negative_gearing: NegativeGearingLevers,
    pub ownership_cap:   OwnershipCapLevers,
    pub tax:             TaxLevers,
    pub credit:          CreditLevers,
    pub subsidies:       SubsidyLevers,
    pub rental:          RentalRegulationLevers,
    pub planning:        PlanningLevers,
    pub public_housing:  PublicHousingLevers,
    pub migration:       MigrationLevers,
    pub timing:          TimingLevers,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupplyDemandLevers {
    /// Fractional boost to completions, [-0.10, 0.25].
    pub supply_boost:     f64,
    /// Fractional reduction of household demand, [0, 0.10].
    pub demand_reduction: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NegativeGearingMode {
    #[default]
    Current,
    Grandfathered,
    Removed,
}

impl NegativeGearingMode {
    fn weight(&self) -> f64 {
        match self {
            Self::Current       => 0.0,
            Self::Grandfathered => 0.5,
            Self::Removed       => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NegativeGearingLevers {
    pub mode:      NegativeGearingMode,
    /// Scales the mode's effect, [0, 1].
    pub intensity: f64,
}

impl Default for NegativeGearingLevers {
    fn default() -> Self {
        Self { mode: NegativeGearingMode::Current, intensity: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OwnershipCapLevers {
    pub enabled:            bool,
    /// Investor dwelling share above which divestment is enforced, [0, 1].
    pub max_investor_share: f64,
    /// Maximum share of stock divested per year, [0, 0.10].
    pub divestment_rate:    f64,
}

impl Default for OwnershipCapLevers {
    fn default() -> Self {
        Self { enabled: false, max_investor_share: 0.30, divestment_rate: 0.02 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaxLevers {
    /// Change to the CGT discount, [-0.5, 0.5]. Negative = less generous.
    pub cgt_discount_change:     f64,
    /// [0, 0.15]
    pub foreign_buyer_surcharge: f64,
    /// [0, 0.05]
    pub vacancy_tax:             f64,
    /// Additive change to the stamp duty rate, [-0.04, 0.04].
    pub stamp_duty_rate_change:  f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CreditLevers {
    /// [-0.03, 0.05]
    pub mortgage_rate_shift:   f64,
    /// [0, 0.05]
    pub serviceability_buffer: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubsidyLevers {
    /// AUD per first-home purchase, [0, 50_000].
    pub first_home_grant:       f64,
    /// Fractional change to rent assistance, [-0.5, 1.0].
    pub rent_assistance_change: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RentalRegulationLevers {
    pub rent_cap_enabled: bool,
    /// Maximum annual rent growth while the cap applies, [0, 0.10].
    pub rent_cap_rate:    f64,
}

impl Default for RentalRegulationLevers {
    fn default() -> Self {
        Self { rent_cap_enabled: false, rent_cap_rate: 0.03 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanningLevers {
    /// [0, 1]
    pub upzoning_intensity: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublicHousingLevers {
    /// Public completions per year as a share of stock, [0, 0.02].
    pub build_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationLevers {
    /// Multiplier on net migration, [0.5, 1.5].
    pub net_migration_multiplier: f64,
}

impl Default for MigrationLevers {
    fn default() -> Self {
        Self { net_migration_multiplier: 1.0 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingLevers {
    /// Years to phase levers in, [0, 10]. 0 = full effect at once.
    pub ramp_years:   u32,
    /// Simulated years before levers start, [0, 20].
    pub start_offset: u32,
}

/// Partial lever set. `None` keeps the base value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyOverrides {
    pub supply_boost:             Option<f64>,
    pub demand_reduction:         Option<f64>,
    pub negative_gearing_mode:    Option<NegativeGearingMode>,
    pub negative_gearing_intensity: Option<f64>,
    pub ownership_cap_enabled:    Option<bool>,
    pub max_investor_share:       Option<f64>,
    pub divestment_rate:          Option<f64>,
    pub cgt_discount_change:      Option<f64>,
    pub foreign_buyer_surcharge:  Option<f64>,
    pub vacancy_tax:              Option<f64>,
    pub stamp_duty_rate_change:   Option<f64>,
    pub mortgage_rate_shift:      Option<f64>,
    pub serviceability_buffer:    Option<f64>,
    pub first_home_grant:         Option<f64>,
    pub rent_assistance_change:   Option<f64>,
    pub rent_cap_enabled:         Option<bool>,
    pub rent_cap_rate:            Option<f64>,
    pub upzoning_intensity:       Option<f64>,
    pub public_build_rate:        Option<f64>,
    pub net_migration_multiplier: Option<f64>,
    pub ramp_years:               Option<u32>,
    pub start_offset:             Option<u32>,
}

impl PolicyLevers {
    /// Apply overrides field by field. Later layers win.
    pub fn overlay(&self, o: &PolicyOverrides) -> PolicyLevers {
        let mut out = self.clone();
        if let Some(v) = o.supply_boost             { out.supply.supply_boost = v; }
        if let Some(v) = o.demand_reduction         { out.supply.demand_reduction = v; }
        if let Some(v) = o.negative_gearing_mode    { out.negative_gearing.mode = v; }
        if let Some(v) = o.negative_gearing_intensity { out.negative_gearing.intensity = v; }
        if let Some(v) = o.ownership_cap_enabled    { out.ownership_cap.enabled = v; }
        if let Some(v) = o.max_investor_share       { out.ownership_cap.max_investor_share = v; }
        if let Some(v) = o.divestment_rate          { out.ownership_cap.divestment_rate = v; }
        if let Some(v) = o.cgt_discount_change      { out.tax.cgt_discount_change = v; }
        if let Some(v) = o.foreign_buyer_surcharge  { out.tax.foreign_buyer_surcharge = v; }
        if let Some(v) = o.vacancy_tax              { out.tax.vacancy_tax = v; }
        if let Some(v) = o.stamp_duty_rate_change   { out.tax.stamp_duty_rate_change = v; }
        if let Some(v) = o.mortgage_rate_shift      { out.credit.mortgage_rate_shift = v; }
        if let Some(v) = o.serviceability_buffer    { out.credit.serviceability_buffer = v; }
        if let Some(v) = o.first_home_grant         { out.subsidies.first_home_grant = v; }
        if let Some(v) = o.rent_assistance_change   { out.subsidies.rent_assistance_change = v; }
        if let Some(v) = o.rent_cap_enabled         { out.rental.rent_cap_enabled = v; }
        if let Some(v) = o.rent_cap_rate            { out.rental.rent_cap_rate = v; }
        if let Some(v) = o.upzoning_intensity       { out.planning.upzoning_intensity = v; }
        if let Some(v) = o.public_build_rate        { out.public_housing.build_rate = v; }
        if let Some(v) = o.net_migration_multiplier { out.migration.net_migration_multiplier = v; }
        if let Some(v) = o.ramp_years               { out.timing.ramp_years = v; }
        if let Some(v) = o.start_offset             { out.timing.start_offset = v; }
        out
    }

    /// Clamp every lever into its range. Non-finite values are a
    /// configuration error; clamped values produce a policy warning.
    pub fn sanitized(&self) -> SimResult<(PolicyLevers, Vec<Warning>)> {
        let mut out = self.clone();
        let mut warnings = Vec::new();
        {
            let mut clamp = |name: &'static str, v: &mut f64, lo: f64, hi: f64| -> SimResult<()> {
                ensure_finite(name, *v)?;
                if *v < lo || *v > hi {
                    let clamped = v.clamp(lo, hi);
                    log::warn!("lever {name}={v} outside [{lo}, {hi}], clamped to {clamped}");
                    warnings.push(Warning::new(
                        WarningSource::Policy,
                        format!("{name}={v} outside [{lo}, {hi}]; clamped to {clamped}"),
                    ));
                    *v = clamped;
                }
                Ok(())
            };
            clamp("supply_boost", &mut out.supply.supply_boost, -0.10, 0.25)?;
            clamp("demand_reduction", &mut out.supply.demand_reduction, 0.0, 0.10)?;
            clamp("negative_gearing_intensity", &mut out.negative_gearing.intensity, 0.0, 1.0)?;
            clamp("max_investor_share", &mut out.ownership_cap.max_investor_share, 0.0, 1.0)?;
            clamp("divestment_rate", &mut out.ownership_cap.divestment_rate, 0.0, 0.10)?;
            clamp("cgt_discount_change", &mut out.tax.cgt_discount_change, -0.5, 0.5)?;
            clamp("foreign_buyer_surcharge", &mut out.tax.foreign_buyer_surcharge, 0.0, 0.15)?;
            clamp("vacancy_tax", &mut out.tax.vacancy_tax, 0.0, 0.05)?;
            clamp("stamp_duty_rate_change", &mut out.tax.stamp_duty_rate_change, -0.04, 0.04)?;
            clamp("mortgage_rate_shift", &mut out.credit.mortgage_rate_shift, -0.03, 0.05)?;
            clamp("serviceability_buffer", &mut out.credit.serviceability_buffer, 0.0, 0.05)?;
            clamp("first_home_grant", &mut out.subsidies.first_home_grant, 0.0, 50_000.0)?;
            clamp("rent_assistance_change", &mut out.subsidies.rent_assistance_change, -0.5, 1.0)?;
            clamp("rent_cap_rate", &mut out.rental.rent_cap_rate, 0.0, 0.10)?;
            clamp("upzoning_intensity", &mut out.planning.upzoning_intensity, 0.0, 1.0)?;
            clamp("public_build_rate", &mut out.public_housing.build_rate, 0.0, 0.02)?;
            clamp("net_migration_multiplier", &mut out.migration.net_migration_multiplier, 0.5, 1.5)?;
        }
        for (name, v, hi) in [
            ("ramp_years", &mut out.timing.ramp_years, 10u32),
            ("start_offset", &mut out.timing.start_offset, 20u32),
        ] {
            if *v > hi {
                log::warn!("lever {name}={v} above {hi}, clamped");
                warnings.push(Warning::new(
                    WarningSource::Policy,
                    format!("{name}={v} above {hi}; clamped to {hi}"),
                ));
                *v = hi;
            }
        }
        Ok((out, warnings))
    }

    /// Ramp factor for a simulated year index (0 = first transition).
    /// Zero before the start offset.
    pub fn ramp(&self, year_index: u32) -> f64 {
        if year_index < self.timing.start_offset {
            return 0.0;
        }
        ramp01(year_index - self.timing.start_offset, self.timing.ramp_years)
    }

    /// Combined investor-policy intensity in [0, 1]. Zero at defaults.
    pub fn investor_policy_intensity(&self) -> f64 {
        let ng = self.negative_gearing.mode.weight() * self.negative_gearing.intensity;
        let cgt = (-self.tax.cgt_discount_change).max(0.0);
        let foreign = self.tax.foreign_buyer_surcharge * 2.0;
        let vacancy = self.tax.vacancy_tax * 4.0;
        (ng + cgt + foreign + vacancy).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_neutral() {
        let levers = PolicyLevers::default();
        assert_eq!(levers.investor_policy_intensity(), 0.0);
        assert_eq!(levers.supply.supply_boost, 0.0);
        assert_eq!(levers.migration.net_migration_multiplier, 1.0);
        assert_eq!(levers.ramp(0), 1.0);
    }

    #[test]
    fn overlay_only_touches_named_fields() {
        let base = PolicyLevers::default();
        let merged = base.overlay(&PolicyOverrides {
            supply_boost: Some(0.1),
            ramp_years: Some(5),
            ..Default::default()
        });
        assert_eq!(merged.supply.supply_boost, 0.1);
        assert_eq!(merged.timing.ramp_years, 5);
        assert_eq!(merged.tax, base.tax);
        assert_eq!(merged.credit, base.credit);
    }

    #[test]
    fn out_of_range_levers_are_clamped_with_warning() {
        let mut levers = PolicyLevers::default();
        levers.supply.supply_boost = 0.9;
        levers.timing.ramp_years = 40;
        let (clean, warnings) = levers.sanitized().unwrap();
        assert_eq!(clean.supply.supply_boost, 0.25);
        assert_eq!(clean.timing.ramp_years, 10);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.source == WarningSource::Policy));
    }

    #[test]
    fn nan_lever_is_a_configuration_error() {
        let mut levers = PolicyLevers::default();
        levers.credit.mortgage_rate_shift = f64::NAN;
        assert!(levers.sanitized().is_err());
    }

    #[test]
    fn start_offset_delays_ramp() {
        let mut levers = PolicyLevers::default();
        levers.timing.start_offset = 2;
        levers.timing.ramp_years = 2;
        assert_eq!(levers.ramp(0), 0.0);
        assert_eq!(levers.ramp(1), 0.0);
        assert_eq!(levers.ramp(2), 0.5);
        assert_eq!(levers.ramp(3), 1.0);
    }
}
