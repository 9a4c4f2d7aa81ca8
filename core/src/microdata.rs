//! Household microdata: canonical income / tenure / weight records.
//!
//! Pipeline (each stage separately callable):
//!   1. `infer_mapping`:   score column names, validate by sampling values.
//!   2. `canonicalize`:    apply a mapping; drop invalid rows, never crash.
//!   3. `synthesize_city`: lognormal incomes anchored to city constants.
//!   4. `mix`:             blend real and synthetic groups to a weight split.
//!   5. `reweight_tenure`: adjust weights so tenure shares hit targets.
//!
//! RULE: only the weight field is ever adjusted after canonicalization.
//! Incomes are never rescaled.

use crate::{
    config::CityBaseline,
    error::{SimError, SimResult},
    methodology::ensure_finite,
    rng::{RngBank, UniformSource},
    types::CityId,
    warning::{Warning, WarningSource},
};
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Rows examined by the autodetector.
pub const SAMPLE_ROWS: usize = 500;
pub const MIN_PLAUSIBLE_INCOMES: usize = 20;
pub const INCOME_MEDIAN_RANGE: (f64, f64) = (15_000.0, 250_000.0);
pub const MIN_TENURE_MAPPED_SHARE: f64 = 0.25;

pub type RawRow = Map<String, Value>;
pub type TenureShares = BTreeMap<Tenure, f64>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Tenure {
    Renter,
    Mortgaged,
    Outright,
    Investor,
}

impl Tenure {
    pub const ALL: [Tenure; 4] = [Self::Renter, Self::Mortgaged, Self::Outright, Self::Investor];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Renter    => "renter",
            Self::Mortgaged => "mortgaged",
            Self::Outright  => "outright",
            Self::Investor  => "investor",
        }
    }

    /// Map a free-text tenure code onto a tenure, if recognised.
    pub fn parse(code: &str) -> Option<Tenure> {
        let norm = normalize_code(code);
        match norm.as_str() {
            "r" | "rent" | "renter" | "renting" | "rented" | "rental" | "private rental"
            | "public rental" | "tenant" => Some(Self::Renter),
            "m" | "mortgage" | "mortgaged" | "owner with mortgage" | "owned with mortgage"
            | "owner with a mortgage" | "being purchased" | "purchaser" => Some(Self::Mortgaged),
            "o" | "own" | "owned" | "outright" | "owned outright" | "owner outright"
            | "owner without mortgage" | "owned without mortgage" => Some(Self::Outright),
            "i" | "inv" | "investor" | "landlord" => Some(Self::Investor),
            _ => None,
        }
    }
}

fn normalize_code(code: &str) -> String {
    code.trim()
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MicrodataRecord {
    /// Gross annual household income, AUD.
    pub income: f64,
    pub tenure: Tenure,
    pub weight: f64,
}

// ── Raw input ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldMapping {
    pub income: String,
    pub tenure: String,
    #[serde(default)]
    pub weight: Option<String>,
    /// Dataset-specific tenure codes, checked before the built-in table.
    #[serde(default)]
    pub tenure_codes: BTreeMap<String, Tenure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCityMicrodata {
    pub rows: Vec<RawRow>,
    #[serde(default)]
    pub mapping: Option<FieldMapping>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMicrodata {
    pub cities: BTreeMap<CityId, RawCityMicrodata>,
}

// ── Schema inference ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MappingConfidence {
    pub income: f64,
    pub tenure: f64,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferredMapping {
    pub mapping:    FieldMapping,
    pub confidence: MappingConfidence,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("no rows to inspect")]
    Empty,
    #[error("no column validated as household income")]
    NoIncomeColumn,
    #[error("no column validated as tenure")]
    NoTenureColumn,
}

/// How a lower-cased column name is matched.
enum NameRule {
    Exact(&'static [&'static str]),
    Prefix(&'static str),
    Contains(&'static [&'static str]),
    /// Any `_`/space/punctuation-separated token equals one of these.
    Token(&'static [&'static str]),
    /// Contains the first needle and, after it, any of the rest.
    Then(&'static str, &'static [&'static str]),
}

impl NameRule {
    fn matches(&self, column: &str) -> bool {
        match self {
            Self::Exact(names) => names.contains(&column),
            Self::Prefix(prefix) => column.starts_with(prefix),
            Self::Contains(needles) => needles.iter().any(|n| column.contains(n)),
            Self::Token(tokens) => column
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|t| tokens.contains(&t)),
            Self::Then(first, rest) => column
                .find(first)
                .map_or(false, |i| rest.iter().any(|r| column[i + first.len()..].contains(r))),
        }
    }
}

const INCOME_RULES: &[(NameRule, f64)] = &[
    (NameRule::Exact(&["income", "hhincome", "hh_income", "householdincome", "household_income"]), 1.0),
    (NameRule::Contains(&["hh_inc", "hhinc"]), 0.9),
    (NameRule::Contains(&["gross"]), 0.8),
    (NameRule::Contains(&["income"]), 0.7),
    (NameRule::Token(&["inc"]), 0.7),
    (NameRule::Contains(&["earn", "salary", "wage"]), 0.5),
];

const TENURE_RULES: &[(NameRule, f64)] = &[
    (NameRule::Prefix("tenure"), 1.0),
    (NameRule::Contains(&["tenure", "tenr"]), 0.9),
    (NameRule::Contains(&["mortg"]), 0.6),
    (NameRule::Contains(&["own"]), 0.5),
    (NameRule::Contains(&["rent"]), 0.4),
    (NameRule::Then("hous", &["type", "status"]), 0.4),
];

const WEIGHT_RULES: &[(NameRule, f64)] = &[
    (NameRule::Exact(&["weight", "hhweight", "hh_weight", "personweight", "person_weight", "householdweight", "household_weight"]), 1.0),
    (NameRule::Contains(&["wgt", "weight"]), 0.8),
    (NameRule::Token(&["wt"]), 0.6),
];

fn name_score(column: &str, rules: &[(NameRule, f64)]) -> f64 {
    let column = column.to_lowercase();
    rules
        .iter()
        .filter(|(rule, _)| rule.matches(&column))
        .map(|(_, score)| *score)
        .fold(0.0, f64::max)
}

/// Candidate columns ordered by descending name score, ties by name.
fn ranked_candidates<'a>(
    columns: &'a BTreeSet<String>,
    rules: &[(NameRule, f64)],
    exclude: &[&str],
) -> Vec<(&'a str, f64)> {
    let mut ranked: Vec<(&str, f64)> = columns
        .iter()
        .filter(|c| !exclude.contains(&c.as_str()))
        .map(|c| (c.as_str(), name_score(c, rules)))
        .filter(|(_, s)| *s > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
}

/// Score column names against known name rules, then validate the best
/// candidates by sampling their values.
pub fn infer_mapping(rows: &[RawRow]) -> Result<InferredMapping, InferenceError> {
    if rows.is_empty() {
        return Err(InferenceError::Empty);
    }
    let sample = &rows[..rows.len().min(SAMPLE_ROWS)];
    let columns: BTreeSet<String> = sample.iter().flat_map(|r| r.keys().cloned()).collect();

    // Weight first so a "weight" column is never mistaken for income.
    let weight = ranked_candidates(&columns, WEIGHT_RULES, &[])
        .into_iter()
        .find_map(|(col, score)| {
            let valid = weight_valid_share(sample, col)?;
            Some((col.to_string(), 0.5 * score + 0.5 * valid))
        });
    let weight_col = weight.as_ref().map(|(c, _)| c.as_str());

    let exclude_income: Vec<&str> = weight_col.into_iter().collect();
    let (income_col, income_conf) = ranked_candidates(&columns, INCOME_RULES, &exclude_income)
        .into_iter()
        .find_map(|(col, score)| {
            let valid = income_valid_share(sample, col)?;
            Some((col.to_string(), 0.5 * score + 0.5 * valid))
        })
        .ok_or(InferenceError::NoIncomeColumn)?;

    let mut exclude_tenure = exclude_income.clone();
    exclude_tenure.push(income_col.as_str());
    let (tenure_col, tenure_conf) = ranked_candidates(&columns, TENURE_RULES, &exclude_tenure)
        .into_iter()
        .find_map(|(col, score)| {
            let mapped = tenure_mapped_share(sample, col, &BTreeMap::new())?;
            Some((col.to_string(), 0.5 * score + 0.5 * mapped))
        })
        .ok_or(InferenceError::NoTenureColumn)?;

    log::debug!(
        "inferred microdata mapping: income={income_col} ({income_conf:.2}) tenure={tenure_col} ({tenure_conf:.2}) weight={:?}",
        weight
    );

    Ok(InferredMapping {
        confidence: MappingConfidence {
            income: income_conf,
            tenure: tenure_conf,
            weight: weight.as_ref().map(|(_, c)| *c),
        },
        mapping: FieldMapping {
            income: income_col,
            tenure: tenure_col,
            weight: weight.map(|(c, _)| c),
            tenure_codes: BTreeMap::new(),
        },
    })
}

/// Share of non-null values that are plausible incomes, if the column
/// passes the count and median checks.
fn income_valid_share(sample: &[RawRow], column: &str) -> Option<f64> {
    let present: Vec<&Value> = sample.iter().filter_map(|r| r.get(column)).filter(|v| !v.is_null()).collect();
    let mut plausible: Vec<f64> = present
        .iter()
        .filter_map(|v| numeric_value(v))
        .filter(|x| x.is_finite() && *x > 0.0)
        .collect();
    if plausible.len() < MIN_PLAUSIBLE_INCOMES {
        return None;
    }
    plausible.sort_by(|a, b| a.total_cmp(b));
    let median = plausible[plausible.len() / 2];
    if median < INCOME_MEDIAN_RANGE.0 || median > INCOME_MEDIAN_RANGE.1 {
        return None;
    }
    Some(plausible.len() as f64 / present.len() as f64)
}

fn tenure_mapped_share(
    sample: &[RawRow],
    column: &str,
    codes: &BTreeMap<String, Tenure>,
) -> Option<f64> {
    let present: Vec<&Value> = sample.iter().filter_map(|r| r.get(column)).filter(|v| !v.is_null()).collect();
    if present.is_empty() {
        return None;
    }
    let mapped = present.iter().filter(|v| tenure_value(v, codes).is_some()).count();
    let share = mapped as f64 / present.len() as f64;
    (share >= MIN_TENURE_MAPPED_SHARE).then_some(share)
}

fn weight_valid_share(sample: &[RawRow], column: &str) -> Option<f64> {
    let present: Vec<&Value> = sample.iter().filter_map(|r| r.get(column)).filter(|v| !v.is_null()).collect();
    if present.is_empty() {
        return None;
    }
    let valid = present
        .iter()
        .filter_map(|v| numeric_value(v))
        .filter(|x| x.is_finite() && *x >= 0.0)
        .count();
    let share = valid as f64 / present.len() as f64;
    (share >= 0.9).then_some(share)
}

/// Numbers, or numeric strings like "$52,000".
pub fn numeric_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| !matches!(c, '$' | ',' | ' ')).collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
}

fn tenure_value(v: &Value, codes: &BTreeMap<String, Tenure>) -> Option<Tenure> {
    let text = match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let norm = normalize_code(&text);
    codes
        .iter()
        .find(|(k, _)| normalize_code(k) == norm)
        .map(|(_, t)| *t)
        .or_else(|| Tenure::parse(&text))
}

// ── Canonicalization ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Canonicalized {
    pub records: Vec<MicrodataRecord>,
    pub dropped: usize,
}

/// Apply a mapping. Rows with income ≤ 0, an unmapped tenure or a
/// negative / non-numeric weight are dropped and counted.
pub fn canonicalize(rows: &[RawRow], mapping: &FieldMapping) -> Canonicalized {
    let mut out = Canonicalized::default();
    for row in rows {
        match canonical_record(row, mapping) {
            Some(record) => out.records.push(record),
            None => out.dropped += 1,
        }
    }
    out
}

fn canonical_record(row: &RawRow, mapping: &FieldMapping) -> Option<MicrodataRecord> {
    let income = row.get(&mapping.income).and_then(numeric_value)?;
    if !income.is_finite() || income <= 0.0 {
        return None;
    }
    let tenure = row.get(&mapping.tenure).and_then(|v| tenure_value(v, &mapping.tenure_codes))?;
    let weight = match mapping.weight.as_ref().and_then(|col| row.get(col)) {
        None | Some(Value::Null) => 1.0,
        Some(v) => {
            let w = numeric_value(v)?;
            if !w.is_finite() || w < 0.0 {
                return None;
            }
            w
        }
    };
    Some(MicrodataRecord { income, tenure, weight })
}

// ── Synthesis ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyntheticParams {
    /// Median household income as a multiple of the median wage.
    pub household_income_multiplier: f64,
    /// Log-scale standard deviation of household income.
    pub income_sigma:    f64,
    pub renter_share:    f64,
    pub mortgaged_share: f64,
    /// Small fixed investor share; outright owners take the remainder.
    pub investor_share:  f64,
    pub records_per_city: usize,
    pub tenure_income_factors: BTreeMap<Tenure, f64>,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            household_income_multiplier: 1.35,
            income_sigma:    0.60,
            renter_share:    0.31,
            mortgaged_share: 0.35,
            investor_share:  0.05,
            records_per_city: 2_000,
            tenure_income_factors: [
                (Tenure::Renter, 0.75),
                (Tenure::Mortgaged, 1.25),
                (Tenure::Outright, 0.85),
                (Tenure::Investor, 1.60),
            ]
            .into(),
        }
    }
}

impl SyntheticParams {
    pub fn validate(&self) -> SimResult<()> {
        for (name, v) in [
            ("synthetic.household_income_multiplier", self.household_income_multiplier),
            ("synthetic.income_sigma", self.income_sigma),
            ("synthetic.renter_share", self.renter_share),
            ("synthetic.mortgaged_share", self.mortgaged_share),
            ("synthetic.investor_share", self.investor_share),
        ] {
            ensure_finite(name, v)?;
        }
        if self.household_income_multiplier <= 0.0 {
            return Err(invalid("synthetic.household_income_multiplier", self.household_income_multiplier, "must be > 0"));
        }
        if self.income_sigma < 0.0 {
            return Err(invalid("synthetic.income_sigma", self.income_sigma, "must be >= 0"));
        }
        for (name, v) in [
            ("synthetic.renter_share", self.renter_share),
            ("synthetic.mortgaged_share", self.mortgaged_share),
            ("synthetic.investor_share", self.investor_share),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(invalid(name, v, "must be within [0, 1]"));
            }
        }
        for (tenure, factor) in &self.tenure_income_factors {
            let name = format!("synthetic.tenure_income_factors.{}", tenure.name());
            ensure_finite(&name, *factor)?;
            if *factor <= 0.0 {
                return Err(invalid(&name, *factor, "must be > 0"));
            }
        }
        Ok(())
    }

    /// Tenure shares in draw order, normalised if they exceed 1.
    fn tenure_shares(&self) -> [(Tenure, f64); 4] {
        let renter = self.renter_share.max(0.0);
        let mortgaged = self.mortgaged_share.max(0.0);
        let investor = self.investor_share.max(0.0);
        let named = renter + mortgaged + investor;
        let scale = if named > 1.0 { 1.0 / named } else { 1.0 };
        let outright = (1.0 - named * scale).max(0.0);
        [
            (Tenure::Renter, renter * scale),
            (Tenure::Mortgaged, mortgaged * scale),
            (Tenure::Investor, investor * scale),
            (Tenure::Outright, outright),
        ]
    }
}

/// Draw synthetic households for one city.
pub fn synthesize_city<R: UniformSource>(
    baseline: &CityBaseline,
    params: &SyntheticParams,
    rng: &mut R,
) -> SimResult<Vec<MicrodataRecord>> {
    let median = baseline.median_wage * params.household_income_multiplier;
    // Unit-median noise; the tenure factor and city median scale it.
    let noise = LogNormal::new(0.0, params.income_sigma).map_err(|e| {
        anyhow::anyhow!("synthetic income_sigma {} rejected: {e}", params.income_sigma)
    })?;
    let shares = params.tenure_shares();
    let records = (0..params.records_per_city)
        .map(|_| {
            let u = rng.next_f64();
            let mut acc = 0.0;
            let mut tenure = Tenure::Outright;
            for (t, share) in shares {
                acc += share;
                if u < acc {
                    tenure = t;
                    break;
                }
            }
            let factor = params.tenure_income_factors.get(&tenure).copied().unwrap_or(1.0);
            let income = median * factor * noise.sample(&mut *rng);
            MicrodataRecord { income, tenure, weight: 1.0 }
        })
        .collect();
    Ok(records)
}

// ── Mixing and reweighting ──────────────────────────────────────────

fn total_weight(records: &[MicrodataRecord]) -> f64 {
    records.iter().map(|r| r.weight).sum()
}

fn rescale_group(records: &[MicrodataRecord], target: f64) -> Vec<MicrodataRecord> {
    let total = total_weight(records);
    let n = records.len() as f64;
    records
        .iter()
        .map(|r| {
            let weight = if total > 0.0 { r.weight * target / total } else { target / n };
            MicrodataRecord { weight, ..*r }
        })
        .collect()
}

/// Blend real and synthetic records so the real group carries
/// `real_share` of the combined weight. An empty group leaves the other
/// unchanged.
pub fn mix(real: &[MicrodataRecord], synthetic: &[MicrodataRecord], real_share: f64) -> Vec<MicrodataRecord> {
    if real.is_empty() {
        return synthetic.to_vec();
    }
    if synthetic.is_empty() {
        return real.to_vec();
    }
    let share = real_share.clamp(0.0, 1.0);
    let total = (real.len() + synthetic.len()) as f64;
    let mut out = rescale_group(real, total * share);
    out.extend(rescale_group(synthetic, total * (1.0 - share)));
    out
}

/// Weighted tenure shares of a record set. Empty map if total weight is zero.
pub fn tenure_shares(records: &[MicrodataRecord]) -> TenureShares {
    let total = total_weight(records);
    if total <= 0.0 {
        return TenureShares::new();
    }
    let mut shares = TenureShares::new();
    for r in records {
        *shares.entry(r.tenure).or_insert(0.0) += r.weight / total;
    }
    shares
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReweightOutcome {
    pub records:  Vec<MicrodataRecord>,
    pub factors:  BTreeMap<Tenure, f64>,
    pub warnings: Vec<String>,
}

/// Scale weights so targeted tenures reach their target shares.
///
/// Factor per targeted tenure = target share / current share, with the
/// current share measured against the final total. Untargeted tenures
/// keep their weights; when every tenure is targeted the total weight is
/// preserved. A tenure with zero current weight gets factor 1.0.
pub fn reweight_tenure(records: &[MicrodataRecord], targets: &TenureShares) -> ReweightOutcome {
    let mut warnings = Vec::new();
    let total = total_weight(records);
    if total <= 0.0 || targets.is_empty() {
        return ReweightOutcome { records: records.to_vec(), factors: BTreeMap::new(), warnings };
    }

    let mut targets: TenureShares = targets
        .iter()
        .filter(|(t, share)| {
            let ok = share.is_finite() && **share >= 0.0;
            if !ok {
                warnings.push(format!("ignored invalid target share {share} for {}", t.name()));
            }
            ok
        })
        .map(|(t, s)| (*t, *s))
        .collect();

    let mut current = BTreeMap::new();
    for r in records {
        *current.entry(r.tenure).or_insert(0.0) += r.weight;
    }
    let untargeted: f64 = current
        .iter()
        .filter(|(t, _)| !targets.contains_key(t))
        .map(|(_, w)| *w)
        .sum();
    let target_sum: f64 = targets.values().sum();

    let final_total = if untargeted <= 0.0 {
        if target_sum > 0.0 && (target_sum - 1.0).abs() > 1e-9 {
            warnings.push(format!("target shares sum to {target_sum:.4}; normalised to 1"));
            for s in targets.values_mut() {
                *s /= target_sum;
            }
        }
        total
    } else if target_sum < 1.0 {
        untargeted / (1.0 - target_sum)
    } else {
        let room = 1.0 - untargeted / total;
        warnings.push(format!(
            "target shares sum to {target_sum:.4} but untargeted tenures hold {:.4}; targets scaled to {room:.4}",
            1.0 - room
        ));
        for s in targets.values_mut() {
            *s *= room / target_sum;
        }
        total
    };

    let mut factors = BTreeMap::new();
    for (tenure, target) in &targets {
        let weight = current.get(tenure).copied().unwrap_or(0.0);
        let factor = if weight > 0.0 {
            target * final_total / weight
        } else {
            warnings.push(format!("no {} records; target share {target:.3} cannot be met", tenure.name()));
            1.0
        };
        factors.insert(*tenure, factor);
    }

    let reweighted = records
        .iter()
        .map(|r| {
            let factor = factors.get(&r.tenure).copied().unwrap_or(1.0);
            MicrodataRecord { weight: r.weight * factor, ..*r }
        })
        .collect();
    ReweightOutcome { records: reweighted, factors, warnings }
}

// ── Bundle ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MicrodataMode {
    /// Real when enough records survive, mixed when some do, else synthetic.
    #[default]
    Auto,
    Real,
    Synthetic,
    Mixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Real,
    Synthetic,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MicrodataConfig {
    pub mode:             MicrodataMode,
    /// Real group's share of combined weight when mixing.
    pub real_share:       f64,
    /// Below this many valid real records, Auto mode mixes in synthetic ones.
    pub min_real_records: usize,
    /// Overrides the run seed for synthesis when set.
    pub seed:             Option<u64>,
    pub synthetic:        SyntheticParams,
    pub tenure_targets:   Option<TenureShares>,
    pub city_tenure_targets: BTreeMap<CityId, TenureShares>,
}

impl MicrodataConfig {
    /// Reject non-finite or out-of-range settings before any draw.
    pub fn validate(&self) -> SimResult<()> {
        ensure_finite("microdata.real_share", self.real_share)?;
        if !(0.0..=1.0).contains(&self.real_share) {
            return Err(invalid("microdata.real_share", self.real_share, "must be within [0, 1]"));
        }
        self.synthetic.validate()?;
        let city_targets = self.city_tenure_targets.iter().map(|(c, t)| (format!("microdata.city_tenure_targets.{c}"), t));
        let targets = self.tenure_targets.iter().map(|t| ("microdata.tenure_targets".to_string(), t));
        for (prefix, shares) in targets.chain(city_targets) {
            for (tenure, share) in shares {
                let name = format!("{prefix}.{}", tenure.name());
                ensure_finite(&name, *share)?;
                if !(0.0..=1.0).contains(share) {
                    return Err(invalid(&name, *share, "must be within [0, 1]"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, value: f64, reason: &str) -> SimError {
    SimError::Other(anyhow::anyhow!("invalid {field} = {value}: {reason}"))
}

impl Default for MicrodataConfig {
    fn default() -> Self {
        Self {
            mode:             MicrodataMode::Auto,
            real_share:       0.70,
            min_real_records: 200,
            seed:             None,
            synthetic:        SyntheticParams::default(),
            tenure_targets:   None,
            city_tenure_targets: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CityMicrodata {
    pub records:            Vec<MicrodataRecord>,
    pub source:             SourceKind,
    pub mapping_confidence: Option<MappingConfidence>,
    pub dropped_records:    usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MicrodataBundle {
    pub cities:   BTreeMap<CityId, CityMicrodata>,
    pub warnings: Vec<Warning>,
}

impl MicrodataBundle {
    pub fn records(&self, city: &str) -> Option<&[MicrodataRecord]> {
        self.cities.get(city).map(|c| c.records.as_slice())
    }
}

/// Build a bundle for every baseline city from optional raw rows.
pub fn build_microdata_bundle(
    baselines: &[CityBaseline],
    raw: Option<&RawMicrodata>,
    config: &MicrodataConfig,
    run_seed: u64,
) -> SimResult<MicrodataBundle> {
    let bank = RngBank::new(config.seed.unwrap_or(run_seed));
    let mut bundle = MicrodataBundle::default();

    if let Some(raw) = raw {
        for city in raw.cities.keys() {
            if !baselines.iter().any(|b| &b.id == city) {
                bundle.warnings.push(Warning::for_city(
                    WarningSource::Microdata,
                    city,
                    "microdata supplied for a city with no baseline; ignored",
                ));
            }
        }
    }

    for baseline in baselines {
        let city = baseline.id.as_str();
        let mut confidence = None;
        let mut dropped = 0;
        let mut real = Vec::new();

        if let Some(raw_city) = raw.and_then(|r| r.cities.get(city)) {
            let mapping = match &raw_city.mapping {
                Some(m) => Some(m.clone()),
                None => match infer_mapping(&raw_city.rows) {
                    Ok(inferred) => {
                        confidence = Some(inferred.confidence);
                        Some(inferred.mapping)
                    }
                    Err(e) => {
                        bundle.warnings.push(Warning::for_city(
                            WarningSource::Microdata,
                            city,
                            format!("could not infer column mapping: {e}"),
                        ));
                        None
                    }
                },
            };
            if let Some(mapping) = mapping {
                let canon = canonicalize(&raw_city.rows, &mapping);
                dropped = canon.dropped;
                if dropped > 0 {
                    bundle.warnings.push(Warning::for_city(
                        WarningSource::Microdata,
                        city,
                        format!("dropped {dropped} of {} rows (income <= 0, unmapped tenure or bad weight)", raw_city.rows.len()),
                    ));
                }
                real = canon.records;
            }
        }

        let synth = || {
            let mut rng = bank.for_city(city);
            synthesize_city(baseline, &config.synthetic, &mut rng)
        };

        let (records, source) = match config.mode {
            MicrodataMode::Synthetic => (synth()?, SourceKind::Synthetic),
            MicrodataMode::Real if !real.is_empty() => (real, SourceKind::Real),
            MicrodataMode::Mixed | MicrodataMode::Auto if !real.is_empty() => {
                if config.mode == MicrodataMode::Auto && real.len() >= config.min_real_records {
                    (real, SourceKind::Real)
                } else {
                    (mix(&real, &synth()?, config.real_share), SourceKind::Mixed)
                }
            }
            mode => {
                if mode != MicrodataMode::Auto || raw.map_or(false, |r| r.cities.contains_key(city)) {
                    bundle.warnings.push(Warning::for_city(
                        WarningSource::Microdata,
                        city,
                        "no usable real records; using synthetic households",
                    ));
                }
                (synth()?, SourceKind::Synthetic)
            }
        };

        let targets = config.city_tenure_targets.get(city).or(config.tenure_targets.as_ref());
        let records = match targets {
            Some(t) => {
                let outcome = reweight_tenure(&records, t);
                for w in outcome.warnings {
                    bundle.warnings.push(Warning::for_city(WarningSource::Microdata, city, w));
                }
                outcome.records
            }
            None => records,
        };

        log::debug!("microdata {city}: {} records ({source:?}), {dropped} dropped", records.len());
        bundle.cities.insert(
            city.to_string(),
            CityMicrodata { records, source, mapping_confidence: confidence, dropped_records: dropped },
        );
    }
    Ok(bundle)
}
