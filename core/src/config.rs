use crate::{
    advanced::AdvancedConfig,
    error::{SimError, SimResult},
    history::{MacroGrowthProfile, RawHistory},
    methodology::{ensure_finite, MethodologyParams},
    microdata::{MicrodataConfig, RawMicrodata},
    policy::{PolicyLevers, PolicyOverrides},
    types::{CityId, Year},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

// ── City baseline ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RentElasticities {
    /// Multiplier on the supply-gap rent curve.
    pub supply_gap:             f64,
    /// Multiplier on the divestment rental-supply shock.
    pub investor_exit:          f64,
    /// Rent growth per unit change in rent assistance.
    pub assistance_passthrough: f64,
}

impl Default for RentElasticities {
    fn default() -> Self {
        Self { supply_gap: 1.0, investor_exit: 1.0, assistance_passthrough: 0.01 }
    }
}

/// Point-in-time state of one city at its base year. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CityBaseline {
    pub id:                  CityId,
    pub name:                String,
    /// State or territory code, e.g. "NSW".
    pub state:               String,
    pub base_year:           Year,
    pub population:          f64,
    pub net_migration:       f64,
    pub natural_growth_rate: f64,
    pub dwelling_stock:      f64,
    pub annual_completions:  f64,
    pub demolition_rate:     f64,
    pub median_price:        f64,
    /// Annual rent, AUD.
    pub median_rent:         f64,
    /// Annual wage, AUD.
    pub median_wage:         f64,
    pub wage_growth:         f64,
    pub mortgage_rate:       f64,
    pub mortgage_term_years: f64,
    pub investor_share:      f64,
    #[serde(default)]
    pub amenity:             f64,
    #[serde(default)]
    pub rent_elasticities:   RentElasticities,
}

impl CityBaseline {
    pub fn rental_yield(&self) -> f64 {
        if self.median_price > 0.0 { self.median_rent / self.median_price } else { 0.0 }
    }

    /// Reject malformed baselines before any step runs.
    pub fn validate(&self) -> SimResult<()> {
        let invalid = |field: &'static str, reason: String| SimError::InvalidBaseline {
            city: self.id.clone(),
            field,
            reason,
        };
        if self.id.trim().is_empty() {
            return Err(invalid("id", "must not be empty".into()));
        }
        let numeric = [
            ("population", self.population),
            ("net_migration", self.net_migration),
            ("natural_growth_rate", self.natural_growth_rate),
            ("dwelling_stock", self.dwelling_stock),
            ("annual_completions", self.annual_completions),
            ("demolition_rate", self.demolition_rate),
            ("median_price", self.median_price),
            ("median_rent", self.median_rent),
            ("median_wage", self.median_wage),
            ("wage_growth", self.wage_growth),
            ("mortgage_rate", self.mortgage_rate),
            ("mortgage_term_years", self.mortgage_term_years),
            ("investor_share", self.investor_share),
            ("amenity", self.amenity),
            ("rent_elasticities.supply_gap", self.rent_elasticities.supply_gap),
            ("rent_elasticities.investor_exit", self.rent_elasticities.investor_exit),
            ("rent_elasticities.assistance_passthrough", self.rent_elasticities.assistance_passthrough),
        ];
        for (field, value) in numeric {
            ensure_finite(&format!("{}.{field}", self.id), value)?;
        }
        for (field, value) in [
            ("population", self.population),
            ("dwelling_stock", self.dwelling_stock),
            ("median_price", self.median_price),
            ("median_rent", self.median_rent),
            ("median_wage", self.median_wage),
            ("mortgage_term_years", self.mortgage_term_years),
        ] {
            if value <= 0.0 {
                return Err(invalid(field, format!("must be > 0 (got {value})")));
            }
        }
        if self.annual_completions < 0.0 {
            return Err(invalid("annual_completions", "must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&self.investor_share) {
            return Err(invalid("investor_share", format!("must be in [0, 1] (got {})", self.investor_share)));
        }
        if !(0.0..=0.10).contains(&self.demolition_rate) {
            return Err(invalid("demolition_rate", format!("must be in [0, 0.10] (got {})", self.demolition_rate)));
        }
        if !(-0.05..=0.25).contains(&self.mortgage_rate) {
            return Err(invalid("mortgage_rate", format!("implausible rate {}", self.mortgage_rate)));
        }
        Ok(())
    }
}

/// Reject an empty or inconsistent city set.
pub fn validate_cities(cities: &[CityBaseline]) -> SimResult<()> {
    if cities.is_empty() {
        return Err(SimError::NoCities);
    }
    let mut seen = BTreeSet::new();
    for city in cities {
        if !seen.insert(city.id.as_str()) {
            return Err(SimError::DuplicateCity { city: city.id.clone() });
        }
        city.validate()?;
    }
    Ok(())
}

// ── Files ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct BaselinesFile {
    cities: Vec<CityBaseline>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct YearRange {
    pub start: Year,
    pub end:   Year,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RunFile {
    horizon_years: Option<u32>,
    seed:          Option<u64>,
    history_years: Option<YearRange>,
}

// ── Aggregate config ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub cities:         Vec<CityBaseline>,
    pub levers:         PolicyLevers,
    pub methodology:    MethodologyParams,
    pub advanced:       AdvancedConfig,
    pub microdata:      MicrodataConfig,
    pub raw_history:    Option<RawHistory>,
    pub raw_microdata:  Option<RawMicrodata>,
    /// Used when no raw history is supplied but a history is requested.
    pub history_profile: Option<MacroGrowthProfile>,
    /// Year range for the history bundle. Inferred from the raw series if unset.
    pub history_years:  Option<YearRange>,
    pub horizon_years:  u32,
    pub seed:           u64,
}

impl SimConfig {
    /// Load from the data/ directory. Only `cities/baselines.json` is
    /// required; every other file overlays the defaults when present.
    /// In tests, use SimConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let dir = Path::new(data_dir);
        let baselines: BaselinesFile = read_json(&dir.join("cities/baselines.json"))?;

        let overrides: PolicyOverrides =
            read_optional_json(&dir.join("policy/levers.json"))?.unwrap_or_default();
        let levers = PolicyLevers::default().overlay(&overrides);

        let methodology: MethodologyParams =
            read_optional_json(&dir.join("methodology/params.json"))?.unwrap_or_default();
        let advanced: AdvancedConfig =
            read_optional_json(&dir.join("advanced/advanced.json"))?.unwrap_or_default();
        let microdata: MicrodataConfig =
            read_optional_json(&dir.join("microdata/config.json"))?.unwrap_or_default();
        let raw_history: Option<RawHistory> =
            read_optional_json(&dir.join("history/raw_history.json"))?;
        let raw_microdata: Option<RawMicrodata> =
            read_optional_json(&dir.join("microdata/raw_microdata.json"))?;
        let history_profile: Option<MacroGrowthProfile> =
            read_optional_json(&dir.join("history/profile.json"))?;
        let run: RunFile = read_optional_json(&dir.join("run.json"))?.unwrap_or_default();

        log::info!(
            "loaded {} cities from {data_dir} (history: {}, microdata: {})",
            baselines.cities.len(),
            raw_history.is_some(),
            raw_microdata.is_some(),
        );

        Ok(Self {
            cities: baselines.cities,
            levers,
            methodology,
            advanced,
            microdata,
            raw_history,
            raw_microdata,
            history_profile,
            history_years: run.history_years,
            horizon_years: run.horizon_years.unwrap_or(10),
            seed: run.seed.unwrap_or(42),
        })
    }

    /// Reject configuration errors before any simulation step runs.
    pub fn validate(&self) -> SimResult<()> {
        validate_cities(&self.cities)?;
        self.methodology.validate()?;
        self.advanced.validate()?;
        self.microdata.validate()?;
        if self.horizon_years == 0 {
            return Err(SimError::InvalidHorizon { reason: "horizon must be at least 1 year".into() });
        }
        if self.horizon_years > 100 {
            return Err(SimError::InvalidHorizon {
                reason: format!("horizon {} exceeds 100 years", self.horizon_years),
            });
        }
        if let Some(range) = self.history_years {
            if range.start > range.end {
                return Err(SimError::InvalidHorizon {
                    reason: format!("history start {} after end {}", range.start, range.end),
                });
            }
        }
        Ok(())
    }

    pub fn city(&self, id: &str) -> Option<&CityBaseline> {
        self.cities.iter().find(|c| c.id == id)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            cities:          test_cities(),
            levers:          PolicyLevers::default(),
            methodology:     MethodologyParams::default(),
            advanced:        AdvancedConfig::default(),
            microdata:       MicrodataConfig::default(),
            raw_history:     None,
            raw_microdata:   None,
            history_profile: None,
            history_years:   None,
            horizon_years:   10,
            seed:            42,
        }
    }
}

/// Three representative capital cities at a 2024 base year.
pub fn test_cities() -> Vec<CityBaseline> {
    vec![
        CityBaseline {
            id: "syd".into(),
            name: "Sydney".into(),
            state: "NSW".into(),
            base_year: 2024,
            population: 5_450_000.0,
            net_migration: 85_000.0,
            natural_growth_rate: 0.006,
            dwelling_stock: 2_100_000.0,
            annual_completions: 30_000.0,
            demolition_rate: 0.002,
            median_price: 1_150_000.0,
            median_rent: 39_000.0,
            median_wage: 98_000.0,
            wage_growth: 0.035,
            mortgage_rate: 0.062,
            mortgage_term_years: 30.0,
            investor_share: 0.31,
            amenity: 0.4,
            rent_elasticities: RentElasticities::default(),
        },
        CityBaseline {
            id: "mel".into(),
            name: "Melbourne".into(),
            state: "VIC".into(),
            base_year: 2024,
            population: 5_250_000.0,
            net_migration: 95_000.0,
            natural_growth_rate: 0.006,
            dwelling_stock: 2_150_000.0,
            annual_completions: 42_000.0,
            demolition_rate: 0.002,
            median_price: 780_000.0,
            median_rent: 29_000.0,
            median_wage: 92_000.0,
            wage_growth: 0.034,
            mortgage_rate: 0.062,
            mortgage_term_years: 30.0,
            investor_share: 0.29,
            amenity: 0.3,
            rent_elasticities: RentElasticities::default(),
        },
        CityBaseline {
            id: "bne".into(),
            name: "Brisbane".into(),
            state: "QLD".into(),
            base_year: 2024,
            population: 2_750_000.0,
            net_migration: 55_000.0,
            natural_growth_rate: 0.007,
            dwelling_stock: 1_080_000.0,
            annual_completions: 18_000.0,
            demolition_rate: 0.002,
            median_price: 850_000.0,
            median_rent: 31_000.0,
            median_wage: 88_000.0,
            wage_growth: 0.036,
            mortgage_rate: 0.062,
            mortgage_term_years: 30.0,
            investor_share: 0.27,
            amenity: 0.2,
            rent_elasticities: RentElasticities::default(),
        },
    ]
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Cannot parse {}: {e}", path.display()))
}

fn read_optional_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}
