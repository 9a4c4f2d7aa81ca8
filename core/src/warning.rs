//! Data-quality warnings attached to engine results.
//!
//! RULE: Warnings are additive and never block a result.
//! Every warning names the subsystem that raised it so callers can
//! render it without interpreting engine internals.

use crate::types::CityId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WarningSource {
    History,
    Calibration,
    Microdata,
    Policy,
    Engine,
}

impl WarningSource {
    pub fn name(&self) -> &'static str {
        match self {
            Self::History     => "history",
            Self::Calibration => "calibration",
            Self::Microdata   => "microdata",
            Self::Policy      => "policy",
            Self::Engine      => "engine",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Warning {
    pub source:  WarningSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city:    Option<CityId>,
    pub message: String,
}

impl Warning {
    pub fn new(source: WarningSource, message: impl Into<String>) -> Self {
        Self { source, city: None, message: message.into() }
    }

    pub fn for_city(source: WarningSource, city: &str, message: impl Into<String>) -> Self {
        Self { source, city: Some(city.to_string()), message: message.into() }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.city {
            Some(city) => write!(f, "[{}] {}: {}", self.source.name(), city, self.message),
            None       => write!(f, "[{}] {}", self.source.name(), self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_source_and_city() {
        let w = Warning::for_city(WarningSource::History, "syd", "rent fully imputed");
        assert_eq!(w.to_string(), "[history] syd: rent fully imputed");

        let w = Warning::new(WarningSource::Calibration, "no eligible cities");
        assert_eq!(w.to_string(), "[calibration] no eligible cities");
    }
}
