//! Domain entities as the application sees them once decoded from records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::error::DomainError;

const MAX_TEMPERATURE: f64 = 212.0;
const MAX_WATER_AMOUNT: u32 = 10_000;
const MAX_COFFEE_AMOUNT: u32 = 1_000;
const MAX_TIME_SECONDS: u32 = 3_600;
const MAX_RATING: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Roaster {
    pub rkey: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grinder {
    pub rkey: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grinder_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burr_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Brewer {
    pub rkey: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bean {
    pub rkey: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roast_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roaster_rkey: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Populated by reference resolution or linking, never persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roaster: Option<Roaster>,
}

/// One pour of a multi-pour brew. Numbered from 1 by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pour {
    pub pour_number: u32,
    pub water_amount: u32,
    pub time_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Brew {
    pub rkey: String,
    pub bean_rkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_amount: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coffee_amount: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grind_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grinder_rkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brewer_rkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasting_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pours: Vec<Pour>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bean: Option<Box<Bean>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grinder: Option<Grinder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brewer: Option<Brewer>,
}

impl Brew {
    /// Drop every resolved reference, keeping only persisted fields.
    pub fn detached(mut self) -> Self {
        self.bean = None;
        self.grinder = None;
        self.brewer = None;
        self
    }
}

impl Bean {
    pub fn detached(mut self) -> Self {
        self.roaster = None;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoasterParams {
    pub name: String,
    pub location: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GrinderParams {
    pub name: String,
    pub grinder_type: Option<String>,
    pub burr_type: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrewerParams {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BeanParams {
    pub name: String,
    pub origin: Option<String>,
    pub roast_level: Option<String>,
    pub process: Option<String>,
    pub description: Option<String>,
    pub roaster_rkey: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PourParams {
    pub water_amount: u32,
    pub time_seconds: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrewParams {
    pub bean_rkey: String,
    pub method: Option<String>,
    pub temperature: Option<f64>,
    pub water_amount: Option<u32>,
    pub coffee_amount: Option<u32>,
    pub time_seconds: Option<u32>,
    pub grind_size: Option<String>,
    pub grinder_rkey: Option<String>,
    pub brewer_rkey: Option<String>,
    pub tasting_notes: Option<String>,
    pub rating: Option<u32>,
    pub pours: Vec<PourParams>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}

fn non_zero(value: Option<u32>) -> Option<u32> {
    value.filter(|n| *n > 0)
}

impl Roaster {
    /// Build an unsaved roaster; the record key is assigned by the repository.
    pub fn from_params(params: &RoasterParams, created_at: OffsetDateTime) -> Self {
        Self {
            rkey: String::new(),
            name: params.name.trim().to_string(),
            location: non_empty(&params.location),
            website: non_empty(&params.website),
            created_at,
        }
    }
}

impl Grinder {
    pub fn from_params(params: &GrinderParams, created_at: OffsetDateTime) -> Self {
        Self {
            rkey: String::new(),
            name: params.name.trim().to_string(),
            grinder_type: non_empty(&params.grinder_type),
            burr_type: non_empty(&params.burr_type),
            notes: non_empty(&params.notes),
            created_at,
        }
    }
}

impl Brewer {
    pub fn from_params(params: &BrewerParams, created_at: OffsetDateTime) -> Self {
        Self {
            rkey: String::new(),
            name: params.name.trim().to_string(),
            description: non_empty(&params.description),
            created_at,
        }
    }
}

impl Bean {
    pub fn from_params(params: &BeanParams, created_at: OffsetDateTime) -> Self {
        Self {
            rkey: String::new(),
            name: params.name.trim().to_string(),
            origin: non_empty(&params.origin),
            roast_level: non_empty(&params.roast_level),
            process: non_empty(&params.process),
            description: non_empty(&params.description),
            roaster_rkey: non_empty(&params.roaster_rkey),
            created_at,
            roaster: None,
        }
    }
}

impl Brew {
    pub fn from_params(params: &BrewParams, created_at: OffsetDateTime) -> Self {
        let pours = params
            .pours
            .iter()
            .zip(1..)
            .map(|(pour, pour_number)| Pour {
                pour_number,
                water_amount: pour.water_amount,
                time_seconds: pour.time_seconds,
            })
            .collect();

        Self {
            rkey: String::new(),
            bean_rkey: params.bean_rkey.clone(),
            method: non_empty(&params.method),
            temperature: params.temperature.filter(|t| *t > 0.0),
            water_amount: non_zero(params.water_amount),
            coffee_amount: non_zero(params.coffee_amount),
            time_seconds: non_zero(params.time_seconds),
            grind_size: non_empty(&params.grind_size),
            grinder_rkey: non_empty(&params.grinder_rkey),
            brewer_rkey: non_empty(&params.brewer_rkey),
            tasting_notes: non_empty(&params.tasting_notes),
            rating: non_zero(params.rating),
            pours,
            created_at,
            bean: None,
            grinder: None,
            brewer: None,
        }
    }
}

fn require_name(name: &str) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name", "name must not be empty"));
    }
    Ok(())
}

fn check_upper(
    field: &'static str,
    value: Option<u32>,
    max: u32,
    unit: &str,
) -> Result<(), DomainError> {
    match value {
        Some(v) if v > max => Err(DomainError::validation(
            field,
            format!("must be between 0 and {max}{unit}"),
        )),
        _ => Ok(()),
    }
}

impl RoasterParams {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_name(&self.name)
    }
}

impl GrinderParams {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_name(&self.name)
    }
}

impl BrewerParams {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_name(&self.name)
    }
}

impl BeanParams {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_name(&self.name)
    }
}

impl BrewParams {
    /// Range checks applied before a brew is written.
    ///
    /// The bean reference is checked separately by the store so that a
    /// missing bean surfaces as a missing reference rather than a field error.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self
            .temperature
            .is_some_and(|t| !(0.0..=MAX_TEMPERATURE).contains(&t))
        {
            return Err(DomainError::validation(
                "temperature",
                format!("must be between 0 and {MAX_TEMPERATURE}"),
            ));
        }
        check_upper("water_amount", self.water_amount, MAX_WATER_AMOUNT, "ml")?;
        check_upper("coffee_amount", self.coffee_amount, MAX_COFFEE_AMOUNT, "g")?;
        check_upper("time_seconds", self.time_seconds, MAX_TIME_SECONDS, "s")?;
        check_upper("rating", self.rating, MAX_RATING, "")?;
        Ok(())
    }
}
