//! Record codec: the one place raw repository maps are read or written.
//!
//! Every collection gets a [`FromRecord`] and [`ToRecord`] impl. Reference
//! fields are written as full locators, which callers build beforehand; the
//! codec never invents an owner identity.

use serde_json::{Map, Value, json};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::domain::entities::{Bean, Brew, Brewer, Grinder, Pour, Roaster};
use crate::domain::types::Collection;
use crate::infra::atproto::uri::{self, LocatorError};

/// A repository record: a string-keyed map of JSON values.
pub type Record = Map<String, Value>;

pub const TYPE_FIELD: &str = "$type";
pub const CREATED_AT_FIELD: &str = "createdAt";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{collection} record is missing required field `{field}`")]
    MissingRequiredField {
        collection: Collection,
        field: &'static str,
    },
    #[error("invalid createdAt timestamp `{value}`")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: time::error::Parse,
    },
    #[error("failed to format timestamp")]
    TimestampFormat(#[from] time::error::Format),
    #[error("{collection} record has invalid `{field}`: {reason}")]
    InvalidField {
        collection: Collection,
        field: &'static str,
        reason: String,
    },
    #[error(transparent)]
    Locator(#[from] LocatorError),
}

/// Decode a typed entity from a record and the locator it was stored under.
pub trait FromRecord: Sized {
    const COLLECTION: Collection;

    /// `locator` may be empty when the record has not been stored yet.
    fn from_record(record: &Record, locator: &str) -> Result<Self, CodecError>;
}

/// Encode an entity given locators for the records it references.
pub trait ToRecord {
    type Refs;

    fn to_record(&self, refs: &Self::Refs) -> Result<Record, CodecError>;
}

/// Reference locators carried by a brew record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrewRefs {
    pub bean: String,
    pub grinder: Option<String>,
    pub brewer: Option<String>,
}

/// Reference locators carried by a bean record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeanRefs {
    pub roaster: Option<String>,
}

/// Read the reference fields of a brew record without decoding the rest.
pub fn brew_refs(record: &Record) -> BrewRefs {
    BrewRefs {
        bean: opt_str(record, "beanRef").unwrap_or_default(),
        grinder: opt_str(record, "grinderRef"),
        brewer: opt_str(record, "brewerRef"),
    }
}

pub fn bean_refs(record: &Record) -> BeanRefs {
    BeanRefs {
        roaster: opt_str(record, "roasterRef"),
    }
}

/// The stored creation time of any arabica record.
pub fn created_at(record: &Record, collection: Collection) -> Result<OffsetDateTime, CodecError> {
    let raw = record
        .get(CREATED_AT_FIELD)
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingRequiredField {
            collection,
            field: CREATED_AT_FIELD,
        })?;
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|source| CodecError::InvalidTimestamp {
        value: raw.to_string(),
        source,
    })
}

/// Temperatures are stored as integer tenths of a degree.
pub fn encode_temperature(temperature: f64) -> Option<i64> {
    let tenths = (temperature * 10.0).round();
    (tenths.is_finite() && tenths > 0.0).then_some(tenths as i64)
}

pub fn decode_temperature(tenths: f64) -> Option<f64> {
    (tenths.is_finite() && tenths > 0.0).then_some(tenths / 10.0)
}

fn rkey_of(locator: &str) -> Result<String, CodecError> {
    if locator.is_empty() {
        return Ok(String::new());
    }
    Ok(uri::resolve(locator)?.rkey)
}

fn header(collection: Collection, created_at: OffsetDateTime) -> Result<Record, CodecError> {
    let mut record = Record::new();
    record.insert(TYPE_FIELD.into(), Value::from(collection.nsid()));
    record.insert(
        CREATED_AT_FIELD.into(),
        Value::from(created_at.format(&Rfc3339)?),
    );
    Ok(record)
}

fn required_name(record: &Record, collection: Collection) -> Result<String, CodecError> {
    opt_str(record, "name").ok_or(CodecError::MissingRequiredField {
        collection,
        field: "name",
    })
}

fn opt_str(record: &Record, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn opt_u32(record: &Record, key: &str) -> Option<u32> {
    as_u32(record.get(key)?).filter(|n| *n > 0)
}

fn as_u32(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    let f = value.as_f64()?;
    (f.is_finite() && f >= 0.0 && f <= f64::from(u32::MAX)).then_some(f as u32)
}

fn put_str(record: &mut Record, key: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|s| !s.is_empty()) {
        record.insert(key.into(), Value::from(value));
    }
}

fn put_u32(record: &mut Record, key: &str, value: Option<u32>) {
    if let Some(value) = value.filter(|n| *n > 0) {
        record.insert(key.into(), Value::from(value));
    }
}

/// Resolve an optional reference to its record key, ignoring malformed values.
fn ref_rkey(record: &Record, key: &str) -> Option<String> {
    opt_str(record, key)
        .and_then(|locator| uri::resolve(&locator).ok())
        .map(|locator| locator.rkey)
        .filter(|rkey| !rkey.is_empty())
}

impl FromRecord for Roaster {
    const COLLECTION: Collection = Collection::Roasters;

    fn from_record(record: &Record, locator: &str) -> Result<Self, CodecError> {
        Ok(Self {
            rkey: rkey_of(locator)?,
            name: required_name(record, Self::COLLECTION)?,
            location: opt_str(record, "location"),
            website: opt_str(record, "website"),
            created_at: created_at(record, Self::COLLECTION)?,
        })
    }
}

impl ToRecord for Roaster {
    type Refs = ();

    fn to_record(&self, _refs: &()) -> Result<Record, CodecError> {
        let mut record = header(Collection::Roasters, self.created_at)?;
        record.insert("name".into(), Value::from(self.name.as_str()));
        put_str(&mut record, "location", self.location.as_deref());
        put_str(&mut record, "website", self.website.as_deref());
        Ok(record)
    }
}

impl FromRecord for Grinder {
    const COLLECTION: Collection = Collection::Grinders;

    fn from_record(record: &Record, locator: &str) -> Result<Self, CodecError> {
        Ok(Self {
            rkey: rkey_of(locator)?,
            name: required_name(record, Self::COLLECTION)?,
            grinder_type: opt_str(record, "grinderType"),
            burr_type: opt_str(record, "burrType"),
            notes: opt_str(record, "notes"),
            created_at: created_at(record, Self::COLLECTION)?,
        })
    }
}

impl ToRecord for Grinder {
    type Refs = ();

    fn to_record(&self, _refs: &()) -> Result<Record, CodecError> {
        let mut record = header(Collection::Grinders, self.created_at)?;
        record.insert("name".into(), Value::from(self.name.as_str()));
        put_str(&mut record, "grinderType", self.grinder_type.as_deref());
        put_str(&mut record, "burrType", self.burr_type.as_deref());
        put_str(&mut record, "notes", self.notes.as_deref());
        Ok(record)
    }
}

impl FromRecord for Brewer {
    const COLLECTION: Collection = Collection::Brewers;

    fn from_record(record: &Record, locator: &str) -> Result<Self, CodecError> {
        Ok(Self {
            rkey: rkey_of(locator)?,
            name: required_name(record, Self::COLLECTION)?,
            description: opt_str(record, "description"),
            created_at: created_at(record, Self::COLLECTION)?,
        })
    }
}

impl ToRecord for Brewer {
    type Refs = ();

    fn to_record(&self, _refs: &()) -> Result<Record, CodecError> {
        let mut record = header(Collection::Brewers, self.created_at)?;
        record.insert("name".into(), Value::from(self.name.as_str()));
        put_str(&mut record, "description", self.description.as_deref());
        Ok(record)
    }
}

impl FromRecord for Bean {
    const COLLECTION: Collection = Collection::Beans;

    fn from_record(record: &Record, locator: &str) -> Result<Self, CodecError> {
        Ok(Self {
            rkey: rkey_of(locator)?,
            name: required_name(record, Self::COLLECTION)?,
            origin: opt_str(record, "origin"),
            roast_level: opt_str(record, "roastLevel"),
            process: opt_str(record, "process"),
            description: opt_str(record, "description"),
            roaster_rkey: ref_rkey(record, "roasterRef"),
            created_at: created_at(record, Self::COLLECTION)?,
            roaster: None,
        })
    }
}

impl ToRecord for Bean {
    type Refs = BeanRefs;

    fn to_record(&self, refs: &BeanRefs) -> Result<Record, CodecError> {
        let mut record = header(Collection::Beans, self.created_at)?;
        record.insert("name".into(), Value::from(self.name.as_str()));
        put_str(&mut record, "origin", self.origin.as_deref());
        put_str(&mut record, "roastLevel", self.roast_level.as_deref());
        put_str(&mut record, "process", self.process.as_deref());
        put_str(&mut record, "description", self.description.as_deref());
        put_str(&mut record, "roasterRef", refs.roaster.as_deref());
        Ok(record)
    }
}

impl FromRecord for Brew {
    const COLLECTION: Collection = Collection::Brews;

    fn from_record(record: &Record, locator: &str) -> Result<Self, CodecError> {
        let bean_ref = opt_str(record, "beanRef").ok_or(CodecError::MissingRequiredField {
            collection: Self::COLLECTION,
            field: "beanRef",
        })?;
        let bean_rkey = uri::resolve(&bean_ref)?.rkey;

        let temperature = record
            .get("temperature")
            .and_then(Value::as_f64)
            .and_then(decode_temperature);

        Ok(Self {
            rkey: rkey_of(locator)?,
            bean_rkey,
            method: opt_str(record, "method"),
            temperature,
            water_amount: opt_u32(record, "waterAmount"),
            coffee_amount: opt_u32(record, "coffeeAmount"),
            time_seconds: opt_u32(record, "timeSeconds"),
            grind_size: opt_str(record, "grindSize"),
            grinder_rkey: ref_rkey(record, "grinderRef"),
            brewer_rkey: ref_rkey(record, "brewerRef"),
            tasting_notes: opt_str(record, "tastingNotes"),
            rating: opt_u32(record, "rating"),
            pours: decode_pours(record),
            created_at: created_at(record, Self::COLLECTION)?,
            bean: None,
            grinder: None,
            brewer: None,
        })
    }
}

/// Pours are numbered by array position; non-object entries are skipped.
fn decode_pours(record: &Record) -> Vec<Pour> {
    let Some(items) = record.get("pours").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let pour = item.as_object()?;
            Some(Pour {
                pour_number: u32::try_from(index + 1).unwrap_or(u32::MAX),
                water_amount: pour.get("waterAmount").and_then(as_u32).unwrap_or(0),
                time_seconds: pour.get("timeSeconds").and_then(as_u32).unwrap_or(0),
            })
        })
        .collect()
}

impl ToRecord for Brew {
    type Refs = BrewRefs;

    fn to_record(&self, refs: &BrewRefs) -> Result<Record, CodecError> {
        if refs.bean.is_empty() {
            return Err(CodecError::MissingRequiredField {
                collection: Collection::Brews,
                field: "beanRef",
            });
        }

        let mut record = header(Collection::Brews, self.created_at)?;
        record.insert("beanRef".into(), Value::from(refs.bean.as_str()));
        put_str(&mut record, "method", self.method.as_deref());
        if let Some(tenths) = self.temperature.and_then(encode_temperature) {
            record.insert("temperature".into(), Value::from(tenths));
        }
        put_u32(&mut record, "waterAmount", self.water_amount);
        put_u32(&mut record, "coffeeAmount", self.coffee_amount);
        put_u32(&mut record, "timeSeconds", self.time_seconds);
        put_str(&mut record, "grindSize", self.grind_size.as_deref());
        put_str(&mut record, "grinderRef", refs.grinder.as_deref());
        put_str(&mut record, "brewerRef", refs.brewer.as_deref());
        put_str(&mut record, "tastingNotes", self.tasting_notes.as_deref());
        put_u32(&mut record, "rating", self.rating);

        if !self.pours.is_empty() {
            let pours = self
                .pours
                .iter()
                .map(|pour| {
                    json!({
                        "waterAmount": pour.water_amount,
                        "timeSeconds": pour.time_seconds,
                    })
                })
                .collect();
            record.insert("pours".into(), Value::Array(pours));
        }

        Ok(record)
    }
}
