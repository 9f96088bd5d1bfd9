use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::models::trip::{Budget, BudgetOverflow};

pub const CONTENT_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Flights,
    Hotel,
    Car,
    Activities,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlightSelection {
    pub id: String,
    pub airline: String,
    pub flight_number: String,
    pub from: String,
    pub to: String,
    pub departs_at: Option<DateTime<Utc>>,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HotelSelection {
    pub id: String,
    pub name: String,
    pub nights: u32,
    pub nightly_rate_cents: i64,
}

impl HotelSelection {
    /// `None` when the product does not fit in cents.
    pub fn total_cents(&self) -> Option<i64> {
        self.nightly_rate_cents.checked_mul(i64::from(self.nights))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarRentalSelection {
    pub id: String,
    pub company: String,
    pub model: String,
    pub days: u32,
    pub daily_rate_cents: i64,
}

impl CarRentalSelection {
    pub fn total_cents(&self) -> Option<i64> {
        self.daily_rate_cents.checked_mul(i64::from(self.days))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivitySelection {
    pub id: String,
    pub name: String,
    pub date: Option<NaiveDate>,
    pub price_cents: i64,
}

/// Wizard state carried inside a draft's `content`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TripPackage {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub travelers: u32,
    pub services: Vec<ServiceKind>,
    pub flights: Vec<FlightSelection>,
    pub hotel: Option<HotelSelection>,
    pub car_rental: Option<CarRentalSelection>,
    pub activities: Vec<ActivitySelection>,
}

impl TripPackage {
    pub fn selection_count(&self) -> usize {
        self.flights.len()
            + usize::from(self.hotel.is_some())
            + usize::from(self.car_rental.is_some())
            + self.activities.len()
    }

    pub fn budget(&self) -> Result<Budget, BudgetOverflow> {
        let flights = checked_sum(self.flights.iter().map(|flight| flight.price_cents))?;
        let hotel = match &self.hotel {
            Some(hotel) => hotel.total_cents().ok_or(BudgetOverflow)?,
            None => 0,
        };
        let car_rental = match &self.car_rental {
            Some(car) => car.total_cents().ok_or(BudgetOverflow)?,
            None => 0,
        };
        let activities = checked_sum(self.activities.iter().map(|activity| activity.price_cents))?;
        Budget::from_parts(flights, hotel, car_rental, activities)
    }

    /// Names of whatever still blocks completion; empty when the package can
    /// become a trip.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if blank(self.origin.as_deref()) {
            missing.push("origin");
        }
        if blank(self.destination.as_deref()) {
            missing.push("destination");
        }
        if self.start_date.is_none() {
            missing.push("start_date");
        }
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if end < start => missing.push("end_date"),
            (_, None) => missing.push("end_date"),
            _ => {}
        }
        for service in &self.services {
            let selected = match service {
                ServiceKind::Flights => !self.flights.is_empty(),
                ServiceKind::Hotel => self.hotel.is_some(),
                ServiceKind::Car => self.car_rental.is_some(),
                ServiceKind::Activities => !self.activities.is_empty(),
            };
            if !selected {
                missing.push(match service {
                    ServiceKind::Flights => "flights",
                    ServiceKind::Hotel => "hotel",
                    ServiceKind::Car => "car_rental",
                    ServiceKind::Activities => "activities",
                });
            }
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

fn checked_sum(amounts: impl IntoIterator<Item = i64>) -> Result<i64, BudgetOverflow> {
    amounts
        .into_iter()
        .try_fold(0i64, |total, amount| total.checked_add(amount))
        .ok_or(BudgetOverflow)
}

fn blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content version {0} is newer than supported version {CONTENT_VERSION}")]
    UnsupportedVersion(u64),
    #[error("no migration from content version {0}")]
    MissingMigration(u64),
    #[error(transparent)]
    Malformed(#[from] serde_json::Error),
}

type Migration = fn(Value) -> Value;

/// Keyed by the version a blob is migrated *from*.
const MIGRATIONS: &[(u64, Migration)] = &[(0, wrap_legacy_state)];

const LEGACY_RENAMES: [(&str, &str); 3] = [
    ("startDate", "start_date"),
    ("endDate", "end_date"),
    ("carRental", "car_rental"),
];

pub fn encode(package: &TripPackage) -> Value {
    json!({ "version": CONTENT_VERSION, "state": package })
}

pub fn decode(content: Value) -> Result<TripPackage, ContentError> {
    let mut migrated = migrate(content)?;
    match migrated.get_mut("state").map(Value::take) {
        None | Some(Value::Null) => Ok(TripPackage::default()),
        Some(state) => Ok(serde_json::from_value(state)?),
    }
}

fn content_version(content: &Value) -> u64 {
    content.get("version").and_then(Value::as_u64).unwrap_or(0)
}

pub fn migrate(mut content: Value) -> Result<Value, ContentError> {
    loop {
        let version = content_version(&content);
        if version == CONTENT_VERSION {
            return Ok(content);
        }
        if version > CONTENT_VERSION {
            return Err(ContentError::UnsupportedVersion(version));
        }
        let (_, step) = MIGRATIONS
            .iter()
            .find(|(from, _)| *from == version)
            .ok_or(ContentError::MissingMigration(version))?;
        content = step(content);
    }
}

/// Version 0 was the bare camelCase wizard object.
fn wrap_legacy_state(content: Value) -> Value {
    let mut state = match content {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (old, new) in LEGACY_RENAMES {
        if let Some(value) = state.remove(old) {
            state.insert(new.to_string(), value);
        }
    }
    json!({ "version": 1, "state": Value::Object(state) })
}
