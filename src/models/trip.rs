use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::package::{
    ActivitySelection, CarRentalSelection, FlightSelection, HotelSelection, TripPackage,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    #[default]
    Progress,
    Ongoing,
    Completed,
    Cancelled,
}

/// Amounts in cents. `total` is a snapshot taken when the budget is built;
/// mutating a component does not update it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Budget {
    pub flights: i64,
    pub hotel: i64,
    pub car_rental: i64,
    pub activities: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("budget amount does not fit in 64-bit cents")]
pub struct BudgetOverflow;

impl Budget {
    pub fn from_parts(
        flights: i64,
        hotel: i64,
        car_rental: i64,
        activities: i64,
    ) -> Result<Self, BudgetOverflow> {
        let total = sum_parts(flights, hotel, car_rental, activities).ok_or(BudgetOverflow)?;
        Ok(Self {
            flights,
            hotel,
            car_rental,
            activities,
            total,
        })
    }

    pub fn is_consistent(&self) -> bool {
        sum_parts(self.flights, self.hotel, self.car_rental, self.activities) == Some(self.total)
    }

    pub fn recomputed(&self) -> Result<Self, BudgetOverflow> {
        Self::from_parts(self.flights, self.hotel, self.car_rental, self.activities)
    }
}

fn sum_parts(flights: i64, hotel: i64, car_rental: i64, activities: i64) -> Option<i64> {
    flights
        .checked_add(hotel)?
        .checked_add(car_rental)?
        .checked_add(activities)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedTrip {
    pub id: String,
    pub name: String,
    pub origin: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub status: TripStatus,
    pub hotel: Option<HotelSelection>,
    #[serde(default)]
    pub flights: Vec<FlightSelection>,
    pub car_rental: Option<CarRentalSelection>,
    #[serde(default)]
    pub activities: Vec<ActivitySelection>,
    pub budget: Budget,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("package is incomplete, missing: {}", .0.join(", "))]
    Incomplete(Vec<&'static str>),
    #[error(transparent)]
    Budget(#[from] BudgetOverflow),
}

impl CompletedTrip {
    pub fn from_package(name: impl Into<String>, package: &TripPackage) -> Result<Self, PromotionError> {
        let missing = package.missing();
        let (Some(origin), Some(destination), Some(start_date), Some(end_date), true) = (
            package.origin.clone(),
            package.destination.clone(),
            package.start_date,
            package.end_date,
            missing.is_empty(),
        ) else {
            return Err(PromotionError::Incomplete(missing));
        };

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            origin,
            destination,
            start_date,
            end_date,
            status: TripStatus::Progress,
            hotel: package.hotel.clone(),
            flights: package.flights.clone(),
            car_rental: package.car_rental.clone(),
            activities: package.activities.clone(),
            budget: package.budget()?,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_total_is_a_snapshot() {
        let mut budget = Budget::from_parts(100, 200, 0, 50).unwrap();
        assert_eq!(budget.total, 350);
        budget.hotel = 300;
        assert_eq!(budget.total, 350);
        assert!(!budget.is_consistent());
        assert_eq!(budget.recomputed().unwrap().total, 450);
    }

    #[test]
    fn incomplete_package_is_refused() {
        let package = TripPackage {
            origin: Some("BER".into()),
            ..Default::default()
        };
        let err = CompletedTrip::from_package("Paris", &package).unwrap_err();
        assert!(matches!(
            err,
            PromotionError::Incomplete(missing) if missing == vec!["destination", "start_date", "end_date"]
        ));
    }

    #[test]
    fn overflowing_budget_blocks_promotion() {
        let package = TripPackage {
            origin: Some("BER".into()),
            destination: Some("Paris".into()),
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 4),
            activities: vec![
                ActivitySelection {
                    id: "a1".into(),
                    name: "Louvre".into(),
                    date: None,
                    price_cents: i64::MAX,
                },
                ActivitySelection {
                    id: "a2".into(),
                    name: "Orsay".into(),
                    date: None,
                    price_cents: i64::MAX,
                },
            ],
            ..Default::default()
        };
        let err = CompletedTrip::from_package("Paris", &package).unwrap_err();
        assert!(matches!(err, PromotionError::Budget(BudgetOverflow)));
    }

    #[test]
    fn overflowing_parts_are_never_consistent() {
        let budget = Budget {
            flights: i64::MAX,
            hotel: 1,
            car_rental: 0,
            activities: 0,
            total: i64::MIN,
        };
        assert!(!budget.is_consistent());
        assert_eq!(budget.recomputed(), Err(BudgetOverflow));
    }
}
