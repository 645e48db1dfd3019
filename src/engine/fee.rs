//! Entry fee schedule.
//!
//! Pure and total: every (category, visit type) pair maps to an amount in
//! facility currency units. Unknown categories were already folded into the
//! lowest tier by [`VehicleCategory::parse`].

use rust_decimal::Decimal;

use crate::models::vehicle::{VehicleCategory, VisitType};

/// Base fee for a visitor of the given category.
pub fn base_fee(category: VehicleCategory) -> Decimal {
    match category {
        VehicleCategory::Truck => Decimal::from(10_000),
        VehicleCategory::Van => Decimal::from(5_000),
        VehicleCategory::Car => Decimal::from(3_000),
        VehicleCategory::Bike | VehicleCategory::Other => Decimal::from(1_000),
    }
}

/// Fee charged at the gate. Pass holders pay nothing; staff check the pass.
pub fn entry_fee(category: VehicleCategory, visit: VisitType) -> Decimal {
    match visit {
        VisitType::Regular => Decimal::ZERO,
        VisitType::Visitor => base_fee(category),
    }
}
