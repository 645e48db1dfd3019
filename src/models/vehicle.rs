use serde::{Deserialize, Serialize};

use super::slot::Zone;

/// Vehicle class declared at the gate. Drives both the entry fee tier and the
/// preferred parking zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
pub enum VehicleCategory {
    Truck,
    Van,
    Car,
    Bike,
    Other,
}

impl VehicleCategory {
    /// Lenient parse used for operator input: anything unrecognised lands in
    /// the lowest tier instead of rejecting a vehicle that is already at the gate.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TRUCK" => Self::Truck,
            "VAN" => Self::Van,
            "CAR" => Self::Car,
            "BIKE" | "MOTORCYCLE" | "MOTORBIKE" => Self::Bike,
            _ => Self::Other,
        }
    }

    pub fn preferred_zone(self) -> Zone {
        match self {
            Self::Truck => Zone::A,
            Self::Bike => Zone::C,
            Self::Van | Self::Car | Self::Other => Zone::B,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Truck => "TRUCK",
            Self::Van => "VAN",
            Self::Car => "CAR",
            Self::Bike => "BIKE",
            Self::Other => "OTHER",
        }
    }
}

/// Why the vehicle is here. Pass holders (`Regular`) ride free; their pass is
/// checked by staff, not by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VisitType {
    Visitor,
    Regular,
}

impl VisitType {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("regular") {
            Self::Regular
        } else {
            Self::Visitor
        }
    }
}
