use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Occupant recorded when a sensor reports a car in a slot the allocator never
/// assigned. The plate is unknown until staff reconcile it.
pub const UNIDENTIFIED_OCCUPANT: &str = "UNIDENTIFIED";

/// Partition of the facility by vehicle class.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "varchar")]
pub enum Zone {
    /// Heavy vehicles.
    A,
    /// Light vehicles.
    B,
    /// Motorcycles.
    C,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::A, Zone::B, Zone::C];

    pub fn as_str(self) -> &'static str {
        match self {
            Zone::A => "A",
            Zone::B => "B",
            Zone::C => "C",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
pub enum SlotStatus {
    Available,
    Occupied,
    Reserved,
}

impl SlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotStatus::Available => "AVAILABLE",
            SlotStatus::Occupied => "OCCUPIED",
            SlotStatus::Reserved => "RESERVED",
        }
    }
}

/// Internal slot state. The occupant lives inside the `Occupied` variant so a
/// plate can never be attached to a free or reserved slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Available,
    Occupied { plate: String },
    Reserved,
}

impl SlotState {
    pub fn status(&self) -> SlotStatus {
        match self {
            SlotState::Available => SlotStatus::Available,
            SlotState::Occupied { .. } => SlotStatus::Occupied,
            SlotState::Reserved => SlotStatus::Reserved,
        }
    }

    pub fn occupant(&self) -> Option<&str> {
        match self {
            SlotState::Occupied { plate } => Some(plate.as_str()),
            _ => None,
        }
    }

    /// Rebuild from the flattened (status, occupant) pair used on the wire and
    /// in storage. Returns `None` when the pair breaks the occupancy invariant.
    pub fn from_parts(status: SlotStatus, occupant: Option<String>) -> Option<Self> {
        match (status, occupant) {
            (SlotStatus::Available, None) => Some(SlotState::Available),
            (SlotStatus::Reserved, None) => Some(SlotState::Reserved),
            (SlotStatus::Occupied, Some(plate)) => Some(SlotState::Occupied { plate }),
            _ => None,
        }
    }
}

/// Exported view of one parking slot (parking-map view, persistence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkingSlot {
    pub id: Uuid,
    pub number: u32,
    pub label: String,
    pub zone: Zone,
    pub status: SlotStatus,
    pub occupant: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ParkingSlot {
    pub fn state(&self) -> Option<SlotState> {
        SlotState::from_parts(self.status, self.occupant.clone())
    }
}

/// Display label for a slot, e.g. `A-07`.
pub fn slot_label(zone: Zone, number: u32) -> String {
    format!("{}-{:02}", zone.as_str(), number)
}

/// Static facility layout: how many slots each zone has. Slots are numbered
/// consecutively from 1 in zone order A, B, C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityLayout {
    pub zone_a: u32,
    pub zone_b: u32,
    pub zone_c: u32,
}

impl Default for FacilityLayout {
    fn default() -> Self {
        Self {
            zone_a: 10,
            zone_b: 20,
            zone_c: 10,
        }
    }
}

impl FacilityLayout {
    pub fn count(&self, zone: Zone) -> u32 {
        match zone {
            Zone::A => self.zone_a,
            Zone::B => self.zone_b,
            Zone::C => self.zone_c,
        }
    }

    pub fn total(&self) -> u32 {
        self.zone_a + self.zone_b + self.zone_c
    }

    /// Expand the layout into (number, zone) pairs in ascending number order.
    pub fn numbered(&self) -> Vec<(u32, Zone)> {
        let mut out = Vec::with_capacity(self.total() as usize);
        let mut next = 1;
        for zone in Zone::ALL {
            for _ in 0..self.count(zone) {
                out.push((next, zone));
                next += 1;
            }
        }
        out
    }

    /// Every slot of the layout, AVAILABLE, with new ids.
    pub fn fresh_slots(&self, now: DateTime<Utc>) -> Vec<ParkingSlot> {
        self.numbered()
            .into_iter()
            .map(|(number, zone)| ParkingSlot {
                id: Uuid::new_v4(),
                number,
                label: slot_label(zone, number),
                zone,
                status: SlotStatus::Available,
                occupant: None,
                updated_at: now,
            })
            .collect()
    }
}

/// Per-zone occupancy counts for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSummary {
    pub zone: Option<Zone>,
    pub available: u32,
    pub occupied: u32,
    pub reserved: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_numbering_is_consecutive_by_zone() {
        let layout = FacilityLayout {
            zone_a: 2,
            zone_b: 1,
            zone_c: 2,
        };
        let numbered = layout.numbered();
        assert_eq!(
            numbered,
            vec![(1, Zone::A), (2, Zone::A), (3, Zone::B), (4, Zone::C), (5, Zone::C)]
        );
        assert_eq!(layout.total(), 5);
    }

    #[test]
    fn test_state_from_parts_rejects_broken_pairs() {
        assert_eq!(
            SlotState::from_parts(SlotStatus::Occupied, Some("KA-01".into())),
            Some(SlotState::Occupied {
                plate: "KA-01".into()
            })
        );
        assert_eq!(SlotState::from_parts(SlotStatus::Occupied, None), None);
        assert_eq!(
            SlotState::from_parts(SlotStatus::Available, Some("KA-01".into())),
            None
        );
        assert_eq!(
            SlotState::from_parts(SlotStatus::Reserved, None),
            Some(SlotState::Reserved)
        );
    }

    #[test]
    fn test_slot_label() {
        assert_eq!(slot_label(Zone::A, 7), "A-07");
        assert_eq!(slot_label(Zone::C, 112), "C-112");
    }
}
