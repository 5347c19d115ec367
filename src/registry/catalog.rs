//! Tolerant parsing of the reference beacon catalog document
//!
//! The catalog is a JSON object with an `items` array. Each entry is decoded on
//! its own so a malformed entry only drops that entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{CatalogLoadError, CatalogParseError};
use crate::core::ReferenceBeacon;

/// Wire form of one catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: i64,
    pub longitude: f64,
    pub latitude: f64,
    pub number_on_floor: i64,
    #[serde(default)]
    pub beacon_uid: Option<String>,
    pub floor_id: i64,
    #[serde(default)]
    pub building_short_name: Option<String>,
    pub room_placed: bool,
    pub near_floor_change: bool,
    pub tx_power_to_set: i64,
}

impl CatalogEntry {
    /// Convert to the registry form. A blank UID becomes `None`; the building
    /// name is kept as written so entries round-trip unchanged.
    pub fn into_reference(self) -> ReferenceBeacon {
        ReferenceBeacon {
            id: self.id,
            uid: non_blank(self.beacon_uid),
            latitude: self.latitude,
            longitude: self.longitude,
            floor_id: self.floor_id,
            number_on_floor: self.number_on_floor,
            building_short_name: self.building_short_name,
            room_placed: self.room_placed,
            near_floor_change: self.near_floor_change,
            tx_power_to_set: self.tx_power_to_set,
        }
    }
}

impl From<&ReferenceBeacon> for CatalogEntry {
    fn from(beacon: &ReferenceBeacon) -> Self {
        Self {
            id: beacon.id,
            longitude: beacon.longitude,
            latitude: beacon.latitude,
            number_on_floor: beacon.number_on_floor,
            beacon_uid: beacon.uid.clone(),
            floor_id: beacon.floor_id,
            building_short_name: beacon.building_short_name.clone(),
            room_placed: beacon.room_placed,
            near_floor_change: beacon.near_floor_change,
            tx_power_to_set: beacon.tx_power_to_set,
        }
    }
}

/// Whole catalog document, used when writing catalogs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub items: Vec<CatalogEntry>,
}

/// Result of decoding every entry of a catalog document
#[derive(Debug, Default)]
pub struct ParsedCatalog {
    /// Usable beacons in document order
    pub beacons: Vec<ReferenceBeacon>,
    /// Entries that were skipped
    pub skipped: Vec<CatalogParseError>,
}

/// Decode the `items` array of a catalog document
pub fn parse_document(document: &Value) -> Result<ParsedCatalog, CatalogLoadError> {
    let items = document
        .get("items")
        .and_then(Value::as_array)
        .ok_or(CatalogLoadError::MissingItems)?;

    let mut parsed = ParsedCatalog::default();
    for (index, item) in items.iter().enumerate() {
        match parse_entry(index, item) {
            Ok(beacon) => parsed.beacons.push(beacon),
            Err(err) => parsed.skipped.push(err),
        }
    }

    Ok(parsed)
}

/// Decode a single entry; entries without a usable UID are rejected
pub fn parse_entry(index: usize, item: &Value) -> Result<ReferenceBeacon, CatalogParseError> {
    let entry = CatalogEntry::deserialize(item).map_err(|e| CatalogParseError::InvalidEntry {
        index,
        reason: e.to_string(),
    })?;

    if !entry.latitude.is_finite() || !entry.longitude.is_finite() {
        return Err(CatalogParseError::InvalidEntry {
            index,
            reason: format!("non-finite coordinates ({}, {})", entry.latitude, entry.longitude),
        });
    }

    let beacon = entry.into_reference();
    if beacon.uid.is_none() {
        return Err(CatalogParseError::MissingUid { index, id: beacon.id });
    }

    Ok(beacon)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry_json(uid: Value) -> Value {
        json!({
            "id": 7,
            "longitude": 21.0117,
            "latitude": 52.2297,
            "numberOnFloor": 3,
            "beaconUid": uid,
            "floorId": 2,
            "buildingShortName": "GG",
            "roomPlaced": true,
            "nearFloorChange": false,
            "txPowerToSet": -12
        })
    }

    #[test]
    fn test_parse_valid_entry() {
        let beacon = parse_entry(0, &entry_json(json!("AA:BB:CC:DD:EE:01"))).unwrap();
        assert_eq!(beacon.uid.as_deref(), Some("AA:BB:CC:DD:EE:01"));
        assert_eq!(beacon.floor_id, 2);
        assert_eq!(beacon.tx_power_to_set, -12);
        assert_eq!(beacon.building_short_name.as_deref(), Some("GG"));
    }

    #[test]
    fn test_missing_or_blank_uid_rejected() {
        for uid in [json!(null), json!(""), json!("   ")] {
            let err = parse_entry(4, &entry_json(uid)).unwrap_err();
            assert_eq!(err, CatalogParseError::MissingUid { index: 4, id: 7 });
        }

        let mut without_key = entry_json(json!("x"));
        without_key.as_object_mut().unwrap().remove("beaconUid");
        assert!(matches!(
            parse_entry(1, &without_key),
            Err(CatalogParseError::MissingUid { .. })
        ));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let mut entry = entry_json(json!("uid-1"));
        entry["floorId"] = json!("second");
        let err = parse_entry(2, &entry).unwrap_err();
        assert_eq!(err.index(), 2);
        assert!(matches!(err, CatalogParseError::InvalidEntry { .. }));
    }

    #[test]
    fn test_empty_building_name_round_trips() {
        let mut entry = entry_json(json!("uid-1"));
        entry["buildingShortName"] = json!("");
        let beacon = parse_entry(0, &entry).unwrap();
        assert_eq!(beacon.building_short_name.as_deref(), Some(""));

        let written = serde_json::to_value(CatalogEntry::from(&beacon)).unwrap();
        assert_eq!(parse_entry(0, &written).unwrap(), beacon);
    }

    #[test]
    fn test_document_without_items() {
        let result = parse_document(&json!({ "beacons": [] }));
        assert!(matches!(result, Err(CatalogLoadError::MissingItems)));
    }

    #[test]
    fn test_document_skips_bad_entries() {
        let document = json!({
            "items": [entry_json(json!("uid-1")), 42, entry_json(json!(null))]
        });
        let parsed = parse_document(&document).unwrap();
        assert_eq!(parsed.beacons.len(), 1);
        assert_eq!(parsed.skipped.len(), 2);
        assert_eq!(parsed.skipped[0].index(), 1);
        assert_eq!(parsed.skipped[1].index(), 2);
    }
}
