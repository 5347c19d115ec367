//! Reference beacon registry
//!
//! Loads the catalog of known beacon placements once and indexes it by the
//! broadcast identifier the scanner reports. Loading never fails past this
//! boundary: an unreadable catalog yields an empty registry and the error is
//! carried in the [`LoadReport`].

pub mod catalog;
pub mod error;

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::ReferenceBeacon;
pub use catalog::{CatalogDocument, CatalogEntry};
pub use error::{CatalogLoadError, CatalogParseError};

/// Outcome of a catalog load
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Beacons indexed in the registry
    pub loaded: usize,
    /// Entries dropped during parsing
    pub skipped: Vec<CatalogParseError>,
    /// Entries whose UID replaced an earlier entry
    pub duplicates: usize,
    /// Set when the catalog as a whole could not be read
    pub load_error: Option<CatalogLoadError>,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.load_error.is_none()
    }
}

/// Known beacons indexed by broadcast identifier
#[derive(Debug, Clone, Default)]
pub struct BeaconRegistry {
    beacons: HashMap<String, ReferenceBeacon>,
}

impl BeaconRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from already-parsed beacons.
    ///
    /// Beacons without a UID are ignored. A later beacon with the same UID
    /// replaces the earlier one; the number of replacements is returned.
    pub fn from_beacons<I>(beacons: I) -> (Self, usize)
    where
        I: IntoIterator<Item = ReferenceBeacon>,
    {
        let mut map = HashMap::new();
        let mut duplicates = 0;

        for beacon in beacons {
            let Some(uid) = beacon.uid.clone() else {
                continue;
            };
            if let Some(previous) = map.insert(uid.clone(), beacon) {
                duplicates += 1;
                warn!(uid = %uid, replaced_id = previous.id, "Duplicate beacon UID in catalog, keeping last entry");
            }
        }

        (Self { beacons: map }, duplicates)
    }

    /// Load a catalog from a JSON string
    pub fn load_from_str(json: &str) -> (Self, LoadReport) {
        Self::finish_load(serde_json::from_str::<Value>(json).map_err(CatalogLoadError::from))
    }

    /// Load a catalog from any reader
    pub fn load_from_reader<R: Read>(reader: R) -> (Self, LoadReport) {
        Self::finish_load(read_document(reader, "<reader>"))
    }

    /// Load a catalog file, degrading to an empty registry on failure
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> (Self, LoadReport) {
        let path = path.as_ref();
        let document = open_catalog(path).and_then(|reader| read_document(reader, &path.to_string_lossy()));
        Self::finish_load(document)
    }

    /// Load a catalog file, returning the catalog-level error to the caller
    pub fn try_load_from_path<P: AsRef<Path>>(path: P) -> Result<(Self, LoadReport), CatalogLoadError> {
        let (registry, mut report) = Self::load_from_path(path);
        match report.load_error.take() {
            Some(err) => Err(err),
            None => Ok((registry, report)),
        }
    }

    /// Find the reference beacon for a scanned identifier
    pub fn lookup(&self, uid: &str) -> Option<&ReferenceBeacon> {
        self.beacons.get(uid)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.beacons.contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Iterate over all beacons in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = &ReferenceBeacon> {
        self.beacons.values()
    }

    /// Beacons placed on the given floor, sorted by their number on that floor
    pub fn by_floor(&self, floor_id: i64) -> Vec<&ReferenceBeacon> {
        let mut beacons: Vec<_> = self.beacons.values().filter(|b| b.floor_id == floor_id).collect();
        beacons.sort_by_key(|b| b.number_on_floor);
        beacons
    }

    /// Serialize the registry back into catalog form, ordered by id
    pub fn to_document(&self) -> CatalogDocument {
        let mut items: Vec<CatalogEntry> = self.beacons.values().map(CatalogEntry::from).collect();
        items.sort_by_key(|e| e.id);
        CatalogDocument { items }
    }

    fn finish_load(document: Result<Value, CatalogLoadError>) -> (Self, LoadReport) {
        let parsed = document.and_then(|value| catalog::parse_document(&value));

        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "Failed to load beacon catalog, positioning will not work");
                return (
                    Self::new(),
                    LoadReport {
                        load_error: Some(err),
                        ..LoadReport::default()
                    },
                );
            }
        };

        for skipped in &parsed.skipped {
            debug!(error = %skipped, "Skipping catalog entry");
        }

        let (registry, duplicates) = Self::from_beacons(parsed.beacons);
        let report = LoadReport {
            loaded: registry.len(),
            skipped: parsed.skipped,
            duplicates,
            load_error: None,
        };

        if registry.is_empty() {
            warn!("Beacon catalog contains no usable beacons, positioning will not work");
        } else {
            info!(
                loaded = report.loaded,
                skipped = report.skipped.len(),
                duplicates = report.duplicates,
                "Loaded reference beacons"
            );
        }

        (registry, report)
    }
}

/// Decode the whole document; a failing reader is an I/O error, not a format error
fn read_document<R: Read>(reader: R, source_name: &str) -> Result<Value, CatalogLoadError> {
    serde_json::from_reader::<_, Value>(reader).map_err(|e| {
        if e.is_io() {
            CatalogLoadError::Io {
                path: source_name.to_string(),
                source: io::Error::from(e),
            }
        } else {
            CatalogLoadError::InvalidDocument(e)
        }
    })
}

fn open_catalog(path: &Path) -> Result<BufReader<File>, CatalogLoadError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CatalogLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ONE_ENTRY: &str = r#"{
        "items": [{
            "id": 11,
            "longitude": 21.0098999,
            "latitude": 52.220656,
            "numberOnFloor": 4,
            "beaconUid": "C3:11:22:33:44:55",
            "floorId": 1,
            "buildingShortName": "MINI",
            "roomPlaced": false,
            "nearFloorChange": true,
            "txPowerToSet": 4
        }]
    }"#;

    fn beacon(id: i64, uid: &str, lat: f64) -> ReferenceBeacon {
        ReferenceBeacon {
            id,
            uid: Some(uid.to_string()),
            latitude: lat,
            longitude: 21.0,
            floor_id: 0,
            number_on_floor: id,
            building_short_name: None,
            room_placed: false,
            near_floor_change: false,
            tx_power_to_set: 0,
        }
    }

    #[test]
    fn test_single_entry_round_trip() {
        let (registry, report) = BeaconRegistry::load_from_str(ONE_ENTRY);
        assert!(report.is_ok());
        assert_eq!(report.loaded, 1);

        let expected = ReferenceBeacon {
            id: 11,
            uid: Some("C3:11:22:33:44:55".to_string()),
            latitude: 52.220656,
            longitude: 21.0098999,
            floor_id: 1,
            number_on_floor: 4,
            building_short_name: Some("MINI".to_string()),
            room_placed: false,
            near_floor_change: true,
            tx_power_to_set: 4,
        };
        assert_eq!(registry.lookup("C3:11:22:33:44:55"), Some(&expected));
        assert!(registry.lookup("unknown").is_none());
    }

    #[test]
    fn test_duplicate_uid_last_write_wins() {
        let (registry, duplicates) =
            BeaconRegistry::from_beacons(vec![beacon(1, "dup", 1.0), beacon(2, "other", 2.0), beacon(3, "dup", 3.0)]);
        assert_eq!(duplicates, 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("dup").unwrap().id, 3);
    }

    #[test]
    fn test_invalid_document_yields_empty_registry() {
        let (registry, report) = BeaconRegistry::load_from_str("not json at all");
        assert!(registry.is_empty());
        assert!(matches!(report.load_error, Some(CatalogLoadError::InvalidDocument(_))));
    }

    #[test]
    fn test_missing_file_yields_empty_registry() {
        let (registry, report) = BeaconRegistry::load_from_path("/nonexistent/beacons.json");
        assert!(registry.is_empty());
        assert!(matches!(report.load_error, Some(CatalogLoadError::Io { .. })));
        assert!(BeaconRegistry::try_load_from_path("/nonexistent/beacons.json").is_err());
    }

    /// Yields the start of a document, then fails
    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "device went away"));
            }
            self.served = true;
            let head = br#"{ "items": ["#;
            buf[..head.len()].copy_from_slice(head);
            Ok(head.len())
        }
    }

    #[test]
    fn test_read_failure_is_io_error() {
        let (registry, report) = BeaconRegistry::load_from_reader(FailingReader { served: false });
        assert!(registry.is_empty());
        match report.load_error {
            Some(CatalogLoadError::Io { source, .. }) => assert_eq!(source.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected an I/O error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ONE_ENTRY.as_bytes()).unwrap();

        let (registry, report) = BeaconRegistry::try_load_from_path(file.path()).unwrap();
        assert!(report.skipped.is_empty());
        assert!(registry.contains("C3:11:22:33:44:55"));
    }

    #[test]
    fn test_skipped_entries_reported() {
        let json = r#"{ "items": [
            { "id": 1, "longitude": 0.0, "latitude": 0.0, "numberOnFloor": 1, "beaconUid": "a",
              "floorId": 0, "roomPlaced": false, "nearFloorChange": false, "txPowerToSet": 0 },
            { "id": 2, "longitude": 0.0 },
            { "id": 3, "longitude": 0.0, "latitude": 0.0, "numberOnFloor": 1, "beaconUid": "",
              "floorId": 0, "roomPlaced": false, "nearFloorChange": false, "txPowerToSet": 0 }
        ] }"#;
        let (registry, report) = BeaconRegistry::load_from_str(json);
        assert_eq!(registry.len(), 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.is_ok());
    }

    #[test]
    fn test_by_floor_and_document() {
        let mut upper = beacon(5, "u", 1.0);
        upper.floor_id = 3;
        upper.number_on_floor = 9;
        let mut upper2 = beacon(6, "v", 1.0);
        upper2.floor_id = 3;
        upper2.number_on_floor = 2;
        let (registry, _) = BeaconRegistry::from_beacons(vec![upper, upper2, beacon(1, "g", 0.0)]);

        let floor: Vec<i64> = registry.by_floor(3).iter().map(|b| b.id).collect();
        assert_eq!(floor, vec![6, 5]);

        let document = registry.to_document();
        let ids: Vec<i64> = document.items.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 5, 6]);
    }
}
