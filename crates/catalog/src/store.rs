use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use areas::{Area, AreaIndex, Locator};
use chrono::{DateTime, Utc};
use core_types::{
    AreaAssignment, AreaId, Coordinates, Fingerprint, ImageStatus, RecordFlags,
};
use serde::{Deserialize, Serialize};

use crate::snapshot::SnapshotFile;
use crate::{CatalogError, Result};

/// Report code used for images that did not land in any area.
pub const UNKNOWN_SIGLA: &str = "Desconhecida";

/// Re-encoded copy written because the original exceeded the size ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedCopy {
    pub path: PathBuf,
    /// Fingerprint of the untouched original bytes.
    pub original_fingerprint: Fingerprint,
    pub attempts: u32,
    pub size_bytes: u64,
}

/// One distinct photograph, identified by content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub fingerprint: Fingerprint,
    pub source_paths: BTreeSet<PathBuf>,
    pub captured_at: Option<DateTime<Utc>>,
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub orientation: Option<u16>,
    pub area: AreaAssignment,
    #[serde(default)]
    pub status: ImageStatus,
    #[serde(default)]
    pub comment: String,
    pub order_index: i64,
    #[serde(default)]
    pub flags: RecordFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<DerivedCopy>,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new(fingerprint: Fingerprint, source_path: PathBuf, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            source_paths: BTreeSet::from([source_path]),
            captured_at: None,
            coordinates: None,
            orientation: None,
            area: AreaAssignment::default(),
            status: ImageStatus::default(),
            comment: String::new(),
            order_index: 0,
            flags: RecordFlags::default(),
            derived: None,
            first_seen_at: now,
            updated_at: now,
        }
    }

    pub fn is_excluded(&self) -> bool {
        self.flags.contains(RecordFlags::EXCLUDED)
    }

    pub fn area_id(&self) -> Option<&AreaId> {
        self.area.area_id()
    }

    /// True when `fingerprint` identifies this record or the original behind its derived copy.
    pub fn matches_content(&self, fingerprint: &Fingerprint) -> bool {
        &self.fingerprint == fingerprint
            || self
                .derived
                .as_ref()
                .is_some_and(|d| &d.original_fingerprint == fingerprint)
    }

    /// File holding the bytes this record's fingerprint describes.
    pub fn working_path(&self) -> Option<&Path> {
        match &self.derived {
            Some(derived) => Some(derived.path.as_path()),
            None => self.source_paths.iter().next().map(PathBuf::as_path),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Aggregate root: every image record plus the areas they were resolved against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Store {
    #[serde(default)]
    pub records: BTreeMap<Fingerprint, ImageRecord>,
    #[serde(default)]
    pub areas: BTreeMap<AreaId, Area>,
    /// Digest of the map the current assignments were computed against.
    #[serde(default)]
    pub map_digest: Option<Fingerprint>,
}

impl Store {
    /// Loads the snapshot at `path`; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        SnapshotFile::new(path).load()
    }

    pub fn record(&self, fingerprint: &Fingerprint) -> Option<&ImageRecord> {
        self.records.get(fingerprint)
    }

    pub fn record_mut(&mut self, fingerprint: &Fingerprint) -> Result<&mut ImageRecord> {
        self.records
            .get_mut(fingerprint)
            .ok_or_else(|| CatalogError::UnknownImage(fingerprint.clone()))
    }

    /// Record whose own or original content has this fingerprint.
    pub fn find_by_content(&self, fingerprint: &Fingerprint) -> Option<&ImageRecord> {
        self.records.get(fingerprint).or_else(|| {
            self.records
                .values()
                .find(|record| record.matches_content(fingerprint))
        })
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&ImageRecord> {
        self.records
            .values()
            .find(|record| record.source_paths.contains(path))
    }

    pub fn next_order_index(&self) -> i64 {
        self.records
            .values()
            .map(|record| record.order_index)
            .max()
            .map_or(1, |max| max + 1)
    }

    /// Non-excluded records resolved to `area_id`, in report order.
    pub fn members(&self, area_id: &AreaId) -> Vec<&ImageRecord> {
        let mut members: Vec<&ImageRecord> = self
            .records
            .values()
            .filter(|record| !record.is_excluded() && record.area_id() == Some(area_id))
            .collect();
        members.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        members
    }

    pub fn unresolved(&self) -> Vec<&ImageRecord> {
        self.records
            .values()
            .filter(|record| !record.area.is_resolved())
            .collect()
    }

    /// Replaces the stored areas with those of `index` and re-resolves every record.
    /// Returns how many assignments changed.
    pub fn adopt_map(&mut self, index: &AreaIndex, now: DateTime<Utc>) -> usize {
        self.areas = index
            .areas()
            .map(|area| (area.id.clone(), area.clone()))
            .collect();
        self.map_digest = index.digest().cloned();
        self.reassign_areas(index, now)
    }

    pub fn reassign_areas(&mut self, index: &AreaIndex, now: DateTime<Utc>) -> usize {
        let locator = Locator::new(index);
        let mut changed = 0;
        for record in self.records.values_mut() {
            let assignment = locator.assign(record.coordinates);
            if assignment != record.area {
                record.area = assignment;
                record.touch(now);
                changed += 1;
            }
        }
        changed
    }

    /// Report code of the record's area, or [`UNKNOWN_SIGLA`].
    pub fn sigla_of(&self, record: &ImageRecord) -> &str {
        record
            .area_id()
            .and_then(|id| self.areas.get(id))
            .map_or(UNKNOWN_SIGLA, Area::display_code)
    }

    /// Renumbers records by area code (case-insensitive) then capture time, undated last.
    /// Records with `ORDER_LOCKED` keep their index and the rest fill the remaining slots.
    /// Returns how many indices changed.
    pub fn reorder_by_area(&mut self, now: DateTime<Utc>) -> usize {
        let locked: BTreeSet<i64> = self
            .records
            .values()
            .filter(|record| record.flags.contains(RecordFlags::ORDER_LOCKED))
            .map(|record| record.order_index)
            .collect();

        let mut unlocked: Vec<(String, Option<DateTime<Utc>>, Fingerprint)> = self
            .records
            .values()
            .filter(|record| !record.flags.contains(RecordFlags::ORDER_LOCKED))
            .map(|record| {
                (
                    self.sigla_of(record).to_uppercase(),
                    record.captured_at,
                    record.fingerprint.clone(),
                )
            })
            .collect();
        unlocked.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| match (a.1, b.1) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut slots = (1..).filter(|idx| !locked.contains(idx));
        let mut changed = 0;
        for (_, _, fingerprint) in unlocked {
            let Some(slot) = slots.next() else { break };
            if let Some(record) = self.records.get_mut(&fingerprint) {
                if record.order_index != slot {
                    record.order_index = slot;
                    record.touch(now);
                    changed += 1;
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_types::{AreaKind, UnresolvedReason};

    fn fp(n: u8) -> Fingerprint {
        Fingerprint::from_digest(&[n; 32])
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn area(id: &str, sigla: &str) -> Area {
        let c = |lat: f64, lon: f64| Coordinates {
            latitude: lat,
            longitude: lon,
        };
        Area {
            id: AreaId::new(id),
            kind: AreaKind::Quadra,
            label: id.to_string(),
            sigla: Some(sigla.to_string()),
            boundary: vec![c(0.0, 0.0), c(0.0, 1.0), c(1.0, 1.0), c(1.0, 0.0), c(0.0, 0.0)],
            holes: Vec::new(),
        }
    }

    fn record_in(n: u8, area_id: Option<&str>, captured: Option<DateTime<Utc>>) -> ImageRecord {
        let mut record = ImageRecord::new(fp(n), PathBuf::from(format!("/f/{n}.jpg")), at(0));
        record.captured_at = captured;
        record.order_index = n as i64;
        if let Some(id) = area_id {
            record.area = AreaAssignment::Resolved {
                area_id: AreaId::new(id),
            };
        }
        record
    }

    fn store_with(records: Vec<ImageRecord>) -> Store {
        let mut store = Store::default();
        for a in [area("q-b", "bb"), area("q-a", "AA")] {
            store.areas.insert(a.id.clone(), a);
        }
        for record in records {
            store.records.insert(record.fingerprint.clone(), record);
        }
        store
    }

    #[test]
    fn next_order_index_appends() {
        assert_eq!(Store::default().next_order_index(), 1);
        let store = store_with(vec![record_in(4, None, None), record_in(9, None, None)]);
        assert_eq!(store.next_order_index(), 10);
    }

    #[test]
    fn members_skip_excluded_and_follow_order() {
        let mut excluded = record_in(3, Some("q-a"), None);
        excluded.flags.insert(RecordFlags::EXCLUDED);
        let mut late = record_in(1, Some("q-a"), None);
        late.order_index = 50;
        let store = store_with(vec![late, record_in(2, Some("q-a"), None), excluded]);

        let members: Vec<_> = store
            .members(&AreaId::new("q-a"))
            .into_iter()
            .map(|r| r.fingerprint.clone())
            .collect();
        assert_eq!(members, vec![fp(2), fp(1)]);
    }

    #[test]
    fn reorder_sorts_by_sigla_then_capture_time() {
        let store_records = vec![
            record_in(1, Some("q-b"), Some(at(9))),
            record_in(2, Some("q-a"), Some(at(10))),
            record_in(3, Some("q-a"), Some(at(8))),
            record_in(4, None, None),
        ];
        let mut store = store_with(store_records);
        store.reorder_by_area(at(12));

        let order = |n: u8| store.records[&fp(n)].order_index;
        // AA < BB < DESCONHECIDA
        assert_eq!((order(3), order(2), order(1), order(4)), (1, 2, 3, 4));
    }

    #[test]
    fn reorder_keeps_locked_indices() {
        let mut pinned = record_in(1, Some("q-b"), Some(at(9)));
        pinned.order_index = 1;
        pinned.flags.insert(RecordFlags::ORDER_LOCKED);
        let mut store = store_with(vec![
            pinned,
            record_in(2, Some("q-a"), Some(at(10))),
            record_in(3, Some("q-a"), Some(at(8))),
        ]);
        store.reorder_by_area(at(12));

        assert_eq!(store.records[&fp(1)].order_index, 1);
        assert_eq!(store.records[&fp(3)].order_index, 2);
        assert_eq!(store.records[&fp(2)].order_index, 3);
    }

    #[test]
    fn find_by_content_sees_derived_originals() {
        let mut record = record_in(1, None, None);
        record.derived = Some(DerivedCopy {
            path: PathBuf::from("/w/derived/a.jpg"),
            original_fingerprint: fp(77),
            attempts: 1,
            size_bytes: 10,
        });
        let store = store_with(vec![record]);

        assert_eq!(store.find_by_content(&fp(77)).unwrap().fingerprint, fp(1));
        assert!(store.find_by_content(&fp(78)).is_none());
        assert_eq!(
            store.records[&fp(1)].working_path(),
            Some(Path::new("/w/derived/a.jpg"))
        );
    }

    #[test]
    fn unknown_record_is_an_error() {
        let mut store = Store::default();
        assert!(matches!(
            store.record_mut(&fp(1)),
            Err(CatalogError::UnknownImage(_))
        ));
    }

    #[test]
    fn adopting_map_reassigns_records() {
        let mut inside = record_in(1, None, None);
        inside.coordinates = Coordinates::new(0.5, 0.5);
        inside.area = AreaAssignment::Unresolved {
            reason: UnresolvedReason::OutsideMap,
        };
        let mut store = store_with(vec![inside, record_in(2, Some("gone"), None)]);

        let index = AreaIndex::new(vec![area("q-a", "AA")]);
        let changed = store.adopt_map(&index, at(1));

        assert_eq!(changed, 2);
        assert_eq!(store.records[&fp(1)].area_id(), Some(&AreaId::new("q-a")));
        assert_eq!(
            store.records[&fp(2)].area,
            AreaAssignment::Unresolved {
                reason: UnresolvedReason::NoCoordinates
            }
        );
        assert_eq!(store.areas.len(), 1);
    }
}
