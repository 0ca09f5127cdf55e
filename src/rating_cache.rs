// =============================================================================
// rating_cache.rs — THE ONE PLACE THE CLIENT OUTRANKS THE SERVER
// =============================================================================
//
// A rating POST can succeed while the next refetch still comes back without
// the rating (read-after-write lag). Without help, the "rate" button would
// reappear and invite a second rating that the backend then rejects.
//
// So once this session has seen a rating for (shipment, role), by observing
// it on a record or by submitting one, the flag sticks for the rest of the
// session. It is also written to a small JSON file so it survives a restart
// on the same machine, keyed the same way the web client keyed its local
// storage: `transportation_{id}_{role}_rated`.
//
// TRUST POLICY: this cache wins over a server read for exactly one boolean,
// "has this role rated this shipment". It never overrides status, flags,
// timestamps or the rating contents. The file is advisory: a missing or
// corrupt file only costs the protection, never correctness of anything else.
// =============================================================================

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::{Role, ShipmentId, ShipmentRecord};

/// Session-monotonic "has rated" flags with optional file persistence.
pub struct RatingCache {
    flags: RwLock<HashSet<String>>,
    path: Option<PathBuf>,
    /// Held across snapshot, write and rename so the last file written
    /// carries every flag set before it.
    persist: Mutex<()>,
}

fn cache_key(id: &ShipmentId, role: Role) -> String {
    format!("transportation_{id}_{role}_rated")
}

impl RatingCache {
    /// A cache that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            flags: RwLock::new(HashSet::new()),
            path: None,
            persist: Mutex::new(()),
        }
    }

    /// Open a file-backed cache. A missing file is an empty cache; an
    /// unreadable one is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let flags = match load_flags(&path) {
            Ok(flags) => {
                info!(
                    path = %path.display(),
                    entries = flags.len(),
                    "Rating cache loaded"
                );
                flags
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Rating cache unreadable; starting empty"
                );
                HashSet::new()
            }
        };

        Self {
            flags: RwLock::new(flags),
            path: Some(path),
            persist: Mutex::new(()),
        }
    }

    /// Whether this session has seen `role` rate shipment `id`.
    pub fn is_marked(&self, id: &ShipmentId, role: Role) -> bool {
        self.flags.read().contains(&cache_key(id, role))
    }

    /// Record that `role` rated shipment `id`. Returns `true` when the flag
    /// was newly set. Persistence failures are logged, not returned.
    pub fn mark_rated(&self, id: &ShipmentId, role: Role) -> bool {
        let key = cache_key(id, role);
        if !self.flags.write().insert(key.clone()) {
            return false;
        }

        debug!(shipment_id = %id, role = %role, "Rating flag set");

        if let Some(path) = &self.path {
            let _persisting = self.persist.lock();
            let snapshot = self.flags.read().clone();
            if let Err(e) = store_flags(path, &snapshot) {
                warn!(
                    path = %path.display(),
                    error = %e,
                    key = %key,
                    "Could not persist rating flag; it holds for this session only"
                );
            }
        }
        true
    }

    /// Note any rating `record` carries for `role`.
    pub fn observe(&self, record: &ShipmentRecord, role: Role) {
        if record.has_rating_from(role) {
            self.mark_rated(&record.id, role);
        }
    }

    /// The rating check the controller uses: the record's opinion OR the
    /// session flag. Read-only; records are fed in through `observe`, so a
    /// later record that omits the rating cannot flip the answer back.
    pub fn is_already_rated(&self, record: &ShipmentRecord, role: Role) -> bool {
        record.has_rating_from(role) || self.is_marked(&record.id, role)
    }
}

fn load_flags(path: &Path) -> io::Result<HashSet<String>> {
    let raw = fs::read_to_string(path)?;
    let stored: BTreeMap<String, bool> = serde_json::from_str(&raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(stored
        .into_iter()
        .filter_map(|(key, rated)| rated.then_some(key))
        .collect())
}

/// Write through a uniquely named sibling temp file so a crash mid-write
/// leaves the old file.
fn store_flags(path: &Path, flags: &HashSet<String>) -> io::Result<()> {
    let stored: BTreeMap<&str, bool> = flags.iter().map(|k| (k.as_str(), true)).collect();
    let json = serde_json::to_string_pretty(&stored)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RatingEntry, ShipmentStatus};
    use chrono::Utc;

    fn completed(id: u64) -> ShipmentRecord {
        let mut r = ShipmentRecord::new(id);
        r.status = ShipmentStatus::Completed;
        r.delivery_confirmed = true;
        r
    }

    #[test]
    fn test_flags_are_per_shipment_and_role() {
        let cache = RatingCache::in_memory();
        let id = ShipmentId::from(3);
        assert!(cache.mark_rated(&id, Role::CargoOwner));
        assert!(!cache.mark_rated(&id, Role::CargoOwner));
        assert!(cache.is_marked(&id, Role::CargoOwner));
        assert!(!cache.is_marked(&id, Role::Transporter));
        assert!(!cache.is_marked(&ShipmentId::from(4), Role::CargoOwner));
    }

    #[test]
    fn test_rating_seen_once_survives_a_record_without_it() {
        // The cache wins over a stale server read for this one boolean.
        let cache = RatingCache::in_memory();
        let mut with_rating = completed(8);
        with_rating.ratings.push(RatingEntry {
            from_cargo_owner: false,
            rating: 4,
            comment: Some("paid on time".into()),
            created_at: Utc::now(),
        });
        cache.observe(&with_rating, Role::Transporter);
        assert!(cache.is_already_rated(&with_rating, Role::Transporter));

        let lagging = completed(8);
        assert!(cache.is_already_rated(&lagging, Role::Transporter));
        assert!(!cache.is_already_rated(&lagging, Role::CargoOwner));
    }

    #[test]
    fn test_flags_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratings.json");

        let cache = RatingCache::open(&path);
        cache.mark_rated(&ShipmentId::from(12), Role::CargoOwner);
        drop(cache);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("transportation_12_cargo_owner_rated"));

        let reopened = RatingCache::open(&path);
        assert!(reopened.is_marked(&ShipmentId::from(12), Role::CargoOwner));
        assert!(!reopened.is_marked(&ShipmentId::from(12), Role::Transporter));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratings.json");
        fs::write(&path, "not json at all").unwrap();

        let cache = RatingCache::open(&path);
        assert!(!cache.is_marked(&ShipmentId::from(1), Role::CargoOwner));
        assert!(cache.mark_rated(&ShipmentId::from(1), Role::CargoOwner));
        assert!(RatingCache::open(&path).is_marked(&ShipmentId::from(1), Role::CargoOwner));
    }

    #[test]
    fn test_false_entries_are_ignored_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratings.json");
        fs::write(
            &path,
            r#"{"transportation_5_transporter_rated": false, "transportation_6_transporter_rated": true}"#,
        )
        .unwrap();
        let cache = RatingCache::open(&path);
        assert!(!cache.is_marked(&ShipmentId::from(5), Role::Transporter));
        assert!(cache.is_marked(&ShipmentId::from(6), Role::Transporter));
    }

    #[test]
    fn test_record_alone_is_not_remembered() {
        let cache = RatingCache::in_memory();
        let mut with_rating = completed(9);
        with_rating.ratings.push(RatingEntry {
            from_cargo_owner: true,
            rating: 2,
            comment: None,
            created_at: Utc::now(),
        });
        assert!(cache.is_already_rated(&with_rating, Role::CargoOwner));
        assert!(!cache.is_marked(&ShipmentId::from(9), Role::CargoOwner));
    }

    #[test]
    fn test_concurrent_marks_all_reach_disk() {
        for round in 0..50 {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("ratings.json");
            let cache = RatingCache::open(&path);

            std::thread::scope(|scope| {
                for id in 0..8u64 {
                    let cache = &cache;
                    scope.spawn(move || {
                        assert!(cache.mark_rated(&ShipmentId::from(id), Role::Transporter));
                    });
                }
            });

            let reopened = RatingCache::open(&path);
            for id in 0..8u64 {
                assert!(
                    reopened.is_marked(&ShipmentId::from(id), Role::Transporter),
                    "round {round}: shipment {id} missing from disk"
                );
            }
        }
    }
}
