// Tests for the revision store

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use wikinet_core::config::StoreConfig;
use wikinet_core::data::{Database, format_datetime, parse_datetime};
use wikinet_core::model::{ConversationCacheEntry, PageRecord, RevisionSnapshot};

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::open(&StoreConfig::new(&db_path)).unwrap();
    (temp_dir, db)
}

fn page(id: i64, title: &str) -> PageRecord {
    PageRecord {
        id,
        title: title.to_string(),
        creation_date: Utc.with_ymd_and_hms(2005, 6, 15, 8, 30, 0).unwrap(),
    }
}

fn talk(from: &str, to: &str, count: u32) -> ConversationCacheEntry {
    ConversationCacheEntry {
        from: from.to_string(),
        to: to.to_string(),
        count,
    }
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::open(&StoreConfig::new(&db_path));
    assert!(db.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_database_creates_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("dir").join("wikinet.db");

    let db = Database::open(&StoreConfig::new(&db_path)).unwrap();
    assert_eq!(db.path(), Some(db_path.as_path()));
    assert!(db_path.exists());
}

#[test]
fn test_database_exists_and_remove() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    assert!(!Database::exists(&db_path));
    let db = Database::open(&StoreConfig::new(&db_path)).unwrap();
    drop(db);
    assert!(Database::exists(&db_path));

    Database::remove(&db_path).unwrap();
    assert!(!Database::exists(&db_path));
}

#[test]
fn test_reopen_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    {
        let db = Database::open(&StoreConfig::new(&db_path)).unwrap();
        db.insert_page(&page(1, "Rust")).unwrap();
    }

    let db = Database::open(&StoreConfig::new(&db_path)).unwrap();
    assert_eq!(db.page_count().unwrap(), 1);
}

// ============================================================================
// Date Format Tests
// ============================================================================

#[test]
fn test_datetime_format() {
    let dt = Utc.with_ymd_and_hms(2011, 7, 1, 0, 0, 0).unwrap();
    assert_eq!(format_datetime(&dt), "2011-07-01 00:00:00");
    assert_eq!(parse_datetime("2011-07-01 00:00:00").unwrap(), dt);
}

#[test]
fn test_datetime_parse_drops_fraction() {
    let dt = Utc.with_ymd_and_hms(2011, 7, 1, 12, 5, 9).unwrap();
    assert_eq!(parse_datetime("2011-07-01 12:05:09.0").unwrap(), dt);
}

#[test]
fn test_datetime_parse_rejects_garbage() {
    assert!(parse_datetime("yesterday").is_err());
}

// ============================================================================
// Page Tests
// ============================================================================

#[test]
fn test_insert_and_get_page() {
    let (_temp_dir, db) = create_test_db();

    assert!(db.insert_page(&page(42, "Ada Lovelace")).unwrap());
    let stored = db.get_page(42).unwrap().unwrap();
    assert_eq!(stored, page(42, "Ada Lovelace"));
}

#[test]
fn test_page_record_is_immutable() {
    let (_temp_dir, db) = create_test_db();

    assert!(db.insert_page(&page(42, "Ada Lovelace")).unwrap());
    assert!(!db.insert_page(&page(42, "Renamed")).unwrap());
    assert_eq!(db.get_page(42).unwrap().unwrap().title, "Ada Lovelace");
}

#[test]
fn test_get_page_by_title() {
    let (_temp_dir, db) = create_test_db();

    db.insert_page(&page(7, "Linux")).unwrap();
    assert_eq!(db.get_page_by_title("Linux").unwrap().unwrap().id, 7);
    assert!(db.get_page_by_title("Minix").unwrap().is_none());
}

#[test]
fn test_missing_creation_date() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.creation_date(99).unwrap().is_none());
}

// ============================================================================
// Snapshot Tests
// ============================================================================

#[test]
fn test_put_and_get_snapshot() {
    let (_temp_dir, db) = create_test_db();
    let as_of = Utc.with_ymd_and_hms(2011, 7, 1, 0, 0, 0).unwrap();

    let snapshot = RevisionSnapshot {
        page_id: 1,
        as_of,
        outgoing_links: vec!["Python".into(), "C".into()],
    };
    assert!(!db.has_snapshot(1, &as_of).unwrap());
    assert!(db.put_snapshot(&snapshot).unwrap());
    assert!(db.has_snapshot(1, &as_of).unwrap());

    let stored = db.get_snapshot(1, &as_of).unwrap().unwrap();
    assert_eq!(stored.outgoing_links, vec!["C", "Python"]);
}

#[test]
fn test_empty_snapshot_is_recorded() {
    let (_temp_dir, db) = create_test_db();
    let as_of = Utc.with_ymd_and_hms(2011, 7, 1, 0, 0, 0).unwrap();

    db.put_snapshot(&RevisionSnapshot {
        page_id: 1,
        as_of,
        outgoing_links: Vec::new(),
    })
    .unwrap();

    assert!(db.has_snapshot(1, &as_of).unwrap());
    assert!(db.get_snapshot(1, &as_of).unwrap().unwrap().outgoing_links.is_empty());
}

#[test]
fn test_snapshot_written_once() {
    let (_temp_dir, db) = create_test_db();
    let as_of = Utc.with_ymd_and_hms(2011, 7, 1, 0, 0, 0).unwrap();

    let first = RevisionSnapshot {
        page_id: 1,
        as_of,
        outgoing_links: vec!["A".into()],
    };
    let second = RevisionSnapshot {
        outgoing_links: vec!["B".into()],
        ..first.clone()
    };

    assert!(db.put_snapshot(&first).unwrap());
    assert!(!db.put_snapshot(&second).unwrap());
    assert_eq!(db.get_snapshot(1, &as_of).unwrap().unwrap().outgoing_links, vec!["A"]);
}

#[test]
fn test_overlong_titles_not_stored() {
    let (_temp_dir, db) = create_test_db();
    let as_of = Utc.with_ymd_and_hms(2011, 7, 1, 0, 0, 0).unwrap();

    db.put_snapshot(&RevisionSnapshot {
        page_id: 1,
        as_of,
        outgoing_links: vec!["x".repeat(300), "Short".into()],
    })
    .unwrap();
    assert_eq!(db.get_snapshot(1, &as_of).unwrap().unwrap().outgoing_links, vec!["Short"]);
}

#[test]
fn test_multibyte_titles_measured_in_characters() {
    let (_temp_dir, db) = create_test_db();
    let as_of = Utc.with_ymd_and_hms(2011, 7, 1, 0, 0, 0).unwrap();
    let cjk = "東".repeat(100);

    db.put_snapshot(&RevisionSnapshot {
        page_id: 1,
        as_of,
        outgoing_links: vec![cjk.clone(), "東".repeat(256)],
    })
    .unwrap();
    assert_eq!(db.get_snapshot(1, &as_of).unwrap().unwrap().outgoing_links, vec![cjk]);
}

#[test]
fn test_snapshots_are_per_date() {
    let (_temp_dir, db) = create_test_db();
    let june = Utc.with_ymd_and_hms(2011, 6, 1, 0, 0, 0).unwrap();
    let july = Utc.with_ymd_and_hms(2011, 7, 1, 0, 0, 0).unwrap();

    db.put_snapshot(&RevisionSnapshot {
        page_id: 1,
        as_of: june,
        outgoing_links: vec!["A".into()],
    })
    .unwrap();

    assert!(db.has_snapshot(1, &june).unwrap());
    assert!(!db.has_snapshot(1, &july).unwrap());
    assert!(db.get_snapshot(1, &july).unwrap().is_none());
}

// ============================================================================
// Category Tests
// ============================================================================

#[test]
fn test_ensure_category_is_idempotent() {
    let (_temp_dir, db) = create_test_db();

    assert!(db.get_category_id("Programming languages").unwrap().is_none());
    let first = db.ensure_category("Programming languages").unwrap();
    let second = db.ensure_category("Programming languages").unwrap();
    assert_eq!(first, second);
    assert_eq!(db.get_category_id("Programming languages").unwrap(), Some(first));
}

#[test]
fn test_category_members() {
    let (_temp_dir, db) = create_test_db();

    db.insert_page(&page(2, "Rust")).unwrap();
    db.insert_page(&page(1, "C")).unwrap();
    let category = db.ensure_category("Languages").unwrap();
    let membership = db.add_membership(2, category).unwrap();
    db.add_membership(1, category).unwrap();
    db.add_membership(1, category).unwrap();

    assert_eq!(membership.page_id, 2);
    assert_eq!(
        db.get_category_members("Languages").unwrap(),
        vec![(1, "C".to_string()), (2, "Rust".to_string())]
    );
    assert!(db.get_category_members("Unknown").unwrap().is_empty());
}

// ============================================================================
// Conversation Cache Tests
// ============================================================================

#[test]
fn test_conversation_count_roundtrip() {
    let (_temp_dir, db) = create_test_db();

    assert_eq!(db.get_conversation_count("Alice", "Bob").unwrap(), None);
    assert!(db.put_conversation_count(&talk("Alice", "Bob", 12)).unwrap());
    assert_eq!(db.get_conversation_count("Alice", "Bob").unwrap(), Some(12));
}

#[test]
fn test_conversation_count_first_insert_wins() {
    let (_temp_dir, db) = create_test_db();

    assert!(db.put_conversation_count(&talk("Alice", "Bob", 12)).unwrap());
    assert!(!db.put_conversation_count(&talk("Alice", "Bob", 3)).unwrap());
    assert_eq!(db.get_conversation_count("Alice", "Bob").unwrap(), Some(12));
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_racing_inserts_are_tolerated() {
    let (_temp_dir, db) = create_test_db();
    let db = Arc::new(db);
    let as_of = Utc.with_ymd_and_hms(2011, 7, 1, 0, 0, 0).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db = db.clone();
            thread::spawn(move || {
                db.insert_page(&page(1, "Rust")).unwrap();
                db.put_snapshot(&RevisionSnapshot {
                    page_id: 1,
                    as_of,
                    outgoing_links: vec!["C".into()],
                })
                .unwrap()
            })
        })
        .collect();

    let created: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap() as usize)
        .sum();
    assert_eq!(created, 1);
    assert_eq!(db.page_count().unwrap(), 1);
}
