//! Integration tests for the storage crate.
//!
//! Uses in-memory SQLite for fast, isolated tests, and a temp directory for
//! persistence across reopen.

use localchat_storage::{Database, KeyValueStore, MemoryStore};

fn create_test_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

// =============================================================================
// Database Initialization Tests
// =============================================================================

mod initialization {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok(), "Should create in-memory database");
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("settings.db");

        let db = Database::open(&db_path);
        assert!(db.is_ok(), "Should create file-based database");
        assert!(db_path.exists(), "Database file should exist");
    }

    #[test]
    fn test_reopen_existing_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("settings.db");

        {
            let db = Database::open(&db_path).unwrap();
            db.set("artifact_downloaded", "1").unwrap();
        }

        {
            let db = Database::open(&db_path).unwrap();
            assert_eq!(
                db.get("artifact_downloaded").unwrap(),
                Some("1".to_string()),
                "Value should persist after reopen"
            );
        }
    }

    #[test]
    fn test_invalid_path_fails() {
        let result = Database::open(&PathBuf::from("/nonexistent/path/db.sqlite"));
        assert!(result.is_err(), "Should fail with invalid path");
    }
}

// =============================================================================
// Key-Value Contract Tests
// =============================================================================

mod key_value {
    use super::*;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
        assert_eq!(store.get("b").unwrap(), Some("2".to_string()));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn test_database_contract() {
        exercise(&create_test_db());
    }

    #[test]
    fn test_memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_remove_absent_key_is_ok() {
        let db = create_test_db();
        assert!(db.remove("never-set").is_ok());
    }

    #[test]
    fn test_values_are_opaque_strings() {
        let db = create_test_db();
        db.set("k", "with 'quotes' and ; semicolons").unwrap();
        assert_eq!(
            db.get("k").unwrap().as_deref(),
            Some("with 'quotes' and ; semicolons")
        );
    }
}
