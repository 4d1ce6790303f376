//! Credential store: the persisted generative-API key.

use sar_desk_core::credentials::{CredentialStore, API_KEY_SETTING};

fn store() -> CredentialStore {
    let store = CredentialStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

#[test]
fn save_load_and_clear_api_key() {
    let store = store();
    assert_eq!(store.load_api_key().unwrap(), None);

    store.save_api_key("  gsk_first ").unwrap();
    assert_eq!(store.load_api_key().unwrap().as_deref(), Some("gsk_first"));

    store.save_api_key("gsk_second").unwrap();
    assert_eq!(store.load_api_key().unwrap().as_deref(), Some("gsk_second"));

    assert!(store.clear_api_key().unwrap());
    assert!(!store.clear_api_key().unwrap());
    assert_eq!(store.load_api_key().unwrap(), None);
}

#[test]
fn blank_saved_value_counts_as_absent() {
    let store = store();
    store.set_setting(API_KEY_SETTING, "   ").unwrap();
    assert_eq!(store.load_api_key().unwrap(), None);
}

#[test]
fn migrate_is_repeatable() {
    let store = store();
    store.save_api_key("gsk_kept").unwrap();
    store.migrate().unwrap();
    assert_eq!(store.load_api_key().unwrap().as_deref(), Some("gsk_kept"));
}

#[test]
fn key_survives_reopening_the_file() {
    let path = std::env::temp_dir().join(format!("sar-desk-{}.db", uuid::Uuid::new_v4()));
    let path = path.to_str().unwrap().to_string();
    {
        let store = CredentialStore::open_migrated(&path).unwrap();
        store.save_api_key("gsk_on_disk").unwrap();
    }
    let reopened = CredentialStore::open_migrated(&path).unwrap();
    assert_eq!(reopened.load_api_key().unwrap().as_deref(), Some("gsk_on_disk"));
    drop(reopened);
    let _ = std::fs::remove_file(&path);
}
