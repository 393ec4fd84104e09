use chrono::Utc;
use tempfile::tempdir;

use webchat::data_models::HistoryMessage;
use webchat::history::*;

fn msg(role: &str, content: &str) -> HistoryMessage {
    HistoryMessage::new(role, content, Utc::now())
}

#[cfg(test)]
mod memory_store_tests {
    use super::*;

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut store = MemoryHistoryStore::new();
        for i in 0..5 {
            store.append(msg("user", &format!("m{i}"))).unwrap();
        }

        let recent: Vec<String> = store.recent(2).into_iter().map(|m| m.content).collect();
        assert_eq!(recent, vec!["m3", "m4"]);
        assert_eq!(store.recent(50).len(), 5);
        assert_eq!(store.current_session().messages.len(), 5);
    }
}

#[cfg(test)]
mod json_store_tests {
    use super::*;

    #[test]
    fn test_creates_directory_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let mut store = JsonHistoryStore::open(&path, 10).unwrap();
        store.append(msg("user", "hello")).unwrap();
        store
            .append(msg("assistant", "hi there").with_sources(vec!["https://a.example".into()]))
            .unwrap();

        assert!(path.exists());
        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let sessions = raw["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        let messages = sessions[0]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["metadata"]["search_performed"], serde_json::json!(true));
        assert_eq!(
            messages[1]["metadata"]["source_urls"],
            serde_json::json!(["https://a.example"])
        );
        assert!(messages[0].get("metadata").is_none());
    }

    #[test]
    fn test_reopen_starts_new_session_and_keeps_old_ones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");

        let first_id = {
            let mut store = JsonHistoryStore::open(&path, 10).unwrap();
            store.append(msg("user", "first run")).unwrap();
            store.current_session().id.clone()
        };

        let mut store = JsonHistoryStore::open(&path, 10).unwrap();
        assert_ne!(store.current_session().id, first_id);
        assert!(store.recent(10).is_empty());
        store.append(msg("user", "second run")).unwrap();

        let ids: Vec<&str> = store.sessions().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], first_id);
    }

    #[test]
    fn test_oldest_sessions_dropped_past_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");

        for i in 0..4 {
            let mut store = JsonHistoryStore::open(&path, 2).unwrap();
            store.append(msg("user", &format!("run {i}"))).unwrap();
        }

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let sessions = raw["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0]["messages"][0]["content"], serde_json::json!("run 2"));
        assert_eq!(sessions[1]["messages"][0]["content"], serde_json::json!("run 3"));
    }

    #[test]
    fn test_corrupt_file_is_backed_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, b"{ this is not json").unwrap();

        let mut store = JsonHistoryStore::open(&path, 10).unwrap();
        assert_eq!(store.sessions().count(), 1);

        let backup = dir.path().join("history.json.backup");
        assert_eq!(std::fs::read(&backup).unwrap(), b"{ this is not json");

        store.append(msg("user", "fresh")).unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["sessions"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut store = JsonHistoryStore::open(&path, 10).unwrap();
        store.append(msg("user", "x")).unwrap();

        assert!(!dir.path().join("history.json.tmp").exists());
        assert_eq!(store.path(), path.as_path());
    }
}
