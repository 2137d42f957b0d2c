use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Username already exists.")]
    UsernameTaken,
    #[error("Username and password are required.")]
    InvalidInput,
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error("failed to write account store: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize account store: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Username → argon2 PHC hash, mirrored to a JSON file on every change.
///
/// Methods block (hashing and file IO); call them from `spawn_blocking`.
pub struct AccountStore {
    path: PathBuf,
    users: Mutex<HashMap<String, String>>,
}

impl AccountStore {
    /// Loads the store at `path`. A missing file gives an empty store; so
    /// does an unreadable or corrupted one, with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let users = load_users(&path);
        AccountStore {
            path,
            users: Mutex::new(users),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn create(&self, username: &str, password: &str) -> Result<(), AccountError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AccountError::InvalidInput);
        }
        if self.lock().contains_key(username) {
            return Err(AccountError::UsernameTaken);
        }

        // Hash outside the lock; re-check afterwards.
        let hash = hash_password(password)?;

        let mut users = self.lock();
        if users.contains_key(username) {
            return Err(AccountError::UsernameTaken);
        }
        users.insert(username.to_string(), hash);
        if let Err(e) = save_users(&self.path, &users) {
            users.remove(username);
            return Err(e);
        }
        Ok(())
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        let Some(stored) = self.lock().get(username).cloned() else {
            return false;
        };
        let Ok(parsed) = PasswordHash::new(&stored) else {
            tracing::warn!(username, "stored password hash is malformed");
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still consistent: every mutation is a single insert/remove.
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AccountError::Hash(e.to_string()))
}

fn load_users(path: &Path) -> HashMap<String, String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "account store unreadable, starting with no users");
            return HashMap::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(users) => users,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "account store is empty or corrupted, starting with no users");
            HashMap::new()
        }
    }
}

fn save_users(path: &Path, users: &HashMap<String, String>) -> Result<(), AccountError> {
    let json = serde_json::to_string_pretty(users)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        (dir, path)
    }

    #[test]
    fn create_then_verify() {
        let (_dir, path) = scratch();
        let store = AccountStore::open(&path);

        store.create("alice", "hunter2").unwrap();

        assert!(store.verify("alice", "hunter2"));
        assert!(!store.verify("alice", "hunter3"));
        assert!(!store.verify("bob", "hunter2"));
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let (_dir, path) = scratch();
        let store = AccountStore::open(&path);
        store.create("alice", "one").unwrap();

        let err = store.create("alice", "two").unwrap_err();

        assert!(matches!(err, AccountError::UsernameTaken));
        assert!(store.verify("alice", "one"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_fields_are_rejected() {
        let (_dir, path) = scratch();
        let store = AccountStore::open(&path);
        assert!(matches!(store.create("", "pw"), Err(AccountError::InvalidInput)));
        assert!(matches!(store.create("carol", ""), Err(AccountError::InvalidInput)));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn passwords_are_stored_hashed_and_survive_reopen() {
        let (_dir, path) = scratch();
        AccountStore::open(&path).create("alice", "hunter2").unwrap();

        let on_disk: HashMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(on_disk["alice"].starts_with("$argon2"));
        assert!(!on_disk["alice"].contains("hunter2"));

        let reopened = AccountStore::open(&path);
        assert!(reopened.verify("alice", "hunter2"));
    }

    #[test]
    fn corrupted_file_starts_empty() {
        let (_dir, path) = scratch();
        std::fs::write(&path, "{not json").unwrap();

        let store = AccountStore::open(&path);

        assert_eq!(store.len(), 0);
        store.create("alice", "pw").unwrap();
        assert!(AccountStore::open(&path).verify("alice", "pw"));
    }

    #[test]
    fn failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("users.json");
        let store = AccountStore::open(&path);

        assert!(matches!(store.create("alice", "pw"), Err(AccountError::Io(_))));
        assert_eq!(store.len(), 0);
    }
}
