// Token persistence keyed by client id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::token::AbsoluteToken;
use crate::error::Error;

/// All saved tokens, keyed by OAuth client id.
pub type TokenMap = BTreeMap<String, AbsoluteToken>;

/// Durable storage for tokens.
///
/// The whole map is read and written as one unit. [`put`](Self::put)
/// performs a read-merge-write so tokens saved for other clients survive.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<TokenMap, Error>;

    fn save(&self, tokens: &TokenMap) -> Result<(), Error>;

    fn get(&self, client_id: &str) -> Result<Option<AbsoluteToken>, Error> {
        Ok(self.load()?.remove(client_id))
    }

    fn put(&self, client_id: &str, token: &AbsoluteToken) -> Result<(), Error> {
        let mut tokens = self.load()?;
        tokens.insert(client_id.to_owned(), token.clone());
        self.save(&tokens)
    }
}

// ── JSON file ────────────────────────────────────────────────────────

/// One JSON object on disk, replaced atomically on each save.
#[derive(Debug, Clone)]
pub struct JsonFileTokenStore {
    path: PathBuf,
}

impl JsonFileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for JsonFileTokenStore {
    fn load(&self) -> Result<TokenMap, Error> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TokenMap::new()),
            Err(e) => {
                return Err(Error::TokenStore(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };
        if text.trim().is_empty() {
            return Ok(TokenMap::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            Error::TokenStore(format!("cannot parse {}: {e}", self.path.display()))
        })
    }

    fn save(&self, tokens: &TokenMap) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::TokenStore(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let json = serde_json::to_string_pretty(tokens)
            .map_err(|e| Error::TokenStore(format!("cannot serialise tokens: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| Error::TokenStore(format!("cannot write {}: {e}", tmp.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600));
        }

        std::fs::rename(&tmp, &self.path).map_err(|e| {
            Error::TokenStore(format!("cannot replace {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), clients = tokens.len(), "tokens saved");
        Ok(())
    }
}

// ── In memory ────────────────────────────────────────────────────────

/// Process-local store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<TokenMap>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenMap) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<TokenMap, Error> {
        Ok(self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save(&self, tokens: &TokenMap) -> Result<(), Error> {
        *self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = tokens.clone();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token(access: &str) -> AbsoluteToken {
        AbsoluteToken {
            refresh_token: format!("{access}-refresh"),
            access_token: access.into(),
            access_expires_at: 1_700_000_000_000,
            scopes: vec!["Monitor".into()],
        }
    }

    fn assert_clients_independent(store: &dyn TokenStore) {
        store.put("client-a", &token("a")).unwrap();
        store.put("client-b", &token("b")).unwrap();

        assert_eq!(store.get("client-a").unwrap(), Some(token("a")));
        assert_eq!(store.get("client-b").unwrap(), Some(token("b")));

        store.put("client-a", &token("a2")).unwrap();
        assert_eq!(store.get("client-a").unwrap(), Some(token("a2")));
        assert_eq!(store.get("client-b").unwrap(), Some(token("b")));
        assert_eq!(store.get("client-c").unwrap(), None);
    }

    #[test]
    fn memory_store_keeps_clients_independent() {
        assert_clients_independent(&MemoryTokenStore::new());
    }

    #[test]
    fn file_store_keeps_clients_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileTokenStore::new(dir.path().join("nested").join("tokens.json"));
        assert_clients_independent(&store);

        let reopened = JsonFileTokenStore::new(store.path());
        assert_eq!(reopened.load().unwrap().len(), 2);
    }

    #[test]
    fn missing_or_empty_file_is_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = JsonFileTokenStore::new(&path);
        assert!(store.load().unwrap().is_empty());

        std::fs::write(&path, "  \n").unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileTokenStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::TokenStore(_)));
    }
}
