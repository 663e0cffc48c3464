// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use crate::auth::{basic_credentials, AuthError, Authenticator, User};
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Account {
    password: String,
    is_superuser: bool,
}

/// Simple file-based accounts.
///
/// File format (one per line):
///   username:password[:superuser]
/// Lines starting with '#' are comments. Blank lines are ignored.
///
/// Credentials are loaded on startup; `reload()` re-reads the file.
#[derive(Debug, Clone)]
pub struct FileAuthenticator {
    path: PathBuf,
    accounts: Arc<RwLock<HashMap<String, Account>>>,
}

impl FileAuthenticator {
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let this = Self {
            path: path.into(),
            accounts: Arc::new(RwLock::new(HashMap::new())),
        };
        this.reload().await?;
        Ok(this)
    }

    pub async fn reload(&self) -> Result<(), AuthError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| AuthError::Internal(format!("read {}: {e}", self.path.display())))?;

        let mut map = HashMap::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (user, rest) = line.split_once(':').ok_or_else(|| {
                AuthError::Internal(format!(
                    "invalid accounts file format at line {} (expected username:password[:superuser])",
                    idx + 1
                ))
            })?;
            let (password, is_superuser) = match rest.rsplit_once(':') {
                Some((password, "superuser")) => (password, true),
                _ => (rest, false),
            };
            map.insert(
                user.trim().to_string(),
                Account {
                    password: password.trim().to_string(),
                    is_superuser,
                },
            );
        }

        tracing::debug!(accounts = map.len(), path = %self.path.display(), "accounts loaded");
        let mut guard = self.accounts.write().await;
        *guard = map;
        Ok(())
    }
}

#[async_trait]
impl Authenticator for FileAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<User, AuthError> {
        let (username, password) =
            basic_credentials(headers).ok_or(AuthError::MissingCredentials)?;

        let guard = self.accounts.read().await;
        match guard.get(&username) {
            Some(account) if account.password == password => {
                Ok(User::authenticated(username, account.is_superuser))
            }
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn check(&self) -> Result<(), AuthError> {
        tokio::fs::metadata(&self.path)
            .await
            .map(|_| ())
            .map_err(|e| AuthError::Internal(format!("accounts file {}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn basic(user: &str, pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")));
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_file_auth_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.txt");
        std::fs::write(&path, "# accounts\nalice:pw1\n\nadmin:pw2:superuser\n").unwrap();

        let auth = FileAuthenticator::new(&path).await.unwrap();

        let alice = auth.authenticate(&basic("alice", "pw1")).await.unwrap();
        assert_eq!(alice, User::authenticated("alice", false));

        let admin = auth.authenticate(&basic("admin", "pw2")).await.unwrap();
        assert!(admin.is_superuser);

        assert!(matches!(
            auth.authenticate(&basic("alice", "nope")).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.authenticate(&HeaderMap::new()).await,
            Err(AuthError::MissingCredentials)
        ));
        auth.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_auth_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.txt");
        std::fs::write(&path, "alice\n").unwrap();
        assert!(matches!(
            FileAuthenticator::new(&path).await,
            Err(AuthError::Internal(_))
        ));
    }
}
