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

/// Health checks for the project repository and auth backends
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::Authenticator;
use crate::storage::ProjectRepository;

/// Overall health status
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub checks: Vec<HealthCheck>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Individual health check result
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
    pub duration_ms: f64,
}

impl HealthCheck {
    fn from_result<E: std::fmt::Display>(name: &str, start: Instant, result: Result<(), E>) -> Self {
        let (status, message) = match result {
            Ok(()) => ("healthy", None),
            Err(e) => ("unhealthy", Some(format!("{name} check failed: {e}"))),
        };
        HealthCheck {
            name: name.to_string(),
            status: status.to_string(),
            message,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

pub async fn check_repository_health(repository: &Arc<dyn ProjectRepository>) -> HealthCheck {
    let start = Instant::now();
    HealthCheck::from_result("repository", start, repository.check().await)
}

pub async fn check_auth_health(auth: &Arc<dyn Authenticator>) -> HealthCheck {
    let start = Instant::now();
    HealthCheck::from_result("auth", start, auth.check().await)
}

/// Get overall health status by checking all backends
pub async fn get_health_status(
    repository: &Arc<dyn ProjectRepository>,
    auth: &Arc<dyn Authenticator>,
) -> HealthStatus {
    let checks = vec![
        check_repository_health(repository).await,
        check_auth_health(auth).await,
    ];

    let all_healthy = checks.iter().all(|c| c.status == "healthy");

    HealthStatus {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, User};
    use crate::storage::InMemoryProjectRepository;
    use async_trait::async_trait;
    use axum::http::HeaderMap;

    struct BrokenAuth;

    #[async_trait]
    impl Authenticator for BrokenAuth {
        async fn authenticate(&self, _headers: &HeaderMap) -> Result<User, AuthError> {
            Err(AuthError::Internal("down".into()))
        }

        async fn check(&self) -> Result<(), AuthError> {
            Err(AuthError::Internal("accounts file unreadable".into()))
        }
    }

    #[tokio::test]
    async fn test_health_status_one_unhealthy() {
        let repository: Arc<dyn ProjectRepository> = Arc::new(InMemoryProjectRepository::new());
        let auth: Arc<dyn Authenticator> = Arc::new(BrokenAuth);

        let status = get_health_status(&repository, &auth).await;
        assert!(!status.is_healthy());
        assert_eq!(status.checks[0].status, "healthy");
        assert_eq!(status.checks[1].name, "auth");
        assert!(status.checks[1]
            .message
            .as_deref()
            .unwrap()
            .contains("accounts file unreadable"));
    }
}
