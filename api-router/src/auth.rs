use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use common::{
    principal::Principal,
    storage::{db::SurrealDbClient, types::auth_user::AuthUser},
};

use crate::error::ApiError;

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer ").map(str::trim))
        .map(String::from)
}

/// Client address for quota purposes: the first `X-Forwarded-For` hop when a
/// proxy added one, otherwise the socket peer.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> IpAddr {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|list| list.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .unwrap_or_else(|| addr.ip())
}

/// Principal for the streaming endpoint: a verified user when a valid token
/// is presented, the (hashed) client address otherwise. A token that fails
/// verification is rejected rather than silently downgraded.
pub async fn principal_or_ip(
    headers: &HeaderMap,
    addr: SocketAddr,
    db: &SurrealDbClient,
) -> Result<Principal, ApiError> {
    match bearer_token(headers) {
        Some(token) => {
            let user = AuthUser::find_by_api_key(&token, db)
                .await
                .map_err(ApiError::from)?
                .ok_or_else(|| ApiError::Unauthorized("Invalid token".to_string()))?;
            Ok(Principal::from_user_id(user.id))
        }
        None => Ok(Principal::from_ip(client_ip(headers, addr))),
    }
}

/// Principal for the session endpoints, which require authentication.
pub async fn require_principal(
    headers: &HeaderMap,
    db: &SurrealDbClient,
) -> Result<Principal, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("You have to be authenticated".to_string()))?;

    let user = AuthUser::find_by_api_key(&token, db)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::Unauthorized("You have to be authenticated".to_string()))?;

    Ok(Principal::from_user_id(user.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    async fn db_with_user(api_key: &str) -> (SurrealDbClient, AuthUser) {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("memory db");

        let user = AuthUser {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            display_name: "수험생".to_string(),
            api_key: Some(api_key.to_string()),
        };
        db.store_item(user.clone()).await.expect("store user");
        (db, user)
    }

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn valid_token_resolves_to_a_user_principal() {
        let (db, user) = db_with_user("token-1").await;
        let headers = headers_with_bearer("token-1");
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        let principal = principal_or_ip(&headers, addr, &db).await.expect("principal");
        assert_eq!(principal, Principal::from_user_id(user.id));
    }

    #[tokio::test]
    async fn missing_token_falls_back_to_the_client_address() {
        let (db, _) = db_with_user("token-1").await;
        let addr: SocketAddr = "203.0.113.9:1234".parse().unwrap();

        let principal = principal_or_ip(&HeaderMap::new(), addr, &db)
            .await
            .expect("principal");
        assert!(!principal.is_authenticated());
        assert_eq!(principal, Principal::from_ip("203.0.113.9".parse().unwrap()));
    }

    #[tokio::test]
    async fn forwarded_header_wins_over_the_socket_peer() {
        let (db, _) = db_with_user("token-1").await;
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "198.51.100.7, 10.0.0.1".parse().unwrap());

        let principal = principal_or_ip(&headers, addr, &db)
            .await
            .expect("principal");
        assert_eq!(
            principal,
            Principal::from_ip("198.51.100.7".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn invalid_token_is_rejected_not_downgraded() {
        let (db, _) = db_with_user("token-1").await;
        let headers = headers_with_bearer("wrong-token");
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();

        let result = principal_or_ip(&headers, addr, &db).await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn session_endpoints_require_a_token() {
        let (db, _) = db_with_user("token-1").await;

        let result = require_principal(&HeaderMap::new(), &db).await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));

        let principal = require_principal(&headers_with_bearer("token-1"), &db)
            .await
            .expect("principal");
        assert!(principal.is_authenticated());
    }
}
