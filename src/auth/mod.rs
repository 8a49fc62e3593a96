pub mod token;

use crate::models::chat::User;
use crate::users::UserDirectory;
use axum::http::{ header, HeaderMap, StatusCode, Uri };
use axum::response::{ IntoResponse, Response };
use axum::Json;
use log::{ debug, error, warn };
use std::sync::Arc;
use thiserror::Error;
use url::form_urlencoded;

pub use token::{ Claims, TokenError, TokenVerifier };

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthRejection {
    #[error("no credential")]
    NoCredential,
    /// The verification key is not configured. Distinct from client errors so
    /// it surfaces as a 500.
    #[error("server error")]
    ServerError,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("unknown user")]
    UnknownUser,
}

impl AuthRejection {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthRejection::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(crate::error::ErrorBody { success: false, message: self.to_string() }),
        ).into_response()
    }
}

/// Pulls a bearer credential out of connection metadata: the `Authorization`
/// header first, then the `token` query parameter for browser sockets.
pub fn extract_credential(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if from_header.is_some() {
        return from_header;
    }

    let qs = uri.query().unwrap_or("");
    form_urlencoded
        ::parse(qs.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct Authenticator {
    verifier: Option<TokenVerifier>,
    users: Arc<dyn UserDirectory>,
}

impl Authenticator {
    pub fn new(secret: Option<&str>, users: Arc<dyn UserDirectory>) -> Self {
        let verifier = secret.filter(|s| !s.trim().is_empty()).map(TokenVerifier::new);
        if verifier.is_none() {
            warn!("No AUTH_SECRET configured. Every connection will be refused.");
        }
        Self { verifier, users }
    }

    pub fn is_configured(&self) -> bool {
        self.verifier.is_some()
    }

    pub async fn authenticate(&self, credential: Option<&str>) -> Result<User, AuthRejection> {
        let token = credential.ok_or(AuthRejection::NoCredential)?;

        let verifier = match &self.verifier {
            Some(v) => v,
            None => {
                error!("Credential verification key is not configured; refusing connection");
                return Err(AuthRejection::ServerError);
            }
        };

        let claims = verifier.verify(token).map_err(|e| {
            debug!("Credential rejected: {}", e);
            AuthRejection::InvalidCredential
        })?;

        match self.users.find_user_by_id(&claims.sub).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(AuthRejection::UnknownUser),
            Err(e) => {
                error!("User lookup failed for {}: {}", claims.sub, e);
                Err(AuthRejection::ServerError)
            }
        }
    }

    pub async fn authenticate_request(
        &self,
        headers: &HeaderMap,
        uri: &Uri
    ) -> Result<User, AuthRejection> {
        let credential = extract_credential(headers, uri);
        self.authenticate(credential.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;
    use crate::users::MemoryUserDirectory;
    use axum::http::HeaderValue;

    fn directory() -> Arc<dyn UserDirectory> {
        Arc::new(
            MemoryUserDirectory::from_users(
                vec![User { id: "u1".into(), role: Role::User, display_name: "Uma".into() }]
            )
        )
    }

    #[test]
    fn header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        let uri: Uri = "/chat/ws?token=xyz".parse().unwrap();
        assert_eq!(extract_credential(&headers, &uri).as_deref(), Some("abc"));
        assert_eq!(extract_credential(&HeaderMap::new(), &uri).as_deref(), Some("xyz"));
        let bare: Uri = "/chat/ws".parse().unwrap();
        assert_eq!(extract_credential(&HeaderMap::new(), &bare), None);
    }

    #[tokio::test]
    async fn resolves_known_subject() {
        let auth = Authenticator::new(Some("k"), directory());
        let token = TokenVerifier::new("k").issue("u1", 60).unwrap();
        let user = auth.authenticate(Some(&token)).await.unwrap();
        assert_eq!(user.id, "u1");
    }

    #[tokio::test]
    async fn rejection_reasons() {
        let auth = Authenticator::new(Some("k"), directory());
        assert_eq!(auth.authenticate(None).await, Err(AuthRejection::NoCredential));
        assert_eq!(
            auth.authenticate(Some("junk")).await,
            Err(AuthRejection::InvalidCredential)
        );
        let ghost = TokenVerifier::new("k").issue("ghost", 60).unwrap();
        assert_eq!(auth.authenticate(Some(&ghost)).await, Err(AuthRejection::UnknownUser));

        let unconfigured = Authenticator::new(None, directory());
        let token = TokenVerifier::new("k").issue("u1", 60).unwrap();
        let err = unconfigured.authenticate(Some(&token)).await.unwrap_err();
        assert_eq!(err, AuthRejection::ServerError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
