use axum::RequestPartsExt;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::extract::CookieJar;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use uuid::Uuid;

use crate::auth::jwt::{self, Claims, Role};
use crate::error::AppError;
use crate::state::SharedState;

/// Authenticated caller. The tenant comes from the token only, never from
/// the request path or body.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
    pub is_system_admin: bool,
}

impl AuthUser {
    pub fn require_system_admin(&self) -> Result<(), AppError> {
        if self.is_system_admin {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "System admin access required".to_string(),
            ))
        }
    }

    pub fn require_tenant_admin(&self) -> Result<(), AppError> {
        if self.is_system_admin || self.role.is_tenant_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "Tenant admin access required".to_string(),
            ))
        }
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        AuthUser {
            user_id: claims.sub,
            tenant_id: claims.tid,
            role: Role::parse(&claims.role),
            is_system_admin: claims.sys,
        }
    }
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = match parts.extract::<TypedHeader<Authorization<Bearer>>>().await {
            Ok(TypedHeader(Authorization(bearer))) => bearer.token().to_string(),
            Err(_) => {
                if parts.headers.contains_key(axum::http::header::AUTHORIZATION) {
                    return Err(AppError::Unauthorized(
                        "Invalid authorization header".to_string(),
                    ));
                }
                CookieJar::from_headers(&parts.headers)
                    .get("access_token")
                    .map(|cookie| cookie.value().to_string())
                    .ok_or_else(|| {
                        AppError::Unauthorized("Missing authentication token".to_string())
                    })?
            }
        };

        let claims = jwt::decode_token(&token, &state.config.jwt_secret)
            .map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))?;
        Ok(claims.into())
    }
}
