use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access-token claims issued by the upstream auth service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub tid: Uuid,
    pub role: String,
    #[serde(default)]
    pub sys: bool,
    pub exp: i64,
}

impl Claims {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        role: Role,
        is_system_admin: bool,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: user_id,
            tid: tenant_id,
            role: role.as_str().to_string(),
            sys: is_system_admin,
            exp: expires_at.timestamp(),
        }
    }

    /// Claims valid for `ttl` from now.
    pub fn expiring_in(
        user_id: Uuid,
        tenant_id: Uuid,
        role: Role,
        is_system_admin: bool,
        ttl: Duration,
    ) -> Self {
        Self::new(user_id, tenant_id, role, is_system_admin, Utc::now() + ttl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    /// Unknown roles are treated as the least privileged.
    pub fn parse(s: &str) -> Self {
        match s {
            "owner" => Role::Owner,
            "admin" => Role::Admin,
            _ => Role::Member,
        }
    }

    pub fn is_tenant_admin(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

pub fn encode_token(claims: &Claims, secret: &str) -> Result<String, String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| format!("JWT encode failed: {e}"))
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("JWT decode failed: {e}"))
}
