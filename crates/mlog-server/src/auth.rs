use crate::db::UserRecord;
use crate::error::AppError;
use crate::AppState;
use anyhow::anyhow;
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose, Engine as _};
use image::Luma;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use mlog_proto::Role;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: i64,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

/// Hash a password using Argon2id with random salt
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
    Ok(password_hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| anyhow!("Invalid password hash: {}", e))?;
    let argon2 = Argon2::default();
    Ok(argon2.verify_password(password.as_bytes(), &parsed_hash).is_ok())
}

pub fn issue_token(user: &UserRecord, secret: &str, ttl_hours: i64) -> anyhow::Result<String> {
    let exp = (chrono::Utc::now() + chrono::Duration::hours(ttl_hours)).timestamp() as usize;
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        role: user.role,
        exp,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Identity of the caller when a valid bearer token is present. Used where
/// authentication is optional, e.g. to attribute writes in the action log.
pub fn bearer_claims(headers: &HeaderMap, secret: &str) -> Option<Claims> {
    bearer(headers).and_then(|token| decode_token(token, secret).ok())
}

// --- JWT Auth Middleware ---
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer(req.headers()).ok_or_else(|| AppError::unauthorized("No token"))?;
    match decode_token(token, &state.settings.auth.jwt_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(e) => {
            tracing::debug!(error = %e, "JWT validation error");
            Err(AppError::unauthorized("Invalid token"))
        }
    }
}

/// Must be layered inside `require_auth`.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    match req.extensions().get::<Claims>() {
        Some(claims) if claims.role == Role::Admin => Ok(next.run(req).await),
        Some(_) => Err(AppError::Forbidden),
        None => Err(AppError::unauthorized("No token")),
    }
}

// --- Two-factor authentication ---

/// Fresh base32 encoded TOTP secret.
pub fn generate_totp_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

pub fn build_totp(secret_b32: &str, issuer: &str, account: &str) -> anyhow::Result<TOTP> {
    let bytes = Secret::Encoded(secret_b32.to_string())
        .to_bytes()
        .map_err(|e| anyhow!("invalid TOTP secret: {:?}", e))?;
    // ':' separates issuer and account in otpauth labels
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        bytes,
        Some(issuer.replace(':', "_")),
        account.replace(':', "_"),
    )
    .map_err(|e| anyhow!("failed to build TOTP: {:?}", e))
}

pub fn verify_totp(secret_b32: &str, code: &str) -> anyhow::Result<bool> {
    let totp = build_totp(secret_b32, "mlog", "user")?;
    Ok(totp.check_current(code.trim())?)
}

/// Render `content` as a QR code PNG wrapped in a data URL.
pub fn qr_data_url(content: &str) -> anyhow::Result<String> {
    let code = QrCode::new(content.as_bytes())?;
    let img = code.render::<Luma<u8>>().max_dimensions(300, 300).build();
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        use image::codecs::png::PngEncoder;
        use image::ColorType;
        use image::ImageEncoder;

        let encoder = PngEncoder::new(&mut buf);
        encoder.write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            ColorType::L8.into(),
        )?;
    }
    Ok(format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(buf.get_ref())
    ))
}
