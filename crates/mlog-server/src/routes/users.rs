use crate::auth::{
    build_totp, generate_totp_secret, hash_password, issue_token, qr_data_url, verify_password,
    verify_totp, Claims,
};
use crate::db::{MonitoredUser, UserRecord};
use crate::error::{AppError, AppResult};
use crate::AppState;
use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use mlog_proto::{LoginResponse, Role, UserInfo};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct CredentialsBody {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// TOTP code, login only
    #[serde(default)]
    pub token: Option<String>,
}

impl CredentialsBody {
    fn credentials(&self) -> AppResult<(&str, &str)> {
        match (
            self.username.as_deref().map(str::trim).filter(|u| !u.is_empty()),
            self.password.as_deref().filter(|p| !p.is_empty()),
        ) {
            (Some(username), Some(password)) => Ok((username, password)),
            _ => Err(AppError::bad_request("Username and password are required")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenBody {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetup {
    pub secret: String,
    pub otpauth_url: String,
    pub qr_code: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMonitoredRequest {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsBody>,
) -> AppResult<(StatusCode, Json<UserInfo>)> {
    let (username, password) = body.credentials()?;
    let role = match body.role.as_deref() {
        Some("admin") => Role::Admin,
        _ => Role::User,
    };
    let hash = hash_password(password)?;
    let user = state
        .db
        .insert_user(username, &hash, role)
        .await?
        .ok_or_else(|| AppError::bad_request("Username already exists"))?;
    tracing::info!(user_id = user.id, username = %user.username, role = %user.role, "user registered");
    Ok((StatusCode::CREATED, Json(user.info())))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsBody>,
) -> AppResult<Json<LoginResponse>> {
    let (username, password) = body.credentials()?;
    let user = state
        .db
        .find_user_by_name(username)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid credentials"))?;
    if !verify_password(password, &user.password_hash)? {
        return Err(AppError::unauthorized("Invalid credentials"));
    }

    if user.two_factor_enabled {
        let code = body
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(AppError::TwoFactorRequired)?;
        let secret = user
            .two_factor_secret
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("user {} has 2FA enabled without a secret", user.id))?;
        if !verify_totp(secret, code)? {
            return Err(AppError::unauthorized("Invalid 2FA token"));
        }
    }

    let settings = &state.settings.auth;
    let token = issue_token(&user, &settings.jwt_secret, settings.token_ttl_hours)?;
    tracing::info!(user_id = user.id, "user logged in");
    Ok(Json(LoginResponse {
        token,
        user: user.info(),
    }))
}

async fn current_user(state: &AppState, claims: &Claims) -> AppResult<UserRecord> {
    state
        .db
        .find_user(claims.sub)
        .await?
        .ok_or(AppError::NotFound("User"))
}

pub async fn setup_two_factor(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<TwoFactorSetup>> {
    let user = current_user(&state, &claims).await?;
    let secret = generate_totp_secret();
    let totp = build_totp(&secret, &state.settings.auth.totp_issuer, &user.username)?;
    let otpauth_url = totp.get_url();
    let qr_code = qr_data_url(&otpauth_url)?;
    // stays disabled until a code is verified
    state.db.set_two_factor(user.id, Some(&secret), false).await?;
    Ok(Json(TwoFactorSetup {
        secret,
        otpauth_url,
        qr_code,
    }))
}

pub async fn verify_two_factor(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<TokenBody>,
) -> AppResult<Json<Value>> {
    let user = current_user(&state, &claims).await?;
    let secret = user
        .two_factor_secret
        .as_deref()
        .ok_or_else(|| AppError::bad_request("2FA setup has not been started"))?;
    let code = body.token.as_deref().unwrap_or_default();
    if !verify_totp(secret, code)? {
        return Err(AppError::bad_request("Invalid token"));
    }
    state.db.set_two_factor(user.id, Some(secret), true).await?;
    tracing::info!(user_id = user.id, "2FA enabled");
    Ok(Json(json!({ "message": "2FA enabled successfully" })))
}

pub async fn disable_two_factor(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<TokenBody>,
) -> AppResult<Json<Value>> {
    let user = current_user(&state, &claims).await?;
    let secret = match (&user.two_factor_secret, user.two_factor_enabled) {
        (Some(secret), true) => secret,
        _ => return Err(AppError::bad_request("2FA is not enabled")),
    };
    let code = body.token.as_deref().unwrap_or_default();
    if !verify_totp(secret, code)? {
        return Err(AppError::bad_request("Invalid token"));
    }
    state.db.set_two_factor(user.id, None, false).await?;
    tracing::info!(user_id = user.id, "2FA disabled");
    Ok(Json(json!({ "message": "2FA disabled successfully" })))
}

pub async fn list_monitored(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<MonitoredUser>>> {
    Ok(Json(state.db.list_monitored().await?))
}

pub async fn add_monitored(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddMonitoredRequest>,
) -> AppResult<(StatusCode, Json<MonitoredUser>)> {
    let user = match (body.user_id, body.username.as_deref()) {
        (Some(id), _) => state.db.find_user(id).await?,
        (None, Some(username)) => state.db.find_user_by_name(username).await?,
        (None, None) => return Err(AppError::bad_request("userId or username required")),
    }
    .ok_or(AppError::NotFound("User"))?;
    let reason = body
        .reason
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or("Manually added by admin");
    let entry = state.db.add_monitored(user.id, reason).await?;
    tracing::info!(user_id = user.id, reason, "user added to monitoring");
    Ok((StatusCode::CREATED, Json(entry)))
}
