use crate::error::{AppError, AppResult};
use crate::AppState;
use anyhow::Context;
use axum::{
    extract::{Multipart, State},
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tokio::fs;

lazy_static! {
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9._-]").unwrap();
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub filename: String,
    pub original_name: String,
    pub size: usize,
    pub path: String,
    pub mimetype: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub file: StoredFile,
}

/// Strip directories and anything outside a conservative character set.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("upload").to_string();
        let mimetype = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;

        let dir = state.settings.upload_dir();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create upload directory {}", dir.display()))?;
        let filename = format!(
            "{}-{}",
            chrono::Utc::now().timestamp_millis(),
            sanitize_filename(&original_name)
        );
        let path = dir.join(&filename);
        fs::write(&path, &data)
            .await
            .with_context(|| format!("failed to write upload {}", path.display()))?;
        tracing::info!(file = %filename, size = data.len(), "file uploaded");

        return Ok(Json(UploadResponse {
            message: "Upload successful",
            file: StoredFile {
                filename,
                original_name,
                size: data.len(),
                path: path.display().to_string(),
                mimetype,
            },
        }));
    }
    Err(AppError::bad_request("No file uploaded"))
}
