//! Receipt uploads.
//!
//! An upload lands under a temporary name first. The record is created next,
//! and only once it is committed is the file renamed to
//! `<upload_root>/<company_id>/<receipt_id>.<ext>`. A failed rename removes
//! both the record and the temporary file.

use std::{
    path::{Path as FsPath, PathBuf},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection,
        rejection::{PathRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fakebooks_core::{Company, NewReceipt, Receipt, RecordId};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{referenced, CompanyQuery};
use crate::{
    collections::{COMPANIES, RECEIPTS},
    error::ApiError,
    server::Emulator,
};

const FILE_PART: &str = "receipt";
const DEFAULT_EXTENSION: &str = "pdf";

struct Upload {
    file_name: String,
    mime_type: Option<String>,
    data: Bytes,
}

fn extension(file_name: &str) -> String {
    FsPath::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

fn mime_for(ext: &str) -> &'static str {
    match ext {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

fn io_failure(context: &str, path: &FsPath, e: std::io::Error) -> ApiError {
    tracing::error!(path = %path.display(), error = %e, "{}", context);
    ApiError::Server(context.to_lowercase())
}

async fn remove_quietly(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Could not remove receipt file");
    }
}

pub async fn list(
    State(emulator): State<Arc<Emulator>>,
    query: Result<Query<CompanyQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let receipts: Vec<Receipt> = emulator.store.scan(RECEIPTS, |r: &Receipt| query.admits(r.company_id))?;
    Ok(Json(json!({ "receipts": receipts })))
}

pub async fn create(
    State(emulator): State<Arc<Emulator>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut multipart = multipart?;
    let mut fields = NewReceipt::default();
    let mut upload: Option<Upload> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == FILE_PART {
            let file_name = field.file_name().unwrap_or("receipt").to_string();
            let mime_type = field.content_type().map(str::to_string);
            let data = field.bytes().await?;
            upload = Some(Upload { file_name, mime_type, data });
        } else {
            let value = field.text().await?;
            fields.set_field(&name, &value)?;
        }
    }

    let company_id = fields.company_id()?;
    let issue_date = fields.issue_date()?;
    let upload = upload.ok_or_else(|| ApiError::InvalidParameter(format!("{} file is required", FILE_PART)))?;

    let ext = extension(&upload.file_name);
    let mime_type = upload.mime_type.unwrap_or_else(|| mime_for(&ext).to_string());
    let file_size = upload.data.len() as u64;

    // Checked before touching the filesystem so a bad company leaves no
    // directory behind. Companies are never deleted, so the check holds
    // through the write below.
    emulator
        .store
        .view(|txn| -> Result<Company, ApiError> { referenced(txn, COMPANIES, company_id, "company") })?;

    let dir = emulator.config.storage.upload_root.join(company_id.to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| io_failure("Failed to create upload directory", &dir, e))?;
    let temp = dir.join(format!(".upload-{}", Uuid::new_v4().simple()));
    tokio::fs::write(&temp, &upload.data)
        .await
        .map_err(|e| io_failure("Failed to write upload", &temp, e))?;

    let now = emulator.now();
    let created = emulator.store.update(|txn| -> Result<Receipt, ApiError> {
        let id = txn.next_id(RECEIPTS)?;
        let file_path: PathBuf = dir.join(format!("{}.{}", id, ext));
        let receipt = Receipt {
            id,
            company_id,
            issue_date,
            description: fields.description.clone().unwrap_or_default(),
            file_path: file_path.to_string_lossy().into_owned(),
            file_name: upload.file_name.clone(),
            mime_type,
            file_size,
            created_at: now,
        };
        txn.put(RECEIPTS, id, &receipt)?;
        Ok(receipt)
    });

    let receipt = match created {
        Ok(receipt) => receipt,
        Err(e) => {
            remove_quietly(&temp).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&temp, &receipt.file_path).await {
        let failure = io_failure("Failed to store receipt file", &temp, e);
        if let Err(e) = emulator.store.delete(RECEIPTS, receipt.id) {
            tracing::error!(id = receipt.id, error = %e, "Could not remove receipt record after failed rename");
        }
        remove_quietly(&temp).await;
        return Err(failure);
    }

    tracing::info!(id = receipt.id, company_id, size = receipt.file_size, path = %receipt.file_path, "Receipt stored");
    Ok((StatusCode::CREATED, Json(json!({ "receipt": receipt }))))
}

pub async fn get(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let receipt: Receipt = emulator.store.get(RECEIPTS, id)?;
    Ok(Json(json!({ "receipt": receipt })))
}

pub async fn download(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let receipt: Receipt = emulator.store.get(RECEIPTS, id)?;

    let data = match tokio::fs::read(&receipt.file_path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("file for receipt {} is missing", id)))
        }
        Err(e) => return Err(io_failure("Failed to read receipt file", FsPath::new(&receipt.file_path), e)),
    };

    let disposition = format!("attachment; filename=\"{}\"", receipt.file_name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, receipt.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

/// Deletes the record, then the stored file. A file that cannot be removed is
/// logged and otherwise ignored.
pub async fn delete(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    let receipt = emulator.store.update(|txn| -> Result<Receipt, ApiError> {
        let receipt: Receipt = txn.get(RECEIPTS, id)?;
        txn.delete(RECEIPTS, id)?;
        Ok(receipt)
    })?;

    remove_quietly(FsPath::new(&receipt.file_path)).await;
    tracing::info!(id, "Receipt deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_defaults_to_pdf() {
        assert_eq!(extension("invoice.PDF"), "pdf");
        assert_eq!(extension("photo.jpeg"), "jpeg");
        assert_eq!(extension("scan"), "pdf");
        assert_eq!(extension("weird.p d f"), "pdf");
        assert_eq!(mime_for("png"), "image/png");
        assert_eq!(mime_for("xyz"), "application/octet-stream");
    }
}
