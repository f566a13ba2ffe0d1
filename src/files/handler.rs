use super::storage::FileEntry;
use crate::{error::AppError, AppState};
use axum::{
    body::Body,
    extract::{multipart::Field, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// 上传字段名
pub const UPLOAD_FIELD: &str = "files";

/// 每次最多上传的文件数
pub const MAX_FILES_PER_REQUEST: usize = 10;

/// 单个文件大小上限 100MB
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// 上传请求体上限：文件总量加上 multipart 的边界开销
pub const UPLOAD_BODY_LIMIT: usize = MAX_FILES_PER_REQUEST * MAX_FILE_SIZE as usize + 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    pub original_name: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub files: Vec<UploadedFile>,
}

/// GET /api/files
pub async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileEntry>>, AppError> {
    let entries = state
        .files
        .list()
        .await
        .map_err(|e| AppError::internal_with_context("获取文件列表失败", &e))?;
    Ok(Json(entries))
}

/// POST /api/upload
///
/// 任意一个文件失败时，本次请求已经写入的文件全部删除。
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut uploaded: Vec<UploadedFile> = Vec::new();

    if let Err(e) = receive_files(&state, &mut multipart, &mut uploaded).await {
        for file in &uploaded {
            state.files.discard(&file.name).await;
        }
        return Err(e);
    }

    if uploaded.is_empty() {
        return Err(AppError::BadRequest("没有文件被上传".to_string()));
    }

    tracing::info!(
        "上传完成: {}",
        uploaded
            .iter()
            .map(|f| format!("{} ({} 字节)", f.name, f.size))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(Json(UploadResponse {
        message: "文件上传成功",
        files: uploaded,
    }))
}

async fn receive_files(
    state: &AppState,
    multipart: &mut Multipart,
    uploaded: &mut Vec<UploadedFile>,
) -> Result<(), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("上传数据解析失败: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if uploaded.len() >= MAX_FILES_PER_REQUEST {
            return Err(AppError::BadRequest(format!(
                "一次最多上传 {} 个文件",
                MAX_FILES_PER_REQUEST
            )));
        }

        let file = save_field(state, field, &original_name).await?;
        uploaded.push(file);
    }
    Ok(())
}

/// 把一个 multipart 字段流式写入磁盘，超过单文件上限时删除半成品
async fn save_field(state: &AppState, mut field: Field<'_>, original_name: &str) -> Result<UploadedFile, AppError> {
    let (name, mut file) = state
        .files
        .create(original_name)
        .await
        .map_err(|e| AppError::internal_with_context("文件上传失败", &e))?;

    let size = match write_field(&mut field, &mut file, original_name).await {
        Ok(size) => size,
        Err(e) => {
            drop(file);
            state.files.discard(&name).await;
            return Err(e);
        }
    };

    Ok(UploadedFile {
        name,
        original_name: original_name.to_string(),
        size,
    })
}

async fn write_field(
    field: &mut Field<'_>,
    file: &mut tokio::fs::File,
    original_name: &str,
) -> Result<u64, AppError> {
    let mut size: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::BadRequest(format!("上传数据解析失败: {}", e)))?
    {
        size += chunk.len() as u64;
        if size > MAX_FILE_SIZE {
            return Err(AppError::PayloadTooLarge(format!(
                "{} 超过单文件上限 {}MB",
                original_name,
                MAX_FILE_SIZE / 1024 / 1024
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::internal_with_context("文件上传失败", &e))?;
    }
    file.flush()
        .await
        .map_err(|e| AppError::internal_with_context("文件上传失败", &e))?;
    Ok(size)
}

/// GET /api/download/:filename（不需要密码）
pub async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let not_found = || AppError::NotFound("文件不存在".to_string());

    let path = state.files.resolve(&filename).ok_or_else(not_found)?;
    let file = tokio::fs::File::open(&path).await?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(not_found());
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&filename)
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|_| AppError::InternalError("无效的Content-Disposition头".to_string()))?,
    );

    tracing::debug!("下载文件: {} ({} 字节)", filename, metadata.len());
    let stream = ReaderStream::new(file);
    Ok((headers, Body::from_stream(stream)).into_response())
}

/// DELETE /api/delete/:filename
pub async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.files.remove(&filename).await?;
    tracing::info!("删除文件: {}", filename);
    Ok(Json(json!({ "message": "文件删除成功" })))
}
