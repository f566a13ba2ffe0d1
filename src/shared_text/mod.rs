use crate::{error::AppError, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::sync::RwLock;

/// 共享文本：内存中的值为准，每次更新后落盘
pub struct SharedText {
    text: RwLock<String>,
    path: PathBuf,
}

impl SharedText {
    /// 从磁盘加载；文件不存在时为空，读取失败只记录警告
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                tracing::warn!("加载共享文本失败 {:?}: {}", path, e);
                String::new()
            }
        };

        Self {
            text: RwLock::new(text),
            path,
        }
    }

    pub async fn get(&self) -> String {
        self.text.read().await.clone()
    }

    /// 更新文本并写入磁盘；写盘失败不影响内存中的新值
    pub async fn set(&self, text: String) {
        let mut guard = self.text.write().await;
        *guard = text;
        // 持有写锁写盘，保证磁盘上的顺序与内存一致
        if let Err(e) = tokio::fs::write(&self.path, guard.as_bytes()).await {
            tracing::error!("保存共享文本失败 {:?}: {}", self.path, e);
        }
    }

    /// 关闭前再落一次盘
    pub async fn flush(&self) -> std::io::Result<()> {
        let guard = self.text.read().await;
        tokio::fs::write(&self.path, guard.as_bytes()).await
    }
}

/// GET /api/shared-text
pub async fn get_shared_text(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "text": state.shared_text.get().await }))
}

/// POST /api/shared-text
pub async fn update_shared_text(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    // 非 JSON 请求体同样按 {error} 返回，浏览器端只认这个结构
    let Json(body) = body.map_err(|e| {
        tracing::debug!("共享文本请求体无效: {}", e);
        AppError::BadRequest("无效的文本内容".to_string())
    })?;
    let text = body
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("无效的文本内容".to_string()))?
        .to_string();

    tracing::debug!("更新共享文本: {} 字节", text.len());
    state.shared_text.set(text.clone()).await;

    Ok(Json(json!({
        "message": "文本更新成功",
        "text": text,
    })))
}
