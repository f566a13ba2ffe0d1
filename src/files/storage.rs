use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "wmv", "flv", "webm", "mkv"];

const PATH_SEPARATORS: &[char] = &['/', '\\'];

/// 同名冲突时最多尝试的序号
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// 文件列表中的一项
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub upload_time: DateTime<Utc>,
    pub is_image: bool,
    pub is_video: bool,
}

fn has_extension(name: &str, candidates: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| candidates.iter().any(|c| e.eq_ignore_ascii_case(c)))
        .unwrap_or(false)
}

/// 文件名不能包含路径分隔符，也不能是 `.` / `..`
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(PATH_SEPARATORS)
        && !name.contains('\0')
}

/// 生成保存用的文件名：`{原名}_{毫秒时间戳}{扩展名}`
///
/// 只取客户端文件名的最后一段，丢弃任何目录部分。
pub fn stored_name(original: &str, millis: i64) -> String {
    let base = original.rsplit(PATH_SEPARATORS).next().unwrap_or_default();
    let path = Path::new(base);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or("file");

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, millis, ext),
        None => format!("{}_{}", stem, millis),
    }
}

/// 上传目录
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// 打开上传目录，不存在则创建
    pub async fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 把客户端给的文件名解析为上传目录下的路径，非法名称返回 `None`
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        is_safe_name(name).then(|| self.dir.join(name))
    }

    /// 为新上传的文件创建目标文件
    ///
    /// 同一毫秒内出现同名文件时追加序号，避免互相覆盖。
    pub async fn create(&self, original: &str) -> io::Result<(String, fs::File)> {
        let millis = Utc::now().timestamp_millis();
        let base = stored_name(original, millis);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                base.clone()
            } else {
                match base.rsplit_once('.') {
                    Some((stem, ext)) => format!("{}_{}.{}", stem, attempt, ext),
                    None => format!("{}_{}", base, attempt),
                }
            };
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&name))
                .await
            {
                Ok(file) => return Ok((name, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("无法为 {} 分配文件名", base),
        ))
    }

    /// 列出所有文件，按上传时间倒序
    pub async fn list(&self) -> io::Result<Vec<FileEntry>> {
        let mut read_dir = fs::read_dir(&self.dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            paths.push(entry.path());
        }

        let stats = join_all(paths.into_iter().map(|path| async move {
            let metadata = fs::metadata(&path).await?;
            Ok::<_, io::Error>((path, metadata))
        }))
        .await;

        let mut entries = Vec::new();
        for stat in stats {
            let (path, metadata) = stat?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let upload_time = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            entries.push(FileEntry {
                is_image: has_extension(&name, IMAGE_EXTENSIONS),
                is_video: has_extension(&name, VIDEO_EXTENSIONS),
                name,
                size: metadata.len(),
                upload_time,
            });
        }

        entries.sort_by(|a, b| b.upload_time.cmp(&a.upload_time));
        Ok(entries)
    }

    /// 删除文件；文件不存在时返回 `NotFound`
    pub async fn remove(&self, name: &str) -> io::Result<()> {
        let path = self
            .resolve(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "非法文件名"))?;
        fs::remove_file(path).await
    }

    /// 清理写了一半的文件，失败只记录日志
    pub async fn discard(&self, name: &str) {
        if let Some(path) = self.resolve(name) {
            if let Err(e) = fs::remove_file(&path).await {
                tracing::warn!("清理未完成的上传文件失败 {:?}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fileshare_store_{}_{}", tag, std::process::id()))
    }

    #[test]
    fn test_stored_name() {
        assert_eq!(stored_name("photo.jpg", 1700), "photo_1700.jpg");
        assert_eq!(stored_name("archive.tar.gz", 5), "archive.tar_5.gz");
        assert_eq!(stored_name("README", 9), "README_9");
        assert_eq!(stored_name(".bashrc", 1), ".bashrc_1");
        assert_eq!(stored_name("../../etc/passwd", 2), "passwd_2");
        assert_eq!(stored_name("C:\\Users\\me\\doc.pdf", 3), "doc_3.pdf");
        assert_eq!(stored_name("", 4), "file_4");
    }

    #[test]
    fn test_safe_names() {
        assert!(is_safe_name("a_1.txt"));
        assert!(is_safe_name("..hidden"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("../secret"));
        assert!(!is_safe_name("a\\b"));
    }

    #[test]
    fn test_media_detection() {
        assert!(has_extension("x.JPG", IMAGE_EXTENSIONS));
        assert!(has_extension("clip.webm", VIDEO_EXTENSIONS));
        assert!(!has_extension("notes.txt", IMAGE_EXTENSIONS));
        assert!(!has_extension("jpg", IMAGE_EXTENSIONS));
    }

    #[tokio::test]
    async fn test_create_list_remove() {
        let dir = temp_dir("crud");
        let _ = tokio::fs::remove_dir_all(&dir).await;
        let store = FileStore::open(&dir).await.unwrap();

        let (first, _) = store.create("same.png").await.unwrap();
        let (second, _) = store.create("same.png").await.unwrap();
        assert_ne!(first, second);
        tokio::fs::create_dir(dir.join("nested")).await.unwrap();

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.is_image && !e.is_video));

        store.remove(&first).await.unwrap();
        let err = store.remove(&first).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(store.remove("../x").await.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert_eq!(store.list().await.unwrap().len(), 1);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
