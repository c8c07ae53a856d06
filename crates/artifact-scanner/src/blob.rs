//! 블롭 저장소 경계
//!
//! 스캔 모드에서 아티팩트 내용을 비동기 reader로 읽어옵니다.

use std::collections::HashMap;
use std::future::Future;
use std::io::Cursor;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;

use crate::catalog::BlobRef;
use crate::error::ScannerError;

/// 열린 블롭
pub struct BlobHandle {
    /// 블롭 이름 (저장 시 파일 이름)
    pub name: String,
    /// 내용 reader
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobHandle").field("name", &self.name).finish()
    }
}

/// 블롭 저장소
pub trait BlobStore: Send + Sync {
    /// 블롭을 엽니다.
    fn open_blob(
        &self,
        blob: &BlobRef,
    ) -> impl Future<Output = Result<BlobHandle, ScannerError>> + Send;
}

/// 메모리 기반 블롭 저장소
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 블롭 내용을 저장합니다.
    pub async fn put(&self, key: impl Into<String>, content: impl Into<Bytes>) {
        self.blobs.write().await.insert(key.into(), content.into());
    }
}

impl BlobStore for InMemoryBlobStore {
    async fn open_blob(&self, blob: &BlobRef) -> Result<BlobHandle, ScannerError> {
        let content = self
            .blobs
            .read()
            .await
            .get(&blob.0)
            .cloned()
            .ok_or_else(|| ScannerError::Blob {
                artifact: blob.0.clone(),
                reason: "blob not found".to_owned(),
            })?;

        let name = blob.0.rsplit('/').next().unwrap_or(&blob.0).to_owned();
        Ok(BlobHandle {
            name,
            reader: Box::new(Cursor::new(content)),
        })
    }
}
