//! 분석 서버 연결 관리
//!
//! [`ServerConnection`]은 서버 설정 스냅샷과 캐시된 클라이언트를 보관합니다.
//! 설정이 바뀌면 `refresh`로 스냅샷을 교체하고 캐시를 버리며,
//! 인증 실패 등으로 연결을 다시 맺어야 할 때는 `invalidate`를 호출합니다.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use vaultscan_core::config::ServerConfig;

use crate::client::AnalysisClient;
use crate::error::{ClientError, ScannerError};

/// 서버 설정으로 클라이언트를 만드는 팩토리
pub trait ClientConnector: Send + Sync + 'static {
    /// 생성되는 클라이언트 타입
    type Client: AnalysisClient;

    /// 클라이언트를 생성합니다 (인증 포함).
    fn connect(
        &self,
        server: &ServerConfig,
    ) -> impl Future<Output = Result<Self::Client, ClientError>> + Send;
}

/// 분석 서버 연결
pub struct ServerConnection<K: ClientConnector> {
    connector: K,
    server: RwLock<ServerConfig>,
    cached: RwLock<Option<Arc<K::Client>>>,
}

impl<K: ClientConnector> ServerConnection<K> {
    pub fn new(connector: K, server: ServerConfig) -> Self {
        Self {
            connector,
            server: RwLock::new(server),
            cached: RwLock::new(None),
        }
    }

    /// 현재 서버 설정 스냅샷
    pub async fn server(&self) -> ServerConfig {
        self.server.read().await.clone()
    }

    /// 캐시된 클라이언트가 있는지
    pub async fn is_connected(&self) -> bool {
        self.cached.read().await.is_some()
    }

    /// 클라이언트를 반환합니다. 캐시가 없으면 새로 연결합니다.
    ///
    /// 자격 증명이 없거나 연결에 실패하면 치명적 에러(`Connection`)입니다.
    pub async fn client(&self) -> Result<Arc<K::Client>, ScannerError> {
        if let Some(client) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(client));
        }

        let mut cached = self.cached.write().await;
        if let Some(client) = cached.as_ref() {
            return Ok(Arc::clone(client));
        }

        let server = self.server.read().await.clone();
        if !server.has_credentials() {
            return Err(ScannerError::Connection(format!(
                "no api token configured for {}",
                server.url
            )));
        }

        let client = self
            .connector
            .connect(&server)
            .await
            .map(Arc::new)
            .map_err(|e| ScannerError::Connection(e.to_string()))?;
        info!(url = %server.url, "connected to analysis server");
        *cached = Some(Arc::clone(&client));
        Ok(client)
    }

    /// 캐시된 클라이언트를 버립니다. 다음 `client()` 호출에서 다시 연결합니다.
    pub async fn invalidate(&self) {
        if self.cached.write().await.take().is_some() {
            debug!("analysis server connection invalidated");
        }
    }

    /// 서버 설정을 교체합니다. 설정이 바뀌었으면 연결도 무효화합니다.
    pub async fn refresh(&self, server: ServerConfig) {
        let changed = {
            let mut current = self.server.write().await;
            let changed = *current != server;
            *current = server;
            changed
        };
        if changed {
            self.invalidate().await;
        }
    }
}
