//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use http_connector::config::ConnectorConfig;
use http_connector::http::status_factory;
use http_connector::net::admission::{shared_limits, SharedLimits};
use http_connector::net::{ControllerError, ControllerHandle, NeverOverloaded, OverloadPolicy};
use http_connector::ServerConnectionController;

/// Loopback config with a short poll timeout so tests react quickly.
pub fn test_config() -> ConnectorConfig {
    let mut config = ConnectorConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.controller.select_timeout_ms = 10;
    config.controller.startup_timeout_ms = 5_000;
    config.controller.drain_timeout_ms = 500;
    config
}

/// A controller running on its own thread; shut down on drop.
pub struct TestServer {
    pub handle: ControllerHandle,
    thread: Option<JoinHandle<Result<(), ControllerError>>>,
}

impl TestServer {
    pub fn start(config: ConnectorConfig) -> Self {
        Self::start_with(config, Arc::new(NeverOverloaded))
    }

    pub fn start_with(config: ConnectorConfig, overload: Arc<dyn OverloadPolicy>) -> Self {
        let limits = shared_limits(config.limits);
        Self::start_with_limits(config, limits, overload)
    }

    pub fn start_with_limits(
        config: ConnectorConfig,
        limits: SharedLimits,
        overload: Arc<dyn OverloadPolicy>,
    ) -> Self {
        let protocols = status_factory(None).unwrap();
        let controller =
            ServerConnectionController::bind_with_limits(&config, limits, protocols, overload)
                .unwrap();
        let (handle, thread) = controller.spawn().unwrap();
        assert!(handle.await_ready(), "controller never became ready");
        Self {
            handle,
            thread: Some(thread),
        }
    }

    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.handle.local_addr()).await.unwrap()
    }

    /// Request shutdown and wait for the controller thread to finish.
    pub fn stop(mut self) -> Result<(), ControllerError> {
        self.handle.shutdown();
        self.thread.take().unwrap().join().unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.handle.shutdown();
            let _ = thread.join();
        }
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Send `request` and read one response head.
pub async fn exchange(stream: &mut TcpStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).await.unwrap();
    read_head(stream).await
}

pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    tokio::time::timeout(Duration::from_secs(5), async {
        while !head.ends_with(b"\r\n\r\n") {
            match stream.read(&mut byte).await {
                Ok(0) | Err(_) => break,
                Ok(_) => head.push(byte[0]),
            }
        }
    })
    .await
    .expect("timed out waiting for a response");
    String::from_utf8(head).unwrap()
}

/// Whether the server closed `stream` without sending anything.
pub async fn is_closed_by_peer(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        Ok(Ok(_)) | Err(_) => false,
    }
}

pub const GET: &str = "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
