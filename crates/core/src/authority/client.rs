use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};
use tracing::{debug, info};

use crate::{
    config::AppConfig,
    error::{ControlError, ControlResult},
};

use super::protocol::{decode_response, AuthorizationRequest};

/// Train-side endpoint of the authorization protocol.
#[derive(Debug, Clone)]
pub struct AuthorityClient {
    socket_path: PathBuf,
    connect_retry: Duration,
}

impl AuthorityClient {
    /// Client for the server at `socket_path`, retrying every `connect_retry`.
    pub fn new(socket_path: impl Into<PathBuf>, connect_retry: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_retry,
        }
    }

    /// Client for the configured endpoint.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.socket_path, config.connect_retry())
    }

    /// Endpoint this client connects to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Ask whether `request.train` may move on. Blocks until the server is
    /// reachable; there is no retry ceiling.
    pub async fn authorize(&self, request: &AuthorizationRequest) -> ControlResult<bool> {
        let mut stream = self.connect(request.train).await?;
        stream
            .write_all(request.encode().as_bytes())
            .await
            .map_err(|err| ControlError::connection("send request", err))?;
        stream
            .shutdown()
            .await
            .map_err(|err| ControlError::connection("finish request", err))?;

        let mut byte = [0u8; 1];
        stream
            .read_exact(&mut byte)
            .await
            .map_err(|err| ControlError::connection("receive response", err))?;
        let granted = decode_response(byte[0])?;
        debug!(train = request.train, request = %request, granted, "Authorization received");
        Ok(granted)
    }

    async fn connect(&self, train: u32) -> ControlResult<UnixStream> {
        let mut waited = false;
        loop {
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => {
                    if waited {
                        info!(train, socket = %self.socket_path.display(), "Connected to authority");
                    }
                    return Ok(stream);
                }
                Err(err) if not_yet_available(&err) => {
                    if !waited {
                        info!(train, socket = %self.socket_path.display(), "Waiting for authority");
                        waited = true;
                    }
                    tokio::time::sleep(self.connect_retry).await;
                }
                Err(err) => return Err(ControlError::connection("connect", err)),
            }
        }
    }
}

fn not_yet_available(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}
