//! Hardware-wallet connection with bounded retry.
//!
//! The transport driver itself is an external collaborator behind
//! [`HardwareTransport`]. This module owns the connect sequence: drop any
//! stale session, open the device, make sure the Ethereum app is in the
//! foreground, then run the caller's operation. Transient failures restart
//! the whole sequence under the configured [`RetryConfig`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::resilience::{RetryConfig, RetryError, retry};

/// Name the device reports while on its dashboard.
pub const DASHBOARD_APP: &str = "BOLOS";

pub const ETHEREUM_APP: &str = "Ethereum";

/// Time the device needs after quitting or opening an app.
pub const APP_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Device is locked")]
    Locked,

    #[error("App not open: expected {expected}, found {found}")]
    WrongApp { expected: String, found: String },

    #[error("Rejected on device")]
    Rejected,

    #[error("Cancelled")]
    Cancelled,

    #[error("Device unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<HardwareError> },
}

impl HardwareError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Failures worth reconnecting for.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Locked | Self::WrongApp { .. }
        )
    }
}

pub type HardwareResult<T> = std::result::Result<T, HardwareError>;

#[async_trait::async_trait]
pub trait HardwareTransport: Send + Sync {
    async fn open(&self) -> HardwareResult<()>;

    async fn close(&self) -> HardwareResult<()>;

    /// Name of the app currently in the foreground.
    async fn current_app(&self) -> HardwareResult<String>;

    async fn quit_app(&self) -> HardwareResult<()>;

    async fn open_app(&self, name: &str) -> HardwareResult<()>;
}

/// Connects and runs `handler`, retrying transient failures.
pub async fn connect_with_retry<T, F, Fut>(
    transport: Arc<dyn HardwareTransport>,
    config: &RetryConfig,
    cancel: &CancellationToken,
    handler: F,
) -> HardwareResult<T>
where
    F: Fn(Arc<dyn HardwareTransport>) -> Fut,
    Fut: Future<Output = HardwareResult<T>>,
{
    let handler = &handler;
    let result = retry(config, cancel, HardwareError::is_transient, |attempt| {
        let transport = Arc::clone(&transport);
        async move {
            tracing::debug!(attempt, "Connecting to hardware wallet");
            prepare(transport.as_ref(), cancel).await?;
            handler(transport).await
        }
    })
    .await;

    result.map_err(|e| match e {
        RetryError::Cancelled => HardwareError::Cancelled,
        RetryError::Exhausted { attempts, source } if source.is_transient() => {
            tracing::warn!(attempts, error = %source, "Hardware wallet unavailable");
            HardwareError::Exhausted {
                attempts,
                last: Box::new(source),
            }
        }
        RetryError::Exhausted { source, .. } => source,
    })
}

async fn prepare(transport: &dyn HardwareTransport, cancel: &CancellationToken) -> HardwareResult<()> {
    if let Err(e) = transport.close().await {
        tracing::debug!(error = %e, "Closing stale transport failed");
    }
    transport.open().await?;

    let app = transport.current_app().await?;
    if app == ETHEREUM_APP {
        return Ok(());
    }

    if app != DASHBOARD_APP {
        tracing::debug!(app = %app, "Quitting foreground app");
        transport.quit_app().await?;
        settle(cancel).await?;
    }
    transport.open_app(ETHEREUM_APP).await?;
    settle(cancel).await?;

    let app = transport.current_app().await?;
    if app != ETHEREUM_APP {
        return Err(HardwareError::WrongApp {
            expected: ETHEREUM_APP.to_string(),
            found: app,
        });
    }
    Ok(())
}

async fn settle(cancel: &CancellationToken) -> HardwareResult<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(HardwareError::Cancelled),
        _ = tokio::time::sleep(APP_SETTLE_DELAY) => Ok(()),
    }
}
