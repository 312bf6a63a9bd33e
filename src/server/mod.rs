//! Background page server.
//!
//! Owns the multiplexed channel every page context talks over. Each inbound
//! request is dispatched on its own task, so a request waiting for the user
//! never holds up anyone else. This is also the error boundary: whatever a
//! handler fails with, the page receives a plain [`RpcError`].

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::approvals::{ActivitySource, ApprovalController};
use crate::common::Subscription;
use crate::config::DisconnectPolicy;
use crate::context::AppContext;
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::notify::spawn_port_notifier;
use crate::observability::{RequestTimer, rpc_request_span};
use crate::permissions::origin_of;
use crate::ports::{Port, PortId};
use crate::rpc::{
    FAVICON_METHOD, JsonRpcRequest, JsonRpcResponse, OutboundMessage, RpcError, RpcReply,
};
use crate::session::{SessionEvent, WalletStatus};

/// Events the transport feeds into [`PageServer::serve`].
#[derive(Debug)]
pub enum ChannelEvent {
    Connect(Port),
    Disconnect(PortId),
    /// A raw message from a page. The port travels with it so that even an
    /// unregistered sender can be answered.
    Message { port: Port, message: Value },
}

pub struct PageServer {
    ctx: Arc<AppContext>,
    dispatcher: Dispatcher,
    controller: ApprovalController,
    watchers: Mutex<Vec<Subscription>>,
}

impl PageServer {
    pub fn new(ctx: Arc<AppContext>) -> crate::Result<Self> {
        let dispatcher = Dispatcher::new(Arc::clone(&ctx))?;
        let controller = ApprovalController::new(Arc::clone(&ctx));
        Ok(Self {
            ctx,
            dispatcher,
            controller,
            watchers: Mutex::new(Vec::new()),
        })
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn controller(&self) -> &ApprovalController {
        &self.controller
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Restores persisted session state and starts the process-wide
    /// watchers. Call once before serving.
    pub async fn start(&self) {
        self.ctx.session.restore().await;

        let watchers = vec![
            self.ctx.session.watch_storage(),
            self.watch_permission_changes(),
            self.watch_unlock(),
        ];
        self.lock_watchers().extend(watchers);
        tracing::info!(chain_id = self.ctx.session.chain_id(), "Page server started");
    }

    /// Stops the process-wide watchers. Ports keep their own notifiers until
    /// they disconnect.
    pub fn shutdown(&self) {
        let released = std::mem::take(&mut *self.lock_watchers());
        tracing::info!(watchers = released.len(), "Page server stopped");
    }

    /// Runs until the transport side of `events` closes.
    pub async fn serve(&self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Connect(port) => {
                    self.connect(port).await;
                }
                ChannelEvent::Disconnect(id) => self.disconnect(id),
                ChannelEvent::Message { port, message } => {
                    match serde_json::from_value::<JsonRpcRequest>(message) {
                        Ok(request) => {
                            self.handle_message(&port, request);
                        }
                        Err(e) => {
                            tracing::warn!(port_id = %port.id(), error = %e, "Dropping malformed message");
                        }
                    }
                }
            }
        }
        tracing::debug!("Page channel closed");
    }

    /// Registers the port and starts its notifier. Returns `None` without
    /// side effects when the sender has no usable origin.
    pub async fn connect(&self, port: Port) -> Option<String> {
        let id = port.id();
        let origin = self.ctx.ports.on_connect(port.clone())?;

        let subscriptions = spawn_port_notifier(Arc::clone(&self.ctx), port, origin.clone()).await;
        for subscription in subscriptions {
            // Port may have gone away while the notifier started.
            if !self.ctx.ports.attach(id, subscription) {
                break;
            }
        }
        tracing::info!(port_id = %id, origin = %origin, "Page connected");
        Some(origin)
    }

    /// Idempotent.
    pub fn disconnect(&self, id: PortId) {
        let entry = self.ctx.ports.on_disconnect(id);
        if self.ctx.config.pending_on_disconnect == DisconnectPolicy::Cancel {
            let cancelled = self
                .ctx
                .approvals
                .cancel_for_port(id, RpcError::disconnected());
            if cancelled > 0 {
                tracing::info!(port_id = %id, cancelled, "Approvals cancelled on disconnect");
            }
        }
        if let Some(entry) = entry {
            tracing::info!(port_id = %id, origin = %entry.origin, "Page disconnected");
        }
    }

    /// Handles one request from `port`.
    ///
    /// Favicon reports are cached and never answered. Requests without a
    /// resolvable origin are answered at once with `resource not found`.
    /// Everything else is dispatched on a new task, whose handle is returned.
    pub fn handle_message(&self, port: &Port, request: JsonRpcRequest) -> Option<JoinHandle<()>> {
        let id = port.id();

        if request.method == FAVICON_METHOD {
            if let Some(url) = request.params_array().first().and_then(Value::as_str) {
                self.ctx.ports.set_favicon(id, url);
            }
            return None;
        }

        self.ctx.metrics.requests_total.inc();

        let origin = self
            .ctx
            .ports
            .origin(id)
            .or_else(|| port.sender().url.as_deref().and_then(origin_of));
        let Some(origin) = origin else {
            tracing::debug!(port_id = %id, method = %request.method, "Request without origin");
            self.ctx.metrics.requests_rejected_context.inc();
            self.ctx.metrics.requests_failed.inc();
            let reply = RpcReply::err(RpcError::resource_not_found());
            port.send(OutboundMessage::Response(JsonRpcResponse::reply_to(&request, reply)));
            return None;
        };

        let sender = port.sender();
        let source = ActivitySource {
            url: sender.url.clone().unwrap_or_default(),
            tab_id: sender.tab_id,
            fav_icon_url: self
                .ctx
                .ports
                .favicon(id)
                .or_else(|| sender.fav_icon_url.clone()),
            port_id: Some(id),
        };

        let dispatcher = self.dispatcher.clone();
        let metrics = Arc::clone(&self.ctx.metrics);
        let port = port.clone();

        Some(tokio::spawn(async move {
            let span = rpc_request_span(&origin, &request.method);
            let timer = RequestTimer::new(span.clone());

            let dispatched = {
                let request = request.clone();
                tokio::spawn(
                    async move { dispatcher.dispatch(&request, &origin, source).await }
                        .instrument(span.clone()),
                )
            };

            let result = match dispatched.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(DispatchError::Rpc(e))) => Err(e),
                Ok(Err(DispatchError::Internal(e))) => {
                    span.in_scope(|| {
                        tracing::error!(error = %e, category = ?e.category(), "Dispatch failed");
                    });
                    Err(RpcError::internal())
                }
                Err(join_error) => {
                    span.in_scope(|| {
                        tracing::error!(error = %join_error, "Dispatch task aborted");
                    });
                    Err(RpcError::internal())
                }
            };

            let error_code = result.as_ref().err().map(|e| e.code);
            let elapsed = timer.finish(error_code);
            metrics.record_request_end(error_code.is_none(), elapsed);

            let response = JsonRpcResponse::reply_to(&request, RpcReply::from(result));
            port.send(OutboundMessage::Response(response));
        }))
    }

    // Resolves pending connections whenever an origin's permission changes,
    // whichever tab or path caused it.
    fn watch_permission_changes(&self) -> Subscription {
        let mut changes = self.ctx.permissions.changes();
        let controller = self.controller.clone();
        let subscription = Subscription::new();
        let token = subscription.token();

        tokio::spawn(async move {
            loop {
                let changed = tokio::select! {
                    _ = token.cancelled() => break,
                    changed = changes.recv() => changed,
                };
                match changed {
                    Ok(origin) => {
                        controller.settle_origin(&origin).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Permission changefeed lagged");
                        controller.settle_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        subscription
    }

    // Connections requested while locked become answerable on unlock.
    fn watch_unlock(&self) -> Subscription {
        let mut events = self.ctx.session.subscribe();
        let controller = self.controller.clone();
        let subscription = Subscription::new();
        let token = subscription.token();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(SessionEvent::WalletStatus(WalletStatus::Unlocked)) => {
                        controller.settle_all().await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        controller.settle_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        subscription
    }

    fn lock_watchers(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.watchers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for PageServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageServer")
            .field("ports", &self.ctx.ports.len())
            .field("pending", &self.ctx.approvals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortSender;
    use serde_json::json;
    use std::time::Duration;

    async fn next_response(
        rx: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    ) -> JsonRpcResponse {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out")
                .expect("port closed");
            if let OutboundMessage::Response(r) = msg {
                return r;
            }
        }
    }

    #[tokio::test]
    async fn test_no_origin_is_answered_immediately() {
        let server = PageServer::new(AppContext::in_memory()).unwrap();
        let (port, mut rx) = Port::channel(PortSender::default());
        assert!(server.connect(port.clone()).await.is_none());

        let handle = server.handle_message(&port, JsonRpcRequest::new(1, "eth_requestAccounts", json!([])));
        assert!(handle.is_none());

        let response = next_response(&mut rx).await;
        assert_eq!(response.reply.error().unwrap().code, crate::rpc::codes::RESOURCE_NOT_FOUND);
        assert!(server.context().approvals.is_empty());
        assert_eq!(server.context().metrics.requests_rejected_context.get(), 1);
    }

    #[tokio::test]
    async fn test_favicon_is_cached_without_reply() {
        let server = PageServer::new(AppContext::in_memory()).unwrap();
        let (port, mut rx) = Port::channel(PortSender::new("https://dapp.example/"));
        server.connect(port.clone()).await.unwrap();

        let request = JsonRpcRequest::new(1, FAVICON_METHOD, json!(["https://dapp.example/icon.png"]));
        assert!(server.handle_message(&port, request).is_none());
        assert_eq!(
            server.context().ports.favicon(port.id()).as_deref(),
            Some("https://dapp.example/icon.png")
        );
        while let Ok(msg) = rx.try_recv() {
            assert!(msg.as_response().is_none());
        }
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = PageServer::new(AppContext::in_memory()).unwrap();
        let (port, mut rx) = Port::channel(PortSender::new("https://dapp.example/"));
        server.connect(port.clone()).await.unwrap();

        server
            .handle_message(&port, JsonRpcRequest::new(9, "eth_mine", json!([])))
            .unwrap()
            .await
            .unwrap();
        let response = next_response(&mut rx).await;
        assert_eq!(response.id, json!(9));
        assert_eq!(response.reply.error().unwrap().code, crate::rpc::codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let server = PageServer::new(AppContext::in_memory()).unwrap();
        let (port, _rx) = Port::channel(PortSender::new("https://dapp.example/"));
        server.connect(port.clone()).await.unwrap();
        server.disconnect(port.id());
        server.disconnect(port.id());
        assert!(server.context().ports.is_empty());
        assert_eq!(server.context().metrics.active_ports.get(), 0);
    }
}
