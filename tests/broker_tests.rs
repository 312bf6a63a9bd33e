//! Broker Tests
//!
//! End-to-end behaviour of the page server over in-memory storage and
//! channel-backed ports: approval lifecycle, auto-resolution, state
//! visibility, error boundary, and the read-only method surface.
//!
//! Run: cargo nextest run --test broker_tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use wallet_broker::approvals::{ApprovalKind, ApprovalPayload, PendingApproval};
use wallet_broker::config::{BrokerConfig, DisconnectPolicy};
use wallet_broker::permissions::{Permission, PermissionRepository};
use wallet_broker::ports::{Port, PortSender};
use wallet_broker::rpc::{JsonRpcRequest, JsonRpcResponse, OutboundMessage, StateParams, codes};
use wallet_broker::storage::{self, StorageExt, StoreError, StoreResult};
use wallet_broker::{AppContext, ChainRpc, PageServer, RpcError};

const TIMEOUT: Duration = Duration::from_secs(2);
const ORIGIN: &str = "https://dapp.example";
const ADDR_A: &str = "0xAbAbAbAbAbAbAbAbAbAbAbAbAbAbAbAbAbAbAbAb";
const ADDR_B: &str = "0xCdCdCdCdCdCdCdCdCdCdCdCdCdCdCdCdCdCdCdCd";
const ADDR_GONE: &str = "0xEfEfEfEfEfEfEfEfEfEfEfEfEfEfEfEfEfEfEfEf";

async fn start(ctx: Arc<AppContext>) -> PageServer {
    let server = PageServer::new(ctx).unwrap();
    server.start().await;
    server
}

async fn unlocked_server() -> PageServer {
    let server = start(AppContext::in_memory()).await;
    server
        .context()
        .session
        .unlock(vec![ADDR_A.to_string(), ADDR_B.to_string()])
        .await;
    server
}

/// Test double for one page context.
struct Page {
    port: Port,
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
    responses: VecDeque<JsonRpcResponse>,
    states: VecDeque<StateParams>,
}

impl Page {
    async fn open(server: &PageServer, url: &str) -> Self {
        let (port, rx) = Port::channel(PortSender::new(url));
        server.connect(port.clone()).await;
        Self {
            port,
            rx,
            responses: VecDeque::new(),
            states: VecDeque::new(),
        }
    }

    fn request(
        &self,
        server: &PageServer,
        id: u64,
        method: &str,
        params: Value,
    ) -> Option<JoinHandle<()>> {
        server.handle_message(&self.port, JsonRpcRequest::new(id, method, params))
    }

    async fn recv_one(&mut self) {
        let msg = tokio::time::timeout(TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("port closed");
        match msg {
            OutboundMessage::Response(r) => self.responses.push_back(r),
            OutboundMessage::State(n) => self.states.push_back(n.params),
        }
    }

    async fn next_response(&mut self) -> JsonRpcResponse {
        loop {
            if let Some(r) = self.responses.pop_front() {
                return r;
            }
            self.recv_one().await;
        }
    }

    async fn call(&mut self, server: &PageServer, method: &str, params: Value) -> JsonRpcResponse {
        self.request(server, 1, method, params);
        self.next_response().await
    }

    /// Waits for a state push satisfying `pred`, discarding earlier ones.
    async fn wait_state(&mut self, pred: impl Fn(&StateParams) -> bool) -> StateParams {
        loop {
            while let Some(state) = self.states.pop_front() {
                if pred(&state) {
                    return state;
                }
            }
            self.recv_one().await;
        }
    }

    /// Every state push received so far, including queued ones.
    async fn drain_states(&mut self) -> Vec<StateParams> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                OutboundMessage::Response(r) => self.responses.push_back(r),
                OutboundMessage::State(n) => self.states.push_back(n.params),
            }
        }
        self.states.drain(..).collect()
    }

    async fn drain_responses(&mut self) -> Vec<JsonRpcResponse> {
        self.drain_states().await;
        self.responses.drain(..).collect()
    }
}

async fn wait_pending(server: &PageServer, count: usize) -> Vec<PendingApproval> {
    let mut rx = server.controller().subscribe();
    let pending = tokio::time::timeout(TIMEOUT, rx.wait_for(|p| p.len() >= count))
        .await
        .expect("timed out waiting for pending approvals")
        .expect("queue closed")
        .clone();
    pending
}

fn result(response: &JsonRpcResponse) -> &Value {
    response
        .reply
        .result()
        .unwrap_or_else(|| panic!("expected result, got {:?}", response.reply))
}

fn error_code(response: &JsonRpcResponse) -> i64 {
    response
        .reply
        .error()
        .unwrap_or_else(|| panic!("expected error, got {:?}", response.reply))
        .code
}

// =============================================================================
// Approval lifecycle
// =============================================================================

mod approval_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_resolve_replies_exactly_once() {
        let server = start(AppContext::in_memory()).await;
        let mut page = Page::open(&server, "https://dapp.example/app").await;

        page.request(&server, 7, "eth_requestAccounts", json!([]));
        let pending = wait_pending(&server, 1).await;
        let id = pending[0].id.clone();

        server.controller().approve(&id, json!(["0x01"])).unwrap();
        assert!(server.controller().approve(&id, json!(["0x02"])).is_err());
        assert!(server.controller().decline(&id).is_err());

        let response = page.next_response().await;
        assert_eq!(response.id, json!(7));
        assert_eq!(result(&response), &json!(["0x01"]));
        assert!(page.drain_responses().await.is_empty());
        assert_eq!(server.context().metrics.approvals_stale.get(), 2);
    }

    #[tokio::test]
    async fn test_decline_is_user_rejection() {
        let server = start(AppContext::in_memory()).await;
        let mut page = Page::open(&server, "https://dapp.example/").await;

        page.request(&server, 1, "wallet_requestPermissions", json!([{"eth_accounts": {}}]));
        let pending = wait_pending(&server, 1).await;
        assert_eq!(pending[0].kind, ApprovalKind::Connection);
        assert!(!pending[0].return_selected_account);
        assert_eq!(
            pending[0].payload,
            ApprovalPayload::Connection {
                requested_permissions: Some(json!({"eth_accounts": {}}))
            }
        );

        server.controller().decline(&pending[0].id).unwrap();
        assert_eq!(error_code(&page.next_response().await), codes::USER_REJECTED);
    }

    #[tokio::test]
    async fn test_pending_set_is_ordered_and_observable() {
        let server = unlocked_server().await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_A.into()])
            .await
            .unwrap();
        let page = Page::open(&server, "https://dapp.example/").await;
        let other = Page::open(&server, "https://other.example/").await;

        page.request(&server, 1, "personal_sign", json!(["0xdead", ADDR_A]));
        wait_pending(&server, 1).await;
        other.request(&server, 2, "eth_requestAccounts", json!([]));
        let pending = wait_pending(&server, 2).await;

        assert_eq!(pending[0].kind, ApprovalKind::Signing);
        assert_eq!(pending[0].origin, ORIGIN);
        assert_eq!(pending[0].source.url, "https://dapp.example/");
        assert_eq!(pending[1].kind, ApprovalKind::Connection);
        assert_eq!(pending[1].origin, "https://other.example");
    }

    #[tokio::test]
    async fn test_dead_port_keeps_approval_by_default() {
        let server = unlocked_server().await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_A.into()])
            .await
            .unwrap();
        let page = Page::open(&server, "https://dapp.example/").await;

        let handle = page
            .request(&server, 1, "personal_sign", json!(["0xdead", ADDR_A]))
            .unwrap();
        let pending = wait_pending(&server, 1).await;

        server.disconnect(page.port.id());
        drop(page);
        assert_eq!(server.context().approvals.len(), 1);

        server.controller().approve(&pending[0].id, json!("0xsig")).unwrap();
        tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_policy_rejects_on_disconnect() {
        let config = BrokerConfig {
            pending_on_disconnect: DisconnectPolicy::Cancel,
            ..Default::default()
        };
        let server = start(AppContext::builder().config(config).build()).await;
        server
            .context()
            .session
            .unlock(vec![ADDR_A.to_string()])
            .await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_A.into()])
            .await
            .unwrap();
        let mut page = Page::open(&server, "https://dapp.example/").await;
        let stays = Page::open(&server, "https://dapp.example/other").await;

        page.request(&server, 1, "personal_sign", json!(["0xdead", ADDR_A]));
        wait_pending(&server, 1).await;
        stays.request(&server, 2, "personal_sign", json!(["0xbeef", ADDR_A]));
        wait_pending(&server, 2).await;

        server.disconnect(page.port.id());
        assert_eq!(error_code(&page.next_response().await), codes::DISCONNECTED);

        let remaining = server.context().approvals.pending();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source.port_id, Some(stays.port.id()));
    }
}

// =============================================================================
// Auto-resolution
// =============================================================================

mod auto_resolution {
    use super::*;

    #[tokio::test]
    async fn test_grant_via_other_path_resolves_pending_connection() {
        let server = unlocked_server().await;
        let mut page = Page::open(&server, "https://dapp.example/").await;

        page.request(&server, 1, "eth_requestAccounts", json!([]));
        wait_pending(&server, 1).await;

        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_B.into()])
            .await
            .unwrap();

        let response = page.next_response().await;
        assert_eq!(result(&response), &json!([ADDR_B.to_lowercase()]));
        assert!(server.context().approvals.is_empty());
        assert_eq!(server.context().metrics.approvals_auto_resolved.get(), 1);
    }

    #[tokio::test]
    async fn test_second_tab_resolves_without_second_prompt() {
        let server = unlocked_server().await;
        let mut tab_a = Page::open(&server, "https://dapp.example/a").await;
        let mut tab_b = Page::open(&server, "https://dapp.example/b").await;

        tab_a.request(&server, 1, "eth_requestAccounts", json!([]));
        tab_b.request(&server, 2, "eth_requestAccounts", json!([]));
        let pending = wait_pending(&server, 2).await;
        let a_id = pending
            .iter()
            .find(|p| p.source.port_id == Some(tab_a.port.id()))
            .map(|p| p.id.clone())
            .unwrap();

        server
            .controller()
            .grant_connection(&a_id, vec![ADDR_A.into()], 1)
            .await
            .unwrap();

        let a = tab_a.next_response().await;
        let b = tab_b.next_response().await;
        assert_eq!(result(&a), &json!([ADDR_A.to_lowercase()]));
        assert_eq!(result(&a), result(&b));
        assert!(server.context().approvals.is_empty());
    }

    #[tokio::test]
    async fn test_stale_grant_does_not_answer_account_request() {
        let server = unlocked_server().await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_GONE.into()])
            .await
            .unwrap();
        let mut page = Page::open(&server, "https://dapp.example/").await;

        let accounts = page.call(&server, "eth_accounts", json!([])).await;
        assert_eq!(result(&accounts), &json!([]));

        page.request(&server, 2, "eth_requestAccounts", json!([]));
        let pending = wait_pending(&server, 1).await;
        assert!(pending[0].return_selected_account);
        assert!(page.drain_responses().await.is_empty());
        assert_eq!(server.context().approvals.len(), 1);

        server
            .controller()
            .grant_connection(&pending[0].id, vec![ADDR_A.into()], 1)
            .await
            .unwrap();
        let response = page.next_response().await;
        assert_eq!(response.id, json!(2));
        assert_eq!(result(&response), &json!([ADDR_A.to_lowercase()]));
    }

    #[tokio::test]
    async fn test_locked_request_resolves_on_unlock() {
        let server = start(AppContext::in_memory()).await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_A.into()])
            .await
            .unwrap();
        let mut page = Page::open(&server, "https://dapp.example/").await;

        page.request(&server, 1, "eth_requestAccounts", json!([]));
        wait_pending(&server, 1).await;

        server.context().session.unlock(vec![ADDR_A.to_string()]).await;
        let response = page.next_response().await;
        assert_eq!(result(&response), &json!([ADDR_A.to_lowercase()]));
    }

    #[tokio::test]
    async fn test_permitted_unlocked_origin_answers_immediately() {
        let server = unlocked_server().await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_B.into(), ADDR_A.into()])
            .await
            .unwrap();
        let mut page = Page::open(&server, "https://dapp.example/").await;

        let response = page.call(&server, "eth_requestAccounts", json!([])).await;
        assert_eq!(
            result(&response),
            &json!([ADDR_A.to_lowercase(), ADDR_B.to_lowercase()])
        );

        let response = page.call(&server, "wallet_requestPermissions", json!([])).await;
        assert_eq!(result(&response)[0]["invoker"], ORIGIN);
        assert_eq!(server.context().metrics.approvals_enqueued.get(), 0);
    }
}

// =============================================================================
// Scenarios
// =============================================================================

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn test_connect_approve_then_notify() {
        let server = unlocked_server().await;
        let mut page = Page::open(&server, "https://dapp.example/index.html").await;
        assert!(
            server
                .context()
                .permissions
                .get_permission(ORIGIN)
                .await
                .unwrap()
                .is_none()
        );

        page.request(&server, 1, "eth_requestAccounts", json!([]));
        let pending = wait_pending(&server, 1).await;
        assert_eq!(pending[0].kind, ApprovalKind::Connection);
        assert_eq!(pending[0].origin, ORIGIN);

        server
            .controller()
            .grant_connection(&pending[0].id, vec![ADDR_A.into()], 1)
            .await
            .unwrap();

        let stored = server
            .context()
            .permissions
            .get_permission(ORIGIN)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.origin, ORIGIN);
        assert_eq!(stored.chain_id, 1);
        assert_eq!(stored.account_addresses, vec![ADDR_A.to_string()]);

        assert_eq!(result(&page.next_response().await), &json!([ADDR_A.to_lowercase()]));

        let state = page
            .wait_state(|s| s.account_address.is_some())
            .await;
        assert_eq!(
            state,
            StateParams {
                chain_id: 1,
                account_address: Some(ADDR_A.to_lowercase()),
            }
        );
    }

    #[tokio::test]
    async fn test_switch_chain_flow() {
        let server = unlocked_server().await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_A.into()])
            .await
            .unwrap();
        let mut page = Page::open(&server, "https://dapp.example/").await;

        let same = page
            .call(&server, "wallet_switchEthereumChain", json!([{"chainId": "0x1"}]))
            .await;
        assert_eq!(result(&same), &Value::Null);

        let unknown = page
            .call(&server, "wallet_switchEthereumChain", json!([{"chainId": "0x539"}]))
            .await;
        assert_eq!(error_code(&unknown), codes::UNRECOGNIZED_CHAIN);

        page.request(&server, 2, "wallet_switchEthereumChain", json!([{"chainId": "0x89"}]));
        let pending = wait_pending(&server, 1).await;
        assert_eq!(pending[0].payload, ApprovalPayload::SwitchChain { chain_id: 137 });

        server
            .controller()
            .approve_permission_change(&pending[0].id)
            .await
            .unwrap();
        assert_eq!(result(&page.next_response().await), &Value::Null);
        page.wait_state(|s| s.chain_id == 137).await;

        let chain = page.call(&server, "eth_chainId", json!([])).await;
        assert_eq!(result(&chain), &json!("0x89"));
    }

    #[tokio::test]
    async fn test_add_chain_flow() {
        let server = unlocked_server().await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_A.into()])
            .await
            .unwrap();
        let mut page = Page::open(&server, "https://dapp.example/").await;

        page.request(
            &server,
            1,
            "wallet_addEthereumChain",
            json!([{
                "chainId": "0xa",
                "chainName": "Optimism",
                "rpcUrls": ["https://mainnet.optimism.io"],
                "nativeCurrency": {"name": "Ether", "symbol": "ETH", "decimals": 18}
            }]),
        );
        let pending = wait_pending(&server, 1).await;
        assert!(matches!(pending[0].payload, ApprovalPayload::AddNetwork { .. }));

        server
            .controller()
            .approve_permission_change(&pending[0].id)
            .await
            .unwrap();
        assert_eq!(result(&page.next_response().await), &Value::Null);
        assert!(server.context().networks.contains(10));
        let stored = server.context().permissions.get_or_none(ORIGIN).await.unwrap();
        assert_eq!(stored.chain_id, 10);
    }

    #[tokio::test]
    async fn test_revoke_rejects_authorized_requests() {
        let server = unlocked_server().await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_A.into()])
            .await
            .unwrap();
        let mut signer = Page::open(&server, "https://dapp.example/sign").await;
        let mut revoker = Page::open(&server, "https://dapp.example/settings").await;

        signer.request(&server, 1, "eth_sendTransaction", json!([{"from": ADDR_A, "to": ADDR_B}]));
        let pending = wait_pending(&server, 1).await;
        assert_eq!(pending[0].payload, ApprovalPayload::Transaction {
            chain_id: 1,
            tx: json!({"from": ADDR_A, "to": ADDR_B}),
        });

        let revoked = revoker
            .call(&server, "wallet_revokePermissions", json!([{"eth_accounts": {}}]))
            .await;
        assert_eq!(result(&revoked), &Value::Null);
        assert_eq!(error_code(&signer.next_response().await), codes::UNAUTHORIZED);
        assert!(server.context().permissions.get_or_none(ORIGIN).await.is_none());

        let state = revoker.wait_state(|s| s.account_address.is_none()).await;
        assert_eq!(state.chain_id, 1);
    }
}

// =============================================================================
// State visibility
// =============================================================================

mod state_visibility {
    use super::*;

    #[tokio::test]
    async fn test_unpermitted_origin_never_sees_account() {
        let server = unlocked_server().await;
        let mut page = Page::open(&server, "https://stranger.example/").await;

        server.context().session.set_account_address(ADDR_B).await.unwrap();
        server.context().session.set_chain_id(56).await.unwrap();
        page.wait_state(|s| s.chain_id == 56).await;
        server.context().session.lock().await;
        server.context().session.unlock(vec![ADDR_A.to_string()]).await;

        let states = page.drain_states().await;
        assert!(states.iter().all(|s| s.account_address.is_none()));

        let accounts = page.call(&server, "eth_accounts", json!([])).await;
        assert_eq!(result(&accounts), &json!([]));
        let permissions = page.call(&server, "wallet_getPermissions", json!([])).await;
        assert_eq!(result(&permissions), &json!([]));
    }

    #[tokio::test]
    async fn test_permitted_origin_sees_active_account_lowercased() {
        let server = unlocked_server().await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 137, vec![ADDR_A.into(), ADDR_B.into()])
            .await
            .unwrap();
        let mut page = Page::open(&server, "https://dapp.example/").await;

        server.context().session.set_account_address(ADDR_B).await.unwrap();
        let state = page
            .wait_state(|s| s.account_address.as_deref() == Some(&ADDR_B.to_lowercase()))
            .await;
        assert_eq!(state.chain_id, 137);

        let accounts = page.call(&server, "eth_accounts", json!([])).await;
        assert_eq!(result(&accounts)[0], json!(ADDR_B.to_lowercase()));
    }

    #[tokio::test]
    async fn test_lock_hides_account() {
        let server = unlocked_server().await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_A.into()])
            .await
            .unwrap();
        let mut page = Page::open(&server, "https://dapp.example/").await;
        page.wait_state(|s| s.account_address.is_some()).await;

        server.context().session.lock().await;
        let state = page.wait_state(|s| s.account_address.is_none()).await;
        assert_eq!(state.chain_id, 1);

        let accounts = page.call(&server, "eth_accounts", json!([])).await;
        assert_eq!(result(&accounts), &json!([]));
    }

    #[tokio::test]
    async fn test_storage_writes_are_mirrored() {
        let server = start(AppContext::in_memory()).await;
        let mut page = Page::open(&server, "https://dapp.example/").await;

        server
            .context()
            .storage
            .put(storage::CHAIN_ID, &250u64)
            .await
            .unwrap();
        page.wait_state(|s| s.chain_id == 250).await;
        assert_eq!(server.context().session.chain_id(), 250);

        let version = page.call(&server, "net_version", json!([])).await;
        assert_eq!(result(&version), &json!("250"));
    }

    #[tokio::test]
    async fn test_restore_falls_back_on_unknown_chain() {
        let ctx = AppContext::in_memory();
        ctx.storage.put(storage::CHAIN_ID, &999_999u64).await.unwrap();
        let server = start(ctx).await;
        assert_eq!(server.context().session.chain_id(), 1);
    }
}

// =============================================================================
// Error boundary
// =============================================================================

mod error_boundary {
    use super::*;

    struct BrokenRepository {
        changes: broadcast::Sender<String>,
    }

    #[async_trait::async_trait]
    impl PermissionRepository for BrokenRepository {
        fn name(&self) -> &str {
            "broken"
        }

        async fn get(&self, _origin: &str) -> StoreResult<Option<Permission>> {
            Err(StoreError::backend("disk on fire at /var/lib/wallet"))
        }

        async fn put(&self, _permission: Permission) -> StoreResult<()> {
            Err(StoreError::backend("read-only"))
        }

        async fn delete(&self, _origin: &str) -> StoreResult<bool> {
            Ok(false)
        }

        async fn all(&self) -> StoreResult<Vec<Permission>> {
            Ok(Vec::new())
        }

        fn changes(&self) -> broadcast::Receiver<String> {
            self.changes.subscribe()
        }
    }

    struct PanickingChain;

    #[async_trait::async_trait]
    impl ChainRpc for PanickingChain {
        async fn request(
            &self,
            _chain_id: u64,
            _rpc_url: Option<&str>,
            _method: &str,
            _params: Value,
        ) -> Result<Value, RpcError> {
            panic!("node client state corrupted at 0x7fff");
        }
    }

    #[tokio::test]
    async fn test_missing_sender_url_never_reaches_queue() {
        let server = start(AppContext::in_memory()).await;
        for sender in [PortSender::default(), PortSender::new("not a url"), PortSender::new("data:text/html,hi")] {
            let (port, mut rx) = Port::channel(sender);
            assert!(server.connect(port.clone()).await.is_none());

            let handle = server.handle_message(
                &port,
                JsonRpcRequest::new(3, "eth_requestAccounts", json!([])),
            );
            assert!(handle.is_none());

            let msg = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
            let response = msg.as_response().unwrap();
            assert_eq!(response.id, json!(3));
            assert_eq!(error_code(response), codes::RESOURCE_NOT_FOUND);
        }
        assert!(server.context().approvals.is_empty());
        assert_eq!(server.context().metrics.approvals_enqueued.get(), 0);
    }

    #[tokio::test]
    async fn test_internal_failure_is_generic() {
        let (changes, _) = broadcast::channel(16);
        let ctx = AppContext::builder()
            .permission_repository(Arc::new(BrokenRepository { changes }))
            .build();
        let server = start(ctx).await;
        let mut page = Page::open(&server, "https://dapp.example/").await;

        let response = page.call(&server, "eth_accounts", json!([])).await;
        let error = response.reply.error().unwrap();
        assert_eq!(error, &RpcError::internal());
        let wire = serde_json::to_string(&response).unwrap();
        assert!(!wire.contains("disk on fire"));
        assert_eq!(server.context().metrics.requests_failed.get(), 1);
    }

    #[tokio::test]
    async fn test_handler_panic_is_generic_internal_error() {
        let ctx = AppContext::builder().chain_rpc(Arc::new(PanickingChain)).build();
        let server = start(ctx).await;
        let mut page = Page::open(&server, "https://dapp.example/").await;

        let response = page.call(&server, "eth_blockNumber", json!([])).await;
        assert_eq!(response.reply.error(), Some(&RpcError::internal()));
        let wire = serde_json::to_string(&response).unwrap();
        assert!(!wire.contains("corrupted"));
        assert_eq!(server.context().metrics.requests_failed.get(), 1);

        let chain = page.call(&server, "eth_chainId", json!([])).await;
        assert_eq!(result(&chain), &json!("0x1"));
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let server = unlocked_server().await;
        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_A.into()])
            .await
            .unwrap();
        let mut page = Page::open(&server, "https://dapp.example/").await;

        let missing = page.call(&server, "wallet_switchEthereumChain", json!([])).await;
        assert_eq!(error_code(&missing), codes::INVALID_PARAMS);

        let bad = page
            .call(&server, "wallet_switchEthereumChain", json!([{"chainId": "0xzz"}]))
            .await;
        assert_eq!(error_code(&bad), codes::INVALID_PARAMS);

        let no_from = page.call(&server, "eth_sendTransaction", json!([{"to": ADDR_B}])).await;
        assert_eq!(error_code(&no_from), codes::INVALID_PARAMS);

        let bad_from = page
            .call(&server, "eth_sendTransaction", json!([{"from": "0x1234", "to": ADDR_B}]))
            .await;
        assert_eq!(error_code(&bad_from), codes::INVALID_PARAMS);
        assert!(server.context().approvals.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_requests() {
        let server = unlocked_server().await;
        let mut page = Page::open(&server, "https://dapp.example/").await;

        let sign = page.call(&server, "personal_sign", json!(["0xdead", ADDR_A])).await;
        assert_eq!(error_code(&sign), codes::UNAUTHORIZED);

        server
            .context()
            .permissions
            .grant(ORIGIN, 1, vec![ADDR_A.into()])
            .await
            .unwrap();
        let wrong_signer = page
            .call(&server, "eth_signTypedData_v4", json!([ADDR_B, "{}"]))
            .await;
        assert_eq!(error_code(&wrong_signer), codes::UNAUTHORIZED);
        assert!(server.context().approvals.is_empty());
    }
}

// =============================================================================
// Read-only surface
// =============================================================================

mod read_only {
    use super::*;

    #[derive(Default)]
    struct RecordingChain {
        calls: Mutex<Vec<(u64, Option<String>, String)>>,
    }

    #[async_trait::async_trait]
    impl ChainRpc for RecordingChain {
        async fn request(
            &self,
            chain_id: u64,
            rpc_url: Option<&str>,
            method: &str,
            _params: Value,
        ) -> Result<Value, RpcError> {
            self.calls.lock().unwrap().push((
                chain_id,
                rpc_url.map(str::to_string),
                method.to_string(),
            ));
            Ok(json!("0x10"))
        }
    }

    #[tokio::test]
    async fn test_chain_id_and_net_version() {
        let server = start(AppContext::in_memory()).await;
        let mut page = Page::open(&server, "https://dapp.example/").await;

        let chain = page.call(&server, "eth_chainId", json!([])).await;
        assert_eq!(result(&chain), &json!("0x1"));
        let version = page.call(&server, "net_version", json!([])).await;
        assert_eq!(result(&version), &json!("1"));
    }

    #[tokio::test]
    async fn test_forwarding_uses_override_url() {
        let chain = Arc::new(RecordingChain::default());
        let ctx = AppContext::builder().chain_rpc(chain.clone()).build();
        ctx.networks
            .set_rpc_url(1, Some("https://rpc.example/custom"))
            .await
            .unwrap();
        let server = start(ctx).await;
        let mut page = Page::open(&server, "https://dapp.example/").await;

        let block = page.call(&server, "eth_blockNumber", json!([])).await;
        assert_eq!(result(&block), &json!("0x10"));

        let calls = chain.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![(1, Some("https://rpc.example/custom".to_string()), "eth_blockNumber".to_string())]
        );
    }

    #[tokio::test]
    async fn test_forwarding_without_chain_rpc() {
        let server = start(AppContext::in_memory()).await;
        let mut page = Page::open(&server, "https://dapp.example/").await;

        let response = page.call(&server, "eth_getBalance", json!([ADDR_A, "latest"])).await;
        assert_eq!(error_code(&response), codes::UNSUPPORTED_METHOD);

        let unknown = page.call(&server, "eth_mine", json!([])).await;
        assert_eq!(error_code(&unknown), codes::METHOD_NOT_FOUND);
    }
}
