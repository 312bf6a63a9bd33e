//! Process-wide wallet session: lock status, active chain, active account.
//!
//! Each value lives in its own [`StateCell`] and can be observed on its own.
//! [`SessionState::subscribe`] additionally yields a single ordered stream of
//! [`SessionEvent`]s, which is what per-port notifiers listen to.
//!
//! Chain id and account address are persisted under
//! [`storage::CHAIN_ID`](crate::storage::CHAIN_ID) and
//! [`storage::ACCOUNT_ADDRESS`](crate::storage::ACCOUNT_ADDRESS). Lock status
//! is memory only.

mod cell;

pub use cell::StateCell;

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};

use crate::common::Subscription;
use crate::networks::NetworkRegistry;
use crate::permissions::normalize_address;
use crate::storage::{self, Storage, StorageExt, StoreError};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    #[default]
    Locked,
    Unlocked,
}

impl WalletStatus {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    WalletStatus(WalletStatus),
    ChainId(u64),
    AccountAddress(Option<String>),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unknown chain: {0}")]
    UnknownChain(u64),

    #[error("Wallet is locked")]
    Locked,

    #[error("Account is not unlocked: {0}")]
    UnknownAccount(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

pub struct SessionState {
    wallet_status: StateCell<WalletStatus>,
    chain_id: StateCell<u64>,
    account_address: StateCell<Option<String>>,
    accounts: RwLock<Vec<String>>,
    events: broadcast::Sender<SessionEvent>,
    writer: Mutex<()>,
    storage: Arc<dyn Storage>,
    networks: Arc<NetworkRegistry>,
    default_chain_id: u64,
}

impl SessionState {
    pub fn new(
        storage: Arc<dyn Storage>,
        networks: Arc<NetworkRegistry>,
        default_chain_id: u64,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            wallet_status: StateCell::new(WalletStatus::Locked),
            chain_id: StateCell::new(default_chain_id),
            account_address: StateCell::new(None),
            accounts: RwLock::new(Vec::new()),
            events,
            writer: Mutex::new(()),
            storage,
            networks,
            default_chain_id,
        }
    }

    pub fn wallet_status(&self) -> WalletStatus {
        self.wallet_status.get()
    }

    pub fn is_unlocked(&self) -> bool {
        self.wallet_status.get().is_unlocked()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id.get()
    }

    pub fn account_address(&self) -> Option<String> {
        self.account_address.get()
    }

    /// Addresses of the currently unlocked accounts. Empty while locked.
    pub fn accounts(&self) -> Vec<String> {
        self.accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn default_chain_id(&self) -> u64 {
        self.default_chain_id
    }

    pub fn wallet_status_cell(&self) -> &StateCell<WalletStatus> {
        &self.wallet_status
    }

    pub fn chain_id_cell(&self) -> &StateCell<u64> {
        &self.chain_id
    }

    pub fn account_address_cell(&self) -> &StateCell<Option<String>> {
        &self.account_address
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Loads the persisted chain into the chain cell. Call once at startup.
    pub async fn restore(&self) {
        let chain_id = self.load_chain_id().await;
        let _guard = self.writer.lock().await;
        self.publish_chain_id(chain_id);
    }

    /// Persisted chain id, or the default when unset, unreadable or no longer
    /// a known network.
    pub async fn load_chain_id(&self) -> u64 {
        match self.storage.fetch::<u64>(storage::CHAIN_ID).await {
            Ok(Some(chain_id)) if self.networks.contains(chain_id) => chain_id,
            Ok(Some(chain_id)) => {
                tracing::warn!(chain_id, "Persisted chain is unknown, using default");
                self.default_chain_id
            }
            Ok(None) => self.default_chain_id,
            Err(e) => {
                tracing::warn!(error = %e, "Chain id read failed, using default");
                self.default_chain_id
            }
        }
    }

    /// Persisted account if it belongs to the unlocked set, otherwise the
    /// first unlocked account. `None` while locked.
    pub async fn load_account_address(&self) -> Option<String> {
        let accounts = self.accounts();
        if accounts.is_empty() {
            return None;
        }
        let persisted = match self.storage.fetch::<String>(storage::ACCOUNT_ADDRESS).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Account address read failed");
                None
            }
        };
        persisted
            .and_then(|address| find_account(&accounts, &address))
            .or_else(|| accounts.first().cloned())
    }

    /// Unlocks the wallet with the given account set and restores the active
    /// account. Emits a single [`SessionEvent::WalletStatus`].
    pub async fn unlock(&self, accounts: Vec<String>) {
        let _guard = self.writer.lock().await;
        *self.accounts.write().unwrap_or_else(|e| e.into_inner()) = accounts;
        let active = self.load_account_address().await;
        self.account_address.set(active);
        if self.wallet_status.set(WalletStatus::Unlocked) {
            tracing::info!(accounts = self.accounts().len(), "Wallet unlocked");
            let _ = self
                .events
                .send(SessionEvent::WalletStatus(WalletStatus::Unlocked));
        }
    }

    /// Locks the wallet. The persisted account is kept for the next unlock.
    pub async fn lock(&self) {
        let _guard = self.writer.lock().await;
        self.accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.account_address.set(None);
        if self.wallet_status.set(WalletStatus::Locked) {
            tracing::info!("Wallet locked");
            let _ = self
                .events
                .send(SessionEvent::WalletStatus(WalletStatus::Locked));
        }
    }

    pub async fn set_chain_id(&self, chain_id: u64) -> SessionResult<()> {
        if !self.networks.contains(chain_id) {
            return Err(SessionError::UnknownChain(chain_id));
        }
        let _guard = self.writer.lock().await;
        self.storage.put(storage::CHAIN_ID, &chain_id).await?;
        self.publish_chain_id(chain_id);
        Ok(())
    }

    /// Switches the active account. The address must be one of the unlocked
    /// accounts.
    pub async fn set_account_address(&self, address: &str) -> SessionResult<()> {
        if !self.is_unlocked() {
            return Err(SessionError::Locked);
        }
        let account = find_account(&self.accounts(), address)
            .ok_or_else(|| SessionError::UnknownAccount(address.to_string()))?;

        let _guard = self.writer.lock().await;
        self.storage.put(storage::ACCOUNT_ADDRESS, &account).await?;
        self.publish_account(Some(account));
        Ok(())
    }

    /// Replaces the unlocked account set, e.g. after an account is added or
    /// removed. Falls back to the first account if the active one is gone.
    pub async fn set_accounts(&self, accounts: Vec<String>) -> SessionResult<()> {
        if !self.is_unlocked() {
            return Err(SessionError::Locked);
        }
        let _guard = self.writer.lock().await;
        let active = self
            .account_address()
            .and_then(|a| find_account(&accounts, &a))
            .or_else(|| accounts.first().cloned());
        *self.accounts.write().unwrap_or_else(|e| e.into_inner()) = accounts;
        self.publish_account(active);
        Ok(())
    }

    /// Mirrors writes to the persisted chain and account keys made by other
    /// contexts into the cells.
    pub fn watch_storage(self: &Arc<Self>) -> Subscription {
        let mut rx = self.storage.subscribe();
        let subscription = Subscription::new();
        let token = subscription.token();
        let state = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = token.cancelled() => break,
                    change = rx.recv() => change,
                };
                let change = match change {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session storage mirror lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(state) = state.upgrade() else {
                    break;
                };

                match change.key.as_str() {
                    storage::CHAIN_ID => {
                        let chain_id = state.load_chain_id().await;
                        let _guard = state.writer.lock().await;
                        state.publish_chain_id(chain_id);
                    }
                    storage::ACCOUNT_ADDRESS => {
                        if !state.is_unlocked() {
                            continue;
                        }
                        let account = state.load_account_address().await;
                        let _guard = state.writer.lock().await;
                        state.publish_account(account);
                    }
                    _ => {}
                }
            }
        });

        subscription
    }

    fn publish_chain_id(&self, chain_id: u64) {
        if self.chain_id.set(chain_id) {
            tracing::debug!(chain_id, "Active chain changed");
            let _ = self.events.send(SessionEvent::ChainId(chain_id));
        }
    }

    fn publish_account(&self, account: Option<String>) {
        if self.account_address.set(account.clone()) {
            tracing::debug!(account = ?account, "Active account changed");
            let _ = self.events.send(SessionEvent::AccountAddress(account));
        }
    }
}

fn find_account(accounts: &[String], address: &str) -> Option<String> {
    let wanted = normalize_address(address);
    accounts
        .iter()
        .find(|a| normalize_address(a) == wanted)
        .cloned()
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("wallet_status", &self.wallet_status())
            .field("chain_id", &self.chain_id())
            .field("account_address", &self.account_address())
            .finish()
    }
}
