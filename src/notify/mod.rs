//! Per-port state notifications.
//!
//! Each connected port gets one notifier task. The task listens to session
//! events and to permission changes for the port's origin, and pushes a
//! [`StateParams`] snapshot to the page after each one. Events are handled
//! one at a time, so a port sees snapshots in the order the changes
//! happened.
//!
//! Visibility rule: a page only learns an account address while the wallet
//! is unlocked and its origin holds a permission. Everyone else gets the
//! chain id and `accountAddress: null`.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::common::Subscription;
use crate::context::AppContext;
use crate::permissions::{Permission, normalize_address};
use crate::ports::Port;
use crate::rpc::{OutboundMessage, StateParams};
use crate::session::{SessionEvent, WalletStatus};

/// Snapshot for one origin.
///
/// With an unlocked wallet and a permission, the account is the globally
/// active one if granted, else the first granted account that still exists,
/// else `None`, and the chain is the permission's. Otherwise the chain is the
/// permission's or `internal_chain_id`, and there is no account.
pub fn state_params(
    permission: Option<&Permission>,
    status: WalletStatus,
    active_account: Option<&str>,
    accounts: &[String],
    internal_chain_id: u64,
) -> StateParams {
    match permission {
        Some(permission) if status.is_unlocked() => StateParams {
            chain_id: permission.chain_id,
            account_address: effective_account(permission, active_account, accounts),
        },
        Some(permission) => StateParams {
            chain_id: permission.chain_id,
            account_address: None,
        },
        None => StateParams {
            chain_id: internal_chain_id,
            account_address: None,
        },
    }
}

/// The account a permitted origin should see, lowercased.
pub fn effective_account(
    permission: &Permission,
    active_account: Option<&str>,
    accounts: &[String],
) -> Option<String> {
    if let Some(active) = active_account
        && permission.includes(active)
    {
        return Some(normalize_address(active));
    }
    permission
        .account_addresses
        .iter()
        .find(|granted| accounts.iter().any(|a| a.eq_ignore_ascii_case(granted)))
        .map(|a| normalize_address(a))
}

/// Granted accounts that still exist in `accounts`, lowercased, with the
/// [`effective_account`] first. Empty when none of them exist.
pub fn exposed_accounts(
    permission: &Permission,
    active_account: Option<&str>,
    accounts: &[String],
) -> Vec<String> {
    let Some(first) = effective_account(permission, active_account, accounts) else {
        return Vec::new();
    };

    let mut exposed = vec![first];
    for granted in &permission.account_addresses {
        let granted = normalize_address(granted);
        let exists = accounts.iter().any(|a| normalize_address(a) == granted);
        if exists && !exposed.contains(&granted) {
            exposed.push(granted);
        }
    }
    exposed
}

#[derive(Clone, Debug)]
enum PortEvent {
    Permission(Option<Permission>),
    Session(SessionEvent),
    /// Session events were missed; re-read everything.
    Resync,
}

/// Starts the notifier for `port` and returns the subscriptions that keep it
/// alive. Dropping them stops the task.
pub async fn spawn_port_notifier(
    ctx: Arc<AppContext>,
    port: Port,
    origin: String,
) -> Vec<Subscription> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PortEvent>();

    let permission_tx = tx.clone();
    let (initial, permission_sub) = match ctx
        .permissions
        .subscribe(&origin, move |perm| {
            let _ = permission_tx.send(PortEvent::Permission(perm));
        })
        .await
    {
        Ok((initial, sub)) => (initial, Some(sub)),
        Err(e) => {
            tracing::warn!(origin = %origin, error = %e, "Permission subscription failed");
            (None, None)
        }
    };

    let session_sub = forward_session_events(&ctx, tx);

    let task_sub = Subscription::new();
    let token = task_sub.token();
    let notify_on_connect = ctx.config.notify_on_connect;

    tokio::spawn(async move {
        let mut permission = initial;
        if notify_on_connect {
            push(&ctx, &port, permission.as_ref());
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let should_push = match event {
                PortEvent::Permission(updated) => {
                    permission = updated;
                    true
                }
                PortEvent::Session(SessionEvent::WalletStatus(_)) | PortEvent::Resync => {
                    permission = ctx.permissions.get_or_none(&origin).await;
                    true
                }
                PortEvent::Session(SessionEvent::ChainId(_)) => permission.is_none(),
                PortEvent::Session(SessionEvent::AccountAddress(_)) => permission.is_some(),
            };

            if should_push && !push(&ctx, &port, permission.as_ref()) {
                break;
            }
        }
        tracing::trace!(port_id = %port.id(), "Port notifier stopped");
    });

    let mut subs = vec![task_sub, session_sub];
    subs.extend(permission_sub);
    subs
}

fn forward_session_events(ctx: &AppContext, tx: mpsc::UnboundedSender<PortEvent>) -> Subscription {
    let mut events = ctx.session.subscribe();
    let subscription = Subscription::new();
    let token = subscription.token();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if tx.send(PortEvent::Session(event)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session event forwarder lagged");
                        if tx.send(PortEvent::Resync).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    subscription
}

/// Returns `false` once the port is closed.
fn push(ctx: &AppContext, port: &Port, permission: Option<&Permission>) -> bool {
    let session = &ctx.session;
    let active = session.account_address();
    let params = state_params(
        permission,
        session.wallet_status(),
        active.as_deref(),
        &session.accounts(),
        session.chain_id(),
    );
    tracing::trace!(port_id = %port.id(), ?params, "Pushing state");
    let sent = port.send(OutboundMessage::state(params));
    if sent {
        ctx.metrics.notifications_sent.inc();
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://dapp.example";
    const ADDR_A: &str = "0x00000000000000000000000000000000000000AA";
    const ADDR_B: &str = "0x00000000000000000000000000000000000000bb";
    const ADDR_C: &str = "0x00000000000000000000000000000000000000cc";

    fn accounts() -> Vec<String> {
        vec![ADDR_A.to_string(), ADDR_B.to_string()]
    }

    #[test]
    fn test_no_permission_never_reveals_account() {
        let params = state_params(None, WalletStatus::Unlocked, Some(ADDR_A), &accounts(), 56);
        assert_eq!(
            params,
            StateParams {
                chain_id: 56,
                account_address: None
            }
        );
    }

    #[test]
    fn test_locked_reports_permission_chain_only() {
        let perm = Permission::new(ORIGIN, 137, vec![ADDR_A.into()]);
        let params = state_params(Some(&perm), WalletStatus::Locked, Some(ADDR_A), &[], 1);
        assert_eq!(params.chain_id, 137);
        assert!(params.account_address.is_none());
    }

    #[test]
    fn test_prefers_active_account_lowercased() {
        let perm = Permission::new(ORIGIN, 1, vec![ADDR_B.into(), ADDR_A.into()]);
        let params = state_params(Some(&perm), WalletStatus::Unlocked, Some(ADDR_A), &accounts(), 56);
        assert_eq!(params.chain_id, 1);
        assert_eq!(params.account_address, Some(ADDR_A.to_lowercase()));
    }

    #[test]
    fn test_falls_back_to_first_existing_granted_account() {
        let perm = Permission::new(ORIGIN, 1, vec![ADDR_C.into(), ADDR_B.into()]);
        let params = state_params(Some(&perm), WalletStatus::Unlocked, Some(ADDR_A), &accounts(), 1);
        assert_eq!(params.account_address.as_deref(), Some(ADDR_B));
    }

    #[test]
    fn test_no_granted_account_exists() {
        let perm = Permission::new(ORIGIN, 1, vec![ADDR_C.into()]);
        let params = state_params(Some(&perm), WalletStatus::Unlocked, Some(ADDR_A), &accounts(), 1);
        assert!(params.account_address.is_none());
    }

    #[test]
    fn test_exposed_accounts_skip_missing() {
        let perm = Permission::new(ORIGIN, 1, vec![ADDR_C.into(), ADDR_B.into(), ADDR_A.into()]);
        assert_eq!(
            exposed_accounts(&perm, Some(ADDR_A), &accounts()),
            vec![ADDR_A.to_lowercase(), ADDR_B.to_lowercase()]
        );

        let gone = Permission::new(ORIGIN, 1, vec![ADDR_C.into()]);
        assert!(exposed_accounts(&gone, Some(ADDR_A), &accounts()).is_empty());
    }
}
