//! Built-in Action Executors
//!
//! - [`NotificationExecutor`]: email notifications (`email` / `notification`)
//! - [`AssetTransferExecutor`]: asset transfers (`send-sol` / `asset-transfer`)
//!
//! Both de-duplicate on the stage's idempotency key, so a redelivered stage
//! does not notify or transfer twice within the same process. Only the most
//! recent keys are remembered (see [`RecentKeys`]).

use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, info};

use super::executor::{required_param, ActionExecutor, ExecutionContext, ExecutorError};
use crate::workflow::{ActionKind, RecentKeys, RenderedParams, DEFAULT_LEDGER_CAPACITY};

/// A delivered notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub to: String,
    pub body: String,
}

/// Sends notifications rendered from `email` and `body` parameters.
#[derive(Debug)]
pub struct NotificationExecutor {
    sent: Mutex<RecentKeys<Notification>>,
}

impl Default for NotificationExecutor {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }
}

impl NotificationExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers the last `capacity` notifications for de-duplication.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sent: Mutex::new(RecentKeys::new(capacity)),
        }
    }

    /// Recently sent notifications, oldest first.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.iter().map(|(_, n)| n.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActionExecutor for NotificationExecutor {
    fn kind(&self) -> ActionKind {
        ActionKind::Notification
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &RenderedParams,
    ) -> Result<(), ExecutorError> {
        let to = required_param(params, "email")?;
        let body = required_param(params, "body")?;

        if !to.contains('@') {
            return Err(ExecutorError::InvalidParam {
                param: "email".to_string(),
                reason: format!("'{}' is not an email address", to),
            });
        }

        let mut sent = self
            .sent
            .lock()
            .map_err(|_| ExecutorError::Failed("notification outbox poisoned".to_string()))?;

        if sent.contains(&ctx.idempotency_key) {
            debug!("Notification {} already sent", ctx.idempotency_key);
            return Ok(());
        }

        info!("Sending out email to {} body is {}", to, body);
        sent.insert(
            ctx.idempotency_key.clone(),
            Notification {
                to: to.to_string(),
                body: body.to_string(),
            },
        );
        Ok(())
    }
}

/// A submitted transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub address: String,
    pub amount: f64,
}

/// Transfers `amount` of an asset to `address`.
#[derive(Debug)]
pub struct AssetTransferExecutor {
    submitted: Mutex<RecentKeys<Transfer>>,
}

impl Default for AssetTransferExecutor {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }
}

impl AssetTransferExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            submitted: Mutex::new(RecentKeys::new(capacity)),
        }
    }

    pub fn submitted(&self) -> Vec<Transfer> {
        self.submitted
            .lock()
            .map(|submitted| submitted.iter().map(|(_, t)| t.clone()).collect())
            .unwrap_or_default()
    }
}

/// Parses a strictly positive, finite amount.
fn parse_amount(raw: &str) -> Result<f64, ExecutorError> {
    let invalid = |reason: &str| ExecutorError::InvalidParam {
        param: "amount".to_string(),
        reason: format!("'{}' {}", raw, reason),
    };

    let amount: f64 = raw.parse().map_err(|_| invalid("is not a number"))?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(invalid("must be a positive amount"));
    }
    Ok(amount)
}

#[async_trait]
impl ActionExecutor for AssetTransferExecutor {
    fn kind(&self) -> ActionKind {
        ActionKind::AssetTransfer
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &RenderedParams,
    ) -> Result<(), ExecutorError> {
        let address = required_param(params, "address")?;
        let amount = parse_amount(required_param(params, "amount")?)?;

        let mut submitted = self
            .submitted
            .lock()
            .map_err(|_| ExecutorError::Failed("transfer ledger poisoned".to_string()))?;

        if submitted.contains(&ctx.idempotency_key) {
            debug!("Transfer {} already submitted", ctx.idempotency_key);
            return Ok(());
        }

        info!("Sending out {} to address {}", amount, address);
        submitted.insert(
            ctx.idempotency_key.clone(),
            Transfer {
                address: address.to_string(),
                amount,
            },
        );
        Ok(())
    }
}
