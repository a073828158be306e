// src/bot/delivery.rs

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, error};

/// A message addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// `*...*` in `text` is emphasis markup for the messenger.
    /// `approval_for` attaches accept/decline buttons for that user id.
    Text {
        to: String,
        text: String,
        approval_for: Option<String>,
    },
    Document { to: String, path: PathBuf },
}

impl Outgoing {
    pub fn text(to: impl Into<String>, text: impl Into<String>) -> Self {
        Outgoing::Text {
            to: to.into(),
            text: text.into(),
            approval_for: None,
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Outgoing::Text { to, .. } | Outgoing::Document { to, .. } => to,
        }
    }
}

/// The messaging transport.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, msg: &Outgoing) -> Result<()>;
}

/// Writes messages to stdout.
pub struct ConsoleDelivery;

#[async_trait]
impl Delivery for ConsoleDelivery {
    async fn deliver(&self, msg: &Outgoing) -> Result<()> {
        match msg {
            Outgoing::Text {
                to,
                text,
                approval_for,
            } => {
                println!("→ {}:\n{}", to, text);
                if let Some(id) = approval_for {
                    println!("  [accept {}] [decline {}]", id, id);
                }
            }
            Outgoing::Document { to, path } => println!("→ {}: 📎 {}", to, path.display()),
        }
        Ok(())
    }
}

/// Deliver every message; a failure for one recipient does not stop the rest.
/// Returns the number of failed deliveries.
pub async fn deliver_all<D: Delivery + ?Sized>(delivery: &D, msgs: &[Outgoing]) -> usize {
    let mut failed = 0;
    for msg in msgs {
        match delivery.deliver(msg).await {
            Ok(()) => debug!(to = msg.recipient(), "delivered"),
            Err(e) => {
                failed += 1;
                error!(to = msg.recipient(), error = %e, "delivery failed");
            }
        }
    }
    failed
}
