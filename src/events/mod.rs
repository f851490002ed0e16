use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::entities::{MovementType, OrderStatus};

/// Domain events published by services after their writes commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: i32,
        account_id: Option<i32>,
        total_price: Decimal,
        line_count: usize,
    },
    OrderStatusChanged {
        order_id: i32,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderWarehouseAssigned {
        order_id: i32,
        warehouse_id: i32,
    },
    StockMovementRecorded {
        warehouse_id: i32,
        product_id: i32,
        movement_type: MovementType,
        delta: i32,
        new_quantity: i32,
    },
    AccountRegistered {
        account_id: i32,
        username: String,
    },
    AccountLoggedIn {
        account_id: i32,
        at: DateTime<Utc>,
    },
}

/// Sender half of the event channel, shared by every service.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes `event`, logging instead of failing when the processor is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Drains the channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderPlaced {
                order_id,
                account_id,
                total_price,
                line_count,
            } => {
                info!(
                    order_id,
                    ?account_id,
                    %total_price,
                    line_count,
                    "Order placed"
                );
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id, %old_status, %new_status, "Order status changed");
            }
            Event::OrderWarehouseAssigned {
                order_id,
                warehouse_id,
            } => {
                info!(order_id, warehouse_id, "Order assigned to warehouse");
            }
            Event::StockMovementRecorded {
                warehouse_id,
                product_id,
                movement_type,
                delta,
                new_quantity,
            } => {
                if new_quantity < 0 {
                    error!(
                        warehouse_id,
                        product_id,
                        new_quantity,
                        "Stock movement left a negative balance"
                    );
                } else {
                    info!(
                        warehouse_id,
                        product_id,
                        %movement_type,
                        delta,
                        new_quantity,
                        "Stock movement recorded"
                    );
                }
            }
            Event::AccountRegistered {
                account_id,
                username,
            } => {
                info!(account_id, %username, "Account registered");
            }
            Event::AccountLoggedIn { account_id, at } => {
                info!(account_id, %at, "Account logged in");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_survives_a_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        EventSender::new(tx)
            .send_or_log(Event::AccountRegistered {
                account_id: 1,
                username: "u".into(),
            })
            .await;
    }

    #[tokio::test]
    async fn processor_exits_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        sender
            .send(Event::OrderWarehouseAssigned {
                order_id: 1,
                warehouse_id: 2,
            })
            .await
            .unwrap();
        drop(sender);
        process_events(rx).await;
    }
}
