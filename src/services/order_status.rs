use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity},
    entities::OrderStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::ORDER_STATUS_TRANSITIONS,
};

/// Parses an administrative status literal (trimmed, case-insensitive).
pub fn parse_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(raw.trim()).map_err(|_| {
        ServiceError::validation(
            "status",
            format!(
                "'{}' is not a recognized status (expected pending, completed or cancelled)",
                raw.trim()
            ),
        )
    })
}

/// Which transitions an administrator may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    /// Allow leaving `completed` or `cancelled`
    pub allow_from_terminal: bool,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            allow_from_terminal: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in the requested status
    Unchanged,
    Move {
        from: OrderStatus,
        to: OrderStatus,
        /// Whether `completed_at` gets stamped by this move
        stamps_completion: bool,
    },
}

/// Decides what a status request does to an order in `current` state.
pub fn plan_transition(
    current: OrderStatus,
    completed_at: Option<DateTime<Utc>>,
    target: OrderStatus,
    policy: TransitionPolicy,
) -> Result<Transition, ServiceError> {
    if current == target {
        return Ok(Transition::Unchanged);
    }
    if current.is_terminal() && !policy.allow_from_terminal {
        return Err(ServiceError::validation(
            "status",
            format!(
                "order is {} and can no longer change status",
                current.as_str()
            ),
        ));
    }
    Ok(Transition::Move {
        from: current,
        to: target,
        stamps_completion: target == OrderStatus::Completed && completed_at.is_none(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    #[schema(example = "completed")]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<order::Model> for OrderStatusResponse {
    fn from(order: order::Model) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            status: order.status,
            updated_at: order.updated_at,
            completed_at: order.completed_at,
        }
    }
}

const MAX_TRANSITION_ATTEMPTS: u32 = 3;

/// Writes a planned move, but only while the order is still in `from`.
/// Returns `false` when the row was changed or removed since it was read.
pub(crate) async fn apply_transition<C>(
    conn: &C,
    order_id: Uuid,
    from: OrderStatus,
    to: OrderStatus,
    stamps_completion: bool,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let mut update = OrderEntity::update_many()
        .col_expr(order::Column::Status, Expr::value(to))
        .col_expr(order::Column::UpdatedAt, Expr::value(now));
    if stamps_completion {
        update = update.col_expr(
            order::Column::CompletedAt,
            Func::coalesce([
                Expr::col(order::Column::CompletedAt).into(),
                Expr::value(now),
            ])
            .into(),
        );
    }
    let result = update
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(from))
        .exec(conn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to update order status");
            ServiceError::PersistenceFailure(e)
        })?;
    Ok(result.rows_affected == 1)
}

/// Administrative lifecycle changes. Never touches stock.
#[derive(Clone)]
pub struct OrderStatusService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    policy: TransitionPolicy,
}

impl OrderStatusService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        policy: TransitionPolicy,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            policy,
        }
    }

    /// Moves an order to the status named by `raw_status`.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        raw_status: &str,
    ) -> Result<order::Model, ServiceError> {
        let target = parse_status(raw_status)?;
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for status update");
            ServiceError::PersistenceFailure(e)
        })?;

        let mut attempt = 0;
        let (from, to) = loop {
            attempt += 1;
            let current = OrderEntity::find_by_id(order_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

            let (from, to, stamps_completion) =
                match plan_transition(current.status, current.completed_at, target, self.policy)? {
                    Transition::Unchanged => {
                        txn.commit().await?;
                        return Ok(current);
                    }
                    Transition::Move {
                        from,
                        to,
                        stamps_completion,
                    } => (from, to, stamps_completion),
                };

            if apply_transition(&txn, order_id, from, to, stamps_completion, Utc::now()).await? {
                break (from, to);
            }
            if attempt >= MAX_TRANSITION_ATTEMPTS {
                warn!(order_id = %order_id, attempts = attempt, "Order kept changing status underneath the update");
                return Err(ServiceError::validation(
                    "status",
                    "order status changed concurrently, please retry",
                ));
            }
            warn!(order_id = %order_id, from = from.as_str(), "Order status changed since it was read, re-planning");
        };

        let updated = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit status update");
            ServiceError::PersistenceFailure(e)
        })?;

        ORDER_STATUS_TRANSITIONS
            .with_label_values(&[to.as_str()])
            .inc();
        info!(
            order_id = %order_id,
            from = from.as_str(),
            to = to.as_str(),
            "Order status updated"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: from,
                    new_status: to,
                })
                .await;
            match to {
                OrderStatus::Completed => sender.send_or_log(Event::OrderCompleted(order_id)).await,
                OrderStatus::Cancelled => sender.send_or_log(Event::OrderCancelled(order_id)).await,
                OrderStatus::Pending => {}
            }
        }

        Ok(updated)
    }
}
