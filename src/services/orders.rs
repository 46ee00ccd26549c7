use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, DbErr, EntityTrait, LoaderTrait,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity},
    entities::order_item::{self, Entity as OrderItemEntity},
    entities::{OrderSource, OrderStatus},
    errors::{FieldErrors, ServiceError},
    events::{Event, EventSender},
    metrics::{record_order_failure, ORDER_CREATIONS, ORDER_NUMBER_COLLISIONS},
    services::catalog::{self, StockTarget},
    services::{money, MAX_AMOUNT},
    services::order_number::{looks_like_order_number, OrderNumberGenerator},
};

lazy_static! {
    static ref PHONE_SHAPE: Regex = Regex::new(r"^\+?[0-9(][0-9 ()./\-]{5,29}$").expect("valid regex");
}

/// One line of a submitted cart.
///
/// `unit_price` is advisory for catalog lines and authoritative for manual lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    /// Free-text name, used only for lines without a product reference
    pub product_name: Option<String>,
    pub product_image: Option<String>,
    #[schema(example = 2)]
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
    #[schema(value_type = Option<String>, example = "10.00")]
    pub unit_price: Option<Decimal>,
}

/// Customer block as submitted. Either `name` or `first_name` + `last_name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CustomerInfo {
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub notes: Option<String>,
}

/// Client-computed totals, reconciled against the server computation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct OrderTotals {
    #[schema(value_type = String, example = "20.00")]
    pub subtotal: Decimal,
    #[serde(default)]
    #[schema(value_type = String, example = "5.00")]
    pub shipping: Decimal,
    #[schema(value_type = String, example = "25.00")]
    pub total: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub customer: CustomerInfo,
    #[serde(default)]
    pub totals: OrderTotals,
}

fn required(message: &'static str) -> ValidationError {
    let mut err = ValidationError::new("required");
    err.message = Some(Cow::from(message));
    err
}

fn required_text(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(required("is required"));
    }
    Ok(())
}

fn required_email(value: &str) -> Result<(), ValidationError> {
    required_text(value)?;
    if !validator::validate_email(value) {
        let mut err = ValidationError::new("email");
        err.message = Some(Cow::from("must be a valid email address"));
        return Err(err);
    }
    Ok(())
}

fn required_phone(value: &str) -> Result<(), ValidationError> {
    required_text(value)?;
    let digits = value.chars().filter(char::is_ascii_digit).count();
    if !PHONE_SHAPE.is_match(value) || digits < 6 {
        let mut err = ValidationError::new("phone");
        err.message = Some(Cow::from("must be a valid phone number"));
        return Err(err);
    }
    Ok(())
}

/// Trimmed customer data as it will be stored on the order.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct CustomerSnapshot {
    #[validate(custom = "required_text", length(max = 200, message = "is too long"))]
    pub name: String,
    #[validate(custom = "required_email", length(max = 254, message = "is too long"))]
    pub email: String,
    #[validate(custom = "required_phone")]
    pub phone: String,
    #[validate(custom = "required_text", length(max = 500, message = "is too long"))]
    pub address: String,
    #[validate(custom = "required_text", length(max = 120, message = "is too long"))]
    pub city: String,
    #[validate(length(max = 20, message = "is too long"))]
    pub postal_code: Option<String>,
    #[validate(length(max = 2000, message = "is too long"))]
    pub notes: Option<String>,
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl From<&CustomerInfo> for CustomerSnapshot {
    fn from(info: &CustomerInfo) -> Self {
        let name = trimmed(&info.name).unwrap_or_else(|| {
            [trimmed(&info.first_name), trimmed(&info.last_name)]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
        });

        Self {
            name,
            email: trimmed(&info.email).unwrap_or_default(),
            phone: trimmed(&info.phone).unwrap_or_default(),
            address: trimmed(&info.address).unwrap_or_default(),
            city: trimmed(&info.city).unwrap_or_default(),
            postal_code: trimmed(&info.postal_code),
            notes: trimmed(&info.notes),
        }
    }
}

/// Why a submitted amount cannot be stored, if it cannot.
fn amount_problem(amount: Decimal) -> Option<String> {
    if amount.is_sign_negative() {
        Some("must not be negative".to_string())
    } else if amount > MAX_AMOUNT {
        Some(over_limit())
    } else {
        None
    }
}

fn over_limit() -> String {
    format!("must not exceed {}", MAX_AMOUNT)
}

/// `unit_price * quantity`, or `None` when it leaves the storable range.
fn line_total(unit_price: Decimal, quantity: i32) -> Option<Decimal> {
    unit_price
        .checked_mul(Decimal::from(quantity))
        .map(money)
        .filter(|total| *total <= MAX_AMOUNT)
}

/// Checks everything that needs no storage access and returns the customer snapshot.
pub fn validate_submission(
    request: &CreateOrderRequest,
    source: OrderSource,
) -> Result<CustomerSnapshot, ServiceError> {
    let mut errors = FieldErrors::new();

    if request.items.is_empty() {
        errors.push("items", "must contain at least one line");
    }

    for (index, line) in request.items.iter().enumerate() {
        if line.quantity < 1 {
            errors.push(format!("items[{}].quantity", index), "must be at least 1");
        }
        if let Some(problem) = line.unit_price.and_then(amount_problem) {
            errors.push(format!("items[{}].unit_price", index), problem);
        }
        if line.product_id.is_some() {
            continue;
        }
        match source {
            OrderSource::Storefront => {
                errors.push(format!("items[{}].product_id", index), "is required");
            }
            OrderSource::Manual => {
                if trimmed(&line.product_name).is_none() {
                    errors.push(format!("items[{}].product_name", index), "is required");
                }
                if line.unit_price.is_none() {
                    errors.push(format!("items[{}].unit_price", index), "is required");
                }
            }
        }
    }

    for (field, amount) in [
        ("totals.subtotal", request.totals.subtotal),
        ("totals.shipping", request.totals.shipping),
        ("totals.total", request.totals.total),
    ] {
        if let Some(problem) = amount_problem(amount) {
            errors.push(field, problem);
        }
    }

    let customer = CustomerSnapshot::from(&request.customer);
    if let Err(e) = customer.validate() {
        errors.extend(FieldErrors::from_validation(&e, ""));
    }

    errors.into_result()?;
    Ok(customer)
}

/// A line after catalog resolution, ready to be written.
#[derive(Debug, Clone)]
struct PricedLine {
    position: usize,
    product_id: Option<Uuid>,
    variant_id: Option<Uuid>,
    name: String,
    display_name: String,
    image: Option<String>,
    slug: Option<String>,
    size: Option<String>,
    color: Option<String>,
    unit_price: Decimal,
    quantity: i32,
    line_total: Decimal,
    stock: Option<(StockTarget, i32)>,
}

/// An order with its lines, sorted by cart position.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<OrderWithItems>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub product_image: Option<String>,
    pub product_slug: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    #[schema(value_type = String, example = "10.00")]
    pub unit_price: Decimal,
    pub quantity: i32,
    #[schema(value_type = String, example = "20.00")]
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomerResponse {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postal_code: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    #[schema(example = "ORD-2024-7KQ2M9XA")]
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub status: OrderStatus,
    pub source: OrderSource,
    pub customer: CustomerResponse,
    pub items: Vec<OrderItemResponse>,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub shipping: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            variant_id: item.variant_id,
            product_name: item.product_name,
            product_image: item.product_image,
            product_slug: item.product_slug,
            size: item.size,
            color: item.color,
            unit_price: money(item.unit_price),
            quantity: item.quantity,
            line_total: money(item.line_total),
        }
    }
}

impl From<OrderWithItems> for OrderResponse {
    fn from(value: OrderWithItems) -> Self {
        let OrderWithItems { order, items } = value;
        Self {
            id: order.id,
            order_number: order.order_number,
            user_id: order.user_id,
            status: order.status,
            source: order.source,
            customer: CustomerResponse {
                name: order.customer_name,
                email: order.customer_email,
                phone: order.customer_phone,
                address: order.address,
                city: order.city,
                postal_code: order.postal_code,
                notes: order.notes,
            },
            items: items.into_iter().map(OrderItemResponse::from).collect(),
            subtotal: money(order.subtotal),
            shipping: money(order.shipping),
            total: money(order.total),
            created_at: order.created_at,
            updated_at: order.updated_at,
            completed_at: order.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl From<OrderPage> for OrderListResponse {
    fn from(page: OrderPage) -> Self {
        Self {
            orders: page.orders.into_iter().map(OrderResponse::from).collect(),
            total: page.total,
            page: page.page,
            per_page: page.per_page,
        }
    }
}

pub const MAX_PAGE_SIZE: u64 = 100;

/// Turns cart submissions into persisted orders and serves order reads.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    number_generator: Arc<dyn OrderNumberGenerator>,
    max_number_attempts: u32,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        number_generator: Arc<dyn OrderNumberGenerator>,
        max_number_attempts: u32,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            number_generator,
            max_number_attempts: max_number_attempts.max(1),
        }
    }

    /// Storefront checkout. Every line must reference the catalog.
    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn create_order_from_cart(
        &self,
        request: CreateOrderRequest,
        owner: Option<Uuid>,
    ) -> Result<OrderWithItems, ServiceError> {
        self.create(request, owner, OrderSource::Storefront).await
    }

    /// Administrative order; lines may be free-text with an authoritative price.
    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn create_manual_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        self.create(request, None, OrderSource::Manual).await
    }

    async fn create(
        &self,
        request: CreateOrderRequest,
        owner: Option<Uuid>,
        source: OrderSource,
    ) -> Result<OrderWithItems, ServiceError> {
        let result = self.materialize(request, owner, source).await;

        match &result {
            Ok(created) => {
                ORDER_CREATIONS.inc();
                info!(
                    order_id = %created.order.id,
                    order_number = %created.order.order_number,
                    source = source.as_str(),
                    "Order created"
                );
                if let Some(sender) = &self.event_sender {
                    sender
                        .send_or_log(Event::OrderCreated {
                            order_id: created.order.id,
                            order_number: created.order.order_number.clone(),
                            total: created.order.total,
                            item_count: created.items.len(),
                        })
                        .await;
                }
            }
            Err(e) => {
                record_order_failure(e.kind());
                warn!(kind = e.kind(), error = %e, "Order creation rejected");
            }
        }

        result
    }

    async fn materialize(
        &self,
        request: CreateOrderRequest,
        owner: Option<Uuid>,
        source: OrderSource,
    ) -> Result<OrderWithItems, ServiceError> {
        let customer = validate_submission(&request, source)?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::PersistenceFailure(e)
        })?;

        let outcome = self
            .write_order(&txn, &request, &customer, owner, source)
            .await;
        match outcome {
            Ok(created) => {
                txn.commit().await.map_err(|e| {
                    error!(error = %e, order_id = %created.order.id, "Failed to commit order creation transaction");
                    ServiceError::PersistenceFailure(e)
                })?;
                Ok(created)
            }
            Err(err) => {
                if let Err(e) = txn.rollback().await {
                    error!(error = %e, "Failed to roll back order creation transaction");
                }
                if let ServiceError::PersistenceFailure(db_err) = &err {
                    error!(error = %db_err, "Order creation failed in storage");
                }
                Err(err)
            }
        }
    }

    async fn write_order(
        &self,
        txn: &DatabaseTransaction,
        request: &CreateOrderRequest,
        customer: &CustomerSnapshot,
        owner: Option<Uuid>,
        source: OrderSource,
    ) -> Result<OrderWithItems, ServiceError> {
        let priced = price_order(txn, request).await?;
        self.persist_order(txn, &priced, customer, owner, source)
            .await
    }

    /// Inserts the order and its items, then claims stock line by line. A row
    /// that no longer holds the quantity fails the whole order.
    async fn persist_order(
        &self,
        txn: &DatabaseTransaction,
        priced: &PricedOrder,
        customer: &CustomerSnapshot,
        owner: Option<Uuid>,
        source: OrderSource,
    ) -> Result<OrderWithItems, ServiceError> {
        let PricedOrder {
            lines,
            subtotal,
            shipping,
            total,
        } = priced;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let build = |order_number: String| order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            user_id: Set(owner),
            status: Set(OrderStatus::Pending),
            source: Set(source),
            customer_name: Set(customer.name.clone()),
            customer_email: Set(customer.email.clone()),
            customer_phone: Set(customer.phone.clone()),
            address: Set(customer.address.clone()),
            city: Set(customer.city.clone()),
            postal_code: Set(customer.postal_code.clone()),
            notes: Set(customer.notes.clone()),
            subtotal: Set(*subtotal),
            shipping: Set(*shipping),
            total: Set(*total),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
        };
        let order = self.insert_with_unique_number(txn, now, build).await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                variant_id: Set(line.variant_id),
                product_name: Set(line.name.clone()),
                product_image: Set(line.image.clone()),
                product_slug: Set(line.slug.clone()),
                size: Set(line.size.clone()),
                color: Set(line.color.clone()),
                unit_price: Set(line.unit_price),
                quantity: Set(line.quantity),
                line_total: Set(line.line_total),
                position: Set(line.position as i32),
                created_at: Set(now),
            }
            .insert(txn)
            .await?;
            items.push(item);

            if let Some((target, _)) = line.stock {
                if !catalog::decrement_stock(txn, target, line.quantity).await? {
                    let available = catalog::current_stock(txn, target).await?;
                    return Err(ServiceError::InsufficientStock {
                        line: line.position,
                        product: line.display_name.clone(),
                        requested: line.quantity,
                        available,
                    });
                }
            }
        }

        Ok(OrderWithItems { order, items })
    }

    /// Draws candidates until one inserts cleanly. Each insert runs in a
    /// savepoint so a unique violation leaves the outer transaction usable.
    async fn insert_with_unique_number<F>(
        &self,
        txn: &DatabaseTransaction,
        now: DateTime<Utc>,
        build: F,
    ) -> Result<order::Model, ServiceError>
    where
        F: Fn(String) -> order::ActiveModel,
    {
        for attempt in 1..=self.max_number_attempts {
            let candidate = self.number_generator.generate(now);

            let taken = OrderEntity::find()
                .filter(order::Column::OrderNumber.eq(candidate.as_str()))
                .count(txn)
                .await?
                > 0;
            if taken {
                ORDER_NUMBER_COLLISIONS.inc();
                warn!(attempt, order_number = %candidate, "Order number already in use");
                continue;
            }

            let savepoint = txn.begin().await?;
            match build(candidate.clone()).insert(&savepoint).await {
                Ok(model) => {
                    savepoint.commit().await?;
                    return Ok(model);
                }
                Err(e) if is_unique_violation(&e) => {
                    savepoint.rollback().await?;
                    ORDER_NUMBER_COLLISIONS.inc();
                    warn!(attempt, order_number = %candidate, "Order number claimed concurrently");
                }
                Err(e) => return Err(e.into()),
            }
        }

        error!(
            attempts = self.max_number_attempts,
            "Exhausted order number attempts"
        );
        Err(ServiceError::GenerationExhausted {
            attempts: self.max_number_attempts,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let db = &*self.db_pool;
        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        self.hydrate(order).await
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<OrderWithItems, ServiceError> {
        let db = &*self.db_pool;
        let order_number = order_number.trim();
        if !looks_like_order_number(order_number) {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_number
            )));
        }
        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;
        self.hydrate(order).await
    }

    /// Newest first. `page` is 1-based; `per_page` is clamped to `1..=100`.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<OrderPage, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);

        let mut query = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query.paginate(db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;
        let items = orders.load_many(OrderItemEntity, db).await?;

        let orders = orders
            .into_iter()
            .zip(items)
            .map(|(order, mut items)| {
                items.sort_by_key(|i| i.position);
                OrderWithItems { order, items }
            })
            .collect();

        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    async fn hydrate(&self, order: order::Model) -> Result<OrderWithItems, ServiceError> {
        let items = order
            .find_related(OrderItemEntity)
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db_pool)
            .await?;
        Ok(OrderWithItems { order, items })
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// A cart priced against the catalog with its totals reconciled.
#[derive(Debug, Clone)]
struct PricedOrder {
    lines: Vec<PricedLine>,
    subtotal: Decimal,
    shipping: Decimal,
    total: Decimal,
}

async fn price_order(
    txn: &DatabaseTransaction,
    request: &CreateOrderRequest,
) -> Result<PricedOrder, ServiceError> {
    let lines = price_lines(txn, &request.items).await?;
    let (subtotal, shipping, total) = reconcile_totals(&lines, &request.totals)?;
    check_stock(&lines)?;
    Ok(PricedOrder {
        lines,
        subtotal,
        shipping,
        total,
    })
}

/// Resolves catalog lines and prices every line, collecting reference errors
/// across the whole cart before failing.
async fn price_lines(
    txn: &DatabaseTransaction,
    cart: &[CartLine],
) -> Result<Vec<PricedLine>, ServiceError> {
    let mut errors = FieldErrors::new();
    let mut lines = Vec::with_capacity(cart.len());

    for (position, line) in cart.iter().enumerate() {
        let size = trimmed(&line.size);
        let color = trimmed(&line.color);

        let Some(product_id) = line.product_id else {
            let unit_price = money(line.unit_price.unwrap_or_default());
            let Some(total) = line_total(unit_price, line.quantity) else {
                errors.push(format!("items[{}].quantity", position), line_over_limit());
                continue;
            };
            let name = trimmed(&line.product_name).unwrap_or_default();
            lines.push(PricedLine {
                position,
                product_id: None,
                variant_id: None,
                display_name: name.clone(),
                name,
                image: trimmed(&line.product_image),
                slug: None,
                size,
                color,
                unit_price,
                quantity: line.quantity,
                line_total: total,
                stock: None,
            });
            continue;
        };

        let resolved = match catalog::resolve_line(
            txn,
            position,
            product_id,
            line.variant_id,
            size.as_deref(),
            color.as_deref(),
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                catalog::collect_rejection(&mut errors, e)?;
                continue;
            }
        };

        if let Some(claimed) = line.unit_price {
            if money(claimed) != resolved.unit_price {
                errors.push(
                    format!("items[{}].unit_price", position),
                    format!(
                        "does not match the current price of {} ({})",
                        resolved.name, resolved.unit_price
                    ),
                );
                continue;
            }
        }

        let Some(total) = line_total(resolved.unit_price, line.quantity) else {
            errors.push(format!("items[{}].quantity", position), line_over_limit());
            continue;
        };

        lines.push(PricedLine {
            position,
            product_id: Some(resolved.product_id),
            variant_id: resolved.variant_id,
            display_name: resolved.display_name(),
            image: resolved.image_url.clone(),
            slug: Some(resolved.slug.clone()),
            size: resolved.size.clone(),
            color: resolved.color.clone(),
            unit_price: resolved.unit_price,
            quantity: line.quantity,
            line_total: total,
            stock: Some((resolved.target, resolved.available)),
            name: resolved.name,
        });
    }

    errors.into_result()?;
    Ok(lines)
}

fn line_over_limit() -> String {
    format!("line total must not exceed {}", MAX_AMOUNT)
}

/// Returns `(subtotal, shipping, total)` as stored, or field errors on the
/// declared totals that disagree with the lines or leave the storable range.
fn reconcile_totals(
    lines: &[PricedLine],
    declared: &OrderTotals,
) -> Result<(Decimal, Decimal, Decimal), ServiceError> {
    let subtotal = lines
        .iter()
        .try_fold(Decimal::ZERO, |acc, l| acc.checked_add(l.line_total))
        .map(money)
        .filter(|subtotal| *subtotal <= MAX_AMOUNT)
        .ok_or_else(|| ServiceError::validation("totals.subtotal", over_limit()))?;
    let shipping = money(declared.shipping);
    let total = subtotal
        .checked_add(shipping)
        .map(money)
        .filter(|total| *total <= MAX_AMOUNT)
        .ok_or_else(|| ServiceError::validation("totals.total", over_limit()))?;

    let mut errors = FieldErrors::new();
    if money(declared.subtotal) != subtotal {
        errors.push(
            "totals.subtotal",
            format!("does not match the sum of the items ({})", subtotal),
        );
    }
    if money(declared.total) != total {
        errors.push(
            "totals.total",
            format!("must equal subtotal plus shipping ({})", total),
        );
    }
    errors.into_result()?;

    Ok((subtotal, shipping, total))
}

/// Fails on the first line whose cumulative demand exceeds what its stock row holds.
fn check_stock(lines: &[PricedLine]) -> Result<(), ServiceError> {
    let mut demand: HashMap<StockTarget, i32> = HashMap::new();

    for line in lines {
        let Some((target, available)) = line.stock else {
            continue;
        };
        let requested = demand.entry(target).or_insert(0);
        *requested = requested.saturating_add(line.quantity);
        if *requested > available {
            return Err(ServiceError::InsufficientStock {
                line: line.position,
                product: line.display_name.clone(),
                requested: *requested,
                available,
            });
        }
    }

    Ok(())
}
