//! Read-side view of the catalog used while materializing an order, plus the
//! conditional stock decrement that keeps stock from going negative.

use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entities::{product, product_variant};
use crate::errors::{FieldErrors, ServiceError};
use crate::services::money;

/// Row whose `stock` column a line draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StockTarget {
    Product(Uuid),
    Variant(Uuid),
}

/// A cart line bound to its current catalog state.
#[derive(Debug, Clone)]
pub struct CatalogLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub image_url: Option<String>,
    pub slug: String,
    pub size: Option<String>,
    pub color: Option<String>,
    pub unit_price: Decimal,
    pub available: i32,
    pub target: StockTarget,
}

impl CatalogLine {
    /// Name used in stock errors, with the variant attributes appended.
    pub fn display_name(&self) -> String {
        let attrs: Vec<&str> = [self.size.as_deref(), self.color.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if attrs.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, attrs.join(", "))
        }
    }
}

/// Binds the line at `index` to a product or variant.
///
/// Reference problems come back as `ValidationFailed` on `items[index].product_id`
/// or `items[index].variant_id`; storage faults as `PersistenceFailure`.
pub async fn resolve_line<C>(
    conn: &C,
    index: usize,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    size: Option<&str>,
    color: Option<&str>,
) -> Result<CatalogLine, ServiceError>
where
    C: ConnectionTrait,
{
    let product = product::Entity::find_by_id(product_id)
        .one(conn)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| {
            ServiceError::validation(format!("items[{}].product_id", index), "product not found")
        })?;

    let variant = match variant_id {
        Some(variant_id) => {
            let variant = product_variant::Entity::find_by_id(variant_id)
                .one(conn)
                .await?
                .filter(|v| v.product_id == product.id)
                .ok_or_else(|| {
                    ServiceError::validation(
                        format!("items[{}].variant_id", index),
                        "variant not found for this product",
                    )
                })?;
            Some(variant)
        }
        None => {
            let variants = product_variant::Entity::find()
                .filter(product_variant::Column::ProductId.eq(product.id))
                .all(conn)
                .await?;
            if variants.is_empty() {
                None
            } else {
                let mut matching = variants.into_iter().filter(|v| v.matches(size, color));
                match (matching.next(), matching.next()) {
                    (Some(v), None) => Some(v),
                    _ => {
                        return Err(ServiceError::validation(
                            format!("items[{}].variant_id", index),
                            "no single variant matches the selected size and color",
                        ))
                    }
                }
            }
        }
    };

    Ok(match variant {
        Some(v) => CatalogLine {
            product_id: product.id,
            variant_id: Some(v.id),
            unit_price: money(v.price.unwrap_or(product.price)),
            available: v.stock,
            target: StockTarget::Variant(v.id),
            size: v.size.or_else(|| size.map(str::to_string)),
            color: v.color.or_else(|| color.map(str::to_string)),
            name: product.name,
            image_url: product.image_url,
            slug: product.slug,
        },
        None => CatalogLine {
            product_id: product.id,
            variant_id: None,
            unit_price: money(product.price),
            available: product.stock,
            target: StockTarget::Product(product.id),
            size: size.map(str::to_string),
            color: color.map(str::to_string),
            name: product.name,
            image_url: product.image_url,
            slug: product.slug,
        },
    })
}

/// Decrements stock only if enough remains. Returns `false` when the row no
/// longer holds `quantity` units.
pub async fn decrement_stock<C>(conn: &C, target: StockTarget, quantity: i32) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let result = match target {
        StockTarget::Product(id) => {
            product::Entity::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).sub(quantity),
                )
                .filter(product::Column::Id.eq(id))
                .filter(product::Column::Stock.gte(quantity))
                .exec(conn)
                .await?
        }
        StockTarget::Variant(id) => {
            product_variant::Entity::update_many()
                .col_expr(
                    product_variant::Column::Stock,
                    Expr::col(product_variant::Column::Stock).sub(quantity),
                )
                .filter(product_variant::Column::Id.eq(id))
                .filter(product_variant::Column::Stock.gte(quantity))
                .exec(conn)
                .await?
        }
    };

    Ok(result.rows_affected == 1)
}

/// Current stock of `target`, or zero when the row has disappeared.
pub async fn current_stock<C>(conn: &C, target: StockTarget) -> Result<i32, ServiceError>
where
    C: ConnectionTrait,
{
    let stock = match target {
        StockTarget::Product(id) => product::Entity::find_by_id(id)
            .one(conn)
            .await?
            .map(|p| p.stock),
        StockTarget::Variant(id) => product_variant::Entity::find_by_id(id)
            .one(conn)
            .await?
            .map(|v| v.stock),
    };
    Ok(stock.unwrap_or(0))
}

/// Folds a resolution error into `errors` when it is a validation problem.
pub(crate) fn collect_rejection(
    errors: &mut FieldErrors,
    err: ServiceError,
) -> Result<(), ServiceError> {
    match err {
        ServiceError::ValidationFailed(fields) => {
            errors.extend(fields);
            Ok(())
        }
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(size: Option<&str>, color: Option<&str>) -> CatalogLine {
        let id = Uuid::new_v4();
        CatalogLine {
            product_id: id,
            variant_id: None,
            name: "Basic Tee".into(),
            image_url: None,
            slug: "basic-tee".into(),
            size: size.map(str::to_string),
            color: color.map(str::to_string),
            unit_price: dec!(10.00),
            available: 3,
            target: StockTarget::Product(id),
        }
    }

    #[test]
    fn display_name_appends_variant_attributes() {
        assert_eq!(line(None, None).display_name(), "Basic Tee");
        assert_eq!(line(Some("M"), Some("White")).display_name(), "Basic Tee (M, White)");
        assert_eq!(line(None, Some("Black")).display_name(), "Basic Tee (Black)");
    }

    #[test]
    fn rejection_collection_keeps_storage_faults() {
        let mut errors = FieldErrors::new();
        collect_rejection(
            &mut errors,
            ServiceError::validation("items[0].product_id", "product not found"),
        )
        .unwrap();
        assert!(errors.contains("items[0].product_id"));

        let fault = collect_rejection(
            &mut errors,
            ServiceError::PersistenceFailure(sea_orm::DbErr::Custom("boom".into())),
        );
        assert!(matches!(fault, Err(ServiceError::PersistenceFailure(_))));
    }

    async fn seeded_product(db: &crate::db::DbPool, stock: i32) -> product::Model {
        use sea_orm::{ActiveModelTrait, Set};
        product::ActiveModel {
            name: Set("Desk Lamp".into()),
            slug: Set("desk-lamp".into()),
            price: Set(dec!(45.00)),
            stock: Set(stock),
            is_active: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn decrement_refuses_to_go_below_zero() {
        let db = crate::db::memory_pool().await;
        let lamp = seeded_product(&db, 1).await;
        let target = StockTarget::Product(lamp.id);

        assert!(!decrement_stock(&db, target, 2).await.unwrap());
        assert_eq!(current_stock(&db, target).await.unwrap(), 1);

        assert!(decrement_stock(&db, target, 1).await.unwrap());
        assert_eq!(current_stock(&db, target).await.unwrap(), 0);
        assert!(!decrement_stock(&db, target, 1).await.unwrap());
    }

    #[tokio::test]
    async fn missing_rows_neither_decrement_nor_report_stock() {
        let db = crate::db::memory_pool().await;
        let target = StockTarget::Variant(Uuid::new_v4());

        assert!(!decrement_stock(&db, target, 1).await.unwrap());
        assert_eq!(current_stock(&db, target).await.unwrap(), 0);
    }
}
