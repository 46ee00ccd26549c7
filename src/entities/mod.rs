pub mod order;
pub mod order_item;
pub mod product;
pub mod product_variant;

pub use order::{OrderSource, OrderStatus};
