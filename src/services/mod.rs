pub mod catalog;
pub mod order_message;
pub mod order_number;
pub mod order_status;
pub mod orders;

use rust_decimal::{Decimal, RoundingStrategy};

/// Largest amount a `decimal(12,2)` money column holds.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Rounds half-up to cents and fixes the scale at two decimals.
pub fn money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}
