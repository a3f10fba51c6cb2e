mod helpers;
mod money;

pub mod op;
mod secret;

pub use helpers::parse_boolean_flag;
pub use money::{Money, MoneyParseError, DEFAULT_CURRENCY_CODE, MINOR_UNITS};
pub use secret::Secret;
