mod numbering;
mod retry;

pub use numbering::{new_order_no, new_payment_no};
pub use retry::{retry_on_conflict, RetryPolicy};
