//! Merchant-facing order and payment numbers.
//!
//! A number is a one-letter prefix, the UTC timestamp down to the second, and six random digits, e.g.
//! `O20240601123045482913`. Uniqueness is finally enforced by the database.
use chrono::Utc;
use rand::Rng;

use crate::db_types::{OrderNo, PaymentNo};

fn generate(prefix: char) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{prefix}{}{suffix:06}", Utc::now().format("%Y%m%d%H%M%S"))
}

pub fn new_order_no() -> OrderNo {
    OrderNo::new(generate('O'))
}

pub fn new_payment_no() -> PaymentNo {
    PaymentNo::new(generate('P'))
}
