use std::collections::HashMap;

use async_trait::async_trait;
use mall_order_engine::{
    db_types::{PaymentMethod, PaymentNo},
    gateway::{RefundOutcome, RefundRequest, TradeQuery, TradeRequest},
    GatewayError,
    PaymentGateway,
};
use mockall::mock;

mock! {
    pub Gateway {}
    #[async_trait]
    impl PaymentGateway for Gateway {
        fn method(&self) -> PaymentMethod;
        async fn create_trade(&self, request: &TradeRequest) -> Result<String, GatewayError>;
        async fn query(&self, payment_no: &PaymentNo) -> Result<TradeQuery, GatewayError>;
        async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError>;
        async fn close(&self, payment_no: &PaymentNo) -> Result<(), GatewayError>;
        fn verify_notification(&self, params: &HashMap<String, String>) -> Result<(), GatewayError>;
    }
}

/// An Alipay gateway that hands out redirect URLs and accepts notifications signed `valid`. Anything else a test needs
/// must be added as an expectation.
pub fn alipay_gateway() -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway.expect_method().return_const(PaymentMethod::Alipay);
    gateway
        .expect_create_trade()
        .returning(|req| Ok(format!("https://pay.example.com/checkout?out_trade_no={}", req.payment_no)));
    gateway.expect_verify_notification().returning(|params| match params.get("sign").map(String::as_str) {
        Some("valid") => Ok(()),
        _ => Err(GatewayError::Signature("Bad test signature".into())),
    });
    gateway
}
