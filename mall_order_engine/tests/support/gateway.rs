use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use mall_order_engine::{
    db_types::{PaymentMethod, PaymentNo},
    gateway::{RefundOutcome, RefundRequest, TradeQuery, TradeRequest},
    GatewayError,
    PaymentGateway,
};

/// An in-memory gateway. Each call pops the next scripted answer; with nothing scripted, it behaves like a healthy
/// gateway on which the buyer has not paid yet. Notifications are genuine when they carry `sign=valid`.
pub struct ScriptedGateway {
    method: PaymentMethod,
    create_results: Mutex<VecDeque<Result<String, GatewayError>>>,
    query_results: Mutex<VecDeque<Result<TradeQuery, GatewayError>>>,
    refund_results: Mutex<VecDeque<Result<RefundOutcome, GatewayError>>>,
    calls: Mutex<Vec<String>>,
    requests: Mutex<Vec<TradeRequest>>,
}

impl ScriptedGateway {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            create_results: Mutex::new(VecDeque::new()),
            query_results: Mutex::new(VecDeque::new()),
            refund_results: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn script_create(&self, result: Result<String, GatewayError>) {
        self.create_results.lock().unwrap().push_back(result);
    }

    pub fn script_query(&self, result: Result<TradeQuery, GatewayError>) {
        self.query_results.lock().unwrap().push_back(result);
    }

    pub fn script_refund(&self, result: Result<RefundOutcome, GatewayError>) {
        self.refund_results.lock().unwrap().push_back(result);
    }

    /// Every call so far, as `"<operation>:<key>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        self.calls.lock().unwrap().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    pub fn trade_requests(&self) -> Vec<TradeRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn create_trade(&self, request: &TradeRequest) -> Result<String, GatewayError> {
        self.record(format!("create:{}", request.payment_no));
        self.requests.lock().unwrap().push(request.clone());
        let scripted = self.create_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("https://pay.example.com/checkout?out_trade_no={}", request.payment_no)))
    }

    async fn query(&self, payment_no: &PaymentNo) -> Result<TradeQuery, GatewayError> {
        self.record(format!("query:{payment_no}"));
        let scripted = self.query_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(TradeQuery::not_found()))
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError> {
        self.record(format!("refund:{}", request.request_no));
        let scripted = self.refund_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(RefundOutcome { refund_fee: request.amount, trade_no: request.trade_no.clone() }))
    }

    async fn close(&self, payment_no: &PaymentNo) -> Result<(), GatewayError> {
        self.record(format!("close:{payment_no}"));
        Ok(())
    }

    fn verify_notification(&self, params: &HashMap<String, String>) -> Result<(), GatewayError> {
        match params.get("sign").map(String::as_str) {
            Some("valid") => Ok(()),
            _ => Err(GatewayError::Signature("Test signature mismatch".into())),
        }
    }
}
