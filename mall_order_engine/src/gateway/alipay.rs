//! An Alipay-style open API gateway.
//!
//! Requests are form-encoded, carry a JSON `biz_content`, and are signed with the merchant's RSA2 key. Responses are a
//! JSON object with a `<method>_response` member whose `code` is `10000` on success. Page payments never touch the
//! network here: the signed request is handed to the buyer's browser as a redirect URL.
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use log::*;
use mall_common::Secret;
use reqwest::Url;
use serde_json::{json, Value};

use crate::{
    db_types::{Money, PaymentMethod, PaymentNo},
    gateway::{
        signature::{signing_content, Rsa2Signer, Rsa2Verifier},
        GatewayError,
        PaymentGateway,
        RefundOutcome,
        RefundRequest,
        TradeQuery,
        TradeRequest,
        TradeStatus,
    },
};

const SUCCESS_CODE: &str = "10000";
const PAGE_PAY: &str = "alipay.trade.page.pay";
const TRADE_QUERY: &str = "alipay.trade.query";
const TRADE_REFUND: &str = "alipay.trade.refund";
const TRADE_CLOSE: &str = "alipay.trade.close";

#[derive(Debug, Clone)]
pub struct AlipayConfig {
    pub app_id: String,
    /// The merchant's RSA private key (PEM, or base64 PKCS#8 / PKCS#1 DER)
    pub private_key: Secret<String>,
    /// The gateway's RSA public key used to check notifications
    pub alipay_public_key: String,
    pub gateway_url: String,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
}

impl Default for AlipayConfig {
    fn default() -> Self {
        Self {
            app_id: String::default(),
            private_key: Secret::default(),
            alipay_public_key: String::default(),
            gateway_url: "https://openapi.alipay.com/gateway.do".to_string(),
            notify_url: None,
            return_url: None,
        }
    }
}

#[derive(Clone)]
pub struct AlipayGateway {
    config: AlipayConfig,
    signer: Rsa2Signer,
    verifier: Rsa2Verifier,
    client: reqwest::Client,
}

impl AlipayGateway {
    pub fn new(config: AlipayConfig) -> Result<Self, GatewayError> {
        if config.app_id.is_empty() {
            return Err(GatewayError::Configuration("No app id was provided".into()));
        }
        Url::parse(&config.gateway_url)
            .map_err(|e| GatewayError::Configuration(format!("Invalid gateway URL {}: {e}", config.gateway_url)))?;
        let signer = Rsa2Signer::from_key_str(config.private_key.reveal())?;
        let verifier = Rsa2Verifier::from_key_str(&config.alipay_public_key)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Could not build the HTTP client: {e}")))?;
        Ok(Self { config, signer, verifier, client })
    }

    /// The common request parameters plus `biz_content`, signed.
    fn signed_params(&self, method: &str, biz_content: &Value) -> Result<BTreeMap<String, String>, GatewayError> {
        let beijing = FixedOffset::east_opt(8 * 3600).ok_or_else(|| GatewayError::Configuration("bad offset".into()))?;
        let mut params = BTreeMap::new();
        params.insert("app_id".to_string(), self.config.app_id.clone());
        params.insert("method".to_string(), method.to_string());
        params.insert("format".to_string(), "JSON".to_string());
        params.insert("charset".to_string(), "utf-8".to_string());
        params.insert("sign_type".to_string(), "RSA2".to_string());
        params.insert("version".to_string(), "1.0".to_string());
        params.insert(
            "timestamp".to_string(),
            Utc::now().with_timezone(&beijing).format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        params.insert("biz_content".to_string(), biz_content.to_string());
        if method == PAGE_PAY {
            if let Some(url) = &self.config.notify_url {
                params.insert("notify_url".to_string(), url.clone());
            }
            if let Some(url) = &self.config.return_url {
                params.insert("return_url".to_string(), url.clone());
            }
        }
        let content = signing_content(&params, &["sign"]);
        let sign = self.signer.sign(&content)?;
        params.insert("sign".to_string(), sign);
        Ok(params)
    }

    /// Builds the redirect URL for a page payment.
    pub fn page_pay_url(&self, request: &TradeRequest) -> Result<String, GatewayError> {
        let params = self.signed_params(PAGE_PAY, &page_pay_content(request))?;
        let url = Url::parse_with_params(&self.config.gateway_url, params.iter())
            .map_err(|e| GatewayError::Configuration(format!("Could not build the payment URL: {e}")))?;
        Ok(url.to_string())
    }

    async fn execute(&self, method: &str, biz_content: Value) -> Result<Value, GatewayError> {
        let params = self.signed_params(method, &biz_content)?;
        trace!("🏦️ Calling {method} with {biz_content}");
        let response = self
            .client
            .post(&self.config.gateway_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if response.status().is_server_error() {
            return Err(GatewayError::Transport(format!("Gateway answered with HTTP {}", response.status())));
        }
        let body = response.json::<Value>().await.map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let member = format!("{}_response", method.replace('.', "_"));
        let result = body
            .get(&member)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("Response has no {member} member")))?;
        let code = str_field(&result, "code").unwrap_or_default();
        if code == SUCCESS_CODE {
            Ok(result)
        } else {
            let sub_code = str_field(&result, "sub_code").unwrap_or_default();
            let message = str_field(&result, "sub_msg").or_else(|| str_field(&result, "msg")).unwrap_or_default();
            debug!("🏦️ {method} was rejected: [{code}/{sub_code}] {message}");
            Err(GatewayError::Rejected { code, sub_code, message })
        }
    }
}

fn str_field(v: &Value, name: &str) -> Option<String> {
    v.get(name).and_then(Value::as_str).map(str::to_string)
}

fn money_field(v: &Value, name: &str) -> Result<Option<Money>, GatewayError> {
    str_field(v, name)
        .map(|s| s.parse::<Money>().map_err(|e| GatewayError::InvalidResponse(format!("Bad {name} {s}: {e}"))))
        .transpose()
}

pub(crate) fn page_pay_content(request: &TradeRequest) -> Value {
    let mut content = json!({
        "out_trade_no": request.payment_no.as_str(),
        "total_amount": request.amount.to_decimal_string(),
        "subject": request.subject,
        "product_code": "FAST_INSTANT_TRADE_PAY",
        "timeout_express": format!("{}m", request.timeout.num_minutes().max(1)),
    });
    if !request.settlements.is_empty() {
        let details = request
            .settlements
            .iter()
            .map(|s| {
                json!({
                    "serial_no": s.order_no.as_str(),
                    "trans_in_type": "loginName",
                    "trans_in": s.account,
                    "amount": s.amount.to_decimal_string(),
                    "desc": format!("Settlement for order {}", s.order_no),
                })
            })
            .collect::<Vec<_>>();
        content["royalty_info"] = json!({ "royalty_type": "ROYALTY", "royalty_detail_infos": details });
    }
    content
}

#[async_trait]
impl PaymentGateway for AlipayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Alipay
    }

    async fn create_trade(&self, request: &TradeRequest) -> Result<String, GatewayError> {
        let url = self.page_pay_url(request)?;
        info!("🏦️ Created page payment for {} ({})", request.payment_no, request.amount);
        Ok(url)
    }

    async fn query(&self, payment_no: &PaymentNo) -> Result<TradeQuery, GatewayError> {
        match self.execute(TRADE_QUERY, json!({ "out_trade_no": payment_no.as_str() })).await {
            Ok(result) => Ok(TradeQuery {
                status: str_field(&result, "trade_status")
                    .map(|s| TradeStatus::from_gateway(&s))
                    .unwrap_or(TradeStatus::Unknown(String::default())),
                trade_no: str_field(&result, "trade_no"),
                total_amount: money_field(&result, "total_amount")?,
            }),
            Err(e) if e.is_trade_missing() => Ok(TradeQuery::not_found()),
            Err(e) => Err(e),
        }
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError> {
        let mut content = json!({
            "out_trade_no": request.payment_no.as_str(),
            "refund_amount": request.amount.to_decimal_string(),
            "out_request_no": request.request_no,
            "refund_reason": request.reason,
        });
        if let Some(trade_no) = &request.trade_no {
            content["trade_no"] = json!(trade_no);
        }
        let result = self.execute(TRADE_REFUND, content).await?;
        let refund_fee = money_field(&result, "refund_fee")?.unwrap_or(request.amount);
        info!("🏦️ Refunded {} on {} (request {})", request.amount, request.payment_no, request.request_no);
        Ok(RefundOutcome { refund_fee, trade_no: str_field(&result, "trade_no") })
    }

    async fn close(&self, payment_no: &PaymentNo) -> Result<(), GatewayError> {
        self.execute(TRADE_CLOSE, json!({ "out_trade_no": payment_no.as_str() })).await?;
        debug!("🏦️ Closed trade {payment_no}");
        Ok(())
    }

    fn verify_notification(&self, params: &HashMap<String, String>) -> Result<(), GatewayError> {
        let sign = params
            .get("sign")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::Signature("Notification is not signed".into()))?;
        let content = signing_content(params, &["sign", "sign_type"]);
        self.verifier.verify(&content, sign)
    }
}
