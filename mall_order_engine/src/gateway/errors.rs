use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("The gateway rejected the request. [{code}/{sub_code}] {message}")]
    Rejected { code: String, sub_code: String, message: String },
    #[error("Could not reach the gateway. {0}")]
    Transport(String),
    #[error("Unexpected response from the gateway. {0}")]
    InvalidResponse(String),
    #[error("Signature check failed. {0}")]
    Signature(String),
    #[error("The gateway is not configured correctly. {0}")]
    Configuration(String),
}

const SETTLEMENT_MARKERS: [&str; 4] = ["ROYALTY", "PAYEE_NOT_EXIST", "PAYEE_USER_INFO_ERROR", "SPLIT_BILL_FAIL"];

impl GatewayError {
    pub fn rejected<S1: Into<String>, S2: Into<String>, S3: Into<String>>(code: S1, sub_code: S2, message: S3) -> Self {
        Self::Rejected { code: code.into(), sub_code: sub_code.into(), message: message.into() }
    }

    /// System-side failures that may well succeed if the identical request is sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { code, sub_code, .. } => {
                let sub_code = sub_code.to_ascii_uppercase();
                code == "20000" ||
                    sub_code == "SYSTEM_ERROR" ||
                    sub_code.ends_with(".SYSTEM_ERROR") ||
                    sub_code.starts_with("ISP.")
            },
            _ => false,
        }
    }

    /// The rejection was caused by a store's payout account rather than by the buyer or the trade.
    pub fn is_settlement_error(&self) -> bool {
        match self {
            Self::Rejected { sub_code, .. } => {
                let sub_code = sub_code.to_ascii_uppercase();
                SETTLEMENT_MARKERS.iter().any(|m| sub_code.contains(m)) || sub_code == "INVALID_PARAMETER.TRANS_IN"
            },
            _ => false,
        }
    }

    /// The gateway has never heard of the trade.
    pub fn is_trade_missing(&self) -> bool {
        matches!(self, Self::Rejected { sub_code, .. } if sub_code.eq_ignore_ascii_case("ACQ.TRADE_NOT_EXIST"))
    }
}
