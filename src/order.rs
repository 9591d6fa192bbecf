use std::fmt;

use serde::Deserialize;

use crate::payload::Identifier;

/// 訂單狀態。
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// CA 回傳的訂單物件。
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    /// 訂單當前狀態
    pub status: OrderStatus,
    /// 證書涵蓋的識別項
    pub identifiers: Vec<Identifier>,
    /// 授權 URL 列表
    pub authorizations: Vec<String>,
    /// 提交 CSR 的 URL
    pub finalize: String,
    /// 憑證 URL（僅在有效時存在）
    #[serde(default)]
    pub certificate: Option<String>,
    /// 訂單失敗時的原因
    #[serde(default)]
    pub error: Option<Problem>,
}

impl Order {
    /// 解析訂單 JSON。
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }
}

/// RFC 7807 problem document，ACME 錯誤回應的格式。
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default)]
    pub detail: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.problem_type.is_empty(), self.detail.is_empty()) {
            (true, true) => f.write_str("unknown error"),
            (false, true) => f.write_str(&self.problem_type),
            (true, false) => f.write_str(&self.detail),
            (false, false) => write!(f, "{}: {}", self.problem_type, self.detail),
        }
    }
}
