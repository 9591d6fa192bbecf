use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};

/// 位元組資料的 Base64 表示。
///
/// ACME 的 JWS 各部分一律使用不含填充的 URL-safe 編碼（RFC 7515 §2），
/// 因此 [`Base64::base64_url`] 是主要的輸出形式。
///
/// # 示例
///
/// ```
/// use certkeeper::base64::Base64;
///
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.as_str(), "SGVsbG8sIFdvcmxkIQ==");
/// assert_eq!(b64.base64_url(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    encoded: String,
    raw: Vec<u8>,
}

impl Base64 {
    /// 根據輸入資料建立 Base64 表示，接受任何可轉為位元組切片的型別。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        let raw = input.as_ref().to_vec();
        let encoded = STANDARD.encode(&raw);
        Self { encoded, raw }
    }

    /// 標準 Base64（含填充）字串。
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// 不含填充的 URL-safe Base64 字串。
    pub fn base64_url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}
