//! JWS 所使用的 base64url（無填充）編碼，見 RFC 7515 §2。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

pub use base64::DecodeError;

/// 以 URL 安全且不含 `=` 填充的格式編碼資料。
pub fn url_encode<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// 解碼 base64url 字串。
///
/// 部分 CA 發放的 EAB HMAC 金鑰會帶有 `=` 填充，因此解碼前先移除尾端填充。
///
/// # 錯誤
///
/// 字串含有非 base64url 字元時回傳 [`DecodeError`]。
pub fn url_decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_NO_PAD.decode(input.trim_end_matches('='))
}
