//! Share links: wire types exchanged with the hosted share functions and helpers
//! for turning share codes into links and back.

use serde::{Deserialize, Serialize};

pub const SHARE_SCHEME: &str = "exquiziteapp";
pub const SHARE_HOST: &str = "shared";
pub const SHARE_WEB_URL: &str = "https://exquizite-app.vercel.app/shared";
pub const SHARE_CODE_LENGTH: usize = 12;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShareOptions {
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_days: Option<u32>,
}

impl Default for ShareOptions {
    fn default() -> Self {
        Self {
            is_public: true,
            expires_in_days: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateShareLinkRequest {
    pub set_id: String,
    #[serde(flatten)]
    pub options: ShareOptions,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShareMetadata {
    pub share_id: String,
    pub share_code: String,
    pub share_url: String,
    pub is_new: bool,
    pub view_count: u64,
    pub copy_count: u64,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetSharedSetRequest {
    pub share_code: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SharedWordPair {
    pub id: String,
    pub word: String,
    pub translation: String,
    pub position: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShareInfo {
    pub share_code: String,
    pub view_count: u64,
    pub copy_count: u64,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ShareAuthor {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SharedSetDetails {
    pub set_id: String,
    pub name: String,
    pub target_language: String,
    pub native_language: String,
    pub word_count: usize,
    pub words: Vec<SharedWordPair>,
    pub share_info: ShareInfo,
    pub author: ShareAuthor,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CopySharedSetRequest {
    pub share_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CopySetResponse {
    pub set_id: String,
    pub name: String,
    pub word_count: usize,
    pub success: bool,
}

pub fn is_valid_share_code(code: &str) -> bool {
    code.len() == SHARE_CODE_LENGTH && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// In-app deep link, e.g. `exquiziteapp://shared/AbCdEf123456`.
pub fn share_url(code: &str) -> String {
    format!("{SHARE_SCHEME}://{SHARE_HOST}/{code}")
}

/// Link for sharing outside the app.
pub fn web_share_url(code: &str) -> String {
    format!("{SHARE_WEB_URL}/{code}")
}

/// Pulls a share code out of a deep link, a web link, or a bare code.
pub fn extract_share_code(input: &str) -> Option<&str> {
    let input = input.trim();
    let app_prefix = format!("{SHARE_SCHEME}://{SHARE_HOST}/");
    let web_prefix = format!("{SHARE_WEB_URL}/");

    for prefix in [app_prefix.as_str(), web_prefix.as_str()] {
        if let Some(pos) = input.find(prefix) {
            let rest = &input[pos + prefix.len()..];
            let end = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            let code = &rest[..end];
            return (!code.is_empty()).then_some(code);
        }
    }

    is_valid_share_code(input).then_some(input)
}

/// Like [`extract_share_code`], but only accepts well-formed codes.
pub fn parse_share_link(input: &str) -> Option<&str> {
    extract_share_code(input).filter(|code| is_valid_share_code(code))
}

pub fn share_message(set_name: &str, url: &str, word_count: usize) -> String {
    format!(
        "Check out my \"{set_name}\" word set with {word_count} words! Practice it here: {url}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_code_validation() {
        assert!(is_valid_share_code("AbCdEf123456"));
        assert!(!is_valid_share_code("AbCdEf12345"));
        assert!(!is_valid_share_code("AbCdEf12345!"));
        assert!(!is_valid_share_code(""));
    }

    #[test]
    fn test_extract_share_code_from_links() {
        assert_eq!(
            extract_share_code("exquiziteapp://shared/AbCdEf123456"),
            Some("AbCdEf123456")
        );
        assert_eq!(
            extract_share_code("https://exquizite-app.vercel.app/shared/XyZ987654321?ref=mail"),
            Some("XyZ987654321")
        );
        assert_eq!(extract_share_code("  AbCdEf123456 "), Some("AbCdEf123456"));
        assert_eq!(extract_share_code("https://example.com/AbCdEf123456"), None);
    }

    #[test]
    fn test_parse_share_link_rejects_short_codes() {
        assert_eq!(parse_share_link("exquiziteapp://shared/abc"), None);
        assert_eq!(
            parse_share_link(&web_share_url("AbCdEf123456")),
            Some("AbCdEf123456")
        );
    }

    #[test]
    fn test_share_message() {
        let url = share_url("AbCdEf123456");
        assert_eq!(
            share_message("Animals", &url, 12),
            "Check out my \"Animals\" word set with 12 words! Practice it here: exquiziteapp://shared/AbCdEf123456"
        );
    }

    #[test]
    fn test_share_request_wire_format() {
        let request = GenerateShareLinkRequest {
            set_id: "set-1".to_string(),
            options: ShareOptions {
                is_public: true,
                expires_in_days: Some(7),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "setId": "set-1", "isPublic": true, "expiresInDays": 7 })
        );
    }
}
