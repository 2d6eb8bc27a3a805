//! 字段提取
//!
//! 每种字段类型对应一个从邮件记录到文本的纯函数。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuleError};
use crate::record::{self, MessageRecord};

/// 条件可匹配的邮件字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Sender,
    Subject,
    Body,
    Header,
    Attachment,
}

impl FieldType {
    pub const ALL: [FieldType; 5] = [
        Self::Sender,
        Self::Subject,
        Self::Body,
        Self::Header,
        Self::Attachment,
    ];

    /// 提取字段值
    ///
    /// 缺失字段返回空字符串；字段类型错误返回 `Err`，由条件评估器降级为空字符串。
    pub fn extract(self, record: &MessageRecord) -> Result<String> {
        match self {
            // 原样返回，"显示名 <地址>" 形式不做拆分
            Self::Sender => Ok(record.get_str(record::SENDER)?.unwrap_or_default().to_string()),
            // 只去除首尾空白，保留 Re:/Fwd: 前缀
            Self::Subject => Ok(record
                .get_str(record::SUBJECT)?
                .unwrap_or_default()
                .trim()
                .to_string()),
            Self::Body => {
                let text = record.get_str(record::CONTENT_TEXT)?.unwrap_or_default();
                if !text.is_empty() {
                    return Ok(text.to_string());
                }
                Ok(record
                    .get_str(record::CONTENT_HTML)?
                    .unwrap_or_default()
                    .to_string())
            }
            Self::Header => Ok(record
                .get_str(record::RAW_HEADERS)?
                .unwrap_or_default()
                .to_string()),
            Self::Attachment => Ok(record.attachment_filenames()?.join(",")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Subject => "subject",
            Self::Body => "body",
            Self::Header => "header",
            Self::Attachment => "attachment",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == lowered)
            .ok_or_else(|| RuleError::Rule(format!("不支持的字段类型: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> MessageRecord {
        MessageRecord::from_value(json!({
            "message_id": "<abc@corp.com>",
            "sender": "Big Boss <BOSS@corp.com>",
            "subject": "  Re: Weekly report \t",
            "content_text": "",
            "content_html": "<p>hello</p>",
            "raw_headers": "X-Mailer: Foo\r\nX-Spam: yes",
            "attachments": [{"filename": "a.pdf"}, {"filename": "b.png"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_sender_is_raw() {
        assert_eq!(
            FieldType::Sender.extract(&record()).unwrap(),
            "Big Boss <BOSS@corp.com>"
        );
    }

    #[test]
    fn test_subject_trimmed_keeps_prefix() {
        assert_eq!(
            FieldType::Subject.extract(&record()).unwrap(),
            "Re: Weekly report"
        );
    }

    #[test]
    fn test_body_falls_back_to_html() {
        assert_eq!(FieldType::Body.extract(&record()).unwrap(), "<p>hello</p>");

        let with_text = record().with("content_text", "plain");
        assert_eq!(FieldType::Body.extract(&with_text).unwrap(), "plain");
    }

    #[test]
    fn test_header_and_attachment() {
        assert!(FieldType::Header
            .extract(&record())
            .unwrap()
            .contains("X-Spam: yes"));
        assert_eq!(FieldType::Attachment.extract(&record()).unwrap(), "a.pdf,b.png");
    }

    #[test]
    fn test_missing_fields_are_empty() {
        let empty = MessageRecord::default();
        for field in FieldType::ALL {
            assert_eq!(field.extract(&empty).unwrap(), "");
        }
    }

    #[test]
    fn test_decode_error_surfaces() {
        let broken = MessageRecord::default().with("subject", json!(["not", "text"]));
        assert!(FieldType::Subject.extract(&broken).is_err());
    }

    #[test]
    fn test_parse_field_type() {
        assert_eq!("Header".parse::<FieldType>().unwrap(), FieldType::Header);
        assert!("to".parse::<FieldType>().is_err());
    }
}
