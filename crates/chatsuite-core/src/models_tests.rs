//! Unit tests for domain models.

use super::*;

#[cfg(test)]
mod message_role_tests {
    use super::*;

    #[test]
    fn display_roles() {
        assert_eq!(MessageRole::User.to_string(), "user");
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
        assert_eq!(MessageRole::Tool.to_string(), "tool");
        assert_eq!(MessageRole::System.to_string(), "system");
    }

    #[test]
    fn from_user_variants() {
        assert_eq!(MessageRole::from("user"), MessageRole::User);
        assert_eq!(MessageRole::from("User"), MessageRole::User);
        assert_eq!(MessageRole::from("human"), MessageRole::User);
    }

    #[test]
    fn from_tool_variants() {
        assert_eq!(MessageRole::from("tool"), MessageRole::Tool);
        assert_eq!(MessageRole::from("function"), MessageRole::Tool);
    }

    #[test]
    fn from_unknown_returns_other() {
        assert_eq!(MessageRole::from("data"), MessageRole::Other);
        assert_eq!(MessageRole::from(""), MessageRole::Other);
    }

    #[test]
    fn serde_deserializes_unknown_as_other() {
        let parsed: MessageRole = serde_json::from_str(r#""data""#).expect("deserialize");
        assert_eq!(parsed, MessageRole::Other);
    }
}

#[cfg(test)]
mod message_content_tests {
    use super::*;
    use crate::parts::Part;

    #[test]
    fn deserializes_plain_string() {
        let content: MessageContent = serde_json::from_str(r#""hello""#).expect("deserialize");
        assert_eq!(content, MessageContent::Text("hello".to_string()));
    }

    #[test]
    fn deserializes_part_array() {
        let content: MessageContent = serde_json::from_str(
            r#"[{"type":"text","text":"a"},{"type":"tool-call","toolCallId":"c1","toolName":"browseInternet","args":{"query":"rust"}}]"#,
        )
        .expect("deserialize");
        let MessageContent::Parts(parts) = content else {
            panic!("expected parts");
        };
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn text_joins_text_parts_only() {
        let content = MessageContent::Parts(vec![
            Part::text("Hello, "),
            Part::tool_call("c1", "browseInternet", serde_json::json!({})),
            Part::text("world"),
        ]);
        assert_eq!(content.text(), "Hello, world");
    }

    #[test]
    fn blank_detection() {
        assert!(MessageContent::Text("  \n".to_string()).is_blank());
        assert!(MessageContent::Parts(vec![Part::text(" ")]).is_blank());
        assert!(!MessageContent::Parts(vec![Part::tool_call(
            "c1",
            "createDocument",
            serde_json::json!({})
        )])
        .is_blank());
    }
}

#[cfg(test)]
mod chat_tests {
    use super::*;

    #[test]
    fn default_title_detection() {
        let mut chat = Chat {
            id: "chat-1".to_string(),
            user_id: "user-1".to_string(),
            title: DEFAULT_CHAT_TITLE.to_string(),
            created_at: Utc::now(),
        };
        assert!(chat.has_default_title());
        chat.title = "Trip planning".to_string();
        assert!(!chat.has_default_title());
    }
}

#[cfg(test)]
mod credit_usage_tests {
    use super::*;

    #[test]
    fn header_value_is_json() {
        let usage = CreditUsage {
            cost: 1,
            remaining: 41,
        };
        assert_eq!(usage.header_value(), r#"{"cost":1,"remaining":41}"#);
        let parsed: CreditUsage = serde_json::from_str(&usage.header_value()).expect("parse");
        assert_eq!(parsed, usage);
    }
}
