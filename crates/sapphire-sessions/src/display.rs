use sapphire_core::types::{Message, Role};
use serde::Serialize;

/// One item of an assistant display block, in rendering order.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayPart {
    Content {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        name: String,
        result: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        inputs: Option<serde_json::Value>,
    },
}

/// UI-facing view of a chat: user messages stay as-is, each assistant run
/// (assistant + tool results + continuations) collapses into one block with
/// an ordered `parts` array.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayBlock {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<DisplayPart>>,
    pub timestamp: String,
}

/// Group messages for display. The underlying list is not mutated.
pub fn to_display(messages: &[Message]) -> Vec<DisplayBlock> {
    let mut blocks: Vec<DisplayBlock> = Vec::new();
    let mut current: Option<DisplayBlock> = None;

    for msg in messages {
        match msg.role {
            Role::User => {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                blocks.push(DisplayBlock {
                    role: Role::User,
                    content: Some(msg.content.clone()),
                    parts: None,
                    timestamp: msg.timestamp.clone(),
                });
            }
            Role::Assistant => {
                let block = current.get_or_insert_with(|| DisplayBlock {
                    role: Role::Assistant,
                    content: None,
                    parts: Some(Vec::new()),
                    timestamp: msg.timestamp.clone(),
                });
                let parts = block.parts.get_or_insert_with(Vec::new);
                if !msg.content.is_empty() {
                    parts.push(DisplayPart::Content {
                        text: msg.content.clone(),
                    });
                }
                for tc in &msg.tool_calls {
                    parts.push(DisplayPart::ToolCall {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    });
                }
            }
            Role::Tool => {
                let block = current.get_or_insert_with(|| DisplayBlock {
                    role: Role::Assistant,
                    content: None,
                    parts: Some(Vec::new()),
                    timestamp: msg.timestamp.clone(),
                });
                block
                    .parts
                    .get_or_insert_with(Vec::new)
                    .push(DisplayPart::ToolResult {
                        name: msg.name.clone().unwrap_or_default(),
                        result: msg.content.clone(),
                        inputs: msg.tool_inputs.clone(),
                    });
            }
            Role::System => {}
        }
    }

    if let Some(block) = current {
        blocks.push(block);
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use sapphire_core::types::ToolCall;

    fn user(content: &str, ts: &str) -> Message {
        Message::user(content, ts.to_string())
    }

    #[test]
    fn assistant_run_groups_into_one_block() {
        let messages = vec![
            user("what time is it", "t1"),
            Message {
                tool_calls: vec![ToolCall {
                    id: "tc_1".into(),
                    name: "time_date".into(),
                    arguments: "{}".into(),
                }],
                ..Message::assistant("", "t2".into())
            },
            Message {
                role: Role::Tool,
                content: "It's 3:05 PM.".into(),
                timestamp: "t3".into(),
                tool_calls: Vec::new(),
                tool_call_id: Some("tc_1".into()),
                name: Some("time_date".into()),
                tool_inputs: None,
            },
            Message::assistant("It's 3:05 PM.", "t4".into()),
        ];

        let display = to_display(&messages);
        assert_eq!(display.len(), 2);
        let parts = display[1].parts.as_ref().unwrap();
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[0], DisplayPart::ToolCall { .. }));
        assert!(matches!(parts[1], DisplayPart::ToolResult { .. }));
        assert!(matches!(parts[2], DisplayPart::Content { .. }));
    }

    #[test]
    fn user_message_closes_open_block() {
        let messages = vec![
            user("one", "t1"),
            Message::assistant("reply", "t2".into()),
            user("two", "t3"),
        ];
        let display = to_display(&messages);
        assert_eq!(display.len(), 3);
        assert_eq!(display[2].content.as_deref(), Some("two"));
    }
}
