//! Commands sent to the navigation controller and the typed responses it
//! returns.

use crate::error::{AuditError, Result};
use crate::node::Node;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Focus(Node),
    Click(Node),
    Next,
    Previous,
    JumpNext,
    JumpPrevious,
    Info {
        question: String,
        extra: Option<Value>,
    },
}

impl Command {
    pub fn info(question: &str) -> Self {
        Command::Info {
            question: question.to_string(),
            extra: None,
        }
    }

    /// One directional step in the given direction and granularity.
    pub fn navigation(forward: bool, jump: bool) -> Self {
        match (forward, jump) {
            (true, false) => Command::Next,
            (false, false) => Command::Previous,
            (true, true) => Command::JumpNext,
            (false, true) => Command::JumpPrevious,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Focus(_) => "focus",
            Command::Click(_) => "click",
            Command::Next => "next",
            Command::Previous => "previous",
            Command::JumpNext => "jump_next",
            Command::JumpPrevious => "jump_previous",
            Command::Info { .. } => "info",
        }
    }

    /// JSON handed to the on-device service.
    pub fn payload(&self) -> Value {
        match self {
            Command::Focus(node) | Command::Click(node) => json!({
                "name": self.name(),
                "node": node.to_json(),
            }),
            Command::Info { question, extra } => json!({
                "name": self.name(),
                "question": question,
                "extra": extra,
            }),
            _ => json!({ "name": self.name() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum LocatableState {
    Completed,
    FailedLocate,
    /// Any other terminal state the service reports (timeouts, generic
    /// failures). It does not mean the element could not be located.
    Failed,
}

impl From<String> for LocatableState {
    fn from(raw: String) -> Self {
        match raw.trim() {
            "COMPLETED" => LocatableState::Completed,
            "FAILED_LOCATE" => LocatableState::FailedLocate,
            _ => LocatableState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Locatable { state: LocatableState, raw: Value },
    Navigate { navigated_node: Option<Node> },
    Info { answer: Option<Value> },
}

impl CommandResponse {
    /// Parse the controller's result artifact for `command`.
    pub fn parse(command: &Command, raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw.trim())
            .map_err(|err| AuditError::Protocol(format!("{} result is not JSON: {err}", command.name())))?;
        if !value.is_object() {
            return Err(AuditError::Protocol(format!(
                "{} result is not an object",
                command.name()
            )));
        }

        match command {
            Command::Focus(_) | Command::Click(_) => {
                let state = value
                    .get("state")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AuditError::Protocol(format!("{} result has no state", command.name()))
                    })?;
                Ok(CommandResponse::Locatable {
                    state: LocatableState::from(state.to_string()),
                    raw: value,
                })
            }
            Command::Next | Command::Previous | Command::JumpNext | Command::JumpPrevious => {
                let navigated_node = match value.get("navigated_node") {
                    None | Some(Value::Null) => None,
                    Some(node) => Some(serde_json::from_value::<Node>(node.clone()).map_err(
                        |err| AuditError::Protocol(format!("bad navigated_node: {err}")),
                    )?),
                };
                Ok(CommandResponse::Navigate { navigated_node })
            }
            Command::Info { .. } => Ok(CommandResponse::Info {
                answer: value.get("answer").filter(|v| !v.is_null()).cloned(),
            }),
        }
    }

    /// Node carried by an `Info` answer, e.g. for `a11y_focused`.
    pub fn answer_node(&self) -> Option<Node> {
        match self {
            CommandResponse::Info {
                answer: Some(answer),
            } => serde_json::from_value(answer.clone()).ok(),
            _ => None,
        }
    }

    /// Boolean `result` of an `Info` answer, e.g. for `is_focused`.
    pub fn answer_flag(&self) -> bool {
        match self {
            CommandResponse::Info {
                answer: Some(answer),
            } => answer.get("result").and_then(Value::as_bool).unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn focus() -> Command {
        Command::Focus(Node {
            xpath: "/a".to_string(),
            ..Node::default()
        })
    }

    #[test]
    fn navigation_picks_variant() {
        assert_eq!(Command::navigation(true, false), Command::Next);
        assert_eq!(Command::navigation(false, true), Command::JumpPrevious);
    }

    #[test]
    fn focus_result_parses_as_locatable() {
        let resp = CommandResponse::parse(&focus(), r#"{"state":"FAILED_LOCATE","time":12}"#).unwrap();
        assert!(matches!(
            resp,
            CommandResponse::Locatable {
                state: LocatableState::FailedLocate,
                ..
            }
        ));
        let other = CommandResponse::parse(&focus(), r#"{"state":"TIMEOUT"}"#).unwrap();
        assert!(matches!(
            other,
            CommandResponse::Locatable {
                state: LocatableState::Failed,
                ..
            }
        ));
    }

    #[test]
    fn locatable_without_state_is_protocol_error() {
        let err = CommandResponse::parse(&focus(), "{}").unwrap_err();
        assert!(matches!(err, AuditError::Protocol(_)));
    }

    #[test]
    fn navigate_with_null_node() {
        let resp = CommandResponse::parse(&Command::Next, r#"{"navigated_node":null}"#).unwrap();
        assert_eq!(resp, CommandResponse::Navigate { navigated_node: None });
        let resp =
            CommandResponse::parse(&Command::Next, r#"{"navigated_node":{"xpath":"/x"}}"#).unwrap();
        match resp {
            CommandResponse::Navigate {
                navigated_node: Some(node),
            } => assert_eq!(node.xpath, "/x"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn info_answers() {
        let q = Command::info("is_focused");
        let yes = CommandResponse::parse(&q, r#"{"answer":{"result":true}}"#).unwrap();
        assert!(yes.answer_flag());
        let none = CommandResponse::parse(&q, r#"{"answer":null}"#).unwrap();
        assert!(!none.answer_flag());
        assert!(none.answer_node().is_none());
    }

    #[test]
    fn payload_carries_node_and_action() {
        let cmd = Command::Click(Node {
            xpath: "/b".to_string(),
            ..Node::default()
        });
        let payload = cmd.payload();
        assert_eq!(payload["name"], "click");
        assert_eq!(payload["node"]["xpath"], "/b");
    }
}
