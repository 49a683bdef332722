use relay_client::ChatSnapshot;
use relay_core::{Message, Role};
use std::collections::{HashMap, HashSet};
use std::io::Write;

/// Turns successive snapshots into incremental terminal output.
///
/// Only what changed since the previous snapshot is written: new assistant
/// text, tool calls as they are attached and resolved, and errors.
#[derive(Default)]
pub struct Renderer {
    printed: HashMap<String, usize>,
    tools_seen: HashSet<String>,
    tools_resolved: HashSet<String>,
    closed: HashSet<String>,
    last_error: Option<String>,
}

impl Renderer {
    /// Marks everything in `messages` as already shown.
    pub fn mark_seen(&mut self, messages: &[Message]) {
        for message in messages {
            self.printed.insert(message.id.clone(), message.text().len());
            if !message.is_streaming() {
                self.closed.insert(message.id.clone());
            }
            for tool in &message.tools {
                self.tools_seen.insert(tool.id.clone());
                if tool.is_resolved() {
                    self.tools_resolved.insert(tool.id.clone());
                }
            }
        }
    }

    pub fn render(&mut self, snapshot: &ChatSnapshot, out: &mut impl Write) -> std::io::Result<()> {
        for message in &snapshot.messages {
            if message.role == Role::User {
                continue;
            }
            for tool in &message.tools {
                if self.tools_seen.insert(tool.id.clone()) {
                    writeln!(out, "\n  [tool] {}({})", tool.name, tool.arguments)?;
                }
                if let Some(result) = &tool.result {
                    if self.tools_resolved.insert(tool.id.clone()) {
                        writeln!(out, "  [tool] {} -> {result}", tool.name)?;
                    }
                }
            }

            let text = message.text();
            let done = self.printed.entry(message.id.clone()).or_insert(0);
            if text.len() > *done {
                if *done == 0 {
                    let label = if message.is_error { "error" } else { "relay" };
                    write!(out, "{label}> ")?;
                }
                // Deltas only ever append, so the printed prefix is a char boundary.
                write!(out, "{}", text.get(*done..).unwrap_or_default())?;
                *done = text.len();
            }
            if *done > 0 && !message.is_streaming() && self.closed.insert(message.id.clone()) {
                writeln!(out)?;
            }
        }

        if snapshot.last_error != self.last_error {
            if let Some(err) = &snapshot.last_error {
                writeln!(out, "\n  ! {err}")?;
            }
            self.last_error = snapshot.last_error.clone();
        }
        out.flush()
    }
}

/// One line per message, for `relay history`.
pub fn format_message(message: &Message) -> String {
    let mut line = format!(
        "[{}] {}: {}",
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.role,
        message.text()
    );
    for tool in &message.tools {
        line.push_str(&format!(
            "\n    tool {}({}) -> {}",
            tool.name,
            tool.arguments,
            tool.result.as_deref().unwrap_or("(pending)")
        ));
    }
    line
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use relay_core::{MessageStatus, ToolCall};

    fn render_all(renderer: &mut Renderer, snapshot: &ChatSnapshot) -> String {
        let mut out = Vec::new();
        renderer.render(snapshot, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn streaming(text: &str) -> Message {
        let mut msg = Message::streaming_assistant("a1");
        msg.content.push_str(text);
        msg
    }

    #[test]
    fn test_prints_only_new_text() {
        let mut renderer = Renderer::default();
        let mut snap = ChatSnapshot {
            messages: vec![Message::user("hi"), streaming("Hel")],
            ..Default::default()
        };
        assert_eq!(render_all(&mut renderer, &snap), "relay> Hel");

        snap.messages[1].content.push_str("lo");
        assert_eq!(render_all(&mut renderer, &snap), "lo");

        snap.messages[1].status = MessageStatus::Complete;
        assert_eq!(render_all(&mut renderer, &snap), "\n");
        assert_eq!(render_all(&mut renderer, &snap), "");
    }

    #[test]
    fn test_tool_events_printed_once() {
        let mut renderer = Renderer::default();
        let mut msg = streaming("");
        msg.tools.push(ToolCall::new("t1", "get_balance", "{}"));
        let mut snap = ChatSnapshot {
            messages: vec![msg],
            ..Default::default()
        };
        let out = render_all(&mut renderer, &snap);
        assert!(out.contains("[tool] get_balance({})"));
        assert_eq!(render_all(&mut renderer, &snap), "");

        snap.messages[0].tools[0].result = Some("42".into());
        let out = render_all(&mut renderer, &snap);
        assert!(out.contains("get_balance -> 42"));
    }

    #[test]
    fn test_seen_history_is_skipped() {
        let mut renderer = Renderer::default();
        let old = Message::assistant("old reply");
        renderer.mark_seen(std::slice::from_ref(&old));
        let snap = ChatSnapshot {
            messages: vec![old],
            last_error: Some("Network failure: down".into()),
            ..Default::default()
        };
        let out = render_all(&mut renderer, &snap);
        assert!(!out.contains("old reply"));
        assert!(out.contains("! Network failure: down"));
    }

    #[test]
    fn test_format_message_lists_tools() {
        let mut msg = Message::assistant("done");
        msg.tools.push(ToolCall::new("t1", "swap", r#"{"amount":1}"#));
        let line = format_message(&msg);
        assert!(line.contains("assistant: done"));
        assert!(line.contains("swap({\"amount\":1}) -> (pending)"));
    }
}
