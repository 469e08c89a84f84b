//! Parser for the action directives embedded in engine output.
//!
//! ```text
//! Sure, turning on the lights.
//! <action device="living-room-light" capability="power" state="on"/>
//! <confidence>0.9</confidence>
//! ```
//!
//! Everything that is not a recognised tag is the spoken reply.

use std::collections::HashMap;

/// Instructions for the engine, appended to the system prompt.
pub const ACTION_SCHEMA: &str = r#"[How to act]
Answer in one or two short, friendly sentences; they will be spoken aloud.
To change a device, add one tag per change anywhere in your answer:
<action device="DEVICE_ID" capability="CAPABILITY" state="STATE"/>
Only use devices, capabilities and states from the device list.
Optionally rate how sure you are with <confidence>0.0-1.0</confidence>.
If nothing needs to change, just answer without tags."#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDirective {
    pub device: String,
    pub capability: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directives {
    pub reply: Option<String>,
    pub actions: Vec<ActionDirective>,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

fn err<T>(msg: impl Into<String>) -> Result<T, ParseError> {
    Err(ParseError(msg.into()))
}

/// Whether `text` starts with `<name` followed by a tag boundary.
fn opens_tag(text: &str, name: &str) -> bool {
    text.strip_prefix('<')
        .and_then(|rest| rest.strip_prefix(name))
        .is_some_and(|rest| {
            rest.starts_with(|c: char| c.is_whitespace() || c == '/' || c == '>')
        })
}

/// Byte offset of the `>` closing a tag, skipping quoted attribute values.
fn tag_end(tag: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (i, c) in tag.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '>' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_attributes(body: &str) -> Result<HashMap<String, String>, ParseError> {
    let mut attrs = HashMap::new();
    let mut rest = body.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            return err(format!("attribute without value near '{rest}'"));
        };
        let name = rest[..eq].trim().to_lowercase();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return err(format!("malformed attribute name '{name}'"));
        }
        let after = rest[eq + 1..].trim_start();
        let Some(quoted) = after.strip_prefix('"') else {
            return err(format!("value of '{name}' must be double-quoted"));
        };
        let Some(close) = quoted.find('"') else {
            return err(format!("unterminated value for '{name}'"));
        };
        attrs.insert(name, quoted[..close].trim().to_string());
        rest = quoted[close + 1..].trim_start();
    }

    Ok(attrs)
}

fn parse_action(body: &str) -> Result<ActionDirective, ParseError> {
    let attrs = parse_attributes(body.trim_end_matches('/'))?;
    let required = |name: &str| -> Result<String, ParseError> {
        match attrs.get(name) {
            Some(v) if !v.is_empty() => Ok(v.clone()),
            _ => err(format!("action is missing '{name}'")),
        }
    };
    Ok(ActionDirective {
        device: required("device")?,
        capability: required("capability")?,
        state: required("state")?,
    })
}

/// Split engine output into reply text, actions and confidence.
pub fn parse(output: &str) -> Result<Directives, ParseError> {
    let mut reply = String::new();
    let mut actions = Vec::new();
    let mut confidence: Option<f32> = None;
    let mut rest = output;

    while let Some(pos) = rest.find('<') {
        reply.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if opens_tag(tail, "action") {
            let Some(end) = tag_end(tail) else {
                return err("unterminated <action> tag");
            };
            actions.push(parse_action(&tail["<action".len()..end])?);
            rest = &tail[end + 1..];
            // Tolerate an explicit close after a non-self-closing tag
            if let Some(after) = rest.trim_start().strip_prefix("</action>") {
                rest = after;
            }
        } else if opens_tag(tail, "confidence") {
            let Some(open_end) = tail.find('>') else {
                return err("unterminated <confidence> tag");
            };
            let Some(close) = tail.find("</confidence>") else {
                return err("unterminated <confidence> tag");
            };
            if close < open_end {
                return err("malformed <confidence> tag");
            }
            let raw = tail[open_end + 1..close].trim();
            let value: f32 = raw
                .parse()
                .map_err(|_| ParseError(format!("confidence '{raw}' is not a number")))?;
            if value.is_nan() {
                return err("confidence is NaN");
            }
            confidence = Some(value.clamp(0.0, 1.0));
            rest = &tail[close + "</confidence>".len()..];
        } else {
            reply.push('<');
            rest = &tail[1..];
        }
    }
    reply.push_str(rest);

    let reply = reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let reply = (!reply.is_empty()).then_some(reply);

    if reply.is_none() && actions.is_empty() {
        return err("output contains neither a reply nor an action");
    }

    Ok(Directives {
        reply,
        actions,
        confidence: confidence.unwrap_or(1.0),
    })
}

/// Tags hidden while a reply streams in.
const STREAM_TAGS: [&str; 4] = ["action", "confidence", "/action", "/confidence"];

/// Removes directive tags from engine output as it streams in, so the reply
/// can be shown before the whole answer is parsed. Text that only looks like
/// the start of a tag is held back until it is decided.
#[derive(Debug, Default)]
pub struct ReplyFilter {
    held: String,
    in_tag: bool,
    in_confidence: bool,
}

impl ReplyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next piece of output; returns its visible part.
    pub fn push(&mut self, chunk: &str) -> String {
        let mut visible = String::new();
        for c in chunk.chars() {
            if self.held.is_empty() {
                if c == '<' {
                    self.held.push(c);
                } else if !self.in_confidence {
                    visible.push(c);
                }
                continue;
            }

            self.held.push(c);
            if !self.in_tag {
                if STREAM_TAGS.iter().any(|name| opens_tag(&self.held, name)) {
                    self.in_tag = true;
                } else if !self.could_open_tag() {
                    self.release(&mut visible);
                }
            }
            if self.in_tag && tag_end(&self.held).is_some() {
                let tag = std::mem::take(&mut self.held);
                self.in_tag = false;
                if opens_tag(&tag, "confidence") {
                    self.in_confidence = true;
                } else if opens_tag(&tag, "/confidence") {
                    self.in_confidence = false;
                }
            }
        }
        visible
    }

    /// Visible text still held back when the output ends.
    pub fn flush(&mut self) -> String {
        let held = std::mem::take(&mut self.held);
        if self.in_tag || self.in_confidence {
            String::new()
        } else {
            held
        }
    }

    fn could_open_tag(&self) -> bool {
        self.held
            .strip_prefix('<')
            .is_some_and(|rest| STREAM_TAGS.iter().any(|name| name.starts_with(rest)))
    }

    /// Emit held text that turned out not to be a tag. A trailing `<` may
    /// still open one.
    fn release(&mut self, visible: &mut String) {
        let held = std::mem::take(&mut self.held);
        let (text, restart) = match held.strip_suffix('<') {
            Some(text) if !text.is_empty() => (text, true),
            _ => (held.as_str(), false),
        };
        if !self.in_confidence {
            visible.push_str(text);
        }
        if restart {
            self.held.push('<');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_action_and_confidence() {
        let out = parse(
            "Sure, turning on the lights.\n<action device=\"living-room-light\" capability=\"power\" state=\"on\"/>\n<confidence>0.9</confidence>",
        )
        .unwrap();
        assert_eq!(out.reply.as_deref(), Some("Sure, turning on the lights."));
        assert_eq!(
            out.actions,
            vec![ActionDirective {
                device: "living-room-light".into(),
                capability: "power".into(),
                state: "on".into(),
            }]
        );
        assert!((out.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn plain_reply_defaults_confidence() {
        let out = parse("It's 7pm.").unwrap();
        assert_eq!(out.reply.as_deref(), Some("It's 7pm."));
        assert!(out.actions.is_empty());
        assert_eq!(out.confidence, 1.0);
    }

    #[test]
    fn actions_only_has_no_reply() {
        let out = parse(
            r#"<action device="fan" capability="power" state="off"/><action device="living-room-light" capability="power" state="off" />"#,
        )
        .unwrap();
        assert!(out.reply.is_none());
        assert_eq!(out.actions.len(), 2);
    }

    #[test]
    fn order_and_unknown_attributes() {
        let out = parse(
            r#"Okay. <action state="open" room="living" capability="position" device="curtains"></action> Done."#,
        )
        .unwrap();
        assert_eq!(out.actions[0].device, "curtains");
        assert_eq!(out.reply.as_deref(), Some("Okay.  Done."));
    }

    #[test]
    fn stray_angle_brackets_stay_in_reply() {
        let out = parse("It is < 20 degrees <3").unwrap();
        assert_eq!(out.reply.as_deref(), Some("It is < 20 degrees <3"));
    }

    #[test]
    fn confidence_is_clamped() {
        let out = parse("Hi <confidence>1.7</confidence>").unwrap();
        assert_eq!(out.confidence, 1.0);
        let out = parse("Hi <confidence>-2</confidence>").unwrap();
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn malformed_outputs_are_errors() {
        assert!(parse("").is_err());
        assert!(parse("   \n ").is_err());
        assert!(parse(r#"<action device="fan" capability="power""#).is_err());
        assert!(parse(r#"<action device="fan" capability="power"/>"#).is_err());
        assert!(parse(r#"<action device="fan" capability="power" state=""/>"#).is_err());
        assert!(parse(r#"<action device=fan capability="power" state="on"/>"#).is_err());
        assert!(parse("Hi <confidence>very</confidence>").is_err());
        assert!(parse("Hi <confidence>0.5").is_err());
        assert!(parse("Hi <confidence>NaN</confidence>").is_err());
    }

    #[test]
    fn quoted_angle_bracket_does_not_end_tag() {
        let out = parse(r#"<action device="fan" capability="speed" state="a>b"/> ok"#).unwrap();
        assert_eq!(out.actions[0].state, "a>b");
    }

    fn stream(chunks: &[&str]) -> String {
        let mut filter = ReplyFilter::new();
        let mut visible: String = chunks.iter().map(|c| filter.push(c)).collect();
        visible.push_str(&filter.flush());
        visible
    }

    #[test]
    fn stream_hides_tags_split_across_chunks() {
        let visible = stream(&[
            "Sure, lights <act",
            r#"ion device="x" capability="power" state="on"/> on.<confi"#,
            "dence>0.9</confidence>",
        ]);
        assert_eq!(visible, "Sure, lights  on.");
    }

    #[test]
    fn stream_keeps_brackets_that_are_not_tags() {
        assert_eq!(stream(&["It is < 20 degrees <3"]), "It is < 20 degrees <3");
        assert_eq!(stream(&["a <", "<b"]), "a <<b");
        assert_eq!(stream(&["Bye <"]), "Bye <");
    }

    #[test]
    fn stream_handles_quoted_angle_bracket() {
        let visible = stream(&[r#"ok <action device="fan" capability="speed" state="a>b"/>!"#]);
        assert_eq!(visible, "ok !");
    }
}
