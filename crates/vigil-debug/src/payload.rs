//! Payload builders for the markup sub-format.
//!
//! Variable and frame dumps are `<var ... />` lines, newline-separated
//! inside the payload and escaped at the outer layer. Container
//! children are fetched lazily by separate commands, never embedded
//! recursively.

use vigil_runtime::control::{StopNotice, StopReason};
use vigil_runtime::frame::Frame;
use vigil_runtime::value::Value;

use crate::render::{escape_attr, RenderedValue, Renderer};
use crate::wire::escape_field;

/// One `<var ... />` element. Boolean attributes are emitted only when
/// set.
#[must_use]
pub fn var_markup(name: &str, rendered: &RenderedValue) -> String {
    let mut out = format!(
        "<var name=\"{}\" type=\"{}\" qualifier=\"{}\" value=\"{}\"",
        escape_attr(name),
        escape_attr(&rendered.type_name),
        escape_attr(rendered.qualifier.as_deref().unwrap_or("")),
        escape_attr(&rendered.display),
    );
    if rendered.is_container {
        out.push_str(" isContainer=\"true\"");
    }
    if rendered.is_error_on_eval {
        out.push_str(" isErrorOnEval=\"true\"");
    }
    out.push_str(" />");
    out
}

/// Markup for a named value.
#[must_use]
pub fn render_var(renderer: &Renderer, name: &str, value: &Value) -> String {
    var_markup(name, &renderer.render(value))
}

/// A frame dump: one `<var ... />` line per assigned local, in slot
/// order, escaped as a single wire field.
#[must_use]
pub fn frame_dump(renderer: &Renderer, frame: &Frame) -> String {
    let lines = frame
        .named_locals()
        .iter()
        .map(|(name, value)| render_var(renderer, name, value))
        .collect::<Vec<_>>()
        .join("\n");
    escape_field(&lines)
}

/// Children of one container value, same shape as a frame dump.
#[must_use]
pub fn children_dump(renderer: &Renderer, value: &Value) -> String {
    let lines = renderer
        .children(value)
        .iter()
        .map(|(name, child)| render_var(renderer, name, child))
        .collect::<Vec<_>>()
        .join("\n");
    escape_field(&lines)
}

/// Wire text for a stop reason.
#[must_use]
pub fn reason_text(reason: StopReason) -> String {
    match reason {
        StopReason::Breakpoint(id) => format!("breakpoint:{id}"),
        StopReason::Step => "step".to_string(),
        StopReason::Pause => "pause".to_string(),
        StopReason::Exception => "exception".to_string(),
    }
}

/// Payload of a suspend notification: thread id, reason, location, and
/// the stopped frame's dump.
#[must_use]
pub fn suspend_payload(renderer: &Renderer, notice: &StopNotice) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        escape_field(&notice.thread.to_string()),
        escape_field(&reason_text(notice.reason)),
        escape_field(&notice.frame.code.file),
        notice.frame.line,
        frame_dump(renderer, &notice.frame),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Renderer;
    use vigil_runtime::value::Value;

    #[test]
    fn markup_escapes_attribute_text() {
        let renderer = Renderer::new();
        let markup = render_var(&renderer, "my_name", &Value::Str("a b".into()));
        assert!(markup.contains("name=\"my%5Fname\""));
        assert!(markup.contains("value=\"'a%20b'\""));
        assert!(markup.ends_with("/>"));
    }

    #[test]
    fn container_flag_appears_only_when_set() {
        let renderer = Renderer::new();
        let list = render_var(&renderer, "xs", &Value::List(vec![Value::Int(1)]));
        assert!(list.contains("isContainer=\"true\""));
        let scalar = render_var(&renderer, "n", &Value::Int(1));
        assert!(!scalar.contains("isContainer"));
        assert!(!scalar.contains("isErrorOnEval"));
    }
}
