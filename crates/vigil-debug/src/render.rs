//! Bounded, escaped rendering of runtime values.
//!
//! Rendering is shallow: containers display a summary one level deep
//! and their children are fetched lazily through a resolver, never
//! embedded recursively. Rendering never fails; a value whose own
//! stringification raises is rendered as the error text with the
//! error flag set.

use std::sync::Arc;

use smol_str::SmolStr;
use vigil_runtime::value::Value;

/// Marker appended when a display string was cut at the length bound.
pub const ELLIPSIS: &str = "...";

/// Default display-length bound.
pub const DEFAULT_MAX_LENGTH: usize = 256;

/// The renderer's output for one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedValue {
    /// Runtime type name.
    pub type_name: SmolStr,
    /// Originating namespace, when the type has one.
    pub qualifier: Option<SmolStr>,
    /// Escaped, length-bounded display string.
    pub display: String,
    /// Whether children can be fetched through a resolver.
    pub is_container: bool,
    /// Whether stringifying the value raised; `display` then carries
    /// the error text.
    pub is_error_on_eval: bool,
}

/// Produces the children of a container value for lazy fetching.
pub trait ChildResolver: Send + Sync {
    /// Named children, one level deep.
    fn children(&self, value: &Value) -> Vec<(String, Value)>;
}

type Predicate = fn(&Value) -> bool;

/// Value renderer with an open resolver registry.
///
/// Containment is decided by the registered `(predicate, resolver)`
/// pairs, consulted in registration order; the first matching predicate
/// wins. The built-in pairs cover lists, maps, and objects.
pub struct Renderer {
    resolvers: Vec<(Predicate, Arc<dyn ChildResolver>)>,
    max_length: usize,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    /// A renderer with the built-in container resolvers.
    #[must_use]
    pub fn new() -> Self {
        let mut renderer = Self {
            resolvers: Vec::new(),
            max_length: DEFAULT_MAX_LENGTH,
        };
        renderer.register(|v| matches!(v, Value::List(_)), Arc::new(ListResolver));
        renderer.register(|v| matches!(v, Value::Map(_)), Arc::new(MapResolver));
        renderer.register(|v| matches!(v, Value::Object(_)), Arc::new(ObjectResolver));
        renderer
    }

    /// Override the display-length bound.
    #[must_use]
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Register a resolver; later registrations are consulted after
    /// earlier ones.
    pub fn register(&mut self, predicate: Predicate, resolver: Arc<dyn ChildResolver>) {
        self.resolvers.push((predicate, resolver));
    }

    /// The resolver responsible for `value`, if any.
    #[must_use]
    pub fn resolver_for(&self, value: &Value) -> Option<&Arc<dyn ChildResolver>> {
        self.resolvers
            .iter()
            .find(|(predicate, _)| predicate(value))
            .map(|(_, resolver)| resolver)
    }

    /// Children of a container value, empty for scalars.
    #[must_use]
    pub fn children(&self, value: &Value) -> Vec<(String, Value)> {
        self.resolver_for(value)
            .map(|resolver| resolver.children(value))
            .unwrap_or_default()
    }

    /// Render one value. Never fails.
    #[must_use]
    pub fn render(&self, value: &Value) -> RenderedValue {
        self.render_bounded(value, self.max_length)
    }

    /// Render with an explicit length bound.
    #[must_use]
    pub fn render_bounded(&self, value: &Value, max_length: usize) -> RenderedValue {
        let is_container = self.resolver_for(value).is_some();
        let (raw, is_error_on_eval) = match display_string(value) {
            Ok(text) => (text, false),
            Err(text) => (text, true),
        };
        RenderedValue {
            type_name: value.type_name(),
            qualifier: value.type_qualifier(),
            // Escape before cutting: entities count against the bound.
            display: truncate(&escape_outer(&raw), max_length),
            is_container,
            is_error_on_eval,
        }
    }
}

/// Shallow display text, before escaping and truncation. `Err` carries
/// the error text of a failed stringification.
fn display_string(value: &Value) -> Result<String, String> {
    match value {
        Value::List(items) => Ok(format!(
            "[{}] ({} items)",
            summarize(items.iter()),
            items.len()
        )),
        Value::Map(entries) => {
            let inner = entries
                .iter()
                .take(SUMMARY_ITEMS)
                .map(|(k, v)| format!("{}: {}", scalar_or_type(k), scalar_or_type(v)))
                .collect::<Vec<_>>()
                .join(", ");
            let elided = if entries.len() > SUMMARY_ITEMS { ", ..." } else { "" };
            Ok(format!("{{{inner}{elided}}} ({} items)", entries.len()))
        }
        other => other.scalar_repr(),
    }
}

const SUMMARY_ITEMS: usize = 5;

fn summarize<'a>(items: impl Iterator<Item = &'a Value>) -> String {
    let mut parts: Vec<String> = items.take(SUMMARY_ITEMS + 1).map(scalar_or_type).collect();
    if parts.len() > SUMMARY_ITEMS {
        parts.truncate(SUMMARY_ITEMS);
        parts.push(ELLIPSIS.to_string());
    }
    parts.join(", ")
}

/// One-level child summary: scalars print, nested containers show only
/// their type name. This is what keeps rendering safe on cycles.
fn scalar_or_type(value: &Value) -> String {
    match value {
        Value::List(_) | Value::Map(_) | Value::Object(_) => value.type_name().to_string(),
        scalar => scalar.scalar_repr().unwrap_or_else(|err| err),
    }
}

/// Cut `text` to at most `max_length` characters plus the ellipsis.
fn truncate(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_length).collect();
    cut.push_str(ELLIPSIS);
    cut
}

/// Outer-layer escaping for text embedded in wire payloads.
///
/// `&` is deliberately not escaped, which makes the mapping idempotent:
/// escaping already-escaped text changes nothing.
#[must_use]
pub fn escape_outer(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Attribute-text escaping for the markup sub-format.
///
/// `%` is deliberately not escaped, for the same idempotence reason as
/// [`escape_outer`].
#[must_use]
pub fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '/' => out.push_str("%2F"),
            '>' => out.push_str("%3E"),
            '_' => out.push_str("%5F"),
            '=' => out.push_str("%3D"),
            ' ' => out.push_str("%20"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_runtime::value::{ObjectValue, Repr};

    #[test]
    fn scalars_render_plainly() {
        let rendered = Renderer::new().render(&Value::Int(42));
        assert_eq!(rendered.display, "42");
        assert_eq!(rendered.type_name, "int");
        assert!(!rendered.is_container);
        assert!(!rendered.is_error_on_eval);
    }

    #[test]
    fn truncation_is_bounded() {
        let renderer = Renderer::new();
        let long = Value::Str("x".repeat(500));
        for max in [1, 10, 256] {
            let rendered = renderer.render_bounded(&long, max);
            assert!(rendered.display.chars().count() <= max + ELLIPSIS.len());
            assert!(rendered.display.ends_with(ELLIPSIS));
        }
    }

    #[test]
    fn truncation_bound_holds_after_escaping() {
        let renderer = Renderer::new();
        // Each source character expands to a four-character entity.
        let hostile = Value::Str("<".repeat(100));
        for max in [1, 10, 13, 256] {
            let rendered = renderer.render_bounded(&hostile, max);
            assert!(
                rendered.display.chars().count() <= max + ELLIPSIS.len(),
                "bound {max} exceeded: {}",
                rendered.display.len()
            );
        }
        // Within the bound, the text is the escaped form.
        let rendered = renderer.render_bounded(&Value::Str("<".into()), 64);
        assert_eq!(rendered.display, "'&lt;'");
    }

    #[test]
    fn failing_repr_becomes_error_text() {
        let value = Value::Object(
            ObjectValue::new("Broken", "app.models").with_repr(Repr::Raises("boom".into())),
        );
        let rendered = Renderer::new().render(&value);
        assert!(rendered.is_error_on_eval);
        assert_eq!(rendered.display, "boom");
        assert_eq!(rendered.qualifier.as_deref(), Some("app.models"));
    }

    #[test]
    fn containers_are_shallow() {
        let nested = Value::List(vec![Value::List(vec![Value::Int(1)]), Value::Int(2)]);
        let rendered = Renderer::new().render(&nested);
        assert!(rendered.is_container);
        // The inner list shows as a type name, not its contents.
        assert!(rendered.display.contains("list"));
        assert!(!rendered.display.contains('1'));
    }

    #[test]
    fn escaping_is_idempotent() {
        let once = escape_outer("a \"quoted\" <tag>");
        assert_eq!(escape_outer(&once), once);
        let attr = escape_attr("a_b c=d");
        assert_eq!(escape_attr(&attr), attr);
    }

    #[test]
    fn registered_resolvers_are_consulted_in_order() {
        let mut renderer = Renderer::new();
        struct Empty;
        impl ChildResolver for Empty {
            fn children(&self, _value: &Value) -> Vec<(String, Value)> {
                Vec::new()
            }
        }
        // Registered after the built-ins, so lists keep their resolver.
        renderer.register(|v| matches!(v, Value::List(_)), Arc::new(Empty));
        let children = renderer.children(&Value::List(vec![Value::Int(1)]));
        assert_eq!(children.len(), 1);
        // A type no built-in claims goes to the new resolver.
        renderer.register(|v| matches!(v, Value::Nil), Arc::new(Empty));
        assert!(renderer.resolver_for(&Value::Nil).is_some());
    }
}

struct ListResolver;

impl ChildResolver for ListResolver {
    fn children(&self, value: &Value) -> Vec<(String, Value)> {
        match value {
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

struct MapResolver;

impl ChildResolver for MapResolver {
    fn children(&self, value: &Value) -> Vec<(String, Value)> {
        match value {
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| (scalar_or_type(k), v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

struct ObjectResolver;

impl ChildResolver for ObjectResolver {
    fn children(&self, value: &Value) -> Vec<(String, Value)> {
        match value {
            Value::Object(object) => object
                .fields
                .iter()
                .map(|(name, v)| (name.to_string(), v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }
}
