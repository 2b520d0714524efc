//! Typed dispatch table mapping JSON keys to handlers.
//!
//! Each key is registered once with a [`Handler`], whose variant fixes the
//! value kind the handler accepts. Dispatching a key coerces the raw JSON
//! value to that kind and invokes the callback with a mutable context `C`.
//!
//! # Coercion rules
//!
//! | Registered kind | Accepted JSON                  | Fallback                     |
//! |-----------------|--------------------------------|------------------------------|
//! | `Int`           | any number (floats truncate)   | `0`                          |
//! | `UInt`          | non-negative number            | `0`                          |
//! | `Float`         | any number                     | `0.0`                        |
//! | `Bool`          | `true`/`false`, number ≠ 0     | `false`                      |
//! | `Str`           | string                         | `""`                         |
//!
//! A value that cannot be coerced still invokes the handler with the
//! fallback; the mismatch is logged at `debug`.
//!
//! Keys are case-sensitive. Registering a key again replaces the earlier
//! handler.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, warn};

/// The closed set of value kinds a handler can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    UInt,
    Float,
    Bool,
    Str,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Int => "int",
            ValueKind::UInt => "uint",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Str => "string",
        };
        f.write_str(name)
    }
}

type Callback<C, T> = Box<dyn FnMut(&mut C, T) + Send>;

/// A typed callback; the variant is the kind tag.
pub enum Handler<C> {
    Int(Callback<C, i64>),
    UInt(Callback<C, u64>),
    Float(Callback<C, f64>),
    Bool(Callback<C, bool>),
    Str(Box<dyn FnMut(&mut C, &str) + Send>),
}

impl<C> Handler<C> {
    pub fn int(f: impl FnMut(&mut C, i64) + Send + 'static) -> Self {
        Handler::Int(Box::new(f))
    }

    pub fn uint(f: impl FnMut(&mut C, u64) + Send + 'static) -> Self {
        Handler::UInt(Box::new(f))
    }

    pub fn float(f: impl FnMut(&mut C, f64) + Send + 'static) -> Self {
        Handler::Float(Box::new(f))
    }

    pub fn boolean(f: impl FnMut(&mut C, bool) + Send + 'static) -> Self {
        Handler::Bool(Box::new(f))
    }

    pub fn string(f: impl FnMut(&mut C, &str) + Send + 'static) -> Self {
        Handler::Str(Box::new(f))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Handler::Int(_) => ValueKind::Int,
            Handler::UInt(_) => ValueKind::UInt,
            Handler::Float(_) => ValueKind::Float,
            Handler::Bool(_) => ValueKind::Bool,
            Handler::Str(_) => ValueKind::Str,
        }
    }
}

impl<C> fmt::Debug for Handler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({})", self.kind())
    }
}

/// Outcome of dispatching one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// No handler was registered; the default handler ran instead.
    Unhandled,
}

/// Per-message totals from [`DispatchTable::dispatch_object`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub handled: usize,
    pub unhandled: usize,
}

/// Maps message keys to typed handlers operating on a context `C`.
pub struct DispatchTable<C> {
    entries: HashMap<String, Handler<C>>,
    default_handler: Box<dyn FnMut(&mut C, &str) + Send>,
}

impl<C: 'static> DispatchTable<C> {
    /// Creates an empty table whose default handler logs the unknown key.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            default_handler: Box::new(|_: &mut C, key: &str| warn!(key, "unregistered message")),
        }
    }

    /// Registers `handler` for `key`, returning the kind of any handler it replaced.
    pub fn register(&mut self, key: impl Into<String>, handler: Handler<C>) -> Option<ValueKind> {
        let key = key.into();
        let kind = handler.kind();
        let previous = self.entries.insert(key.clone(), handler).map(|h| h.kind());
        if let Some(old) = previous {
            debug!(key = %key, %old, new = %kind, "handler replaced");
        }
        previous
    }

    /// Replaces the handler invoked for keys with no registration.
    pub fn set_default_handler(&mut self, f: impl FnMut(&mut C, &str) + Send + 'static) {
        self.default_handler = Box::new(f);
    }

    /// The kind registered for `key`, if any.
    pub fn kind_of(&self, key: &str) -> Option<ValueKind> {
        self.entries.get(key).map(Handler::kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invokes the handler registered for `key` with `raw` coerced to its kind.
    pub fn dispatch(&mut self, ctx: &mut C, key: &str, raw: &Value) -> Dispatch {
        let Some(handler) = self.entries.get_mut(key) else {
            (self.default_handler)(ctx, key);
            return Dispatch::Unhandled;
        };

        match handler {
            Handler::Int(f) => f(ctx, coerce_int(key, raw)),
            Handler::UInt(f) => f(ctx, coerce_uint(key, raw)),
            Handler::Float(f) => f(ctx, coerce_float(key, raw)),
            Handler::Bool(f) => f(ctx, coerce_bool(key, raw)),
            Handler::Str(f) => f(ctx, coerce_str(key, raw)),
        }
        Dispatch::Handled
    }

    /// Dispatches every member of `object` in document order.
    pub fn dispatch_object(&mut self, ctx: &mut C, object: &Map<String, Value>) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for (key, value) in object {
            match self.dispatch(ctx, key, value) {
                Dispatch::Handled => summary.handled += 1,
                Dispatch::Unhandled => summary.unhandled += 1,
            }
        }
        summary
    }
}

impl<C: 'static> Default for DispatchTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for DispatchTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

// ── Coercion ──────────────────────────────────────────────────────────────────

fn mismatch(key: &str, kind: ValueKind, raw: &Value) {
    debug!(key, %kind, value = %raw, "value does not coerce, using default");
}

fn coerce_int(key: &str, raw: &Value) -> i64 {
    if let Some(v) = raw.as_i64() {
        return v;
    }
    if let Some(v) = raw.as_u64() {
        return i64::try_from(v).unwrap_or(i64::MAX);
    }
    if let Some(v) = raw.as_f64() {
        return v as i64;
    }
    mismatch(key, ValueKind::Int, raw);
    0
}

fn coerce_uint(key: &str, raw: &Value) -> u64 {
    if let Some(v) = raw.as_u64() {
        return v;
    }
    match raw.as_f64() {
        Some(v) if v >= 0.0 => v as u64,
        _ => {
            mismatch(key, ValueKind::UInt, raw);
            0
        }
    }
}

fn coerce_float(key: &str, raw: &Value) -> f64 {
    raw.as_f64().unwrap_or_else(|| {
        mismatch(key, ValueKind::Float, raw);
        0.0
    })
}

fn coerce_bool(key: &str, raw: &Value) -> bool {
    match raw {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |v| v != 0.0),
        _ => {
            mismatch(key, ValueKind::Bool, raw);
            false
        }
    }
}

fn coerce_str<'a>(key: &str, raw: &'a Value) -> &'a str {
    raw.as_str().unwrap_or_else(|| {
        mismatch(key, ValueKind::Str, raw);
        ""
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        unknown: Vec<String>,
    }

    fn table() -> DispatchTable<Recorder> {
        let mut t = DispatchTable::new();
        t.set_default_handler(|r: &mut Recorder, key| r.unknown.push(key.to_string()));
        t
    }

    #[test]
    fn test_registered_uint_handler_receives_value() {
        // Arrange
        let mut t = table();
        t.register("BoxNo", Handler::uint(|r: &mut Recorder, v| r.calls.push(format!("uint {v}"))));
        let mut rec = Recorder::default();

        // Act
        let outcome = t.dispatch(&mut rec, "BoxNo", &json!(7));

        // Assert
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(rec.calls, vec!["uint 7"]);
    }

    #[test]
    fn test_unknown_key_routes_to_default_handler() {
        let mut t = table();
        let mut rec = Recorder::default();
        let outcome = t.dispatch(&mut rec, "Bogus", &json!(1));
        assert_eq!(outcome, Dispatch::Unhandled);
        assert_eq!(rec.unknown, vec!["Bogus"]);
        assert!(rec.calls.is_empty());
    }

    #[test]
    fn test_keys_are_case_sensitive() {
        let mut t = table();
        t.register("SetDuty", Handler::float(|r: &mut Recorder, _| r.calls.push("float".into())));
        let mut rec = Recorder::default();
        assert_eq!(t.dispatch(&mut rec, "setduty", &json!(1.0)), Dispatch::Unhandled);
    }

    #[test]
    fn test_reregistration_last_wins_and_only_new_kind_runs() {
        // Arrange
        let mut t = table();
        t.register("K", Handler::int(|r: &mut Recorder, _| r.calls.push("int".into())));

        // Act
        let replaced =
            t.register("K", Handler::string(|r: &mut Recorder, s| r.calls.push(format!("str {s}"))));
        let mut rec = Recorder::default();
        t.dispatch(&mut rec, "K", &json!("x"));

        // Assert
        assert_eq!(replaced, Some(ValueKind::Int));
        assert_eq!(t.kind_of("K"), Some(ValueKind::Str));
        assert_eq!(t.len(), 1);
        assert_eq!(rec.calls, vec!["str x"]);
    }

    #[test]
    fn test_mismatched_value_invokes_handler_with_default() {
        let mut t = table();
        t.register("N", Handler::int(|r: &mut Recorder, v| r.calls.push(format!("{v}"))));
        t.register("B", Handler::boolean(|r: &mut Recorder, v| r.calls.push(format!("{v}"))));
        t.register("S", Handler::string(|r: &mut Recorder, v| r.calls.push(format!("[{v}]"))));
        let mut rec = Recorder::default();

        t.dispatch(&mut rec, "N", &json!("twelve"));
        t.dispatch(&mut rec, "B", &Value::Null);
        t.dispatch(&mut rec, "S", &json!(5));

        assert_eq!(rec.calls, vec!["0", "false", "[]"]);
    }

    #[test]
    fn test_numeric_kinds_coerce_between_each_other() {
        let mut t = table();
        t.register("I", Handler::int(|r: &mut Recorder, v| r.calls.push(format!("{v}"))));
        t.register("U", Handler::uint(|r: &mut Recorder, v| r.calls.push(format!("{v}"))));
        t.register("F", Handler::float(|r: &mut Recorder, v| r.calls.push(format!("{v}"))));
        let mut rec = Recorder::default();

        t.dispatch(&mut rec, "I", &json!(3.9));
        t.dispatch(&mut rec, "U", &json!(-4));
        t.dispatch(&mut rec, "F", &json!(-40));

        assert_eq!(rec.calls, vec!["3", "0", "-40"]);
    }

    #[test]
    fn test_dispatch_object_walks_members_in_order() {
        let mut t = table();
        t.register("A", Handler::uint(|r: &mut Recorder, _| r.calls.push("A".into())));
        t.register("B", Handler::uint(|r: &mut Recorder, _| r.calls.push("B".into())));
        let doc = json!({"B": 1, "X": 0, "A": 2});
        let mut rec = Recorder::default();

        let summary = t.dispatch_object(&mut rec, doc.as_object().unwrap());

        assert_eq!(summary, DispatchSummary { handled: 2, unhandled: 1 });
        assert_eq!(rec.calls, vec!["B", "A"]);
        assert_eq!(rec.unknown, vec!["X"]);
    }
}
