//! Runtime values and the conversions between them.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use super::ast::FunctionDef;
use super::interp::Scope;

/// Nesting bound for JSON conversion and string rendering.
pub const MAX_RENDER_DEPTH: usize = 256;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<Object>>),
    Function(Rc<Closure>),
    Native(Rc<NativeFn>),
}

/// Plain object. Keys are ordered the way JavaScript enumerates them:
/// array-index keys ascending, then the rest in insertion order.
#[derive(Default)]
pub struct Object {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
    /// Set for values built by the `Error` family of constructors.
    pub error: bool,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(name: &str, message: &str) -> Self {
        let mut obj = Self {
            error: true,
            ..Self::default()
        };
        obj.set("name", Value::from(name));
        obj.set("message", Value::from(message));
        obj
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        if let Some(&i) = self.index.get(key) {
            self.entries[i].1 = value;
            return;
        }

        let Some(n) = index_key(key) else {
            self.index.insert(key.to_string(), self.entries.len());
            self.entries.push((key.to_string(), value));
            return;
        };

        let at = self
            .entries
            .iter()
            .position(|(k, _)| index_key(k).map_or(true, |m| m > n))
            .unwrap_or(self.entries.len());
        self.entries.insert(at, (key.to_string(), value));
        for (i, (k, _)) in self.entries.iter().enumerate().skip(at) {
            self.index.insert(k.clone(), i);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

/// Canonical array-index form of a property key (`"0"`, `"17"`, not `"01"`).
fn index_key(key: &str) -> Option<u32> {
    let canonical = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key.len() == 1 || !key.starts_with('0'));
    if !canonical {
        return None;
    }
    key.parse::<u32>().ok().filter(|&n| n != u32::MAX)
}

/// User-defined function together with its defining scope.
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Rc<Scope>,
}

/// Builtin function. `this` is the receiver for bound methods such as `[1,2].map`.
pub struct NativeFn {
    pub name: Rc<str>,
    pub this: Value,
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    /// Untracked array; the interpreter allocates through its own heap.
    #[cfg(test)]
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    #[cfg(test)]
    pub fn object(obj: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(obj)))
    }

    pub fn native(name: &str, this: Value) -> Self {
        Value::Native(Rc::new(NativeFn {
            name: Rc::from(name),
            this,
        }))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) | Value::Object(_) => "object",
            Value::Native(n) if is_namespace(&n.name) => "object",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// `ToNumber`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Array(_) => string_to_number(&self.to_js_string()),
            _ => f64::NAN,
        }
    }

    /// `ToString`, as used by `String(x)`, concatenation and template literals.
    pub fn to_js_string(&self) -> String {
        let mut seen = HashSet::new();
        self.to_js_string_inner(&mut seen, 0)
    }

    fn to_js_string_inner(&self, seen: &mut HashSet<usize>, depth: usize) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => {
                let key = Rc::as_ptr(items) as usize;
                if depth > MAX_RENDER_DEPTH || !seen.insert(key) {
                    return String::new();
                }
                let parts: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.to_js_string_inner(seen, depth + 1),
                    })
                    .collect();
                seen.remove(&key);
                parts.join(",")
            }
            Value::Object(obj) => {
                let obj = obj.borrow();
                if obj.error {
                    error_summary(&obj)
                } else {
                    "[object Object]".to_string()
                }
            }
            Value::Function(f) => format!(
                "function {}() {{ [code] }}",
                f.def.name.as_deref().unwrap_or("")
            ),
            Value::Native(n) if is_namespace(&n.name) => format!("[object {}]", n.name),
            Value::Native(n) => format!("function {}() {{ [native code] }}", n.name),
        }
    }

    /// Property key form of a value (`obj[key]`).
    pub fn to_property_key(&self) -> String {
        self.to_js_string()
    }

    /// Array or object reference identity, or primitive identity for `===`.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => {
                Rc::ptr_eq(a, b) || (a.name == b.name && a.this.strict_equals(&b.this))
            }
            _ => false,
        }
    }

    /// `==` with the usual coercions.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Value::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            (Value::Array(_) | Value::Object(_), Value::Number(_) | Value::Str(_)) => {
                Value::string(self.to_js_string()).loose_equals(other)
            }
            (Value::Number(_) | Value::Str(_), Value::Array(_) | Value::Object(_)) => {
                self.loose_equals(&Value::string(other.to_js_string()))
            }
            _ => self.strict_equals(other),
        }
    }

    /// `JSON.stringify` semantics. `Ok(None)` for values JSON cannot represent
    /// (undefined, functions); `Err` carries the TypeError message.
    pub fn to_json(&self) -> Result<Option<serde_json::Value>, String> {
        let mut seen = HashSet::new();
        self.to_json_inner(&mut seen, 0)
    }

    fn to_json_inner(
        &self,
        seen: &mut HashSet<usize>,
        depth: usize,
    ) -> Result<Option<serde_json::Value>, String> {
        use serde_json::Value as Json;

        if depth > MAX_RENDER_DEPTH {
            return Err("Value is nested too deeply to convert to JSON".to_string());
        }

        let json = match self {
            Value::Undefined | Value::Function(_) | Value::Native(_) => return Ok(None),
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::Str(s) => Json::String(s.to_string()),
            Value::Array(items) => {
                let key = Rc::as_ptr(items) as usize;
                if !seen.insert(key) {
                    return Err("Converting circular structure to JSON".to_string());
                }
                let snapshot = items.borrow().clone();
                let mut out = Vec::with_capacity(snapshot.len());
                for item in &snapshot {
                    out.push(item.to_json_inner(seen, depth + 1)?.unwrap_or(Json::Null));
                }
                seen.remove(&key);
                Json::Array(out)
            }
            Value::Object(obj) => {
                let key = Rc::as_ptr(obj) as usize;
                if !seen.insert(key) {
                    return Err("Converting circular structure to JSON".to_string());
                }
                let snapshot: Vec<(String, Value)> = obj.borrow().entries().to_vec();
                let mut map = serde_json::Map::new();
                for (k, v) in &snapshot {
                    if let Some(json) = v.to_json_inner(seen, depth + 1)? {
                        map.insert(k.clone(), json);
                    }
                }
                seen.remove(&key);
                Json::Object(map)
            }
        };
        Ok(Some(json))
    }

    /// Rendering for `console.log`: strings raw, structures as compact JSON.
    pub fn to_log_string(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Array(_) | Value::Object(_) => {
                if let Value::Object(obj) = self {
                    let obj = obj.borrow();
                    if obj.error {
                        return error_summary(&obj);
                    }
                }
                match self.to_json() {
                    Ok(Some(json)) => json.to_string(),
                    _ => self.to_js_string(),
                }
            }
            other => other.to_js_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(_) | Value::Object(_) => write!(f, "{}", self.to_log_string()),
            other => write!(f, "{}", other.to_js_string()),
        }
    }
}

/// `Name: message` for error objects.
pub fn error_summary(obj: &Object) -> String {
    let name = obj
        .get("name")
        .map(|v| v.to_js_string())
        .unwrap_or_else(|| "Error".to_string());
    let message = obj.get("message").map(|v| v.to_js_string()).unwrap_or_default();
    if message.is_empty() {
        name
    } else {
        format!("{}: {}", name, message)
    }
}

/// Global names that behave like plain objects rather than functions.
pub fn is_namespace(name: &str) -> bool {
    matches!(name, "Math" | "JSON" | "console")
}

/// Number-to-string conversion with JavaScript's formatting rules.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    let abs = n.abs();
    if abs >= 1e21 || abs < 1e-6 {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        };
    }

    if n.fract() == 0.0 && abs < 9.007_199_254_740_992e15 {
        return format!("{}", n as i64);
    }
    format!("{}", n)
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        // Avoids "-0" and "4.0" in serialized output.
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// `ToNumber` applied to a string.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let radix = match body.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        // Signed prefixed literals are NaN.
        if negative || trimmed.starts_with('+') {
            return f64::NAN;
        }
        return u64::from_str_radix(&body[2..], radix)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }

    let magnitude = if body == "Infinity" {
        f64::INFINITY
    } else if body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        && body.chars().any(|c| c.is_ascii_digit())
    {
        match body.parse::<f64>() {
            Ok(v) => v,
            Err(_) => return f64::NAN,
        }
    } else {
        return f64::NAN;
    };

    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// `ToInt32`.
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// `ToUint32`.
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    const TWO_32: f64 = 4_294_967_296.0;
    let wrapped = n.trunc() % TWO_32;
    let positive = if wrapped < 0.0 { wrapped + TWO_32 } else { wrapped };
    positive as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_format_like_javascript() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1.5e-7), "1.5e-7");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(123456789.0), "123456789");
    }

    #[test]
    fn string_coercion() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1f"), 31.0);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("12px").is_nan());
        assert!(string_to_number("inf").is_nan());
    }

    #[test]
    fn array_to_string_joins_with_commas() {
        let arr = Value::array(vec![
            Value::Number(1.0),
            Value::Null,
            Value::array(vec![Value::from("a"), Value::Bool(true)]),
        ]);
        assert_eq!(arr.to_js_string(), "1,,a,true");
    }

    #[test]
    fn loose_equality_coerces() {
        assert!(Value::Number(1.0).loose_equals(&Value::from("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.loose_equals(&Value::Number(0.0)));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        assert!(!Value::Number(1.0).strict_equals(&Value::from("1")));
    }

    #[test]
    fn json_conversion_preserves_key_order_and_skips_undefined() {
        let mut obj = Object::new();
        obj.set("b", Value::Number(2.0));
        obj.set("a", Value::Undefined);
        obj.set("c", Value::array(vec![Value::Undefined, Value::Number(0.5)]));
        let json = Value::object(obj).to_json().unwrap().unwrap();
        assert_eq!(json.to_string(), r#"{"b":2,"c":[null,0.5]}"#);
    }

    #[test]
    fn index_keys_enumerate_first_in_ascending_order() {
        let mut obj = Object::new();
        for key in ["b", "10", "a", "2", "01", "0"] {
            obj.set(key, Value::Null);
        }
        obj.set("2", Value::Number(2.0));
        assert_eq!(obj.keys(), ["0", "2", "10", "b", "a", "01"]);
        assert_eq!(obj.get("2").map(Value::to_js_string), Some("2".to_string()));
        assert_eq!(obj.get("b").map(Value::to_js_string), Some("null".to_string()));
    }

    #[test]
    fn circular_structures_are_rejected() {
        let arr = Value::array(Vec::new());
        if let Value::Array(items) = &arr {
            items.borrow_mut().push(arr.clone());
        }
        let err = arr.to_json().unwrap_err();
        assert!(err.contains("circular"));
        if let Value::Array(items) = &arr {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn int32_wraps() {
        assert_eq!(to_int32(4_294_967_295.0), -1);
        assert_eq!(to_uint32(-1.0), 4_294_967_295);
        assert_eq!(to_int32(f64::NAN), 0);
    }
}
