//! Global objects and the methods reachable from primitive and array values.

use serde::Serialize;

use super::interp::{js_pow, own_entries, own_keys, Exec, Interpreter};
use super::value::{format_number, to_uint32, NativeFn, Object, Value};

/// Names bound in the global scope.
pub const GLOBALS: &[&str] = &[
    "Math",
    "JSON",
    "console",
    "Object",
    "Array",
    "String",
    "Number",
    "Boolean",
    "Function",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "Error",
    "TypeError",
    "RangeError",
    "SyntaxError",
    "ReferenceError",
];

pub const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "slice", "splice", "concat", "join", "indexOf",
    "lastIndexOf", "includes", "reverse", "map", "filter", "reduce", "reduceRight", "forEach",
    "find", "findIndex", "findLast", "some", "every", "sort", "flat", "flatMap", "fill", "at",
    "toString",
];

pub const STRING_METHODS: &[&str] = &[
    "toUpperCase", "toLowerCase", "trim", "trimStart", "trimEnd", "split", "includes", "indexOf",
    "lastIndexOf", "slice", "substring", "startsWith", "endsWith", "repeat", "charAt",
    "charCodeAt", "codePointAt", "replace", "replaceAll", "padStart", "padEnd", "concat", "at",
    "localeCompare", "toString",
];

pub const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];

pub const OBJECT_METHODS: &[&str] = &["hasOwnProperty", "toString"];

const MATH_FUNCTIONS: &[&str] = &[
    "abs", "floor", "ceil", "round", "trunc", "sqrt", "cbrt", "pow", "min", "max", "sign", "log",
    "log2", "log10", "exp", "sin", "cos", "tan", "asin", "acos", "atan", "atan2", "hypot",
    "random",
];

pub fn is_constructor(name: &str) -> bool {
    matches!(
        name,
        "Error" | "TypeError" | "RangeError" | "SyntaxError" | "ReferenceError" | "Array" | "Object"
    )
}

/// Bound method value if `name` is one of `methods`.
pub fn method_or_undefined(methods: &[&str], name: &str, receiver: &Value) -> Value {
    if methods.contains(&name) {
        Value::native(name, receiver.clone())
    } else {
        Value::Undefined
    }
}

/// Properties of the global namespaces and constructors (`Math.PI`, `Object.keys`, ...).
pub fn static_member(owner: &str, name: &str) -> Option<Value> {
    let constant = |n: f64| Some(Value::Number(n));
    let function = || Some(Value::native(&format!("{}.{}", owner, name), Value::Undefined));

    match (owner, name) {
        ("Math", "PI") => constant(std::f64::consts::PI),
        ("Math", "E") => constant(std::f64::consts::E),
        ("Math", "LN2") => constant(std::f64::consts::LN_2),
        ("Math", "LN10") => constant(std::f64::consts::LN_10),
        ("Math", "LOG2E") => constant(std::f64::consts::LOG2_E),
        ("Math", "LOG10E") => constant(std::f64::consts::LOG10_E),
        ("Math", "SQRT2") => constant(std::f64::consts::SQRT_2),
        ("Math", "SQRT1_2") => constant(std::f64::consts::FRAC_1_SQRT_2),
        ("Math", f) if MATH_FUNCTIONS.contains(&f) => function(),
        ("JSON", "stringify" | "parse") => function(),
        ("console", "log" | "info" | "warn" | "error" | "debug") => function(),
        ("Object", "keys" | "values" | "entries" | "assign" | "fromEntries" | "freeze") => function(),
        ("Array", "isArray" | "from" | "of") => function(),
        ("Number", "MAX_SAFE_INTEGER") => constant(9_007_199_254_740_991.0),
        ("Number", "MIN_SAFE_INTEGER") => constant(-9_007_199_254_740_991.0),
        ("Number", "EPSILON") => constant(f64::EPSILON),
        ("Number", "MAX_VALUE") => constant(f64::MAX),
        ("Number", "MIN_VALUE") => constant(5e-324),
        ("Number", "POSITIVE_INFINITY") => constant(f64::INFINITY),
        ("Number", "NEGATIVE_INFINITY") => constant(f64::NEG_INFINITY),
        ("Number", "NaN") => constant(f64::NAN),
        ("Number", "isInteger" | "isSafeInteger" | "isFinite" | "isNaN" | "parseFloat" | "parseInt") => {
            function()
        }
        ("String", "fromCharCode") => function(),
        _ => None,
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

fn num_arg(args: &[Value], index: usize) -> f64 {
    arg(args, index).to_number()
}

/// Integer argument with `ToIntegerOrInfinity` semantics.
fn int_arg(args: &[Value], index: usize, default: f64) -> f64 {
    match args.get(index) {
        None | Some(Value::Undefined) => default,
        Some(v) => {
            let n = v.to_number();
            if n.is_nan() {
                0.0
            } else {
                n.trunc()
            }
        }
    }
}

/// Clamp a possibly negative relative index into `0..=len`.
fn relative_index(n: f64, len: usize) -> usize {
    let len_f = len as f64;
    if n < 0.0 {
        (len_f + n).max(0.0) as usize
    } else {
        n.min(len_f) as usize
    }
}

fn js_round(n: f64) -> f64 {
    if !n.is_finite() {
        return n;
    }
    let floor = n.floor();
    if n - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    }
}

impl Interpreter {
    pub(super) fn call_native(&mut self, native: &NativeFn, args: Vec<Value>) -> Exec<Value> {
        self.tick()?;
        match &native.this {
            Value::Undefined => self.call_global(&native.name, args),
            Value::Array(_) => self.call_array_method(native.this.clone(), &native.name, args),
            Value::Str(s) => self.call_string_method(s.to_string(), &native.name, args),
            Value::Number(n) => self.call_number_method(*n, &native.name, args),
            Value::Object(obj) => match &*native.name {
                "hasOwnProperty" => {
                    let key = arg(&args, 0).to_property_key();
                    Ok(Value::Bool(obj.borrow().contains(&key)))
                }
                _ => Ok(Value::from(native.this.to_js_string())),
            },
            other => Ok(Value::from(other.to_js_string())),
        }
    }

    fn call_global(&mut self, name: &str, args: Vec<Value>) -> Exec<Value> {
        if let Some(math) = name.strip_prefix("Math.") {
            return self.call_math(math, &args);
        }

        match name {
            "String" => Ok(match args.first() {
                None => Value::from(""),
                Some(v) => Value::from(v.to_js_string()),
            }),
            "Number" => Ok(Value::Number(args.first().map_or(0.0, Value::to_number))),
            "Boolean" => Ok(Value::Bool(arg(&args, 0).truthy())),
            "Array" => {
                if let [Value::Number(n)] = args.as_slice() {
                    if *n < 0.0 || n.fract() != 0.0 {
                        return Err(self.throw_error("RangeError", "Invalid array length"));
                    }
                    let len = *n as usize;
                    self.check_array_len(len)?;
                    return Ok(self.new_array(vec![Value::Undefined; len]));
                }
                Ok(self.new_array(args))
            }
            "Array.of" => Ok(self.new_array(args)),
            "Object" => match args.into_iter().next() {
                Some(v @ (Value::Object(_) | Value::Array(_))) => Ok(v),
                _ => Ok(self.new_object(Object::new())),
            },
            "Function" => self.type_error("Function constructor is not supported in this sandbox"),
            "parseInt" | "Number.parseInt" => Ok(Value::Number(parse_int(
                &arg(&args, 0).to_js_string(),
                args.get(1).map(Value::to_number),
            ))),
            "parseFloat" | "Number.parseFloat" => {
                Ok(Value::Number(parse_float(&arg(&args, 0).to_js_string())))
            }
            "isNaN" => Ok(Value::Bool(num_arg(&args, 0).is_nan())),
            "isFinite" => Ok(Value::Bool(num_arg(&args, 0).is_finite())),
            "Number.isNaN" => Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_nan()))),
            "Number.isFinite" => Ok(Value::Bool(
                matches!(arg(&args, 0), Value::Number(n) if n.is_finite()),
            )),
            "Number.isInteger" => Ok(Value::Bool(
                matches!(arg(&args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0),
            )),
            "Number.isSafeInteger" => Ok(Value::Bool(matches!(
                arg(&args, 0),
                Value::Number(n) if n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_991.0
            ))),
            "Error" | "TypeError" | "RangeError" | "SyntaxError" | "ReferenceError" => {
                let message = match args.first() {
                    None | Some(Value::Undefined) => String::new(),
                    Some(v) => v.to_js_string(),
                };
                Ok(self.new_object(Object::error(name, &message)))
            }
            "String.fromCharCode" => {
                let units: Vec<u16> = args.iter().map(|v| to_uint32(v.to_number()) as u16).collect();
                Ok(Value::from(String::from_utf16_lossy(&units)))
            }
            "JSON.stringify" => self.json_stringify(&args),
            "JSON.parse" => {
                let text = arg(&args, 0).to_js_string();
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(json) => Ok(self.json_to_value(&json)),
                    Err(e) => Err(self.throw_error("SyntaxError", format!("Unexpected token in JSON: {}", e))),
                }
            }
            "console.log" | "console.info" | "console.warn" | "console.error" | "console.debug" => {
                let line = args.iter().map(Value::to_log_string).collect::<Vec<_>>().join(" ");
                self.log(line);
                Ok(Value::Undefined)
            }
            "Object.keys" => {
                let keys = own_keys(&arg(&args, 0)).into_iter().map(Value::from).collect();
                Ok(self.new_array(keys))
            }
            "Object.values" => {
                let values = own_entries(&arg(&args, 0)).into_iter().map(|(_, v)| v).collect();
                Ok(self.new_array(values))
            }
            "Object.entries" => {
                let mut pairs = Vec::new();
                for (k, v) in own_entries(&arg(&args, 0)) {
                    let pair = self.new_array(vec![Value::from(k), v]);
                    pairs.push(pair);
                }
                Ok(self.new_array(pairs))
            }
            "Object.assign" => {
                let target = arg(&args, 0);
                for source in args.iter().skip(1) {
                    for (k, v) in own_entries(source) {
                        self.set_member(&target, &Value::from(k), v)?;
                    }
                }
                Ok(target)
            }
            "Object.fromEntries" => {
                let mut obj = Object::new();
                for entry in self.iterate(&arg(&args, 0))? {
                    let pair = self.iterate(&entry)?;
                    let key = pair.first().cloned().unwrap_or(Value::Undefined).to_property_key();
                    obj.set(&key, pair.get(1).cloned().unwrap_or(Value::Undefined));
                }
                Ok(self.new_object(obj))
            }
            "Object.freeze" => Ok(arg(&args, 0)),
            "Array.isArray" => Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_)))),
            "Array.from" => {
                let source = arg(&args, 0);
                let items = match &source {
                    Value::Object(obj) => {
                        // Array-like `{ length: n }`.
                        let len = obj.borrow().get("length").map_or(0.0, Value::to_number);
                        let len = if len.is_finite() && len > 0.0 { len as usize } else { 0 };
                        self.check_array_len(len)?;
                        (0..len)
                            .map(|i| obj.borrow().get(&i.to_string()).cloned().unwrap_or(Value::Undefined))
                            .collect()
                    }
                    other => self.iterate(other)?,
                };
                let mapper = arg(&args, 1);
                if mapper.is_callable() {
                    let mut mapped = Vec::with_capacity(items.len());
                    for (i, item) in items.into_iter().enumerate() {
                        mapped.push(self.call(&mapper, vec![item, Value::Number(i as f64)])?);
                    }
                    return Ok(self.new_array(mapped));
                }
                Ok(self.new_array(items))
            }
            other => self.type_error(format!("{} is not a function", other)),
        }
    }

    fn call_math(&mut self, name: &str, args: &[Value]) -> Exec<Value> {
        let x = num_arg(args, 0);
        let result = match name {
            "abs" => x.abs(),
            "floor" => x.floor(),
            "ceil" => x.ceil(),
            "round" => js_round(x),
            "trunc" => x.trunc(),
            "sqrt" => x.sqrt(),
            "cbrt" => x.cbrt(),
            "pow" => js_pow(x, num_arg(args, 1)),
            "sign" => {
                if x.is_nan() || x == 0.0 {
                    x
                } else {
                    x.signum()
                }
            }
            "log" => x.ln(),
            "log2" => x.log2(),
            "log10" => x.log10(),
            "exp" => x.exp(),
            "sin" => x.sin(),
            "cos" => x.cos(),
            "tan" => x.tan(),
            "asin" => x.asin(),
            "acos" => x.acos(),
            "atan" => x.atan(),
            "atan2" => x.atan2(num_arg(args, 1)),
            "hypot" => args.iter().map(|v| v.to_number().powi(2)).sum::<f64>().sqrt(),
            "min" | "max" => {
                let numbers: Vec<f64> = args.iter().map(Value::to_number).collect();
                if numbers.iter().any(|n| n.is_nan()) {
                    f64::NAN
                } else if name == "min" {
                    numbers.into_iter().fold(f64::INFINITY, f64::min)
                } else {
                    numbers.into_iter().fold(f64::NEG_INFINITY, f64::max)
                }
            }
            "random" => rand::random::<f64>(),
            other => return self.type_error(format!("Math.{} is not a function", other)),
        };
        Ok(Value::Number(result))
    }

    fn json_stringify(&mut self, args: &[Value]) -> Exec<Value> {
        let json = match arg(args, 0).to_json() {
            Ok(Some(json)) => json,
            Ok(None) => return Ok(Value::Undefined),
            Err(message) => return self.type_error(message),
        };

        let indent = match arg(args, 2) {
            Value::Number(n) if n >= 1.0 => " ".repeat((n as usize).min(10)),
            Value::Str(s) => s.chars().take(10).collect(),
            _ => String::new(),
        };

        let text = if indent.is_empty() {
            json.to_string()
        } else {
            let mut buf = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
            let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
            if let Err(e) = json.serialize(&mut serializer) {
                return self.type_error(e.to_string());
            }
            String::from_utf8_lossy(&buf).into_owned()
        };
        self.check_string_len(text.len())?;
        Ok(Value::from(text))
    }

    // ── Arrays ─────────────────────────────────────────────────────

    fn call_array_method(&mut self, this: Value, name: &str, args: Vec<Value>) -> Exec<Value> {
        let Value::Array(cell) = &this else {
            return self.type_error(format!("{} called on non-array", name));
        };
        let cell = cell.clone();
        let snapshot = || cell.borrow().clone();
        let len = cell.borrow().len();

        match name {
            "push" => {
                self.check_array_len(len + args.len())?;
                self.note_growth(args.len());
                let mut items = cell.borrow_mut();
                items.extend(args);
                Ok(Value::Number(items.len() as f64))
            }
            "pop" => Ok(cell.borrow_mut().pop().unwrap_or(Value::Undefined)),
            "shift" => {
                let mut items = cell.borrow_mut();
                if items.is_empty() {
                    Ok(Value::Undefined)
                } else {
                    Ok(items.remove(0))
                }
            }
            "unshift" => {
                self.check_array_len(len + args.len())?;
                self.note_growth(args.len());
                let mut items = cell.borrow_mut();
                items.splice(0..0, args);
                Ok(Value::Number(items.len() as f64))
            }
            "slice" => {
                let start = relative_index(int_arg(&args, 0, 0.0), len);
                let end = relative_index(int_arg(&args, 1, len as f64), len);
                let items = if start < end {
                    cell.borrow()[start..end].to_vec()
                } else {
                    Vec::new()
                };
                Ok(self.new_array(items))
            }
            "splice" => {
                let start = relative_index(int_arg(&args, 0, 0.0), len);
                let delete_count = if args.len() < 2 {
                    len - start
                } else {
                    (int_arg(&args, 1, 0.0).max(0.0) as usize).min(len - start)
                };
                let inserted: Vec<Value> = args.into_iter().skip(2).collect();
                self.check_array_len(len - delete_count + inserted.len())?;
                self.note_growth(inserted.len());
                let removed: Vec<Value> = cell
                    .borrow_mut()
                    .splice(start..start + delete_count, inserted)
                    .collect();
                Ok(self.new_array(removed))
            }
            "concat" => {
                let mut items = snapshot();
                for value in args {
                    match value {
                        Value::Array(other) => items.extend(other.borrow().iter().cloned()),
                        other => items.push(other),
                    }
                    self.check_array_len(items.len())?;
                }
                Ok(self.new_array(items))
            }
            "join" | "toString" => {
                let separator = match args.first() {
                    Some(v) if name == "join" && !matches!(v, Value::Undefined) => v.to_js_string(),
                    _ => ",".to_string(),
                };
                let joined = snapshot()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                    .collect::<Vec<_>>()
                    .join(&separator);
                self.check_string_len(joined.len())?;
                Ok(Value::from(joined))
            }
            "indexOf" => {
                let needle = arg(&args, 0);
                let from = relative_index(int_arg(&args, 1, 0.0), len);
                let found = snapshot()
                    .iter()
                    .enumerate()
                    .skip(from)
                    .find(|(_, v)| v.strict_equals(&needle))
                    .map(|(i, _)| i as f64);
                Ok(Value::Number(found.unwrap_or(-1.0)))
            }
            "lastIndexOf" => {
                let needle = arg(&args, 0);
                let found = snapshot()
                    .iter()
                    .rposition(|v| v.strict_equals(&needle))
                    .map(|i| i as f64);
                Ok(Value::Number(found.unwrap_or(-1.0)))
            }
            "includes" => {
                let needle = arg(&args, 0);
                let found = snapshot().iter().any(|v| same_value_zero(v, &needle));
                Ok(Value::Bool(found))
            }
            "reverse" => {
                cell.borrow_mut().reverse();
                Ok(this.clone())
            }
            "at" => {
                let index = int_arg(&args, 0, 0.0);
                let index = if index < 0.0 { len as f64 + index } else { index };
                if index < 0.0 || index >= len as f64 {
                    return Ok(Value::Undefined);
                }
                Ok(cell.borrow()[index as usize].clone())
            }
            "fill" => {
                let value = arg(&args, 0);
                let start = relative_index(int_arg(&args, 1, 0.0), len);
                let end = relative_index(int_arg(&args, 2, len as f64), len);
                let mut items = cell.borrow_mut();
                for slot in items.iter_mut().take(end).skip(start) {
                    *slot = value.clone();
                }
                drop(items);
                Ok(this.clone())
            }
            "flat" => {
                let depth = int_arg(&args, 0, 1.0);
                let mut out = Vec::new();
                self.flatten_into(snapshot(), depth, &mut out)?;
                Ok(self.new_array(out))
            }
            "sort" => {
                let comparator = arg(&args, 0);
                let comparator = if comparator.is_callable() {
                    Some(comparator)
                } else if comparator.is_nullish() {
                    None
                } else {
                    return self.type_error("The comparison function must be either a function or undefined");
                };
                let sorted = self.sort_values(snapshot(), comparator.as_ref())?;
                *cell.borrow_mut() = sorted;
                Ok(this.clone())
            }
            "reduce" | "reduceRight" => {
                let callback = self.callback(&args, name)?;
                let mut items: Vec<(usize, Value)> = snapshot().into_iter().enumerate().collect();
                if name == "reduceRight" {
                    items.reverse();
                }
                let mut iter = items.into_iter();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match iter.next() {
                        Some((_, first)) => first,
                        None => return self.type_error("Reduce of empty array with no initial value"),
                    },
                };
                for (i, item) in iter {
                    acc = self.call(&callback, vec![acc, item, Value::Number(i as f64), this.clone()])?;
                }
                Ok(acc)
            }
            "map" | "filter" | "forEach" | "find" | "findIndex" | "findLast" | "some" | "every"
            | "flatMap" => {
                let callback = self.callback(&args, name)?;
                let items = snapshot();
                let mut out = Vec::new();

                let indices: Box<dyn Iterator<Item = usize>> = if name == "findLast" {
                    Box::new((0..items.len()).rev())
                } else {
                    Box::new(0..items.len())
                };

                for i in indices {
                    let item = items[i].clone();
                    let result = self.call(
                        &callback,
                        vec![item.clone(), Value::Number(i as f64), this.clone()],
                    )?;
                    match name {
                        "map" => out.push(result),
                        "filter" if result.truthy() => out.push(item),
                        "find" | "findLast" if result.truthy() => return Ok(item),
                        "findIndex" if result.truthy() => return Ok(Value::Number(i as f64)),
                        "some" if result.truthy() => return Ok(Value::Bool(true)),
                        "every" if !result.truthy() => return Ok(Value::Bool(false)),
                        "flatMap" => match result {
                            Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                            other => out.push(other),
                        },
                        _ => {}
                    }
                }

                match name {
                    "map" | "filter" | "flatMap" => {
                        self.check_array_len(out.len())?;
                        Ok(self.new_array(out))
                    }
                    "find" | "findLast" | "forEach" => Ok(Value::Undefined),
                    "findIndex" => Ok(Value::Number(-1.0)),
                    "some" => Ok(Value::Bool(false)),
                    _ => Ok(Value::Bool(true)),
                }
            }
            other => self.type_error(format!("array.{} is not a function", other)),
        }
    }

    fn callback(&mut self, args: &[Value], method: &str) -> Exec<Value> {
        let callback = arg(args, 0);
        if !callback.is_callable() {
            return self.type_error(format!(
                "{} is not a function (in Array.prototype.{})",
                callback.to_js_string(),
                method
            ));
        }
        Ok(callback)
    }

    fn flatten_into(&mut self, items: Vec<Value>, depth: f64, out: &mut Vec<Value>) -> Exec<()> {
        for item in items {
            match item {
                Value::Array(inner) if depth >= 1.0 => {
                    let inner = inner.borrow().clone();
                    self.flatten_into(inner, depth - 1.0, out)?;
                }
                other => out.push(other),
            }
            self.check_array_len(out.len())?;
        }
        Ok(())
    }

    /// Stable merge sort that tolerates inconsistent comparators. `undefined` sorts last.
    fn sort_values(&mut self, items: Vec<Value>, comparator: Option<&Value>) -> Exec<Vec<Value>> {
        let (defined, undefined): (Vec<Value>, Vec<Value>) =
            items.into_iter().partition(|v| !matches!(v, Value::Undefined));
        let mut sorted = self.merge_sort(defined, comparator)?;
        sorted.extend(undefined);
        Ok(sorted)
    }

    fn merge_sort(&mut self, mut items: Vec<Value>, comparator: Option<&Value>) -> Exec<Vec<Value>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items, comparator)?;
        let right = self.merge_sort(right, comparator)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        loop {
            let take_right = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => self.sorts_after(l, r, comparator)?,
                _ => break,
            };
            let next = if take_right { right.next() } else { left.next() };
            merged.extend(next);
        }
        merged.extend(left);
        merged.extend(right);
        Ok(merged)
    }

    fn sorts_after(&mut self, a: &Value, b: &Value, comparator: Option<&Value>) -> Exec<bool> {
        match comparator {
            Some(cmp) => {
                let order = self.call(cmp, vec![a.clone(), b.clone()])?.to_number();
                Ok(order > 0.0)
            }
            None => Ok(a.to_js_string() > b.to_js_string()),
        }
    }

    // ── Strings ────────────────────────────────────────────────────

    /// String methods. Positions and lengths count UTF-16 code units.
    fn call_string_method(&mut self, s: String, name: &str, args: Vec<Value>) -> Exec<Value> {
        let units: Vec<u16> = s.encode_utf16().collect();
        let len = units.len();
        let substring = |from: usize, to: usize| -> String { String::from_utf16_lossy(&units[from..to]) };

        let value = match name {
            "toUpperCase" => Value::from(s.to_uppercase()),
            "toLowerCase" => Value::from(s.to_lowercase()),
            "trim" => Value::from(s.trim()),
            "trimStart" => Value::from(s.trim_start()),
            "trimEnd" => Value::from(s.trim_end()),
            "toString" => Value::from(s.as_str()),
            "includes" => {
                let needle = arg(&args, 0).to_js_string();
                let from = relative_index(int_arg(&args, 1, 0.0).max(0.0), len);
                Value::Bool(substring(from, len).contains(&needle))
            }
            "startsWith" => {
                let needle = arg(&args, 0).to_js_string();
                let from = relative_index(int_arg(&args, 1, 0.0).max(0.0), len);
                Value::Bool(substring(from, len).starts_with(&needle))
            }
            "endsWith" => {
                let needle = arg(&args, 0).to_js_string();
                let end = relative_index(int_arg(&args, 1, len as f64).max(0.0), len);
                Value::Bool(substring(0, end).ends_with(&needle))
            }
            "indexOf" => {
                let needle: Vec<u16> = arg(&args, 0).to_js_string().encode_utf16().collect();
                let from = relative_index(int_arg(&args, 1, 0.0).max(0.0), len);
                let found = (from..=len.saturating_sub(needle.len()))
                    .find(|&i| units[i..].starts_with(&needle))
                    .map(|i| i as f64);
                Value::Number(found.unwrap_or(-1.0))
            }
            "lastIndexOf" => {
                let needle: Vec<u16> = arg(&args, 0).to_js_string().encode_utf16().collect();
                let found = (0..=len)
                    .rev()
                    .find(|&i| units[i..].starts_with(&needle))
                    .map(|i| i as f64);
                Value::Number(found.unwrap_or(-1.0))
            }
            "slice" => {
                let start = relative_index(int_arg(&args, 0, 0.0), len);
                let end = relative_index(int_arg(&args, 1, len as f64), len);
                Value::from(if start < end { substring(start, end) } else { String::new() })
            }
            "substring" => {
                let clamp = |n: f64| n.max(0.0).min(len as f64) as usize;
                let a = clamp(int_arg(&args, 0, 0.0));
                let b = clamp(int_arg(&args, 1, len as f64));
                Value::from(substring(a.min(b), a.max(b)))
            }
            "charAt" => {
                let i = int_arg(&args, 0, 0.0);
                let c = if i >= 0.0 && (i as usize) < len {
                    substring(i as usize, i as usize + 1)
                } else {
                    String::new()
                };
                Value::from(c)
            }
            "charCodeAt" => {
                let i = int_arg(&args, 0, 0.0);
                if i >= 0.0 && (i as usize) < len {
                    Value::Number(f64::from(units[i as usize]))
                } else {
                    Value::Number(f64::NAN)
                }
            }
            "codePointAt" => {
                let i = int_arg(&args, 0, 0.0);
                if i >= 0.0 && (i as usize) < len {
                    let code = char::decode_utf16(units[i as usize..].iter().copied())
                        .next()
                        .map_or(u32::from(units[i as usize]), |c| match c {
                            Ok(c) => u32::from(c),
                            Err(e) => u32::from(e.unpaired_surrogate()),
                        });
                    Value::Number(f64::from(code))
                } else {
                    Value::Undefined
                }
            }
            "at" => {
                let i = int_arg(&args, 0, 0.0);
                let i = if i < 0.0 { len as f64 + i } else { i };
                if i >= 0.0 && i < len as f64 {
                    Value::from(substring(i as usize, i as usize + 1))
                } else {
                    Value::Undefined
                }
            }
            "localeCompare" => {
                let other = arg(&args, 0).to_js_string();
                let order = locale_order(&s, &other);
                Value::Number(match order {
                    std::cmp::Ordering::Less => -1.0,
                    std::cmp::Ordering::Equal => 0.0,
                    std::cmp::Ordering::Greater => 1.0,
                })
            }
            "split" => {
                let limit = match args.get(1) {
                    None | Some(Value::Undefined) => usize::MAX,
                    Some(v) => to_uint32(v.to_number()) as usize,
                };
                let parts: Vec<Value> = match args.first() {
                    None | Some(Value::Undefined) => vec![Value::from(s.as_str())],
                    Some(sep) => {
                        let sep = sep.to_js_string();
                        if sep.is_empty() {
                            (0..len).map(|i| Value::from(substring(i, i + 1))).collect()
                        } else {
                            s.split(sep.as_str()).map(Value::from).collect()
                        }
                    }
                };
                let parts = parts.into_iter().take(limit).collect();
                self.new_array(parts)
            }
            "repeat" => {
                let count = int_arg(&args, 0, 0.0);
                if count < 0.0 || count.is_infinite() {
                    return Err(self.throw_error("RangeError", format!("Invalid count value: {}", format_number(count))));
                }
                let count = count as usize;
                self.check_string_len(s.len().saturating_mul(count))?;
                Value::from(s.repeat(count))
            }
            "padStart" | "padEnd" => {
                let target = int_arg(&args, 0, 0.0).max(0.0) as usize;
                let filler: Vec<u16> = match args.get(1) {
                    None | Some(Value::Undefined) => vec![u16::from(b' ')],
                    Some(v) => v.to_js_string().encode_utf16().collect(),
                };
                if target <= len || filler.is_empty() {
                    Value::from(s.as_str())
                } else {
                    self.check_string_len(target)?;
                    let pad_units: Vec<u16> = filler.iter().copied().cycle().take(target - len).collect();
                    let pad = String::from_utf16_lossy(&pad_units);
                    Value::from(if name == "padStart" {
                        format!("{}{}", pad, s)
                    } else {
                        format!("{}{}", s, pad)
                    })
                }
            }
            "concat" => {
                let mut out = s.clone();
                for v in &args {
                    out.push_str(&v.to_js_string());
                }
                self.check_string_len(out.len())?;
                Value::from(out)
            }
            "replace" | "replaceAll" => {
                let pattern = arg(&args, 0).to_js_string();
                let replacement = arg(&args, 1);
                let positions: Vec<usize> = match (pattern.is_empty(), name == "replaceAll") {
                    (true, true) => s
                        .char_indices()
                        .map(|(i, _)| i)
                        .chain(std::iter::once(s.len()))
                        .collect(),
                    (true, false) => vec![0],
                    (false, true) => s.match_indices(pattern.as_str()).map(|(i, _)| i).collect(),
                    (false, false) => s.find(pattern.as_str()).into_iter().collect(),
                };

                let mut out = String::new();
                let mut last = 0;
                for pos in positions {
                    out.push_str(&s[last..pos]);
                    let replaced = if replacement.is_callable() {
                        let args = vec![
                            Value::from(pattern.as_str()),
                            Value::Number(utf16_offset(&s, pos) as f64),
                            Value::from(s.as_str()),
                        ];
                        self.call(&replacement, args)?.to_js_string()
                    } else {
                        replacement.to_js_string().replace("$&", &pattern)
                    };
                    out.push_str(&replaced);
                    self.check_string_len(out.len())?;
                    last = pos + pattern.len();
                }
                out.push_str(&s[last..]);
                Value::from(out)
            }
            other => return self.type_error(format!("string.{} is not a function", other)),
        };
        Ok(value)
    }

    // ── Numbers ────────────────────────────────────────────────────

    fn call_number_method(&mut self, n: f64, name: &str, args: Vec<Value>) -> Exec<Value> {
        match name {
            "toFixed" => {
                let digits = int_arg(&args, 0, 0.0);
                if !(0.0..=100.0).contains(&digits) {
                    return Err(self.throw_error(
                        "RangeError",
                        "toFixed() digits argument must be between 0 and 100",
                    ));
                }
                Ok(Value::from(to_fixed(n, digits as usize)))
            }
            "toString" => {
                let radix = int_arg(&args, 0, 10.0);
                if !(2.0..=36.0).contains(&radix) {
                    return Err(self.throw_error(
                        "RangeError",
                        "toString() radix must be between 2 and 36",
                    ));
                }
                Ok(Value::from(to_radix_string(n, radix as u32)))
            }
            other => self.type_error(format!("number.{} is not a function", other)),
        }
    }
}

/// UTF-16 offset of a byte offset.
fn utf16_offset(s: &str, byte: usize) -> usize {
    s[..byte].encode_utf16().count()
}

/// Case-insensitive first, then case as a tie-breaker (lowercase first).
fn locale_order(a: &str, b: &str) -> std::cmp::Ordering {
    let folded = |s: &str| s.to_lowercase();
    folded(a).cmp(&folded(b)).then_with(|| b.cmp(a))
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

fn to_fixed(n: f64, digits: usize) -> String {
    if !n.is_finite() || n.abs() >= 1e21 {
        return format_number(n);
    }
    let sign = if n < 0.0 { "-" } else { "" };

    // Exact ties round up; everything else rounds to nearest.
    let exact = format!("{:.*}", digits + 30, n.abs());
    let (int_part, frac_part) = exact.split_once('.').unwrap_or((exact.as_str(), ""));
    let tail = &frac_part[digits..];
    let tie = tail.starts_with('5') && tail[1..].bytes().all(|b| b == b'0');
    if !tie {
        return format!("{}{:.*}", sign, digits, n.abs());
    }

    let mut kept = format!("{}{}", int_part, &frac_part[..digits]).into_bytes();
    let mut i = kept.len();
    loop {
        if i == 0 {
            kept.insert(0, b'1');
            break;
        }
        i -= 1;
        if kept[i] == b'9' {
            kept[i] = b'0';
        } else {
            kept[i] += 1;
            break;
        }
    }
    let text = String::from_utf8_lossy(&kept).into_owned();
    if digits == 0 {
        return format!("{}{}", sign, text);
    }
    let split = text.len() - digits;
    format!("{}{}.{}", sign, &text[..split], &text[split..])
}

fn to_radix_string(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() {
        return format_number(n);
    }
    let negative = n < 0.0;
    let mut int_part = n.abs().trunc();
    let mut frac = n.abs().fract();

    let mut digits = Vec::new();
    if int_part == 0.0 {
        digits.push('0');
    }
    while int_part >= 1.0 {
        let d = (int_part % f64::from(radix)) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('0'));
        int_part = (int_part / f64::from(radix)).trunc();
    }
    digits.reverse();

    let mut out: String = digits.into_iter().collect();
    if frac > 0.0 {
        out.push('.');
        for _ in 0..20 {
            frac *= f64::from(radix);
            let d = frac.trunc() as u32;
            out.push(std::char::from_digit(d, radix).unwrap_or('0'));
            frac = frac.fract();
            if frac == 0.0 {
                break;
            }
        }
    }
    if negative {
        format!("-{}", out)
    } else {
        out
    }
}

fn parse_int(text: &str, radix: Option<f64>) -> f64 {
    let trimmed = text.trim_start();
    let (negative, mut body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let specified = radix.filter(|r| !r.is_nan() && r.trunc() != 0.0).map(f64::trunc);
    let mut radix = match specified {
        Some(r) if (2.0..=36.0).contains(&r) => r as u32,
        Some(_) => return f64::NAN,
        None => 10,
    };
    if specified.is_none() || radix == 16 {
        if let Some(rest) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
            body = rest;
            radix = 16;
        }
    }

    let digits: Vec<u32> = body.chars().map_while(|c| c.to_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits
        .into_iter()
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
    if negative {
        -value
    } else {
        value
    }
}

fn parse_float(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let unsigned = trimmed.trim_start_matches(['+', '-']);
    if unsigned.starts_with("Infinity") {
        return if trimmed.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    // Longest prefix that still parses.
    let mut best = f64::NAN;
    for (i, c) in trimmed.char_indices() {
        if !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) {
            break;
        }
        if let Ok(v) = trimmed[..i + c.len_utf8()].parse::<f64>() {
            best = v;
        }
    }
    best
}
