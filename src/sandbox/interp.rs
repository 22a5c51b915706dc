//! Tree-walking evaluator.
//!
//! Every array, object and scope the interpreter allocates is owned by its
//! heap list as well as by whatever refers to it. Values are therefore never
//! freed by a recursive drop: when only the heap still holds a container, a
//! collection pass empties it first, so its children fall back to being owned
//! by the heap alone. Dropping the interpreter empties everything, which also
//! breaks the reference cycles closures form with their scopes.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use super::ast::*;
use super::value::{error_summary, to_int32, to_uint32, Closure, NativeFn, Object, Value};
use super::{EvalError, Evaluation, Limits, NO_VALUE_DISPLAY};

/// Cap on captured `console.log` lines.
const MAX_LOG_LINES: usize = 200;

pub(super) type Exec<T> = Result<T, Interrupt>;

/// Non-local exit from evaluation.
pub(super) enum Interrupt {
    /// A JavaScript exception; `try/catch` can intercept it.
    Throw(Value),
    /// Resource limit hit; unwinds straight to the caller.
    Fatal(EvalError),
}

pub(super) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

pub struct Scope {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
    function_scope: bool,
}

enum AssignStatus {
    Done,
    Constant,
    Missing,
}

impl Scope {
    fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = self;
        loop {
            if let Some(binding) = current.vars.borrow().get(name) {
                return Some(binding.value.clone());
            }
            current = current.parent.as_deref()?;
        }
    }

    fn declare(&self, name: &str, value: Value, kind: DeclKind) -> bool {
        let mut vars = self.vars.borrow_mut();
        if kind != DeclKind::Var && vars.contains_key(name) {
            return false;
        }
        vars.insert(
            name.to_string(),
            Binding {
                value,
                mutable: kind != DeclKind::Const,
            },
        );
        true
    }

    fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    fn assign(&self, name: &str, value: Value) -> AssignStatus {
        let mut current = self;
        loop {
            if let Some(binding) = current.vars.borrow_mut().get_mut(name) {
                if !binding.mutable {
                    return AssignStatus::Constant;
                }
                binding.value = value;
                return AssignStatus::Done;
            }
            match current.parent.as_deref() {
                Some(parent) => current = parent,
                None => return AssignStatus::Missing,
            }
        }
    }
}

/// Nearest enclosing function (or program) scope; target of `var`.
fn function_scope_of(scope: &Rc<Scope>) -> Rc<Scope> {
    let mut current = scope.clone();
    while !current.function_scope {
        match current.parent.clone() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current
}

/// Minimum number of tracked containers between collections.
const MIN_HEAP_WATERMARK: usize = 1024;

/// Minimum number of stored values between collections.
const MIN_ALLOC_WATERMARK: usize = 1 << 16;

enum HeapRef {
    Scope(Rc<Scope>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<Object>>),
}

impl HeapRef {
    /// Unreachable from the program: the heap holds the only reference.
    fn is_garbage(&self) -> bool {
        match self {
            HeapRef::Scope(rc) => Rc::strong_count(rc) == 1,
            HeapRef::Array(rc) => Rc::strong_count(rc) == 1,
            HeapRef::Object(rc) => Rc::strong_count(rc) == 1,
        }
    }

    /// Values stored directly in the container.
    fn size(&self) -> usize {
        match self {
            HeapRef::Scope(rc) => rc.vars.try_borrow().map_or(0, |vars| vars.len()),
            HeapRef::Array(rc) => rc.try_borrow().map_or(0, |items| items.len()),
            HeapRef::Object(rc) => rc.try_borrow().map_or(0, |obj| obj.entries().len()),
        }
    }

    /// Drop the contents. Child containers are still owned by the heap, so
    /// this never cascades.
    fn release(&self) {
        match self {
            HeapRef::Scope(rc) => {
                if let Ok(mut vars) = rc.vars.try_borrow_mut() {
                    vars.clear();
                }
            }
            HeapRef::Array(rc) => {
                if let Ok(mut items) = rc.try_borrow_mut() {
                    items.clear();
                }
            }
            HeapRef::Object(rc) => {
                if let Ok(mut obj) = rc.try_borrow_mut() {
                    obj.clear();
                }
            }
        }
    }
}

/// Assignment target resolved once, read and written separately.
enum Reference {
    Var(String),
    Member(Value, Value),
}

#[derive(Clone, Copy)]
enum BindMode {
    Declare(DeclKind),
    Assign,
}

pub struct Interpreter {
    pub(super) limits: Limits,
    steps: u64,
    depth: usize,
    globals: Rc<Scope>,
    heap: Vec<HeapRef>,
    heap_watermark: usize,
    /// Values stored into containers since the last collection.
    allocated: usize,
    alloc_watermark: usize,
    pub(super) logs: Vec<String>,
}

impl Interpreter {
    pub fn new(limits: Limits) -> Self {
        let globals = Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            function_scope: true,
        });

        globals.declare("undefined", Value::Undefined, DeclKind::Const);
        globals.declare("NaN", Value::Number(f64::NAN), DeclKind::Const);
        globals.declare("Infinity", Value::Number(f64::INFINITY), DeclKind::Const);
        for name in super::builtins::GLOBALS {
            globals.declare(name, Value::native(name, Value::Undefined), DeclKind::Const);
        }

        Self {
            limits,
            steps: 0,
            depth: 0,
            globals,
            heap: Vec::new(),
            heap_watermark: MIN_HEAP_WATERMARK,
            allocated: 0,
            alloc_watermark: MIN_ALLOC_WATERMARK,
            logs: Vec::new(),
        }
    }

    /// Evaluate a single expression as the whole program.
    pub fn run_expression(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        let scope = self.new_scope(Some(self.globals.clone()), true);
        self.eval(expr, &scope).map_err(|i| self.uncaught(i))
    }

    /// Evaluate a statement list as a function body; the result is its `return` value.
    pub fn run_program(&mut self, stmts: &[Stmt]) -> Result<Value, EvalError> {
        let scope = self.new_scope(Some(self.globals.clone()), true);
        let flow = self.exec_block(stmts, &scope).map_err(|i| self.uncaught(i))?;
        match flow {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Undefined),
            Flow::Break | Flow::Continue => Err(EvalError::Thrown(
                "SyntaxError: Illegal break or continue statement".to_string(),
            )),
        }
    }

    /// Convert a completion value into its reported form.
    pub fn finish(&mut self, value: &Value) -> Result<Evaluation, EvalError> {
        let json = value
            .to_json()
            .map_err(|message| EvalError::Thrown(format!("TypeError: {}", message)))?;

        let display = match value {
            Value::Undefined => NO_VALUE_DISPLAY.to_string(),
            Value::Null => "null".to_string(),
            Value::Array(_) | Value::Object(_) => json
                .as_ref()
                .and_then(|j| serde_json::to_string_pretty(j).ok())
                .unwrap_or_else(|| value.to_js_string()),
            other => other.to_js_string(),
        };

        Ok(Evaluation {
            value: json,
            display,
            logs: std::mem::take(&mut self.logs),
        })
    }

    fn uncaught(&self, interrupt: Interrupt) -> EvalError {
        match interrupt {
            Interrupt::Fatal(err) => err,
            Interrupt::Throw(Value::Object(obj)) if obj.borrow().error => {
                EvalError::Thrown(error_summary(&obj.borrow()))
            }
            Interrupt::Throw(value) => EvalError::Thrown(format!("Uncaught {}", value.to_log_string())),
        }
    }

    // ── Bookkeeping ────────────────────────────────────────────────

    pub(super) fn tick(&mut self) -> Exec<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(Interrupt::Fatal(EvalError::StepLimit(self.limits.max_steps)));
        }
        Ok(())
    }

    /// Account for `units` values stored into tracked containers.
    pub(super) fn note_growth(&mut self, units: usize) {
        self.allocated = self.allocated.saturating_add(units);
    }

    fn track(&mut self, entry: HeapRef) {
        if self.heap.len() >= self.heap_watermark || self.allocated >= self.alloc_watermark {
            self.collect_garbage();
        }
        self.allocated = self.allocated.saturating_add(entry.size() + 1);
        self.heap.push(entry);
    }

    /// Release every container the program can no longer reach.
    ///
    /// Walks newest first: a container usually refers to older ones, so
    /// releasing it turns its children into garbage later in the same pass.
    /// Anything missed is picked up by the next collection.
    fn collect_garbage(&mut self) {
        let mut live = Vec::with_capacity(self.heap.len());
        let mut live_size = 0usize;
        while let Some(entry) = self.heap.pop() {
            if entry.is_garbage() {
                entry.release();
            } else {
                live_size = live_size.saturating_add(entry.size());
                live.push(entry);
            }
        }
        live.reverse();
        self.heap = live;
        self.heap_watermark = (self.heap.len() * 2).max(MIN_HEAP_WATERMARK);
        self.alloc_watermark = live_size.max(MIN_ALLOC_WATERMARK);
        self.allocated = 0;
    }

    fn new_scope(&mut self, parent: Option<Rc<Scope>>, function_scope: bool) -> Rc<Scope> {
        let scope = Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent,
            function_scope,
        });
        self.track(HeapRef::Scope(scope.clone()));
        scope
    }

    /// Fresh copy of a loop scope so closures capture one binding per iteration.
    fn copy_scope(&mut self, scope: &Rc<Scope>) -> Rc<Scope> {
        let copy = self.new_scope(scope.parent.clone(), scope.function_scope);
        *copy.vars.borrow_mut() = scope.vars.borrow().clone();
        copy
    }

    pub(super) fn new_array(&mut self, items: Vec<Value>) -> Value {
        let rc = Rc::new(RefCell::new(items));
        self.track(HeapRef::Array(rc.clone()));
        Value::Array(rc)
    }

    pub(super) fn new_object(&mut self, obj: Object) -> Value {
        let rc = Rc::new(RefCell::new(obj));
        self.track(HeapRef::Object(rc.clone()));
        Value::Object(rc)
    }

    pub(super) fn throw_error(&mut self, name: &str, message: impl Into<String>) -> Interrupt {
        let error = self.new_object(Object::error(name, &message.into()));
        Interrupt::Throw(error)
    }

    pub(super) fn type_error<T>(&mut self, message: impl Into<String>) -> Exec<T> {
        Err(self.throw_error("TypeError", message))
    }

    pub(super) fn check_array_len(&mut self, len: usize) -> Exec<()> {
        if len > self.limits.max_collection_len {
            return Err(self.throw_error("RangeError", "Invalid array length"));
        }
        Ok(())
    }

    pub(super) fn check_string_len(&mut self, len: usize) -> Exec<()> {
        if len > self.limits.max_collection_len {
            return Err(self.throw_error("RangeError", "Invalid string length"));
        }
        Ok(())
    }

    pub(super) fn log(&mut self, line: String) {
        if self.logs.len() < MAX_LOG_LINES {
            self.logs.push(line);
        }
    }

    pub(super) fn json_to_value(&mut self, json: &serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::string(s),
            Json::Array(items) => {
                let values = items.iter().map(|item| self.json_to_value(item)).collect();
                self.new_array(values)
            }
            Json::Object(map) => {
                let mut obj = Object::new();
                for (k, v) in map {
                    let value = self.json_to_value(v);
                    obj.set(k, value);
                }
                self.new_object(obj)
            }
        }
    }

    // ── Statements ─────────────────────────────────────────────────

    fn hoist(&mut self, stmts: &[Stmt], scope: &Rc<Scope>) {
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let closure = self.make_closure(def, scope);
                    scope.declare(name, closure, DeclKind::Var);
                }
            }
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: &Rc<Scope>) -> Exec<Flow> {
        self.hoist(stmts, scope);
        for stmt in stmts {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Exec<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Decl { kind, decls } => {
                let target = if *kind == DeclKind::Var {
                    function_scope_of(scope)
                } else {
                    scope.clone()
                };
                for (pattern, init) in decls {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => {
                            // `var x;` never clobbers an existing binding.
                            if let Pattern::Ident(name) = pattern {
                                if *kind == DeclKind::Var && target.has_own(name) {
                                    continue;
                                }
                            }
                            Value::Undefined
                        }
                    };
                    self.bind(pattern, value, &target, BindMode::Declare(*kind))?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(_) => Ok(Flow::Normal),
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, scope)?.truthy() {
                    self.exec(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond, scope)?.truthy() {
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, cond } => {
                loop {
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval(cond, scope)?.truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
            } => {
                let per_iteration = matches!(
                    init.as_deref(),
                    Some(Stmt::Decl {
                        kind: DeclKind::Let | DeclKind::Const,
                        ..
                    })
                );
                let mut current = self.new_scope(Some(scope.clone()), false);
                if let Some(init) = init {
                    self.exec(init, &current)?;
                }
                loop {
                    self.tick()?;
                    if let Some(cond) = cond {
                        if !self.eval(cond, &current)?.truthy() {
                            break;
                        }
                    }
                    match self.exec(body, &current)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if per_iteration {
                        current = self.copy_scope(&current);
                    }
                    if let Some(update) = update {
                        self.eval(update, &current)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForOf {
                kind,
                pattern,
                iterable,
                body,
            } => {
                let iterable = self.eval(iterable, scope)?;
                let items = self.iterate(&iterable)?;
                self.run_loop_body(items, *kind, pattern, body, scope)
            }
            Stmt::ForIn {
                kind,
                pattern,
                object,
                body,
            } => {
                let object = self.eval(object, scope)?;
                let keys = own_keys(&object).into_iter().map(Value::from).collect();
                self.run_loop_body(keys, *kind, pattern, body, scope)
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval(discriminant, scope)?;
                let switch_scope = self.new_scope(Some(scope.clone()), false);
                for (_, body) in cases {
                    self.hoist(body, &switch_scope);
                }

                let mut start = None;
                for (i, (test, _)) in cases.iter().enumerate() {
                    if let Some(test) = test {
                        if self.eval(test, &switch_scope)?.strict_equals(&value) {
                            start = Some(i);
                            break;
                        }
                    }
                }
                let start = start.or_else(|| cases.iter().position(|(test, _)| test.is_none()));
                let Some(start) = start else {
                    return Ok(Flow::Normal);
                };

                // Matching case runs through every later body until a break.
                for stmt in cases[start..].iter().flat_map(|(_, body)| body) {
                    match self.exec(stmt, &switch_scope)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                Err(Interrupt::Throw(value))
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let block_scope = self.new_scope(Some(scope.clone()), false);
                let outcome = match (self.exec_block(block, &block_scope), handler) {
                    (Err(Interrupt::Throw(thrown)), Some(handler)) => {
                        let catch_scope = self.new_scope(Some(scope.clone()), false);
                        let bound = match param {
                            Some(param) => {
                                self.bind(param, thrown, &catch_scope, BindMode::Declare(DeclKind::Let))
                            }
                            None => Ok(()),
                        };
                        match bound {
                            Ok(()) => self.exec_block(handler, &catch_scope),
                            Err(interrupt) => Err(interrupt),
                        }
                    }
                    (other, _) => other,
                };

                if let Err(Interrupt::Fatal(_)) = outcome {
                    return outcome;
                }
                if let Some(finalizer) = finalizer {
                    let finally_scope = self.new_scope(Some(scope.clone()), false);
                    match self.exec_block(finalizer, &finally_scope)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                outcome
            }
            Stmt::Block(stmts) => {
                let block_scope = self.new_scope(Some(scope.clone()), false);
                self.exec_block(stmts, &block_scope)
            }
            Stmt::Empty => Ok(Flow::Normal),
        }
    }

    fn run_loop_body(
        &mut self,
        items: Vec<Value>,
        kind: DeclKind,
        pattern: &Pattern,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> Exec<Flow> {
        for item in items {
            self.tick()?;
            let iter_scope = self.new_scope(Some(scope.clone()), false);
            let target = if kind == DeclKind::Var {
                function_scope_of(scope)
            } else {
                iter_scope.clone()
            };
            self.bind(pattern, item, &target, BindMode::Declare(kind))?;
            match self.exec(body, &iter_scope)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    // ── Bindings ───────────────────────────────────────────────────

    fn bind(&mut self, pattern: &Pattern, value: Value, scope: &Rc<Scope>, mode: BindMode) -> Exec<()> {
        match pattern {
            Pattern::Ident(name) => match mode {
                BindMode::Declare(kind) => {
                    if !scope.declare(name, value, kind) {
                        return Err(self.throw_error(
                            "SyntaxError",
                            format!("Identifier '{}' has already been declared", name),
                        ));
                    }
                    Ok(())
                }
                BindMode::Assign => self.assign_var(name, value, scope),
            },
            Pattern::Target(expr) => {
                let reference = self.resolve_ref(expr, scope)?;
                self.write_ref(&reference, value, scope)
            }
            Pattern::Array { elements, rest } => {
                let items = self.iterate(&value)?;
                for (i, elem) in elements.iter().enumerate() {
                    let Some(elem) = elem else {
                        continue;
                    };
                    let item = items.get(i).cloned().unwrap_or(Value::Undefined);
                    self.bind_elem(elem, item, scope, mode)?;
                }
                if let Some(rest) = rest {
                    let remaining = items.get(elements.len()..).map(<[Value]>::to_vec).unwrap_or_default();
                    let remaining = self.new_array(remaining);
                    self.bind(rest, remaining, scope, mode)?;
                }
                Ok(())
            }
            Pattern::Object { props, rest } => {
                if value.is_nullish() {
                    return self.type_error(format!(
                        "Cannot destructure '{}' as it is {}.",
                        value.to_js_string(),
                        value.to_js_string()
                    ));
                }
                for (key, elem) in props {
                    let item = self.get_member(&value, &Value::string(key))?;
                    self.bind_elem(elem, item, scope, mode)?;
                }
                if let Some(rest) = rest {
                    let mut obj = Object::new();
                    for (k, v) in own_entries(&value) {
                        if !props.iter().any(|(p, _)| *p == k) {
                            obj.set(&k, v);
                        }
                    }
                    let obj = self.new_object(obj);
                    self.bind(rest, obj, scope, mode)?;
                }
                Ok(())
            }
        }
    }

    fn bind_elem(&mut self, elem: &PatternElem, value: Value, scope: &Rc<Scope>, mode: BindMode) -> Exec<()> {
        let value = match &elem.default {
            Some(default) if matches!(value, Value::Undefined) => self.eval(default, scope)?,
            _ => value,
        };
        self.bind(&elem.pattern, value, scope, mode)
    }

    fn assign_var(&mut self, name: &str, value: Value, scope: &Rc<Scope>) -> Exec<()> {
        match scope.assign(name, value.clone()) {
            AssignStatus::Done => Ok(()),
            AssignStatus::Constant => self.type_error("Assignment to constant variable."),
            AssignStatus::Missing => {
                // Sloppy-mode implicit global.
                self.globals.declare(name, value, DeclKind::Var);
                Ok(())
            }
        }
    }

    fn lookup(&mut self, name: &str, scope: &Rc<Scope>) -> Exec<Value> {
        match scope.lookup(name) {
            Some(value) => Ok(value),
            None => Err(self.throw_error("ReferenceError", format!("{} is not defined", name))),
        }
    }

    fn resolve_ref(&mut self, target: &Expr, scope: &Rc<Scope>) -> Exec<Reference> {
        match target {
            Expr::Ident(name) => Ok(Reference::Var(name.clone())),
            Expr::Member {
                object, property, ..
            } => {
                let base = self.eval(object, scope)?;
                let key = self.member_key(property, scope)?;
                Ok(Reference::Member(base, key))
            }
            _ => Err(self.throw_error("SyntaxError", "Invalid assignment target")),
        }
    }

    fn read_ref(&mut self, reference: &Reference, scope: &Rc<Scope>) -> Exec<Value> {
        match reference {
            Reference::Var(name) => self.lookup(name, scope),
            Reference::Member(base, key) => self.get_member(base, key),
        }
    }

    fn write_ref(&mut self, reference: &Reference, value: Value, scope: &Rc<Scope>) -> Exec<()> {
        match reference {
            Reference::Var(name) => self.assign_var(name, value, scope),
            Reference::Member(base, key) => self.set_member(base, key, value),
        }
    }

    // ── Expressions ────────────────────────────────────────────────

    fn make_closure(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> Value {
        Value::Function(Rc::new(Closure {
            def: def.clone(),
            env: scope.clone(),
        }))
    }

    pub(super) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Exec<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::string(s)),
            Expr::Template(chunks) => {
                let mut out = String::new();
                for chunk in chunks {
                    match chunk {
                        TemplateChunk::Text(text) => out.push_str(text),
                        TemplateChunk::Expr(expr) => {
                            let value = self.eval(expr, scope)?;
                            out.push_str(&value.to_js_string());
                        }
                    }
                    self.check_string_len(out.len())?;
                }
                Ok(Value::from(out))
            }
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Ident(name) => self.lookup(name, scope),
            Expr::Array(items) => {
                let values = self.eval_items(items, scope)?;
                Ok(self.new_array(values))
            }
            Expr::Object(props) => self.eval_object(props, scope),
            Expr::Function(def) => Ok(self.make_closure(def, scope)),
            Expr::Unary(op, operand) => self.eval_unary(*op, operand, scope),
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let reference = self.resolve_ref(target, scope)?;
                let old = self.read_ref(&reference, scope)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_ref(&reference, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, left, right)
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Assign { op, target, value } => self.eval_assign(*op, target, value, scope),
            Expr::Conditional(cond, then, otherwise) => {
                if self.eval(cond, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Member { .. } | Expr::Call { .. } => {
                Ok(self.eval_chain(expr, scope)?.unwrap_or(Value::Undefined))
            }
            Expr::New { callee, args } => {
                let constructor = self.eval(callee, scope)?;
                let args = self.eval_items(args, scope)?;
                match &constructor {
                    Value::Native(native) if super::builtins::is_constructor(&native.name) => {
                        let native = native.clone();
                        self.call_native(&native, args)
                    }
                    _ => self.type_error(format!("{} is not a constructor", describe_expr(callee))),
                }
            }
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for expr in exprs {
                    last = self.eval(expr, scope)?;
                }
                Ok(last)
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, scope: &Rc<Scope>) -> Exec<Value> {
        if op == UnaryOp::Typeof {
            if let Expr::Ident(name) = operand {
                if scope.lookup(name).is_none() {
                    return Ok(Value::from("undefined"));
                }
            }
        }

        let value = self.eval(operand, scope)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.truthy()),
            UnaryOp::Neg => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::BitNot => Value::Number(f64::from(!to_int32(value.to_number()))),
            UnaryOp::Typeof => Value::from(value.type_of()),
            UnaryOp::Void => Value::Undefined,
        })
    }

    fn eval_assign(
        &mut self,
        op: AssignOp,
        target: &AssignTarget,
        value: &Expr,
        scope: &Rc<Scope>,
    ) -> Exec<Value> {
        let target = match target {
            AssignTarget::Pattern(pattern) => {
                let value = self.eval(value, scope)?;
                self.bind(pattern, value.clone(), scope, BindMode::Assign)?;
                return Ok(value);
            }
            AssignTarget::Simple(target) => target,
        };

        let reference = self.resolve_ref(target, scope)?;
        let new_value = match op {
            AssignOp::Assign => self.eval(value, scope)?,
            AssignOp::Compound(bin) => {
                let current = self.read_ref(&reference, scope)?;
                let rhs = self.eval(value, scope)?;
                self.binary(bin, current, rhs)?
            }
            AssignOp::Logical(logical) => {
                let current = self.read_ref(&reference, scope)?;
                let keep = match logical {
                    LogicalOp::And => !current.truthy(),
                    LogicalOp::Or => current.truthy(),
                    LogicalOp::Nullish => !current.is_nullish(),
                };
                if keep {
                    return Ok(current);
                }
                self.eval(value, scope)?
            }
        };
        self.write_ref(&reference, new_value.clone(), scope)?;
        Ok(new_value)
    }

    /// Member and call chains. `None` means an optional link short-circuited.
    fn eval_chain(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Exec<Option<Value>> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let Some(base) = self.eval_chain(object, scope)? else {
                    return Ok(None);
                };
                if *optional && base.is_nullish() {
                    return Ok(None);
                }
                let key = self.member_key(property, scope)?;
                Ok(Some(self.get_member(&base, &key)?))
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => {
                let Some(func) = self.eval_chain(callee, scope)? else {
                    return Ok(None);
                };
                if *optional && func.is_nullish() {
                    return Ok(None);
                }
                if !func.is_callable() {
                    return self.type_error(format!("{} is not a function", describe_expr(callee)));
                }
                let args = self.eval_items(args, scope)?;
                Ok(Some(self.call(&func, args)?))
            }
            other => Ok(Some(self.eval(other, scope)?)),
        }
    }

    fn member_key(&mut self, property: &MemberProp, scope: &Rc<Scope>) -> Exec<Value> {
        match property {
            MemberProp::Static(name) => Ok(Value::string(name)),
            MemberProp::Computed(expr) => self.eval(expr, scope),
        }
    }

    fn eval_items(&mut self, items: &[ArrayItem], scope: &Rc<Scope>) -> Exec<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                ArrayItem::Expr(expr) => out.push(self.eval(expr, scope)?),
                ArrayItem::Spread(expr) => {
                    let value = self.eval(expr, scope)?;
                    out.extend(self.iterate(&value)?);
                    self.check_array_len(out.len())?;
                }
                ArrayItem::Hole => out.push(Value::Undefined),
            }
        }
        Ok(out)
    }

    fn eval_object(&mut self, props: &[PropItem], scope: &Rc<Scope>) -> Exec<Value> {
        let mut obj = Object::new();
        for prop in props {
            match prop {
                PropItem::KeyValue(key, value) => {
                    let key = match key {
                        PropKey::Static(name) => name.clone(),
                        PropKey::Computed(expr) => self.eval(expr, scope)?.to_property_key(),
                    };
                    let value = self.eval(value, scope)?;
                    obj.set(&key, value);
                }
                PropItem::Spread(expr) => {
                    let source = self.eval(expr, scope)?;
                    for (k, v) in own_entries(&source) {
                        obj.set(&k, v);
                    }
                }
            }
        }
        Ok(self.new_object(obj))
    }

    // ── Operators ──────────────────────────────────────────────────

    pub(super) fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Exec<Value> {
        let number = |v: f64| Ok(Value::Number(v));
        match op {
            BinaryOp::Add => {
                let left = to_primitive(left);
                let right = to_primitive(right);
                if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                    let joined = format!("{}{}", left.to_js_string(), right.to_js_string());
                    self.check_string_len(joined.len())?;
                    Ok(Value::from(joined))
                } else {
                    number(left.to_number() + right.to_number())
                }
            }
            BinaryOp::Sub => number(left.to_number() - right.to_number()),
            BinaryOp::Mul => number(left.to_number() * right.to_number()),
            BinaryOp::Div => number(left.to_number() / right.to_number()),
            BinaryOp::Rem => number(left.to_number() % right.to_number()),
            BinaryOp::Pow => number(js_pow(left.to_number(), right.to_number())),
            BinaryOp::Eq => Ok(Value::Bool(left.loose_equals(&right))),
            BinaryOp::NotEq => Ok(Value::Bool(!left.loose_equals(&right))),
            BinaryOp::StrictEq => Ok(Value::Bool(left.strict_equals(&right))),
            BinaryOp::StrictNotEq => Ok(Value::Bool(!left.strict_equals(&right))),
            BinaryOp::Lt => Ok(Value::Bool(matches!(compare(left, right), Some(Ordering::Less)))),
            BinaryOp::Gt => Ok(Value::Bool(matches!(compare(left, right), Some(Ordering::Greater)))),
            BinaryOp::LtEq => Ok(Value::Bool(matches!(
                compare(left, right),
                Some(Ordering::Less | Ordering::Equal)
            ))),
            BinaryOp::GtEq => Ok(Value::Bool(matches!(
                compare(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ))),
            BinaryOp::BitAnd => number(f64::from(to_int32(left.to_number()) & to_int32(right.to_number()))),
            BinaryOp::BitOr => number(f64::from(to_int32(left.to_number()) | to_int32(right.to_number()))),
            BinaryOp::BitXor => number(f64::from(to_int32(left.to_number()) ^ to_int32(right.to_number()))),
            BinaryOp::Shl => {
                let shift = to_uint32(right.to_number()) & 31;
                number(f64::from(to_int32(left.to_number()).wrapping_shl(shift)))
            }
            BinaryOp::Shr => {
                let shift = to_uint32(right.to_number()) & 31;
                number(f64::from(to_int32(left.to_number()) >> shift))
            }
            BinaryOp::UShr => {
                let shift = to_uint32(right.to_number()) & 31;
                number(f64::from(to_uint32(left.to_number()) >> shift))
            }
            BinaryOp::In => {
                let key = left.to_property_key();
                match &right {
                    Value::Object(obj) => Ok(Value::Bool(obj.borrow().contains(&key))),
                    Value::Array(items) => {
                        let len = items.borrow().len();
                        let found = key == "length" || array_index(&left).map_or(false, |i| i < len);
                        Ok(Value::Bool(found))
                    }
                    _ => self.type_error(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        key,
                        right.to_js_string()
                    )),
                }
            }
            BinaryOp::InstanceOf => {
                if !right.is_callable() {
                    return self.type_error("Right-hand side of 'instanceof' is not callable");
                }
                Ok(Value::Bool(instance_of(&left, &right)))
            }
        }
    }

    // ── Property access ────────────────────────────────────────────

    pub(super) fn get_member(&mut self, base: &Value, key: &Value) -> Exec<Value> {
        use super::builtins::{method_or_undefined, static_member, ARRAY_METHODS, NUMBER_METHODS, OBJECT_METHODS, STRING_METHODS};

        match base {
            Value::Undefined | Value::Null => self.type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                base.to_js_string(),
                key.to_property_key()
            )),
            Value::Array(items) => {
                if let Some(index) = array_index(key) {
                    return Ok(items.borrow().get(index).cloned().unwrap_or(Value::Undefined));
                }
                let name = key.to_property_key();
                if name == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                Ok(method_or_undefined(ARRAY_METHODS, &name, base))
            }
            Value::Str(s) => {
                if let Some(index) = array_index(key) {
                    return Ok(code_unit_at(s, index)
                        .map(Value::from)
                        .unwrap_or(Value::Undefined));
                }
                let name = key.to_property_key();
                if name == "length" {
                    return Ok(Value::Number(s.encode_utf16().count() as f64));
                }
                Ok(method_or_undefined(STRING_METHODS, &name, base))
            }
            Value::Number(_) => Ok(method_or_undefined(NUMBER_METHODS, &key.to_property_key(), base)),
            Value::Bool(_) => Ok(method_or_undefined(&["toString"], &key.to_property_key(), base)),
            Value::Object(obj) => {
                let name = key.to_property_key();
                if let Some(value) = obj.borrow().get(&name) {
                    return Ok(value.clone());
                }
                Ok(method_or_undefined(OBJECT_METHODS, &name, base))
            }
            Value::Function(closure) => Ok(match key.to_property_key().as_str() {
                "name" => Value::from(closure.def.name.clone().unwrap_or_default()),
                "length" => Value::Number(closure.def.params.len() as f64),
                _ => Value::Undefined,
            }),
            Value::Native(native) => {
                let name = key.to_property_key();
                if name == "name" {
                    return Ok(Value::string(&*native.name));
                }
                Ok(static_member(&native.name, &name).unwrap_or(Value::Undefined))
            }
        }
    }

    pub(super) fn set_member(&mut self, base: &Value, key: &Value, value: Value) -> Exec<()> {
        match base {
            Value::Undefined | Value::Null => self.type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                base.to_js_string(),
                key.to_property_key()
            )),
            Value::Array(items) => {
                if let Some(index) = array_index(key) {
                    self.check_array_len(index + 1)?;
                    let grown = (index + 1).saturating_sub(items.borrow().len());
                    self.note_growth(grown);
                    let mut items = items.borrow_mut();
                    if index >= items.len() {
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                } else if key.to_property_key() == "length" {
                    let len = value.to_number();
                    if len < 0.0 || len.fract() != 0.0 || !len.is_finite() {
                        return Err(self.throw_error("RangeError", "Invalid array length"));
                    }
                    let len = len as usize;
                    self.check_array_len(len)?;
                    let grown = len.saturating_sub(items.borrow().len());
                    self.note_growth(grown);
                    items.borrow_mut().resize(len, Value::Undefined);
                }
                Ok(())
            }
            Value::Object(obj) => {
                self.note_growth(1);
                obj.borrow_mut().set(&key.to_property_key(), value);
                Ok(())
            }
            // Writes to primitives and functions are silently dropped.
            _ => Ok(()),
        }
    }

    /// Spread / destructuring / `for..of` source.
    pub(super) fn iterate(&mut self, value: &Value) -> Exec<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            other => self.type_error(format!("{} is not iterable", other.to_js_string())),
        }
    }

    // ── Calls ──────────────────────────────────────────────────────

    pub(super) fn call(&mut self, func: &Value, args: Vec<Value>) -> Exec<Value> {
        match func {
            Value::Function(closure) => {
                if self.depth >= self.limits.max_call_depth {
                    return Err(Interrupt::Fatal(EvalError::CallDepth(self.limits.max_call_depth)));
                }
                self.tick()?;
                self.depth += 1;
                let result = self.invoke(closure, args);
                self.depth -= 1;
                result
            }
            Value::Native(native) => {
                let native: Rc<NativeFn> = native.clone();
                self.call_native(&native, args)
            }
            other => self.type_error(format!("{} is not a function", other.to_js_string())),
        }
    }

    fn invoke(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> Exec<Value> {
        let def = closure.def.clone();
        let scope = self.new_scope(Some(closure.env.clone()), true);

        if let Some(name) = &def.name {
            scope.declare(name, Value::Function(closure.clone()), DeclKind::Var);
        }

        let mut args = args.into_iter();
        for param in &def.params {
            let value = args.next().unwrap_or(Value::Undefined);
            self.bind_elem(param, value, &scope, BindMode::Declare(DeclKind::Var))?;
        }
        if let Some(rest) = &def.rest {
            let remaining = self.new_array(args.collect());
            self.bind(rest, remaining, &scope, BindMode::Declare(DeclKind::Var))?;
        }

        match &def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
            FunctionBody::Block(stmts) => match self.exec_block(stmts, &scope)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(Value::Undefined),
                Flow::Break | Flow::Continue => {
                    Err(self.throw_error("SyntaxError", "Illegal break or continue statement"))
                }
            },
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        if let Ok(mut vars) = self.globals.vars.try_borrow_mut() {
            vars.clear();
        }
        // Everything stays owned by the heap until all contents are gone.
        for entry in self.heap.iter().rev() {
            entry.release();
        }
        self.heap.clear();
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Objects, arrays and functions become their string form.
pub(super) fn to_primitive(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Native(_) => {
            Value::from(value.to_js_string())
        }
        other => other,
    }
}

fn compare(left: Value, right: Value) -> Option<Ordering> {
    let left = to_primitive(left);
    let right = to_primitive(right);
    if let (Value::Str(a), Value::Str(b)) = (&left, &right) {
        return Some(a.cmp(b));
    }
    left.to_number().partial_cmp(&right.to_number())
}

pub(super) fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// Canonical array index for a property key.
pub(super) fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < 4_294_967_295.0 => Some(*n as usize),
        Value::Str(s) => {
            if s.is_empty() || (s.len() > 1 && s.starts_with('0')) || !s.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            s.parse().ok()
        }
        _ => None,
    }
}

pub(super) fn own_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(obj) => obj.borrow().keys(),
        Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
        Value::Str(s) => (0..s.encode_utf16().count()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

pub(super) fn own_entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(obj) => obj.borrow().entries().to_vec(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Value::Str(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            (0..units.len())
                .map(|i| (i.to_string(), Value::from(String::from_utf16_lossy(&units[i..i + 1]))))
                .collect()
        }
        _ => Vec::new(),
    }
}

/// The UTF-16 code unit at `index` as a one-unit string.
fn code_unit_at(s: &str, index: usize) -> Option<String> {
    s.encode_utf16()
        .nth(index)
        .map(|unit| String::from_utf16_lossy(&[unit]))
}

fn instance_of(value: &Value, constructor: &Value) -> bool {
    let Value::Native(native) = constructor else {
        return false;
    };
    match &*native.name {
        "Array" => matches!(value, Value::Array(_)),
        "Object" => matches!(
            value,
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Native(_)
        ),
        "Function" => value.is_callable(),
        "Error" => matches!(value, Value::Object(obj) if obj.borrow().error),
        name @ ("TypeError" | "RangeError" | "SyntaxError" | "ReferenceError") => match value {
            Value::Object(obj) => {
                let obj = obj.borrow();
                obj.error && obj.get("name").map_or(false, |n| n.to_js_string() == name)
            }
            _ => false,
        },
        _ => false,
    }
}

/// Source-ish name of a callee for error messages.
fn describe_expr(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member {
            object,
            property: MemberProp::Static(name),
            ..
        } => format!("{}.{}", describe_expr(object), name),
        Expr::Member { object, .. } => format!("{}[...]", describe_expr(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe_expr(callee)),
        _ => "expression".to_string(),
    }
}
