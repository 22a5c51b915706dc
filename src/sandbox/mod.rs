//! Restricted JavaScript-subset interpreter backing the `execute_javascript` tool.
//!
//! Code runs entirely in-process against a fresh global scope. There is no
//! file, network, process, environment or clock access. Execution is bounded
//! by [`Limits`]; hitting a bound aborts the evaluation with an [`EvalError`].
//!
//! Source is first parsed as a single expression and its value returned. If
//! that does not parse, it is run as a function body and the value of its
//! `return` statement (if any) is reported.
//!
//! Strings are sequences of UTF-16 code units, as in JavaScript. Not
//! supported: classes, generators, `async`, labelled statements and the
//! `arguments` object (use rest parameters instead).

mod ast;
mod builtins;
mod interp;
mod lexer;
mod parser;
mod value;

use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::DEFAULT_EVAL_MAX_STEPS;

/// Display text for an evaluation that produced no value.
pub const NO_VALUE_DISPLAY: &str = "undefined (code executed but no value returned)";

/// Stack for the evaluation thread; recursion in user code maps onto it.
const EVAL_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Resource bounds for a single evaluation.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Statements, loop iterations and calls executed.
    pub max_steps: u64,
    /// Nested user-function calls.
    pub max_call_depth: usize,
    /// Longest array or string that may be built.
    pub max_collection_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_EVAL_MAX_STEPS,
            max_call_depth: 200,
            max_collection_len: 1_000_000,
        }
    }
}

impl Limits {
    pub fn with_max_steps(max_steps: u64) -> Self {
        Self {
            max_steps,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { message: String, line: usize },

    /// Uncaught exception, rendered as `Name: message`.
    #[error("{0}")]
    Thrown(String),

    #[error("Execution aborted: step limit of {0} exceeded")]
    StepLimit(u64),

    #[error("RangeError: Maximum call stack size exceeded (limit {0})")]
    CallDepth(usize),

    #[error("Evaluator failure: {0}")]
    Internal(String),
}

/// Successful evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// JSON form of the value; `None` for `undefined` and functions.
    pub value: Option<serde_json::Value>,
    /// Human-readable rendering.
    pub display: String,
    /// Captured `console.log` output.
    pub logs: Vec<String>,
}

enum Program {
    Expression(ast::Expr),
    Statements(Vec<ast::Stmt>),
}

fn parse(code: &str) -> Result<Program, EvalError> {
    match parser::parse_standalone_expression(code) {
        Ok(expr) => Ok(Program::Expression(expr)),
        Err(EvalError::Syntax { .. }) => parser::parse_program(code).map(Program::Statements),
        Err(other) => Err(other),
    }
}

/// Evaluate `code` on the current thread.
///
/// Deep recursion in user code consumes native stack, so prefer
/// [`evaluate_isolated`] outside of tests.
pub fn evaluate(code: &str, limits: &Limits) -> Result<Evaluation, EvalError> {
    let program = parse(code)?;
    // Declared before the interpreter so it is dropped after the heap is emptied.
    let value;
    let mut interpreter = interp::Interpreter::new(limits.clone());
    value = match &program {
        Program::Expression(expr) => interpreter.run_expression(expr)?,
        Program::Statements(stmts) => interpreter.run_program(stmts)?,
    };
    interpreter.finish(&value)
}

/// Evaluate `code` on a dedicated large-stack thread.
///
/// A panic inside the interpreter is reported as [`EvalError::Internal`].
pub async fn evaluate_isolated(code: String, limits: Limits) -> Result<Evaluation, EvalError> {
    let (tx, rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("js-sandbox".to_string())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| evaluate(&code, &limits)))
                .unwrap_or_else(|_| Err(EvalError::Internal("interpreter panicked".to_string())));
            let _ = tx.send(outcome);
        })
        .map_err(|e| EvalError::Internal(format!("failed to start evaluation thread: {}", e)))?;

    rx.await
        .map_err(|_| EvalError::Internal("evaluation thread exited without a result".to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(code: &str) -> Evaluation {
        evaluate(code, &Limits::default()).unwrap()
    }

    fn display(code: &str) -> String {
        run(code).display
    }

    fn error(code: &str) -> String {
        evaluate(code, &Limits::default()).unwrap_err().to_string()
    }

    #[test]
    fn return_two_plus_two_is_four() {
        let eval = run("return 2+2");
        assert_eq!(eval.display, "4");
        assert_eq!(eval.value, Some(json!(4)));
    }

    #[test]
    fn expressions_are_returned_directly() {
        assert_eq!(display("2 + 3 * 4"), "14");
        assert_eq!(display("'hello'.toUpperCase()"), "HELLO");
        assert_eq!(display("0.1 + 0.2"), "0.30000000000000004");
        assert_eq!(display("10 / 0"), "Infinity");
        assert_eq!(display("Math.max(3, 9, 4)"), "9");
        assert_eq!(display("null"), "null");
        assert_eq!(display("typeof undefinedThing"), "undefined");
    }

    #[test]
    fn statements_without_return_report_the_sentinel() {
        let eval = run("let x = 5; x * 2;");
        assert_eq!(eval.display, NO_VALUE_DISPLAY);
        assert_eq!(eval.value, None);
    }

    #[test]
    fn structures_render_as_pretty_json() {
        let eval = run("return { name: 'a', items: [1, 2] }");
        assert_eq!(eval.display, "{\n  \"name\": \"a\",\n  \"items\": [\n    1,\n    2\n  ]\n}");
        assert_eq!(eval.value, Some(json!({"name": "a", "items": [1, 2]})));
    }

    #[test]
    fn fibonacci_with_loops_and_functions() {
        let code = r#"
            function fib(n) {
                const seq = [0, 1];
                for (let i = 2; i < n; i++) {
                    seq.push(seq[i - 1] + seq[i - 2]);
                }
                return seq.slice(0, n);
            }
            return fib(10).join(", ");
        "#;
        assert_eq!(display(code), "0, 1, 1, 2, 3, 5, 8, 13, 21, 34");
    }

    #[test]
    fn recursion_and_closures() {
        let code = r#"
            const fact = n => n <= 1 ? 1 : n * fact(n - 1);
            function counter() {
                let count = 0;
                return () => ++count;
            }
            const next = counter();
            next(); next();
            return [fact(5), next()];
        "#;
        assert_eq!(run(code).value, Some(json!([120, 3])));
    }

    #[test]
    fn loop_closures_capture_each_iteration() {
        let code = r#"
            const fns = [];
            for (let i = 0; i < 3; i++) fns.push(() => i);
            return fns.map(f => f());
        "#;
        assert_eq!(run(code).value, Some(json!([0, 1, 2])));
    }

    #[test]
    fn array_higher_order_methods() {
        assert_eq!(
            run("[5, 1, 4, 2].sort((a, b) => a - b)").value,
            Some(json!([1, 2, 4, 5]))
        );
        assert_eq!(
            run("[1, 2, 3, 4].filter(n => n % 2 === 0).map(n => n * 10)").value,
            Some(json!([20, 40]))
        );
        assert_eq!(display("[1, 2, 3].reduce((a, b) => a + b, 0)"), "6");
        // Default sort compares string forms.
        assert_eq!(run("[10, 1, 2].sort()").value, Some(json!([1, 10, 2])));
    }

    #[test]
    fn destructuring_spread_and_templates() {
        let code = r#"
            const { a, b: [first, ...others], c = 7 } = { a: 1, b: [2, 3, 4] };
            let x = 1, y = 2;
            [x, y] = [y, x];
            const merged = { ...{ p: 1 }, q: 2 };
            return `${a}-${first}-${others.length}-${c}-${x}${y}-${Object.keys(merged).join('')}`;
        "#;
        assert_eq!(display(code), "1-2-2-7-21-pq");
    }

    #[test]
    fn builtins_cover_common_needs() {
        assert_eq!(display("(3.14159).toFixed(2)"), "3.14");
        assert_eq!(display("(2.5).toFixed(0)"), "3");
        assert_eq!(display("parseInt('42px')"), "42");
        assert_eq!(display("parseFloat('3.5e2abc')"), "350");
        assert_eq!(display("'a,b,,c'.split(',').length"), "4");
        assert_eq!(display("'5'.padStart(3, '0')"), "005");
        assert_eq!(display("JSON.stringify({a: [1, {b: 2}]})"), r#"{"a":[1,{"b":2}]}"#);
        assert_eq!(display("JSON.parse('{\"k\": [1, 2]}').k[1]"), "2");
        assert_eq!(display("Number.isInteger(5.0)"), "true");
        assert_eq!(display("(255).toString(16)"), "ff");
        assert_eq!(display("'banana'.replaceAll('a', 'o')"), "bonono");
    }

    #[test]
    fn thrown_errors_are_reported_with_their_message() {
        assert_eq!(error("throw new Error('boom')"), "Error: boom");
        assert_eq!(error("undefinedVariable + 1"), "ReferenceError: undefinedVariable is not defined");
        assert_eq!(
            error("const o = null; return o.field"),
            "TypeError: Cannot read properties of null (reading 'field')"
        );
        assert_eq!(error("const k = 1; k = 2;"), "TypeError: Assignment to constant variable.");
    }

    #[test]
    fn try_catch_finally() {
        let code = r#"
            const log = [];
            try {
                log.push('try');
                null.x;
            } catch (e) {
                log.push(e instanceof TypeError ? 'caught' : 'other');
            } finally {
                log.push('finally');
            }
            return log;
        "#;
        assert_eq!(run(code).value, Some(json!(["try", "caught", "finally"])));
    }

    #[test]
    fn console_output_is_captured() {
        let eval = run("console.log('hi', 1, [2]); return 'done'");
        assert_eq!(eval.logs, vec!["hi 1 [2]".to_string()]);
        assert_eq!(eval.display, "done");
    }

    #[test]
    fn syntax_errors_carry_a_line() {
        let err = evaluate("let x = ;", &Limits::default()).unwrap_err();
        assert!(matches!(err, EvalError::Syntax { line: 1, .. }));
    }

    #[test]
    fn infinite_loops_hit_the_step_limit() {
        let err = evaluate("while (true) {}", &Limits::with_max_steps(10_000)).unwrap_err();
        assert_eq!(err, EvalError::StepLimit(10_000));
    }

    #[test]
    fn runaway_allocation_is_refused() {
        let limits = Limits {
            max_collection_len: 1000,
            ..Limits::default()
        };
        let err = evaluate("'x'.repeat(5000)", &limits).unwrap_err();
        assert!(err.to_string().starts_with("RangeError"));
    }

    #[test]
    fn circular_results_fail_cleanly() {
        let err = error("const a = []; a.push(a); return a");
        assert!(err.contains("circular"));
    }

    #[test]
    fn host_access_is_absent() {
        assert!(error("require('fs')").contains("require is not defined"));
        assert!(error("process.env").contains("process is not defined"));
        assert!(error("fetch('http://example.com')").contains("fetch is not defined"));
    }

    #[tokio::test]
    async fn deep_recursion_hits_the_call_depth_limit() {
        let err = evaluate_isolated("function f(n) { return f(n + 1) } return f(0)".to_string(), Limits::default())
            .await
            .unwrap_err();
        assert_eq!(err, EvalError::CallDepth(200));
    }

    #[tokio::test]
    async fn releasing_a_deep_chain_is_not_recursive() {
        let limits = Limits::with_max_steps(10_000_000);
        let code = "let a = []; let i = 0; while (i < 200000) { a = [a]; i++ } a = null; return i";
        let eval = evaluate_isolated(code.to_string(), limits.clone()).await.unwrap();
        assert_eq!(eval.display, "200000");

        let code = "let o = {}; for (let i = 0; i < 200000; i++) { o = { next: o } } o = 0; return 'done'";
        let eval = evaluate_isolated(code.to_string(), limits.clone()).await.unwrap();
        assert_eq!(eval.display, "done");

        let code = "let f = () => 0; for (let i = 0; i < 100000; i++) { const g = f; f = () => g } f = null; return 1";
        let eval = evaluate_isolated(code.to_string(), limits).await.unwrap();
        assert_eq!(eval.display, "1");
    }

    #[tokio::test]
    async fn returning_a_deep_chain_fails_cleanly() {
        let code = "let a = []; for (let i = 0; i < 200000; i++) { a = [a] } return a";
        let err = evaluate_isolated(code.to_string(), Limits::with_max_steps(10_000_000))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nested too deeply"), "{err}");
    }

    #[test]
    fn garbage_in_loops_is_reclaimed() {
        let code = "let kept = []; for (let i = 0; i < 50000; i++) { const t = [i, [i], { i }]; if (i % 1000 == 0) kept.push(t) } return kept.length";
        assert_eq!(display(code), "50");
    }

    #[test]
    fn strings_are_utf16_code_units() {
        assert_eq!(display("'😀'.length"), "2");
        assert_eq!(display("'a😀b'.charCodeAt(1)"), "55357");
        assert_eq!(display("'a😀b'.codePointAt(1)"), "128512");
        assert_eq!(display("'a😀b'.slice(1, 3)"), "😀");
        assert_eq!(display("'a😀b'.indexOf('b')"), "3");
        assert_eq!(display("[...'a😀'].length"), "2");
        assert_eq!(display("'héllo'[1]"), "é");
    }

    #[test]
    fn object_keys_list_indices_first() {
        let eval = run("Object.keys({b: 1, a: 2, 1: 3})");
        assert_eq!(eval.value, Some(json!(["1", "b", "a"])));
        let eval = run("const o = {z: 0}; o[10] = 1; o[2] = 2; o.y = 3; return JSON.stringify(o)");
        assert_eq!(eval.display, r#"{"2":2,"10":1,"z":0,"y":3}"#);
    }

    #[test]
    fn switch_matches_strictly_and_falls_through() {
        let code = r#"
            function kind(x) {
                switch (x) {
                    case 1:
                    case 2:
                        return "small";
                    case "1":
                        return "string";
                    default:
                        return "other";
                }
            }
            return [kind(1), kind(2), kind("1"), kind(9)].join(",");
        "#;
        assert_eq!(display(code), "small,small,string,other");

        let code = r#"
            let log = [];
            for (let i = 0; i < 4; i++) {
                switch (i % 3) {
                    default:
                        log.push("d");
                    case 0:
                        log.push("zero");
                        break;
                    case 1:
                        continue;
                }
                log.push(i);
            }
            return log.join(" ");
        "#;
        assert_eq!(display(code), "zero 0 d zero 2 zero 3");
        assert!(error("switch (1) { default: 1; default: 2; }").contains("default"));
    }

    #[test]
    fn locale_compare_sorts_case_insensitively() {
        let code = "['banana', 'Cherry', 'apple'].sort((a, b) => a.localeCompare(b))";
        assert_eq!(run(code).value, Some(json!(["apple", "banana", "Cherry"])));
        assert_eq!(display("'a'.localeCompare('b')"), "-1");
        assert_eq!(display("'b'.localeCompare('b')"), "0");
    }

    #[tokio::test]
    async fn isolated_evaluation_matches_inline() {
        let eval = evaluate_isolated("return 2+2".to_string(), Limits::default())
            .await
            .unwrap();
        assert_eq!(eval.display, "4");
    }
}
