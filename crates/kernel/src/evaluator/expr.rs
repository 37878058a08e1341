//! [`ExprEvaluator`]: the small reference [`super::CellEvaluator`] shipped
//! with this crate.
//!
//! Deliberately not a Python interpreter (spec.md §1 non-goal). It covers
//! exactly what the end-to-end scenarios in spec.md §8 exercise: literal
//! binding, arithmetic, `raise`, `del`, `import`, opaque `def`/`class`
//! binding, and the cooperative primitives `print`, `mo.stop`, and
//! `state()`. Function and class *bodies* are never executed — only their
//! names are bound — matching SPEC_FULL.md §3's embedded-language
//! boundary; so are `if`/`for`/`while` bodies, which this evaluator skips
//! rather than interprets. A production embedder replaces this whole
//! module with a real interpreter behind the same [`super::CellEvaluator`]
//! trait.

use crate::analyzer::lexer::{LogicalLine, TokKind, Token, tokenize_lines};
use crate::error::AnalyzerError;
use crate::ids::CellId;

use super::value::Value;
use super::{CellEvaluator, CompiledCell, ExecCtx, Globals, RunException, RunResult};
use crate::session::Channel;

#[derive(Debug, Default, Clone, Copy)]
pub struct ExprEvaluator;

impl CellEvaluator for ExprEvaluator {
    fn compile(&self, cell_id: CellId, source: &str) -> Result<CompiledCell, AnalyzerError> {
        Ok(CompiledCell {
            cell_id,
            source: source.to_string(),
        })
    }

    fn execute(&self, compiled: &CompiledCell, globals: &mut Globals, ctx: &mut ExecCtx<'_>) -> RunResult {
        run(compiled, globals, ctx)
    }
}

fn run(compiled: &CompiledCell, globals: &mut Globals, ctx: &mut ExecCtx<'_>) -> RunResult {
    let lines = tokenize_lines(&compiled.source);
    let mut last_value: Option<Value> = None;
    let mut i = 0;
    while i < lines.len() {
        if ctx.abort.is_aborted() {
            return RunResult::failed(RunException::Interrupt);
        }
        let line = &lines[i];
        if line.indent > 0 {
            // Bodies of def/class/if/for/while are skipped wholesale; see
            // module doc comment.
            i += 1;
            continue;
        }
        let body = strip_newline(&line.tokens);
        if body.is_empty() {
            i += 1;
            continue;
        }
        match statement(body, &lines, &mut i, globals, ctx) {
            Ok(value) => last_value = value,
            Err(exc) => return RunResult::failed(exc),
        }
        i += 1;
    }
    RunResult::ok(last_value)
}

fn strip_newline(tokens: &[Token]) -> &[Token] {
    match tokens.last() {
        Some(t) if t.kind == TokKind::Newline => &tokens[..tokens.len() - 1],
        _ => tokens,
    }
}

/// Execute one top-level statement. `i` may be advanced past a def/class's
/// body (the statement's own index is still incremented by the caller
/// afterwards). Returns the statement's value if it's an expression
/// statement (candidate for the cell's final output), `None` otherwise.
fn statement(
    body: &[Token],
    lines: &[LogicalLine],
    i: &mut usize,
    globals: &mut Globals,
    ctx: &mut ExecCtx<'_>,
) -> Result<Option<Value>, RunException> {
    let kw = |idx: usize| body.get(idx).map(|t| &t.kind);

    match kw(0) {
        Some(TokKind::Keyword(k)) if k == "import" || k == "from" => {
            bind_import(body, globals);
            return Ok(None);
        }
        Some(TokKind::Keyword(k)) if k == "def" || k == "class" => {
            if let Some(TokKind::Name(name)) = kw(1) {
                globals.set(name.clone(), Value::Opaque(name.clone()));
            }
            skip_indented_body(lines, i);
            return Ok(None);
        }
        Some(TokKind::Keyword(k)) if k == "del" => {
            for t in &body[1..] {
                if let TokKind::Name(n) = &t.kind {
                    globals.remove(n);
                }
            }
            return Ok(None);
        }
        Some(TokKind::Keyword(k)) if k == "raise" => {
            return Err(eval_raise(&body[1..], globals, ctx));
        }
        Some(TokKind::Keyword(k)) if k == "pass" => return Ok(None),
        _ => {}
    }

    if let Some(eq) = find_top_level_assign(body) {
        let rhs = eval(&body[eq + 1..], globals, ctx)?;
        assign_targets(&body[..eq], rhs, globals);
        return Ok(None);
    }

    if let Some((op, eq)) = find_aug_assign(body) {
        let Some(TokKind::Name(name)) = body.first().map(|t| &t.kind) else {
            return Ok(None);
        };
        let current = globals.get(name).cloned().unwrap_or(Value::Int(0));
        let rhs = eval(&body[eq + 1..], globals, ctx)?;
        let combined = binary_op(op, current, rhs)?;
        globals.set(name.clone(), combined);
        return Ok(None);
    }

    // Bare expression statement: its value is a candidate for the cell's
    // output (spec.md §4.1 "optional compiled last-expression").
    Ok(Some(eval(body, globals, ctx)?))
}

fn skip_indented_body(lines: &[LogicalLine], i: &mut usize) {
    let header_indent = lines[*i].indent;
    while *i + 1 < lines.len() && lines[*i + 1].indent > header_indent {
        *i += 1;
    }
}

fn bind_import(body: &[Token], globals: &mut Globals) {
    // Reuses the analyzer's own import parsing so bound names agree with
    // `defs` exactly.
    let line = LogicalLine {
        indent: 0,
        tokens: body.to_vec(),
        line: 0,
    };
    if let crate::analyzer::imports::ImportOutcome::Ok(imports) = crate::analyzer::imports::parse_import(&line) {
        for imp in imports {
            globals.set(imp.bound_name.clone(), Value::Opaque(imp.module.clone()));
        }
    }
}

fn eval_raise(args: &[Token], globals: &mut Globals, ctx: &mut ExecCtx<'_>) -> RunException {
    // `raise ExceptionType("message")` / `raise ExceptionType()` / bare `raise Name`.
    let Some(TokKind::Name(exception_type)) = args.first().map(|t| &t.kind) else {
        return RunException::Raised {
            exception_type: "Exception".into(),
            message: String::new(),
        };
    };
    let message = if args.get(1).map(|t| &t.kind) == Some(&TokKind::Op("(".into())) {
        if let Some((open, close)) = find_matching_paren(args, 1) {
            match eval(&args[open + 1..close], globals, ctx) {
                Ok(v) => v.to_string(),
                Err(_) => String::new(),
            }
        } else {
            String::new()
        }
    } else {
        String::new()
    };
    RunException::Raised {
        exception_type: exception_type.clone(),
        message,
    }
}

fn find_top_level_assign(body: &[Token]) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, t) in body.iter().enumerate() {
        match &t.kind {
            TokKind::Op(o) if o == "(" || o == "[" || o == "{" => depth += 1,
            TokKind::Op(o) if o == ")" || o == "]" || o == "}" => depth -= 1,
            TokKind::Op(o) if o == "=" && depth == 0 => return Some(idx),
            TokKind::Op(o) if depth == 0 && matches!(o.as_str(), "==" | "!=" | "<=" | ">=" | ":=") => {
                // Not a plain assignment; stop scanning this line for `=`.
                return None;
            }
            _ => {}
        }
    }
    None
}

const AUG_OPS: &[&str] = &["+=", "-=", "*=", "/="];

fn find_aug_assign(body: &[Token]) -> Option<(&'static str, usize)> {
    for (idx, t) in body.iter().enumerate() {
        if let TokKind::Op(o) = &t.kind {
            if let Some(op) = AUG_OPS.iter().find(|a| *a == o) {
                return Some((op, idx));
            }
        }
    }
    None
}

fn assign_targets(targets: &[Token], value: Value, globals: &mut Globals) {
    let names: Vec<String> = targets
        .split(|t| matches!(&t.kind, TokKind::Op(o) if o == ","))
        .filter(|seg| !seg.is_empty())
        .filter_map(|seg| match &seg[0].kind {
            TokKind::Name(n) => Some(n.clone()),
            _ => None,
        })
        .collect();

    if names.len() <= 1 {
        if let Some(name) = names.into_iter().next() {
            globals.set(name, value);
        }
        return;
    }

    // Tuple unpack, e.g. `s, set_s = state(0)`.
    match value {
        Value::Tuple(items) => {
            for (name, v) in names.into_iter().zip(items) {
                globals.set(name, v);
            }
        }
        other => {
            if let Some(first) = names.into_iter().next() {
                globals.set(first, other);
            }
        }
    }
}

fn find_matching_paren(toks: &[Token], open_idx: usize) -> Option<(usize, usize)> {
    let mut depth = 0i32;
    for (idx, t) in toks.iter().enumerate().skip(open_idx) {
        match &t.kind {
            TokKind::Op(o) if o == "(" => depth += 1,
            TokKind::Op(o) if o == ")" => {
                depth -= 1;
                if depth == 0 {
                    return Some((open_idx, idx));
                }
            }
            _ => {}
        }
    }
    None
}

// ---- expression evaluation -------------------------------------------------

fn eval(toks: &[Token], globals: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
    let mut parser = ExprParser { toks, pos: 0 };
    parser.parse_or(globals, ctx)
}

struct ExprParser<'t> {
    toks: &'t [Token],
    pos: usize,
}

impl<'t> ExprParser<'t> {
    fn peek(&self) -> Option<&'t TokKind> {
        self.toks.get(self.pos).map(|t| &t.kind)
    }

    fn bump(&mut self) -> Option<&'t TokKind> {
        let t = self.toks.get(self.pos).map(|t| &t.kind);
        self.pos += 1;
        t
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(TokKind::Keyword(k)) if k == kw)
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(TokKind::Op(o)) if o == op)
    }

    fn parse_or(&mut self, g: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        let mut left = self.parse_and(g, ctx)?;
        while self.is_kw("or") {
            self.bump();
            let right = self.parse_and(g, ctx)?;
            left = if left.is_truthy() { left } else { right };
        }
        Ok(left)
    }

    fn parse_and(&mut self, g: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        let mut left = self.parse_not(g, ctx)?;
        while self.is_kw("and") {
            self.bump();
            let right = self.parse_not(g, ctx)?;
            left = if left.is_truthy() { right } else { left };
        }
        Ok(left)
    }

    fn parse_not(&mut self, g: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        if self.is_kw("not") {
            self.bump();
            let v = self.parse_not(g, ctx)?;
            return Ok(Value::Bool(!v.is_truthy()));
        }
        self.parse_comparison(g, ctx)
    }

    fn parse_comparison(&mut self, g: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        let mut left = self.parse_additive(g, ctx)?;
        loop {
            let op = match self.peek() {
                Some(TokKind::Op(o)) if matches!(o.as_str(), "==" | "!=" | "<" | ">" | "<=" | ">=") => o.clone(),
                _ => break,
            };
            self.bump();
            let right = self.parse_additive(g, ctx)?;
            left = compare(&op, &left, &right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self, g: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        let mut left = self.parse_multiplicative(g, ctx)?;
        loop {
            let op = match self.peek() {
                Some(TokKind::Op(o)) if o == "+" || o == "-" => o.clone(),
                _ => break,
            };
            self.bump();
            let right = self.parse_multiplicative(g, ctx)?;
            left = binary_op(&op, left, right)?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self, g: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        let mut left = self.parse_unary(g, ctx)?;
        loop {
            let op = match self.peek() {
                Some(TokKind::Op(o)) if o == "*" || o == "/" => o.clone(),
                _ => break,
            };
            self.bump();
            let right = self.parse_unary(g, ctx)?;
            left = binary_op(&op, left, right)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self, g: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        if self.is_op("-") {
            self.bump();
            let v = self.parse_unary(g, ctx)?;
            return Ok(match v {
                Value::Int(i) => Value::Int(-i),
                Value::Float(f) => Value::Float(-f),
                other => other,
            });
        }
        self.parse_postfix(g, ctx)
    }

    fn parse_postfix(&mut self, g: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        let mut value = self.parse_primary(g, ctx)?;
        // Only a single `.attr` / `(args)` chain is resolved; deeper
        // chains fall back to an opaque placeholder (see module doc).
        loop {
            if self.is_op(".") {
                self.bump();
                let Some(TokKind::Name(attr)) = self.bump() else {
                    break;
                };
                let attr = attr.clone();
                if self.is_op("(") {
                    let args = self.parse_call_args(g, ctx)?;
                    value = self.call_method(&value, &attr, args, ctx)?;
                } else {
                    value = Value::Opaque(format!("{value}.{attr}"));
                }
            } else if self.is_op("(") {
                let args = self.parse_call_args(g, ctx)?;
                value = self.call_function(&value, args, ctx)?;
            } else {
                break;
            }
        }
        Ok(value)
    }

    fn parse_call_args(&mut self, g: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Vec<Value>, RunException> {
        self.bump(); // consume "("
        let mut args = Vec::new();
        if self.is_op(")") {
            self.bump();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or(g, ctx)?);
            if self.is_op(",") {
                self.bump();
                continue;
            }
            break;
        }
        if self.is_op(")") {
            self.bump();
        }
        Ok(args)
    }

    fn call_function(&mut self, callee: &Value, args: Vec<Value>, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        match callee {
            Value::Opaque(name) if name == "print" => {
                let text: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                ctx.write_console(Channel::Stdout, format!("{}\n", text.join(" ")));
                Ok(Value::None)
            }
            Value::Opaque(name) if name == "state" => {
                let initial = args.into_iter().next().unwrap_or(Value::None);
                let id = ctx.states.create(initial, false);
                Ok(Value::Tuple(vec![Value::State(id), Value::Setter(id)]))
            }
            Value::Setter(id) => {
                let new_value = args.into_iter().next().unwrap_or(Value::None);
                ctx.states.set(*id, new_value, ctx.cell_id);
                Ok(Value::None)
            }
            _ => Ok(Value::None),
        }
    }

    fn call_method(&mut self, base: &Value, attr: &str, args: Vec<Value>, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        match (base, attr) {
            (Value::Opaque(module), "stop") if module == "marimo" || module == "mo" => {
                let cond = args.first().cloned().unwrap_or(Value::Bool(false));
                let value = args.get(1).cloned().unwrap_or(Value::None);
                if cond.is_truthy() {
                    Err(RunException::MarimoStop(value))
                } else {
                    Ok(Value::None)
                }
            }
            (Value::Opaque(module), "sql") if module == "marimo" || module == "mo" => Ok(Value::None),
            _ => Ok(Value::None),
        }
    }

    fn parse_primary(&mut self, g: &Globals, ctx: &mut ExecCtx<'_>) -> Result<Value, RunException> {
        match self.bump() {
            Some(TokKind::Number(text)) => Ok(parse_number(text)),
            Some(TokKind::Str(s)) => Ok(Value::Str(s.clone())),
            Some(TokKind::Keyword(k)) if k == "None" => Ok(Value::None),
            Some(TokKind::Keyword(k)) if k == "True" => Ok(Value::Bool(true)),
            Some(TokKind::Keyword(k)) if k == "False" => Ok(Value::Bool(false)),
            Some(TokKind::Name(n)) => {
                let name = n.clone();
                match g.get(&name) {
                    Some(Value::State(id)) => Ok(ctx.states.get(*id)),
                    Some(v) => Ok(v.clone()),
                    None if is_known_builtin(&name) => Ok(Value::Opaque(name)),
                    None => Ok(Value::None),
                }
            }
            Some(TokKind::Op(o)) if o == "(" => {
                let mut items = Vec::new();
                if !self.is_op(")") {
                    loop {
                        items.push(self.parse_or(g, ctx)?);
                        if self.is_op(",") {
                            self.bump();
                            continue;
                        }
                        break;
                    }
                }
                if self.is_op(")") {
                    self.bump();
                }
                Ok(if items.len() == 1 { items.into_iter().next().unwrap() } else { Value::Tuple(items) })
            }
            _ => Ok(Value::None),
        }
    }
}

fn is_known_builtin(name: &str) -> bool {
    matches!(name, "print" | "state")
}

fn parse_number(text: &str) -> Value {
    if text.contains('.') {
        text.parse::<f64>().map(Value::Float).unwrap_or(Value::None)
    } else {
        text.parse::<i64>().map(Value::Int).unwrap_or(Value::None)
    }
}

fn binary_op(op: &str, left: Value, right: Value) -> Result<Value, RunException> {
    use Value::*;
    Ok(match (op, left, right) {
        ("+", Int(a), Int(b)) => Int(a + b),
        ("+", Float(a), Float(b)) => Float(a + b),
        ("+", Int(a), Float(b)) | ("+", Float(b), Int(a)) => Float(a as f64 + b),
        ("+", Str(a), Str(b)) => Str(a + &b),
        ("-", Int(a), Int(b)) => Int(a - b),
        ("-", Float(a), Float(b)) => Float(a - b),
        ("*", Int(a), Int(b)) => Int(a * b),
        ("*", Float(a), Float(b)) => Float(a * b),
        ("/", Int(a), Int(b)) if b != 0 => Float(a as f64 / b as f64),
        ("/", Float(a), Float(b)) => Float(a / b),
        (_, a, b) => {
            // Unsupported combination for this minimal evaluator; fall
            // back to the right operand rather than fail the whole cell.
            let _ = a;
            b
        }
    })
}

fn compare(op: &str, left: &Value, right: &Value) -> Value {
    use Value::*;
    let ordering = match (left, right) {
        (Int(a), Int(b)) => a.partial_cmp(b),
        (Float(a), Float(b)) => a.partial_cmp(b),
        (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
        (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
        (Str(a), Str(b)) => a.partial_cmp(b),
        _ => None,
    };
    let result = match op {
        "==" => left == right,
        "!=" => left != right,
        "<" => ordering == Some(std::cmp::Ordering::Less),
        ">" => ordering == Some(std::cmp::Ordering::Greater),
        "<=" => matches!(ordering, Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
        ">=" => matches!(ordering, Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)),
        _ => false,
    };
    Value::Bool(result)
}
