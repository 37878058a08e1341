//! Static analysis of a cell's source (spec.md §4.1).
//!
//! Recovers the structural facts the dataflow graph needs — which names a
//! cell defines, which free names it references, its imports, whether it is
//! a coroutine, and any names it `del`eted — without evaluating anything.
//! This is deliberately an approximation of full Python scope resolution
//! (a general-purpose interpreter is explicitly out of scope): nested-scope
//! locals are tracked as one flat set rather than a proper closure chain, so
//! a name shadowed in one nested function is treated as locally bound
//! everywhere in the cell. Cells in practice don't rely on that distinction,
//! and getting it exactly right would mean writing a Python scope resolver.

pub mod imports;
pub mod lexer;
pub mod sql;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use lexer::{LogicalLine, TokKind, Token};

use self::imports::{ImportData, ImportOutcome};
use crate::error::AnalyzerError;
use crate::ids::{CellId, Name};

/// What kind of binding produced a module-scope name, for `VariableData::kind`
/// (spec.md §3). A name bound more than once in a cell keeps only its most
/// recent kind — callers needing full per-binding history should track it
/// themselves; the analyzer only needs "what is this name right now."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Variable,
    Function,
    Class,
    Import,
}

/// The result of statically analyzing one cell's source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    /// Names this cell binds at module scope (spec.md §3 `CellImpl.defs`).
    pub defs: BTreeSet<Name>,
    /// Free names this cell reads that it does not itself define.
    pub refs: BTreeSet<Name>,
    /// Names this cell `del`eted that were not rebound afterward.
    pub deleted_refs: BTreeSet<Name>,
    pub imports: Vec<ImportData>,
    /// `true` if the cell uses `await`/`async for`/`async with` at its own
    /// top level, meaning it must be run as a coroutine.
    pub is_coroutine: bool,
    /// String arguments of any `<expr>.sql(...)` calls found in the cell.
    pub sql_queries: Vec<String>,
    /// How each module-scope def was bound (variable/function/class/import).
    pub kind_of: BTreeMap<Name, VariableKind>,
}

impl Default for VariableKind {
    fn default() -> Self {
        VariableKind::Variable
    }
}

enum ScopeKind {
    Module,
    Function,
    Class,
}

struct Scope {
    kind: ScopeKind,
    header_indent: usize,
}

/// Analyze `source` for `cell_id`, which is only used to attribute errors.
pub fn analyze(cell_id: CellId, source: &str) -> Result<Analysis, AnalyzerError> {
    let lines = lexer::tokenize_lines(source);

    let mut module_defs: BTreeSet<Name> = BTreeSet::new();
    let mut nested_locals: HashSet<Name> = HashSet::new();
    let mut all_used: HashSet<Name> = HashSet::new();
    let mut deleted_refs: BTreeSet<Name> = BTreeSet::new();
    let mut import_data: Vec<ImportData> = Vec::new();
    let mut sql_queries: Vec<String> = Vec::new();
    let mut is_coroutine = false;
    let mut kind_of: BTreeMap<Name, VariableKind> = BTreeMap::new();

    let mut scopes = vec![Scope {
        kind: ScopeKind::Module,
        header_indent: 0,
    }];

    for line in &lines {
        while scopes.len() > 1 && scopes.last().unwrap().header_indent >= line.indent {
            scopes.pop();
        }
        let body = strip_trailing_newline(&line.tokens);
        if body.is_empty() {
            continue;
        }
        let in_module = matches!(scopes.last().unwrap().kind, ScopeKind::Module);

        if imports::is_import_line(line) {
            match imports::parse_import(line) {
                ImportOutcome::Star => return Err(AnalyzerError::ImportStar(cell_id)),
                ImportOutcome::Ok(found) => {
                    for imp in &found {
                        bind(in_module, &mut module_defs, &mut nested_locals, &imp.bound_name);
                        if in_module {
                            kind_of.insert(imp.bound_name.clone(), VariableKind::Import);
                        }
                    }
                    import_data.extend(found);
                }
            }
            continue;
        }

        sql_queries.extend(sql::extract_sql_calls(line));

        if in_module && has_await_marker(body) {
            is_coroutine = true;
        }

        dispatch_statement(
            body,
            line.indent,
            in_module,
            &mut scopes,
            &mut module_defs,
            &mut nested_locals,
            &mut all_used,
            &mut deleted_refs,
            &mut kind_of,
        );
    }

    let builtins_shadowed: HashSet<&'static str> = BUILTINS
        .iter()
        .filter(|b| module_defs.contains(**b) || nested_locals.contains(**b))
        .copied()
        .collect();

    let refs = all_used
        .into_iter()
        .filter(|n| is_ref(n, &module_defs, &nested_locals, &builtins_shadowed))
        .collect();

    Ok(Analysis {
        defs: module_defs,
        refs,
        deleted_refs,
        imports: import_data,
        is_coroutine,
        sql_queries,
        kind_of,
    })
}

fn is_ref(
    n: &str,
    module_defs: &BTreeSet<Name>,
    nested_locals: &HashSet<Name>,
    builtins_shadowed: &HashSet<&'static str>,
) -> bool {
    if module_defs.contains(n) {
        return false;
    }
    if nested_locals.contains(n) {
        return builtins_shadowed.contains(n);
    }
    if BUILTINS.contains(&n) && !builtins_shadowed.contains(n) {
        return false;
    }
    true
}

fn bind(in_module: bool, module_defs: &mut BTreeSet<Name>, nested_locals: &mut HashSet<Name>, name: &str) {
    if in_module {
        module_defs.insert(name.to_string());
    } else {
        nested_locals.insert(name.to_string());
    }
}

fn strip_trailing_newline(tokens: &[Token]) -> &[Token] {
    match tokens.last() {
        Some(t) if t.kind == TokKind::Newline => &tokens[..tokens.len() - 1],
        _ => tokens,
    }
}

fn has_await_marker(body: &[Token]) -> bool {
    if body
        .iter()
        .any(|t| matches!(&t.kind, TokKind::Keyword(k) if k == "await"))
    {
        return true;
    }
    matches!(&body.first().map(|t| &t.kind), Some(TokKind::Keyword(k)) if k == "async")
        && matches!(&body.get(1).map(|t| &t.kind), Some(TokKind::Keyword(k)) if k == "for" || k == "with")
}

fn dispatch_statement(
    body: &[Token],
    line_indent: usize,
    in_module: bool,
    scopes: &mut Vec<Scope>,
    module_defs: &mut BTreeSet<Name>,
    nested_locals: &mut HashSet<Name>,
    all_used: &mut HashSet<Name>,
    deleted_refs: &mut BTreeSet<Name>,
    kind_of: &mut BTreeMap<Name, VariableKind>,
) {
    let kw = |i: usize| body.get(i).map(|t| &t.kind);

    let (is_async, def_off) = if matches!(kw(0), Some(TokKind::Keyword(k)) if k == "async") {
        (true, 1)
    } else {
        (false, 0)
    };

    match kw(def_off) {
        Some(TokKind::Keyword(k)) if k == "def" => {
            handle_def(body, def_off, line_indent, in_module, scopes, module_defs, nested_locals, all_used, kind_of);
            return;
        }
        Some(TokKind::Keyword(k)) if k == "class" && !is_async => {
            handle_class(body, line_indent, in_module, scopes, module_defs, nested_locals, all_used, kind_of);
            return;
        }
        _ => {}
    }

    if is_async {
        match kw(1) {
            Some(TokKind::Keyword(k)) if k == "for" => {
                handle_for(&body[1..], in_module, module_defs, nested_locals, all_used);
                return;
            }
            Some(TokKind::Keyword(k)) if k == "with" => {
                handle_with(&body[1..], in_module, module_defs, nested_locals, all_used);
                return;
            }
            _ => {}
        }
    }

    match kw(0) {
        Some(TokKind::Keyword(k)) if k == "del" => {
            handle_del(&body[1..], in_module, module_defs, nested_locals, deleted_refs, kind_of);
            return;
        }
        Some(TokKind::Keyword(k)) if k == "global" || k == "nonlocal" => return,
        Some(TokKind::Keyword(k)) if k == "for" => {
            handle_for(body, in_module, module_defs, nested_locals, all_used);
            return;
        }
        Some(TokKind::Keyword(k)) if k == "with" => {
            handle_with(body, in_module, module_defs, nested_locals, all_used);
            return;
        }
        Some(TokKind::Keyword(k)) if k == "except" => {
            handle_except(&body[1..], in_module, module_defs, nested_locals, all_used);
            return;
        }
        Some(TokKind::Keyword(k)) if k == "case" => {
            handle_case(&body[1..], in_module, module_defs, nested_locals, all_used);
            return;
        }
        Some(TokKind::Keyword(k))
            if k == "return" || k == "yield" || k == "raise" || k == "assert" =>
        {
            scan_usage(&body[1..], all_used, |_| {});
            return;
        }
        Some(TokKind::Keyword(k)) if k == "pass" || k == "break" || k == "continue" => return,
        Some(TokKind::Keyword(k))
            if k == "if" || k == "elif" || k == "while" || k == "match" =>
        {
            scan_usage(&body[1..], all_used, |_| {});
            return;
        }
        Some(TokKind::Keyword(k)) if k == "else" || k == "try" || k == "finally" => return,
        _ => {}
    }

    if let Some(idx) = find_top_level_aug_assign(body) {
        let (left, right) = (&body[..idx], &body[idx + 1..]);
        if left.len() == 1 {
            if let TokKind::Name(n) = &left[0].kind {
                bind(in_module, module_defs, nested_locals, n);
                all_used.insert(n.clone());
            }
        } else {
            scan_usage(left, all_used, |_| {});
        }
        scan_usage(right, all_used, |_| {});
        return;
    }

    let eq_positions = find_top_level_assigns(body);
    if !eq_positions.is_empty() {
        let mut prev = 0;
        let mut target_ranges = Vec::new();
        for &p in &eq_positions {
            target_ranges.push(&body[prev..p]);
            prev = p + 1;
        }
        let rhs = &body[prev..];
        for targets in target_ranges {
            bind_target_list(targets, in_module, module_defs, nested_locals, all_used);
        }
        scan_usage(rhs, all_used, |n| {
            bind(in_module, module_defs, nested_locals, &n);
        });
        return;
    }

    // Plain expression statement (call, decorator, bare name, ...).
    scan_usage(body, all_used, |n| bind(in_module, module_defs, nested_locals, &n));
}

fn handle_def(
    body: &[Token],
    def_off: usize,
    line_indent: usize,
    in_module: bool,
    scopes: &mut Vec<Scope>,
    module_defs: &mut BTreeSet<Name>,
    nested_locals: &mut HashSet<Name>,
    all_used: &mut HashSet<Name>,
    kind_of: &mut BTreeMap<Name, VariableKind>,
) {
    let name = match body.get(def_off + 1).map(|t| &t.kind) {
        Some(TokKind::Name(n)) => n.clone(),
        _ => return,
    };
    bind(in_module, module_defs, nested_locals, &name);
    if in_module {
        kind_of.insert(name.clone(), VariableKind::Function);
    }

    if let Some(open) = find_matching_paren(body, def_off + 2) {
        let (open_idx, close_idx) = open;
        let params = &body[open_idx + 1..close_idx];
        for seg in split_top_level_commas(params) {
            bind_param(seg, in_module, module_defs, nested_locals, all_used);
        }
    }

    scopes.push(Scope {
        kind: ScopeKind::Function,
        header_indent: line_indent,
    });
}

fn handle_class(
    body: &[Token],
    line_indent: usize,
    in_module: bool,
    scopes: &mut Vec<Scope>,
    module_defs: &mut BTreeSet<Name>,
    nested_locals: &mut HashSet<Name>,
    all_used: &mut HashSet<Name>,
    kind_of: &mut BTreeMap<Name, VariableKind>,
) {
    let name = match body.get(1).map(|t| &t.kind) {
        Some(TokKind::Name(n)) => n.clone(),
        _ => return,
    };
    bind(in_module, module_defs, nested_locals, &name);
    if in_module {
        kind_of.insert(name.clone(), VariableKind::Class);
    }
    if let Some((open_idx, close_idx)) = find_matching_paren(body, 2) {
        scan_usage(&body[open_idx + 1..close_idx], all_used, |_| {});
    }
    scopes.push(Scope {
        kind: ScopeKind::Class,
        header_indent: line_indent,
    });
}

fn bind_param(
    seg: &[Token],
    in_module: bool,
    module_defs: &mut BTreeSet<Name>,
    nested_locals: &mut HashSet<Name>,
    all_used: &mut HashSet<Name>,
) {
    let mut i = 0;
    while i < seg.len() && matches!(&seg[i].kind, TokKind::Op(o) if o == "*" || o == "**") {
        i += 1;
    }
    let Some(Token { kind: TokKind::Name(n), .. }) = seg.get(i) else {
        return;
    };
    // function scope, not the enclosing scope: a def always introduces a
    // nested scope, so its own parameters are never module defs.
    let _ = in_module;
    nested_locals.insert(n.clone());
    // annotation/default-value expressions reference the *enclosing* scope.
    if i + 1 < seg.len() {
        scan_usage(&seg[i + 1..], all_used, |_| {});
    }
}

fn handle_del(
    rest: &[Token],
    in_module: bool,
    module_defs: &mut BTreeSet<Name>,
    nested_locals: &mut HashSet<Name>,
    deleted_refs: &mut BTreeSet<Name>,
    kind_of: &mut BTreeMap<Name, VariableKind>,
) {
    for seg in split_top_level_commas(rest) {
        if seg.len() == 1 {
            if let TokKind::Name(n) = &seg[0].kind {
                if in_module {
                    module_defs.remove(n);
                    kind_of.remove(n);
                    deleted_refs.insert(n.clone());
                } else {
                    nested_locals.remove(n);
                }
            }
        }
    }
}

fn handle_for(
    body: &[Token],
    in_module: bool,
    module_defs: &mut BTreeSet<Name>,
    nested_locals: &mut HashSet<Name>,
    all_used: &mut HashSet<Name>,
) {
    let Some(in_idx) = find_top_level_keyword(&body[1..], "in").map(|i| i + 1) else {
        return;
    };
    let targets = &body[1..in_idx];
    let colon = find_top_level_op(body, ":").unwrap_or(body.len());
    let iterable = &body[in_idx + 1..colon];
    bind_target_list(targets, in_module, module_defs, nested_locals, all_used);
    scan_usage(iterable, all_used, |_| {});
    if colon + 1 < body.len() {
        scan_usage(&body[colon + 1..], all_used, |n| bind(in_module, module_defs, nested_locals, &n));
    }
}

fn handle_with(
    body: &[Token],
    in_module: bool,
    module_defs: &mut BTreeSet<Name>,
    nested_locals: &mut HashSet<Name>,
    all_used: &mut HashSet<Name>,
) {
    let colon = find_top_level_op(body, ":").unwrap_or(body.len());
    let clauses = split_top_level_commas(&body[1..colon]);
    for clause in clauses {
        if let Some(as_idx) = find_top_level_keyword(clause, "as") {
            scan_usage(&clause[..as_idx], all_used, |_| {});
            bind_target_list(&clause[as_idx + 1..], in_module, module_defs, nested_locals, all_used);
        } else {
            scan_usage(clause, all_used, |_| {});
        }
    }
}

fn handle_except(
    rest: &[Token],
    in_module: bool,
    module_defs: &mut BTreeSet<Name>,
    nested_locals: &mut HashSet<Name>,
    all_used: &mut HashSet<Name>,
) {
    let colon = find_top_level_op(rest, ":").unwrap_or(rest.len());
    let clause = &rest[..colon];
    if let Some(as_idx) = find_top_level_keyword(clause, "as") {
        scan_usage(&clause[..as_idx], all_used, |_| {});
        bind_target_list(&clause[as_idx + 1..], in_module, module_defs, nested_locals, all_used);
    } else {
        scan_usage(clause, all_used, |_| {});
    }
}

fn handle_case(
    rest: &[Token],
    in_module: bool,
    module_defs: &mut BTreeSet<Name>,
    nested_locals: &mut HashSet<Name>,
    all_used: &mut HashSet<Name>,
) {
    let colon = find_top_level_op(rest, ":").unwrap_or(rest.len());
    let pattern = &rest[..colon];
    if let Some(as_idx) = find_top_level_keyword(pattern, "as") {
        scan_usage(&pattern[..as_idx], all_used, |_| {});
        bind_target_list(&pattern[as_idx + 1..], in_module, module_defs, nested_locals, all_used);
        return;
    }
    if pattern.len() == 1 {
        if let TokKind::Name(n) = &pattern[0].kind {
            bind(in_module, module_defs, nested_locals, n);
            return;
        }
    }
    scan_usage(pattern, all_used, |_| {});
}

/// Bind (or record the use of) each comma-separated item in a target list:
/// assignment LHS, `for` targets, `with ... as` targets. Bare names bind;
/// attribute/subscript targets and parenthesized sub-patterns recurse.
fn bind_target_list(
    tokens: &[Token],
    in_module: bool,
    module_defs: &mut BTreeSet<Name>,
    nested_locals: &mut HashSet<Name>,
    all_used: &mut HashSet<Name>,
) {
    for seg in split_top_level_commas(tokens) {
        let mut seg = seg;
        if let Some(first) = seg.first() {
            if matches!(&first.kind, TokKind::Op(o) if o == "*") {
                seg = &seg[1..];
            }
        }
        if seg.is_empty() {
            continue;
        }
        if is_bracket_wrapped(seg) {
            bind_target_list(&seg[1..seg.len() - 1], in_module, module_defs, nested_locals, all_used);
            continue;
        }
        if seg.len() == 1 {
            if let TokKind::Name(n) = &seg[0].kind {
                bind(in_module, module_defs, nested_locals, n);
                continue;
            }
        }
        // attribute/subscript target (`obj.attr`, `obj[i]`): the base is a use.
        scan_usage(seg, all_used, |_| {});
    }
}

fn is_bracket_wrapped(seg: &[Token]) -> bool {
    let Some(first) = seg.first() else { return false };
    let Some(last) = seg.last() else { return false };
    let opens = matches!(&first.kind, TokKind::Op(o) if o == "(" || o == "[");
    let closes = matches!(&last.kind, TokKind::Op(o) if o == ")" || o == "]");
    if !opens || !closes {
        return false;
    }
    let mut depth = 0i32;
    for (i, t) in seg.iter().enumerate() {
        if let TokKind::Op(o) = &t.kind {
            if o == "(" || o == "[" {
                depth += 1;
            } else if o == ")" || o == "]" {
                depth -= 1;
                if depth == 0 && i != seg.len() - 1 {
                    return false;
                }
            }
        }
    }
    true
}

/// Scan an expression token range for name usages, accounting for walrus
/// assignment and comprehension/lambda-local shadowing. `bind` is invoked
/// for each walrus target encountered (it does not count as a use).
fn scan_usage(tokens: &[Token], used: &mut HashSet<Name>, mut bind: impl FnMut(Name)) {
    let mut shadow: HashSet<Name> = HashSet::new();
    collect_comprehension_targets(tokens, &mut shadow);
    collect_lambda_params(tokens, &mut shadow);

    let mut i = 0;
    while i < tokens.len() {
        if let TokKind::Name(n) = &tokens[i].kind {
            let preceded_by_dot = i > 0 && matches!(&tokens[i - 1].kind, TokKind::Op(o) if o == ".");
            let followed_by_walrus = matches!(tokens.get(i + 1).map(|t| &t.kind), Some(TokKind::Op(o)) if o == ":=");
            if preceded_by_dot {
                i += 1;
                continue;
            }
            if followed_by_walrus {
                bind(n.clone());
                i += 2;
                continue;
            }
            if !shadow.contains(n) {
                used.insert(n.clone());
            }
        }
        i += 1;
    }
}

fn collect_comprehension_targets(tokens: &[Token], shadow: &mut HashSet<Name>) {
    let mut i = 0;
    while i < tokens.len() {
        if matches!(&tokens[i].kind, TokKind::Keyword(k) if k == "for") {
            if let Some(rel) = find_top_level_keyword(&tokens[i + 1..], "in") {
                for t in &tokens[i + 1..i + 1 + rel] {
                    if let TokKind::Name(n) = &t.kind {
                        shadow.insert(n.clone());
                    }
                }
            }
        }
        i += 1;
    }
}

fn collect_lambda_params(tokens: &[Token], shadow: &mut HashSet<Name>) {
    let mut i = 0;
    while i < tokens.len() {
        if matches!(&tokens[i].kind, TokKind::Keyword(k) if k == "lambda") {
            let mut j = i + 1;
            while j < tokens.len() && !matches!(&tokens[j].kind, TokKind::Op(o) if o == ":") {
                if let TokKind::Name(n) = &tokens[j].kind {
                    shadow.insert(n.clone());
                }
                j += 1;
            }
            i = j;
        }
        i += 1;
    }
}

fn find_matching_paren(tokens: &[Token], from: usize) -> Option<(usize, usize)> {
    let open_idx = (from..tokens.len())
        .find(|&i| matches!(&tokens[i].kind, TokKind::Op(o) if o == "("))?;
    let mut depth = 0i32;
    for i in open_idx..tokens.len() {
        if let TokKind::Op(o) = &tokens[i].kind {
            if o == "(" {
                depth += 1;
            } else if o == ")" {
                depth -= 1;
                if depth == 0 {
                    return Some((open_idx, i));
                }
            }
        }
    }
    None
}

fn split_top_level_commas(tokens: &[Token]) -> Vec<&[Token]> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        match &t.kind {
            TokKind::Op(o) if o == "(" || o == "[" || o == "{" => depth += 1,
            TokKind::Op(o) if o == ")" || o == "]" || o == "}" => depth -= 1,
            TokKind::Op(o) if o == "," && depth == 0 => {
                out.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start <= tokens.len() {
        out.push(&tokens[start..]);
    }
    out.into_iter().filter(|s| !s.is_empty()).collect()
}

fn find_top_level_op<'a>(tokens: &'a [Token], op: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate() {
        match &t.kind {
            TokKind::Op(o) if o == "(" || o == "[" || o == "{" => depth += 1,
            TokKind::Op(o) if o == ")" || o == "]" || o == "}" => depth -= 1,
            TokKind::Op(o) if depth == 0 && o == op => return Some(i),
            _ => {}
        }
    }
    None
}

fn find_top_level_keyword(tokens: &[Token], kw: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate() {
        match &t.kind {
            TokKind::Op(o) if o == "(" || o == "[" || o == "{" => depth += 1,
            TokKind::Op(o) if o == ")" || o == "]" || o == "}" => depth -= 1,
            TokKind::Keyword(k) if depth == 0 && k == kw => return Some(i),
            _ => {}
        }
    }
    None
}

/// Every top-level bare `=` (chained assignment targets), skipping any
/// inside a `lambda ... :` header where a default value's `=` would
/// otherwise be mistaken for an assignment separator.
fn find_top_level_assigns(tokens: &[Token]) -> Vec<usize> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_lambda_header = false;
    for (i, t) in tokens.iter().enumerate() {
        match &t.kind {
            TokKind::Keyword(k) if k == "lambda" => in_lambda_header = true,
            TokKind::Op(o) if o == "(" || o == "[" || o == "{" => depth += 1,
            TokKind::Op(o) if o == ")" || o == "]" || o == "}" => depth -= 1,
            TokKind::Op(o) if depth == 0 && o == ":" && in_lambda_header => {
                in_lambda_header = false;
            }
            TokKind::Op(o) if depth == 0 && o == "=" && !in_lambda_header => out.push(i),
            _ => {}
        }
    }
    out
}

const AUG_OPS: &[&str] = &[
    "+=", "-=", "*=", "/=", "//=", "%=", "**=", "&=", "|=", "^=", ">>=", "<<=", "@=",
];

fn find_top_level_aug_assign(tokens: &[Token]) -> Option<usize> {
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate() {
        match &t.kind {
            TokKind::Op(o) if o == "(" || o == "[" || o == "{" => depth += 1,
            TokKind::Op(o) if o == ")" || o == "]" || o == "}" => depth -= 1,
            TokKind::Op(o) if depth == 0 && AUG_OPS.contains(&o.as_str()) => return Some(i),
            _ => {}
        }
    }
    None
}

/// A conservative subset of Python builtins. Not exhaustive: an unrecognized
/// builtin is simply treated as a ref, which is always safe (it just means a
/// cell is scheduled to wait on a name nothing ever defines, which resolves
/// to a missing-ref diagnostic rather than a silent miscompile).
const BUILTINS: &[&str] = &[
    "abs", "aiter", "anext", "all", "any", "ascii", "bin", "bool", "bytearray", "bytes",
    "callable", "chr", "classmethod", "compile", "complex", "delattr", "dict", "dir", "divmod",
    "enumerate", "eval", "exec", "filter", "float", "format", "frozenset", "getattr", "globals",
    "hasattr", "hash", "help", "hex", "id", "input", "int", "isinstance", "issubclass", "iter",
    "len", "list", "locals", "map", "max", "memoryview", "min", "next", "object", "oct", "open",
    "ord", "pow", "print", "property", "range", "repr", "reversed", "round", "set", "setattr",
    "slice", "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
    "__import__", "Ellipsis", "NotImplemented", "Exception", "BaseException", "ValueError",
    "TypeError", "KeyError", "IndexError", "AttributeError", "StopIteration",
    "StopAsyncIteration", "RuntimeError", "NotImplementedError", "OSError", "IOError",
    "FileNotFoundError", "ZeroDivisionError", "ArithmeticError", "AssertionError",
    "ImportError", "ModuleNotFoundError", "NameError", "UnboundLocalError", "KeyboardInterrupt",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CellId;

    fn analyze_src(src: &str) -> Analysis {
        analyze(CellId::from_raw(0), src).unwrap()
    }

    #[test]
    fn simple_def_and_ref() {
        let a = analyze_src("x = 1\ny = x + 1\n");
        assert!(a.defs.contains("x"));
        assert!(a.defs.contains("y"));
        assert!(a.refs.is_empty());
    }

    #[test]
    fn unresolved_name_is_a_ref() {
        let a = analyze_src("y = x + 1\n");
        assert!(a.defs.contains("y"));
        assert!(a.refs.contains("x"));
    }

    #[test]
    fn function_locals_do_not_leak_as_defs() {
        let a = analyze_src("def f(a, b):\n    total = a + b\n    return total\n");
        assert!(a.defs.contains("f"));
        assert!(!a.defs.contains("total"));
        assert!(!a.defs.contains("a"));
        assert!(a.refs.is_empty());
    }

    #[test]
    fn builtins_are_not_refs_unless_shadowed() {
        let a = analyze_src("print(len([1, 2]))\n");
        assert!(a.refs.is_empty());
    }

    #[test]
    fn shadowed_builtin_becomes_a_ref_everywhere() {
        let a = analyze_src("def weird():\n    list = []\n    return list\n\nprint(list([1]))\n");
        assert!(a.refs.contains("list"));
    }

    #[test]
    fn augmented_assignment_reads_and_writes() {
        let a = analyze_src("count = 0\ncount += 1\n");
        assert!(a.defs.contains("count"));
        assert!(a.refs.is_empty());
    }

    #[test]
    fn del_produces_deleted_ref() {
        let a = analyze_src("x = 1\ndel x\n");
        assert!(!a.defs.contains("x"));
        assert!(a.deleted_refs.contains("x"));
    }

    #[test]
    fn import_binds_alias_and_records_module() {
        let a = analyze_src("import numpy as np\n");
        assert!(a.defs.contains("np"));
        assert_eq!(a.imports[0].module, "numpy");
    }

    #[test]
    fn import_star_is_rejected() {
        let err = analyze(CellId::from_raw(0), "from os import *\n").unwrap_err();
        assert!(matches!(err, AnalyzerError::ImportStar(_)));
    }

    #[test]
    fn for_target_binds_at_module_scope() {
        let a = analyze_src("total = 0\nfor i in range(10):\n    total += i\n");
        assert!(a.defs.contains("i"));
        assert!(a.defs.contains("total"));
    }

    #[test]
    fn walrus_binds_in_enclosing_scope() {
        let a = analyze_src("if (n := 10) > 5:\n    print(n)\n");
        assert!(a.defs.contains("n"));
    }

    #[test]
    fn comprehension_target_does_not_leak() {
        let a = analyze_src("squares = [x * x for x in range(5)]\n");
        assert!(a.defs.contains("squares"));
        assert!(!a.defs.contains("x"));
        assert!(a.refs.is_empty());
    }

    #[test]
    fn top_level_await_marks_coroutine() {
        let a = analyze_src("result = await fetch()\n");
        assert!(a.is_coroutine);
    }

    #[test]
    fn await_inside_nested_def_does_not_mark_coroutine() {
        let a = analyze_src("async def f():\n    return await fetch()\n");
        assert!(!a.is_coroutine);
    }

    #[test]
    fn except_as_binds_name() {
        let a = analyze_src("try:\n    pass\nexcept ValueError as e:\n    print(e)\n");
        assert!(a.defs.contains("e"));
    }

    #[test]
    fn attribute_assignment_references_base_object() {
        let a = analyze_src("obj.value = 1\n");
        assert!(a.refs.contains("obj"));
        assert!(!a.defs.contains("value"));
    }
}
