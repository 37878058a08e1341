//! Parses `import` / `from ... import ...` statements into [`ImportData`]
//! and the set of local names they bind.

use super::lexer::{LogicalLine, TokKind};
use crate::ids::Name;

/// One imported symbol, grounded on spec.md §3's `ImportData` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportData {
    /// The dotted module path (`"pandas.io.formats"`).
    pub module: String,
    /// The name this import binds locally (the `as` alias, or the module's
    /// own top-level component for a plain `import a.b.c`).
    pub bound_name: Name,
    /// The specific symbol imported from `module`, for `from x import y`
    /// (`None` for a plain `import x` / `import x as y`).
    pub imported_symbol: Option<String>,
}

pub enum ImportOutcome {
    Ok(Vec<ImportData>),
    /// `from x import *` — a hard error (spec.md §4.1).
    Star,
}

/// `true` if `line` opens with `import` or `from`.
pub fn is_import_line(line: &LogicalLine) -> bool {
    matches!(
        line.tokens.first().map(|t| &t.kind),
        Some(TokKind::Keyword(k)) if k == "import" || k == "from"
    )
}

pub fn parse_import(line: &LogicalLine) -> ImportOutcome {
    let names: Vec<String> = line
        .tokens
        .iter()
        .filter_map(|t| match &t.kind {
            TokKind::Name(n) => Some(n.clone()),
            TokKind::Keyword(k) => Some(k.clone()),
            TokKind::Op(o) => Some(o.clone()),
            _ => None,
        })
        .collect();

    if names.first().map(String::as_str) == Some("from") {
        parse_from_import(&names)
    } else {
        parse_plain_import(&names)
    }
}

/// `import a.b.c`, `import a.b.c as z`, `import a, b as c`
fn parse_plain_import(names: &[String]) -> ImportOutcome {
    let mut out = Vec::new();
    // Skip leading "import"; split clauses on top-level commas.
    for clause in names[1..].split(|n| n == ",") {
        if clause.is_empty() {
            continue;
        }
        if let Some(as_pos) = clause.iter().position(|n| n == "as") {
            let module = clause[..as_pos].join("");
            let alias = clause[as_pos + 1..].join("");
            out.push(ImportData {
                module,
                bound_name: alias,
                imported_symbol: None,
            });
        } else {
            let module = clause.join("");
            // `import a.b.c` binds the top-level name `a`.
            let bound = clause.first().cloned().unwrap_or_default();
            out.push(ImportData {
                module,
                bound_name: bound,
                imported_symbol: None,
            });
        }
    }
    ImportOutcome::Ok(out)
}

/// `from a.b import c, d as e`, `from a import *`
fn parse_from_import(names: &[String]) -> ImportOutcome {
    let import_pos = match names.iter().position(|n| n == "import") {
        Some(p) => p,
        None => return ImportOutcome::Ok(Vec::new()),
    };
    let module = names[1..import_pos].join("");
    let rest = &names[import_pos + 1..];
    if rest.iter().any(|n| n == "*") {
        return ImportOutcome::Star;
    }
    let mut out = Vec::new();
    for clause in rest.split(|n| n == ",") {
        let clause: Vec<&String> = clause.iter().filter(|n| *n != "(" && *n != ")").collect();
        if clause.is_empty() {
            continue;
        }
        if let Some(as_pos) = clause.iter().position(|n| *n == "as") {
            let symbol = clause[..as_pos]
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join("");
            let alias = clause[as_pos + 1..]
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join("");
            out.push(ImportData {
                module: module.clone(),
                bound_name: alias,
                imported_symbol: Some(symbol),
            });
        } else {
            let symbol = clause
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join("");
            out.push(ImportData {
                module: module.clone(),
                bound_name: symbol.clone(),
                imported_symbol: Some(symbol),
            });
        }
    }
    ImportOutcome::Ok(out)
}
