//! Best-effort extraction of embedded SQL from a cell (spec.md §4.1's
//! "SQL extraction" edge case): calls shaped like `name.sql("...")` or
//! `mo.sql(f"""...""")` have their string argument pulled out verbatim so a
//! host can show it separately (e.g. for a connections/datasets panel)
//! without re-tokenizing the cell.

use super::lexer::{LogicalLine, TokKind};

/// Scan a logical line for `<expr>.sql(<string>)` call shapes and return
/// each string argument found.
pub fn extract_sql_calls(line: &LogicalLine) -> Vec<String> {
    let mut out = Vec::new();
    let toks = &line.tokens;
    for i in 0..toks.len() {
        let is_dot_sql = matches!(&toks[i].kind, TokKind::Op(o) if o == ".")
            && matches!(toks.get(i + 1).map(|t| &t.kind), Some(TokKind::Name(n)) if n == "sql")
            && matches!(toks.get(i + 2).map(|t| &t.kind), Some(TokKind::Op(o)) if o == "(");
        if is_dot_sql {
            if let Some(TokKind::Str(s)) = toks.get(i + 3).map(|t| &t.kind) {
                out.push(s.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::lexer::tokenize_lines;

    #[test]
    fn finds_sql_call_argument() {
        let lines = tokenize_lines("df = mo.sql(\"select * from t\")\n");
        let found = extract_sql_calls(&lines[0]);
        assert_eq!(found, vec!["select * from t".to_string()]);
    }

    #[test]
    fn ignores_unrelated_calls() {
        let lines = tokenize_lines("df = pd.read_csv(\"x.csv\")\n");
        assert!(extract_sql_calls(&lines[0]).is_empty());
    }
}
