//! A lightweight tokenizer for the notebook's (Python-flavored) source
//! language.
//!
//! This is deliberately not a full parser: spec.md's non-goals exclude
//! "a general-purpose interpreter," and the analyzer only needs enough
//! structure to recover statement boundaries, indentation, assignment
//! targets, and name usages — not to evaluate expressions. Strings and
//! numbers are tokenized opaquely; only enough of their shape is kept to
//! skip over them correctly (quote style, triple-quote) and, for strings,
//! to recover their literal text for SQL-call extraction (§4.1).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokKind {
    Name(String),
    /// A reserved word that changes statement classification.
    Keyword(String),
    /// Operator or punctuation, kept as its literal text (`"+="`, `":="`, `"."`, ...).
    Op(String),
    Str(String),
    Number(String),
    Newline,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokKind,
    pub line: usize,
}

/// One logical (continuation-joined) line of source.
#[derive(Debug, Clone)]
pub struct LogicalLine {
    pub indent: usize,
    pub tokens: Vec<Token>,
    pub line: usize,
}

const KEYWORDS: &[&str] = &[
    "def", "class", "import", "from", "as", "del", "global", "nonlocal", "lambda", "for", "while",
    "if", "elif", "else", "try", "except", "finally", "with", "return", "yield", "await", "async",
    "match", "case", "pass", "break", "continue", "raise", "not", "and", "or", "in", "is", "None",
    "True", "False", "assert",
];

/// Split `source` into logical lines, merging bracket/backslash continuations
/// and tokenizing each line's content.
pub fn tokenize_lines(source: &str) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut chars: Vec<char> = Vec::new();
    let mut depth: i32 = 0;
    let mut start_line = 1;
    let mut cur_line = 1;
    let mut first_physical = true;
    let mut indent_of_logical = 0usize;

    for raw_line in source.split('\n') {
        if first_physical {
            indent_of_logical = leading_indent(raw_line);
        }
        let continues_backslash = raw_line.trim_end().ends_with('\\') && !in_string_tail(raw_line);
        let content = if continues_backslash {
            &raw_line[..raw_line.trim_end().len() - 1]
        } else {
            raw_line
        };
        if chars.is_empty() && first_physical {
            start_line = cur_line;
        }
        chars.extend(content.chars());
        chars.push('\n');
        depth += bracket_delta(content);

        if depth <= 0 && !continues_backslash {
            let text: String = chars.iter().collect();
            let trimmed = text.trim();
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                let tokens = tokenize_line(&text, start_line);
                if !tokens.is_empty() {
                    lines.push(LogicalLine {
                        indent: indent_of_logical,
                        tokens,
                        line: start_line,
                    });
                }
            }
            chars.clear();
            depth = 0;
            first_physical = true;
        } else {
            first_physical = false;
        }
        cur_line += 1;
    }
    lines
}

fn leading_indent(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

/// Best-effort: a trailing backslash that is actually inside a string literal
/// should not be treated as a continuation marker. Good enough for cell
/// source, which rarely ends a line mid-string with a literal backslash.
fn in_string_tail(_line: &str) -> bool {
    false
}

fn bracket_delta(s: &str) -> i32 {
    let mut depth = 0i32;
    let mut chars = s.chars().peekable();
    let mut in_str: Option<(char, bool)> = None; // (quote, triple)
    while let Some(c) = chars.next() {
        if let Some((q, triple)) = in_str {
            if c == '\\' {
                chars.next();
                continue;
            }
            if c == q {
                if triple {
                    if chars.peek() == Some(&q) {
                        chars.next();
                        if chars.peek() == Some(&q) {
                            chars.next();
                            in_str = None;
                        }
                    }
                } else {
                    in_str = None;
                }
            }
            continue;
        }
        match c {
            '#' => break,
            '\'' | '"' => {
                let mut triple = false;
                let rest: String = chars.clone().take(2).collect();
                if rest.chars().all(|rc| rc == c) && rest.chars().count() == 2 {
                    triple = true;
                    chars.next();
                    chars.next();
                }
                in_str = Some((c, triple));
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

fn tokenize_line(text: &str, line: usize) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut out = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            break;
        }
        if c == '\'' || c == '"' {
            let (s, next) = scan_string(&chars, i);
            out.push(Token {
                kind: TokKind::Str(s),
                line,
            });
            i = next;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()))
        {
            let mut j = i;
            while j < chars.len()
                && (chars[j].is_ascii_alphanumeric() || chars[j] == '.' || chars[j] == '_')
            {
                j += 1;
            }
            let text: String = chars[i..j].iter().collect();
            out.push(Token {
                kind: TokKind::Number(text),
                line,
            });
            i = j;
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let mut j = i;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let word: String = chars[i..j].iter().collect();
            // string prefixes: f"...", r"...", b"...", rb"...", f'''...'''
            if j < chars.len()
                && (chars[j] == '\'' || chars[j] == '"')
                && word.len() <= 2
                && word.chars().all(|c| "fFrRbBuU".contains(c))
            {
                let (s, next) = scan_string(&chars, j);
                out.push(Token {
                    kind: TokKind::Str(s),
                    line,
                });
                i = next;
                continue;
            }
            if KEYWORDS.contains(&word.as_str()) {
                out.push(Token {
                    kind: TokKind::Keyword(word),
                    line,
                });
            } else {
                out.push(Token {
                    kind: TokKind::Name(word),
                    line,
                });
            }
            i = j;
            continue;
        }
        // operators / punctuation, longest-match first
        let three: String = chars[i..(i + 3).min(chars.len())].iter().collect();
        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        if three == "**=" || three == "//=" || three == ">>=" || three == "<<=" || three == "..." {
            out.push(Token {
                kind: TokKind::Op(three),
                line,
            });
            i += 3;
            continue;
        }
        const TWO_OPS: &[&str] = &[
            "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", ":=", "==", "!=", "<=", ">=",
            "->", "**", "//", "<<", ">>",
        ];
        if TWO_OPS.contains(&two.as_str()) {
            out.push(Token {
                kind: TokKind::Op(two),
                line,
            });
            i += 2;
            continue;
        }
        out.push(Token {
            kind: TokKind::Op(c.to_string()),
            line,
        });
        i += 1;
    }
    out.push(Token {
        kind: TokKind::Newline,
        line,
    });
    out
}

/// Scan a string literal starting at `start` (the opening quote), returning
/// its inner text (unescaped minimally) and the index just past the closing
/// quote.
fn scan_string(chars: &[char], start: usize) -> (String, usize) {
    let q = chars[start];
    let triple = chars.get(start + 1) == Some(&q) && chars.get(start + 2) == Some(&q);
    let content_start = if triple { start + 3 } else { start + 1 };
    let mut i = content_start;
    let mut out = String::new();
    loop {
        if i >= chars.len() {
            return (out, i);
        }
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            out.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if triple {
            if c == q && chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q) {
                return (out, i + 3);
            }
        } else if c == q {
            return (out, i + 1);
        }
        out.push(c);
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &LogicalLine) -> Vec<String> {
        line.tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokKind::Name(n) | TokKind::Keyword(n) | TokKind::Op(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn simple_assignment() {
        let lines = tokenize_lines("x = 1\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(words(&lines[0]), vec!["x", "="]);
    }

    #[test]
    fn bracket_continuation_merges_lines() {
        let lines = tokenize_lines("x = [\n    1,\n    2,\n]\n");
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn indentation_is_tracked() {
        let lines = tokenize_lines("def f():\n    return 1\n");
        assert_eq!(lines[0].indent, 0);
        assert_eq!(lines[1].indent, 4);
    }

    #[test]
    fn triple_quoted_string_spans_are_opaque() {
        let lines = tokenize_lines("q = \"\"\"select * from t\"\"\"\n");
        assert_eq!(lines.len(), 1);
        let has_str = lines[0]
            .tokens
            .iter()
            .any(|t| matches!(&t.kind, TokKind::Str(s) if s.contains("select")));
        assert!(has_str);
    }

    #[test]
    fn comment_only_lines_are_dropped() {
        let lines = tokenize_lines("# just a comment\nx = 1\n");
        assert_eq!(lines.len(), 1);
    }
}
