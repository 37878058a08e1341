//! Runtime values produced by the embedded expression evaluator.
//!
//! The kernel's non-goals explicitly exclude "a general-purpose
//! interpreter" (spec.md §1); this is the deliberately small value
//! universe the shipped [`super::ExprEvaluator`] operates over — enough to
//! drive the end-to-end scenarios in spec.md §8 (arithmetic, name binding,
//! cooperative `mo.stop`/`state()` primitives) without pretending to be a
//! real Python runtime. A host embedding a real interpreter swaps in its
//! own [`super::CellEvaluator`] and never touches this type.

use std::fmt;

use crate::reactive::StateId;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Value>),
    /// The current value of a reactive state cell, tagged with its
    /// identity so `is`-style comparisons (spec.md §4.9) work without a
    /// real object graph.
    State(StateId),
    /// The setter half of a `state()` pair; calling it assigns a new value
    /// to the referenced state cell.
    Setter(StateId),
    /// A function or class defined in the cell. Definitions are bound but
    /// never actually invoked by this evaluator (function/class bodies are
    /// treated opaquely, per SPEC_FULL.md §3's embedded-language boundary).
    Opaque(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::State(_) | Value::Setter(_) | Value::Opaque(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::State(_) => "state",
            Value::Setter(_) => "function",
            Value::Opaque(_) => "object",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(fl) => write!(f, "{fl}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Value::State(_) => write!(f, "<state>"),
            Value::Setter(_) => write!(f, "<setter>"),
            Value::Opaque(name) => write!(f, "<{name}>"),
        }
    }
}
