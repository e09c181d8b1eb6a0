//! Call descriptions as handed over by the query planner.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One argument of a function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// A field (or, for selectors, a tag) referenced by name.
    VarRef(String),
    /// An explicit tag reference.
    TagRef(String),
    Number(f64),
    Duration(Duration),
    Call(Call),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::VarRef(name.into())
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Expr::TagRef(name.into())
    }

    /// Name of a field or tag reference.
    pub fn as_ref_name(&self) -> Option<&str> {
        match self {
            Expr::VarRef(name) | Expr::TagRef(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&Call> {
        match self {
            Expr::Call(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Expr::VarRef(_) => "field reference",
            Expr::TagRef(_) => "tag reference",
            Expr::Number(_) => "number literal",
            Expr::Duration(_) => "duration literal",
            Expr::Call(_) => "function call",
        }
    }
}

/// A function call: name plus ordered arguments, possibly nested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Expr>,
}

impl Call {
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Call {
            name: name.into(),
            args,
        }
    }

    /// The field this call ultimately reads, following nested calls through their first argument.
    pub fn field(&self) -> Option<&str> {
        match self.args.first()? {
            Expr::VarRef(name) => Some(name),
            Expr::Call(inner) => inner.field(),
            _ => None,
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::VarRef(name) => write!(f, "{}", name),
            Expr::TagRef(name) => write!(f, "{}::tag", name),
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Duration(d) => write!(f, "{:?}", d),
            Expr::Call(c) => write!(f, "{}", c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_nested_call() {
        let call = Call::new(
            "derivative",
            vec![
                Expr::Call(Call::new("mean", vec![Expr::var("value")])),
                Expr::Duration(Duration::from_secs(3600)),
            ],
        );
        assert_eq!(call.to_string(), "derivative(mean(value), 3600s)");
        assert_eq!(call.field(), Some("value"));
    }

    #[test]
    fn test_top_with_tag_display() {
        let call = Call::new(
            "top",
            vec![Expr::var("usage"), Expr::tag("host"), Expr::Number(3.0)],
        );
        assert_eq!(call.to_string(), "top(usage, host::tag, 3)");
    }

    #[test]
    fn test_deserialize_call_json() {
        let json = r#"{"name":"percentile","args":[{"var_ref":"value"},{"number":90}]}"#;
        let call: Call = serde_json::from_str(json).unwrap();
        assert_eq!(
            call,
            Call::new("percentile", vec![Expr::var("value"), Expr::Number(90.0)])
        );
    }
}
