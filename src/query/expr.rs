//! Native query expression tree
//!
//! Compiled filters and projections are built as `Expr` values and rendered
//! to query text through `Display`. Operands supplied by users only ever
//! appear as `Param` placeholders; `Const` holds the structural literals the
//! compiler itself introduces.

use std::cmp::Ordering;
use std::fmt;

/// Variable bound to the current element inside `[* FILTER ...]`
pub const CURRENT: &str = "CURRENT";

/// Variable bound to the document being filtered
pub const DOC: &str = "doc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Maps a filter operator name (`eq`, `lt`, ...) to a comparison.
    pub fn from_filter_op(op: &str) -> Option<Self> {
        Some(match op {
            "eq" => CmpOp::Eq,
            "ne" => CmpOp::Ne,
            "lt" => CmpOp::Lt,
            "le" => CmpOp::Le,
            "gt" => CmpOp::Gt,
            "ge" => CmpOp::Ge,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    /// Ordering comparisons (as opposed to equality tests)
    pub fn is_ordered(&self) -> bool {
        !matches!(self, CmpOp::Eq | CmpOp::Ne)
    }

    /// Whether `lhs.cmp(rhs) == ord` satisfies this operator
    pub fn holds(&self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Structural literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Const {
    Null,
    Bool(bool),
    Int(i64),
}

/// What a subquery iterates over
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Collection(String),
    Expr(Box<Expr>),
}

/// `(FOR var IN source FILTER filter LIMIT n RETURN ret)`
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub var: String,
    pub source: Source,
    pub filter: Option<Expr>,
    pub limit: Option<usize>,
    pub ret: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, usize),
    Param(String),
    Const(Const),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    /// Membership: `lhs IN rhs`
    In(Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    ToString(Box<Expr>),
    Length(Box<Expr>),
    /// `base[*].a.b`
    Expand { base: Box<Expr>, path: Vec<String> },
    /// `base[* FILTER cond]`, with `CURRENT` bound to each element
    InlineFilter { base: Box<Expr>, cond: Box<Expr> },
    Subquery(Box<Subquery>),
    Object(Vec<(String, Expr)>),
    /// `(a && b)`: `b` when `a` is truthy, otherwise `a`
    Guard(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub const TRUE: Expr = Expr::Const(Const::Bool(true));
    pub const FALSE: Expr = Expr::Const(Const::Bool(false));

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn field(base: Expr, name: impl Into<String>) -> Self {
        Expr::Field(Box::new(base), name.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    pub fn int(n: i64) -> Self {
        Expr::Const(Const::Int(n))
    }

    pub fn compare(lhs: Expr, op: CmpOp, rhs: Expr) -> Self {
        Expr::Compare(Box::new(lhs), op, Box::new(rhs))
    }

    pub fn is_in(lhs: Expr, rhs: Expr) -> Self {
        Expr::In(Box::new(lhs), Box::new(rhs))
    }

    pub fn length(e: Expr) -> Self {
        Expr::Length(Box::new(e))
    }

    pub fn expand(base: Expr, path: Vec<String>) -> Self {
        Expr::Expand {
            base: Box::new(base),
            path,
        }
    }

    pub fn inline_filter(base: Expr, cond: Expr) -> Self {
        Expr::InlineFilter {
            base: Box::new(base),
            cond: Box::new(cond),
        }
    }

    pub fn subquery(q: Subquery) -> Self {
        Expr::Subquery(Box::new(q))
    }

    pub fn guard(cond: Expr, value: Expr) -> Self {
        Expr::Guard(Box::new(cond), Box::new(value))
    }

    /// Conjunction with constant folding: `true` operands vanish, a `false`
    /// operand collapses the whole conjunction.
    pub fn and(items: impl IntoIterator<Item = Expr>) -> Self {
        let mut out = Vec::new();
        for item in items {
            match item {
                Expr::Const(Const::Bool(true)) => {}
                Expr::Const(Const::Bool(false)) => return Expr::FALSE,
                Expr::And(nested) => out.extend(nested),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Expr::TRUE,
            1 => out.remove(0),
            _ => Expr::And(out),
        }
    }

    /// Disjunction with constant folding.
    pub fn or(items: impl IntoIterator<Item = Expr>) -> Self {
        let mut out = Vec::new();
        for item in items {
            match item {
                Expr::Const(Const::Bool(false)) => {}
                Expr::Const(Const::Bool(true)) => return Expr::TRUE,
                Expr::Or(nested) => out.extend(nested),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Expr::FALSE,
            1 => out.remove(0),
            _ => Expr::Or(out),
        }
    }

    pub fn not(e: Expr) -> Self {
        match e {
            Expr::Const(Const::Bool(b)) => Expr::Const(Const::Bool(!b)),
            other => Expr::Not(Box::new(other)),
        }
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Expr::Const(Const::Bool(false)))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Const(Const::Bool(true)))
    }

    /// Field names of a plain path rooted at variable `root`
    /// (`CURRENT.a.b` -> `["a", "b"]`, `CURRENT` -> `[]`).
    pub fn simple_path(&self, root: &str) -> Option<Vec<String>> {
        match self {
            Expr::Var(name) if name == root => Some(Vec::new()),
            Expr::Field(base, name) => {
                let mut path = base.simple_path(root)?;
                path.push(name.clone());
                Some(path)
            }
            _ => None,
        }
    }

    fn is_compound(&self) -> bool {
        matches!(
            self,
            Expr::Compare(..) | Expr::In(..) | Expr::And(_) | Expr::Or(_) | Expr::Not(_)
        )
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if is_identifier(name) {
        f.write_str(name)
    } else {
        write!(f, "`{}`", name.replace('`', "\\`"))
    }
}

struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_compound() {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "({})", item)?;
    }
    Ok(())
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Null => f.write_str("null"),
            Const::Bool(b) => write!(f, "{}", b),
            Const::Int(n) => write!(f, "{}", n),
        }
    }
}

impl fmt::Display for Subquery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(FOR {} IN ", self.var)?;
        match &self.source {
            Source::Collection(name) => write_name(f, name)?,
            Source::Expr(e) => write!(f, "{}", Operand(e))?,
        }
        if let Some(filter) = &self.filter {
            write!(f, " FILTER {}", filter)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        write!(f, " RETURN {})", self.ret)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(name) => f.write_str(name),
            Expr::Field(base, name) => {
                write!(f, "{}", Operand(base))?;
                if is_identifier(name) {
                    write!(f, ".{}", name)
                } else {
                    write!(f, "[\"{}\"]", name.replace('"', "\\\""))
                }
            }
            Expr::Index(base, i) => write!(f, "{}[{}]", Operand(base), i),
            Expr::Param(name) => write!(f, "@{}", name),
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Compare(l, op, r) => {
                write!(f, "{} {} {}", Operand(l), op.as_str(), Operand(r))
            }
            Expr::In(l, r) => write!(f, "{} IN {}", Operand(l), Operand(r)),
            Expr::And(items) => write_joined(f, items, " AND "),
            Expr::Or(items) => write_joined(f, items, " OR "),
            Expr::Not(e) => write!(f, "NOT ({})", e),
            Expr::ToString(e) => write!(f, "TO_STRING({})", e),
            Expr::Length(e) => write!(f, "LENGTH({})", e),
            Expr::Expand { base, path } => {
                write!(f, "{}[*]", Operand(base))?;
                for name in path {
                    f.write_str(".")?;
                    write_name(f, name)?;
                }
                Ok(())
            }
            Expr::InlineFilter { base, cond } => {
                write!(f, "{}[* FILTER {}]", Operand(base), cond)
            }
            Expr::Subquery(q) => write!(f, "{}", q),
            Expr::Object(fields) => {
                f.write_str("{ ")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_name(f, name)?;
                    write!(f, ": {}", value)?;
                }
                f.write_str(" }")
            }
            Expr::Guard(cond, value) => {
                write!(f, "({} && {})", Operand(cond), Operand(value))
            }
        }
    }
}
