//! Array-`any` membership rewrite
//!
//! `LENGTH(arr[* FILTER cond]) > 0` forces the store to materialise the
//! filtered array. When `cond` only compares the element (or a plain
//! attribute path of it) for equality with a bound value, the same test can
//! be written as a membership check against an expansion, which the store
//! answers directly:
//!
//! ```text
//! CURRENT == @v          =>  @v IN arr[*]
//! CURRENT.a.b == @v      =>  @v IN arr[*].a.b
//! (s1) OR (s2) ...       =>  (r1) OR (r2) ...   when every si is rewritable
//! ```
//!
//! Any other shape is left alone.

use super::expr::{CmpOp, Expr, CURRENT};

/// Rewrites the condition of an `any` quantifier over `array`, or returns
/// `None` when the shape is not recognised.
pub fn rewrite_any(array: &Expr, cond: &Expr) -> Option<Expr> {
    match cond {
        Expr::Compare(lhs, CmpOp::Eq, rhs) => {
            let Expr::Param(_) = rhs.as_ref() else {
                return None;
            };
            let path = lhs.simple_path(CURRENT)?;
            Some(Expr::is_in(
                rhs.as_ref().clone(),
                Expr::expand(array.clone(), path),
            ))
        }
        Expr::Or(items) => items
            .iter()
            .map(|item| rewrite_any(array, item))
            .collect::<Option<Vec<_>>>()
            .map(Expr::Or),
        _ => None,
    }
}
