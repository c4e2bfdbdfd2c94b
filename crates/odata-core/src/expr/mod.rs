//! `$filter` / `$orderby` expression language.

pub mod ast;
pub mod parser;

pub use ast::{BinaryOp, ExprKind, ExprType, Expression, LambdaOp, PropertyPath, UnaryOp};
pub use parser::ExpressionParser;
