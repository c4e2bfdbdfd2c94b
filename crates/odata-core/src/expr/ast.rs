//! Expression AST for `$filter` and `$orderby`.

use std::fmt;

use serde::Serialize;

use crate::edm::PrimitiveKind;
use crate::uri::ast::KeyValue;
use crate::uri::literal::Literal;

/// Static result type of an expression node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExprType {
    pub type_name: String,
    pub collection: bool,
}

impl ExprType {
    pub fn new(type_name: impl Into<String>, collection: bool) -> Self {
        Self {
            type_name: type_name.into(),
            collection,
        }
    }

    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::new(kind.edm_name(), false)
    }

    pub fn boolean() -> Self {
        Self::primitive(PrimitiveKind::Boolean)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Has,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn keyword(&self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::Has => "has",
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
        }
    }

    /// Binding strength; higher binds tighter. All levels are left-associative.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::Has => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 3
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::Or | BinaryOp::And)
    }

    pub fn is_arithmetic(&self) -> bool {
        self.precedence() >= 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LambdaOp {
    Any,
    All,
}

impl LambdaOp {
    pub fn keyword(&self) -> &'static str {
        match self {
            LambdaOp::Any => "any",
            LambdaOp::All => "all",
        }
    }
}

/// `Address/City`, or `o/Amount` inside a lambda whose variable is `o`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyPath {
    pub variable: Option<String>,
    pub segments: Vec<String>,
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(var) = &self.variable {
            parts.push(var);
        }
        parts.extend(self.segments.iter().map(String::as_str));
        f.write_str(&parts.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum ExprKind {
    Literal {
        value: Literal,
    },
    Property {
        path: PropertyPath,
    },
    /// `$it`
    It,
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Function {
        name: String,
        args: Vec<Expression>,
    },
    Lambda {
        op: LambdaOp,
        collection: PropertyPath,
        variable: Option<String>,
        predicate: Option<Box<Expression>>,
    },
    /// `$root/EntitySet(key)/Property...`
    Root {
        entity_set: String,
        keys: Vec<KeyValue>,
        named: bool,
        path: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expression {
    pub kind: ExprKind,
    /// `None` when the type cannot be determined statically (null literal,
    /// dynamic property of an open type).
    pub edm_type: Option<ExprType>,
}

impl Expression {
    pub fn new(kind: ExprKind, edm_type: Option<ExprType>) -> Self {
        Self { kind, edm_type }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression, edm_type: Option<ExprType>) -> Self {
        Self::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            edm_type,
        )
    }

    fn precedence(&self) -> u8 {
        match &self.kind {
            ExprKind::Binary { op, .. } => op.precedence(),
            _ => u8::MAX,
        }
    }

    /// Property paths referenced anywhere in the expression.
    pub fn property_paths(&self) -> Vec<&PropertyPath> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a PropertyPath>) {
        match &self.kind {
            ExprKind::Property { path } => out.push(path),
            ExprKind::Binary { left, right, .. } => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
            ExprKind::Unary { operand, .. } => operand.collect_paths(out),
            ExprKind::Function { args, .. } => args.iter().for_each(|a| a.collect_paths(out)),
            ExprKind::Lambda {
                collection,
                predicate,
                ..
            } => {
                out.push(collection);
                if let Some(p) = predicate {
                    p.collect_paths(out);
                }
            }
            ExprKind::Literal { .. } | ExprKind::It | ExprKind::Root { .. } => {}
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, e: &Expression, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({e})")
    } else {
        write!(f, "{e}")
    }
}

/// Canonical text with the minimum parentheses needed to reparse the same
/// tree.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal { value } => f.write_str(&value.to_uri_string()),
            ExprKind::Property { path } => write!(f, "{path}"),
            ExprKind::It => f.write_str("$it"),
            ExprKind::Binary { op, left, right } => {
                write_operand(f, left, left.precedence() < op.precedence())?;
                write!(f, " {} ", op.keyword())?;
                write_operand(f, right, right.precedence() <= op.precedence())
            }
            ExprKind::Unary { op, operand } => {
                let parens = matches!(operand.kind, ExprKind::Binary { .. });
                match op {
                    UnaryOp::Not => f.write_str("not ")?,
                    UnaryOp::Neg => f.write_str("-")?,
                }
                write_operand(f, operand, parens)
            }
            ExprKind::Function { name, args } if name == "$count" && args.len() == 1 => {
                write!(f, "{}/$count", args[0])
            }
            ExprKind::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            ExprKind::Lambda {
                op,
                collection,
                variable,
                predicate,
            } => {
                write!(f, "{collection}/{}(", op.keyword())?;
                if let (Some(var), Some(pred)) = (variable, predicate) {
                    write!(f, "{var}:{pred}")?;
                }
                f.write_str(")")
            }
            ExprKind::Root {
                entity_set,
                keys,
                named,
                path,
            } => {
                write!(f, "$root/{entity_set}(")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if *named {
                        write!(f, "{}=", key.name)?;
                    }
                    f.write_str(&key.value.to_uri_string())?;
                }
                f.write_str(")")?;
                for segment in path {
                    write!(f, "/{segment}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(name: &str) -> Expression {
        Expression::new(
            ExprKind::Property {
                path: PropertyPath {
                    variable: None,
                    segments: vec![name.to_string()],
                },
            },
            None,
        )
    }

    fn int(i: i64) -> Expression {
        Expression::new(ExprKind::Literal { value: Literal::Integer(i) }, None)
    }

    #[test]
    fn display_uses_minimal_parentheses() {
        let and = Expression::binary(
            BinaryOp::And,
            Expression::binary(BinaryOp::Eq, prop("A"), int(1), None),
            Expression::binary(BinaryOp::Eq, prop("B"), int(2), None),
            None,
        );
        let or = Expression::binary(
            BinaryOp::Or,
            and.clone(),
            Expression::binary(BinaryOp::Eq, prop("C"), int(3), None),
            None,
        );
        assert_eq!(or.to_string(), "A eq 1 and B eq 2 or C eq 3");

        let grouped = Expression::binary(
            BinaryOp::And,
            Expression::binary(BinaryOp::Eq, prop("A"), int(1), None),
            Expression::binary(
                BinaryOp::Or,
                Expression::binary(BinaryOp::Eq, prop("B"), int(2), None),
                Expression::binary(BinaryOp::Eq, prop("C"), int(3), None),
                None,
            ),
            None,
        );
        assert_eq!(grouped.to_string(), "A eq 1 and (B eq 2 or C eq 3)");
    }

    #[test]
    fn right_operand_of_same_precedence_is_parenthesised() {
        let e = Expression::binary(
            BinaryOp::Sub,
            prop("A"),
            Expression::binary(BinaryOp::Sub, prop("B"), prop("C"), None),
            None,
        );
        assert_eq!(e.to_string(), "A sub (B sub C)");
    }

    #[test]
    fn unary_not_wraps_binary_operand() {
        let e = Expression::new(
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(Expression::binary(BinaryOp::Eq, prop("A"), int(1), None)),
            },
            None,
        );
        assert_eq!(e.to_string(), "not (A eq 1)");
    }

    #[test]
    fn precedence_table() {
        assert!(BinaryOp::Mul.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::Add.precedence() > BinaryOp::Eq.precedence());
        assert!(BinaryOp::Eq.precedence() > BinaryOp::And.precedence());
        assert!(BinaryOp::And.precedence() > BinaryOp::Or.precedence());
        assert!(BinaryOp::Has.is_comparison());
    }
}
