//! Expression parser
//!
//! Two phases: a nom tokenizer turns the option text into positioned tokens,
//! then a recursive-descent parser with one function per precedence level
//! builds the tree. Every node is typed against the EDM as it is built, so
//! unknown properties, unknown functions, wrong arity and incompatible
//! operand types all fail here with the offending position.

use nom::{
    branch::alt,
    character::complete::char,
    combinator::{map, recognize, value},
    error::ParseError as NomParseError,
    multi::many0,
    sequence::{pair, preceded},
    IResult,
};

use super::ast::{
    BinaryOp, ExprKind, ExprType, Expression, LambdaOp, PropertyPath, UnaryOp,
};
use crate::edm::{EdmType, EntityDataModel, PrimitiveKind};
use crate::uri::ast::OrderByItem;
use crate::uri::literal::{identifier, literal, word, Literal};
use crate::uri::parser::resolve_keys;
use crate::uri::UriParseError;

type Result<T> = std::result::Result<T, UriParseError>;

// ============================================================================
// Public API
// ============================================================================

/// Parses expressions evaluated against instances of one structured type
/// (the `$it` type).
pub struct ExpressionParser<'m> {
    model: &'m EntityDataModel,
    it_type: String,
}

impl<'m> ExpressionParser<'m> {
    pub fn new(model: &'m EntityDataModel, it_type: impl Into<String>) -> Self {
        Self {
            model,
            it_type: it_type.into(),
        }
    }

    /// Any expression.
    pub fn parse(&self, text: &str) -> Result<Expression> {
        let mut parser = self.start(text)?;
        let expr = parser.expression()?;
        parser.expect_end()?;
        Ok(expr)
    }

    /// A `$filter` body; must be boolean-typed.
    pub fn parse_filter(&self, text: &str) -> Result<Expression> {
        let expr = self.parse(text)?;
        match &expr.edm_type {
            Some(t) if t != &ExprType::boolean() => Err(UriParseError::InvalidQueryOption {
                option: "$filter".to_string(),
                value: text.to_string(),
                reason: format!("expression has type {}, not Edm.Boolean", t.type_name),
            }),
            _ => Ok(expr),
        }
    }

    /// A `$orderby` body: `expr [asc|desc], ...`.
    pub fn parse_orderby(&self, text: &str) -> Result<Vec<OrderByItem>> {
        let mut parser = self.start(text)?;
        let mut items = Vec::new();
        loop {
            let position = parser.position();
            let expression = parser.expression()?;
            if expression.edm_type.as_ref().is_some_and(|t| t.collection) {
                return Err(UriParseError::OperandType {
                    position,
                    message: "cannot order by a collection".to_string(),
                });
            }
            let descending = if parser.eat_keyword("desc") {
                true
            } else {
                parser.eat_keyword("asc");
                false
            };
            items.push(OrderByItem {
                expression,
                descending,
            });
            if !parser.eat(&Token::Comma) {
                break;
            }
        }
        parser.expect_end()?;
        Ok(items)
    }

    fn start<'s>(&'s self, text: &'s str) -> Result<Parser<'s>> {
        Ok(Parser {
            model: self.model,
            it_type: &self.it_type,
            source: text,
            tokens: tokenize(text)?,
            pos: 0,
            scopes: Vec::new(),
        })
    }
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Literal),
    /// Identifier, possibly namespace-qualified.
    Ident(String),
    Root,
    It,
    Count,
    Slash,
    Comma,
    Colon,
    Equals,
    LParen,
    RParen,
    Minus,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
    text: String,
}

fn dotted_identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(identifier, many0(preceded(char('.'), identifier))))(input)
}

fn token<'a, E: NomParseError<&'a str> + nom::error::FromExternalError<&'a str, uuid::Error> + nom::error::FromExternalError<&'a str, chrono::ParseError>>(input: &'a str) -> IResult<&'a str, Token, E> {
    alt((
        value(Token::LParen, char('(')),
        value(Token::RParen, char(')')),
        value(Token::Slash, char('/')),
        value(Token::Comma, char(',')),
        value(Token::Colon, char(':')),
        value(Token::Equals, char('=')),
        // Negative numbers are folded by the parser, never lexed.
        value(Token::Minus, char('-')),
        value(Token::Root, word("$root")),
        value(Token::It, word("$it")),
        value(Token::Count, word("$count")),
        map(literal, Token::Literal),
        map(dotted_identifier, |s: &str| Token::Ident(s.to_string())),
    ))(input)
}

fn tokenize(text: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(tokens);
        }
        let offset = text.len() - rest.len();
        match token::<nom::error::Error<&str>>(rest) {
            Ok((next, token)) => {
                tokens.push(Spanned {
                    token,
                    offset,
                    text: rest[..rest.len() - next.len()].to_string(),
                });
                rest = next;
            }
            Err(_) => {
                let found: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
                return Err(UriParseError::syntax(offset, "a token", found));
            }
        }
    }
}

// ============================================================================
// Function signatures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgRule {
    Nothing,
    Substring,
    Strings,
    Temporal,
    Numeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Returns {
    Kind(PrimitiveKind),
    SameAsArgument,
}

struct Signature {
    min: usize,
    max: usize,
    args: ArgRule,
    returns: Returns,
}

const fn sig(min: usize, max: usize, args: ArgRule, returns: Returns) -> Signature {
    Signature {
        min,
        max,
        args,
        returns,
    }
}

fn signature(name: &str) -> Option<Signature> {
    use ArgRule::*;
    use PrimitiveKind as K;
    use Returns::*;
    let s = match name {
        "contains" | "startswith" | "endswith" => sig(2, 2, Strings, Kind(K::Boolean)),
        "length" => sig(1, 1, Strings, Kind(K::Int32)),
        "indexof" => sig(2, 2, Strings, Kind(K::Int32)),
        "substring" => sig(2, 3, Substring, Kind(K::String)),
        "tolower" | "toupper" | "trim" => sig(1, 1, Strings, Kind(K::String)),
        "concat" => sig(2, 2, Strings, Kind(K::String)),
        "year" | "month" | "day" | "hour" | "minute" | "second" => {
            sig(1, 1, Temporal, Kind(K::Int32))
        }
        "fractionalseconds" => sig(1, 1, Temporal, Kind(K::Decimal)),
        "totaloffsetminutes" => sig(1, 1, Temporal, Kind(K::Int32)),
        "date" => sig(1, 1, Temporal, Kind(K::Date)),
        "time" => sig(1, 1, Temporal, Kind(K::TimeOfDay)),
        "now" | "maxdatetime" | "mindatetime" => sig(0, 0, Nothing, Kind(K::DateTimeOffset)),
        "round" | "floor" | "ceiling" => sig(1, 1, Numeric, SameAsArgument),
        _ => return None,
    };
    Some(s)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'s> {
    model: &'s EntityDataModel,
    it_type: &'s str,
    source: &'s str,
    tokens: Vec<Spanned>,
    pos: usize,
    /// Lambda range variables in scope: (name, element type).
    scopes: Vec<(String, String)>,
}

fn binary_op(word: &str) -> Option<BinaryOp> {
    Some(match word {
        "or" => BinaryOp::Or,
        "and" => BinaryOp::And,
        "eq" => BinaryOp::Eq,
        "ne" => BinaryOp::Ne,
        "lt" => BinaryOp::Lt,
        "le" => BinaryOp::Le,
        "gt" => BinaryOp::Gt,
        "ge" => BinaryOp::Ge,
        "has" => BinaryOp::Has,
        "add" => BinaryOp::Add,
        "sub" => BinaryOp::Sub,
        "mul" => BinaryOp::Mul,
        "div" => BinaryOp::Div,
        "mod" => BinaryOp::Mod,
        _ => return None,
    })
}

const LOWEST_PRECEDENCE: u8 = 1;
const HIGHEST_PRECEDENCE: u8 = 5;

impl<'s> Parser<'s> {
    // ── Cursor ───────────────────────────────────────────────────

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.offset)
            .unwrap_or(self.source.len())
    }

    fn found(&self) -> String {
        self.tokens
            .get(self.pos)
            .map(|s| s.text.clone())
            .unwrap_or_else(|| "end of input".to_string())
    }

    fn unexpected(&self, expected: &str) -> UriParseError {
        UriParseError::syntax(self.position(), expected, self.found())
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos < self.tokens.len() {
            Err(self.unexpected("end of expression"))
        } else {
            Ok(())
        }
    }

    // ── Precedence levels ────────────────────────────────────────

    fn expression(&mut self) -> Result<Expression> {
        self.level(LOWEST_PRECEDENCE)
    }

    fn level(&mut self, precedence: u8) -> Result<Expression> {
        if precedence > HIGHEST_PRECEDENCE {
            return self.unary();
        }
        let mut left = self.level(precedence + 1)?;
        loop {
            let op = match self.peek() {
                Some(Token::Ident(w)) => match binary_op(w) {
                    Some(op) if op.precedence() == precedence => op,
                    _ => break,
                },
                _ => break,
            };
            let position = self.position();
            self.pos += 1;
            let right = self.level(precedence + 1)?;
            left = self.combine(op, left, right, position)?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expression> {
        let position = self.position();
        if self.eat_keyword("not") {
            let operand = self.unary()?;
            if !self.is_boolean_or_untyped(&operand.edm_type) {
                return Err(UriParseError::OperandType {
                    position,
                    message: "'not' requires a boolean operand".to_string(),
                });
            }
            return Ok(Expression::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                Some(ExprType::boolean()),
            ));
        }
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return self.negate(operand, position);
        }
        self.primary()
    }

    fn negate(&self, operand: Expression, position: usize) -> Result<Expression> {
        if let ExprKind::Literal { value } = &operand.kind {
            let folded = match value {
                Literal::Integer(i) => i.checked_neg().map(Literal::Integer),
                Literal::Decimal(d) => Some(Literal::Decimal(-*d)),
                Literal::Double(f) => Some(Literal::Double(-*f)),
                Literal::Duration(d) if !d.starts_with('-') => Some(Literal::Duration(format!("-{d}"))),
                _ => None,
            };
            if let Some(value) = folded {
                let edm_type = value.kind().map(ExprType::primitive);
                return Ok(Expression::new(ExprKind::Literal { value }, edm_type));
            }
        }
        match self.kind_of(&operand.edm_type) {
            None if operand.edm_type.is_none() => {}
            Some(k) if k.is_numeric() || k == PrimitiveKind::Duration => {}
            _ => {
                return Err(UriParseError::OperandType {
                    position,
                    message: "negation requires a numeric or duration operand".to_string(),
                })
            }
        }
        let edm_type = operand.edm_type.clone();
        Ok(Expression::new(
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            },
            edm_type,
        ))
    }

    fn primary(&mut self) -> Result<Expression> {
        let position = self.position();
        match self.peek().cloned() {
            Some(Token::Literal(value)) => {
                self.pos += 1;
                self.literal(value, position)
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Root) => {
                self.pos += 1;
                self.root()
            }
            Some(Token::It) => {
                self.pos += 1;
                if self.eat(&Token::Slash) {
                    let first = self.expect_ident("a property name")?;
                    let start = self.it_type.to_string();
                    self.path(Some("$it".to_string()), start, Some(first))
                } else {
                    Ok(Expression::new(
                        ExprKind::It,
                        Some(ExprType::new(self.it_type, false)),
                    ))
                }
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                if self.peek() == Some(&Token::LParen) {
                    return self.function(name, position);
                }
                if let Some((var, element)) =
                    self.scopes.iter().rev().find(|(v, _)| v == &name).cloned()
                {
                    if self.eat(&Token::Slash) {
                        let first = self.expect_ident("a property name")?;
                        return self.path(Some(var), element, Some(first));
                    }
                    return Ok(Expression::new(
                        ExprKind::Property {
                            path: PropertyPath {
                                variable: Some(var),
                                segments: Vec::new(),
                            },
                        },
                        Some(ExprType::new(element, false)),
                    ));
                }
                let start = self.it_type.to_string();
                self.path(None, start, Some(name))
            }
            _ => Err(self.unexpected("an operand")),
        }
    }

    fn literal(&self, value: Literal, position: usize) -> Result<Expression> {
        let edm_type = match &value {
            Literal::Enum { type_name, member } => {
                let valid = self
                    .model
                    .enum_type(type_name)
                    .is_some_and(|e| e.member(member).is_some());
                if !valid {
                    return Err(UriParseError::LiteralType {
                        literal: value.to_uri_string(),
                        target: type_name.clone(),
                        reason: format!("not a member of an enum type (at position {position})"),
                    });
                }
                Some(ExprType::new(type_name.clone(), false))
            }
            other => other.kind().map(ExprType::primitive),
        };
        Ok(Expression::new(ExprKind::Literal { value }, edm_type))
    }

    // ── Paths ────────────────────────────────────────────────────

    /// Resolve a property path starting at `start_type`. `first` is the
    /// already-consumed first segment.
    fn path(
        &mut self,
        variable: Option<String>,
        start_type: String,
        first: Option<String>,
    ) -> Result<Expression> {
        let mut segments: Vec<String> = Vec::new();
        let mut current = Some(ExprType::new(start_type, false));
        let mut pending = first;

        while let Some(segment) = pending.take() {
            current = self.step(current.as_ref(), &segment)?;
            segments.push(segment);

            if !self.eat(&Token::Slash) {
                break;
            }
            let collection = current.as_ref().is_some_and(|t| t.collection);
            match self.peek().cloned() {
                Some(Token::Count) => {
                    self.pos += 1;
                    if !collection {
                        return Err(UriParseError::InvalidSegment {
                            segment: "$count".to_string(),
                            reason: "only collections can be counted".to_string(),
                        });
                    }
                    return Ok(Expression::new(
                        ExprKind::Function {
                            name: "$count".to_string(),
                            args: vec![Expression::new(
                                ExprKind::Property {
                                    path: PropertyPath { variable, segments },
                                },
                                current,
                            )],
                        },
                        Some(ExprType::primitive(PrimitiveKind::Int64)),
                    ));
                }
                Some(Token::Ident(w))
                    if (w == "any" || w == "all") && self.peek_at(1) == Some(&Token::LParen) =>
                {
                    self.pos += 1;
                    let op = if w == "any" { LambdaOp::Any } else { LambdaOp::All };
                    let path = PropertyPath { variable, segments };
                    return self.lambda(op, path, current);
                }
                Some(Token::Ident(w)) => {
                    self.pos += 1;
                    if collection {
                        return Err(UriParseError::InvalidSegment {
                            segment: w,
                            reason: "a collection can only be followed by any, all or $count"
                                .to_string(),
                        });
                    }
                    pending = Some(w);
                }
                _ => return Err(self.unexpected("a property name")),
            }
        }

        Ok(Expression::new(
            ExprKind::Property {
                path: PropertyPath { variable, segments },
            },
            current,
        ))
    }

    /// Type after following `segment` from `current`. `None` means the path
    /// has entered dynamic (open-type) territory.
    fn step(&self, current: Option<&ExprType>, segment: &str) -> Result<Option<ExprType>> {
        let Some(current) = current else {
            return Ok(None);
        };
        if segment.contains('.') {
            if self.model.is_derived_from(segment, &current.type_name) {
                return Ok(Some(ExprType::new(segment, current.collection)));
            }
            return Err(UriParseError::InvalidSegment {
                segment: segment.to_string(),
                reason: format!("not a type derived from {}", current.type_name),
            });
        }
        if let Some(p) = self.model.structural_property(&current.type_name, segment) {
            return Ok(Some(ExprType::new(
                p.type_ref.type_name.clone(),
                p.type_ref.collection,
            )));
        }
        if let Some(n) = self.model.navigation_property(&current.type_name, segment) {
            return Ok(Some(ExprType::new(n.target.clone(), n.collection)));
        }
        let open = match self.model.get_type(&current.type_name) {
            Some(EdmType::Entity(t)) => t.is_open,
            Some(EdmType::Complex(t)) => t.is_open,
            _ => false,
        };
        if open {
            return Ok(None);
        }
        Err(UriParseError::UnknownProperty {
            property: segment.to_string(),
            type_name: current.type_name.clone(),
        })
    }

    fn lambda(
        &mut self,
        op: LambdaOp,
        collection: PropertyPath,
        collection_type: Option<ExprType>,
    ) -> Result<Expression> {
        self.expect(Token::LParen, "'('")?;
        if self.eat(&Token::RParen) {
            if op == LambdaOp::All {
                return Err(self.unexpected("a lambda variable"));
            }
            return Ok(Expression::new(
                ExprKind::Lambda {
                    op,
                    collection,
                    variable: None,
                    predicate: None,
                },
                Some(ExprType::boolean()),
            ));
        }
        let variable = self.expect_ident("a lambda variable")?;
        self.expect(Token::Colon, "':'")?;
        let element = collection_type
            .map(|t| t.type_name)
            .unwrap_or_else(|| "Edm.Untyped".to_string());
        self.scopes.push((variable.clone(), element));
        let position = self.position();
        let predicate = self.expression();
        self.scopes.pop();
        let predicate = predicate?;
        if !self.is_boolean_or_untyped(&predicate.edm_type) {
            return Err(UriParseError::OperandType {
                position,
                message: format!("{} predicate must be boolean", op.keyword()),
            });
        }
        self.expect(Token::RParen, "')'")?;
        Ok(Expression::new(
            ExprKind::Lambda {
                op,
                collection,
                variable: Some(variable),
                predicate: Some(Box::new(predicate)),
            },
            Some(ExprType::boolean()),
        ))
    }

    fn root(&mut self) -> Result<Expression> {
        self.expect(Token::Slash, "'/'")?;
        let position = self.position();
        let set_name = self.expect_ident("an entity set name")?;
        let entity_set = self.model.entity_set(&set_name).ok_or_else(|| {
            UriParseError::UnknownSegment {
                segment: set_name.clone(),
                position,
            }
        })?;
        let entity_type = entity_set.entity_type.clone();

        self.expect(Token::LParen, "'('")?;
        let mut raw = Vec::new();
        loop {
            let name = match (self.peek().cloned(), self.peek_at(1)) {
                (Some(Token::Ident(n)), Some(Token::Equals)) => {
                    self.pos += 2;
                    Some(n)
                }
                _ => None,
            };
            match self.peek().cloned() {
                Some(Token::Literal(value)) => {
                    self.pos += 1;
                    raw.push((name, value));
                }
                _ => return Err(self.unexpected("a key value")),
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, "')'")?;
        let (keys, named) = resolve_keys(self.model, &entity_type, raw)?;

        let mut path = Vec::new();
        let mut current = ExprType::new(entity_type, false);
        while self.eat(&Token::Slash) {
            let segment = self.expect_ident("a property name")?;
            current = match self.step(Some(&current), &segment)? {
                Some(t) if !t.collection => t,
                _ => {
                    return Err(UriParseError::InvalidSegment {
                        segment,
                        reason: "$root paths must address a single value".to_string(),
                    })
                }
            };
            path.push(segment);
        }
        Ok(Expression::new(
            ExprKind::Root {
                entity_set: set_name,
                keys,
                named,
                path,
            },
            Some(current),
        ))
    }

    // ── Functions ────────────────────────────────────────────────

    fn function(&mut self, name: String, position: usize) -> Result<Expression> {
        let signature =
            signature(&name).ok_or_else(|| UriParseError::UnknownFunction { name: name.clone() })?;
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen, "')' or ','")?;
        }

        if args.len() < signature.min || args.len() > signature.max {
            let expected = if signature.min == signature.max {
                signature.min.to_string()
            } else {
                format!("{}-{}", signature.min, signature.max)
            };
            return Err(UriParseError::FunctionArity {
                name,
                expected,
                found: args.len(),
            });
        }

        for (index, arg) in args.iter().enumerate() {
            let kind = self.kind_of(&arg.edm_type);
            let untyped = arg.edm_type.is_none();
            let ok = untyped
                || match signature.args {
                    ArgRule::Nothing => false,
                    ArgRule::Substring => {
                        if index == 0 {
                            kind == Some(PrimitiveKind::String)
                        } else {
                            kind.is_some_and(|k| k.is_integral())
                        }
                    }
                    ArgRule::Strings => kind == Some(PrimitiveKind::String),
                    ArgRule::Temporal => matches!(
                        kind,
                        Some(
                            PrimitiveKind::Date
                                | PrimitiveKind::DateTimeOffset
                                | PrimitiveKind::TimeOfDay
                        )
                    ),
                    ArgRule::Numeric => kind.is_some_and(|k| k.is_numeric()),
                };
            if !ok {
                return Err(UriParseError::OperandType {
                    position,
                    message: format!(
                        "argument {} of {name} has incompatible type {}",
                        index + 1,
                        arg.edm_type
                            .as_ref()
                            .map(|t| t.type_name.as_str())
                            .unwrap_or("unknown")
                    ),
                });
            }
        }

        let edm_type = match signature.returns {
            Returns::Kind(kind) => Some(ExprType::primitive(kind)),
            Returns::SameAsArgument => args.first().and_then(|a| a.edm_type.clone()),
        };
        Ok(Expression::new(ExprKind::Function { name, args }, edm_type))
    }

    // ── Typing ───────────────────────────────────────────────────

    fn kind_of(&self, t: &Option<ExprType>) -> Option<PrimitiveKind> {
        let t = t.as_ref()?;
        if t.collection {
            return None;
        }
        self.model.primitive_kind(&t.type_name)
    }

    fn is_boolean_or_untyped(&self, t: &Option<ExprType>) -> bool {
        t.is_none() || self.kind_of(t) == Some(PrimitiveKind::Boolean)
    }

    fn comparable(&self, a: &Option<ExprType>, b: &Option<ExprType>) -> bool {
        let (Some(x), Some(y)) = (a, b) else {
            return true;
        };
        if x.collection || y.collection {
            return false;
        }
        if x.type_name == y.type_name {
            return true;
        }
        match (self.kind_of(a), self.kind_of(b)) {
            (Some(k), Some(l)) if k.is_numeric() && l.is_numeric() => true,
            (Some(PrimitiveKind::Date), Some(PrimitiveKind::DateTimeOffset))
            | (Some(PrimitiveKind::DateTimeOffset), Some(PrimitiveKind::Date)) => true,
            _ => false,
        }
    }

    fn combine(
        &self,
        op: BinaryOp,
        left: Expression,
        right: Expression,
        position: usize,
    ) -> Result<Expression> {
        let mismatch = |message: String| UriParseError::OperandType { position, message };
        let describe = |t: &Option<ExprType>| {
            t.as_ref()
                .map(|t| t.type_name.clone())
                .unwrap_or_else(|| "null".to_string())
        };

        let edm_type = if op.is_logical() {
            if !self.is_boolean_or_untyped(&left.edm_type)
                || !self.is_boolean_or_untyped(&right.edm_type)
            {
                return Err(mismatch(format!(
                    "'{}' requires boolean operands, found {} and {}",
                    op.keyword(),
                    describe(&left.edm_type),
                    describe(&right.edm_type)
                )));
            }
            Some(ExprType::boolean())
        } else if op == BinaryOp::Has {
            let left_enum = left
                .edm_type
                .as_ref()
                .map(|t| self.model.enum_type(&t.type_name).is_some())
                .unwrap_or(true);
            let right_enum = matches!(right.kind, ExprKind::Literal { value: Literal::Enum { .. } });
            if !left_enum || !right_enum || !self.comparable(&left.edm_type, &right.edm_type) {
                return Err(mismatch(
                    "'has' requires an enum operand and an enum literal of the same type".to_string(),
                ));
            }
            Some(ExprType::boolean())
        } else if op.is_comparison() {
            if !self.comparable(&left.edm_type, &right.edm_type) {
                return Err(mismatch(format!(
                    "cannot compare {} with {}",
                    describe(&left.edm_type),
                    describe(&right.edm_type)
                )));
            }
            Some(ExprType::boolean())
        } else {
            self.arithmetic_type(op, &left.edm_type, &right.edm_type)
                .ok_or_else(|| {
                    mismatch(format!(
                        "'{}' is not defined for {} and {}",
                        op.keyword(),
                        describe(&left.edm_type),
                        describe(&right.edm_type)
                    ))
                })?
        };
        Ok(Expression::binary(op, left, right, edm_type))
    }

    /// Result type of an arithmetic operator; outer `None` means invalid.
    fn arithmetic_type(
        &self,
        op: BinaryOp,
        left: &Option<ExprType>,
        right: &Option<ExprType>,
    ) -> Option<Option<ExprType>> {
        use PrimitiveKind as K;
        if left.is_none() || right.is_none() {
            return Some(left.clone().or_else(|| right.clone()));
        }
        let (l, r) = (self.kind_of(left)?, self.kind_of(right)?);
        if l.is_numeric() && r.is_numeric() {
            let wider = if l.numeric_rank() >= r.numeric_rank() { l } else { r };
            return Some(Some(ExprType::primitive(wider)));
        }
        let additive = matches!(op, BinaryOp::Add | BinaryOp::Sub);
        let result = match (l, r) {
            (K::DateTimeOffset | K::Date, K::Duration) if additive => l,
            (K::Duration, K::Duration) if additive => K::Duration,
            (K::DateTimeOffset, K::DateTimeOffset) | (K::Date, K::Date) if op == BinaryOp::Sub => {
                K::Duration
            }
            _ => return None,
        };
        Some(Some(ExprType::primitive(result)))
    }
}
