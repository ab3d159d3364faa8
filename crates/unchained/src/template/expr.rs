//! Condition expressions for `if` / `elif` directives
//!
//! A deliberately small grammar evaluated against the render context:
//! literals, (dotted) names, lists, `not` / `and` / `or`, comparisons and
//! `in` / `not in`. Nothing in a template can call code.

use std::cmp::Ordering;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, multispace1, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value},
    multi::{fold_many0, many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use serde_json::Value;

use super::Context;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `a.b.c`
    Name(Vec<String>),
    List(Vec<Self>),
    Not(Box<Self>),
    And(Box<Self>, Box<Self>),
    Or(Box<Self>, Box<Self>),
    Compare(Box<Self>, CmpOp, Box<Self>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

const RESERVED: &[&str] = &[
    "and", "or", "not", "in", "if", "elif", "else", "true", "True", "false", "False", "none",
    "None",
];

type Res<'a, T> = IResult<&'a str, T>;

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> Res<'a, O>
where
    F: FnMut(&'a str) -> Res<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    terminated(tag(kw), not(satisfy(is_ident_char)))
}

fn identifier(input: &str) -> Res<'_, &str> {
    let (rest, ident) = recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)?;
    if RESERVED.contains(&ident) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, ident))
}

fn literal(input: &str) -> Res<'_, Expr> {
    let string = alt((
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
    ));
    let number = map_res(
        recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))),
        serde_json::from_str::<Value>,
    );
    map(
        alt((
            value(Value::Bool(true), alt((keyword("true"), keyword("True")))),
            value(Value::Bool(false), alt((keyword("false"), keyword("False")))),
            value(Value::Null, alt((keyword("none"), keyword("None")))),
            number,
            map(string, |s: &str| Value::String(s.to_owned())),
        )),
        Expr::Literal,
    )(input)
}

fn name(input: &str) -> Res<'_, Expr> {
    let (input, first) = identifier(input)?;
    let (input, rest) = many0(preceded(char('.'), identifier))(input)?;
    let mut path = vec![first.to_owned()];
    path.extend(rest.into_iter().map(str::to_owned));
    Ok((input, Expr::Name(path)))
}

fn list(input: &str) -> Res<'_, Expr> {
    map(
        delimited(
            ws(char('[')),
            separated_list0(ws(char(',')), or_expr),
            ws(char(']')),
        ),
        Expr::List,
    )(input)
}

fn primary(input: &str) -> Res<'_, Expr> {
    ws(alt((
        delimited(char('('), or_expr, char(')')),
        list,
        literal,
        name,
    )))(input)
}

fn cmp_op(input: &str) -> Res<'_, CmpOp> {
    ws(alt((
        value(CmpOp::Eq, tag("==")),
        value(CmpOp::Ne, tag("!=")),
        value(CmpOp::Le, tag("<=")),
        value(CmpOp::Ge, tag(">=")),
        value(CmpOp::Lt, tag("<")),
        value(CmpOp::Gt, tag(">")),
        value(
            CmpOp::NotIn,
            tuple((keyword("not"), multispace1, keyword("in"))),
        ),
        value(CmpOp::In, keyword("in")),
    )))(input)
}

fn comparison(input: &str) -> Res<'_, Expr> {
    let (input, lhs) = primary(input)?;
    match opt(pair(cmp_op, primary))(input)? {
        (input, Some((op, rhs))) => Ok((input, Expr::Compare(Box::new(lhs), op, Box::new(rhs)))),
        (input, None) => Ok((input, lhs)),
    }
}

fn not_expr(input: &str) -> Res<'_, Expr> {
    alt((
        map(preceded(ws(keyword("not")), not_expr), |e| {
            Expr::Not(Box::new(e))
        }),
        comparison,
    ))(input)
}

fn and_expr(input: &str) -> Res<'_, Expr> {
    let (input, first) = not_expr(input)?;
    fold_many0(
        preceded(ws(keyword("and")), not_expr),
        move || first.clone(),
        |acc, rhs| Expr::And(Box::new(acc), Box::new(rhs)),
    )(input)
}

fn or_expr(input: &str) -> Res<'_, Expr> {
    let (input, first) = and_expr(input)?;
    fold_many0(
        preceded(ws(keyword("or")), and_expr),
        move || first.clone(),
        |acc, rhs| Expr::Or(Box::new(acc), Box::new(rhs)),
    )(input)
}

/// Parse a complete condition
pub fn parse(condition: &str) -> Result<Expr, String> {
    if condition.trim().is_empty() {
        return Err("empty condition".to_owned());
    }
    all_consuming(or_expr)(condition)
        .map(|(_, expr)| expr)
        .map_err(|err| match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                format!("unexpected input at {:?}", e.input)
            }
            nom::Err::Incomplete(_) => "incomplete expression".to_owned(),
        })
}

/// Truthiness of a context value
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Result<Ordering, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .ok_or_else(|| "numbers are not comparable".to_owned()),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(format!("cannot order {a} and {b}")),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, String> {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            other => Err(format!("'in <string>' requires a string, got {other}")),
        },
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            other => Err(format!("'in <map>' requires a string key, got {other}")),
        },
        other => Err(format!("{other} is not a container")),
    }
}

impl Expr {
    /// Evaluate against the context; unknown names are errors
    pub fn eval(&self, context: &Context) -> Result<Value, String> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Name(path) => {
                let mut segments = path.iter();
                let first = segments.next().map_or("", String::as_str);
                let mut current = context
                    .get(first)
                    .ok_or_else(|| format!("name '{first}' is not defined"))?;
                for segment in segments {
                    current = current
                        .get(segment)
                        .ok_or_else(|| format!("'{}' has no attribute '{segment}'", path.join(".")))?;
                }
                Ok(current.clone())
            }
            Self::List(items) => items
                .iter()
                .map(|item| item.eval(context))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.eval(context)?))),
            Self::And(lhs, rhs) => Ok(Value::Bool(
                is_truthy(&lhs.eval(context)?) && is_truthy(&rhs.eval(context)?),
            )),
            Self::Or(lhs, rhs) => Ok(Value::Bool(
                is_truthy(&lhs.eval(context)?) || is_truthy(&rhs.eval(context)?),
            )),
            Self::Compare(lhs, op, rhs) => {
                let (a, b) = (lhs.eval(context)?, rhs.eval(context)?);
                let result = match op {
                    CmpOp::Eq => loose_eq(&a, &b),
                    CmpOp::Ne => !loose_eq(&a, &b),
                    CmpOp::Lt => order(&a, &b)?.is_lt(),
                    CmpOp::Le => order(&a, &b)?.is_le(),
                    CmpOp::Gt => order(&a, &b)?.is_gt(),
                    CmpOp::Ge => order(&a, &b)?.is_ge(),
                    CmpOp::In => contains(&b, &a)?,
                    CmpOp::NotIn => !contains(&b, &a)?,
                };
                Ok(Value::Bool(result))
            }
        }
    }
}
