/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Message selectors: a small SQL-like predicate language over string
//! message properties.
//!
//! Supported forms are `prop = 'v'`, `prop <> 'v'`, `prop IS [NOT] NULL`,
//! `prop [NOT] IN ('a', 'b')`, `prop [NOT] LIKE 'a%_' [ESCAPE '\']`, combined
//! with `AND`, `OR`, `NOT` and parentheses. Keywords are case-insensitive.
//! Numeric literals compare numerically against properties that parse as
//! numbers.
//!
//! Evaluation is three-valued: a comparison against a missing property is
//! unknown, and a message is selected only when the whole expression is true.

use bus_common::BusError;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq)]
enum Literal {
    Text(String),
    Number(f64),
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Equals {
        property: String,
        value: Literal,
        negated: bool,
    },
    IsNull {
        property: String,
        negated: bool,
    },
    In {
        property: String,
        values: Vec<Literal>,
        negated: bool,
    },
    Like {
        property: String,
        pattern: Vec<PatternToken>,
        negated: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
enum PatternToken {
    Literal(char),
    AnyOne,
    AnyMany,
}

/// A parsed selector.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    source: String,
    expr: Expr,
}

impl Selector {
    /// Parses `source`. Blank input is not a selector; callers treat it as
    /// "match everything" before getting here.
    pub fn parse(source: &str) -> Result<Self, BusError> {
        let tokens = tokenize(source).map_err(|reason| invalid(source, &reason))?;
        let mut parser = Parser { tokens, position: 0 };
        let expr = parser
            .parse_or()
            .and_then(|expr| match parser.peek() {
                None => Ok(expr),
                Some(token) => Err(format!("unexpected {token}")),
            })
            .map_err(|reason| invalid(source, &reason))?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, properties: &HashMap<String, String>) -> bool {
        evaluate(&self.expr, properties) == Some(true)
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn invalid(source: &str, reason: &str) -> BusError {
    BusError::InvalidArgument(format!("invalid selector {source:?}: {reason}"))
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Text(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
    Eq,
    NotEq,
    And,
    Or,
    Not,
    Is,
    Null,
    In,
    Like,
    Escape,
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier {name}"),
            Token::Text(text) => write!(f, "string '{text}'"),
            Token::Number(number) => write!(f, "number {number}"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::Eq => f.write_str("'='"),
            Token::NotEq => f.write_str("'<>'"),
            Token::And => f.write_str("AND"),
            Token::Or => f.write_str("OR"),
            Token::Not => f.write_str("NOT"),
            Token::Is => f.write_str("IS"),
            Token::Null => f.write_str("NULL"),
            Token::In => f.write_str("IN"),
            Token::Like => f.write_str("LIKE"),
            Token::Escape => f.write_str("ESCAPE"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            text.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| format!("malformed number {literal}"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '.'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(keyword(&word).unwrap_or(Token::Ident(word)));
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }

    Ok(tokens)
}

fn keyword(word: &str) -> Option<Token> {
    let token = match word.to_ascii_uppercase().as_str() {
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        "IS" => Token::Is,
        "NULL" => Token::Null,
        "IN" => Token::In,
        "LIKE" => Token::Like,
        "ESCAPE" => Token::Escape,
        _ => return None,
    };
    Some(token)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.next() {
            Some(token) if &token == expected => Ok(()),
            Some(token) => Err(format!("expected {expected}, found {token}")),
            None => Err(format!("expected {expected}, found end of input")),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, String> {
        let property = match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                return Ok(inner);
            }
            Some(Token::Ident(property)) => property,
            Some(token) => return Err(format!("expected a property name, found {token}")),
            None => return Err("expected a property name, found end of input".to_string()),
        };

        match self.next() {
            Some(Token::Eq) => Ok(Expr::Equals {
                property,
                value: self.parse_literal()?,
                negated: false,
            }),
            Some(Token::NotEq) => Ok(Expr::Equals {
                property,
                value: self.parse_literal()?,
                negated: true,
            }),
            Some(Token::Is) => {
                let negated = self.eat(&Token::Not);
                self.expect(&Token::Null)?;
                Ok(Expr::IsNull { property, negated })
            }
            Some(Token::Not) => match self.next() {
                Some(Token::In) => self.parse_in(property, true),
                Some(Token::Like) => self.parse_like(property, true),
                Some(token) => Err(format!("expected IN or LIKE after NOT, found {token}")),
                None => Err("expected IN or LIKE after NOT, found end of input".to_string()),
            },
            Some(Token::In) => self.parse_in(property, false),
            Some(Token::Like) => self.parse_like(property, false),
            Some(token) => Err(format!("expected an operator after {property}, found {token}")),
            None => Err(format!("expected an operator after {property}")),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, String> {
        match self.next() {
            Some(Token::Text(text)) => Ok(Literal::Text(text)),
            Some(Token::Number(number)) => Ok(Literal::Number(number)),
            Some(token) => Err(format!("expected a literal, found {token}")),
            None => Err("expected a literal, found end of input".to_string()),
        }
    }

    fn parse_in(&mut self, property: String, negated: bool) -> Result<Expr, String> {
        self.expect(&Token::LParen)?;
        let mut values = vec![self.parse_literal()?];
        while self.eat(&Token::Comma) {
            values.push(self.parse_literal()?);
        }
        self.expect(&Token::RParen)?;
        Ok(Expr::In {
            property,
            values,
            negated,
        })
    }

    fn parse_like(&mut self, property: String, negated: bool) -> Result<Expr, String> {
        let pattern = match self.next() {
            Some(Token::Text(pattern)) => pattern,
            Some(token) => return Err(format!("LIKE needs a string pattern, found {token}")),
            None => return Err("LIKE needs a string pattern".to_string()),
        };

        let escape = if self.eat(&Token::Escape) {
            match self.next() {
                Some(Token::Text(escape)) if escape.chars().count() == 1 => escape.chars().next(),
                _ => return Err("ESCAPE needs a single character string".to_string()),
            }
        } else {
            None
        };

        Ok(Expr::Like {
            property,
            pattern: compile_pattern(&pattern, escape)?,
            negated,
        })
    }
}

fn compile_pattern(pattern: &str, escape: Option<char>) -> Result<Vec<PatternToken>, String> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            match chars.next() {
                Some(escaped) => tokens.push(PatternToken::Literal(escaped)),
                None => return Err("pattern ends with the escape character".to_string()),
            }
            continue;
        }
        tokens.push(match c {
            '%' => PatternToken::AnyMany,
            '_' => PatternToken::AnyOne,
            other => PatternToken::Literal(other),
        });
    }
    Ok(tokens)
}

fn like(value: &[char], pattern: &[PatternToken]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some((PatternToken::AnyMany, rest)) => {
            (0..=value.len()).any(|skip| like(&value[skip..], rest))
        }
        Some((PatternToken::AnyOne, rest)) => !value.is_empty() && like(&value[1..], rest),
        Some((PatternToken::Literal(expected), rest)) => {
            value.first() == Some(expected) && like(&value[1..], rest)
        }
    }
}

fn literal_equals(value: &str, literal: &Literal) -> Option<bool> {
    match literal {
        Literal::Text(text) => Some(value == text),
        Literal::Number(number) => value.trim().parse::<f64>().ok().map(|parsed| parsed == *number),
    }
}

fn negate_if(result: Option<bool>, negated: bool) -> Option<bool> {
    result.map(|value| value != negated)
}

fn evaluate(expr: &Expr, properties: &HashMap<String, String>) -> Option<bool> {
    match expr {
        Expr::And(left, right) => match (evaluate(left, properties), evaluate(right, properties)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Expr::Or(left, right) => match (evaluate(left, properties), evaluate(right, properties)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Expr::Not(inner) => evaluate(inner, properties).map(|value| !value),
        Expr::Equals {
            property,
            value,
            negated,
        } => negate_if(
            properties
                .get(property)
                .and_then(|actual| literal_equals(actual, value)),
            *negated,
        ),
        Expr::IsNull { property, negated } => {
            Some(properties.contains_key(property) == *negated)
        }
        Expr::In {
            property,
            values,
            negated,
        } => negate_if(
            properties.get(property).map(|actual| {
                values
                    .iter()
                    .any(|value| literal_equals(actual, value) == Some(true))
            }),
            *negated,
        ),
        Expr::Like {
            property,
            pattern,
            negated,
        } => negate_if(
            properties.get(property).map(|actual| {
                let chars: Vec<char> = actual.chars().collect();
                like(&chars, pattern)
            }),
            *negated,
        ),
    }
}
