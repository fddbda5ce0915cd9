//! Calculator skill served by the Capability Provider.
//!
//! Pulls the first arithmetic expression out of free text ("What is
//! 384 * 35?") and evaluates it with the usual precedence: unary minus,
//! `^` (right associative), `* / %`, then `+ -`, with parentheses.

use crate::a2a::types::AgentSkill;
use crate::error::SkillError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

/// A skill the provider can execute on a request's text.
#[async_trait]
pub trait Skill: Send + Sync {
    fn descriptor(&self) -> AgentSkill;

    async fn execute(&self, input: &str) -> Result<String, SkillError>;
}

static EXPRESSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+(]*\s*\d[\d,.\s+\-*/%^()x×÷]*").expect("static regex"));

pub struct Calculator;

#[async_trait]
impl Skill for Calculator {
    fn descriptor(&self) -> AgentSkill {
        AgentSkill {
            id: "calculate".to_string(),
            name: "Calculator".to_string(),
            description: "Evaluates arithmetic expressions with + - * / % ^ and parentheses."
                .to_string(),
            tags: vec!["math".to_string(), "arithmetic".to_string()],
            examples: vec!["384 * 35".to_string(), "What is (12 + 4) / 8?".to_string()],
            input_modes: vec!["text".to_string()],
            output_modes: vec!["text".to_string()],
        }
    }

    async fn execute(&self, input: &str) -> Result<String, SkillError> {
        let value = evaluate(&extract_expression(input)?)?;
        Ok(format_number(value))
    }
}

/// Find the arithmetic expression inside free text.
pub fn extract_expression(input: &str) -> Result<String, SkillError> {
    let found = EXPRESSION
        .find(input)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .ok_or(SkillError::EmptyInput)?;

    // Thousands separators and alternative operator glyphs.
    Ok(found
        .replace(',', "")
        .replace(['x', '×'], "*")
        .replace('÷', "/"))
}

pub fn evaluate(expr: &str) -> Result<f64, SkillError> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(SkillError::Parse(format!(
            "unexpected {:?}",
            parser.tokens[parser.pos]
        )));
    }
    if !value.is_finite() {
        return Err(SkillError::NonFinite);
    }
    Ok(value)
}

/// Integers print without a fractional part; everything else trims zeros.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let s = format!("{:.10}", value);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, SkillError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut num = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = num
                    .parse::<f64>()
                    .map_err(|_| SkillError::Parse(format!("bad number {:?}", num)))?;
                tokens.push(Token::Num(n));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            other => return Err(SkillError::Parse(format!("unexpected character {:?}", other))),
        }
    }

    if tokens.is_empty() {
        return Err(SkillError::EmptyInput);
    }
    Ok(tokens)
}

/// Deepest nesting of unary signs, exponents and parentheses accepted.
const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, SkillError> {
        let mut acc = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, SkillError> {
        let mut acc = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = match op {
                '*' => acc * rhs,
                _ if rhs == 0.0 => return Err(SkillError::DivisionByZero),
                '/' => acc / rhs,
                _ => acc % rhs,
            };
        }
        Ok(acc)
    }

    // Every recursive path (signs, `^`, parentheses) passes through here.
    fn unary(&mut self) -> Result<f64, SkillError> {
        if self.depth >= MAX_DEPTH {
            return Err(SkillError::Parse("expression nested too deeply".to_string()));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    // unary := ('-' | '+') unary | power
    fn signed(&mut self) -> Result<f64, SkillError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power := atom ('^' unary)?
    fn power(&mut self) -> Result<f64, SkillError> {
        let base = self.atom()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exp = self.unary()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, SkillError> {
        match self.bump() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let v = self.expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err(SkillError::Parse("missing closing parenthesis".to_string())),
                }
            }
            Some(t) => Err(SkillError::Parse(format!("unexpected {:?}", t))),
            None => Err(SkillError::Parse("unexpected end of expression".to_string())),
        }
    }
}
