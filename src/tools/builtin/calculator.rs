//! Arithmetic calculator tool.
//!
//! Evaluates infix expressions with `+ - * / %`, parentheses, and unary
//! minus. Used by agents that need exact arithmetic instead of asking the
//! model to do math.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::Result;
use crate::tools::base::{Tool, ToolCallContext, ToolDefinition, ToolParameter, ToolResult};
use crate::tools::types::{ParameterType, ToolType};

/// Calculator over infix arithmetic expressions.
pub struct CalculatorTool {
    definition: ToolDefinition,
}

impl CalculatorTool {
    pub fn new() -> Self {
        let definition = ToolDefinition::new(
            "calculator",
            ToolType::Function,
            "Evaluate an arithmetic expression and return its value",
            vec![ToolParameter::required(
                "expression",
                ParameterType::String,
                "Infix arithmetic expression, e.g. '5 + 3' or '(2 + 3) * 4'",
            )],
            5_000,
        )
        .expect("calculator definition is valid");
        Self { definition }
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        _context: &ToolCallContext,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolResult> {
        let expression = arguments
            .get("expression")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let started = std::time::Instant::now();
        match evaluate(expression) {
            Ok(value) => {
                let mut fields = HashMap::new();
                // Integral results render without a trailing ".0" so the
                // observation reads naturally ("8" rather than "8.0").
                let rendered = if value.fract() == 0.0 && value.abs() < 1e15 {
                    format!("{}", value as i64)
                } else {
                    format!("{}", value)
                };
                fields.insert("value".to_string(), json!(rendered));
                Ok(ToolResult::ok(
                    fields,
                    started.elapsed().as_millis() as u64,
                ))
            }
            Err(message) => Ok(ToolResult::failed(
                format!("invalid expression '{}': {}", expression, message),
                started.elapsed().as_millis() as u64,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Expression evaluation (recursive descent)
// ---------------------------------------------------------------------------

struct Parser<'a> {
    input: &'a [u8],
    position: usize,
}

fn evaluate(expression: &str) -> std::result::Result<f64, String> {
    let mut parser = Parser {
        input: expression.as_bytes(),
        position: 0,
    };
    let value = parser.expression()?;
    parser.skip_whitespace();
    if parser.position != parser.input.len() {
        return Err(format!("unexpected input at offset {}", parser.position));
    }
    Ok(value)
}

impl<'a> Parser<'a> {
    fn skip_whitespace(&mut self) {
        while self.position < self.input.len() && self.input[self.position].is_ascii_whitespace() {
            self.position += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_whitespace();
        self.input.get(self.position).copied()
    }

    fn expression(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                b'+' => {
                    self.position += 1;
                    value += self.term()?;
                }
                b'-' => {
                    self.position += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                b'*' => {
                    self.position += 1;
                    value *= self.factor()?;
                }
                b'/' => {
                    self.position += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    value /= divisor;
                }
                b'%' => {
                    self.position += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("modulo by zero".to_string());
                    }
                    value %= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> std::result::Result<f64, String> {
        match self.peek() {
            Some(b'-') => {
                self.position += 1;
                Ok(-self.factor()?)
            }
            Some(b'(') => {
                self.position += 1;
                let value = self.expression()?;
                if self.peek() != Some(b')') {
                    return Err("missing closing parenthesis".to_string());
                }
                self.position += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) => Err(format!("unexpected character '{}'", c as char)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn number(&mut self) -> std::result::Result<f64, String> {
        let start = self.position;
        while self.position < self.input.len()
            && (self.input[self.position].is_ascii_digit() || self.input[self.position] == b'.')
        {
            self.position += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.position])
            .map_err(|_| "invalid number".to_string())?;
        text.parse::<f64>().map_err(|e| e.to_string())
    }
}
