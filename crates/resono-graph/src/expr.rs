//! Disable-expression language and its evaluation environment.
//!
//! Plugins in a graph description may carry a boolean s-expression that
//! decides, against the current [`ExprEnv`], whether the plugin is disabled.
//! The language is deliberately tiny: variables, literals, `not`, `and`,
//! `or`, and `equal?`.
//!
//! ```text
//! disable = (not (equal? dsp_name "speaker_eq"))
//! disable = (or disable_drc (equal? display_rotation 2))
//! ```

use std::collections::HashMap;
use thiserror::Error;

/// A scalar value in the expression environment.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `#t` / `#f`.
    Boolean(bool),
    /// Signed integer literal or variable.
    Integer(i64),
    /// Double-quoted string literal or variable.
    Str(String),
}

impl Value {
    /// Boolean coercion: booleans as-is, integers are true when non-zero,
    /// strings are not coercible.
    fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Str(_) => None,
        }
    }
}

/// Errors from parsing or evaluating a disable expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    /// Syntax error at a byte position in the expression text.
    #[error("expression syntax error at byte {pos}: {message}")]
    Syntax {
        /// Byte offset of the error.
        pos: usize,
        /// What went wrong.
        message: String,
    },
    /// A variable was not present in the environment.
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    /// An operator received the wrong number of arguments.
    #[error("operator '{op}' expects {expected} argument(s), got {got}")]
    Arity {
        /// Operator name.
        op: &'static str,
        /// Required argument count description.
        expected: &'static str,
        /// Actual count.
        got: usize,
    },
    /// A value could not be used as a boolean.
    #[error("expression did not evaluate to a boolean")]
    NotBoolean,
}

/// A parsed disable expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Literal value.
    Literal(Value),
    /// Environment variable reference.
    Variable(String),
    /// `(not e)`.
    Not(Box<Expression>),
    /// `(and e…)` - true when all operands are true; true when empty.
    And(Vec<Expression>),
    /// `(or e…)` - true when any operand is true; false when empty.
    Or(Vec<Expression>),
    /// `(equal? a b)` - same type and same value.
    Equal(Box<Expression>, Box<Expression>),
}

impl Expression {
    /// Parses an expression from its textual form.
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let mut parser = Parser {
            input: text.as_bytes(),
            pos: 0,
        };
        let expr = parser.parse_expression()?;
        parser.skip_ws();
        if parser.pos != parser.input.len() {
            return Err(ExprError::Syntax {
                pos: parser.pos,
                message: "trailing input after expression".into(),
            });
        }
        Ok(expr)
    }

    /// Evaluates against an environment.
    pub fn eval(&self, env: &ExprEnv) -> Result<Value, ExprError> {
        match self {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::Variable(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::UndefinedVariable(name.clone())),
            Expression::Not(inner) => {
                let v = inner.eval(env)?.as_boolean().ok_or(ExprError::NotBoolean)?;
                Ok(Value::Boolean(!v))
            }
            Expression::And(operands) => {
                for operand in operands {
                    let v = operand.eval(env)?.as_boolean().ok_or(ExprError::NotBoolean)?;
                    if !v {
                        return Ok(Value::Boolean(false));
                    }
                }
                Ok(Value::Boolean(true))
            }
            Expression::Or(operands) => {
                for operand in operands {
                    let v = operand.eval(env)?.as_boolean().ok_or(ExprError::NotBoolean)?;
                    if v {
                        return Ok(Value::Boolean(true));
                    }
                }
                Ok(Value::Boolean(false))
            }
            Expression::Equal(a, b) => {
                let va = a.eval(env)?;
                let vb = b.eval(env)?;
                Ok(Value::Boolean(va == vb))
            }
        }
    }

    /// Evaluates and coerces the result to a boolean.
    pub fn eval_boolean(&self, env: &ExprEnv) -> Result<bool, ExprError> {
        self.eval(env)?.as_boolean().ok_or(ExprError::NotBoolean)
    }
}

/// Recursive descent parser for the s-expression syntax. LL(1), byte
/// oriented; all meaningful input is ASCII.
struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn parse_expression(&mut self) -> Result<Expression, ExprError> {
        self.skip_ws();
        match self.peek() {
            None => Err(ExprError::Syntax {
                pos: self.pos,
                message: "empty expression".into(),
            }),
            Some(b'(') => self.parse_form(),
            Some(b'"') => self.parse_string(),
            Some(b'#') => self.parse_boolean(),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.parse_integer(),
            Some(_) => self.parse_variable(),
        }
    }

    fn parse_form(&mut self) -> Result<Expression, ExprError> {
        let open = self.pos;
        self.pos += 1; // consume '('
        self.skip_ws();
        let op = self.parse_symbol()?;

        let mut operands = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => operands.push(self.parse_expression()?),
                None => {
                    return Err(ExprError::Syntax {
                        pos: open,
                        message: "unclosed form".into(),
                    });
                }
            }
        }

        match op.as_str() {
            "not" => {
                if operands.len() != 1 {
                    return Err(ExprError::Arity {
                        op: "not",
                        expected: "exactly 1",
                        got: operands.len(),
                    });
                }
                Ok(Expression::Not(Box::new(operands.remove(0))))
            }
            "and" => Ok(Expression::And(operands)),
            "or" => Ok(Expression::Or(operands)),
            "equal?" => {
                if operands.len() != 2 {
                    return Err(ExprError::Arity {
                        op: "equal?",
                        expected: "exactly 2",
                        got: operands.len(),
                    });
                }
                let a = operands.remove(0);
                let b = operands.remove(0);
                Ok(Expression::Equal(Box::new(a), Box::new(b)))
            }
            other => Err(ExprError::Syntax {
                pos: open,
                message: format!("unknown operator '{other}'"),
            }),
        }
    }

    fn parse_symbol(&mut self) -> Result<String, ExprError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() || c == b'(' || c == b')' {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(ExprError::Syntax {
                pos: start,
                message: "expected symbol".into(),
            });
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn parse_variable(&mut self) -> Result<Expression, ExprError> {
        Ok(Expression::Variable(self.parse_symbol()?))
    }

    fn parse_boolean(&mut self) -> Result<Expression, ExprError> {
        let start = self.pos;
        let sym = self.parse_symbol()?;
        match sym.as_str() {
            "#t" => Ok(Expression::Literal(Value::Boolean(true))),
            "#f" => Ok(Expression::Literal(Value::Boolean(false))),
            other => Err(ExprError::Syntax {
                pos: start,
                message: format!("unknown literal '{other}'"),
            }),
        }
    }

    fn parse_integer(&mut self) -> Result<Expression, ExprError> {
        let start = self.pos;
        let sym = self.parse_symbol()?;
        sym.parse::<i64>()
            .map(|i| Expression::Literal(Value::Integer(i)))
            .map_err(|_| ExprError::Syntax {
                pos: start,
                message: format!("invalid integer '{sym}'"),
            })
    }

    fn parse_string(&mut self) -> Result<Expression, ExprError> {
        let open = self.pos;
        self.pos += 1; // consume opening quote
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'"' {
                let s = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
                self.pos += 1;
                return Ok(Expression::Literal(Value::Str(s)));
            }
            self.pos += 1;
        }
        Err(ExprError::Syntax {
            pos: open,
            message: "unterminated string".into(),
        })
    }
}

/// Named scalar environment the disable expressions evaluate against.
///
/// The environment is owned by the main thread; pipelines are rebuilt when
/// it changes, so evaluation never races with audio processing.
#[derive(Debug, Clone, Default)]
pub struct ExprEnv {
    vars: HashMap<String, Value>,
}

impl ExprEnv {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an environment with the standard server preset.
    pub fn standard() -> Self {
        let mut env = Self::new();
        env.set_boolean("disable_eq", false);
        env.set_boolean("disable_drc", false);
        env.set_string("dsp_name", "");
        env.set_boolean("swap_lr_disabled", true);
        env.set_integer("display_rotation", 0);
        env
    }

    /// Sets a boolean variable.
    pub fn set_boolean(&mut self, name: &str, value: bool) {
        self.vars.insert(name.to_string(), Value::Boolean(value));
    }

    /// Sets an integer variable.
    pub fn set_integer(&mut self, name: &str, value: i64) {
        self.vars.insert(name.to_string(), Value::Integer(value));
    }

    /// Sets a string variable.
    pub fn set_string(&mut self, name: &str, value: &str) {
        self.vars
            .insert(name.to_string(), Value::Str(value.to_string()));
    }

    /// Looks up a variable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}
