//! Default expression evaluator.
//!
//! A small expression language over the session data model, used when the
//! host does not embed a real scripting engine:
//!
//! - `field.nested` - data-model access (`_event.data.x` works the same way)
//! - literals: numbers, `'strings'` / `"strings"`, `true`, `false`, `null`
//! - `==` `!=` `>` `>=` `<` `<=` - comparison
//! - `+` `-` - numeric arithmetic
//! - `!expr`, `expr && expr`, `expr || expr`, `(expr)` - boolean logic
//!
//! Conditions use truthiness: `null`, `false`, `0`, `""`, `[]`, and `{}`
//! are false, everything else is true. Scripts are `;`-separated
//! statements; a statement of the form `location = expr` assigns into the
//! data model.

use crate::capabilities::{EvalError, Evaluator};
use crate::datamodel::DataModel;
use serde_json::Value;

/// Evaluator implementation backing [`Capabilities::default`].
///
/// [`Capabilities::default`]: crate::capabilities::Capabilities
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEvaluator;

impl Evaluator for DefaultEvaluator {
    fn evaluate_condition(&self, expr: &str, data: &DataModel) -> Result<bool, EvalError> {
        let value = Expr::parse(expr)?.eval(data)?;
        Ok(is_truthy(&value))
    }

    fn evaluate_value(&self, expr: &str, data: &DataModel) -> Result<Value, EvalError> {
        Expr::parse(expr)?.eval(data)
    }

    fn execute_script(&self, src: &str, data: &mut DataModel) -> Result<(), EvalError> {
        for statement in src.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            match split_assignment(statement) {
                Some((location, expr)) => {
                    let value = Expr::parse(expr)?.eval(data)?;
                    data.set(location, value).map_err(EvalError::Type)?;
                }
                None => {
                    Expr::parse(statement)?.eval(data)?;
                }
            }
        }
        Ok(())
    }
}

/// Splits `location = expr` statements, leaving `==`/`!=`/`>=`/`<=` alone.
fn split_assignment(statement: &str) -> Option<(&str, &str)> {
    let bytes = statement.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        let prev = i.checked_sub(1).map(|p| bytes[p]);
        let next = bytes.get(i + 1);
        if matches!(prev, Some(b'!' | b'<' | b'>' | b'=')) || next == Some(&b'=') {
            return None;
        }
        let location = statement[..i].trim();
        let valid_path = !location.is_empty()
            && location
                .split('.')
                .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_'));
        if !valid_path {
            return None;
        }
        return Some((location, statement[i + 1..].trim()));
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Expr {
    fn parse(input: &str) -> Result<Self, EvalError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EvalError::Parse("empty expression".to_string()));
        }
        let mut parser = Parser::new(input);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos != parser.input.len() {
            return Err(EvalError::Parse(format!(
                "unexpected input at position {}",
                parser.pos
            )));
        }
        Ok(expr)
    }

    fn eval(&self, data: &DataModel) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(p) => Ok(data.get(p)),
            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.eval(data)?))),
            Expr::Neg(inner) => {
                let v = inner.eval(data)?;
                let n = as_f64(&v)
                    .ok_or_else(|| EvalError::Type(format!("cannot negate {}", type_name(&v))))?;
                Ok(number(-n))
            }
            Expr::And(l, r) => {
                if !is_truthy(&l.eval(data)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&r.eval(data)?)))
            }
            Expr::Or(l, r) => {
                if is_truthy(&l.eval(data)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&r.eval(data)?)))
            }
            Expr::Cmp(op, l, r) => compare(*op, &l.eval(data)?, &r.eval(data)?),
            Expr::Add(l, r) => arithmetic(&l.eval(data)?, &r.eval(data)?, "+", |a, b| a + b),
            Expr::Sub(l, r) => arithmetic(&l.eval(data)?, &r.eval(data)?, "-", |a, b| a - b),
        }
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    let result = match op {
        CmpOp::Eq => values_equal(a, b),
        CmpOp::Ne => !values_equal(a, b),
        CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => {
            let ordering = match (a, b) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    let (a, b) = match (as_f64(a), as_f64(b)) {
                        (Some(a), Some(b)) => (a, b),
                        _ => {
                            return Err(EvalError::Type(format!(
                                "cannot order {} and {}",
                                type_name(a),
                                type_name(b)
                            )))
                        }
                    };
                    a.partial_cmp(&b).ok_or_else(|| {
                        EvalError::Type("cannot order NaN".to_string())
                    })?
                }
            };
            match op {
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                _ => unreachable!(),
            }
        }
    };
    Ok(Value::Bool(result))
}

fn arithmetic(
    a: &Value,
    b: &Value,
    op: &str,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (as_f64(a), as_f64(b)) {
        (Some(a), Some(b)) => Ok(number(f(a, b))),
        _ => Err(EvalError::Type(format!(
            "'{}' needs numbers, got {} and {}",
            op,
            type_name(a),
            type_name(b)
        ))),
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Recursive descent parser.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();
        while self.peek_str("||") {
            self.pos += 2;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_cmp()?;
        self.skip_whitespace();
        while self.peek_str("&&") {
            self.pos += 2;
            let right = self.parse_cmp()?;
            left = Expr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, EvalError> {
        let left = self.parse_additive()?;
        self.skip_whitespace();
        let ops = [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            (">=", CmpOp::Ge),
            ("<=", CmpOp::Le),
            (">", CmpOp::Gt),
            ("<", CmpOp::Lt),
        ];
        for (text, op) in ops {
            if self.peek_str(text) {
                self.pos += text.len();
                let right = self.parse_additive()?;
                return Ok(Expr::Cmp(op, Box::new(left), Box::new(right)));
            }
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            if self.peek_str("+") {
                self.pos += 1;
                let right = self.parse_unary()?;
                left = Expr::Add(Box::new(left), Box::new(right));
            } else if self.peek_str("-") {
                self.pos += 1;
                let right = self.parse_unary()?;
                left = Expr::Sub(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        self.skip_whitespace();
        if self.peek_str("!") && !self.peek_str("!=") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.peek_str("-") {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        self.skip_whitespace();
        let Some(c) = self.peek_char() else {
            return Err(EvalError::Parse("unexpected end of expression".to_string()));
        };

        if c == '(' {
            self.pos += 1;
            let inner = self.parse_expr()?;
            self.skip_whitespace();
            if !self.peek_str(")") {
                return Err(EvalError::Parse(format!(
                    "expected ')' at position {}",
                    self.pos
                )));
            }
            self.pos += 1;
            return Ok(inner);
        }

        if c == '\'' || c == '"' {
            return self.parse_string(c);
        }

        if c.is_ascii_digit() {
            return self.parse_number();
        }

        if c.is_alphabetic() || c == '_' {
            return self.parse_path();
        }

        Err(EvalError::Parse(format!(
            "unexpected character '{}' at position {}",
            c, self.pos
        )))
    }

    fn parse_string(&mut self, quote: char) -> Result<Expr, EvalError> {
        let start = self.pos + quote.len_utf8();
        let rest = &self.input[start..];
        match rest.find(quote) {
            Some(end) => {
                let text = rest[..end].to_string();
                self.pos = start + end + quote.len_utf8();
                Ok(Expr::Literal(Value::String(text)))
            }
            None => Err(EvalError::Parse(format!(
                "unterminated string at position {}",
                self.pos
            ))),
        }
    }

    fn parse_number(&mut self) -> Result<Expr, EvalError> {
        let start = self.pos;
        let mut end = self.pos;
        let mut saw_dot = false;
        for (i, c) in self.input[start..].char_indices() {
            if c.is_ascii_digit() {
                end = start + i + 1;
            } else if c == '.' && !saw_dot {
                // Only part of the number when a digit follows.
                let next = self.input[start + i + 1..].chars().next();
                if !matches!(next, Some(d) if d.is_ascii_digit()) {
                    break;
                }
                saw_dot = true;
                end = start + i + 1;
            } else {
                break;
            }
        }
        let text = &self.input[start..end];
        self.pos = end;
        if saw_dot {
            let n: f64 = text
                .parse()
                .map_err(|_| EvalError::Parse(format!("invalid number '{}'", text)))?;
            Ok(Expr::Literal(number(n)))
        } else {
            let n: i64 = text
                .parse()
                .map_err(|_| EvalError::Parse(format!("invalid number '{}'", text)))?;
            Ok(Expr::Literal(Value::from(n)))
        }
    }

    fn parse_path(&mut self) -> Result<Expr, EvalError> {
        let start = self.pos;
        let mut end = self.pos;
        let mut prev_was_dot = true;
        for (i, c) in self.input[start..].char_indices() {
            let ok = if prev_was_dot {
                c.is_alphabetic() || c == '_'
            } else {
                c.is_alphanumeric() || c == '_' || c == '.'
            };
            if !ok {
                break;
            }
            prev_was_dot = c == '.';
            end = start + i + c.len_utf8();
        }
        let mut text = &self.input[start..end];
        // A trailing dot belongs to the surrounding syntax, not the path.
        if text.ends_with('.') {
            text = &text[..text.len() - 1];
            end -= 1;
        }
        self.pos = end;

        match text {
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "null" => Ok(Expr::Literal(Value::Null)),
            _ => Ok(Expr::Path(text.to_string())),
        }
    }

    fn skip_whitespace(&mut self) {
        while self
            .peek_char()
            .map(|c| c.is_whitespace())
            .unwrap_or(false)
        {
            self.pos += 1;
        }
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> DataModel {
        let mut dm = DataModel::new();
        dm.declare("count", json!(3));
        dm.declare("name", json!("ada"));
        dm.declare("enabled", json!(true));
        dm.declare("limits", json!({"max": 10, "min": 2}));
        dm
    }

    fn eval(expr: &str) -> Value {
        DefaultEvaluator.evaluate_value(expr, &data()).unwrap()
    }

    fn cond(expr: &str) -> bool {
        DefaultEvaluator.evaluate_condition(expr, &data()).unwrap()
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("42"), json!(42));
        assert_eq!(eval("2.5"), json!(2.5));
        assert_eq!(eval("'hi'"), json!("hi"));
        assert_eq!(eval("\"hi\""), json!("hi"));
        assert_eq!(eval("true"), json!(true));
        assert_eq!(eval("null"), json!(null));
    }

    #[test]
    fn test_paths() {
        assert_eq!(eval("count"), json!(3));
        assert_eq!(eval("limits.max"), json!(10));
        assert_eq!(eval("limits.missing"), json!(null));
        assert_eq!(eval("unknown"), json!(null));
    }

    #[test]
    fn test_comparison() {
        assert!(cond("count == 3"));
        assert!(cond("count != 4"));
        assert!(cond("count >= 3"));
        assert!(cond("limits.max > limits.min"));
        assert!(cond("name == 'ada'"));
        assert!(cond("name < 'bob'"));
        assert!(!cond("count > limits.max"));
    }

    #[test]
    fn test_logic_and_grouping() {
        assert!(cond("enabled && count > 1"));
        assert!(cond("!enabled || count == 3"));
        assert!(cond("(count > 5 || enabled) && true"));
        assert!(!cond("!enabled"));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("count + 1"), json!(4));
        assert_eq!(eval("limits.max - limits.min"), json!(8));
        assert_eq!(eval("-count"), json!(-3));
        assert_eq!(eval("1 + 2 - 4"), json!(-1));
    }

    #[test]
    fn test_truthiness() {
        assert!(!cond("unknown"));
        assert!(!cond("0"));
        assert!(!cond("''"));
        assert!(cond("'x'"));
        assert!(cond("limits"));
    }

    #[test]
    fn test_parse_errors() {
        let dm = data();
        assert!(matches!(
            DefaultEvaluator.evaluate_value("count +", &dm),
            Err(EvalError::Parse(_))
        ));
        assert!(matches!(
            DefaultEvaluator.evaluate_value("(count", &dm),
            Err(EvalError::Parse(_))
        ));
        assert!(matches!(
            DefaultEvaluator.evaluate_value("'open", &dm),
            Err(EvalError::Parse(_))
        ));
        assert!(matches!(
            DefaultEvaluator.evaluate_value("count ? 1", &dm),
            Err(EvalError::Parse(_))
        ));
    }

    #[test]
    fn test_type_errors() {
        let dm = data();
        assert!(matches!(
            DefaultEvaluator.evaluate_value("name + 1", &dm),
            Err(EvalError::Type(_))
        ));
        assert!(matches!(
            DefaultEvaluator.evaluate_value("limits > 1", &dm),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn test_scripts_assign() {
        let mut dm = data();
        DefaultEvaluator
            .execute_script("count = count + 1; limits.max = 20", &mut dm)
            .unwrap();
        assert_eq!(dm.get("count"), json!(4));
        assert_eq!(dm.get("limits.max"), json!(20));
    }

    #[test]
    fn test_script_equality_is_not_assignment() {
        let mut dm = data();
        DefaultEvaluator
            .execute_script("count == 3", &mut dm)
            .unwrap();
        assert_eq!(dm.get("count"), json!(3));
    }
}
