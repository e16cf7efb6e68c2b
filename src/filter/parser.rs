//! Service filter expression parser.
//!
//! Parses filter expressions into an AST.

use super::FilterError;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal (`==` or `=`)
    Eq,
    /// Not equal (`!=`)
    Ne,
}

/// A field of a Kubernetes `Service` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// `metadata.name`
    Name,
    /// `metadata.namespace`
    Namespace,
    /// `metadata.labels['key']`
    Label(String),
    /// `metadata.annotations['key']`
    Annotation(String),
    /// `metadata.labels.containsKey('key')`
    HasLabel(String),
    /// `metadata.annotations.containsKey('key')`
    HasAnnotation(String),
}

/// An operand: a field reference or a string literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Field reference
    Field(Field),
    /// String literal
    String(String),
}

/// Parsed filter expression AST node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// `true` or `false`
    Literal(bool),
    /// A bare operand, interpreted as a boolean
    Operand(Operand),
    /// Comparison: operand op operand
    Comparison {
        /// Left-hand side
        left: Operand,
        /// Operator
        op: Operator,
        /// Right-hand side
        right: Operand,
    },
    /// Logical AND
    And(Box<Expression>, Box<Expression>),
    /// Logical OR
    Or(Box<Expression>, Box<Expression>),
    /// Logical NOT
    Not(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    String(String),
    Operator(Operator),
    And,
    Or,
    Not,
    True,
    False,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.next_char();
        }
    }

    fn error(&self, message: impl Into<String>) -> FilterError {
        FilterError::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.pos;
        while self
            .peek_char()
            .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
        {
            self.next_char();
        }
        self.input[start..self.pos].to_string()
    }

    /// Reads a quoted string. A doubled quote inside the string is a literal quote.
    fn read_string(&mut self, quote: char) -> Result<String, FilterError> {
        let start = self.pos;
        self.next_char();
        let mut value = String::new();

        while let Some(ch) = self.next_char() {
            if ch == quote {
                if self.peek_char() == Some(quote) {
                    self.next_char();
                    value.push(quote);
                    continue;
                }
                return Ok(value);
            }
            value.push(ch);
        }

        Err(FilterError::Parse {
            position: start,
            message: "unterminated string".to_string(),
        })
    }

    fn expect_char(&mut self, expected: char, token: Token) -> Result<Token, FilterError> {
        if self.peek_char() == Some(expected) {
            self.next_char();
            return Ok(token);
        }
        Err(self.error(format!("expected '{expected}'")))
    }

    fn next_token(&mut self) -> Result<(usize, Token), FilterError> {
        self.skip_whitespace();
        let start = self.pos;

        let Some(ch) = self.peek_char() else {
            return Ok((start, Token::Eof));
        };

        let token = match ch {
            '(' | ')' | '[' | ']' | '.' => {
                self.next_char();
                match ch {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    _ => Token::Dot,
                }
            }
            '=' => {
                self.next_char();
                if self.peek_char() == Some('=') {
                    self.next_char();
                }
                Token::Operator(Operator::Eq)
            }
            '!' => {
                self.next_char();
                if self.peek_char() == Some('=') {
                    self.next_char();
                    Token::Operator(Operator::Ne)
                } else {
                    Token::Not
                }
            }
            '&' => {
                self.next_char();
                self.expect_char('&', Token::And)?
            }
            '|' => {
                self.next_char();
                self.expect_char('|', Token::Or)?
            }
            '\'' | '"' => Token::String(self.read_string(ch)?),
            c if c.is_alphabetic() || c == '_' => {
                let ident = self.read_identifier();
                match ident.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Identifier(ident),
                }
            }
            c => return Err(self.error(format!("unexpected character '{c}'"))),
        };

        Ok((start, token))
    }
}

/// Maximum nesting of `not` and parentheses.
const MAX_DEPTH: usize = 64;

/// Recursive-descent parser for filter expressions.
struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    position: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, FilterError> {
        let mut lexer = Lexer::new(input);
        let (position, current) = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            position,
            depth: 0,
        })
    }

    fn advance(&mut self) -> Result<(), FilterError> {
        (self.position, self.current) = self.lexer.next_token()?;
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> FilterError {
        FilterError::Parse {
            position: self.position,
            message: message.into(),
        }
    }

    /// Enters one level of nesting, failing past [`MAX_DEPTH`].
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, FilterError>,
    ) -> Result<T, FilterError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!("expression nested deeper than {MAX_DEPTH} levels")));
        }

        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect(&mut self, token: &Token) -> Result<(), FilterError> {
        if &self.current != token {
            return Err(self.error(format!("expected {token:?}, got {:?}", self.current)));
        }
        self.advance()
    }

    fn parse(mut self) -> Result<Expression, FilterError> {
        let expr = self.parse_or()?;
        if self.current != Token::Eof {
            return Err(self.error(format!("unexpected {:?}", self.current)));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expression, FilterError> {
        let mut left = self.parse_and()?;

        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, FilterError> {
        let mut left = self.parse_not()?;

        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_not()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression, FilterError> {
        if self.current == Token::Not {
            self.advance()?;
            let expr = self.nested(Self::parse_not)?;
            return Ok(Expression::Not(Box::new(expr)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, FilterError> {
        match self.current {
            Token::LParen => {
                self.advance()?;
                let expr = self.nested(Self::parse_or)?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::True => {
                self.advance()?;
                Ok(Expression::Literal(true))
            }
            Token::False => {
                self.advance()?;
                Ok(Expression::Literal(false))
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expression, FilterError> {
        let left = self.parse_operand()?;

        let Token::Operator(op) = self.current else {
            return Ok(Expression::Operand(left));
        };

        self.advance()?;
        let right = self.parse_operand()?;

        Ok(Expression::Comparison { left, op, right })
    }

    fn parse_operand(&mut self) -> Result<Operand, FilterError> {
        match &self.current {
            Token::String(s) => {
                let value = s.clone();
                self.advance()?;
                Ok(Operand::String(value))
            }
            Token::Identifier(_) => self.parse_field().map(Operand::Field),
            other => Err(self.error(format!("expected a field or string, got {other:?}"))),
        }
    }

    fn parse_field(&mut self) -> Result<Field, FilterError> {
        let start = self.position;
        let mut name = self.identifier()?;
        if name == "metadata" {
            self.expect(&Token::Dot)?;
            name = self.identifier()?;
        }

        match name.as_str() {
            "name" => Ok(Field::Name),
            "namespace" => Ok(Field::Namespace),
            "labels" => self.parse_map_access(Field::Label, Field::HasLabel),
            "annotations" => self.parse_map_access(Field::Annotation, Field::HasAnnotation),
            _ => Err(FilterError::Parse {
                position: start,
                message: format!("unknown field '{name}'"),
            }),
        }
    }

    /// Parses `['key']` or `.containsKey('key')` after `labels`/`annotations`.
    fn parse_map_access(
        &mut self,
        get: fn(String) -> Field,
        contains: fn(String) -> Field,
    ) -> Result<Field, FilterError> {
        match self.current {
            Token::LBracket => {
                self.advance()?;
                let key = self.string()?;
                self.expect(&Token::RBracket)?;
                Ok(get(key))
            }
            Token::Dot => {
                self.advance()?;
                let method = self.identifier()?;
                if method != "containsKey" {
                    return Err(self.error(format!("unknown method '{method}'")));
                }
                self.expect(&Token::LParen)?;
                let key = self.string()?;
                self.expect(&Token::RParen)?;
                Ok(contains(key))
            }
            _ => Err(self.error("expected '[' or '.containsKey(' after map field")),
        }
    }

    fn identifier(&mut self) -> Result<String, FilterError> {
        let Token::Identifier(ident) = &self.current else {
            return Err(self.error(format!("expected identifier, got {:?}", self.current)));
        };
        let ident = ident.clone();
        self.advance()?;
        Ok(ident)
    }

    fn string(&mut self) -> Result<String, FilterError> {
        let Token::String(s) = &self.current else {
            return Err(self.error(format!("expected string, got {:?}", self.current)));
        };
        let s = s.clone();
        self.advance()?;
        Ok(s)
    }
}

/// Parses a filter expression string into an AST.
///
/// # Errors
///
/// Returns [`FilterError::EmptyExpression`] for blank input and
/// [`FilterError::Parse`] for malformed expressions.
///
/// # Example
///
/// ```ignore
/// let expr = parse_expression("metadata.labels['team'] == 'core' and name != 'kubernetes'")?;
/// ```
pub fn parse_expression(expression: &str) -> Result<Expression, FilterError> {
    if expression.trim().is_empty() {
        return Err(FilterError::EmptyExpression);
    }

    Parser::new(expression)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(key: &str) -> Operand {
        Operand::Field(Field::Label(key.to_string()))
    }

    fn string(value: &str) -> Operand {
        Operand::String(value.to_string())
    }

    #[test]
    fn parse_label_comparison() {
        let expr = parse_expression("metadata.labels['label'] == 'value'").unwrap();
        assert_eq!(
            expr,
            Expression::Comparison {
                left: label("label"),
                op: Operator::Eq,
                right: string("value"),
            }
        );
    }

    #[test]
    fn parse_short_field_names() {
        let expr = parse_expression("name != \"kubernetes\"").unwrap();
        assert_eq!(
            expr,
            Expression::Comparison {
                left: Operand::Field(Field::Name),
                op: Operator::Ne,
                right: string("kubernetes"),
            }
        );

        let expr = parse_expression("namespace = 'default'").unwrap();
        assert!(matches!(
            expr,
            Expression::Comparison {
                left: Operand::Field(Field::Namespace),
                op: Operator::Eq,
                ..
            }
        ));
    }

    #[test]
    fn parse_contains_key() {
        let expr = parse_expression("metadata.annotations.containsKey('owner')").unwrap();
        assert_eq!(
            expr,
            Expression::Operand(Operand::Field(Field::HasAnnotation("owner".to_string())))
        );
    }

    #[test]
    fn parse_escaped_quote() {
        let expr = parse_expression("labels['note'] == 'it''s'").unwrap();
        assert!(matches!(
            expr,
            Expression::Comparison { right: Operand::String(ref s), .. } if s == "it's"
        ));
    }

    #[test]
    fn parse_precedence() {
        // Parses as: a OR (b AND c)
        let expr =
            parse_expression("labels['a'] == '1' or labels['b'] == '2' && labels['c'] == '3'")
                .unwrap();
        match expr {
            Expression::Or(_, right) => assert!(matches!(*right, Expression::And(_, _))),
            _ => panic!("Expected OR at the top"),
        }
    }

    #[test]
    fn parse_not_and_parentheses() {
        let expr = parse_expression("NOT (labels['a'] == '1' OR false)").unwrap();
        match expr {
            Expression::Not(inner) => assert!(matches!(*inner, Expression::Or(_, _))),
            _ => panic!("Expected NOT"),
        }

        let expr = parse_expression("!true").unwrap();
        assert_eq!(expr, Expression::Not(Box::new(Expression::Literal(true))));
    }

    #[test]
    fn parse_error_empty() {
        assert_eq!(parse_expression("   "), Err(FilterError::EmptyExpression));
    }

    #[test]
    fn parse_error_unknown_field() {
        let err = parse_expression("spec.type == 'ClusterIP'").unwrap_err();
        assert!(matches!(
            err,
            FilterError::Parse { position: 0, ref message } if message.contains("spec")
        ));
    }

    #[test]
    fn parse_error_unterminated_string() {
        let err = parse_expression("name == 'abc").unwrap_err();
        assert!(matches!(err, FilterError::Parse { position: 8, .. }));
    }

    #[test]
    fn nesting_within_limit() {
        let expression = format!("{}true{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(parse_expression(&expression), Ok(Expression::Literal(true)));

        let expression = format!("{}true", "!".repeat(MAX_DEPTH));
        assert!(parse_expression(&expression).is_ok());
    }

    #[test]
    fn parse_error_too_deeply_nested() {
        let parens = format!("{}true{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = parse_expression(&parens).unwrap_err();
        assert!(matches!(err, FilterError::Parse { position: 65, .. }));

        let nots = format!("{}true", "!".repeat(10_000));
        let err = parse_expression(&nots).unwrap_err();
        assert!(matches!(
            err,
            FilterError::Parse { ref message, .. } if message.contains("nested")
        ));

        let mixed = "not (".repeat(MAX_DEPTH) + "true" + &")".repeat(MAX_DEPTH);
        assert!(parse_expression(&mixed).is_err());
    }

    #[test]
    fn parse_error_trailing_tokens() {
        assert!(parse_expression("name == 'a' 'b'").is_err());
        assert!(parse_expression("(name == 'a'").is_err());
        assert!(parse_expression("labels").is_err());
        assert!(parse_expression("labels.size()").is_err());
        assert!(parse_expression("name & 'a'").is_err());
        assert!(parse_expression("@@invalid").is_err());
    }
}
