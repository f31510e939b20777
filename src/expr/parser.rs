//! Recursive-descent parser.
//!
//! Precedence, tightest first: unary minus, `^` (right-associative, `**` is
//! accepted as a synonym), `*` and `/`, then `+` and `-`. A function call is an
//! identifier immediately followed by a parenthesised argument list. A numeric
//! literal directly followed by an identifier or `(` multiplies (`2x`).

use crate::error::{FlowError, Result};

use super::ast::{BinaryOp, Expr};
use super::lexer::{Spanned, Token, tokenize};

/// Parse a single expression spanning the whole source.
pub fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(&tokens, source.len());
    if parser.at_end() {
        return Err(FlowError::parse("empty expression", 0, ""));
    }
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse either a bracketed list `[a, b, ...]` or a single bare expression.
pub fn parse_list(source: &str) -> Result<Vec<Expr>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(&tokens, source.len());
    if parser.eat(&Token::LBracket) {
        let mut items = Vec::new();
        if !parser.eat(&Token::RBracket) {
            loop {
                items.push(parser.expression()?);
                if parser.eat(&Token::Comma) {
                    continue;
                }
                parser.expect(&Token::RBracket)?;
                break;
            }
        }
        parser.expect_end()?;
        Ok(items)
    } else {
        if parser.at_end() {
            return Err(FlowError::parse("empty expression", 0, ""));
        }
        let expr = parser.expression()?;
        parser.expect_end()?;
        Ok(vec![expr])
    }
}

/// The recognised shapes of a notebook code cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `name(a, b, ...) = body`
    Function {
        name: String,
        params: Vec<String>,
        body: Expr,
    },
    /// `name = body`
    Assignment { name: String, body: Expr },
    /// Anything else.
    Expression(Expr),
}

/// Classify and parse a code-cell input.
pub fn parse_statement(source: &str) -> Result<Statement> {
    let tokens = tokenize(source)?;
    let Some(assign_pos) = tokens.iter().position(|t| t.token == Token::Assign) else {
        return parse(source).map(Statement::Expression);
    };

    let head = &tokens[..assign_pos];
    let body_source = &source[tokens[assign_pos].offset + 1..];
    let body_offset = tokens[assign_pos].offset + 1;
    let body = parse(body_source).map_err(|err| shift_offset(err, body_offset))?;

    match head {
        [Spanned { token: Token::Ident(name), .. }] => Ok(Statement::Assignment {
            name: name.clone(),
            body,
        }),
        [
            Spanned { token: Token::Ident(name), .. },
            Spanned { token: Token::LParen, .. },
            rest @ ..,
        ] => {
            let params = parse_params(rest, tokens[assign_pos].offset)?;
            Ok(Statement::Function {
                name: name.clone(),
                params,
                body,
            })
        }
        _ => {
            let at = head.first().map(|t| t.offset).unwrap_or(0);
            Err(FlowError::parse(
                "left side of `=` must be a name or a function signature",
                at,
                head.first().map(|t| t.token.to_string()).unwrap_or_default(),
            ))
        }
    }
}

fn parse_params(tokens: &[Spanned], assign_offset: usize) -> Result<Vec<String>> {
    let mut params = Vec::new();
    let mut expect_name = true;
    let mut closed = false;
    for spanned in tokens {
        if closed {
            return Err(FlowError::parse(
                "unexpected token after parameter list",
                spanned.offset,
                spanned.token.to_string(),
            ));
        }
        match (&spanned.token, expect_name) {
            (Token::Ident(name), true) => {
                if params.contains(name) {
                    return Err(FlowError::parse(
                        "duplicate parameter",
                        spanned.offset,
                        name.clone(),
                    ));
                }
                params.push(name.clone());
                expect_name = false;
            }
            (Token::RParen, _) if !expect_name || params.is_empty() => closed = true,
            (Token::Comma, false) => expect_name = true,
            (token, _) => {
                return Err(FlowError::parse(
                    "malformed parameter list",
                    spanned.offset,
                    token.to_string(),
                ));
            }
        }
    }
    if !closed {
        return Err(FlowError::parse("unclosed parameter list", assign_offset, "="));
    }
    Ok(params)
}

fn shift_offset(err: FlowError, by: usize) -> FlowError {
    match err {
        FlowError::Parse {
            message,
            offset,
            token,
        } => FlowError::Parse {
            message,
            offset: offset + by,
            token,
        },
        other => other,
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    source_len: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            source_len,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|spanned| &spanned.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|spanned| spanned.offset)
            .unwrap_or(self.source_len)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: &str) -> FlowError {
        let token = self
            .peek()
            .map(|token| token.to_string())
            .unwrap_or_else(|| "<end>".to_string());
        FlowError::parse(message, self.offset(), token)
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error_here(&format!("expected `{}`", expected)))
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error_here("unexpected trailing input"))
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.power()?;
        let mut last_was_literal = lhs.as_number().is_some();
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Ident(_)) | Some(Token::LParen) if last_was_literal => {
                    let rhs = self.power()?;
                    lhs = Expr::mul(lhs, rhs);
                    last_was_literal = false;
                    continue;
                }
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.power()?;
            last_was_literal = rhs.as_number().is_some();
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.unary()?;
        if matches!(self.peek(), Some(Token::Caret) | Some(Token::StarStar)) {
            self.pos += 1;
            let exponent = self.power()?;
            return Ok(Expr::pow(base, exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::neg(self.unary()?));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Number(*value)),
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    Ok(Expr::call(name.clone(), args))
                } else {
                    Ok(Expr::Ident(name.clone()))
                }
            }
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(FlowError::parse(
                "expected a number, name or `(`",
                offset,
                token.to_string(),
            )),
            None => Err(FlowError::parse(
                "unexpected end of expression",
                offset,
                "<end>",
            )),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            return Ok(args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2*3^2").unwrap();
        assert_eq!(
            expr,
            Expr::add(
                Expr::num(1.0),
                Expr::mul(Expr::num(2.0), Expr::pow(Expr::num(3.0), Expr::num(2.0)))
            )
        );
    }

    #[test]
    fn test_power_is_right_associative() {
        let expr = parse("a^b^c").unwrap();
        assert_eq!(
            expr,
            Expr::pow(
                Expr::ident("a"),
                Expr::pow(Expr::ident("b"), Expr::ident("c"))
            )
        );
    }

    #[test]
    fn test_unary_minus_binds_tightest() {
        let expr = parse("-x^2").unwrap();
        assert_eq!(
            expr,
            Expr::pow(Expr::neg(Expr::ident("x")), Expr::num(2.0))
        );
        let expr = parse("x^-1").unwrap();
        assert_eq!(expr, Expr::pow(Expr::ident("x"), Expr::neg(Expr::num(1.0))));
    }

    #[test]
    fn test_calls_and_implicit_multiplication() {
        let expr = parse("2x + 3(y - 1) + atan2(y, x)").unwrap();
        assert_eq!(
            expr.to_string(),
            "2*x + 3*(y - 1) + atan2(y, x)"
        );
    }

    #[test]
    fn test_error_reports_offset_and_token() {
        match parse("x + * y").unwrap_err() {
            FlowError::Parse { offset, token, .. } => {
                assert_eq!(offset, 4);
                assert_eq!(token, "*");
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse("sin(x").unwrap_err() {
            FlowError::Parse { offset, token, .. } => {
                assert_eq!(offset, 5);
                assert_eq!(token, "<end>");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse("   ").is_err());
    }

    #[test]
    fn test_parse_list() {
        let items = parse_list("[10*(y - x), x*(28 - z) - y, x*y - (8/3)*z]").unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(parse_list("x + 1").unwrap().len(), 1);
    }

    #[test]
    fn test_statements() {
        match parse_statement("g(u) = sin(u)^2 + cos(u)^2").unwrap() {
            Statement::Function { name, params, body } => {
                assert_eq!(name, "g");
                assert_eq!(params, vec!["u".to_string()]);
                assert!(body.mentions("u"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse_statement("k = 2.5").unwrap(),
            Statement::Assignment { .. }
        ));
        assert!(matches!(
            parse_statement("k*2").unwrap(),
            Statement::Expression(_)
        ));
        assert!(parse_statement("f(x,) = x").is_err());
        assert!(parse_statement("f(x, x) = x").is_err());
        assert!(parse_statement("1 = x").is_err());
    }

    #[test]
    fn test_body_error_offset_is_absolute() {
        match parse_statement("f(a) = a +").unwrap_err() {
            FlowError::Parse { offset, .. } => assert_eq!(offset, 10),
            other => panic!("unexpected {other:?}"),
        }
    }
}
