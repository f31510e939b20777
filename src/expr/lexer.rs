//! Tokenizer for the math expression language.
//!
//! Token kinds are numbers, identifiers, operators and punctuation. The end
//! of input is implicit: [`tokenize`] returns the spanned tokens and the
//! parser reports the source length as the offset of the end.

use logos::Logos;

use crate::error::{FlowError, Result};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r"[\p{L}_][\p{L}\p{N}_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("^")]
    Caret,
    #[token("**")]
    StarStar,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token("=")]
    Assign,
}

impl Token {
    /// Whether this token can begin a primary expression.
    pub fn starts_primary(&self) -> bool {
        matches!(self, Token::Number(_) | Token::Ident(_) | Token::LParen)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Ident(id) => write!(f, "{}", id),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Caret => write!(f, "^"),
            Token::StarStar => write!(f, "**"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Assign => write!(f, "="),
        }
    }
}

/// A token together with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Tokenize `source` into spanned tokens.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push(Spanned {
                token,
                offset: span.start,
            }),
            Err(()) => {
                return Err(FlowError::parse(
                    "unexpected character",
                    span.start,
                    lexer.slice(),
                ));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    #[test]
    fn test_numbers_and_operators() {
        assert_eq!(
            kinds("2.5e-3 * x^2"),
            vec![
                Token::Number(2.5e-3),
                Token::Star,
                Token::Ident("x".into()),
                Token::Caret,
                Token::Number(2.0),
            ]
        );
    }

    #[test]
    fn test_unicode_identifiers() {
        assert_eq!(
            kinds("θ + φ_1"),
            vec![
                Token::Ident("θ".into()),
                Token::Plus,
                Token::Ident("φ_1".into()),
            ]
        );
    }

    #[test]
    fn test_offsets() {
        let tokens = tokenize("  sin(x)").unwrap();
        assert_eq!(tokens[0].offset, 2);
        assert_eq!(tokens[1].offset, 5);
        assert_eq!(tokens.last().unwrap().offset, 7);
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("x $ y").unwrap_err();
        match err {
            FlowError::Parse { offset, token, .. } => {
                assert_eq!(offset, 2);
                assert_eq!(token, "$");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
