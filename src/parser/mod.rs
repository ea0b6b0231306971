//! Parser for the resoql query language.
//!
//! Converts tokenized query text into the [`Query`] AST. Bind parameters
//! (`@name`) are substituted during parsing, so a parameter carrying an
//! invalid date/datetime payload is rejected here rather than at execution.

mod clauses;
mod precedence;
#[cfg(test)]
mod tests;

use std::collections::HashMap;

use crate::ast::{Literal, Query};
use crate::error::{Error, Result};
use crate::lexer::{Lexer, Spanned, Token};

/// Bind parameters for a parameterized query text.
pub type Params = HashMap<String, Literal>;

/// Identifier segments that are rejected outright wherever a name is
/// accepted, quoted or not.
const UNSAFE_NAMES: [&str; 3] = ["__proto__", "constructor", "prototype"];

pub(crate) fn is_unsafe_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    UNSAFE_NAMES.iter().any(|n| *n == lower)
}

pub struct Parser<'p> {
    pub(crate) tokens: Vec<Spanned>,
    pub(crate) position: usize,
    pub(crate) params: Option<&'p Params>,
}

impl<'p> Parser<'p> {
    pub fn new(input: &str, params: Option<&'p Params>) -> Result<Self> {
        let tokens = Lexer::new(input).tokenize()?;
        Ok(Self {
            tokens,
            position: 0,
            params,
        })
    }

    pub(crate) fn current_token(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|(t, _)| t)
            .unwrap_or(&Token::Eof)
    }

    pub(crate) fn current_pos(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|(_, p)| *p)
            .unwrap_or(0)
    }

    pub(crate) fn peek_token(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.position + offset)
            .map(|(t, _)| t)
            .unwrap_or(&Token::Eof)
    }

    pub(crate) fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    pub(crate) fn expect(&mut self, expected: Token) -> Result<()> {
        if self.current_token() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(Error::syntax(
                format!("Expected {:?}, got {:?}", expected, self.current_token()),
                self.current_pos(),
            ))
        }
    }

    /// Resolve a bind parameter to its literal value.
    pub(crate) fn resolve_param(&self, name: &str, pos: usize) -> Result<Literal> {
        self.params
            .and_then(|p| p.get(name))
            .cloned()
            .ok_or_else(|| Error::syntax(format!("Unknown parameter: @{}", name), pos))
    }

    /// Parse a complete query and require EOF afterwards.
    pub fn parse(&mut self) -> Result<Query> {
        let query = self.parse_query()?;
        if !matches!(self.current_token(), Token::Eof) {
            return Err(Error::syntax(
                format!("Unexpected token after query: {:?}", self.current_token()),
                self.current_pos(),
            ));
        }
        Ok(query)
    }
}

/// Parse a query string into an AST.
pub fn parse(input: &str) -> Result<Query> {
    Parser::new(input, None)?.parse()
}

/// Parse a parameterized query string, substituting `@name` slots from
/// `params`.
pub fn parse_with_params(input: &str, params: &Params) -> Result<Query> {
    Parser::new(input, Some(params))?.parse()
}
