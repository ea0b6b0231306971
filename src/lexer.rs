//! Tokenizer for the resoql query language.
//!
//! Keywords are case-insensitive and classified after reading a maximal
//! identifier word, which gives the word-boundary guarantee the grammar
//! relies on (`fromx` is an identifier, `from` is a keyword). `--` line
//! comments and `/* */` block comments are skippable whitespace. Literal
//! recognition order: bind parameter, datetime, date, number, string,
//! true/false/null.

use crate::ast::{is_valid_date, is_valid_datetime};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Clause keywords (reserved at identifier positions)
    Select,
    From,
    Where,
    Group,
    Having,
    Order,
    By,

    // Soft keywords (usable as identifiers where the grammar expects one)
    And,
    Or,
    Not,
    In,
    Like,
    Includes,
    Excludes,
    Asc,
    Desc,
    Nulls,
    First,
    Last,
    Limit,
    Offset,
    For,
    True,
    False,
    Null,

    // Identifiers and literals
    Identifier(String),
    /// Double-quoted identifier (CSV-style `""` escaping)
    Quoted(String),
    /// Bind parameter `@name`
    Param(String),
    Number(f64),
    /// Single-quoted string literal
    Str(String),
    Date(String),
    DateTime(String),

    // Operators
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Delimiters
    LParen,
    RParen,
    Comma,
    Dot,

    Eof,
}

impl Token {
    /// Text of a soft keyword when it appears where an identifier is
    /// expected. Hard clause keywords return None.
    pub fn as_soft_identifier(&self) -> Option<&str> {
        match self {
            Token::Identifier(s) => Some(s),
            Token::And => Some("and"),
            Token::Or => Some("or"),
            Token::Not => Some("not"),
            Token::In => Some("in"),
            Token::Like => Some("like"),
            Token::Includes => Some("includes"),
            Token::Excludes => Some("excludes"),
            Token::Asc => Some("asc"),
            Token::Desc => Some("desc"),
            Token::Nulls => Some("nulls"),
            Token::First => Some("first"),
            Token::Last => Some("last"),
            Token::Limit => Some("limit"),
            Token::Offset => Some("offset"),
            Token::For => Some("for"),
            _ => None,
        }
    }
}

/// A token plus the byte offset it started at.
pub type Spanned = (Token, usize);

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            input: chars,
            position: 0,
            current_char,
        }
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            match self.current_char {
                Some(ch) if ch.is_whitespace() => self.advance(),
                Some('-') if self.peek_char() == Some('-') => {
                    while let Some(ch) = self.current_char {
                        self.advance();
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_char() == Some('*') => {
                    let start = self.position;
                    self.advance();
                    self.advance();
                    loop {
                        match self.current_char {
                            Some('*') if self.peek_char() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => self.advance(),
                            None => {
                                return Err(Error::syntax("Unterminated block comment", start))
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Probe for a strict date or datetime literal starting at the current
    /// position. Tried before numeric scanning because `2024-03-15` would
    /// otherwise lex as number, minus, number.
    fn try_read_temporal(&mut self) -> Option<Token> {
        let candidate: String = self.input[self.position..]
            .iter()
            .take(25)
            .take_while(|c| c.is_ascii())
            .collect();
        if candidate.len() < 10 || !is_valid_date(&candidate[0..10]) {
            return None;
        }

        // Longest datetime form first: with seconds and numeric offset (25),
        // no seconds with offset (22), seconds with Z (20), no seconds with Z (17).
        for len in [25usize, 22, 20, 17] {
            if candidate.len() >= len && is_valid_datetime(&candidate[0..len]) {
                let next = self.input.get(self.position + len).copied();
                if next.map_or(true, |c| !c.is_alphanumeric()) {
                    for _ in 0..len {
                        self.advance();
                    }
                    return Some(Token::DateTime(candidate[0..len].to_string()));
                }
            }
        }

        let next = self.input.get(self.position + 10).copied();
        if next.map_or(true, |c| !c.is_alphanumeric() && c != ':') {
            for _ in 0..10 {
                self.advance();
            }
            return Some(Token::Date(candidate[0..10].to_string()));
        }
        None
    }

    fn read_number(&mut self) -> Result<Token> {
        let start = self.position;

        // Radix prefixes
        if self.current_char == Some('0') {
            let radix = match self.peek_char() {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                self.advance();
                let mut digits = String::new();
                while let Some(ch) = self.current_char {
                    if ch.is_digit(radix) {
                        digits.push(ch);
                        self.advance();
                    } else {
                        break;
                    }
                }
                return i64::from_str_radix(&digits, radix)
                    .map(|n| Token::Number(n as f64))
                    .map_err(|_| Error::syntax(format!("Invalid number literal: {}", digits), start));
            }
        }

        let mut num_str = String::new();
        let mut has_dot = false;
        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot && self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                has_dot = true;
                num_str.push(ch);
                self.advance();
            } else if (ch == 'e' || ch == 'E') && !num_str.is_empty() {
                // Exponent with optional sign
                let mut probe = self.position + 1;
                let mut sign = None;
                if matches!(self.input.get(probe), Some('+') | Some('-')) {
                    sign = self.input.get(probe).copied();
                    probe += 1;
                }
                if self.input.get(probe).is_some_and(|c| c.is_ascii_digit()) {
                    num_str.push(ch);
                    self.advance();
                    if let Some(s) = sign {
                        num_str.push(s);
                        self.advance();
                    }
                    while let Some(d) = self.current_char {
                        if d.is_ascii_digit() {
                            num_str.push(d);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                break;
            } else {
                break;
            }
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| Error::syntax(format!("Invalid number literal: {}", num_str), start))
    }

    fn read_string(&mut self) -> Result<Token> {
        let start = self.position;
        self.advance(); // opening quote

        let mut string = String::new();
        while let Some(ch) = self.current_char {
            if ch == '\'' {
                self.advance();
                return Ok(Token::Str(string));
            } else if ch == '\\' {
                self.advance();
                match self.current_char {
                    Some('n') => {
                        string.push('\n');
                        self.advance();
                    }
                    Some('t') => {
                        string.push('\t');
                        self.advance();
                    }
                    Some('r') => {
                        string.push('\r');
                        self.advance();
                    }
                    Some('b') => {
                        string.push('\u{0008}');
                        self.advance();
                    }
                    Some('f') => {
                        string.push('\u{000C}');
                        self.advance();
                    }
                    Some('u') => {
                        self.advance();
                        let mut hex = String::new();
                        for _ in 0..4 {
                            match self.current_char {
                                Some(h) if h.is_ascii_hexdigit() => {
                                    hex.push(h);
                                    self.advance();
                                }
                                _ => {
                                    return Err(Error::syntax(
                                        "Invalid unicode escape in string",
                                        start,
                                    ))
                                }
                            }
                        }
                        let code = u32::from_str_radix(&hex, 16).unwrap_or(0);
                        string.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                    }
                    Some('x') => {
                        self.advance();
                        let mut hex = String::new();
                        for _ in 0..2 {
                            match self.current_char {
                                Some(h) if h.is_ascii_hexdigit() => {
                                    hex.push(h);
                                    self.advance();
                                }
                                _ => {
                                    return Err(Error::syntax("Invalid hex escape in string", start))
                                }
                            }
                        }
                        let code = u32::from_str_radix(&hex, 16).unwrap_or(0);
                        string.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                    }
                    Some(d) if ('0'..='7').contains(&d) => {
                        // Octal escape, up to three digits
                        let mut oct = String::new();
                        while oct.len() < 3 {
                            match self.current_char {
                                Some(o) if ('0'..='7').contains(&o) => {
                                    oct.push(o);
                                    self.advance();
                                }
                                _ => break,
                            }
                        }
                        let code = u32::from_str_radix(&oct, 8).unwrap_or(0);
                        string.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                    }
                    Some(escaped) => {
                        string.push(escaped);
                        self.advance();
                    }
                    None => return Err(Error::syntax("Unterminated string", start)),
                }
            } else {
                string.push(ch);
                self.advance();
            }
        }

        Err(Error::syntax("Unterminated string", start))
    }

    fn read_quoted_identifier(&mut self) -> Result<Token> {
        let start = self.position;
        self.advance(); // opening double quote

        let mut ident = String::new();
        while let Some(ch) = self.current_char {
            if ch == '"' {
                // CSV-style doubled-quote escape
                if self.peek_char() == Some('"') {
                    ident.push('"');
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance();
                return Ok(Token::Quoted(ident));
            }
            ident.push(ch);
            self.advance();
        }

        Err(Error::syntax("Unterminated quoted identifier", start))
    }

    // Identifier grammar is ASCII: [A-Za-z_$][A-Za-z0-9_$]*.
    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current_char {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match ident.to_uppercase().as_str() {
            "SELECT" => Token::Select,
            "FROM" => Token::From,
            "WHERE" => Token::Where,
            "GROUP" => Token::Group,
            "HAVING" => Token::Having,
            "ORDER" => Token::Order,
            "BY" => Token::By,
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "IN" => Token::In,
            "LIKE" => Token::Like,
            "INCLUDES" => Token::Includes,
            "EXCLUDES" => Token::Excludes,
            "ASC" => Token::Asc,
            "DESC" => Token::Desc,
            "NULLS" => Token::Nulls,
            "FIRST" => Token::First,
            "LAST" => Token::Last,
            "LIMIT" => Token::Limit,
            "OFFSET" => Token::Offset,
            "FOR" => Token::For,
            "TRUE" => Token::True,
            "FALSE" => Token::False,
            "NULL" => Token::Null,
            "INFINITY" => Token::Number(f64::INFINITY),
            "NAN" => Token::Number(f64::NAN),
            _ => Token::Identifier(ident),
        }
    }

    fn read_param(&mut self) -> Result<Token> {
        let start = self.position;
        self.advance(); // skip '@'

        let mut name = String::new();
        while let Some(ch) = self.current_char {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if name.is_empty() {
            return Err(Error::syntax("Expected parameter name after '@'", start));
        }
        Ok(Token::Param(name))
    }

    pub fn next_token(&mut self) -> Result<Spanned> {
        self.skip_whitespace_and_comments()?;
        let start = self.position;

        let token = match self.current_char {
            None => Token::Eof,

            Some('@') => return Ok((self.read_param()?, start)),

            Some(ch) if ch.is_ascii_digit() => {
                if let Some(temporal) = self.try_read_temporal() {
                    return Ok((temporal, start));
                }
                return Ok((self.read_number()?, start));
            }

            Some('\'') => return Ok((self.read_string()?, start)),
            Some('"') => return Ok((self.read_quoted_identifier()?, start)),

            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' || ch == '$' => {
                return Ok((self.read_identifier(), start));
            }

            Some('=') => {
                self.advance();
                Token::Eq
            }
            Some('!') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Token::Ne
                } else {
                    return Err(Error::syntax("Unexpected character: !", start));
                }
            }
            Some('<') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Token::Le
                } else if self.current_char == Some('>') {
                    self.advance();
                    Token::Ne
                } else {
                    Token::Lt
                }
            }
            Some('>') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            Some('-') => {
                // Negative numeric literal (including -Infinity); a bare
                // minus has no other role in this grammar.
                self.advance();
                self.skip_whitespace_and_comments()?;
                match self.current_char {
                    Some(ch) if ch.is_ascii_digit() => match self.read_number()? {
                        Token::Number(n) => Token::Number(-n),
                        _ => unreachable!(),
                    },
                    Some(ch) if ch.is_ascii_alphabetic() => match self.read_identifier() {
                        Token::Number(n) => Token::Number(-n),
                        other => {
                            return Err(Error::syntax(
                                format!("Expected number after '-', got {:?}", other),
                                start,
                            ))
                        }
                    },
                    _ => return Err(Error::syntax("Expected number after '-'", start)),
                }
            }
            Some('(') => {
                self.advance();
                Token::LParen
            }
            Some(')') => {
                self.advance();
                Token::RParen
            }
            Some(',') => {
                self.advance();
                Token::Comma
            }
            Some('.') => {
                self.advance();
                Token::Dot
            }

            Some(ch) => {
                return Err(Error::syntax(format!("Unexpected character: {}", ch), start));
            }
        };

        Ok((token, start))
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.0 == Token::Eof;
            tokens.push(spanned);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}
