//! Tokenizer for the expression language

use crate::error::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Semicolon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

/// A token and its byte offset in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ScriptError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let syntax = |offset: usize, message: String| ScriptError::SyntaxError { offset, message };

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            loop {
                let Some(&(_, ch)) = chars.get(i) else {
                    return Err(syntax(offset, "unterminated string".into()));
                };
                i += 1;
                if ch == quote {
                    break;
                }
                if ch != '\\' {
                    value.push(ch);
                    continue;
                }
                let Some(&(_, escaped)) = chars.get(i) else {
                    return Err(syntax(offset, "unterminated string".into()));
                };
                i += 1;
                match escaped {
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    '0' => value.push('\0'),
                    '\\' | '\'' | '"' | '/' => value.push(escaped),
                    // Keep the backslash so regex escapes like \d survive
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
            }
            tokens.push(Spanned { token: Token::Str(value), offset });
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |(_, n)| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| syntax(offset, format!("invalid number '{}'", text)))?;
            tokens.push(Spanned { token: Token::Number(number), offset });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            tokens.push(Spanned { token: Token::Ident(ident), offset });
            continue;
        }

        let next = chars.get(i + 1).map(|(_, ch)| *ch);
        let next2 = chars.get(i + 2).map(|(_, ch)| *ch);
        let (token, width) = match (c, next, next2) {
            ('=', Some('='), Some('=')) => (Token::EqEqEq, 3),
            ('!', Some('='), Some('=')) => (Token::NotEqEq, 3),
            ('=', Some('='), _) => (Token::EqEq, 2),
            ('!', Some('='), _) => (Token::NotEq, 2),
            ('<', Some('='), _) => (Token::Le, 2),
            ('>', Some('='), _) => (Token::Ge, 2),
            ('&', Some('&'), _) => (Token::AndAnd, 2),
            ('|', Some('|'), _) => (Token::OrOr, 2),
            ('<', _, _) => (Token::Lt, 1),
            ('>', _, _) => (Token::Gt, 1),
            ('!', _, _) => (Token::Bang, 1),
            ('(', _, _) => (Token::LParen, 1),
            (')', _, _) => (Token::RParen, 1),
            (',', _, _) => (Token::Comma, 1),
            (';', _, _) => (Token::Semicolon, 1),
            ('+', _, _) => (Token::Plus, 1),
            ('-', _, _) => (Token::Minus, 1),
            ('*', _, _) => (Token::Star, 1),
            ('/', _, _) => (Token::Slash, 1),
            ('%', _, _) => (Token::Percent, 1),
            _ => return Err(syntax(offset, format!("unexpected character '{}'", c))),
        };
        tokens.push(Spanned { token, offset });
        i += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}
