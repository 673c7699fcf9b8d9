//! Flat token stream built on the `sqlparser` tokenizer.
//!
//! The tokenizer only reports where each token starts, so every token's text
//! is sliced back out of the source. Rendering a token list therefore
//! reproduces the input byte for byte. On top of the raw stream this module
//! recognizes driver placeholders (`%s`, `%(name)s`, `:name`, `?`, `?1`, `$1`)
//! and merges multi-word keywords such as `LEFT OUTER JOIN`.

use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token as SqlToken, Tokenizer, Word};

use super::keywords;
use crate::config::SqlDialect;
use crate::error::{HistoryError, HistoryResult};

/// A bind placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    /// `%s` or `?`, numbered by order of appearance from zero.
    Positional(usize),
    /// `?N` or `$N`, one-based.
    Numbered(usize),
    /// `%(name)s`, `:name` or `$name`.
    Named(String),
}

impl std::fmt::Display for Placeholder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Placeholder::Positional(i) => write!(f, "#{}", i + 1),
            Placeholder::Numbered(n) => write!(f, "${}", n),
            Placeholder::Named(name) => write!(f, ":{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword,
    Name,
    Literal,
    Placeholder(Placeholder),
    Operator,
    Comma,
    Period,
    LParen,
    RParen,
    Semicolon,
    Star,
    Whitespace,
    /// Text spliced in by a rewrite.
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text, including quotes.
    pub text: String,
    /// Upper-cased keyword (single-spaced for compounds) or unquoted name.
    pub normalized: String,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, normalized: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            normalized: normalized.into(),
        }
    }

    /// A synthetic token that renders `text` verbatim.
    pub fn raw(text: impl Into<String>) -> Self {
        Self::new(TokenKind::Raw, text, "")
    }

    pub fn is_whitespace(&self) -> bool {
        self.kind == TokenKind::Whitespace
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.normalized == keyword
    }
}

fn dialect_for(dialect: SqlDialect) -> Box<dyn Dialect> {
    match dialect {
        SqlDialect::MySql => Box::new(MySqlDialect {}),
        SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
        SqlDialect::Generic => Box::new(GenericDialect {}),
    }
}

/// Tokenize `sql` into a lossless token list.
pub fn tokenize(sql: &str, dialect: SqlDialect) -> HistoryResult<Vec<Token>> {
    let dialect = dialect_for(dialect);
    let located = Tokenizer::new(dialect.as_ref(), sql)
        .tokenize_with_location()
        .map_err(|e| HistoryError::unrecognized(e.to_string()))?;

    let (tokens, locations): (Vec<SqlToken>, Vec<Location>) = located
        .into_iter()
        .filter(|t| t.token != SqlToken::EOF)
        .map(|t| (t.token, t.location))
        .unzip();
    let offsets = byte_offsets(sql, &locations);

    let mut raw = Vec::with_capacity(tokens.len());
    for (i, token) in tokens.into_iter().enumerate() {
        let start = offsets[i];
        let end = offsets.get(i + 1).copied().unwrap_or(sql.len());
        let text = sql.get(start..end).ok_or_else(|| {
            HistoryError::unrecognized("token boundaries do not line up with the source")
        })?;
        raw.push((token, text.to_string()));
    }

    let tokens = merge_placeholders(raw);
    Ok(merge_compounds(tokens))
}

/// Map 1-based (line, column) character positions to byte offsets.
fn byte_offsets(sql: &str, locations: &[Location]) -> Vec<usize> {
    let mut out = Vec::with_capacity(locations.len());
    let mut chars = sql.char_indices().peekable();
    let (mut line, mut column) = (1u64, 1u64);
    for loc in locations {
        while (line, column) < (loc.line, loc.column) {
            match chars.next() {
                Some((_, '\n')) => {
                    line += 1;
                    column = 1;
                }
                Some(_) => column += 1,
                None => break,
            }
        }
        out.push(chars.peek().map(|(i, _)| *i).unwrap_or(sql.len()));
    }
    out
}

fn is_bare_word(token: Option<&(SqlToken, String)>, value: &str) -> bool {
    matches!(token, Some((SqlToken::Word(w), _)) if w.quote_style.is_none() && w.value == value)
}

fn word_value(token: Option<&(SqlToken, String)>) -> Option<String> {
    match token {
        Some((SqlToken::Word(w), _)) if w.quote_style.is_none() => Some(w.value.clone()),
        _ => None,
    }
}

fn merge_placeholders(raw: Vec<(SqlToken, String)>) -> Vec<Token> {
    let mut out = Vec::with_capacity(raw.len());
    let mut positional = 0usize;
    let mut i = 0;

    let joined = |from: usize, to: usize| -> String {
        raw[from..to].iter().map(|(_, t)| t.as_str()).collect()
    };

    while i < raw.len() {
        let (token, text) = &raw[i];
        match token {
            SqlToken::Mod if is_bare_word(raw.get(i + 1), "s") => {
                out.push(Token::new(
                    TokenKind::Placeholder(Placeholder::Positional(positional)),
                    joined(i, i + 2),
                    "",
                ));
                positional += 1;
                i += 2;
                continue;
            }
            SqlToken::Mod
                if matches!(raw.get(i + 1), Some((SqlToken::LParen, _)))
                    && matches!(raw.get(i + 3), Some((SqlToken::RParen, _)))
                    && is_bare_word(raw.get(i + 4), "s") =>
            {
                if let Some(name) = word_value(raw.get(i + 2)) {
                    out.push(Token::new(
                        TokenKind::Placeholder(Placeholder::Named(name)),
                        joined(i, i + 5),
                        "",
                    ));
                    i += 5;
                    continue;
                }
                out.push(Token::new(TokenKind::Operator, text.clone(), ""));
            }
            SqlToken::Colon if word_value(raw.get(i + 1)).is_some() => {
                let name = word_value(raw.get(i + 1)).unwrap_or_default();
                out.push(Token::new(
                    TokenKind::Placeholder(Placeholder::Named(name)),
                    joined(i, i + 2),
                    "",
                ));
                i += 2;
                continue;
            }
            SqlToken::Placeholder(p) => {
                let kind = match placeholder_kind(p, positional) {
                    Some(ph) => {
                        if matches!(ph, Placeholder::Positional(_)) {
                            positional += 1;
                        }
                        TokenKind::Placeholder(ph)
                    }
                    None => TokenKind::Operator,
                };
                out.push(Token::new(kind, text.clone(), ""));
            }
            SqlToken::Word(w) => out.push(classify_word(w, text)),
            SqlToken::Whitespace(_) => out.push(Token::new(TokenKind::Whitespace, text.clone(), "")),
            SqlToken::Comma => out.push(Token::new(TokenKind::Comma, text.clone(), "")),
            SqlToken::Period => out.push(Token::new(TokenKind::Period, text.clone(), "")),
            SqlToken::LParen => out.push(Token::new(TokenKind::LParen, text.clone(), "")),
            SqlToken::RParen => out.push(Token::new(TokenKind::RParen, text.clone(), "")),
            SqlToken::SemiColon => out.push(Token::new(TokenKind::Semicolon, text.clone(), "")),
            SqlToken::Mul => out.push(Token::new(TokenKind::Star, text.clone(), "*")),
            SqlToken::Number(..)
            | SqlToken::SingleQuotedString(_)
            | SqlToken::DoubleQuotedString(_)
            | SqlToken::NationalStringLiteral(_)
            | SqlToken::EscapedStringLiteral(_)
            | SqlToken::HexStringLiteral(_)
            | SqlToken::SingleQuotedByteStringLiteral(_)
            | SqlToken::DoubleQuotedByteStringLiteral(_)
            | SqlToken::DollarQuotedString(_) => {
                out.push(Token::new(TokenKind::Literal, text.clone(), ""))
            }
            _ => out.push(Token::new(TokenKind::Operator, text.clone(), "")),
        }
        i += 1;
    }
    out
}

fn placeholder_kind(text: &str, next_positional: usize) -> Option<Placeholder> {
    if text == "?" {
        return Some(Placeholder::Positional(next_positional));
    }
    let (sigil, rest) = text.split_at(1);
    if rest.is_empty() {
        return None;
    }
    if let Ok(n) = rest.parse::<usize>() {
        return (n > 0 && (sigil == "?" || sigil == "$")).then_some(Placeholder::Numbered(n));
    }
    match sigil {
        "$" | ":" | "@" => Some(Placeholder::Named(rest.to_string())),
        _ => None,
    }
}

fn classify_word(word: &Word, text: &str) -> Token {
    if word.quote_style.is_some() {
        return Token::new(TokenKind::Name, text, word.value.clone());
    }
    if let Some(rest) = word.value.strip_prefix('$') {
        if let Ok(n) = rest.parse::<usize>() {
            if n > 0 {
                return Token::new(TokenKind::Placeholder(Placeholder::Numbered(n)), text, "");
            }
        }
    }
    let upper = word.value.to_uppercase();
    if keywords::is_keyword(&upper) {
        Token::new(TokenKind::Keyword, text, upper)
    } else {
        Token::new(TokenKind::Name, text, word.value.clone())
    }
}

fn merge_compounds(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind == TokenKind::Keyword {
            if let Some((end, normalized)) = match_compound(&tokens, i) {
                let text: String = tokens[i..end].iter().map(|t| t.text.as_str()).collect();
                out.push(Token::new(TokenKind::Keyword, text, normalized));
                i = end;
                continue;
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

fn match_compound(tokens: &[Token], start: usize) -> Option<(usize, String)> {
    'candidates: for words in keywords::COMPOUND_KEYWORDS {
        if !tokens[start].is_keyword(words[0]) {
            continue;
        }
        let mut pos = start + 1;
        for word in &words[1..] {
            while tokens.get(pos).map(Token::is_whitespace).unwrap_or(false) {
                pos += 1;
            }
            match tokens.get(pos) {
                Some(t) if t.is_keyword(word) => pos += 1,
                _ => continue 'candidates,
            }
        }
        return Some((pos, words.join(" ")));
    }
    None
}
