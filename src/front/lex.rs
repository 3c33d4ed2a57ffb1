//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// Byte offset of `text` within the original input.
    pub pos: usize,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display, Debug)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("fnum")]
    FloatNum,
    #[display("char")]
    CharLit,
    #[display("true")]
    True,
    #[display("false")]
    False,
    #[display("int")]
    Int,
    #[display("double")]
    Double,
    #[display("char")]
    CharKw,
    #[display("bool")]
    Bool,
    #[display("void")]
    Void,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("while")]
    While,
    #[display("for")]
    For,
    #[display("return")]
    Return,
    #[display("function")]
    Function,
    #[display("exec")]
    Exec,
    #[display("start")]
    Start,
    #[display("end")]
    End,
    #[display("=")]
    Assign,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(";")]
    Semicolon,
    #[display(",")]
    Comma,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Mod,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("&&")]
    And,
    #[display("||")]
    Or,
    #[display("!")]
    Not,
}

pub struct LexError(pub usize, pub char);

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for LexError {}

/// A single regex matcher paired with the token kind it produces, or `None`
/// if the matched text should be looked up in the keyword table instead
/// (identifiers double as keyword spellings until checked against the table).
struct Matcher {
    regex: Regex,
    kind: Option<TokenKind>,
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<Matcher>,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("int", TokenKind::Int),
    ("double", TokenKind::Double),
    ("char", TokenKind::CharKw),
    ("bool", TokenKind::Bool),
    ("void", TokenKind::Void),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("for", TokenKind::For),
    ("return", TokenKind::Return),
    ("function", TokenKind::Function),
    ("exec", TokenKind::Exec),
    ("start", TokenKind::Start),
    ("end", TokenKind::End),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
];

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        // Order matters: longer/more specific operators must come before
        // their single-character prefixes (e.g. `<=` before `<`).
        let specs: &[(&str, TokenKind)] = &[
            (r"\A[A-Za-z_][A-Za-z0-9_]*", TokenKind::Id),
            (r"\A[0-9]+\.[0-9]+", TokenKind::FloatNum),
            (r"\A[0-9]+", TokenKind::Num),
            (r"\A'(\\.|[^'\\])'", TokenKind::CharLit),
            (r"\A==", TokenKind::Eq),
            (r"\A=", TokenKind::Assign),
            (r"\A\{", TokenKind::LBrace),
            (r"\A\}", TokenKind::RBrace),
            (r"\A\(", TokenKind::LParen),
            (r"\A\)", TokenKind::RParen),
            (r"\A\[", TokenKind::LBracket),
            (r"\A\]", TokenKind::RBracket),
            (r"\A;", TokenKind::Semicolon),
            (r"\A,", TokenKind::Comma),
            (r"\A<=", TokenKind::Le),
            (r"\A<", TokenKind::Lt),
            (r"\A>=", TokenKind::Ge),
            (r"\A>", TokenKind::Gt),
            (r"\A!=", TokenKind::Ne),
            (r"\A&&", TokenKind::And),
            (r"\A\|\|", TokenKind::Or),
            (r"\A!", TokenKind::Not),
            (r"\A\+", TokenKind::Plus),
            (r"\A-", TokenKind::Minus),
            (r"\A\*", TokenKind::Mul),
            (r"\A/", TokenKind::Div),
            (r"\A%", TokenKind::Mod),
        ];
        let matchers = specs
            .iter()
            .map(|(pat, kind)| Matcher {
                regex: Regex::new(pat).unwrap(),
                kind: if *kind == TokenKind::Id { None } else { Some(*kind) },
            })
            .collect();
        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://[^\n]*))*").unwrap(),
            matchers,
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.peek_pos_after_whitespace() == self.input.len()
    }

    fn peek_pos_after_whitespace(&self) -> usize {
        match self.whitespace.find(&self.input[self.pos..]) {
            Some(m) => self.pos + m.end(),
            None => self.pos,
        }
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        self.pos = self.peek_pos_after_whitespace();
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.pos >= self.input.len() {
            return Ok(None);
        }

        let rest = &self.input[self.pos..];
        for matcher in &self.matchers {
            if let Some(m) = matcher.regex.find(rest) {
                let text = m.as_str();
                let start = self.pos;
                self.pos += m.end();

                let kind = match matcher.kind {
                    Some(kind) => kind,
                    None => KEYWORDS
                        .iter()
                        .find(|(kw, _)| *kw == text)
                        .map(|(_, kind)| *kind)
                        .unwrap_or(TokenKind::Id),
                };
                return Ok(Some(Token { kind, text, pos: start }));
            }
        }

        let bad = rest.chars().next().unwrap();
        Err(LexError(self.pos, bad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = vec![];
        while let Some(tok) = lexer.next().unwrap() {
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn skips_comments_and_whitespace() {
        let toks = kinds("  // a comment\n  42 // trailing\n");
        assert_eq!(toks, vec![TokenKind::Num]);
    }

    #[test]
    fn keywords_beat_identifiers() {
        let toks = kinds("if while foo");
        assert_eq!(toks, vec![TokenKind::If, TokenKind::While, TokenKind::Id]);
    }

    #[test]
    fn longest_operator_wins() {
        let toks = kinds("<= < ==");
        assert_eq!(toks, vec![TokenKind::Le, TokenKind::Lt, TokenKind::Eq]);
    }

    #[test]
    fn rejects_unknown_character() {
        let mut lexer = Lexer::new("@");
        assert!(lexer.next().is_err());
    }
}
