//! Tokenizer.

use super::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Ident(String),
    Punct(&'static str),
    Eof,
}

/// Raw template literal piece; expression sources are parsed later.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(String),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub newline_before: bool,
}

// Longest first.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==", "!=",
    "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
    "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-", "*", "/", "%",
    "&", "|", "^", "!", "~", "?", ":", "=", ".",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Syntax {
            message: message.into(),
            line: self.line,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, EvalError> {
        let mut tokens = Vec::new();
        loop {
            let newline_before = self.skip_trivia()?;
            let line = self.line;
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    newline_before,
                });
                return Ok(tokens);
            };

            let kind = if c.is_ascii_digit()
                || (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()))
            {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.bump();
                TokenKind::Str(self.string(c)?)
            } else if c == '`' {
                self.bump();
                self.template()?
            } else if is_ident_start(c) {
                let mut name = String::new();
                while let Some(c) = self.peek().filter(|c| is_ident_part(*c)) {
                    name.push(c);
                    self.bump();
                }
                TokenKind::Ident(name)
            } else {
                self.punct()?
            };

            tokens.push(Token {
                kind,
                line,
                newline_before,
            });
        }
    }

    /// Skip whitespace and comments; report whether a newline was crossed.
    fn skip_trivia(&mut self) -> Result<bool, EvalError> {
        let mut newline = false;
        loop {
            match self.peek() {
                Some('\n') => {
                    newline = true;
                    self.bump();
                }
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some('\n') => newline = true,
                            Some(_) => {}
                            None => return Err(self.error("Unterminated comment")),
                        }
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    fn number(&mut self) -> Result<TokenKind, EvalError> {
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('b') | Some('B') => Some(2),
                Some('o') | Some('O') => Some(8),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(c) = self.peek().filter(|c| c.is_digit(radix) || *c == '_') {
                    if c != '_' {
                        digits.push(c);
                    }
                    self.bump();
                }
                let value = u64::from_str_radix(&digits, radix)
                    .map_err(|_| self.error("Invalid numeric literal"))?;
                return Ok(TokenKind::Number(value as f64));
            }
        }

        let mut text = String::new();
        while let Some(c) = self.peek().filter(|c| c.is_ascii_digit() || *c == '_') {
            if c != '_' {
                text.push(c);
            }
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1).map_or(true, |c| c.is_ascii_digit() || !is_ident_start(c)) {
            text.push('.');
            self.bump();
            while let Some(c) = self.peek().filter(|c| c.is_ascii_digit() || *c == '_') {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = self.peek_at(1);
            let digit_at = if matches!(sign, Some('+') | Some('-')) { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                text.push('e');
                self.bump();
                if digit_at == 2 {
                    if let Some(s) = self.bump() {
                        text.push(s);
                    }
                }
                while let Some(c) = self.peek().filter(|c| c.is_ascii_digit()) {
                    text.push(c);
                    self.bump();
                }
            }
        }
        if self.peek().is_some_and(is_ident_start) {
            return Err(self.error("Invalid or unexpected token after number"));
        }
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("Invalid numeric literal: {}", text)))
    }

    fn string(&mut self, quote: char) -> Result<String, EvalError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error("Unterminated string literal")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), EvalError> {
        let Some(c) = self.bump() else {
            return Err(self.error("Unterminated escape sequence"));
        };
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            '\n' => {}
            'x' => {
                let hex: String = (0..2).filter_map(|_| self.bump()).collect();
                out.push(self.code_point(&hex)?);
            }
            'u' => {
                let hex: String = if self.peek() == Some('{') {
                    self.bump();
                    let mut h = String::new();
                    while let Some(c) = self.bump() {
                        if c == '}' {
                            break;
                        }
                        h.push(c);
                    }
                    h
                } else {
                    (0..4).filter_map(|_| self.bump()).collect()
                };
                out.push(self.code_point(&hex)?);
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn code_point(&self, hex: &str) -> Result<char, EvalError> {
        u32::from_str_radix(hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("Invalid escape sequence"))
    }

    fn template(&mut self) -> Result<TokenKind, EvalError> {
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("Unterminated template literal")),
                Some('`') => break,
                Some('\\') => self.escape(&mut text)?,
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    parts.push(TemplatePart::Expr(self.template_expr()?));
                }
                Some(c) => text.push(c),
            }
        }
        if !text.is_empty() || parts.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        Ok(TokenKind::Template(parts))
    }

    /// Raw source of a `${ ... }` substitution, honoring nested braces and strings.
    fn template_expr(&mut self) -> Result<String, EvalError> {
        let mut depth = 0usize;
        let mut src = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("Unterminated template substitution"));
            };
            match c {
                '{' => depth += 1,
                '}' if depth == 0 => return Ok(src),
                '}' => depth -= 1,
                '"' | '\'' | '`' => {
                    src.push(c);
                    while let Some(inner) = self.bump() {
                        src.push(inner);
                        if inner == '\\' {
                            if let Some(escaped) = self.bump() {
                                src.push(escaped);
                            }
                            continue;
                        }
                        if inner == c {
                            break;
                        }
                    }
                    continue;
                }
                _ => {}
            }
            src.push(c);
        }
    }

    fn punct(&mut self) -> Result<TokenKind, EvalError> {
        for p in PUNCTUATORS {
            let len = p.chars().count();
            let matches = p
                .chars()
                .enumerate()
                .all(|(i, pc)| self.peek_at(i) == Some(pc));
            if !matches {
                continue;
            }
            // `a?.5:b` is a conditional, not optional chaining.
            if *p == "?." && self.peek_at(2).is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            for _ in 0..len {
                self.bump();
            }
            return Ok(TokenKind::Punct(p));
        }
        let c = self.peek().unwrap_or(' ');
        Err(self.error(format!("Invalid or unexpected token '{}'", c)))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn numbers_and_operators() {
        assert_eq!(
            kinds("x **= 0x1F + .5"),
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::Punct("**="),
                TokenKind::Number(31.0),
                TokenKind::Punct("+"),
                TokenKind::Number(0.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn member_access_on_integer_literal_is_not_a_fraction() {
        assert_eq!(
            kinds("1.5e3 2..toString"),
            vec![
                TokenKind::Number(1500.0),
                TokenKind::Number(2.0),
                TokenKind::Punct("."),
                TokenKind::Ident("toString".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nb" "A""#),
            vec![
                TokenKind::Str("it's".to_string()),
                TokenKind::Str("a\nb".to_string()),
                TokenKind::Str("A".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn template_substitutions_keep_raw_source() {
        assert_eq!(
            kinds("`sum: ${ {a:1}.a + 1 } done`"),
            vec![
                TokenKind::Template(vec![
                    TemplatePart::Text("sum: ".to_string()),
                    TemplatePart::Expr(" {a:1}.a + 1 ".to_string()),
                    TemplatePart::Text(" done".to_string()),
                ]),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_and_newlines() {
        let tokens = tokenize("a // note\n/* block */ b").unwrap();
        assert!(!tokens[0].newline_before);
        assert!(tokens[1].newline_before);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn optional_chain_versus_conditional() {
        assert_eq!(kinds("a?.b")[1], TokenKind::Punct("?."));
        assert_eq!(kinds("a?.5:1")[1], TokenKind::Punct("?"));
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        assert!(matches!(tokenize("'abc"), Err(EvalError::Syntax { .. })));
    }
}
