//! Hand-written lexer.
//!
//! A small state machine over the source characters: each state
//! function consumes input and returns the next state, `None` ending
//! the scan. The token stream always ends with a single EOF token.

use sift_core::{ErrorCode, Span};
use sift_source::Source;

use crate::error::ParseError;
use crate::token::{Token, TokenKind};

const EOF: char = '\0';

/// Identifier characters: Unicode letters, digits, `_` and `$`.
fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Lex a source into tokens. On error the first error is returned.
pub fn lex(source: &Source) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(source);

    let mut state: StateFn = StateFn(root);
    loop {
        match (state.0)(&mut lexer) {
            Some(next) => state = next,
            None => break,
        }
    }

    match lexer.err.take() {
        Some(err) => Err(err),
        None => Ok(lexer.tokens),
    }
}

struct StateFn(fn(&mut Lexer) -> Option<StateFn>);

struct Lexer {
    chars: Vec<char>,
    // Byte offset of each character, plus the total length at the end.
    offsets: Vec<u32>,
    start: usize,
    end: usize,
    tokens: Vec<Token>,
    err: Option<ParseError>,
}

impl Lexer {
    fn new(source: &Source) -> Self {
        let mut chars = Vec::new();
        let mut offsets = Vec::new();
        for (i, c) in source.text().char_indices() {
            chars.push(c);
            offsets.push(i as u32);
        }
        offsets.push(source.text().len() as u32);
        Self {
            chars,
            offsets,
            start: 0,
            end: 0,
            tokens: Vec::new(),
            err: None,
        }
    }

    fn next(&mut self) -> char {
        if self.end >= self.chars.len() {
            self.end += 1;
            return EOF;
        }
        let c = self.chars[self.end];
        self.end += 1;
        c
    }

    fn peek(&mut self) -> char {
        let c = self.next();
        self.backup();
        c
    }

    fn backup(&mut self) {
        self.end -= 1;
    }

    fn accept(&mut self, valid: &str) -> bool {
        if valid.contains(self.next()) {
            return true;
        }
        self.backup();
        false
    }

    fn accept_run(&mut self, valid: &str) {
        while valid.contains(self.next()) {}
        self.backup();
    }

    fn byte_at(&self, index: usize) -> u32 {
        let clamped = index.min(self.offsets.len() - 1);
        self.offsets[clamped]
    }

    fn span(&self) -> Span {
        Span::at(self.byte_at(self.start), self.byte_at(self.end))
    }

    fn word(&self) -> String {
        let end = self.end.min(self.chars.len());
        if self.start > end {
            return String::new();
        }
        self.chars[self.start..end].iter().collect()
    }

    fn commit(&mut self) {
        self.start = self.end;
    }

    fn skip(&mut self) {
        self.commit();
    }

    fn emit(&mut self, kind: TokenKind) {
        let value = self.word();
        self.emit_value(kind, value);
    }

    fn emit_value(&mut self, kind: TokenKind, value: String) {
        let span = self.span();
        self.tokens.push(Token::new(kind, value, span));
        self.commit();
    }

    fn emit_eof(&mut self) {
        let len = self.byte_at(self.chars.len());
        self.tokens
            .push(Token::new(TokenKind::Eof, "", Span::at(len, len)));
    }

    fn error(&mut self, code: ErrorCode, message: impl Into<String>) -> Option<StateFn> {
        if self.err.is_none() {
            let at = self.end.saturating_sub(1);
            let span = Span::at(self.byte_at(at), self.byte_at(at + 1));
            self.err = Some(ParseError::new(code, span, message));
        }
        None
    }

    fn skip_spaces(&mut self) {
        while self.peek() == ' ' {
            self.next();
        }
        self.skip();
    }
}

fn root(l: &mut Lexer) -> Option<StateFn> {
    let c = l.next();
    match c {
        EOF if l.end > l.chars.len() => {
            l.backup();
            l.emit_eof();
            return None;
        }
        c if c.is_whitespace() => {
            l.accept_run(" \t\r\n");
            l.skip();
        }
        '\'' | '"' => {
            scan_string(l, c)?;
            let raw = l.word();
            match unescape(&raw) {
                Ok(value) => l.emit_value(TokenKind::String, value),
                Err(message) => return l.error(ErrorCode::E005, message),
            }
        }
        '`' => {
            return scan_raw_string(l);
        }
        '0'..='9' => {
            l.backup();
            return Some(StateFn(number));
        }
        '?' => {
            l.accept(".?");
            l.emit(TokenKind::Operator);
        }
        '/' => return Some(StateFn(slash)),
        '#' => return Some(StateFn(pointer)),
        '|' => {
            l.accept("|");
            l.emit(TokenKind::Operator);
        }
        ':' => {
            l.accept(":");
            l.emit(TokenKind::Operator);
        }
        '(' | '[' | '{' | ')' | ']' | '}' => l.emit(TokenKind::Bracket),
        ',' | ';' | '%' | '+' | '-' | '^' => l.emit(TokenKind::Operator),
        '&' | '!' | '=' | '*' | '<' | '>' => {
            l.accept("&=*");
            l.emit(TokenKind::Operator);
        }
        '.' => {
            l.backup();
            return Some(StateFn(dot));
        }
        c if is_name_char(c) => {
            l.backup();
            return Some(StateFn(identifier));
        }
        other => {
            return l.error(
                ErrorCode::E001,
                format!("unrecognized character: {:?}", other),
            )
        }
    }
    Some(StateFn(root))
}

fn number(l: &mut Lexer) -> Option<StateFn> {
    if !scan_number(l) {
        let word = l.word();
        return l.error(ErrorCode::E003, format!("bad number syntax: {:?}", word));
    }
    l.emit(TokenKind::Number);
    Some(StateFn(root))
}

fn scan_number(l: &mut Lexer) -> bool {
    let mut digits = "0123456789_";
    if l.accept("0") {
        // A leading zero selects a base prefix, never octal-by-default.
        if l.accept("xX") {
            digits = "0123456789abcdefABCDEF_";
        } else if l.accept("oO") {
            digits = "01234567_";
        } else if l.accept("bB") {
            digits = "01_";
        }
    }
    l.accept_run(digits);
    let end = l.end;
    if l.accept(".") {
        // `1..5` is a range, not a malformed float: leave both dots.
        if l.peek() == '.' {
            l.end = end;
            return true;
        }
        l.accept_run(digits);
    }
    if l.accept("eE") {
        l.accept("+-");
        l.accept_run(digits);
    }
    // The next character must not continue into a name.
    if is_name_char(l.peek()) {
        l.next();
        return false;
    }
    true
}

fn dot(l: &mut Lexer) -> Option<StateFn> {
    l.next();
    if l.accept("0123456789") {
        l.backup();
        return Some(StateFn(number));
    }
    l.accept(".");
    l.emit(TokenKind::Operator);
    Some(StateFn(root))
}

fn identifier(l: &mut Lexer) -> Option<StateFn> {
    loop {
        let c = l.next();
        if is_name_char(c) {
            continue;
        }
        l.backup();
        break;
    }
    match l.word().as_str() {
        "not" => return Some(StateFn(not)),
        "in" | "or" | "and" | "matches" | "contains" | "startsWith" | "endsWith" | "let"
        | "if" | "else" => l.emit(TokenKind::Operator),
        _ => l.emit(TokenKind::Identifier),
    }
    Some(StateFn(root))
}

/// `not` followed by a combinable operator is emitted as two operator
/// tokens; the parser merges them.
fn not(l: &mut Lexer) -> Option<StateFn> {
    l.emit(TokenKind::Operator);

    l.skip_spaces();
    let end = l.end;

    loop {
        let c = l.next();
        if is_name_char(c) {
            continue;
        }
        l.backup();
        break;
    }

    match l.word().as_str() {
        "in" | "matches" | "contains" | "startsWith" | "endsWith" => l.emit(TokenKind::Operator),
        _ => l.end = end,
    }
    Some(StateFn(root))
}

fn slash(l: &mut Lexer) -> Option<StateFn> {
    if l.accept("/") {
        return Some(StateFn(single_line_comment));
    }
    if l.accept("*") {
        return Some(StateFn(multi_line_comment));
    }
    l.emit(TokenKind::Operator);
    Some(StateFn(root))
}

fn single_line_comment(l: &mut Lexer) -> Option<StateFn> {
    loop {
        let c = l.next();
        if c == '\n' || (c == EOF && l.end > l.chars.len()) {
            break;
        }
    }
    if l.end > l.chars.len() {
        l.backup();
    }
    l.skip();
    Some(StateFn(root))
}

fn multi_line_comment(l: &mut Lexer) -> Option<StateFn> {
    loop {
        let c = l.next();
        if c == EOF && l.end > l.chars.len() {
            return l.error(ErrorCode::E004, "unclosed comment");
        }
        if c == '*' && l.accept("/") {
            break;
        }
    }
    l.skip();
    Some(StateFn(root))
}

fn pointer(l: &mut Lexer) -> Option<StateFn> {
    l.emit(TokenKind::Operator);
    loop {
        let c = l.next();
        if is_name_char(c) {
            continue;
        }
        l.backup();
        if !l.word().is_empty() {
            l.emit(TokenKind::Identifier);
        }
        return Some(StateFn(root));
    }
}

fn scan_string(l: &mut Lexer, quote: char) -> Option<()> {
    loop {
        let c = l.next();
        if c == '\n' || (c == EOF && l.end > l.chars.len()) {
            l.error(ErrorCode::E002, "literal not terminated");
            return None;
        }
        if c == '\\' {
            // Consume the escaped character so an escaped quote does
            // not close the literal; decoding happens in unescape.
            let e = l.next();
            if e == EOF && l.end > l.chars.len() {
                l.error(ErrorCode::E002, "literal not terminated");
                return None;
            }
            continue;
        }
        if c == quote {
            return Some(());
        }
    }
}

fn scan_raw_string(l: &mut Lexer) -> Option<StateFn> {
    loop {
        let c = l.next();
        if c == EOF && l.end > l.chars.len() {
            return l.error(ErrorCode::E002, "literal not terminated");
        }
        if c == '`' {
            break;
        }
    }
    let value: String = l.chars[l.start + 1..l.end - 1].iter().collect();
    l.emit_value(TokenKind::String, value);
    Some(StateFn(root))
}

/// Decode the escape sequences of a quoted string literal.
///
/// Handles the simple escapes, octal `\NNN`, hex `\xHH` and Unicode
/// `\uHHHH` / `\UHHHHHHHH`.
fn unescape(raw: &str) -> Result<String, String> {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() < 2 {
        return Err("literal not terminated".to_string());
    }
    let inner = &chars[1..chars.len() - 1];

    let mut out = String::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        let c = inner[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }
        i += 1;
        if i >= inner.len() {
            return Err("invalid char escape".to_string());
        }
        let e = inner[i];
        i += 1;
        match e {
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0C}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\u{0B}'),
            '\\' => out.push('\\'),
            '\'' | '"' => out.push(e),
            '0'..='7' => {
                let mut value = e.to_digit(8).unwrap();
                let mut taken = 1;
                while taken < 3 && i < inner.len() {
                    match inner[i].to_digit(8) {
                        Some(d) => {
                            value = value * 8 + d;
                            i += 1;
                            taken += 1;
                        }
                        None => break,
                    }
                }
                match char::from_u32(value) {
                    Some(c) => out.push(c),
                    None => return Err("invalid char escape".to_string()),
                }
            }
            'x' => out.push(read_hex(inner, &mut i, 2)?),
            'u' => out.push(read_hex(inner, &mut i, 4)?),
            'U' => out.push(read_hex(inner, &mut i, 8)?),
            _ => return Err("invalid char escape".to_string()),
        }
    }
    Ok(out)
}

fn read_hex(inner: &[char], i: &mut usize, n: usize) -> Result<char, String> {
    let mut value: u32 = 0;
    for _ in 0..n {
        if *i >= inner.len() {
            return Err("invalid char escape".to_string());
        }
        let d = inner[*i]
            .to_digit(16)
            .ok_or_else(|| "invalid char escape".to_string())?;
        value = value * 16 + d;
        *i += 1;
    }
    char::from_u32(value).ok_or_else(|| "invalid char escape".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        lex(&Source::unnamed(src)).unwrap()
    }

    fn values(src: &str) -> Vec<(TokenKind, String)> {
        tokens(src)
            .into_iter()
            .map(|t| (t.kind, t.value))
            .collect()
    }

    #[test]
    fn ends_with_eof() {
        let toks = tokens("1");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[1].kind, TokenKind::Eof);
    }

    #[test]
    fn simple_expression() {
        assert_eq!(
            values("a + b"),
            vec![
                (TokenKind::Identifier, "a".to_string()),
                (TokenKind::Operator, "+".to_string()),
                (TokenKind::Identifier, "b".to_string()),
                (TokenKind::Eof, "".to_string()),
            ]
        );
    }

    #[test]
    fn number_bases() {
        assert_eq!(values("0x2A")[0].1, "0x2A");
        assert_eq!(values("0o17")[0].1, "0o17");
        assert_eq!(values("0b101")[0].1, "0b101");
        assert_eq!(values("1_000_000")[0].1, "1_000_000");
        assert_eq!(values("3.14")[0].1, "3.14");
        assert_eq!(values("1e10")[0].1, "1e10");
        assert_eq!(values("1.5e-3")[0].1, "1.5e-3");
        assert_eq!(values(".5")[0].1, ".5");
    }

    #[test]
    fn bad_number() {
        let err = lex(&Source::unnamed("1abc")).unwrap_err();
        assert!(err.message.contains("bad number syntax"));
    }

    #[test]
    fn range_splits_dots() {
        assert_eq!(
            values("1..5"),
            vec![
                (TokenKind::Number, "1".to_string()),
                (TokenKind::Operator, "..".to_string()),
                (TokenKind::Number, "5".to_string()),
                (TokenKind::Eof, "".to_string()),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(values(r#""a\nb""#)[0].1, "a\nb");
        assert_eq!(values(r#""\x41""#)[0].1, "A");
        assert_eq!(values(r#""中""#)[0].1, "中");
        assert_eq!(values(r#""\U0001F600""#)[0].1, "😀");
        assert_eq!(values(r#""\101""#)[0].1, "A");
        assert_eq!(values(r#""say \"hi\"""#)[0].1, "say \"hi\"");
        assert_eq!(values(r#"'it\'s'"#)[0].1, "it's");
    }

    #[test]
    fn raw_strings_keep_backslashes() {
        assert_eq!(values(r"`a\nb`")[0].1, r"a\nb");
    }

    #[test]
    fn unterminated_string() {
        let err = lex(&Source::unnamed("\"abc")).unwrap_err();
        assert_eq!(err.code, ErrorCode::E002);
    }

    #[test]
    fn invalid_escape() {
        let err = lex(&Source::unnamed(r#""\q""#)).unwrap_err();
        assert_eq!(err.code, ErrorCode::E005);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            values("1 // trailing\n+ 2"),
            vec![
                (TokenKind::Number, "1".to_string()),
                (TokenKind::Operator, "+".to_string()),
                (TokenKind::Number, "2".to_string()),
                (TokenKind::Eof, "".to_string()),
            ]
        );
        assert_eq!(values("1 /* x */ + 2").len(), 4);
    }

    #[test]
    fn unclosed_comment() {
        let err = lex(&Source::unnamed("1 /* abc")).unwrap_err();
        assert_eq!(err.code, ErrorCode::E004);
    }

    #[test]
    fn keywords_become_operators() {
        for kw in ["in", "or", "and", "matches", "let", "if", "else"] {
            let toks = tokens(kw);
            assert_eq!(toks[0].kind, TokenKind::Operator, "keyword {}", kw);
        }
        // but ordinary identifiers do not
        assert_eq!(tokens("input")[0].kind, TokenKind::Identifier);
    }

    #[test]
    fn not_combines_with_membership() {
        assert_eq!(
            values("a not in b"),
            vec![
                (TokenKind::Identifier, "a".to_string()),
                (TokenKind::Operator, "not".to_string()),
                (TokenKind::Operator, "in".to_string()),
                (TokenKind::Identifier, "b".to_string()),
                (TokenKind::Eof, "".to_string()),
            ]
        );
    }

    #[test]
    fn not_alone_stays_unary() {
        assert_eq!(
            values("not ok"),
            vec![
                (TokenKind::Operator, "not".to_string()),
                (TokenKind::Identifier, "ok".to_string()),
                (TokenKind::Eof, "".to_string()),
            ]
        );
    }

    #[test]
    fn multi_char_operators() {
        for op in [
            "==", "!=", "<=", ">=", "&&", "||", "**", "..", "??", "?.", "::",
        ] {
            let toks = tokens(op);
            assert_eq!(toks[0].value, op, "operator {}", op);
            assert_eq!(toks[0].kind, TokenKind::Operator);
        }
    }

    #[test]
    fn pointers() {
        assert_eq!(
            values("#"),
            vec![
                (TokenKind::Operator, "#".to_string()),
                (TokenKind::Eof, "".to_string()),
            ]
        );
        assert_eq!(
            values("#acc"),
            vec![
                (TokenKind::Operator, "#".to_string()),
                (TokenKind::Identifier, "acc".to_string()),
                (TokenKind::Eof, "".to_string()),
            ]
        );
    }

    #[test]
    fn dollar_identifiers() {
        assert_eq!(tokens("$env")[0].value, "$env");
        assert_eq!(tokens("$env")[0].kind, TokenKind::Identifier);
    }

    #[test]
    fn unicode_identifiers() {
        assert_eq!(tokens("日本語")[0].kind, TokenKind::Identifier);
    }

    #[test]
    fn unrecognized_character() {
        let err = lex(&Source::unnamed("1 @ 2")).unwrap_err();
        assert_eq!(err.code, ErrorCode::E001);
    }

    #[test]
    fn spans_are_byte_offsets() {
        let toks = tokens("ab + cd");
        assert_eq!(toks[0].span, Span::at(0, 2));
        assert_eq!(toks[1].span, Span::at(3, 4));
        assert_eq!(toks[2].span, Span::at(5, 7));
    }

    #[test]
    fn brackets() {
        let toks = tokens("({[]})");
        assert!(toks[..6].iter().all(|t| t.kind == TokenKind::Bracket));
    }
}
