//! Shallow SQL fragment compiler.
//!
//! Bare identifiers are quoted with the dialect's quote characters and known
//! keywords are upper-cased. Quoted literals, `:name` placeholders and
//! parenthesized subqueries pass through untouched. `-- ` line comments are
//! stripped. No SQL grammar is parsed beyond that.

use crate::dialect::Dialect;

/// Compiles one SQL fragment (a column, a condition, an order term…).
pub fn compile_expression(dialect: &dyn Dialect, expr: &str) -> String {
    let trimmed = expr.trim();
    if starts_with_select(trimmed) {
        return expr.to_owned();
    }
    if is_simple_name(trimmed) {
        return if dialect.is_keyword(trimmed) {
            trimmed.to_ascii_uppercase()
        } else {
            dialect.quote_name(trimmed)
        };
    }
    Lexer::new(dialect, trimmed).run()
}

/// Splits a comma separated list and compiles each item.
pub fn compile_list(dialect: &dyn Dialect, list: &str) -> Vec<String> {
    if starts_with_select(list.trim()) {
        return vec![list.trim().to_owned()];
    }
    split_top_level(list, ',')
        .iter()
        .map(|item| compile_expression(dialect, item))
        .collect()
}

/// Splits `s` at `sep` where it is neither nested in parentheses nor inside a
/// quoted literal. Items are trimmed; empty items are dropped.
pub fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' | '[' => {
                i = skip_literal(&chars, i);
                continue;
            }
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if c == sep && depth == 0 => {
                push_item(&mut items, &chars[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    push_item(&mut items, &chars[start..]);
    items
}

fn push_item(items: &mut Vec<String>, chars: &[char]) {
    let item: String = chars.iter().collect();
    let item = item.trim();
    if !item.is_empty() {
        items.push(item.to_owned());
    }
}

/// Index just past the literal opened at `start`. A doubled closing quote
/// inside the literal is an escape, not the end.
fn skip_literal(chars: &[char], start: usize) -> usize {
    let close = match chars[start] {
        '[' => ']',
        c => c,
    };
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == close {
            if close != ']' && chars.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Index of the `)` closing the `(` at `open`.
fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\'' | '"' | '`' | '[' => {
                i = skip_literal(chars, i);
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn starts_with_select(s: &str) -> bool {
    s.len() >= 7 && s.is_char_boundary(7) && s[..7].eq_ignore_ascii_case("SELECT ")
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// `column` or `table.column`.
fn is_simple_name(s: &str) -> bool {
    let mut parts = s.split('.');
    let valid = |p: &str| {
        let mut chars = p.chars();
        matches!(chars.next(), Some(c) if is_ident_start(c)) && chars.all(is_ident_char)
    };
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), None, None) => valid(a),
        (Some(a), Some(b), None) => valid(a) && valid(b),
        _ => false,
    }
}

struct Lexer<'a> {
    dialect: &'a dyn Dialect,
    chars: Vec<char>,
    pos: usize,
    out: String,
    stripped_comment: bool,
}

impl<'a> Lexer<'a> {
    fn new(dialect: &'a dyn Dialect, expr: &str) -> Self {
        Self {
            dialect,
            chars: expr.chars().collect(),
            pos: 0,
            out: String::with_capacity(expr.len() + 16),
            stripped_comment: false,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn copy_span(&mut self, end: usize) {
        self.out.extend(&self.chars[self.pos..end]);
        self.pos = end;
    }

    fn run(mut self) -> String {
        while let Some(c) = self.peek(0) {
            match c {
                c if is_ident_start(c) => self.identifier(),
                c if c.is_ascii_digit() => self.number(),
                '(' => self.open_paren(),
                ':' => self.colon(),
                '\'' | '"' | '`' | '[' => {
                    let end = skip_literal(&self.chars, self.pos);
                    self.copy_span(end);
                }
                '-' if self.peek(1) == Some('-')
                    && matches!(self.peek(2), None | Some(' ') | Some('\t') | Some('\n')) =>
                {
                    self.comment()
                }
                _ => {
                    self.out.push(c);
                    self.pos += 1;
                }
            }
        }
        if self.stripped_comment {
            self.out.trim_end().to_owned()
        } else {
            self.out
        }
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while self.peek(0).is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn identifier(&mut self) {
        let mut word = self.read_ident();
        let mut qualified = false;
        while self.peek(0) == Some('.') {
            match self.peek(1) {
                Some('*') => {
                    word.push_str(".*");
                    self.pos += 2;
                    qualified = true;
                    break;
                }
                Some(c) if is_ident_start(c) => {
                    self.pos += 1;
                    word.push('.');
                    word.push_str(&self.read_ident());
                    qualified = true;
                }
                _ => break,
            }
        }

        if !qualified && self.dialect.is_keyword(&word) {
            self.out.push_str(&word.to_ascii_uppercase());
            return;
        }

        let mut look = self.pos;
        while self.chars.get(look).is_some_and(|c| c.is_whitespace()) {
            look += 1;
        }
        if !qualified && self.chars.get(look) == Some(&'(') {
            if let Some(close) = matching_paren(&self.chars, look) {
                let args: String = self.chars[look + 1..close].iter().collect();
                let compiled: Vec<String> = if starts_with_select(args.trim()) {
                    vec![args.trim().to_owned()]
                } else {
                    split_top_level(&args, ',')
                        .iter()
                        .map(|arg| compile_expression(self.dialect, arg))
                        .collect()
                };
                self.out.push_str(&word.to_ascii_uppercase());
                self.out.push('(');
                self.out.push_str(&compiled.join(", "));
                self.out.push(')');
                self.pos = close + 1;
                return;
            }
        }

        self.out.push_str(&self.dialect.quote_name(&word));
    }

    fn number(&mut self) {
        let start = self.pos;
        while self
            .peek(0)
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        {
            self.pos += 1;
        }
        self.out.extend(&self.chars[start..self.pos]);
    }

    fn open_paren(&mut self) {
        let mut look = self.pos + 1;
        while self.chars.get(look).is_some_and(|c| c.is_whitespace()) {
            look += 1;
        }
        let word: String = self.chars[look..self.chars.len().min(look + 6)]
            .iter()
            .collect();
        if word.eq_ignore_ascii_case("SELECT")
            && self.chars.get(look + 6).is_some_and(|c| c.is_whitespace())
        {
            if let Some(close) = matching_paren(&self.chars, self.pos) {
                self.copy_span(close + 1);
                return;
            }
        }
        self.out.push('(');
        self.pos += 1;
    }

    fn colon(&mut self) {
        let start = self.pos;
        self.pos += 1;
        // `::type` casts keep the type name raw.
        if self.peek(0) == Some(':') {
            self.pos += 1;
        }
        while self.peek(0).is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.out.extend(&self.chars[start..self.pos]);
    }

    fn comment(&mut self) {
        while self.peek(0).is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
        self.stripped_comment = true;
    }
}
