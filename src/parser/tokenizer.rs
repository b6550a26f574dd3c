// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Line tokenizer shared by the dialect parsers.
//!
//! Produces identifier, number, string, and punctuation tokens with column
//! spans. Number tokens keep their raw text; each dialect owns its literal
//! grammar.

use crate::core::diag::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    /// Raw numeric literal text (suffix/prefix interpretation is
    /// dialect-local).
    Num(String),
    /// String literal contents, unescaped.
    Str(Vec<u8>),
    /// Single-character punctuation.
    Punct(char),
    /// Multi-character operator.
    Op(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub span: Span,
}

/// Tokenizer configuration per dialect.
pub struct TokenizerConfig {
    /// Characters that begin a to-end-of-line comment.
    pub comment_chars: &'static [char],
    /// `$`-prefixed hex literals (NASM `$0A2`).
    pub dollar_hex: bool,
    /// Extra characters allowed inside identifiers.
    pub ident_extra: &'static [char],
}

pub fn tokenize_line(
    line: &str,
    line_num: u32,
    config: &TokenizerConfig,
) -> Result<Vec<Token>, (String, Span)> {
    let mut toks = Vec::new();
    let bytes: Vec<char> = line.chars().collect();
    let mut i = 0usize;

    let is_ident_start = |c: char| {
        c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '?' || c == '@'
    };
    let is_ident_char = |c: char, config: &TokenizerConfig| {
        c.is_ascii_alphanumeric()
            || c == '_'
            || c == '.'
            || c == '?'
            || c == '@'
            || c == '#'
            || c == '~'
            || config.ident_extra.contains(&c)
    };

    while i < bytes.len() {
        let c = bytes[i];
        let col = i + 1;
        let span = |end: usize| Span::new(line_num, col, end);

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if config.comment_chars.contains(&c) {
            break;
        }

        if is_ident_start(c) {
            let start = i;
            while i < bytes.len() && is_ident_char(bytes[i], config) {
                i += 1;
            }
            let text: String = bytes[start..i].iter().collect();
            toks.push(Token {
                tok: Tok::Ident(text),
                span: span(i),
            });
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == '_')
            {
                i += 1;
            }
            // A dotted tail keeps floats as one token (1.5, 2.5e10).
            if i < bytes.len() && bytes[i] == '.' {
                i += 1;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric()
                        || bytes[i] == '_'
                        || bytes[i] == '+'
                        || bytes[i] == '-')
                {
                    i += 1;
                }
            }
            let text: String = bytes[start..i].iter().collect();
            toks.push(Token {
                tok: Tok::Num(text),
                span: span(i),
            });
            continue;
        }

        // NASM-style $-prefixed hex, when it really is a literal.
        if c == '$'
            && config.dollar_hex
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 1].is_ascii_digit()
        {
            let start = i;
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == '_') {
                i += 1;
            }
            let text: String = bytes[start..i].iter().collect();
            toks.push(Token {
                tok: Tok::Num(text),
                span: span(i),
            });
            continue;
        }

        if c == '\'' || c == '"' || c == '`' {
            let quote = c;
            i += 1;
            let mut content = Vec::new();
            let mut closed = false;
            while i < bytes.len() {
                let ch = bytes[i];
                if ch == quote {
                    closed = true;
                    i += 1;
                    break;
                }
                // Backquoted NASM strings and GAS strings support escapes.
                if ch == '\\' && quote != '\'' && i + 1 < bytes.len() {
                    i += 1;
                    let esc = bytes[i];
                    let b = match esc {
                        'n' => b'\n',
                        't' => b'\t',
                        'r' => b'\r',
                        '0' => 0,
                        '\\' => b'\\',
                        '\'' => b'\'',
                        '"' => b'"',
                        '`' => b'`',
                        other => other as u8,
                    };
                    content.push(b);
                    i += 1;
                    continue;
                }
                let mut buf = [0u8; 4];
                content.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                i += 1;
            }
            if !closed {
                return Err(("unterminated string".to_string(), span(bytes.len())));
            }
            toks.push(Token {
                tok: Tok::Str(content),
                span: span(i),
            });
            continue;
        }

        // Multi-character operators first.
        let two: String = bytes[i..(i + 2).min(bytes.len())].iter().collect();
        let op = match two.as_str() {
            "<<" => Some("<<"),
            ">>" => Some(">>"),
            "==" => Some("=="),
            "!=" => Some("!="),
            "<=" => Some("<="),
            ">=" => Some(">="),
            "&&" => Some("&&"),
            "||" => Some("||"),
            "<>" => Some("!="),
            "//" => Some("//"),
            "%%" => Some("%%"),
            _ => None,
        };
        if let Some(op) = op {
            toks.push(Token {
                tok: Tok::Op(op),
                span: span(i + 2),
            });
            i += 2;
            continue;
        }

        match c {
            '+' | '-' | '*' | '/' | '%' | '(' | ')' | '[' | ']' | ',' | ':' | '$' | '&'
            | '|' | '^' | '~' | '!' | '<' | '>' | '=' | '@' => {
                toks.push(Token {
                    tok: Tok::Punct(c),
                    span: span(i + 1),
                });
                i += 1;
            }
            other => {
                return Err((
                    format!("unexpected character `{other}`"),
                    span(i + 1),
                ));
            }
        }
    }
    Ok(toks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NASM: TokenizerConfig = TokenizerConfig {
        comment_chars: &[';'],
        dollar_hex: true,
        ident_extra: &['$'],
    };

    fn toks(line: &str) -> Vec<Tok> {
        tokenize_line(line, 1, &NASM)
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn basic_line() {
        assert_eq!(
            toks("mov eax, 42 ; set accumulator"),
            vec![
                Tok::Ident("mov".to_string()),
                Tok::Ident("eax".to_string()),
                Tok::Punct(','),
                Tok::Num("42".to_string()),
            ]
        );
    }

    #[test]
    fn label_and_colon() {
        assert_eq!(
            toks("start: nop"),
            vec![
                Tok::Ident("start".to_string()),
                Tok::Punct(':'),
                Tok::Ident("nop".to_string()),
            ]
        );
    }

    #[test]
    fn hex_suffix_stays_one_token() {
        assert_eq!(toks("2Ah"), vec![Tok::Num("2Ah".to_string())]);
        assert_eq!(toks("0x2A"), vec![Tok::Num("0x2A".to_string())]);
    }

    #[test]
    fn dollar_alone_is_punct() {
        assert_eq!(
            toks("dd $"),
            vec![Tok::Ident("dd".to_string()), Tok::Punct('$')]
        );
        // $-hex needs a leading digit after the dollar sign.
        assert_eq!(toks("$0A2"), vec![Tok::Num("$0A2".to_string())]);
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(
            toks("db 'abc'"),
            vec![Tok::Ident("db".to_string()), Tok::Str(b"abc".to_vec())]
        );
        assert_eq!(
            toks(r#"db `a\n`"#),
            vec![Tok::Ident("db".to_string()), Tok::Str(b"a\n".to_vec())]
        );
    }

    #[test]
    fn multi_char_operators() {
        assert_eq!(
            toks("1 << 4"),
            vec![
                Tok::Num("1".to_string()),
                Tok::Op("<<"),
                Tok::Num("4".to_string()),
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize_line("db 'oops", 1, &NASM).is_err());
    }
}
