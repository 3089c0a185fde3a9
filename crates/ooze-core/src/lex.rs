use crate::diagnostics::ContextualError;
use crate::src_map::{SrcId, SrcRef};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Ident,
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    SemiColon,
    Equals,
    Arrow,
    Amp,
    Int,
    Float,
    Str,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Keyword {
    Fn,
    Let,
    Select,
    Else,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub src: SrcRef,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Splits the source into tokens. Literal values are parsed later, from
/// the token's source slice.
pub fn lex(src: SrcId, text: &str) -> Result<Vec<Token>, ContextualError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let begin = i;

        let kind = match c {
            ' ' | '\t' | '\r' | '\n' => {
                i += 1;
                continue;
            }
            '(' => {
                i += 1;
                TokenKind::LParen
            }
            ')' => {
                i += 1;
                TokenKind::RParen
            }
            '{' => {
                i += 1;
                TokenKind::LBrace
            }
            '}' => {
                i += 1;
                TokenKind::RBrace
            }
            ',' => {
                i += 1;
                TokenKind::Comma
            }
            ':' => {
                i += 1;
                TokenKind::Colon
            }
            ';' => {
                i += 1;
                TokenKind::SemiColon
            }
            '&' => {
                i += 1;
                TokenKind::Amp
            }
            '=' => {
                i += 1;
                TokenKind::Equals
            }
            '-' if bytes.get(i + 1) == Some(&b'>') => {
                i += 2;
                TokenKind::Arrow
            }
            '\'' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'\'' {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(ContextualError::new(
                        SrcRef::new(src, begin, begin + 1),
                        "unterminated string literal",
                    ));
                }
                i += 1;
                TokenKind::Str
            }
            c if c.is_ascii_digit() || (c == '-' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())) => {
                i += 1;
                let mut is_float = false;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
                if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                        i += 1;
                    }
                }
                // Optional width suffix: i8..i64, u8..u64, f32, f64.
                if i < bytes.len() && matches!(bytes[i], b'i' | b'u' | b'f') {
                    let suffix_begin = i;
                    i += 1;
                    while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                        i += 1;
                    }
                    if bytes[suffix_begin] == b'f' {
                        is_float = true;
                    }
                }
                if is_float {
                    TokenKind::Float
                } else {
                    TokenKind::Int
                }
            }
            c if is_ident_start(c) => {
                i += 1;
                while i < bytes.len() && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                match &text[begin..i] {
                    "fn" => TokenKind::Keyword(Keyword::Fn),
                    "let" => TokenKind::Keyword(Keyword::Let),
                    "select" => TokenKind::Keyword(Keyword::Select),
                    "else" => TokenKind::Keyword(Keyword::Else),
                    _ => TokenKind::Ident,
                }
            }
            _ => {
                return Err(ContextualError::new(
                    SrcRef::new(src, begin, begin + 1),
                    "unexpected character",
                ));
            }
        };

        tokens.push(Token {
            kind,
            src: SrcRef::new(src, begin, i),
        });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        lex(SrcId(0), text)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lex_function_header() {
        use TokenKind::*;
        assert_eq!(
            vec![
                Keyword(super::Keyword::Fn),
                Ident,
                LParen,
                Ident,
                Colon,
                Ident,
                RParen,
                Arrow,
                Ident,
                Equals,
                Ident,
            ],
            kinds("fn f(x: i32) -> i32 = x")
        );
    }

    #[test]
    fn lex_literals() {
        use TokenKind::*;
        assert_eq!(vec![Int, Float, Str, Ident], kinds("1 2.5 'abc' true"));
        assert_eq!(vec![Int, Int, Float], kinds("1i64 3u8 1f64"));
        assert_eq!(vec![Int], kinds("-4"));
    }

    #[test]
    fn lex_rejects_unknown_characters() {
        assert!(lex(SrcId(0), "let x = #").is_err());
    }

    #[test]
    fn token_slices_point_into_source() {
        let tokens = lex(SrcId(0), "let abc = 1").unwrap();
        let src = "let abc = 1";
        let texts: Vec<&str> = tokens
            .iter()
            .map(|t| &src[t.src.slice.begin as usize..t.src.slice.end as usize])
            .collect();
        assert_eq!(vec!["let", "abc", "=", "1"], texts);
    }
}
