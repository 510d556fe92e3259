//! Inline assembly template parsing.
//!
//! `$name` references a symbol or label, `%reg` a machine register that must
//! be listed as preserved or ignored. `$$` and `%%` produce a literal `$` or
//! `%`.

use thiserror::Error;

use crate::frontend::intern::InternedSymbol;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateToken {
    Text(String),
    Identifier(InternedSymbol),
    Register(InternedSymbol),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown escape `{escape}` at template offset {offset}")]
    UnknownEscape { escape: String, offset: usize },
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn parse_template(template: &str) -> Result<Vec<TemplateToken>, TemplateError> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        if c != '$' && c != '%' {
            text.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some((_, next)) if next == c => {
                chars.next();
                text.push(c);
            }
            Some((start, next)) if is_identifier_start(next) => {
                let mut end = start;

                while let Some((index, next)) = chars.peek().copied() {
                    if !is_identifier_continue(next) {
                        break;
                    }

                    end = index + next.len_utf8();
                    chars.next();
                }

                if !text.is_empty() {
                    tokens.push(TemplateToken::Text(std::mem::take(&mut text)));
                }

                let name = InternedSymbol::new(&template[start..end]);

                tokens.push(if c == '$' {
                    TemplateToken::Identifier(name)
                } else {
                    TemplateToken::Register(name)
                });
            }
            Some((_, next)) => {
                return Err(TemplateError::UnknownEscape {
                    escape: format!("{c}{next}"),
                    offset,
                });
            }
            None => {
                return Err(TemplateError::UnknownEscape {
                    escape: c.to_string(),
                    offset,
                });
            }
        }
    }

    if !text.is_empty() {
        tokens.push(TemplateToken::Text(text));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_identifiers_registers_and_escapes() {
        let tokens = parse_template("mov %rax, $value ; 100%% $$x").unwrap();

        assert_eq!(
            tokens,
            vec![
                TemplateToken::Text("mov ".to_owned()),
                TemplateToken::Register(InternedSymbol::new("rax")),
                TemplateToken::Text(", ".to_owned()),
                TemplateToken::Identifier(InternedSymbol::new("value")),
                TemplateToken::Text(" ; 100% $x".to_owned()),
            ]
        );
    }

    #[test]
    fn rejects_unknown_escapes() {
        assert_eq!(
            parse_template("jmp $1"),
            Err(TemplateError::UnknownEscape {
                escape: "$1".to_owned(),
                offset: 4
            })
        );
        assert!(parse_template("trailing %").is_err());
    }
}
