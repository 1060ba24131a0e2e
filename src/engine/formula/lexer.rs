use super::FormulaError;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Token {
    pub kind: TokenKind,
    /// 字节偏移
    pub pos: usize,
}

fn is_ident_start_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_cont_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub(super) fn lex(src: &str) -> Result<Vec<Token>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let single = match c {
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            _ => None,
        };
        if let Some(kind) = single {
            chars.next();
            tokens.push(Token { kind, pos });
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let mut end = pos;
            let mut seen_dot = false;
            let mut int_digits = 0usize;
            let mut frac_digits = 0usize;
            while let Some(&(i, ch)) = chars.peek() {
                if ch.is_ascii_digit() {
                    if seen_dot {
                        frac_digits += 1;
                    } else {
                        int_digits += 1;
                    }
                } else if ch == '.' && !seen_dot {
                    seen_dot = true;
                } else {
                    break;
                }
                end = i + ch.len_utf8();
                chars.next();
            }

            if seen_dot && frac_digits == 0 {
                return Err(FormulaError::syntax(pos, "小数点后缺少数字"));
            }
            if int_digits == 0 && frac_digits == 0 {
                return Err(FormulaError::syntax(pos, "无效数字"));
            }

            let raw = &src[pos..end];
            let value: f64 = raw
                .parse()
                .map_err(|_| FormulaError::syntax(pos, format!("无效数字: {}", raw)))?;
            if !value.is_finite() {
                return Err(FormulaError::syntax(pos, format!("数值超出范围: {}", raw)));
            }
            tokens.push(Token {
                kind: TokenKind::Number(value),
                pos,
            });
            continue;
        }

        if is_ident_start_char(c) {
            let mut end = pos;
            while let Some(&(i, ch)) = chars.peek() {
                if !is_ident_cont_char(ch) {
                    break;
                }
                end = i + ch.len_utf8();
                chars.next();
            }
            tokens.push(Token {
                kind: TokenKind::Ident(src[pos..end].to_string()),
                pos,
            });
            continue;
        }

        return Err(FormulaError::syntax(pos, format!("非法字符 '{}'", c)));
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: src.len(),
    });
    Ok(tokens)
}
