use super::lexer::{lex, Token, TokenKind};
use super::{BinaryOp, Expr, FormulaError, MAX_FORMULA_CHARS, MAX_NESTING_DEPTH};

const PREFIX_BP: u8 = 5;

/// (左, 右) 绑定强度; 左 < 右 即左结合
fn infix_binding_power(op: BinaryOp) -> (u8, u8) {
    match op {
        BinaryOp::Add | BinaryOp::Sub => (1, 2),
        BinaryOp::Mul | BinaryOp::Div => (3, 4),
    }
}

pub(super) fn parse(formula: &str) -> Result<Expr, FormulaError> {
    if formula.chars().count() > MAX_FORMULA_CHARS {
        return Err(FormulaError::syntax(
            MAX_FORMULA_CHARS,
            format!("公式长度超过 {} 字符上限", MAX_FORMULA_CHARS),
        ));
    }
    if formula.trim().is_empty() {
        return Err(FormulaError::syntax(0, "空表达式"));
    }

    let tokens = lex(formula)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression(0)?;

    let tail = parser.peek();
    if tail.kind != TokenKind::Eof {
        return Err(FormulaError::syntax(tail.pos, unexpected(&tail.kind)));
    }
    Ok(expr)
}

fn unexpected(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(v) => format!("意外的数字 {}", v),
        TokenKind::Ident(name) => format!("意外的标识符 {}", name),
        TokenKind::Plus => "意外的 '+'".to_string(),
        TokenKind::Minus => "意外的 '-'".to_string(),
        TokenKind::Star => "意外的 '*'".to_string(),
        TokenKind::Slash => "意外的 '/'".to_string(),
        TokenKind::LParen => "意外的 '('".to_string(),
        TokenKind::RParen => "括号不匹配: 多余的 ')'".to_string(),
        TokenKind::Eof => "表达式意外结束".to_string(),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Token {
        // lex 保证末尾有 Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn parse_expression(&mut self, min_bp: u8) -> Result<Expr, FormulaError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(FormulaError::syntax(
                self.peek().pos,
                format!("表达式嵌套超过 {} 层上限", MAX_NESTING_DEPTH),
            ));
        }
        self.depth += 1;
        let result = self.parse_expression_inner(min_bp);
        self.depth -= 1;
        result
    }

    fn parse_expression_inner(&mut self, min_bp: u8) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };

            let (l_bp, r_bp) = infix_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            let position = self.next().pos; // 消费运算符
            let rhs = self.parse_expression(r_bp)?;
            lhs = Expr::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
                position,
            };
        }

        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, FormulaError> {
        let tok = self.next();
        match tok.kind {
            TokenKind::Number(v) => Ok(Expr::Number(v)),
            TokenKind::Ident(name) => Ok(Expr::Variable {
                name,
                position: tok.pos,
            }),
            TokenKind::Minus => {
                let operand = self.parse_expression(PREFIX_BP)?;
                Ok(Expr::Neg(Box::new(operand)))
            }
            TokenKind::LParen => {
                let inner = self.parse_expression(0)?;
                let close = self.next();
                if close.kind != TokenKind::RParen {
                    return Err(FormulaError::syntax(
                        close.pos,
                        format!("括号不匹配: 缺少 ')' ({})", unexpected(&close.kind)),
                    ));
                }
                Ok(inner)
            }
            other => Err(FormulaError::syntax(tok.pos, unexpected(&other))),
        }
    }
}
