// ==========================================
// 屋面估价引擎 - 数量公式求值器
// ==========================================
// 文法: 十进制数字 / 变量标识符 / + - * / / 一元负号 / 括号
// 优先级: * / 高于 + - ; 同级左结合
// 红线: 未知变量、除零、语法错误均为硬失败,不得静默返回 0 / NaN / Infinity
// 说明: 双精度求值,不做舍入 (由调用方舍入到分)
// ==========================================

mod lexer;
mod parser;


use crate::domain::variables::{RoofVariable, SlopeVariable, VariableBindings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 公式最大字符数
pub const MAX_FORMULA_CHARS: usize = 1_024;

/// 最大嵌套深度 (括号 / 一元负号 / 运算符链)
pub const MAX_NESTING_DEPTH: usize = 64;

/// 公式求值错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("公式语法错误 (位置 {position}): {message}")]
    SyntaxError { position: usize, message: String },

    #[error("未知变量: {0}")]
    UnknownVariable(String),

    #[error("除数为零")]
    DivisionByZero,

    #[error("计算结果溢出 (位置 {position})")]
    NonFiniteResult { position: usize },
}

impl FormulaError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        FormulaError::SyntaxError {
            position,
            message: message.into(),
        }
    }
}

// ==========================================
// AST
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable {
        name: String,
        position: usize,
    },
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        position: usize,
    },
}

impl Expr {
    /// 在给定变量绑定下求值
    pub fn eval(&self, bindings: &VariableBindings) -> Result<f64, FormulaError> {
        match self {
            Expr::Number(v) => Ok(*v),
            Expr::Variable { name, .. } => bindings
                .get(name)
                .ok_or_else(|| FormulaError::UnknownVariable(name.clone())),
            Expr::Neg(inner) => Ok(-inner.eval(bindings)?),
            Expr::Binary {
                op,
                left,
                right,
                position,
            } => {
                let l = left.eval(bindings)?;
                let r = right.eval(bindings)?;
                let value = match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => {
                        if r == 0.0 {
                            return Err(FormulaError::DivisionByZero);
                        }
                        l / r
                    }
                };
                if !value.is_finite() {
                    return Err(FormulaError::NonFiniteResult {
                        position: *position,
                    });
                }
                Ok(value)
            }
        }
    }

    /// 表达式引用的变量 (按出现顺序去重)
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable { name, .. } => {
                if !out.contains(&name.as_str()) {
                    out.push(name.as_str());
                }
            }
            Expr::Neg(inner) => inner.collect_variables(out),
            Expr::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
        }
    }
}

// ==========================================
// 对外接口
// ==========================================

/// 解析公式为 AST
pub fn parse_formula(formula: &str) -> Result<Expr, FormulaError> {
    parser::parse(formula)
}

/// 解析并求值
///
/// # 示例
/// ```
/// use roof_estimate::domain::RoofVariables;
/// use roof_estimate::engine::formula::evaluate;
///
/// let vars = RoofVariables::from_pairs([("SQ", 20.0)]).unwrap();
/// assert_eq!(evaluate("SQ * 3", &vars.bindings()).unwrap(), 60.0);
/// ```
pub fn evaluate(formula: &str, bindings: &VariableBindings) -> Result<f64, FormulaError> {
    parse_formula(formula)?.eval(bindings)
}

/// 编辑期校验: 语法正确且所有标识符都在变量表内
///
/// `slope_scoped` 为 true 时额外允许坡面变量 (PITCH / RIDGE / VALLEY ...)
pub fn validate_formula(formula: &str, slope_scoped: bool) -> Result<Expr, FormulaError> {
    let expr = parse_formula(formula)?;
    for name in expr.variables() {
        let known = RoofVariable::parse(name).is_some()
            || (slope_scoped && SlopeVariable::parse(name).is_some());
        if !known {
            return Err(FormulaError::UnknownVariable(name.to_string()));
        }
    }
    Ok(expr)
}
