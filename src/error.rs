use thiserror::Error;

use crate::lexer::TokenKind;

/// 编译过程中统一的错误类型。
#[derive(Debug, Error)]
pub enum LessError {
    #[error("解析失败: {message} (位置 {position})")]
    ParseError { message: String, position: usize },
    #[error("语义求值失败: {0}")]
    EvalError(String),
    #[error("单位不兼容，请修正单位或使用 unit 函数: '{left}' 与 '{right}'{}", describe_position(.position))]
    IncompatibleUnits {
        left: String,
        right: String,
        position: Option<usize>,
    },
    #[error("数值包含多个单位，请修正单位或使用 unit 函数: {unit}")]
    MultipleUnits { unit: String },
}

pub type LessResult<T> = Result<T, LessError>;

impl LessError {
    pub fn parse<S: Into<String>>(message: S, position: usize) -> Self {
        LessError::ParseError {
            message: message.into(),
            position,
        }
    }

    pub fn eval<S: Into<String>>(message: S) -> Self {
        LessError::EvalError(message.into())
    }

    pub fn incompatible_units<L: Into<String>, R: Into<String>>(left: L, right: R) -> Self {
        LessError::IncompatibleUnits {
            left: left.into(),
            right: right.into(),
            position: None,
        }
    }

    /// 为尚未携带位置的单位错误补充源码偏移。
    pub fn at(self, offset: usize) -> Self {
        match self {
            LessError::IncompatibleUnits {
                left,
                right,
                position: None,
            } => LessError::IncompatibleUnits {
                left,
                right,
                position: Some(offset),
            },
            other => other,
        }
    }
}

fn describe_position(position: &Option<usize>) -> String {
    match position {
        Some(offset) => format!(" (位置 {offset})"),
        None => String::new(),
    }
}

/// 词法阶段无法识别的输入片段。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (位置 {offset})")]
pub struct LexError {
    pub message: String,
    pub offset: usize,
    pub length: usize,
}

/// 语法规则无法满足时记录的问题，附带期望的 token 种类。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (位置 {offset})")]
pub struct GrammarError {
    pub message: String,
    pub offset: usize,
    pub expected: Vec<TokenKind>,
}
