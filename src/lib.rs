//! less_core 库入口，提供面向 Rust 与 Node.js 的 LESS 编译能力。
//! 内部分为几个阶段：词法（lexer）→ 语法（parser）→ 降级（lower）→ 语义求值（evaluator）
//! → 访问器处理（passes）→ CSS 序列化（serializer）。

pub mod ast;
pub mod context;
pub mod cst;
pub mod dimension;
mod error;
mod evaluator;
pub mod grammar;
pub mod lexer;
mod lower;
pub mod parser;
mod passes;
mod serializer;
mod utils;
pub mod visitor;

pub use crate::context::{EvalContext, MathMode};
pub use crate::dimension::{Dimension, Unit};
pub use crate::error::{GrammarError, LessError, LessResult, LexError};
pub use crate::evaluator::evaluate;
pub use crate::lexer::{tokenize, LexResult};
pub use crate::parser::{parse, ParseOutcome};
pub use crate::serializer::Serializer;
pub use crate::visitor::{Handlers, Implementation, TypeRegistry, VisitArgs, Visited, Visitor};

use crate::ast::Ruleset;

/// LESS 编译配置。
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// 是否输出压缩后的 CSS。
    pub minify: bool,
    /// 严格单位模式：不兼容的单位运算与复合单位输出都会报错。
    pub strict_units: bool,
    /// 值内运算的开启策略。
    pub math: MathMode,
    /// 输出数值时保留的小数位数，`None` 表示不舍入。
    pub numeric_precision: Option<u32>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            minify: false,
            strict_units: false,
            math: MathMode::default(),
            numeric_precision: Some(8),
        }
    }
}

/// 解析并降级为可求值的根规则集，遇到第一个记录的问题即失败。
pub fn parse_stylesheet(source: &str) -> LessResult<Ruleset> {
    let outcome = parse(source);
    if let Some(error) = outcome.lexical_errors.first() {
        return Err(LessError::parse(error.message.clone(), error.offset));
    }
    if let Some(error) = outcome.grammar_errors.first() {
        return Err(LessError::parse(error.message.clone(), error.offset));
    }
    lower::lower(&outcome.tree, source)
}

/// 编译 LESS 源码为 CSS 文本。
///
/// # 参数
/// * `source` - 待编译的 LESS 字符串
/// * `options` - 编译配置
pub fn compile(source: &str, options: CompileOptions) -> LessResult<String> {
    let root = parse_stylesheet(source)?;
    let mut context = EvalContext::new(&options);
    let stylesheet = evaluate(root, &mut context)?;

    let serializer = Serializer::new(options.minify);
    serializer.to_css(&stylesheet, &context)
}

#[cfg(feature = "node")]
use napi::{Error, Result};
#[cfg(feature = "node")]
use napi_derive::napi;

/// Node.js 侧的编译选项对象。
#[cfg(feature = "node")]
#[napi(object)]
pub struct JsCompileOptions {
    /// 是否压缩输出 CSS。
    pub minify: Option<bool>,
    /// 是否启用严格单位检查。
    pub strict_units: Option<bool>,
    /// 运算模式：`always`、`parens-division`、`parens` 或 `strict-legacy`。
    pub math: Option<String>,
}

/// 暴露给 Node.js 的编译函数。
#[cfg(feature = "node")]
#[napi]
pub fn compile_less(source: String, options: Option<JsCompileOptions>) -> Result<String> {
    let opt = options.unwrap_or(JsCompileOptions {
        minify: None,
        strict_units: None,
        math: None,
    });
    let math = match opt.math.as_deref() {
        Some(name) => name
            .parse::<MathMode>()
            .map_err(|err| Error::from_reason(err.to_string()))?,
        None => MathMode::default(),
    };
    let compile_options = CompileOptions {
        minify: opt.minify.unwrap_or(false),
        strict_units: opt.strict_units.unwrap_or(false),
        math,
        ..CompileOptions::default()
    };
    let result =
        compile(&source, compile_options).map_err(|err| Error::from_reason(err.to_string()))?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_basic_variable() {
        let src = r"@base: #111;
body {
  color: @base;
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("color: #111"));
    }

    #[test]
    fn compile_nested_selectors() {
        let src = r".btn {
  color: #fff;
  &:hover {
    color: #000;
  }
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains(".btn:hover"));
        assert!(css.contains("color: #000"));
    }

    #[test]
    fn compile_important_flag() {
        let src = r"@base: 10px;
.box {
  margin: @base !important;
}";
        let css = compile(
            src,
            CompileOptions {
                minify: true,
                ..CompileOptions::default()
            },
        )
        .unwrap();
        assert!(css.contains("margin:10px!important"));
        assert!(!css.contains("!important!important"));
    }

    #[test]
    fn compile_mixin_invocation() {
        let src = r".rounded(@radius) {
  border-radius: @radius;
}

.card {
  .rounded(8px);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("border-radius: 8px"));
        assert!(!css.contains(".rounded"));
    }

    #[test]
    fn compile_arithmetic_expression() {
        let src = r"@base: 10px;
.box {
  width: @base + 5px;
  padding: (@base * 2);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("width: 15px"));
        assert!(css.contains("padding: 20px"));
    }

    #[test]
    fn compile_multiple_arithmetic_segments() {
        let src = r"@spacing: 12px;
.box {
  padding: (@spacing * 0.75) (@spacing * 1.5);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("padding: 9px 18px"));
    }

    #[test]
    fn compile_mixin_with_default() {
        let src = r".shadow(@blur: 4px) {
  box-shadow: 0 0 @blur rgba(0, 0, 0, 0.2);
}

.panel {
  .shadow();
}

.toast {
  .shadow(8px);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains(".panel"));
        assert!(css.contains("box-shadow: 0 0 4px rgba(0, 0, 0, 0.2)"));
        assert!(css.contains("box-shadow: 0 0 8px rgba(0, 0, 0, 0.2)"));
    }

    #[test]
    fn compile_arithmetic_division_and_negative() {
        let src = r"@gap: 12px;
.grid {
  margin: -(@gap / 2);
  width: (@gap * -2);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("margin: -6px"));
        assert!(css.contains("width: -24px"));
    }

    #[test]
    fn compile_import_statement() {
        let src = r#"@import "reset.css";
@color: #000;
body {
  color: @color;
}"#;
        let pretty = compile(src, CompileOptions::default()).unwrap();
        assert!(pretty.trim_start().starts_with("@import \"reset.css\";"));
        assert!(pretty.contains("body {"));

        let minified = compile(
            src,
            CompileOptions {
                minify: true,
                ..CompileOptions::default()
            },
        )
        .unwrap();
        assert!(minified.starts_with("@import \"reset.css\";"));
        assert!(minified.contains("body{color:#000}"));
    }

    #[test]
    fn parse_errors_surface_from_compile() {
        let err = compile(".a { color: red; } }", CompileOptions::default()).unwrap_err();
        assert!(matches!(err, LessError::ParseError { .. }));
    }
}
