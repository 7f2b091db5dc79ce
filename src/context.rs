use crate::ast::{MixinDefinition, Node, Selector};
use crate::dimension::Operator;
use crate::error::{LessError, LessResult};
use crate::CompileOptions;
use indexmap::IndexMap;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

/// mixin 展开的最大嵌套层数，超过时视为无限递归。
const MAX_MIXIN_DEPTH: usize = 64;

/// 值内运算的开启策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum MathMode {
    /// 所有运算都会被求值。
    Always,
    /// 除法必须写在括号里，其余运算始终求值。
    #[default]
    ParensDivision,
    /// 所有运算都必须写在括号里。
    Parens,
    /// 与 `Parens` 相同，但只在括号参与运算时才计入括号层数。
    StrictLegacy,
}

impl FromStr for MathMode {
    type Err = LessError;

    /// 接受名称或对应的数字：`always`(0)、`parens-division`(1)、`parens`(2)、`strict-legacy`(3)。
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" | "0" => Ok(MathMode::Always),
            "parens-division" | "1" => Ok(MathMode::ParensDivision),
            "parens" | "strict" | "2" => Ok(MathMode::Parens),
            "strict-legacy" | "3" => Ok(MathMode::StrictLegacy),
            other => Err(LessError::eval(format!("未知的运算模式: {other}"))),
        }
    }
}

/// 一层词法作用域：惰性求值的变量与可调用的 mixin。
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub variables: IndexMap<String, Node>,
    pub mixins: IndexMap<String, MixinDefinition>,
}

impl Frame {
    /// 收集一组规则中的变量与 mixin，同名时后者覆盖前者。
    pub fn collect(rules: &[Node]) -> Self {
        let mut frame = Frame::default();
        for rule in rules {
            match rule {
                Node::Declaration(declaration) if declaration.variable => {
                    frame
                        .variables
                        .insert(declaration.name.clone(), (*declaration.value).clone());
                }
                Node::MixinDefinition(definition) => {
                    frame
                        .mixins
                        .insert(definition.name.clone(), definition.clone());
                }
                Node::Ruleset(ruleset) => {
                    if let Some(key) = ruleset.mixin_key() {
                        frame.mixins.entry(key.clone()).or_insert(MixinDefinition {
                            name: key,
                            params: Vec::new(),
                            guard: None,
                            rules: ruleset.rules.clone(),
                        });
                    }
                }
                _ => {}
            }
        }
        frame
    }
}

/// 求值上下文，显式地沿调用链传递。
///
/// 所有嵌套状态（括号层数、calc 作用域、作用域栈等）都只能通过 `enter_*`
/// 返回的守卫修改，守卫在任何退出路径上都会恢复进入前的状态。
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub math: MathMode,
    pub strict_units: bool,
    pub numeric_precision: Option<u32>,
    pub compress: bool,
    math_on: bool,
    in_calc: bool,
    parens_depth: usize,
    mixin_depth: usize,
    frames: Vec<Frame>,
    evaluating: Vec<String>,
    selectors: Vec<Vec<Selector>>,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new(&CompileOptions::default())
    }
}

impl EvalContext {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            math: options.math,
            strict_units: options.strict_units,
            numeric_precision: options.numeric_precision,
            compress: options.minify,
            math_on: true,
            in_calc: false,
            parens_depth: 0,
            mixin_depth: 0,
            frames: Vec::new(),
            evaluating: Vec::new(),
            selectors: Vec::new(),
        }
    }

    /// 当前是否应当对运算符求值；不传运算符时只考虑括号要求。
    pub fn is_math_on(&self, op: Option<Operator>) -> bool {
        if !self.math_on {
            return false;
        }
        if op == Some(Operator::Divide) && self.math != MathMode::Always && self.parens_depth == 0
        {
            return false;
        }
        if self.math > MathMode::ParensDivision {
            return self.parens_depth > 0;
        }
        true
    }

    pub fn in_calc(&self) -> bool {
        self.in_calc
    }

    pub fn parens_depth(&self) -> usize {
        self.parens_depth
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn enter_parens(&mut self) -> Scope<'_> {
        self.parens_depth += 1;
        Scope::new(self, Exit::Parens)
    }

    /// 进入函数调用参数的求值：`calc` 关闭运算并标记 calc 作用域，其它函数重新打开运算。
    pub fn enter_call(&mut self, is_calc: bool) -> Scope<'_> {
        let exit = Exit::Call {
            math_on: self.math_on,
            in_calc: self.in_calc,
        };
        self.math_on = !is_calc;
        self.in_calc = self.in_calc || is_calc;
        Scope::new(self, exit)
    }

    /// 临时切换运算模式。
    pub fn with_math(&mut self, math: MathMode) -> Scope<'_> {
        let exit = Exit::Math(self.math);
        self.math = math;
        Scope::new(self, exit)
    }

    pub fn enter_frame(&mut self, frame: Frame) -> Scope<'_> {
        self.frames.push(frame);
        Scope::new(self, Exit::Frame)
    }

    pub fn enter_selectors(&mut self, selectors: Vec<Selector>) -> Scope<'_> {
        self.selectors.push(selectors);
        Scope::new(self, Exit::Selectors)
    }

    /// 标记变量正在求值；同名变量重入时说明定义是递归的。
    pub fn enter_variable(&mut self, name: &str) -> LessResult<Scope<'_>> {
        if self.evaluating.iter().any(|current| current == name) {
            return Err(LessError::eval(format!("变量 {name} 的定义是递归的")));
        }
        self.evaluating.push(name.to_string());
        Ok(Scope::new(self, Exit::Variable))
    }

    pub fn enter_mixin(&mut self, name: &str) -> LessResult<Scope<'_>> {
        if self.mixin_depth >= MAX_MIXIN_DEPTH {
            return Err(LessError::eval(format!(
                "mixin {name} 展开层数超过 {MAX_MIXIN_DEPTH}，可能存在递归调用"
            )));
        }
        self.mixin_depth += 1;
        Ok(Scope::new(self, Exit::Mixin))
    }

    /// 由内向外查找变量，返回尚未求值的定义。
    pub fn find_variable(&self, name: &str) -> Option<Node> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.variables.get(name))
            .cloned()
    }

    pub fn find_mixin(&self, name: &str) -> Option<MixinDefinition> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.mixins.get(name))
            .cloned()
    }

    /// 最内层规则集的完整选择器路径，根作用域为空。
    pub fn current_selectors(&self) -> &[Selector] {
        self.selectors.last().map_or(&[], Vec::as_slice)
    }
}

#[derive(Debug, Clone, Copy)]
enum Exit {
    Parens,
    Call { math_on: bool, in_calc: bool },
    Math(MathMode),
    Frame,
    Selectors,
    Variable,
    Mixin,
}

/// 作用域守卫，可像上下文本身一样使用，离开作用域时撤销进入时的修改。
pub struct Scope<'a> {
    context: &'a mut EvalContext,
    exit: Exit,
}

impl<'a> Scope<'a> {
    fn new(context: &'a mut EvalContext, exit: Exit) -> Self {
        Self { context, exit }
    }
}

impl Deref for Scope<'_> {
    type Target = EvalContext;

    fn deref(&self) -> &EvalContext {
        self.context
    }
}

impl DerefMut for Scope<'_> {
    fn deref_mut(&mut self) -> &mut EvalContext {
        self.context
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        let context = &mut *self.context;
        match self.exit {
            Exit::Parens => context.parens_depth = context.parens_depth.saturating_sub(1),
            Exit::Call { math_on, in_calc } => {
                context.math_on = math_on;
                context.in_calc = in_calc;
            }
            Exit::Math(math) => context.math = math,
            Exit::Frame => {
                context.frames.pop();
            }
            Exit::Selectors => {
                context.selectors.pop();
            }
            Exit::Variable => {
                context.evaluating.pop();
            }
            Exit::Mixin => context.mixin_depth = context.mixin_depth.saturating_sub(1),
        }
    }
}
