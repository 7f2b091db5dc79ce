use crate::ast::{
    AtRule, Call, Declaration, Element, Evaluated, Expression, Extend, Import, Media, MixinCall,
    Negative, Node, Operation, Paren, Quoted, Ruleset, Selector, Url, Value, Variable,
};
use crate::context::{EvalContext, Frame, MathMode};
use crate::dimension::{Dimension, Operator, Unit};
use crate::error::{LessError, LessResult};
use crate::passes;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

static INTERPOLATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\{([\w-]+)\}").expect("插值正则表达式编译失败"));

/// 嵌套在规则集内时需要冒泡到外层的 at-rule。
const BUBBLING_AT_RULES: [&str; 3] = ["@supports", "@document", "@container"];

/// 对整个样式表求值，随后解析 extend 并把嵌套规则展开到根层级。
pub fn evaluate(root: Ruleset, ctx: &mut EvalContext) -> LessResult<Ruleset> {
    let evaluated = eval_ruleset(&root, ctx)?;
    log::debug!(target: "less", "求值完成，开始 extend 与展开");
    let extended = passes::resolve_extends(evaluated);
    Ok(passes::flatten(extended))
}

impl Node {
    pub fn eval(&self, ctx: &mut EvalContext) -> LessResult<Evaluated> {
        let evaluated = match self {
            Node::Dimension(_)
            | Node::Keyword(_)
            | Node::Comment(_)
            | Node::Selector(_) => Evaluated::Single(self.clone()),
            Node::Expression(expression) => Evaluated::Single(eval_expression(expression, ctx)?),
            Node::Value(value) => Evaluated::Single(eval_value(value, ctx)?),
            Node::Paren(paren) => Evaluated::Single(Node::Paren(Paren {
                value: Box::new(paren.value.eval_node(ctx)?),
            })),
            Node::Quoted(quoted) => Evaluated::Single(Node::Quoted(Quoted {
                value: interpolate(&quoted.value, ctx)?,
                ..quoted.clone()
            })),
            Node::Url(url) => Evaluated::Single(Node::Url(Url {
                value: interpolate(&url.value, ctx)?,
            })),
            Node::Variable(variable) => Evaluated::Single(eval_variable(variable, ctx)?),
            Node::Operation(operation) => Evaluated::Single(eval_operation(operation, ctx)?),
            Node::Negative(negative) => Evaluated::Single(eval_negative(negative, ctx)?),
            Node::Call(call) => Evaluated::Single(eval_call(call, ctx)?),
            Node::Declaration(declaration) if declaration.variable => Evaluated::Absent,
            Node::Declaration(declaration) => {
                Evaluated::Single(Node::Declaration(eval_declaration(declaration, ctx)?))
            }
            Node::Ruleset(ruleset) => Evaluated::Single(Node::Ruleset(eval_ruleset(ruleset, ctx)?)),
            Node::Media(media) => Evaluated::Single(Node::Media(eval_media(media, ctx)?)),
            Node::AtRule(at_rule) => Evaluated::Single(Node::AtRule(eval_at_rule(at_rule, ctx)?)),
            Node::Import(import) => Evaluated::Single(Node::Import(Import {
                path: Box::new(import.path.eval_node(ctx)?),
                features: match &import.features {
                    Some(features) => Some(Box::new(features.eval_node(ctx)?)),
                    None => None,
                },
                options: import.options.clone(),
            })),
            Node::MixinDefinition(_) => Evaluated::Absent,
            Node::MixinCall(call) => Evaluated::Many(eval_mixin_call(call, ctx)?),
            Node::MixinArg(arg) => arg.value.eval(ctx)?,
        };
        Ok(evaluated)
    }

    /// 求值并收敛为单个节点，用于只能容纳一个子节点的位置。
    pub fn eval_node(&self, ctx: &mut EvalContext) -> LessResult<Node> {
        Ok(self.eval(ctx)?.into_node())
    }
}

fn eval_expression(expression: &Expression, ctx: &mut EvalContext) -> LessResult<Node> {
    let math_on = ctx.is_math_on(None);
    let in_parenthesis =
        expression.parens && (ctx.math != MathMode::StrictLegacy || !expression.parens_in_op);
    let (result, double_paren) = if in_parenthesis {
        eval_sequence(expression, &mut ctx.enter_parens())?
    } else {
        eval_sequence(expression, ctx)?
    };

    if expression.parens
        && expression.parens_in_op
        && !math_on
        && !double_paren
        && !matches!(result, Node::Dimension(_))
    {
        return Ok(Node::Paren(Paren {
            value: Box::new(result),
        }));
    }
    Ok(result)
}

/// 求值表达式的子节点；第二个返回值表示唯一子节点自带不参与运算的括号。
fn eval_sequence(expression: &Expression, ctx: &mut EvalContext) -> LessResult<(Node, bool)> {
    match expression.value.as_slice() {
        [] => Ok((Node::Expression(expression.clone()), false)),
        [single] => {
            let (parens, parens_in_op) = single.has_parens();
            let double_paren = parens && !parens_in_op && !ctx.in_calc();
            Ok((single.eval_node(ctx)?, double_paren))
        }
        children => {
            let mut value = Vec::with_capacity(children.len());
            for child in children {
                child.eval(ctx)?.append_to(&mut value);
            }
            Ok((
                Node::Expression(Expression {
                    value,
                    ..expression.clone()
                }),
                false,
            ))
        }
    }
}

fn eval_value(value: &Value, ctx: &mut EvalContext) -> LessResult<Node> {
    if let [single] = value.value.as_slice() {
        return single.eval_node(ctx);
    }
    let value = value
        .value
        .iter()
        .map(|node| node.eval_node(ctx))
        .collect::<LessResult<Vec<_>>>()?;
    Ok(Node::Value(Value { value }))
}

fn eval_variable(variable: &Variable, ctx: &mut EvalContext) -> LessResult<Node> {
    let definition = ctx.find_variable(&variable.name).ok_or_else(|| {
        LessError::eval(format!(
            "变量 {} 未定义 (位置 {})",
            variable.name, variable.offset
        ))
    })?;
    let mut scope = ctx.enter_variable(&variable.name)?;
    definition.eval_node(&mut scope)
}

fn eval_operation(operation: &Operation, ctx: &mut EvalContext) -> LessResult<Node> {
    let left = operation.left.eval_node(ctx)?;
    let right = operation.right.eval_node(ctx)?;
    if ctx.is_math_on(Some(operation.op)) {
        if let (Node::Dimension(a), Node::Dimension(b)) = (&left, &right) {
            let result = a
                .operate(operation.op, b, ctx.strict_units)
                .map_err(|err| err.at(operation.offset))?;
            return Ok(Node::Dimension(result));
        }
        log::trace!(
            target: "less",
            "运算 {} 的操作数不是数值，原样输出 (位置 {})",
            operation.op,
            operation.offset
        );
    }
    Ok(Node::Operation(Operation {
        op: operation.op,
        left: Box::new(left),
        right: Box::new(right),
        is_spaced: operation.is_spaced,
        offset: operation.offset,
    }))
}

fn eval_negative(negative: &Negative, ctx: &mut EvalContext) -> LessResult<Node> {
    let value = negative.value.eval_node(ctx)?;
    match value {
        Node::Dimension(dimension) if ctx.is_math_on(Some(Operator::Multiply)) => {
            let negated = Dimension::unitless(-1.0).operate(
                Operator::Multiply,
                &dimension,
                ctx.strict_units,
            )?;
            Ok(Node::Dimension(negated))
        }
        other => Ok(Node::Negative(Negative {
            value: Box::new(other),
        })),
    }
}

fn eval_call(call: &Call, ctx: &mut EvalContext) -> LessResult<Node> {
    let is_calc = call.name.eq_ignore_ascii_case("calc");
    let args = {
        let mut scope = ctx.enter_call(is_calc);
        call.args
            .iter()
            .map(|arg| arg.eval_node(&mut scope))
            .collect::<LessResult<Vec<_>>>()?
    };

    let builtin = match call.name.to_ascii_lowercase().as_str() {
        "min" => extreme(&args, Ordering::Less),
        "max" => extreme(&args, Ordering::Greater),
        "unit" => with_unit(&args, ctx)?,
        "percentage" => match args.as_slice() {
            [Node::Dimension(dimension)] => Some(Node::Dimension(Dimension::with_unit(
                dimension.value * 100.0,
                "%",
            ))),
            _ => None,
        },
        _ => None,
    };
    Ok(builtin.unwrap_or_else(|| {
        Node::Call(Call {
            name: call.name.clone(),
            args,
            offset: call.offset,
        })
    }))
}

/// `min()` / `max()`：参数中出现无法比较的值时保留原调用。
fn extreme(args: &[Node], wanted: Ordering) -> Option<Node> {
    let mut best: Option<&Dimension> = None;
    for arg in args {
        let dimension = arg.as_dimension()?;
        best = match best {
            None => Some(dimension),
            Some(current) => match dimension.compare(current)? {
                ordering if ordering == wanted => Some(dimension),
                _ => Some(current),
            },
        };
    }
    best.cloned().map(Node::Dimension)
}

/// `unit(value[, unit])`：替换或去掉数值的单位。
fn with_unit(args: &[Node], ctx: &EvalContext) -> LessResult<Option<Node>> {
    let (dimension, unit) = match args {
        [Node::Dimension(dimension)] => (dimension, String::new()),
        [Node::Dimension(dimension), unit] => (dimension, plain_text(unit, ctx)?),
        _ => return Ok(None),
    };
    let unit = if unit.is_empty() {
        Unit::empty()
    } else {
        Unit::single(&unit)
    };
    Ok(Some(Node::Dimension(Dimension::new(dimension.value, unit))))
}

fn eval_declaration(declaration: &Declaration, ctx: &mut EvalContext) -> LessResult<Declaration> {
    let name = interpolate(&declaration.name, ctx)?;
    let value = if name == "font" && ctx.math == MathMode::Always {
        let mut scope = ctx.with_math(MathMode::ParensDivision);
        declaration.value.eval_node(&mut scope)
    } else {
        declaration.value.eval_node(ctx)
    }
    .map_err(|err| err.at(declaration.offset))?;
    Ok(Declaration {
        name,
        value: Box::new(value),
        important: declaration.important,
        variable: false,
        offset: declaration.offset,
    })
}

/// 在新作用域中依次求值一组规则，序列结果就地展开。
fn eval_rules(rules: &[Node], ctx: &mut EvalContext) -> LessResult<Vec<Node>> {
    let mut scope = ctx.enter_frame(Frame::collect(rules));
    let mut evaluated = Vec::with_capacity(rules.len());
    for rule in rules {
        rule.eval(&mut scope)?.append_to(&mut evaluated);
    }
    Ok(evaluated)
}

fn eval_ruleset(ruleset: &Ruleset, ctx: &mut EvalContext) -> LessResult<Ruleset> {
    if ruleset.root {
        return Ok(Ruleset::root(eval_rules(&ruleset.rules, ctx)?));
    }
    let own = ruleset
        .selectors
        .iter()
        .map(|selector| interpolate_selector(selector, ctx))
        .collect::<LessResult<Vec<_>>>()?;
    let selectors = join_selectors(ctx.current_selectors(), &own);
    let rules = {
        let mut scope = ctx.enter_selectors(selectors.clone());
        eval_rules(&ruleset.rules, &mut scope)?
    };
    Ok(Ruleset::new(selectors, rules))
}

/// 每个父选择器与每个子选择器两两组合。
fn join_selectors(parents: &[Selector], own: &[Selector]) -> Vec<Selector> {
    if parents.is_empty() {
        return own.to_vec();
    }
    let mut joined = Vec::with_capacity(parents.len() * own.len());
    for parent in parents {
        let parent_css = parent.css_text(false);
        for selector in own {
            joined.push(selector.join(parent, &parent_css));
        }
    }
    joined
}

fn interpolate_selector(selector: &Selector, ctx: &mut EvalContext) -> LessResult<Selector> {
    let elements = selector
        .elements
        .iter()
        .map(|element| {
            Ok(Element {
                combinator: element.combinator,
                value: interpolate(&element.value, ctx)?,
            })
        })
        .collect::<LessResult<Vec<_>>>()?;
    let extends = selector
        .extends
        .iter()
        .map(|extend| {
            Ok(Extend {
                target: interpolate_selector(&extend.target, ctx)?,
                all: extend.all,
            })
        })
        .collect::<LessResult<Vec<_>>>()?;
    Ok(Selector { elements, extends })
}

/// 嵌套在规则集里的散落声明包进父选择器，其余规则保持原顺序。
fn wrap_in_parents(parents: &[Selector], rules: Vec<Node>) -> Vec<Node> {
    if parents.is_empty() {
        return rules;
    }
    let (declarations, others): (Vec<Node>, Vec<Node>) = rules
        .into_iter()
        .partition(|rule| matches!(rule, Node::Declaration(_) | Node::Comment(_)));
    let mut wrapped = Vec::with_capacity(others.len() + 1);
    if !declarations.is_empty() {
        wrapped.push(Node::Ruleset(Ruleset::new(parents.to_vec(), declarations)));
    }
    wrapped.extend(others);
    wrapped
}

fn eval_media(media: &Media, ctx: &mut EvalContext) -> LessResult<Media> {
    let features = media.features.eval_node(ctx)?;
    let parents = ctx.current_selectors().to_vec();
    let rules = eval_rules(&media.rules, ctx)?;
    Ok(Media {
        features: Box::new(features),
        rules: wrap_in_parents(&parents, rules),
    })
}

fn eval_at_rule(at_rule: &AtRule, ctx: &mut EvalContext) -> LessResult<AtRule> {
    let prelude = match &at_rule.prelude {
        Some(prelude) => Some(Box::new(prelude.eval_node(ctx)?)),
        None => None,
    };
    let rules = match &at_rule.rules {
        None => None,
        Some(rules) if BUBBLING_AT_RULES.contains(&at_rule.name.as_str()) => {
            let parents = ctx.current_selectors().to_vec();
            Some(wrap_in_parents(&parents, eval_rules(rules, ctx)?))
        }
        Some(rules) => {
            // `@keyframes`、`@font-face` 等的内部规则不与外层选择器拼接
            let mut scope = ctx.enter_selectors(Vec::new());
            Some(eval_rules(rules, &mut scope)?)
        }
    };
    Ok(AtRule {
        name: at_rule.name.clone(),
        prelude,
        rules,
    })
}

fn eval_mixin_call(call: &MixinCall, ctx: &mut EvalContext) -> LessResult<Vec<Node>> {
    let definition = ctx.find_mixin(&call.name).ok_or_else(|| {
        LessError::eval(format!("mixin {} 未定义 (位置 {})", call.name, call.offset))
    })?;

    let mut positional = Vec::new();
    let mut named = IndexMap::new();
    let mut all = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        let (name, value) = match arg {
            Node::MixinArg(arg) => (arg.name.clone(), arg.value.eval_node(ctx)?),
            other => (None, other.eval_node(ctx)?),
        };
        all.push(value.clone());
        match name {
            Some(name) => {
                named.insert(name, value);
            }
            None => positional.push(value),
        }
    }

    let mut frame = Frame::default();
    let mut positional = positional.into_iter();
    for param in &definition.params {
        let Some(name) = &param.name else {
            // 字面量参数只用于模式匹配，占用一个位置参数
            positional.next();
            continue;
        };
        let value = match named.shift_remove(name) {
            Some(value) => value,
            None => match positional.next() {
                Some(value) => value,
                None => param.default.clone().ok_or_else(|| {
                    LessError::eval(format!(
                        "调用 mixin {} 缺少参数 {name} (位置 {})",
                        call.name, call.offset
                    ))
                })?,
            },
        };
        frame.variables.insert(name.clone(), value);
    }
    if positional.next().is_some() || !named.is_empty() {
        return Err(LessError::eval(format!(
            "调用 mixin {} 的参数数量或名称不匹配 (位置 {})",
            call.name, call.offset
        )));
    }
    frame
        .variables
        .insert("@arguments".to_string(), Node::Expression(Expression::new(all)));

    let mut rules = {
        let mut mixin = ctx.enter_mixin(&call.name)?;
        let mut scope = mixin.enter_frame(frame);
        eval_rules(&definition.rules, &mut scope)?
    };
    if call.important {
        mark_important(&mut rules);
    }
    Ok(rules)
}

fn mark_important(rules: &mut [Node]) {
    for rule in rules {
        match rule {
            Node::Declaration(declaration) => declaration.important = true,
            Node::Ruleset(ruleset) => mark_important(&mut ruleset.rules),
            Node::Media(media) => mark_important(&mut media.rules),
            _ => {}
        }
    }
}

/// 替换文本中的 `@{name}`，变量值按去掉引号的 CSS 文本插入。
fn interpolate(text: &str, ctx: &mut EvalContext) -> LessResult<String> {
    if !text.contains("@{") {
        return Ok(text.to_string());
    }
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for captures in INTERPOLATION.captures_iter(text) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        output.push_str(&text[last..whole.start()]);
        let value = eval_variable(
            &Variable {
                name: format!("@{}", name.as_str()),
                offset: whole.start(),
            },
            ctx,
        )?;
        output.push_str(&plain_text(&value, ctx)?);
        last = whole.end();
    }
    output.push_str(&text[last..]);
    Ok(output)
}

fn plain_text(node: &Node, ctx: &EvalContext) -> LessResult<String> {
    match node {
        Node::Quoted(quoted) => Ok(quoted.value.clone()),
        other => other.to_css(ctx),
    }
}
