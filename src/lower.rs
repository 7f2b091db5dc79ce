//! 把具体语法树转换成可求值的节点树。

use crate::ast::{
    AtRule, Call, Combinator, Declaration, Element, Expression, Extend, Import, Media, MixinArg,
    MixinCall, MixinDefinition, MixinParam, Negative, Node, Operation, Paren, Quoted, Ruleset,
    Selector, Url, Value, Variable,
};
use crate::cst::{CstChild, CstNode};
use crate::dimension::{Dimension, Operator};
use crate::error::{LessError, LessResult};
use crate::grammar::Rule;
use crate::lexer::{Token, TokenCategory, TokenKind};

/// 将解析得到的根节点转换为样式表根规则集。
pub fn lower(tree: &CstNode, source: &str) -> LessResult<Ruleset> {
    let lowering = Lowering { source };
    Ok(Ruleset::root(lowering.primary(tree)?))
}

struct Lowering<'s> {
    source: &'s str,
}

impl<'s> Lowering<'s> {
    fn text(&self, token: &Token) -> &'s str {
        token.text(self.source)
    }

    fn missing(&self, node: &CstNode, what: &str) -> LessError {
        LessError::parse(format!("{} 缺少 {what}", node.rule), node.offset())
    }

    fn child<'n>(&self, node: &'n CstNode, rule: Rule) -> LessResult<&'n CstNode> {
        node.node(rule).ok_or_else(|| self.missing(node, &rule.to_string()))
    }

    fn primary(&self, node: &CstNode) -> LessResult<Vec<Node>> {
        let mut rules = Vec::new();
        for statement in node.nodes() {
            if let Some(lowered) = self.statement(statement)? {
                rules.push(lowered);
            }
        }
        Ok(rules)
    }

    fn statement(&self, node: &CstNode) -> LessResult<Option<Node>> {
        let lowered = match node.rule {
            Rule::VariableAssign => Node::Declaration(self.variable_assign(node)?),
            Rule::Declaration => Node::Declaration(self.declaration(node)?),
            Rule::RulesetOrMixin => self.ruleset_or_mixin(node)?,
            Rule::AtRule => {
                let inner = node
                    .nodes()
                    .next()
                    .ok_or_else(|| self.missing(node, "at-rule 内容"))?;
                match inner.rule {
                    Rule::ImportAtRule => Node::Import(self.import(inner)?),
                    Rule::MediaAtRule => Node::Media(self.media(inner)?),
                    Rule::GeneralAtRule => Node::AtRule(self.general_at_rule(inner)?),
                    Rule::PluginAtRule => {
                        log::warn!(
                            target: "less",
                            "忽略 @plugin 指令 (位置 {})：不支持加载插件",
                            inner.offset()
                        );
                        return Ok(None);
                    }
                    other => {
                        return Err(LessError::parse(
                            format!("无法识别的 at-rule {other}"),
                            inner.offset(),
                        ))
                    }
                }
            }
            other => {
                return Err(LessError::parse(
                    format!("无法识别的语句 {other}"),
                    node.offset(),
                ))
            }
        };
        Ok(Some(lowered))
    }

    fn block(&self, node: &CstNode) -> LessResult<Vec<Node>> {
        let primary = self.child(node, Rule::Primary)?;
        self.primary(primary)
    }

    fn variable_assign(&self, node: &CstNode) -> LessResult<Declaration> {
        let name = node
            .token(TokenKind::AtName)
            .ok_or_else(|| self.missing(node, "变量名"))?;
        let mut value = self.value(self.child(node, Rule::Value)?)?;
        if node.has_token(TokenKind::ImportantSym) {
            value = Node::Expression(Expression::new(vec![value, Node::keyword("!important")]));
        }
        Ok(Declaration {
            name: self.text(name).to_string(),
            value: Box::new(value),
            important: false,
            variable: true,
            offset: name.start,
        })
    }

    fn declaration(&self, node: &CstNode) -> LessResult<Declaration> {
        let name = self.child(node, Rule::InterpolatedIdent)?;
        let value = self.value(self.child(node, Rule::Value)?)?;
        Ok(Declaration {
            name: name.source_text(self.source).to_string(),
            value: Box::new(value),
            important: node.has_token(TokenKind::ImportantSym),
            variable: false,
            offset: name.offset(),
        })
    }

    /// 共享选择器前缀的三种语句：规则集、mixin 定义与 mixin 调用。
    fn ruleset_or_mixin(&self, node: &CstNode) -> LessResult<Node> {
        let selectors = self.selector_list(self.child(node, Rule::SelectorList)?)?;
        let block = node.node(Rule::Block);
        let args = node.node(Rule::Args);

        match (block, args) {
            (Some(block), Some(args)) => {
                let name = self.mixin_name(node, &selectors)?;
                Ok(Node::MixinDefinition(MixinDefinition {
                    name,
                    params: self.params(args)?,
                    guard: node
                        .node(Rule::Guard)
                        .map(|guard| guard.source_text(self.source).to_string()),
                    rules: self.block(block)?,
                }))
            }
            (Some(block), None) => Ok(Node::Ruleset(Ruleset::new(selectors, self.block(block)?))),
            (None, None) if selectors.iter().any(|selector| !selector.extends.is_empty()) => {
                Ok(Node::Ruleset(Ruleset::new(selectors, Vec::new())))
            }
            (None, args) => {
                let name = self.mixin_name(node, &selectors)?;
                let args = match args {
                    Some(args) => self.call_args(args)?,
                    None => Vec::new(),
                };
                Ok(Node::MixinCall(MixinCall {
                    name,
                    args,
                    important: node.has_token(TokenKind::ImportantSym),
                    offset: node.offset(),
                }))
            }
        }
    }

    fn mixin_name(&self, node: &CstNode, selectors: &[Selector]) -> LessResult<String> {
        match selectors {
            [selector] => Ok(selector.mixin_key()),
            _ => Err(LessError::parse("mixin 只能有一个选择器", node.offset())),
        }
    }

    fn selector_list(&self, node: &CstNode) -> LessResult<Vec<Selector>> {
        let mut selectors: Vec<Selector> = Vec::new();
        for child in node.nodes() {
            match child.rule {
                Rule::Selector => selectors.push(self.selector(child)?),
                Rule::ExtendRule => {
                    let extends = self.extend_rule(child)?;
                    match selectors.last_mut() {
                        Some(selector) => selector.extends.extend(extends),
                        None => return Err(self.missing(node, "被扩展的选择器")),
                    }
                }
                _ => {}
            }
        }
        Ok(selectors)
    }

    fn extend_rule(&self, node: &CstNode) -> LessResult<Vec<Extend>> {
        let all = node
            .tokens()
            .any(|token| token.kind == TokenKind::Ident && self.text(token) == "all");
        node.nodes_of(Rule::Selector)
            .map(|selector| {
                Ok(Extend {
                    target: self.selector(selector)?,
                    all,
                })
            })
            .collect()
    }

    /// 选择器在语法树中是右递归的链，这里迭代展开成元素列表。
    fn selector(&self, node: &CstNode) -> LessResult<Selector> {
        let mut elements = Vec::new();
        let mut combinator = Combinator::None;
        let mut current = Some(node);
        while let Some(selector) = current.take() {
            for child in selector.nodes() {
                match child.rule {
                    Rule::SimpleSelector => {
                        elements.push(Element {
                            combinator,
                            value: child.source_text(self.source).to_string(),
                        });
                        combinator = Combinator::Descendant;
                    }
                    Rule::Combinator => {
                        combinator = Combinator::from_symbol(child.source_text(self.source));
                    }
                    Rule::Selector => current = Some(child),
                    _ => {}
                }
            }
        }
        if elements.is_empty() {
            return Err(self.missing(node, "简单选择器"));
        }
        Ok(Selector::new(elements))
    }

    fn params(&self, node: &CstNode) -> LessResult<Vec<MixinParam>> {
        let mut params = Vec::new();
        for arg in node.nodes_of(Rule::MixinArg) {
            let value = self.expression(self.child(arg, Rule::Expression)?)?;
            let param = match arg.token(TokenKind::AtName) {
                Some(name) => MixinParam {
                    name: Some(self.text(name).to_string()),
                    default: Some(value),
                },
                None => match value {
                    Node::Expression(expression)
                        if matches!(expression.value.as_slice(), [Node::Variable(_)]) =>
                    {
                        let name = match &expression.value[0] {
                            Node::Variable(variable) => Some(variable.name.clone()),
                            _ => None,
                        };
                        MixinParam {
                            name,
                            default: None,
                        }
                    }
                    literal => MixinParam {
                        name: None,
                        default: Some(literal),
                    },
                },
            };
            params.push(param);
        }
        Ok(params)
    }

    fn call_args(&self, node: &CstNode) -> LessResult<Vec<Node>> {
        node.nodes_of(Rule::MixinArg)
            .map(|arg| {
                Ok(Node::MixinArg(MixinArg {
                    name: arg
                        .token(TokenKind::AtName)
                        .map(|name| self.text(name).to_string()),
                    value: Box::new(self.expression(self.child(arg, Rule::Expression)?)?),
                }))
            })
            .collect()
    }

    fn value(&self, node: &CstNode) -> LessResult<Node> {
        Ok(Node::Value(Value {
            value: self.expressions(node)?,
        }))
    }

    fn expressions(&self, node: &CstNode) -> LessResult<Vec<Node>> {
        node.nodes_of(Rule::Expression)
            .map(|expression| self.expression(expression))
            .collect()
    }

    fn expression(&self, node: &CstNode) -> LessResult<Node> {
        let value = node
            .nodes_of(Rule::Additive)
            .map(|additive| self.additive(additive, false))
            .collect::<LessResult<Vec<_>>>()?;
        Ok(Node::Expression(Expression::new(value)))
    }

    fn additive(&self, node: &CstNode, in_op: bool) -> LessResult<Node> {
        let in_op = in_op || node.tokens().next().is_some();
        self.fold_operations(node, Rule::Multiplicative, |operand| {
            self.multiplicative(operand, in_op)
        })
    }

    fn multiplicative(&self, node: &CstNode, in_op: bool) -> LessResult<Node> {
        let in_op = in_op || node.tokens().next().is_some();
        self.fold_operations(node, Rule::Operand, |operand| self.operand(operand, in_op))
    }

    /// 左结合地折叠 `operand (op operand)*` 形式的子节点。
    fn fold_operations(
        &self,
        node: &CstNode,
        operand_rule: Rule,
        mut lower_operand: impl FnMut(&CstNode) -> LessResult<Node>,
    ) -> LessResult<Node> {
        let mut result: Option<Node> = None;
        let mut pending: Option<&Token> = None;
        let mut previous_end = 0;
        for child in &node.children {
            match child {
                CstChild::Token(token) => pending = Some(token),
                CstChild::Node(operand) if operand.rule == operand_rule => {
                    let right = lower_operand(operand)?;
                    result = Some(match (result.take(), pending.take()) {
                        (None, _) => right,
                        (Some(left), Some(token)) => {
                            let op = Operator::from_symbol(self.text(token)).ok_or_else(|| {
                                LessError::parse(
                                    format!("未知的运算符 {}", self.text(token)),
                                    token.start,
                                )
                            })?;
                            Node::Operation(Operation {
                                op,
                                left: Box::new(left),
                                right: Box::new(right),
                                is_spaced: token.start > previous_end,
                                offset: token.start,
                            })
                        }
                        (Some(_), None) => return Err(self.missing(node, "运算符")),
                    });
                    previous_end = operand.last_token().map_or(previous_end, |t| t.end);
                }
                CstChild::Node(_) => {}
            }
        }
        result.ok_or_else(|| self.missing(node, "操作数"))
    }

    fn operand(&self, node: &CstNode, in_op: bool) -> LessResult<Node> {
        let first = node
            .children
            .first()
            .ok_or_else(|| self.missing(node, "操作数"))?;
        let token = match first {
            CstChild::Node(paren) => return self.paren_block(paren, in_op),
            CstChild::Token(token) => token,
        };
        let text = self.text(token);
        let lowered = match token.kind {
            TokenKind::Minus => {
                let inner = self.operand(self.child(node, Rule::Operand)?, in_op)?;
                match inner {
                    Node::Dimension(mut dimension) => {
                        dimension.value = -dimension.value;
                        Node::Dimension(dimension)
                    }
                    other => Node::Negative(Negative {
                        value: Box::new(other),
                    }),
                }
            }
            TokenKind::Tilde => {
                let string = node
                    .token(TokenKind::StringLiteral)
                    .ok_or_else(|| self.missing(node, "字符串"))?;
                Node::Quoted(self.quoted(string, true))
            }
            TokenKind::Func => {
                let args = match node.node(Rule::Value) {
                    Some(value) => self.expressions(value)?,
                    None => Vec::new(),
                };
                Node::Call(Call {
                    name: text.trim_end_matches('(').to_string(),
                    args,
                    offset: token.start,
                })
            }
            TokenKind::Dimension | TokenKind::Num => Node::Dimension(
                Dimension::parse(text).map_err(|_| {
                    LessError::parse(format!("无法解析数值 {text}"), token.start)
                })?,
            ),
            TokenKind::StringLiteral => Node::Quoted(self.quoted(token, false)),
            TokenKind::AtName => Node::Variable(Variable {
                name: text.to_string(),
                offset: token.start,
            }),
            TokenKind::InterpolatedVar => Node::Variable(Variable {
                name: format!("@{}", &text[2..text.len() - 1]),
                offset: token.start,
            }),
            kind if kind.is_a(TokenCategory::Uri) => Node::Url(Url {
                value: text.to_string(),
            }),
            _ => Node::keyword(text),
        };
        Ok(lowered)
    }

    fn quoted(&self, token: &Token, escaped: bool) -> Quoted {
        let text = self.text(token);
        let quote = text.chars().next().unwrap_or('"');
        let inner = text
            .get(1..text.len().saturating_sub(1))
            .unwrap_or_default();
        Quoted {
            quote,
            value: inner.to_string(),
            escaped,
        }
    }

    /// 值括号降级为带 `parens` 标记的表达式；媒体特性形式保留为括号节点。
    fn paren_block(&self, node: &CstNode, in_op: bool) -> LessResult<Node> {
        let value = self.child(node, Rule::Value)?;
        if let Some(feature) = self.feature(node, value)? {
            return Ok(feature);
        }
        let mut expressions = self.expressions(value)?;
        let value = match (expressions.len(), expressions.pop()) {
            (1, Some(Node::Expression(inner))) => inner.value,
            (_, Some(last)) => {
                expressions.push(last);
                vec![Node::Value(Value { value: expressions })]
            }
            (_, None) => Vec::new(),
        };
        Ok(Node::Expression(Expression {
            value,
            parens: true,
            parens_in_op: in_op,
            no_spacing: false,
        }))
    }

    fn feature(&self, node: &CstNode, value: &CstNode) -> LessResult<Option<Node>> {
        let Some(name) = node.token(TokenKind::Ident) else {
            return Ok(None);
        };
        if !node.has_token(TokenKind::Colon) {
            return Ok(None);
        }
        Ok(Some(Node::Paren(Paren {
            value: Box::new(Node::Expression(Expression::new(vec![
                Node::keyword(format!("{}:", self.text(name))),
                self.value(value)?,
            ]))),
        })))
    }

    fn import(&self, node: &CstNode) -> LessResult<Import> {
        let options = node
            .tokens()
            .filter(|token| token.kind == TokenKind::Ident)
            .map(|token| self.text(token).to_string())
            .collect();
        let path = node
            .tokens()
            .find_map(|token| match token.kind {
                TokenKind::StringLiteral => Some(Node::Quoted(self.quoted(token, false))),
                kind if kind.is_a(TokenCategory::Uri) => Some(Node::Url(Url {
                    value: self.text(token).to_string(),
                })),
                _ => None,
            })
            .ok_or_else(|| self.missing(node, "导入路径"))?;
        let features = node
            .node(Rule::MediaList)
            .map(|list| self.media_list(list))
            .transpose()?
            .map(Box::new);
        Ok(Import {
            path: Box::new(path),
            features,
            options,
        })
    }

    fn media(&self, node: &CstNode) -> LessResult<Media> {
        Ok(Media {
            features: Box::new(self.media_list(self.child(node, Rule::MediaList)?)?),
            rules: self.block(self.child(node, Rule::Block)?)?,
        })
    }

    fn media_list(&self, node: &CstNode) -> LessResult<Node> {
        let queries = node
            .nodes_of(Rule::MediaQuery)
            .map(|query| {
                let parts = query
                    .children
                    .iter()
                    .map(|child| match child {
                        CstChild::Token(token) => Ok(Node::keyword(self.text(token))),
                        CstChild::Node(paren) => self.media_feature(paren),
                    })
                    .collect::<LessResult<Vec<_>>>()?;
                Ok(Node::Expression(Expression::new(parts)))
            })
            .collect::<LessResult<Vec<_>>>()?;
        Ok(Node::Value(Value { value: queries }))
    }

    fn media_feature(&self, node: &CstNode) -> LessResult<Node> {
        let value = self.child(node, Rule::Value)?;
        if let Some(feature) = self.feature(node, value)? {
            return Ok(feature);
        }
        Ok(Node::Paren(Paren {
            value: Box::new(self.value(value)?),
        }))
    }

    fn general_at_rule(&self, node: &CstNode) -> LessResult<AtRule> {
        let name = node
            .token(TokenKind::AtName)
            .ok_or_else(|| self.missing(node, "at-rule 名称"))?;
        let prelude = match node.node(Rule::Value) {
            Some(value) => Some(self.value(value)?),
            None => {
                let raw: Vec<&Token> = node
                    .tokens()
                    .filter(|token| {
                        !matches!(token.kind, TokenKind::AtName | TokenKind::SemiColon)
                    })
                    .collect();
                match (raw.first(), raw.last()) {
                    (Some(first), Some(last)) => {
                        Some(Node::keyword(&self.source[first.start..last.end]))
                    }
                    _ => None,
                }
            }
        };
        let rules = node
            .node(Rule::Block)
            .map(|block| self.block(block))
            .transpose()?;
        Ok(AtRule {
            name: self.text(name).to_string(),
            prelude: prelude.map(Box::new),
            rules,
        })
    }
}
