use crate::dimension::{Dimension, Operator};

/// 求值与输出共用的封闭节点集合。
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Dimension(Dimension),
    Expression(Expression),
    Value(Value),
    Paren(Paren),
    Comment(Comment),
    Keyword(Keyword),
    Quoted(Quoted),
    Url(Url),
    Variable(Variable),
    Operation(Operation),
    Negative(Negative),
    Call(Call),
    Declaration(Declaration),
    Selector(Selector),
    Ruleset(Ruleset),
    AtRule(AtRule),
    Media(Media),
    Import(Import),
    MixinDefinition(MixinDefinition),
    MixinCall(MixinCall),
    /// 调用参数的辅助包装，不参与按类型分派。
    MixinArg(MixinArg),
}

/// 节点种类的稳定标识，用于访问器分派。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Dimension,
    Expression,
    Value,
    Paren,
    Comment,
    Keyword,
    Quoted,
    Url,
    Variable,
    Operation,
    Negative,
    Call,
    Declaration,
    Selector,
    Ruleset,
    AtRule,
    Media,
    Import,
    MixinDefinition,
    MixinCall,
    MixinArg,
}

impl NodeType {
    pub const ALL: [NodeType; 21] = [
        NodeType::Dimension,
        NodeType::Expression,
        NodeType::Value,
        NodeType::Paren,
        NodeType::Comment,
        NodeType::Keyword,
        NodeType::Quoted,
        NodeType::Url,
        NodeType::Variable,
        NodeType::Operation,
        NodeType::Negative,
        NodeType::Call,
        NodeType::Declaration,
        NodeType::Selector,
        NodeType::Ruleset,
        NodeType::AtRule,
        NodeType::Media,
        NodeType::Import,
        NodeType::MixinDefinition,
        NodeType::MixinCall,
        NodeType::MixinArg,
    ];
}

/// 节点求值的结果：单个节点、需要展开进父列表的节点序列，或者什么都不产生。
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Single(Node),
    Many(Vec<Node>),
    Absent,
}

impl Evaluated {
    /// 把结果追加进子节点列表，序列按原顺序展开。
    pub fn append_to(self, rules: &mut Vec<Node>) {
        match self {
            Evaluated::Single(node) => rules.push(node),
            Evaluated::Many(nodes) => rules.extend(nodes),
            Evaluated::Absent => {}
        }
    }

    /// 收敛成单个节点：序列包装成表达式，缺省值变成空表达式。
    pub fn into_node(self) -> Node {
        match self {
            Evaluated::Single(node) => node,
            Evaluated::Many(nodes) => Node::Expression(Expression::new(nodes)),
            Evaluated::Absent => Node::Expression(Expression::new(Vec::new())),
        }
    }
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Dimension(_) => NodeType::Dimension,
            Node::Expression(_) => NodeType::Expression,
            Node::Value(_) => NodeType::Value,
            Node::Paren(_) => NodeType::Paren,
            Node::Comment(_) => NodeType::Comment,
            Node::Keyword(_) => NodeType::Keyword,
            Node::Quoted(_) => NodeType::Quoted,
            Node::Url(_) => NodeType::Url,
            Node::Variable(_) => NodeType::Variable,
            Node::Operation(_) => NodeType::Operation,
            Node::Negative(_) => NodeType::Negative,
            Node::Call(_) => NodeType::Call,
            Node::Declaration(_) => NodeType::Declaration,
            Node::Selector(_) => NodeType::Selector,
            Node::Ruleset(_) => NodeType::Ruleset,
            Node::AtRule(_) => NodeType::AtRule,
            Node::Media(_) => NodeType::Media,
            Node::Import(_) => NodeType::Import,
            Node::MixinDefinition(_) => NodeType::MixinDefinition,
            Node::MixinCall(_) => NodeType::MixinCall,
            Node::MixinArg(_) => NodeType::MixinArg,
        }
    }

    pub fn keyword<S: Into<String>>(value: S) -> Self {
        Node::Keyword(Keyword {
            value: value.into(),
        })
    }

    pub fn as_dimension(&self) -> Option<&Dimension> {
        match self {
            Node::Dimension(dimension) => Some(dimension),
            _ => None,
        }
    }

    /// 表达式是否带有括号标记（用于单子节点表达式的双括号判断）。
    pub fn has_parens(&self) -> (bool, bool) {
        match self {
            Node::Expression(expression) => (expression.parens, expression.parens_in_op),
            _ => (false, false),
        }
    }
}

/// 空白分隔的值序列。
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub value: Vec<Node>,
    /// 源码中是否被括号包围。
    pub parens: bool,
    /// 括号是否作为运算符的操作数出现。
    pub parens_in_op: bool,
    pub no_spacing: bool,
}

impl Expression {
    pub fn new(value: Vec<Node>) -> Self {
        Self {
            value,
            parens: false,
            parens_in_op: false,
            no_spacing: false,
        }
    }
}

/// 逗号分隔的值列表。
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub value: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paren {
    pub value: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub value: String,
    pub is_line_comment: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quoted {
    pub quote: char,
    /// 引号内的原始内容。
    pub value: String,
    /// `~"..."` 形式输出时不带引号。
    pub escaped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Url {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// 包含 `@` 前缀的变量名。
    pub name: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op: Operator,
    pub left: Box<Node>,
    pub right: Box<Node>,
    pub is_spaced: bool,
    /// 运算符在源码中的位置。
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Negative {
    pub value: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Node>,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    /// 属性名或 `@` 开头的变量名，可能包含 `@{var}` 插值。
    pub name: String,
    pub value: Box<Node>,
    pub important: bool,
    /// 是否为变量赋值。
    pub variable: bool,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    None,
    Descendant,
    Child,
    Adjacent,
    Sibling,
}

impl Combinator {
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol {
            ">" => Combinator::Child,
            "+" => Combinator::Adjacent,
            "~" => Combinator::Sibling,
            _ => Combinator::Descendant,
        }
    }
}

/// 选择器链中的一个复合选择器及其前置组合符。
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub combinator: Combinator,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extend {
    pub target: Selector,
    pub all: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub elements: Vec<Element>,
    pub extends: Vec<Extend>,
}

impl Selector {
    pub fn new(elements: Vec<Element>) -> Self {
        Self {
            elements,
            extends: Vec::new(),
        }
    }

    pub fn has_parent_reference(&self) -> bool {
        self.elements
            .iter()
            .any(|element| element.value.contains('&'))
    }

    /// mixin 查找使用的名称：去掉组合符后直接拼接。
    pub fn mixin_key(&self) -> String {
        self.elements
            .iter()
            .map(|element| element.value.as_str())
            .collect()
    }

    /// 把当前选择器挂到父选择器下，`&` 替换为父选择器文本，否则以后代关系连接。
    pub fn join(&self, parent: &Selector, parent_css: &str) -> Selector {
        let elements = if self.has_parent_reference() {
            self.elements
                .iter()
                .map(|element| Element {
                    combinator: element.combinator,
                    value: element.value.replace('&', parent_css),
                })
                .collect()
        } else {
            let mut elements = parent.elements.clone();
            for (idx, element) in self.elements.iter().enumerate() {
                let combinator = match (idx, element.combinator) {
                    (0, Combinator::None) => Combinator::Descendant,
                    (_, combinator) => combinator,
                };
                elements.push(Element {
                    combinator,
                    value: element.value.clone(),
                });
            }
            elements
        };
        Selector {
            elements,
            extends: self.extends.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ruleset {
    pub selectors: Vec<Selector>,
    pub rules: Vec<Node>,
    /// 样式表根节点没有选择器。
    pub root: bool,
}

impl Ruleset {
    pub fn root(rules: Vec<Node>) -> Self {
        Self {
            selectors: Vec::new(),
            rules,
            root: true,
        }
    }

    pub fn new(selectors: Vec<Selector>, rules: Vec<Node>) -> Self {
        Self {
            selectors,
            rules,
            root: false,
        }
    }

    /// 仅由单个类/ID 选择器构成的规则集也可以被当作 mixin 调用。
    pub fn mixin_key(&self) -> Option<String> {
        match self.selectors.as_slice() {
            [selector]
                if selector.extends.is_empty()
                    && selector.elements.iter().all(|element| {
                        (element.value.starts_with('.') || element.value.starts_with('#'))
                            && !element.value.contains(['&', ':', '[', '@'])
                    }) =>
            {
                Some(selector.mixin_key())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtRule {
    /// 包含 `@` 前缀的名称。
    pub name: String,
    pub prelude: Option<Box<Node>>,
    pub rules: Option<Vec<Node>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    pub features: Box<Node>,
    pub rules: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: Box<Node>,
    pub features: Option<Box<Node>>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixinParam {
    pub name: Option<String>,
    pub default: Option<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixinDefinition {
    pub name: String,
    pub params: Vec<MixinParam>,
    /// 原样保留的 `when` 条件文本。
    pub guard: Option<String>,
    pub rules: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixinCall {
    pub name: String,
    pub args: Vec<Node>,
    pub important: bool,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixinArg {
    pub name: Option<String>,
    pub value: Box<Node>,
}
