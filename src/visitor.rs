//! 按节点类型分派的通用树遍历器。
//!
//! 实现者通过 [`Implementation::register`] 为关心的节点类型登记进入/离开处理函数，
//! 未登记的类型等同于空操作。分派使用 [`TypeRegistry`] 分配的稳定下标，
//! 每个下标对应的处理函数在首次遇到时解析并缓存。

use crate::ast::{Expression, Node, NodeType, Selector};
use once_cell::sync::OnceCell;
use std::collections::HashMap;

static REGISTRY: OnceCell<TypeRegistry> = OnceCell::new();

/// 节点类型到分派下标的映射，进程内只构建一次。
#[derive(Debug)]
pub struct TypeRegistry {
    indices: HashMap<NodeType, usize>,
}

impl TypeRegistry {
    /// 构建（或取得已构建的）全局注册表，重复调用返回同一实例。
    pub fn init() -> &'static TypeRegistry {
        REGISTRY.get_or_init(|| {
            // 下标从 1 开始；辅助包装类型不分配下标
            let indices: HashMap<NodeType, usize> = NodeType::ALL
                .into_iter()
                .filter(|ty| *ty != NodeType::MixinArg)
                .enumerate()
                .map(|(idx, ty)| (ty, idx + 1))
                .collect();
            log::debug!(target: "less", "节点类型注册表已构建，共 {} 种类型", indices.len());
            TypeRegistry { indices }
        })
    }

    pub fn index_of(&self, ty: NodeType) -> Option<usize> {
        self.indices.get(&ty).copied()
    }

    /// 最大下标，用于确定缓存大小。
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// 进入处理函数：返回值只在替换模式下生效，`None` 表示保留原节点。
pub type VisitFn<V> = fn(&mut V, &mut Node, &mut VisitArgs) -> Option<Visited>;
/// 离开处理函数，在子节点遍历完成后调用。
pub type VisitOutFn<V> = fn(&mut V, &mut Node);

#[derive(Debug, Clone, Copy)]
pub struct VisitArgs {
    /// 置为 `false` 时跳过当前节点的子节点。
    pub visit_deeper: bool,
}

impl Default for VisitArgs {
    fn default() -> Self {
        Self { visit_deeper: true }
    }
}

/// 访问结果：单个节点、需要展开的嵌套序列，或者从父列表中删除。
#[derive(Debug, Clone, PartialEq)]
pub enum Visited {
    Node(Node),
    Nodes(Vec<Visited>),
    Absent,
}

impl Visited {
    /// 按原顺序展开任意层嵌套，丢弃 `Absent`。
    pub fn flatten(self) -> Vec<Node> {
        let mut output = Vec::new();
        self.flatten_into(&mut output);
        output
    }

    fn flatten_into(self, output: &mut Vec<Node>) {
        let mut stack = vec![vec![self].into_iter()];
        while let Some(top) = stack.last_mut() {
            match top.next() {
                None => {
                    stack.pop();
                }
                Some(Visited::Node(node)) => output.push(node),
                Some(Visited::Absent) => {}
                Some(Visited::Nodes(nested)) => stack.push(nested.into_iter()),
            }
        }
    }

    /// 收敛为单个节点，供只能容纳一个子节点的位置使用。
    fn into_node(self) -> Node {
        match self {
            Visited::Node(node) => node,
            other => {
                let mut nodes = other.flatten();
                if nodes.len() == 1 {
                    nodes.remove(0)
                } else {
                    Node::Expression(Expression::new(nodes))
                }
            }
        }
    }
}

struct Entry<V> {
    visit: Option<VisitFn<V>>,
    visit_out: Option<VisitOutFn<V>>,
}

// 不要求 `V: Copy`
impl<V> Clone for Entry<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Entry<V> {}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self {
            visit: None,
            visit_out: None,
        }
    }
}

/// 处理函数登记表。
pub struct Handlers<V> {
    entries: HashMap<NodeType, Entry<V>>,
}

impl<V> Handlers<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn on(&mut self, ty: NodeType, visit: VisitFn<V>) -> &mut Self {
        self.entries.entry(ty).or_default().visit = Some(visit);
        self
    }

    pub fn on_out(&mut self, ty: NodeType, visit_out: VisitOutFn<V>) -> &mut Self {
        self.entries.entry(ty).or_default().visit_out = Some(visit_out);
        self
    }
}

/// 遍历的具体实现方。
pub trait Implementation: Sized {
    /// 替换模式下，进入处理函数的返回值会取代父列表中的原节点。
    fn is_replacing(&self) -> bool {
        false
    }

    fn register(handlers: &mut Handlers<Self>);
}

pub struct Visitor<'r, V: Implementation> {
    implementation: V,
    registry: &'r TypeRegistry,
    handlers: Handlers<V>,
    cache: Vec<Option<Entry<V>>>,
}

impl<'r, V: Implementation> Visitor<'r, V> {
    pub fn new(implementation: V, registry: &'r TypeRegistry) -> Self {
        let mut handlers = Handlers::new();
        V::register(&mut handlers);
        Self {
            implementation,
            registry,
            handlers,
            cache: vec![None; registry.len() + 1],
        }
    }

    pub fn implementation(&self) -> &V {
        &self.implementation
    }

    pub fn into_implementation(self) -> V {
        self.implementation
    }

    fn entry(&mut self, index: usize, ty: NodeType) -> Entry<V> {
        if let Some(entry) = self.cache.get(index).copied().flatten() {
            return entry;
        }
        let entry = self.handlers.entries.get(&ty).copied().unwrap_or_default();
        if let Some(slot) = self.cache.get_mut(index) {
            *slot = Some(entry);
        }
        entry
    }

    pub fn visit(&mut self, mut node: Node) -> Visited {
        let ty = node.node_type();
        let Some(index) = self.registry.index_of(ty) else {
            // 无类型的包装节点：直接遍历其包裹的值
            if let Node::MixinArg(arg) = &mut node {
                let inner = std::mem::replace(arg.value.as_mut(), Node::keyword(""));
                *arg.value = self.visit(inner).into_node();
            }
            return Visited::Node(node);
        };

        let entry = self.entry(index, ty);
        let mut args = VisitArgs::default();
        let mut replacement = None;
        if let Some(visit) = entry.visit {
            let result = visit(&mut self.implementation, &mut node, &mut args);
            if self.implementation.is_replacing() {
                replacement = result;
            }
        }
        // 被替换成序列或缺省时，退出回调作用在原节点上
        let (mut visited, mut original) = match replacement {
            Some(replaced) => (replaced, Some(node)),
            None => (Visited::Node(node), None),
        };

        if args.visit_deeper {
            self.accept(&mut visited);
        }
        if let Some(visit_out) = entry.visit_out {
            let target = match &mut visited {
                Visited::Node(node) => Some(node),
                _ => original.as_mut(),
            };
            if let Some(node) = target {
                visit_out(&mut self.implementation, node);
            }
        }
        visited
    }

    fn accept(&mut self, visited: &mut Visited) {
        match visited {
            Visited::Node(node) => node.accept(self),
            Visited::Nodes(nodes) => {
                for nested in nodes {
                    self.accept(nested);
                }
            }
            Visited::Absent => {}
        }
    }

    /// 遍历子节点列表；替换模式下结果会被展开并过滤掉缺省项。
    pub fn visit_array(&mut self, nodes: Vec<Node>) -> Vec<Node> {
        let mut output = Vec::with_capacity(nodes.len());
        for node in nodes {
            self.visit(node).flatten_into(&mut output);
        }
        output
    }

    fn visit_boxed(&mut self, node: &mut Box<Node>) {
        let inner = std::mem::replace(node.as_mut(), Node::keyword(""));
        **node = self.visit(inner).into_node();
    }

    fn visit_selectors(&mut self, selectors: Vec<Selector>) -> Vec<Selector> {
        let nodes = selectors.into_iter().map(Node::Selector).collect();
        self.visit_array(nodes)
            .into_iter()
            .filter_map(|node| match node {
                Node::Selector(selector) => Some(selector),
                _ => None,
            })
            .collect()
    }
}

impl Node {
    /// 由节点自身决定如何遍历子节点。
    pub fn accept<V: Implementation>(&mut self, visitor: &mut Visitor<'_, V>) {
        match self {
            Node::Expression(expression) => {
                expression.value = visitor.visit_array(std::mem::take(&mut expression.value));
            }
            Node::Value(value) => {
                value.value = visitor.visit_array(std::mem::take(&mut value.value));
            }
            Node::Paren(paren) => visitor.visit_boxed(&mut paren.value),
            Node::Operation(operation) => {
                visitor.visit_boxed(&mut operation.left);
                visitor.visit_boxed(&mut operation.right);
            }
            Node::Negative(negative) => visitor.visit_boxed(&mut negative.value),
            Node::Call(call) => call.args = visitor.visit_array(std::mem::take(&mut call.args)),
            Node::Declaration(declaration) => visitor.visit_boxed(&mut declaration.value),
            Node::Ruleset(ruleset) => {
                ruleset.selectors = visitor.visit_selectors(std::mem::take(&mut ruleset.selectors));
                ruleset.rules = visitor.visit_array(std::mem::take(&mut ruleset.rules));
            }
            Node::AtRule(at_rule) => {
                if let Some(prelude) = &mut at_rule.prelude {
                    visitor.visit_boxed(prelude);
                }
                if let Some(rules) = &mut at_rule.rules {
                    *rules = visitor.visit_array(std::mem::take(rules));
                }
            }
            Node::Media(media) => {
                visitor.visit_boxed(&mut media.features);
                media.rules = visitor.visit_array(std::mem::take(&mut media.rules));
            }
            Node::Import(import) => {
                visitor.visit_boxed(&mut import.path);
                if let Some(features) = &mut import.features {
                    visitor.visit_boxed(features);
                }
            }
            Node::MixinDefinition(definition) => {
                definition.rules = visitor.visit_array(std::mem::take(&mut definition.rules));
            }
            Node::MixinCall(call) => call.args = visitor.visit_array(std::mem::take(&mut call.args)),
            Node::MixinArg(arg) => visitor.visit_boxed(&mut arg.value),
            Node::Dimension(_)
            | Node::Comment(_)
            | Node::Keyword(_)
            | Node::Quoted(_)
            | Node::Url(_)
            | Node::Variable(_)
            | Node::Selector(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Call, MixinArg, MixinCall};
    use crate::dimension::Dimension;
    use pretty_assertions::assert_eq;

    fn keywords(values: &[&str]) -> Vec<Node> {
        values.iter().map(|value| Node::keyword(*value)).collect()
    }

    fn expression(values: &[&str]) -> Node {
        Node::Expression(Expression::new(keywords(values)))
    }

    struct DropEverything;

    impl Implementation for DropEverything {
        fn is_replacing(&self) -> bool {
            true
        }

        fn register(handlers: &mut Handlers<Self>) {
            handlers.on(NodeType::Keyword, |_, _, _| Some(Visited::Absent));
        }
    }

    #[test]
    fn replacing_absent_filters_every_element() {
        let mut visitor = Visitor::new(DropEverything, TypeRegistry::init());
        let output = visitor.visit_array(keywords(&["a", "b", "c"]));
        assert!(output.is_empty());
    }

    struct Splice;

    impl Implementation for Splice {
        fn is_replacing(&self) -> bool {
            true
        }

        fn register(handlers: &mut Handlers<Self>) {
            handlers.on(NodeType::Keyword, |_, node, args| match node {
                Node::Keyword(keyword) if keyword.value == "b" => {
                    args.visit_deeper = false;
                    Some(Visited::Nodes(vec![
                        Visited::Node(Node::keyword("b1")),
                        Visited::Nodes(vec![
                            Visited::Absent,
                            Visited::Node(Node::keyword("b2")),
                            Visited::Nodes(vec![Visited::Node(Node::keyword("b3"))]),
                        ]),
                    ]))
                }
                _ => None,
            });
        }
    }

    #[test]
    fn replacing_sequences_are_spliced_in_order() {
        let mut visitor = Visitor::new(Splice, TypeRegistry::init());
        let output = visitor.visit_array(keywords(&["a", "b", "c"]));
        assert_eq!(output, keywords(&["a", "b1", "b2", "b3", "c"]));
    }

    #[derive(Default)]
    struct Counter {
        entered: Vec<String>,
        left: usize,
    }

    impl Implementation for Counter {
        fn register(handlers: &mut Handlers<Self>) {
            handlers
                .on(NodeType::Keyword, |counter, node, _| {
                    if let Node::Keyword(keyword) = node {
                        counter.entered.push(keyword.value.clone());
                    }
                    Some(Visited::Absent)
                })
                .on(NodeType::Call, |_, _, args| {
                    args.visit_deeper = false;
                    None
                })
                .on_out(NodeType::Expression, |counter, _| counter.left += 1);
        }
    }

    #[derive(Default)]
    struct ExitLog {
        exits: Vec<String>,
    }

    impl Implementation for ExitLog {
        fn is_replacing(&self) -> bool {
            true
        }

        fn register(handlers: &mut Handlers<Self>) {
            handlers
                .on(NodeType::Keyword, |_, node, _| match node {
                    Node::Keyword(keyword) if keyword.value == "b" => Some(Visited::Nodes(vec![
                        Visited::Node(Node::keyword("b1")),
                        Visited::Node(Node::keyword("b2")),
                    ])),
                    Node::Keyword(keyword) if keyword.value == "c" => Some(Visited::Absent),
                    _ => None,
                })
                .on_out(NodeType::Keyword, |log, node| {
                    if let Node::Keyword(keyword) = node {
                        log.exits.push(keyword.value.clone());
                    }
                });
        }
    }

    #[test]
    fn exit_handlers_run_for_replaced_nodes() {
        let mut visitor = Visitor::new(ExitLog::default(), TypeRegistry::init());
        let output = visitor.visit_array(keywords(&["a", "b", "c"]));
        assert_eq!(output, keywords(&["a", "b1", "b2"]));
        let log = visitor.into_implementation();
        assert_eq!(log.exits, vec!["a", "b", "c"]);
    }

    #[test]
    fn non_replacing_ignores_results_and_honours_depth() {
        let call = Node::Call(Call {
            name: "f".into(),
            args: keywords(&["hidden"]),
            offset: 0,
        });
        let mut tree = Node::Expression(Expression::new(vec![
            Node::keyword("a"),
            expression(&["b"]),
            call,
        ]));
        let mut visitor = Visitor::new(Counter::default(), TypeRegistry::init());
        let original = tree.clone();
        let visited = visitor.visit(std::mem::replace(&mut tree, Node::keyword("")));
        assert_eq!(visited, Visited::Node(original));
        let counter = visitor.into_implementation();
        assert_eq!(counter.entered, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(counter.left, 2);
    }

    #[test]
    fn untyped_wrappers_forward_to_their_value() {
        let call = Node::MixinCall(MixinCall {
            name: ".m".into(),
            args: vec![Node::MixinArg(MixinArg {
                name: Some("@a".into()),
                value: Box::new(Node::keyword("x")),
            })],
            important: false,
            offset: 0,
        });
        let mut visitor = Visitor::new(Counter::default(), TypeRegistry::init());
        visitor.visit(call);
        assert_eq!(visitor.implementation().entered, vec!["x".to_string()]);
    }

    #[test]
    fn registry_skips_auxiliary_types() {
        let registry = TypeRegistry::init();
        assert!(std::ptr::eq(registry, TypeRegistry::init()));
        assert_eq!(registry.index_of(NodeType::MixinArg), None);
        assert_eq!(registry.len(), NodeType::ALL.len() - 1);
        let dimension = Node::Dimension(Dimension::unitless(1.0));
        assert!(registry.index_of(dimension.node_type()).is_some());
    }
}
