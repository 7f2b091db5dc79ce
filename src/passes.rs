//! 求值之后基于访问器的两个处理阶段：extend 解析与规则展开。

use crate::ast::{
    AtRule, Combinator, Element, Expression, Media, Node, NodeType, Ruleset, Selector, Value,
};
use crate::visitor::{Handlers, Implementation, TypeRegistry, VisitArgs, Visited, Visitor};

fn run<V: Implementation>(implementation: V, root: Ruleset) -> (Ruleset, V) {
    let mut visitor = Visitor::new(implementation, TypeRegistry::init());
    let visited = visitor.visit(Node::Ruleset(root)).flatten();
    let root = match visited.into_iter().next() {
        Some(Node::Ruleset(root)) => root,
        Some(other) => Ruleset::root(vec![other]),
        None => Ruleset::root(Vec::new()),
    };
    (root, visitor.into_implementation())
}

struct ExtendTarget {
    extender: Selector,
    extender_css: String,
    target_css: String,
    all: bool,
}

/// 第一遍：收集带 `:extend(...)` 的选择器。
#[derive(Default)]
struct ExtendFinder {
    targets: Vec<ExtendTarget>,
}

impl Implementation for ExtendFinder {
    fn register(handlers: &mut Handlers<Self>) {
        handlers.on(NodeType::Ruleset, |finder, node, _| {
            if let Node::Ruleset(ruleset) = node {
                for selector in &ruleset.selectors {
                    let extender = Selector::new(selector.elements.clone());
                    let extender_css = extender.css_text(false);
                    for extend in &selector.extends {
                        finder.targets.push(ExtendTarget {
                            extender: extender.clone(),
                            extender_css: extender_css.clone(),
                            target_css: extend.target.css_text(false),
                            all: extend.all,
                        });
                    }
                }
            }
            None
        });
    }
}

/// 第二遍：把扩展者追加到匹配目标的规则集上。
struct ExtendApplier {
    targets: Vec<ExtendTarget>,
}

impl Implementation for ExtendApplier {
    fn register(handlers: &mut Handlers<Self>) {
        handlers.on(NodeType::Ruleset, |applier, node, _| {
            if let Node::Ruleset(ruleset) = node {
                applier.apply(ruleset);
            }
            None
        });
    }
}

impl ExtendApplier {
    fn apply(&self, ruleset: &mut Ruleset) {
        let mut existing: Vec<String> = ruleset
            .selectors
            .iter()
            .map(|selector| selector.css_text(false))
            .collect();
        let mut added = Vec::new();
        for css in &existing {
            for target in &self.targets {
                if *css == target.target_css {
                    added.push(target.extender.clone());
                } else if target.all {
                    if let Some(replaced) =
                        replace_at_boundaries(css, &target.target_css, &target.extender_css)
                    {
                        added.push(Selector::new(vec![Element {
                            combinator: Combinator::None,
                            value: replaced,
                        }]));
                    }
                }
            }
        }
        for selector in added {
            let css = selector.css_text(false);
            if !existing.contains(&css) {
                existing.push(css);
                ruleset.selectors.push(selector);
            }
        }
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') || !ch.is_ascii()
}

/// 只替换落在名称边界上的目标文本，`.c` 不会命中 `.cd`；没有命中时返回 `None`。
fn replace_at_boundaries(css: &str, target: &str, replacement: &str) -> Option<String> {
    let (Some(first), Some(last)) = (target.chars().next(), target.chars().last()) else {
        return None;
    };
    let mut output = String::with_capacity(css.len());
    let mut copied = 0;
    for (start, _) in css.match_indices(target) {
        let end = start + target.len();
        if start < copied {
            continue;
        }
        let open_before = is_name_char(first)
            && css[..start].chars().next_back().is_some_and(is_name_char);
        let open_after = is_name_char(last) && css[end..].chars().next().is_some_and(is_name_char);
        if open_before || open_after {
            continue;
        }
        output.push_str(&css[copied..start]);
        output.push_str(replacement);
        copied = end;
    }
    if copied == 0 {
        return None;
    }
    output.push_str(&css[copied..]);
    Some(output)
}

/// 解析 extend：`sel:extend(target)` 会把 `sel` 加到选择器为 `target` 的规则集上。
pub fn resolve_extends(root: Ruleset) -> Ruleset {
    let (root, finder) = run(ExtendFinder::default(), root);
    if finder.targets.is_empty() {
        return root;
    }
    log::debug!(target: "less", "解析 extend，共 {} 条", finder.targets.len());
    let (root, _) = run(
        ExtendApplier {
            targets: finder.targets,
        },
        root,
    );
    root
}

/// 把嵌套的规则集与媒体查询提升到根层级，并去掉不产生输出的节点。
struct Flattener;

impl Implementation for Flattener {
    fn is_replacing(&self) -> bool {
        true
    }

    fn register(handlers: &mut Handlers<Self>) {
        handlers
            .on(NodeType::Ruleset, visit_ruleset)
            .on(NodeType::Media, visit_media)
            .on(NodeType::AtRule, visit_at_rule)
            .on(NodeType::MixinDefinition, |_, _, _| Some(Visited::Absent))
            .on(NodeType::MixinCall, |_, _, _| Some(Visited::Absent));
    }
}

fn nodes(nodes: Vec<Node>) -> Visited {
    Visited::Nodes(nodes.into_iter().map(Visited::Node).collect())
}

fn visit_ruleset(_: &mut Flattener, node: &mut Node, args: &mut VisitArgs) -> Option<Visited> {
    let Node::Ruleset(ruleset) = node else {
        return None;
    };
    if ruleset.root {
        return None;
    }
    args.visit_deeper = false;
    let ruleset = std::mem::replace(ruleset, Ruleset::root(Vec::new()));
    Some(nodes(hoist_ruleset(ruleset)))
}

fn visit_media(_: &mut Flattener, node: &mut Node, args: &mut VisitArgs) -> Option<Visited> {
    let Node::Media(media) = node else {
        return None;
    };
    args.visit_deeper = false;
    let media = std::mem::replace(
        media,
        Media {
            features: Box::new(Node::keyword("")),
            rules: Vec::new(),
        },
    );
    Some(nodes(hoist_media(media)))
}

fn visit_at_rule(_: &mut Flattener, node: &mut Node, args: &mut VisitArgs) -> Option<Visited> {
    let Node::AtRule(at_rule) = node else {
        return None;
    };
    args.visit_deeper = false;
    let at_rule = std::mem::replace(
        at_rule,
        AtRule {
            name: String::new(),
            prelude: None,
            rules: None,
        },
    );
    Some(Visited::Node(hoist_at_rule(at_rule)))
}

/// at-rule 自身留在原处，块内的规则集展开成同一层。
fn hoist_at_rule(mut at_rule: AtRule) -> Node {
    if let Some(rules) = &mut at_rule.rules {
        let mut flattened = Vec::with_capacity(rules.len());
        for rule in std::mem::take(rules) {
            match rule {
                Node::Ruleset(ruleset) => flattened.extend(hoist_ruleset(ruleset)),
                Node::Media(media) => flattened.extend(hoist_media(media)),
                Node::AtRule(nested) => flattened.push(hoist_at_rule(nested)),
                Node::MixinDefinition(_) | Node::MixinCall(_) => {}
                other => flattened.push(other),
            }
        }
        *rules = flattened;
    }
    Node::AtRule(at_rule)
}

/// 规则集只保留自己的声明，嵌套内容依次排在其后。
fn hoist_ruleset(mut ruleset: Ruleset) -> Vec<Node> {
    let mut hoisted = Vec::new();
    for rule in std::mem::take(&mut ruleset.rules) {
        match rule {
            Node::Declaration(_) | Node::Comment(_) => ruleset.rules.push(rule),
            Node::Ruleset(nested) => hoisted.extend(hoist_ruleset(nested)),
            Node::Media(media) => hoisted.extend(hoist_media(media)),
            Node::AtRule(at_rule) => hoisted.push(hoist_at_rule(at_rule)),
            Node::MixinDefinition(_) | Node::MixinCall(_) => {}
            other => hoisted.push(other),
        }
    }
    let mut output = Vec::with_capacity(hoisted.len() + 1);
    if !ruleset.rules.is_empty() {
        output.push(Node::Ruleset(ruleset));
    }
    output.extend(hoisted);
    output
}

/// 媒体查询内的规则集展开到同一层；嵌套的媒体查询合并条件后移到外面。
fn hoist_media(mut media: Media) -> Vec<Node> {
    let mut inner = Vec::new();
    let mut outer = Vec::new();
    for rule in std::mem::take(&mut media.rules) {
        let produced = match rule {
            Node::Ruleset(ruleset) => hoist_ruleset(ruleset),
            Node::Media(nested) => hoist_media(nested),
            Node::AtRule(at_rule) => vec![hoist_at_rule(at_rule)],
            Node::MixinDefinition(_) | Node::MixinCall(_) => Vec::new(),
            other => vec![other],
        };
        for node in produced {
            match node {
                Node::Media(mut nested) => {
                    nested.features = Box::new(merge_features(&media.features, &nested.features));
                    outer.push(Node::Media(nested));
                }
                other => inner.push(other),
            }
        }
    }
    let mut output = Vec::with_capacity(outer.len() + 1);
    if !inner.is_empty() {
        media.rules = inner;
        output.push(Node::Media(media));
    }
    output.extend(outer);
    output
}

fn queries(features: &Node) -> Vec<Node> {
    match features {
        Node::Value(value) => value.value.clone(),
        other => vec![other.clone()],
    }
}

/// 外层与内层查询两两用 `and` 连接。
fn merge_features(outer: &Node, inner: &Node) -> Node {
    let inner = queries(inner);
    let mut merged = Vec::new();
    for left in queries(outer) {
        for right in &inner {
            merged.push(Node::Expression(Expression::new(vec![
                left.clone(),
                Node::keyword("and"),
                right.clone(),
            ])));
        }
    }
    Node::Value(Value { value: merged })
}

/// 对已求值的样式表做展开，结果中的规则集都不再嵌套。
pub fn flatten(root: Ruleset) -> Ruleset {
    log::debug!(target: "less", "展开嵌套规则，根节点共 {} 条规则", root.rules.len());
    run(Flattener, root).0
}
