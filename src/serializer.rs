use crate::ast::{AtRule, Combinator, Declaration, Import, Media, Node, Ruleset, Selector};
use crate::context::EvalContext;
use crate::error::LessResult;
use crate::utils::{collapse_whitespace, indent};

impl Node {
    /// 把节点的 CSS 文本追加到输出缓冲区。
    pub fn gen_css(&self, ctx: &EvalContext, output: &mut String) -> LessResult<()> {
        match self {
            Node::Dimension(dimension) => output.push_str(&dimension.to_css(
                ctx.numeric_precision,
                ctx.strict_units,
                ctx.compress,
            )?),
            Node::Expression(expression) => {
                let separator = if expression.no_spacing { "" } else { " " };
                join_css(&expression.value, separator, ctx, output)?;
            }
            Node::Value(value) => {
                let separator = if ctx.compress { "," } else { ", " };
                join_css(&value.value, separator, ctx, output)?;
            }
            Node::Paren(paren) => {
                output.push('(');
                paren.value.gen_css(ctx, output)?;
                output.push(')');
            }
            Node::Comment(comment) => output.push_str(&comment.value),
            Node::Keyword(keyword) => output.push_str(&keyword.value),
            Node::Quoted(quoted) => {
                if quoted.escaped {
                    output.push_str(&quoted.value);
                } else {
                    output.push(quoted.quote);
                    output.push_str(&quoted.value);
                    output.push(quoted.quote);
                }
            }
            Node::Url(url) => output.push_str(&url.value),
            Node::Variable(variable) => output.push_str(&variable.name),
            Node::Operation(operation) => {
                operation.left.gen_css(ctx, output)?;
                if operation.is_spaced {
                    output.push(' ');
                }
                output.push_str(operation.op.as_str());
                if operation.is_spaced {
                    output.push(' ');
                }
                operation.right.gen_css(ctx, output)?;
            }
            Node::Negative(negative) => {
                output.push('-');
                negative.value.gen_css(ctx, output)?;
            }
            Node::Call(call) => {
                output.push_str(&call.name);
                output.push('(');
                join_css(&call.args, ", ", ctx, output)?;
                output.push(')');
            }
            Node::Declaration(declaration) => {
                output.push_str(&format_declaration(declaration, ctx)?);
            }
            Node::Selector(selector) => output.push_str(&selector.css_text(ctx.compress)),
            Node::Import(import) => output.push_str(&format_import(import, ctx)?),
            Node::Ruleset(_) | Node::Media(_) | Node::AtRule(_) => {
                let serializer = Serializer::new(ctx.compress);
                serializer.render_node(self, 0, ctx, output)?;
            }
            Node::MixinArg(arg) => arg.value.gen_css(ctx, output)?,
            Node::MixinDefinition(_) | Node::MixinCall(_) => {}
        }
        Ok(())
    }

    pub fn to_css(&self, ctx: &EvalContext) -> LessResult<String> {
        let mut output = String::new();
        self.gen_css(ctx, &mut output)?;
        Ok(output)
    }
}

fn join_css(
    nodes: &[Node],
    separator: &str,
    ctx: &EvalContext,
    output: &mut String,
) -> LessResult<()> {
    for (idx, node) in nodes.iter().enumerate() {
        if idx > 0 {
            output.push_str(separator);
        }
        node.gen_css(ctx, output)?;
    }
    Ok(())
}

impl Selector {
    /// 选择器的 CSS 文本；压缩模式下组合符两侧不留空格。
    pub fn css_text(&self, compress: bool) -> String {
        let mut text = String::new();
        for (idx, element) in self.elements.iter().enumerate() {
            let symbol = match element.combinator {
                Combinator::None => None,
                Combinator::Descendant => {
                    if idx > 0 {
                        text.push(' ');
                    }
                    None
                }
                Combinator::Child => Some('>'),
                Combinator::Adjacent => Some('+'),
                Combinator::Sibling => Some('~'),
            };
            if let Some(symbol) = symbol {
                if !compress && idx > 0 {
                    text.push(' ');
                }
                text.push(symbol);
                if !compress {
                    text.push(' ');
                }
            }
            text.push_str(&element.value);
        }
        text
    }
}

fn format_declaration(declaration: &Declaration, ctx: &EvalContext) -> LessResult<String> {
    let value = declaration.value.to_css(ctx)?;
    let mut result = if ctx.compress {
        format!("{}:{}", declaration.name.trim(), collapse_whitespace(&value))
    } else {
        format!("{}: {}", declaration.name.trim(), value.trim())
    };
    if declaration.important {
        result.push_str(if ctx.compress {
            "!important"
        } else {
            " !important"
        });
    }
    Ok(result)
}

fn format_import(import: &Import, ctx: &EvalContext) -> LessResult<String> {
    let mut result = format!("@import {}", import.path.to_css(ctx)?);
    if let Some(features) = &import.features {
        result.push(' ');
        result.push_str(&features.to_css(ctx)?);
    }
    result.push(';');
    Ok(result)
}

/// 负责将扁平化的规则转换为最终 CSS 文本。
pub struct Serializer {
    minify: bool,
}

impl Serializer {
    pub fn new(minify: bool) -> Self {
        Self { minify }
    }

    pub fn to_css(&self, stylesheet: &Ruleset, ctx: &EvalContext) -> LessResult<String> {
        if self.minify {
            self.render_minified(stylesheet, ctx)
        } else {
            self.render_pretty(stylesheet, ctx)
        }
    }

    fn render_pretty(&self, stylesheet: &Ruleset, ctx: &EvalContext) -> LessResult<String> {
        let mut output = String::new();
        let (imports, nodes) = split_imports(stylesheet);
        for import in &imports {
            output.push_str(&import.to_css(ctx)?);
            output.push('\n');
        }
        if !imports.is_empty() && !nodes.is_empty() {
            output.push('\n');
        }
        for (idx, node) in nodes.iter().enumerate() {
            let before = output.len();
            self.render_node(node, 0, ctx, &mut output)?;
            if idx + 1 < nodes.len() && output.len() > before {
                output.push('\n');
            }
        }
        Ok(output.trim().to_string())
    }

    fn render_minified(&self, stylesheet: &Ruleset, ctx: &EvalContext) -> LessResult<String> {
        let mut output = String::new();
        let (imports, nodes) = split_imports(stylesheet);
        for import in &imports {
            output.push_str(&import.to_css(ctx)?);
            output.push('\n');
        }
        for node in &nodes {
            self.render_node(node, 0, ctx, &mut output)?;
        }
        while output.ends_with('\n') {
            output.pop();
        }
        Ok(output)
    }

    fn render_node(
        &self,
        node: &Node,
        level: usize,
        ctx: &EvalContext,
        output: &mut String,
    ) -> LessResult<()> {
        match node {
            Node::Ruleset(ruleset) => self.render_ruleset(ruleset, level, ctx, output),
            Node::Media(media) => self.render_media(media, level, ctx, output),
            Node::AtRule(at_rule) => self.render_at_rule(at_rule, level, ctx, output),
            Node::Declaration(_) => self.render_declarations(&[node], level, ctx, output),
            other => {
                if !self.minify {
                    output.push_str(&indent(level));
                }
                other.gen_css(ctx, output)?;
                if !self.minify {
                    output.push('\n');
                }
                Ok(())
            }
        }
    }

    fn render_ruleset(
        &self,
        ruleset: &Ruleset,
        level: usize,
        ctx: &EvalContext,
        output: &mut String,
    ) -> LessResult<()> {
        if ruleset.rules.is_empty() {
            return Ok(());
        }
        let selectors: Vec<String> = ruleset
            .selectors
            .iter()
            .map(|selector| selector.css_text(self.minify))
            .collect();
        if self.minify {
            output.push_str(&selectors.join(","));
            output.push('{');
        } else {
            output.push_str(&indent(level));
            output.push_str(&selectors.join(", "));
            output.push_str(" {\n");
        }
        self.render_block_body(&ruleset.rules, level + 1, ctx, output)?;
        self.close_block(level, output);
        Ok(())
    }

    fn render_media(
        &self,
        media: &Media,
        level: usize,
        ctx: &EvalContext,
        output: &mut String,
    ) -> LessResult<()> {
        if media.rules.is_empty() {
            return Ok(());
        }
        let features = media.features.to_css(ctx)?;
        self.open_at_rule("@media", &features, level, output);
        self.render_block_body(&media.rules, level + 1, ctx, output)?;
        self.close_block(level, output);
        Ok(())
    }

    fn render_at_rule(
        &self,
        at_rule: &AtRule,
        level: usize,
        ctx: &EvalContext,
        output: &mut String,
    ) -> LessResult<()> {
        let prelude = match &at_rule.prelude {
            Some(prelude) => prelude.to_css(ctx)?,
            None => String::new(),
        };
        match &at_rule.rules {
            Some(rules) => {
                self.open_at_rule(&at_rule.name, &prelude, level, output);
                self.render_block_body(rules, level + 1, ctx, output)?;
                self.close_block(level, output);
            }
            None => {
                if !self.minify {
                    output.push_str(&indent(level));
                }
                output.push_str(&at_rule.name);
                if !prelude.trim().is_empty() {
                    output.push(' ');
                    output.push_str(&collapse_whitespace(&prelude));
                }
                output.push(';');
                if !self.minify {
                    output.push('\n');
                }
            }
        }
        Ok(())
    }

    fn open_at_rule(&self, name: &str, prelude: &str, level: usize, output: &mut String) {
        if !self.minify {
            output.push_str(&indent(level));
        }
        output.push_str(name);
        if !prelude.trim().is_empty() {
            output.push(' ');
            if self.minify {
                output.push_str(&collapse_whitespace(prelude));
            } else {
                output.push_str(prelude.trim());
            }
        }
        output.push_str(if self.minify { "{" } else { " {\n" });
    }

    fn close_block(&self, level: usize, output: &mut String) {
        if self.minify {
            output.push('}');
        } else {
            output.push_str(&indent(level));
            output.push_str("}\n");
        }
    }

    /// 块内先连续输出声明，再输出嵌套的规则集或 at-rule。
    fn render_block_body(
        &self,
        rules: &[Node],
        level: usize,
        ctx: &EvalContext,
        output: &mut String,
    ) -> LessResult<()> {
        let (declarations, nested): (Vec<&Node>, Vec<&Node>) = rules
            .iter()
            .partition(|rule| matches!(rule, Node::Declaration(_) | Node::Comment(_)));
        self.render_declarations(&declarations, level, ctx, output)?;
        for node in nested {
            self.render_node(node, level, ctx, output)?;
        }
        Ok(())
    }

    fn render_declarations(
        &self,
        rules: &[&Node],
        level: usize,
        ctx: &EvalContext,
        output: &mut String,
    ) -> LessResult<()> {
        let mut first = true;
        for &rule in rules {
            let text = match rule {
                Node::Declaration(declaration) => format_declaration(declaration, ctx)?,
                Node::Comment(comment) if !self.minify => comment.value.clone(),
                _ => continue,
            };
            if self.minify {
                if !first {
                    output.push(';');
                }
                output.push_str(&text);
            } else {
                output.push_str(&indent(level));
                output.push_str(&text);
                if matches!(rule, Node::Declaration(_)) {
                    output.push(';');
                }
                output.push('\n');
            }
            first = false;
        }
        Ok(())
    }
}

fn split_imports(stylesheet: &Ruleset) -> (Vec<&Node>, Vec<&Node>) {
    stylesheet
        .rules
        .iter()
        .partition(|node| matches!(node, Node::Import(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Element, Expression, Quoted, Value};
    use crate::dimension::Dimension;
    use crate::CompileOptions;
    use pretty_assertions::assert_eq;

    fn context(minify: bool) -> EvalContext {
        EvalContext::new(&CompileOptions {
            minify,
            ..CompileOptions::default()
        })
    }

    fn selector(parts: &[(Combinator, &str)]) -> Selector {
        Selector::new(
            parts
                .iter()
                .map(|(combinator, value)| Element {
                    combinator: *combinator,
                    value: value.to_string(),
                })
                .collect(),
        )
    }

    fn declaration(name: &str, value: Node) -> Node {
        Node::Declaration(Declaration {
            name: name.into(),
            value: Box::new(value),
            important: false,
            variable: false,
            offset: 0,
        })
    }

    fn stylesheet() -> Ruleset {
        let font = Node::Value(Value {
            value: vec![
                Node::Quoted(Quoted {
                    quote: '"',
                    value: "Helvetica Neue".into(),
                    escaped: false,
                }),
                Node::keyword("sans-serif"),
            ],
        });
        Ruleset::root(vec![
            Node::Ruleset(Ruleset::new(
                vec![
                    selector(&[(Combinator::None, ".a"), (Combinator::Child, ".b")]),
                    selector(&[(Combinator::None, "p")]),
                ],
                vec![
                    declaration("font-family", font),
                    declaration("margin", Node::Dimension(Dimension::with_unit(0.5, "em"))),
                ],
            )),
            Node::Ruleset(Ruleset::new(
                vec![selector(&[(Combinator::None, ".empty")])],
                Vec::new(),
            )),
            Node::Import(Import {
                path: Box::new(Node::Quoted(Quoted {
                    quote: '"',
                    value: "reset.css".into(),
                    escaped: false,
                })),
                features: None,
                options: Vec::new(),
            }),
            Node::Media(Media {
                features: Box::new(Node::keyword("screen")),
                rules: vec![Node::Ruleset(Ruleset::new(
                    vec![selector(&[(Combinator::None, ".c")])],
                    vec![declaration("color", Node::keyword("red"))],
                ))],
            }),
        ])
    }

    #[test]
    fn pretty_output() {
        let ctx = context(false);
        let css = Serializer::new(false).to_css(&stylesheet(), &ctx).unwrap();
        assert_eq!(
            css,
            "@import \"reset.css\";\n\n.a > .b, p {\n  font-family: \"Helvetica Neue\", sans-serif;\n  margin: 0.5em;\n}\n\n@media screen {\n  .c {\n    color: red;\n  }\n}"
        );
    }

    #[test]
    fn minified_output() {
        let ctx = context(true);
        let css = Serializer::new(true).to_css(&stylesheet(), &ctx).unwrap();
        assert_eq!(
            css,
            "@import \"reset.css\";\n.a>.b,p{font-family:\"Helvetica Neue\",sans-serif;margin:.5em}@media screen{.c{color:red}}"
        );
    }

    #[test]
    fn expression_spacing() {
        let ctx = context(false);
        let mut expression = Expression::new(vec![Node::keyword("a"), Node::keyword("b")]);
        assert_eq!(Node::Expression(expression.clone()).to_css(&ctx).unwrap(), "a b");
        expression.no_spacing = true;
        assert_eq!(Node::Expression(expression).to_css(&ctx).unwrap(), "ab");
    }

    #[test]
    fn strict_units_reject_compound_output() {
        let ctx = EvalContext::new(&CompileOptions {
            strict_units: true,
            ..CompileOptions::default()
        });
        let mut dimension = Dimension::with_unit(2.0, "px");
        dimension.unit.numerator.push("s".into());
        assert!(Node::Dimension(dimension).to_css(&ctx).is_err());
    }
}
