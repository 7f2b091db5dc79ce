use crate::cst::CstNode;
use crate::error::{GrammarError, LexError};
use crate::grammar::{Grammar, Rule, TokenSet, LESS_GRAMMAR};
use crate::lexer::{tokenize, Token, TokenCategory, TokenKind};

/// 一次解析的完整结果：可能不完整的语法树以及批量收集的问题。
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub tree: CstNode,
    pub lexical_errors: Vec<LexError>,
    pub grammar_errors: Vec<GrammarError>,
}

impl ParseOutcome {
    pub fn has_errors(&self) -> bool {
        !self.lexical_errors.is_empty() || !self.grammar_errors.is_empty()
    }
}

/// 使用进程级共享语法解析一段完整的 LESS 源码。
pub fn parse(source: &str) -> ParseOutcome {
    LessParser::new(&LESS_GRAMMAR).parse(source)
}

/// 规则的软失败，可在有序分支中被吞掉并回溯。
#[derive(Debug)]
struct Mismatch {
    rule: Rule,
    offset: usize,
    expected: TokenSet,
    found: Option<String>,
}

type Parsed<T> = Result<T, Mismatch>;

/// 选择器列表解析后交给门控条件使用的局部结果。
#[derive(Debug, Clone, Copy)]
struct SelectorListInfo {
    has_extend: bool,
    callable: bool,
}

/// LESS 递归下降解析器，负责把 token 流转换成具体语法树。
///
/// 输入状态只属于当前调用，每次 `parse` 都会重置。
pub struct LessParser<'g> {
    grammar: &'g Grammar,
    source: String,
    tokens: Vec<Token>,
    position: usize,
    errors: Vec<GrammarError>,
}

impl<'g> LessParser<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self {
            grammar,
            source: String::new(),
            tokens: Vec::new(),
            position: 0,
            errors: Vec::new(),
        }
    }

    pub fn parse(&mut self, source: &str) -> ParseOutcome {
        let lexed = tokenize(source);
        self.set_input(source, lexed.tokens);
        let tree = self.primary(false);
        ParseOutcome {
            tree,
            lexical_errors: lexed.errors,
            grammar_errors: std::mem::take(&mut self.errors),
        }
    }

    fn set_input(&mut self, source: &str, tokens: Vec<Token>) {
        self.source = source.to_string();
        self.tokens = tokens;
        self.position = 0;
        self.errors.clear();
    }

    /// 语句序列：at-rule、变量赋值、（块内的）声明以及规则集/mixin。
    fn primary(&mut self, in_block: bool) -> CstNode {
        let mut node = CstNode::new(Rule::Primary);
        while let Some(kind) = self.kind_at(0) {
            if kind == TokenKind::RCurly {
                if in_block {
                    break;
                }
                let stray = self.mismatch(Rule::Primary, self.grammar.first(Rule::Primary));
                self.record(stray);
                self.position += 1;
                continue;
            }
            match self.statement(kind, in_block) {
                Ok(statement) => node.push_node(statement),
                Err(mismatch) => {
                    self.record(mismatch);
                    self.resynchronize();
                }
            }
        }
        node
    }

    fn statement(&mut self, kind: TokenKind, in_block: bool) -> Parsed<CstNode> {
        if kind == TokenKind::AtName && self.kind_at(1) == Some(TokenKind::Colon) {
            return self.variable_assign();
        }
        if self.grammar.first(Rule::AtRule).contains(kind) {
            return self.at_rule();
        }
        if in_block && self.grammar.first(Rule::Declaration).contains(kind) {
            if !self.grammar.overlaps(Rule::Primary, kind) {
                return self.declaration();
            }
            if let Ok(declaration) = self.attempt(|p| p.declaration()) {
                return Ok(declaration);
            }
        }
        if self.grammar.first(Rule::RulesetOrMixin).contains(kind) {
            return self.ruleset_or_mixin();
        }
        Err(self.mismatch(Rule::Primary, self.grammar.first(Rule::Primary)))
    }

    /// 跳到下一个语句边界：同层的 `;`，或是关闭本次跳过中打开的块的 `}`。
    fn resynchronize(&mut self) {
        let start = self.position;
        let mut depth = 0usize;
        while let Some(kind) = self.kind_at(0) {
            match kind {
                TokenKind::SemiColon if depth == 0 => {
                    self.position += 1;
                    break;
                }
                TokenKind::LCurly => depth += 1,
                TokenKind::RCurly => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    if depth == 0 {
                        self.position += 1;
                        break;
                    }
                }
                _ => {}
            }
            self.position += 1;
        }
        log::trace!(target: "less", "从 token {start} 重新同步到 {}", self.position);
    }

    /// 选择器前缀只解析一次，随后根据后续 token 决定是 mixin 调用、mixin 定义还是规则集。
    fn ruleset_or_mixin(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::RulesetOrMixin);
        let (list, info) = self.selector_list()?;
        node.push_node(list);

        match self.kind_at(0) {
            Some(TokenKind::SemiColon) if info.has_extend => {
                self.consume_into(&mut node, TokenKind::SemiColon)?;
            }
            Some(TokenKind::LParen) => {
                node.push_node(self.args()?);
                match self.kind_at(0) {
                    Some(TokenKind::When) | Some(TokenKind::LCurly) => {
                        if self.at(TokenKind::When) {
                            node.push_node(self.guard()?);
                        }
                        node.push_node(self.block()?);
                    }
                    _ => self.call_terminator(&mut node)?,
                }
            }
            Some(TokenKind::SemiColon) | Some(TokenKind::ImportantSym) if info.callable => {
                self.call_terminator(&mut node)?;
            }
            Some(TokenKind::RCurly) if info.callable => {}
            _ => {
                let mut expected = TokenSet::of(&[TokenKind::LCurly, TokenKind::LParen]);
                if info.has_extend || info.callable {
                    expected.insert(TokenKind::SemiColon);
                }
                if !self.at(TokenKind::LCurly) {
                    return Err(self.mismatch(Rule::RulesetOrMixin, expected));
                }
                node.push_node(self.block()?);
            }
        }
        Ok(node)
    }

    fn call_terminator(&mut self, node: &mut CstNode) -> Parsed<()> {
        if self.at(TokenKind::ImportantSym) {
            self.consume_into(node, TokenKind::ImportantSym)?;
        }
        if self.at(TokenKind::RCurly) {
            return Ok(());
        }
        self.consume_into(node, TokenKind::SemiColon)
    }

    fn selector_list(&mut self) -> Parsed<(CstNode, SelectorListInfo)> {
        let mut node = CstNode::new(Rule::SelectorList);
        let mut has_extend = false;
        let mut mixin_like = true;
        let mut count = 0usize;
        loop {
            let (selector, selector_mixin_like) = self.selector(false)?;
            node.push_node(selector);
            count += 1;
            mixin_like &= selector_mixin_like;
            if self.at(TokenKind::Extend) {
                node.push_node(self.extend_rule()?);
                has_extend = true;
            }
            if self.at(TokenKind::Comma) {
                self.consume_into(&mut node, TokenKind::Comma)?;
            } else {
                break;
            }
        }
        let info = SelectorListInfo {
            has_extend,
            callable: count == 1 && mixin_like && !has_extend,
        };
        Ok((node, info))
    }

    fn extend_rule(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::ExtendRule);
        self.consume_into(&mut node, TokenKind::Extend)?;
        loop {
            let (selector, _) = self.selector(true)?;
            node.push_node(selector);
            if self.at(TokenKind::Comma) {
                self.consume_into(&mut node, TokenKind::Comma)?;
            } else {
                break;
            }
        }
        if self.at_extend_all() {
            self.consume_into(&mut node, TokenKind::Ident)?;
        }
        self.consume_into(&mut node, TokenKind::RParen)?;
        Ok(node)
    }

    fn at_extend_all(&self) -> bool {
        self.at(TokenKind::Ident)
            && self.text_at(0) == Some("all")
            && self.kind_at(1) == Some(TokenKind::RParen)
    }

    /// 复合选择器链，第二个返回值表示整条链是否只由类/ID 组成（可作为 mixin 调用）。
    ///
    /// 这是语法中唯一依赖空白的位置：两个简单选择器之间有没有空白，
    /// 通过前一个 token 的结束偏移与下一个 token 的起始偏移比较得出。
    fn selector(&mut self, in_extend: bool) -> Parsed<(CstNode, bool)> {
        let mut node = CstNode::new(Rule::Selector);
        let (simple, mut mixin_like) = self.simple_selector()?;
        node.push_node(simple);

        let Some(next) = self.kind_at(0) else {
            return Ok((node, mixin_like));
        };
        let starts_combinator = self.grammar.first(Rule::Combinator).contains(next);
        let starts_selector = self.grammar.first(Rule::Selector).contains(next)
            && !(in_extend && self.at_extend_all());

        if self.whitespace_gate() && (starts_combinator || starts_selector) {
            if starts_combinator {
                node.push_node(self.combinator()?);
            }
            let (rest, rest_mixin_like) = self.selector(in_extend)?;
            node.push_node(rest);
            mixin_like &= rest_mixin_like;
        } else if starts_combinator {
            node.push_node(self.combinator()?);
            let (rest, rest_mixin_like) = self.selector(in_extend)?;
            node.push_node(rest);
            mixin_like &= rest_mixin_like;
        }
        Ok((node, mixin_like))
    }

    fn simple_selector(&mut self) -> Parsed<(CstNode, bool)> {
        let mut node = CstNode::new(Rule::SimpleSelector);
        let mut class_only = true;
        match self.kind_at(0) {
            Some(kind) if self.grammar.first(Rule::ElementName).contains(kind) => {
                self.consume_into(&mut node, kind)?;
                class_only = false;
            }
            Some(kind) if self.grammar.first(Rule::SimpleSelectorSuffix).contains(kind) => {
                class_only &= kind == TokenKind::ClassOrId;
                node.push_node(self.simple_selector_suffix()?);
            }
            _ => {
                return Err(self.mismatch(
                    Rule::SimpleSelector,
                    self.grammar.first(Rule::SimpleSelector),
                ))
            }
        }
        while self.adjacent() && self.at_first(Rule::SimpleSelectorSuffix) {
            class_only &= self.at(TokenKind::ClassOrId);
            node.push_node(self.simple_selector_suffix()?);
        }
        Ok((node, class_only))
    }

    fn simple_selector_suffix(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::SimpleSelectorSuffix);
        let kind = self.kind_at(0);
        let alternative = kind.and_then(|k| self.grammar.predict(Rule::SimpleSelectorSuffix, k));
        match (alternative, kind) {
            (Some(2), _) => node.push_node(self.attrib()?),
            (Some(3), _) => node.push_node(self.pseudo()?),
            (Some(4), _) => {
                self.consume_into(&mut node, TokenKind::Ampersand)?;
                if self.adjacent() && self.at(TokenKind::Ident) {
                    self.consume_into(&mut node, TokenKind::Ident)?;
                }
            }
            (Some(5), _) => {
                self.consume_into(&mut node, TokenKind::Dot)?;
                if !self.adjacent() {
                    return Err(self.mismatch(
                        Rule::SimpleSelectorSuffix,
                        self.grammar.first(Rule::InterpolatedIdent),
                    ));
                }
                node.push_node(self.interpolated_ident()?);
            }
            (Some(_), Some(kind)) => self.consume_into(&mut node, kind)?,
            _ => {
                return Err(self.mismatch(
                    Rule::SimpleSelectorSuffix,
                    self.grammar.first(Rule::SimpleSelectorSuffix),
                ))
            }
        }
        Ok(node)
    }

    fn pseudo(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Pseudo);
        self.consume_into(&mut node, TokenKind::Colon)?;
        if self.adjacent() && self.at(TokenKind::Colon) {
            self.consume_into(&mut node, TokenKind::Colon)?;
        }
        let expected = TokenSet::of(&[TokenKind::Ident, TokenKind::Func]);
        if !self.adjacent() {
            return Err(self.mismatch(Rule::Pseudo, expected));
        }
        match self.kind_at(0) {
            Some(TokenKind::Ident) => self.consume_into(&mut node, TokenKind::Ident)?,
            Some(TokenKind::Func) => {
                self.consume_into(&mut node, TokenKind::Func)?;
                self.balanced_until_rparen(&mut node, Rule::Pseudo)?;
            }
            _ => return Err(self.mismatch(Rule::Pseudo, expected)),
        }
        Ok(node)
    }

    fn attrib(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Attrib);
        self.consume_into(&mut node, TokenKind::LSquare)?;
        self.consume_into(&mut node, TokenKind::Ident)?;
        if self.at(TokenKind::AttrMatch) {
            self.consume_into(&mut node, TokenKind::AttrMatch)?;
            match self.kind_at(0) {
                Some(
                    kind @ (TokenKind::Ident
                    | TokenKind::StringLiteral
                    | TokenKind::Num
                    | TokenKind::Dimension),
                ) => self.consume_into(&mut node, kind)?,
                _ => {
                    return Err(self.mismatch(
                        Rule::Attrib,
                        TokenSet::of(&[TokenKind::Ident, TokenKind::StringLiteral]),
                    ))
                }
            }
        }
        if self.at(TokenKind::Ident) {
            self.consume_into(&mut node, TokenKind::Ident)?;
        }
        self.consume_into(&mut node, TokenKind::RSquare)?;
        Ok(node)
    }

    fn combinator(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Combinator);
        match self.kind_at(0) {
            Some(kind @ (TokenKind::Plus | TokenKind::Gt | TokenKind::Tilde)) => {
                self.consume_into(&mut node, kind)?;
                Ok(node)
            }
            _ => Err(self.mismatch(Rule::Combinator, self.grammar.first(Rule::Combinator))),
        }
    }

    fn block(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Block);
        self.consume_into(&mut node, TokenKind::LCurly)?;
        node.push_node(self.primary(true));
        self.consume_into(&mut node, TokenKind::RCurly)?;
        Ok(node)
    }

    fn declaration(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Declaration);
        node.push_node(self.interpolated_ident()?);
        self.consume_into(&mut node, TokenKind::Colon)?;
        node.push_node(self.value()?);
        if self.at(TokenKind::ImportantSym) {
            self.consume_into(&mut node, TokenKind::ImportantSym)?;
        }
        if !self.at(TokenKind::RCurly) {
            self.consume_into(&mut node, TokenKind::SemiColon)?;
        }
        Ok(node)
    }

    /// 由相邻的标识符与 `@{var}` 片段拼接出的名称。
    fn interpolated_ident(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::InterpolatedIdent);
        match self.kind_at(0) {
            Some(kind @ (TokenKind::Ident | TokenKind::InterpolatedVar)) => {
                self.consume_into(&mut node, kind)?;
            }
            _ => {
                return Err(self.mismatch(
                    Rule::InterpolatedIdent,
                    self.grammar.first(Rule::InterpolatedIdent),
                ))
            }
        }
        while self.adjacent() {
            match self.kind_at(0) {
                Some(kind @ (TokenKind::Ident | TokenKind::InterpolatedVar)) => {
                    self.consume_into(&mut node, kind)?;
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn variable_assign(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::VariableAssign);
        self.consume_into(&mut node, TokenKind::AtName)?;
        self.consume_into(&mut node, TokenKind::Colon)?;
        node.push_node(self.value()?);
        if self.at(TokenKind::ImportantSym) {
            self.consume_into(&mut node, TokenKind::ImportantSym)?;
        }
        if !self.at(TokenKind::RCurly) {
            self.consume_into(&mut node, TokenKind::SemiColon)?;
        }
        Ok(node)
    }

    /// 逗号分隔的表达式列表。
    fn value(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Value);
        node.push_node(self.expression()?);
        while self.at(TokenKind::Comma) {
            self.consume_into(&mut node, TokenKind::Comma)?;
            node.push_node(self.expression()?);
        }
        Ok(node)
    }

    /// 空白分隔的运算序列。
    fn expression(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Expression);
        node.push_node(self.additive()?);
        while self.at_first(Rule::Operand) {
            node.push_node(self.additive()?);
        }
        Ok(node)
    }

    fn additive(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Additive);
        node.push_node(self.multiplicative()?);
        loop {
            match self.kind_at(0) {
                Some(TokenKind::Plus) => self.consume_into(&mut node, TokenKind::Plus)?,
                Some(TokenKind::Minus) if !self.minus_starts_operand() => {
                    self.consume_into(&mut node, TokenKind::Minus)?
                }
                _ => break,
            }
            node.push_node(self.multiplicative()?);
        }
        Ok(node)
    }

    /// `0 -6px` 中的 `-` 前有空白、后面紧跟操作数，表示新的负数元素而非减法。
    fn minus_starts_operand(&self) -> bool {
        let Some(next) = self.tokens.get(self.position + 1) else {
            return false;
        };
        let Some(minus) = self.tokens.get(self.position) else {
            return false;
        };
        self.whitespace_gate()
            && next.start == minus.end
            && self.grammar.first(Rule::Operand).contains(next.kind)
    }

    fn multiplicative(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Multiplicative);
        node.push_node(self.operand()?);
        while let Some(kind @ (TokenKind::Star | TokenKind::Divide)) = self.kind_at(0) {
            self.consume_into(&mut node, kind)?;
            node.push_node(self.operand()?);
        }
        Ok(node)
    }

    fn operand(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Operand);
        let Some(kind) = self.kind_at(0) else {
            return Err(self.mismatch(Rule::Operand, self.grammar.first(Rule::Operand)));
        };
        match kind {
            TokenKind::Minus => {
                self.consume_into(&mut node, TokenKind::Minus)?;
                if !self.adjacent() {
                    return Err(self.mismatch(Rule::Operand, self.grammar.first(Rule::Operand)));
                }
                node.push_node(self.operand()?);
            }
            TokenKind::Tilde => {
                self.consume_into(&mut node, TokenKind::Tilde)?;
                if !self.adjacent() {
                    return Err(self.mismatch(
                        Rule::Operand,
                        TokenSet::of(&[TokenKind::StringLiteral]),
                    ));
                }
                self.consume_into(&mut node, TokenKind::StringLiteral)?;
            }
            TokenKind::Func => {
                self.consume_into(&mut node, TokenKind::Func)?;
                if !self.at(TokenKind::RParen) {
                    node.push_node(self.value()?);
                }
                self.consume_into(&mut node, TokenKind::RParen)?;
            }
            TokenKind::LParen => node.push_node(self.paren_block()?),
            _ if kind.is_a(TokenCategory::Uri) => {
                self.consume_category_into(&mut node, TokenCategory::Uri)?;
            }
            TokenKind::Dimension
            | TokenKind::Num
            | TokenKind::Ident
            | TokenKind::Hash
            | TokenKind::ClassOrId
            | TokenKind::StringLiteral
            | TokenKind::AtName
            | TokenKind::InterpolatedVar => self.consume_into(&mut node, kind)?,
            _ => return Err(self.mismatch(Rule::Operand, self.grammar.first(Rule::Operand))),
        }
        Ok(node)
    }

    /// `( value )`，或者媒体特性形式的 `( ident: value )`。
    fn paren_block(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::ParenBlock);
        self.consume_into(&mut node, TokenKind::LParen)?;
        let feature = self.attempt(|p| {
            let mut feature = Vec::new();
            feature.push(p.consume(TokenKind::Ident)?);
            feature.push(p.consume(TokenKind::Colon)?);
            Ok(feature)
        });
        if let Ok(tokens) = feature {
            for token in tokens {
                node.push_token(token);
            }
        }
        node.push_node(self.value()?);
        self.consume_into(&mut node, TokenKind::RParen)?;
        Ok(node)
    }

    fn args(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Args);
        self.consume_into(&mut node, TokenKind::LParen)?;
        if !self.at(TokenKind::RParen) {
            node.push_node(self.mixin_arg()?);
            while let Some(kind @ (TokenKind::Comma | TokenKind::SemiColon)) = self.kind_at(0) {
                self.consume_into(&mut node, kind)?;
                node.push_node(self.mixin_arg()?);
            }
        }
        self.consume_into(&mut node, TokenKind::RParen)?;
        Ok(node)
    }

    fn mixin_arg(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::MixinArg);
        if self.at(TokenKind::AtName) && self.kind_at(1) == Some(TokenKind::Colon) {
            self.consume_into(&mut node, TokenKind::AtName)?;
            self.consume_into(&mut node, TokenKind::Colon)?;
        }
        node.push_node(self.expression()?);
        Ok(node)
    }

    /// `when` 条件只做结构识别，括号内的比较逻辑原样保留。
    fn guard(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::Guard);
        self.consume_into(&mut node, TokenKind::When)?;
        loop {
            if self.at(TokenKind::Ident) && self.text_at(0) == Some("not") {
                self.consume_into(&mut node, TokenKind::Ident)?;
            }
            self.consume_into(&mut node, TokenKind::LParen)?;
            self.balanced_until_rparen(&mut node, Rule::Guard)?;
            match self.kind_at(0) {
                Some(kind) if kind.is_a(TokenCategory::Logical) => {
                    self.consume_category_into(&mut node, TokenCategory::Logical)?;
                }
                Some(TokenKind::Comma) => self.consume_into(&mut node, TokenKind::Comma)?,
                _ => break,
            }
        }
        Ok(node)
    }

    fn at_rule(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::AtRule);
        let alternative = self
            .kind_at(0)
            .and_then(|kind| self.grammar.predict(Rule::AtRule, kind));
        let inner = match alternative {
            Some(0) => self.import_at_rule()?,
            Some(1) => self.plugin_at_rule()?,
            Some(2) => self.media_at_rule()?,
            Some(3) => self.general_at_rule()?,
            _ => return Err(self.mismatch(Rule::AtRule, self.grammar.first(Rule::AtRule))),
        };
        node.push_node(inner);
        Ok(node)
    }

    fn import_at_rule(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::ImportAtRule);
        self.consume_into(&mut node, TokenKind::ImportSym)?;
        if self.at(TokenKind::LParen) {
            self.consume_into(&mut node, TokenKind::LParen)?;
            self.consume_into(&mut node, TokenKind::Ident)?;
            while self.at(TokenKind::Comma) {
                self.consume_into(&mut node, TokenKind::Comma)?;
                self.consume_into(&mut node, TokenKind::Ident)?;
            }
            self.consume_into(&mut node, TokenKind::RParen)?;
        }
        self.string_or_uri(&mut node, Rule::ImportAtRule)?;
        if self.at_first(Rule::MediaList) {
            node.push_node(self.media_list()?);
        }
        self.consume_into(&mut node, TokenKind::SemiColon)?;
        Ok(node)
    }

    fn plugin_at_rule(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::PluginAtRule);
        self.consume_into(&mut node, TokenKind::PluginSym)?;
        if self.at(TokenKind::LParen) {
            let mut args = CstNode::new(Rule::PluginArgs);
            self.consume_into(&mut args, TokenKind::LParen)?;
            self.balanced_until_rparen(&mut args, Rule::PluginArgs)?;
            node.push_node(args);
        }
        self.string_or_uri(&mut node, Rule::PluginAtRule)?;
        self.consume_into(&mut node, TokenKind::SemiColon)?;
        Ok(node)
    }

    fn string_or_uri(&mut self, node: &mut CstNode, rule: Rule) -> Parsed<()> {
        match self.kind_at(0) {
            Some(TokenKind::StringLiteral) => self.consume_into(node, TokenKind::StringLiteral),
            Some(kind) if kind.is_a(TokenCategory::Uri) => {
                self.consume_category_into(node, TokenCategory::Uri)
            }
            _ => {
                let mut expected = TokenSet::of(TokenCategory::Uri.members());
                expected.insert(TokenKind::StringLiteral);
                Err(self.mismatch(rule, expected))
            }
        }
    }

    fn media_at_rule(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::MediaAtRule);
        self.consume_into(&mut node, TokenKind::MediaSym)?;
        node.push_node(self.media_list()?);
        node.push_node(self.block()?);
        Ok(node)
    }

    fn media_list(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::MediaList);
        node.push_node(self.media_query()?);
        while self.at(TokenKind::Comma) {
            self.consume_into(&mut node, TokenKind::Comma)?;
            node.push_node(self.media_query()?);
        }
        Ok(node)
    }

    fn media_query(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::MediaQuery);
        loop {
            let alternative = self
                .kind_at(0)
                .and_then(|kind| self.grammar.predict(Rule::MediaQuery, kind));
            match alternative {
                Some(0) => self.consume_into(&mut node, TokenKind::Ident)?,
                Some(1) => self.consume_category_into(&mut node, TokenCategory::Logical)?,
                Some(2) => node.push_node(self.paren_block()?),
                _ => break,
            }
        }
        if node.children.is_empty() {
            return Err(self.mismatch(Rule::MediaQuery, self.grammar.first(Rule::MediaQuery)));
        }
        Ok(node)
    }

    /// 通用 at-rule：前导部分优先按值解析，失败时原样收集到 `{` 或 `;` 为止。
    fn general_at_rule(&mut self) -> Parsed<CstNode> {
        let mut node = CstNode::new(Rule::GeneralAtRule);
        self.consume_into(&mut node, TokenKind::AtName)?;
        if !matches!(
            self.kind_at(0),
            Some(TokenKind::LCurly) | Some(TokenKind::SemiColon)
        ) {
            let prelude = self.attempt(|p| {
                let value = p.value()?;
                match p.kind_at(0) {
                    Some(TokenKind::LCurly) | Some(TokenKind::SemiColon) => Ok(value),
                    _ => Err(p.mismatch(
                        Rule::GeneralAtRule,
                        TokenSet::of(&[TokenKind::LCurly, TokenKind::SemiColon]),
                    )),
                }
            });
            match prelude {
                Ok(value) => node.push_node(value),
                Err(_) => {
                    while let Some(kind) = self.kind_at(0) {
                        if matches!(
                            kind,
                            TokenKind::LCurly | TokenKind::SemiColon | TokenKind::RCurly
                        ) {
                            break;
                        }
                        self.consume_into(&mut node, kind)?;
                    }
                }
            }
        }
        if self.at(TokenKind::SemiColon) {
            self.consume_into(&mut node, TokenKind::SemiColon)?;
        } else {
            node.push_node(self.block()?);
        }
        Ok(node)
    }

    /// 原样收集 token 直到与已消费的左括号配对的 `)`（含）。
    fn balanced_until_rparen(&mut self, node: &mut CstNode, rule: Rule) -> Parsed<()> {
        let mut depth = 1usize;
        while let Some(kind) = self.kind_at(0) {
            match kind {
                TokenKind::LParen | TokenKind::Func | TokenKind::Extend => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return self.consume_into(node, TokenKind::RParen);
                    }
                }
                TokenKind::LCurly | TokenKind::RCurly | TokenKind::SemiColon => break,
                _ => {}
            }
            self.consume_into(node, kind)?;
        }
        Err(self.mismatch(rule, TokenSet::of(&[TokenKind::RParen])))
    }

    fn attempt<T>(&mut self, rule: impl FnOnce(&mut Self) -> Parsed<T>) -> Parsed<T> {
        let saved_position = self.position;
        let saved_errors = self.errors.len();
        let result = rule(self);
        if result.is_err() {
            self.position = saved_position;
            self.errors.truncate(saved_errors);
        }
        result
    }

    fn kind_at(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.position + n).map(|token| token.kind)
    }

    fn text_at(&self, n: usize) -> Option<&str> {
        self.tokens
            .get(self.position + n)
            .map(|token| token.text(&self.source))
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.kind_at(0) == Some(kind)
    }

    fn at_first(&self, rule: Rule) -> bool {
        self.kind_at(0)
            .is_some_and(|kind| self.grammar.first(rule).contains(kind))
    }

    /// 上一个已消费 token 与下一个 token 之间存在空白（或注释）。
    fn whitespace_gate(&self) -> bool {
        match (
            self.position.checked_sub(1).and_then(|i| self.tokens.get(i)),
            self.tokens.get(self.position),
        ) {
            (Some(prev), Some(next)) => next.start > prev.end,
            _ => false,
        }
    }

    fn adjacent(&self) -> bool {
        match (
            self.position.checked_sub(1).and_then(|i| self.tokens.get(i)),
            self.tokens.get(self.position),
        ) {
            (Some(prev), Some(next)) => next.start == prev.end,
            _ => false,
        }
    }

    fn consume(&mut self, kind: TokenKind) -> Parsed<Token> {
        match self.tokens.get(self.position) {
            Some(token) if token.kind == kind => {
                let token = *token;
                self.position += 1;
                Ok(token)
            }
            _ => Err(self.mismatch(Rule::Primary, TokenSet::of(&[kind]))),
        }
    }

    fn consume_into(&mut self, node: &mut CstNode, kind: TokenKind) -> Parsed<()> {
        let token = self.consume(kind).map_err(|mut mismatch| {
            mismatch.rule = node.rule;
            mismatch
        })?;
        node.push_token(token);
        Ok(())
    }

    fn consume_category_into(
        &mut self,
        node: &mut CstNode,
        category: TokenCategory,
    ) -> Parsed<()> {
        match self.tokens.get(self.position) {
            Some(token) if token.kind.is_a(category) => {
                node.push_token(*token);
                self.position += 1;
                Ok(())
            }
            _ => Err(self.mismatch(node.rule, TokenSet::of(category.members()))),
        }
    }

    fn mismatch(&self, rule: Rule, expected: TokenSet) -> Mismatch {
        let found = self.tokens.get(self.position);
        Mismatch {
            rule,
            offset: found.map_or(self.source.len(), |token| token.start),
            expected,
            found: found.map(|token| token.text(&self.source).to_string()),
        }
    }

    fn record(&mut self, mismatch: Mismatch) {
        let expected = mismatch.expected.kinds();
        let wanted = expected
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ");
        let message = match mismatch.found {
            Some(found) => format!("{} 期待 {wanted}，却得到 '{found}'", mismatch.rule),
            None => format!("{} 期待 {wanted}，却到达输入末尾", mismatch.rule),
        };
        let error = GrammarError {
            message,
            offset: mismatch.offset,
            expected,
        };
        log::warn!(target: "less", "语法错误: {error}");
        self.errors.push(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cst::CstChild;
    use pretty_assertions::assert_eq;

    fn parse_ok(source: &str) -> CstNode {
        let outcome = parse(source);
        assert!(
            !outcome.has_errors(),
            "{:?} {:?}",
            outcome.lexical_errors,
            outcome.grammar_errors
        );
        outcome.tree
    }

    fn statement(tree: &CstNode) -> &CstNode {
        tree.nodes().next().expect("至少一条语句")
    }

    /// 选择器链中简单选择器的个数。
    fn chain_len(selector: &CstNode) -> usize {
        1 + selector.node(Rule::Selector).map_or(0, chain_len)
    }

    #[test]
    fn extend_clause_in_selector_list() {
        let tree = parse_ok(".a, .b:extend(.c) { color: red; }");
        let rule = statement(&tree);
        assert_eq!(rule.rule, Rule::RulesetOrMixin);
        let list = rule.node(Rule::SelectorList).unwrap();
        assert_eq!(list.nodes_of(Rule::Selector).count(), 2);
        assert_eq!(list.nodes_of(Rule::ExtendRule).count(), 1);
        assert!(rule.node(Rule::Block).is_some());

        let plain = parse_ok(".a, .b { color: red; }");
        let list = statement(&plain).node(Rule::SelectorList).unwrap();
        assert_eq!(list.nodes_of(Rule::ExtendRule).count(), 0);
    }

    #[test]
    fn extend_gate_accepts_trailing_semicolon() {
        let tree = parse_ok(".a:extend(.b all);");
        let rule = statement(&tree);
        assert!(rule.has_token(TokenKind::SemiColon));
        assert!(rule.node(Rule::Block).is_none());

        let outcome = parse(".a;");
        assert!(!outcome.has_errors(), "单个类选择器可以作为 mixin 调用");
        let outcome = parse("a b;");
        assert_eq!(outcome.grammar_errors.len(), 1);
    }

    #[test]
    fn combinators_and_whitespace_gate() {
        for source in ["a>b {}", "a > b {}", "a b {}", "a+b {}", "a ~ b {}"] {
            let tree = parse_ok(source);
            let selector = statement(&tree)
                .node(Rule::SelectorList)
                .and_then(|list| list.node(Rule::Selector))
                .unwrap();
            assert_eq!(chain_len(selector), 2, "{source}");
            let has_combinator = selector.node(Rule::Combinator).is_some();
            assert_eq!(has_combinator, source != "a b {}", "{source}");
        }
    }

    #[test]
    fn compound_selector_requires_adjacency() {
        let tree = parse_ok("a.b:hover {}");
        let selector = statement(&tree)
            .node(Rule::SelectorList)
            .and_then(|list| list.node(Rule::Selector))
            .unwrap();
        assert_eq!(chain_len(selector), 1);

        let tree = parse_ok("a .b :hover {}");
        let selector = statement(&tree)
            .node(Rule::SelectorList)
            .and_then(|list| list.node(Rule::Selector))
            .unwrap();
        assert_eq!(chain_len(selector), 3);
    }

    #[test]
    fn mixin_call_definition_and_ruleset_share_prefix() {
        let tree = parse_ok(".m(@a; @b: 2px) when (@a > 0) { width: @a; }\n.x { .m(1px); }");
        let definition = statement(&tree);
        assert!(definition.node(Rule::Args).is_some());
        assert!(definition.node(Rule::Guard).is_some());
        assert!(definition.node(Rule::Block).is_some());

        let ruleset = tree.nodes().nth(1).unwrap();
        let body = ruleset
            .node(Rule::Block)
            .and_then(|block| block.node(Rule::Primary))
            .unwrap();
        let call = body.nodes().next().unwrap();
        assert_eq!(call.rule, Rule::RulesetOrMixin);
        assert!(call.node(Rule::Args).is_some());
        assert!(call.node(Rule::Block).is_none());
    }

    #[test]
    fn declaration_preferred_over_nested_ruleset() {
        let tree = parse_ok(".a { color: red; a:hover { color: blue } }");
        let body = statement(&tree)
            .node(Rule::Block)
            .and_then(|block| block.node(Rule::Primary))
            .unwrap();
        let rules: Vec<Rule> = body.nodes().map(|node| node.rule).collect();
        assert_eq!(rules, vec![Rule::Declaration, Rule::RulesetOrMixin]);
    }

    #[test]
    fn parenthesized_operation_nests_inside_multiplication() {
        let tree = parse_ok("@x: (1 + 2) * 3;");
        let assign = statement(&tree);
        let multiplicative = assign
            .node(Rule::Value)
            .and_then(|v| v.node(Rule::Expression))
            .and_then(|e| e.node(Rule::Additive))
            .and_then(|a| a.node(Rule::Multiplicative))
            .unwrap();
        assert_eq!(multiplicative.nodes_of(Rule::Operand).count(), 2);
        assert!(multiplicative.has_token(TokenKind::Star));
        let first = multiplicative.node(Rule::Operand).unwrap();
        assert!(first.node(Rule::ParenBlock).is_some());
    }

    #[test]
    fn spaced_minus_starts_new_element() {
        let tree = parse_ok("@x: 0 -6px;");
        let expression = statement(&tree)
            .node(Rule::Value)
            .and_then(|v| v.node(Rule::Expression))
            .unwrap();
        assert_eq!(expression.nodes_of(Rule::Additive).count(), 2);

        let tree = parse_ok("@x: 8 - 6px;");
        let expression = statement(&tree)
            .node(Rule::Value)
            .and_then(|v| v.node(Rule::Expression))
            .unwrap();
        assert_eq!(expression.nodes_of(Rule::Additive).count(), 1);
    }

    #[test]
    fn at_rules_dispatch_on_token_kind() {
        let tree = parse_ok(
            "@import url(reset.css) screen;\n@plugin \"p\";\n@media screen and (min-width: 800px) { .a { b: c } }\n@font-face { font-family: x; }\n@charset \"utf-8\";",
        );
        let kinds: Vec<Rule> = tree
            .nodes()
            .filter_map(|n| n.nodes().next())
            .map(|n| n.rule)
            .collect();
        assert_eq!(
            kinds,
            vec![
                Rule::ImportAtRule,
                Rule::PluginAtRule,
                Rule::MediaAtRule,
                Rule::GeneralAtRule,
                Rule::GeneralAtRule,
            ]
        );
    }

    #[test]
    fn errors_are_collected_and_parsing_resumes() {
        let outcome = parse(".a { color: ; }\n.b { width: 1px; }\n}");
        assert_eq!(outcome.grammar_errors.len(), 2);
        assert!(!outcome.grammar_errors[0].expected.is_empty());
        // 第二个规则集依旧被解析出来。
        assert_eq!(outcome.tree.nodes().count(), 2);
    }

    #[test]
    fn parser_instance_resets_between_inputs() {
        let mut parser = LessParser::new(&LESS_GRAMMAR);
        let broken = parser.parse(".a {");
        assert!(broken.has_errors());
        let fine = parser.parse(".a {}");
        assert!(!fine.has_errors());
        assert!(matches!(fine.tree.children[0], CstChild::Node(_)));
    }
}
