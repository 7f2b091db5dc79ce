use crate::grammar::Rule;
use crate::lexer::{Token, TokenKind};

/// 具体语法树节点：产生它的规则以及按源码顺序排列的子元素。
#[derive(Debug, Clone, PartialEq)]
pub struct CstNode {
    pub rule: Rule,
    pub children: Vec<CstChild>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CstChild {
    Token(Token),
    Node(CstNode),
}

impl CstNode {
    pub fn new(rule: Rule) -> Self {
        Self {
            rule,
            children: Vec::new(),
        }
    }

    pub fn push_token(&mut self, token: Token) {
        self.children.push(CstChild::Token(token));
    }

    pub fn push_node(&mut self, node: CstNode) {
        self.children.push(CstChild::Node(node));
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CstNode> {
        self.children.iter().filter_map(|child| match child {
            CstChild::Node(node) => Some(node),
            CstChild::Token(_) => None,
        })
    }

    pub fn nodes_of(&self, rule: Rule) -> impl Iterator<Item = &CstNode> {
        self.nodes().filter(move |node| node.rule == rule)
    }

    pub fn node(&self, rule: Rule) -> Option<&CstNode> {
        self.nodes_of(rule).next()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.children.iter().filter_map(|child| match child {
            CstChild::Token(token) => Some(token),
            CstChild::Node(_) => None,
        })
    }

    pub fn token(&self, kind: TokenKind) -> Option<&Token> {
        self.tokens().find(|token| token.kind == kind)
    }

    pub fn has_token(&self, kind: TokenKind) -> bool {
        self.token(kind).is_some()
    }

    /// 节点覆盖的第一个 token。
    pub fn first_token(&self) -> Option<&Token> {
        self.children.iter().find_map(|child| match child {
            CstChild::Token(token) => Some(token),
            CstChild::Node(node) => node.first_token(),
        })
    }

    pub fn last_token(&self) -> Option<&Token> {
        self.children.iter().rev().find_map(|child| match child {
            CstChild::Token(token) => Some(token),
            CstChild::Node(node) => node.last_token(),
        })
    }

    pub fn offset(&self) -> usize {
        self.first_token().map_or(0, |token| token.start)
    }

    /// 节点覆盖的原始源码（含其中的空白与注释）。
    pub fn source_text<'s>(&self, source: &'s str) -> &'s str {
        match (self.first_token(), self.last_token()) {
            (Some(first), Some(last)) => &source[first.start..last.end],
            _ => "",
        }
    }
}
