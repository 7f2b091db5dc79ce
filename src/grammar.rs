//! 语法规则登记与一次性自分析。
//!
//! 每条规则以若干候选分支的形式登记，分支只需要描述到第一个不可为空的符号。
//! `GrammarBuilder::perform_self_analysis` 计算可空性、FIRST 集合和每个分支的
//! 预测集合，得到只读的 [`Grammar`]；解析器只接受 [`Grammar`]，因此在自分析
//! 完成之前调用任何规则在类型上就是不可能的。

use crate::lexer::TokenKind as K;
use crate::lexer::{TokenCategory, TokenKind};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::fmt;

use self::Sym::{Category as C, Empty as E, Optional as O, Rule as R, Token as T};

/// 解析器中的所有具名规则。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    Primary,
    RulesetOrMixin,
    SelectorList,
    ExtendRule,
    Selector,
    SimpleSelector,
    ElementName,
    SimpleSelectorSuffix,
    Pseudo,
    Attrib,
    Combinator,
    Block,
    Declaration,
    InterpolatedIdent,
    VariableAssign,
    Value,
    Expression,
    Additive,
    Multiplicative,
    Operand,
    ParenBlock,
    Args,
    MixinArg,
    Guard,
    AtRule,
    ImportAtRule,
    PluginAtRule,
    PluginArgs,
    MediaAtRule,
    MediaList,
    MediaQuery,
    GeneralAtRule,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 以位图表示的 token 种类集合。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenSet(u64);

impl TokenSet {
    pub const EMPTY: TokenSet = TokenSet(0);

    pub fn of(kinds: &[TokenKind]) -> Self {
        let mut set = Self::EMPTY;
        for kind in kinds {
            set.insert(*kind);
        }
        set
    }

    pub fn insert(&mut self, kind: TokenKind) {
        self.0 |= 1 << kind as u32;
    }

    pub fn contains(self, kind: TokenKind) -> bool {
        self.0 & (1 << kind as u32) != 0
    }

    pub fn union(self, other: TokenSet) -> TokenSet {
        TokenSet(self.0 | other.0)
    }

    pub fn intersects(self, other: TokenSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn kinds(self) -> Vec<TokenKind> {
        TokenKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.contains(*kind))
            .collect()
    }
}

/// 分支中的一个符号。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sym {
    Token(TokenKind),
    Category(TokenCategory),
    Rule(Rule),
    /// 可以整体省略的子规则。
    Optional(Rule),
    /// 空分支。
    Empty,
}

/// 某条规则在解析期使用的预测数据。
#[derive(Debug, Clone)]
pub struct Decision {
    pub alternatives: Vec<TokenSet>,
    /// 存在前缀相同的分支，只能依靠有序回溯或门控条件区分。
    pub ambiguous: bool,
}

#[derive(Default)]
pub struct GrammarBuilder {
    productions: IndexMap<Rule, Vec<Vec<Sym>>>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, rule: Rule, alternatives: &[&[Sym]]) -> Self {
        self.productions
            .insert(rule, alternatives.iter().map(|alt| alt.to_vec()).collect());
        self
    }

    /// 登记完所有规则后调用，计算 FIRST 集合与分支预测表。
    pub fn perform_self_analysis(self) -> Grammar {
        let mut nullable: IndexMap<Rule, bool> =
            self.productions.keys().map(|rule| (*rule, false)).collect();
        let mut first: IndexMap<Rule, TokenSet> = self
            .productions
            .keys()
            .map(|rule| (*rule, TokenSet::EMPTY))
            .collect();

        loop {
            let mut changed = false;
            for (rule, alternatives) in &self.productions {
                for alt in alternatives {
                    let (set, alt_nullable) = sequence_first(alt, &first, &nullable);
                    let entry = first.entry(*rule).or_default();
                    let merged = entry.union(set);
                    if merged != *entry {
                        *entry = merged;
                        changed = true;
                    }
                    if alt_nullable && !nullable.get(rule).copied().unwrap_or(false) {
                        nullable.insert(*rule, true);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        let mut decisions = IndexMap::new();
        for (rule, alternatives) in &self.productions {
            let sets: Vec<TokenSet> = alternatives
                .iter()
                .map(|alt| sequence_first(alt, &first, &nullable).0)
                .collect();
            let mut ambiguous = false;
            for (idx, set) in sets.iter().enumerate() {
                if sets[idx + 1..].iter().any(|other| other.intersects(*set)) {
                    ambiguous = true;
                }
            }
            decisions.insert(
                *rule,
                Decision {
                    alternatives: sets,
                    ambiguous,
                },
            );
        }

        log::debug!(
            target: "less",
            "语法自分析完成: {} 条规则, {} 条存在歧义",
            decisions.len(),
            decisions.values().filter(|d| d.ambiguous).count()
        );

        Grammar { first, decisions }
    }
}

fn sequence_first(
    alt: &[Sym],
    first: &IndexMap<Rule, TokenSet>,
    nullable: &IndexMap<Rule, bool>,
) -> (TokenSet, bool) {
    let mut set = TokenSet::EMPTY;
    for sym in alt {
        match sym {
            Sym::Token(kind) => return (set.union(TokenSet::of(&[*kind])), false),
            Sym::Category(category) => return (set.union(TokenSet::of(category.members())), false),
            Sym::Rule(rule) => {
                set = set.union(first.get(rule).copied().unwrap_or_default());
                if !nullable.get(rule).copied().unwrap_or(false) {
                    return (set, false);
                }
            }
            Sym::Optional(rule) => {
                set = set.union(first.get(rule).copied().unwrap_or_default());
            }
            Sym::Empty => {}
        }
    }
    (set, true)
}

/// 自分析完成后的只读语法，可在任意多次解析之间共享。
#[derive(Debug)]
pub struct Grammar {
    first: IndexMap<Rule, TokenSet>,
    decisions: IndexMap<Rule, Decision>,
}

impl Grammar {
    pub fn first(&self, rule: Rule) -> TokenSet {
        self.first.get(&rule).copied().unwrap_or_default()
    }

    /// `kind` 同时落入多个分支的预测集合，只能靠有序回溯区分。
    pub fn overlaps(&self, rule: Rule, kind: TokenKind) -> bool {
        self.decisions.get(&rule).is_some_and(|decision| {
            decision.ambiguous
                && decision
                    .alternatives
                    .iter()
                    .filter(|set| set.contains(kind))
                    .count()
                    > 1
        })
    }

    /// 第一个预测集合包含 `kind` 的分支下标。
    pub fn predict(&self, rule: Rule, kind: TokenKind) -> Option<usize> {
        self.decisions
            .get(&rule)?
            .alternatives
            .iter()
            .position(|set| set.contains(kind))
    }
}

/// LESS 语法的完整登记表。
pub fn less_grammar() -> GrammarBuilder {
    GrammarBuilder::new()
        .register(
            Rule::Primary,
            &[
                &[R(Rule::AtRule)],
                &[R(Rule::VariableAssign)],
                &[R(Rule::Declaration)],
                &[R(Rule::RulesetOrMixin)],
                &[E],
            ],
        )
        .register(Rule::RulesetOrMixin, &[&[R(Rule::SelectorList)]])
        .register(Rule::SelectorList, &[&[R(Rule::Selector)]])
        .register(Rule::ExtendRule, &[&[T(K::Extend)]])
        .register(Rule::Selector, &[&[R(Rule::SimpleSelector)]])
        .register(
            Rule::SimpleSelector,
            &[&[R(Rule::ElementName)], &[R(Rule::SimpleSelectorSuffix)]],
        )
        .register(
            Rule::ElementName,
            &[
                &[T(K::Ident)],
                &[T(K::Star)],
                &[T(K::Dimension)],
                &[T(K::Num)],
            ],
        )
        .register(
            Rule::SimpleSelectorSuffix,
            &[
                &[T(K::ClassOrId)],
                &[T(K::Hash)],
                &[R(Rule::Attrib)],
                &[R(Rule::Pseudo)],
                &[T(K::Ampersand)],
                &[T(K::Dot)],
                &[T(K::InterpolatedVar)],
            ],
        )
        .register(Rule::Pseudo, &[&[T(K::Colon)]])
        .register(Rule::Attrib, &[&[T(K::LSquare)]])
        .register(
            Rule::Combinator,
            &[&[T(K::Plus)], &[T(K::Gt)], &[T(K::Tilde)]],
        )
        .register(Rule::Block, &[&[T(K::LCurly)]])
        .register(Rule::Declaration, &[&[R(Rule::InterpolatedIdent)]])
        .register(
            Rule::InterpolatedIdent,
            &[&[T(K::Ident)], &[T(K::InterpolatedVar)]],
        )
        .register(Rule::VariableAssign, &[&[T(K::AtName)]])
        .register(Rule::Value, &[&[R(Rule::Expression)]])
        .register(Rule::Expression, &[&[R(Rule::Additive)]])
        .register(Rule::Additive, &[&[R(Rule::Multiplicative)]])
        .register(Rule::Multiplicative, &[&[R(Rule::Operand)]])
        .register(
            Rule::Operand,
            &[
                &[T(K::Minus)],
                &[T(K::Dimension)],
                &[T(K::Num)],
                &[T(K::Ident)],
                &[T(K::Hash)],
                &[T(K::ClassOrId)],
                &[T(K::StringLiteral)],
                &[T(K::Tilde)],
                &[C(TokenCategory::Uri)],
                &[T(K::AtName)],
                &[T(K::InterpolatedVar)],
                &[T(K::Func)],
                &[R(Rule::ParenBlock)],
            ],
        )
        .register(Rule::ParenBlock, &[&[T(K::LParen)]])
        .register(Rule::Args, &[&[T(K::LParen)]])
        .register(
            Rule::MixinArg,
            &[&[T(K::AtName)], &[R(Rule::Expression)]],
        )
        .register(Rule::Guard, &[&[T(K::When)]])
        .register(
            Rule::AtRule,
            &[
                &[R(Rule::ImportAtRule)],
                &[R(Rule::PluginAtRule)],
                &[R(Rule::MediaAtRule)],
                &[R(Rule::GeneralAtRule)],
            ],
        )
        .register(Rule::ImportAtRule, &[&[T(K::ImportSym)]])
        .register(
            Rule::PluginAtRule,
            &[&[T(K::PluginSym), O(Rule::PluginArgs)]],
        )
        .register(Rule::PluginArgs, &[&[T(K::LParen)]])
        .register(Rule::MediaAtRule, &[&[T(K::MediaSym)]])
        .register(Rule::MediaList, &[&[R(Rule::MediaQuery)]])
        .register(
            Rule::MediaQuery,
            &[
                &[T(K::Ident)],
                &[C(TokenCategory::Logical)],
                &[R(Rule::ParenBlock)],
            ],
        )
        .register(Rule::GeneralAtRule, &[&[T(K::AtName)]])
}

/// 进程级共享的语法实例，首次使用时构建并完成自分析，此后只读。
pub static LESS_GRAMMAR: Lazy<Grammar> = Lazy::new(|| less_grammar().perform_self_analysis());

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_sets_follow_subrules() {
        let grammar = &*LESS_GRAMMAR;
        let selector = grammar.first(Rule::Selector);
        assert!(selector.contains(TokenKind::Ident));
        assert!(selector.contains(TokenKind::ClassOrId));
        assert!(selector.contains(TokenKind::Colon));
        assert!(selector.contains(TokenKind::LSquare));
        assert!(!selector.contains(TokenKind::LCurly));

        let value = grammar.first(Rule::Value);
        assert!(value.contains(TokenKind::UriString));
        assert!(value.contains(TokenKind::UriUrl));
        assert!(value.contains(TokenKind::LParen));
    }

    #[test]
    fn declarations_and_rulesets_overlap() {
        let grammar = &*LESS_GRAMMAR;
        // 声明与规则集都可以以标识符开头。
        assert!(grammar.overlaps(Rule::Primary, TokenKind::Ident));
        assert!(!grammar.overlaps(Rule::Primary, TokenKind::MediaSym));
        assert!(!grammar.overlaps(Rule::Primary, TokenKind::ClassOrId));
        assert!(!grammar.overlaps(Rule::Combinator, TokenKind::Gt));
    }

    #[test]
    fn prediction_uses_categories() {
        let grammar = &*LESS_GRAMMAR;
        let uri_alt = grammar.predict(Rule::Operand, TokenKind::UriUrl);
        assert_eq!(uri_alt, grammar.predict(Rule::Operand, TokenKind::UriString));
        assert_eq!(grammar.predict(Rule::MediaQuery, TokenKind::Or), Some(1));
        assert_eq!(grammar.predict(Rule::AtRule, TokenKind::MediaSym), Some(2));
        assert_eq!(grammar.predict(Rule::AtRule, TokenKind::Ident), None);
    }

    #[test]
    fn optional_symbols_extend_first_sets() {
        let grammar = GrammarBuilder::new()
            .register(Rule::Combinator, &[&[T(K::Gt)]])
            .register(Rule::Guard, &[&[O(Rule::Combinator), T(K::When)]])
            .perform_self_analysis();
        assert_eq!(
            grammar.first(Rule::Guard).kinds(),
            vec![TokenKind::When, TokenKind::Gt]
        );
    }

    #[test]
    fn nullable_rules_let_followers_into_first_sets() {
        let grammar = GrammarBuilder::new()
            .register(Rule::Combinator, &[&[T(K::Gt)], &[E]])
            .register(Rule::Guard, &[&[R(Rule::Combinator), T(K::When)]])
            .perform_self_analysis();
        assert_eq!(
            grammar.first(Rule::Guard).kinds(),
            vec![TokenKind::When, TokenKind::Gt]
        );
        assert_eq!(grammar.predict(Rule::Combinator, TokenKind::Gt), Some(0));
    }
}
