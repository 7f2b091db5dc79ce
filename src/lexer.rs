//! 词法分析：按固定优先级尝试各个 token 模式，输出带偏移的 token 序列。
//!
//! 空白与注释属于 trivia，不进入 token 流，但其区间被单独记录，
//! 语法阶段依靠 token 的起止偏移判断两个 token 之间是否有空白。

use crate::error::LexError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// 所有 token 种类，声明顺序即词法匹配的优先级顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    UriString,
    UriUrl,
    StringLiteral,
    ImportantSym,
    Extend,
    ImportSym,
    MediaSym,
    PluginSym,
    InterpolatedVar,
    AtName,
    Func,
    When,
    And,
    Or,
    ClassOrId,
    Hash,
    Ident,
    Dimension,
    Num,
    LCurly,
    RCurly,
    LParen,
    RParen,
    LSquare,
    RSquare,
    SemiColon,
    Comma,
    AttrMatch,
    Colon,
    Ampersand,
    Gt,
    Lt,
    Plus,
    Minus,
    Star,
    Divide,
    Tilde,
    Eq,
    Dot,
}

impl TokenKind {
    pub const ALL: [TokenKind; 39] = [
        TokenKind::UriString,
        TokenKind::UriUrl,
        TokenKind::StringLiteral,
        TokenKind::ImportantSym,
        TokenKind::Extend,
        TokenKind::ImportSym,
        TokenKind::MediaSym,
        TokenKind::PluginSym,
        TokenKind::InterpolatedVar,
        TokenKind::AtName,
        TokenKind::Func,
        TokenKind::When,
        TokenKind::And,
        TokenKind::Or,
        TokenKind::ClassOrId,
        TokenKind::Hash,
        TokenKind::Ident,
        TokenKind::Dimension,
        TokenKind::Num,
        TokenKind::LCurly,
        TokenKind::RCurly,
        TokenKind::LParen,
        TokenKind::RParen,
        TokenKind::LSquare,
        TokenKind::RSquare,
        TokenKind::SemiColon,
        TokenKind::Comma,
        TokenKind::AttrMatch,
        TokenKind::Colon,
        TokenKind::Ampersand,
        TokenKind::Gt,
        TokenKind::Lt,
        TokenKind::Plus,
        TokenKind::Minus,
        TokenKind::Star,
        TokenKind::Divide,
        TokenKind::Tilde,
        TokenKind::Eq,
        TokenKind::Dot,
    ];

    /// token 所属的超类型，语法规则可以按类别而不是具体种类进行匹配。
    pub fn categories(self) -> &'static [TokenCategory] {
        match self {
            TokenKind::UriString | TokenKind::UriUrl => &[TokenCategory::Uri],
            TokenKind::And | TokenKind::Or => &[TokenCategory::Logical],
            _ => &[],
        }
    }

    pub fn is_a(self, category: TokenCategory) -> bool {
        self.categories().contains(&category)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 纯分类用的 token 超类型，本身不会被词法器直接产出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenCategory {
    /// `url("...")` 与 `url(...)` 两种写法。
    Uri,
    /// `and` / `or`。
    Logical,
}

impl TokenCategory {
    pub fn members(self) -> &'static [TokenKind] {
        match self {
            TokenCategory::Uri => &[TokenKind::UriString, TokenKind::UriUrl],
            TokenCategory::Logical => &[TokenKind::And, TokenKind::Or],
        }
    }
}

/// 不可变 token，只记录种类与源码区间。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start..self.end]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriviaKind {
    Whitespace,
    BlockComment,
    LineComment,
}

/// 被跳过的空白或注释区间。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trivia {
    pub kind: TriviaKind,
    pub start: usize,
    pub end: usize,
}

/// 词法结果：token 流、被跳过的 trivia 以及无法识别的片段。
#[derive(Debug, Clone, Default)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub trivia: Vec<Trivia>,
    pub errors: Vec<LexError>,
}

impl LexResult {
    /// 按偏移把 token、trivia 与错误片段重新拼接成源码。
    pub fn reconstruct(&self, source: &str) -> String {
        let mut spans: Vec<(usize, usize)> = self
            .tokens
            .iter()
            .map(|token| (token.start, token.end))
            .chain(self.trivia.iter().map(|trivia| (trivia.start, trivia.end)))
            .chain(
                self.errors
                    .iter()
                    .map(|error| (error.offset, error.offset + error.length)),
            )
            .collect();
        spans.sort_unstable();
        let mut output = String::with_capacity(source.len());
        for (start, end) in spans {
            output.push_str(&source[start..end]);
        }
        output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emit {
    Token(TokenKind),
    Skip(TriviaKind),
}

struct TokenPattern {
    emit: Emit,
    regex: Regex,
    longer_alt: Option<TokenKind>,
}

const SPACES: &str = r"[ \t\r\n\f]*";
const NONASCII: &str = r"[^\x00-\x7F]";
const ESCAPE: &str = r"(?:\\[0-9a-fA-F]{1,6}[ \t\r\n\f]?|\\[^\r\n\f0-9a-fA-F])";

fn nmstart() -> String {
    format!("(?:[_a-zA-Z]|{NONASCII}|{ESCAPE})")
}

fn nmchar() -> String {
    format!("(?:[_a-zA-Z0-9-]|{NONASCII}|{ESCAPE})")
}

fn ident() -> String {
    let nmchar = nmchar();
    format!("(?:--{nmchar}+|-?{}{nmchar}*)", nmstart())
}

fn string1() -> String {
    format!(r#""(?:[^\n\r\f"\\]|{ESCAPE}|\\(?:\r\n|\n|\r|\f))*""#)
}

fn string2() -> String {
    format!(r"'(?:[^\n\r\f'\\]|{ESCAPE}|\\(?:\r\n|\n|\r|\f))*'")
}

fn url_chars() -> String {
    format!(r"(?:[!#$%&*-\[\]-~]|{NONASCII}|{ESCAPE})*")
}

static PATTERNS: Lazy<Vec<TokenPattern>> = Lazy::new(|| {
    let ident = ident();
    let string = format!("(?:{}|{})", string1(), string2());
    let defs: Vec<(Emit, String, Option<TokenKind>)> = vec![
        (Emit::Skip(TriviaKind::Whitespace), r"[ \t\r\n\f]+".into(), None),
        (
            Emit::Skip(TriviaKind::BlockComment),
            r"/\*[^*]*\*+(?:[^/*][^*]*\*+)*/".into(),
            None,
        ),
        (Emit::Skip(TriviaKind::LineComment), r"//[^\n\r\f]*".into(), None),
        (
            Emit::Token(TokenKind::UriString),
            format!(r"url\({SPACES}{string}{SPACES}\)"),
            None,
        ),
        (
            Emit::Token(TokenKind::UriUrl),
            format!(r"url\({SPACES}{}{SPACES}\)", url_chars()),
            None,
        ),
        (Emit::Token(TokenKind::StringLiteral), string.clone(), None),
        (
            Emit::Token(TokenKind::ImportantSym),
            format!("!{SPACES}(?i:important)"),
            None,
        ),
        (Emit::Token(TokenKind::Extend), r":extend\(".into(), None),
        (
            Emit::Token(TokenKind::ImportSym),
            "@import".into(),
            Some(TokenKind::AtName),
        ),
        (
            Emit::Token(TokenKind::MediaSym),
            "@media".into(),
            Some(TokenKind::AtName),
        ),
        (
            Emit::Token(TokenKind::PluginSym),
            "@plugin".into(),
            Some(TokenKind::AtName),
        ),
        (
            Emit::Token(TokenKind::InterpolatedVar),
            format!(r"@\{{{ident}\}}"),
            None,
        ),
        (Emit::Token(TokenKind::AtName), format!("@{ident}"), None),
        (Emit::Token(TokenKind::Func), format!(r"{ident}\("), None),
        (Emit::Token(TokenKind::When), "when".into(), Some(TokenKind::Ident)),
        (Emit::Token(TokenKind::And), "and".into(), Some(TokenKind::Ident)),
        (Emit::Token(TokenKind::Or), "or".into(), Some(TokenKind::Ident)),
        (Emit::Token(TokenKind::ClassOrId), format!("[#.]{ident}"), None),
        (Emit::Token(TokenKind::Hash), format!("#{}+", nmchar()), None),
        (Emit::Token(TokenKind::Ident), ident, None),
        (
            Emit::Token(TokenKind::Dimension),
            // 单位里不含 `-`，`10px-2px` 是减法
            r"(?:[0-9]*\.)?[0-9]+(?:[A-Za-z_][A-Za-z0-9_]*|%)".into(),
            None,
        ),
        (Emit::Token(TokenKind::Num), r"(?:[0-9]*\.)?[0-9]+".into(), None),
        (Emit::Token(TokenKind::LCurly), r"\{".into(), None),
        (Emit::Token(TokenKind::RCurly), r"\}".into(), None),
        (Emit::Token(TokenKind::LParen), r"\(".into(), None),
        (Emit::Token(TokenKind::RParen), r"\)".into(), None),
        (Emit::Token(TokenKind::LSquare), r"\[".into(), None),
        (Emit::Token(TokenKind::RSquare), r"\]".into(), None),
        (Emit::Token(TokenKind::SemiColon), ";".into(), None),
        (Emit::Token(TokenKind::Comma), ",".into(), None),
        (Emit::Token(TokenKind::AttrMatch), r"[*~|^$]?=".into(), None),
        (Emit::Token(TokenKind::Colon), ":".into(), None),
        (Emit::Token(TokenKind::Ampersand), "&".into(), None),
        (Emit::Token(TokenKind::Gt), ">".into(), None),
        (Emit::Token(TokenKind::Lt), "<".into(), None),
        (Emit::Token(TokenKind::Plus), r"\+".into(), None),
        (Emit::Token(TokenKind::Minus), "-".into(), None),
        (Emit::Token(TokenKind::Star), r"\*".into(), None),
        (Emit::Token(TokenKind::Divide), r"\.?/".into(), None),
        (Emit::Token(TokenKind::Tilde), "~".into(), None),
        (Emit::Token(TokenKind::Eq), "=".into(), None),
        (Emit::Token(TokenKind::Dot), r"\.".into(), None),
    ];
    defs.into_iter()
        .map(|(emit, pattern, longer_alt)| TokenPattern {
            emit,
            regex: Regex::new(&format!("^(?:{pattern})")).expect("token 正则编译失败"),
            longer_alt,
        })
        .collect()
});

fn pattern_for(kind: TokenKind) -> Option<&'static TokenPattern> {
    PATTERNS
        .iter()
        .find(|pattern| pattern.emit == Emit::Token(kind))
}

/// 在 `rest` 开头按优先级寻找第一个匹配的模式。
///
/// 带 `longer_alt` 的关键字只有在后备模式无法匹配更长片段时才生效，
/// 因此 `android` 不会被拆成 `and` + `roid`。
fn match_at(rest: &str) -> Option<(Emit, usize)> {
    for pattern in PATTERNS.iter() {
        let Some(found) = pattern.regex.find(rest) else {
            continue;
        };
        if found.end() == 0 {
            continue;
        }
        if let Some(alt) = pattern.longer_alt {
            if let Some(longer) = pattern_for(alt).and_then(|p| p.regex.find(rest)) {
                if longer.end() > found.end() {
                    return Some((Emit::Token(alt), longer.end()));
                }
            }
        }
        return Some((pattern.emit, found.end()));
    }
    None
}

/// 把完整输入转换为 token 流，永不失败；无法识别的连续字符合并为一条词法错误。
pub fn tokenize(source: &str) -> LexResult {
    let mut result = LexResult::default();
    let mut position = 0usize;
    let mut error_start: Option<usize> = None;

    while position < source.len() {
        let rest = &source[position..];
        match match_at(rest) {
            Some((emit, len)) => {
                if let Some(start) = error_start.take() {
                    result.errors.push(unexpected(source, start, position));
                }
                let end = position + len;
                match emit {
                    Emit::Token(kind) => result.tokens.push(Token {
                        kind,
                        start: position,
                        end,
                    }),
                    Emit::Skip(kind) => result.trivia.push(Trivia {
                        kind,
                        start: position,
                        end,
                    }),
                }
                position = end;
            }
            None => {
                error_start.get_or_insert(position);
                position += rest.chars().next().map_or(1, char::len_utf8);
            }
        }
    }
    if let Some(start) = error_start {
        result.errors.push(unexpected(source, start, source.len()));
    }
    for error in &result.errors {
        log::warn!(target: "less", "词法错误: {error}");
    }
    result
}

fn unexpected(source: &str, start: usize, end: usize) -> LexError {
    LexError {
        message: format!("无法识别的字符序列 '{}'", &source[start..end]),
        offset: start,
        length: end - start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_do_not_tear_identifiers() {
        assert_eq!(kinds("and"), vec![TokenKind::And]);
        assert_eq!(kinds("android"), vec![TokenKind::Ident]);
        assert_eq!(kinds("order"), vec![TokenKind::Ident]);
        assert_eq!(kinds("when whenever"), vec![TokenKind::When, TokenKind::Ident]);
        assert_eq!(kinds("@import"), vec![TokenKind::ImportSym]);
        assert_eq!(kinds("@imports"), vec![TokenKind::AtName]);
    }

    #[test]
    fn both_url_forms_share_the_uri_category() {
        let lexed = tokenize(r#"url("a.png") url(b.png)"#);
        assert!(lexed.errors.is_empty());
        let kinds: Vec<_> = lexed.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::UriString, TokenKind::UriUrl]);
        assert!(lexed
            .tokens
            .iter()
            .all(|t| t.kind.is_a(TokenCategory::Uri)));
        assert!(TokenKind::And.is_a(TokenCategory::Logical));
        assert!(!TokenKind::Ident.is_a(TokenCategory::Logical));
    }

    #[test]
    fn trivia_is_skipped_but_offsets_survive() {
        let source = "a /* c */ > b";
        let lexed = tokenize(source);
        let kinds: Vec<_> = lexed.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Ident, TokenKind::Gt, TokenKind::Ident]);
        assert_eq!(lexed.trivia.len(), 4);
        assert!(lexed.tokens[1].start > lexed.tokens[0].end);
    }

    #[test]
    fn numbers_and_dimensions() {
        let source = "10px .5em 50% 3 1.25";
        let lexed = tokenize(source);
        let texts: Vec<_> = lexed
            .tokens
            .iter()
            .map(|t| (t.kind, t.text(source)))
            .collect();
        assert_eq!(
            texts,
            vec![
                (TokenKind::Dimension, "10px"),
                (TokenKind::Dimension, ".5em"),
                (TokenKind::Dimension, "50%"),
                (TokenKind::Num, "3"),
                (TokenKind::Num, "1.25"),
            ]
        );
        assert_eq!(
            kinds("10px-2px"),
            vec![TokenKind::Dimension, TokenKind::Minus, TokenKind::Dimension]
        );
    }

    #[test]
    fn selectors_and_at_names() {
        assert_eq!(
            kinds(".btn:extend(.a) #main @{name} @var"),
            vec![
                TokenKind::ClassOrId,
                TokenKind::Extend,
                TokenKind::ClassOrId,
                TokenKind::RParen,
                TokenKind::ClassOrId,
                TokenKind::InterpolatedVar,
                TokenKind::AtName,
            ]
        );
        assert_eq!(kinds("#333"), vec![TokenKind::Hash]);
        assert_eq!(kinds("--main-color"), vec![TokenKind::Ident]);
    }

    #[test]
    fn unmatched_input_is_recorded_and_skipped() {
        let source = "a $$ b";
        let lexed = tokenize(source);
        assert_eq!(lexed.tokens.len(), 2);
        assert_eq!(lexed.errors.len(), 1);
        assert_eq!(lexed.errors[0].offset, 2);
        assert_eq!(lexed.errors[0].length, 2);
    }

    #[test]
    fn spans_cover_the_input_losslessly() {
        let sources = [
            ".a, .b:extend(.c) { color: red; }",
            "@w: 10px; // note\n.x { width: @w * 2 !important }",
            "a$b /* open",
            "@media screen and (min-width: 800px) { .a { b: url( x.png ) } }",
        ];
        for source in sources {
            assert_eq!(tokenize(source).reconstruct(source), source);
        }
    }
}
