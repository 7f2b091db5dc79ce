use less_core::ast::{Node, NodeType};
use less_core::{
    compile, evaluate, parse, parse_stylesheet, tokenize, CompileOptions, EvalContext, Handlers,
    Implementation, LessError, MathMode, TypeRegistry, Visitor,
};
use pretty_assertions::assert_eq;

fn minified() -> CompileOptions {
    CompileOptions {
        minify: true,
        ..CompileOptions::default()
    }
}

#[test]
fn variable_and_nesting() {
    let src = r"@spacing: 8px;
.container {
  padding: @spacing;
  .title {
    margin-bottom: @spacing;
  }
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert_eq!(
        css,
        ".container {\n  padding: 8px;\n}\n\n.container .title {\n  margin-bottom: 8px;\n}"
    );
}

#[test]
fn minify_output() {
    let src = r".demo {
  color: #333;
  font-weight: bold;
  opacity: 0.5;
}";
    let css = compile(src, minified()).unwrap();
    assert_eq!(css, ".demo{color:#333;font-weight:bold;opacity:.5}");
}

#[test]
fn extend_clause_adds_selector_to_target() {
    let src = ".a, .b:extend(.c) { color: red; }\n.c { color: blue; }";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert_eq!(
        css,
        ".a, .b {\n  color: red;\n}\n\n.c, .b {\n  color: blue;\n}"
    );

    let plain = parse(".a, .b { color: red; }");
    assert!(!plain.has_errors());
}

#[test]
fn extend_all_matches_whole_names_only() {
    let src = ".x:extend(.c all) {}\n.cd { color: red; }\n.c.d { color: blue; }";
    let css = compile(src, minified()).unwrap();
    assert_eq!(css, ".cd{color:red}.c.d,.x.d{color:blue}");
}

#[test]
fn standalone_extend_statement() {
    let src = ".c { color: blue; }\n.d { &:extend(.c); }";
    let css = compile(src, minified()).unwrap();
    assert_eq!(css, ".c,.d{color:blue}");
}

#[test]
fn unitless_operand_adopts_unit() {
    let css = compile(".a { width: 1px + 2; }", minified()).unwrap();
    assert_eq!(css, ".a{width:3px}");
}

#[test]
fn strict_units_reject_mixed_lengths() {
    let src = ".a { width: 1px + 1in; }";
    let err = compile(
        src,
        CompileOptions {
            strict_units: true,
            ..CompileOptions::default()
        },
    )
    .unwrap_err();
    match err {
        LessError::IncompatibleUnits {
            left,
            right,
            position,
        } => {
            assert_eq!(left, "px");
            assert_eq!(right, "in");
            assert_eq!(position, Some(src.find('+').unwrap()));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let css = compile(src, minified()).unwrap();
    assert_eq!(css, ".a{width:97px}");

    let strict = CompileOptions {
        strict_units: true,
        ..CompileOptions::default()
    };
    let message = compile(src, strict.clone()).unwrap_err().to_string();
    assert!(message.contains("'px' 与 'in'"), "{message}");
    let css = compile(".a { width: 1px + 2px; }", strict).unwrap();
    assert_eq!(css, ".a {\n  width: 3px;\n}");
}

#[test]
fn repeated_unit_products_print_the_unit() {
    let css = compile("@r: 2;\n.a { w: (@r * 1px * 1px); }", minified()).unwrap();
    assert_eq!(css, ".a{w:2px}");
}

#[test]
fn unspaced_subtraction_between_dimensions() {
    let css = compile(".a { w: 10px-2px; }", minified()).unwrap();
    assert_eq!(css, ".a{w:8px}");
}

#[test]
fn non_finite_results_are_errors() {
    let err = compile(".a { w: (1 / 0); }", CompileOptions::default()).unwrap_err();
    assert!(matches!(err, LessError::EvalError(_)), "{err:?}");
}

#[test]
fn minified_negative_fractions_drop_the_zero() {
    let css = compile(".a { margin: -0.5px (0 - 0.25); }", minified()).unwrap();
    assert_eq!(css, ".a{margin:-.5px -.25}");
}

#[test]
fn parenthesized_sum_times_three() {
    let src = ".a { b: (1 + 2) * 3; }";
    assert_eq!(compile(src, minified()).unwrap(), ".a{b:9}");

    let parens_only = CompileOptions {
        math: MathMode::Parens,
        ..minified()
    };
    assert_eq!(compile(src, parens_only).unwrap(), ".a{b:3 * 3}");
}

#[test]
fn strict_legacy_math_only_in_standalone_parens() {
    let strict_legacy = CompileOptions {
        math: MathMode::StrictLegacy,
        ..minified()
    };
    let css = compile(".a { b: (1 + 2) * 3; c: (1 + 2); d: 4px / 2; }", strict_legacy).unwrap();
    assert_eq!(css, ".a{b:(1 + 2) * 3;c:3;d:4px / 2}");
}

#[test]
fn division_follows_math_mode() {
    let src = ".a { b: 10px / 2; c: (10px / 3); font: 12px/1.5 sans-serif; }";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert!(css.contains("b: 10px / 2;"));
    assert!(css.contains("c: 3.33333333px;"));
    assert!(css.contains("font: 12px/1.5 sans-serif;"));

    let always = CompileOptions {
        math: MathMode::Always,
        ..CompileOptions::default()
    };
    let css = compile(src, always).unwrap();
    assert!(css.contains("b: 5px;"));
    assert!(css.contains("font: 12px/1.5 sans-serif;"));
}

#[test]
fn selector_combinators_and_whitespace() {
    let src = "a>b { x: y; }\na > b { x: y; }\na b { x: y; }\na~b+c { x: y; }";
    let css = compile(src, minified()).unwrap();
    assert_eq!(css, "a>b{x:y}a>b{x:y}a b{x:y}a~b+c{x:y}");

    let css = compile("a b { x: y; }", CompileOptions::default()).unwrap();
    assert_eq!(css, "a b {\n  x: y;\n}");
}

#[test]
fn mixin_default_and_override() {
    let src = r".shadow(@x: 0, @y: 2px, @blur: 4px) {
  box-shadow: @x @y @blur rgba(0, 0, 0, 0.4);
}

.dialog {
  .shadow();
}

.dialog-elevated {
  .shadow(0, 8px, 16px);
}

.named {
  .shadow(@blur: 1px);
}";
    let css = compile(src, minified()).unwrap();
    assert!(css.contains(".dialog{box-shadow:0 2px 4px rgba(0, 0, 0, .4)}"));
    assert!(css.contains(".dialog-elevated{box-shadow:0 8px 16px rgba(0, 0, 0, .4)}"));
    assert!(css.contains(".named{box-shadow:0 2px 1px rgba(0, 0, 0, .4)}"));
    assert!(!css.contains(".shadow"));
}

#[test]
fn mixin_important_and_class_mixins() {
    let src = r".base { color: red; }
.m() { margin: 0; }
.x {
  .base;
  .m() !important;
}";
    let css = compile(src, minified()).unwrap();
    assert_eq!(css, ".base{color:red}.x{color:red;margin:0!important}");
}

#[test]
fn guarded_mixin_is_expanded() {
    let src = r".m(@a) when (@a > 0) { width: @a; }
.x { .m(2px); }";
    let css = compile(src, minified()).unwrap();
    assert_eq!(css, ".x{width:2px}");
}

#[test]
fn undefined_references_are_errors() {
    let err = compile(".x { .missing(); }", CompileOptions::default()).unwrap_err();
    assert!(matches!(err, LessError::EvalError(_)));

    let err = compile(".x { y: @nope; }", CompileOptions::default()).unwrap_err();
    assert!(matches!(err, LessError::EvalError(_)));

    let err = compile("@a: @a;\n.x { y: @a; }", CompileOptions::default()).unwrap_err();
    assert!(err.to_string().contains("@a"));
}

#[test]
fn arithmetic_multiple_segments_minified() {
    let src = r"@base: 5px;
.layout {
  padding: (@base * 2) (@base * 4) (@base / 5);
  margin: -(@base / 5) 0 -6px;
}";
    let css = compile(src, minified()).unwrap();
    assert_eq!(css, ".layout{padding:10px 20px 1px;margin:-1px 0 -6px}");
}

#[test]
fn interpolation_in_selectors_and_strings() {
    let src = r#"@name: banner;
.@{name} {
  content: "@{name}-x";
}"#;
    let css = compile(src, minified()).unwrap();
    assert_eq!(css, r#".banner{content:"banner-x"}"#);
}

#[test]
fn calc_and_min_max() {
    let src = ".a { width: calc(100% - 10px); height: min(10px, 1in); top: max(1px, 2s); }";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert!(css.contains("width: calc(100% - 10px);"));
    assert!(css.contains("height: 10px;"));
    assert!(css.contains("top: max(1px, 2s);"));
}

#[test]
fn import_statement_passthrough() {
    let src = r#"@import (css) "https://cdn.example.com/reset.css";
body {
  color: #333;
}"#;
    let css = compile(src, minified()).unwrap();
    assert!(css.starts_with(r#"@import "https://cdn.example.com/reset.css";"#));
    assert!(css.contains("body{color:#333}"));
}

#[test]
fn plugin_directive_is_dropped() {
    let css = compile("@plugin \"my-plugin\";\n.a { b: c; }", minified()).unwrap();
    assert_eq!(css, ".a{b:c}");
}

#[test]
fn nested_media_queries_bubble() {
    let src = r".panel {
  color: #333;
  @media screen and (min-width: 800px) {
    color: #000;
    .panel__title {
      font-size: 20px;
    }
  }
}

@media (max-width: 600px) {
  .panel {
    width: 100%;
  }
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert_eq!(
        css,
        ".panel {\n  color: #333;\n}\n\n@media screen and (min-width: 800px) {\n  .panel {\n    color: #000;\n  }\n  .panel .panel__title {\n    font-size: 20px;\n  }\n}\n\n@media (max-width: 600px) {\n  .panel {\n    width: 100%;\n  }\n}"
    );
}

#[test]
fn supports_block_nested_in_ruleset_is_flattened() {
    let src = ".a { @supports (display: grid) { color: red; .b { .c { d: e; } } } }";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert_eq!(
        css,
        "@supports (display: grid) {\n  .a {\n    color: red;\n  }\n  .a .b .c {\n    d: e;\n  }\n}"
    );
}

#[test]
fn font_face_and_keyframes_blocks() {
    let src = r"@font-face {
  font-family: 'Open Sans';
  src: url('/fonts/open-sans.woff2') format('woff2');
}

@keyframes fade-in {
  from {
    opacity: 0;
  }
  to {
    opacity: 1;
  }
}";
    let css = compile(src, minified()).unwrap();
    assert!(css.contains(
        "@font-face{font-family:'Open Sans';src:url('/fonts/open-sans.woff2') format('woff2')}"
    ));
    assert!(css.contains("@keyframes fade-in{from{opacity:0}to{opacity:1}}"));
}

#[test]
fn lexical_and_grammar_errors_are_collected() {
    let outcome = parse(".a { color: red; } ^ .b { color: blue; }");
    assert_eq!(outcome.lexical_errors.len(), 1);

    let err = compile(".a { color: red; } ^", CompileOptions::default()).unwrap_err();
    assert!(matches!(err, LessError::ParseError { .. }));
}

#[test]
fn tokens_reconstruct_the_source() {
    let src = "/* head */ .a { // note\n  width: (1px + 2) * 3;\n}\n";
    assert_eq!(tokenize(src).reconstruct(src), src);
}

#[derive(Default)]
struct DeclarationCounter {
    names: Vec<String>,
}

impl Implementation for DeclarationCounter {
    fn register(handlers: &mut Handlers<Self>) {
        handlers.on(NodeType::Declaration, |counter, node, args| {
            if let Node::Declaration(declaration) = node {
                counter.names.push(declaration.name.clone());
            }
            args.visit_deeper = false;
            None
        });
    }
}

#[test]
fn custom_visitor_over_evaluated_tree() {
    let root = parse_stylesheet(".a { color: red; .b { margin: 0; } }").unwrap();
    let mut context = EvalContext::new(&CompileOptions::default());
    let evaluated = evaluate(root, &mut context).unwrap();
    assert_eq!(evaluated.rules.len(), 2);

    let mut visitor = Visitor::new(DeclarationCounter::default(), TypeRegistry::init());
    visitor.visit(Node::Ruleset(evaluated));
    assert_eq!(
        visitor.into_implementation().names,
        vec!["color".to_string(), "margin".to_string()]
    );
}
