// crates/portcore/tests/template_test.rs

use portcore::{ExpressionEvaluator, TemplateEngine, TemplateError};
use serde_json::{json, Value};

fn model() -> Value {
    json!({
        "input": {
            "result": 30,
            "name": "  Ada  ",
            "tags": ["a", "b", "c"],
            "empty": ""
        },
        "workflow": { "parameters": { "greeting": "hello" } }
    })
}

fn render(template: &str) -> Result<String, TemplateError> {
    TemplateEngine::new().render(template, &model())
}

#[test]
fn test_plain_text_is_copied() {
    assert_eq!(render("no tags here").unwrap(), "no tags here");
}

#[test]
fn test_path_interpolation() {
    assert_eq!(render("Sum is {{ input.result }}").unwrap(), "Sum is 30");
    assert_eq!(
        render("{{workflow.parameters.greeting}}, world").unwrap(),
        "hello, world"
    );
}

#[test]
fn test_missing_path_renders_empty() {
    assert_eq!(render("[{{ input.nothing }}]").unwrap(), "[]");
}

#[test]
fn test_string_filters() {
    assert_eq!(render("{{ input.name | strip | upcase }}").unwrap(), "ADA");
    assert_eq!(render("{{ 'MiXeD' | downcase }}").unwrap(), "mixed");
    assert_eq!(render("{{ input.name | strip | append: '!' | prepend: '> ' }}").unwrap(), "> Ada!");
}

#[test]
fn test_collection_filters() {
    assert_eq!(render("{{ input.tags | size }}").unwrap(), "3");
    assert_eq!(render("{{ input.tags | join: '-' }}").unwrap(), "a-b-c");
    assert_eq!(render("{{ input.tags | first }}{{ input.tags | last }}").unwrap(), "ac");
}

#[test]
fn test_arrays_render_unquoted() {
    assert_eq!(render("{{ input.tags }}").unwrap(), "[a, b, c]");
}

#[test]
fn test_arithmetic_filters() {
    assert_eq!(render("{{ input.result | plus: 12 }}").unwrap(), "42");
    assert_eq!(render("{{ input.result | minus: 10 | times: 2 }}").unwrap(), "40");
    assert_eq!(render("{{ input.result | divided_by: 4 }}").unwrap(), "7.5");
}

#[test]
fn test_division_by_zero_fails() {
    let err = render("{{ input.result | divided_by: 0 }}").unwrap_err();
    assert!(matches!(err, TemplateError::Filter { ref filter, .. } if filter == "divided_by"));
}

#[test]
fn test_default_filter() {
    assert_eq!(render("{{ input.missing | default: 'n/a' }}").unwrap(), "n/a");
    assert_eq!(render("{{ input.empty | default: 'n/a' }}").unwrap(), "n/a");
    assert_eq!(render("{{ input.result | default: 0 }}").unwrap(), "30");
}

#[test]
fn test_json_filter() {
    assert_eq!(render("{{ input.tags | json }}").unwrap(), r#"["a","b","c"]"#);
}

#[test]
fn test_unknown_filter_is_an_error() {
    let err = render("{{ input.result | explode }}").unwrap_err();
    assert!(matches!(err, TemplateError::UnknownFilter(ref name) if name == "explode"));
}

#[test]
fn test_unterminated_tag_is_a_syntax_error() {
    let err = render("value: {{ input.result").unwrap_err();
    assert!(matches!(err, TemplateError::Syntax { offset: 7, .. }), "got {:?}", err);
}

#[test]
fn test_closing_braces_inside_strings() {
    assert_eq!(render("{{ '}}' | prepend: 'x' }}").unwrap(), "x}}");
}

#[test]
fn test_evaluate_returns_typed_value() {
    let engine = TemplateEngine::new();
    assert_eq!(engine.evaluate("input.tags | size", &model()).unwrap(), json!(3));
    assert_eq!(engine.evaluate("input.tags", &model()).unwrap(), json!(["a", "b", "c"]));
}
