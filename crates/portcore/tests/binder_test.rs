// crates/portcore/tests/binder_test.rs

use portcore::binder::{coerce, repair_json_literal};
use portcore::{BindingError, DictionaryMapping, Document, ParamType, Parameter, ParameterBinder, TemplateEngine};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn param(name: &str, ty: ParamType) -> Parameter {
    Parameter {
        name: name.to_string(),
        ty,
    }
}

fn scope() -> Document {
    Document::from_value(json!({
        "input": {
            "a": 5,
            "items": [{ "id": 1 }, { "id": 2 }],
            "tags": ["red", "green"],
            "name": "Ada",
            "flag": "true"
        },
        "workflow": { "parameters": { "factor": 3 } }
    }))
}

fn bind(ty: ParamType, expression: Option<&str>) -> Result<Value, BindingError> {
    let engine = TemplateEngine::new();
    let binder = ParameterBinder::new(&engine);
    binder.bind(&param("p", ty), expression, &scope())
}

#[test]
fn test_unmapped_parameter_gets_zero_value() {
    assert_eq!(bind(ParamType::Integer, None).unwrap(), json!(0));
    assert_eq!(bind(ParamType::Bool, None).unwrap(), json!(false));
    assert_eq!(bind(ParamType::String, None).unwrap(), Value::Null);
    assert_eq!(bind(ParamType::Integer, Some("   ")).unwrap(), json!(0));
}

#[test]
fn test_path_mapping_keeps_structure() {
    assert_eq!(
        bind(ParamType::Array, Some("input.items")).unwrap(),
        json!([{ "id": 1 }, { "id": 2 }])
    );
    assert_eq!(bind(ParamType::Integer, Some("input.items.1.id")).unwrap(), json!(2));
}

#[test]
fn test_unresolved_path_falls_back_to_literal() {
    assert_eq!(bind(ParamType::Float, Some("10")).unwrap(), json!(10.0));
    assert_eq!(bind(ParamType::Bool, Some("true")).unwrap(), json!(true));
    assert_eq!(bind(ParamType::String, Some("hello world")).unwrap(), json!("hello world"));
    // A typo in a path silently becomes a string literal.
    assert_eq!(bind(ParamType::Any, Some("input.nmae")).unwrap(), json!("input.nmae"));
}

#[test]
fn test_template_output_is_read_as_json() {
    assert_eq!(bind(ParamType::Integer, Some("{{ input.a | plus: 1 }}")).unwrap(), json!(6));
    assert_eq!(
        bind(ParamType::Integer, Some("{{ input.a | times: workflow.parameters.factor }}")).unwrap(),
        json!(15)
    );
}

#[test]
fn test_template_text_stays_a_string() {
    assert_eq!(
        bind(ParamType::String, Some("Hello {{ input.name }}!")).unwrap(),
        json!("Hello Ada!")
    );
}

#[test]
fn test_rendered_array_is_repaired() {
    assert_eq!(
        bind(ParamType::Array, Some("{{ input.tags }}")).unwrap(),
        json!(["red", "green"])
    );
}

#[test]
fn test_string_parameter_takes_string_form() {
    assert_eq!(bind(ParamType::String, Some("input.a")).unwrap(), json!("5"));
    assert_eq!(bind(ParamType::Bool, Some("input.flag")).unwrap(), json!(true));
}

#[test]
fn test_value_type_coercion_fails_loudly() {
    let err = bind(ParamType::Integer, Some("input.name")).unwrap_err();
    match err {
        BindingError::Coercion { parameter, expected, .. } => {
            assert_eq!(parameter, "p");
            assert_eq!(expected, "integer");
        }
        other => panic!("expected coercion error, got {:?}", other),
    }
}

#[test]
fn test_reference_coercion_is_lenient() {
    assert_eq!(bind(ParamType::Array, Some("input.a")).unwrap(), Value::Null);
    assert_eq!(bind(ParamType::Object, Some("input.tags")).unwrap(), Value::Null);
}

#[test]
fn test_template_errors_name_the_parameter() {
    let err = bind(ParamType::Any, Some("{{ input.a | nope }}")).unwrap_err();
    assert!(matches!(err, BindingError::Template { ref parameter, .. } if parameter == "p"));
}

#[test]
fn test_dictionary_entries_build_an_object() {
    let engine = TemplateEngine::new();
    let binder = ParameterBinder::new(&engine);
    let entries = vec![
        DictionaryMapping {
            parameter: "headers".to_string(),
            key: "x-name".to_string(),
            from: "input.name".to_string(),
        },
        DictionaryMapping {
            parameter: "headers".to_string(),
            key: "x-count".to_string(),
            from: "{{ input.items | size }}".to_string(),
        },
        DictionaryMapping {
            parameter: "other".to_string(),
            key: "ignored".to_string(),
            from: "1".to_string(),
        },
    ];

    let value = binder.bind_dictionary("headers", &entries, &scope()).unwrap();
    assert_eq!(value, json!({ "x-name": "Ada", "x-count": 2 }));
}

#[test]
fn test_repair_json_literal() {
    assert_eq!(repair_json_literal("[a, b, 3]"), r#"["a","b",3]"#);
    assert_eq!(repair_json_literal(r#"[x, [y, 1], "z"]"#), r#"["x",["y",1],"z"]"#);
    assert_eq!(repair_json_literal("[1, 2]"), "[1, 2]");
    assert_eq!(repair_json_literal("plain text"), "plain text");
}

#[test]
fn test_coerce_null_gives_zero_value() {
    assert_eq!(coerce("n", Value::Null, ParamType::Float).unwrap(), json!(0.0));
    assert_eq!(coerce("n", json!("2.5"), ParamType::Float).unwrap(), json!(2.5));
    assert_eq!(coerce("n", json!(4.0), ParamType::Integer).unwrap(), json!(4));
}
