use fieldforge::config::Settings;
use fieldforge::model::{DataType, ScopeId};
use fieldforge::tools::{FunctionDescriptor, ToolError, ToolExporter};

fn pd_from_rating() -> FunctionDescriptor {
    FunctionDescriptor::new("PD_FROM_RATING", "Probability of default for an internal rating", DataType::Number)
        .with_input("rating", DataType::Varchar)
}

#[test]
fn test_register_and_export() {
    let exporter = ToolExporter::new();
    exporter.register_function(pd_from_rating()).unwrap();
    exporter
        .register_function(
            FunctionDescriptor::new("SALES_TREND", "Sales trend", DataType::Number)
                .in_scope(ScopeId::new("sales")),
        )
        .unwrap();

    let credit = exporter.export(&ScopeId::new("credit"));
    assert_eq!(credit.tools.len(), 1);
    assert_eq!(credit.tools[0].name, "PD_FROM_RATING");
    assert_eq!(credit.tools[0].output, DataType::Number);
    assert_eq!(credit.tools[0].input_schema["properties"]["rating"]["type"], "string");
    assert!(credit.calculated_fields.is_empty());
    assert_eq!(credit.generation_version, None);

    assert_eq!(exporter.export(&ScopeId::new("sales")).tools.len(), 2);
}

#[test]
fn test_duplicate_and_invalid_names() {
    let exporter = ToolExporter::new();
    exporter.register_function(pd_from_rating()).unwrap();

    let mut dup = pd_from_rating();
    dup.name = "pd_from_rating".to_string();
    assert!(matches!(exporter.register_function(dup), Err(ToolError::Duplicate(_))));

    let bad = FunctionDescriptor::new("DROP TABLE; --", "", DataType::Number);
    assert!(matches!(exporter.register_function(bad), Err(ToolError::InvalidName(_))));

    let twice = FunctionDescriptor::new("F", "", DataType::Number)
        .with_input("a", DataType::Number)
        .with_input("A", DataType::Number);
    assert!(matches!(
        exporter.register_function(twice),
        Err(ToolError::DuplicateParameter { .. })
    ));

    assert!(exporter.unregister_function("PD_FROM_RATING"));
    assert!(exporter.export(&ScopeId::new("credit")).tools.is_empty());
}

#[test]
fn test_functions_from_settings() {
    let settings = Settings::from_toml(
        r#"
[[tools.functions]]
name = "PD_FROM_RATING"
description = "Probability of default"
output = "NUMBER"
inputs = [{ name = "rating", data_type = "VARCHAR", description = "Internal rating" }]
scopes = ["credit"]
"#,
    )
    .unwrap();

    let exporter = ToolExporter::from_functions(settings.tools.functions).unwrap();
    let set = exporter.export(&ScopeId::new("credit"));
    assert_eq!(set.tools.len(), 1);
    assert_eq!(
        set.tools[0].input_schema["properties"]["rating"]["description"],
        "Internal rating"
    );
    assert!(exporter.export(&ScopeId::new("sales")).tools.is_empty());
}

#[test]
fn test_descriptor_set_serializes() {
    let exporter = ToolExporter::from_functions([pd_from_rating()]).unwrap();
    let json = serde_json::to_value(exporter.export(&ScopeId::new("credit"))).unwrap();
    assert_eq!(json["tools"][0]["name"], "PD_FROM_RATING");
    assert_eq!(json["calculated_fields"], serde_json::json!([]));
}
