use form_spec::{assembly_schema, form_schema};

#[test]
fn form_schema_describes_fields_and_rules() {
    let schema = form_schema();
    let text = schema.to_string();
    assert!(schema.is_object());
    assert!(text.contains("\"fields\""));
    assert!(text.contains("\"rules\""));
    assert!(text.contains("not_contains"));
    assert!(text.contains("matches_field"));
}

#[test]
fn assembly_schema_describes_mappings() {
    let text = assembly_schema().to_string();
    assert!(text.contains("\"mappings\""));
    assert!(text.contains("include_unmapped"));
}
