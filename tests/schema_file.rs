use metrics_assistant::{Intent, QueryCompiler, SchemaStore, Unit};
use std::path::Path;

#[test]
fn test_bundled_schema_loads_and_compiles() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("schema.json");
    let schema = SchemaStore::load(&path).unwrap();

    assert_eq!(schema.len(), 6);
    assert_eq!(schema.get("gpu_utilization").unwrap().unit, Unit::PercentWhole);

    for spec in schema.metrics() {
        let compiled =
            QueryCompiler::compile(spec, &Intent::new(spec.id.as_str(), "max", "2h", 1.0)).unwrap();
        assert!(compiled.text.starts_with("max("), "{}", compiled.text);
        assert!(compiled.text.contains("[2h]"), "{}", compiled.text);
    }
}

#[test]
fn test_missing_schema_file_is_config_error() {
    let err = SchemaStore::load("does/not/exist.json").unwrap_err();
    assert!(err.is_fatal());
}
