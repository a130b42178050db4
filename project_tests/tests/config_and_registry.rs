//! Feed documents on disk, the provider registry built from them, and schema
//! inference over a provider snapshot.

use std::io::Write;
use std::time::Duration;

use lib_datafeed::configs::{ProviderType, load_feed_config};
use lib_datafeed::core::ProviderRegistry;
use lib_datafeed::providers::load_snapshot_with_schema;
use lib_datafeed::schema::{FieldType, flatten_fields};

const FEED: &str = r#"{
    // Two logical connections sharing one process.
    logging: { level: "warn", fileEnabled: false },
    providers: {
        demo: { providerType: "mock", seed: 3, rowCount: 25, keyColumn: "id" },
        positions: {
            providerType: "stomp",
            websocketUrl: "ws://127.0.0.1:1/ws",
            listenerTopic: "/topic/positions",
            snapshotTimeoutMs: 500,
        },
    },
}"#;

fn write_feed() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json5").tempfile().unwrap();
    file.write_all(FEED.as_bytes()).unwrap();
    file
}

#[test]
fn feed_document_loads_from_disk() {
    let file = write_feed();
    let feed = load_feed_config(file.path()).unwrap();

    assert_eq!(feed.logging.level, "warn");
    assert!(!feed.logging.file_enabled);
    assert_eq!(feed.provider("demo").unwrap().provider_type(), ProviderType::Mock);
    assert_eq!(feed.provider("positions").unwrap().provider_type(), ProviderType::Stomp);
    assert!(feed.provider("missing").is_err());
}

#[tokio::test]
async fn registry_serves_configured_providers() {
    let feed = load_feed_config(write_feed().path()).unwrap();
    let registry = ProviderRegistry::new(Duration::from_secs(1));
    for (id, config) in &feed.providers {
        registry.register_config(id, config).unwrap();
    }
    assert_eq!(registry.ids(), vec!["demo".to_string(), "positions".to_string()]);

    let demo = registry.acquire("demo").unwrap();
    let (outcome, fields) = {
        let mut provider = demo.lock().await;
        load_snapshot_with_schema(&mut **provider, 0).await.unwrap()
    };
    assert_eq!(outcome.rows().len(), 25);
    assert_eq!(fields["price"].field_type, FieldType::Number);
    assert_eq!(fields["updatedAt"].field_type, FieldType::Date);
    let paths: Vec<&str> = flatten_fields(&fields).iter().map(|f| f.path.as_str()).collect();
    assert!(paths.contains(&"quote.venue"));

    assert_eq!(registry.statistics()["demo"].snapshot_rows_received, 25);
    assert_eq!(registry.statistics()["positions"].snapshot_rows_received, 0);
    registry.release("demo");
    assert_eq!(registry.refs("demo"), Some(0));
}
