use assets::ImageAsset;
use image::{ImageBuffer, Rgb};
use scenarios::{
    DurableMedium, MemoryMedium, Scenario, ScenarioStore, SqliteMedium, StoreConfig, SyncStatus,
};
use std::io::Cursor;
use std::sync::Arc;

const KEY: &str = "corkbrick-saved-scenarios";

fn png(width: u32, height: u32) -> ImageAsset {
    let img = ImageBuffer::from_pixel(width, height, Rgb([90u8, 140, 60]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    ImageAsset::from_bytes(&bytes, "image/png")
}

fn scenario(id: &str, name: &str, edited: &ImageAsset) -> Scenario {
    Scenario::new(
        id,
        name,
        format!("prompt for {name}"),
        vec![png(64, 48)],
        edited,
        Some(format!("{name} description")),
        Some(format!("{}-scene", name.to_lowercase())),
    )
}

fn persisted(medium: &dyn DurableMedium) -> Vec<Scenario> {
    let raw = medium.read(KEY).unwrap().expect("entry persisted");
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn reimport_is_idempotent_and_last_write_wins() {
    let store = ScenarioStore::open(&StoreConfig::default(), Arc::new(MemoryMedium::default()));
    let edited = png(32, 32);
    let a = scenario("a", "A", &edited);
    let b = scenario("b", "B", &edited);
    let mut a2 = a.clone();
    a2.name = "A prime".to_string();

    store.import_merge(vec![a.clone(), b.clone()]).await;
    store.import_merge(vec![a2.clone()]).await;
    assert_eq!(store.list(), vec![a2.clone(), b.clone()]);

    store.import_merge(vec![a2.clone()]).await;
    assert_eq!(store.list(), vec![a2, b]);
}

#[tokio::test]
async fn persisted_copy_is_compacted_and_memory_is_not() {
    let medium = Arc::new(MemoryMedium::default());
    let store = ScenarioStore::open(&StoreConfig::default(), medium.clone());
    let large = png(1600, 1200);
    let small = png(320, 200);

    store.add(scenario("big", "Big", &large)).await.unwrap();
    let status = store.add(scenario("small", "Small", &small)).await.unwrap();
    assert!(status.is_persisted());

    let saved = persisted(medium.as_ref());
    let big = saved[0].edited_asset().unwrap();
    assert_eq!(big.mime_type(), "image/jpeg");
    assert_eq!(big.dimensions().unwrap(), (800, 600));
    assert_eq!(saved[1].edited_asset().unwrap().dimensions().unwrap(), (320, 200));

    let in_memory = store.load_by_id("big").unwrap().edited_asset().unwrap();
    assert_eq!(in_memory, large);

    let reopened = ScenarioStore::open(&StoreConfig::default(), medium);
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.load_by_id("small").unwrap().name, "Small");
}

#[tokio::test]
async fn quota_failure_keeps_in_memory_list() {
    let medium = Arc::new(MemoryMedium::new(256));
    let store = ScenarioStore::open(&StoreConfig::default(), medium.clone());

    let status = store.add(scenario("1", "One", &png(200, 200))).await.unwrap();
    assert!(matches!(status, SyncStatus::QuotaExceeded { limit: 256, .. }));
    assert!(status.to_string().contains("Please save to file"));
    assert_eq!(store.len(), 1);
    assert!(medium.read(KEY).unwrap().is_none());
}

#[tokio::test]
async fn removing_last_scenario_clears_the_entry() {
    let dir = tempfile::tempdir().unwrap();
    let medium = Arc::new(SqliteMedium::open_or_create(&dir.path().join("s.db"), 5 << 20).unwrap());
    let store = ScenarioStore::open(&StoreConfig::default(), medium.clone());

    store.add(scenario("1", "One", &png(16, 16))).await.unwrap();
    assert!(medium.read(KEY).unwrap().is_some());

    assert_eq!(store.remove("1").await.unwrap(), SyncStatus::Cleared);
    assert!(medium.read(KEY).unwrap().is_none());
}

#[tokio::test]
async fn export_then_import_round_trips() {
    let source = ScenarioStore::open(&StoreConfig::default(), Arc::new(MemoryMedium::default()));
    let edited = png(40, 30);
    source.add(scenario("1", "One", &edited)).await.unwrap();
    source.add(scenario("2", "Two", &edited)).await.unwrap();
    let exported = source.export().unwrap();

    let target = ScenarioStore::open(&StoreConfig::default(), Arc::new(MemoryMedium::default()));
    let (count, status) = target.import_json(&exported).await.unwrap();
    assert_eq!(count, 2);
    assert!(status.is_persisted());

    let summary = |store: &ScenarioStore| {
        store
            .list()
            .into_iter()
            .map(|s| (s.id, s.name, s.prompt))
            .collect::<Vec<_>>()
    };
    assert_eq!(summary(&source), summary(&target));
    assert_eq!(source.list(), target.list());
}

#[tokio::test]
async fn invalid_import_merges_nothing() {
    let store = ScenarioStore::open(&StoreConfig::default(), Arc::new(MemoryMedium::default()));
    store.add(scenario("1", "One", &png(8, 8))).await.unwrap();

    let doc = serde_json::json!([
        {"id": "2", "name": "Two", "prompt": "p", "originalImages": [], "editedImage": "data:image/png;base64,AA"},
        {"id": "3", "name": "Three", "originalImages": [], "editedImage": "data:image/png;base64,AA"}
    ]);
    let err = store.import_json(&doc.to_string()).await.unwrap_err();
    assert!(err.to_string().contains("entry 1"));
    assert_eq!(store.len(), 1);
}
