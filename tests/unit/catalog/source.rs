use super::*;

const TABLE: &str = r#"{
  "entries": [
    {
      "token": "hello",
      "aliases": ["hi"],
      "sources": [
        {"origin_id": "h2", "origin_kind": "direct_transfer", "locator": "https://cdn.test/h2.mp4", "source_rank": 2},
        {"origin_id": "h1", "origin_kind": "direct_transfer", "locator": "https://cdn.test/h1.mp4", "source_rank": 1},
        {"origin_id": "h0", "origin_kind": "platform_hosted", "locator": "https://youtu.be/abc", "source_rank": 1}
      ]
    },
    {"token": "WORLD", "sources": [
      {"origin_id": "w1", "origin_kind": "direct_transfer", "locator": "https://cdn.test/w1.mp4"}
    ]},
    {"token": "EMPTY", "sources": []}
  ]
}"#;

fn ids(descriptors: &[MediaDescriptor]) -> Vec<&str> {
    descriptors.iter().map(|d| d.origin_id.as_str()).collect()
}

#[test]
fn lookup_orders_by_rank_then_origin_id() {
    let cat = SourceCatalog::from_json_str(TABLE, &SourcePriority::default()).unwrap();
    assert_eq!(ids(cat.lookup("HELLO")), vec!["h0", "h1", "h2"]);
    assert_eq!(cat.lookup("hello"), cat.lookup("HELLO"));
    assert_eq!(cat.lookup("WORLD")[0].source_rank, 0);
}

#[test]
fn unknown_and_sourceless_tokens_differ() {
    let cat = SourceCatalog::from_json_str(TABLE, &SourcePriority::default()).unwrap();
    assert!(!cat.exists("NOPE"));
    assert!(cat.lookup("NOPE").is_empty());
    assert!(cat.exists("EMPTY"));
    assert!(cat.lookup("EMPTY").is_empty());
}

#[test]
fn aliases_share_the_canonical_descriptors() {
    let cat = SourceCatalog::from_json_str(TABLE, &SourcePriority::default()).unwrap();
    assert_eq!(cat.lookup("HI"), cat.lookup("HELLO"));
    assert_eq!(cat.lookup("HI")[0].token.as_str(), "HELLO");
    // HELLO (3) + WORLD (1); the alias is not counted twice.
    assert_eq!(cat.descriptor_count(), 4);
    assert_eq!(cat.len(), 4);
}

#[test]
fn duplicate_origin_keeps_best_rank() {
    let mut b = CatalogBuilder::new();
    b.source(
        "A",
        SourceSpec::new("x", OriginKind::DirectTransfer, "https://a/x", 5),
    )
    .unwrap()
    .source(
        "A",
        SourceSpec::new("x", OriginKind::DirectTransfer, "https://a/x2", 1),
    )
    .unwrap();
    let cat = b.build().unwrap();
    let d = cat.lookup("A");
    assert_eq!(d.len(), 1);
    assert_eq!(d[0].source_rank, 1);
    assert_eq!(d[0].locator, "https://a/x2");
}

#[test]
fn builder_rejects_bad_rows() {
    let mut b = CatalogBuilder::new();
    assert!(
        b.source("A", SourceSpec::new(" ", OriginKind::DirectTransfer, "https://a", 0))
            .is_err()
    );
    assert!(
        b.source("A", SourceSpec::new("a", OriginKind::DirectTransfer, "", 0))
            .is_err()
    );
    assert!(b.token("").is_err());

    let mut b = CatalogBuilder::new();
    b.alias("HI", "HELLO").unwrap();
    assert!(b.build().is_err());
}

#[test]
fn dataset_layout_ranks_by_source_priority() {
    let dataset = r#"[
      {"gloss": "book", "instances": [
        {"video_id": 69241, "url": "https://www.youtube.com/watch?v=0UsjUE-TXns", "source": "aslbrick"},
        {"video_id": "07069", "url": "http://aslbricks.org/New/ASL-Videos/book.mp4", "source": "signschool"},
        {"video_id": "07070", "url": "https://media.test/book.mp4"}
      ]}
    ]"#;
    let priority = SourcePriority::new(vec!["SignSchool".into(), "aslbrick".into()]);
    let cat = SourceCatalog::from_json_str(dataset, &priority).unwrap();
    let d = cat.lookup("BOOK");
    assert_eq!(ids(d), vec!["07069", "69241", "07070"]);
    assert_eq!(d[0].source_rank, 0);
    assert_eq!(d[1].origin_kind, OriginKind::PlatformHosted);
    assert_eq!(d[2].source_rank, 3);
    assert_eq!(d[2].origin_kind, OriginKind::DirectTransfer);
}

#[test]
fn locator_classification_matches_platform_hosts() {
    assert_eq!(
        OriginKind::classify_locator("https://m.youtube.com/watch?v=1"),
        OriginKind::PlatformHosted
    );
    assert_eq!(
        OriginKind::classify_locator("https://youtu.be/1"),
        OriginKind::PlatformHosted
    );
    assert_eq!(
        OriginKind::classify_locator("https://notyoutube.com/v.mp4"),
        OriginKind::DirectTransfer
    );
    assert_eq!(
        OriginKind::classify_locator("not a url"),
        OriginKind::DirectTransfer
    );
}

#[test]
fn similar_prefers_exact_then_substring_then_edit_distance() {
    let mut b = CatalogBuilder::new();
    for t in ["HELLO", "HELL", "YELLOW", "HELP", "WORLD"] {
        b.token(t).unwrap();
    }
    let cat = b.build().unwrap();

    let s: Vec<String> = cat.similar("hello", 3).iter().map(|t| t.to_string()).collect();
    assert_eq!(s, vec!["HELLO", "HELL", "HELP"]);

    let s: Vec<String> = cat.similar("HELLOO", 2).iter().map(|t| t.to_string()).collect();
    assert_eq!(s, vec!["HELLO", "HELL"]);

    assert!(cat.similar("QQQQQQQQ", 3).is_empty());
    assert!(cat.similar("HELLO", 0).is_empty());
}

#[test]
fn malformed_metadata_is_a_serde_error() {
    let err = SourceCatalog::from_json_str("{\"entries\": 3}", &SourcePriority::default())
        .unwrap_err();
    assert!(matches!(err, ReelError::Serde(_)));
}
