use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use tempfile::TempDir;
use vectorkv_core::{
    CollectionConfig, CollectionState, Database, DatabaseOptions, DistanceMetric, Document,
    FilterClause, FilterCondition, FilterOperator, MetadataValue, QuantizationKind,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn open(dir: &TempDir) -> Database {
    Database::open(DatabaseOptions::new(dir.path())).unwrap()
}

fn make_embedding(rng: &mut StdRng, dim: usize, scale: f32) -> Vec<f32> {
    (0..dim).map(|_| rng.random_range(-scale..scale)).collect()
}

fn bucket_meta(i: usize) -> HashMap<String, MetadataValue> {
    let mut meta = HashMap::new();
    meta.insert("bucket".to_string(), MetadataValue::Unsigned((i % 5) as u64));
    meta.insert(
        "parity".to_string(),
        MetadataValue::from(if i % 2 == 0 { "even" } else { "odd" }),
    );
    meta
}

// ── Scenario: large cosine collection ──

#[test]
fn top_hit_of_inserted_vector_is_itself() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.create_collection(CollectionConfig::new("embeddings", 128, DistanceMetric::Cosine))
        .unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let mut target = Vec::new();
    for i in 0..100_000usize {
        let vector = make_embedding(&mut rng, 128, 1.0);
        if i == 4242 {
            target = vector.clone();
        }
        db.insert("embeddings", Document::new(format!("doc-{i}"), vector, HashMap::new()))
            .unwrap();
    }
    assert_eq!(db.count("embeddings").unwrap(), 100_000);

    let hits = db.vector_search("embeddings", &target, 10).unwrap();
    assert_eq!(hits.len(), 10);
    assert_eq!(hits[0].id, "doc-4242");
    assert!((hits[0].score - 100.0).abs() < 1e-3, "score {}", hits[0].score);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

// ── Scenario: release and reload ──

#[test]
fn release_then_load_keeps_config() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let config = CollectionConfig::new("c", 16, DistanceMetric::InnerProduct)
        .with_quantization(QuantizationKind::BF16);
    db.create_collection(config.clone()).unwrap();
    let before = db.get_collection("c").unwrap();

    db.release_collection("c").unwrap();
    assert_eq!(db.collection_state("c"), Some(CollectionState::Released));
    db.load_collection("c").unwrap();

    let after = db.get_collection("c").unwrap();
    assert_eq!(before, after);
    assert_eq!(after, config);
}

#[test]
fn documents_survive_restart() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let vectors: Vec<Vec<f32>> = (0..300).map(|_| make_embedding(&mut rng, 8, 1.0)).collect();
    {
        let db = open(&dir);
        db.create_collection(CollectionConfig::new("docs", 8, DistanceMetric::Euclidean))
            .unwrap();
        for (i, v) in vectors.iter().enumerate() {
            db.insert("docs", Document::new(format!("d{i}"), v.clone(), bucket_meta(i)))
                .unwrap();
        }
        db.delete("docs", "d0").unwrap();
        db.flush_collection("docs").unwrap();
        db.close().unwrap();
    }

    let db = open(&dir);
    db.load_collection("docs").unwrap();
    assert_eq!(db.count("docs").unwrap(), 299);
    assert!(db.get_document("docs", "d0").unwrap().is_none());
    let d7 = db.get_document("docs", "d7").unwrap().unwrap();
    assert_eq!(d7.vector, vectors[7]);
    assert_eq!(d7.metadata, bucket_meta(7));
    let hits = db.vector_search("docs", &vectors[7], 1).unwrap();
    assert_eq!(hits[0].id, "d7");
}

// ── Score bounds ──

#[test]
fn cosine_scores_stay_in_range() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.create_collection(CollectionConfig::new("cos", 16, DistanceMetric::Cosine))
        .unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    for i in 0..500usize {
        db.insert(
            "cos",
            Document::new(format!("d{i}"), make_embedding(&mut rng, 16, 5.0), bucket_meta(i)),
        )
        .unwrap();
    }
    let even = FilterClause::must(FilterCondition::equals("parity", "even".into()));
    for _ in 0..20 {
        let query = make_embedding(&mut rng, 16, 5.0);
        let vector_hits = db.vector_search("cos", &query, 100).unwrap();
        let hybrid_hits = db.hybrid_search("cos", &query, &even, 50).unwrap();
        for hit in vector_hits.iter().chain(hybrid_hits.iter()) {
            assert!((0.0..=100.0).contains(&hit.score), "score {}", hit.score);
        }
    }
}

#[test]
fn euclidean_far_documents_are_excluded() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.create_collection(CollectionConfig::new("euc", 4, DistanceMetric::Euclidean))
        .unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let mut vectors = Vec::new();
    for i in 0..400usize {
        let v = make_embedding(&mut rng, 4, 120.0);
        db.insert("euc", Document::new(format!("d{i}"), v.clone(), bucket_meta(i)))
            .unwrap();
        vectors.push(v);
    }
    let query = [0.0f32; 4];
    let hits = db.vector_search("euc", &query, 400).unwrap();
    let near = vectors
        .iter()
        .filter(|v| v.iter().map(|x| x * x).sum::<f32>().sqrt() <= 100.0)
        .count();
    assert!(near < 400);
    assert!(hits.len().abs_diff(near) <= 1, "{} hits, {} near", hits.len(), near);
    for hit in &hits {
        assert!((0.0..=100.0).contains(&hit.score), "score {}", hit.score);
    }
}

// ── Hybrid intersection ──

#[test]
fn hybrid_results_are_filtered_vector_hits() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.create_collection(CollectionConfig::new("mix", 12, DistanceMetric::Cosine))
        .unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    for i in 0..1000usize {
        db.insert(
            "mix",
            Document::new(format!("d{i}"), make_embedding(&mut rng, 12, 1.0), bucket_meta(i)),
        )
        .unwrap();
    }

    let filter = FilterClause::must(FilterCondition::new(
        "bucket",
        FilterOperator::Lte,
        MetadataValue::Unsigned(1),
    ))
    .and_not(FilterCondition::equals("parity", "odd".into()));
    let admitted: HashSet<String> = db
        .filter_search("mix", &filter, 1000)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert!(!admitted.is_empty());

    for _ in 0..10 {
        let query = make_embedding(&mut rng, 12, 1.0);
        let top_k = 10;
        let scanned: HashSet<String> = db
            .vector_search("mix", &query, top_k * 3)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        let hits = db.hybrid_search("mix", &query, &filter, top_k).unwrap();

        assert!(hits.len() <= top_k);
        for hit in &hits {
            assert!(admitted.contains(&hit.id));
            assert!(scanned.contains(&hit.id));
        }
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        let expected = scanned.intersection(&admitted).count().min(top_k);
        assert_eq!(hits.len(), expected);
    }
}
