mod util;

use std::fs;

use speakcache::cache::vector_index::similarity;
use speakcache::cache::{CacheKey, MetadataStore, storage::METADATA_FILE};
use tempfile::TempDir;
use util::{StubEmbedder, open_cache};

fn unit(x: f32) -> Vec<f32> {
    vec![x, (1.0 - x * x).sqrt()]
}

#[test]
fn put_then_get_returns_identical_bytes() {
    let tmp = TempDir::new().unwrap();
    let cache = open_cache(
        tmp.path(),
        StubEmbedder::new(2).with("Build finished", vec![1.0, 0.0]),
    );
    let audio = b"ID3\x04binary-audio".to_vec();

    cache
        .put("Build finished", "elevenlabs", "Rachel", &audio)
        .unwrap();
    let path = cache
        .get("Build finished", "elevenlabs", "Rachel", 0.95)
        .expect("hit");
    assert_eq!(fs::read(path).unwrap(), audio);
}

#[test]
fn similarity_equal_to_threshold_is_a_hit() {
    let tmp = TempDir::new().unwrap();
    let stored = vec![1.0, 0.0];
    let query = unit(0.8);
    let threshold = similarity(&stored, &query);
    assert!(threshold > 0.0 && threshold < 1.0);

    let cache = open_cache(
        tmp.path(),
        StubEmbedder::new(2)
            .with("stored", stored)
            .with("query", query),
    );
    cache.put("stored", "p", "v", b"A").unwrap();

    assert!(cache.get("query", "p", "v", threshold).is_some());
    let just_above = f32::from_bits(threshold.to_bits() + 1);
    assert!(cache.get("query", "p", "v", just_above).is_none());
}

#[test]
fn provider_and_voice_must_match_exactly() {
    let tmp = TempDir::new().unwrap();
    let cache = open_cache(tmp.path(), StubEmbedder::new(2).with("hello", vec![0.0, 1.0]));
    cache.put("hello", "p1", "v1", b"A").unwrap();

    assert!(cache.get("hello", "p2", "v1", 1.0).is_none());
    assert!(cache.get("hello", "p1", "v2", 1.0).is_none());
    assert!(cache.get("hello", "p1", "v1", 1.0).is_some());
}

#[test]
fn deleted_record_is_a_silent_miss() {
    let tmp = TempDir::new().unwrap();
    let cache = open_cache(tmp.path(), StubEmbedder::new(2).with("orphan", vec![1.0, 0.0]));
    cache.put("orphan", "p", "v", b"A").unwrap();

    let conn = rusqlite::Connection::open(tmp.path().join(METADATA_FILE)).unwrap();
    let deleted = conn
        .execute("DELETE FROM cache_entries WHERE embedding_position = 0", [])
        .unwrap();
    assert_eq!(deleted, 1);
    drop(conn);

    assert!(cache.get("orphan", "p", "v", 0.5).is_none());
    assert_eq!(cache.len(), 1);
}

#[test]
fn same_key_twice_is_rejected_and_first_audio_survives() {
    let tmp = TempDir::new().unwrap();
    let cache = open_cache(tmp.path(), StubEmbedder::new(2).with("twice", vec![1.0, 0.0]));
    let first = cache.put("twice", "p", "v", b"FIRST").unwrap();

    let err = cache.put("twice", "p", "v", b"SECOND").unwrap_err();
    assert!(err.is_duplicate(), "unexpected error: {err}");

    let store = MetadataStore::open(tmp.path().join(METADATA_FILE)).unwrap();
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(cache.len(), 1);
    let hit = cache.get("twice", "p", "v", 0.9).unwrap();
    assert_eq!(hit, first);
    assert_eq!(fs::read(hit).unwrap(), b"FIRST");
}

#[test]
fn paraphrase_hits_at_085_and_misses_at_0999() {
    let tmp = TempDir::new().unwrap();
    let cache = open_cache(
        tmp.path(),
        StubEmbedder::new(2)
            .with("Deploy complete", vec![1.0, 0.0])
            .with("Deployment complete", vec![0.9, 0.19f32.sqrt()]),
    );
    cache
        .put("Deploy complete", "elevenlabs", "Rachel", b"AUDIO1")
        .unwrap();

    let path = cache
        .get("Deployment complete", "elevenlabs", "Rachel", 0.85)
        .expect("paraphrase should hit");
    assert_eq!(fs::read(path).unwrap(), b"AUDIO1");
    assert!(
        cache
            .get("Deployment complete", "elevenlabs", "Rachel", 0.999)
            .is_none()
    );
}

#[test]
fn lookup_failure_is_a_miss() {
    let tmp = TempDir::new().unwrap();
    let cache = open_cache(tmp.path(), StubEmbedder::new(2).with("known", vec![1.0, 0.0]));
    cache.put("known", "p", "v", b"A").unwrap();
    // The stub has no vector for this text, so embedding fails.
    assert!(cache.get("unknown", "p", "v", 0.5).is_none());
}

fn axis(dimension: usize, i: usize) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    v[i] = 1.0;
    v
}

#[test]
fn two_instances_on_one_directory_serve_their_own_audio() {
    let tmp = TempDir::new().unwrap();
    let embedder = || {
        StubEmbedder::new(3)
            .with("The build failed badly", axis(3, 0))
            .with("All tests passed", axis(3, 1))
    };
    let daemon = open_cache(tmp.path(), embedder());
    let in_process = open_cache(tmp.path(), embedder());

    in_process
        .put("The build failed badly", "system", "default", b"AUDIO_FAILED")
        .unwrap();
    daemon
        .put("All tests passed", "system", "default", b"AUDIO_PASSED")
        .unwrap();

    for cache in [&daemon, &in_process, &open_cache(tmp.path(), embedder())] {
        let passed = cache.get("All tests passed", "system", "default", 0.95).unwrap();
        assert_eq!(fs::read(passed).unwrap(), b"AUDIO_PASSED");
        let failed = cache
            .get("The build failed badly", "system", "default", 0.95)
            .unwrap();
        assert_eq!(fs::read(failed).unwrap(), b"AUDIO_FAILED");
        assert_eq!(cache.len(), 2);
    }
}

#[test]
fn failed_metadata_write_removes_blob_but_keeps_vector() {
    let tmp = TempDir::new().unwrap();
    let cache = open_cache(
        tmp.path(),
        StubEmbedder::new(2)
            .with("rejected", vec![1.0, 0.0])
            .with("accepted", vec![0.0, 1.0]),
    );

    let conn = rusqlite::Connection::open(tmp.path().join(METADATA_FILE)).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER refuse BEFORE INSERT ON cache_entries
         BEGIN SELECT RAISE(ABORT, 'metadata write refused'); END;",
    )
    .unwrap();

    let err = cache.put("rejected", "p", "v", b"LOST").unwrap_err();
    assert!(!err.is_duplicate(), "unexpected error: {err}");
    assert_eq!(cache.len(), 1);
    assert_eq!(fs::read_dir(cache.audio_dir()).unwrap().count(), 0);
    assert_eq!(cache.store().count().unwrap(), 0);

    conn.execute_batch("DROP TRIGGER refuse;").unwrap();
    cache.put("accepted", "p", "v", b"KEPT").unwrap();
    let record = cache
        .store()
        .find(&CacheKey::new("accepted", "p", "v"))
        .unwrap()
        .unwrap();
    assert_eq!(record.embedding_position, 1);
    assert!(cache.get("rejected", "p", "v", 0.9).is_none());
    assert_eq!(
        fs::read(cache.get("accepted", "p", "v", 0.9).unwrap()).unwrap(),
        b"KEPT"
    );
}

#[test]
fn concurrent_puts_get_unique_positions() {
    const WRITERS: usize = 8;
    let tmp = TempDir::new().unwrap();
    let embedder = || {
        (0..WRITERS).fold(StubEmbedder::new(WRITERS), |stub, i| {
            stub.with(&format!("message {i}"), axis(WRITERS, i))
        })
    };
    // Half the writers share one instance, the rest each open their own.
    let shared = open_cache(tmp.path(), embedder());
    let own: Vec<_> = (0..WRITERS / 2)
        .map(|_| open_cache(tmp.path(), embedder()))
        .collect();

    std::thread::scope(|scope| {
        for i in 0..WRITERS {
            let cache = if i % 2 == 0 { &shared } else { &own[i / 2] };
            scope.spawn(move || {
                let audio = format!("AUDIO-{i}");
                cache
                    .put(&format!("message {i}"), "p", "v", audio.as_bytes())
                    .unwrap();
            });
        }
    });

    let store = MetadataStore::open(tmp.path().join(METADATA_FILE)).unwrap();
    let mut positions: Vec<usize> = (0..WRITERS)
        .map(|i| {
            store
                .find(&CacheKey::new(format!("message {i}"), "p", "v"))
                .unwrap()
                .unwrap()
                .embedding_position
        })
        .collect();
    positions.sort_unstable();
    assert_eq!(positions, (0..WRITERS).collect::<Vec<_>>());

    let fresh = open_cache(tmp.path(), embedder());
    for i in 0..WRITERS {
        for cache in [&shared, &fresh] {
            let hit = cache.get(&format!("message {i}"), "p", "v", 0.99).unwrap();
            assert_eq!(fs::read(hit).unwrap(), format!("AUDIO-{i}").as_bytes());
        }
    }
}
