//! End-to-end pipeline tests: run revision streams into a store and read
//! them back through the reconstruction engine.

use super::*;
use crate::core::types::{RevisionCounter, RevisionHeader, StorageKey};
use crate::reconstruction::{ChronoIterator, ReconstructionEngine};
use crate::storage::{DeltaRecord, MemDeltaStore};
use crate::test_support::{config, history, revisions};
use bytes::Bytes;

fn pipeline_config(checkpoint_interval: u32, ceiling: usize) -> Config {
    let mut config = config(checkpoint_interval);
    config.pipeline.task_byte_ceiling = ceiling;
    config.pipeline.diff_workers = 3;
    config.pipeline.writer_workers = 2;
    config
}

/// Articles 1..=n with histories of different lengths
fn corpus(articles: u64) -> Vec<Vec<Revision>> {
    (1..=articles)
        .map(|article| revisions(article, &history(5 + article as usize * 4)))
        .collect()
}

fn run(config: &Config, store: Arc<dyn DeltaStore>, stream: Vec<Revision>) -> (PipelineReport, Arc<RevisionIndex>) {
    let index = Arc::new(RevisionIndex::new());
    let pipeline = Pipeline::new(config.clone(), store, index.clone()).unwrap();
    let report = pipeline.run(stream).unwrap();
    (report, index)
}

fn assert_reconstructs(config: &Config, store: Arc<dyn DeltaStore>, index: Arc<RevisionIndex>, expected: &[Revision]) {
    let article_id = expected[0].article_id;
    let mut engine = ReconstructionEngine::new(store, index, config);
    let rebuilt: Vec<Revision> = ChronoIterator::new(&mut engine, article_id)
        .unwrap()
        .collect::<crate::Result<_>>()
        .unwrap();

    assert_eq!(rebuilt.len(), expected.len(), "article {}", article_id);
    for (rebuilt, expected) in rebuilt.iter().zip(expected) {
        assert_eq!(rebuilt.revision_id, expected.revision_id);
        assert_eq!(rebuilt.timestamp, expected.timestamp);
        assert_eq!(rebuilt.comment, expected.comment);
        assert_eq!(rebuilt.text, expected.text, "article {} revision {}", article_id, expected.revision_counter);
    }
}

#[test]
fn test_pipeline_stores_reconstructable_history() {
    let config = pipeline_config(4, 1 << 20);
    let corpus = corpus(6);
    let store = Arc::new(MemDeltaStore::new());
    let (report, index) = run(&config, store.clone(), corpus.concat());

    let total: usize = corpus.iter().map(Vec::len).sum();
    assert_eq!(report.articles_read, 6);
    assert_eq!(report.revisions_read, total);
    assert_eq!(report.diffs_encoded, total);
    assert_eq!(report.articles_published, 6);
    assert_eq!(report.revisions_published, total as u64);
    assert_eq!(report.articles_banned, 0);
    assert_eq!(report.encoded_bytes as u64, store.stats().payload_bytes);

    for article in &corpus {
        assert_reconstructs(&config, store.clone(), index.clone(), article);
    }
}

#[test]
fn test_split_articles_match_unsplit_run() {
    let corpus = corpus(4);
    let whole = pipeline_config(5, 1 << 20);
    let split = pipeline_config(5, 400);

    let whole_store = Arc::new(MemDeltaStore::new());
    let split_store = Arc::new(MemDeltaStore::new());
    let (_, whole_index) = run(&whole, whole_store.clone(), corpus.concat());
    let (report, split_index) = run(&split, split_store.clone(), corpus.concat());
    assert_eq!(report.articles_published, 4);

    for article in &corpus {
        let article_id = article[0].article_id;
        let whole_records = whole_store.get_range(article_id, StorageKey(0), StorageKey(1000)).unwrap();
        let split_records = split_store.get_range(article_id, StorageKey(0), StorageKey(1000)).unwrap();
        assert_eq!(whole_records, split_records);
        assert_eq!(
            whole_index.article(article_id).unwrap().checkpoints(),
            split_index.article(article_id).unwrap().checkpoints()
        );
        assert_reconstructs(&split, split_store.clone(), split_index.clone(), article);
    }
}

#[test]
fn test_counter_gap_bans_article() {
    let config = pipeline_config(3, 300);
    let mut corpus = corpus(3);
    // Article 2 loses revision 6 somewhere upstream
    corpus[1].remove(5);
    let store = Arc::new(MemDeltaStore::new());
    let (report, index) = run(&config, store.clone(), corpus.concat());

    assert!(report.is_banned(2));
    assert_eq!(report.articles_banned, 1);
    assert_eq!(report.banned[0].stage, "reader");
    assert!(index.article(2).is_none());
    assert_eq!(report.articles_published, 2);

    assert_reconstructs(&config, store.clone(), index.clone(), &corpus[0]);
    assert_reconstructs(&config, store, index, &corpus[2]);
}

#[test]
fn test_encoding_failure_mid_article_bans_only_that_article() {
    let mut config = pipeline_config(4, 250);
    config.codec.charset = crate::core::config::TextCharset::Latin1;

    let mut corpus: Vec<Vec<Revision>> = (1..=3)
        .map(|article| {
            let texts: Vec<String> = history(12).iter().map(|t| t.replace('ü', "u")).collect();
            revisions(article, &texts)
        })
        .collect();
    // Latin-1 cannot carry a snowman
    let text = corpus[1][7].text.take().unwrap_or_default();
    corpus[1][7].text = Some(format!("{} \u{2603}", text));

    let store = Arc::new(MemDeltaStore::new());
    let (report, index) = run(&config, store.clone(), corpus.concat());

    assert!(report.is_banned(2));
    assert!(report.banned.iter().all(|b| b.article_id == 2));
    assert!(report.banned.iter().any(|b| b.stage.starts_with("diff-worker")));
    assert!(index.article(2).is_none());
    assert!(index.locate_revision(corpus[1][0].revision_id).is_none());

    assert_reconstructs(&config, store.clone(), index.clone(), &corpus[0]);
    assert_reconstructs(&config, store, index, &corpus[2]);
}

/// Store that refuses one revision of one article
struct FailingStore {
    inner: MemDeltaStore,
    article_id: ArticleId,
    counter: RevisionCounter,
}

impl DeltaStore for FailingStore {
    fn put(&self, header: RevisionHeader, payload: Bytes) -> crate::Result<StorageKey> {
        if header.article_id == self.article_id && header.revision_counter == self.counter {
            return Err(Error::internal("disk on fire"));
        }
        self.inner.put(header, payload)
    }

    fn get_range(&self, article_id: ArticleId, after: StorageKey, through: StorageKey) -> crate::Result<Vec<DeltaRecord>> {
        self.inner.get_range(article_id, after, through)
    }
}

#[test]
fn test_write_failure_keeps_article_unpublished() {
    let config = pipeline_config(4, 200);
    let corpus = corpus(3);
    let store = Arc::new(FailingStore {
        inner: MemDeltaStore::new(),
        article_id: 3,
        counter: 9,
    });
    let (report, index) = run(&config, store.clone(), corpus.concat());

    assert!(report.is_banned(3));
    assert!(report.banned.iter().any(|b| b.stage.starts_with("writer") && b.reason.contains("disk on fire")));
    assert!(index.article(3).is_none());
    assert_eq!(index.article_ids().len(), 2);

    assert_reconstructs(&config, store.clone(), index.clone(), &corpus[0]);
    assert_reconstructs(&config, store, index, &corpus[1]);
}

#[test]
fn test_stop_halts_new_articles() {
    let config = pipeline_config(4, 1 << 20);
    let corpus = corpus(5);
    let store = Arc::new(MemDeltaStore::new());
    let index = Arc::new(RevisionIndex::new());
    let pipeline = Pipeline::new(config.clone(), store.clone(), index.clone()).unwrap();
    let control = pipeline.control();

    let stream = corpus.concat().into_iter().inspect(move |revision| {
        if revision.article_id == 3 {
            control.stop();
        }
    });
    let report = pipeline.run(stream).unwrap();

    assert!(pipeline.control().is_stopped());
    assert_eq!(report.articles_banned, 0);
    assert!(report.articles_read <= 1);
    for article_id in 2..=5 {
        assert!(index.article(article_id).is_none());
    }
    if index.article(1).is_some() {
        assert_reconstructs(&config, store, index, &corpus[0]);
    }
}

#[test]
fn test_killed_pipeline_returns_promptly() {
    let config = pipeline_config(4, 300);
    let store = Arc::new(MemDeltaStore::new());
    let index = Arc::new(RevisionIndex::new());
    let pipeline = Pipeline::new(config, store.clone(), index.clone()).unwrap();
    pipeline.control().kill();

    let report = pipeline.run(corpus(4).concat()).unwrap();
    assert_eq!(report.articles_read, 0);
    assert_eq!(report.articles_published, 0);
    assert_eq!(index.article_count(), 0);
    assert_eq!(store.stats().records, 0);
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = pipeline_config(4, 300);
    config.pipeline.writer_workers = 0;
    let result = Pipeline::new(config, Arc::new(MemDeltaStore::new()), Arc::new(RevisionIndex::new()));
    assert!(matches!(result, Err(Error::Config(_))));
}
