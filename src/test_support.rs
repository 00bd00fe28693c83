//! Shared fixtures for unit tests

use crate::core::config::Config;
use crate::core::types::{ArticleId, Contributor, Revision, RevisionCounter};
use crate::pipeline::stages::RevisionEncoder;
use crate::storage::{ArticleIndexBuilder, DeltaStore, MemDeltaStore, RevisionIndex};
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

/// Deterministic edit history mixing appends, in-place edits, moves and deletions
pub(crate) fn history(n: usize) -> Vec<String> {
    let mut paragraphs: Vec<String> = vec![
        "'''Example''' is a town in the valley.".to_string(),
        "== History ==\nFounded by settlers in the twelfth century.".to_string(),
        "== Geography ==\nThe river runs north to south.".to_string(),
    ];
    let mut texts = Vec::with_capacity(n);

    for i in 0..n {
        match i % 5 {
            0 => paragraphs.push(format!("== Section {} ==\nNotes added in edit {}.", i, i)),
            1 => {
                let slot = i % paragraphs.len();
                paragraphs[slot].push_str(&format!(" Edit {} ü.", i));
            }
            2 => paragraphs.rotate_left(1),
            3 if paragraphs.len() > 3 => {
                paragraphs.remove(i % paragraphs.len());
            }
            _ => {
                let slot = (i * 7) % paragraphs.len();
                paragraphs[slot] = paragraphs[slot].replace("the", "a");
            }
        }
        texts.push(paragraphs.join("\n\n"));
    }
    texts
}

/// Revisions of `article_id` carrying `texts`, one day apart
pub(crate) fn revisions(article_id: ArticleId, texts: &[String]) -> Vec<Revision> {
    let start = Utc.with_ymd_and_hms(2015, 3, 1, 12, 0, 0).unwrap();
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let counter = i as RevisionCounter + 1;
            let mut revision = Revision::new(
                article_id,
                article_id * 100_000 + u64::from(counter),
                counter,
                start + Duration::days(i as i64),
                text.clone(),
            );
            revision.contributor = Contributor::User {
                id: 7,
                name: "Editor".to_string(),
            };
            revision.comment = Some(format!("edit {}", counter));
            revision
        })
        .collect()
}

/// Encode and store a complete history, then publish its index
pub(crate) fn store_history(config: &Config, revisions: &[Revision], store: &MemDeltaStore, index: &RevisionIndex) {
    let encoder = RevisionEncoder::new(config);
    let mut builder = ArticleIndexBuilder::new(revisions[0].article_id);
    let mut previous: Option<Vec<char>> = None;

    for revision in revisions {
        let current: Vec<char> = revision.text().unwrap_or_default().chars().collect();
        let encoded = encoder.encode(revision, previous.as_deref(), &current).unwrap();
        let key = store.put(encoded.header.clone(), encoded.payload).unwrap();
        builder.push(&encoded.header, key, encoded.checkpoint).unwrap();
        previous = Some(current);
    }
    index.publish(builder.build().unwrap());
}

/// Configuration with a small checkpoint interval and fast waits
pub(crate) fn config(checkpoint_interval: u32) -> Config {
    let mut config = Config::default();
    config.diff.checkpoint_interval = checkpoint_interval;
    config.diff.minimum_match_length = 6;
    config.pipeline.wait_interval = std::time::Duration::from_millis(1);
    config.pipeline.max_empty_waits = 2000;
    config.reconstruction.wait_interval = std::time::Duration::from_millis(1);
    config.reconstruction.max_empty_waits = 3;
    config
}

/// Fresh store and index holding one article
pub(crate) fn stored_article(
    article_id: ArticleId,
    count: usize,
    checkpoint_interval: u32,
) -> (Config, Vec<Revision>, Arc<MemDeltaStore>, Arc<RevisionIndex>) {
    let config = config(checkpoint_interval);
    let revisions = revisions(article_id, &history(count));
    let store = Arc::new(MemDeltaStore::new());
    let index = Arc::new(RevisionIndex::new());
    store_history(&config, &revisions, &store, &index);
    (config, revisions, store, index)
}
