#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use digest_provider::RawPage;
use digest_provider_mock::{item_json, MockBackend, MockItemSource, PageScript};
use pr_digest::mirror::PersistenceMirror;
use pr_digest::{Digest, DigestSettings, IncrementObserver};
use serde_json::Value;
use snapshot_store::SnapshotStore;
use tempfile::TempDir;

pub fn settings() -> DigestSettings {
    DigestSettings {
        per_page: 10,
        page_timeout: Duration::from_secs(5),
        generation_timeout: Duration::from_secs(30),
    }
}

pub fn item(id: &str) -> Value {
    item_json(id, &format!("Pull request {id}"), &format!("diff for {id}"))
}

pub fn items(prefix: &str, range: std::ops::RangeInclusive<u32>) -> Vec<Value> {
    range.map(|index| item(&format!("{prefix}{index}"))).collect()
}

pub fn page(items: Vec<Value>, current_page: u32, next_page: Option<u32>) -> PageScript {
    PageScript::page(RawPage {
        items,
        next_page,
        current_page,
        per_page: 10,
    })
}

pub fn open_mirror(dir: &TempDir) -> PersistenceMirror {
    PersistenceMirror::new(SnapshotStore::open(dir.path()).expect("snapshot store should open"))
}

/// A digest over scripted collaborators, persisted under a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub digest: Digest,
    pub backend: Arc<MockBackend>,
    pub source: Arc<MockItemSource>,
    pub observed: Arc<Mutex<Vec<(String, String)>>>,
}

impl Harness {
    pub fn new(backend: MockBackend, source: MockItemSource) -> Self {
        Self::with_settings(backend, source, settings())
    }

    pub fn with_settings(
        backend: MockBackend,
        source: MockItemSource,
        settings: DigestSettings,
    ) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let backend = Arc::new(backend);
        let source = Arc::new(source);
        let observed = Arc::new(Mutex::new(Vec::new()));
        let digest = build_digest(&dir, &backend, &source, &observed, settings);
        digest.hydrate();

        Self {
            dir,
            digest,
            backend,
            source,
            observed,
        }
    }

    /// Rebuilds the digest over the same storage, as a process restart would.
    pub fn restart(&mut self) {
        self.digest = build_digest(
            &self.dir,
            &self.backend,
            &self.source,
            &self.observed,
            settings(),
        );
        self.digest.hydrate();
    }

    pub fn observed(&self) -> Vec<(String, String)> {
        lock_unpoisoned(&self.observed).clone()
    }

    /// Fetches the first page and returns the held ids.
    pub async fn load_first_page(&self) -> Vec<String> {
        self.digest
            .fetch_next_page()
            .await
            .expect("first page should load");
        self.digest
            .snapshot()
            .items
            .into_iter()
            .map(|view| view.item.id)
            .collect()
    }
}

fn build_digest(
    dir: &TempDir,
    backend: &Arc<MockBackend>,
    source: &Arc<MockItemSource>,
    observed: &Arc<Mutex<Vec<(String, String)>>>,
    settings: DigestSettings,
) -> Digest {
    let sink = Arc::clone(observed);
    let observer: IncrementObserver = Arc::new(move |item_id: &str, increment: &str| {
        lock_unpoisoned(&sink).push((item_id.to_string(), increment.to_string()));
    });

    Digest::with_observer(
        open_mirror(dir),
        Arc::clone(backend) as _,
        Arc::clone(source) as _,
        settings,
        observer,
    )
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
