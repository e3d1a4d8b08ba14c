//! Pipeline-shaped cache traffic

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pipecache::{
    AttributeScope, CacheRegistry, Cacheable, EvictionCause, Key, PipelineScope, Result,
    TieredCache, Validity,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Operations sharing one scope, like the calls of one request
const OPERATIONS_PER_SCOPE: usize = 100;

/// Chance in a thousand that an operation edits its document first
const EDIT_PER_MILLE: u32 = 50;

/// A transformed document
pub struct Artifact {
    document: i64,
    revision: i64,
    body: String,
    evicted: Arc<AtomicU64>,
}

impl Cacheable for Artifact {
    fn evicted(&self, _scope: &dyn AttributeScope, cause: EvictionCause) {
        if cause == EvictionCause::Capacity {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            debug!(
                document = self.document,
                revision = self.revision,
                bytes = self.body.len(),
                "artifact evicted"
            );
        }
    }
}

/// Knobs of a simulation run
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub operations: usize,
    pub documents: i64,
    pub reclaim_every: usize,
    pub seed: u64,
}

/// Counters collected over a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    pub lookups: u64,
    pub hits: u64,
    pub edits: u64,
    pub session_hits: u64,
    pub session_puts: u64,
    pub reclaimed: u64,
    pub evicted: u64,
}

pub struct Workload<'a> {
    registry: &'a CacheRegistry<Artifact>,
    sessions: &'a TieredCache<String, Artifact>,
    config: WorkloadConfig,
    revisions: Vec<i64>,
    stylesheet: Key,
    rng: StdRng,
    evicted: Arc<AtomicU64>,
}

impl<'a> Workload<'a> {
    pub fn new(
        registry: &'a CacheRegistry<Artifact>,
        sessions: &'a TieredCache<String, Artifact>,
        config: WorkloadConfig,
    ) -> Result<Self> {
        let documents = config.documents.max(1);
        Ok(Self {
            registry,
            sessions,
            revisions: vec![0; documents as usize],
            stylesheet: Key::leaf("file", "data", "style.xsl")?,
            rng: StdRng::seed_from_u64(config.seed),
            evicted: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    pub fn run(&mut self) -> Result<Report> {
        let main = self.registry.main();
        let mut report = Report::default();
        let mut scope = PipelineScope::new();

        for op in 0..self.config.operations {
            if op % OPERATIONS_PER_SCOPE == 0 && op > 0 {
                debug!(scope_stats = %main.statistics(&scope), "scope finished");
                scope = PipelineScope::new();
            }

            let document = self.rng.gen_range(0..self.revisions.len() as i64);
            if self.rng.gen_range(0..1000) < EDIT_PER_MILLE {
                self.revisions[document as usize] += 1;
                report.edits += 1;
            }
            let revision = self.revisions[document as usize];

            let key = self.transform_key(document)?;
            let validity = Validity::sequence([revision, 0]);
            report.lookups += 1;
            let artifact = match main.find_valid(&scope, &key, &validity) {
                Some(artifact) => {
                    report.hits += 1;
                    artifact
                }
                None => {
                    let artifact = Arc::new(self.render(document, revision));
                    main.add(&scope, key, validity, Arc::clone(&artifact));
                    artifact
                }
            };

            let session = format!("s{}", document);
            match self.sessions.get("id", &session)? {
                Some(_) => report.session_hits += 1,
                None => {
                    self.sessions
                        .put(vec![session, format!("/doc/{}.xml", document)], artifact)?;
                    report.session_puts += 1;
                }
            }

            if self.config.reclaim_every > 0 && (op + 1) % self.config.reclaim_every == 0 {
                let reclaimer = self.sessions.reclaimer();
                report.reclaimed += reclaimer.reclaim(reclaimer.tracked() / 2) as u64;
            }
        }

        report.evicted = self.evicted.load(Ordering::Relaxed);
        Ok(report)
    }

    fn transform_key(&self, document: i64) -> Result<Key> {
        let input = Key::leaf("file", "data", document)?;
        Key::compound("xslt", "data", vec![input, self.stylesheet.clone()])
    }

    fn render(&self, document: i64, revision: i64) -> Artifact {
        Artifact {
            document,
            revision,
            body: format!("<doc id=\"{}\" rev=\"{}\"/>", document, revision),
            evicted: Arc::clone(&self.evicted),
        }
    }
}
