//! The three public operations: build, test-case generation and script
//! generation.
//!
//! A [`Harness`] owns the configured providers and the currently published
//! [`KnowledgeBase`]. Query-time operations clone the `Arc` of the current
//! snapshot and work against it for their whole duration, so a concurrent
//! rebuild never changes what an in-flight request sees. Builds are
//! serialized; each one publishes a new snapshot with a single swap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use qa_harness_core::embedding::Embedder;
use qa_harness_core::grounding::GroundedGenerator;
use qa_harness_core::llm::LanguageModel;
use qa_harness_core::models::{GeneratedScript, SelectorMap, TestCase};
use qa_harness_core::retrieval::RetrievalPipeline;
use qa_harness_core::script::{unreferenced_placeholders, ScriptGenerator};
use qa_harness_core::{QaError, Result};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest::build_knowledge_base;
use crate::llm::create_language_model;
use crate::models::{BuildReport, KnowledgeBase, MarkupUpload, SourceUpload, TestCaseResponse, UsedChunk};
use crate::store::IndexStore;

pub struct Harness {
    config: Config,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    store: IndexStore,
    current: RwLock<Option<Arc<KnowledgeBase>>>,
    build_lock: Mutex<()>,
}

impl Harness {
    pub fn new(config: Config, embedder: Arc<dyn Embedder>, model: Arc<dyn LanguageModel>) -> Self {
        let store = IndexStore::new(config.index.dir.clone(), config.index.keep_versions);
        Self {
            config,
            embedder,
            model,
            store,
            current: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    /// Create the providers named in `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let model = create_language_model(&config.llm)?;
        Ok(Self::new(config, embedder, model))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// The snapshot in memory, if one has been built or loaded.
    pub fn snapshot(&self) -> Option<Arc<KnowledgeBase>> {
        self.current.read().clone()
    }

    fn publish_snapshot(&self, kb: Arc<KnowledgeBase>) {
        *self.current.write() = Some(kb);
    }

    /// Install `loaded` unless a snapshot is already current, and return
    /// whichever one is current afterwards.
    fn install_if_absent(&self, loaded: Option<Arc<KnowledgeBase>>) -> Option<Arc<KnowledgeBase>> {
        let mut current = self.current.write();
        if let Some(kb) = current.as_ref() {
            return Some(kb.clone());
        }
        *current = loaded.clone();
        loaded
    }

    async fn read_published(&self) -> Result<Option<Arc<KnowledgeBase>>> {
        let Some(kb) = self.store.load_current(self.embedder.as_ref()).await? else {
            debug!(dir = %self.store.root().display(), "no published index");
            return Ok(None);
        };
        info!(version = %kb.version, chunks = kb.index.len(), "loaded knowledge base");
        Ok(Some(Arc::new(kb)))
    }

    /// Load the published version from disk and make it current.
    ///
    /// Waits for a running build to finish. Fails with
    /// [`QaError::IndexMismatch`] when the persisted index was built with a
    /// different embedding model.
    pub async fn load(&self) -> Result<Option<Arc<KnowledgeBase>>> {
        let _guard = self.build_lock.lock().await;
        let kb = self.read_published().await?;
        if let Some(kb) = &kb {
            self.publish_snapshot(kb.clone());
        }
        Ok(kb)
    }

    /// The current snapshot, loading the published one on first use. A
    /// build that publishes while the load is in flight takes precedence.
    async fn require_snapshot(&self) -> Result<Arc<KnowledgeBase>> {
        if let Some(kb) = self.snapshot() {
            return Ok(kb);
        }
        let loaded = self.read_published().await?;
        self.install_if_absent(loaded).ok_or(QaError::NoKnowledgeBase)
    }

    /// Build, persist and publish a new knowledge base.
    pub async fn build(
        &self,
        uploads: Vec<SourceUpload>,
        markup: Option<MarkupUpload>,
    ) -> Result<BuildReport> {
        let _guard = self.build_lock.lock().await;

        let (kb, report) =
            build_knowledge_base(uploads, markup.as_ref(), self.embedder.as_ref(), &self.config)
                .await?;
        self.store.publish(&kb).await?;
        self.publish_snapshot(Arc::new(kb));

        let failed = report.failed_sources().count();
        if failed > 0 {
            warn!(failed, "build finished with failed sources");
        }
        info!(
            version = %report.version,
            chunks = report.chunk_count,
            selectors = report.selector_count,
            "build complete"
        );
        Ok(report)
    }

    /// Retrieve context for `query` and generate grounded test cases.
    pub async fn generate_test_cases(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<TestCaseResponse> {
        let kb = self.require_snapshot().await?;
        let top_k = top_k.unwrap_or(self.config.retrieval.top_k);
        let pipeline = RetrievalPipeline::new(kb.index.clone(), self.embedder.clone())?;
        let generator = GroundedGenerator::new(self.model.clone(), self.config.llm.generation());

        let work = async {
            let ctx = pipeline.retrieve(query, top_k).await?;
            debug!(query, hits = ctx.len(), "retrieved context");
            let test_cases = generator.generate(query, &ctx).await?;
            Ok::<_, QaError>(TestCaseResponse {
                test_cases,
                used_chunks: UsedChunk::from_context(&ctx),
            })
        };

        let response = self
            .with_timeout("test-case generation", query, work)
            .await
            .inspect_err(|e| warn!(query, error = %e, "test-case generation failed"))?;
        info!(
            query,
            version = %kb.version,
            test_cases = response.test_cases.len(),
            "generated test cases"
        );
        Ok(response)
    }

    /// Generate a browser-automation script for one test case against the
    /// current selector map.
    pub async fn generate_script(&self, test_case: &TestCase) -> Result<GeneratedScript> {
        if test_case.test_id.trim().is_empty() {
            return Err(QaError::InvalidRequest("test case has no Test_ID".to_string()));
        }
        let kb = self.require_snapshot().await?;
        let evidence = if self.config.script.include_evidence {
            kb.evidence(&test_case.grounded_in)
        } else {
            Vec::new()
        };
        let generator = ScriptGenerator::new(self.model.clone(), self.config.script_options());

        let script = self
            .with_timeout(
                "script generation",
                &test_case.test_id,
                generator.generate_with_evidence(test_case, &kb.selectors, &evidence),
            )
            .await
            .inspect_err(|e| warn!(test_id = %test_case.test_id, error = %e, "script generation failed"))?;

        let stray = unreferenced_placeholders(&script.code, &script.missing_selectors);
        if !stray.is_empty() {
            warn!(
                test_id = %script.test_id,
                placeholders = ?stray,
                "script marks selectors that resolve as missing"
            );
        }
        if !script.missing_selectors.is_empty() {
            info!(
                test_id = %script.test_id,
                missing = ?script.missing_selectors,
                "script has unresolved selectors"
            );
        }
        Ok(script)
    }

    /// Selector map of the current snapshot.
    pub async fn selectors(&self) -> Result<Arc<SelectorMap>> {
        Ok(self.require_snapshot().await?.selectors.clone())
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        context: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let seconds = self.config.retrieval.timeout_secs;
        match tokio::time::timeout(Duration::from_secs(seconds), work).await {
            Ok(result) => result,
            Err(_) => Err(QaError::Timeout {
                operation: operation.to_string(),
                context: context.to_string(),
                seconds,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qa_harness_core::llm::CompletionRequest;
    use qa_harness_core::models::{CitationHandle, FormatKind, TestType};
    use tempfile::TempDir;

    use crate::embedding::HashEmbedder;
    use crate::llm::DisabledModel;

    /// Answers every script prompt with the same code.
    struct FixedScript(&'static str);

    #[async_trait]
    impl LanguageModel for FixedScript {
        fn model_name(&self) -> &str {
            "fixed-script"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn harness(tmp: &TempDir, model: Arc<dyn LanguageModel>) -> Harness {
        let mut config = Config::default();
        config.index.dir = tmp.path().join("index");
        Harness::new(config, Arc::new(HashEmbedder::new(16)), model)
    }

    fn upload(name: &str, text: &str) -> SourceUpload {
        SourceUpload {
            filename: name.to_string(),
            bytes: text.as_bytes().to_vec(),
            format_kind: FormatKind::Markdown,
        }
    }

    #[tokio::test]
    async fn test_first_use_loads_published_snapshot() {
        let tmp = TempDir::new().unwrap();
        let report = harness(&tmp, Arc::new(DisabledModel))
            .build(vec![upload("a.md", "Codes expire after 30 days.")], None)
            .await
            .unwrap();

        let fresh = harness(&tmp, Arc::new(DisabledModel));
        assert!(fresh.snapshot().is_none());
        let kb = fresh.require_snapshot().await.unwrap();
        assert_eq!(kb.version, report.version);
        assert_eq!(fresh.snapshot().unwrap().version, report.version);
    }

    #[tokio::test]
    async fn test_stale_load_does_not_replace_newer_build() {
        let tmp = TempDir::new().unwrap();
        let harness = harness(&tmp, Arc::new(DisabledModel));
        harness
            .build(vec![upload("a.md", "Old rules.")], None)
            .await
            .unwrap();
        let stale = harness.read_published().await.unwrap();

        let newer = harness
            .build(vec![upload("b.md", "New rules.")], None)
            .await
            .unwrap();
        let kept = harness.install_if_absent(stale).unwrap();
        assert_eq!(kept.version, newer.version);
        assert_eq!(harness.snapshot().unwrap().version, newer.version);
    }

    #[tokio::test]
    async fn test_script_with_placeholder_for_resolved_selector_is_kept() {
        let tmp = TempDir::new().unwrap();
        let code = "wait.until(visible('#apply')).click()\n\
                    promo = '__MISSING_SELECTOR__[input_promo]'\n\
                    apply = '__MISSING_SELECTOR__[button_apply]'";
        let harness = harness(&tmp, Arc::new(FixedScript(code)));
        let markup = MarkupUpload {
            filename: "page.html".into(),
            text: r#"<button id="apply">Apply</button>"#.into(),
        };
        harness
            .build(vec![upload("a.md", "Apply the promo code.")], Some(markup))
            .await
            .unwrap();

        let test_case = TestCase {
            test_id: "TC-1".into(),
            feature: "Promo".into(),
            scenario: "Apply a code".into(),
            preconditions: vec![],
            steps: vec!["Click Apply".into()],
            expected_result: "Code accepted".into(),
            test_type: TestType::Positive,
            grounded_in: vec![CitationHandle::new("a.md", 0)],
            selectors_needed: vec!["button_apply".into(), "input_promo".into()],
        };
        let script = harness.generate_script(&test_case).await.unwrap();
        assert_eq!(script.missing_selectors, vec!["input_promo"]);
        assert_eq!(
            unreferenced_placeholders(&script.code, &script.missing_selectors),
            vec!["button_apply"]
        );
    }
}
