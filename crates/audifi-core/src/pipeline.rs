use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{AuditError, ExportError};
use crate::llm::{ModelClient, ProviderSettings};
use crate::parser;
use crate::prompt::build_prompt;
use crate::render::{ConsoleLine, ConsoleRenderer, DocumentRenderer, ReportRenderer};
use crate::report::AuditReport;
use crate::request::AuditRequest;

/// Bounds applied to the model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&ProviderSettings::default())
    }
}

impl RetryPolicy {
    pub const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
    pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            timeout: settings.timeout(),
            initial_backoff: Self::INITIAL_BACKOFF,
            max_backoff: Self::MAX_BACKOFF,
        }
    }

    /// Delay before retry number `retry` (1-based). A provider hint raises the
    /// delay but never beyond the larger of `max_backoff` and `timeout`.
    fn backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let delay = self
            .initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff);
        let ceiling = self.max_backoff.max(self.timeout);
        match hint {
            Some(hint) if hint > delay => hint.min(ceiling),
            _ => delay,
        }
    }
}

/// Whether the caller wants a PDF next to the audited source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportDecision {
    Skip,
    Export { source_path: PathBuf },
}

/// Result of a successful analysis. Export failures are reported here and do
/// not fail the run.
#[derive(Debug)]
pub struct PipelineOutcome {
    report: AuditReport,
    console: Vec<ConsoleLine>,
    export: Option<Result<PathBuf, ExportError>>,
}

impl PipelineOutcome {
    pub fn report(&self) -> &AuditReport {
        &self.report
    }

    pub fn console(&self) -> &[ConsoleLine] {
        &self.console
    }

    /// `None` when export was skipped.
    pub fn export(&self) -> Option<&Result<PathBuf, ExportError>> {
        self.export.as_ref()
    }
}

pub struct AuditPipeline {
    client: Box<dyn ModelClient>,
    policy: RetryPolicy,
}

impl AuditPipeline {
    pub fn new(client: Box<dyn ModelClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Prompt, call, parse, render and optionally export. The first failing
    /// analysis stage ends the run.
    pub async fn run(
        &self,
        request: &AuditRequest,
        export: ExportDecision,
    ) -> Result<PipelineOutcome, AuditError> {
        let prompt = build_prompt(request.source_text())?;
        debug!(
            provider = self.client.provider(),
            prompt_chars = prompt.chars().count(),
            "prompt built"
        );

        let raw = self.call_with_retries(&prompt, request).await?;
        info!(response_chars = raw.chars().count(), "model answered");

        let report = parser::parse(&raw)?;
        info!(
            metrics = report.metrics().len(),
            findings = report.findings().len(),
            "report validated"
        );

        let console = ConsoleRenderer
            .render(&report)
            .map_err(|err| AuditError::Render(format!("{err:#}")))?;

        let export = match export {
            ExportDecision::Skip => None,
            ExportDecision::Export { source_path } => {
                let result = export_document(&report, source_path).await;
                match &result {
                    Ok(path) => info!(path = %path.display(), "audit document exported"),
                    Err(err) => warn!(error = %err, "audit document export failed"),
                }
                Some(result)
            }
        };

        Ok(PipelineOutcome {
            report,
            console,
            export,
        })
    }

    async fn call_with_retries(
        &self,
        prompt: &str,
        request: &AuditRequest,
    ) -> Result<String, AuditError> {
        let mut retry = 0u32;
        loop {
            let attempt = tokio::time::timeout(
                self.policy.timeout,
                self.client.complete(prompt, request.credential()),
            )
            .await
            .unwrap_or(Err(AuditError::Timeout(self.policy.timeout)));

            let err = match attempt {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };
            if !err.is_transient() || retry >= self.policy.max_retries {
                return Err(err);
            }

            retry += 1;
            let hint = match &err {
                AuditError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            let delay = self.policy.backoff(retry, hint);
            warn!(
                provider = self.client.provider(),
                retry,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "model call failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

async fn export_document(report: &AuditReport, source_path: PathBuf) -> Result<PathBuf, ExportError> {
    let document = DocumentRenderer::new(source_path)
        .render(report)
        .map_err(|err| ExportError::Render(format!("{err:#}")))?;
    document.write().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Credential;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const ANSWER: &str = r#"[
  {"section": "Audit Report", "details": "Small contract."},
  {"section": "Metric Scores", "details": [
    {"metric": "CodeQuality", "score": 7},
    {"metric": "Security", "score": 9}
  ]},
  {"section": "Suggestions for Improvement", "details": []},
  {"section": "Risk Levels", "details": []}
]"#;

    enum Step {
        Answer(&'static str),
        Fail(fn() -> AuditError),
        Hang,
    }

    struct ScriptedClient {
        steps: Mutex<VecDeque<Step>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedClient {
        fn new(steps: Vec<Step>) -> (Box<dyn ModelClient>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let client = Self {
                steps: Mutex::new(steps.into()),
                calls: Arc::clone(&calls),
            };
            (Box::new(client), calls)
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        fn provider(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, _prompt: &str, _credential: &Credential) -> Result<String, AuditError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Hang);
            match step {
                Step::Answer(text) => Ok(text.to_string()),
                Step::Fail(make) => Err(make()),
                Step::Hang => std::future::pending().await,
            }
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            timeout: Duration::from_secs(30),
            initial_backoff: RetryPolicy::INITIAL_BACKOFF,
            max_backoff: RetryPolicy::MAX_BACKOFF,
        }
    }

    fn request(source: &str) -> AuditRequest {
        AuditRequest::new(source, Credential::new("key").unwrap())
    }

    #[test]
    fn backoff_doubles_caps_and_honours_hint() {
        let policy = policy(10);
        assert_eq!(policy.backoff(1, None), Duration::from_millis(200));
        assert_eq!(policy.backoff(2, None), Duration::from_millis(400));
        assert_eq!(policy.backoff(3, None), Duration::from_millis(800));
        assert_eq!(policy.backoff(9, None), Duration::from_secs(5));
        assert_eq!(policy.backoff(40, None), Duration::from_secs(5));
        assert_eq!(
            policy.backoff(1, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.backoff(3, Some(Duration::from_millis(10))),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn provider_hint_is_capped() {
        let policy = policy(2);
        assert_eq!(
            policy.backoff(1, Some(Duration::from_secs(86_400))),
            Duration::from_secs(30)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn huge_retry_after_does_not_stall_the_run() {
        let (client, calls) = ScriptedClient::new(vec![
            Step::Fail(|| AuditError::RateLimited {
                retry_after: Some(Duration::from_secs(86_400)),
            }),
            Step::Answer(ANSWER),
        ]);
        let pipeline = AuditPipeline::new(client, policy(1));
        let started = tokio::time::Instant::now();
        pipeline
            .run(&request("contract C {}"), ExportDecision::Skip)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() <= Duration::from_secs(30), "{:?}", started.elapsed());
    }

    #[test]
    fn policy_follows_settings() {
        let settings = ProviderSettings {
            timeout_secs: Some(12),
            max_retries: 4,
            ..ProviderSettings::default()
        };
        let policy = RetryPolicy::from_settings(&settings);
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.timeout, Duration::from_secs(12));
        assert_eq!(RetryPolicy::default().max_retries, 2);
    }

    #[tokio::test]
    async fn successful_run_renders_canonical_order() {
        let (client, calls) = ScriptedClient::new(vec![Step::Answer(ANSWER)]);
        let pipeline = AuditPipeline::new(client, policy(2));
        let outcome = pipeline
            .run(&request("contract C {}"), ExportDecision::Skip)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.export().is_none());
        let texts: Vec<_> = outcome.console().iter().map(|l| l.text.as_str()).collect();
        let security = texts.iter().position(|t| *t == "Security: 9/10 (good)").unwrap();
        let quality = texts
            .iter()
            .position(|t| *t == "CodeQuality: 7/10 (moderate)")
            .unwrap();
        assert!(security < quality);
    }

    #[tokio::test]
    async fn empty_source_never_reaches_the_model() {
        let (client, calls) = ScriptedClient::new(vec![Step::Answer(ANSWER)]);
        let pipeline = AuditPipeline::new(client, policy(2));
        let err = pipeline
            .run(&request("   "), ExportDecision::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::InvalidInput(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_model_times_out_after_bounded_retries() {
        let (client, calls) = ScriptedClient::new(vec![]);
        let pipeline = AuditPipeline::new(client, policy(2));
        let err = pipeline
            .run(&request("contract C {}"), ExportDecision::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Timeout(d) if d == Duration::from_secs(30)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success() {
        let (client, calls) = ScriptedClient::new(vec![
            Step::Fail(|| AuditError::RateLimited {
                retry_after: Some(Duration::from_secs(1)),
            }),
            Step::Fail(|| AuditError::ProviderUnavailable("503".into())),
            Step::Answer(ANSWER),
        ]);
        let pipeline = AuditPipeline::new(client, policy(2));
        let outcome = pipeline
            .run(&request("contract C {}"), ExportDecision::Skip)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.report().metrics().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_are_not_retried() {
        let (client, calls) = ScriptedClient::new(vec![Step::Fail(|| {
            AuditError::AuthenticationFailed("bad key".into())
        })]);
        let pipeline = AuditPipeline::new(client, policy(5));
        let err = pipeline
            .run(&request("contract C {}"), ExportDecision::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::AuthenticationFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_output_is_not_retried() {
        let (client, calls) = ScriptedClient::new(vec![
            Step::Answer("I could not audit this contract."),
            Step::Answer(ANSWER),
        ]);
        let pipeline = AuditPipeline::new(client, policy(3));
        let err = pipeline
            .run(&request("contract C {}"), ExportDecision::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::MalformedModelOutput { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn export_writes_document_next_to_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Vault.sol");
        std::fs::write(&source, "contract Vault {}").unwrap();

        let (client, _) = ScriptedClient::new(vec![Step::Answer(ANSWER)]);
        let pipeline = AuditPipeline::new(client, policy(0));
        let outcome = pipeline
            .run(
                &request("contract Vault {}"),
                ExportDecision::Export {
                    source_path: source.clone(),
                },
            )
            .await
            .unwrap();

        let path = outcome.export().unwrap().as_ref().unwrap();
        assert_eq!(path, &dir.path().join("Vault-audit-report.pdf"));
        let bytes = std::fs::read(path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn export_failure_does_not_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("missing-dir").join("Vault.sol");

        let (client, _) = ScriptedClient::new(vec![Step::Answer(ANSWER)]);
        let pipeline = AuditPipeline::new(client, policy(0));
        let outcome = pipeline
            .run(
                &request("contract Vault {}"),
                ExportDecision::Export {
                    source_path: source,
                },
            )
            .await
            .expect("analysis succeeds even though export fails");

        assert!(!outcome.console().is_empty());
        assert!(matches!(
            outcome.export(),
            Some(Err(ExportError::Io { .. }))
        ));
    }
}
