pub mod error;
pub mod llm;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod render;
pub mod report;
pub mod request;

pub use error::{AuditError, ExportError};
pub use llm::{build_client, ModelClient, ProviderKind, ProviderSettings};
pub use pipeline::{AuditPipeline, ExportDecision, PipelineOutcome, RetryPolicy};
pub use render::{
    document_path, Annotation, ConsoleLine, ConsoleRenderer, DocumentRenderer, LineKind,
    ReportRenderer,
};
pub use report::{
    AuditReport, Metric, MetricScore, ReportValidationError, RiskFinding, RiskLevel, ScoreBand,
    Suggestion,
};
pub use request::{AuditRequest, Credential};
