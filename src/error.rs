use folio_config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("data source unavailable: {0}")]
    DataAccess(String),
    #[error("rule evaluation failed: {0}")]
    Evaluation(String),
    #[error("front page rendering failed: {0}")]
    Rendering(String),
    #[error("layout changed between passes: {0}")]
    LayoutConsistency(String),
    #[error("no page template available")]
    MissingPageTemplate,
    #[error("flowable cannot fit on any page: {0}")]
    UnplaceableFlowable(String),
    #[error("pagination tracker cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },
    #[error("report generation exceeded its deadline during {0}")]
    Timeout(&'static str),
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
