pub mod config;
pub mod discovery;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod preparation;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, LoggingConfig,
    ServiceConfig,
};
pub use discovery::{
    DiscoveryError, DiscoveryEvent, DiscoveryService, DiscoverySource, DiscoveryStreamReader,
    DownloadHandle, HandleKind, HttpDiscoveryClient, ResultItem, SearchOutcome, SearchQuery,
};
pub use logging::init_logging;
pub use orchestrator::{
    AcquisitionOrchestrator, Notification, OrchestratorConfig, OrchestratorError,
    OrchestratorSnapshot,
};
pub use preparation::{
    HttpPreparationClient, JobPool, JobState, MediaType, PoolPhase, PreparationError,
    PreparationJob, PreparationService,
};
