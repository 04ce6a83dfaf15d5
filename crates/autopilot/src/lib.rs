//! Browser-driven configurator automation.
//!
//! Two entry points share the same collaborator wiring: runner mode fills
//! a resolved profile's dimensions against live configure pages, and
//! explorer mode walks a configure page's gate-actuated state graph and
//! synthesizes a draft catalog an operator later promotes. See
//! [`orchestrator`] for both control flows.

pub mod collaborators;
pub mod config;
pub mod driver;
pub mod errors;
pub mod explorer;
pub mod interactor;
pub mod locator;
pub mod logging;
pub mod model;
pub mod options;
pub mod orchestrator;
pub mod retry;
pub mod scanner;
pub mod slug;
pub mod synth;

pub use collaborators::{
    CatalogLoader, FixedProfileLoader, FsPromoter, FsScreenshotWriter, InMemoryCatalogLoader,
    ProfileDimension, ProfileDocument, ProfileGroup, ProfileLoader, ProfileService, Promoter,
    RecordingPromoter, ScreenshotWriter,
};
pub use config::RunConfig;
pub use driver::{BrowserDriver, ElementHandle, WsBridgeDriver};
pub use errors::AutopilotError;
pub use model::{
    DimensionOutcome, DimensionResult, DraftCatalog, ExitCode, GroupResult, Metrics, RunResult,
    RunStatus, ServiceResult,
};
pub use orchestrator::{
    draft_path, explore_service, new_run_id, run_profile, write_draft, write_exploration_report,
    write_run_result, ExploreOutcome, ExploreTarget, ExplorationReport,
};
