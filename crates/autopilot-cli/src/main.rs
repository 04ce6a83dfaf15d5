//! Autopilot CLI
//!
//! Mode-dispatch entry point over the exploration/runner orchestrator
//! (spec.md §6 "CLI (mode dispatch)"). Five modes share one binary:
//!
//!   autopilot --run     --profile path/to/profile.json
//!   autopilot --dry-run --profile path/to/profile.json
//!   autopilot --build   --service ec2 --configure-url https://...
//!   autopilot --explore --service ec2 --configure-url https://...
//!   autopilot --promote --service ec2

mod cli;

use clap::Parser;
use tracing::{error, info};

use autopilot::{
    self, AutopilotError, BrowserDriver, FsPromoter, ProfileDocument, Promoter, RunConfig,
};
use cli::{Cli, Mode};

const EXIT_SUCCESS: i32 = 0;
const EXIT_PREFLIGHT_FAILURE: i32 = 1;
const EXIT_PARTIAL_SUCCESS: i32 = 2;
const EXIT_BROWSER_LAUNCH_FAILURE: i32 = 3;
const EXIT_ARTIFACT_WRITE_FAILURE: i32 = 4;

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "autopilot exiting on preflight failure");
            EXIT_PREFLIGHT_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    autopilot::logging::init();
    info!(version = env!("CARGO_PKG_VERSION"), "autopilot starting");

    let cli = Cli::parse();
    let mode = cli.mode()?;
    let cfg = RunConfig::from_env_and_args(RunConfig {
        headless: cli.headless,
        ..RunConfig::default()
    });

    if mode == Mode::Promote {
        return Ok(run_promote(&cli).await);
    }

    let driver = match autopilot::WsBridgeDriver::connect(&cli.driver_ws).await {
        Ok(driver) => driver,
        Err(err) => {
            error!(error = %err, driver_ws = %cli.driver_ws, "browser launch failure");
            return Ok(EXIT_BROWSER_LAUNCH_FAILURE);
        }
    };

    match mode {
        Mode::Run => run_runner(&driver, &cfg, &cli, false).await,
        Mode::DryRun => run_runner(&driver, &cfg, &cli, true).await,
        Mode::Build => run_explorer(&driver, &cfg, &cli, true).await,
        Mode::Explore => run_explorer(&driver, &cfg, &cli, false).await,
        Mode::Promote => unreachable!("handled above"),
    }
}

async fn run_promote(cli: &Cli) -> i32 {
    let Some(service_id) = cli.service.as_deref() else {
        error!("--promote requires --service");
        return EXIT_PREFLIGHT_FAILURE;
    };

    let draft_path = autopilot::draft_path(&cli.root, service_id);
    let body = match tokio::fs::read(&draft_path).await {
        Ok(body) => body,
        Err(err) => {
            error!(error = %err, path = %draft_path.display(), "draft not found");
            return EXIT_PREFLIGHT_FAILURE;
        }
    };
    let draft: autopilot::DraftCatalog = match serde_json::from_slice(&body) {
        Ok(draft) => draft,
        Err(err) => {
            error!(error = %err, path = %draft_path.display(), "draft failed to parse");
            return EXIT_PREFLIGHT_FAILURE;
        }
    };

    let promoter = FsPromoter::new(&cli.root);
    match promoter.promote(&draft).await {
        Ok(()) => {
            info!(service = %service_id, "promoted draft to live catalog");
            EXIT_SUCCESS
        }
        Err(err) => {
            error!(error = %err, service = %service_id, "promotion failed");
            EXIT_ARTIFACT_WRITE_FAILURE
        }
    }
}

async fn run_explorer(
    driver: &dyn BrowserDriver,
    cfg: &RunConfig,
    cli: &Cli,
    write_draft: bool,
) -> anyhow::Result<i32> {
    let (Some(service_id), Some(configure_url)) =
        (cli.service.as_deref(), cli.configure_url.as_deref())
    else {
        error!("--build/--explore require --service and --configure-url");
        return Ok(EXIT_PREFLIGHT_FAILURE);
    };

    let target = autopilot::ExploreTarget {
        service_id: service_id.to_string(),
        configure_url: configure_url.to_string(),
        ui_mapping: autopilot::model::UiMapping {
            search_terms: Vec::new(),
            card_title: cli.card_title.clone(),
            configure_button_label: cli.configure_button_label.clone(),
        },
        region_used: None,
    };

    let generated_at = wall_clock_iso8601();
    let outcome = match autopilot::explore_service(driver, cfg, &target, generated_at).await {
        Ok(outcome) => outcome,
        Err(err) => return Ok(map_automation_error(&err)),
    };

    if let Err(err) =
        autopilot::write_exploration_report(&cli.root, service_id, &outcome.report).await
    {
        error!(error = %err, "failed to write exploration report");
        return Ok(EXIT_ARTIFACT_WRITE_FAILURE);
    }

    if write_draft {
        if let Err(err) = autopilot::write_draft(&cli.root, &outcome.draft).await {
            error!(error = %err, "failed to write draft catalog");
            return Ok(EXIT_ARTIFACT_WRITE_FAILURE);
        }
    }

    Ok(EXIT_SUCCESS)
}

async fn run_runner(
    driver: &dyn BrowserDriver,
    cfg: &RunConfig,
    cli: &Cli,
    dry_run: bool,
) -> anyhow::Result<i32> {
    let Some(profile_path) = cli.profile.as_deref() else {
        error!("--run/--dry-run require --profile");
        return Ok(EXIT_PREFLIGHT_FAILURE);
    };

    let mut profile = match load_profile(profile_path).await {
        Ok(doc) => doc,
        Err(err) => {
            error!(error = %err, path = %profile_path.display(), "profile resolution failed");
            return Ok(EXIT_PREFLIGHT_FAILURE);
        }
    };
    if let Err(err) = apply_overrides(&mut profile, &cli.overrides) {
        error!(error = %err, "--set override failed");
        return Ok(EXIT_PREFLIGHT_FAILURE);
    }

    if dry_run {
        return Ok(preflight_only(driver, &profile).await);
    }

    let run_id = autopilot::new_run_id();
    let result = autopilot::run_profile(
        driver,
        &autopilot::FsScreenshotWriter::new(cli.root.join("artifacts/screenshots")),
        cfg,
        &run_id,
        &profile,
    )
    .await;

    let exit_code = result.exit_code();
    if let Err(err) = autopilot::write_run_result(&cli.root, &result).await {
        error!(error = %err, "failed to write run result");
        return Ok(EXIT_ARTIFACT_WRITE_FAILURE);
    }

    Ok(match exit_code {
        autopilot::ExitCode::Success => EXIT_SUCCESS,
        autopilot::ExitCode::PartialSuccess => EXIT_PARTIAL_SUCCESS,
        autopilot::ExitCode::PreflightFailure => EXIT_PREFLIGHT_FAILURE,
        autopilot::ExitCode::BrowserLaunchFailure => EXIT_BROWSER_LAUNCH_FAILURE,
        autopilot::ExitCode::ArtifactWriteFailure => EXIT_ARTIFACT_WRITE_FAILURE,
        autopilot::ExitCode::Interrupted => 5,
    })
}

/// Dry-run preflight: locates every dimension without filling, failing
/// fast (exit 1) on the first unresolved required dimension. Mirrors
/// spec.md §6's exit code 1 ("preflight failure (validation/resolution/
/// file-not-found)").
async fn preflight_only(driver: &dyn BrowserDriver, profile: &ProfileDocument) -> i32 {
    for group in &profile.groups {
        for service in &group.services {
            if let Err(err) = driver
                .goto(&service.configure_url, autopilot::driver::WaitMode::Load)
                .await
            {
                error!(error = %err, service = %service.service_id, "dry-run navigation failed");
                return EXIT_PREFLIGHT_FAILURE;
            }
            let _ = autopilot::explorer::expand_sections(driver).await;

            for dim in &service.dimensions {
                let located = autopilot::locator::find_element(
                    driver,
                    &dim.key,
                    autopilot::locator::LocateOptions {
                        primary_css: dim.primary_css.as_deref(),
                        required: dim.required,
                        screenshot_dir: None,
                    },
                )
                .await;

                let resolved = matches!(
                    located,
                    Ok(autopilot::locator::LocateResult {
                        status: autopilot::locator::LocateStatus::Found,
                        ..
                    })
                );
                if !resolved && dim.required {
                    error!(
                        event_type = "locator_not_found",
                        service = %service.service_id,
                        dimension = %dim.key,
                        "dry-run preflight failed"
                    );
                    return EXIT_PREFLIGHT_FAILURE;
                }
            }
        }
    }
    EXIT_SUCCESS
}

async fn load_profile(path: &std::path::Path) -> anyhow::Result<ProfileDocument> {
    let body = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&body)?)
}

/// Applies `--set "<group>.<service>.<dimension>=<value>"` overrides onto
/// an already-loaded profile. Every override must match exactly one
/// existing dimension; an override that matches nothing is a preflight
/// failure rather than a silent no-op.
fn apply_overrides(doc: &mut ProfileDocument, overrides: &[String]) -> anyhow::Result<()> {
    for raw in overrides {
        let (path, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--set '{raw}' is missing '='"))?;
        let mut parts = path.splitn(3, '.');
        let group_id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("--set '{raw}' is missing a group segment"))?;
        let service_id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("--set '{raw}' is missing a service segment"))?;
        let dimension_key = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("--set '{raw}' is missing a dimension segment"))?;

        let mut matched = false;
        for group in &mut doc.groups {
            if group.group_id != group_id {
                continue;
            }
            for service in &mut group.services {
                if service.service_id != service_id {
                    continue;
                }
                for dimension in &mut service.dimensions {
                    if dimension.key == dimension_key {
                        dimension.value = value.to_string();
                        matched = true;
                    }
                }
            }
        }
        if !matched {
            anyhow::bail!("--set '{raw}' did not match any known dimension");
        }
    }
    Ok(())
}

fn map_automation_error(err: &AutopilotError) -> i32 {
    if err.fatal() {
        EXIT_ARTIFACT_WRITE_FAILURE
    } else {
        EXIT_PREFLIGHT_FAILURE
    }
}

fn wall_clock_iso8601() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
