//! Argument surface for the five modes spec.md §6 names:
//! `--build|--run|--dry-run|--explore|--promote`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "autopilot")]
#[command(about = "Configurator exploration and runner orchestrator")]
pub struct Cli {
    /// Explore a service's configure page and write its draft catalog.
    #[arg(long, conflicts_with_all = ["run", "dry_run", "explore", "promote"])]
    pub build: bool,

    /// Fill a resolved profile's dimensions against live configure pages.
    #[arg(long, conflicts_with_all = ["build", "dry_run", "explore", "promote"])]
    pub run: bool,

    /// Validate profile/locator resolution without touching the page.
    #[arg(long = "dry-run", conflicts_with_all = ["build", "run", "explore", "promote"])]
    pub dry_run: bool,

    /// Explore a service's configure page and write only the exploration
    /// report, without synthesizing or writing a draft catalog.
    #[arg(long, conflicts_with_all = ["build", "run", "dry_run", "promote"])]
    pub explore: bool,

    /// Promote a previously generated draft into the live catalog.
    #[arg(long, conflicts_with_all = ["build", "run", "dry_run", "explore"])]
    pub promote: bool,

    /// Path to the resolved profile document (--run / --dry-run).
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Run the browser without a visible window.
    #[arg(long)]
    pub headless: bool,

    /// Dimension value override, `<group>.<service>.<dimension>=<value>`.
    /// Repeatable.
    #[arg(long = "set")]
    pub overrides: Vec<String>,

    /// Group id to target (--build / --explore / --promote).
    #[arg(long)]
    pub group: Option<String>,

    /// Service id to target (--build / --explore / --promote).
    #[arg(long)]
    pub service: Option<String>,

    /// Configure URL to open (--build / --explore).
    #[arg(long)]
    pub configure_url: Option<String>,

    /// Service card title to wait for once the page loads.
    #[arg(long, default_value = "")]
    pub card_title: String,

    /// Label of the button that opens the service's configure form.
    #[arg(long, default_value = "Configure")]
    pub configure_button_label: String,

    /// WebSocket address of the running browser driver bridge.
    #[arg(long, env = "AUTOPILOT_DRIVER_WS", default_value = "ws://127.0.0.1:9901")]
    pub driver_ws: String,

    /// Root directory draft/exploration/run artifacts are written under.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Build,
    Run,
    DryRun,
    Explore,
    Promote,
}

impl Cli {
    /// Resolves which of the five mutually-exclusive mode flags was set.
    /// `conflicts_with_all` on each flag already rules out more than one
    /// being set; this only has to rule out none being set.
    pub fn mode(&self) -> anyhow::Result<Mode> {
        match (self.build, self.run, self.dry_run, self.explore, self.promote) {
            (true, ..) => Ok(Mode::Build),
            (_, true, ..) => Ok(Mode::Run),
            (_, _, true, ..) => Ok(Mode::DryRun),
            (_, _, _, true, _) => Ok(Mode::Explore),
            (_, _, _, _, true) => Ok(Mode::Promote),
            _ => anyhow::bail!("one of --build, --run, --dry-run, --explore, --promote is required"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn rejects_no_mode_flag() {
        let cli = Cli::parse_from(["autopilot"]);
        assert!(cli.mode().is_err());
    }

    #[test]
    fn accepts_a_single_mode_flag() {
        let cli = Cli::parse_from(["autopilot", "--explore", "--service", "ec2"]);
        assert_eq!(cli.mode().unwrap(), Mode::Explore);
    }

    #[test]
    fn rejects_two_mode_flags() {
        let result = Cli::try_parse_from(["autopilot", "--run", "--explore"]);
        assert!(result.is_err());
    }
}
