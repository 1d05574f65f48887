// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use instance_api_types::{
    ExistingInstance, FieldError, HardwareCapabilities,
    InstanceBatchCreateRequest, InstanceCreateRequest, InstanceUpdateRequest,
    OperatingSystem, ReconciledBatch, ReconciledInstance,
};
use instance_reconciler::{Reconciler, ReconcilerConfig, ValidationError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use slog::{o, Drain};

/// Exit status for a request the reconciler rejected.
const EXIT_REJECTED: u8 = 2;

#[derive(Debug, Parser)]
#[clap(about, version)]
/// Reconcile an instance request fixture and print the result
struct Args {
    /// Engine configuration file. Defaults apply if omitted.
    #[clap(short, long, action)]
    config: Option<PathBuf>,

    /// Minimum level of log messages written to stderr
    #[clap(long, default_value = "info", value_parser = parse_level)]
    log_level: slog::Level,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile an instance create request
    Create {
        /// JSON fixture holding `request`, `capabilities`, and
        /// `operatingSystem`
        #[clap(action)]
        fixture: PathBuf,
    },

    /// Reconcile a batch instance create request
    BatchCreate {
        /// JSON fixture holding `request`, `capabilities`, and
        /// `operatingSystem`
        #[clap(action)]
        fixture: PathBuf,
    },

    /// Reconcile an instance update request
    Update {
        /// JSON fixture holding `request`, `capabilities`, `instance`, and
        /// `operatingSystem`
        #[clap(action)]
        fixture: PathBuf,
    },

    /// Reconcile the user-data of an operating system definition
    OsUserData {
        /// JSON fixture holding `userData`, `phoneHomeEnabled`, and
        /// optionally the `existing` definition being updated
        #[clap(action)]
        fixture: PathBuf,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFixture {
    request: InstanceCreateRequest,
    #[serde(default)]
    capabilities: HardwareCapabilities,
    operating_system: Option<OperatingSystem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateFixture {
    request: InstanceBatchCreateRequest,
    #[serde(default)]
    capabilities: HardwareCapabilities,
    operating_system: Option<OperatingSystem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateFixture {
    request: InstanceUpdateRequest,
    #[serde(default)]
    capabilities: HardwareCapabilities,
    #[serde(default)]
    instance: ExistingInstance,
    operating_system: Option<OperatingSystem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OsUserDataFixture {
    user_data: Option<String>,
    phone_home_enabled: Option<bool>,
    existing: Option<OperatingSystem>,
}

fn parse_level(level: &str) -> anyhow::Result<slog::Level> {
    level.parse().map_err(|_| anyhow!("unknown log level '{}'", level))
}

fn build_log(level: slog::Level) -> (slog::Logger, slog_async::AsyncGuard) {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    (slog::Logger::root(drain.fuse(), o!()), guard)
}

fn read_fixture<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse fixture {}", path.display()))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ReconcilerConfig> {
    let Some(path) = path else {
        return Ok(ReconcilerConfig::default());
    };
    let cfg = reconciler_config_toml::parse(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    Ok(ReconcilerConfig::from(&cfg))
}

/// Prints a successful result as JSON on stdout, or the field error on
/// stdout with a non-zero exit status.
fn report<T: serde::Serialize>(
    result: Result<T, ValidationError>,
) -> anyhow::Result<ExitCode> {
    match result {
        Ok(out) => {
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let fe = FieldError::from(&e);
            println!("{}", serde_json::to_string_pretty(&fe.as_map())?);
            Ok(ExitCode::from(EXIT_REJECTED))
        }
    }
}

fn run_create(
    reconciler: &Reconciler,
    fixture: &Path,
) -> Result<Result<ReconciledInstance, ValidationError>, anyhow::Error> {
    let f: CreateFixture = read_fixture(fixture)?;
    Ok(reconciler.reconcile_create(
        &f.request,
        &f.capabilities,
        f.operating_system.as_ref(),
    ))
}

fn run_batch_create(
    reconciler: &Reconciler,
    fixture: &Path,
) -> Result<Result<ReconciledBatch, ValidationError>, anyhow::Error> {
    let f: BatchCreateFixture = read_fixture(fixture)?;
    Ok(reconciler.reconcile_batch_create(
        &f.request,
        &f.capabilities,
        f.operating_system.as_ref(),
    ))
}

fn run_update(
    reconciler: &Reconciler,
    fixture: &Path,
) -> Result<Result<ReconciledInstance, ValidationError>, anyhow::Error> {
    let f: UpdateFixture = read_fixture(fixture)?;
    Ok(reconciler.reconcile_update(
        &f.request,
        &f.capabilities,
        &f.instance,
        f.operating_system.as_ref(),
    ))
}

fn run_os_user_data(
    reconciler: &Reconciler,
    fixture: &Path,
) -> Result<Result<Option<String>, ValidationError>, anyhow::Error> {
    let f: OsUserDataFixture = read_fixture(fixture)?;
    let user_data = f.user_data.as_deref();
    Ok(match &f.existing {
        Some(existing) => reconciler.updated_os_user_data(
            user_data,
            f.phone_home_enabled,
            existing,
        ),
        None => reconciler.new_os_user_data(user_data, f.phone_home_enabled),
    })
}

fn main() -> anyhow::Result<ExitCode> {
    let Args { config, log_level, cmd } = Args::parse();

    let (log, _log_async_guard) = build_log(log_level);
    let config = load_config(config.as_deref())?;
    slog::info!(log, "loaded configuration";
        "phone_home_url" => &config.phone_home_url,
        "default_first_physical" => config.default_first_physical,
    );

    let reconciler =
        Reconciler::new(log.new(o!("component" => "reconciler")), config);
    match cmd {
        Command::Create { fixture } => {
            report(run_create(&reconciler, &fixture)?)
        }
        Command::BatchCreate { fixture } => {
            report(run_batch_create(&reconciler, &fixture)?)
        }
        Command::Update { fixture } => {
            report(run_update(&reconciler, &fixture)?)
        }
        Command::OsUserData { fixture } => {
            report(run_os_user_data(&reconciler, &fixture)?)
        }
    }
}
