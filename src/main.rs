//! Xcode autoprovision CLI
//!
//! Entry point for the `autoprovision` command-line tool.

use clap::{ArgAction, Args, Parser, Subcommand};
use log::{info, LevelFilter};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use xcode_autoprovision::{
    BuildSettingsSource, Capability, ConfigOverrides, DistributionType, Entitlements, Platform,
    ProjectFileSettings, ProjectHelper, ProvisionConfig, ReconcileInput, ReconcileOptions,
    Reconciler, SettingsSourceKind, SigningOutputs, SnapshotPortal, TeamResolution,
    XcodebuildSettings,
};

#[derive(Parser)]
#[command(name = "autoprovision")]
#[command(about = "Resolve Xcode code signing assets for CI", version)]
struct Cli {
    /// Increase logging verbosity (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file (default: autoprovision.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the archivable targets and what they need for signing
    Inspect {
        #[command(flatten)]
        project: ProjectArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Select certificates and profiles, creating missing profiles
    Provision {
        #[command(flatten)]
        project: ProjectArgs,

        /// development, app-store, ad-hoc or enterprise
        #[arg(long)]
        distribution_type: Option<String>,

        /// Replace profiles expiring within this many days
        #[arg(long)]
        min_profile_days_valid: Option<u32>,

        /// Allow creating missing profiles (true/false)
        #[arg(long)]
        generate_profiles: Option<bool>,

        /// JSON snapshot of the developer account
        #[arg(long)]
        portal_snapshot: Option<PathBuf>,

        /// Directory of .mobileprovision files
        #[arg(long)]
        profiles_dir: Option<PathBuf>,

        /// Append output variables to this file
        #[arg(long)]
        output_env: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ProjectArgs {
    /// .xcodeproj or .xcworkspace path
    #[arg(long, short = 'p')]
    project: Option<PathBuf>,

    /// Scheme to archive
    #[arg(long, short = 's')]
    scheme: Option<String>,

    /// Build configuration (default: the scheme's archive configuration)
    #[arg(long)]
    configuration: Option<String>,

    /// Build settings source: xcodebuild or project
    #[arg(long)]
    settings_source: Option<String>,
}

/// Project facts gathered before reconciliation.
struct ProjectFacts {
    project_path: PathBuf,
    scheme: String,
    configuration: String,
    main_target: String,
    platform: Platform,
    team: TeamResolution,
    codesign_identity: String,
    main_bundle_id: String,
    targets: BTreeMap<String, Entitlements>,
}

#[derive(Serialize)]
struct InspectReport {
    project: String,
    scheme: String,
    configuration: String,
    main_target: String,
    platform: Platform,
    team_id: Option<String>,
    team_status: &'static str,
    codesign_identity: String,
    targets: Vec<TargetReport>,
}

#[derive(Serialize)]
struct TargetReport {
    bundle_id: String,
    capabilities: Vec<Capability>,
    entitlements: serde_json::Value,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Inspect { project, json } => {
            run_inspect(cli.config, project, json);
        }
        Commands::Provision {
            project,
            distribution_type,
            min_profile_days_valid,
            generate_profiles,
            portal_snapshot,
            profiles_dir,
            output_env,
            json,
        } => {
            let distribution_type = match distribution_type.map(|d| d.parse::<DistributionType>()) {
                Some(Ok(d)) => Some(d),
                Some(Err(e)) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
                None => None,
            };
            let overrides = ConfigOverrides {
                distribution_type,
                min_profile_days_valid,
                generate_profiles,
                portal_snapshot,
                profiles_dir,
                output_env,
                ..project_overrides(project)
            };
            run_provision(cli.config, overrides, json);
        }
    }
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }
    builder.init();
}

fn project_overrides(args: ProjectArgs) -> ConfigOverrides {
    let settings_source = match args.settings_source.map(|s| s.parse::<SettingsSourceKind>()) {
        Some(Ok(kind)) => Some(kind),
        Some(Err(e)) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
        None => None,
    };
    ConfigOverrides {
        project_path: args.project,
        scheme: args.scheme,
        configuration: args.configuration,
        settings_source,
        ..Default::default()
    }
}

fn load_config(config_path: Option<PathBuf>, overrides: ConfigOverrides) -> ProvisionConfig {
    let mut config = match ProvisionConfig::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };
    config.apply_overrides(overrides);
    if let Err(e) = config.ensure_complete() {
        eprintln!("Configuration error: {}", e);
        process::exit(1);
    }
    config
}

/// Error message followed by causes not already part of it.
fn describe(e: &dyn Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str("\n  caused by: ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

fn exit_with(context: &str, e: &dyn Error) -> ! {
    eprintln!("{}: {}", context, describe(e));
    process::exit(1);
}

fn collect_project(config: &ProvisionConfig) -> ProjectFacts {
    let (Some(project_path), Some(scheme)) = (config.project_path.clone(), config.scheme.clone())
    else {
        eprintln!("Configuration error: project_path and scheme are required");
        process::exit(1);
    };

    let source: Box<dyn BuildSettingsSource> = match config.settings_source {
        SettingsSourceKind::Xcodebuild => Box::new(XcodebuildSettings::default()),
        SettingsSourceKind::Project => Box::new(ProjectFileSettings),
    };

    eprintln!("Opening {} (scheme {})...", project_path.display(), scheme);
    let mut helper = match ProjectHelper::new(
        &project_path,
        &scheme,
        config.configuration.as_deref(),
        source,
    ) {
        Ok(h) => h,
        Err(e) => exit_with("Error opening project", &e),
    };

    let configuration = helper.configuration().to_string();
    let main_target = helper.main_target().name.clone();

    let platform = helper
        .platform(&configuration)
        .unwrap_or_else(|e| exit_with("Error reading platform", &e));
    let team = helper.project_team_id(&configuration);
    let codesign_identity = helper
        .target_codesign_identity(&main_target, &configuration)
        .unwrap_or_else(|e| exit_with("Error reading codesign identity", &e));
    let main_bundle_id = helper
        .main_target_bundle_id()
        .unwrap_or_else(|e| exit_with("Error reading bundle id", &e));
    let targets = helper
        .archivable_target_bundle_id_to_entitlements()
        .unwrap_or_else(|e| exit_with("Error reading archivable targets", &e));

    ProjectFacts {
        project_path,
        scheme,
        configuration,
        main_target,
        platform,
        team,
        codesign_identity,
        main_bundle_id,
        targets,
    }
}

fn run_inspect(config_path: Option<PathBuf>, args: ProjectArgs, json: bool) {
    let config = load_config(config_path, project_overrides(args));
    let facts = collect_project(&config);

    let team_status = match facts.team {
        TeamResolution::Determined(_) => "determined",
        TeamResolution::Ambiguous { .. } => "ambiguous",
        TeamResolution::Unset => "unset",
    };
    let report = InspectReport {
        project: facts.project_path.display().to_string(),
        scheme: facts.scheme,
        configuration: facts.configuration,
        main_target: facts.main_target,
        platform: facts.platform,
        team_id: facts.team.team_id().map(str::to_string),
        team_status,
        codesign_identity: facts.codesign_identity,
        targets: facts
            .targets
            .iter()
            .map(|(bundle_id, entitlements)| TargetReport {
                bundle_id: bundle_id.clone(),
                capabilities: entitlements.capabilities(),
                entitlements: entitlements.to_json(),
            })
            .collect(),
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    println!("Project: {}", report.project);
    println!("  Scheme: {}", report.scheme);
    println!("  Configuration: {}", report.configuration);
    println!("  Main target: {}", report.main_target);
    println!("  Platform: {}", report.platform);
    println!(
        "  Team: {} ({})",
        report.team_id.as_deref().unwrap_or("-"),
        report.team_status
    );
    if !report.codesign_identity.is_empty() {
        println!("  Codesign identity: {}", report.codesign_identity);
    }
    println!();
    println!("Archivable targets:");
    for target in &report.targets {
        let services: Vec<&str> = target.capabilities.iter().map(|c| c.service).collect();
        if services.is_empty() {
            println!("  {}", target.bundle_id);
        } else {
            println!("  {} [{}]", target.bundle_id, services.join(", "));
        }
    }
}

fn run_provision(config_path: Option<PathBuf>, overrides: ConfigOverrides, json: bool) {
    let config = load_config(config_path, overrides);
    let facts = collect_project(&config);

    let mut portal = match config.portal_snapshot {
        Some(ref path) => {
            SnapshotPortal::from_file(path).unwrap_or_else(|e| exit_with("Error loading portal snapshot", &e))
        }
        None => SnapshotPortal::default(),
    };
    if let Some(ref dir) = config.profiles_dir {
        match portal.load_profiles_dir(dir) {
            Ok(count) => info!("Loaded {} profiles from {}", count, dir.display()),
            Err(e) => exit_with("Error loading profiles", &e),
        }
    }

    let input = ReconcileInput {
        targets: facts.targets,
        main_bundle_id: facts.main_bundle_id,
        platform: facts.platform,
        team: facts.team,
        codesign_identity: facts.codesign_identity,
        distribution: config.distribution_type,
    };
    let options = ReconcileOptions {
        min_profile_days_valid: config.min_profile_days_valid,
        generate_profiles: config.generate_profiles,
        ..Default::default()
    };

    eprintln!(
        "Reconciling {} target(s) for {} distribution...",
        input.targets.len(),
        config.distribution_type
    );
    let resolution = Reconciler::new(&mut portal, options)
        .reconcile(&input)
        .unwrap_or_else(|e| exit_with("Code signing reconciliation failed", &e));

    let outputs = SigningOutputs::from_resolution(&resolution, config.distribution_type);
    if json {
        match outputs.to_json() {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        print!("{}", outputs.to_env_lines());
    }

    if let Some(ref path) = config.output_env {
        if let Err(e) = outputs.append_to(path) {
            eprintln!("Error writing {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}
