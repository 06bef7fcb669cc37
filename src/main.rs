use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use nvidia_align::changelog::sources::GitHubChangelogSource;
use nvidia_align::changelog::types::{AmiType, Architecture};
use nvidia_align::changelog::{self, ReleaseBodyParser, ReleaseCache, RowOrigin};
use nvidia_align::config::{self, AlignConfig};
use nvidia_align::nodegroup::aws::AwsClient;
use nvidia_align::nodegroup::draft::CapacityType;
use nvidia_align::nodegroup::error::ExtractError;
use nvidia_align::nodegroup::extract::{NodegroupExtractor, resolve_kubernetes_version};
use nvidia_align::nodegroup::{Inspection, NodegroupConfigDraft, NodegroupOverrides, inspect};
use nvidia_align::version::catalog::ReleaseCatalog;
use nvidia_align::version::driver_package::{ContainerDriver, DriverPackageFormatter};
use nvidia_align::version::error::AlignmentError;
use nvidia_align::version::kubernetes;
use nvidia_align::version::matcher::{MatchKind, MatchMode, VersionMatcher};
use nvidia_align::version::release::ReleaseVersionFormatter;
use nvidia_align::version::repository::{NvidiaRepository, verified_container_driver};
use nvidia_align::version::resolver::{
    AlignmentRequest, AlignmentResolver, ResolvedAlignment, Strategy,
};
use nvidia_align::version::token::VersionToken;

#[derive(Parser)]
#[command(name = "nvidia-align")]
#[command(
    version,
    about = "Align NVIDIA driver versions between EKS GPU AMIs and container images"
)]
struct Cli {
    /// Ignore the cached changelog and fetch it again
    #[arg(long, global = true)]
    refresh: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    /// AWS profile
    #[arg(long, global = true)]
    profile: Option<String>,

    /// AWS region used for EKS and SSM lookups
    #[arg(long, global = true)]
    region: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/nvidia-align/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ResolveArgs {
    /// ami-first or container-first
    #[arg(long, default_value = "ami-first")]
    strategy: Strategy,

    /// Kubernetes version, e.g. 1.32
    #[arg(long = "k8s-version")]
    kubernetes_version: Option<String>,

    /// Read the Kubernetes version from this cluster
    #[arg(long)]
    cluster: Option<String>,

    #[arg(long, default_value = "x86_64")]
    arch: Architecture,

    /// Restrict AMI-first to one AMI type
    #[arg(long)]
    ami_type: Option<AmiType>,

    /// Driver version used by the containers (container-first)
    #[arg(long)]
    driver_version: Option<String>,
}

#[derive(Args)]
struct OverrideArgs {
    #[arg(long)]
    cluster_name: Option<String>,

    #[arg(long)]
    nodegroup_name: Option<String>,

    #[arg(long)]
    node_role: Option<String>,

    #[arg(long, value_delimiter = ',')]
    subnets: Option<Vec<String>>,

    #[arg(long, value_delimiter = ',')]
    instance_types: Option<Vec<String>>,

    #[arg(long)]
    capacity_type: Option<CapacityType>,

    /// Root volume size in GiB
    #[arg(long)]
    disk_size: Option<u32>,

    #[arg(long)]
    min_size: Option<i64>,

    #[arg(long)]
    max_size: Option<i64>,

    #[arg(long)]
    desired_size: Option<i64>,
}

impl From<OverrideArgs> for NodegroupOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            cluster_name: args.cluster_name,
            nodegroup_name: args.nodegroup_name,
            node_role: args.node_role,
            subnets: args.subnets,
            instance_types: args.instance_types,
            capacity_type: args.capacity_type,
            disk_size: args.disk_size,
            min_size: args.min_size,
            max_size: args.max_size,
            desired_size: args.desired_size,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Resolve an AMI release and the matching container driver
    Align {
        #[command(flatten)]
        resolve: ResolveArgs,

        /// Also look up the regional releaseVersion
        #[arg(long)]
        release_version: bool,

        /// Read package versions from the NVIDIA repository
        #[arg(long)]
        check_packages: bool,
    },

    /// List AMI releases whose driver matches a version
    Search {
        driver_version: String,

        #[arg(long, default_value = "x86_64")]
        arch: Architecture,

        #[arg(long = "k8s-version")]
        kubernetes_version: Option<String>,

        /// exact, major-only or fuzzy
        #[arg(long, default_value = "fuzzy")]
        mode: MatchMode,
    },

    /// List known Kubernetes and driver versions
    ListVersions {
        #[arg(long)]
        arch: Option<Architecture>,
    },

    /// Rewrite existing node groups against a resolved release
    Extract {
        #[arg(long)]
        cluster: String,

        /// Node groups to rewrite
        #[arg(long = "nodegroup", required = true)]
        nodegroups: Vec<String>,

        #[arg(long, default_value = "ami-first")]
        strategy: Strategy,

        /// Driver version used by the containers (container-first)
        #[arg(long)]
        driver_version: Option<String>,

        /// Write one create-nodegroup document per node group here
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Show the NVIDIA driver running node groups ship
    Inspect {
        #[arg(long)]
        cluster: String,

        /// Node groups to inspect (default: every node group in the cluster)
        #[arg(long = "nodegroup")]
        nodegroups: Vec<String>,

        /// Read package versions from the NVIDIA repository
        #[arg(long)]
        check_packages: bool,
    },

    /// Render a create-nodegroup document for a resolved release
    Template {
        #[command(flatten)]
        resolve: ResolveArgs,

        #[command(flatten)]
        overrides: OverrideArgs,

        /// Start from this JSON template instead of the built-in one
        #[arg(long)]
        input: Option<PathBuf>,

        /// Write the document here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AlignOutput {
    #[serde(flatten)]
    resolved: ResolvedAlignment,
    #[serde(skip_serializing_if = "Option::is_none")]
    release_version: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchHit {
    release_tag: String,
    kubernetes_version: String,
    ami_type: AmiType,
    driver_version: String,
    release_date: chrono::NaiveDate,
    match_kind: MatchKind,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KubernetesVersion {
    version: String,
    al2_supported: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionListing {
    kubernetes_versions: Vec<KubernetesVersion>,
    driver_versions: IndexMap<Architecture, Vec<String>>,
}

/// Everything a subcommand needs once the catalog is loaded
struct App {
    config: AlignConfig,
    aws: AwsClient,
    catalog: ReleaseCatalog,
}

impl App {
    fn packages(&self) -> DriverPackageFormatter {
        DriverPackageFormatter::new(
            &self.config.container.ubuntu_version,
            &self.config.container.os_tag,
        )
        .with_base_url(&self.config.container.repository_url)
    }

    fn repository(&self) -> NvidiaRepository {
        NvidiaRepository::new(&self.config.container.repository_url)
    }

    async fn request(&self, args: &ResolveArgs) -> anyhow::Result<AlignmentRequest> {
        match args.strategy {
            Strategy::AmiFirst => {
                let kubernetes_version = resolve_kubernetes_version(
                    args.kubernetes_version.as_deref(),
                    args.cluster.as_deref(),
                    &self.aws,
                )
                .await?;
                Ok(AlignmentRequest::AmiFirst {
                    kubernetes_version,
                    architecture: args.arch,
                    ami_type: args.ami_type,
                })
            }
            Strategy::ContainerFirst => {
                let Some(driver_version) = args.driver_version.clone() else {
                    bail!("--driver-version is required with --strategy container-first");
                };
                if args.ami_type.is_some() {
                    warn!("--ami-type is ignored by container-first");
                }
                let kubernetes_version =
                    if args.kubernetes_version.is_some() || args.cluster.is_some() {
                        Some(resolve_kubernetes_version(
                            args.kubernetes_version.as_deref(),
                            args.cluster.as_deref(),
                            &self.aws,
                        )
                        .await?)
                    } else {
                        None
                    };
                Ok(AlignmentRequest::ContainerFirst {
                    driver_version,
                    architecture: args.arch,
                    kubernetes_version,
                })
            }
        }
    }

    async fn resolve(&self, args: &ResolveArgs) -> anyhow::Result<ResolvedAlignment> {
        let request = self.request(args).await?;
        let resolver = AlignmentResolver::new(&self.catalog, self.packages());
        let resolved = resolver.resolve(&request)?;
        if resolved.al2_deprecation_warning {
            eprintln!(
                "warning: {} is an AL2 AMI; AL2 GPU AMIs are deprecated since {} and end with Kubernetes {}",
                resolved.entry.ami_type,
                config::AL2_EOL_DATE,
                config::AL2_LAST_KUBERNETES_VERSION
            );
        }
        if resolved.match_kind != MatchKind::Exact {
            eprintln!(
                "warning: no exact driver match; using {} ({} match)",
                resolved.matched_driver_version, resolved.match_kind
            );
        }
        Ok(resolved)
    }

    async fn release_version(&self, resolved: &ResolvedAlignment) -> anyhow::Result<String> {
        let releases = ReleaseVersionFormatter::new(&self.aws, self.aws.region());
        Ok(releases.release_version(&resolved.entry).await?)
    }

    /// Replace the computed package versions with the ones the repository publishes
    async fn check_packages(
        &self,
        container: &mut ContainerDriver,
        driver: &VersionToken,
        architecture: Architecture,
    ) -> anyhow::Result<()> {
        *container =
            verified_container_driver(&self.repository(), &self.packages(), driver, architecture)
                .await?;
        for package in &container.missing_packages {
            eprintln!("warning: {package} is not published for driver {driver}");
        }
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(debug: bool) -> anyhow::Result<WorkerGuard> {
    let log_path = config::log_path();
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;
    let file_name = log_path
        .file_name()
        .context("Log path has no file name")?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));
    let filter = if debug {
        EnvFilter::new("nvidia_align=debug")
    } else {
        EnvFilter::try_from_env("NVIDIA_ALIGN_LOG")
            .unwrap_or_else(|_| EnvFilter::new("nvidia_align=info"))
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);

    if std::env::var("NVIDIA_ALIGN_LOG_FORMAT").is_ok_and(|format| format == "json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }

    Ok(guard)
}

async fn load_catalog(config: &AlignConfig, refresh: bool) -> anyhow::Result<ReleaseCatalog> {
    let data_dir = config::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let cache = match ReleaseCache::new(&config::db_path(), config.changelog.refresh_interval) {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!("Release cache unavailable: {}", e);
            None
        }
    };
    let source = GitHubChangelogSource::default()
        .with_paging(config.changelog.per_page, config.changelog.pages)
        .with_token(std::env::var("GITHUB_TOKEN").ok());
    let parser = ReleaseBodyParser::new();
    let repository = &config.changelog.repository;

    let (rows, origin) =
        changelog::load_rows(&source, cache.as_ref(), &parser, repository, refresh).await?;
    if origin == RowOrigin::StaleCache {
        eprintln!("warning: could not refresh the {repository} changelog; using cached releases");
    }

    let catalog = ReleaseCatalog::build(&rows);
    info!(
        "Catalog holds {} releases ({} rows skipped)",
        catalog.len(),
        catalog.skipped().len()
    );
    if catalog.is_empty() {
        bail!("No GPU AMI releases found in the {repository} changelog");
    }
    Ok(catalog)
}

fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let config = AlignConfig::load(&config_path)?;
    let profile = cli.profile.clone().unwrap_or_else(|| config.aws.profile.clone());
    let region = cli.region.clone().unwrap_or_else(|| config.aws.region.clone());
    let aws = AwsClient::new(Some(&profile), &region).await;

    let catalog = load_catalog(&config, cli.refresh).await?;
    let app = App {
        config,
        aws,
        catalog,
    };

    match cli.command {
        Command::Align {
            resolve,
            release_version,
            check_packages,
        } => {
            let mut resolved = app.resolve(&resolve).await?;
            if check_packages {
                app.check_packages(
                    &mut resolved.container,
                    &resolved.entry.driver_version,
                    resolved.entry.architecture,
                )
                .await?;
            }
            let release_version = if release_version {
                Some(app.release_version(&resolved).await?)
            } else {
                None
            };
            print_json(&AlignOutput {
                resolved,
                release_version,
            })
        }
        Command::Search {
            driver_version,
            arch,
            kubernetes_version,
            mode,
        } => {
            let candidates = match kubernetes_version.as_deref() {
                Some(k8s) => app.catalog.find_by_version(k8s, arch, None),
                None => app.catalog.find_by_architecture(arch, None),
            };
            let hits: Vec<SearchHit> = VersionMatcher
                .match_candidates(&driver_version, &candidates, mode)?
                .into_iter()
                .map(|(entry, match_kind)| SearchHit {
                    release_tag: entry.release_tag.clone(),
                    kubernetes_version: entry.kubernetes_version.clone(),
                    ami_type: entry.ami_type,
                    driver_version: entry.driver_version_raw.clone(),
                    release_date: entry.release_date,
                    match_kind,
                })
                .collect();
            print_json(&hits)
        }
        Command::ListVersions { arch } => {
            let architectures = match arch {
                Some(arch) => vec![arch],
                None => vec![Architecture::X86_64, Architecture::Arm64],
            };
            let listing = VersionListing {
                kubernetes_versions: app
                    .catalog
                    .list_known_kubernetes_versions()
                    .into_iter()
                    .map(|version| KubernetesVersion {
                        al2_supported: kubernetes::is_al2_supported(&version),
                        version,
                    })
                    .collect(),
                driver_versions: architectures
                    .into_iter()
                    .map(|arch| (arch, app.catalog.list_known_driver_versions(arch)))
                    .collect(),
            };
            print_json(&listing)
        }
        Command::Extract {
            cluster,
            nodegroups,
            strategy,
            driver_version,
            output_dir,
        } => {
            let resolver = AlignmentResolver::new(&app.catalog, app.packages());
            let releases = ReleaseVersionFormatter::new(&app.aws, app.aws.region());
            let extractor = NodegroupExtractor::new(&resolver, &releases);
            if let Some(dir) = &output_dir {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }

            let mut extractions = Vec::with_capacity(nodegroups.len());
            for nodegroup in &nodegroups {
                let mut description = app
                    .aws
                    .describe_nodegroup(&cluster, nodegroup)
                    .await
                    .map_err(ExtractError::from)?;
                description.driver_version = driver_version.clone();
                let extraction = extractor.extract(&description, strategy).await?;
                for warning in &extraction.warnings {
                    eprintln!("warning: {}: {}", nodegroup, warning);
                }
                if let Some(dir) = &output_dir {
                    let path = dir.join(format!("{nodegroup}.json"));
                    write_file(&path, &extraction.draft.to_cli_input_json()?)?;
                    eprintln!("wrote {}", path.display());
                }
                extractions.push(extraction);
            }
            print_json(&extractions)
        }
        Command::Inspect {
            cluster,
            nodegroups,
            check_packages,
        } => {
            let nodegroups = if nodegroups.is_empty() {
                app.aws.list_nodegroups(&cluster).await?
            } else {
                nodegroups
            };
            let packages = app.packages();

            let mut inspections: Vec<Inspection> = Vec::with_capacity(nodegroups.len());
            for nodegroup in &nodegroups {
                let description = app.aws.describe_nodegroup(&cluster, nodegroup).await?;
                let mut inspection = inspect(&description, &app.catalog, &packages);
                if check_packages {
                    let entry = inspection.release_tag.as_deref().and_then(|tag| {
                        inspection
                            .ami_type
                            .as_deref()
                            .and_then(|ami_type| ami_type.parse::<AmiType>().ok())
                            .and_then(|ami_type| {
                                app.catalog
                                    .find_by_release(&description.kubernetes_version, tag, ami_type)
                            })
                    });
                    if let (Some(entry), Some(container)) = (entry, inspection.container.as_mut()) {
                        app.check_packages(container, &entry.driver_version, entry.architecture)
                            .await?;
                    }
                }
                if let Some(note) = &inspection.note {
                    eprintln!("note: {nodegroup}: {note}");
                }
                inspections.push(inspection);
            }
            print_json(&inspections)
        }
        Command::Template {
            resolve,
            overrides,
            input,
            output,
        } => {
            let resolved = app.resolve(&resolve).await?;
            let release_version = app.release_version(&resolved).await?;

            let mut draft = match &input {
                Some(path) => {
                    let contents = std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let template: serde_json::Value = serde_json::from_str(&contents)
                        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
                    NodegroupConfigDraft::from_template(&template)?
                }
                None => NodegroupConfigDraft::sample(resolved.entry.architecture),
            };
            let mut overrides = NodegroupOverrides::from(overrides);
            if overrides.cluster_name.is_none() {
                overrides.cluster_name = resolve.cluster.clone();
            }
            overrides.apply(&mut draft);
            draft.apply_alignment(&resolved, &release_version)?;
            draft.validate()?;
            for warning in draft.warnings(resolved.entry.architecture) {
                eprintln!("warning: {warning}");
            }

            let json = draft.to_cli_input_json()?;
            match &output {
                Some(path) => {
                    write_file(path, &json)?;
                    eprintln!("wrote {}", path.display());
                    Ok(())
                }
                None => {
                    println!("{json}");
                    Ok(())
                }
            }
        }
    }
}

/// Suggestions for resolution failures
fn hints(err: &anyhow::Error) -> Vec<String> {
    let alignment = err.chain().find_map(|cause| {
        cause.downcast_ref::<AlignmentError>().or_else(|| {
            match cause.downcast_ref::<ExtractError>() {
                Some(ExtractError::Alignment(e)) => Some(e),
                _ => None,
            }
        })
    });
    let Some(alignment) = alignment else {
        return Vec::new();
    };

    let mut hints = Vec::new();
    match alignment {
        AlignmentError::MalformedVersion { .. } => {
            hints.push("Driver versions look like 570.124.06, 570.124 or 570".to_string());
        }
        AlignmentError::NoReleaseForVersion { request } => {
            hints.push("Run `nvidia-align list-versions` to see known Kubernetes versions".to_string());
            if request.ami_type == Some(AmiType::Al2X86_64Gpu)
                && request
                    .kubernetes_version
                    .as_deref()
                    .is_some_and(|k8s| !kubernetes::is_al2_supported(k8s))
            {
                hints.push(format!(
                    "AL2 GPU AMIs end with Kubernetes {}; use --ami-type {}",
                    config::AL2_LAST_KUBERNETES_VERSION,
                    AmiType::Al2023X86_64Nvidia
                ));
            }
        }
        AlignmentError::NoCompatibleRelease { request } => {
            hints.push("Use --strategy ami-first to let the AMI choose the driver".to_string());
            if request.kubernetes_version.is_some() {
                hints.push("Drop --k8s-version to search every Kubernetes version".to_string());
            }
        }
        AlignmentError::UnresolvableRegionalBuild { region, .. } => {
            hints.push(format!(
                "Check that the AMI is published in {region} or pass another --region"
            ));
        }
        AlignmentError::RegionalLookupFailed { .. } => {
            hints.push("Check AWS credentials, --profile and --region".to_string());
        }
        AlignmentError::InvalidScalingConfig { .. } => {
            hints.push("Scaling must satisfy minSize <= desiredSize <= maxSize".to_string());
        }
        AlignmentError::InvalidReleaseVersion(_) => {
            hints.push("releaseVersion must include the Kubernetes patch, e.g. 1.32.3-20250610".to_string());
        }
        AlignmentError::MissingKubernetesVersion => {
            hints.push("Pass --k8s-version or --cluster".to_string());
        }
    }
    hints
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.debug)?;

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli));
    if let Err(e) = &result {
        for hint in hints(e) {
            eprintln!("hint: {hint}");
        }
    }
    result
}
