mod helper;

use mockito::{Matcher, Server};
use rstest::rstest;
use serde_json::json;

use helper::{FixedBuildLookup, release_body, row};
use nvidia_align::changelog::sources::GitHubChangelogSource;
use nvidia_align::changelog::types::{AmiFamily, AmiType, Architecture, RawReleaseRow};
use nvidia_align::changelog::{self, ReleaseBodyParser, RowOrigin};
use nvidia_align::nodegroup::draft::ScalingConfig;
use nvidia_align::nodegroup::extract::{NodegroupDescription, NodegroupExtractor};
use nvidia_align::nodegroup::NodegroupConfigDraft;
use nvidia_align::version::catalog::ReleaseCatalog;
use nvidia_align::version::driver_package::DriverPackageFormatter;
use nvidia_align::version::error::AlignmentError;
use nvidia_align::version::matcher::MatchKind;
use nvidia_align::version::release::{ReleaseVersionFormatter, format_release_version};
use nvidia_align::version::resolver::{AlignmentRequest, AlignmentResolver, Strategy};
use nvidia_align::version::token::VersionToken;

#[rstest]
#[case("570", "570")]
#[case("570.124.06", "570.124.06")]
#[case("570.124.06-1.amzn2023", "570.124.06")]
#[case("535.183.01-1ubuntu1", "535.183.01")]
fn token_display_round_trips_numeric_prefix(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(VersionToken::parse(input).unwrap().to_display_string(), expected);
}

#[test]
fn major_token_is_prefix_of_full_version() {
    let full = VersionToken::parse("570.124.6").unwrap();

    assert!(VersionToken::parse("570").unwrap().is_prefix_of(&full));
    assert!(!VersionToken::parse("571").unwrap().is_prefix_of(&full));
}

#[test]
fn latest_for_prefers_newest_release() {
    let catalog = ReleaseCatalog::build(&[
        row("v20241001", "1.32", "AL2023_ARM_64_NVIDIA", "569.0.0", "2024-10-01"),
        row("v20241121", "1.32", "AL2023_ARM_64_NVIDIA", "570.124.06", "2024-11-21"),
    ]);

    let latest = catalog.latest_for("1.32", Architecture::Arm64).unwrap();

    assert_eq!(latest.release_tag, "v20241121");
    assert_eq!(latest.driver_version_raw, "570.124.06");
}

#[test]
fn ami_first_on_al2_only_pair_warns_about_deprecation() {
    let catalog = ReleaseCatalog::build(&[row(
        "v20241121",
        "1.31",
        "AL2_x86_64_GPU",
        "550.127.05",
        "2024-11-21",
    )]);
    let resolver = AlignmentResolver::new(&catalog, DriverPackageFormatter::default());

    let resolved = resolver
        .resolve(&AlignmentRequest::AmiFirst {
            kubernetes_version: "1.31".to_string(),
            architecture: Architecture::X86_64,
            ami_type: None,
        })
        .unwrap();

    assert!(resolved.al2_deprecation_warning);
    assert_eq!(resolved.entry.ami_type, AmiType::Al2X86_64Gpu);
}

fn driver_catalog() -> ReleaseCatalog {
    ReleaseCatalog::build(&[
        row("v20240901", "1.31", "AL2023_x86_64_NVIDIA", "569.0.0", "2024-09-01"),
        row("v20241001", "1.31", "AL2023_x86_64_NVIDIA", "570.86.10", "2024-10-01"),
        row("v20241121", "1.31", "AL2023_x86_64_NVIDIA", "570.124.06", "2024-11-21"),
    ])
}

#[test]
fn container_first_major_only_request_prefers_newest_major_match() {
    let catalog = driver_catalog();
    let resolver = AlignmentResolver::new(&catalog, DriverPackageFormatter::default());

    let resolved = resolver
        .resolve(&AlignmentRequest::ContainerFirst {
            driver_version: "570".to_string(),
            architecture: Architecture::X86_64,
            kubernetes_version: None,
        })
        .unwrap();

    assert_eq!(resolved.match_kind, MatchKind::Major);
    assert_eq!(resolved.matched_driver_version, "570.124.06");
    assert_eq!(resolved.candidates_considered, 2);
    assert_eq!(resolved.strategy, Strategy::ContainerFirst);
    assert_eq!(resolved.requested_driver_version.as_deref(), Some("570"));
}

#[test]
fn container_first_without_shared_major_fails() {
    let catalog = driver_catalog();
    let resolver = AlignmentResolver::new(&catalog, DriverPackageFormatter::default());

    let err = resolver
        .resolve(&AlignmentRequest::ContainerFirst {
            driver_version: "999.0.0".to_string(),
            architecture: Architecture::X86_64,
            kubernetes_version: Some("1.31".to_string()),
        })
        .unwrap_err();

    let AlignmentError::NoCompatibleRelease { request } = &err else {
        panic!("expected NoCompatibleRelease, got {err:?}");
    };
    assert_eq!(request.requested_driver.as_deref(), Some("999.0.0"));
    assert_eq!(request.kubernetes_version.as_deref(), Some("1.31"));
}

#[test]
fn release_version_takes_patch_from_changelog_kubelet() {
    let catalog = ReleaseCatalog::build(&[RawReleaseRow {
        kubelet_version: Some("1.32.3-eks-473151a".to_string()),
        ..row("v20250610", "1.32", "AL2023_x86_64_NVIDIA", "570.148.08", "2025-06-10")
    }]);

    let formatted = format_release_version(&catalog.entries()[0], "20250610", "eu-west-1").unwrap();

    assert_eq!(formatted, "1.32.3-20250610");
}

#[test]
fn draft_from_described_config_drops_update_strategy() {
    let draft = NodegroupConfigDraft::from_template(&json!({
        "clusterName": "prod",
        "nodegroupName": "gpu",
        "updateConfig": { "maxUnavailablePercentage": 25, "updateStrategy": "MINIMAL" },
        "updateStrategy": "MINIMAL"
    }))
    .unwrap();

    let output = draft.to_cli_input_json().unwrap();

    assert!(!output.contains("updateStrategy"));
    assert!(output.contains("maxUnavailablePercentage"));
}

#[test]
fn scaling_checks_min_against_max_first() {
    let scaling = ScalingConfig {
        min_size: 5,
        max_size: 3,
        desired_size: 4,
    };

    let err = scaling.validate().unwrap_err();

    assert_eq!(
        err,
        AlignmentError::InvalidScalingConfig {
            min: 5,
            max: 3,
            desired: 4,
            reason: "minSize cannot be greater than maxSize".to_string(),
        }
    );
}

#[tokio::test]
async fn changelog_to_extracted_nodegroup() {
    let mut server = Server::new_async().await;
    let releases = json!([
        {
            "tag_name": "v20250610",
            "published_at": "2025-06-10T20:00:00Z",
            "body": release_body("1.32", "1.32.3-eks-473151a", "570.148.08-1.amzn2023", "570.148.08-1.amzn2023"),
            "draft": false,
            "prerelease": false
        },
        {
            "tag_name": "v20250224",
            "published_at": "2025-02-24T20:00:00Z",
            "body": release_body("1.32", "1.32.1-eks-5e0fdde", "570.86.15-1.amzn2023", "570.86.15-1.amzn2023"),
            "draft": false,
            "prerelease": false
        }
    ]);
    let mock = server
        .mock("GET", "/repos/awslabs/amazon-eks-ami/releases")
        .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(releases.to_string())
        .create_async()
        .await;

    let source = GitHubChangelogSource::new(&server.url());
    let parser = ReleaseBodyParser::new();
    let (rows, origin) =
        changelog::load_rows(&source, None, &parser, "awslabs/amazon-eks-ami", false)
            .await
            .unwrap();
    mock.assert_async().await;
    assert_eq!(origin, RowOrigin::Source);
    assert_eq!(rows.len(), 4);

    let catalog = ReleaseCatalog::build(&rows);
    assert!(catalog.skipped().is_empty());
    let resolver = AlignmentResolver::new(&catalog, DriverPackageFormatter::default());
    // The region recommends the newer release; the matched one is still
    // published with a bare build id, so the patch comes from the kubelet row
    let lookup = FixedBuildLookup::default()
        .with_build(
            "1.32",
            Architecture::Arm64,
            AmiFamily::Al2023,
            "1.32.3-20250610",
        )
        .with_release("v20250224", "20250224");
    let releases = ReleaseVersionFormatter::new(&lookup, "eu-west-1");
    let extractor = NodegroupExtractor::new(&resolver, &releases);

    let serde_json::Value::Object(config) = json!({
        "clusterName": "prod",
        "nodegroupName": "gpu-arm",
        "version": "1.32",
        "releaseVersion": "1.32.0-20250101",
        "amiType": "AL2023_ARM_64_NVIDIA",
        "instanceTypes": ["g5g.xlarge"],
        "scalingConfig": { "minSize": 0, "maxSize": 2, "desiredSize": 1 },
        "updateConfig": { "maxUnavailable": 1, "updateStrategy": "DEFAULT" },
        "status": "ACTIVE"
    }) else {
        unreachable!()
    };
    let description = NodegroupDescription {
        cluster_name: "prod".to_string(),
        nodegroup_name: "gpu-arm".to_string(),
        kubernetes_version: "1.32".to_string(),
        architecture: Architecture::Arm64,
        driver_version: Some("570.86.15".to_string()),
        config,
    };

    let extraction = extractor
        .extract(&description, Strategy::ContainerFirst)
        .await
        .unwrap();

    assert_eq!(extraction.resolved.entry.release_tag, "v20250224");
    assert_eq!(extraction.resolved.match_kind, MatchKind::Exact);
    assert_eq!(extraction.release_version, "1.32.1-20250224");
    assert_eq!(
        extraction.resolved.container.tag,
        "570_570.86.15-0ubuntu1"
    );
    let json = serde_json::to_value(&extraction.draft).unwrap();
    assert_eq!(json["releaseVersion"], "1.32.1-20250224");
    assert_eq!(json["amiType"], "AL2023_ARM_64_NVIDIA");
    assert!(json["updateConfig"].get("updateStrategy").is_none());
    assert!(json.get("status").is_none());
    assert!(extraction.warnings.is_empty());
}
