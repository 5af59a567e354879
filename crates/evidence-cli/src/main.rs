use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use evidence_core::{
    fsio, sha256_file, Config, EvidenceDocument, IngestRecord, SuiteType, TestManifest,
};
use evidence_ingest::{load_payload, GitHubClient, SourceRunVerifier};
use evidence_policy::{build_policy_input, write_policy_input, PolicyPackage, PolicySigner};
use evidence_publish::{compose_and_publish, snapshot, ComposeInputs, ComposeOptions};
use evidence_tests::{
    definitions_for, merge_manifests, run_suite, validate_manifest, MergeOptions, ProducerOptions,
};
use evidence_verify::{source_from_base, PublicVerifier};

/// Every stage is configured through the environment (see `EVIDENCE_CONFIG` for a file).
#[derive(Parser)]
#[command(name = "evidence", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect deploy and test facts into current/policy/policy-input.json
    BuildPolicyInput,

    /// Sign the deploy policy and write its provenance record
    SignPolicy,

    /// Evaluate the unit suite and write its evidence bundle
    UnitTestEvidence,

    /// Evaluate the e2e suite and write its evidence bundle
    E2eTestEvidence,

    /// Merge downloaded producer manifests into the publication root
    MergeManifests,

    /// Re-check the merged manifest and its artifacts
    ValidateManifest,

    /// Check a deploy dispatch against the CI platform and record the result
    VerifySourceRun,

    /// Build and publish current/evidence.json
    ComposeEvidence,

    /// Archive current/ under history/ and update the index
    SnapshotHistory,

    /// Independently verify a published evidence tree
    VerifyPublished,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match run(cli.cmd) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn produce(cfg: &Config, suite: SuiteType) -> anyhow::Result<()> {
    let opts = ProducerOptions::from_config(cfg, suite);
    let out = run_suite(&definitions_for(suite), &opts)
        .with_context(|| format!("{} evidence", suite.as_str()))?;
    let failed = out.failed_tests();
    if !failed.is_empty() {
        // The aggregator is the gate; the producer only records.
        warn!(failed = ?failed, "some tests failed; evidence written anyway");
    }
    println!(
        "Wrote {} {} test(s) to {}",
        out.manifest.test_evidence.len(),
        suite.as_str(),
        out.manifest_path.display()
    );
    Ok(())
}

fn run(cmd: Command) -> anyhow::Result<()> {
    let cfg = Config::from_env().context("loading configuration")?;

    match cmd {
        Command::BuildPolicyInput => {
            let ingest: IngestRecord = fsio::read_json(&cfg.ingest_record_path())
                .context("reading source run record")?;
            let manifest: TestManifest =
                fsio::read_json(&cfg.merged_manifest_path()).context("reading merged manifest")?;
            let input = build_policy_input(
                &ingest,
                &manifest,
                &cfg.requirements.test_ids,
                &cfg.requirements.deploy_jobs,
            );
            let path = cfg.policy_input_path();
            let digest = write_policy_input(&path, &input)?;
            println!("Wrote {} (sha256 {digest})", path.display());
        }
        Command::SignPolicy => {
            let input_sha = sha256_file(&cfg.policy_input_path()).context("hashing policy input")?;
            let signer = PolicySigner::from_config(&cfg)?;
            let package = PolicyPackage::from_config(&cfg);
            let provenance = signer.sign(
                &package,
                &input_sha,
                &cfg.policy_source_url(),
                &cfg.provenance_path(),
            )?;
            println!(
                "Signed {} (sha256 {}); provenance at {}",
                provenance.policy.file_path,
                provenance.policy.sha256,
                cfg.provenance_path().display()
            );
        }
        Command::UnitTestEvidence => produce(&cfg, SuiteType::Unit)?,
        Command::E2eTestEvidence => produce(&cfg, SuiteType::E2e)?,
        Command::MergeManifests => {
            let opts = MergeOptions::from_config(&cfg);
            let merged = merge_manifests(&opts).context("merging test evidence")?;
            println!(
                "Merged {} test(s) into {}",
                merged.test_evidence.len(),
                opts.output_path.display()
            );
        }
        Command::ValidateManifest => {
            let path = cfg.merged_manifest_path();
            let manifest =
                validate_manifest(&path, &cfg.requirements.test_ids, &cfg.publication_root())
                    .with_context(|| format!("validating {}", path.display()))?;
            println!("Manifest OK: {} test(s)", manifest.test_evidence.len());
        }
        Command::VerifySourceRun => {
            let payload =
                load_payload(&cfg.dispatch_payload_path()).context("reading dispatch payload")?;
            let client = GitHubClient::from_config(&cfg)?;
            let record = SourceRunVerifier::from_config(&client, &cfg).verify(&payload)?;
            let path = cfg.ingest_record_path();
            fsio::write_json_atomic(&path, &record)?;
            println!(
                "Verified deploy run {} for {}@{}; wrote {}",
                record.deploy.run_id,
                record.source.repo,
                record.source.commit_sha,
                path.display()
            );
        }
        Command::ComposeEvidence => {
            let inputs = ComposeInputs::load(&cfg).context("loading composition inputs")?;
            let (doc, path) = compose_and_publish(&inputs, &ComposeOptions::from_config(&cfg))?;
            println!(
                "Published {} ({} tests, {} assertions)",
                path.display(),
                doc.tests.evidence.len(),
                doc.assertion_summary.total
            );
        }
        Command::SnapshotHistory => {
            let doc: EvidenceDocument = fsio::read_json(&cfg.evidence_path())
                .context("reading published evidence")?;
            let entry = snapshot(&cfg.publication_root(), &doc)?;
            println!("Archived snapshot {}", entry.snapshot);
        }
        Command::VerifyPublished => {
            let source = source_from_base(&cfg.paths.verify_base)?;
            let report = PublicVerifier::new(source.as_ref()).verify()?;
            println!("Evidence verified");
            println!("Tests: {}", report.tests);
            println!("Artifacts: {}", report.artifacts);
            println!("Assertions: {}", report.assertions);
            println!(
                "Image signatures: {}",
                if report.signatures_checked { "verified" } else { "skipped (cosign not found)" }
            );
        }
    }

    Ok(())
}
