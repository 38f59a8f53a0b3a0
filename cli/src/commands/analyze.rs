// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One-shot analysis: fan the input out, print answers and consensus.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use concord_core::application::analysis::{AnalysisOutcome, AnalysisService, StandardAnalysisService};
use concord_core::application::orchestrator::{Orchestrator, ProviderRequest};
use concord_core::domain::config::{OrchestratorConfigManifest, OrchestratorConfigSpec, ProviderConfig};
use concord_core::domain::provider::ProviderName;
use concord_core::infrastructure::llm::ProviderRegistry;

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Text to analyse (reads --file or stdin when omitted)
    #[arg(value_name = "TEXT")]
    pub text: Option<String>,

    /// Read the text from a file
    #[arg(short, long, value_name = "FILE", conflicts_with = "text")]
    pub file: Option<PathBuf>,

    /// Provider to ask, as NAME or NAME:MODEL (repeatable; default: all enabled)
    #[arg(short, long = "provider", value_name = "NAME[:MODEL]")]
    pub providers: Vec<String>,

    /// Per-provider timeout in seconds (default: configured value)
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Print the full outcome as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: AnalyzeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let manifest = OrchestratorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    manifest
        .validate()
        .context("Configuration validation failed")?;
    let spec = &manifest.spec;

    let text = read_input(&args)?;
    let timeout = match args.timeout {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .context("--timeout must be a positive number of seconds")?,
        None => spec.per_call_timeout(),
    };

    let requests = if args.providers.is_empty() {
        configured_requests(spec)
    } else {
        let selected = args
            .providers
            .iter()
            .map(|arg| parse_provider_arg(arg))
            .collect::<Result<Vec<_>>>()?;
        selected_requests(spec, selected)
    };

    ensure_dispatchable(&requests)?;

    let registry = Arc::new(ProviderRegistry::from_config(spec));
    let orchestrator = Arc::new(Orchestrator::from_config(spec, registry));
    let service = StandardAnalysisService::new(orchestrator);

    let outcome = service
        .analyze(&text, &requests, timeout)
        .await
        .context("Analysis failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    Ok(())
}

fn read_input(args: &AnalyzeArgs) -> Result<String> {
    let text = if let Some(text) = &args.text {
        text.clone()
    } else if let Some(path) = &args.file {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?
    } else {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    };

    if text.trim().is_empty() {
        bail!("Input text is empty");
    }
    Ok(text)
}

/// Parse `NAME` or `NAME:MODEL`
pub fn parse_provider_arg(arg: &str) -> Result<(ProviderName, Option<String>)> {
    let (name, model) = match arg.split_once(':') {
        Some((name, model)) => (name, Some(model.trim().to_string()).filter(|m| !m.is_empty())),
        None => (arg, None),
    };
    let provider = name
        .trim()
        .parse::<ProviderName>()
        .with_context(|| format!("Invalid --provider value '{}'", arg))?;
    Ok((provider, model))
}

/// Fail early when no request could be sent
pub fn ensure_dispatchable(requests: &[ProviderRequest]) -> Result<()> {
    if requests.is_empty() {
        bail!("No providers enabled. Enable one in the configuration or pass --provider");
    }

    let missing: Vec<&str> = requests
        .iter()
        .filter(|r| r.provider.requires_api_key() && r.api_key().is_none())
        .map(|r| r.provider.api_key_env())
        .collect();
    if missing.len() == requests.len() {
        bail!(
            "No provider has an API key. Set one of: {}",
            missing.join(", ")
        );
    }
    Ok(())
}

/// Requests for every enabled provider, with keys resolved from configuration
pub fn configured_requests(spec: &OrchestratorConfigSpec) -> Vec<ProviderRequest> {
    spec.enabled_providers().map(request_for).collect()
}

/// Requests for explicitly selected providers, in selection order
pub fn selected_requests(
    spec: &OrchestratorConfigSpec,
    selected: Vec<(ProviderName, Option<String>)>,
) -> Vec<ProviderRequest> {
    selected
        .into_iter()
        .map(|(name, model)| {
            let mut request = match spec.provider(name) {
                Some(config) => request_for(config),
                None => request_for(&ProviderConfig::new(name)),
            };
            if model.is_some() {
                request.model = model;
            }
            request
        })
        .collect()
}

fn request_for(config: &ProviderConfig) -> ProviderRequest {
    let mut request = ProviderRequest::new(config.name).with_model(config.model());
    request.api_key = config.resolve_api_key();
    request
}

fn print_outcome(outcome: &AnalysisOutcome) {
    if let Some(info) = &outcome.chunk_info {
        println!(
            "{}",
            format!(
                "Input too large for {}: sent chunk {} of {}",
                info.provider.display_name(),
                info.processing_chunk_index,
                info.total_chunks
            )
            .yellow()
        );
        println!();
    }

    for response in &outcome.responses {
        let header = format!("{} ({})", response.provider().display_name(), response.model());
        match response.error() {
            Some(error) => {
                println!("{} {}", header.bold(), "failed".red());
                println!("  {}", error.red());
            }
            None => {
                println!("{}", header.bold());
                for line in response.response_text().lines() {
                    println!("  {}", line);
                }
            }
        }
        println!();
    }

    let consensus = &outcome.consensus;
    println!("{}", "Consensus:".bold());
    let verdict = if consensus.has_consensus {
        "agreement".green()
    } else {
        "no consensus".yellow()
    };
    println!(
        "  {} across {} model(s), agreement {:.0}%",
        verdict,
        consensus.models_analyzed,
        consensus.agreement_level * 100.0
    );
    for conflict in &consensus.conflicts {
        println!(
            "  {} {} vs {}: {}",
            "conflict".red(),
            conflict.model_a,
            conflict.model_b,
            conflict.detail
        );
    }
    if !consensus.common_points.is_empty() {
        println!("  Common points:");
        for point in &consensus.common_points {
            println!("    - {}", point);
        }
    }
    if !consensus.divergent_points.is_empty() {
        println!("  Divergent points:");
        for point in &consensus.divergent_points {
            println!("    - {}", point);
        }
    }
    println!();
    println!("{}", format!("request {} in {} ms", outcome.request_id, outcome.duration_ms).dimmed());
}
