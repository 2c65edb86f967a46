// main.rs - jsrecon command line
// Purpose: Parse the CLI into a PipelineConfig, run the requested pipeline
//          stages and/or GitHub recon, and map the outcome to an exit code

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use colored::*;
use jsrecon::config::{parse_analysis_tools, parse_extensions, parse_status_codes, FuzzMode, PipelineConfig};
use jsrecon::context::RunContext;
use jsrecon::github::client::ReqwestTransport;
use jsrecon::github::GitHubRecon;
use jsrecon::http::ReqwestProbe;
use jsrecon::pipeline::{Orchestrator, PipelineRequest};
use jsrecon::summary::{print_github_summary, print_run_summary};
use jsrecon::tools::secrets::parse_scan_tools;
use jsrecon::tools::{find_in_path, ProcessInvoker};
use jsrecon::{Stage, Target};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const KNOWN_TOOLS: &[&str] = &[
    "waybackurls", "gau", "katana", "jsluice", "trufflehog", "gitleaks", "git", "python3",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Command {
    Gather,
    Verify,
    Deduplicate,
    Download,
    Analyze,
    Fuzz,
    Report,
    Github,
}

impl Command {
    fn stage(self) -> Option<Stage> {
        match self {
            Command::Gather => Some(Stage::Gather),
            Command::Verify => Some(Stage::Verify),
            Command::Deduplicate => Some(Stage::Deduplicate),
            Command::Download => Some(Stage::Download),
            Command::Analyze => Some(Stage::Analyze),
            Command::Fuzz => Some(Stage::Fuzz),
            Command::Report => Some(Stage::Report),
            Command::Github => None,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    Default,
    Aggressive,
    Respectful,
}

/// jsrecon - JavaScript reconnaissance pipeline and GitHub secret recon
#[derive(Parser, Debug)]
#[command(
    name = "jsrecon",
    version,
    about = "JavaScript reconnaissance pipeline with GitHub secret recon",
    after_help = r#"
STAGES (always executed in this order, whatever order they are given in):

  gather -> verify -> deduplicate -> download -> analyze -> fuzz -> report

  github runs as a separate workflow over the same targets.

EXAMPLES:

  Full pipeline:
    jsrecon gather verify deduplicate download analyze report -t example.com

  Re-verify an existing URL list without a gather artifact:
    jsrecon verify --independent --input urls.txt -t example.com

  Fuzz for hidden JS files next to the live ones:
    jsrecon fuzz --fuzz-mode both --fuzz-wordlist words.txt -t example.com

  GitHub recon (token read from GITHUB_TOKEN):
    jsrecon github -t acme --github-scan-tools gitleaks --github-skip-clone

OUTPUT:

  <output>/<target>/<stage>/artifact.json   versioned stage artifacts
  <output>/<target>/downloads/files/        content-addressed JS files
  <output>/<target>/report/report.md        target report
  <output>/<target>/progress.jsonl          stage event log
  <output>/github_recon/                    GitHub recon results
"#
)]
struct Args {
    /// Stages to run and/or `github`
    #[arg(value_enum, required_unless_present = "check_tools", num_args = 1..)]
    commands: Vec<Command>,

    // ═══════════════════════════════════════════════════════════════════════════
    // TARGET OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Targets (domains, or GitHub orgs/users/keywords)
    #[arg(short, long, value_delimiter = ',', value_name = "TARGET", help_heading = "Target Options")]
    targets: Vec<String>,

    /// File of targets, one per line (# for comments)
    #[arg(short = 'f', long, value_name = "FILE", help_heading = "Target Options")]
    targets_file: Option<PathBuf>,

    /// Explicit input file or directory for the first stage (every stage with --independent)
    #[arg(short, long, value_name = "PATH", help_heading = "Target Options")]
    input: Option<PathBuf>,

    /// Run each stage on --input only, never reading another stage's artifact
    #[arg(long, requires = "input", help_heading = "Target Options")]
    independent: bool,

    /// Output root directory
    #[arg(short, long, default_value = "jsrecon_output", value_name = "DIR", help_heading = "Output")]
    output: PathBuf,

    // ═══════════════════════════════════════════════════════════════════════════
    // PIPELINE OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Concurrency preset
    #[arg(long, value_enum, default_value = "default", help_heading = "Performance")]
    preset: Preset,

    /// Targets processed concurrently
    #[arg(long, value_name = "NUM", help_heading = "Performance")]
    parallel_targets: Option<usize>,

    /// Discovery sources: w=waybackurls g=gau k=katana
    #[arg(long, value_name = "LETTERS", help_heading = "Gather")]
    gather_mode: Option<String>,

    /// Katana crawl depth
    #[arg(long, value_name = "DEPTH", help_heading = "Gather")]
    depth: Option<u32>,

    /// Analysis tools: jsluice, jsluice-urls, jsluice-secrets, trufflehog, linkfinder, secretfinder
    #[arg(long, value_name = "LIST", help_heading = "Analyze")]
    analysis_tools: Option<String>,

    /// Parallel analysis processes
    #[arg(long, value_name = "NUM", help_heading = "Analyze")]
    analysis_threads: Option<usize>,

    /// Path to LinkFinder's linkfinder.py
    #[arg(long, value_name = "FILE", help_heading = "Analyze")]
    linkfinder_script: Option<PathBuf>,

    /// Path to SecretFinder's SecretFinder.py
    #[arg(long, value_name = "FILE", help_heading = "Analyze")]
    secretfinder_script: Option<PathBuf>,

    // ═══════════════════════════════════════════════════════════════════════════
    // FUZZ OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// wordlist, permutation, both or off
    #[arg(long, default_value = "off", value_name = "MODE", help_heading = "Fuzz")]
    fuzz_mode: String,

    #[arg(long, value_name = "FILE", help_heading = "Fuzz")]
    fuzz_wordlist: Option<PathBuf>,

    #[arg(long, value_name = "NUM", help_heading = "Fuzz")]
    fuzz_threads: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECONDS", help_heading = "Fuzz")]
    fuzz_timeout: Option<u64>,

    /// Status codes that count as a hit
    #[arg(long, default_value = "200,403,401", value_name = "CODES", help_heading = "Fuzz")]
    fuzz_status_codes: String,

    #[arg(long, default_value = "js", value_name = "EXTS", help_heading = "Fuzz")]
    fuzz_extensions: String,

    // ═══════════════════════════════════════════════════════════════════════════
    // GITHUB OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// API token (unauthenticated rate limits without it)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, value_name = "TOKEN", help_heading = "GitHub")]
    github_token: Option<String>,

    #[arg(long, default_value = "10", value_name = "NUM", help_heading = "GitHub")]
    github_max_repos: usize,

    /// trufflehog, gitleaks or all
    #[arg(long, default_value = "all", value_name = "LIST", help_heading = "GitHub")]
    github_scan_tools: String,

    /// Fetch repository content through the API instead of cloning
    #[arg(long, help_heading = "GitHub")]
    github_skip_clone: bool,

    // ═══════════════════════════════════════════════════════════════════════════
    // LOGGING & TOOLS
    // ═══════════════════════════════════════════════════════════════════════════

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Logging")]
    verbose: u8,

    /// Warnings and errors only, no banner or progress bars
    #[arg(short, long, conflicts_with = "verbose", help_heading = "Logging")]
    quiet: bool,

    /// List which external tools are installed and exit
    #[arg(long, help_heading = "Tool Management")]
    check_tools: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    if args.check_tools {
        check_tools_status();
        return ExitCode::SUCCESS;
    }
    if !args.quiet {
        print_banner();
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "[-]".red().bold(), e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("jsrecon={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns whether every requested stage and workflow succeeded.
async fn run(args: Args) -> Result<bool> {
    let targets = collect_targets(&args).await?;
    let stages: Vec<Stage> = args.commands.iter().filter_map(|c| c.stage()).collect();
    let github = args.commands.contains(&Command::Github);
    let config = build_config(&args)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "[!] Interrupt received, stopping after in-flight cleanup...".yellow().bold());
            warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let http_timeout = [
        config.verify.timeout,
        config.dedup.timeout,
        config.download.timeout,
        config.fuzz.timeout,
    ]
    .into_iter()
    .max()
    .unwrap_or(Duration::from_secs(30));
    let http = ReqwestProbe::new(http_timeout).context("failed to create HTTP client")?;
    let github_timeout = config.github.request_timeout;

    let ctx = RunContext::new(
        &args.output,
        config,
        Arc::new(ProcessInvoker::new()),
        Arc::new(http),
        cancel,
    )
    .with_progress_bars(!args.quiet);

    let mut success = true;

    if !stages.is_empty() {
        let orchestrator = Orchestrator::new(ctx.clone());
        let request = PipelineRequest {
            targets: targets.clone(),
            stages,
            input: args.input.clone(),
            independent: args.independent,
        };
        let outcome = orchestrator.run(&request).await.context("pipeline could not start")?;
        if !args.quiet {
            print_run_summary(&outcome, &ctx.store).await;
        }
        success &= outcome.success();
    }

    if github {
        let transport = ReqwestTransport::new(github_timeout).context("failed to create GitHub client")?;
        let recon = GitHubRecon::new(&ctx, Arc::new(transport));
        match recon.run(&targets).await {
            Ok(report) => {
                if !args.quiet {
                    print_github_summary(&report);
                }
                println!(
                    "{} GitHub results saved to {}",
                    "[+]".green().bold(),
                    recon.output_dir().display()
                );
                success &= !report.interrupted;
            }
            Err(e) if e.is_configuration() => return Err(e).context("GitHub recon could not start"),
            Err(e) => {
                error!(error = %e, "GitHub recon failed");
                success = false;
            }
        }
    }

    Ok(success)
}

async fn collect_targets(args: &Args) -> Result<Vec<Target>> {
    let mut names: Vec<String> = args.targets.clone();
    if let Some(file) = &args.targets_file {
        let content = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("cannot read targets file {}", file.display()))?;
        names.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }

    let mut targets: Vec<Target> = Vec::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        let target = Target::new(name);
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    if targets.is_empty() {
        bail!("no targets given (use --targets or --targets-file)");
    }
    Ok(targets)
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match args.preset {
        Preset::Default => PipelineConfig::default(),
        Preset::Aggressive => PipelineConfig::aggressive(),
        Preset::Respectful => PipelineConfig::respectful(),
    };

    if let Some(n) = args.parallel_targets {
        config.max_parallel_targets = n;
    }
    if let Some(mode) = &args.gather_mode {
        config.gather.mode = mode.to_lowercase();
    }
    if let Some(depth) = args.depth {
        config.gather.depth = depth;
    }

    if let Some(tools) = &args.analysis_tools {
        config.analyze.tools = parse_analysis_tools(tools)?;
    }
    if let Some(n) = args.analysis_threads {
        config.analyze.threads = n;
    }
    config.analyze.linkfinder_script = args.linkfinder_script.clone();
    config.analyze.secretfinder_script = args.secretfinder_script.clone();

    config.fuzz.mode = args.fuzz_mode.parse::<FuzzMode>()?;
    config.fuzz.wordlist = args.fuzz_wordlist.clone();
    if let Some(n) = args.fuzz_threads {
        config.fuzz.threads = n;
    }
    if let Some(secs) = args.fuzz_timeout {
        config.fuzz.timeout = Duration::from_secs(secs);
    }
    config.fuzz.status_codes = parse_status_codes(&args.fuzz_status_codes)?;
    config.fuzz.extensions = parse_extensions(&args.fuzz_extensions);

    config.github.token = args.github_token.clone();
    config.github.max_repos = args.github_max_repos;
    config.github.scan_tools = parse_scan_tools(&args.github_scan_tools)?;
    config.github.skip_clone = args.github_skip_clone;

    Ok(config)
}

fn check_tools_status() {
    println!("{}", "External tools:".cyan().bold());
    for tool in KNOWN_TOOLS {
        match find_in_path(tool) {
            Some(path) => println!("  {} {:<12} {}", "[+]".green(), tool, path.display()),
            None => println!("  {} {:<12} {}", "[-]".red(), tool, "not found".red()),
        }
    }
}

fn print_banner() {
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", "  jsrecon - JavaScript & GitHub Reconnaissance".white().bold());
    println!("{}", "  gather | verify | dedup | download | analyze | fuzz | github".white());
    println!("{}", "═══════════════════════════════════════════════════════════════\n".cyan().bold());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_builds_config() {
        let args = Args::parse_from([
            "jsrecon",
            "verify",
            "gather",
            "github",
            "-t",
            "example.com,acme",
            "--fuzz-mode",
            "both",
            "--fuzz-status-codes",
            "200,302",
            "--github-scan-tools",
            "gitleaks",
            "--preset",
            "respectful",
        ]);
        assert_eq!(args.targets, vec!["example.com", "acme"]);
        assert!(args.commands.contains(&Command::Github));

        let config = build_config(&args).unwrap();
        assert_eq!(config.fuzz.mode, FuzzMode::Both);
        assert!(config.fuzz.status_codes.contains(&302));
        assert_eq!(config.max_parallel_targets, 1);
        assert_eq!(config.github.scan_tools.len(), 1);
    }

    #[test]
    fn test_independent_requires_input() {
        assert!(Args::try_parse_from(["jsrecon", "verify", "--independent", "-t", "a.com"]).is_err());
    }
}
