//! Defishy CLI - writes build.ninja for a batch of clips
//!
//! Commands: lens-correct, stabilize, lens-correct-stabilize, sweep, plan, rules
//! Outputs JSON to stdout, logs to stderr
//! Run `ninja` afterwards to execute the graph

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use defishy_core::{
    BuildStep, CoefficientSweep, GraphConfig, Linspace, OpenMode, PathDeriver, Pipeline,
    PipelineError, PipelineRequest, RuleRegistry, Workflow,
};

#[derive(Parser)]
#[command(name = "defishy-cli")]
#[command(about = "Defishy CLI - lens correction and stabilization build graphs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ninja file to write (overrides the config)
    #[arg(short, long, global = true)]
    graph: Option<PathBuf>,

    /// Add to the existing ninja file instead of starting over
    #[arg(short, long, global = true)]
    append: bool,

    /// Debug logging for defishy
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct ClipArgs {
    /// Input clips
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Extra ffmpeg flags placed before `-i`, e.g. "-ss 00:00:10 -t 30"
    #[arg(short, long, allow_hyphen_values = true)]
    pre_args: Option<String>,

    /// Also print the shell command of every step
    #[arg(long)]
    print_commands: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Lens correction only
    LensCorrect(ClipArgs),

    /// Two-pass stabilization only
    Stabilize(ClipArgs),

    /// Lens correction, then stabilization
    LensCorrectStabilize(ClipArgs),

    /// Render a still with a grid of lens coefficients
    Sweep {
        /// Still image
        input: PathBuf,

        /// k1 range as start:end:count
        #[arg(long, default_value = "-1:1:21", allow_hyphen_values = true)]
        k1: Linspace,

        /// k2 range as start:end:count
        #[arg(long, default_value = "-0.1:0.1:21", allow_hyphen_values = true)]
        k2: Linspace,

        /// Write an HTML contact sheet of the sweep here
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Show the paths a workflow derives, without writing anything
    Plan {
        #[arg(short, long, value_enum)]
        workflow: WorkflowArg,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// List rule templates
    Rules,
}

#[derive(Clone, Copy, ValueEnum)]
enum WorkflowArg {
    LensCorrect,
    Stabilize,
    LensCorrectStabilize,
}

impl From<WorkflowArg> for Workflow {
    fn from(arg: WorkflowArg) -> Self {
        match arg {
            WorkflowArg::LensCorrect => Workflow::LensCorrectOnly,
            WorkflowArg::Stabilize => Workflow::StabilizeOnly,
            WorkflowArg::LensCorrectStabilize => Workflow::LensCorrectAndStabilize,
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("defishy_core=debug,defishy_cli=debug")
        } else {
            EnvFilter::new("defishy_core=info,defishy_cli=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => println!(r#"{{"success": false, "error": "{}"}}"#, e),
    }
}

fn fail(error: impl std::fmt::Display) -> ExitCode {
    print_json(&serde_json::json!({
        "success": false,
        "error": error.to_string(),
    }));
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match GraphConfig::load_or_default(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(r#"{{"error": "{}"}}"#, e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(graph) = cli.graph {
        config.graph_file = graph;
    }
    let mode = if cli.append { OpenMode::Append } else { OpenMode::Truncate };

    match cli.command {
        Commands::LensCorrect(args) => build(&config, mode, Workflow::LensCorrectOnly, args),
        Commands::Stabilize(args) => build(&config, mode, Workflow::StabilizeOnly, args),
        Commands::LensCorrectStabilize(args) => {
            build(&config, mode, Workflow::LensCorrectAndStabilize, args)
        }
        Commands::Sweep { input, k1, k2, html } => {
            sweep(&config, mode, &input, CoefficientSweep { k1, k2 }, html.as_deref())
        }
        Commands::Plan { workflow, inputs } => plan(&config, workflow.into(), &inputs),
        Commands::Rules => rules(),
    }
}

fn build(config: &GraphConfig, mode: OpenMode, workflow: Workflow, args: ClipArgs) -> ExitCode {
    let requests: Vec<PipelineRequest> = args
        .inputs
        .into_iter()
        .map(|input| PipelineRequest {
            input,
            pre_args: args.pre_args.clone(),
            workflow,
        })
        .collect();

    let result = Pipeline::run(config, mode, |pipeline| {
        let mut steps: Vec<BuildStep> = vec![];
        let mut commands: Vec<String> = vec![];
        for request in &requests {
            let appended = pipeline.submit(request)?;
            if args.print_commands {
                for step in &appended {
                    commands.push(pipeline.render_command(step)?);
                }
            }
            steps.extend(appended);
        }
        Ok::<_, PipelineError>((steps, commands))
    });

    match result {
        Ok(((steps, commands), summary)) => {
            let mut output = serde_json::json!({
                "success": true,
                "graph": summary,
                "steps": steps,
            });
            if args.print_commands {
                output["commands"] = serde_json::json!(commands);
            }
            print_json(&output);
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn sweep(
    config: &GraphConfig,
    mode: OpenMode,
    input: &Path,
    sweep: CoefficientSweep,
    html: Option<&Path>,
) -> ExitCode {
    let result = Pipeline::run(config, mode, |pipeline| pipeline.lens_sweep(input, &sweep));
    let (steps, summary) = match result {
        Ok(r) => r,
        Err(e) => return fail(e),
    };

    if let Some(html_path) = html {
        let page = match defishy_core::sweep::contact_sheet_html(input, &sweep, &config.sweep_dir) {
            Ok(page) => page,
            Err(e) => return fail(e),
        };
        if let Err(e) = fs::write(html_path, page) {
            return fail(format!("Failed to write {}: {}", html_path.display(), e));
        }
        tracing::info!(path = %html_path.display(), "Wrote contact sheet");
    }

    print_json(&serde_json::json!({
        "success": true,
        "graph": summary,
        "steps": steps.len(),
    }));
    ExitCode::SUCCESS
}

fn plan(config: &GraphConfig, workflow: Workflow, inputs: &[PathBuf]) -> ExitCode {
    let deriver = PathDeriver::new(config);
    let mut plans = vec![];
    for input in inputs {
        match deriver.plan(input, workflow) {
            Ok(paths) => plans.push(serde_json::json!({
                "input": input,
                "workflow": workflow,
                "paths": paths,
            })),
            Err(e) => return fail(e),
        }
    }
    print_json(&serde_json::json!(plans));
    ExitCode::SUCCESS
}

fn rules() -> ExitCode {
    let registry = match RuleRegistry::standard() {
        Ok(r) => r,
        Err(e) => return fail(e),
    };
    let rules: Vec<_> = registry
        .list()
        .iter()
        .map(|r| serde_json::json!({
            "name": r.name(),
            "command": r.command.text(),
            "placeholders": r.command.placeholders(),
            "description": r.description,
        }))
        .collect();

    print_json(&serde_json::json!(rules));
    ExitCode::SUCCESS
}
