use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use maestro::config::{Backend, Config};
use maestro::orchestration::Orchestrator;
use maestro::{llm, mlog, mlog_debug, report, Result};

/// Maestro - answer a request with a coordinator and a team of worker agents
#[derive(Parser, Debug)]
#[command(name = "maestro")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    \
    MAESTRO_DEBUG=1          Enable debug logging (alternative to --debug)\n    \
    MAESTRO_BACKEND          ollama | claude\n    \
    MAESTRO_MODEL            Model name\n    \
    MAESTRO_MAX_ITERATIONS   Iteration cap\n    \
    MAESTRO_MAX_STEPS        Scheduler step budget\n    \
    OLLAMA_HOST              Ollama base URL")]
pub struct Cli {
    /// The request, as one or more words
    #[arg(required = true, num_args = 1..)]
    pub prompt: Vec<String>,

    /// Enable debug logging (also written to ~/.maestro/maestro.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Model used by the coordinator and every worker
    #[arg(long)]
    pub model: Option<String>,

    /// Completion backend
    #[arg(long)]
    pub backend: Option<Backend>,

    /// Maximum number of iterations
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Print the final iteration's task graph to stderr
    #[arg(long)]
    pub show_graph: bool,
}

impl Cli {
    fn joined_prompt(&self) -> String {
        self.prompt.join(" ").trim().to_string()
    }

    /// Flags override file and environment settings.
    fn apply_to(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    maestro::log::init_with_debug(cli.debug);

    let prompt = cli.joined_prompt();
    if prompt.is_empty() {
        let _ = Cli::command().print_help();
        eprintln!("\nerror: the prompt must not be empty");
        return ExitCode::from(2);
    }

    match run(&cli, &prompt) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, prompt: &str) -> Result<ExitCode> {
    let mut config = Config::load()?;
    cli.apply_to(&mut config);
    config.validate()?;
    mlog_debug!("Effective config: {:?}", config);
    mlog!(
        "Maestro starting: backend={}, model={}, max_iterations={}",
        config.backend,
        config.model,
        config.max_iterations
    );

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async {
        let port = llm::connect(&config)?;
        let orchestrator = Orchestrator::new(port, config);
        Ok::<_, maestro::Error>(orchestrator.run(prompt).await)
    })?;

    if cli.show_graph {
        if let Some(record) = outcome.last_iteration() {
            eprintln!("{}", report::render_task_tree(prompt, &record.graph));
        }
    }
    eprintln!("{}", report::render_summary(&outcome));

    match outcome.answer {
        Some(answer) if outcome.status.has_answer() => {
            println!("{}", answer);
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}
