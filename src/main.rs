use anyhow::Context;
use clap::{Parser, Subcommand};
use fanout::config::Config;
use fanout::github::{GitHubClient, SourceControl};
use fanout::job::{JobEvent, JobStatus};
use fanout::llm::OpenRouterClient;
use fanout::orchestrator::{EditRequest, ExpandRequest, Orchestrator};
use fanout::scheduler::DEFAULT_CONCURRENCY;

#[derive(Parser)]
#[command(
    name = "fanout",
    version,
    about = "Fan one AI edit instruction across many repository files"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List your repositories
    Repos,
    /// List the files on a branch
    Tree {
        /// Repository in owner/name form
        repo: String,
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// Edit files in place on a branch
    Edit {
        /// Repository in owner/name form
        repo: String,
        /// The instruction applied to every file
        #[arg(short = 'm', long)]
        instruction: String,
        #[arg(long, default_value = "main")]
        branch: String,
        /// Max files generating at once (falls back to the config file)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Files to edit
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Edit files on a fresh branch and open a pull request
    Bulk {
        /// Repository in owner/name form
        repo: String,
        /// The instruction applied to every file
        #[arg(short = 'm', long)]
        instruction: String,
        /// Base branch the working branch is cut from
        #[arg(long, default_value = "main")]
        branch: String,
        /// Max files generating at once (falls back to the config file)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Files to edit
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Plan and create new files next to seed files
    Expand {
        /// Repository in owner/name form
        repo: String,
        /// The goal the planned files should serve
        #[arg(short = 'm', long)]
        goal: String,
        #[arg(long, default_value = "main")]
        branch: String,
        /// Max files generating at once (falls back to the config file)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Seed files to plan from
        #[arg(required = true)]
        seeds: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load();
    let github = GitHubClient::new(github_token(&config)?)?;

    match cli.command {
        Command::Repos => {
            for repo in github.list_repositories().await? {
                let marker = if repo.private { " (private)" } else { "" };
                println!("{}{}", repo.full_name, marker);
            }
        }
        Command::Tree { repo, branch } => {
            for node in github.list_tree(&repo, &branch).await? {
                if node.is_file() {
                    println!("{}", node.path);
                }
            }
        }
        Command::Edit {
            repo,
            instruction,
            branch,
            concurrency,
            paths,
        } => {
            let orch = orchestrator(&config, github, concurrency)?;
            watch(&orch);
            let summary = orch
                .multi_file_edit(EditRequest {
                    repo,
                    branch,
                    instruction,
                    paths,
                })
                .await;
            eprintln!("done: {}", summary);
            if summary.failed > 0 && summary.success == 0 && summary.skipped == 0 {
                std::process::exit(1);
            }
        }
        Command::Bulk {
            repo,
            instruction,
            branch,
            concurrency,
            paths,
        } => {
            let orch = orchestrator(&config, github, concurrency)?;
            watch(&orch);
            let outcome = orch
                .bulk_edit(EditRequest {
                    repo,
                    branch,
                    instruction,
                    paths,
                })
                .await?;
            eprintln!("done: {} on {}", outcome.summary, outcome.branch);
            match outcome.pull_request {
                Some(pr) => println!("{}", pr.url),
                None => eprintln!("no commits landed, no pull request opened"),
            }
        }
        Command::Expand {
            repo,
            goal,
            branch,
            concurrency,
            seeds,
        } => {
            let orch = orchestrator(&config, github, concurrency)?;
            watch(&orch);
            let outcome = orch
                .expand(ExpandRequest {
                    repo,
                    branch,
                    goal,
                    seeds,
                })
                .await?;
            for (seed, reason) in &outcome.seed_failures {
                eprintln!("  plan failed for {}: {}", seed, reason);
            }
            eprintln!("done: {}", outcome.summary);
        }
    }
    Ok(())
}

fn github_token(config: &Config) -> anyhow::Result<String> {
    config.github_token().with_context(|| {
        format!(
            "no GitHub token; set GITHUB_TOKEN or add github_token to {}",
            Config::config_location()
        )
    })
}

fn orchestrator(
    config: &Config,
    github: GitHubClient,
    concurrency: Option<usize>,
) -> anyhow::Result<Orchestrator<GitHubClient, OpenRouterClient>> {
    let concurrency = concurrency
        .or(config.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);
    let api_key = config.api_key().with_context(|| {
        format!(
            "no OpenRouter API key; set OPENROUTER_API_KEY or add openrouter_api_key to {}",
            Config::config_location()
        )
    })?;
    let completion = OpenRouterClient::new(api_key, config.model())?;
    Ok(Orchestrator::new(github, completion).with_concurrency(concurrency))
}

/// Print job progress as it happens and wire Ctrl-C to cancellation.
fn watch<G, C>(orch: &Orchestrator<G, C>)
where
    G: SourceControl + 'static,
    C: fanout::llm::Completion + 'static,
{
    let mut events = orch.board.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                JobEvent::Status {
                    id,
                    status: JobStatus::Failed,
                    error,
                } => {
                    eprintln!("  failed {}: {}", id, error.unwrap_or_default());
                }
                JobEvent::Status { id, status, .. } if status != JobStatus::Queued => {
                    eprintln!("  {} {}", status.label(), id);
                }
                JobEvent::Committed { id, revision, .. } => {
                    eprintln!("  committed {} ({})", id, revision);
                }
                _ => {}
            }
        }
    });

    let cancel = orch.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling: in-flight files will finish, queued files will not start");
            cancel.cancel();
        }
    });
}
