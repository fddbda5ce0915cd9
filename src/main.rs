use a2a_dispatch::a2a::agent_card::{build_coordinator_card, build_provider_card};
use a2a_dispatch::a2a::auth::{AuthState, BearerToken};
use a2a_dispatch::a2a::calculator::{Calculator, Skill};
use a2a_dispatch::a2a::coordinator::CoordinatorContext;
use a2a_dispatch::a2a::dispatch::{DelegationRequest, Dispatcher};
use a2a_dispatch::a2a::handler::{ProviderContext, ReplyMode};
use a2a_dispatch::a2a::resolver;
use a2a_dispatch::a2a::server::{
    CoordinatorState, ProviderState, bind_address, coordinator_router, provider_router, serve,
};
use a2a_dispatch::config::Settings;
use a2a_dispatch::logging;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "a2a-dispatch", version, about = "Agent-to-agent delegation over A2A JSON-RPC")]
struct Cli {
    /// Config file (default: ~/.a2a-dispatch/config.toml)
    #[arg(short, long, global = true, env = "A2A_CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the calculator capability provider
    Provider {
        #[command(flatten)]
        serve: ServeArgs,

        /// Answer message/send with a bare message or a completed task
        #[arg(long, value_parser = parse_reply_mode)]
        reply_mode: Option<ReplyMode>,
    },
    /// Serve the coordinator, delegating to the configured provider
    Coordinator {
        #[command(flatten)]
        serve: ServeArgs,

        #[command(flatten)]
        target: TargetArgs,
    },
    /// Delegate one problem and print the outcome
    Delegate {
        problem: String,

        #[command(flatten)]
        target: TargetArgs,

        /// Bearer token to present to the provider
        #[arg(long)]
        token: Option<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fetch and print a remote agent card
    Resolve {
        url: String,

        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Args)]
struct TargetArgs {
    /// Base URL of the provider agent
    #[arg(long)]
    target_url: Option<String>,

    /// Name used for the provider in messages
    #[arg(long)]
    target_name: Option<String>,

    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn parse_reply_mode(s: &str) -> Result<ReplyMode, String> {
    match s {
        "message" => Ok(ReplyMode::Message),
        "task" => Ok(ReplyMode::Task),
        other => Err(format!("unknown reply mode '{}', expected message or task", other)),
    }
}

impl ServeArgs {
    fn apply(self, settings: &mut Settings) {
        if let Some(bind) = self.bind {
            settings.server.bind = bind;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

impl TargetArgs {
    fn apply(self, settings: &mut Settings) {
        if let Some(url) = self.target_url {
            settings.delegation.target_url = Some(url);
        }
        if let Some(name) = self.target_name {
            settings.delegation.target_name = name;
        }
        if let Some(secs) = self.timeout_secs.filter(|s| *s > 0) {
            settings.delegation.timeout_secs = secs;
        }
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    let _log_guard = logging::init(&settings.logging)?;

    match cli.command {
        Command::Provider { serve, reply_mode } => {
            serve.apply(&mut settings);
            if let Some(mode) = reply_mode {
                settings.provider.reply_mode = mode;
            }
            runtime()?.block_on(run_provider(settings))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Coordinator { serve, target } => {
            serve.apply(&mut settings);
            target.apply(&mut settings);
            runtime()?.block_on(run_coordinator(settings))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Delegate {
            problem,
            target,
            token,
            json,
        } => {
            target.apply(&mut settings);
            let token = token.map(BearerToken::new).or_else(|| settings.auth_token());
            let request = DelegationRequest::new(
                problem,
                settings.delegation.target_name.clone(),
                settings.delegation.target_url.clone(),
            )
            .with_token(token);

            let outcome = Dispatcher::new(settings.dispatch_config()).delegate_blocking(request);
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", outcome.content);
            }
            Ok(if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Resolve { url, token } => {
            let token = token.map(BearerToken::new).or_else(|| settings.auth_token());
            let card = runtime()?.block_on(async {
                let client = reqwest::Client::new();
                resolver::resolve(&client, &url, token.as_ref()).await
            })?;
            println!("{}", serde_json::to_string_pretty(&card)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_provider(settings: Settings) -> anyhow::Result<()> {
    let skill: Arc<dyn Skill> = Arc::new(Calculator);
    let card = build_provider_card(&settings.public_url(), vec![skill.descriptor()], true);
    let state = ProviderState {
        ctx: ProviderContext::new(skill, settings.provider.reply_mode)
            .with_task_capacity(settings.provider.task_capacity),
        card: Arc::new(card),
    };
    let router = provider_router(state, AuthState::new(settings.auth_token()));
    let addr = bind_address(&settings.server.bind, settings.server.port)?;
    serve(router, addr, "provider").await
}

async fn run_coordinator(settings: Settings) -> anyhow::Result<()> {
    let target_name = settings.delegation.target_name.clone();
    if settings.delegation.target_url.is_none() {
        tracing::warn!(
            target_agent = %target_name,
            "No delegation.target_url configured; every delegation will fail"
        );
    }

    let card = build_coordinator_card(&settings.public_url(), &target_name);
    let state = CoordinatorState {
        ctx: CoordinatorContext::new(
            Dispatcher::new(settings.dispatch_config()),
            target_name,
            settings.delegation.target_url.clone(),
        ),
        card: Arc::new(card),
    };
    let router = coordinator_router(state, AuthState::new(settings.auth_token()));
    let addr = bind_address(&settings.server.bind, settings.server.port)?;
    serve(router, addr, "coordinator").await
}
