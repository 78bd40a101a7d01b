use anyhow::{Context, Result};
use stagehand::cli::commands::{
    ControllerCommand, ListCommand, RunCommand, StatusCommand, ValidateCommand,
};
use stagehand::cli::output::*;
use stagehand::cli::{Cli, Command};
use stagehand::core::MAIN_SCREENPLAY;
use stagehand::persistence::PlaySummary;
use stagehand::{
    scheduler, Controller, EngineConfig, Flow, InMemoryPlayStore, Phase, PlayConfig, PlayKey,
    PlayReconciler, PlayStore,
};
use std::sync::Arc;
use tracing::{error, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    match &cli.command {
        Command::Run(cmd) => run_play(cmd, config).await?,
        Command::Validate(cmd) => validate_play(cmd)?,
        Command::List(cmd) => list_plays(cmd, &config).await?,
        Command::Status(cmd) => show_status(cmd, &config).await?,
        Command::Controller(cmd) => run_controller(cmd, config).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn persistent_store(config: &EngineConfig) -> Result<Arc<dyn PlayStore>> {
    let store = match &config.database {
        Some(path) => stagehand::persistence::SqlitePlayStore::new(path).await?,
        None => stagehand::persistence::SqlitePlayStore::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn persistent_store(_config: &EngineConfig) -> Result<Arc<dyn PlayStore>> {
    warn!("Built without sqlite support, plays are kept in memory");
    Ok(Arc::new(InMemoryPlayStore::new()))
}

async fn open_store(config: &EngineConfig, ephemeral: bool) -> Result<Arc<dyn PlayStore>> {
    if ephemeral {
        return Ok(Arc::new(InMemoryPlayStore::new()));
    }
    persistent_store(config).await
}

async fn run_play(cmd: &RunCommand, mut config: EngineConfig) -> Result<()> {
    let play_config = PlayConfig::from_file(&cmd.file).context("Failed to load play")?;
    println!("{} Loaded play: {}", INFO, style(&play_config.name).bold());

    for (key, value) in &cmd.vars {
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }
    let mut play = play_config.instantiate(&cmd.vars)?;
    if let Some(namespace) = &cmd.namespace {
        play.metadata.namespace = namespace.clone();
    }
    if let Some(kind) = cmd.scheduler {
        config.scheduler = kind.into();
    }

    let store = open_store(&config, cmd.no_history).await?;
    if let Some(existing) = store.get(&play.key()).await? {
        if !existing.status.phase.is_terminal() {
            anyhow::bail!(
                "Play {} is still {}, wait for it or use another name",
                existing.key(),
                existing.status.phase
            );
        }
        store.delete(&existing.key()).await?;
    }

    let flow = Flow::new(scheduler::from_config(&config)).with_polarity(config.condition_polarity);
    let reconciler = PlayReconciler::new(flow, store);

    let spinner = create_spinner(format!("Running {}", play.name()));
    let printer = spinner.clone();
    reconciler
        .add_event_handler(move |event| printer.println(format_play_event(&event)))
        .await;

    let key = reconciler.submit(play).await?.key();
    let result = reconciler
        .run_until_terminal(&key, config.poll_interval())
        .await;
    spinner.finish_and_clear();
    let play = result?;

    let (succeeded, failed) = play.status.counts();
    match play.status.phase {
        Phase::Complete => {
            println!(
                "\n{} {} completed {} ({} frames)",
                CHECK,
                style(play.name()).bold(),
                style("successfully").green(),
                succeeded
            );
            Ok(())
        }
        phase => {
            println!(
                "\n{} {} {} ({} succeeded, {} failed)",
                CROSS,
                style(play.name()).bold(),
                format_phase(phase),
                succeeded,
                failed
            );
            error!("Play {} ended in phase {}", key, phase);
            std::process::exit(1);
        }
    }
}

fn validate_play(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating play...", INFO);

    let result = PlayConfig::from_file(&cmd.file)
        .and_then(|config| config.instantiate(&cmd.vars).map(|play| (config, play)));

    match result {
        Ok((config, play)) => {
            println!("{} Play definition is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Namespace: {}", style(&config.namespace).cyan());
            println!("  Screenplays: {}", style(config.screenplays.len()).cyan());
            if let Some(main) = play.screenplay(MAIN_SCREENPLAY) {
                println!("  Scenes: {}", style(main.scenes.len()).cyan());
                println!("  Frames: {}", style(main.frames().count()).cyan());
            }
            println!("  Variables: {}", style(config.vars.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_plays(cmd: &ListCommand, config: &EngineConfig) -> Result<()> {
    let store = open_store(config, false).await?;
    let summaries: Vec<PlaySummary> = store
        .list()
        .await?
        .iter()
        .filter(|p| cmd.namespace.as_deref().map_or(true, |ns| p.namespace() == ns))
        .map(PlaySummary::from)
        .collect();

    if cmd.json {
        let data = serde_json::json!({ "plays": summaries });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("{} No plays found", INFO);
        return Ok(());
    }
    println!("{} Plays:", INFO);
    for summary in &summaries {
        println!("  {}", format_play_summary(summary));
    }
    Ok(())
}

async fn show_status(cmd: &StatusCommand, config: &EngineConfig) -> Result<()> {
    let store = open_store(config, false).await?;
    let namespace = cmd.namespace.clone().unwrap_or_else(|| config.namespace.clone());
    let key = PlayKey::new(namespace, &cmd.name);

    match store.get(&key).await? {
        Some(play) if cmd.json => println!("{}", serde_json::to_string_pretty(&play)?),
        Some(play) => println!("{}", format_play_details(&play)),
        None => println!("{} Play {} not found", WARN, key),
    }
    Ok(())
}

async fn run_controller(cmd: &ControllerCommand, mut config: EngineConfig) -> Result<()> {
    if let Some(kind) = cmd.scheduler {
        config.scheduler = kind.into();
    }
    let workers = cmd.workers.unwrap_or(config.workers);

    let store = open_store(&config, false).await?;
    let flow = Flow::new(scheduler::from_config(&config)).with_polarity(config.condition_polarity);
    let reconciler = Arc::new(PlayReconciler::new(flow, store));
    reconciler
        .add_event_handler(|event| println!("{}", format_play_event(&event)))
        .await;

    println!(
        "{} Controller running with {} workers ({:?} scheduler), Ctrl-C to stop",
        ROCKET, workers, config.scheduler
    );
    let controller = Controller::new(reconciler, workers, config.poll_interval());
    controller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    println!("{} Controller stopped", INFO);
    Ok(())
}
