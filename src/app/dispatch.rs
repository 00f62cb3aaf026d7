use crate::cli::commands::{Cli, Commands};
use anyhow::{Context, Result, bail};
use mnemo::config::StoreBackend;
use mnemo::memory::SchedulerRun;
use mnemo::{Config, MemorySystem};
use tracing::info;

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Config => {
            let rendered =
                toml::to_string_pretty(&config.redacted()).context("Failed to render config")?;
            println!("{rendered}");
        }
        Commands::Remember { user, chat, text } => {
            let system = connect(config).await?;
            let memory = system.remember(&user, &chat, &text).await?;
            println!("{}", memory.id);
        }
        Commands::Recall { user, query } => {
            let system = connect(config).await?;
            let context = system.retrieve(&user, &query).await?;
            if context.is_empty() {
                println!("(no memories)");
            } else {
                println!("{}", context.render());
            }
        }
        Commands::Consolidate { user, force } => {
            let system = connect(config).await?;
            print_run(system.consolidate(&user, force).await?);
        }
    }

    Ok(())
}

/// Each CLI invocation is its own process, so a process-local store would
/// drop whatever the previous command wrote.
fn ensure_persistent_store(config: &Config) -> Result<()> {
    if config.store.backend == StoreBackend::Memory {
        bail!(
            "The in-memory store does not persist between commands. \
             Set MILVUS_URL or store.backend = \"milvus\" with store.milvus_uri"
        );
    }
    Ok(())
}

async fn connect(config: Config) -> Result<MemorySystem> {
    ensure_persistent_store(&config)?;
    Ok(MemorySystem::connect(config).await?)
}

fn print_run(run: SchedulerRun) {
    match run {
        SchedulerRun::Skipped { pending } => {
            println!("Nothing to do: {pending} pending episode(s)");
        }
        SchedulerRun::Consolidated {
            report,
            applied_watermark,
            abandoned,
            ..
        } => {
            info!(
                user_id = report.user_id.as_str(),
                clean = report.is_clean(),
                "Consolidation finished"
            );
            println!("Episodes:     {}", report.batch_len);
            println!("Rewritten:    {}", report.rewritten);
            println!("Facts:        {}", report.semantic_written());
            println!("Duplicates:   {}", report.duplicate_facts.len());
            for entry in report.failed_entries() {
                if let Some(error) = &entry.error {
                    println!("Failed:       {:?} ({error})", entry.target);
                }
            }
            for id in &abandoned {
                println!("Abandoned:    {id}");
            }
            match applied_watermark {
                Some(at) => println!("Watermark:    {}", at.to_rfc3339()),
                None => println!("Watermark:    (none)"),
            }
        }
    }
}
