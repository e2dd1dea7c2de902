use std::sync::Arc;

use anyhow::Result;
use chatvault::cli::{Cli, Commands};
use chatvault::{utils, ConversationManager, Role, Settings, StoreFacade};
use chrono::Duration;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let facade = Arc::new(StoreFacade::initialize(&settings.storage).await?);
    let manager = ConversationManager::new(facade, settings.conversation.max_context_messages);

    match cli.command {
        Commands::New { title } => handle_new(&manager, title).await,
        Commands::Append { id, role, content } => {
            handle_append(&manager, id, role, content).await
        }
        Commands::Show { id, context } => handle_show(&manager, id, context).await,
        Commands::List => handle_list(&manager).await,
        Commands::Search { query } => handle_search(&manager, query).await,
        Commands::Delete { id } => handle_delete(&manager, id).await,
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(settings.storage.retention_days);
            handle_cleanup(&manager, days).await
        }
        Commands::Stats { watch } => {
            handle_stats(
                &manager,
                watch,
                settings.storage.primary.health_check_interval_ms,
            )
            .await
        }
    }
}

async fn handle_new(manager: &ConversationManager, title: Option<String>) -> Result<()> {
    let mut conversation = manager.start_new();
    if let Some(title) = title {
        conversation.title = title;
    }
    manager.save(&conversation).await?;

    utils::print_success(&format!("Created conversation {}", conversation.id));
    Ok(())
}

async fn handle_append(
    manager: &ConversationManager,
    id: String,
    role: String,
    content: String,
) -> Result<()> {
    let role: Role = role.parse()?;
    let mut conversation = manager.load(&id).await?;
    manager.append(&mut conversation, role, &content).await?;

    utils::print_success(&format!(
        "Appended {} message ({} total)",
        role.as_str(),
        conversation.messages.len()
    ));
    Ok(())
}

async fn handle_show(manager: &ConversationManager, id: String, context: bool) -> Result<()> {
    let conversation = manager.load(&id).await?;

    let title = if conversation.title.is_empty() {
        "(untitled)"
    } else {
        conversation.title.as_str()
    };
    utils::print_header(title);

    let messages = if context {
        utils::print_info("Context window:");
        manager.context_window(&conversation, None)
    } else {
        &conversation.messages[..]
    };

    for message in messages {
        println!(
            "[{}] {}: {}",
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.role.as_str(),
            message.content
        );
    }
    Ok(())
}

async fn handle_list(manager: &ConversationManager) -> Result<()> {
    let summaries = manager.list_all().await?;

    if summaries.is_empty() {
        utils::print_info("No conversations stored");
        return Ok(());
    }

    utils::print_header(&format!("{} conversations", summaries.len()));
    for summary in summaries {
        println!(
            "{}  {}  ({} messages, updated {})",
            summary.id,
            if summary.title.is_empty() {
                "(untitled)"
            } else {
                summary.title.as_str()
            },
            summary.message_count,
            summary.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn handle_search(manager: &ConversationManager, query: String) -> Result<()> {
    let hits = manager.search(&query).await?;

    if hits.is_empty() {
        utils::print_info(&format!("No conversations matching '{}'", query));
        return Ok(());
    }

    utils::print_header(&format!("{} matches for '{}'", hits.len(), query));
    for hit in hits {
        println!(
            "{:>7.2}  {}  {}",
            hit.score, hit.summary.id, hit.summary.title
        );
    }
    Ok(())
}

async fn handle_delete(manager: &ConversationManager, id: String) -> Result<()> {
    manager.delete(&id).await?;
    utils::print_success(&format!("Deleted conversation {}", id));
    Ok(())
}

async fn handle_cleanup(manager: &ConversationManager, days: i64) -> Result<()> {
    let report = manager.cleanup_old(Duration::days(days)).await?;

    utils::print_success(&format!(
        "Removed {} conversations older than {} days",
        report.deleted, days
    ));
    if report.skipped > 0 {
        utils::print_error(&format!(
            "{} records could not be examined and were left in place",
            report.skipped
        ));
    }
    Ok(())
}

async fn handle_stats(
    manager: &ConversationManager,
    watch: bool,
    refresh_interval_ms: u64,
) -> Result<()> {
    loop {
        let stats = manager.stats().await?;

        utils::print_header("Storage statistics");
        println!("Backend:        {}", stats.backend);
        println!("Connected:      {}", if stats.connected { "yes" } else { "no" });
        println!("Conversations:  {}", stats.conversations);
        println!("Approx. size:   {}", utils::format_bytes(stats.approx_bytes));

        if !watch {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(refresh_interval_ms)).await;
        // Clear screen (works on most terminals)
        print!("\x1B[2J\x1B[1;1H");
    }

    Ok(())
}
