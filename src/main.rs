//! Talent Flow
//!
//! `talent_flow serve` runs the HTTP API, `talent_flow seed` loads the
//! sample team, and no argument starts the interactive console.

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;

use talent_flow::agent::build_provider;
use talent_flow::config::{AppConfig, StoreConfig};
use talent_flow::notify::Notifier;
use talent_flow::seed::seed;
use talent_flow::server::run_server;
use talent_flow::service::{AllocationFilter, AllocationService, ConflictTarget};
use talent_flow::store::{DomainStore, InMemoryStore, SqliteStore};
use talent_flow::telemetry::init_logging;

async fn build_service(config: &AppConfig) -> Result<AllocationService> {
    let store: Arc<dyn DomainStore> = match &config.store {
        StoreConfig::Memory => Arc::new(InMemoryStore::new()),
        StoreConfig::Sqlite { path } => Arc::new(
            SqliteStore::new(path)
                .await
                .with_context(|| format!("opening database {}", path.display()))?,
        ),
    };
    let provider = build_provider(&config.oracle)?;
    let notifier = Notifier::from_config(&config.notifications)?;
    let service = AllocationService::with_provider(
        store,
        provider,
        &config.oracle,
        config.allocation.clone(),
        notifier,
    )
    .await?;
    Ok(service)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().await?;
    let _log_guard = init_logging(&config.logging)?;

    let service = Arc::new(build_service(&config).await?);
    info!("Oracle: {:?} model '{}' at {}", config.oracle.provider, config.oracle.model, config.oracle.base_url);

    match std::env::args().nth(1).as_deref() {
        Some("serve") => run_server(service, &config.server.bind).await,
        Some("seed") => {
            let (resources, projects) = seed(&service).await?;
            println!("🌱 Seeded {} resource(s) and {} project(s)", resources, projects);
            Ok(())
        }
        Some(other) => anyhow::bail!("unknown command '{}' (expected 'serve' or 'seed')", other),
        None => console(&service).await,
    }
}

async fn console(service: &AllocationService) -> Result<()> {
    println!("\n{}", "═".repeat(60));
    println!("🧭 Talent Flow v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", "═".repeat(60));
    println!("💡 Commands: resources | projects | allocations | requests");
    println!("             approve <id> | reject <id> | resolve <id> | quit");
    println!("   Anything else goes to the allocation assistant.\n");

    loop {
        print!("🧑 You: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        let (command, arg) = match line.split_once(' ') {
            Some((c, a)) => (c.to_lowercase(), a.trim()),
            None => (line.to_lowercase(), ""),
        };

        let result = match (command.as_str(), arg) {
            ("quit" | "exit" | "q", _) => {
                println!("\n👋 Goodbye!\n");
                break;
            }
            ("resources", "") => print_resources(service).await,
            ("projects", "") => print_projects(service).await,
            ("allocations", "") => print_allocations(service).await,
            ("requests", "") => print_requests(service).await,
            ("approve", id) if !id.is_empty() => match service.approve_request(id).await {
                Ok(result) => {
                    let a = &result.outcome.allocation;
                    println!("✅ Approved. Allocation {} ({} {})", a.id, a.match_score, a.status);
                    for advice in &result.conflict_advice {
                        println!("⚠️  Conflict advice: {}", advice.suggestion);
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            },
            ("reject", id) if !id.is_empty() => service.reject_request(id).await.map(|r| {
                println!("🚫 Request {} rejected", r.id);
            }),
            ("resolve", id) if !id.is_empty() => service
                .resolve_conflict(&ConflictTarget::Allocation { allocation_id: id.to_string() })
                .await
                .map(|suggestion| println!("🧩 {}", suggestion)),
            _ => {
                println!("\n⚙️  Thinking...\n");
                service.chat(line).await.map(|answer| println!("🤖 {}\n", answer))
            }
        };

        if let Err(e) = result {
            let hint = if e.is_retryable() { " (safe to retry)" } else { "" };
            println!("❌ {}{}", e, hint);
        }
    }

    Ok(())
}

async fn print_resources(service: &AllocationService) -> Result<(), talent_flow::AllocationError> {
    for r in service.list_resources().await? {
        println!("  {}  {} <{}> {} | {} | {}h/week", r.id, r.name, r.email, r.role, r.skills_joined(), r.availability);
    }
    Ok(())
}

async fn print_projects(service: &AllocationService) -> Result<(), talent_flow::AllocationError> {
    for p in service.list_projects().await? {
        println!(
            "  {}  {} [{}] due {} | needs {}",
            p.id,
            p.name,
            p.priority,
            p.deadline,
            p.required_skills_joined()
        );
    }
    Ok(())
}

async fn print_allocations(service: &AllocationService) -> Result<(), talent_flow::AllocationError> {
    for a in service.list_allocations(&AllocationFilter::default()).await? {
        println!("  {}  {} -> {}  {} {}  {}", a.id, a.resource_id, a.project_id, a.match_score, a.status, a.reasoning);
    }
    Ok(())
}

async fn print_requests(service: &AllocationService) -> Result<(), talent_flow::AllocationError> {
    for r in service.list_requests(None).await? {
        println!("  {}  {} -> {}  {}", r.id, r.resource_id, r.project_id, r.status);
    }
    Ok(())
}
