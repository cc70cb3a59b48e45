use std::error::Error;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ledger_engine::{Engine, NumberFamily};
use migration::{Migrator, MigratorTrait};
use serde::Serialize;
use settings::Database;
use uuid::Uuid;

mod settings;

#[derive(Parser, Debug)]
#[command(name = "ledger_admin")]
#[command(about = "Operator utilities for the billing ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations and exit.
    Migrate,
    Numbers(Numbers),
    Structure(Structure),
    Document(Document),
}

#[derive(Args, Debug)]
struct Numbers {
    #[command(subcommand)]
    command: NumbersCommand,
}

#[derive(Subcommand, Debug)]
enum NumbersCommand {
    /// Print the value the next allocation would hand out.
    Show(CounterArgs),
    /// Override the next value of a counter.
    Set {
        #[command(flatten)]
        counter: CounterArgs,
        #[arg(long)]
        next: i64,
    },
}

#[derive(Args, Debug)]
struct CounterArgs {
    #[arg(long)]
    tenant: String,
    #[arg(long)]
    year: i32,
    #[arg(long, value_enum, default_value_t = Family::Billing)]
    family: Family,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Family {
    Billing,
    Invoice,
    PartialPayment,
    Project,
}

impl From<Family> for NumberFamily {
    fn from(value: Family) -> Self {
        match value {
            Family::Billing => NumberFamily::Billing,
            Family::Invoice => NumberFamily::Invoice,
            Family::PartialPayment => NumberFamily::PartialPayment,
            Family::Project => NumberFamily::Project,
        }
    }
}

#[derive(Args, Debug)]
struct Structure {
    #[command(subcommand)]
    command: StructureCommand,
}

#[derive(Subcommand, Debug)]
enum StructureCommand {
    /// Re-derive a structure node's aggregates from its postings.
    Recompute {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Args, Debug)]
struct Document {
    #[command(subcommand)]
    command: DocumentCommand,
}

#[derive(Subcommand, Debug)]
enum DocumentCommand {
    /// Print a document with its allocation rows.
    Show {
        #[arg(long)]
        id: Uuid,
    },
    /// Compute (once) the billing proposal of a draft.
    Proposal {
        #[arg(long)]
        id: Uuid,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error + Send + Sync>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "ledger_admin={level},ledger_engine={level}",
            level = settings.app.level
        ))
        .init();

    let db = parse_database(&settings.database).await?;
    let engine = Engine::builder()
        .database(db)
        .config(settings.engine_config())
        .build()
        .await?;

    match cli.command {
        Command::Migrate => tracing::info!("schema is up to date"),
        Command::Numbers(Numbers { command }) => match command {
            NumbersCommand::Show(args) => {
                let next = engine
                    .peek_next_number(&args.tenant, args.family.into(), args.year)
                    .await?;
                println!("{next}");
            }
            NumbersCommand::Set { counter, next } => {
                engine
                    .set_next_number(&counter.tenant, counter.family.into(), counter.year, next)
                    .await?;
                println!(
                    "next {} number for {}/{}: {next}",
                    NumberFamily::from(counter.family),
                    counter.tenant,
                    counter.year
                );
            }
        },
        Command::Structure(Structure { command }) => match command {
            StructureCommand::Recompute { id } => {
                let node = engine.recompute_structure(id).await?;
                print_json(&node)?;
            }
        },
        Command::Document(Document { command }) => match command {
            DocumentCommand::Show { id } => {
                let document = engine.document(id).await?;
                let allocations = engine.document_allocations(id).await?;
                print_json(&serde_json::json!({
                    "document": document,
                    "allocations": allocations,
                }))?;
            }
            DocumentCommand::Proposal { id } => {
                let proposal = engine.billing_proposal(id).await?;
                print_json(&proposal)?;
            }
        },
    }

    Ok(())
}

async fn parse_database(
    config: &settings::Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn Error + Send + Sync>> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
