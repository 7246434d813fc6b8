mod board;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use helpdesk_api::{
    classify_error, ApplyEditsRequest, Board, CreateTicketRequest, ErrorKind, HelpdeskApi,
    UpdateTicketRequest,
};
use helpdesk_core::{Priority, TicketId, TicketStatus};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "hd")]
#[command(about = "Helpdesk ticket CLI")]
struct Cli {
    #[arg(long, env = "HELPDESK_DB", default_value = "./tickets.db", global = true)]
    db: PathBuf,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Ticket {
        #[command(subcommand)]
        command: TicketCommand,
    },
    Board {
        #[command(subcommand)]
        command: Option<BoardCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    Init,
}

#[derive(Debug, Subcommand)]
enum TicketCommand {
    Add(TicketAddArgs),
    List,
    Update(TicketUpdateArgs),
}

#[derive(Debug, Args)]
struct TicketAddArgs {
    #[arg(long)]
    issue: String,
    #[arg(long, value_enum, default_value_t = PriorityArg::High)]
    priority: PriorityArg,
}

#[derive(Debug, Args)]
struct TicketUpdateArgs {
    #[arg(long)]
    id: String,
    #[arg(long, value_enum)]
    status: StatusArg,
    #[arg(long, value_enum)]
    priority: PriorityArg,
}

#[derive(Debug, Subcommand)]
enum BoardCommand {
    Show,
    Export(BoardExportArgs),
    Apply(BoardApplyArgs),
}

#[derive(Debug, Args)]
struct BoardExportArgs {
    /// Write the edit sheet here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct BoardApplyArgs {
    /// Edit sheet produced by `hd board export`, with its `rows` edited.
    #[arg(long)]
    edits: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Open,
    InProgress,
    Closed,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<StatusArg> for TicketStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Open => Self::Open,
            StatusArg::InProgress => Self::InProgress,
            StatusArg::Closed => Self::Closed,
        }
    }
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::High => Self::High,
            PriorityArg::Medium => Self::Medium,
            PriorityArg::Low => Self::Low,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match classify_error(&err) {
            ErrorKind::Validation => {
                eprintln!("Please describe the issue before submitting the ticket ({err:#})");
                ExitCode::from(2)
            }
            ErrorKind::Storage => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

fn run(cli: Cli) -> Result<()> {
    tracing::debug!(db = %cli.db.display(), "using ticket database");
    let api = HelpdeskApi::new(cli.db);
    match cli.command {
        Command::Db { command: DbCommand::Init } => {
            let result = api.init()?;
            match cli.format {
                OutputFormat::Json => emit_json(serde_json::to_value(result)?),
                OutputFormat::Text => {
                    if result.created {
                        println!("Created tickets table.");
                    } else {
                        println!("Tickets table already exists.");
                    }
                    Ok(())
                }
            }
        }
        Command::Ticket { command } => run_ticket(command, &api, cli.format),
        Command::Board { command } => {
            run_board(command.unwrap_or(BoardCommand::Show), &api, cli.format)
        }
    }
}

fn run_ticket(command: TicketCommand, api: &HelpdeskApi, format: OutputFormat) -> Result<()> {
    match command {
        TicketCommand::Add(args) => {
            let ticket = api.create_ticket(CreateTicketRequest {
                issue: args.issue,
                priority: args.priority.into(),
            })?;
            match format {
                OutputFormat::Json => emit_json(serde_json::json!({ "ticket": ticket })),
                OutputFormat::Text => {
                    println!("Ticket saved to the database!");
                    print!("{}", board::render_ticket_table(std::slice::from_ref(&ticket)));
                    Ok(())
                }
            }
        }
        TicketCommand::List => {
            let snapshot = api.list_tickets()?;
            match format {
                OutputFormat::Json => emit_json(serde_json::to_value(&snapshot)?),
                OutputFormat::Text => {
                    println!("Number of tickets: {}", snapshot.len());
                    if snapshot.is_empty() {
                        println!("{}", board::EMPTY_BOARD_MESSAGE);
                    } else {
                        print!("{}", board::render_ticket_table(snapshot.tickets()));
                    }
                    Ok(())
                }
            }
        }
        TicketCommand::Update(args) => {
            let id = TicketId::parse(&args.id)?;
            let result = api.update_ticket(
                id,
                UpdateTicketRequest { status: args.status.into(), priority: args.priority.into() },
            )?;
            match format {
                OutputFormat::Json => emit_json(serde_json::to_value(result)?),
                OutputFormat::Text => {
                    if result.matched {
                        println!(
                            "Changes saved to the database! {} is now {} / {}.",
                            result.id, result.status, result.priority
                        );
                    } else {
                        println!("No ticket {} found; nothing changed.", result.id);
                    }
                    Ok(())
                }
            }
        }
    }
}

fn run_board(command: BoardCommand, api: &HelpdeskApi, format: OutputFormat) -> Result<()> {
    match command {
        BoardCommand::Show => {
            let current = api.board()?;
            match format {
                OutputFormat::Json => emit_json(serde_json::to_value(&current)?),
                OutputFormat::Text => {
                    print!("{}", board::render_board(&current));
                    Ok(())
                }
            }
        }
        BoardCommand::Export(args) => {
            let sheet = api.edit_sheet()?;
            match args.out {
                Some(path) => {
                    let value = with_contract_version(serde_json::to_value(&sheet)?);
                    fs::write(&path, serde_json::to_string_pretty(&value)?).with_context(|| {
                        format!("failed to write edit sheet {}", path.display())
                    })?;
                    if format == OutputFormat::Text {
                        println!(
                            "Exported {} tickets to {}. Edit `rows`, then run `hd board apply`.",
                            sheet.rows.len(),
                            path.display()
                        );
                    }
                    Ok(())
                }
                None => emit_json(serde_json::to_value(&sheet)?),
            }
        }
        BoardCommand::Apply(args) => {
            let raw = fs::read_to_string(&args.edits)
                .with_context(|| format!("failed to read edits file {}", args.edits.display()))?;
            let request = serde_json::from_str::<ApplyEditsRequest>(&raw)
                .with_context(|| format!("invalid edits file {}", args.edits.display()))?;

            let result = api.apply_edits(request)?;
            match format {
                OutputFormat::Json => emit_json(serde_json::to_value(&result)?),
                OutputFormat::Text => {
                    if result.base_snapshot_stale {
                        println!(
                            "The board changed since this sheet was exported; \
                             only the rows you edited were saved."
                        );
                    }
                    for id in &result.unknown_ids {
                        println!("Skipped unknown ticket {id}.");
                    }
                    if result.applied.is_empty() {
                        println!("No changes to save.");
                    } else {
                        println!(
                            "Changes saved to the database! ({} updated)",
                            result.applied.len()
                        );
                    }
                    let reloaded = Board::from_snapshot(result.snapshot);
                    print!("{}", board::render_board(&reloaded));
                    Ok(())
                }
            }
        }
    }
}
