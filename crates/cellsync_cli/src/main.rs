//! `cellsync` operator CLI.
//!
//! # Responsibility
//! - Edit one period's cell membership in a SQLite database file.
//! - Save every edit through `CellSession` so the sync phases run as they
//!   would for any other gateway.

use anyhow::{anyhow, Context, Result};
use cellsync_core::{
    init_logging_from_config, open_db, CellSession, CellsyncConfig, GroupId, MembershipStatus,
    PersistentId, Person, PersonId, Role, SessionError, SqliteCellRepository, SyncReport,
};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::path::PathBuf;

/// Cell membership partitioning over a SQLite store.
#[derive(Debug, Parser)]
#[command(name = "cellsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database file; created and migrated when missing.
    #[arg(long, global = true, env = "CELLSYNC_DB", default_value = "cellsync.db")]
    db: PathBuf,

    /// Optional JSON config file.
    #[arg(long, global = true, env = "CELLSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Membership period (year) to operate on.
    #[arg(long, global = true, env = "CELLSYNC_YEAR")]
    year: Option<i32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a person and enroll them in the period.
    Enroll {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long, value_enum, default_value = "active")]
        status: StatusArg,
    },
    /// Print groups and the unassigned bucket.
    Show,
    /// Resolve tab-delimited text into new groups.
    Import {
        #[arg(long)]
        file: PathBuf,
        /// Save the result; otherwise only report what would happen.
        #[arg(long)]
        save: bool,
    },
    /// Place a person into a group slot.
    Place {
        #[arg(long)]
        person: i64,
        #[arg(long)]
        group: i64,
        #[arg(long, value_enum, default_value = "member")]
        role: RoleArg,
    },
    /// Move a person to the unassigned bucket.
    Unassign {
        #[arg(long)]
        person: i64,
    },
    /// Create an empty group.
    NewGroup {
        #[arg(long)]
        name: Option<String>,
    },
    /// Set an explicit group name.
    Rename {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        name: String,
    },
    /// Delete a group, releasing everyone in it.
    DeleteGroup {
        #[arg(long)]
        group: i64,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Enroll { .. } => "enroll",
            Self::Show => "show",
            Self::Import { .. } => "import",
            Self::Place { .. } => "place",
            Self::Unassign { .. } => "unassign",
            Self::NewGroup { .. } => "new_group",
            Self::Rename { .. } => "rename",
            Self::DeleteGroup { .. } => "delete_group",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Leader,
    CoLeader,
    Member,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Leader => Role::Leader,
            RoleArg::CoLeader => Role::CoLeader,
            RoleArg::Member => Role::Member,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Active,
    Newcomer,
    Inactive,
}

impl From<StatusArg> for MembershipStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Active => MembershipStatus::Active,
            StatusArg::Newcomer => MembershipStatus::Newcomer,
            StatusArg::Inactive => MembershipStatus::Inactive,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => CellsyncConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CellsyncConfig::default(),
    };
    if let Err(err) = init_logging_from_config(&config.logging) {
        eprintln!("warning: file logging disabled: {err}");
    }

    let year = cli
        .year
        .ok_or_else(|| anyhow!("missing --year (or CELLSYNC_YEAR)"))?;
    let conn = open_db(&cli.db).with_context(|| format!("opening {}", cli.db.display()))?;
    let repo = SqliteCellRepository::try_new(conn)?;
    info!(
        "event=cli_command module=cli status=start command={} period_year={}",
        cli.command.name(),
        year
    );

    match cli.command {
        Command::Enroll {
            id,
            name,
            phone,
            status,
        } => {
            let person = Person {
                contact_phone: phone,
                membership_status: status.into(),
                ..Person::new(PersonId(id), name)
            };
            repo.register_person(&person)?;
            repo.enroll(person.person_id, year)?;
            println!("enrolled person={id} year={year}");
        }
        Command::Show => print_partition(&CellSession::open(repo, year, config)?),
        Command::Import { file, save } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let mut session = CellSession::open(repo, year, config)?;
            let report = session.import_text(&text)?;
            println!(
                "import groups={} resolved={} misses={}",
                report.created_groups.len(),
                report.resolved_count(),
                report.misses.len()
            );
            for miss in &report.misses {
                println!(
                    "  unresolved row={} column={} name={:?}",
                    miss.row + 1,
                    miss.column + 1,
                    miss.name
                );
            }
            if save {
                save_session(&mut session)?;
            } else {
                println!("dry run; pass --save to persist");
            }
        }
        Command::Place {
            person,
            group,
            role,
        } => {
            let mut session = CellSession::open(repo, year, config)?;
            let outcome = session.engine_mut().place(
                PersonId(person),
                persisted(group),
                role.into(),
            )?;
            if let Some(displaced) = outcome.displaced {
                println!("displaced person={displaced} to unassigned");
            }
            save_session(&mut session)?;
        }
        Command::Unassign { person } => {
            let mut session = CellSession::open(repo, year, config)?;
            let previous = session.engine_mut().remove(PersonId(person))?;
            println!("unassigned person={person} from={previous}");
            save_session(&mut session)?;
        }
        Command::NewGroup { name } => {
            let mut session = CellSession::open(repo, year, config)?;
            session.engine_mut().create_group(name.as_deref())?;
            save_session(&mut session)?;
        }
        Command::Rename { group, name } => {
            let mut session = CellSession::open(repo, year, config)?;
            session.engine_mut().rename_group(persisted(group), &name)?;
            save_session(&mut session)?;
        }
        Command::DeleteGroup { group } => {
            let mut session = CellSession::open(repo, year, config)?;
            let deleted = session.engine_mut().delete_group(persisted(group))?;
            println!(
                "deleted group={} released={}",
                deleted.group_id,
                deleted.released.len()
            );
            save_session(&mut session)?;
        }
    }
    Ok(())
}

fn persisted(group: i64) -> GroupId {
    GroupId::Persistent(PersistentId(group))
}

fn save_session(session: &mut CellSession<SqliteCellRepository>) -> Result<()> {
    match session.save() {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(SessionError::Sync(err)) if err.retry_recommended() => {
            Err(anyhow!(err).context("save partially applied; run the command again"))
        }
        Err(err) => Err(err.into()),
    }
}

fn print_report(report: &SyncReport) {
    println!(
        "saved run={} created={} updated={} retired={} groups={}",
        report.run_id,
        report.created.len(),
        report.updated.len(),
        report.retired.len(),
        report.batch_groups.len()
    );
}

fn print_partition(session: &CellSession<SqliteCellRepository>) {
    let partition = session.partition();
    let name_of = |person_id: PersonId| {
        partition
            .person(person_id)
            .map_or_else(|| person_id.to_string(), |person| person.display_name.clone())
    };

    println!("period {}", partition.period_year());
    for group in partition.groups() {
        println!("[{}] {}", group.id(), group.name().as_str());
        if let Some(leader) = group.leader() {
            println!("  leader     {} ({})", name_of(leader), leader);
        }
        if let Some(co_leader) = group.co_leader() {
            println!("  co-leader  {} ({})", name_of(co_leader), co_leader);
        }
        for member in group.members() {
            println!("  member     {} ({})", name_of(*member), member);
        }
    }
    println!("unassigned ({})", partition.unassigned().len());
    for person in partition.unassigned_people() {
        println!("  {} ({})", person.display_name, person.person_id);
    }
}
