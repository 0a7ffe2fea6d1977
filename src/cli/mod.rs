//! Command-line interface for taskpool
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule; every command runs
//! through the same dispatcher, store and bus an embedded UI would use.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};

use crate::bus::{EventBus, EventDestination, EventListener, EventSink};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::lifecycle::{Action, Role};
use crate::model::{Category, Priority, Status, StatusFilter};
use crate::output::OutputOptions;
use crate::service::{LocalRecordService, PoolRules};
use crate::storage::Storage;
use crate::store::{StoreOptions, TaskPoolStore};
use crate::sync::{Dispatcher, DispatcherOptions};

mod assignment;
mod query;
mod template;
mod transition;

/// taskpool - supervised task pool
///
/// Assign tasks from a library, track them through their lifecycle and pay
/// rewards once the work is verified.
#[derive(Parser, Debug)]
#[command(name = "taskpool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Pool root directory (defaults to current directory)
    #[arg(long, global = true, env = "TASKPOOL_ROOT")]
    pub root: Option<PathBuf>,

    /// Act as this role (parent or child)
    #[arg(long = "as", global = true, value_name = "ROLE")]
    pub role: Option<Role>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Mirror pool events as JSON lines to a file, or `-` for stdout
    #[arg(long, global = true, value_name = "PATH")]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Template catalog management
    #[command(subcommand)]
    Template(TemplateCommands),

    /// Put a template into a dependent's library
    Instantiate {
        /// Template ID
        template: String,

        #[command(flatten)]
        target: AssignmentArgs,
    },

    /// Create a one-off template and assign it immediately
    Adhoc {
        /// Task title
        title: String,

        /// Category: self_discipline, logic, creativity, social, physical, academic
        #[arg(long)]
        category: Category,

        /// Reward in coins
        #[arg(long)]
        reward: u32,

        #[command(flatten)]
        target: AssignmentArgs,
    },

    /// List assignments
    List {
        /// Dependent to list for
        #[arg(long = "for", value_name = "DEPENDENT", required_unless_present = "all")]
        dependent: Option<String>,

        /// List across all dependents
        #[arg(long, conflicts_with = "dependent")]
        all: bool,

        /// Filter: available, assigned, active, all, or a status
        #[arg(long, default_value = "all")]
        status: StatusFilter,
    },

    /// Show one assignment
    Show {
        /// Assignment ID
        id: String,
    },

    /// Assign a library task to its dependent
    Assign(TransitionArgs),

    /// Start working on an assigned task
    Start(TransitionArgs),

    /// Submit a task for verification
    Submit(TransitionArgs),

    /// Verify a submitted task and pay its reward
    Verify(TransitionArgs),

    /// Send a submitted task back to in progress
    Reject(TransitionArgs),

    /// Give up on a task
    Giveup(TransitionArgs),

    /// Return a task to the dependent's library
    Unassign(TransitionArgs),

    /// Update priority, progress, due date, notes or overrides
    Update {
        /// Assignment ID
        id: String,

        #[arg(long)]
        priority: Option<Priority>,

        /// Progress percentage (0-100)
        #[arg(long)]
        progress: Option<u8>,

        /// Due date (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_parser = parse_due)]
        due: Option<DateTime<Utc>>,

        #[arg(long)]
        notes: Option<String>,

        /// Per-assignment title override
        #[arg(long)]
        title: Option<String>,

        /// Per-assignment reward override in coins
        #[arg(long)]
        reward: Option<u32>,
    },

    /// Delete a library task
    Rm {
        /// Assignment ID
        id: String,
    },

    /// Show a dependent's coin balance
    Balance {
        /// Dependent ID
        dependent: String,
    },

    /// Mark overdue tasks as missed
    Sweep {
        /// Dependent to sweep
        #[arg(long = "for", value_name = "DEPENDENT")]
        dependent: String,
    },
}

/// Template subcommands
#[derive(Subcommand, Debug)]
pub enum TemplateCommands {
    /// Add a template to the catalog
    Add {
        /// Template title
        title: String,

        #[command(flatten)]
        fields: TemplateArgs,
    },

    /// List templates
    List,

    /// Edit a template
    Edit {
        /// Template ID
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        #[command(flatten)]
        fields: TemplateEditArgs,
    },

    /// Remove a template with no open assignments
    Rm {
        /// Template ID
        id: String,
    },
}

#[derive(Args, Debug)]
pub struct TemplateArgs {
    /// Category: self_discipline, logic, creativity, social, physical, academic
    #[arg(long)]
    pub category: Category,

    /// Suggested reward in coins
    #[arg(long)]
    pub reward: u32,

    /// Difficulty from 1 to 5
    #[arg(long, default_value_t = 1)]
    pub difficulty: u8,

    #[arg(long)]
    pub description: Option<String>,

    /// Suggested minimum age
    #[arg(long, requires = "age_max")]
    pub age_min: Option<u8>,

    /// Suggested maximum age
    #[arg(long, requires = "age_min")]
    pub age_max: Option<u8>,
}

#[derive(Args, Debug)]
pub struct TemplateEditArgs {
    #[arg(long)]
    pub category: Option<Category>,

    #[arg(long)]
    pub reward: Option<u32>,

    #[arg(long)]
    pub difficulty: Option<u8>,

    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Args, Debug)]
pub struct AssignmentArgs {
    /// Dependent the task is for
    #[arg(long = "for", value_name = "DEPENDENT")]
    pub dependent: String,

    #[arg(long, default_value = "medium")]
    pub priority: Priority,

    /// Due date (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_due)]
    pub due: Option<DateTime<Utc>>,

    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Args, Debug)]
pub struct TransitionArgs {
    /// Assignment ID
    pub id: String,

    /// Status you expect the assignment to be in (defaults to the current one)
    #[arg(long)]
    pub expect: Option<Status>,
}

/// Accepts a calendar date (end of that day, UTC) or an RFC 3339 timestamp.
fn parse_due(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "invalid due date '{raw}' (expected YYYY-MM-DD or RFC 3339)"
            ))
        })
}

/// Everything a command needs, wired from the pool root.
pub(crate) struct Context {
    pub config: Config,
    pub service: Arc<LocalRecordService>,
    pub dispatcher: Dispatcher,
    pub output: OutputOptions,
    pub role: Option<Role>,
    events: Option<(EventSink, EventListener)>,
}

impl Context {
    fn open(cli: &Cli) -> Result<Self> {
        let root = match cli.root.clone() {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        let config = Config::load_from_root(&root)?;
        let service = Arc::new(LocalRecordService::open(
            Storage::new(root).with_lock_timeout(config.store.lock_timeout_ms),
            PoolRules::from_config(&config),
        )?);

        let bus = EventBus::default();
        let events = match EventDestination::parse(cli.events.as_deref()) {
            Some(destination) => Some((destination.open()?, bus.listen(&[]))),
            None => None,
        };

        let store = TaskPoolStore::new(service.clone(), StoreOptions::from_config(&config));
        let dispatcher = Dispatcher::new(store, bus, DispatcherOptions::from_config(&config)?);
        let events_to_stdout = cli
            .events
            .as_deref()
            .map(|value| value.trim() == "-")
            .unwrap_or(false);

        Ok(Self {
            config,
            service,
            dispatcher,
            output: OutputOptions {
                json: cli.json && !events_to_stdout,
                quiet: cli.quiet,
            },
            role: cli.role,
            events,
        })
    }

    /// Role for `action`: the explicit `--as`, else the configured default
    /// when it may act, else the only role that may.
    pub fn role_for(&self, action: Action) -> Result<Role> {
        if let Some(role) = self.role {
            return Ok(role);
        }
        let default = self.config.actor.role()?;
        let permitted = action.permitted_roles();
        if permitted.contains(&default) {
            return Ok(default);
        }
        Ok(permitted.first().copied().unwrap_or(default))
    }

    fn flush_events(&mut self) -> Result<()> {
        if let Some((sink, listener)) = self.events.as_mut() {
            sink.forward(listener)?;
        }
        Ok(())
    }
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let mut ctx = Context::open(&self)?;
        let result = match self.command {
            Commands::Template(cmd) => match cmd {
                TemplateCommands::Add { title, fields } => {
                    template::add(&ctx, title, fields).await
                }
                TemplateCommands::List => template::list(&ctx).await,
                TemplateCommands::Edit { id, title, fields } => {
                    template::edit(&ctx, &id, title, fields).await
                }
                TemplateCommands::Rm { id } => template::remove(&ctx, &id).await,
            },
            Commands::Instantiate { template, target } => {
                assignment::instantiate(&ctx, &template, target).await
            }
            Commands::Adhoc {
                title,
                category,
                reward,
                target,
            } => assignment::adhoc(&ctx, title, category, reward, target).await,
            Commands::List {
                dependent,
                all,
                status,
            } => query::list(&ctx, dependent, all, status).await,
            Commands::Show { id } => query::show(&ctx, &id).await,
            Commands::Assign(args) => transition::run(&ctx, Action::Assign, args).await,
            Commands::Start(args) => transition::run(&ctx, Action::Start, args).await,
            Commands::Submit(args) => transition::run(&ctx, Action::Submit, args).await,
            Commands::Verify(args) => transition::run(&ctx, Action::Verify, args).await,
            Commands::Reject(args) => transition::run(&ctx, Action::Reject, args).await,
            Commands::Giveup(args) => transition::run(&ctx, Action::Giveup, args).await,
            Commands::Unassign(args) => transition::run(&ctx, Action::Unassign, args).await,
            Commands::Update {
                id,
                priority,
                progress,
                due,
                notes,
                title,
                reward,
            } => {
                let update = crate::model::AssignmentUpdate {
                    priority,
                    progress,
                    due_date: due,
                    notes,
                    custom_title: title,
                    custom_reward_coins: reward,
                };
                assignment::update(&ctx, &id, update).await
            }
            Commands::Rm { id } => assignment::remove(&ctx, &id).await,
            Commands::Balance { dependent } => query::balance(&ctx, &dependent).await,
            Commands::Sweep { dependent } => transition::sweep(&ctx, &dependent).await,
        };
        ctx.flush_events()?;
        result
    }
}
