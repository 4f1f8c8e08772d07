//! # timewarden CLI
//!
//! Front end for the screen-time engine: the client sync protocol runs
//! over stdin/stdout, everything else is thin admin glue over the
//! [`Warden`] surface.
//!
//! ```bash
//! printf 'alice\nMinecraft\n' | timewarden sync
//! ```

use clap::{Parser, Subcommand};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use timewarden::models::{OverridePatch, TitleOrder};
use timewarden::version::version_string;
use timewarden::{Config, Warden, WardenError};

/// timewarden - per-user screen-time accounting and limit enforcement
#[derive(Parser)]
#[command(name = "timewarden")]
#[command(version = env!("WARDEN_VERSION"))]
#[command(about = "Per-user screen-time accounting and limit enforcement", long_about = None)]
#[command(
    after_help = "Sync input: reads the request body from stdin\n\nExample:\n  printf 'alice\\nMinecraft\\n' | timewarden sync"
)]
struct Cli {
    /// Show detailed version information
    #[arg(long = "version-full")]
    version_full: bool,

    /// Database file (defaults to the configured data-dir location)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one client sync request from stdin
    Sync,

    /// Print a user's effective key-value configuration
    ConfigSync {
        #[arg(long)]
        user: String,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage activity classes
    Class {
        #[command(subcommand)]
        action: ClassAction,
    },

    /// Manage classification rules
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Manage limits
    Limit {
        #[command(subcommand)]
        action: LimitAction,
    },

    /// Manage class-to-limit mappings
    Map {
        #[command(subcommand)]
        action: MapAction,
    },

    /// Manage per-day overrides
    Override {
        #[command(subcommand)]
        action: OverrideAction,
    },

    /// Manage global / per-user key-value configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Reports: time spent, per-title usage, time remaining
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Re-evaluate recent activity against the current rules
    Reclassify {
        /// How many days back to reclassify
        #[arg(long, default_value_t = 30)]
        days: i64,
    },

    /// Delete activity and overrides older than a date
    Prune {
        /// Cutoff date (YYYY-MM-DD); rows strictly older are removed
        #[arg(long)]
        before: chrono::NaiveDate,
    },

    /// Run database maintenance (checkpoint, optimize, vacuum)
    Maintenance {
        #[arg(long)]
        force_vacuum: bool,
    },

    /// Generate example config file
    GenerateConfig,
}

#[derive(Subcommand)]
enum UserAction {
    Add { user: String },
    Remove { user: String },
    List,
}

#[derive(Subcommand)]
enum ClassAction {
    Add { name: String },
    Rename { class_id: i64, name: String },
    Remove { class_id: i64 },
    List,
}

#[derive(Subcommand)]
enum RuleAction {
    Add {
        #[arg(long)]
        class: i64,
        #[arg(long, default_value_t = 0)]
        priority: i64,
        pattern: String,
    },
    Update {
        rule_id: i64,
        #[arg(long)]
        priority: i64,
        pattern: String,
    },
    Remove {
        rule_id: i64,
    },
    List,
}

#[derive(Subcommand)]
enum LimitAction {
    Add {
        #[arg(long)]
        user: String,
        name: String,
    },
    Rename {
        limit_id: i64,
        name: String,
    },
    Remove {
        limit_id: i64,
    },
    List {
        #[arg(long)]
        user: String,
    },
    /// Set a limit config key (minutes_day, minutes_week, minutes_<dow>,
    /// times, times_<dow>, locked)
    Set {
        limit_id: i64,
        key: String,
        value: String,
    },
    /// Clear a limit config key
    Clear {
        limit_id: i64,
        key: String,
    },
}

#[derive(Subcommand)]
enum MapAction {
    Add { class_id: i64, limit_id: i64 },
    Remove { class_id: i64, limit_id: i64 },
}

#[derive(Subcommand)]
enum OverrideAction {
    Set {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: i64,
        /// Date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
        /// Replace today's minute budget
        #[arg(long)]
        minutes: Option<i64>,
        /// Satisfy the limit's lock for the day
        #[arg(long)]
        unlock: bool,
        /// Replace today's slot restriction ("" means zero time)
        #[arg(long)]
        slots: Option<String>,
    },
    Clear {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: i64,
        #[arg(long)]
        date: Option<String>,
    },
    List {
        #[arg(long)]
        user: String,
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set {
        /// User scope; global when omitted
        #[arg(long)]
        user: Option<String>,
        key: String,
        value: String,
    },
    Clear {
        #[arg(long)]
        user: Option<String>,
        key: String,
    },
    Show {
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand)]
enum ReportAction {
    /// Seconds spent per limit per date
    Spent {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 7)]
        days: i64,
        #[arg(long)]
        json: bool,
    },
    /// Per-title usage
    Titles {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 7)]
        days: i64,
        /// Sort by recency instead of total seconds
        #[arg(long)]
        recent: bool,
        #[arg(long)]
        json: bool,
    },
    /// Time remaining today per limit
    Left {
        #[arg(long)]
        user: String,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if cli.version_full {
        print!("{}", version_string());
        return ExitCode::SUCCESS;
    }

    let Some(command) = cli.command else {
        eprintln!("No command given; try --help");
        return ExitCode::FAILURE;
    };

    match run(cli.db, command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ WardenError::MalformedRequest(_)) => {
            // The HTTP front answers these with a 400; the CLI analog is a
            // distinct exit code
            eprintln!("{}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn open_warden(db: Option<PathBuf>) -> Result<Warden, WardenError> {
    match db {
        Some(path) => Warden::open(&path),
        None => Warden::open_default(),
    }
}

fn run(db: Option<PathBuf>, command: Commands) -> Result<(), WardenError> {
    // generate-config works without a database
    if let Commands::GenerateConfig = command {
        let config_path = Config::default_config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, Config::example_toml())?;
        println!("Config file generated at {}", config_path.display());
        return Ok(());
    }

    let warden = open_warden(db)?;

    match command {
        Commands::GenerateConfig => unreachable!(),

        Commands::Sync => {
            let mut body = String::new();
            io::stdin().read_to_string(&mut body)?;
            print!("{}", warden.handle_sync(&body)?);
        }

        Commands::ConfigSync { user } => {
            print!("{}", warden.handle_config_sync(&user)?);
        }

        Commands::User { action } => match action {
            UserAction::Add { user } => warden.add_user(&user)?,
            UserAction::Remove { user } => warden.remove_user(&user)?,
            UserAction::List => {
                for user in warden.users()? {
                    println!("{}", user);
                }
            }
        },

        Commands::Class { action } => match action {
            ClassAction::Add { name } => {
                let class = warden.add_class(&name)?;
                println!("{}", class.id);
            }
            ClassAction::Rename { class_id, name } => warden.rename_class(class_id, &name)?,
            ClassAction::Remove { class_id } => warden.remove_class(class_id)?,
            ClassAction::List => {
                for class in warden.classes()? {
                    println!(
                        "{}\t{}{}",
                        class.id,
                        class.name,
                        if class.is_default { " (default)" } else { "" }
                    );
                }
            }
        },

        Commands::Rule { action } => match action {
            RuleAction::Add {
                class,
                priority,
                pattern,
            } => {
                let rule = warden.add_rule(class, priority, &pattern)?;
                println!("{}", rule.id);
            }
            RuleAction::Update {
                rule_id,
                priority,
                pattern,
            } => warden.update_rule(rule_id, priority, &pattern)?,
            RuleAction::Remove { rule_id } => warden.remove_rule(rule_id)?,
            RuleAction::List => {
                for rule in warden.rules()? {
                    println!(
                        "{}\tclass={}\tpriority={}\t{:?}{}",
                        rule.id,
                        rule.class_id,
                        rule.priority,
                        rule.pattern,
                        if rule.is_default { " (default)" } else { "" }
                    );
                }
            }
        },

        Commands::Limit { action } => match action {
            LimitAction::Add { user, name } => {
                let limit = warden.add_limit(&user, &name)?;
                println!("{}", limit.id);
            }
            LimitAction::Rename { limit_id, name } => warden.rename_limit(limit_id, &name)?,
            LimitAction::Remove { limit_id } => warden.remove_limit(limit_id)?,
            LimitAction::List { user } => {
                let snapshots = warden.limit_snapshots(&user)?;
                let mut ids: Vec<i64> = snapshots.keys().copied().collect();
                ids.sort_unstable();
                for id in ids {
                    let snapshot = &snapshots[&id];
                    let mut keys: Vec<&String> = snapshot.config.keys().collect();
                    keys.sort();
                    let config: Vec<String> = keys
                        .into_iter()
                        .map(|k| format!("{}={}", k, snapshot.config[k]))
                        .collect();
                    println!(
                        "{}\t{}{}\t{}",
                        id,
                        snapshot.limit.name,
                        if snapshot.limit.is_total { " (total)" } else { "" },
                        config.join(" ")
                    );
                }
            }
            LimitAction::Set {
                limit_id,
                key,
                value,
            } => warden.set_limit_config(limit_id, &key, &value)?,
            LimitAction::Clear { limit_id, key } => warden.clear_limit_config(limit_id, &key)?,
        },

        Commands::Map { action } => match action {
            MapAction::Add { class_id, limit_id } => warden.add_mapping(class_id, limit_id)?,
            MapAction::Remove { class_id, limit_id } => {
                warden.remove_mapping(class_id, limit_id)?
            }
        },

        Commands::Override { action } => match action {
            OverrideAction::Set {
                user,
                limit,
                date,
                minutes,
                unlock,
                slots,
            } => {
                let date = date.unwrap_or_else(|| warden.today());
                let patch = OverridePatch {
                    minutes,
                    unlocked: if unlock { Some(true) } else { None },
                    slots,
                };
                warden.set_override(&user, &date, limit, &patch)?;
            }
            OverrideAction::Clear { user, limit, date } => {
                let date = date.unwrap_or_else(|| warden.today());
                warden.clear_override(&user, &date, limit)?;
            }
            OverrideAction::List { user, date } => {
                let date = date.unwrap_or_else(|| warden.today());
                for row in warden.overrides(&user, &date)? {
                    println!(
                        "limit={}\tminutes={:?}\tunlocked={:?}\tslots={:?}",
                        row.limit_id, row.minutes, row.unlocked, row.slots
                    );
                }
            }
        },

        Commands::Config { action } => match action {
            ConfigAction::Set { user, key, value } => {
                warden.set_config(user.as_deref().unwrap_or(""), &key, &value)?
            }
            ConfigAction::Clear { user, key } => {
                warden.clear_config(user.as_deref().unwrap_or(""), &key)?
            }
            ConfigAction::Show { user } => {
                for (key, value) in warden.effective_config(&user)? {
                    println!("{}={}", key, value);
                }
            }
        },

        Commands::Report { action } => report(&warden, action)?,

        Commands::Reclassify { days } => {
            let changed = warden.reclassify_days(days)?;
            println!("Reclassified {} rows", changed);
        }

        Commands::Prune { before } => {
            let (activity, overrides) = warden.prune_before(before)?;
            println!("Pruned {} activity rows, {} overrides", activity, overrides);
        }

        Commands::Maintenance { force_vacuum } => {
            let result = warden.maintenance(force_vacuum)?;
            println!(
                "checkpoint={} optimize={} vacuum={} integrity_ok={}",
                result.checkpoint_done,
                result.optimize_done,
                result.vacuum_done,
                result.integrity_ok
            );
        }
    }

    Ok(())
}

fn report(warden: &Warden, action: ReportAction) -> Result<(), WardenError> {
    match action {
        ReportAction::Spent { user, days, json } => {
            let from = warden.now_epoch() - days * 86_400;
            let spent = warden.time_spent_by_limit_and_date(&user, from, None)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&spent)?);
            } else {
                let mut ids: Vec<i64> = spent.keys().copied().collect();
                ids.sort_unstable();
                for id in ids {
                    for (date, seconds) in &spent[&id] {
                        println!("{}\t{}\t{}s", id, date, seconds);
                    }
                }
            }
        }
        ReportAction::Titles {
            user,
            days,
            recent,
            json,
        } => {
            let to = warden.now_epoch() + 1;
            let from = to - days * 86_400;
            let order = if recent {
                TitleOrder::ByRecency
            } else {
                TitleOrder::BySeconds
            };
            let rows = warden.time_spent_by_title(&user, from, to, order)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in rows {
                    println!(
                        "{}s\t[{}]\t{}\t(last seen {})",
                        row.seconds, row.class_name, row.title, row.last_seen
                    );
                }
            }
        }
        ReportAction::Left { user, json } => {
            let left = warden.time_left_today(&user)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&left)?);
            } else {
                let mut ids: Vec<i64> = left.keys().copied().collect();
                ids.sort_unstable();
                for id in ids {
                    let t = &left[&id];
                    println!(
                        "{}\tlocked={}\tcurrent={}s\ttotal={}s\tslot={}\tnext={}",
                        id,
                        t.locked,
                        t.current_seconds,
                        t.total_seconds,
                        t.current_slot
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        t.next_slot
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    );
                }
            }
        }
    }
    Ok(())
}
