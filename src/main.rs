//! Taskforge - command-line task tracker
//!
//! Each invocation loads the task file, runs one action, prints the result,
//! and flushes pending writes before exiting.

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod render;

use taskforge::actions::{
    generate_task_files, ActionDefaults, ComplexityOptions, ExpandOptions, FileFormat,
    GenerateOptions, NewSubtask, NewTask, ParsePrdOptions, SubtaskSource, TaskActions, TaskUpdate,
};
use taskforge::task::{parse_id_list, EntityId, Priority, TaskId, TaskStatus};
use taskforge::{LlmTaskGenerator, ProjectConfig, StoreOptions, TaskStore, TaskforgeError};

#[derive(Parser)]
#[command(name = "taskforge")]
#[command(version)]
#[command(about = "Task tracking with dependency validation and AI-generated subtasks", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Alternate task file for this invocation
    #[arg(short, long, global = true, env = "TASKFORGE_FILE")]
    file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print full error details
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the settings and task files for a project
    Init {
        /// Project name stored in the task file
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List tasks
    List {
        /// Only show tasks with this status
        #[arg(short, long)]
        status: Option<TaskStatus>,

        /// Show subtasks under each task
        #[arg(long)]
        with_subtasks: bool,
    },

    /// Show one task or subtask (5 or 5.2)
    Show { id: EntityId },

    /// Show the next task to work on
    Next,

    /// Add a task
    Add {
        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        /// high, medium, or low
        #[arg(long)]
        priority: Option<Priority>,

        /// Comma-separated ids this task depends on
        #[arg(long, value_delimiter = ',')]
        dependencies: Vec<EntityId>,

        #[arg(long)]
        details: Option<String>,

        #[arg(long)]
        test_strategy: Option<String>,
    },

    /// Change fields of a task
    Update {
        id: TaskId,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        priority: Option<Priority>,

        #[arg(short, long)]
        status: Option<TaskStatus>,

        /// Replace the dependency list (comma-separated)
        #[arg(long, value_delimiter = ',')]
        dependencies: Option<Vec<EntityId>>,

        #[arg(long)]
        details: Option<String>,

        #[arg(long)]
        test_strategy: Option<String>,
    },

    /// Remove a task nothing depends on
    Remove { id: TaskId },

    /// Set the status of tasks or subtasks
    SetStatus {
        /// Comma-separated ids, e.g. 3,4.1
        ids: String,

        /// pending, in-progress, review, done, deferred, cancelled, or custom:<name>
        status: TaskStatus,
    },

    /// Add a subtask, or convert a task into one
    AddSubtask {
        /// Parent task id
        #[arg(long)]
        parent: TaskId,

        #[arg(short, long, conflicts_with = "task_id")]
        title: Option<String>,

        /// Convert this existing task instead of creating a new subtask
        #[arg(long)]
        task_id: Option<TaskId>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        priority: Option<Priority>,

        #[arg(short, long)]
        status: Option<TaskStatus>,

        #[arg(long, value_delimiter = ',')]
        dependencies: Vec<EntityId>,

        #[arg(long)]
        details: Option<String>,
    },

    /// Remove a subtask, or turn it into a task
    RemoveSubtask {
        /// Subtask id, e.g. 5.2
        id: EntityId,

        /// Keep it as a new top-level task
        #[arg(long)]
        convert: bool,
    },

    /// Remove all subtasks of the given tasks
    ClearSubtasks {
        #[arg(value_delimiter = ',', required = true)]
        ids: Vec<TaskId>,
    },

    /// Make a task or subtask depend on another
    AddDependency { id: EntityId, depends_on: EntityId },

    /// Remove a dependency
    RemoveDependency { id: EntityId, depends_on: EntityId },

    /// Report missing, self, and circular dependencies
    ValidateDependencies,

    /// Remove missing, self, and duplicate dependencies
    FixDependencies,

    /// Write one file per task
    Generate {
        /// Output directory (defaults to <project>/tasks)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// markdown or text
        #[arg(long, default_value = "markdown")]
        format: FileFormat,

        /// Only tasks with this status
        #[arg(short, long)]
        status: Option<TaskStatus>,

        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,
    },

    /// Generate tasks from a requirements document
    ParsePrd {
        #[arg(id = "prd_file", value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long)]
        num_tasks: Option<u32>,

        /// Keep existing tasks and add the new ones after them
        #[arg(long)]
        append: bool,

        /// Use the research model variant
        #[arg(long)]
        research: bool,
    },

    /// Break a task into subtasks
    Expand {
        id: TaskId,

        /// Number of subtasks
        #[arg(short, long)]
        num: Option<u32>,

        /// Use the research model variant
        #[arg(long)]
        research: bool,

        /// Extra context for the generator
        #[arg(short, long)]
        context: Option<String>,

        /// Replace existing subtasks
        #[arg(long)]
        force: bool,
    },

    /// Score open tasks by complexity
    AnalyzeComplexity {
        /// Scores at or above this are flagged for expansion
        #[arg(short, long, default_value = "5")]
        threshold: u8,

        /// Only these tasks (comma-separated)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<TaskId>,

        /// Use the research model variant
        #[arg(long)]
        research: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "taskforge=debug,info"
    } else {
        "taskforge=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    let debug = cli.debug;
    if let Err(e) = run(cli, &project_path).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if debug {
            eprintln!("{e:?}");
        }
        std::process::exit(e.exit_code());
    }

    Ok(())
}

async fn run(cli: Cli, project: &Path) -> taskforge::Result<()> {
    let config = ProjectConfig::load(project)?;
    let tasks_path = config.tasks_path(project, cli.file.as_deref());

    let mut store = TaskStore::open(StoreOptions::from_config(&config, tasks_path))?;
    let outcome = dispatch(cli.command, &config, project, &mut store).await;

    // Flush pending writes even when the command failed
    let closed = store.close().await;
    outcome?;
    closed
}

async fn dispatch(
    command: Commands,
    config: &ProjectConfig,
    project: &Path,
    store: &mut TaskStore,
) -> taskforge::Result<()> {
    let mut actions =
        TaskActions::new(store).with_defaults(ActionDefaults::from_config(config));

    match command {
        Commands::Init { name } => {
            let settings = ProjectConfig::settings_path(project);
            if !settings.exists() {
                let mut settings_config = config.clone();
                settings_config.project_name = name.clone().or(settings_config.project_name);
                let path = settings_config.save(project)?;
                println!("   Created {}", path.display());
            }
            let name = name.or_else(|| config.project_name.clone());
            if actions.initialize(name.as_deref())? {
                println!("   Created {}", actions.store().path().display());
            }
            println!("\n{} Project initialized", "OK".green().bold());
            println!("\nQuick start:");
            println!("  1. Run: taskforge parse-prd requirements.md");
            println!("  2. Run: taskforge next");
        }

        Commands::List {
            status,
            with_subtasks,
        } => {
            let all = actions.store().tasks();
            let shown: Vec<_> = all
                .iter()
                .filter(|t| status.as_ref().is_none_or(|s| *s == t.status))
                .cloned()
                .collect();
            print!("{}", render::task_list(&shown, all, with_subtasks));
        }

        Commands::Show { id } => {
            let store = actions.store();
            let task = store
                .get_task_by_id(id.task)
                .ok_or_else(|| TaskforgeError::not_found(EntityId::task(id.task)))?;
            match id.subtask {
                None => print!("{}", render::task_detail(task, store.tasks())),
                Some(sub_id) => {
                    let sub = task
                        .subtask(sub_id)
                        .ok_or_else(|| TaskforgeError::not_found(id))?;
                    print!("{}", render::subtask_detail(task, sub, store.tasks()));
                }
            }
        }

        Commands::Next => {
            let store = actions.store();
            print!("{}", render::next_task(store.get_next_task(), store.tasks()));
        }

        Commands::Add {
            title,
            description,
            priority,
            dependencies,
            details,
            test_strategy,
        } => {
            let task = actions.add_task(NewTask {
                title,
                description: description.unwrap_or_default(),
                priority,
                dependencies,
                details,
                test_strategy,
                ..NewTask::default()
            })?;
            println!("{} Added task {}\n", "OK".green().bold(), task.id);
            print!("{}", render::task_detail(&task, actions.store().tasks()));
        }

        Commands::Update {
            id,
            title,
            description,
            priority,
            status,
            dependencies,
            details,
            test_strategy,
        } => {
            let task = actions.update_task(
                id,
                TaskUpdate {
                    title,
                    description,
                    priority,
                    status,
                    details,
                    test_strategy,
                    dependencies,
                },
            )?;
            println!("{} Updated task {}\n", "OK".green().bold(), task.id);
            print!("{}", render::task_detail(&task, actions.store().tasks()));
        }

        Commands::Remove { id } => {
            let task = actions.remove_task(id)?;
            println!(
                "{} Removed task {}: {}",
                "OK".green().bold(),
                task.id,
                task.title
            );
        }

        Commands::SetStatus { ids, status } => {
            let ids = parse_id_list(&ids).map_err(|e| TaskforgeError::validation(e.to_string()))?;
            actions.set_statuses(&ids, status.clone())?;
            let names: Vec<String> = ids.iter().map(ToString::to_string).collect();
            println!(
                "{} Set {} to {}",
                "OK".green().bold(),
                names.join(", "),
                render::status_label(&status)
            );
            for id in &ids {
                let Some(task) = actions.store().get_task_by_id(id.task) else {
                    continue;
                };
                if id.is_subtask() && status == TaskStatus::Done && task.status == TaskStatus::Done {
                    println!("   All subtasks of {} are done; task marked done", task.id);
                }
            }
        }

        Commands::AddSubtask {
            parent,
            title,
            task_id,
            description,
            priority,
            status,
            dependencies,
            details,
        } => {
            let source = match task_id {
                Some(existing) => SubtaskSource::Existing(existing),
                None => SubtaskSource::New(NewSubtask {
                    title: title.unwrap_or_default(),
                    description: description.unwrap_or_default(),
                    priority,
                    status,
                    dependencies,
                    details,
                    test_strategy: None,
                }),
            };
            let sub = actions.add_subtask(parent, source)?;
            println!(
                "{} Added subtask {}.{}: {}",
                "OK".green().bold(),
                parent,
                sub.id,
                sub.title
            );
        }

        Commands::RemoveSubtask { id, convert } => {
            let Some(sub_id) = id.subtask else {
                return Err(TaskforgeError::validation(format!(
                    "'{id}' is not a subtask id; expected something like {id}.1"
                )));
            };
            let removed = actions.remove_subtask(id.task, sub_id, convert)?;
            print!("{}", render::removed_subtask(id, &removed));
        }

        Commands::ClearSubtasks { ids } => {
            let cleared = actions.clear_subtasks(&ids)?;
            println!("{} Removed {cleared} subtasks", "OK".green().bold());
        }

        Commands::AddDependency { id, depends_on } => {
            actions.add_dependency(id, depends_on)?;
            println!(
                "{} {id} now depends on {depends_on}",
                "OK".green().bold()
            );
        }

        Commands::RemoveDependency { id, depends_on } => {
            actions.remove_dependency(id, depends_on)?;
            println!(
                "{} {id} no longer depends on {depends_on}",
                "OK".green().bold()
            );
        }

        Commands::ValidateDependencies => {
            print!("{}", render::validation_report(&actions.validate_dependencies()));
        }

        Commands::FixDependencies => {
            let summary = actions.fix_dependencies()?;
            let remaining = actions.validate_dependencies();
            print!("{}", render::repair_summary(&summary, &remaining));
        }

        Commands::Generate {
            output,
            format,
            status,
            overwrite,
        } => {
            let output = output.unwrap_or_else(|| project.join("tasks"));
            let files = generate_task_files(
                actions.store().tasks(),
                &output,
                &GenerateOptions {
                    format,
                    status,
                    overwrite,
                },
            )?;
            print!("{}", render::generated_files(&files));
        }

        Commands::ParsePrd {
            file,
            num_tasks,
            append,
            research,
        } => {
            let generator = build_generator(config, project)?;
            let tasks = with_spinner(
                "Generating tasks",
                actions.parse_prd(
                    &generator,
                    &file,
                    ParsePrdOptions {
                        num_tasks,
                        append,
                        research,
                    },
                ),
            )
            .await?;
            println!(
                "{} Generated {} tasks from {}\n",
                "OK".green().bold(),
                tasks.len(),
                file.display()
            );
            let all = actions.store().tasks();
            print!("{}", render::task_list(&tasks, all, false));
        }

        Commands::Expand {
            id,
            num,
            research,
            context,
            force,
        } => {
            let generator = build_generator(config, project)?;
            let expansion = with_spinner(
                "Generating subtasks",
                actions.expand_task(
                    &generator,
                    id,
                    ExpandOptions {
                        num_subtasks: num,
                        research,
                        context,
                        force,
                    },
                ),
            )
            .await?;
            print!(
                "{}",
                render::expansion(&expansion, actions.store().tasks())
            );
        }

        Commands::AnalyzeComplexity {
            threshold,
            ids,
            research,
        } => {
            let generator = build_generator(config, project)?;
            let report = with_spinner(
                "Analyzing task complexity",
                actions.analyze_complexity(
                    &generator,
                    ComplexityOptions {
                        threshold,
                        research,
                        ids: (!ids.is_empty()).then_some(ids),
                    },
                ),
            )
            .await?;
            print!("{}", render::complexity_report(&report));
        }
    }

    Ok(())
}

fn build_generator(config: &ProjectConfig, project: &Path) -> taskforge::Result<LlmTaskGenerator> {
    LlmTaskGenerator::from_config(&config.llm, project)
        .map_err(|e| TaskforgeError::config(format!("{e:#}")))
}

/// Await `work` behind a spinner on stderr.
async fn with_spinner<T>(message: &str, work: impl Future<Output = T>) -> T {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));

    let result = work.await;
    bar.finish_and_clear();
    result
}
