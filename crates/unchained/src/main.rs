use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use log::{LevelFilter, debug};
use serde_json::Value;
use unchained::{
    Error,
    cli::require_confirmation,
    config::ProjectConfig,
    env::Env,
    factory::AppFactory,
    module::FsModuleLoader,
    scaffold,
    template::{Context, Template},
};

#[derive(Parser, Debug)]
#[command(name = "unchained", version, about = "Boot, inspect and scaffold unchained projects")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Project config file (default: $UNCHAINED_CONFIG or the nearest unchained.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment to boot for (default: $FLASK_ENV or production)
    #[arg(long, global = true)]
    env: Option<Env>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List bundles in boot order with their hierarchies
    Bundles,
    /// List hooks in execution order
    Hooks,
    /// Boot the app and print the merged configuration as TOML
    Config,
    /// Preprocess a single template
    Render {
        template: PathBuf,
        /// Context value; VALUE is read as JSON when it parses, else as a string
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
        set: Vec<(String, Value)>,
    },
    /// Create a starter project
    New {
        dest: PathBuf,
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
        set: Vec<(String, Value)>,
        /// Write into a non-empty directory without asking
        #[arg(long)]
        force: bool,
    },
}

fn parse_assignment(arg: &str) -> Result<(String, Value), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {arg:?}"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in {arg:?}"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    Ok((key.trim().to_owned(), value))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn load_project(config: Option<&Path>) -> anyhow::Result<ProjectConfig> {
    let project = match config {
        Some(path) => ProjectConfig::from_path(path)?,
        None => {
            let cwd = std::env::current_dir().context("cannot read the working directory")?;
            ProjectConfig::discover(&cwd)?
        }
    };
    debug!("Project root: {}", project.root.display());
    Ok(project)
}

fn resolve_env(env: Option<Env>) -> unchained::Result<Env> {
    env.map_or_else(Env::from_environment, Ok)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    match cli.command {
        Command::Bundles => {
            let project = load_project(cli.config.as_deref())?;
            let factory = AppFactory::new(FsModuleLoader::new(&project.root));
            for bundle in factory.load_bundles(&project)? {
                let hierarchy: Vec<_> = bundle.self_and_ancestors().map(|b| b.module_name()).collect();
                let marker = if bundle.is_app() { " [app]" } else { "" };
                writeln!(out, "{}{marker}: {}", bundle.name(), hierarchy.join(" -> "))?;
            }
        }
        Command::Hooks => {
            let project = load_project(cli.config.as_deref())?;
            let factory = AppFactory::new(FsModuleLoader::new(&project.root));
            let bundles = factory.load_bundles(&project)?;
            for hook in factory.ordered_hooks(&bundles)? {
                let after = hook.run_after();
                if after.is_empty() {
                    writeln!(out, "{}", hook.name())?;
                } else {
                    writeln!(out, "{} (after {})", hook.name(), after.join(", "))?;
                }
            }
        }
        Command::Config => {
            let project = load_project(cli.config.as_deref())?;
            let env = resolve_env(cli.env)?;
            let factory = AppFactory::new(FsModuleLoader::new(&project.root));
            let app = factory.create_app(&project, env)?;
            write!(out, "{}", app.config().to_toml_string()?)?;
        }
        Command::Render { template, set } => {
            let context: Context = set.into_iter().collect();
            let rendered = Template::parse_file(&template)?.render(&context)?;
            write!(out, "{rendered}")?;
        }
        Command::New { dest, set, force } => {
            let name = dest
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("app")
                .to_owned();
            let mut context = scaffold::starter_context(&name);
            context.extend(set);
            if !force && !scaffold::is_empty_dir(&dest)? {
                let prompt = format!("{} is not empty. Write the project into it anyway?", dest.display());
                require_confirmation(&prompt, &mut io::stdin().lock(), &mut out)?;
            }
            for path in scaffold::render_starter(&dest, &context)? {
                writeln!(out, "created {}", path.display())?;
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.downcast_ref::<Error>().map_or(1, Error::exit_code);
            let _ = writeln!(io::stderr(), "error: {err:#}");
            ExitCode::from(code)
        }
    }
}
