use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use jdbg::{
    config::JdbgConfig,
    launch::{check_main_class, LaunchSpec},
    session, DebugError, JdwpTarget, Operator, Session,
};
use tokio::io::BufReader;

const USAGE: &str = "Please provide a class to debug. Usage: jdbg <debuggee> [<debuggee-args>, ..]";

/// Interactive line-oriented debugger for Java programs.
#[derive(Debug, Parser)]
#[command(name = "jdbg", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `JDBG_CONFIG` is used as a fallback. When neither is provided
    /// built-in defaults are used.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Classpath of the debuggee. Overrides the config file and `CLASSPATH`.
    #[arg(long)]
    classpath: Option<String>,

    /// The `java` launcher to run the debuggee with.
    #[arg(long)]
    java: Option<PathBuf>,

    /// Fully qualified name of the class whose `main` is debugged.
    target: Option<String>,

    /// Arguments passed to the debuggee's `main`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let Some(main_class) = cli.target.clone() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let config = load_config(cli.config.clone());
    jdbg::logging::init(&config.logging);

    match run(cli, main_class, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if err
                .downcast_ref::<DebugError>()
                .is_some_and(DebugError::is_disconnect)
            {
                tracing::error!(target: "jdbg.session", error = %err, "lost the connection to the debuggee");
            }
            eprintln!("jdbg: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, main_class: String, config: JdbgConfig) -> anyhow::Result<()> {
    let classpath = config
        .java
        .effective_classpath(cli.classpath.as_deref(), std::env::var("CLASSPATH").ok());
    check_main_class(&classpath, &main_class)?;

    let mut operator = Operator::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
    operator
        .say(&format!("Starting debugging {main_class}"))
        .await?;
    operator.say("").await?;
    let breakpoints = session::read_initial_breakpoints(&mut operator).await?;

    let spec = LaunchSpec {
        java: cli.java.unwrap_or_else(|| config.java.java.clone()),
        classpath,
        vm_args: config.java.vm_args.clone(),
        main_class: main_class.clone(),
        args: cli.args,
        client: config.jdwp.client_config(),
        attach_timeout: config.jdwp.attach_timeout(),
    };
    let target = JdwpTarget::launch(&spec)
        .await
        .with_context(|| format!("failed to launch {main_class}"))?;

    Session::new(target, operator, breakpoints).run().await?;
    Ok(())
}

fn load_config(cli_path: Option<PathBuf>) -> JdbgConfig {
    let path = cli_path.or_else(|| std::env::var_os("JDBG_CONFIG").map(PathBuf::from));
    let Some(path) = path else {
        return JdbgConfig::default();
    };

    match JdbgConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "jdbg: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            JdbgConfig::default()
        }
    }
}
