mod commands;

use berth_core::{install_signal_handler, AddOptions, CancelToken};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{
    EXIT_CANCELLED, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_INSTALL_ERROR, EXIT_STORE_ERROR,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "berth",
    version,
    about = "Declarative per-project package sets"
)]
struct Cli {
    /// Project directory holding berth.toml.
    #[arg(long, short = 'p', default_value = ".", global = true)]
    project: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Add packages to the project and install them.
    Add {
        /// Package references, e.g. `go@1.21`, `bin:owner/repo`, `github:owner/repo#attr`.
        #[arg(required = true)]
        packages: Vec<String>,
        /// Install only on these platforms.
        #[arg(long = "platform")]
        platforms: Vec<String>,
        /// Skip installation on these platforms.
        #[arg(long = "exclude-platform")]
        exclude_platforms: Vec<String>,
        /// Do not set up the package's plugin.
        #[arg(long, default_value_t = false)]
        disable_plugin: bool,
        /// Patch the package to use the project's glibc.
        #[arg(long, default_value_t = false)]
        patch_glibc: bool,
        /// Allow packages marked insecure.
        #[arg(long, default_value_t = false)]
        allow_insecure: bool,
    },
    /// Remove packages from the project.
    #[command(alias = "remove")]
    Rm {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Re-resolve declared packages against the index.
    Update {
        /// Packages to update; all declared packages when empty.
        packages: Vec<String>,
    },
    /// Install everything declared, doing nothing when already up to date.
    Install,
    /// List declared packages.
    List,
    /// Show the versions the index knows for a package.
    Info { package: String },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BERTH_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);

    let json_output = cli.json;
    let project = cli.project.as_path();

    let needs_backend = matches!(
        cli.command,
        Commands::Add { .. } | Commands::Rm { .. } | Commands::Update { .. } | Commands::Install
    );
    if needs_backend
        && commands::backend_name() == "nix"
        && std::env::var("BERTH_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = berth_runtime::check_nix_prereqs();
        if !missing.is_empty() {
            eprintln!("error: {}", berth_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let result = match cli.command {
        Commands::Add {
            packages,
            platforms,
            exclude_platforms,
            disable_plugin,
            patch_glibc,
            allow_insecure,
        } => commands::add::run(
            project,
            &packages,
            &AddOptions {
                platforms,
                exclude_platforms,
                disable_plugin,
                patch_glibc,
                allow_insecure,
            },
            &cancel,
            json_output,
        ),
        Commands::Rm { packages } => commands::rm::run(project, &packages, &cancel, json_output),
        Commands::Update { packages } => {
            commands::update::run(project, &packages, &cancel, json_output)
        }
        Commands::Install => commands::install::run(project, &cancel, json_output),
        Commands::List => commands::list::run(project, json_output),
        Commands::Info { package } => commands::info::run(project, &package, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("project lock:") {
                EXIT_STORE_ERROR
            } else if msg.starts_with(berth_core::INSTALLATION_ERROR_PREFIX) {
                EXIT_INSTALL_ERROR
            } else if msg == "operation cancelled" {
                EXIT_CANCELLED
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
