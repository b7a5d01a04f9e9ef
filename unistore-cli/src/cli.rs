//! Argument parsing and command dispatch for the `unistore` binary.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use unistore_service::Storage;

use crate::commands;
use crate::config::Config;
use crate::observability;

/// Uniform access to local, cloud, NAS and Casdoor object storage.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Get(GetCommand),
    Cat(CatCommand),
    Put(PutCommand),
    Rm(RmCommand),
    Ls(LsCommand),
    Url(UrlCommand),
    Endpoint(EndpointCommand),
    Version(VersionCommand),
}

/// download an object into a local file
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "get")]
struct GetCommand {
    /// object path, URL or Windows-style path
    #[argh(positional)]
    path: String,

    /// file to write to, defaults to the object name in the current directory
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

/// write the contents of an object to stdout
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "cat")]
struct CatCommand {
    /// object path
    #[argh(positional)]
    path: String,
}

/// upload a local file, or stdin, to an object
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "put")]
struct PutCommand {
    /// object path
    #[argh(positional)]
    path: String,

    /// local file to upload; reads stdin when omitted
    #[argh(positional)]
    file: Option<PathBuf>,
}

/// delete an object
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "rm")]
struct RmCommand {
    /// object path
    #[argh(positional)]
    path: String,
}

/// list objects whose path starts with a prefix
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "ls")]
struct LsCommand {
    /// path prefix; lists everything when omitted
    #[argh(positional, default = "String::new()")]
    prefix: String,
}

/// print a URL through which an object can be fetched directly
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "url")]
struct UrlCommand {
    /// object path
    #[argh(positional)]
    path: String,
}

/// print the endpoint of the configured storage
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "endpoint")]
struct EndpointCommand {}

/// print the unistore version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("unistore-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        let storage = Storage::new(config.storage).await?;
        tracing::debug!(backend = storage.backend_name(), "Storage ready");

        let mut stdout = std::io::stdout();
        let result = run(&storage, args.command, &mut stdout).await;

        // Always release the provider session, even when the command failed.
        if let Err(error) = storage.shutdown().await {
            tracing::warn!(error = &error as &dyn std::error::Error, "Failed to shut down storage");
        }

        result
    })
}

async fn run(storage: &Storage, command: Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Get(GetCommand { path, output }) => {
            commands::get(storage, &path, output.as_deref(), out).await
        }
        Command::Cat(CatCommand { path }) => commands::cat(storage, &path, out).await,
        Command::Put(PutCommand { path, file }) => {
            commands::put(storage, &path, file.as_deref(), out).await
        }
        Command::Rm(RmCommand { path }) => commands::rm(storage, &path, out).await,
        Command::Ls(LsCommand { prefix }) => commands::ls(storage, &prefix, out).await,
        Command::Url(UrlCommand { path }) => commands::url(storage, &path, out).await,
        Command::Endpoint(EndpointCommand {}) => commands::endpoint(storage, out),
        Command::Version(VersionCommand {}) => {
            writeln!(out, "{}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
    }
}
