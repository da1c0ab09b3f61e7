use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;
use tokio::net::TcpListener;

use userdesk::api::{self, Validate};
use userdesk::auth::AuthState;
use userdesk::db::Database;
use userdesk::role::{CreateRoleRequest, RoleRepository};
use userdesk::settings::{APP_NAME, Locations, Settings};
use userdesk::user::{CreateUserInput, UserRepository, UserService};

fn main() {
    if let Err(err) = run(Cli::parse()) {
        let _ = writeln!(io::stderr(), "error: {err:?}");
        std::process::exit(1);
    }
}

#[derive(Debug, Parser)]
#[command(
    name = APP_NAME,
    version,
    about = "User and role administration server",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct GlobalOpts {
    /// Config file, or a directory containing config.toml
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Print results as JSON; logs switch to JSON too
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Print results as YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Never colour log output
    #[arg(long, global = true)]
    no_color: bool,
    /// Report what would change without writing anything
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Manage users
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },
    /// Manage roles
    Roles {
        #[command(subcommand)]
        command: RolesCommand,
    },
    /// Issue an access token for an existing user
    Token {
        /// User id (usr_...)
        user_id: String,
    },
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeArgs {
    /// Bind address (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the merged settings
    Show,
    /// Print the config file location
    Path,
}

#[derive(Debug, Subcommand)]
enum UsersCommand {
    /// Create a user
    Create(NewUserArgs),
}

#[derive(Debug, Clone, Args)]
struct NewUserArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "USERDESK_NEW_USER_PASSWORD", hide_env_values = true)]
    password: String,
    /// Role name to assign; repeat for several
    #[arg(long = "role", value_name = "NAME")]
    roles: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum RolesCommand {
    /// List roles
    List,
    /// Create a role
    Create {
        /// Unique role name
        name: String,
        /// Label for role pickers; defaults to the name
        #[arg(long)]
        display_name: Option<String>,
    },
}

/// Options, locations and settings for one invocation.
struct App {
    opts: GlobalOpts,
    locations: Locations,
    settings: Settings,
}

impl App {
    fn load(opts: GlobalOpts) -> Result<Self> {
        let locations = Locations::resolve(opts.config.as_deref())?;
        let settings = Settings::load(&locations.config_file)?;

        Ok(Self {
            opts,
            locations,
            settings,
        })
    }

    fn log_level(&self) -> LevelFilter {
        if self.opts.quiet {
            return LevelFilter::Error;
        }

        match self.opts.verbose {
            0 => self
                .settings
                .logging
                .level
                .parse()
                .unwrap_or(LevelFilter::Info),
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// tracing for the library and HTTP layer, env_logger for `log` calls here.
    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

        let level = self.log_level();
        let directive = level.as_str().to_ascii_lowercase();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{APP_NAME}={directive},tower_http={directive}"))
        });

        let colour = !self.opts.no_color
            && std::env::var_os("NO_COLOR").is_none()
            && io::stderr().is_terminal();

        let output: Box<dyn Layer<Registry> + Send + Sync> = match &self.settings.logging.file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating log directory {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
                if self.opts.json {
                    layer.json().boxed()
                } else {
                    layer.boxed()
                }
            }
            None if self.opts.json => fmt::layer().json().with_writer(io::stderr).boxed(),
            None => fmt::layer()
                .with_ansi(colour)
                .with_writer(io::stderr)
                .boxed(),
        };

        tracing_subscriber::registry()
            .with(output)
            .with(filter)
            .try_init()
            .ok();

        env_logger::Builder::new()
            .filter_level(level)
            .write_style(if colour {
                env_logger::WriteStyle::Auto
            } else {
                env_logger::WriteStyle::Never
            })
            .try_init()
            .ok();

        Ok(())
    }

    async fn database(&self) -> Result<Database> {
        let path = self.locations.database(&self.settings);
        debug!("database: {}", path.display());
        Database::new(&path).await
    }

    /// Print `value` as JSON or YAML when asked to. Returns whether it did.
    fn emit<T: Serialize>(&self, value: &T) -> Result<bool> {
        if self.opts.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else if self.opts.yaml {
            print!("{}", serde_yaml::to_string(value)?);
        } else {
            return Ok(false);
        }
        Ok(true)
    }
}

#[tokio::main]
async fn run(cli: Cli) -> Result<()> {
    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), APP_NAME, &mut io::stdout());
        return Ok(());
    }

    let app = App::load(cli.global)?;
    app.init_logging()?;
    debug!(
        "config: {}, data: {}",
        app.locations.config_file.display(),
        app.locations.data_dir.display()
    );

    match cli.command {
        Command::Serve(args) => serve(&app, args).await,
        Command::Init { force } => init(&app, force),
        Command::Config { command } => config(&app, command),
        Command::Users { command } => users(&app, command).await,
        Command::Roles { command } => roles(&app, command).await,
        Command::Token { user_id } => token(&app, &user_id).await,
        Command::Completions { .. } => Ok(()),
    }
}

fn init(app: &App, force: bool) -> Result<()> {
    let path = &app.locations.config_file;
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists (pass --force to overwrite)",
            path.display()
        ));
    }

    if app.opts.dry_run {
        info!("dry-run: would write {}", path.display());
        return Ok(());
    }

    Settings::write_default(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn config(app: &App, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if !app.emit(&app.settings)? {
                print!("{}", toml::to_string_pretty(&app.settings)?);
            }
        }
        ConfigCommand::Path => println!("{}", app.locations.config_file.display()),
    }
    Ok(())
}

async fn users(app: &App, command: UsersCommand) -> Result<()> {
    let UsersCommand::Create(args) = command;

    let database = app.database().await?;
    let roles = RoleRepository::new(database.pool().clone());
    let known = roles.list().await?;

    let role_ids = args
        .roles
        .iter()
        .map(|name| {
            known
                .iter()
                .find(|role| &role.name == name)
                .map(|role| role.id)
                .ok_or_else(|| anyhow!("unknown role '{name}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    let input = CreateUserInput {
        name: args.name,
        email: args.email,
        password_confirmation: args.password.clone(),
        password: args.password,
        roles: role_ids,
    };

    let errors = input.validate();
    if !errors.is_empty() {
        let messages: Vec<String> = errors.into_values().flatten().collect();
        return Err(anyhow!(messages.join(" ")));
    }

    if app.opts.dry_run {
        info!("dry-run: would create user {}", input.email);
        return Ok(());
    }

    let service = UserService::new(UserRepository::new(database.pool().clone()));
    let user = service.store(input).await?;

    if !app.emit(&user)? {
        println!("Created {} <{}> as {}", user.name, user.email, user.id);
    }
    Ok(())
}

async fn roles(app: &App, command: RolesCommand) -> Result<()> {
    let database = app.database().await?;
    let roles = RoleRepository::new(database.pool().clone());

    match command {
        RolesCommand::List => {
            let list = roles.list().await?;
            if !app.emit(&list)? {
                println!("{:<4} {:<16} LABEL", "ID", "NAME");
                for role in &list {
                    println!("{:<4} {:<16} {}", role.id, role.name, role.display_name);
                }
            }
        }
        RolesCommand::Create { name, display_name } => {
            if app.opts.dry_run {
                info!("dry-run: would create role {name}");
                return Ok(());
            }

            let role = roles
                .create(CreateRoleRequest { name, display_name })
                .await?;
            if !app.emit(&role)? {
                println!("Created role {} ({})", role.name, role.id);
            }
        }
    }
    Ok(())
}

async fn token(app: &App, user_id: &str) -> Result<()> {
    let database = app.database().await?;
    let users = UserService::new(UserRepository::new(database.pool().clone()));
    let roles = RoleRepository::new(database.pool().clone());

    let user = users
        .find(user_id)
        .await?
        .ok_or_else(|| anyhow!("no user with id {user_id}"))?;
    let role_names = roles.names_for_user(&user.id).await?;

    let token = AuthState::new(app.settings.auth.clone())
        .issue_token(&user.id, &user.email, &user.name, role_names.clone())
        .context("issuing token")?;

    #[derive(Serialize)]
    struct Issued<'a> {
        user_id: &'a str,
        roles: &'a [String],
        token: &'a str,
    }

    let issued = Issued {
        user_id: &user.id,
        roles: &role_names,
        token: &token,
    };
    if !app.emit(&issued)? {
        println!("{token}");
    }
    Ok(())
}

async fn serve(app: &App, args: ServeArgs) -> Result<()> {
    let auth = app.settings.auth.clone();
    auth.validate().context("invalid [auth] settings")?;
    if auth.dev_mode {
        warn!("dev mode: X-Dev-User is accepted, keep this server private");
    }

    let database = app.database().await?;
    let router = api::create_router(userdesk::build_state(&database, auth)?);

    let host = args.host.unwrap_or_else(|| app.settings.server.host.clone());
    let port = args.port.unwrap_or(app.settings.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("{APP_NAME} listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutting down");
}
