use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use advisor_connect::admin::NewUserRequest;
use advisor_connect::advisor::feed::LoadOutcome;
use advisor_connect::advisor::filter::{FilterState, SortColumn, SortDirection};
use advisor_connect::advisor::{Advisor, DISPLAY_HEADERS};
use advisor_connect::app::App;
use advisor_connect::backend::{OptionColumn, UserType};
use advisor_connect::config::Config;
use advisor_connect::gateway::{GatewayState, start_server};
use advisor_connect::lists::{LOCAL_OWNER, ListCollection};
use advisor_connect::reports::rows_to_csv;
use advisor_connect::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "advisor-connect", author, version, about)]
struct Cli {
    /// Settings file (TOML). Defaults to the per-user config directory.
    #[arg(long, global = true, env = "ADVISOR_CONNECT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP gateway.
    Serve {
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Browse the advisor directory.
    #[command(subcommand)]
    Advisors(AdvisorsCommand),
    /// Inspect saved favorites and reports.
    #[command(subcommand)]
    Lists(ListsCommand),
    /// Admin console operations.
    #[command(subcommand)]
    Admin(AdminCommand),
}

#[derive(Subcommand, Debug)]
enum AdvisorsCommand {
    /// List advisors matching the filters, one page at a time.
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Keep loading until every matching advisor is fetched.
        #[arg(long)]
        all: bool,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show the distinct province, city, firm and team values.
    Options,
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    #[arg(long = "province")]
    provinces: Vec<String>,
    #[arg(long = "city")]
    cities: Vec<String>,
    #[arg(long = "firm")]
    firms: Vec<String>,
    #[arg(long = "team")]
    teams: Vec<String>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long, value_parser = parse_sort)]
    sort: Option<SortColumn>,
    #[arg(long, value_parser = parse_direction)]
    dir: Option<SortDirection>,
}

impl FilterArgs {
    fn into_filter(self) -> FilterState {
        FilterState {
            provinces: self.provinces.into_iter().collect(),
            cities: self.cities.into_iter().collect(),
            firms: self.firms.into_iter().collect(),
            teams: self.teams.into_iter().collect(),
            search: self.search.unwrap_or_default(),
            sort: self.sort.unwrap_or_default(),
            direction: self.dir.unwrap_or_default(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum ListsCommand {
    /// Show every list in a collection, or the rows of one list.
    Show {
        #[arg(value_parser = parse_collection)]
        collection: ListCollection,
        name: Option<String>,
        #[arg(long, default_value = LOCAL_OWNER)]
        owner: String,
    },
    /// Delete one list.
    Delete {
        #[arg(value_parser = parse_collection)]
        collection: ListCollection,
        name: String,
        #[arg(long, default_value = LOCAL_OWNER)]
        owner: String,
    },
    /// Write a report as CSV to stdout.
    Export {
        name: String,
        #[arg(long, default_value = LOCAL_OWNER)]
        owner: String,
    },
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Create a user with a temporary password and send the invite.
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long, default_value = "")]
        company: String,
        /// Grant the admin role.
        #[arg(long)]
        admin: bool,
    },
    /// Activate a user, or deactivate with `--inactive`.
    SetActive {
        user_id: Uuid,
        #[arg(long)]
        inactive: bool,
    },
}

fn parse_sort(raw: &str) -> Result<SortColumn, String> {
    SortColumn::from_param(raw).ok_or_else(|| format!("unknown sort column '{raw}'"))
}

fn parse_direction(raw: &str) -> Result<SortDirection, String> {
    SortDirection::from_param(raw).ok_or_else(|| format!("expected 'asc' or 'desc', got '{raw}'"))
}

fn parse_collection(raw: &str) -> Result<ListCollection, String> {
    raw.parse()
}

fn init_tracing(to_stderr: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("advisor_connect=info,tower_http=info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);
    match (json, to_stderr) {
        (true, true) => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (true, false) => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        (false, true) => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        (false, false) => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                tracing::warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_rows(rows: &[Advisor]) {
    println!("{}", DISPLAY_HEADERS[..8].join(" | "));
    for row in rows {
        println!("{}", row.display_values()[..8].join(" | "));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(!matches!(cli.command, Command::Serve { .. }));

    let settings = Settings::load(cli.config.as_deref())?;
    let mut config = Config::resolve(&settings)?;
    if let Command::Serve { port: Some(port) } = cli.command {
        config.gateway.port = port;
    }
    let app = App::from_config(&config)
        .await
        .context("failed to start application services")?;

    match cli.command {
        Command::Serve { .. } => {
            let state = Arc::new(
                GatewayState::new(app, &config.gateway).with_origin(&config.email.app_url),
            );
            start_server(config.gateway.socket_addr(), state.clone()).await?;
            shutdown_signal().await;
            state.shutdown().await;
        }
        Command::Advisors(AdvisorsCommand::List { filter, all, json }) => {
            let feed = app.feed();
            if feed.apply(filter.into_filter()).await == LoadOutcome::Failed {
                let snapshot = feed.snapshot();
                bail!(snapshot.error.unwrap_or_else(|| "failed to load advisors".to_string()));
            }
            let snapshot = if all { feed.load_all().await } else { feed.snapshot() };
            if let Some(error) = snapshot.error {
                bail!(error);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot.rows)?);
            } else if snapshot.rows.is_empty() {
                println!("No advisors match the current filters.");
            } else {
                print_rows(&snapshot.rows);
                println!(
                    "\nShowing {} of {}{}",
                    snapshot.rows.len(),
                    snapshot.total,
                    if snapshot.has_more { " (use --all to load the rest)" } else { "" }
                );
            }
        }
        Command::Advisors(AdvisorsCommand::Options) => {
            let store = &app.backend.advisors;
            let (provinces, cities, firms, teams) = futures::try_join!(
                store.distinct_values(OptionColumn::Province),
                store.distinct_values(OptionColumn::City),
                store.distinct_values(OptionColumn::Firm),
                store.distinct_values(OptionColumn::Team),
            )?;
            for (label, values) in [
                ("Provinces", provinces),
                ("Cities", cities),
                ("Firms", firms),
                ("Teams", teams),
            ] {
                println!("{label} ({}): {}", values.len(), values.join(", "));
            }
        }
        Command::Lists(ListsCommand::Show {
            collection,
            name: None,
            owner,
        }) => {
            let summaries = app.lists.summaries(&owner, collection).await?;
            if summaries.is_empty() {
                println!("No {} saved.", collection.as_str());
            }
            for summary in summaries {
                println!("{} ({} rows)", summary.name, summary.count);
            }
        }
        Command::Lists(ListsCommand::Show {
            collection,
            name: Some(name),
            owner,
        }) => {
            let rows = app.lists.get_list(&owner, collection, &name).await?;
            print_rows(&rows);
        }
        Command::Lists(ListsCommand::Delete {
            collection,
            name,
            owner,
        }) => {
            app.lists.delete_list(&owner, collection, &name).await?;
            println!("Deleted '{}' from {}.", name.trim(), collection.as_str());
        }
        Command::Lists(ListsCommand::Export { name, owner }) => {
            let rows = app
                .lists
                .get_list(&owner, ListCollection::Reports, &name)
                .await?;
            print!("{}", rows_to_csv(&rows)?);
        }
        Command::Admin(AdminCommand::CreateUser {
            email,
            first_name,
            last_name,
            company,
            admin,
        }) => {
            let created = app
                .admin
                .create_user(NewUserRequest {
                    email,
                    first_name,
                    last_name,
                    company,
                    user_type: if admin { UserType::Admin } else { UserType::User },
                })
                .await?;
            println!(
                "Created {} ({}) as {}",
                created.profile.email,
                created.profile.id,
                created.profile.user_type.as_str()
            );
            match created.temporary_password {
                Some(password) => println!("Invite not delivered. Temporary password: {password}"),
                None => println!("Invite sent."),
            }
        }
        Command::Admin(AdminCommand::SetActive { user_id, inactive }) => {
            let change = app.admin.set_active(user_id, !inactive).await?;
            println!(
                "{} is now {}{}",
                change.profile.email,
                if change.profile.is_active { "active" } else { "inactive" },
                if change.email_sent { "" } else { " (notification not sent)" }
            );
        }
    }
    Ok(())
}
