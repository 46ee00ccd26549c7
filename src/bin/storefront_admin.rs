use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use storefront_orders::{
    auth::{consts, AuthConfig, AuthService},
    config::{self, AppConfig},
    db::{self, DbPool},
    handlers::AppServices,
    services::{
        order_message::{render_order_message, MessageFlow, MessageOptions},
        order_status::OrderStatusResponse,
    },
};
use tokio::sync::mpsc;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    match cli.command {
        Commands::Migrate => {
            let pool = connect(&cfg).await?;
            db::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::IssueToken(args) => issue_token(&cfg, args, cli.json)?,
        Commands::Orders(command) => handle_orders_command(&cfg, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "storefront-admin",
    about = "Administrative tasks for the storefront order service",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Sign a bearer token for API access
    IssueToken(IssueTokenArgs),
    #[command(subcommand)]
    Orders(OrdersCommands),
}

#[derive(Args)]
struct IssueTokenArgs {
    #[arg(long, help = "Token subject; a UUID subject becomes the order owner")]
    subject: String,
    #[arg(long = "role", help = "Role to grant (repeatable)")]
    roles: Vec<String>,
    #[arg(long = "permission", help = "Permission to grant (repeatable)")]
    permissions: Vec<String>,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Shortcut for --role admin"
    )]
    admin: bool,
}

#[derive(Subcommand)]
enum OrdersCommands {
    /// Render the fulfillment message for an order
    Message(MessageArgs),
    /// Move an order to another status
    SetStatus(SetStatusArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum FlowArg {
    Customer,
    Admin,
}

impl From<FlowArg> for MessageFlow {
    fn from(flow: FlowArg) -> Self {
        match flow {
            FlowArg::Customer => MessageFlow::Customer,
            FlowArg::Admin => MessageFlow::Admin,
        }
    }
}

#[derive(Args)]
struct MessageArgs {
    #[arg(long, help = "Order number, e.g. ORD-2024-7KQ2M9XA")]
    number: String,
    #[arg(long, value_enum, default_value = "admin")]
    flow: FlowArg,
}

#[derive(Args)]
struct SetStatusArgs {
    #[arg(long, help = "Order number")]
    number: String,
    #[arg(long, help = "pending, completed or cancelled")]
    status: String,
}

async fn connect(cfg: &AppConfig) -> Result<DbPool> {
    debug!("Connecting to {}", cfg.database_url);
    db::establish_connection_from_app_config(cfg)
        .await
        .context("failed to connect to database")
}

fn issue_token(cfg: &AppConfig, args: IssueTokenArgs, json: bool) -> Result<()> {
    let mut roles = args.roles;
    if args.admin && !roles.iter().any(|r| r == consts::ROLE_ADMIN) {
        roles.push(consts::ROLE_ADMIN.to_string());
    }

    let auth = AuthService::new(AuthConfig::from(cfg));
    let token = auth
        .issue_token(&args.subject, roles, args.permissions)
        .context("failed to sign token")?;

    if json {
        print_json(&serde_json::json!({ "access_token": token, "token_type": "Bearer" }))?;
    } else {
        println!("{}", token);
    }
    Ok(())
}

async fn handle_orders_command(cfg: &AppConfig, command: OrdersCommands, json: bool) -> Result<()> {
    let pool = Arc::new(connect(cfg).await?);
    let (event_tx, mut event_rx) = mpsc::channel(16);
    tokio::spawn(async move { while event_rx.recv().await.is_some() {} });
    let services = AppServices::new(
        pool,
        Arc::new(storefront_orders::events::EventSender::new(event_tx)),
        cfg,
    );

    match command {
        OrdersCommands::Message(args) => {
            let order = services
                .orders
                .get_order_by_number(&args.number)
                .await
                .with_context(|| format!("failed to load order {}", args.number))?;
            let options = MessageOptions::from(&cfg.messaging);
            let rendered = render_order_message(&order, args.flow.into(), &options, Utc::now());

            if json {
                print_json(&rendered)?;
            } else {
                println!("{}\n\n{}", rendered.text, rendered.deep_link);
                if rendered.truncated {
                    eprintln!("note: message was shortened to fit {} characters", options.max_chars);
                }
            }
        }
        OrdersCommands::SetStatus(args) => {
            let order = services
                .orders
                .get_order_by_number(&args.number)
                .await
                .with_context(|| format!("failed to load order {}", args.number))?;
            let updated = services
                .order_status
                .update_status(order.order.id, &args.status)
                .await
                .context("failed to update status")?;
            let response = OrderStatusResponse::from(updated);

            if json {
                print_json(&response)?;
            } else {
                println!(
                    "Order {} is now {}",
                    response.order_number,
                    response.status.as_str()
                );
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
