//! Regusto CLI - drive the marketplace client from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (password read from REGUSTO_PASSWORD)
//! regusto login -e ana@example.com
//!
//! # Browse and favorite stores
//! regusto stores --nearby
//! regusto favorite 42
//!
//! # Fill the cart and pay
//! regusto cart add --product 3 --instance 7 --quantity 2
//! regusto cart qty --instance 7 --delta -1
//! regusto checkout
//!
//! # Follow an order's chat
//! regusto chat tail 99
//! ```
//!
//! # Commands
//!
//! - `login` / `logout` - Manage the stored session
//! - `stores`, `favorite` - Store listing and favorites
//! - `cart show|add|qty|remove` - Cart edits
//! - `orders`, `checkout`, `paid`, `rate` - Orders and payment
//! - `chat tail|send` - Order chat

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::CliError;

const DEFAULT_FILTER: &str = "regusto_client=info,regusto_cli=info";
const DEFAULT_SESSION_FILE: &str = ".regusto-session.json";

#[derive(Parser)]
#[command(name = "regusto")]
#[command(author, version, about = "Regusto marketplace client")]
struct Cli {
    /// Where the session is kept between runs
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        /// Account email address
        #[arg(short, long)]
        email: String,
    },
    /// Forget the stored session
    Logout,
    /// List stores
    Stores {
        /// Only stores near the active address
        #[arg(long)]
        nearby: bool,
    },
    /// Toggle a store favorite
    Favorite {
        /// Store id
        store: String,
    },
    /// Inspect or edit the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// List orders
    Orders,
    /// Place an order for the cart and print the payment link
    Checkout,
    /// Finish a paid order from its payment return link
    Paid {
        /// Deep link the payment page redirected to
        link: String,
    },
    /// Rate a completed order
    Rate {
        /// Order id
        order: String,

        /// 1 to 5
        #[arg(short, long)]
        stars: u8,

        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Order chat
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the cart
    Show,
    /// Add a product instance
    Add {
        /// Product the instance belongs to
        #[arg(long)]
        product: String,

        /// Product instance id
        #[arg(long)]
        instance: String,

        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Change a line's quantity
    Qty {
        /// Product instance id
        #[arg(long)]
        instance: String,

        /// Signed change, e.g. -1
        #[arg(long, allow_hyphen_values = true)]
        delta: i64,
    },
    /// Remove a line
    Remove {
        /// Product instance id
        #[arg(long)]
        instance: String,
    },
}

#[derive(Subcommand)]
enum ChatAction {
    /// Print the history, then follow new messages until Ctrl-C
    Tail {
        /// Order id
        order: String,
    },
    /// Send a message
    Send {
        /// Order id
        order: String,

        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Command failed: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let session_file = cli
        .session_file
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));
    let ctx = commands::context(session_file)?;

    match cli.command {
        Commands::Login { email } => commands::session::login(&ctx, &email).await?,
        Commands::Logout => commands::session::logout(&ctx).await?,
        Commands::Stores { nearby } => commands::stores::list(&ctx, nearby).await?,
        Commands::Favorite { store } => commands::stores::favorite(&ctx, &store).await?,
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(&ctx).await?,
            CartAction::Add {
                product,
                instance,
                quantity,
            } => commands::cart::add(&ctx, &product, &instance, quantity).await?,
            CartAction::Qty { instance, delta } => {
                commands::cart::change(&ctx, &instance, delta).await?;
            }
            CartAction::Remove { instance } => commands::cart::remove(&ctx, &instance).await?,
        },
        Commands::Orders => commands::orders::list(&ctx).await?,
        Commands::Checkout => commands::orders::checkout(&ctx).await?,
        Commands::Paid { link } => commands::orders::paid(&ctx, &link).await?,
        Commands::Rate {
            order,
            stars,
            description,
        } => commands::orders::rate(&ctx, &order, stars, description).await?,
        Commands::Chat { action } => match action {
            ChatAction::Tail { order } => commands::chat::tail(&ctx, &order).await?,
            ChatAction::Send { order, text } => commands::chat::send(&ctx, &order, &text).await?,
        },
    }
    Ok(())
}
