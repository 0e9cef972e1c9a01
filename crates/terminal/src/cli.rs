use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use forgepos_core::{TableId, TransactionId};
use forgepos_observability::LogFormat;

#[derive(Parser, Debug)]
#[command(
    name = "forgepos",
    version,
    about = "ForgePOS terminal: offline-first sales delivery",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Server base URL (overrides FORGEPOS_API_URL).
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Offline store path, or `:memory:` (overrides FORGEPOS_DB_PATH).
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Bearer token sent with every request.
    #[arg(long, global = true, env = "FORGEPOS_AUTH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Per-request timeout in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Log output format: json or pretty.
    #[arg(long, global = true, default_value = "pretty", env = "FORGEPOS_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the background sync worker until interrupted.
    Run,
    /// Send one request through the offline interceptor.
    Submit(SubmitArgs),
    /// Record a sale locally and deliver it.
    Sale(SaleArgs),
    /// Show the current sync status.
    Status,
    /// Replay the request queue now.
    Sync,
    /// List queued requests, oldest first.
    Queue,
    /// Delete every queued request.
    ClearQueue {
        /// Confirm; queued sales are lost.
        #[arg(long)]
        yes: bool,
    },
    /// List transactions not yet confirmed by the server.
    Transactions,
    /// Refresh cached reference data.
    RefreshCache {
        /// Kinds to refresh (default: every configured kind).
        kinds: Vec<String>,
    },
    /// Manage per-table carts.
    #[command(subcommand)]
    Table(TableCommand),
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    #[arg(long, default_value = "POST")]
    pub method: String,

    /// Absolute URL or path relative to the server base URL.
    pub url: String,

    /// Request body, sent verbatim.
    #[arg(long)]
    pub body: Option<String>,

    /// Extra header as `name:value`; repeatable.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct SaleArgs {
    /// Sale total in minor units.
    #[arg(long, required_unless_present = "table")]
    pub total: Option<u64>,

    /// Local transaction id (default: a new one).
    #[arg(long)]
    pub id: Option<TransactionId>,

    /// Settle the cart of this table instead of an ad-hoc total.
    #[arg(long, conflicts_with = "total")]
    pub table: Option<TableId>,
}

#[derive(Subcommand, Debug)]
pub enum TableCommand {
    /// Add a product to a table's cart, opening it if needed.
    Add {
        table: TableId,
        product_id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 1)]
        quantity: i64,
        /// Unit price in minor units.
        #[arg(long)]
        price: u64,
    },
    /// Show every open cart.
    Show,
    /// Close a table's cart without a sale.
    Close { table: TableId },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header '{raw}' must be name:value"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header '{raw}' has an empty name"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn submit_parses_headers_and_globals() {
        let cli = Cli::try_parse_from([
            "forgepos",
            "--api-url",
            "http://pos.local:3000",
            "submit",
            "/api/receipts",
            "--body",
            "{}",
            "-H",
            "X-Till: 4",
        ])
        .unwrap();

        assert_eq!(cli.api_url.as_deref(), Some("http://pos.local:3000"));
        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(args.method, "POST");
        assert_eq!(args.headers, vec![("X-Till".to_string(), "4".to_string())]);
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(Cli::try_parse_from(["forgepos", "submit", "/x", "-H", "novalue"]).is_err());
    }

    #[test]
    fn table_add_parses_ids() {
        let table = TableId::new();
        let table_str = table.to_string();
        let cli = Cli::try_parse_from([
            "forgepos", "table", "add", table_str.as_str(), "sku-1", "--name", "Tea", "--price", "300",
        ])
        .unwrap();

        match cli.command {
            Command::Table(TableCommand::Add { table: parsed, quantity, price, .. }) => {
                assert_eq!(parsed, table);
                assert_eq!(quantity, 1);
                assert_eq!(price, 300);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
