//! Subcommand handlers. Each prints JSON to stdout.

use anyhow::{Context, bail};
use serde_json::{Value, json};

use forgepos_core::TransactionId;
use forgepos_offline::{
    ForceSyncOutcome, OfflineError, OfflineRuntime, OutboundRequest, SubmitResponse,
};

use crate::cli::{SaleArgs, SubmitArgs, TableCommand};

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_submit(response: &SubmitResponse) -> anyhow::Result<Value> {
    Ok(match response {
        SubmitResponse::Delivered(resp) => json!({
            "status": resp.status,
            "body": resp.body,
        }),
        SubmitResponse::Queued(queued) => json!({
            "status": response.status(),
            "request_id": queued.request_id,
            "body": serde_json::to_value(&queued.body)?,
        }),
    })
}

/// Client errors are reported as the server's own response, not as a failure
/// of the terminal.
fn report_submit(result: Result<SubmitResponse, OfflineError>) -> anyhow::Result<()> {
    match result {
        Ok(response) => print_json(&render_submit(&response)?),
        Err(OfflineError::ClientRequest(resp)) => {
            print_json(&json!({ "status": resp.status, "body": resp.body }))?;
            bail!("request rejected with HTTP {}", resp.status)
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn run(runtime: &OfflineRuntime) -> anyhow::Result<()> {
    if !runtime.start_worker().await {
        bail!("sync worker not started: offline store unavailable");
    }
    tracing::info!("terminal running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    Ok(())
}

pub async fn submit(runtime: &OfflineRuntime, args: SubmitArgs) -> anyhow::Result<()> {
    let mut request = OutboundRequest::new(args.method, args.url);
    for (name, value) in args.headers {
        request = request.with_header(name, value);
    }
    if let Some(body) = args.body {
        request = request.with_body(body);
    }
    report_submit(runtime.submit(request).await)
}

pub async fn sale(runtime: &OfflineRuntime, args: SaleArgs) -> anyhow::Result<()> {
    let transaction_id = args.id.unwrap_or_default();

    let Some(table) = args.table else {
        let total = args.total.context("--total is required without --table")?;
        let request = sale_request(transaction_id, total, Value::Array(Vec::new()));
        return report_submit(runtime.record_sale(transaction_id, request).await);
    };

    let mut carts = runtime.load_table_carts().await?;
    let cart = carts
        .get(table)
        .with_context(|| format!("no open cart for table {table}"))?;
    if cart.is_empty() {
        bail!("cart for table {table} is empty");
    }
    let request = sale_request(transaction_id, cart.total(), serde_json::to_value(cart.lines())?);

    let result = runtime.record_sale(transaction_id, request).await;
    if result.is_ok() {
        carts.close(table);
        runtime.save_table_carts(&carts).await?;
    }
    report_submit(result)
}

fn sale_request(transaction_id: TransactionId, total: u64, lines: Value) -> OutboundRequest {
    OutboundRequest::post("/api/transactions").with_json(&json!({
        "id": transaction_id,
        "total": total,
        "lines": lines,
        "created_at": chrono::Utc::now(),
    }))
}

pub async fn status(runtime: &OfflineRuntime) -> anyhow::Result<()> {
    let snapshot = runtime.status().snapshot().await?;
    print_json(&snapshot)
}

pub async fn sync(runtime: &OfflineRuntime) -> anyhow::Result<()> {
    // A fresh process has not observed any failure yet; probe before refusing.
    let connectivity = runtime.connectivity();
    let health_url = runtime.config().health_url();
    if runtime
        .transport()
        .probe(&health_url, runtime.config().request_timeout)
        .await
    {
        connectivity.set_online();
    } else {
        connectivity.set_offline();
    }

    match runtime.status().force_sync().await {
        ForceSyncOutcome::Completed(report) => print_json(&report),
        ForceSyncOutcome::Offline => bail!("server unreachable; queue left untouched"),
        ForceSyncOutcome::AlreadySyncing => bail!("a sync cycle is already running"),
    }
}

pub async fn queue(runtime: &OfflineRuntime) -> anyhow::Result<()> {
    print_json(&runtime.store().list_queued().await?)
}

pub async fn clear_queue(runtime: &OfflineRuntime, yes: bool) -> anyhow::Result<()> {
    if !yes {
        bail!("refusing to drop queued requests without --yes");
    }
    let removed = runtime.store().clear_queue().await?;
    print_json(&json!({ "removed": removed }))
}

pub async fn transactions(runtime: &OfflineRuntime) -> anyhow::Result<()> {
    print_json(&runtime.store().list_unsynced_transactions().await?)
}

pub async fn refresh_cache(runtime: &OfflineRuntime, kinds: Vec<String>) -> anyhow::Result<()> {
    let kinds = if kinds.is_empty() {
        runtime.config().cached_kinds.clone()
    } else {
        kinds
    };

    let mut refreshed = serde_json::Map::new();
    for kind in kinds {
        let count = runtime
            .cache()
            .refresh(runtime.transport().as_ref(), &kind, runtime.config().request_timeout)
            .await
            .with_context(|| format!("failed to refresh '{kind}'"))?;
        refreshed.insert(kind, json!(count));
    }
    print_json(&Value::Object(refreshed))
}

pub async fn table(runtime: &OfflineRuntime, command: TableCommand) -> anyhow::Result<()> {
    let mut carts = runtime.load_table_carts().await?;

    match command {
        TableCommand::Add {
            table,
            product_id,
            name,
            quantity,
            price,
        } => {
            carts
                .open(table, chrono::Utc::now())
                .add_item(product_id, name, quantity, price)?;
            runtime.save_table_carts(&carts).await?;
            let cart = carts.get(table).context("cart vanished after add")?;
            print_json(cart)
        }
        TableCommand::Show => {
            let open: Vec<Value> = carts
                .iter()
                .map(|(id, cart)| json!({ "table": id, "total": cart.total(), "cart": cart }))
                .collect();
            print_json(&open)
        }
        TableCommand::Close { table } => {
            if carts.close(table).is_none() {
                bail!("no open cart for table {table}");
            }
            runtime.save_table_carts(&carts).await?;
            print_json(&json!({ "closed": table }))
        }
    }
}
