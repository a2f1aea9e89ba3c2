//! stockctl: inventory command-line client
//!
//! # Usage
//!
//! ```bash
//! # Add 5 units to product 3
//! stockctl move --product 3 --kind IN --quantity 5
//!
//! # Retry a movement safely by reusing its operation id
//! stockctl move --product 3 --kind OUT --quantity 2 --operation-id 7f1c...
//!
//! # Queries
//! stockctl product 3
//! stockctl movements --product 3 --kind OUT
//! stockctl low-stock
//! stockctl categories --root-only
//! stockctl category 2 --page 1
//!
//! # Adjust stock in place (PATCH on the product)
//! stockctl move --product 3 --kind ADJ --quantity 40 --in-place
//! ```
//!
//! # Environment Variables
//!
//! - `INVENTORY_ENV`: Environment (test, development, production)
//! - `INVENTORY_API_BASE_URL`: API base URL (default: http://127.0.0.1:8000/api)
//! - `INVENTORY_API_TOKEN`: Bearer token
//! - `INVENTORY_REQUEST_TIMEOUT_SECS`: Per-request timeout (default: 10)
//! - `INVENTORY_SUBMIT_RETRIES`: Transport retries per movement (default: 1)
//!
//! Results are printed as JSON on stdout; logs go to stderr.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use inventory_sync::{Config, MovementService};
use stock_domain::{MovementKind, OperationId, ProductId, StockMovementRequest};
use stock_ledger::{CategoryFilter, MovementFilter, MovementRoute, Paging, ProductFilter};
use stock_projector::StockCache;

#[derive(Parser)]
#[command(name = "stockctl")]
#[command(about = "Inventory stock movements and catalog queries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a stock movement
    Move {
        #[arg(long)]
        product: i64,
        /// IN, OUT or ADJ
        #[arg(long)]
        kind: MovementKind,
        #[arg(long)]
        quantity: i64,
        #[arg(long)]
        notes: Option<String>,
        /// Reuse to retry an earlier movement without applying it twice
        #[arg(long)]
        operation_id: Option<String>,
        /// Send as PATCH on the product's stock endpoint
        #[arg(long)]
        in_place: bool,
    },
    /// Show a product
    Product { id: i64 },
    /// List products
    Products {
        #[arg(long)]
        q: Option<String>,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        page: Option<u32>,
    },
    /// List movements
    Movements {
        #[arg(long)]
        product: Option<i64>,
        #[arg(long)]
        kind: Option<MovementKind>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        page: Option<u32>,
    },
    /// Products at or below their minimum stock
    LowStock,
    /// List categories
    Categories {
        #[arg(long, default_value_t = false)]
        root_only: bool,
        /// Search by name instead of listing
        #[arg(long)]
        q: Option<String>,
    },
    /// Show a category with its products and subcategories
    Category {
        id: i64,
        #[arg(long)]
        page: Option<u32>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("stockctl=info".parse()?)
                .add_directive("inventory_sync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        base_url = %config.api.base_url,
        "stockctl"
    );

    let client = config.ledger_client();

    match cli.command {
        Commands::Move {
            product,
            kind,
            quantity,
            notes,
            operation_id,
            in_place,
        } => {
            let mut request = StockMovementRequest::new(product, kind, quantity)?;
            if let Some(notes) = notes {
                request = request.with_notes(notes);
            }
            if let Some(id) = operation_id {
                request = request.with_operation_id(OperationId::new(id)?);
            }

            let service = MovementService::new(Arc::new(client), Arc::new(StockCache::new()))
                .with_submit_retries(config.sync.submit_retries);
            service.refresh_product(ProductId::new(product)?).await?;

            let route = if in_place {
                MovementRoute::AdjustInPlace
            } else {
                MovementRoute::Create
            };
            let outcome = service.apply_via(request, route).await?;
            print_json(&outcome)?;
        },
        Commands::Product { id } => {
            print_json(&client.get_product(ProductId::new(id)?).await?)?;
        },
        Commands::Products { q, category, page } => {
            let filter = ProductFilter {
                q,
                category,
                paging: Paging {
                    page,
                    ..Default::default()
                },
                ..Default::default()
            };
            print_json(&client.list_products(&filter).await?)?;
        },
        Commands::Movements {
            product,
            kind,
            from,
            to,
            search,
            page,
        } => {
            let filter = MovementFilter {
                product: product.map(ProductId::new).transpose()?,
                kind,
                from,
                to,
                search,
                paging: Paging {
                    page,
                    ..Default::default()
                },
                ..Default::default()
            };
            print_json(&client.list_movements(&filter).await?)?;
        },
        Commands::LowStock => {
            print_json(&client.list_low_stock(&ProductFilter::default()).await?)?;
        },
        Commands::Categories { root_only, q: Some(q) } if !root_only => {
            print_json(&client.search_categories(&q).await?)?;
        },
        Commands::Categories { root_only, q } => {
            let filter = CategoryFilter {
                q,
                root_only,
                ..Default::default()
            };
            print_json(&client.list_categories(&filter).await?)?;
        },
        Commands::Category { id, page } => {
            print_json(&client.get_category_with_products(id, page).await?)?;
        },
    }

    Ok(())
}
