//! # Seed Data Generator
//!
//! Populates a database with demo categories, products and two accounts.
//!
//! ## Usage
//! ```bash
//! # 200 products (default) into ./vendra_dev.db
//! cargo run -p vendra-db --bin seed
//!
//! # Custom amount and path
//! cargo run -p vendra-db --bin seed -- --count 1000 --db ./data/vendra.db
//! ```
//!
//! ## Accounts
//! - `admin` / `admin123` (ADMIN)
//! - `manager` / `manager123` (MANAGER)
//!
//! Override the passwords with `VENDRA_SEED_ADMIN_PASSWORD` and
//! `VENDRA_SEED_MANAGER_PASSWORD`.

use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vendra_core::Role;
use vendra_db::{Database, DbConfig, NewProduct, NewUser};

/// Demo catalogue: (category, code prefix, product names)
const CATALOGUE: &[(&str, &str, &[&str])] = &[
    (
        "Grocery",
        "GRO",
        &[
            "Rice", "Sugar", "Flour", "Salt", "Pasta", "Couscous", "Lentils", "Beans",
            "Tomato Paste", "Sardines", "Corned Beef", "Powdered Milk",
        ],
    ),
    (
        "Beverages",
        "BEV",
        &[
            "Mineral Water", "Orange Juice", "Bissap", "Ginger Drink", "Cola", "Lemonade",
            "Green Tea", "Instant Coffee",
        ],
    ),
    (
        "Household",
        "HOU",
        &[
            "Laundry Soap", "Dish Soap", "Bleach", "Matches", "Candles", "Sponges",
            "Trash Bags", "Insect Spray",
        ],
    ),
    (
        "Cosmetics",
        "COS",
        &[
            "Body Lotion", "Shea Butter", "Toothpaste", "Shampoo", "Deodorant", "Hand Soap",
        ],
    ),
];

/// Pack sizes with a price multiplier in percent.
const SIZES: &[(&str, i64)] = &[("Small", 100), ("Medium", 180), ("Large", 320), ("Family", 550)];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vendra=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = String::from("./vendra_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Vendra POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./vendra_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            other => warn!(argument = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    info!(db = %db_path, count, "Seeding database");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.products().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has products, skipping seed");
        return Ok(());
    }

    // Accounts
    let admin_password =
        env::var("VENDRA_SEED_ADMIN_PASSWORD").unwrap_or_else(|_| "admin123".to_string());
    let manager_password =
        env::var("VENDRA_SEED_MANAGER_PASSWORD").unwrap_or_else(|_| "manager123".to_string());

    db.users()
        .insert_user(&NewUser::new("admin", admin_password, "Administrator", Role::Admin))
        .await?;
    db.users()
        .insert_user(&NewUser::new("manager", manager_password, "Shop Manager", Role::Manager))
        .await?;

    // Products
    let start = std::time::Instant::now();
    let mut generated = 0usize;

    'outer: for (category_name, prefix, names) in CATALOGUE {
        let category = db.products().insert_category(category_name, None).await?;

        for (name_idx, name) in names.iter().enumerate() {
            for (size_idx, (size, multiplier)) in SIZES.iter().enumerate() {
                if generated >= count {
                    break 'outer;
                }

                let seed = generated * 31 + name_idx * 7 + size_idx;
                let product = demo_product(prefix, name, size, *multiplier, category.id, seed);

                if let Err(e) = db.products().insert(&product).await {
                    warn!(code = %product.code, error = %e, "Failed to insert product");
                    continue;
                }
                generated += 1;
            }
        }
    }

    let low = db.products().count_low_stock().await?;
    info!(
        generated,
        low_stock = low,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Seed complete"
    );

    db.close().await;
    Ok(())
}

/// Builds one demo product with deterministic pseudo-random figures.
fn demo_product(
    prefix: &str,
    name: &str,
    size: &str,
    multiplier: i64,
    category_id: i64,
    seed: usize,
) -> NewProduct {
    // Selling price 2.50 - 52.49 before the size multiplier
    let base_cents = 250 + ((seed * 97) % 5_000) as i64;
    let selling_price_cents = base_cents * multiplier / 100;

    // Purchase price at 60-80% of the selling price
    let cost_pct = 60 + (seed % 21) as i64;
    let purchase_price_cents = selling_price_cents * cost_pct / 100;

    let code = format!(
        "{}-{}-{}",
        prefix,
        name.replace(' ', "").to_uppercase().chars().take(4).collect::<String>(),
        size.to_uppercase()
    );

    NewProduct {
        code,
        name: format!("{name} {size}"),
        description: None,
        category_id: Some(category_id),
        purchase_price_cents,
        selling_price_cents,
        quantity: (seed % 60) as i64,
        alert_threshold: vendra_core::DEFAULT_ALERT_THRESHOLD,
    }
}
