// src/seed.rs

use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::error::Result;
use crate::store::{self, Brand, CatalogStore, Order, OrderItem, Product, Sale, User};

struct BrandSeed {
    name: &'static str,
    description: &'static str,
    tag: &'static str,
}

const BRANDS: &[BrandSeed] = &[
    BrandSeed {
        name: "Boticário",
        description: "Marca de cosméticos brasileira",
        tag: "boticario",
    },
    BrandSeed {
        name: "Natura",
        description: "Marca de produtos naturais",
        tag: "natura",
    },
    BrandSeed {
        name: "Avon",
        description: "Marca de beleza e cosméticos",
        tag: "avon",
    },
];

struct ProductSeed {
    brand: usize,
    name: &'static str,
    description: &'static str,
    sku: &'static str,
    price: f64,
    stock: i64,
}

const PRODUCTS: &[ProductSeed] = &[
    ProductSeed { brand: 0, name: "Perfume Malbec", description: "Perfume masculino", sku: "BOT-MALBEC-001", price: 89.90, stock: 50 },
    ProductSeed { brand: 0, name: "Shampoo Hidratação", description: "Shampoo para cabelos secos", sku: "BOT-SHAMPOO-001", price: 24.90, stock: 3 },
    ProductSeed { brand: 1, name: "Creme Facial Natura", description: "Creme anti-idade", sku: "NAT-CREME-001", price: 45.00, stock: 15 },
    ProductSeed { brand: 2, name: "Batom Avon", description: "Batom matte", sku: "AVN-BATOM-001", price: 19.90, stock: 0 },
    ProductSeed { brand: 0, name: "Desodorante Boticário", description: "Desodorante roll-on", sku: "BOT-DESOD-001", price: 12.90, stock: 100 },
    ProductSeed { brand: 1, name: "Hidratante Tododia", description: "Hidratante corporal", sku: "NAT-TODODIA-001", price: 39.90, stock: 8 },
];

struct UserSeed {
    name: &'static str,
    surname: &'static str,
    email: &'static str,
    phone: &'static str,
    role: &'static str,
}

const USERS: &[UserSeed] = &[
    UserSeed { name: "João", surname: "Silva", email: "joao.silva@example.com", phone: "11999999999", role: "ADMIN" },
    UserSeed { name: "Maria", surname: "Santos", email: "maria.santos@example.com", phone: "11888888888", role: "COMUM" },
];

struct OrderSeed {
    days_ago: i64,
    user: usize,
    status: &'static str,
    discount: f64,
    /// (product index, quantity)
    items: &'static [(usize, i64)],
}

const ORDERS: &[OrderSeed] = &[
    OrderSeed { days_ago: 85, user: 0, status: "Pago", discount: 0.0, items: &[(0, 1), (2, 2)] },
    OrderSeed { days_ago: 62, user: 1, status: "Enviado", discount: 0.0, items: &[(4, 4), (5, 1)] },
    OrderSeed { days_ago: 47, user: 0, status: "Cancelado", discount: 0.0, items: &[(3, 2)] },
    OrderSeed { days_ago: 33, user: 1, status: "Pago", discount: 10.0, items: &[(0, 2), (1, 1)] },
    OrderSeed { days_ago: 21, user: 0, status: "Enviado", discount: 0.0, items: &[(5, 3), (3, 1)] },
    OrderSeed { days_ago: 10, user: 0, status: "Pago", discount: 0.0, items: &[(0, 2), (2, 1)] },
    OrderSeed { days_ago: 5, user: 0, status: "Enviado", discount: 0.0, items: &[(0, 1), (4, 5)] },
    OrderSeed { days_ago: 2, user: 1, status: "Pendente", discount: 5.0, items: &[(1, 3)] },
    OrderSeed { days_ago: 1, user: 1, status: "Pendente", discount: 0.0, items: &[(5, 2), (1, 1)] },
];

/// Fill an empty store with demo brands, products, users and order history
/// ending at `now`. Returns false without writing when brands already exist.
pub fn seed(store: &CatalogStore, now: OffsetDateTime) -> Result<bool> {
    if store.get_counts()?.brands > 0 {
        info!("Store already has data, skipping seed");
        return Ok(false);
    }

    let created_at = store::timestamp(now);

    store.transaction(|store| {
        let brand_ids = BRANDS
            .iter()
            .map(|seed| -> Result<String> {
                let brand = Brand {
                    id: store::new_id(),
                    name: seed.name.to_string(),
                    description: Some(seed.description.to_string()),
                    image_url: Some(format!("https://example.com/{}.jpg", seed.tag)),
                    created_at: created_at.clone(),
                };
                store.insert_brand(&brand)?;
                Ok(brand.id)
            })
            .collect::<Result<Vec<_>>>()?;

        let product_ids = PRODUCTS
            .iter()
            .map(|seed| -> Result<String> {
                let product = Product {
                    id: store::new_id(),
                    name: seed.name.to_string(),
                    description: Some(seed.description.to_string()),
                    sku: Some(seed.sku.to_string()),
                    unit_price: Some(seed.price),
                    sale_price: Some(seed.price),
                    quantity: Some(seed.stock),
                    in_catalog: true,
                    tag: Some(BRANDS[seed.brand].tag.to_string()),
                    image_url: None,
                    brand_id: Some(brand_ids[seed.brand].clone()),
                    created_at: created_at.clone(),
                };
                store.insert_product(&product)?;
                Ok(product.id)
            })
            .collect::<Result<Vec<_>>>()?;

        let user_ids = USERS
            .iter()
            .map(|seed| -> Result<String> {
                let user = User {
                    id: store::new_id(),
                    name: seed.name.to_string(),
                    surname: Some(seed.surname.to_string()),
                    email: Some(seed.email.to_string()),
                    phone: Some(seed.phone.to_string()),
                    role: Some(seed.role.to_string()),
                    active: true,
                    created_at: created_at.clone(),
                };
                store.insert_user(&user)?;
                Ok(user.id)
            })
            .collect::<Result<Vec<_>>>()?;

        for seed in ORDERS {
            let at = store::timestamp(now - Duration::days(seed.days_ago));
            let total: f64 = seed
                .items
                .iter()
                .map(|&(product, quantity)| PRODUCTS[product].price * quantity as f64)
                .sum();

            let sale = Sale {
                id: store::new_id(),
                sold_at: Some(at.clone()),
                total_value: Some(total - seed.discount),
                discount: Some(seed.discount),
                paid: matches!(seed.status, "Pago" | "Enviado"),
                created_at: at.clone(),
            };
            store.insert_sale(&sale)?;

            let order = Order {
                id: store::new_id(),
                user_id: Some(user_ids[seed.user].clone()),
                sale_id: Some(sale.id),
                status: Some(seed.status.to_string()),
                created_at: at,
            };
            store.insert_order(&order)?;

            for &(product, quantity) in seed.items {
                store.insert_order_item(&OrderItem {
                    id: store::new_id(),
                    order_id: order.id.clone(),
                    product_id: product_ids[product].clone(),
                    quantity: Some(quantity),
                    unit_price: Some(PRODUCTS[product].price),
                })?;
            }
        }

        info!(
            brands = brand_ids.len(),
            products = product_ids.len(),
            users = user_ids.len(),
            orders = ORDERS.len(),
            "Demo data seeded"
        );
        Ok(true)
    })
}
