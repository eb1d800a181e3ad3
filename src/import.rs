// src/import.rs

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::error::{Error, Result};
use crate::invoice::{DecimalMark, ItemColumns, NumberShape, ProductRow};
use crate::llm::{TextGenerator, generate_json};
use crate::pdf::ExtractedInvoice;
use crate::store::{self, Brand, CatalogStore, Product};

const PRODUCT_CREATION_PROMPT: &str = include_str!("prompts/product_creation.txt");

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub digest: String,
    pub layout: String,
    pub created: usize,
    pub restocked: usize,
    pub units: i64,
}

/// One invoice line, typed.
#[derive(Debug, Clone, PartialEq)]
struct InvoiceItem {
    code: String,
    description: String,
    quantity: i64,
    unit_value: f64,
}

/// Line totals may be rounded to the cent.
const TOTAL_TOLERANCE: f64 = 0.011;

/// Decimal mark for a row the document-wide scan could not settle: the one
/// under which quantity times unit value gives the line total.
fn mark_from_total(row: &ProductRow, columns: &ItemColumns) -> Result<DecimalMark> {
    let fits = |mark: DecimalMark| {
        match (
            row.decimal(columns.quantity, mark),
            row.decimal(columns.unit_value, mark),
            row.decimal(columns.total, mark),
        ) {
            (Ok(quantity), Ok(unit), Ok(total)) => (quantity * unit - total).abs() < TOTAL_TOLERANCE,
            _ => false,
        }
    };

    match (fits(DecimalMark::Comma), fits(DecimalMark::Dot)) {
        (true, false) => Ok(DecimalMark::Comma),
        (false, true) => Ok(DecimalMark::Dot),
        _ => {
            let column = [columns.quantity, columns.unit_value]
                .into_iter()
                .find(|column| row.shape(column) == NumberShape::Ambiguous)
                .unwrap_or(columns.quantity);
            Err(Error::InvalidField {
                column,
                value: row.get(column).unwrap_or_default().to_string(),
            })
        }
    }
}

fn read_item(row: &ProductRow, columns: &ItemColumns, mark: Option<DecimalMark>) -> Result<InvoiceItem> {
    let invalid = |column: &'static str| Error::InvalidField {
        column,
        value: row.get(column).unwrap_or_default().to_string(),
    };

    let code = row.get(columns.code).unwrap_or_default().trim();
    if code.is_empty() {
        return Err(invalid(columns.code));
    }

    let mark = match mark {
        Some(mark) => mark,
        None => mark_from_total(row, columns)?,
    };

    let quantity = row.decimal(columns.quantity, mark)?;
    if quantity.fract() != 0.0 || quantity < 1.0 {
        return Err(invalid(columns.quantity));
    }
    let unit_value = row.decimal(columns.unit_value, mark)?;
    if unit_value < 0.0 {
        return Err(invalid(columns.unit_value));
    }

    Ok(InvoiceItem {
        code: code.to_string(),
        description: row.get(columns.description).unwrap_or_default().trim().to_string(),
        quantity: quantity as i64,
        unit_value,
    })
}

/// File an extracted invoice into the catalog: new codes become products,
/// known codes get their stock topped up. All or nothing.
pub fn import_invoice(
    store: &CatalogStore,
    invoice: &ExtractedInvoice,
    now: OffsetDateTime,
) -> Result<ImportSummary> {
    if store.is_imported(&invoice.digest)? {
        return Err(Error::AlreadyImported {
            digest: invoice.digest.clone(),
        });
    }

    let layout = invoice.layout.parser();
    let columns = layout.item_columns();
    let mark = invoice
        .products
        .decimal_mark(&[columns.quantity, columns.unit_value, columns.total]);

    let items = invoice
        .products
        .rows()
        .iter()
        .map(|row| read_item(row, &columns, mark))
        .collect::<Result<Vec<_>>>()?;

    let now = store::timestamp(now);

    store.transaction(|store| {
        let brand_id = match store.find_brand_by_name(layout.brand_name())? {
            Some(brand) => brand.id,
            None => {
                let brand = Brand {
                    id: store::new_id(),
                    name: layout.brand_name().to_string(),
                    description: None,
                    image_url: None,
                    created_at: now.clone(),
                };
                store.insert_brand(&brand)?;
                brand.id
            }
        };

        let mut summary = ImportSummary {
            digest: invoice.digest.clone(),
            layout: layout.tag().to_string(),
            created: 0,
            restocked: 0,
            units: 0,
        };

        for item in &items {
            match store.find_product_by_sku(&item.code)? {
                Some(existing) => {
                    store.restock_product(&existing.id, item.quantity, item.unit_value, &now)?;
                    summary.restocked += 1;
                }
                None => {
                    store.insert_product(&Product {
                        id: store::new_id(),
                        name: item.description.clone(),
                        description: None,
                        sku: Some(item.code.clone()),
                        unit_price: Some(item.unit_value),
                        sale_price: None,
                        quantity: Some(item.quantity),
                        in_catalog: false,
                        tag: Some(layout.tag().to_string()),
                        image_url: None,
                        brand_id: Some(brand_id.clone()),
                        created_at: now.clone(),
                    })?;
                    summary.created += 1;
                }
            }
            summary.units += item.quantity;
        }

        store.record_import(&invoice.digest, layout.tag(), &invoice.filename, items.len(), &now)?;

        info!(
            digest = %summary.digest,
            created = summary.created,
            restocked = summary.restocked,
            units = summary.units,
            "Invoice imported"
        );
        Ok(summary)
    })
}

/// Catalog entry proposed by the model for an invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDraft {
    pub name: String,
    pub sku: String,
    #[serde(default)]
    pub description: Option<String>,
    pub unit_price: f64,
    #[serde(default)]
    pub sale_price: Option<f64>,
    pub quantity: i64,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Ask the model to turn the raw product table into catalog entries.
pub async fn enrich_products(
    generator: &dyn TextGenerator,
    invoice: &ExtractedInvoice,
) -> Result<Vec<ProductDraft>> {
    let table = serde_json::to_string_pretty(&invoice.products)?;
    let prompt = format!("{PRODUCT_CREATION_PROMPT}\n\nMarca: {}\n\nProdutos:\n{table}", invoice.layout.parser().brand_name());

    let drafts: Vec<ProductDraft> = generate_json(generator, &prompt).await?;
    info!(rows = invoice.products.len(), drafts = drafts.len(), "Products enriched");
    Ok(drafts)
}
