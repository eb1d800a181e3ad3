use super::{Anchors, ColumnSchema, InvoiceLayout, ItemColumns};

pub const CODE: &str = "CÓD. PRODUTO";
pub const DESCRIPTION: &str = "DESCRIÇÃO DOS PRODUTOS/SERVIÇOS";
pub const QUANTITY: &str = "QUANT.";
pub const UNIT_VALUE: &str = "VALOR UNITÁRIO";
pub const TOTAL_VALUE: &str = "VALOR TOTAL";

static ANCHORS: Anchors = Anchors {
    start: "\nIPI\nICMS",
    end: "RESERVADO AO FISCO",
};

static SCHEMA: ColumnSchema = ColumnSchema::new(&[
    CODE,
    DESCRIPTION,
    "NCM/SH",
    "CST",
    "CFOP",
    "UNID.",
    QUANTITY,
    UNIT_VALUE,
    TOTAL_VALUE,
    "B.CALC.ICMS",
    "VALOR ICMS",
    "VALOR I.P.I.",
    "A. IPI",
    "A. ICMS",
]);

/// DANFE issued by O Boticário: 14 cells per product line, table body
/// between the IPI/ICMS header and the tax-office reserved box.
pub struct Boticario;

impl InvoiceLayout for Boticario {
    fn tag(&self) -> &'static str {
        "boticario"
    }

    fn brand_name(&self) -> &'static str {
        "Boticário"
    }

    fn anchors(&self) -> &'static Anchors {
        &ANCHORS
    }

    fn schema(&self) -> &'static ColumnSchema {
        &SCHEMA
    }

    fn item_columns(&self) -> ItemColumns {
        ItemColumns {
            code: CODE,
            description: DESCRIPTION,
            quantity: QUANTITY,
            unit_value: UNIT_VALUE,
            total: TOTAL_VALUE,
        }
    }
}
