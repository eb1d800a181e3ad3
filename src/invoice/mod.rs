// src/invoice/mod.rs

mod boticario;
mod segment;
mod table;

use std::fmt;
use std::str::FromStr;

pub use segment::{Anchors, PayloadSlice, segment};
pub use table::{
    ColumnSchema, DecimalMark, NumberShape, ProductRow, ProductTable, Reconstruction, TrailingPolicy,
    reconstruct,
};

use crate::error::{Error, Result};

/// Names of the columns an import needs, per layout.
#[derive(Debug, Clone, Copy)]
pub struct ItemColumns {
    pub code: &'static str,
    pub description: &'static str,
    pub quantity: &'static str,
    pub unit_value: &'static str,
    /// Line total, quantity times unit value.
    pub total: &'static str,
}

/// A vendor-specific invoice format: where the table sits and what its
/// columns are.
pub trait InvoiceLayout: Send + Sync {
    fn tag(&self) -> &'static str;

    /// Brand that products from this layout are filed under.
    fn brand_name(&self) -> &'static str;

    fn anchors(&self) -> &'static Anchors;

    fn schema(&self) -> &'static ColumnSchema;

    fn item_columns(&self) -> ItemColumns;

    fn segment<'a>(&self, text: &'a str) -> Result<PayloadSlice<'a>> {
        segment(text, self.anchors())
    }

    /// Full text to product table.
    fn parse(&self, text: &str, policy: TrailingPolicy) -> Result<Reconstruction> {
        let payload = self.segment(text)?;
        reconstruct(&payload, self.schema(), policy)
    }
}

/// Supported invoice layouts, selected by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorLayout {
    Boticario,
}

impl VendorLayout {
    pub const ALL: [VendorLayout; 1] = [VendorLayout::Boticario];

    pub fn parser(self) -> &'static dyn InvoiceLayout {
        match self {
            VendorLayout::Boticario => &boticario::Boticario,
        }
    }
}

impl FromStr for VendorLayout {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        VendorLayout::ALL
            .into_iter()
            .find(|layout| layout.parser().tag().eq_ignore_ascii_case(tag.trim()))
            .ok_or_else(|| Error::UnknownModule(tag.to_string()))
    }
}

impl fmt::Display for VendorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.parser().tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags() {
        assert_eq!("boticario".parse::<VendorLayout>().unwrap(), VendorLayout::Boticario);
        assert_eq!(" Boticario ".parse::<VendorLayout>().unwrap(), VendorLayout::Boticario);
        assert_eq!(VendorLayout::Boticario.to_string(), "boticario");
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = "naturaX".parse::<VendorLayout>().unwrap_err();
        assert!(matches!(err, Error::UnknownModule(ref tag) if tag == "naturaX"));
        assert_eq!(err.status(), crate::error::Status::NotFound);
    }

    #[test]
    fn test_segment_uses_layout_anchors() {
        let layout = VendorLayout::Boticario.parser();
        let payload = layout
            .segment("...\nIPI\nICMS\nFOO\nRESERVADO AO FISCO\n...")
            .unwrap();
        assert_eq!(payload.as_str(), "FOO");
    }
}
