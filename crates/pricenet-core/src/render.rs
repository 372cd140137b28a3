//! # Price File Renderer
//!
//! Serializes a product list into the legacy delimited text format consumed
//! by field terminals, and parses the same format back.
//!
//! ## Wire Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Legacy Price File Format                             │
//! │                                                                         │
//! │  Layout: fields = [barcode, name, price], separator = ";"              │
//! │                                                                         │
//! │  barcode;name;price          ← optional header (same shape)            │
//! │  5449000000996;Cola 330ml;0.99                                         │
//! │  5449000000997;Cola 500ml;1.49                                         │
//! │  4006381333931;Pen;                                                     │
//! │                      ▲                                                  │
//! │                      └── missing values render as EMPTY STRING,        │
//! │                          never a "null" spelling                       │
//! │                                                                         │
//! │  • one line per product, each line newline-terminated                  │
//! │  • field order and separator come from configuration                   │
//! │  • prices are fixed-point decimal text rendered from integer cents:    │
//! │    no scientific notation, no platform precision noise                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::Product;

// =============================================================================
// Price Field
// =============================================================================

/// A renderable product field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Barcode,
    Name,
    Price,
    Promo,
}

impl PriceField {
    /// The field label used for header lines and config matching.
    pub fn label(&self) -> &'static str {
        match self {
            PriceField::Barcode => "barcode",
            PriceField::Name => "name",
            PriceField::Price => "price",
            PriceField::Promo => "promo",
        }
    }
}

impl std::str::FromStr for PriceField {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "barcode" | "ean" => Ok(PriceField::Barcode),
            "name" | "description" => Ok(PriceField::Name),
            "price" => Ok(PriceField::Price),
            "promo" | "promotion" => Ok(PriceField::Promo),
            other => Err(CoreError::UnknownField(other.to_string())),
        }
    }
}

// =============================================================================
// Render Layout
// =============================================================================

/// Field set, order, separator and decimal convention for a price file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderLayout {
    /// Fields in output order.
    pub fields: Vec<PriceField>,

    /// Field separator.
    pub separator: String,

    /// Emit the field labels as the first line.
    pub include_header: bool,

    /// Decimal places for the price field.
    pub price_decimals: u8,
}

impl Default for RenderLayout {
    fn default() -> Self {
        RenderLayout {
            fields: vec![PriceField::Barcode, PriceField::Name, PriceField::Price],
            separator: ";".to_string(),
            include_header: false,
            price_decimals: 2,
        }
    }
}

impl RenderLayout {
    /// Builds a layout from configured field names.
    ///
    /// Unknown field names and an empty separator are configuration faults.
    pub fn from_config(
        field_names: &[String],
        separator: &str,
        include_header: bool,
        price_decimals: u8,
    ) -> CoreResult<Self> {
        if field_names.is_empty() {
            return Err(CoreError::InvalidLayout("no exported fields".into()));
        }
        if separator.is_empty() {
            return Err(CoreError::InvalidLayout("empty field separator".into()));
        }

        let fields = field_names
            .iter()
            .map(|name| name.parse())
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(RenderLayout {
            fields,
            separator: separator.to_string(),
            include_header,
            price_decimals,
        })
    }

    /// The header line for this layout (labels joined by the separator).
    pub fn header_line(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.label())
            .collect::<Vec<_>>()
            .join(&self.separator)
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Renders products into the legacy delimited format.
///
/// Zero products is a valid, empty (or header-only) body. The caller keeps
/// the distinction between "rendered but empty" and "nothing to render": a
/// failed source never reaches this function.
pub fn render(products: &[Product], layout: &RenderLayout) -> String {
    let mut out = String::new();

    if layout.include_header {
        out.push_str(&layout.header_line());
        out.push('\n');
    }

    for product in products {
        let mut first = true;
        for field in &layout.fields {
            if !first {
                out.push_str(&layout.separator);
            }
            first = false;
            out.push_str(&field_value(product, *field, layout.price_decimals));
        }
        out.push('\n');
    }

    out
}

/// Renders one field value; missing values become the empty string.
fn field_value(product: &Product, field: PriceField, decimals: u8) -> String {
    match field {
        PriceField::Barcode => product.barcode.clone(),
        PriceField::Name => product.name.clone(),
        PriceField::Price => render_price_cents(product.price_cents, decimals),
        PriceField::Promo => product.promo.clone().unwrap_or_default(),
    }
}

/// Formats integer cents as fixed-point decimal text.
///
/// Always plain decimal notation. Fewer than two decimals truncates toward
/// zero; more than two pads with zeros.
pub fn render_price_cents(cents: i64, decimals: u8) -> String {
    let negative = cents < 0;
    let abs = cents.unsigned_abs();
    let units = abs / 100;
    let frac = abs % 100;

    let sign = if negative { "-" } else { "" };
    match decimals {
        0 => format!("{sign}{units}"),
        1 => format!("{sign}{units}.{:01}", frac / 10),
        2 => format!("{sign}{units}.{frac:02}"),
        n => format!("{sign}{units}.{frac:02}{}", "0".repeat(n as usize - 2)),
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parses a delimited body back into products using the same layout.
///
/// Counterpart to [`render`]; also backs the file catalog source. A line
/// whose field count does not match the layout is an error here - the file
/// source decides whether to skip or fail.
pub fn parse(body: &str, layout: &RenderLayout) -> CoreResult<Vec<Product>> {
    body.lines()
        .filter(|line| !line.is_empty())
        .map(|line| parse_line(line, layout))
        .collect()
}

/// Parses a single delimited line into a product.
pub fn parse_line(line: &str, layout: &RenderLayout) -> CoreResult<Product> {
    let values: Vec<&str> = line.split(layout.separator.as_str()).collect();
    if values.len() != layout.fields.len() {
        return Err(CoreError::FieldCountMismatch {
            expected: layout.fields.len(),
            actual: values.len(),
        });
    }

    let mut product = Product::new("", "", 0);
    for (field, value) in layout.fields.iter().zip(values) {
        match field {
            PriceField::Barcode => product.barcode = value.to_string(),
            PriceField::Name => product.name = value.to_string(),
            PriceField::Price => product.price_cents = parse_price_cents(value)?,
            PriceField::Promo => {
                product.promo = (!value.is_empty()).then(|| value.to_string());
            }
        }
    }
    Ok(product)
}

/// Parses decimal price text into integer cents.
///
/// Accepts `12`, `12.3`, `12.34`; fraction digits beyond cents are dropped.
/// An empty value is zero (a present-but-empty price field).
pub fn parse_price_cents(raw: &str) -> CoreResult<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, trimmed),
    };

    let (units_str, frac_str) = match rest.split_once('.') {
        Some((u, f)) => (u, f),
        None => (rest, ""),
    };

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str
            .parse()
            .map_err(|_| CoreError::InvalidPrice(raw.to_string()))?
    };

    let frac_digits: String = frac_str.chars().take(2).collect();
    if !frac_digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(CoreError::InvalidPrice(raw.to_string()));
    }
    let frac: i64 = match frac_digits.len() {
        0 => 0,
        1 => frac_digits.parse::<i64>().map_err(|_| CoreError::InvalidPrice(raw.to_string()))? * 10,
        _ => frac_digits
            .parse()
            .map_err(|_| CoreError::InvalidPrice(raw.to_string()))?,
    };

    Ok(sign * (units * 100 + frac))
}

// =============================================================================
// Unit Tests
// =============================================================================
