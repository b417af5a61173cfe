//! Row, record and aggregate types shared by every stage.
//!
//! The input schema is fixed: seven columns in the order given by
//! [`INPUT_COLUMNS`]. Enumerated dimensions ([`Region`], [`Category`]) declare
//! their variants alphabetically so the derived `Ord` agrees with the textual
//! order used for canonical output.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Input header, in file order.
pub const INPUT_COLUMNS: [&str; 7] = [
    "date",
    "product_id",
    "quantity",
    "price",
    "customer_id",
    "region",
    "category",
];

/// Measure columns of the output table, after the key columns.
pub const MEASURE_COLUMNS: [&str; 6] = [
    "record_count",
    "total_quantity",
    "total_revenue",
    "avg_price",
    "min_price",
    "max_price",
];

/// One untyped row exactly as read from a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRow {
    /// Index of the source file in the input list.
    pub file_index: usize,
    /// 1-based line number within the file, header included.
    pub line: u64,
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn new(file_index: usize, line: u64, fields: Vec<String>) -> Self {
        Self { file_index, line, fields }
    }
}

/// Why a row was dropped instead of becoming a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    MissingField,
    InvalidType,
    OutOfRange,
    DuplicateKey,
    ComputeOverflow,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::MissingField => "MissingField",
            RejectReason::InvalidType => "InvalidType",
            RejectReason::OutOfRange => "OutOfRange",
            RejectReason::DuplicateKey => "DuplicateKey",
            RejectReason::ComputeOverflow => "ComputeOverflow",
        };
        f.write_str(s)
    }
}

/// Marker for an enum value outside its closed domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnknownVariant;

macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            /// Case-insensitive; surrounding whitespace is ignored.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(UnknownVariant)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_enum!(
    /// Sales region.
    Region {
        Central => "Central",
        East => "East",
        North => "North",
        South => "South",
        West => "West",
    }
);

closed_enum!(
    /// Product category.
    Category {
        Books => "Books",
        Clothing => "Clothing",
        Electronics => "Electronics",
        Food => "Food",
        Home => "Home",
    }
);

/// A validated, typed input row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub date: NaiveDate,
    pub product_id: String,
    pub quantity: u32,
    pub price: Decimal,
    pub customer_id: String,
    pub region: Region,
    pub category: Category,
}

/// Calendar month, printed as `YYYY-MM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A record plus the fields derived by the transformer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrichedRecord {
    pub record: Record,
    /// `quantity × price`, exact.
    pub line_total: Decimal,
    pub year: i32,
    pub month: u32,
    pub quarter: u32,
}

impl EnrichedRecord {
    pub fn year_month(&self) -> YearMonth {
        YearMonth { year: self.year, month: self.month }
    }
}

/// Which dimensions the aggregator groups by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupBy {
    #[default]
    RegionCategory,
    RegionCategoryMonth,
    Product,
}

impl GroupBy {
    /// Output header names of the key columns.
    pub fn key_columns(self) -> &'static [&'static str] {
        match self {
            GroupBy::RegionCategory => &["region", "category"],
            GroupBy::RegionCategoryMonth => &["region", "category", "month"],
            GroupBy::Product => &["product_id"],
        }
    }

    pub fn key_of(self, rec: &EnrichedRecord) -> AggregateKey {
        let r = &rec.record;
        match self {
            GroupBy::RegionCategory => AggregateKey::RegionCategory {
                region: r.region,
                category: r.category,
            },
            GroupBy::RegionCategoryMonth => AggregateKey::RegionCategoryMonth {
                region: r.region,
                category: r.category,
                month: rec.year_month(),
            },
            GroupBy::Product => AggregateKey::Product { product_id: r.product_id.clone() },
        }
    }

    /// Full output header: key columns then measures.
    pub fn header(self) -> Vec<&'static str> {
        self.key_columns()
            .iter()
            .chain(MEASURE_COLUMNS.iter())
            .copied()
            .collect()
    }
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "region-category" => Ok(GroupBy::RegionCategory),
            "region-category-month" => Ok(GroupBy::RegionCategoryMonth),
            "product" => Ok(GroupBy::Product),
            other => Err(format!(
                "unknown grouping '{other}' (expected region-category, region-category-month or product)"
            )),
        }
    }
}

/// Grouping tuple of one bucket.
///
/// All keys of one run share a variant, so the derived `Ord` is the
/// lexicographic order over the tuple. Product identifiers compare as bytes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AggregateKey {
    RegionCategory { region: Region, category: Category },
    RegionCategoryMonth { region: Region, category: Category, month: YearMonth },
    Product { product_id: String },
}

impl AggregateKey {
    /// Textual key columns, in header order.
    pub fn columns(&self) -> Vec<String> {
        match self {
            AggregateKey::RegionCategory { region, category } => {
                vec![region.to_string(), category.to_string()]
            }
            AggregateKey::RegionCategoryMonth { region, category, month } => {
                vec![region.to_string(), category.to_string(), month.to_string()]
            }
            AggregateKey::Product { product_id } => vec![product_id.clone()],
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.columns().join(", "))
    }
}

/// Finalized measures of one bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateRow {
    pub key: AggregateKey,
    pub record_count: u64,
    pub total_quantity: u64,
    pub total_revenue: Decimal,
    pub avg_price: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
}

impl AggregateRow {
    /// Canonical textual fields: key columns then measures.
    pub fn to_fields(&self) -> Vec<String> {
        let mut out = self.key.columns();
        out.push(self.record_count.to_string());
        out.push(self.total_quantity.to_string());
        out.push(crate::money::format_money(self.total_revenue));
        out.push(crate::money::format_money(self.avg_price));
        out.push(crate::money::format_money(self.min_price));
        out.push(crate::money::format_money(self.max_price));
        out
    }
}

/// An ordered list of input files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceSet {
    pub paths: Vec<PathBuf>,
}

impl SourceSet {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
