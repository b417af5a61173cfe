//! Testing utilities: sales rows and throwaway data directories.
//!
//! ```
//! use salesflow::testing::{SaleRow, SalesFixture, generated_rows};
//!
//! # fn main() -> anyhow::Result<()> {
//! let fx = SalesFixture::new()?;
//! let mut rows = generated_rows(9, 42);
//! rows.push(SaleRow::new("2024-01-05", "P2", 1, "3.50", "C2", "West", "Food").with_price(""));
//! fx.write_csv("day1.csv", &rows)?;
//!
//! let summary = salesflow::Pipeline::default().run(fx.data_dir(), fx.output_path("out.csv"))?;
//! assert_eq!(summary.counts.rows_rejected, 1);
//! # Ok(())
//! # }
//! ```

use crate::schema::{Category, INPUT_COLUMNS, Region};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One input row as text, so malformed values can be expressed too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleRow {
    pub date: String,
    pub product_id: String,
    pub quantity: String,
    pub price: String,
    pub customer_id: String,
    pub region: String,
    pub category: String,
}

impl SaleRow {
    pub fn new(
        date: &str,
        product_id: &str,
        quantity: u32,
        price: &str,
        customer_id: &str,
        region: &str,
        category: &str,
    ) -> Self {
        Self {
            date: date.into(),
            product_id: product_id.into(),
            quantity: quantity.to_string(),
            price: price.into(),
            customer_id: customer_id.into(),
            region: region.into(),
            category: category.into(),
        }
    }

    #[must_use]
    pub fn with_price(mut self, price: &str) -> Self {
        self.price = price.into();
        self
    }

    #[must_use]
    pub fn with_quantity(mut self, quantity: &str) -> Self {
        self.quantity = quantity.into();
        self
    }

    #[must_use]
    pub fn with_date(mut self, date: &str) -> Self {
        self.date = date.into();
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.into();
        self
    }

    pub fn fields(&self) -> [&str; 7] {
        [
            self.date.as_str(),
            self.product_id.as_str(),
            self.quantity.as_str(),
            self.price.as_str(),
            self.customer_id.as_str(),
            self.region.as_str(),
            self.category.as_str(),
        ]
    }
}

/// Render rows as a CSV document with the input header.
pub fn csv_text(rows: &[SaleRow]) -> String {
    let mut out = INPUT_COLUMNS.join(",");
    out.push('\n');
    for row in rows {
        out.push_str(&row.fields().join(","));
        out.push('\n');
    }
    out
}

/// `n` valid rows generated from `seed`. The same seed yields the same rows.
///
/// Dates fall in 2024; every region and category appears once `n` is large
/// enough.
pub fn generated_rows(n: usize, seed: u64) -> Vec<SaleRow> {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    let mut next = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        state >> 33
    };
    (0..n)
        .map(|_| {
            let month = next() % 12 + 1;
            let day = next() % 28 + 1;
            let region = Region::ALL[(next() % Region::ALL.len() as u64) as usize];
            let category = Category::ALL[(next() % Category::ALL.len() as u64) as usize];
            let quantity = (next() % 20 + 1) as u32;
            let cents = next() % 50_000 + 1;
            SaleRow::new(
                &format!("2024-{month:02}-{day:02}"),
                &format!("P{:03}", next() % 200),
                quantity,
                &format!("{}.{:02}", cents / 100, cents % 100),
                &format!("C{:04}", next() % 5_000),
                region.as_str(),
                category.as_str(),
            )
        })
        .collect()
}

/// A temporary data directory with a sibling area for outputs.
/// Everything is removed on drop.
pub struct SalesFixture {
    root: TempDir,
}

impl SalesFixture {
    pub fn new() -> io::Result<Self> {
        let root = TempDir::new()?;
        fs::create_dir(root.path().join("data"))?;
        fs::create_dir(root.path().join("out"))?;
        Ok(Self { root })
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    /// Path for an output file outside the data directory.
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.root.path().join("out").join(name)
    }

    pub fn write_csv(&self, name: &str, rows: &[SaleRow]) -> io::Result<PathBuf> {
        self.write_raw(name, &csv_text(rows))
    }

    /// Write arbitrary text, e.g. a file with a wrong header.
    pub fn write_raw(&self, name: &str, text: &str) -> io::Result<PathBuf> {
        let path = self.data_dir().join(name);
        fs::write(&path, text)?;
        Ok(path)
    }

    /// Write rows gzip-compressed; `name` should end in `.csv.gz`.
    #[cfg(feature = "compression-gzip")]
    pub fn write_gz(&self, name: &str, rows: &[SaleRow]) -> io::Result<PathBuf> {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;

        let path = self.data_dir().join(name);
        let mut enc = GzEncoder::new(fs::File::create(&path)?, Compression::default());
        enc.write_all(csv_text(rows).as_bytes())?;
        enc.finish()?.flush()?;
        Ok(path)
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_rows_are_reproducible() {
        assert_eq!(generated_rows(50, 7), generated_rows(50, 7));
        assert_ne!(generated_rows(50, 7), generated_rows(50, 8));
    }

    #[test]
    fn csv_text_has_header_and_rows() {
        let text = csv_text(&[SaleRow::new("2024-01-01", "P1", 1, "1.00", "C1", "East", "Books")]);
        assert_eq!(
            text,
            "date,product_id,quantity,price,customer_id,region,category\n\
             2024-01-01,P1,1,1.00,C1,East,Books\n"
        );
    }

    #[test]
    fn fixture_lays_out_data_and_output() -> anyhow::Result<()> {
        let fx = SalesFixture::new()?;
        let path = fx.write_csv("a.csv", &generated_rows(3, 1))?;
        assert!(path.starts_with(fx.data_dir()));
        assert!(!fx.output_path("x.csv").starts_with(fx.data_dir()));
        assert_eq!(fs::read_to_string(path)?.lines().count(), 4);
        Ok(())
    }
}
