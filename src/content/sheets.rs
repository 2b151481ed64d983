use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

pub const DEFAULT_BASE_URL: &str = "https://docs.google.com/spreadsheets/d";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// The five tabs the training spreadsheet is expected to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Texts,
    Questions,
    Menu,
    Wine,
    Allergens,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Texts,
        Table::Questions,
        Table::Menu,
        Table::Wine,
        Table::Allergens,
    ];

    pub fn sheet_name(self) -> &'static str {
        match self {
            Table::Texts => "Texts",
            Table::Questions => "Questions",
            Table::Menu => "Menu",
            Table::Wine => "Wine",
            Table::Allergens => "Allergens",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sheet_name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// One table row with header names folded to lower case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    cells: HashMap<String, String>,
}

impl Row {
    pub fn new<K, V>(cells: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            cells: cells
                .into_iter()
                .map(|(k, v)| (k.as_ref().trim().to_lowercase(), v.into()))
                .collect(),
        }
    }

    /// Non-blank cell under `column`, whatever case the header was written in.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .get(&column.to_lowercase())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// First non-blank cell among several accepted header spellings.
    pub fn first(&self, columns: &[&str]) -> Option<&str> {
        columns.iter().find_map(|column| self.get(column))
    }
}

/// Where raw content rows come from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_table(&self, source_id: &str, table: Table) -> Result<Vec<Row>, SourceError>;
}

/// Reads a published Google spreadsheet through its CSV export endpoint.
pub struct SheetsSource {
    client: reqwest::Client,
    base_url: String,
}

impl SheetsSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ContentSource for SheetsSource {
    async fn fetch_table(&self, source_id: &str, table: Table) -> Result<Vec<Row>, SourceError> {
        let url = format!("{}/{}/gviz/tq", self.base_url.trim_end_matches('/'), source_id);
        log::debug!("Fetching table {} from {}", table, url);

        let body = self
            .client
            .get(&url)
            .query(&[("tqx", "out:csv"), ("sheet", table.sheet_name())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_csv(&body)
    }
}

/// Parses a CSV document with a header line into rows.
pub fn parse_csv(body: &str) -> Result<Vec<Row>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(Row::new(headers.iter().zip(record.iter())));
    }
    Ok(rows)
}
