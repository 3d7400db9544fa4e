//! Dataset sources.
//!
//! Both sources read the KMMLU CSV layout
//! (`question,answer,A,B,C,D,Category,Human Accuracy`); extra columns are
//! ignored. Records are returned in file order.

use crate::models::{DatasetConfig, EvalError, Record, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// KMMLU subject categories.
pub const KMMLU_CATEGORIES: [&str; 45] = [
    "Accounting",
    "Agricultural-Sciences",
    "Aviation-Engineering-and-Maintenance",
    "Biology",
    "Chemical-Engineering",
    "Chemistry",
    "Civil-Engineering",
    "Computer-Science",
    "Construction",
    "Criminal-Law",
    "Ecology",
    "Economics",
    "Education",
    "Electrical-Engineering",
    "Electronics-Engineering",
    "Energy-Management",
    "Environmental-Science",
    "Fashion",
    "Food-Processing",
    "Gas-Technology-and-Engineering",
    "Geomatics",
    "Health",
    "Industrial-Engineer",
    "Information-Technology",
    "Interior-Architecture-and-Design",
    "Korean-History",
    "Law",
    "Machine-Design-and-Manufacturing",
    "Management",
    "Maritime-Engineering",
    "Marketing",
    "Materials-Engineering",
    "Math",
    "Mechanical-Engineering",
    "Nondestructive-Testing",
    "Patent",
    "Political-Science-and-Sociology",
    "Psychology",
    "Public-Safety",
    "Railway-and-Automotive-Engineering",
    "Real-Estate",
    "Refrigerating-Machinery",
    "Social-Welfare",
    "Taxation",
    "Telecommunications-and-Wireless-Technology",
];

/// Loads the records of one dataset category.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn load(&self, dataset_id: &str, category: &str, split: &str) -> Result<Vec<Record>>;
}

/// Parse CSV text into records.
pub fn parse_records(data: &[u8]) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    reader
        .deserialize::<Record>()
        .enumerate()
        .map(|(row, record)| {
            record.map_err(|e| EvalError::ParseError(format!("row {}: {e}", row + 1)))
        })
        .collect()
}

/// Downloads `data/{category}-{split}.csv` from a dataset hub.
pub struct HubSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HubSource {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(EvalError::Network)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn url(&self, dataset_id: &str, category: &str, split: &str) -> String {
        format!(
            "{}/datasets/{dataset_id}/resolve/main/data/{category}-{split}.csv",
            self.endpoint.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl DatasetSource for HubSource {
    async fn load(&self, dataset_id: &str, category: &str, split: &str) -> Result<Vec<Record>> {
        let url = self.url(dataset_id, category, split);
        info!(url = %url, "Downloading dataset");

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let records = parse_records(&bytes)?;

        info!(category = category, count = records.len(), "Loaded records");
        Ok(records)
    }
}

/// Reads `{dir}/{category}-{split}.csv` from local disk.
pub struct LocalSource {
    dir: PathBuf,
}

impl LocalSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DatasetSource for LocalSource {
    async fn load(&self, _dataset_id: &str, category: &str, split: &str) -> Result<Vec<Record>> {
        let path = self.dir.join(format!("{category}-{split}.csv"));
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| EvalError::io(format!("reading dataset file {}", path.display()), e))?;
        let records = parse_records(&data)?;

        info!(category = category, count = records.len(), "Loaded records");
        Ok(records)
    }
}

/// Build the source selected by config: local directory if set, else the hub.
pub fn source_from_config(config: &DatasetConfig) -> Result<Box<dyn DatasetSource>> {
    Ok(match &config.local_dir {
        Some(dir) => Box::new(LocalSource::new(dir.clone())),
        None => Box::new(HubSource::new(config.hub_endpoint.clone())?),
    })
}
