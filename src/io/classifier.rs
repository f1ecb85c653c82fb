//! Classification collaborator.
//!
//! Classification is best-effort metadata: the orchestrator calls it at most
//! once per inserted item and records failures without failing the batch.

use crate::error::ClassifierError;
use crate::model::InsertedItem;
use async_trait::async_trait;
use std::time::Duration;

/// Assigns a product-type label to an inserted item.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, item: &InsertedItem) -> Result<String, ClassifierError>;
}

/// Labels items by their normalized category.
///
/// Items without a category are rejected, which shows up as a per-item
/// classifier failure in the batch summary.
#[derive(Debug, Clone, Default)]
pub struct CategoryClassifier {
    latency: Option<Duration>,
}

impl CategoryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
        }
    }
}

#[async_trait]
impl Classifier for CategoryClassifier {
    async fn classify(&self, item: &InsertedItem) -> Result<String, ClassifierError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let category = item
            .item
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ClassifierError::Rejected(format!("no category for {}", item.key)))?;

        Ok(title_case(category))
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
