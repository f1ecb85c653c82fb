//! Per-record field validation.
//!
//! Validation is a pure function of the item and the configured rules. Every
//! violated rule is reported; a malformed item is a failed outcome, never an
//! error.

use crate::config::ValidationConfig;
use crate::model::{BatchItem, ValidationOutcome};
use anyhow::Result;

/// Validates one chunk of indexed items on a blocking worker.
///
/// An `Err` fails the whole chunk, which fails the batch.
pub trait ChunkValidator: Send + Sync {
    fn check_chunk(&self, chunk: Vec<(usize, BatchItem)>) -> Result<Vec<ValidationOutcome>>;
}

/// Applies [`ValidationConfig`] rules to batch items.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    rules: ValidationConfig,
}

impl Validator {
    pub fn new(rules: ValidationConfig) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ValidationConfig {
        &self.rules
    }

    /// Validate the item found at `index` in the submitted batch.
    pub fn validate(&self, index: usize, item: BatchItem) -> ValidationOutcome {
        let reasons = self.violations(&item);
        ValidationOutcome {
            index,
            valid: reasons.is_empty(),
            reasons,
            item,
        }
    }

    /// Validate a chunk of indexed items, preserving order.
    pub fn validate_chunk(&self, chunk: Vec<(usize, BatchItem)>) -> Vec<ValidationOutcome> {
        chunk
            .into_iter()
            .map(|(index, item)| self.validate(index, item))
            .collect()
    }

    fn violations(&self, item: &BatchItem) -> Vec<String> {
        let rules = &self.rules;
        let mut reasons = Vec::new();

        match non_blank(&item.sku) {
            None => reasons.push("SKU is required".to_string()),
            Some(sku) if char_len(sku) > rules.max_sku_length => reasons.push(format!(
                "SKU must not exceed {} characters",
                rules.max_sku_length
            )),
            Some(_) => {}
        }

        match non_blank(&item.name) {
            None => reasons.push("name is required".to_string()),
            Some(name) => {
                let len = char_len(name);
                if len < rules.min_name_length || len > rules.max_name_length {
                    reasons.push(format!(
                        "name must be between {} and {} characters",
                        rules.min_name_length, rules.max_name_length
                    ));
                }
            }
        }

        if let Some(description) = &item.description {
            if char_len(description) > rules.max_description_length {
                reasons.push(format!(
                    "description must not exceed {} characters",
                    rules.max_description_length
                ));
            }
        }

        match item.price {
            None => reasons.push("price is required".to_string()),
            Some(price) if !price.is_finite() => {
                reasons.push("price must be a finite number".to_string())
            }
            Some(price) if price < 0.0 => reasons.push("price must not be negative".to_string()),
            Some(price) if price > rules.max_price => {
                reasons.push(format!("price must not exceed {:.2}", rules.max_price))
            }
            Some(_) => {}
        }

        check_max_len(&mut reasons, "category", &item.category, rules.max_category_length);
        check_max_len(&mut reasons, "brand", &item.brand, rules.max_brand_length);

        if item.image_urls.len() > rules.max_image_urls {
            reasons.push(format!(
                "at most {} image URLs are allowed, got {}",
                rules.max_image_urls,
                item.image_urls.len()
            ));
        }
        for (i, url) in item.image_urls.iter().enumerate() {
            if url.trim().is_empty() {
                reasons.push(format!("image URL {} is blank", i));
            } else if char_len(url) > rules.max_image_url_length {
                reasons.push(format!(
                    "image URL {} must not exceed {} characters",
                    i, rules.max_image_url_length
                ));
            }
        }

        if item.attributes.len() > rules.max_attributes {
            reasons.push(format!(
                "at most {} attributes are allowed, got {}",
                rules.max_attributes,
                item.attributes.len()
            ));
        }
        if item.attributes.keys().any(|k| k.trim().is_empty()) {
            reasons.push("attribute names must not be blank".to_string());
        }

        reasons
    }
}

impl ChunkValidator for Validator {
    fn check_chunk(&self, chunk: Vec<(usize, BatchItem)>) -> Result<Vec<ValidationOutcome>> {
        Ok(self.validate_chunk(chunk))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn char_len(s: &str) -> usize {
    s.trim().chars().count()
}

fn check_max_len(reasons: &mut Vec<String>, field: &str, value: &Option<String>, max: usize) {
    if let Some(v) = value {
        if char_len(v) > max {
            reasons.push(format!("{} must not exceed {} characters", field, max));
        }
    }
}
