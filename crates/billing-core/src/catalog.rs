//! Product Catalog
//!
//! The store catalog is a collaborator: we only read products from it.

use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::path::Path;

use crate::error::{BillingError, Result};
use crate::model::Product;

/// Read access to the store catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Product by catalog id; `NotFound` when absent
    async fn get_product(&self, product_id: &str) -> Result<Product>;

    /// All sellable products, in catalog order
    async fn list_products(&self) -> Result<Vec<Product>>;
}

/// Catalog held in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryCatalog {
    products: Vec<Product>,
}

impl MemoryCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    /// The four plans the storefront ships with
    pub fn with_default_plans() -> Self {
        let plan = |id: &str, sku: &str, name: &str, price, description: &str| Product {
            id: id.into(),
            sku: sku.into(),
            name: name.into(),
            price,
            short_description: Some(description.into()),
        };

        Self::new(vec![
            plan(
                "1",
                "basic-monthly",
                "Basic Plan Monthly",
                dec!(49.90),
                "Everything a small team needs to start.",
            ),
            plan(
                "2",
                "basic-annual",
                "Basic Plan Annual",
                dec!(499.00),
                "Basic, billed once a year.",
            ),
            plan(
                "3",
                "pro-monthly",
                "Pro Plan Monthly",
                dec!(99.90),
                "Unlimited profiles and posts.",
            ),
            plan(
                "4",
                "pro-annual",
                "Pro Plan Annual",
                dec!(999.00),
                "Pro, billed once a year.",
            ),
        ])
    }

    /// Load a JSON array of products
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| {
            BillingError::ConfigurationMissing(format!("catalog {}: {e}", path.display()))
        })?;
        let products: Vec<Product> = serde_json::from_slice(&raw)
            .map_err(|e| BillingError::invalid(format!("catalog {}: {e}", path.display())))?;

        tracing::info!(path = %path.display(), products = products.len(), "Catalog loaded");
        Ok(Self::new(products))
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get_product(&self, product_id: &str) -> Result<Product> {
        self.products
            .iter()
            .find(|p| p.id == product_id)
            .cloned()
            .ok_or_else(|| BillingError::not_found(format!("Product {product_id}")))
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        Ok(self.products.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_plans() {
        let catalog = MemoryCatalog::with_default_plans();
        let pro = catalog.get_product("3").await.unwrap();
        assert_eq!(pro.sku, "pro-monthly");
        assert_eq!(pro.price, dec!(99.90));
        assert_eq!(catalog.list_products().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_product() {
        let catalog = MemoryCatalog::default();
        let err = catalog.get_product("99").await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }

    #[test]
    fn test_load_from_json() {
        let path = std::env::temp_dir()
            .join(format!("catalog-{}.json", uuid::Uuid::new_v4().simple()));
        std::fs::write(
            &path,
            r#"[{"id": "7", "sku": "Team Plan", "name": "Team Plan Monthly", "price": "149.90"}]"#,
        )
        .unwrap();

        let catalog = MemoryCatalog::from_json_file(&path).unwrap();
        assert_eq!(catalog.products.len(), 1);
        assert_eq!(catalog.products[0].price, dec!(149.90));
        assert_eq!(catalog.products[0].short_description, None);

        std::fs::remove_file(&path).unwrap();
    }
}
