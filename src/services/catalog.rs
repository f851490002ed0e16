use crate::{
    db::map_unique_violation,
    entities::{category, product, Category, CategoryModel, Product, ProductModel},
    errors::{FieldError, ServiceError},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument};
use utoipa::ToSchema;
use validator::Validate;

/// Product together with the category it belongs to
#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: ProductModel,
    pub category: Option<CategoryModel>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCategoryInput {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateProductInput {
    pub category_id: i32,
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    #[validate(custom = "validate_non_negative_price")]
    pub price: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,
    #[serde(default)]
    #[validate(length(max = 100, message = "SKU must be at most 100 characters"))]
    pub sku: Option<String>,
}

fn validate_non_negative_price(price: &Decimal) -> Result<(), validator::ValidationError> {
    if price.is_sign_negative() && !price.is_zero() {
        let mut err = validator::ValidationError::new("price");
        err.message = Some("Price cannot be negative".into());
        return Err(err);
    }
    if price.fract() != Decimal::ZERO {
        let mut err = validator::ValidationError::new("price");
        err.message = Some("Price must be a whole amount".into());
        return Err(err);
    }
    Ok(())
}

/// Read side of the catalog plus the admin create/delete operations.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Newest first, optionally restricted to one category.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        category_id: Option<i32>,
    ) -> Result<Vec<ProductModel>, ServiceError> {
        let mut query = Product::find();
        if let Some(id) = category_id {
            query = query.filter(product::Column::CategoryId.eq(id));
        }
        Ok(query
            .order_by_desc(product::Column::CreatedAt)
            .order_by_desc(product::Column::Id)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: i32) -> Result<ProductDetail, ServiceError> {
        let (product, category) = Product::find_by_id(id)
            .find_also_related(Category)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;
        Ok(ProductDetail { product, category })
    }

    /// Loads every listed product in one query, keyed by id. Missing ids are simply absent.
    pub async fn products_by_ids(
        &self,
        ids: &[i32],
    ) -> Result<HashMap<i32, ProductModel>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let products = Product::find()
            .filter(product::Column::Id.is_in(ids.iter().copied()))
            .all(&*self.db)
            .await?;
        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Vec<CategoryModel>, ServiceError> {
        Ok(Category::find()
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn create_category(
        &self,
        input: CreateCategoryInput,
    ) -> Result<CategoryModel, ServiceError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::InvalidFields(vec![FieldError::required("name")]));
        }
        let category = category::ActiveModel {
            name: Set(name),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;
        info!(category_id = category.id, "Category created");
        Ok(category)
    }

    /// Deletes the category and, by cascade, its products.
    #[instrument(skip(self))]
    pub async fn delete_category(&self, id: i32) -> Result<(), ServiceError> {
        let result = Category::delete_by_id(id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Category {} not found", id)));
        }
        info!(category_id = id, "Category deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductModel, ServiceError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::InvalidFields(vec![FieldError::required("name")]));
        }
        if Category::find_by_id(input.category_id)
            .one(&*self.db)
            .await?
            .is_none()
        {
            return Err(ServiceError::field("category_id", "Unknown category"));
        }

        // blank skus are stored as NULL so they never collide
        let sku = input
            .sku
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let now = Utc::now();
        let product = product::ActiveModel {
            category_id: Set(input.category_id),
            name: Set(name),
            sku: Set(sku.clone()),
            description: Set(input.description),
            price: Set(input.price),
            image: Set(input.image),
            stock: Set(input.stock),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            map_unique_violation(e, || {
                ServiceError::Conflict(format!(
                    "A product with SKU {} already exists",
                    sku.as_deref().unwrap_or_default()
                ))
            })
        })?;
        info!(product_id = product.id, "Product created");
        Ok(product)
    }
}
