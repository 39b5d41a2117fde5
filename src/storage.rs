use std::collections::HashMap;

use crate::entities;
use crate::errors::AppError;
use crate::settings::Database as DbCfg;
use chrono::Utc;
use migration::MigratorTrait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

pub const USERNAME_LEN: std::ops::RangeInclusive<usize> = 4..=32;
pub const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 6..=32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: i64,
}

impl From<entities::user::Model> for User {
    fn from(model: entities::user::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            password_hash: model.password_hash,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i32,
}

impl From<entities::product::Model> for Product {
    fn from(model: entities::product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            unit_price: model.unit_price,
            quantity: model.quantity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub unit_price: f64,
    #[serde(default)]
    pub quantity: i32,
}

impl NewProduct {
    fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("Product name is required".into()));
        }
        if self.unit_price <= 0.0 {
            return Err(AppError::BadRequest(
                "Unit price must be greater than 0".into(),
            ));
        }
        if self.quantity < 0 {
            return Err(AppError::BadRequest("Quantity cannot be negative".into()));
        }
        Ok(())
    }
}

/// Partial product update. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub unit_price: Option<f64>,
    pub quantity: Option<i32>,
    pub reason: Option<String>,
}

impl ProductPatch {
    fn validate(&self) -> Result<(), AppError> {
        if self.name.is_none() && self.unit_price.is_none() && self.quantity.is_none() {
            return Err(AppError::BadRequest("Nothing to update".into()));
        }
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::BadRequest("Product name is required".into()));
        }
        if self.unit_price.is_some_and(|p| p <= 0.0) {
            return Err(AppError::BadRequest(
                "Unit price must be greater than 0".into(),
            ));
        }
        if self.quantity.is_some_and(|q| q < 0) {
            return Err(AppError::BadRequest("Quantity cannot be negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    CreateProduct,
    AdjustProduct,
    AddStock,
    RemoveStock,
    DeleteProduct,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::CreateProduct => "CREATE_PRODUCT",
            OperationType::AdjustProduct => "ADJUST_PRODUCT",
            OperationType::AddStock => "ADD_STOCK",
            OperationType::RemoveStock => "REMOVE_STOCK",
            OperationType::DeleteProduct => "DELETE_PRODUCT",
        }
    }
}

/// Ledger row joined with product name and acting username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationReport {
    pub id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub operation_type: String,
    pub quantity: i32,
    pub reason: String,
    pub created_by: i32,
    pub created_by_username: String,
    pub created_at: i64,
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, AppError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

// User management functions

pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<User, AppError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};
    use entities::user::{Column, Entity};

    if !USERNAME_LEN.contains(&username.chars().count()) {
        return Err(AppError::BadRequest(
            "Username must be at least 4 characters and at most 32 characters".into(),
        ));
    }
    if !PASSWORD_LEN.contains(&password.chars().count()) {
        return Err(AppError::BadRequest(
            "Password must be at least 6 characters and at most 32 characters".into(),
        ));
    }

    // usernames of soft-deleted accounts stay taken
    if Entity::find()
        .filter(Column::Username.eq(username))
        .one(db)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("Username already exists".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Other(format!("Password hashing failed: {}", e)))?
        .to_string();

    let user = entities::user::ActiveModel {
        username: Set(username.to_string()),
        password_hash: Set(password_hash),
        created_at: Set(Utc::now().timestamp()),
        deleted_at: Set(None),
        ..Default::default()
    };

    let model = user.insert(db).await?;
    Ok(model.into())
}

/// Active (not soft-deleted) user by name.
pub async fn get_user_by_username(
    db: &DatabaseConnection,
    username: &str,
) -> Result<Option<User>, AppError> {
    use entities::user::{Column, Entity};

    let model = Entity::find()
        .filter(Column::Username.eq(username))
        .filter(Column::DeletedAt.is_null())
        .one(db)
        .await?;
    Ok(model.map(User::from))
}

pub async fn verify_user_password(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let Some(user) = get_user_by_username(db, username).await? else {
        return Ok(None);
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| AppError::Other(format!("Invalid password hash: {}", e)))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
    {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// Marks the user deleted. Returns `false` if there was no active user.
pub async fn soft_delete_user(db: &DatabaseConnection, username: &str) -> Result<bool, AppError> {
    use entities::user::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(
            Column::DeletedAt,
            sea_orm::sea_query::Expr::value(Utc::now().timestamp()),
        )
        .filter(Column::Username.eq(username))
        .filter(Column::DeletedAt.is_null())
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

// Product and stock ledger functions

pub async fn list_products(db: &DatabaseConnection) -> Result<Vec<Product>, AppError> {
    use entities::product::{Column, Entity};

    let products = Entity::find()
        .filter(Column::DeletedAt.is_null())
        .order_by_asc(Column::Id)
        .all(db)
        .await?;
    Ok(products.into_iter().map(Product::from).collect())
}

pub async fn get_product(db: &DatabaseConnection, id: i32) -> Result<Option<Product>, AppError> {
    Ok(find_active_product(db, id).await?.map(Product::from))
}

pub async fn create_product(
    db: &DatabaseConnection,
    input: NewProduct,
    user_id: i32,
) -> Result<Product, AppError> {
    input.validate()?;
    let now = Utc::now().timestamp();

    let txn = db.begin().await?;
    let product = entities::product::ActiveModel {
        name: Set(input.name.trim().to_string()),
        unit_price: Set(input.unit_price),
        quantity: Set(input.quantity),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    record_operation(
        &txn,
        product.id,
        OperationType::CreateProduct,
        product.quantity,
        "Initial product creation",
        user_id,
    )
    .await?;
    txn.commit().await?;

    tracing::info!(product_id = product.id, user_id, "Created product");
    Ok(product.into())
}

pub async fn update_product(
    db: &DatabaseConnection,
    id: i32,
    patch: ProductPatch,
    user_id: i32,
) -> Result<Product, AppError> {
    patch.validate()?;

    let txn = db.begin().await?;
    let existing = find_active_product(&txn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let mut active: entities::product::ActiveModel = existing.into();
    if let Some(name) = &patch.name {
        active.name = Set(name.trim().to_string());
    }
    if let Some(price) = patch.unit_price {
        active.unit_price = Set(price);
    }
    if let Some(quantity) = patch.quantity {
        active.quantity = Set(quantity);
    }
    active.updated_at = Set(Utc::now().timestamp());
    let product = active.update(&txn).await?;

    let reason = patch
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Product adjustment".to_string());
    record_operation(
        &txn,
        id,
        OperationType::AdjustProduct,
        product.quantity,
        &reason,
        user_id,
    )
    .await?;
    txn.commit().await?;

    tracing::info!(product_id = id, user_id, "Adjusted product");
    Ok(product.into())
}

pub async fn delete_product(db: &DatabaseConnection, id: i32, user_id: i32) -> Result<(), AppError> {
    let txn = db.begin().await?;
    let existing = find_active_product(&txn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let quantity = existing.quantity;
    let mut active: entities::product::ActiveModel = existing.into();
    active.deleted_at = Set(Some(Utc::now().timestamp()));
    active.update(&txn).await?;

    record_operation(
        &txn,
        id,
        OperationType::DeleteProduct,
        quantity,
        "Product deletion",
        user_id,
    )
    .await?;
    txn.commit().await?;

    tracing::info!(product_id = id, user_id, "Deleted product");
    Ok(())
}

/// Adds (`delta > 0`) or removes (`delta < 0`) stock.
pub async fn adjust_stock(
    db: &DatabaseConnection,
    id: i32,
    delta: i32,
    reason: Option<String>,
    user_id: i32,
) -> Result<Product, AppError> {
    if delta == 0 {
        return Err(AppError::BadRequest("Quantity must be positive".into()));
    }
    let (op_type, default_reason) = if delta > 0 {
        (OperationType::AddStock, "Import stock")
    } else {
        (OperationType::RemoveStock, "Deliver stock")
    };

    let txn = db.begin().await?;
    let existing = find_active_product(&txn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let quantity = existing
        .quantity
        .checked_add(delta)
        .ok_or_else(|| AppError::BadRequest("Quantity out of range".into()))?;
    if quantity < 0 {
        return Err(AppError::Conflict("Insufficient stock".into()));
    }

    let mut active: entities::product::ActiveModel = existing.into();
    active.quantity = Set(quantity);
    active.updated_at = Set(Utc::now().timestamp());
    let product = active.update(&txn).await?;

    let reason = reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| default_reason.to_string());
    record_operation(&txn, id, op_type, delta.abs(), &reason, user_id).await?;
    txn.commit().await?;

    tracing::info!(product_id = id, user_id, delta, "Adjusted stock");
    Ok(product.into())
}

/// Ledger, newest first.
pub async fn products_report(db: &DatabaseConnection) -> Result<Vec<OperationReport>, AppError> {
    use entities::operation::Column;

    let operations = entities::Operation::find()
        .order_by_desc(Column::CreatedAt)
        .order_by_desc(Column::Id)
        .all(db)
        .await?;

    // deleted products and users still name their ledger rows
    let product_names: HashMap<i32, String> = entities::Product::find()
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect();
    let usernames: HashMap<i32, String> = entities::User::find()
        .all(db)
        .await?
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect();

    Ok(operations
        .into_iter()
        .map(|op| OperationReport {
            product_name: product_names.get(&op.product_id).cloned().unwrap_or_default(),
            created_by_username: usernames.get(&op.created_by).cloned().unwrap_or_default(),
            id: op.id,
            product_id: op.product_id,
            operation_type: op.op_type,
            quantity: op.quantity,
            reason: op.reason,
            created_by: op.created_by,
            created_at: op.created_at,
        })
        .collect())
}

async fn find_active_product<C: ConnectionTrait>(
    conn: &C,
    id: i32,
) -> Result<Option<entities::product::Model>, AppError> {
    use entities::product::{Column, Entity};

    Ok(Entity::find_by_id(id)
        .filter(Column::DeletedAt.is_null())
        .one(conn)
        .await?)
}

async fn record_operation<C: ConnectionTrait>(
    conn: &C,
    product_id: i32,
    op_type: OperationType,
    quantity: i32,
    reason: &str,
    user_id: i32,
) -> Result<(), AppError> {
    entities::operation::ActiveModel {
        product_id: Set(product_id),
        op_type: Set(op_type.as_str().to_string()),
        quantity: Set(quantity),
        reason: Set(reason.to_string()),
        created_by: Set(user_id),
        created_at: Set(Utc::now().timestamp()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(())
}
