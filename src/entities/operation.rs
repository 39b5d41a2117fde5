use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row of the stock ledger.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "operations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub product_id: i32,
    /// `CREATE_PRODUCT`, `ADJUST_PRODUCT`, `ADD_STOCK`, `REMOVE_STOCK` or `DELETE_PRODUCT`
    pub op_type: String,
    pub quantity: i32,
    pub reason: String,
    /// Id of the acting user
    pub created_by: i32,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
