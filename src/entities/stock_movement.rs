use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Append-only audit record of a quantity change on a `warehouse_stocks` row.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub warehouse_stock_id: i32,
    pub movement_type: MovementType,
    /// Signed delta applied to the stock row
    pub quantity: i32,
    pub reference: String,
    #[sea_orm(column_type = "Text")]
    pub notes: String,
    pub created_by: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::warehouse_stock::Entity",
        from = "Column::WarehouseStockId",
        to = "super::warehouse_stock::Column::Id",
        on_delete = "Cascade"
    )]
    WarehouseStock,
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::CreatedBy",
        to = "super::account::Column::Id",
        on_delete = "SetNull"
    )]
    Account,
}

impl Related<super::warehouse_stock::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WarehouseStock.def()
    }
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Reason code carried by every movement
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum MovementType {
    #[sea_orm(string_value = "import")]
    Import,
    #[sea_orm(string_value = "export")]
    Export,
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "adjust")]
    Adjust,
    #[sea_orm(string_value = "sale")]
    Sale,
}
