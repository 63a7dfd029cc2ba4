//! `SeaORM` Entity for reconciliation_checks table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "reconciliation_checks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub report_id: Uuid,
    pub check_type: String,
    pub expected_value: Decimal,
    pub actual_value: Decimal,
    pub difference: Decimal,
    pub passed: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::reconciliation_reports::Entity",
        from = "Column::ReportId",
        to = "super::reconciliation_reports::Column::Id"
    )]
    ReconciliationReports,
    #[sea_orm(has_many = "super::reconciliation_exceptions::Entity")]
    ReconciliationExceptions,
}

impl Related<super::reconciliation_reports::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReconciliationReports.def()
    }
}

impl Related<super::reconciliation_exceptions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReconciliationExceptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
