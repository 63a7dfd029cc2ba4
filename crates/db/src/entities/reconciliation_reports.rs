//! `SeaORM` Entity for reconciliation_reports table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "reconciliation_reports")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub run_type: String,
    pub status: String,
    pub started_at: DateTimeWithTimeZone,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub total_checks: i32,
    pub passed_checks: i32,
    pub failed_checks: i32,
    pub exceptions_count: i32,
    pub error_message: Option<String>,
    pub metadata: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::reconciliation_checks::Entity")]
    ReconciliationChecks,
    #[sea_orm(has_many = "super::reconciliation_exceptions::Entity")]
    ReconciliationExceptions,
}

impl Related<super::reconciliation_checks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReconciliationChecks.def()
    }
}

impl Related<super::reconciliation_exceptions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReconciliationExceptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
