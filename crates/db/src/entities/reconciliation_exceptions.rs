//! `SeaORM` Entity for reconciliation_exceptions table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "reconciliation_exceptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub report_id: Uuid,
    pub check_id: Uuid,
    pub check_type: String,
    pub severity: String,
    pub description: String,
    pub expected_value: Decimal,
    pub actual_value: Decimal,
    pub difference: Decimal,
    pub currency: Option<String>,
    pub affected_entity: Option<String>,
    pub metadata: Json,
    pub auto_corrected: bool,
    pub resolved_at: Option<DateTimeWithTimeZone>,
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
    #[sea_orm(
        belongs_to = "super::reconciliation_checks::Entity",
        from = "Column::CheckId",
        to = "super::reconciliation_checks::Column::Id"
    )]
    ReconciliationChecks,
}

impl Related<super::reconciliation_reports::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReconciliationReports.def()
    }
}

impl Related<super::reconciliation_checks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReconciliationChecks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
