use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub email: String,

    pub name: String,

    /// Yandex OAuth access token
    pub yandex_token: Option<String>,

    pub yandex_refresh_token: Option<String>,

    /// RFC 3339
    pub yandex_token_expires_at: Option<String>,

    /// Issued API key (64-char hex string)
    #[sea_orm(unique)]
    pub api_key: Option<String>,

    /// RFC 3339
    pub api_key_expires_at: Option<String>,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
