#[allow(warnings, clippy::all)]
pub(crate) mod url_mapping {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "url_mappings")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        #[sea_orm(column_type = "Text")]
        pub original_url: String,
        #[sea_orm(unique)]
        pub short_code: String,
        pub owner_id: Uuid,
        pub owner_username: String,
        pub created_at_seconds: i64,
        pub click_count: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::click_event::Entity")]
        ClickEvent,
    }

    impl Related<super::click_event::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::ClickEvent.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

#[allow(warnings, clippy::all)]
pub(crate) mod click_event {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "click_events")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub url_mapping_id: Uuid,
        pub clicked_at_seconds: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::url_mapping::Entity",
            from = "Column::UrlMappingId",
            to = "super::url_mapping::Column::Id",
            on_delete = "Cascade"
        )]
        UrlMapping,
    }

    impl Related<super::url_mapping::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::UrlMapping.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
