use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_cards_table::Migration),
            Box::new(m20250301_000002_create_purchase_records_table::Migration),
            Box::new(m20250301_000003_create_fulfillment_keys_table::Migration),
            Box::new(m20250301_000004_create_cart_entries_table::Migration),
            Box::new(m20250301_000005_create_artist_member_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20250301_000001_create_cards_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_cards_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Cards::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Cards::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Cards::ArtistId).uuid().not_null())
                        .col(ColumnDef::new(Cards::Name).string().not_null())
                        .col(ColumnDef::new(Cards::Price).decimal().not_null().default(0))
                        .col(ColumnDef::new(Cards::TotalSupply).integer().null())
                        .col(
                            ColumnDef::new(Cards::CurrentSupply)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Cards::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Cards::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cards_artist_id")
                        .table(Cards::Table)
                        .col(Cards::ArtistId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Cards::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Cards {
        Table,
        Id,
        ArtistId,
        Name,
        Price,
        TotalSupply,
        CurrentSupply,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000002_create_purchase_records_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_purchase_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseRecords::UserId).uuid().not_null())
                        .col(ColumnDef::new(PurchaseRecords::CardId).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseRecords::SerialNumber)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRecords::PricePaid)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRecords::QuantityInOrder)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(ColumnDef::new(PurchaseRecords::EventId).string().not_null())
                        .col(
                            ColumnDef::new(PurchaseRecords::PaymentReference)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRecords::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRecords::PurchasedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Serial numbers are dense per card; a colliding insert must fail loudly.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_purchase_records_card_serial")
                        .table(PurchaseRecords::Table)
                        .col(PurchaseRecords::CardId)
                        .col(PurchaseRecords::SerialNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_records_user_id")
                        .table(PurchaseRecords::Table)
                        .col(PurchaseRecords::UserId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseRecords {
        Table,
        Id,
        UserId,
        CardId,
        SerialNumber,
        PricePaid,
        QuantityInOrder,
        EventId,
        PaymentReference,
        Status,
        PurchasedAt,
    }
}

mod m20250301_000003_create_fulfillment_keys_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_create_fulfillment_keys_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(FulfillmentKeys::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(FulfillmentKeys::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(FulfillmentKeys::EventId).string().not_null())
                        .col(ColumnDef::new(FulfillmentKeys::CardId).uuid().not_null())
                        .col(ColumnDef::new(FulfillmentKeys::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(FulfillmentKeys::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(FulfillmentKeys::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Redelivered events hit this constraint instead of re-allocating.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_fulfillment_keys_event_card")
                        .table(FulfillmentKeys::Table)
                        .col(FulfillmentKeys::EventId)
                        .col(FulfillmentKeys::CardId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(FulfillmentKeys::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum FulfillmentKeys {
        Table,
        Id,
        EventId,
        CardId,
        UserId,
        Quantity,
        CreatedAt,
    }
}

mod m20250301_000004_create_cart_entries_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000004_create_cart_entries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CartEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CartEntries::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CartEntries::UserId).uuid().not_null())
                        .col(ColumnDef::new(CartEntries::CardId).uuid().not_null())
                        .col(ColumnDef::new(CartEntries::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartEntries::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_entries_user_id")
                        .table(CartEntries::Table)
                        .col(CartEntries::UserId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CartEntries {
        Table,
        Id,
        UserId,
        CardId,
        Quantity,
        CreatedAt,
    }
}

mod m20250301_000005_create_artist_member_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000005_create_artist_member_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ArtistMembers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ArtistMembers::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ArtistMembers::ArtistId).uuid().not_null())
                        .col(ColumnDef::new(ArtistMembers::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(ArtistMembers::FirstPurchaseAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One membership per (artist, user); the ledger increments only
            // when this insert goes through.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_artist_members_artist_user")
                        .table(ArtistMembers::Table)
                        .col(ArtistMembers::ArtistId)
                        .col(ArtistMembers::UserId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ArtistMemberLedgers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ArtistMemberLedgers::ArtistId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ArtistMemberLedgers::MemberCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ArtistMemberLedgers::UpdatedAt)
                                .timestamp()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ArtistMemberLedgers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ArtistMembers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ArtistMembers {
        Table,
        Id,
        ArtistId,
        UserId,
        FirstPurchaseAt,
    }

    #[derive(DeriveIden)]
    enum ArtistMemberLedgers {
        Table,
        ArtistId,
        MemberCount,
        UpdatedAt,
    }
}
