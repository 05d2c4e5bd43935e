use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Gates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Gates::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Gates::ChannelId).string_len(128).not_null())
                    .col(ColumnDef::new(Gates::ChainId).big_integer().not_null())
                    // Lower-cased hex form
                    .col(
                        ColumnDef::new(Gates::TokenAddress)
                            .string_len(42)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Gates::TokenSymbol).string_len(32).null())
                    .col(ColumnDef::new(Gates::TokenName).string_len(128).null())
                    .col(ColumnDef::new(Gates::TokenDecimals).small_integer().null())
                    // Raw integer string, smallest-unit precision
                    .col(ColumnDef::new(Gates::Threshold).string_len(96).not_null())
                    .col(
                        ColumnDef::new(Gates::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Gates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Gates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_gates_channel_active")
                            .col(Gates::ChannelId)
                            .col(Gates::Active),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Memberships::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Memberships::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Memberships::UserId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Memberships::ChannelId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Memberships::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Memberships::LastKnownBalance)
                            .string_len(96)
                            .not_null()
                            .default("0"),
                    )
                    .col(
                        ColumnDef::new(Memberships::LastCheckedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // Seeded to the epoch so new memberships are picked up by
                    // the very next recheck sweep.
                    .col(
                        ColumnDef::new(Memberships::NextCheckAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Memberships::WarnedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Memberships::KickedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Memberships::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Memberships::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("uq_memberships_user_channel")
                            .col(Memberships::UserId)
                            .col(Memberships::ChannelId)
                            .unique(),
                    )
                    .index(
                        Index::create()
                            .name("idx_memberships_next_check")
                            .col(Memberships::NextCheckAt),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Memberships::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Gates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Gates {
    Table,
    Id,
    ChannelId,
    ChainId,
    TokenAddress,
    TokenSymbol,
    TokenName,
    TokenDecimals,
    Threshold,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Memberships {
    Table,
    Id,
    UserId,
    ChannelId,
    Status,
    LastKnownBalance,
    LastCheckedAt,
    NextCheckAt,
    WarnedAt,
    KickedAt,
    CreatedAt,
    UpdatedAt,
}
