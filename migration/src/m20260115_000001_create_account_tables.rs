use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Users are keyed by the opaque identity key supplied by the
        // upstream auth collaborator.
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::DisplayName).string_len(64).null())
                    .col(ColumnDef::new(Users::Metadata).json_binary().null())
                    .col(ColumnDef::new(Users::DefaultAddressId).big_integer().null())
                    .col(
                        ColumnDef::new(Users::LastSeenAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WalletAddresses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WalletAddresses::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WalletAddresses::UserId)
                            .string_len(128)
                            .not_null(),
                    )
                    // EIP-55 checksum form, globally unique across all users
                    .col(
                        ColumnDef::new(WalletAddresses::Address)
                            .string_len(42)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WalletAddresses::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WalletAddresses::VerificationMethod)
                            .string_len(16)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WalletAddresses::VerifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WalletAddresses::RegistryMetadata)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WalletAddresses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WalletAddresses::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_wallet_addresses_user")
                            .from(WalletAddresses::Table, WalletAddresses::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .index(
                        Index::create()
                            .name("uq_wallet_addresses_address")
                            .col(WalletAddresses::Address)
                            .unique(),
                    )
                    .index(
                        Index::create()
                            .name("idx_wallet_addresses_user_status")
                            .col(WalletAddresses::UserId)
                            .col(WalletAddresses::Status),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WalletAddresses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    DisplayName,
    Metadata,
    DefaultAddressId,
    LastSeenAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum WalletAddresses {
    Table,
    Id,
    UserId,
    Address,
    Status,
    VerificationMethod,
    VerifiedAt,
    RegistryMetadata,
    CreatedAt,
    UpdatedAt,
}
