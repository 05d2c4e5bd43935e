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
                    .table(FaucetClaims::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FaucetClaims::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FaucetClaims::UserId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FaucetClaims::RecipientAddress)
                            .string_len(42)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FaucetClaims::ChainId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FaucetClaims::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(FaucetClaims::TxHash).string_len(66).null())
                    .col(ColumnDef::new(FaucetClaims::Error).text().null())
                    .col(
                        ColumnDef::new(FaucetClaims::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(FaucetClaims::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    // Stale sweep scans by status + updated_at
                    .index(
                        Index::create()
                            .name("idx_faucet_claims_status_updated")
                            .col(FaucetClaims::Status)
                            .col(FaucetClaims::UpdatedAt),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one live (non-failed) claim per recipient address and per
        // requesting user. sea-query's Index::create has no WHERE clause, so
        // the partial unique indexes go in raw.
        let connection = manager.get_connection();
        connection
            .execute_unprepared(
                "CREATE UNIQUE INDEX uq_faucet_claims_live_recipient \
                 ON faucet_claims (recipient_address) WHERE status <> 'failed'",
            )
            .await?;
        connection
            .execute_unprepared(
                "CREATE UNIQUE INDEX uq_faucet_claims_live_user \
                 ON faucet_claims (user_id) WHERE status <> 'failed'",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FaucetClaims::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum FaucetClaims {
    Table,
    Id,
    UserId,
    RecipientAddress,
    ChainId,
    Status,
    TxHash,
    Error,
    CreatedAt,
    UpdatedAt,
}
