use sea_orm_migration::prelude::*;

const LAST_UPDATED_INDEX: &str = "idx-inventory-last_updated";

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Inventory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Inventory::Vin)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Inventory::CarModel).string().not_null())
                    .col(ColumnDef::new(Inventory::PartName).string().not_null())
                    .col(ColumnDef::new(Inventory::Quantity).big_integer().not_null())
                    .col(ColumnDef::new(Inventory::Price).decimal_len(10, 2).not_null())
                    .col(
                        ColumnDef::new(Inventory::DiscountEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    // Unix microseconds, see the entity.
                    .col(ColumnDef::new(Inventory::LastUpdated).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        // Both the watermark and change detection scan by this column.
        if !manager.has_index("inventory", LAST_UPDATED_INDEX).await? {
            manager
                .create_index(
                    Index::create()
                        .name(LAST_UPDATED_INDEX)
                        .table(Inventory::Table)
                        .col(Inventory::LastUpdated)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Inventory::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(Iden)]
enum Inventory {
    Table,
    Vin,
    CarModel,
    PartName,
    Quantity,
    Price,
    DiscountEnabled,
    LastUpdated,
}
