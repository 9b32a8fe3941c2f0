use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

const IDX_TASKS_USER_ID: &str = "idx-tasks-user_id";
const IDX_TASKS_USER_ID_TITLE: &str = "idx-tasks-user_id-title";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .name(IDX_TASKS_USER_ID)
                    .table(Tasks::Table)
                    .col(Tasks::UserId)
                    .to_owned(),
            )
            .await?;

        // A title may repeat across users but not within one user's tasks.
        manager
            .create_index(
                Index::create()
                    .name(IDX_TASKS_USER_ID_TITLE)
                    .table(Tasks::Table)
                    .col(Tasks::UserId)
                    .col(Tasks::Title)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name(IDX_TASKS_USER_ID_TITLE)
                    .table(Tasks::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name(IDX_TASKS_USER_ID)
                    .table(Tasks::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    UserId,
    Title,
}
