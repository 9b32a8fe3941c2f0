pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_tasks_table;
mod m20250309_000001_add_task_priority;
mod m20250316_000001_add_task_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_tasks_table::Migration),
            Box::new(m20250309_000001_add_task_priority::Migration),
            Box::new(m20250316_000001_add_task_indexes::Migration),
        ]
    }
}
