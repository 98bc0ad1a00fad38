use crate::commands::{with_database, CommandResult};

pub fn run() -> CommandResult {
    let applied = with_database("migrate", |_, pool| async move {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))
    });

    match applied {
        Ok(applied) => CommandResult::success(
            "migrate",
            format!("schema is current ({applied} migrations applied)"),
        ),
        Err(failure) => failure,
    }
}
