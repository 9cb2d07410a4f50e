use crate::commands::{self, CommandResult, EXIT_DB, EXIT_STORAGE};
use rulegate_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    let config = match commands::load_config("migrate") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match commands::current_thread_runtime("migrate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let outcome = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_STORAGE))?;
        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match outcome {
        Ok(()) => CommandResult::success("migrate", "database schema is up to date"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
